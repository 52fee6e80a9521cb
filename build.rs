use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own sources. The retrieval material and
// build output next to them are never scanned.
const SOURCE_ROOTS: &[&str] = &["cavi", "data", "cli", "tests", "benches"];

const FORBIDDEN_MARKERS: &[&str] = &[
    "FIXED", "CORRECTED", "FIXES", "FIX", "NEW", "CHANGED", "CHANGES", "CHANGE", "MODIFIED",
    "MODIFIES", "MODIFY", "UPDATED", "UPDATES", "UPDATE",
];

/// One source policy: the regex selecting candidate lines, a filter deciding
/// whether a candidate really violates the policy, and the advice printed
/// when it does.
struct Policy {
    name: &'static str,
    pattern: String,
    is_violation: fn(&str) -> bool,
    advice: &'static [&'static str],
}

// Collects the offending lines of one file for one policy.
struct Violations<'p> {
    policy: &'p Policy,
    file_path: PathBuf,
    lines: Vec<String>,
}

impl<'p> Violations<'p> {
    fn new(policy: &'p Policy, file_path: &Path) -> Self {
        Self {
            policy,
            file_path: file_path.to_path_buf(),
            lines: Vec::new(),
        }
    }

    fn into_error_message(self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.lines.len(),
            self.policy.name,
            self.file_path.display()
        );
        for line in &self.lines {
            error_msg.push_str(&format!("   {line}\n"));
        }
        error_msg.push('\n');
        for advice in self.policy.advice {
            error_msg.push_str(&format!("⚠️ {advice}\n"));
        }
        Some(error_msg)
    }
}

impl Sink for Violations<'_> {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if (self.policy.is_violation)(line_text) {
            self.lines.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    if let Err(e) = enforce_policies() {
        // `cargo` only shows build script output on failure, through stderr.
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn policies() -> Vec<Policy> {
    vec![
        Policy {
            name: "underscore-prefixed bindings",
            pattern: r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            is_violation: underscore_binding_in_code,
            advice: &[
                "Underscore-prefixed names are not allowed in this project.",
                "Either use the binding under its real name or remove it.",
            ],
        },
        Policy {
            name: "forbidden comment markers",
            pattern: format!(r"(//|/\*).*(?:{})", FORBIDDEN_MARKERS.join("|")),
            is_violation: |_| true,
            advice: &["Comments narrating edits (FIX, UPDATE and the like) are not allowed."],
        },
        Policy {
            name: "'**' in plain comments",
            pattern: r"(//|/\*).*\*\*".to_string(),
            is_violation: |line| !line.trim_start().starts_with("///"),
            advice: &["Emphasis markers belong in doc comments only."],
        },
        Policy {
            name: "all-uppercase comments",
            pattern: r"(//|/\*).*".to_string(),
            is_violation: comment_is_all_uppercase,
            advice: &["Write comments in sentence case, or delete them."],
        },
        Policy {
            name: "#[allow(dead_code)] attributes",
            pattern: r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            is_violation: |_| true,
            advice: &["Use the code or remove it; dead code is denied crate-wide."],
        },
    ]
}

fn enforce_policies() -> Result<(), Box<dyn Error>> {
    let policies = policies();
    let matchers = policies
        .iter()
        .map(|policy| RegexMatcher::new_line_matcher(&policy.pattern))
        .collect::<Result<Vec<_>, _>>()?;
    let mut searcher = Searcher::new();

    for path in source_files() {
        for (policy, matcher) in policies.iter().zip(&matchers) {
            let mut violations = Violations::new(policy, &path);
            searcher.search_path(matcher, &path, &mut violations)?;
            if let Some(error_message) = violations.into_error_message() {
                return Err(error_message.into());
            }
        }
    }
    Ok(())
}

fn source_files() -> Vec<PathBuf> {
    SOURCE_ROOTS
        .iter()
        .filter(|root| Path::new(root).is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
                .map(|e| e.into_path())
        })
        .collect()
}

// A match counts unless it sits in a comment or inside a string literal.
fn underscore_binding_in_code(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*') {
        return false;
    }
    let in_string = line
        .split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'));
    !in_string
}

fn comment_is_all_uppercase(line: &str) -> bool {
    let trimmed = line.trim_start();
    let comment = if let Some(rest) = trimmed.strip_prefix("//") {
        rest.trim_start_matches(['/', '!'])
    } else if let Some(idx) = line.find("/*") {
        let rest = &line[idx + 2..];
        rest.find("*/").map_or(rest, |end| &rest[..end])
    } else {
        return false;
    };
    let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}
