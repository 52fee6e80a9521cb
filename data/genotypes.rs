use super::generations::{Generations, read_generations};
use super::source::{GenotypeData, MISSING_GENOTYPE};
use super::{DataError, lines_of, open_text};
use ndarray::Array2;
use std::path::Path;

/// Decodes one genotype character.
fn parse_call(c: char) -> Option<u8> {
    match c {
        '0' => Some(0),
        '1' => Some(1),
        '2' => Some(2),
        '9' => Some(MISSING_GENOTYPE),
        _ => None,
    }
}

/// Parses a genotype row: every non-whitespace character is one call.
fn parse_row(
    path: &Path,
    line: &str,
    line_number: usize,
    out: &mut Vec<u8>,
) -> Result<(), DataError> {
    out.clear();
    for c in line.chars().filter(|c| !c.is_whitespace()) {
        let call = parse_call(c).ok_or_else(|| DataError::InvalidGenotype {
            path: path.to_path_buf(),
            line: line_number,
            column: out.len() + 1,
            token: c,
        })?;
        out.push(call);
    }
    Ok(())
}

/// Validates a genotype file and returns the number of loci (rows) it holds.
///
/// Every row must contain exactly `n_columns` calls drawn from `{0, 1, 2, 9}`.
/// Rows with fewer than two observed calls and a locus count that differs
/// from `expected_loci` are reported as warnings.
pub fn check_input_file(
    path: &Path,
    expected_loci: Option<usize>,
    n_columns: usize,
) -> Result<usize, DataError> {
    let mut locus_count = 0;
    let mut row = Vec::with_capacity(n_columns);
    for (index, line) in lines_of(open_text(path)?, path).enumerate() {
        let line = line?;
        let line_number = index + 1;
        parse_row(path, &line, line_number, &mut row)?;
        locus_count += 1;

        if row.len() != n_columns {
            return Err(DataError::ColumnCountMismatch {
                path: path.to_path_buf(),
                line: line_number,
                found: row.len(),
                expected: n_columns,
            });
        }

        match row.iter().filter(|&&g| g != MISSING_GENOTYPE).count() {
            0 => log::warn!(
                "Input Warning ({}): line {} has no nonmissing entries",
                path.display(),
                line_number
            ),
            1 => log::warn!(
                "Input Warning ({}): line {} only has 1 nonmissing entry",
                path.display(),
                line_number
            ),
            _ => {}
        }
    }

    if let Some(expected) = expected_loci {
        if expected != locus_count {
            log::warn!(
                "Input Warning ({}): {} loci were specified, but {} were found.",
                path.display(),
                expected,
                locus_count
            );
        }
    }

    Ok(locus_count)
}

/// Loads a validated genotype matrix, grouping samples by generation.
///
/// The matrix has one row per locus and one column per sample; column `i`
/// belongs to the generation on line `i` of the generation file. Within each
/// generation, individuals keep their column order.
pub fn read_snp_matrix(
    genotype_path: &Path,
    generation_path: &Path,
    expected_loci: Option<usize>,
) -> Result<GenotypeData, DataError> {
    log::info!("Loading genotype matrix from {}", genotype_path.display());
    let generations = read_generations(generation_path)?;
    let nloci = check_input_file(genotype_path, expected_loci, generations.n_samples())?;
    if nloci == 0 {
        return Err(DataError::NoLoci {
            path: genotype_path.to_path_buf(),
        });
    }
    log::info!(
        "Found {} samples at {} time points; using {} loci",
        generations.n_samples(),
        generations.sampled.len(),
        nloci
    );

    let placement = place_samples(&generations);
    let mut calls: Vec<Array2<u8>> = placement
        .columns
        .iter()
        .map(|ids| Array2::from_elem((ids.len(), nloci), MISSING_GENOTYPE))
        .collect();

    let mut row = Vec::with_capacity(generations.n_samples());
    for (l, line) in lines_of(open_text(genotype_path)?, genotype_path)
        .enumerate()
        .take(nloci)
    {
        parse_row(genotype_path, &line?, l + 1, &mut row)?;
        for (column, &call) in row.iter().enumerate() {
            let (t, d) = placement.position[column];
            calls[t][[d, l]] = call;
        }
    }

    Ok(GenotypeData::from_blocks(generations.sampled.clone(), calls)?
        .with_columns(placement.columns))
}

/// Where every input column lands in the time-grouped layout.
struct SamplePlacement {
    /// `(t, d)` of each input column.
    position: Vec<(usize, usize)>,
    /// Input columns of each time step, in individual order.
    columns: Vec<Vec<usize>>,
}

fn place_samples(generations: &Generations) -> SamplePlacement {
    let index: ahash::AHashMap<i64, usize> = generations
        .sampled
        .iter()
        .enumerate()
        .map(|(t, &g)| (g, t))
        .collect();
    let mut columns = vec![Vec::new(); generations.sampled.len()];
    let position = generations
        .per_sample
        .iter()
        .enumerate()
        .map(|(column, generation)| {
            let t = index[generation];
            columns[t].push(column);
            (t, columns[t].len() - 1)
        })
        .collect();
    SamplePlacement { position, columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::GenotypeSource;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static WARNINGS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    // Records every warning emitted while the test binary runs.
    struct WarningCapture;

    static CAPTURE: WarningCapture = WarningCapture;

    impl log::Log for WarningCapture {
        fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
            metadata.level() <= log::Level::Warn
        }

        fn log(&self, record: &log::Record<'_>) {
            if self.enabled(record.metadata()) {
                WARNINGS.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    /// Warnings logged so far that mention `path`. Tests run in parallel, so
    /// each one filters by its own temporary file.
    fn warnings_about(path: &Path) -> Vec<String> {
        if log::set_logger(&CAPTURE).is_ok() {
            log::set_max_level(log::LevelFilter::Warn);
        }
        let needle = path.display().to_string();
        WARNINGS
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.contains(&needle))
            .cloned()
            .collect()
    }

    #[test]
    fn invalid_token_cites_line_and_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geno.txt");
        fs::write(&path, "0 1 2 9\n0 1 5 9\n").unwrap();
        let err = check_input_file(&path, None, 4).unwrap_err();
        match err {
            DataError::InvalidGenotype {
                line,
                column,
                token,
                ..
            } => {
                assert_eq!((line, column, token), (2, 3, '5'));
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = check_input_file(&path, None, 4).unwrap_err().to_string();
        assert!(message.contains("line 2 column 3"));
    }

    #[test]
    fn column_count_must_match_generation_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geno.txt");
        fs::write(&path, "0 1 2\n0 1\n").unwrap();
        assert!(matches!(
            check_input_file(&path, None, 3),
            Err(DataError::ColumnCountMismatch {
                line: 2,
                found: 2,
                expected: 3,
                ..
            })
        ));
    }

    #[test]
    fn sparse_rows_are_accepted_with_warnings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geno.txt");
        fs::write(&path, "9 9 9\n9 1 9\n0 1 2\n").unwrap();
        assert!(warnings_about(&path).is_empty());
        assert_eq!(check_input_file(&path, Some(10), 3).unwrap(), 3);

        let warnings = warnings_about(&path);
        assert_eq!(warnings.len(), 3, "warnings were: {warnings:?}");
        assert!(warnings[0].contains("line 1 has no nonmissing entries"));
        assert!(warnings[1].contains("line 2 only has 1 nonmissing entry"));
        assert!(warnings[2].contains("10 loci were specified, but 3 were found."));
    }

    #[test]
    fn packed_and_spaced_rows_are_equivalent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geno.txt");
        fs::write(&path, "0129\n0 1 2 9\n").unwrap();
        assert_eq!(check_input_file(&path, None, 4).unwrap(), 2);
    }

    #[test]
    fn samples_are_grouped_by_generation_in_column_order() {
        let dir = tempdir().unwrap();
        let gens = dir.path().join("gens.txt");
        let geno = dir.path().join("geno.txt");
        fs::write(&gens, "20\n10\n20\n10\n").unwrap();
        fs::write(&geno, "0 1 2 9\n2 2 0 0\n").unwrap();
        let data = read_snp_matrix(&geno, &gens, Some(2)).unwrap();

        assert_eq!(data.generations(), &[10, 20]);
        assert_eq!(data.individuals_per_step(), vec![2, 2]);
        // Generation 10 holds columns 1 and 3, generation 20 holds 0 and 2.
        assert_eq!(data.genotype(0, 0, 0), Some(1));
        assert_eq!(data.genotype(0, 1, 0), None);
        assert_eq!(data.genotype(1, 0, 1), Some(2));
        assert_eq!(data.genotype(1, 1, 1), Some(0));
        assert_eq!(data.sample_column(0, 1), Some(3));
        assert_eq!(data.sample_column(1, 0), Some(0));
    }

    #[test]
    fn empty_genotype_file_is_rejected() {
        let dir = tempdir().unwrap();
        let gens = dir.path().join("gens.txt");
        let geno = dir.path().join("geno.txt");
        fs::write(&gens, "1\n").unwrap();
        fs::write(&geno, "").unwrap();
        assert!(matches!(
            read_snp_matrix(&geno, &gens, None),
            Err(DataError::NoLoci { .. })
        ));
    }
}
