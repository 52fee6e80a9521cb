//! # Input Data
//!
//! Reads the three plain-text inputs of a fit (generation times, genotype
//! matrix, optional population labels), validates them, and exposes the
//! result to the inference core through the `GenotypeSource` trait.
//!
//! Every validation failure is a user-input error reported through
//! `DataError`; the binary treats all of them as fatal. Anomalies that do not
//! prevent a fit (sparse rows, an unexpected locus count) are logged as
//! warnings.

pub mod generations;
pub mod genotypes;
pub mod labels;
pub mod source;

pub use generations::{Generations, read_generations};
pub use genotypes::{check_input_file, read_snp_matrix};
pub use labels::{PopulationLabels, read_pop_labels};
pub use source::{GenotypeData, GenotypeSource, HeldOutEntry, MISSING_GENOTYPE};

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed while reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Input Error ({path}): more than one generation time on line {line}")]
    MultipleGenerationsPerLine { path: PathBuf, line: usize },
    #[error("Input Error ({path}): line {line} has an invalid generation time '{token}'")]
    InvalidGeneration {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("Input Error ({path}): no generation times were found")]
    NoSamples { path: PathBuf },
    #[error(
        "Input Error ({path}): line {line} column {column} has an invalid entry '{token}'. Genotypes must be 0, 1, or 2 if known, 9 if missing or unknown."
    )]
    InvalidGenotype {
        path: PathBuf,
        line: usize,
        column: usize,
        token: char,
    },
    #[error("Input Error ({path}): line {line} has {found} samples, but generation file has {expected}.")]
    ColumnCountMismatch {
        path: PathBuf,
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("Input Error ({path}): no loci were found")]
    NoLoci { path: PathBuf },
    #[error("Input Error ({path}): expected {expected} labels, one per sample, but found {found}")]
    LabelCountMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("Input Error ({path}): line {line} has an invalid population label '{token}'")]
    InvalidLabel {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("Input Error: {0}")]
    InvalidInput(String),
    #[error("hold-out fraction must lie in [0, 1) (found {0})")]
    InvalidHoldOutFraction(f64),
}

/// Opens a text input, decompressing it on the fly when the name ends in `.gz`.
pub(crate) fn open_text(path: &Path) -> Result<Box<dyn BufRead>, DataError> {
    let file = File::open(path).map_err(|source| DataError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(Box::new(BufReader::new(reader)))
}

/// Iterates over the lines of `reader`, attaching the path to any I/O failure.
pub(crate) fn lines_of<'a>(
    reader: Box<dyn BufRead>,
    path: &'a Path,
) -> impl Iterator<Item = Result<String, DataError>> + 'a {
    reader.lines().map(move |line| {
        line.map_err(|source| DataError::Read {
            path: path.to_path_buf(),
            source,
        })
    })
}
