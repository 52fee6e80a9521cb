use super::{DataError, lines_of, open_text};
use itertools::Itertools;
use std::path::Path;

/// Sampling times read from a generation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Generations {
    /// Generation of every sample, in genotype-column order.
    pub per_sample: Vec<i64>,
    /// Distinct generations in ascending order; position = time step index.
    pub sampled: Vec<i64>,
}

impl Generations {
    pub fn from_samples(per_sample: Vec<i64>) -> Self {
        let sampled = per_sample.iter().copied().sorted_unstable().dedup().collect();
        Self {
            per_sample,
            sampled,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.per_sample.len()
    }
}

/// Reads one integer generation per line. Blank lines are ignored.
pub fn read_generations(path: &Path) -> Result<Generations, DataError> {
    let mut per_sample = Vec::new();
    for (index, line) in lines_of(open_text(path)?, path).enumerate() {
        let line = line?;
        let line_number = index + 1;
        let mut tokens = line.split_whitespace();
        let Some(token) = tokens.next() else {
            continue;
        };
        if tokens.next().is_some() {
            return Err(DataError::MultipleGenerationsPerLine {
                path: path.to_path_buf(),
                line: line_number,
            });
        }
        let generation = token
            .parse::<i64>()
            .map_err(|_| DataError::InvalidGeneration {
                path: path.to_path_buf(),
                line: line_number,
                token: token.to_string(),
            })?;
        per_sample.push(generation);
    }
    if per_sample.is_empty() {
        return Err(DataError::NoSamples {
            path: path.to_path_buf(),
        });
    }
    Ok(Generations::from_samples(per_sample))
}
