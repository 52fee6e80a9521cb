use super::source::GenotypeSource;
use super::{DataError, lines_of, open_text};
use std::path::Path;

/// Known population of each individual, `None` when unlabelled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulationLabels {
    by_step: Vec<Vec<Option<usize>>>,
}

impl PopulationLabels {
    pub fn new(by_step: Vec<Vec<Option<usize>>>) -> Self {
        Self { by_step }
    }

    pub fn get(&self, t: usize, d: usize) -> Option<usize> {
        self.by_step.get(t).and_then(|step| step.get(d)).copied().flatten()
    }

    pub fn n_steps(&self) -> usize {
        self.by_step.len()
    }

    pub fn individuals(&self, t: usize) -> usize {
        self.by_step.get(t).map_or(0, Vec::len)
    }

    pub fn labelled(&self) -> usize {
        self.by_step.iter().flatten().filter(|label| label.is_some()).count()
    }

    /// Largest label present, if any.
    pub fn max_label(&self) -> Option<usize> {
        self.by_step.iter().flatten().filter_map(|&label| label).max()
    }
}

/// Reads one integer label per line, row-major over `(t, d)` in ascending
/// time-step order. Negative labels mark unlabelled individuals.
pub fn read_pop_labels<S: GenotypeSource>(
    path: &Path,
    data: &S,
) -> Result<PopulationLabels, DataError> {
    let mut values = Vec::new();
    for (index, line) in lines_of(open_text(path)?, path).enumerate() {
        let line = line?;
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let label = token.parse::<i64>().map_err(|_| DataError::InvalidLabel {
            path: path.to_path_buf(),
            line: index + 1,
            token: token.to_string(),
        })?;
        values.push(usize::try_from(label).ok());
    }

    let individuals = data.individuals_per_step();
    let expected: usize = individuals.iter().sum();
    if values.len() != expected {
        return Err(DataError::LabelCountMismatch {
            path: path.to_path_buf(),
            expected,
            found: values.len(),
        });
    }

    let mut remaining = values.into_iter();
    let by_step = individuals
        .iter()
        .map(|&n| remaining.by_ref().take(n).collect())
        .collect();
    Ok(PopulationLabels::new(by_step))
}
