use super::DataError;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Code used for a missing genotype call in files and in memory.
pub const MISSING_GENOTYPE: u8 = 9;

/// Read-only access to genotype calls grouped by sampling time.
///
/// Individuals are addressed by `(t, d)`: time step `t` in ascending
/// generation order and individual `d` within that time step.
pub trait GenotypeSource {
    fn total_time_steps(&self) -> usize;
    fn total_individuals(&self, t: usize) -> usize;
    fn total_loci(&self) -> usize;

    /// Training genotype (number of counted alleles), or `None` when the call
    /// is missing or held out.
    fn genotype(&self, t: usize, d: usize, l: usize) -> Option<u8>;

    /// Generation of every time step, ascending.
    fn generations(&self) -> &[i64];

    /// Entries withheld from training for evaluation.
    fn held_out(&self) -> &[HeldOutEntry] {
        &[]
    }

    /// Column of the input file that holds individual `(t, d)`, if known.
    fn sample_column(&self, t: usize, d: usize) -> Option<usize> {
        let _ = (t, d);
        None
    }

    fn individuals_per_step(&self) -> Vec<usize> {
        (0..self.total_time_steps())
            .map(|t| self.total_individuals(t))
            .collect()
    }
}

/// A genotype call removed from the training data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeldOutEntry {
    pub step: usize,
    pub individual: usize,
    pub locus: usize,
    pub genotype: u8,
}

/// In-memory genotype matrix: one `[n_t, nloci]` block of calls per time step.
#[derive(Clone, Debug)]
pub struct GenotypeData {
    generations: Vec<i64>,
    calls: Vec<Array2<u8>>,
    nloci: usize,
    columns: Vec<Vec<usize>>,
    held_out: Vec<HeldOutEntry>,
}

impl GenotypeData {
    /// Builds a data set from per-time-step call blocks. Columns default to
    /// row-major order over `(t, d)`.
    ///
    /// Generations must be strictly ascending with a span that fits in an
    /// `i64`, and there must be one block per generation, each with the same
    /// number of loci.
    pub fn from_blocks(generations: Vec<i64>, calls: Vec<Array2<u8>>) -> Result<Self, DataError> {
        if generations.len() != calls.len() {
            return Err(DataError::InvalidInput(format!(
                "{} genotype blocks were given for {} generations",
                calls.len(),
                generations.len()
            )));
        }
        if generations.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(DataError::InvalidInput(
                "generations must be strictly ascending".to_string(),
            ));
        }
        if let (Some(&first), Some(&last)) = (generations.first(), generations.last()) {
            last.checked_sub(first).ok_or_else(|| {
                DataError::InvalidInput(format!(
                    "generations {first} and {last} are too far apart"
                ))
            })?;
        }
        let nloci = calls.first().map_or(0, |block| block.ncols());
        if let Some((t, block)) = calls
            .iter()
            .enumerate()
            .find(|(_, block)| block.ncols() != nloci)
        {
            return Err(DataError::InvalidInput(format!(
                "genotype block {t} has {} loci, expected {nloci}",
                block.ncols()
            )));
        }
        let mut next = 0;
        let columns = calls
            .iter()
            .map(|block| {
                let ids: Vec<usize> = (next..next + block.nrows()).collect();
                next += block.nrows();
                ids
            })
            .collect();
        Ok(Self {
            generations,
            calls,
            nloci,
            columns,
            held_out: Vec::new(),
        })
    }

    pub(crate) fn with_columns(mut self, columns: Vec<Vec<usize>>) -> Self {
        self.columns = columns;
        self
    }

    /// Number of non-missing training calls.
    pub fn observed_calls(&self) -> usize {
        self.calls
            .iter()
            .map(|block| block.iter().filter(|&&g| g != MISSING_GENOTYPE).count())
            .sum()
    }

    /// Withholds each observed call independently with probability `fraction`.
    ///
    /// Entries are visited in `(t, d, l)` order using a generator seeded with
    /// `seed`, so the held-out set depends only on the data and the seed.
    /// Withheld calls are masked as missing for training. Calling this again
    /// first restores the previously withheld calls.
    pub fn hold_out(&mut self, fraction: f64, seed: u64) -> Result<usize, DataError> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(DataError::InvalidHoldOutFraction(fraction));
        }
        for entry in self.held_out.drain(..) {
            self.calls[entry.step][[entry.individual, entry.locus]] = entry.genotype;
        }
        if fraction == 0.0 {
            return Ok(0);
        }
        let mut rng = StdRng::seed_from_u64(seed);
        for (t, block) in self.calls.iter_mut().enumerate() {
            for ((d, l), call) in block.indexed_iter_mut() {
                if *call == MISSING_GENOTYPE {
                    continue;
                }
                if rng.gen_bool(fraction) {
                    self.held_out.push(HeldOutEntry {
                        step: t,
                        individual: d,
                        locus: l,
                        genotype: *call,
                    });
                    *call = MISSING_GENOTYPE;
                }
            }
        }
        log::info!(
            "Held out {} genotype calls ({:.2}% requested)",
            self.held_out.len(),
            fraction * 100.0
        );
        Ok(self.held_out.len())
    }
}

impl GenotypeSource for GenotypeData {
    fn total_time_steps(&self) -> usize {
        self.calls.len()
    }

    fn total_individuals(&self, t: usize) -> usize {
        self.calls[t].nrows()
    }

    fn total_loci(&self) -> usize {
        self.nloci
    }

    fn genotype(&self, t: usize, d: usize, l: usize) -> Option<u8> {
        match self.calls[t][[d, l]] {
            MISSING_GENOTYPE => None,
            call => Some(call),
        }
    }

    fn generations(&self) -> &[i64] {
        &self.generations
    }

    fn held_out(&self) -> &[HeldOutEntry] {
        &self.held_out
    }

    fn sample_column(&self, t: usize, d: usize) -> Option<usize> {
        self.columns.get(t).and_then(|ids| ids.get(d)).copied()
    }
}
