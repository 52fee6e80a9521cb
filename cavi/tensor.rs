//! Storage for the variational parameters.
//!
//! Individual-level quantities are ragged over time: each time step carries
//! its own number of individuals. They are stored as one dense block per time
//! step (`TimeBlocks`), each block sized to that step's individual count.
//! Population-level quantities are rectangular and use plain `ndarray` tensors.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut1, s};

/// One dense block per time step.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeBlocks<A> {
    blocks: Vec<A>,
}

impl<A> TimeBlocks<A> {
    pub fn from_blocks(blocks: Vec<A>) -> Self {
        Self { blocks }
    }

    pub fn n_steps(&self) -> usize {
        self.blocks.len()
    }

    /// Block for time step `t`. Panics if `t` is out of range.
    pub fn step(&self, t: usize) -> &A {
        &self.blocks[t]
    }

    pub fn step_mut(&mut self, t: usize) -> &mut A {
        &mut self.blocks[t]
    }

    pub fn iter(&self) -> impl Iterator<Item = &A> {
        self.blocks.iter()
    }
}

/// Per-individual vectors over populations, block `t` has shape `[n_t, npops]`.
pub type IndividualMatrix = TimeBlocks<Array2<f64>>;
/// Per-individual, per-locus vectors over populations, block `t` has shape
/// `[n_t, nloci, npops]`.
pub type IndividualLocusTensor = TimeBlocks<Array3<f64>>;
/// Per-individual counters, block `t` has length `n_t`.
pub type IndividualCounts = TimeBlocks<Array1<u64>>;

impl IndividualMatrix {
    pub fn filled(individuals: &[usize], npops: usize, value: f64) -> Self {
        Self::from_blocks(
            individuals
                .iter()
                .map(|&n| Array2::from_elem((n, npops), value))
                .collect(),
        )
    }

    pub fn individual(&self, t: usize, d: usize) -> ArrayView1<'_, f64> {
        self.step(t).row(d)
    }

    pub fn individual_mut(&mut self, t: usize, d: usize) -> ArrayViewMut1<'_, f64> {
        self.blocks[t].row_mut(d)
    }
}

impl IndividualLocusTensor {
    pub fn filled(individuals: &[usize], nloci: usize, npops: usize, value: f64) -> Self {
        Self::from_blocks(
            individuals
                .iter()
                .map(|&n| Array3::from_elem((n, nloci, npops), value))
                .collect(),
        )
    }

    pub fn entry(&self, t: usize, d: usize, l: usize) -> ArrayView1<'_, f64> {
        self.step(t).slice(s![d, l, ..])
    }

    pub fn entry_mut(&mut self, t: usize, d: usize, l: usize) -> ArrayViewMut1<'_, f64> {
        self.blocks[t].slice_mut(s![d, l, ..])
    }

    /// All individuals of time step `t` at locus `l`, shape `[n_t, npops]`.
    pub fn locus(&self, t: usize, l: usize) -> ArrayView2<'_, f64> {
        self.step(t).slice(s![.., l, ..])
    }
}

impl IndividualCounts {
    pub fn zeros(individuals: &[usize]) -> Self {
        Self::from_blocks(individuals.iter().map(|&n| Array1::zeros(n)).collect())
    }

    pub fn get(&self, t: usize, d: usize) -> u64 {
        self.step(t)[d]
    }

    pub fn increment(&mut self, t: usize, d: usize) {
        self.step_mut(t)[d] += 1;
    }
}

/// Variational mean and variance of every population allele frequency,
/// indexed `[t, k, l]`.
#[derive(Clone, Debug, PartialEq)]
pub struct FrequencyTensor {
    pub mean: Array3<f64>,
    pub variance: Array3<f64>,
}

impl FrequencyTensor {
    pub fn zeros(nsteps: usize, npops: usize, nloci: usize) -> Self {
        Self {
            mean: Array3::zeros((nsteps, npops, nloci)),
            variance: Array3::zeros((nsteps, npops, nloci)),
        }
    }

    pub fn get(&self, t: usize, k: usize, l: usize) -> (f64, f64) {
        (self.mean[[t, k, l]], self.variance[[t, k, l]])
    }

    pub fn set(&mut self, t: usize, k: usize, l: usize, mean: f64, variance: f64) {
        self.mean[[t, k, l]] = mean;
        self.variance[[t, k, l]] = variance;
    }

    pub fn npops(&self) -> usize {
        self.mean.dim().1
    }
}

/// Synthetic observations fed to the time smoother, indexed `[k, l, t]`.
///
/// Unlike every other tensor here, time is the innermost (contiguous) axis:
/// the smoother sweeps forwards and backwards over `t` for a fixed
/// population and locus, so each sweep reads one contiguous lane. A precision
/// of zero marks a time step without evidence.
#[derive(Clone, Debug, PartialEq)]
pub struct PseudoOutputs {
    pub value: Array3<f64>,
    pub precision: Array3<f64>,
}

impl PseudoOutputs {
    pub fn zeros(npops: usize, nloci: usize, nsteps: usize) -> Self {
        Self {
            value: Array3::zeros((npops, nloci, nsteps)),
            precision: Array3::zeros((npops, nloci, nsteps)),
        }
    }

    /// Observations over time for population `k` at locus `l`.
    pub fn lane(&self, k: usize, l: usize) -> (ArrayView1<'_, f64>, ArrayView1<'_, f64>) {
        (
            self.value.slice(s![k, l, ..]),
            self.precision.slice(s![k, l, ..]),
        )
    }

    pub fn set(&mut self, k: usize, l: usize, t: usize, value: f64, precision: f64) {
        self.value[[k, l, t]] = value;
        self.precision[[k, l, t]] = precision;
    }
}
