//! Scalar numerics shared by the updaters: log-space normalisation and the
//! mapping from a frequency mean/variance pair to the expected log allele
//! frequencies.

use ndarray::ArrayView1;
use statrs::function::gamma::digamma;

/// Smallest allele frequency any updater will hand to a logarithm.
pub const FREQ_EPSILON: f64 = 1.0e-6;
/// Floor for every variance produced by the smoother.
pub const VARIANCE_FLOOR: f64 = 1.0e-12;
/// Upper bound on the Beta concentration used for moment matching.
const MAX_CONCENTRATION: f64 = 1.0e12;

/// Clamps a frequency into `[FREQ_EPSILON, 1 - FREQ_EPSILON]`.
#[inline]
pub fn clamp_frequency(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(FREQ_EPSILON, 1.0 - FREQ_EPSILON)
}

/// `log(sum(exp(values)))` computed stably.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Normalises a slice of log weights in place so that `exp` of the entries
/// sums to one.
pub fn normalize_log_weights(values: &mut [f64]) {
    let norm = log_sum_exp(values);
    for v in values.iter_mut() {
        *v -= norm;
    }
}

/// `E[log θ_k]` under a Dirichlet with parameters `alpha`, written into `out`.
pub fn dirichlet_expected_log(alpha: ArrayView1<'_, f64>, out: &mut [f64]) {
    debug_assert_eq!(alpha.len(), out.len());
    let psi_total = digamma(alpha.sum());
    for (o, &a) in out.iter_mut().zip(alpha.iter()) {
        *o = digamma(a) - psi_total;
    }
}

/// Expected `(log β, log(1 - β))` for a frequency with the given variational
/// mean and variance.
///
/// The pair is moment-matched to a Beta distribution whose concentration is
/// bounded to `[1, MAX_CONCENTRATION]`, which keeps both expectations finite
/// even when the smoother reports a vanishing or an oversized variance.
pub fn expected_log_frequencies(mean: f64, variance: f64) -> (f64, f64) {
    let m = clamp_frequency(mean);
    let bernoulli = m * (1.0 - m);
    let v = variance.clamp(VARIANCE_FLOOR, bernoulli);
    let concentration = (bernoulli / v - 1.0).clamp(1.0, MAX_CONCENTRATION);
    let psi_total = digamma(concentration);
    (
        digamma(m * concentration) - psi_total,
        digamma((1.0 - m) * concentration) - psi_total,
    )
}

/// Wright-Fisher drift variance accumulated over `generations` generations
/// for an allele starting at frequency `p0` in a population of size `pop_size`.
pub fn drift_variance(p0: f64, generations: f64, pop_size: f64) -> f64 {
    let p = clamp_frequency(p0);
    let retained = (1.0 - 1.0 / (2.0 * pop_size)).powf(generations.max(0.0));
    (p * (1.0 - p) * (1.0 - retained)).max(VARIANCE_FLOOR)
}

/// Natural log of the binomial coefficient `C(2, x)` for a diploid genotype.
#[inline]
pub fn log_genotype_multiplicity(genotype: u8) -> f64 {
    if genotype == 1 { std::f64::consts::LN_2 } else { 0.0 }
}
