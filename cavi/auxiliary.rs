//! Local auxiliary parameters.
//!
//! For every individual and locus, `phi` holds the log responsibilities of
//! each population for a counted allele copy and `zeta` the same for an
//! uncounted copy. Each is proportional to the individual's expected mixture
//! weight times the population's expected frequency (or its complement),
//! normalised in log space.

use crate::special::{expected_log_frequencies, normalize_log_weights};
use crate::tensor::FrequencyTensor;
use ndarray::ArrayViewMut1;

/// Responsibility movement above which a locus counts as changed.
pub const AUX_CHANGE_TOLERANCE: f64 = 1.0e-6;

/// `(E[log β_k], E[log(1 - β_k)])` for every population at time `t`, locus `l`.
pub fn expected_log_freqs_at(freqs: &FrequencyTensor, t: usize, l: usize) -> Vec<(f64, f64)> {
    (0..freqs.npops())
        .map(|k| {
            let (mean, variance) = freqs.get(t, k, l);
            expected_log_frequencies(mean, variance)
        })
        .collect()
}

/// Recomputes one individual's auxiliary parameters at one locus in place.
///
/// Returns the largest absolute change of any responsibility (on the
/// probability scale) relative to the values previously stored.
pub fn update_auxiliary_local(
    expected_log_theta: &[f64],
    expected_log_freqs: &[(f64, f64)],
    mut phi: ArrayViewMut1<'_, f64>,
    mut zeta: ArrayViewMut1<'_, f64>,
) -> f64 {
    let npops = expected_log_theta.len();
    debug_assert_eq!(expected_log_freqs.len(), npops);

    let mut log_phi: Vec<f64> = expected_log_theta
        .iter()
        .zip(expected_log_freqs)
        .map(|(&log_theta, &(log_freq, _))| log_theta + log_freq)
        .collect();
    let mut log_zeta: Vec<f64> = expected_log_theta
        .iter()
        .zip(expected_log_freqs)
        .map(|(&log_theta, &(_, log_complement))| log_theta + log_complement)
        .collect();
    normalize_log_weights(&mut log_phi);
    normalize_log_weights(&mut log_zeta);

    let mut change: f64 = 0.0;
    for k in 0..npops {
        change = change
            .max((log_phi[k].exp() - phi[k].exp()).abs())
            .max((log_zeta[k].exp() - zeta[k].exp()).abs());
        phi[k] = log_phi[k];
        zeta[k] = log_zeta[k];
    }
    change
}
