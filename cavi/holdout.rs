//! Variational lower bound on the likelihood of held-out genotype calls.

use crate::auxiliary::expected_log_freqs_at;
use crate::data::HeldOutEntry;
use crate::special::{dirichlet_expected_log, log_genotype_multiplicity, log_sum_exp};
use crate::tensor::{FrequencyTensor, IndividualMatrix};

/// Sums, over every held-out call `x` of individual `(t, d)` at locus `l`,
///
/// `ln C(2, x) + x · lse_k(E[log θ_k] + E[log β_k]) + (2 - x) · lse_k(E[log θ_k] + E[log(1 - β_k)])`.
///
/// Returns zero when nothing is held out. Reads its inputs only.
pub fn held_out_log_likelihood(
    theta: &IndividualMatrix,
    freqs: &FrequencyTensor,
    held_out: &[HeldOutEntry],
) -> f64 {
    let npops = freqs.npops();
    let mut expected_log_theta = vec![0.0; npops];
    let mut counted = vec![0.0; npops];
    let mut uncounted = vec![0.0; npops];

    held_out
        .iter()
        .map(|entry| {
            dirichlet_expected_log(
                theta.individual(entry.step, entry.individual),
                &mut expected_log_theta,
            );
            let log_freqs = expected_log_freqs_at(freqs, entry.step, entry.locus);
            for k in 0..npops {
                counted[k] = expected_log_theta[k] + log_freqs[k].0;
                uncounted[k] = expected_log_theta[k] + log_freqs[k].1;
            }
            let x = f64::from(entry.genotype);
            log_genotype_multiplicity(entry.genotype)
                + x * log_sum_exp(&counted)
                + (2.0 - x) * log_sum_exp(&uncounted)
        })
        .sum()
}
