//! Stochastic natural-gradient step on the mixture proportions.
//!
//! Visiting locus `l` treats that locus as a sample of the individual's
//! genome: the evidence it carries is scaled by the number of loci the
//! individual has observed, giving a noisy estimate of the full coordinate
//! update. The estimate is blended into the current Dirichlet parameters with
//! a Robbins-Monro step size.

use ndarray::{ArrayView1, ArrayViewMut1};

/// Smallest value a Dirichlet parameter is allowed to take.
pub const THETA_FLOOR: f64 = 1.0e-10;

/// Writes the noisy coordinate-ascent target for one individual at one locus.
///
/// `target_k = α_k + n_obs · (x · φ_k + (2 - x) · ζ_k)` where `φ`, `ζ` are the
/// stored log responsibilities.
pub fn mixture_target(
    prior: &[f64],
    observed_loci: u64,
    genotype: u8,
    phi: ArrayView1<'_, f64>,
    zeta: ArrayView1<'_, f64>,
    target: &mut [f64],
) {
    let scale = observed_loci as f64;
    let counted = f64::from(genotype);
    let uncounted = 2.0 - counted;
    for (k, slot) in target.iter_mut().enumerate() {
        *slot = prior[k] + scale * (counted * phi[k].exp() + uncounted * zeta[k].exp());
    }
}

/// `θ ← (1 - ρ) θ + ρ θ*`, floored at [`THETA_FLOOR`].
pub fn blend_mixture(mut theta: ArrayViewMut1<'_, f64>, target: &[f64], step: f64) {
    for (value, &goal) in theta.iter_mut().zip(target) {
        *value = ((1.0 - step) * *value + step * goal).max(THETA_FLOOR);
    }
}

/// Dirichlet parameters of a labelled individual: the prior plus the mass of
/// every observed allele copy, and one more, placed on its known population.
pub fn clamped_mixture(prior: &[f64], observed_loci: u64, label: usize) -> Vec<f64> {
    let mut theta = prior.to_vec();
    theta[label] += 2.0 * observed_loci as f64 + 1.0;
    theta
}
