//! Allele frequency trajectories.
//!
//! At a given locus, the auxiliary parameters attribute every observed allele
//! copy to the populations. Summing those attributions over the individuals
//! of a time step yields, per population, an effective count of counted and
//! uncounted copies; their ratio is a noisy observation (a pseudo-output) of
//! the population's frequency at that time.
//!
//! The true frequency is modelled as a Gaussian random walk whose variance
//! over a gap of `Δ` generations is the Wright-Fisher drift variance of a
//! population of the fixed size `N`, linearised at the population's initial
//! frequency. A scalar Kalman filter followed by a Rauch-Tung-Striebel
//! backward pass turns the pseudo-outputs into posterior means and variances.
//! The linearisation point does not depend on the current estimates, so
//! smoothing is a pure function of the pseudo-outputs.

use crate::data::GenotypeSource;
use crate::special::{VARIANCE_FLOOR, clamp_frequency, drift_variance};
use crate::tensor::{FrequencyTensor, IndividualLocusTensor, PseudoOutputs};
use ndarray::ArrayView1;

/// Allele mass below which a time step carries no evidence.
pub const MIN_EVIDENCE: f64 = 1.0e-8;

/// Generations separating the initial frequencies from the first sample.
pub const FOUNDING_GAP: f64 = 1.0;

/// Pseudo-observation of a frequency from attributed allele masses.
///
/// Returns `(value, precision)`. The value is shrunk towards one half by half
/// a pseudo-count on each side so it never touches the boundaries; the
/// precision is the inverse binomial sampling variance. A precision of zero
/// means no evidence.
pub fn pseudo_observation(allele_mass: f64, complement_mass: f64) -> (f64, f64) {
    let total = allele_mass + complement_mass;
    if total < MIN_EVIDENCE {
        return (0.5, 0.0);
    }
    let value = (allele_mass + 0.5) / (total + 1.0);
    let precision = (total + 1.0) / (value * (1.0 - value));
    (value, precision)
}

/// Writes the pseudo-outputs of every population and time step at locus `l`.
pub fn aggregate_pseudo_outputs<S: GenotypeSource + ?Sized>(
    data: &S,
    phi: &IndividualLocusTensor,
    zeta: &IndividualLocusTensor,
    l: usize,
    pseudo_outputs: &mut PseudoOutputs,
) {
    let npops = phi.step(0).dim().2;
    let mut allele_mass = vec![0.0; npops];
    let mut complement_mass = vec![0.0; npops];
    for t in 0..data.total_time_steps() {
        allele_mass.fill(0.0);
        complement_mass.fill(0.0);
        let phi_t = phi.locus(t, l);
        let zeta_t = zeta.locus(t, l);
        for d in 0..data.total_individuals(t) {
            let Some(genotype) = data.genotype(t, d, l) else {
                continue;
            };
            let counted = f64::from(genotype);
            let uncounted = 2.0 - counted;
            for k in 0..npops {
                allele_mass[k] += counted * phi_t[[d, k]].exp();
                complement_mass[k] += uncounted * zeta_t[[d, k]].exp();
            }
        }
        for k in 0..npops {
            let (value, precision) = pseudo_observation(allele_mass[k], complement_mass[k]);
            pseudo_outputs.set(k, l, t, value, precision);
        }
    }
}

/// Generation gaps driving the random walk: the founding gap first, then the
/// gaps between consecutive sampled generations.
pub fn generation_gaps(generations: &[i64]) -> Vec<f64> {
    let mut gaps = Vec::with_capacity(generations.len());
    gaps.push(FOUNDING_GAP);
    gaps.extend(
        generations
            .windows(2)
            .map(|pair| generation_span(pair[0], pair[1]).max(FOUNDING_GAP)),
    );
    gaps
}

/// Generations elapsed from `from` to `to`, exact for any pair of `i64` values.
pub fn generation_span(from: i64, to: i64) -> f64 {
    (i128::from(to) - i128::from(from)) as f64
}

/// Posterior moments of one frequency trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothedTrajectory {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

/// Kalman filter and RTS smoother over one population's pseudo-outputs.
///
/// `process_variance[t]` is the variance added on the way into time step `t`;
/// entry 0 is the variance of the first step around `initial_freq`.
pub fn smooth_trajectory(
    observations: ArrayView1<'_, f64>,
    precisions: ArrayView1<'_, f64>,
    initial_freq: f64,
    process_variance: &[f64],
) -> SmoothedTrajectory {
    let nsteps = observations.len();
    debug_assert_eq!(precisions.len(), nsteps);
    debug_assert_eq!(process_variance.len(), nsteps);

    let mut predicted_mean = vec![0.0; nsteps];
    let mut predicted_var = vec![0.0; nsteps];
    let mut filtered_mean = vec![0.0; nsteps];
    let mut filtered_var = vec![0.0; nsteps];

    for t in 0..nsteps {
        let (prior_mean, prior_var) = if t == 0 {
            (initial_freq, 0.0)
        } else {
            (filtered_mean[t - 1], filtered_var[t - 1])
        };
        let m_pred = prior_mean;
        let p_pred = (prior_var + process_variance[t]).max(VARIANCE_FLOOR);
        predicted_mean[t] = m_pred;
        predicted_var[t] = p_pred;

        let precision = precisions[t];
        if precision > 0.0 {
            let posterior_var = 1.0 / (1.0 / p_pred + precision);
            filtered_mean[t] = posterior_var * (m_pred / p_pred + precision * observations[t]);
            filtered_var[t] = posterior_var.max(VARIANCE_FLOOR);
        } else {
            filtered_mean[t] = m_pred;
            filtered_var[t] = p_pred;
        }
    }

    let mut mean = filtered_mean.clone();
    let mut variance = filtered_var.clone();
    for t in (0..nsteps.saturating_sub(1)).rev() {
        let gain = filtered_var[t] / predicted_var[t + 1];
        mean[t] = filtered_mean[t] + gain * (mean[t + 1] - predicted_mean[t + 1]);
        variance[t] = filtered_var[t] + gain * gain * (variance[t + 1] - predicted_var[t + 1]);
    }

    for (m, v) in mean.iter_mut().zip(variance.iter_mut()) {
        *m = clamp_frequency(*m);
        *v = v.clamp(VARIANCE_FLOOR, *m * (1.0 - *m));
    }

    SmoothedTrajectory { mean, variance }
}

/// Re-smooths every population at locus `l` from the stored pseudo-outputs.
pub fn smooth_locus(
    pseudo_outputs: &PseudoOutputs,
    initial_freq: ArrayView1<'_, f64>,
    gaps: &[f64],
    pop_size: f64,
    l: usize,
    freqs: &mut FrequencyTensor,
) {
    for (k, &p0) in initial_freq.iter().enumerate() {
        let process_variance: Vec<f64> = gaps
            .iter()
            .map(|&gap| drift_variance(p0, gap, pop_size))
            .collect();
        let (observations, precisions) = pseudo_outputs.lane(k, l);
        let trajectory = smooth_trajectory(observations, precisions, p0, &process_variance);
        for (t, (&m, &v)) in trajectory.mean.iter().zip(&trajectory.variance).enumerate() {
            freqs.set(t, k, l, m, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn pseudo_observation_tracks_the_allele_ratio() {
        let (value, precision) = pseudo_observation(30.0, 10.0);
        assert_abs_diff_eq!(value, 30.5 / 41.0, epsilon = 1e-12);
        assert!(precision > 0.0);

        let (value, precision) = pseudo_observation(0.0, 0.0);
        assert_eq!(precision, 0.0);
        assert_eq!(value, 0.5);

        let (value, _) = pseudo_observation(0.0, 50.0);
        assert!(value > 0.0 && value < 0.05);
    }

    #[test]
    fn generation_gaps_start_with_the_founding_gap() {
        assert_eq!(generation_gaps(&[5, 8, 20]), vec![1.0, 3.0, 12.0]);
        assert_eq!(generation_gaps(&[0]), vec![1.0]);
    }

    #[test]
    fn generation_gaps_cover_the_full_integer_range() {
        let gaps = generation_gaps(&[i64::MIN + 1, i64::MAX]);
        assert_eq!(gaps[0], FOUNDING_GAP);
        assert!(gaps[1].is_finite());
        assert_abs_diff_eq!(gaps[1], 2.0 * i64::MAX as f64, epsilon = 1e4);
        assert_eq!(generation_span(7, 3), -4.0);
    }

    #[test]
    fn smoothing_is_idempotent_for_fixed_pseudo_outputs() {
        let observations = array![0.2, 0.35, 0.5, 0.4];
        let precisions = array![100.0, 0.0, 250.0, 40.0];
        let q = [0.001, 0.002, 0.004, 0.001];
        let first = smooth_trajectory(observations.view(), precisions.view(), 0.3, &q);
        let second = smooth_trajectory(observations.view(), precisions.view(), 0.3, &q);
        assert_eq!(first, second);
    }

    #[test]
    fn precise_observations_dominate_the_prior() {
        let observations = array![0.8, 0.82];
        let precisions = array![1e9, 1e9];
        let q = [0.01, 0.01];
        let smoothed = smooth_trajectory(observations.view(), precisions.view(), 0.2, &q);
        assert_abs_diff_eq!(smoothed.mean[0], 0.8, epsilon = 1e-5);
        assert_abs_diff_eq!(smoothed.mean[1], 0.82, epsilon = 1e-5);
        assert!(smoothed.variance.iter().all(|&v| v < 1e-8));
    }

    #[test]
    fn missing_evidence_keeps_the_prior_mean_with_growing_variance() {
        let observations = array![0.0, 0.0, 0.0];
        let precisions = array![0.0, 0.0, 0.0];
        let q = [0.001, 0.002, 0.003];
        let smoothed = smooth_trajectory(observations.view(), precisions.view(), 0.4, &q);
        for t in 0..3 {
            assert_abs_diff_eq!(smoothed.mean[t], 0.4, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(smoothed.variance[0], 0.001, epsilon = 1e-12);
        assert_abs_diff_eq!(smoothed.variance[2], 0.006, epsilon = 1e-12);
    }

    #[test]
    fn later_evidence_propagates_backwards() {
        let observations = array![0.0, 0.9];
        let precisions = array![0.0, 1e6];
        let q = [0.01, 0.01];
        let smoothed = smooth_trajectory(observations.view(), precisions.view(), 0.5, &q);
        assert!(smoothed.mean[0] > 0.6, "first step mean {}", smoothed.mean[0]);
        assert!(smoothed.variance[0] < 0.01);
    }

    #[test]
    fn smoothed_means_are_clamped_into_the_unit_interval() {
        let observations = array![1.4, -0.3];
        let precisions = array![1e6, 1e6];
        let q = [0.1, 0.1];
        let smoothed = smooth_trajectory(observations.view(), precisions.view(), 0.5, &q);
        for (&m, &v) in smoothed.mean.iter().zip(&smoothed.variance) {
            assert!(m > 0.0 && m < 1.0);
            assert!(v >= 0.0 && v <= m * (1.0 - m));
        }
    }
}
