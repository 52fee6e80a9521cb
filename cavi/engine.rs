//! # Coordinate Ascent Variational Inference
//!
//! `Cavi` owns every variational parameter of a fit and drives the stochastic
//! sweep over loci. One epoch visits each locus once and, at that locus,
//!
//! 1. recomputes the auxiliary parameters of every individual,
//! 2. re-smooths the allele frequency trajectories of every population, and
//! 3. takes a natural-gradient step on every individual's mixture proportions.
//!
//! The frequency step may be skipped at loci whose auxiliary parameters did
//! not move; smoothing is a pure function of the auxiliary parameters, so the
//! skip never alters the fit. Epochs repeat until the mixture proportions
//! stop moving or the epoch cap is reached.
//!
//! The engine never owns a random generator. The caller lends one to the
//! constructor, which uses it for initialization only, so a fit is fully
//! determined by the data, the configuration, and the generator's seed.

use crate::auxiliary::{self, AUX_CHANGE_TOLERANCE, expected_log_freqs_at};
use crate::config::{CaviConfig, ConfigError};
use crate::convergence::{self, ConvergenceCheck};
use crate::data::{GenotypeSource, PopulationLabels};
use crate::frequency::{aggregate_pseudo_outputs, generation_gaps, generation_span, smooth_locus};
use crate::holdout::held_out_log_likelihood;
use crate::mixture::{THETA_FLOOR, blend_mixture, clamped_mixture, mixture_target};
use crate::output::{ResultPaths, write_results};
use crate::progress::{FitProgressObserver, NoopFitProgress};
use crate::special::{clamp_frequency, dirichlet_expected_log, drift_variance};
use crate::tensor::{
    FrequencyTensor, IndividualCounts, IndividualLocusTensor, IndividualMatrix, PseudoOutputs,
};
use ndarray::{Array2, ArrayView1};
use rand::Rng;
use rand_distr::{Beta, Distribution, Gamma};
use std::io;
use std::path::Path;
use thiserror::Error;

/// Pseudo-count mass of the Beta prior the initial frequencies are drawn from.
const INITIAL_FREQ_CONCENTRATION: f64 = 20.0;
/// Pooled allele frequencies are pulled into this range before seeding the
/// initial frequencies.
const POOLED_FREQ_BOUNDS: (f64, f64) = (0.05, 0.95);
/// Shape and scale of the Gamma draws seeding unlabelled mixture parameters.
const INITIAL_THETA_SHAPE: f64 = 100.0;
const INITIAL_THETA_SCALE: f64 = 0.01;

#[derive(Error, Debug)]
pub enum CaviError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Failed to write results: {0}")]
    Io(#[from] io::Error),
}

/// How a call to [`Cavi::run_stochastic`] ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitSummary {
    /// Number of completed epochs.
    pub epochs: usize,
    pub converged: bool,
    /// Change reported by the last convergence check.
    pub change: f64,
}

pub struct Cavi<'a, S: GenotypeSource + ?Sized> {
    config: CaviConfig,
    data: &'a S,
    labels: Option<PopulationLabels>,
    npops: usize,
    nloci: usize,
    nsteps: usize,
    individuals: Vec<usize>,
    /// Founding gap followed by the gaps between sampled generations.
    gaps: Vec<f64>,
    /// `[npops, nloci]` frequencies anchoring every trajectory.
    initial_freq: Array2<f64>,
    freqs: FrequencyTensor,
    pseudo_outputs: PseudoOutputs,
    theta: IndividualMatrix,
    phi: IndividualLocusTensor,
    zeta: IndividualLocusTensor,
    /// Observed training loci per individual.
    observed_loci: IndividualCounts,
    /// Mixture updates applied per individual.
    sample_iter: IndividualCounts,
}

impl<'a, S: GenotypeSource + ?Sized> Cavi<'a, S> {
    /// Validates the configuration against the data and initializes every
    /// variational parameter from `rng`.
    pub fn new<R: Rng + ?Sized>(
        config: CaviConfig,
        data: &'a S,
        labels: Option<PopulationLabels>,
        rng: &mut R,
    ) -> Result<Self, CaviError> {
        config.validate()?;

        let nsteps = data.total_time_steps();
        let nloci = data.total_loci();
        let individuals = data.individuals_per_step();
        if nsteps == 0 {
            return Err(CaviError::InvalidInput(
                "the genotype data contains no time steps".to_string(),
            ));
        }
        if nloci == 0 {
            return Err(CaviError::InvalidInput(
                "the genotype data contains no loci".to_string(),
            ));
        }
        if let Some(t) = individuals.iter().position(|&n| n == 0) {
            return Err(CaviError::InvalidInput(format!(
                "time step {t} has no individuals"
            )));
        }
        if data.generations().len() != nsteps {
            return Err(CaviError::InvalidInput(format!(
                "{} generations were reported for {} time steps",
                data.generations().len(),
                nsteps
            )));
        }
        if let Some(labels) = &labels {
            check_labels(labels, &individuals, config.npops)?;
        }

        let npops = config.npops;
        let mut cavi = Self {
            gaps: generation_gaps(data.generations()),
            initial_freq: Array2::zeros((npops, nloci)),
            freqs: FrequencyTensor::zeros(nsteps, npops, nloci),
            pseudo_outputs: PseudoOutputs::zeros(npops, nloci, nsteps),
            theta: IndividualMatrix::filled(&individuals, npops, 1.0),
            phi: IndividualLocusTensor::filled(&individuals, nloci, npops, 0.0),
            zeta: IndividualLocusTensor::filled(&individuals, nloci, npops, 0.0),
            observed_loci: IndividualCounts::zeros(&individuals),
            sample_iter: IndividualCounts::zeros(&individuals),
            config,
            data,
            labels,
            npops,
            nloci,
            nsteps,
            individuals,
        };
        cavi.initialize_variational_parameters(rng)?;
        Ok(cavi)
    }

    /// (Re)allocates and seeds every tensor.
    ///
    /// Draw order: initial frequencies population-major then by locus, then
    /// the mixture parameters of unlabelled individuals in `(t, d, k)` order.
    /// Labelled individuals receive their clamped parameters and consume no
    /// draws. Auxiliary parameters and pseudo-outputs are derived from the
    /// seeded values and the update counters restart at zero.
    pub fn initialize_variational_parameters<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<(), CaviError> {
        let (npops, nloci, nsteps) = (self.npops, self.nloci, self.nsteps);
        let data = self.data;
        let individuals = self.individuals.clone();

        self.observed_loci = IndividualCounts::zeros(&individuals);
        self.sample_iter = IndividualCounts::zeros(&individuals);
        self.theta = IndividualMatrix::filled(&individuals, npops, 1.0);
        self.phi = IndividualLocusTensor::filled(&individuals, nloci, npops, 0.0);
        self.zeta = IndividualLocusTensor::filled(&individuals, nloci, npops, 0.0);
        self.pseudo_outputs = PseudoOutputs::zeros(npops, nloci, nsteps);
        self.freqs = FrequencyTensor::zeros(nsteps, npops, nloci);

        let mut allele_counts = vec![0u64; nloci];
        let mut called_copies = vec![0u64; nloci];
        for t in 0..nsteps {
            for d in 0..individuals[t] {
                for l in 0..nloci {
                    if let Some(genotype) = data.genotype(t, d, l) {
                        self.observed_loci.increment(t, d);
                        allele_counts[l] += u64::from(genotype);
                        called_copies[l] += 2;
                    }
                }
            }
        }

        let mut seeds = Vec::with_capacity(nloci);
        for l in 0..nloci {
            let pooled = if called_copies[l] == 0 {
                0.5
            } else {
                (allele_counts[l] as f64 / called_copies[l] as f64)
                    .clamp(POOLED_FREQ_BOUNDS.0, POOLED_FREQ_BOUNDS.1)
            };
            let beta = Beta::new(
                INITIAL_FREQ_CONCENTRATION * pooled,
                INITIAL_FREQ_CONCENTRATION * (1.0 - pooled),
            )
            .map_err(|e| CaviError::InvalidInput(format!("initial frequency prior: {e}")))?;
            seeds.push(beta);
        }
        for k in 0..npops {
            for (l, beta) in seeds.iter().enumerate() {
                self.initial_freq[[k, l]] = clamp_frequency(beta.sample(rng));
            }
        }

        let generations = data.generations();
        for t in 0..nsteps {
            let elapsed = generation_span(generations[0], generations[t]) + 1.0;
            for k in 0..npops {
                for l in 0..nloci {
                    let p0 = self.initial_freq[[k, l]];
                    let variance = drift_variance(p0, elapsed, self.config.pop_size);
                    self.freqs.set(t, k, l, p0, variance);
                }
            }
        }

        let gamma = Gamma::new(INITIAL_THETA_SHAPE, INITIAL_THETA_SCALE)
            .map_err(|e| CaviError::InvalidInput(format!("initial mixture prior: {e}")))?;
        for t in 0..nsteps {
            for d in 0..individuals[t] {
                let mut row = self.theta.individual_mut(t, d);
                match self.labels.as_ref().and_then(|labels| labels.get(t, d)) {
                    Some(label) => {
                        let clamped = clamped_mixture(
                            &self.config.mixture_prior,
                            self.observed_loci.get(t, d),
                            label,
                        );
                        row.assign(&ArrayView1::from(&clamped[..]));
                    }
                    None => {
                        for value in row.iter_mut() {
                            *value = gamma.sample(rng).max(THETA_FLOOR);
                        }
                    }
                }
            }
        }

        for l in 0..nloci {
            self.update_auxiliary_parameters(l);
            aggregate_pseudo_outputs(data, &self.phi, &self.zeta, l, &mut self.pseudo_outputs);
        }

        log::info!(
            "Initialized {} populations over {} loci, {} time steps and {} individuals{}",
            npops,
            nloci,
            nsteps,
            individuals.iter().sum::<usize>(),
            match &self.labels {
                Some(labels) => format!(" ({} labelled)", labels.labelled()),
                None => String::new(),
            }
        );
        Ok(())
    }

    /// Recomputes `phi[t][d][l]` and `zeta[t][d][l]` from the current mixture
    /// and frequency parameters. Returns the largest responsibility change.
    pub fn update_auxiliary_local(&mut self, t: usize, d: usize, l: usize) -> f64 {
        let log_freqs = expected_log_freqs_at(&self.freqs, t, l);
        let mut log_theta = vec![0.0; self.npops];
        self.refresh_auxiliary(t, d, l, &log_freqs, &mut log_theta)
    }

    /// Recomputes the auxiliary parameters of every individual at locus `l`.
    ///
    /// Returns whether any observed entry moved by more than
    /// the auxiliary change tolerance. The signal is only a hint: ignoring it and
    /// always running the remaining updates yields the same fit.
    pub fn update_auxiliary_parameters(&mut self, l: usize) -> bool {
        let mut changed = false;
        let mut log_theta = vec![0.0; self.npops];
        for t in 0..self.nsteps {
            let log_freqs = expected_log_freqs_at(&self.freqs, t, l);
            for d in 0..self.individuals[t] {
                let change = self.refresh_auxiliary(t, d, l, &log_freqs, &mut log_theta);
                if change > AUX_CHANGE_TOLERANCE && self.data.genotype(t, d, l).is_some() {
                    changed = true;
                }
            }
        }
        changed
    }

    /// Rebuilds the pseudo-outputs at locus `l` and re-smooths the frequency
    /// trajectory of every population there.
    pub fn update_allele_frequencies(&mut self, l: usize) {
        aggregate_pseudo_outputs(
            self.data,
            &self.phi,
            &self.zeta,
            l,
            &mut self.pseudo_outputs,
        );
        smooth_locus(
            &self.pseudo_outputs,
            self.initial_freq.column(l),
            &self.gaps,
            self.config.pop_size,
            l,
            &mut self.freqs,
        );
    }

    /// Takes one stochastic natural-gradient step on the mixture parameters
    /// of every unlabelled individual observed at locus `l`.
    ///
    /// Missing and held-out calls carry no evidence: the individual is left
    /// untouched and its step counter does not advance.
    pub fn update_mixture_proportions(&mut self, l: usize) {
        let schedule = self.config.step_schedule;
        let mut target = vec![0.0; self.npops];
        for t in 0..self.nsteps {
            for d in 0..self.individuals[t] {
                if self.is_labelled(t, d) {
                    continue;
                }
                let Some(genotype) = self.data.genotype(t, d, l) else {
                    continue;
                };
                mixture_target(
                    &self.config.mixture_prior,
                    self.observed_loci.get(t, d),
                    genotype,
                    self.phi.entry(t, d, l),
                    self.zeta.entry(t, d, l),
                    &mut target,
                );
                let step = schedule.step_size(self.sample_iter.get(t, d));
                blend_mixture(self.theta.individual_mut(t, d), &target, step);
                self.sample_iter.increment(t, d);
            }
        }
    }

    /// Runs epochs until convergence or the epoch cap.
    pub fn run_stochastic(&mut self) -> FitSummary {
        self.run_stochastic_with_progress(&mut NoopFitProgress)
    }

    pub fn run_stochastic_with_progress<P: FitProgressObserver + ?Sized>(
        &mut self,
        progress: &mut P,
    ) -> FitSummary {
        let mut summary = FitSummary {
            epochs: 0,
            converged: false,
            change: f64::INFINITY,
        };

        for epoch in 0..self.config.max_epochs {
            let snapshot = self.theta.clone();
            progress.on_epoch_start(epoch, self.nloci);

            let mut resmoothed = 0usize;
            for l in 0..self.nloci {
                let changed = self.update_auxiliary_parameters(l);
                if changed || epoch == 0 || !self.config.skip_unchanged_loci {
                    self.update_allele_frequencies(l);
                    resmoothed += 1;
                }
                self.update_mixture_proportions(l);
                progress.on_locus_advance(epoch, l + 1);
            }

            let check = self.check_theta_convergence(&snapshot);
            progress.on_epoch_finish(epoch, &check);
            summary = FitSummary {
                epochs: epoch + 1,
                converged: check.converged,
                change: check.change,
            };
            log::info!(
                "Epoch {}: mean change in mixture proportions {:.3e} ({} of {} loci re-smoothed)",
                epoch + 1,
                check.change,
                resmoothed,
                self.nloci
            );
            if !self.data.held_out().is_empty() && log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "Epoch {}: held-out log-likelihood bound {:.6}",
                    epoch + 1,
                    self.compute_ho_log_likelihood()
                );
            }
            if check.converged {
                log::info!("Converged after {} epochs", epoch + 1);
                break;
            }
        }

        if !summary.converged {
            log::warn!(
                "Stopped after the maximum of {} epochs without converging (last change {:.3e}, tolerance {:.3e})",
                self.config.max_epochs,
                summary.change,
                self.config.tolerance
            );
        }
        summary
    }

    /// Compares the current mixture parameters against `previous`.
    pub fn check_theta_convergence(&self, previous: &IndividualMatrix) -> ConvergenceCheck {
        convergence::check_theta_convergence(&self.theta, previous, self.config.tolerance)
    }

    /// Variational lower bound on the log-likelihood of the held-out calls.
    pub fn compute_ho_log_likelihood(&self) -> f64 {
        held_out_log_likelihood(&self.theta, &self.freqs, self.data.held_out())
    }

    /// Writes `<prefix>_theta`, `<prefix>_freqs` and `<prefix>_freq_variances`.
    pub fn write_results(&self, prefix: &Path) -> Result<ResultPaths, CaviError> {
        Ok(write_results(prefix, self.data, &self.theta, &self.freqs)?)
    }

    pub fn config(&self) -> &CaviConfig {
        &self.config
    }

    pub fn npops(&self) -> usize {
        self.npops
    }

    pub fn nloci(&self) -> usize {
        self.nloci
    }

    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    pub fn theta(&self) -> &IndividualMatrix {
        &self.theta
    }

    pub fn freqs(&self) -> &FrequencyTensor {
        &self.freqs
    }

    pub fn phi(&self) -> &IndividualLocusTensor {
        &self.phi
    }

    pub fn zeta(&self) -> &IndividualLocusTensor {
        &self.zeta
    }

    pub fn pseudo_outputs(&self) -> &PseudoOutputs {
        &self.pseudo_outputs
    }

    /// `[npops, nloci]`
    pub fn initial_freq(&self) -> &Array2<f64> {
        &self.initial_freq
    }

    pub fn sample_iter(&self) -> &IndividualCounts {
        &self.sample_iter
    }

    pub fn observed_loci(&self) -> &IndividualCounts {
        &self.observed_loci
    }

    fn is_labelled(&self, t: usize, d: usize) -> bool {
        self.labels
            .as_ref()
            .is_some_and(|labels| labels.get(t, d).is_some())
    }

    fn refresh_auxiliary(
        &mut self,
        t: usize,
        d: usize,
        l: usize,
        log_freqs: &[(f64, f64)],
        log_theta: &mut [f64],
    ) -> f64 {
        dirichlet_expected_log(self.theta.individual(t, d), log_theta);
        auxiliary::update_auxiliary_local(
            log_theta,
            log_freqs,
            self.phi.entry_mut(t, d, l),
            self.zeta.entry_mut(t, d, l),
        )
    }
}

fn check_labels(
    labels: &PopulationLabels,
    individuals: &[usize],
    npops: usize,
) -> Result<(), CaviError> {
    if labels.n_steps() != individuals.len() {
        return Err(CaviError::InvalidInput(format!(
            "labels cover {} time steps but the data has {}",
            labels.n_steps(),
            individuals.len()
        )));
    }
    for (t, &n) in individuals.iter().enumerate() {
        if labels.individuals(t) != n {
            return Err(CaviError::InvalidInput(format!(
                "labels list {} individuals at time step {} but the data has {}",
                labels.individuals(t),
                t,
                n
            )));
        }
    }
    if let Some(max) = labels.max_label() {
        if max >= npops {
            return Err(CaviError::InvalidInput(format!(
                "population label {max} is out of range for {npops} populations"
            )));
        }
    }
    Ok(())
}
