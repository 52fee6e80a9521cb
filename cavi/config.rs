use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MAX_EPOCHS: usize = 100;
pub const DEFAULT_TOLERANCE: f64 = 1.0e-4;

/// Robbins-Monro schedule for the stochastic mixture update:
/// `rho = (offset + visits)^(-decay)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepSchedule {
    /// Delay added to the visit count; at least one so the first step is at most one.
    pub offset: f64,
    /// Forgetting rate; must lie in `(0.5, 1]` for the schedule to converge.
    pub decay: f64,
}

impl Default for StepSchedule {
    fn default() -> Self {
        Self {
            offset: 1.0,
            decay: 0.7,
        }
    }
}

impl StepSchedule {
    /// Step size for an individual that has already been updated `visits` times.
    #[inline]
    pub fn step_size(&self, visits: u64) -> f64 {
        (self.offset + visits as f64).powf(-self.decay)
    }
}

/// Everything needed to reproduce a fit, serialised as TOML next to the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaviConfig {
    pub npops: usize,
    /// Dirichlet prior over population membership, one entry per population.
    pub mixture_prior: Vec<f64>,
    /// Fixed effective population size driving the drift variance.
    pub pop_size: f64,
    #[serde(default = "default_max_epochs")]
    pub max_epochs: usize,
    /// Mean absolute change in mixture proportions below which a fit has converged.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub step_schedule: StepSchedule,
    /// Skip re-smoothing a locus whose auxiliary parameters did not move.
    #[serde(default = "default_skip_unchanged")]
    pub skip_unchanged_loci: bool,
}

fn default_max_epochs() -> usize {
    DEFAULT_MAX_EPOCHS
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_skip_unchanged() -> bool {
    true
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl CaviConfig {
    /// A configuration with default optimisation settings.
    pub fn new(npops: usize, mixture_prior: Vec<f64>, pop_size: f64) -> Self {
        Self {
            npops,
            mixture_prior,
            pop_size,
            max_epochs: DEFAULT_MAX_EPOCHS,
            tolerance: DEFAULT_TOLERANCE,
            step_schedule: StepSchedule::default(),
            skip_unchanged_loci: true,
        }
    }

    /// Symmetric prior `1/npops` for every population.
    pub fn symmetric_prior(npops: usize) -> Vec<f64> {
        vec![1.0 / npops.max(1) as f64; npops]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.npops == 0 {
            return Err(ConfigError::Invalid(
                "number of populations must be positive".to_string(),
            ));
        }
        if self.mixture_prior.len() != self.npops {
            return Err(ConfigError::Invalid(format!(
                "mixture prior has {} entries, but {} populations were requested",
                self.mixture_prior.len(),
                self.npops
            )));
        }
        if let Some(bad) = self
            .mixture_prior
            .iter()
            .find(|a| !(a.is_finite() && **a > 0.0))
        {
            return Err(ConfigError::Invalid(format!(
                "mixture prior entries must be positive and finite (found {bad})"
            )));
        }
        if !(self.pop_size.is_finite() && self.pop_size > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "population size must be positive (found {})",
                self.pop_size
            )));
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::Invalid(
                "at least one epoch must be allowed".to_string(),
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "convergence tolerance must be positive (found {})",
                self.tolerance
            )));
        }
        let schedule = self.step_schedule;
        if !(schedule.offset.is_finite() && schedule.offset >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "step offset must be at least 1 (found {})",
                schedule.offset
            )));
        }
        if !(schedule.decay > 0.5 && schedule.decay <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "step decay must lie in (0.5, 1] (found {})",
                schedule.decay
            )));
        }
        Ok(())
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    #[test]
    fn default_schedule_starts_at_one_and_decreases() {
        let schedule = StepSchedule::default();
        assert_abs_diff_eq!(schedule.step_size(0), 1.0);
        let mut previous = schedule.step_size(0);
        for visits in 1..50 {
            let rho = schedule.step_size(visits);
            assert!(rho < previous);
            assert!(rho > 0.0);
            previous = rho;
        }
    }

    #[test]
    fn validation_rejects_inconsistent_settings() {
        assert!(CaviConfig::new(2, vec![1.0, 1.0], 1000.0).validate().is_ok());
        assert!(CaviConfig::new(0, vec![], 1000.0).validate().is_err());
        assert!(CaviConfig::new(2, vec![1.0], 1000.0).validate().is_err());
        assert!(CaviConfig::new(2, vec![1.0, 0.0], 1000.0).validate().is_err());
        assert!(CaviConfig::new(2, vec![1.0, 1.0], -5.0).validate().is_err());

        let mut config = CaviConfig::new(2, vec![1.0, 1.0], 1000.0);
        config.step_schedule.decay = 0.4;
        assert!(config.validate().is_err());
        config.step_schedule = StepSchedule {
            offset: 0.5,
            decay: 0.7,
        };
        assert!(config.validate().is_err());
        config.step_schedule = StepSchedule::default();
        config.max_epochs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_survives_a_toml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = CaviConfig::new(3, CaviConfig::symmetric_prior(3), 5000.0);
        config.max_epochs = 12;
        config.skip_unchanged_loci = false;
        config.save(&path).unwrap();
        let loaded = CaviConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn omitted_optional_fields_take_defaults() {
        let parsed: CaviConfig =
            toml::from_str("npops = 2\nmixture_prior = [0.5, 0.5]\npop_size = 100.0\n").unwrap();
        assert_eq!(parsed.max_epochs, DEFAULT_MAX_EPOCHS);
        assert_eq!(parsed.step_schedule, StepSchedule::default());
        assert!(parsed.skip_unchanged_loci);
    }
}
