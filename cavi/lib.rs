#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod auxiliary;
pub mod config;
pub mod convergence;
pub mod engine;
pub mod frequency;
pub mod holdout;
pub mod mixture;
pub mod output;
pub mod progress;
pub mod special;
pub mod tensor;

#[path = "../data/mod.rs"]
pub mod data;

pub use config::{CaviConfig, ConfigError, StepSchedule};
pub use convergence::ConvergenceCheck;
pub use engine::{Cavi, CaviError, FitSummary};
pub use output::ResultPaths;
pub use progress::{FitProgressObserver, NoopFitProgress};
