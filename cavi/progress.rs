use crate::convergence::ConvergenceCheck;

/// Observer for reporting incremental progress while fitting.
///
/// Epochs are numbered from zero. Every method has a no-op default.
pub trait FitProgressObserver {
    fn on_epoch_start(&mut self, epoch: usize, total_loci: usize) {
        let _ = (epoch, total_loci);
    }
    fn on_locus_advance(&mut self, epoch: usize, processed_loci: usize) {
        let _ = (epoch, processed_loci);
    }
    fn on_epoch_finish(&mut self, epoch: usize, check: &ConvergenceCheck) {
        let _ = (epoch, check);
    }
}

#[derive(Default)]
pub struct NoopFitProgress;

impl FitProgressObserver for NoopFitProgress {}
