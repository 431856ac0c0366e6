use std::io;

use log::info;

/// One line of training progress, emitted every log interval.
#[derive(Debug, Clone, Copy)]
pub struct TrainReport {
    pub iteration: u64,
    pub total_iterations: u64,
    pub learning_rate: f32,
    /// Mean loss over the steps since the previous report.
    pub mean_loss: f64,
    /// Wall time per step over the same window, in milliseconds.
    pub ms_per_step: f64,
    pub epoch: u64,
}

/// Aggregated result of one full pass over the validation stream.
#[derive(Debug, Clone, Copy)]
pub struct EvalReport {
    /// Iteration the evaluation was scheduled at.
    pub iteration: u64,
    pub mean_loss: f64,
    pub batches: usize,
}

impl EvalReport {
    /// `exp(mean_loss)`, the conventional language-model metric.
    #[inline]
    pub fn perplexity(&self) -> f64 {
        self.mean_loss.exp()
    }
}

/// Sink for periodic progress reports.
///
/// Reporting is best-effort: the loop downgrades any error returned here
/// to a warning and keeps training.
pub trait MetricsReporter {
    fn training(&mut self, report: &TrainReport) -> io::Result<()>;
    fn evaluation(&mut self, report: &EvalReport) -> io::Result<()>;
}

/// Default reporter writing through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl MetricsReporter for LogReporter {
    fn training(&mut self, r: &TrainReport) -> io::Result<()> {
        info!(
            "iteration {}/{} | epoch {} | lr {:.3e} | lm loss {:.6} | {:.2} ms/iter",
            r.iteration, r.total_iterations, r.epoch, r.learning_rate, r.mean_loss, r.ms_per_step
        );
        Ok(())
    }

    fn evaluation(&mut self, r: &EvalReport) -> io::Result<()> {
        info!(
            "evaluation at iteration {} | lm loss {:.6} | ppl {:.3} | {} batch(es)",
            r.iteration,
            r.mean_loss,
            r.perplexity(),
            r.batches
        );
        Ok(())
    }
}
