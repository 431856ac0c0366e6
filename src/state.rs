/// Mutable bookkeeping for one run, owned exclusively by the loop.
///
/// `global_iteration` is the single source of truth for resume position
/// and only ever advances synchronously with a completed step, so a
/// checkpoint always records a fully-completed step boundary.
#[derive(Debug, Clone)]
pub struct RunState {
    pub global_iteration: u64,
    pub epoch_index: u64,
    pub accumulated_loss: f64,
}

impl RunState {
    pub fn new() -> Self {
        Self::from_iteration(0)
    }

    /// State resuming from a checkpoint's recorded iteration.
    pub fn from_iteration(global_iteration: u64) -> Self {
        Self {
            global_iteration,
            epoch_index: 0,
            accumulated_loss: 0.0,
        }
    }

    /// Resume position: `(start_epoch, start_intra_epoch_iteration)`.
    ///
    /// Satisfies `start_epoch * iters_per_epoch + start_intra == global_iteration`.
    pub fn resume_position(&self, iters_per_epoch: u64) -> (u64, u64) {
        assert!(iters_per_epoch > 0, "iters_per_epoch must be > 0");
        (
            self.global_iteration / iters_per_epoch,
            self.global_iteration % iters_per_epoch,
        )
    }

    /// Records one completed step. A skipped iteration passes 0.0 so the
    /// counter still advances and interval arithmetic stays deterministic.
    #[inline]
    pub fn complete_step(&mut self, loss: f64) {
        self.global_iteration += 1;
        self.accumulated_loss += loss;
    }

    /// Returns the accumulated loss since the last report and resets it.
    #[inline]
    pub fn take_accumulated_loss(&mut self) -> f64 {
        std::mem::take(&mut self.accumulated_loss)
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
