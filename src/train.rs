use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    checkpoint::{load_pretrained, save_checkpoint, CheckpointStore},
    config::{ReplicaIdentity, RunConfig},
    data::{CyclicStream, Dataset, RawBatch, ShardedStream},
    error::Result,
    metrics::{EvalReport, MetricsReporter, TrainReport},
    model::{LrScheduler, ModelHandle, Module, Optimizer},
    schedule,
    state::RunState,
    step::{ForwardStep, Memory, StepLoss, TrainEnv},
    store::SafetensorsStore,
    timers::Timers,
};

/// End-of-epoch hook: `(model_handle, epoch_index, output_predictions)`.
/// Receives the sentinel epoch `-1` with `output_predictions = true` on
/// an evaluation-only run.
pub type EpochCallback<'a, M> = &'a mut dyn FnMut(&mut ModelHandle<M>, i64, bool);

/// Final bookkeeping returned by [`FinetuneLoop::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub global_iteration: u64,
    pub epochs_completed: u64,
}

/// The top-level fine-tuning driver for one worker process.
///
/// Owns the run state exclusively; one instance runs per replica, and all
/// cross-replica coordination is implicit (disjoint shards here, gradient
/// aggregation in the external synchronization collaborator). The control
/// flow is strictly sequential, so a kill at any point leaves the last
/// checkpoint's iteration consistent with a completed step boundary.
pub struct FinetuneLoop<M, O, S, R> {
    cfg: RunConfig,
    replica: ReplicaIdentity,
    env: TrainEnv<M, O, S>,
    train_data: Arc<dyn Dataset>,
    valid_data: Arc<dyn Dataset>,
    pretrained: Option<Box<dyn CheckpointStore<M, O, S>>>,
    store: Option<Box<dyn CheckpointStore<M, O, S>>>,
    reporter: R,
    timers: Timers,
    state: RunState,
}

impl<M, O, S, R> FinetuneLoop<M, O, S, R>
where
    M: Module,
    O: Optimizer,
    R: MetricsReporter,
{
    pub fn new(
        cfg: RunConfig,
        replica: ReplicaIdentity,
        env: TrainEnv<M, O, S>,
        train_data: Arc<dyn Dataset>,
        valid_data: Arc<dyn Dataset>,
        reporter: R,
    ) -> Self {
        Self {
            cfg,
            replica,
            env,
            train_data,
            valid_data,
            pretrained: None,
            store: None,
            reporter,
            timers: Timers::new(),
            state: RunState::new(),
        }
    }

    /// Source of the initial (pretrained) checkpoint.
    pub fn with_pretrained(mut self, store: Box<dyn CheckpointStore<M, O, S>>) -> Self {
        self.pretrained = Some(store);
        self
    }

    /// Destination for periodic and epoch-boundary checkpoints.
    pub fn with_store(mut self, store: Box<dyn CheckpointStore<M, O, S>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wires safetensors stores from the configured load/save paths.
    pub fn with_default_stores(mut self) -> Self
    where
        M: 'static,
        O: 'static,
        S: LrScheduler + 'static,
    {
        if let Some(path) = &self.cfg.load_path {
            self.pretrained = Some(Box::new(SafetensorsStore::new(path.clone())));
        }
        if let Some(path) = &self.cfg.save_path {
            self.store = Some(Box::new(SafetensorsStore::new(path.clone())));
        }
        self
    }

    #[inline]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Runs the fine-tuning state machine to completion.
    ///
    /// `train_step` drives parameter updates; `eval_step` is the
    /// evaluation-only strategy used for the periodic validation pass.
    pub fn run(
        &mut self,
        train_step: &mut dyn ForwardStep<M, O, S>,
        eval_step: &mut dyn ForwardStep<M, O, S>,
        mut end_of_epoch: Option<EpochCallback<'_, M>>,
    ) -> Result<RunSummary> {
        // Resume position comes from the pretrained checkpoint, when it
        // records one.
        if let Some(pretrained) = &mut self.pretrained {
            if let Some(iteration) = load_pretrained(pretrained.as_mut(), &mut self.env)? {
                self.state = RunState::from_iteration(iteration);
            }
        }

        if self.cfg.epochs == 0 {
            info!("evaluation only mode, setting epoch to -1");
            if let Some(cb) = end_of_epoch.as_mut() {
                cb(&mut self.env.model, -1, true);
            }
            return Ok(self.summary(0));
        }

        info!("building train and validation streams ...");
        let epoch_zero = self.build_train_stream(0)?;
        let iters_per_epoch = epoch_zero.num_batches() as u64;
        let total_iterations = self.cfg.epochs * iters_per_epoch;

        // Validation does not need epoch-coupled reshuffling; one fixed
        // order, cycled forever.
        let valid_template = ShardedStream::build(
            Arc::clone(&self.valid_data),
            self.cfg.batch_size,
            self.cfg.num_workers,
            self.cfg.drop_incomplete_tail,
            self.replica,
            self.cfg.seed,
        )?;
        let eval_pass_len = valid_template.num_batches();
        let mut valid_stream = CyclicStream::new(move || valid_template.fresh());

        let (start_epoch, mut skip) = self.state.resume_position(iters_per_epoch);
        if skip > 0 {
            info!("resuming epoch {start_epoch} at intra-epoch iteration {skip}");
        }

        let mut memory: Memory = Vec::new();
        let mut steps_since_report: u64 = 0;
        self.timers.start("interval time");

        for epoch in start_epoch..self.cfg.epochs {
            self.state.epoch_index = epoch;
            info!("working on epoch {} ...", epoch + 1);

            // Re-permuted every epoch; resumed runs replay the same
            // per-epoch order because the seed only depends on the epoch.
            let stream = self.build_train_stream(epoch)?;
            for (intra, batch) in stream.enumerate() {
                // Consume but do not train the iterations before the
                // resume offset, keeping the stream position identical
                // to an uninterrupted run.
                if (intra as u64) < skip {
                    continue;
                }

                let output = train_step.run(
                    &batch,
                    &mut self.env,
                    &self.cfg,
                    &mut self.timers,
                    std::mem::take(&mut memory),
                )?;
                memory = output.memory;
                match output.loss {
                    StepLoss::Value(loss) => self.state.complete_step(loss),
                    StepLoss::Skipped => {
                        debug!("skipped iteration at step {}", self.state.global_iteration + 1);
                        self.state.complete_step(0.0);
                    }
                }
                steps_since_report += 1;

                let triggers = schedule::decide(self.state.global_iteration, &self.cfg.intervals);
                if triggers.log {
                    let window = steps_since_report.max(1);
                    let elapsed = self.timers.elapsed("interval time");
                    let report = TrainReport {
                        iteration: self.state.global_iteration,
                        total_iterations,
                        learning_rate: self.env.optimizer.learning_rate(),
                        mean_loss: self.state.take_accumulated_loss() / window as f64,
                        ms_per_step: elapsed.as_secs_f64() * 1000.0 / window as f64,
                        epoch,
                    };
                    if let Err(e) = self.reporter.training(&report) {
                        warn!("metrics reporting failed: {e}");
                    }
                    steps_since_report = 0;
                }
                if triggers.save {
                    if let Some(store) = &mut self.store {
                        save_checkpoint(store.as_mut(), self.state.global_iteration, &self.env)?;
                    }
                }
                if triggers.eval {
                    self.evaluate(eval_step, &mut valid_stream, eval_pass_len)?;
                }
            }
            // Only the first resumed epoch skips batches.
            skip = 0;

            // At least one checkpoint per epoch, independent of the
            // save interval.
            if let Some(store) = &mut self.store {
                save_checkpoint(store.as_mut(), self.state.global_iteration, &self.env)?;
            }
            if let Some(cb) = end_of_epoch.as_mut() {
                cb(&mut self.env.model, epoch as i64, false);
            }
        }

        info!("finetuning done");
        Ok(self.summary(self.cfg.epochs))
    }

    /// One full pass over the validation stream with the evaluation
    /// strategy. Touches neither the iteration counter nor, by the
    /// strategy's contract, the model parameters.
    fn evaluate(
        &mut self,
        eval_step: &mut dyn ForwardStep<M, O, S>,
        valid_stream: &mut dyn Iterator<Item = RawBatch>,
        pass_len: usize,
    ) -> Result<()> {
        debug!(
            "evaluating at iteration {} ({pass_len} batches)",
            self.state.global_iteration
        );
        let mut total = 0.0f64;
        let mut batches = 0usize;
        let mut memory: Memory = Vec::new();

        for _ in 0..pass_len {
            let Some(batch) = valid_stream.next() else {
                break;
            };
            let output = eval_step.run(
                &batch,
                &mut self.env,
                &self.cfg,
                &mut self.timers,
                std::mem::take(&mut memory),
            )?;
            memory = output.memory;
            if let StepLoss::Value(loss) = output.loss {
                total += loss;
                batches += 1;
            }
        }

        let report = EvalReport {
            iteration: self.state.global_iteration,
            mean_loss: total / batches.max(1) as f64,
            batches,
        };
        if let Err(e) = self.reporter.evaluation(&report) {
            warn!("metrics reporting failed: {e}");
        }
        Ok(())
    }

    fn build_train_stream(&self, epoch: u64) -> Result<ShardedStream> {
        ShardedStream::build(
            Arc::clone(&self.train_data),
            self.cfg.batch_size,
            self.cfg.num_workers,
            self.cfg.drop_incomplete_tail,
            self.replica,
            self.cfg.seed + epoch,
        )
    }

    fn summary(&self, epochs_completed: u64) -> RunSummary {
        RunSummary {
            global_iteration: self.state.global_iteration,
            epochs_completed,
        }
    }
}
