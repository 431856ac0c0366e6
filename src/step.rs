use ndarray::{Array1, Array2};

use crate::{
    batch::{materialize, ModelBatch},
    config::RunConfig,
    data::dataset::RawBatch,
    error::Result,
    model::ModelHandle,
    timers::Timers,
};

/// Recurrent state threaded through consecutive forward steps.
pub type Memory = Vec<Array2<f32>>;

/// The model/optimizer/scheduler handles the loop drives. Mutated only by
/// the forward-step strategy and by checkpoint load, never concurrently.
pub struct TrainEnv<M, O, S> {
    pub model: ModelHandle<M>,
    pub optimizer: O,
    pub scheduler: S,
}

/// Loss outcome of one step.
///
/// `Skipped` is the strategy's non-fatal escape hatch (e.g. an overflow
/// under loss scaling): the loop counts it as a completed zero-loss step
/// so interval arithmetic stays deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepLoss {
    Value(f64),
    Skipped,
}

#[derive(Debug)]
pub struct StepOutput {
    pub loss: StepLoss,
    pub memory: Memory,
    /// Task tag, passed through by the loop without inspection.
    pub task: &'static str,
}

/// Pluggable unit of work for one batch.
///
/// The strategy owns the forward pass and loss, and — for training
/// strategies — invoking the backward/update machinery through the
/// environment. Evaluation strategies simply leave parameters untouched.
pub trait ForwardStep<M, O, S> {
    fn run(
        &mut self,
        batch: &RawBatch,
        env: &mut TrainEnv<M, O, S>,
        cfg: &RunConfig,
        timers: &mut Timers,
        memory: Memory,
    ) -> Result<StepOutput>;
}

/// Classification-head view of the model, the seam the cross-entropy
/// step drives. Tensor internals stay outside this crate.
pub trait SequenceClassifier {
    /// Returns `[batch, classes]` logits and the updated recurrent state.
    fn forward(&mut self, batch: &ModelBatch, memory: Memory) -> (Array2<f32>, Memory);
}

/// Simple forward step with cross-entropy loss; the default evaluation
/// strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropyStep;

impl<M, O, S> ForwardStep<M, O, S> for CrossEntropyStep
where
    M: SequenceClassifier,
{
    fn run(
        &mut self,
        batch: &RawBatch,
        env: &mut TrainEnv<M, O, S>,
        cfg: &RunConfig,
        timers: &mut Timers,
        memory: Memory,
    ) -> Result<StepOutput> {
        timers.start("batch generator");
        let model_batch = materialize(batch, cfg.reduced_precision)?;
        timers.stop("batch generator");

        let module = env.model.trainable_module_mut();
        let (logits, memory) = module.forward(&model_batch, memory);
        let loss = mean_cross_entropy(&logits, &model_batch.labels);

        Ok(StepOutput {
            loss: StepLoss::Value(loss),
            memory,
            task: "bert",
        })
    }
}

/// Mean `-log softmax(logits)[label]` over the batch.
pub fn mean_cross_entropy(logits: &Array2<f32>, labels: &Array1<i64>) -> f64 {
    debug_assert_eq!(logits.nrows(), labels.len());
    let mut total = 0.0f64;
    for (row, &label) in logits.rows().into_iter().zip(labels.iter()) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let log_sum: f32 = row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln() + max;
        total += f64::from(log_sum - row[label as usize]);
    }
    total / labels.len() as f64
}
