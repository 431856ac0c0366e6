//! Shared doubles for the integration tests: an inspectable model /
//! optimizer pair, a scripted forward step and recording reporter /
//! checkpoint store.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    io,
    num::{NonZeroU64, NonZeroUsize},
    rc::Rc,
    sync::Arc,
};

use finetune::{
    data::{classification_record, FieldColumn},
    CheckpointStore, Dataset, EvalReport, ForwardStep, InMemoryDataset, Memory, MetricsReporter,
    ModelHandle, Module, Optimizer, RawBatch, Result, RunConfig, StepLoss, StepOutput, Timers,
    TrainEnv, TrainReport,
};

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Net {
    pub params: Vec<f32>,
}

impl Module for Net {
    fn params(&self) -> &[f32] {
        &self.params
    }
    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }
}

pub struct Opt {
    pub lr: f32,
}

impl Optimizer for Opt {
    fn learning_rate(&self) -> f32 {
        self.lr
    }
    fn sync_master_params(&mut self, _params: &[f32]) {}
    fn state_tensors(&self) -> Vec<(&'static str, &[f32])> {
        Vec::new()
    }
    fn load_state_tensors(&mut self, _tensors: &[(String, Vec<f32>)]) -> Result<()> {
        Ok(())
    }
}

pub fn env() -> TrainEnv<Net, Opt, ()> {
    TrainEnv {
        model: ModelHandle::raw(Net {
            params: vec![0.0; 4],
        }),
        optimizer: Opt { lr: 1e-4 },
        scheduler: (),
    }
}

/// `len` distinct records; the leading token of record `i` is `i`, which
/// lets tests identify which records a batch was assembled from.
pub fn labeled_dataset(len: usize) -> Arc<dyn Dataset> {
    let records = (0..len)
        .map(|i| {
            classification_record(
                &[i as i64, i as i64 + 100],
                &[0, 0],
                (i % 2) as i64,
                &[1.0, 1.0],
            )
        })
        .collect();
    Arc::new(InMemoryDataset::new(records))
}

pub fn first_token(batch: &RawBatch) -> i64 {
    match batch.field("text") {
        Some(FieldColumn::IntRows(rows)) => rows[0][0],
        _ => panic!("batch without text rows"),
    }
}

pub fn every(n: u64) -> Option<NonZeroU64> {
    NonZeroU64::new(n)
}

pub fn run_config(epochs: u64, batch_size: usize, intervals: finetune::IntervalConfig) -> RunConfig {
    RunConfig {
        epochs,
        batch_size: NonZeroUsize::new(batch_size).unwrap(),
        num_workers: NonZeroUsize::MIN,
        intervals,
        seed: 1234,
        load_path: None,
        save_path: None,
        drop_incomplete_tail: false,
        reduced_precision: false,
    }
}

/// Forward step that plays back a loss script (default: `Value(1.0)`
/// forever) and records the leading token of every batch it was given.
pub struct ScriptedStep {
    pub losses: Vec<StepLoss>,
    pub calls: usize,
    pub seen_first_tokens: Rc<RefCell<Vec<i64>>>,
}

impl ScriptedStep {
    pub fn new() -> Self {
        Self::with_losses(Vec::new())
    }

    pub fn with_losses(losses: Vec<StepLoss>) -> Self {
        Self {
            losses,
            calls: 0,
            seen_first_tokens: Rc::default(),
        }
    }
}

impl ForwardStep<Net, Opt, ()> for ScriptedStep {
    fn run(
        &mut self,
        batch: &RawBatch,
        _env: &mut TrainEnv<Net, Opt, ()>,
        cfg: &RunConfig,
        _timers: &mut Timers,
        memory: Memory,
    ) -> Result<StepOutput> {
        // Materialize like a real strategy would, so malformed batches
        // still surface as errors in these tests.
        finetune::materialize(batch, cfg.reduced_precision)?;
        self.seen_first_tokens.borrow_mut().push(first_token(batch));
        let loss = self
            .losses
            .get(self.calls)
            .copied()
            .unwrap_or(StepLoss::Value(1.0));
        self.calls += 1;
        Ok(StepOutput {
            loss,
            memory,
            task: "race",
        })
    }
}

#[derive(Default, Clone)]
pub struct RecordingReporter {
    pub train: Rc<RefCell<Vec<TrainReport>>>,
    pub eval: Rc<RefCell<Vec<EvalReport>>>,
}

impl MetricsReporter for RecordingReporter {
    fn training(&mut self, report: &TrainReport) -> io::Result<()> {
        self.train.borrow_mut().push(*report);
        Ok(())
    }
    fn evaluation(&mut self, report: &EvalReport) -> io::Result<()> {
        self.eval.borrow_mut().push(*report);
        Ok(())
    }
}

/// Checkpoint store double: records save iterations and optionally hands
/// back a recorded iteration on load, without touching any state.
pub struct RecordingStore {
    pub saves: Rc<RefCell<Vec<u64>>>,
    pub resume_at: Option<u64>,
}

impl RecordingStore {
    pub fn recording(saves: &Rc<RefCell<Vec<u64>>>) -> Self {
        Self {
            saves: Rc::clone(saves),
            resume_at: None,
        }
    }

    pub fn resuming(iteration: u64) -> Self {
        Self {
            saves: Rc::default(),
            resume_at: Some(iteration),
        }
    }
}

impl CheckpointStore<Net, Opt, ()> for RecordingStore {
    fn load(
        &mut self,
        _module: &mut Net,
        _optimizer: &mut Opt,
        _scheduler: &mut (),
    ) -> Result<Option<u64>> {
        Ok(self.resume_at)
    }

    fn save(
        &mut self,
        iteration: u64,
        _model: &ModelHandle<Net>,
        _optimizer: &Opt,
        _scheduler: &(),
    ) -> Result<()> {
        self.saves.borrow_mut().push(iteration);
        Ok(())
    }
}
