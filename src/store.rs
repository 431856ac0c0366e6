use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
};

use safetensors::{serialize, tensor::TensorView, Dtype, SafeTensors};

use crate::{
    checkpoint::CheckpointStore,
    error::{FinetuneError, Result},
    model::{LrScheduler, ModelHandle, Module, Optimizer},
};

const PARAMS_TENSOR: &str = "model.params";
const OPTIMIZER_PREFIX: &str = "optimizer.";
const META_ITERATION: &str = "iteration";
const META_SCHEDULER: &str = "scheduler";
const LATEST_FILE: &str = "latest";

/// Checkpoint store writing one safetensors file per saved iteration.
///
/// Layout under `dir`:
/// - `iter_0000005.safetensors` — flat f32 module parameters plus named
///   optimizer state tensors; iteration and scheduler state in the file
///   metadata map.
/// - `latest` — text pointer to the most recent iteration.
#[derive(Debug, Clone)]
pub struct SafetensorsStore {
    dir: PathBuf,
}

impl SafetensorsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn checkpoint_file(&self, iteration: u64) -> PathBuf {
        self.dir.join(format!("iter_{iteration:07}.safetensors"))
    }

    fn latest_iteration(&self) -> Result<u64> {
        let raw = fs::read_to_string(self.dir.join(LATEST_FILE))?;
        raw.trim()
            .parse()
            .map_err(|_| FinetuneError::CheckpointFormat(format!("bad latest pointer: '{raw}'")))
    }
}

fn format_err(e: impl std::fmt::Display) -> FinetuneError {
    FinetuneError::CheckpointFormat(e.to_string())
}

fn f32_view(data: &[f32]) -> Result<TensorView<'_>> {
    TensorView::new(Dtype::F32, vec![data.len()], bytemuck::cast_slice(data)).map_err(format_err)
}

fn f32_data(view: &TensorView<'_>, name: &str) -> Result<Vec<f32>> {
    if view.dtype() != Dtype::F32 {
        return Err(FinetuneError::CheckpointFormat(format!(
            "tensor '{name}' has dtype {:?}, expected F32",
            view.dtype()
        )));
    }
    Ok(bytemuck::pod_collect_to_vec(view.data()))
}

impl<M, O, S> CheckpointStore<M, O, S> for SafetensorsStore
where
    M: Module,
    O: Optimizer,
    S: LrScheduler,
{
    fn load(
        &mut self,
        module: &mut M,
        optimizer: &mut O,
        scheduler: &mut S,
    ) -> Result<Option<u64>> {
        let iteration = self.latest_iteration()?;
        let buf = fs::read(self.checkpoint_file(iteration))?;
        let tensors = SafeTensors::deserialize(&buf).map_err(format_err)?;

        let params = tensors.tensor(PARAMS_TENSOR).map_err(format_err)?;
        let stored = f32_data(&params, PARAMS_TENSOR)?;
        let live = module.params_mut();
        if stored.len() != live.len() {
            return Err(FinetuneError::CheckpointFormat(format!(
                "stored {} parameter(s), live module has {}",
                stored.len(),
                live.len()
            )));
        }
        live.copy_from_slice(&stored);

        let mut optimizer_state = Vec::new();
        for name in tensors.names() {
            if let Some(key) = name.strip_prefix(OPTIMIZER_PREFIX) {
                let view = tensors.tensor(name).map_err(format_err)?;
                optimizer_state.push((key.to_string(), f32_data(&view, name)?));
            }
        }
        optimizer.load_state_tensors(&optimizer_state)?;

        let (_, header) = SafeTensors::read_metadata(&buf).map_err(format_err)?;
        let mut recorded = None;
        if let Some(meta) = header.metadata().as_ref() {
            if let Some(raw) = meta.get(META_ITERATION) {
                recorded = Some(raw.parse().map_err(|_| {
                    FinetuneError::CheckpointFormat(format!("bad iteration metadata: '{raw}'"))
                })?);
            }
            if let Some(raw) = meta.get(META_SCHEDULER) {
                let state: serde_json::Value = serde_json::from_str(raw).map_err(format_err)?;
                scheduler.load_state(&state)?;
            }
        }
        Ok(recorded)
    }

    fn save(
        &mut self,
        iteration: u64,
        model: &ModelHandle<M>,
        optimizer: &O,
        scheduler: &S,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let module = model.trainable_module();
        let optimizer_state = optimizer.state_tensors();

        let mut views: Vec<(String, TensorView<'_>)> =
            vec![(PARAMS_TENSOR.to_string(), f32_view(module.params())?)];
        for (name, data) in &optimizer_state {
            views.push((format!("{OPTIMIZER_PREFIX}{name}"), f32_view(data)?));
        }

        let metadata = HashMap::from([
            (META_ITERATION.to_string(), iteration.to_string()),
            (META_SCHEDULER.to_string(), scheduler.state().to_string()),
        ]);

        let bytes = serialize(views, &Some(metadata)).map_err(format_err)?;
        fs::write(self.checkpoint_file(iteration), bytes)?;
        fs::write(self.dir.join(LATEST_FILE), iteration.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Net(Vec<f32>);

    impl Module for Net {
        fn params(&self) -> &[f32] {
            &self.0
        }
        fn params_mut(&mut self) -> &mut [f32] {
            &mut self.0
        }
    }

    #[derive(Debug, Default)]
    struct Opt {
        momentum: Vec<f32>,
    }

    impl Optimizer for Opt {
        fn learning_rate(&self) -> f32 {
            1e-3
        }
        fn sync_master_params(&mut self, _params: &[f32]) {}
        fn state_tensors(&self) -> Vec<(&'static str, &[f32])> {
            vec![("momentum", self.momentum.as_slice())]
        }
        fn load_state_tensors(&mut self, tensors: &[(String, Vec<f32>)]) -> Result<()> {
            for (name, data) in tensors {
                if name == "momentum" {
                    self.momentum = data.clone();
                }
            }
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Sched {
        steps: u64,
    }

    impl LrScheduler for Sched {
        fn state(&self) -> serde_json::Value {
            serde_json::json!({ "steps": self.steps })
        }
        fn load_state(&mut self, state: &serde_json::Value) -> Result<()> {
            self.steps = state["steps"].as_u64().ok_or_else(|| {
                FinetuneError::CheckpointFormat("scheduler state missing 'steps'".into())
            })?;
            Ok(())
        }
    }

    #[test]
    fn save_then_load_restores_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsStore::new(dir.path());

        let model = ModelHandle::raw(Net(vec![1.0, -2.0, 3.5]));
        let optimizer = Opt {
            momentum: vec![0.1, 0.2, 0.3],
        };
        let scheduler = Sched { steps: 41 };
        store.save(17, &model, &optimizer, &scheduler).unwrap();

        let mut module = Net(vec![0.0; 3]);
        let mut optimizer = Opt::default();
        let mut scheduler = Sched::default();
        let recorded = store
            .load(&mut module, &mut optimizer, &mut scheduler)
            .unwrap();

        assert_eq!(recorded, Some(17));
        assert_eq!(module.0, vec![1.0, -2.0, 3.5]);
        assert_eq!(optimizer.momentum, vec![0.1, 0.2, 0.3]);
        assert_eq!(scheduler.steps, 41);
    }

    #[test]
    fn latest_pointer_tracks_the_newest_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsStore::new(dir.path());
        let model = ModelHandle::raw(Net(vec![1.0]));
        let optimizer = Opt {
            momentum: vec![0.0],
        };

        store.save(5, &model, &optimizer, &Sched { steps: 5 }).unwrap();
        store
            .save(10, &model, &optimizer, &Sched { steps: 10 })
            .unwrap();

        let mut module = Net(vec![0.0]);
        let mut opt = Opt::default();
        let mut sched = Sched::default();
        let recorded = store.load(&mut module, &mut opt, &mut sched).unwrap();
        assert_eq!(recorded, Some(10));
        assert_eq!(sched.steps, 10);
    }

    #[test]
    fn shape_mismatch_is_a_checkpoint_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsStore::new(dir.path());
        let model = ModelHandle::raw(Net(vec![1.0, 2.0]));
        let optimizer = Opt {
            momentum: vec![0.0, 0.0],
        };
        store.save(1, &model, &optimizer, &Sched::default()).unwrap();

        let mut smaller = Net(vec![0.0]);
        let mut opt = Opt::default();
        let mut sched = Sched::default();
        let err = store.load(&mut smaller, &mut opt, &mut sched).unwrap_err();
        assert!(matches!(err, FinetuneError::CheckpointFormat(_)));
    }
}
