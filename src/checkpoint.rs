use log::info;

use crate::{
    error::Result,
    model::{ModelHandle, Module, Optimizer},
    step::TrainEnv,
};

/// External load/save collaborator. The artifact format is opaque to the
/// loop; see [`crate::store::SafetensorsStore`] for the provided one.
pub trait CheckpointStore<M, O, S> {
    /// Loads into the raw module / optimizer / scheduler and returns the
    /// recorded global iteration, if the artifact carries one.
    fn load(&mut self, module: &mut M, optimizer: &mut O, scheduler: &mut S)
        -> Result<Option<u64>>;

    /// Persists a step boundary. Receives the wrapped handle unchanged;
    /// the store is responsible for any introspection it needs.
    fn save(
        &mut self,
        iteration: u64,
        model: &ModelHandle<M>,
        optimizer: &O,
        scheduler: &S,
    ) -> Result<()>;
}

/// Loads a pretrained checkpoint through the wrapper chain.
///
/// Resolves the raw module (replication wrapper first, then precision
/// wrapper), delegates to the store, and — when running in reduced
/// precision — refreshes the optimizer's full-precision master copy from
/// the loaded working weights. Without that refresh the next optimizer
/// step silently diverges from what was loaded.
pub fn load_pretrained<M, O, S>(
    store: &mut dyn CheckpointStore<M, O, S>,
    env: &mut TrainEnv<M, O, S>,
) -> Result<Option<u64>>
where
    M: Module,
    O: Optimizer,
{
    let TrainEnv {
        model,
        optimizer,
        scheduler,
    } = env;

    let reduced = model.is_reduced_precision();
    let recorded = store.load(model.trainable_module_mut(), optimizer, scheduler)?;
    if reduced {
        optimizer.sync_master_params(model.trainable_module().params());
    }
    if let Some(iteration) = recorded {
        info!("loaded checkpoint at iteration {iteration}");
    } else {
        info!("loaded pretrained weights (no recorded iteration)");
    }
    Ok(recorded)
}

/// Saves a checkpoint; no unwrapping, the store introspects the handle.
pub fn save_checkpoint<M, O, S>(
    store: &mut dyn CheckpointStore<M, O, S>,
    iteration: u64,
    env: &TrainEnv<M, O, S>,
) -> Result<()> {
    info!("saving checkpoint at iteration {iteration}");
    store.save(iteration, &env.model, &env.optimizer, &env.scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FinetuneError;

    #[derive(Debug, Default)]
    struct Net {
        params: Vec<f32>,
    }

    impl Module for Net {
        fn params(&self) -> &[f32] {
            &self.params
        }
        fn params_mut(&mut self) -> &mut [f32] {
            &mut self.params
        }
    }

    #[derive(Debug, Default)]
    struct Opt {
        master: Vec<f32>,
        synced: bool,
    }

    impl Optimizer for Opt {
        fn learning_rate(&self) -> f32 {
            0.0
        }
        fn sync_master_params(&mut self, params: &[f32]) {
            self.master = params.to_vec();
            self.synced = true;
        }
        fn state_tensors(&self) -> Vec<(&'static str, &[f32])> {
            Vec::new()
        }
        fn load_state_tensors(&mut self, _: &[(String, Vec<f32>)]) -> Result<()> {
            Ok(())
        }
    }

    struct FixedStore {
        params: Vec<f32>,
        iteration: Option<u64>,
    }

    impl CheckpointStore<Net, Opt, ()> for FixedStore {
        fn load(
            &mut self,
            module: &mut Net,
            _optimizer: &mut Opt,
            _scheduler: &mut (),
        ) -> Result<Option<u64>> {
            if module.params.len() != self.params.len() {
                return Err(FinetuneError::CheckpointFormat(format!(
                    "stored {} parameter(s), live module has {}",
                    self.params.len(),
                    module.params.len()
                )));
            }
            module.params.copy_from_slice(&self.params);
            Ok(self.iteration)
        }

        fn save(
            &mut self,
            _iteration: u64,
            _model: &ModelHandle<Net>,
            _optimizer: &Opt,
            _scheduler: &(),
        ) -> Result<()> {
            Ok(())
        }
    }

    fn env(model: ModelHandle<Net>) -> TrainEnv<Net, Opt, ()> {
        TrainEnv {
            model,
            optimizer: Opt::default(),
            scheduler: (),
        }
    }

    #[test]
    fn reduced_precision_load_resyncs_master_params() {
        let mut store = FixedStore {
            params: vec![1.0, 2.0],
            iteration: Some(7),
        };
        let handle = ModelHandle::raw(Net {
            params: vec![0.0, 0.0],
        })
        .with_reduced_precision()
        .replicated();
        let mut env = env(handle);

        let recorded = load_pretrained(&mut store, &mut env).unwrap();
        assert_eq!(recorded, Some(7));
        assert_eq!(env.model.trainable_module().params(), &[1.0, 2.0]);
        assert!(env.optimizer.synced);
        assert_eq!(env.optimizer.master, vec![1.0, 2.0]);
    }

    #[test]
    fn full_precision_load_skips_the_resync() {
        let mut store = FixedStore {
            params: vec![3.0],
            iteration: None,
        };
        let mut env = env(ModelHandle::raw(Net { params: vec![0.0] }));

        let recorded = load_pretrained(&mut store, &mut env).unwrap();
        assert_eq!(recorded, None);
        assert!(!env.optimizer.synced);
    }

    #[test]
    fn shape_mismatch_propagates_as_checkpoint_format() {
        let mut store = FixedStore {
            params: vec![1.0, 2.0, 3.0],
            iteration: None,
        };
        let mut env = env(ModelHandle::raw(Net { params: vec![0.0] }));

        let err = load_pretrained(&mut store, &mut env).unwrap_err();
        assert!(matches!(err, FinetuneError::CheckpointFormat(_)));
    }
}
