use crate::error::Result;

/// The raw trainable module: a flat parameter buffer.
///
/// Forward/backward tensor math lives outside this crate; the loop only
/// needs parameter access for checkpointing and master-weight resync.
pub trait Module {
    fn params(&self) -> &[f32];
    fn params_mut(&mut self) -> &mut [f32];
}

/// The external parameter-update machinery, seen through the narrow
/// surface the loop actually touches.
pub trait Optimizer {
    /// Learning rate of the first parameter group.
    fn learning_rate(&self) -> f32;

    /// Refreshes the full-precision master copy from the (just loaded)
    /// working-precision model parameters. Required after a checkpoint
    /// load in reduced-precision mode.
    fn sync_master_params(&mut self, params: &[f32]);

    /// Named flat state tensors (moment buffers etc.) for checkpointing.
    fn state_tensors(&self) -> Vec<(&'static str, &[f32])>;

    /// Restores state tensors produced by `state_tensors`.
    fn load_state_tensors(&mut self, tensors: &[(String, Vec<f32>)]) -> Result<()>;
}

/// Learning-rate schedule state, opaque to the loop.
pub trait LrScheduler {
    fn state(&self) -> serde_json::Value;
    fn load_state(&mut self, state: &serde_json::Value) -> Result<()>;
}

/// Numeric-precision decoration around the raw module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision<M> {
    Full(M),
    Reduced(M),
}

impl<M> Precision<M> {
    #[inline]
    fn module(&self) -> &M {
        match self {
            Precision::Full(m) | Precision::Reduced(m) => m,
        }
    }

    #[inline]
    fn module_mut(&mut self) -> &mut M {
        match self {
            Precision::Full(m) | Precision::Reduced(m) => m,
        }
    }

    fn into_module(self) -> M {
        match self {
            Precision::Full(m) | Precision::Reduced(m) => m,
        }
    }
}

/// A model as handed to the loop: the raw module, possibly decorated by a
/// precision wrapper, possibly further decorated by a replication wrapper.
///
/// The nesting order is fixed (replication outermost), so resolution is a
/// total two-step unwrap rather than open-ended dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelHandle<M> {
    Single(Precision<M>),
    Replicated(Precision<M>),
}

impl<M> ModelHandle<M> {
    /// An undecorated handle.
    pub fn raw(module: M) -> Self {
        ModelHandle::Single(Precision::Full(module))
    }

    /// Adds the reduced-precision decoration.
    pub fn with_reduced_precision(self) -> Self {
        match self {
            ModelHandle::Single(p) => ModelHandle::Single(Precision::Reduced(p.into_module())),
            ModelHandle::Replicated(p) => {
                ModelHandle::Replicated(Precision::Reduced(p.into_module()))
            }
        }
    }

    /// Adds the data-parallel replication decoration.
    pub fn replicated(self) -> Self {
        match self {
            ModelHandle::Single(p) | ModelHandle::Replicated(p) => ModelHandle::Replicated(p),
        }
    }

    /// Unwraps replication then precision down to the raw module.
    #[inline]
    pub fn trainable_module(&self) -> &M {
        match self {
            ModelHandle::Single(p) | ModelHandle::Replicated(p) => p.module(),
        }
    }

    /// Mutable counterpart of [`trainable_module`](Self::trainable_module).
    #[inline]
    pub fn trainable_module_mut(&mut self) -> &mut M {
        match self {
            ModelHandle::Single(p) | ModelHandle::Replicated(p) => p.module_mut(),
        }
    }

    #[inline]
    pub fn is_reduced_precision(&self) -> bool {
        matches!(
            self,
            ModelHandle::Single(Precision::Reduced(_))
                | ModelHandle::Replicated(Precision::Reduced(_))
        )
    }

    #[inline]
    pub fn is_replicated(&self) -> bool {
        matches!(self, ModelHandle::Replicated(_))
    }
}
