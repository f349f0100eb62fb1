use anyhow::Result;

use crate::{Device, IOName, ModelArtifact, ModelSpec, Tensor};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendOptions {
    pub device: Device,
    /// Intra-op thread pool size; 0 lets the backend decide.
    pub intra_threads: usize,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            intra_threads: 1,
        }
    }
}

pub trait Backend: Send + Sync + 'static {
    type Model: BackendModel;

    fn name(&self) -> &'static str;
    fn load(&self, artifact: &ModelArtifact, options: &BackendOptions) -> Result<Self::Model>;
}

pub trait BackendModel: Send + 'static {
    fn spec(&self) -> &ModelSpec;

    /// Runs the model once.
    ///
    /// Inputs are borrowed from the caller; the returned tensors are owned and
    /// follow the order of `outputs`.
    fn infer(&mut self, inputs: &[(IOName, &Tensor)], outputs: &[IOName]) -> Result<Vec<Tensor>>;
}

impl<M: BackendModel + ?Sized> BackendModel for Box<M> {
    fn spec(&self) -> &ModelSpec {
        (**self).spec()
    }

    fn infer(&mut self, inputs: &[(IOName, &Tensor)], outputs: &[IOName]) -> Result<Vec<Tensor>> {
        (**self).infer(inputs, outputs)
    }
}
