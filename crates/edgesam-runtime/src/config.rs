use std::path::PathBuf;

use edgesam_core::{BackendOptions, Device};

use crate::{ChannelOrder, Stage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageConfig {
    pub model_path: PathBuf,
    pub device: Device,
}

/// Everything a [`crate::SamSession`] needs at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub encoder: StageConfig,
    pub decoder: StageConfig,
    /// CPU thread pool size shared by both stages.
    pub threads: usize,
    /// Colour order the encoder was trained on.
    pub channel_order: ChannelOrder,
}

impl SessionConfig {
    pub fn new(encoder: impl Into<PathBuf>, decoder: impl Into<PathBuf>, threads: usize) -> Self {
        Self {
            encoder: StageConfig {
                model_path: encoder.into(),
                device: Device::Cpu,
            },
            decoder: StageConfig {
                model_path: decoder.into(),
                device: Device::Cpu,
            },
            threads,
            channel_order: ChannelOrder::Rgb,
        }
    }

    pub fn with_device(mut self, stage: Stage, device: Device) -> Self {
        self.stage_mut(stage).device = device;
        self
    }

    pub fn stage(&self, stage: Stage) -> &StageConfig {
        match stage {
            Stage::Encoder => &self.encoder,
            Stage::Decoder => &self.decoder,
        }
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageConfig {
        match stage {
            Stage::Encoder => &mut self.encoder,
            Stage::Decoder => &mut self.decoder,
        }
    }

    pub fn backend_options(&self, stage: Stage) -> BackendOptions {
        BackendOptions {
            device: self.stage(stage).device.clone(),
            intra_threads: self.threads,
        }
    }
}
