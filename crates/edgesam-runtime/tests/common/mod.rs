#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure, Context, Result};
use edgesam_core::{
    Backend, BackendModel, BackendOptions, DType, IOName, ModelArtifact, ModelSpec, Shape, Tensor,
    TensorSpec,
};
use edgesam_runtime::{Image, SessionConfig, Size};
use tempfile::TempDir;

pub const WIDTH: usize = 8;
pub const HEIGHT: usize = 6;

pub fn tensor_spec(name: &str, dtype: DType, dims: &[Option<usize>]) -> TensorSpec {
    TensorSpec {
        name: IOName::from(name),
        dtype,
        rank: dims.len(),
        dims: dims.to_vec(),
    }
}

/// Encoder taking an `8x6` image and producing a `1x1x6x8` embedding.
pub fn encoder_spec() -> ModelSpec {
    ModelSpec {
        inputs: vec![tensor_spec(
            "image",
            DType::F32,
            &[Some(1), Some(3), Some(HEIGHT), Some(WIDTH)],
        )],
        outputs: vec![tensor_spec(
            "image_embeddings",
            DType::F32,
            &[Some(1), Some(1), Some(HEIGHT), Some(WIDTH)],
        )],
    }
}

/// Decoder with only the three prompt inputs, like the EdgeSAM export.
pub fn decoder_spec() -> ModelSpec {
    ModelSpec {
        inputs: vec![
            tensor_spec(
                "image_embeddings",
                DType::F32,
                &[Some(1), Some(1), Some(HEIGHT), Some(WIDTH)],
            ),
            tensor_spec("point_coords", DType::F32, &[Some(1), None, Some(2)]),
            tensor_spec("point_labels", DType::F32, &[Some(1), None]),
        ],
        outputs: vec![
            tensor_spec("scores", DType::F32, &[Some(1), Some(1)]),
            tensor_spec("masks", DType::F32, &[Some(1), Some(1), None, None]),
        ],
    }
}

/// Decoder that also declares the mask prior, has-mask flag and original size.
pub fn full_decoder_spec() -> ModelSpec {
    let mut spec = decoder_spec();
    spec.inputs.extend([
        tensor_spec("mask_input", DType::F32, &[Some(1), Some(1), Some(256), Some(256)]),
        tensor_spec("has_mask_input", DType::F32, &[Some(1)]),
        tensor_spec("orig_im_size", DType::I64, &[Some(2)]),
    ]);
    spec
}

#[derive(Clone, Debug)]
pub enum DecoderBehavior {
    /// Mask logits are the embedding plane; the score is the point count / 10.
    EchoEmbedding,
    /// Fixed logits of the given size, independent of the inputs.
    FixedLogits { size: Size, logits: Vec<f32> },
    /// Returns only the first requested output.
    DropMasks,
    /// Returns a score tensor with no elements.
    EmptyScores,
    /// Returns rank-3 mask logits.
    FlatLogits,
}

#[derive(Clone, Debug)]
pub struct DecoderCall {
    pub inputs: Vec<(String, Tensor)>,
}

impl DecoderCall {
    pub fn input(&self, name: &str) -> Option<&Tensor> {
        self.inputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }
}

/// In-memory backend whose models are scripted by the test.
#[derive(Clone)]
pub struct FakeBackend {
    pub encoder_spec: ModelSpec,
    pub decoder_spec: ModelSpec,
    pub behavior: DecoderBehavior,
    pub calls: Arc<Mutex<Vec<DecoderCall>>>,
    pub fail_encoder: Arc<AtomicBool>,
    pub fail_decoder: Arc<AtomicBool>,
    pub wide_embedding: Arc<AtomicBool>,
    pub loaded_options: Arc<Mutex<Vec<BackendOptions>>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            encoder_spec: encoder_spec(),
            decoder_spec: decoder_spec(),
            behavior: DecoderBehavior::EchoEmbedding,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_encoder: Arc::new(AtomicBool::new(false)),
            fail_decoder: Arc::new(AtomicBool::new(false)),
            wide_embedding: Arc::new(AtomicBool::new(false)),
            loaded_options: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl FakeBackend {
    pub fn with_decoder(mut self, spec: ModelSpec) -> Self {
        self.decoder_spec = spec;
        self
    }

    pub fn with_encoder(mut self, spec: ModelSpec) -> Self {
        self.encoder_spec = spec;
        self
    }

    pub fn with_behavior(mut self, behavior: DecoderBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn set_encoder_failure(&self, fail: bool) {
        self.fail_encoder.store(fail, Ordering::SeqCst);
    }

    pub fn set_decoder_failure(&self, fail: bool) {
        self.fail_decoder.store(fail, Ordering::SeqCst);
    }

    /// Makes the encoder emit a two-channel embedding the decoder does not accept.
    pub fn set_wide_embedding(&self, wide: bool) {
        self.wide_embedding.store(wide, Ordering::SeqCst);
    }

    pub fn decoder_calls(&self) -> Vec<DecoderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> DecoderCall {
        self.decoder_calls().pop().expect("decoder was never called")
    }
}

pub enum FakeModel {
    Encoder {
        spec: ModelSpec,
        fail: Arc<AtomicBool>,
        wide: Arc<AtomicBool>,
    },
    Decoder {
        spec: ModelSpec,
        behavior: DecoderBehavior,
        calls: Arc<Mutex<Vec<DecoderCall>>>,
        fail: Arc<AtomicBool>,
    },
}

impl Backend for FakeBackend {
    type Model = FakeModel;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn load(&self, artifact: &ModelArtifact, options: &BackendOptions) -> Result<Self::Model> {
        self.loaded_options.lock().unwrap().push(options.clone());
        let name = artifact
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .context("artifact has no file name")?;

        if name.contains("encoder") {
            Ok(FakeModel::Encoder {
                spec: self.encoder_spec.clone(),
                fail: self.fail_encoder.clone(),
                wide: self.wide_embedding.clone(),
            })
        } else if name.contains("decoder") {
            Ok(FakeModel::Decoder {
                spec: self.decoder_spec.clone(),
                behavior: self.behavior.clone(),
                calls: self.calls.clone(),
                fail: self.fail_decoder.clone(),
            })
        } else {
            bail!("cannot tell which stage {name} is")
        }
    }
}

impl BackendModel for FakeModel {
    fn spec(&self) -> &ModelSpec {
        match self {
            FakeModel::Encoder { spec, .. } | FakeModel::Decoder { spec, .. } => spec,
        }
    }

    fn infer(&mut self, inputs: &[(IOName, &Tensor)], outputs: &[IOName]) -> Result<Vec<Tensor>> {
        match self {
            FakeModel::Encoder { fail, wide, .. } => {
                ensure!(!fail.load(Ordering::SeqCst), "simulated runtime failure");
                ensure!(inputs.len() == 1, "encoder takes one input");
                let (name, image) = &inputs[0];
                ensure!(name.as_str() == "image", "unexpected encoder input {name}");
                ensure!(outputs.len() == 1 && outputs[0].as_str() == "image_embeddings");

                let dims = image.shape().dims();
                if wide.load(Ordering::SeqCst) {
                    let shape = Shape::from_slice(&[1, 2, dims[2], dims[3]]);
                    return Ok(vec![Tensor::zeros(DType::F32, shape)]);
                }
                // Embedding = red plane shifted so that bright red is positive.
                let plane = dims[2] * dims[3];
                let values = image.to_f32_vec()?;
                let red = values[..plane].iter().map(|v| v - 0.5).collect::<Vec<_>>();
                Ok(vec![Tensor::from_f32(
                    Shape::from_slice(&[1, 1, dims[2], dims[3]]),
                    &red,
                )?])
            }
            FakeModel::Decoder {
                spec,
                behavior,
                calls,
                fail,
            } => {
                for (name, _) in inputs {
                    ensure!(spec.input(name.as_str()).is_some(), "undeclared input {name}");
                }
                calls.lock().unwrap().push(DecoderCall {
                    inputs: inputs
                        .iter()
                        .map(|(name, t)| (name.0.clone(), (*t).clone()))
                        .collect(),
                });

                ensure!(!fail.load(Ordering::SeqCst), "simulated runtime failure");

                let labels = inputs
                    .iter()
                    .find(|(n, _)| n.as_str() == "point_labels")
                    .map(|(_, t)| *t)
                    .context("missing point_labels")?;
                let points = labels.shape().dims()[1];

                let embedding = inputs
                    .iter()
                    .find(|(n, _)| n.as_str() == "image_embeddings")
                    .map(|(_, t)| (*t).clone())
                    .context("missing image_embeddings")?;
                let score_tensor = |values: &[f32]| {
                    Tensor::from_f32(Shape::from_slice(&[1, values.len()]), values)
                };

                let (scores, masks) = match behavior {
                    DecoderBehavior::EchoEmbedding => {
                        (score_tensor(&[points as f32 / 10.0])?, embedding)
                    }
                    DecoderBehavior::FixedLogits { size, logits } => {
                        let shape = Shape::from_slice(&[
                            1,
                            1,
                            size.height as usize,
                            size.width as usize,
                        ]);
                        (score_tensor(&[0.5])?, Tensor::from_f32(shape, logits)?)
                    }
                    DecoderBehavior::DropMasks => {
                        let requested = outputs.first().context("no outputs requested")?;
                        ensure!(matches!(requested.as_str(), "scores" | "iou_predictions"));
                        return Ok(vec![score_tensor(&[0.5])?]);
                    }
                    DecoderBehavior::EmptyScores => (score_tensor(&[])?, embedding),
                    DecoderBehavior::FlatLogits => {
                        let dims = embedding.shape().dims();
                        let flat = Shape::from_slice(&[1, dims[2], dims[3]]);
                        (score_tensor(&[0.5])?, Tensor::zeros(DType::F32, flat))
                    }
                };

                outputs
                    .iter()
                    .map(|name| match name.as_str() {
                        "scores" | "iou_predictions" => Ok(scores.clone()),
                        "masks" => Ok(masks.clone()),
                        other => bail!("unknown output {other}"),
                    })
                    .collect()
            }
        }
    }
}

/// Creates placeholder model files and a matching config.
pub fn model_files() -> (TempDir, SessionConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let encoder = dir.path().join("encoder.onnx");
    let decoder = dir.path().join("decoder.onnx");
    touch(&encoder);
    touch(&decoder);
    let config = SessionConfig::new(encoder, decoder, 2);
    (dir, config)
}

fn touch(path: &Path) {
    std::fs::write(path, b"onnx").expect("write model placeholder");
}

/// Image of the session input size filled with one RGB colour.
pub fn solid_image(rgb: [u8; 3]) -> Image {
    let data = rgb
        .iter()
        .copied()
        .cycle()
        .take(WIDTH * HEIGHT * 3)
        .collect();
    Image::from_rgb(Size::new(WIDTH as u32, HEIGHT as u32), data).expect("valid image")
}

/// Left half red, right half black.
pub fn half_red_image() -> Image {
    let mut data = Vec::with_capacity(WIDTH * HEIGHT * 3);
    for _ in 0..HEIGHT {
        for x in 0..WIDTH {
            let red = if x < WIDTH / 2 { 255 } else { 0 };
            data.extend_from_slice(&[red, 0, 0]);
        }
    }
    Image::from_rgb(Size::new(WIDTH as u32, HEIGHT as u32), data).expect("valid image")
}
