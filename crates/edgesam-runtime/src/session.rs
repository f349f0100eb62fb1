use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use edgesam_core::{Backend, BackendModel, DType, IOName, ModelArtifact, Shape, Tensor};
use tracing::{debug, info};

use crate::{
    postprocess, preprocess, BinaryMask, ChannelOrder, DecodeError, EmbeddingCache, Image,
    ImageError, LoadError, ModelContract, Point, PromptSet, Rect, SessionConfig, Size, Stage,
};

#[derive(Clone, Debug, PartialEq)]
pub struct MaskResult {
    pub mask: BinaryMask,
    /// Quality estimate reported by the decoder, passed through unchanged.
    pub iou: f32,
}

/// Encoder/decoder pair plus the embedding of the most recently loaded image.
///
/// A session only exists once both models have been opened and validated.
/// Calls block until the underlying inference finishes.
pub struct SamSession {
    contract: ModelContract,
    encoder: Mutex<Box<dyn BackendModel>>,
    decoder: Mutex<Box<dyn BackendModel>>,
    cache: RwLock<EmbeddingCache>,
    channel_order: ChannelOrder,
}

impl SamSession {
    pub fn load<B: Backend>(backend: &B, config: &SessionConfig) -> Result<Self, LoadError> {
        for stage in [Stage::Encoder, Stage::Decoder] {
            let path = &config.stage(stage).model_path;
            if !path.is_file() {
                return Err(LoadError::ModelNotFound {
                    stage,
                    path: path.clone(),
                });
            }
        }

        let encoder = open_model(backend, config, Stage::Encoder)?;
        let decoder = open_model(backend, config, Stage::Decoder)?;
        let contract = ModelContract::new(encoder.spec(), decoder.spec())?;

        info!(
            backend = backend.name(),
            input_size = %contract.input_size(),
            embedding = %contract.encoder.output,
            threads = config.threads,
            "segmentation session ready"
        );

        Ok(Self {
            contract,
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            cache: RwLock::new(EmbeddingCache::new()),
            channel_order: config.channel_order,
        })
    }

    pub fn contract(&self) -> &ModelContract {
        &self.contract
    }

    pub fn input_size(&self) -> Size {
        self.contract.input_size()
    }

    pub fn has_image(&self) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_ready()
    }

    /// Number of images embedded over the session lifetime.
    pub fn embedding_generation(&self) -> u64 {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation()
    }

    /// Embeds `image` and makes it the target of subsequent mask queries.
    ///
    /// On failure the previously loaded embedding stays in place. The encoder
    /// lock is released before the cache is written, so when several calls
    /// overlap the embedding written last wins, which need not belong to the
    /// call made last.
    pub fn load_image(&self, image: &Image) -> Result<(), ImageError> {
        let expected = self.input_size();
        if image.size() != expected {
            return Err(ImageError::SizeMismatch {
                expected,
                actual: image.size(),
            });
        }
        let channels = self.contract.encoder.input_shape.dims()[1];
        if image.channels() != channels {
            return Err(ImageError::ChannelMismatch {
                expected: channels,
                actual: image.channels(),
            });
        }

        let encoder = &self.contract.encoder;
        let input = preprocess::image_to_tensor(image, &encoder.input_shape, self.channel_order)
            .map_err(|e| ImageError::Tensor(e.into()))?;

        let start = Instant::now();
        let outputs = lock(&self.encoder)
            .infer(
                &[(encoder.input.name.clone(), &input)],
                std::slice::from_ref(&encoder.output.name),
            )
            .map_err(|e| ImageError::InferenceFailed(e.into()))?;

        let embedding = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ImageError::InvalidEmbedding("encoder returned no output".into()))?;
        self.check_embedding(&embedding)?;
        let shape = embedding.shape().clone();

        let stored = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(embedding, expected);

        debug!(
            generation = stored.generation,
            shape = %shape,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "image embedded"
        );
        Ok(())
    }

    /// Drops the current embedding; mask queries fail until the next image is loaded.
    pub fn clear_image(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn get_mask(&self, prompt: &PromptSet) -> Result<MaskResult, DecodeError> {
        let embedding = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current()
            .ok_or(DecodeError::NoImageLoaded)?;

        let decoder = &self.contract.decoder;
        let encoded = prompt.encode();
        let (coords, labels) = encoded
            .to_tensors(decoder.point_coords.dtype, decoder.point_labels.dtype)
            .map_err(|e| DecodeError::Tensor(e.into()))?;
        let aux = self
            .auxiliary_inputs(embedding.image_size)
            .map_err(|e| DecodeError::Tensor(e.into()))?;

        let mut inputs: Vec<(IOName, &Tensor)> = vec![
            (decoder.embeddings.name.clone(), &embedding.tensor),
            (decoder.point_coords.name.clone(), &coords),
            (decoder.point_labels.name.clone(), &labels),
        ];
        inputs.extend(aux.iter().map(|(name, tensor)| (name.clone(), tensor)));

        let start = Instant::now();
        let outputs = lock(&self.decoder)
            .infer(&inputs, &[decoder.scores.clone(), decoder.masks.clone()])
            .map_err(|e| DecodeError::InferenceFailed(e.into()))?;
        let mut outputs = outputs.into_iter();
        let scores = outputs
            .next()
            .ok_or_else(|| DecodeError::MissingOutput(decoder.scores.to_string()))?;
        let masks = outputs
            .next()
            .ok_or_else(|| DecodeError::MissingOutput(decoder.masks.to_string()))?;

        let iou = scores
            .to_f32_vec()
            .map_err(|e| DecodeError::InvalidOutput(format!("{e:#}")))?
            .first()
            .copied()
            .ok_or_else(|| DecodeError::InvalidOutput("empty quality score tensor".into()))?;
        let mask = postprocess::logits_to_mask(&masks, embedding.image_size)
            .map_err(|e| DecodeError::InvalidOutput(format!("{e:#}")))?;

        debug!(
            generation = embedding.generation,
            points = encoded.len(),
            logits = %masks.shape(),
            iou,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "mask decoded"
        );
        Ok(MaskResult { mask, iou })
    }

    pub fn mask_at(&self, point: Point) -> Result<MaskResult, DecodeError> {
        self.get_mask(&PromptSet::new().with_point(point))
    }

    pub fn mask_for_points(
        &self,
        points: &[Point],
        negative_points: &[Point],
    ) -> Result<MaskResult, DecodeError> {
        self.get_mask(&PromptSet {
            points: points.to_vec(),
            negative_points: negative_points.to_vec(),
            roi: None,
        })
    }

    pub fn mask_for_box(
        &self,
        points: &[Point],
        negative_points: &[Point],
        roi: Rect,
    ) -> Result<MaskResult, DecodeError> {
        self.get_mask(&PromptSet {
            points: points.to_vec(),
            negative_points: negative_points.to_vec(),
            roi: Some(roi),
        })
    }

    fn check_embedding(&self, embedding: &Tensor) -> Result<(), ImageError> {
        if embedding.dtype() != DType::F32 {
            return Err(ImageError::InvalidEmbedding(format!(
                "expected f32, got {}",
                embedding.dtype()
            )));
        }
        let dims = embedding.shape().dims();
        let declared = &self.contract.decoder.embeddings;
        let fits = dims.len() == declared.rank
            && dims
                .iter()
                .enumerate()
                .all(|(axis, d)| declared.dim(axis).map_or(true, |want| want == *d));
        if !fits {
            return Err(ImageError::InvalidEmbedding(format!(
                "shape {} does not fit decoder input {declared}",
                embedding.shape()
            )));
        }
        Ok(())
    }

    /// Constant decoder inputs, only for those the decoder declares.
    fn auxiliary_inputs(&self, image_size: Size) -> anyhow::Result<Vec<(IOName, Tensor)>> {
        let decoder = &self.contract.decoder;
        let mut aux = Vec::new();

        // All-zero bytes read as zero for every declared element type.
        if let (Some(spec), Some(shape)) = (&decoder.mask_input, decoder.mask_prior_shape()) {
            aux.push((spec.name.clone(), Tensor::zeros(spec.dtype, shape)));
        }
        if let Some(spec) = &decoder.has_mask_input {
            let flag = Tensor::zeros(spec.dtype, Shape::from_slice(&[1]));
            aux.push((spec.name.clone(), flag));
        }
        if let Some(spec) = &decoder.orig_im_size {
            let size = [image_size.height as f32, image_size.width as f32];
            let orig = Tensor::from_f32_as(spec.dtype, Shape::from_slice(&[2]), &size)?;
            aux.push((spec.name.clone(), orig));
        }

        Ok(aux)
    }
}

fn open_model<B: Backend>(
    backend: &B,
    config: &SessionConfig,
    stage: Stage,
) -> Result<Box<dyn BackendModel>, LoadError> {
    let artifact = ModelArtifact::OnnxPath(config.stage(stage).model_path.clone());
    let model = backend
        .load(&artifact, &config.backend_options(stage))
        .map_err(|e| LoadError::Backend {
            stage,
            source: e.into(),
        })?;
    debug!(
        %stage,
        inputs = model.spec().inputs.len(),
        outputs = model.spec().outputs.len(),
        "model opened"
    );
    Ok(Box::new(model))
}

fn lock(model: &Mutex<Box<dyn BackendModel>>) -> MutexGuard<'_, Box<dyn BackendModel>> {
    model.lock().unwrap_or_else(PoisonError::into_inner)
}
