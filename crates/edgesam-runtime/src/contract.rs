//! Tensor contract introspected from the two loaded models.
//!
//! Shapes and names are read from the models at load time and are the only
//! source of truth for preprocessing, prompt encoding and decoding.

use edgesam_core::{DType, IOName, ModelSpec, Shape, TensorSpec};
use tracing::debug;

use crate::{LoadError, Size, Stage};

pub const IMAGE_INPUT: &str = "image";
pub const EMBEDDING_OUTPUT: &str = "image_embeddings";

pub const EMBEDDINGS_INPUT: &str = "image_embeddings";
pub const POINT_COORDS_INPUT: &str = "point_coords";
pub const POINT_LABELS_INPUT: &str = "point_labels";
pub const MASK_INPUT: &str = "mask_input";
pub const HAS_MASK_INPUT: &str = "has_mask_input";
pub const ORIG_SIZE_INPUT: &str = "orig_im_size";

pub const MASKS_OUTPUT: &str = "masks";
/// Quality score output names, in order of preference.
pub const SCORE_OUTPUTS: [&str; 2] = ["scores", "iou_predictions"];

/// Side of the low-resolution mask prior.
pub const MASK_PRIOR_SIDE: usize = 256;

const IMAGE_CHANNELS: usize = 3;

#[derive(Clone, Debug)]
pub struct EncoderContract {
    pub spec: ModelSpec,
    pub input: TensorSpec,
    pub output: TensorSpec,
    /// Fully resolved input shape, `[1, 3, height, width]`.
    pub input_shape: Shape,
}

#[derive(Clone, Debug)]
pub struct DecoderContract {
    pub spec: ModelSpec,
    pub embeddings: TensorSpec,
    pub point_coords: TensorSpec,
    pub point_labels: TensorSpec,
    pub mask_input: Option<TensorSpec>,
    pub has_mask_input: Option<TensorSpec>,
    pub orig_im_size: Option<TensorSpec>,
    pub masks: IOName,
    pub scores: IOName,
}

#[derive(Clone, Debug)]
pub struct ModelContract {
    pub encoder: EncoderContract,
    pub decoder: DecoderContract,
}

impl ModelContract {
    pub fn new(encoder: &ModelSpec, decoder: &ModelSpec) -> Result<Self, LoadError> {
        let encoder = EncoderContract::new(encoder)?;
        let decoder = DecoderContract::new(decoder)?;

        if !dims_compatible(&encoder.output.dims, &decoder.embeddings.dims) {
            return Err(LoadError::shape(
                Stage::Decoder,
                format!(
                    "embedding input {} does not accept encoder output {}",
                    decoder.embeddings, encoder.output
                ),
            ));
        }

        Ok(Self { encoder, decoder })
    }

    /// Spatial size every loaded image must have.
    pub fn input_size(&self) -> Size {
        let dims = self.encoder.input_shape.dims();
        Size::new(dims[3] as u32, dims[2] as u32)
    }
}

impl EncoderContract {
    fn new(spec: &ModelSpec) -> Result<Self, LoadError> {
        let stage = Stage::Encoder;
        if spec.inputs.len() != 1 {
            return Err(LoadError::shape(
                stage,
                format!("expected exactly 1 input, found {}", spec.inputs.len()),
            ));
        }
        if spec.outputs.len() != 1 {
            return Err(LoadError::shape(
                stage,
                format!("expected exactly 1 output, found {}", spec.outputs.len()),
            ));
        }

        let input = spec.inputs[0].clone();
        let output = spec.outputs[0].clone();
        if input.name.as_str() != IMAGE_INPUT || output.name.as_str() != EMBEDDING_OUTPUT {
            debug!(input = %input.name, output = %output.name, "encoder uses non-standard IO names");
        }

        expect_tensor(stage, &input, 4, &[DType::F32])?;
        expect_tensor(stage, &output, 4, &[DType::F32])?;

        let batch = input.dim(0).unwrap_or(1);
        if batch != 1 {
            return Err(LoadError::shape(
                stage,
                format!("batch size must be 1, model declares {batch}"),
            ));
        }
        let channels = input.dim(1).unwrap_or(IMAGE_CHANNELS);
        if channels != IMAGE_CHANNELS {
            return Err(LoadError::shape(
                stage,
                format!("expected a {IMAGE_CHANNELS}-channel input, model declares {channels}"),
            ));
        }
        let (Some(height), Some(width)) = (input.dim(2), input.dim(3)) else {
            return Err(LoadError::shape(
                stage,
                format!("input {input} has a dynamic spatial size"),
            ));
        };
        if height == 0 || width == 0 {
            return Err(LoadError::shape(stage, format!("input {input} is empty")));
        }

        Ok(Self {
            spec: spec.clone(),
            input,
            output,
            input_shape: Shape::from_slice(&[1, IMAGE_CHANNELS, height, width]),
        })
    }
}

impl DecoderContract {
    fn new(spec: &ModelSpec) -> Result<Self, LoadError> {
        let stage = Stage::Decoder;
        const PROMPT_DTYPES: &[DType] = &[DType::F32, DType::I64, DType::I32];

        for input in &spec.inputs {
            let known = [
                EMBEDDINGS_INPUT,
                POINT_COORDS_INPUT,
                POINT_LABELS_INPUT,
                MASK_INPUT,
                HAS_MASK_INPUT,
                ORIG_SIZE_INPUT,
            ];
            if !known.contains(&input.name.as_str()) {
                return Err(LoadError::shape(
                    stage,
                    format!("unsupported input {input}"),
                ));
            }
        }

        let required = |name: &str| {
            spec.input(name)
                .cloned()
                .ok_or_else(|| LoadError::shape(stage, format!("missing required input {name}")))
        };
        let embeddings = required(EMBEDDINGS_INPUT)?;
        let point_coords = required(POINT_COORDS_INPUT)?;
        let point_labels = required(POINT_LABELS_INPUT)?;
        expect_tensor(stage, &embeddings, 4, &[DType::F32])?;
        expect_tensor(stage, &point_coords, 3, PROMPT_DTYPES)?;
        expect_tensor(stage, &point_labels, 2, PROMPT_DTYPES)?;

        let optional = |name: &str, rank: usize| -> Result<Option<TensorSpec>, LoadError> {
            spec.input(name)
                .map(|input| expect_tensor(stage, input, rank, PROMPT_DTYPES).map(|_| input.clone()))
                .transpose()
        };
        let mask_input = optional(MASK_INPUT, 4)?;
        let has_mask_input = optional(HAS_MASK_INPUT, 1)?;
        let orig_im_size = optional(ORIG_SIZE_INPUT, 1)?;
        for (input, len) in [(&has_mask_input, 1), (&orig_im_size, 2)] {
            if let Some(input) = input {
                expect_static_dims(stage, input, &[len])?;
            }
        }

        let masks = spec
            .output(MASKS_OUTPUT)
            .ok_or_else(|| LoadError::shape(stage, format!("missing output {MASKS_OUTPUT}")))?;
        expect_tensor(stage, masks, 4, &[DType::F32])?;

        let scores = SCORE_OUTPUTS
            .iter()
            .find_map(|name| spec.output(name))
            .ok_or_else(|| {
                LoadError::shape(
                    stage,
                    format!("missing quality score output (one of {SCORE_OUTPUTS:?})"),
                )
            })?;

        Ok(Self {
            spec: spec.clone(),
            embeddings,
            point_coords,
            point_labels,
            mask_input,
            has_mask_input,
            orig_im_size,
            masks: masks.name.clone(),
            scores: scores.name.clone(),
        })
    }

    /// Shape of the all-zero mask prior; static dims declared by the model win.
    pub fn mask_prior_shape(&self) -> Option<Shape> {
        self.mask_input.as_ref().map(|spec| {
            let defaults = [1, 1, MASK_PRIOR_SIDE, MASK_PRIOR_SIDE];
            let dims = (0..4)
                .map(|axis| spec.dim(axis).unwrap_or(defaults[axis]))
                .collect::<Vec<_>>();
            Shape::from_slice(&dims)
        })
    }
}

fn expect_tensor(
    stage: Stage,
    spec: &TensorSpec,
    rank: usize,
    dtypes: &[DType],
) -> Result<(), LoadError> {
    if spec.rank != rank {
        return Err(LoadError::shape(
            stage,
            format!("{spec} must have rank {rank}"),
        ));
    }
    if !dtypes.contains(&spec.dtype) {
        return Err(LoadError::shape(
            stage,
            format!("{spec} has unsupported element type {}", spec.dtype),
        ));
    }
    Ok(())
}

/// Rejects a declared static dim that differs from the one the session feeds.
fn expect_static_dims(stage: Stage, spec: &TensorSpec, dims: &[usize]) -> Result<(), LoadError> {
    for (axis, want) in dims.iter().enumerate() {
        if let Some(declared) = spec.dim(axis) {
            if declared != *want {
                return Err(LoadError::shape(
                    stage,
                    format!("{spec} must have length {want} on axis {axis}"),
                ));
            }
        }
    }
    Ok(())
}

fn dims_compatible(produced: &[Option<usize>], accepted: &[Option<usize>]) -> bool {
    produced.len() == accepted.len()
        && produced
            .iter()
            .zip(accepted)
            .all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
}
