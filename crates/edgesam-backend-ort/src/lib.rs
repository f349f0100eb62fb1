use anyhow::{bail, ensure, Context, Result};
use edgesam_core::{
    Backend, BackendModel, BackendOptions, DType, Device, IOName, ModelArtifact, ModelSpec, Shape,
    Tensor, TensorSpec,
};
use ort::{
    session::{builder::SessionBuilder, Session, SessionInputValue},
    tensor::TensorElementType,
    value::{DynValue, ValueType},
};
use tracing::debug;

pub struct OrtBackend;

impl OrtBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OrtBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct OrtModel {
    spec: ModelSpec,
    session: Session,
}

impl Backend for OrtBackend {
    type Model = OrtModel;

    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn load(&self, artifact: &ModelArtifact, options: &BackendOptions) -> Result<Self::Model> {
        let ModelArtifact::OnnxPath(path) = artifact;
        ensure!(path.is_file(), "model file not found: {}", path.display());

        let mut builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .context("failed to configure ORT session builder")?;

        if options.intra_threads > 0 {
            builder = builder
                .with_intra_threads(options.intra_threads)
                .context("failed to configure ORT intra-op threads")?;
        }

        let builder = configure_session_builder(builder, &options.device)?;

        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model {}", path.display()))?;

        let spec = build_model_spec(&session)?;
        debug!(
            model = %path.display(),
            device = %options.device,
            inputs = spec.inputs.len(),
            outputs = spec.outputs.len(),
            "ORT session ready"
        );

        Ok(OrtModel { spec, session })
    }
}

impl BackendModel for OrtModel {
    fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    fn infer(&mut self, inputs: &[(IOName, &Tensor)], outputs: &[IOName]) -> Result<Vec<Tensor>> {
        let mut ort_inputs = Vec::with_capacity(inputs.len());
        for (name, input) in inputs {
            ensure!(
                self.spec.input(name.as_str()).is_some(),
                "model has no input named {name}"
            );
            let value = tensor_to_ort_value(input)
                .with_context(|| format!("failed to convert input {name}"))?;
            ort_inputs.push((name.0.clone(), SessionInputValue::from(value)));
        }

        let results = self.session.run(ort_inputs)?;

        let mut out_tensors = Vec::with_capacity(outputs.len());
        for wanted in outputs {
            let value = results
                .iter()
                .find(|(name, _)| *name == wanted.as_str())
                .map(|(_, value)| value)
                .with_context(|| format!("model produced no output named {wanted}"))?;
            out_tensors.push(
                ort_value_to_tensor(&value)
                    .with_context(|| format!("failed to read output {wanted}"))?,
            );
        }

        Ok(out_tensors)
    }
}

fn build_model_spec(session: &Session) -> Result<ModelSpec> {
    let inputs = session
        .inputs
        .iter()
        .map(|input| tensor_spec_from_value_type(&input.name, &input.input_type))
        .collect::<Result<Vec<_>>>()?;

    let outputs = session
        .outputs
        .iter()
        .map(|output| tensor_spec_from_value_type(&output.name, &output.output_type))
        .collect::<Result<Vec<_>>>()?;

    Ok(ModelSpec { inputs, outputs })
}

fn configure_session_builder(builder: SessionBuilder, device: &Device) -> Result<SessionBuilder> {
    match device {
        Device::Cpu => Ok(builder),
        Device::Cuda {
            device_id,
            memory_limit,
        } => configure_cuda(builder, *device_id, *memory_limit),
    }
}

fn configure_cuda(
    builder: SessionBuilder,
    device_id: u32,
    memory_limit: Option<usize>,
) -> Result<SessionBuilder> {
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::cuda::CUDAExecutionProvider;
        let mut ep = CUDAExecutionProvider::default().with_device_id(device_id as i32);
        if let Some(limit) = memory_limit {
            ep = ep.with_memory_limit(limit);
        }
        builder
            .with_execution_providers([ep.build()])
            .context("failed to enable ORT CUDA execution provider")
    }
    #[cfg(not(feature = "cuda"))]
    {
        let _ = (builder, device_id, memory_limit);
        bail!("CUDA requested but edgesam-backend-ort was built without the `cuda` feature")
    }
}

fn tensor_spec_from_value_type(name: &str, value_type: &ValueType) -> Result<TensorSpec> {
    let ValueType::Tensor { ty, shape, .. } = value_type else {
        bail!("unsupported non-tensor IO value type for {name}");
    };

    let dtype = ort_tensor_element_to_dtype(*ty)?;
    let dims = shape
        .iter()
        .map(|d| if *d < 0 { None } else { Some(*d as usize) })
        .collect::<Vec<_>>();

    Ok(TensorSpec {
        name: IOName(name.to_string()),
        dtype,
        rank: shape.len(),
        dims,
    })
}

fn ort_tensor_element_to_dtype(ty: TensorElementType) -> Result<DType> {
    match ty {
        TensorElementType::Float32 => Ok(DType::F32),
        TensorElementType::Float16 => Ok(DType::F16),
        TensorElementType::Int64 => Ok(DType::I64),
        TensorElementType::Int32 => Ok(DType::I32),
        TensorElementType::Uint8 => Ok(DType::U8),
        _ => bail!("unsupported tensor element type: {ty}"),
    }
}

fn tensor_to_ort_value(tensor: &Tensor) -> Result<DynValue> {
    let shape: Vec<usize> = tensor.shape().dims().to_vec();

    let value = match tensor.dtype() {
        DType::F32 => {
            let data = tensor.to_f32_vec()?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::I64 => {
            let data = tensor.to_i64_vec()?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::I32 => {
            let data = tensor.to_i32_vec()?;
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::U8 => {
            let data = tensor.storage.to_vec();
            ort::value::Tensor::from_array((shape, data))?.into_dyn()
        }
        DType::F16 => bail!("f16 inputs are not supported yet"),
    };

    Ok(value)
}

fn ort_value_to_tensor(value: &ort::value::ValueRef<'_>) -> Result<Tensor> {
    let ValueType::Tensor { ty, .. } = value.dtype() else {
        bail!("non-tensor outputs are not supported");
    };

    match *ty {
        TensorElementType::Float32 => {
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            Tensor::from_f32(to_shape(shape.iter().copied())?, data)
        }
        TensorElementType::Int64 => {
            let (shape, data) = value.try_extract_tensor::<i64>()?;
            Tensor::from_i64(to_shape(shape.iter().copied())?, data)
        }
        TensorElementType::Int32 => {
            let (shape, data) = value.try_extract_tensor::<i32>()?;
            Tensor::from_i32(to_shape(shape.iter().copied())?, data)
        }
        TensorElementType::Uint8 => {
            let (shape, data) = value.try_extract_tensor::<u8>()?;
            Tensor::from_cpu_bytes(
                DType::U8,
                to_shape(shape.iter().copied())?,
                data.to_vec().into(),
            )
        }
        TensorElementType::Float16 => bail!("f16 outputs are not supported yet"),
        _ => bail!("unsupported output tensor element type: {ty}"),
    }
}

fn to_shape(dims: impl IntoIterator<Item = i64>) -> Result<Shape> {
    let dims = dims
        .into_iter()
        .map(|d| usize::try_from(d).context("negative dimension in output tensor"))
        .collect::<Result<Vec<_>>>()?;
    Ok(Shape::from_slice(&dims))
}
