use std::fmt;
use std::str::FromStr;

use anyhow::{bail, ensure, Context, Result};
use bytes::Bytes;
use smallvec::SmallVec;

/// Execution provider a model is placed on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda {
        device_id: u32,
        /// Arena limit in bytes; `None` leaves the provider default.
        memory_limit: Option<usize>,
    },
}

impl Device {
    pub fn with_memory_limit(self, limit: Option<usize>) -> Self {
        match self {
            Device::Cuda { device_id, .. } => Device::Cuda {
                device_id,
                memory_limit: limit,
            },
            Device::Cpu => Device::Cpu,
        }
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        if raw.eq_ignore_ascii_case("cpu") {
            return Ok(Device::Cpu);
        }

        if let Some(rest) = raw.strip_prefix("cuda:") {
            let device_id: u32 = rest.parse().context("invalid cuda device id")?;
            return Ok(Device::Cuda {
                device_id,
                memory_limit: None,
            });
        }

        bail!("unsupported device: {raw} (expected cpu or cuda:N)");
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda { device_id, .. } => write!(f, "cuda:{device_id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn byte_size(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::U8 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I64 => "i64",
            DType::I32 => "i32",
            DType::U8 => "u8",
        };
        f.write_str(name)
    }
}

/// Row-major tensor shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn dims(&self) -> &[usize] {
        &self.0
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    /// Element count. A rank-0 shape holds one element, any zero-sized axis holds none.
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    pub fn strides(&self) -> SmallVec<[usize; 6]> {
        let mut strides: SmallVec<[usize; 6]> = SmallVec::from_elem(1, self.rank());
        for axis in (0..self.rank().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.0[axis + 1];
        }
        strides
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_slice())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DType,
    pub shape: Shape,
}

/// Dense CPU tensor. The storage is reference counted, so clones share one buffer.
#[derive(Clone, Debug)]
pub struct Tensor {
    pub desc: TensorDesc,
    pub storage: Bytes,
}

impl Tensor {
    pub fn from_cpu_bytes(dtype: DType, shape: Shape, bytes: Bytes) -> Result<Self> {
        let expected = shape.numel() * dtype.byte_size();
        ensure!(
            bytes.len() == expected,
            "tensor byte size mismatch for {dtype}{shape}: got {}, expected {expected}",
            bytes.len()
        );
        Ok(Self {
            desc: TensorDesc { dtype, shape },
            storage: bytes,
        })
    }

    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        let byte_len = shape.numel() * dtype.byte_size();
        Self {
            desc: TensorDesc { dtype, shape },
            storage: Bytes::from(vec![0u8; byte_len]),
        }
    }

    pub fn from_f32(shape: Shape, data: &[f32]) -> Result<Self> {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
        Self::from_cpu_bytes(DType::F32, shape, Bytes::from(bytes))
    }

    pub fn from_i64(shape: Shape, data: &[i64]) -> Result<Self> {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
        Self::from_cpu_bytes(DType::I64, shape, Bytes::from(bytes))
    }

    pub fn from_i32(shape: Shape, data: &[i32]) -> Result<Self> {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<_>>();
        Self::from_cpu_bytes(DType::I32, shape, Bytes::from(bytes))
    }

    /// Materialises `data` as `dtype`, truncating towards zero for integer types.
    pub fn from_f32_as(dtype: DType, shape: Shape, data: &[f32]) -> Result<Self> {
        match dtype {
            DType::F32 => Self::from_f32(shape, data),
            DType::I64 => {
                let values = data.iter().map(|v| *v as i64).collect::<Vec<_>>();
                Self::from_i64(shape, &values)
            }
            DType::I32 => {
                let values = data.iter().map(|v| *v as i32).collect::<Vec<_>>();
                Self::from_i32(shape, &values)
            }
            DType::F16 | DType::U8 => bail!("cannot materialise {dtype} tensors from f32 values"),
        }
    }

    pub fn dtype(&self) -> DType {
        self.desc.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.desc.shape
    }

    pub fn byte_len(&self) -> usize {
        self.storage.len()
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.desc.dtype {
            DType::F32 => bytes_to_f32(&self.storage),
            DType::I64 => Ok(bytes_to_i64(&self.storage)?
                .into_iter()
                .map(|v| v as f32)
                .collect()),
            DType::I32 => Ok(bytes_to_i32(&self.storage)?
                .into_iter()
                .map(|v| v as f32)
                .collect()),
            DType::U8 => Ok(self.storage.iter().map(|v| f32::from(*v)).collect()),
            DType::F16 => bail!("f16 tensors are not supported yet"),
        }
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        ensure!(
            self.desc.dtype == DType::I64,
            "expected an i64 tensor, got {}",
            self.desc.dtype
        );
        bytes_to_i64(&self.storage)
    }

    pub fn to_i32_vec(&self) -> Result<Vec<i32>> {
        ensure!(
            self.desc.dtype == DType::I32,
            "expected an i32 tensor, got {}",
            self.desc.dtype
        );
        bytes_to_i32(&self.storage)
    }
}

fn bytes_to_f32(bytes: &Bytes) -> Result<Vec<f32>> {
    ensure!(bytes.len() % 4 == 0, "f32 tensor has invalid byte length");
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn bytes_to_i64(bytes: &Bytes) -> Result<Vec<i64>> {
    ensure!(bytes.len() % 8 == 0, "i64 tensor has invalid byte length");
    Ok(bytes
        .chunks_exact(8)
        .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
        .collect())
}

fn bytes_to_i32(bytes: &Bytes) -> Result<Vec<i32>> {
    ensure!(bytes.len() % 4 == 0, "i32 tensor has invalid byte length");
    Ok(bytes
        .chunks_exact(4)
        .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
