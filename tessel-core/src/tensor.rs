//! Typed, shaped tensors with an explicit host/device storage split.
//!
//! Host tensors own their elements and are reclaimed on drop. Device tensors
//! hold an opaque [`DeviceBuffer`] that must be handed back with
//! [`Tensor::release`] before the last owner lets go of it.

use std::fmt;

use half::f16;
use tracing::warn;

use crate::{DType, Result, TesselError};

/// An allocation owned by an execution engine outside host memory.
pub trait DeviceBuffer: Send + Sync + fmt::Debug {
    /// Stable identity of the allocation, unique per engine.
    fn id(&self) -> u64;

    /// Number of elements stored in the allocation.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free the allocation. Called at most once per buffer by [`Tensor`].
    fn release(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    I64(Vec<i64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::I64 => TensorData::I64(Vec::new()),
            DType::F16 => TensorData::F16(Vec::new()),
            DType::F32 => TensorData::F32(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::I64(_) => DType::I64,
            TensorData::F16(_) => DType::F16,
            TensorData::F32(_) => DType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::I64(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Host,
    Device,
}

#[derive(Debug)]
enum Storage {
    Host(TensorData),
    Device {
        dtype: DType,
        /// `None` once released.
        buffer: Option<Box<dyn DeviceBuffer>>,
    },
}

/// A tensor is never `Clone`: moving it moves the release obligation with it.
#[derive(Debug)]
pub struct Tensor {
    shape: Vec<usize>,
    storage: Storage,
}

impl Tensor {
    /// Build a host tensor, checking the element count against `shape`.
    pub fn new(data: TensorData, shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(TesselError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            storage: Storage::Host(data),
        })
    }

    pub fn from_i64(data: Vec<i64>, shape: &[usize]) -> Result<Self> {
        Self::new(TensorData::I64(data), shape)
    }

    pub fn from_f16(data: Vec<f16>, shape: &[usize]) -> Result<Self> {
        Self::new(TensorData::F16(data), shape)
    }

    pub fn from_f32(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        Self::new(TensorData::F32(data), shape)
    }

    /// Zero-element host tensor, e.g. a `[1, heads, 0, head_dim]` placeholder.
    pub fn empty(dtype: DType, shape: &[usize]) -> Result<Self> {
        Self::new(TensorData::empty(dtype), shape)
    }

    /// Wrap a device allocation. The buffer's element count must match `shape`.
    pub fn on_device(dtype: DType, shape: &[usize], buffer: Box<dyn DeviceBuffer>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if buffer.len() != numel {
            return Err(TesselError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![buffer.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            storage: Storage::Device {
                dtype,
                buffer: Some(buffer),
            },
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn size_bytes(&self) -> usize {
        self.numel() * self.dtype().size_in_bytes()
    }

    pub fn dtype(&self) -> DType {
        match &self.storage {
            Storage::Host(data) => data.dtype(),
            Storage::Device { dtype, .. } => *dtype,
        }
    }

    pub fn location(&self) -> Location {
        match self.storage {
            Storage::Host(_) => Location::Host,
            Storage::Device { .. } => Location::Device,
        }
    }

    /// Identity of the backing device allocation, if any is still held.
    pub fn device_id(&self) -> Option<u64> {
        match &self.storage {
            Storage::Device {
                buffer: Some(buf), ..
            } => Some(buf.id()),
            _ => None,
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self.storage, Storage::Device { buffer: None, .. })
    }

    /// Sequence dimension of a `[batch, heads, seq_len, head_dim]` tensor.
    pub fn seq_len(&self) -> Result<usize> {
        if self.shape.len() != 4 {
            return Err(TesselError::InvalidArgument(format!(
                "expected rank-4 key/value tensor, got shape {:?}",
                self.shape
            )));
        }
        Ok(self.shape[2])
    }

    /// Host-side elements. Device tensors have no host view.
    pub fn data(&self) -> Result<&TensorData> {
        match &self.storage {
            Storage::Host(data) => Ok(data),
            Storage::Device { .. } => Err(TesselError::InvalidArgument(
                "device tensor has no host data".into(),
            )),
        }
    }

    pub fn as_i64(&self) -> Result<&[i64]> {
        match self.data()? {
            TensorData::I64(v) => Ok(v),
            other => Err(dtype_error(DType::I64, other.dtype())),
        }
    }

    pub fn as_f16(&self) -> Result<&[f16]> {
        match self.data()? {
            TensorData::F16(v) => Ok(v),
            other => Err(dtype_error(DType::F16, other.dtype())),
        }
    }

    pub fn as_f32(&self) -> Result<&[f32]> {
        match self.data()? {
            TensorData::F32(v) => Ok(v),
            other => Err(dtype_error(DType::F32, other.dtype())),
        }
    }

    /// Copy `len` floating-point elements starting at `start`, widened to f32.
    pub fn f32_range(&self, start: usize, len: usize) -> Result<Vec<f32>> {
        let end = start + len;
        if end > self.numel() {
            return Err(TesselError::InvalidArgument(format!(
                "range {start}..{end} out of bounds for {} elements",
                self.numel()
            )));
        }
        match self.data()? {
            TensorData::F32(v) => Ok(v[start..end].to_vec()),
            TensorData::F16(v) => Ok(v[start..end].iter().map(|x| x.to_f32()).collect()),
            TensorData::I64(_) => Err(TesselError::InvalidArgument(
                "expected floating-point tensor, got I64".into(),
            )),
        }
    }

    /// Hand a device allocation back to its engine.
    ///
    /// Safe to call repeatedly: only the first call on a device tensor reaches
    /// the buffer, later calls and calls on host tensors are no-ops.
    pub fn release(&mut self) -> Result<()> {
        match &mut self.storage {
            Storage::Host(_) => Ok(()),
            Storage::Device { buffer, .. } => match buffer.take() {
                Some(buf) => buf.release(),
                None => Ok(()),
            },
        }
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if let Some(id) = self.device_id() {
            warn!(buffer_id = id, shape = ?self.shape, "device tensor dropped without release");
            if let Err(e) = self.release() {
                warn!(error = %e, "releasing dropped device tensor failed");
            }
        }
    }
}

fn dtype_error(expected: DType, got: DType) -> TesselError {
    TesselError::InvalidArgument(format!("expected {expected:?} tensor, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Debug)]
    struct CountingBuffer {
        len: usize,
        releases: Arc<AtomicUsize>,
    }

    impl DeviceBuffer for CountingBuffer {
        fn id(&self) -> u64 {
            7
        }
        fn len(&self) -> usize {
            self.len
        }
        fn release(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = Tensor::from_f32(vec![1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(err, TesselError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_empty_placeholder() {
        let t = Tensor::empty(DType::F16, &[1, 4, 0, 8]).unwrap();
        assert_eq!(t.numel(), 0);
        assert_eq!(t.seq_len().unwrap(), 0);
        assert_eq!(t.location(), Location::Host);
        assert!(Tensor::empty(DType::F16, &[1, 4, 1, 8]).is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let releases = Arc::new(AtomicUsize::new(0));
        let buf = CountingBuffer {
            len: 6,
            releases: releases.clone(),
        };
        let mut t = Tensor::on_device(DType::F16, &[1, 1, 2, 3], Box::new(buf)).unwrap();
        assert_eq!(t.device_id(), Some(7));
        t.release().unwrap();
        t.release().unwrap();
        assert!(t.is_released());
        drop(t);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases_outstanding_buffer() {
        let releases = Arc::new(AtomicUsize::new(0));
        let buf = CountingBuffer {
            len: 0,
            releases: releases.clone(),
        };
        let t = Tensor::on_device(DType::F16, &[1, 1, 0, 3], Box::new(buf)).unwrap();
        drop(t);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_f16_range_widens() {
        let data = vec![f16::from_f32(0.5), f16::from_f32(-2.0), f16::from_f32(4.0)];
        let t = Tensor::from_f16(data, &[1, 1, 3]).unwrap();
        assert_eq!(t.f32_range(1, 2).unwrap(), vec![-2.0, 4.0]);
        assert!(t.f32_range(2, 2).is_err());
    }
}
