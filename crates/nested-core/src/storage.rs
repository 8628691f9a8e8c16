use std::sync::Arc;

use half::{bf16, f16};

use crate::{DType, Device, NestedCoreError, Result};

/// Typed element buffer. Kept typed rather than as raw bytes so slices are
/// always correctly aligned, including for empty tensors.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    I8(Vec<i8>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

macro_rules! buffer_dispatch {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            Buffer::F16($v) => $body,
            Buffer::BF16($v) => $body,
            Buffer::F32($v) => $body,
            Buffer::F64($v) => $body,
            Buffer::I8($v) => $body,
            Buffer::U8($v) => $body,
            Buffer::I32($v) => $body,
            Buffer::I64($v) => $body,
        }
    };
}

impl Buffer {
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        match dtype {
            DType::F16 => Buffer::F16(vec![f16::ZERO; numel]),
            DType::BF16 => Buffer::BF16(vec![bf16::ZERO; numel]),
            DType::F32 => Buffer::F32(vec![0.0; numel]),
            DType::F64 => Buffer::F64(vec![0.0; numel]),
            DType::I8 => Buffer::I8(vec![0; numel]),
            DType::U8 => Buffer::U8(vec![0; numel]),
            DType::I32 => Buffer::I32(vec![0; numel]),
            DType::I64 => Buffer::I64(vec![0; numel]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::F16(_) => DType::F16,
            Buffer::BF16(_) => DType::BF16,
            Buffer::F32(_) => DType::F32,
            Buffer::F64(_) => DType::F64,
            Buffer::I8(_) => DType::I8,
            Buffer::U8(_) => DType::U8,
            Buffer::I32(_) => DType::I32,
            Buffer::I64(_) => DType::I64,
        }
    }

    pub fn len(&self) -> usize {
        buffer_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        buffer_dispatch!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// Little-endian byte image of the elements. On little-endian targets
    /// this is a straight copy of `as_bytes`.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        if cfg!(target_endian = "little") {
            return self.as_bytes().to_vec();
        }
        buffer_dispatch!(self, v => v.iter().flat_map(|x| x.to_le_bytes()).collect())
    }

    /// Read one element widened to f64.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        Some(match self {
            Buffer::F16(v) => v.get(index)?.to_f64(),
            Buffer::BF16(v) => v.get(index)?.to_f64(),
            Buffer::F32(v) => *v.get(index)? as f64,
            Buffer::F64(v) => *v.get(index)?,
            Buffer::I8(v) => *v.get(index)? as f64,
            Buffer::U8(v) => *v.get(index)? as f64,
            Buffer::I32(v) => *v.get(index)? as f64,
            Buffer::I64(v) => *v.get(index)? as f64,
        })
    }

    /// Collect the elements at `indices` into a new buffer of the same dtype.
    pub fn gather(&self, indices: &[usize]) -> Buffer {
        match self {
            Buffer::F16(v) => Buffer::F16(indices.iter().map(|&i| v[i]).collect()),
            Buffer::BF16(v) => Buffer::BF16(indices.iter().map(|&i| v[i]).collect()),
            Buffer::F32(v) => Buffer::F32(indices.iter().map(|&i| v[i]).collect()),
            Buffer::F64(v) => Buffer::F64(indices.iter().map(|&i| v[i]).collect()),
            Buffer::I8(v) => Buffer::I8(indices.iter().map(|&i| v[i]).collect()),
            Buffer::U8(v) => Buffer::U8(indices.iter().map(|&i| v[i]).collect()),
            Buffer::I32(v) => Buffer::I32(indices.iter().map(|&i| v[i]).collect()),
            Buffer::I64(v) => Buffer::I64(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Concatenate buffers of one dtype end to end.
    pub fn concat(parts: &[&Buffer], dtype: DType) -> Result<Buffer> {
        if let Some(bad) = parts.iter().find(|p| p.dtype() != dtype) {
            return Err(NestedCoreError::DTypeMismatch {
                expected: dtype,
                got: bad.dtype(),
            });
        }
        let mut out = Buffer::zeros(dtype, 0);
        for part in parts {
            match (&mut out, *part) {
                (Buffer::F16(o), Buffer::F16(v)) => o.extend_from_slice(v),
                (Buffer::BF16(o), Buffer::BF16(v)) => o.extend_from_slice(v),
                (Buffer::F32(o), Buffer::F32(v)) => o.extend_from_slice(v),
                (Buffer::F64(o), Buffer::F64(v)) => o.extend_from_slice(v),
                (Buffer::I8(o), Buffer::I8(v)) => o.extend_from_slice(v),
                (Buffer::U8(o), Buffer::U8(v)) => o.extend_from_slice(v),
                (Buffer::I32(o), Buffer::I32(v)) => o.extend_from_slice(v),
                (Buffer::I64(o), Buffer::I64(v)) => o.extend_from_slice(v),
                _ => unreachable!("dtypes checked above"),
            }
        }
        Ok(out)
    }

    /// Build a buffer of `dtype` from f64 values, saturating integer casts.
    pub fn from_f64_iter(dtype: DType, values: impl Iterator<Item = f64>) -> Self {
        match dtype {
            DType::F16 => Buffer::F16(values.map(f16::from_f64).collect()),
            DType::BF16 => Buffer::BF16(values.map(bf16::from_f64).collect()),
            DType::F32 => Buffer::F32(values.map(|v| v as f32).collect()),
            DType::F64 => Buffer::F64(values.collect()),
            DType::I8 => Buffer::I8(values.map(|v| v as i8).collect()),
            DType::U8 => Buffer::U8(values.map(|v| v as u8).collect()),
            DType::I32 => Buffer::I32(values.map(|v| v as i32).collect()),
            DType::I64 => Buffer::I64(values.map(|v| v as i64).collect()),
        }
    }

    /// Decode little-endian bytes into a typed buffer.
    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        let size = dtype.element_size();
        if bytes.len() % size != 0 {
            return Err(NestedCoreError::StorageError(format!(
                "{} bytes is not a multiple of the {} element size",
                bytes.len(),
                dtype
            )));
        }
        let chunks = bytes.chunks_exact(size);
        Ok(match dtype {
            DType::F16 => Buffer::F16(
                chunks.map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]]))).collect(),
            ),
            DType::BF16 => Buffer::BF16(
                chunks.map(|b| bf16::from_bits(u16::from_le_bytes([b[0], b[1]]))).collect(),
            ),
            DType::F32 => Buffer::F32(
                chunks.map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect(),
            ),
            DType::F64 => Buffer::F64(
                chunks
                    .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect(),
            ),
            DType::I8 => Buffer::I8(chunks.map(|b| b[0] as i8).collect()),
            DType::U8 => Buffer::U8(bytes.to_vec()),
            DType::I32 => Buffer::I32(
                chunks.map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect(),
            ),
            DType::I64 => Buffer::I64(
                chunks
                    .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                    .collect(),
            ),
        })
    }
}

/// Backing storage for tensor data (CPU only).
///
/// Clones share the buffer; mutation goes through `Arc::make_mut`, so a
/// shared buffer is copied on first write.
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<Buffer>,
    pinned: bool,
}

impl Storage {
    pub fn new(buffer: Buffer) -> Self {
        Self {
            data: Arc::new(buffer),
            pinned: false,
        }
    }

    pub fn zeros(dtype: DType, numel: usize) -> Self {
        Self::new(Buffer::zeros(dtype, numel))
    }

    pub fn from_f32(data: &[f32]) -> Self {
        Self::new(Buffer::F32(data.to_vec()))
    }

    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        Self::new(Buffer::F32(data))
    }

    pub fn from_f64(data: &[f64]) -> Self {
        Self::new(Buffer::F64(data.to_vec()))
    }

    pub fn from_i32(data: &[i32]) -> Self {
        Self::new(Buffer::I32(data.to_vec()))
    }

    pub fn buffer(&self) -> &Buffer {
        &self.data
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn device(&self) -> Device {
        Device::Cpu
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn nbytes(&self) -> usize {
        self.dtype().storage_bytes(self.numel())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        match self.data.as_ref() {
            Buffer::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32_slice_mut(&mut self) -> Option<&mut [f32]> {
        match Arc::make_mut(&mut self.data) {
            Buffer::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        match self.data.as_ref() {
            Buffer::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32_slice(&self) -> Option<&[i32]> {
        match self.data.as_ref() {
            Buffer::I32(v) => Some(v),
            _ => None,
        }
    }

    /// Whether two storages point at the same allocation.
    pub fn same_allocation(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub(crate) fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    pub fn is_cpu(&self) -> bool {
        true
    }

    pub fn is_cuda(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_on_write() {
        let a = Storage::from_f32(&[1.0, 2.0]);
        let mut b = a.clone();
        assert!(a.same_allocation(&b));
        b.as_f32_slice_mut().unwrap()[0] = 9.0;
        assert!(!a.same_allocation(&b));
        assert_eq!(a.as_f32_slice().unwrap(), &[1.0, 2.0]);
        assert_eq!(b.as_f32_slice().unwrap(), &[9.0, 2.0]);
    }

    #[test]
    fn test_bytes_round_trip() {
        let s = Storage::from_f32(&[1.5, -2.0]);
        let back = Buffer::from_le_bytes(DType::F32, s.as_bytes()).unwrap();
        assert_eq!(back, Buffer::F32(vec![1.5, -2.0]));
        assert!(Buffer::from_le_bytes(DType::F32, &[0u8; 3]).is_err());
    }

    #[test]
    fn test_le_bytes_for_half_and_ints() {
        let halves = Buffer::F16(vec![half::f16::from_f32(1.0), half::f16::from_f32(-0.5)]);
        assert_eq!(halves.to_le_bytes(), vec![0x00, 0x3c, 0x00, 0xb8]);
        let ints = Buffer::I32(vec![1, -2]);
        assert_eq!(ints.to_le_bytes(), vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(Buffer::from_le_bytes(DType::I32, &ints.to_le_bytes()).unwrap(), ints);
    }

    #[test]
    fn test_empty_buffer_bytes() {
        let s = Storage::zeros(DType::F64, 0);
        assert!(s.as_bytes().is_empty());
        assert_eq!(s.nbytes(), 0);
    }
}
