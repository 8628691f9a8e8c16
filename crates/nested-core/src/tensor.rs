use std::fmt;

use rand::Rng;
use smallvec::SmallVec;

use crate::device::Device;
use crate::dtype::DType;
use crate::error::NestedCoreError;
use crate::shape::{wrap_dim, Shape, Strides};
use crate::storage::{Buffer, Storage};
use crate::Result;

/// A strided view over shared storage; the dense building block every
/// nested tensor is made of.
///
/// Views (reshape, transpose, narrow, select, squeeze) share storage. Writes
/// go through copy-on-write, so mutating a view never changes a tensor that
/// merely shares its allocation.
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    strides: Strides,
    offset: usize,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a tensor from f32 data with the given shape.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self::from_storage(Storage::from_f32(data), shape)
    }

    /// Create a tensor from f64 data with the given shape.
    pub fn from_f64(data: &[f64], shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(s.numel(), data.len());
        Self::from_storage(Storage::from_f64(data), shape)
    }

    /// Take ownership of `data`, checking it fills `shape` exactly.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != data.len() {
            return Err(NestedCoreError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self::from_storage(Storage::from_f32_vec(data), shape))
    }

    /// Wrap a typed buffer, checking it fills `shape` exactly.
    pub fn from_buffer(buffer: Buffer, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != buffer.len() {
            return Err(NestedCoreError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![buffer.len()],
            });
        }
        Ok(Self::from_storage(Storage::new(buffer), shape))
    }

    /// Create a tensor of zeros with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let numel = Shape::new(shape).numel();
        Self::from_storage(Storage::zeros(dtype, numel), shape)
    }

    /// Create a tensor of ones (f32).
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create an f32 tensor filled with `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let numel = Shape::new(shape).numel();
        Self::from_storage(Storage::from_f32_vec(vec![value; numel]), shape)
    }

    /// Create a tensor with random values from N(0,1).
    pub fn randn(shape: &[usize]) -> Self {
        Self::randn_with(shape, &mut rand::thread_rng())
    }

    /// N(0,1) samples drawn from the given generator (Box-Muller).
    pub fn randn_with<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let numel = Shape::new(shape).numel();
        let data: Vec<f32> = (0..numel)
            .map(|_| {
                let u1: f32 = rng.gen_range(1e-7f32..1.0f32);
                let u2: f32 = rng.gen_range(0.0f32..std::f32::consts::TAU);
                (-2.0f32 * u1.ln()).sqrt() * u2.cos()
            })
            .collect();
        Self::from_storage(Storage::from_f32_vec(data), shape)
    }

    /// Create a tensor with values uniformly distributed in [0, 1).
    pub fn rand(shape: &[usize]) -> Self {
        Self::rand_uniform(shape, 0.0, 1.0)
    }

    /// U[0,1) samples drawn from the given generator.
    pub fn rand_with<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let numel = Shape::new(shape).numel();
        let data: Vec<f32> = (0..numel).map(|_| rng.gen::<f32>()).collect();
        Self::from_storage(Storage::from_f32_vec(data), shape)
    }

    /// Create a tensor with random values uniformly distributed in [low, high).
    pub fn rand_uniform(shape: &[usize], low: f32, high: f32) -> Self {
        let numel = Shape::new(shape).numel();
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(low..high)).collect();
        Self::from_storage(Storage::from_f32_vec(data), shape)
    }

    /// Create a 1-D tensor with values from `start` to `end` (exclusive).
    pub fn arange(start: f32, end: f32, step: f32) -> Result<Self> {
        if step == 0.0 {
            return Err(NestedCoreError::InvalidArgument(
                "arange: step must be non-zero".into(),
            ));
        }
        let mut data = Vec::new();
        let mut v = start;
        if step > 0.0 {
            while v < end {
                data.push(v);
                v += step;
            }
        } else {
            while v > end {
                data.push(v);
                v += step;
            }
        }
        let len = data.len();
        Ok(Self::from_storage(Storage::from_f32_vec(data), &[len]))
    }

    /// Create a scalar tensor from a single f32 value.
    pub fn scalar(value: f32) -> Self {
        Self::from_storage(Storage::from_f32(&[value]), &[])
    }

    /// Create a tensor from pre-built Storage and shape.
    pub fn from_storage(storage: Storage, shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        let strides = s.contiguous_strides();
        Self {
            storage,
            shape: s,
            strides,
            offset: 0,
        }
    }

    /// A view into `storage` with explicit geometry. Bounds are checked
    /// against the storage length.
    pub fn from_parts(
        storage: Storage,
        shape: Shape,
        strides: Strides,
        offset: usize,
    ) -> Result<Self> {
        if strides.len() != shape.ndim() {
            return Err(NestedCoreError::StorageError(format!(
                "{} strides for a {}-d shape",
                strides.len(),
                shape.ndim()
            )));
        }
        if shape.numel() > 0 {
            let last: usize = shape
                .dims()
                .iter()
                .zip(strides.iter())
                .map(|(&d, &s)| (d - 1) * s)
                .sum::<usize>()
                + offset;
            if last >= storage.numel() {
                return Err(NestedCoreError::StorageError(format!(
                    "view {} at offset {} exceeds storage of {} elements",
                    shape,
                    offset,
                    storage.numel()
                )));
            }
        }
        Ok(Self {
            storage,
            shape,
            strides,
            offset,
        })
    }

    /// Get a reference to the underlying storage.
    pub fn storage_ref(&self) -> &Storage {
        &self.storage
    }

    // =========================================================================
    // Properties
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Size along `dim`, accepting negative indices.
    pub fn size(&self, dim: isize) -> Result<usize> {
        let d = wrap_dim(dim, self.ndim())?;
        Ok(self.shape.dim(d).unwrap_or(1))
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.storage.device()
    }

    pub fn element_size(&self) -> usize {
        self.dtype().element_size()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Whether this tensor is laid out row-major. A non-zero offset into a
    /// larger storage still counts as contiguous.
    pub fn is_contiguous(&self) -> bool {
        if self.numel() <= 1 {
            return true;
        }
        let expected = self.shape.contiguous_strides();
        self.shape
            .dims()
            .iter()
            .zip(self.strides.iter().zip(expected.iter()))
            .all(|(&d, (&s, &e))| d == 1 || s == e)
    }

    pub fn is_pinned(&self) -> bool {
        self.storage.is_pinned()
    }

    pub fn is_cpu(&self) -> bool {
        true
    }

    pub fn is_cuda(&self) -> bool {
        false
    }

    pub(crate) fn require_f32(&self) -> Result<()> {
        if self.dtype() != DType::F32 {
            return Err(NestedCoreError::UnsupportedDType(self.dtype()));
        }
        Ok(())
    }

    // =========================================================================
    // Data access
    // =========================================================================

    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        if !self.is_contiguous() {
            return None;
        }
        let data = self.storage.as_f32_slice()?;
        data.get(self.offset..self.offset + self.numel())
    }

    pub fn as_f32_slice_mut(&mut self) -> Option<&mut [f32]> {
        if !self.is_contiguous() {
            return None;
        }
        let range = self.offset..self.offset + self.numel();
        self.storage.as_f32_slice_mut()?.get_mut(range)
    }

    pub fn get_f32(&self, flat_index: usize) -> Option<f32> {
        let slice = self.storage.as_f32_slice()?;
        let physical = self.flat_to_physical(flat_index)?;
        slice.get(physical).copied()
    }

    /// The single value of a one-element tensor, widened from any dtype.
    pub fn item(&self) -> Result<f32> {
        if self.numel() != 1 {
            return Err(NestedCoreError::ShapeMismatch {
                expected: vec![1],
                got: self.dims().to_vec(),
            });
        }
        self.storage
            .buffer()
            .get_f64(self.offset)
            .map(|v| v as f32)
            .ok_or_else(|| NestedCoreError::StorageError("item: offset out of range".into()))
    }

    /// Copy the elements out in logical (row-major) order.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        self.require_f32()?;
        if let Some(slice) = self.as_f32_slice() {
            return Ok(slice.to_vec());
        }
        let data = self
            .storage
            .as_f32_slice()
            .ok_or(NestedCoreError::UnsupportedDType(self.dtype()))?;
        Ok(self.physical_indices().into_iter().map(|i| data[i]).collect())
    }

    fn flat_to_physical(&self, flat_index: usize) -> Option<usize> {
        if self.shape.is_scalar() {
            return if flat_index == 0 {
                Some(self.offset)
            } else {
                None
            };
        }
        if flat_index >= self.numel() {
            return None;
        }
        let mut remaining = flat_index;
        let mut physical = self.offset;
        let contiguous_strides = self.shape.contiguous_strides();
        for (i, &cs) in contiguous_strides.iter().enumerate() {
            let idx = remaining / cs;
            remaining %= cs;
            physical += idx * self.strides[i];
        }
        Some(physical)
    }

    /// Storage index of every element, in logical order.
    pub(crate) fn physical_indices(&self) -> Vec<usize> {
        let numel = self.numel();
        let mut out = Vec::with_capacity(numel);
        if numel == 0 {
            return out;
        }
        let ndim = self.ndim();
        let dims = self.shape.dims();
        let mut counter = vec![0usize; ndim];
        let mut physical = self.offset;
        for _ in 0..numel {
            out.push(physical);
            for axis in (0..ndim).rev() {
                counter[axis] += 1;
                physical += self.strides[axis];
                if counter[axis] < dims[axis] {
                    break;
                }
                physical -= self.strides[axis] * dims[axis];
                counter[axis] = 0;
            }
        }
        out
    }

    /// Apply `f` to every element in place.
    pub fn map_inplace(&mut self, f: impl Fn(f32) -> f32) -> Result<()> {
        self.require_f32()?;
        if let Some(slice) = self.as_f32_slice_mut() {
            slice.iter_mut().for_each(|v| *v = f(*v));
            return Ok(());
        }
        let indices = self.physical_indices();
        let data = self
            .storage
            .as_f32_slice_mut()
            .ok_or(NestedCoreError::UnsupportedDType(DType::F32))?;
        for i in indices {
            data[i] = f(data[i]);
        }
        Ok(())
    }

    /// Overwrite the elements with `values`, given in logical order.
    pub fn write_f32(&mut self, values: &[f32]) -> Result<()> {
        self.require_f32()?;
        if values.len() != self.numel() {
            return Err(NestedCoreError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: vec![values.len()],
            });
        }
        if let Some(slice) = self.as_f32_slice_mut() {
            slice.copy_from_slice(values);
            return Ok(());
        }
        let indices = self.physical_indices();
        let data = self
            .storage
            .as_f32_slice_mut()
            .ok_or(NestedCoreError::UnsupportedDType(DType::F32))?;
        for (i, v) in indices.into_iter().zip(values) {
            data[i] = *v;
        }
        Ok(())
    }

    /// Copy `src` into this tensor; shapes must match, dtypes are cast.
    pub fn copy_(&mut self, src: &Tensor) -> Result<()> {
        if src.dims() != self.dims() {
            return Err(NestedCoreError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: src.dims().to_vec(),
            });
        }
        let values = src.to_dtype(DType::F32).to_f32_vec()?;
        self.write_f32(&values)
    }

    // =========================================================================
    // Shape operations (zero-copy views where possible)
    // =========================================================================

    pub fn reshape(&self, new_shape: &[isize]) -> Result<Tensor> {
        let resolved = self.shape.resolve_reshape(new_shape).ok_or_else(|| {
            NestedCoreError::InvalidReshape {
                numel: self.numel(),
                shape: new_shape.to_vec(),
            }
        })?;
        let base = if self.is_contiguous() {
            self.clone()
        } else {
            self.contiguous()
        };
        let strides = resolved.contiguous_strides();
        Ok(Tensor {
            storage: base.storage,
            shape: resolved,
            strides,
            offset: base.offset,
        })
    }

    /// Swap two dimensions.
    pub fn transpose(&self, dim0: isize, dim1: isize) -> Result<Tensor> {
        let ndim = self.ndim();
        if ndim == 0 {
            wrap_dim(dim0, 0)?;
            wrap_dim(dim1, 0)?;
            return Ok(self.clone());
        }
        let d0 = wrap_dim(dim0, ndim)?;
        let d1 = wrap_dim(dim1, ndim)?;
        let mut dims: Vec<usize> = self.dims().to_vec();
        dims.swap(d0, d1);
        let mut strides = self.strides.clone();
        strides.swap(d0, d1);
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: Shape::from(dims),
            strides,
            offset: self.offset,
        })
    }

    /// Transpose of the last two dims.
    pub fn t(&self) -> Result<Tensor> {
        if self.ndim() < 2 {
            return Err(NestedCoreError::InvalidAxis {
                dim: 1,
                ndim: self.ndim(),
            });
        }
        self.transpose(-2, -1)
    }

    pub fn unsqueeze(&self, dim: isize) -> Result<Tensor> {
        let ndim = self.ndim();
        let d = wrap_dim(dim, ndim + 1)?;
        let mut dims: Vec<usize> = self.dims().to_vec();
        let mut strides = self.strides.clone();
        let stride = if d < ndim {
            self.strides[d] * dims[d]
        } else {
            1
        };
        dims.insert(d, 1);
        strides.insert(d, stride);
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: Shape::from(dims),
            strides,
            offset: self.offset,
        })
    }

    /// Drop size-1 dims: all of them, or only `dim` when given. Squeezing a
    /// dim whose size is not 1 is a no-op.
    pub fn squeeze(&self, dim: Option<isize>) -> Result<Tensor> {
        let keep: Vec<bool> = match dim {
            None => self.dims().iter().map(|&d| d != 1).collect(),
            Some(dim) => {
                if self.ndim() == 0 {
                    wrap_dim(dim, 0)?;
                    return Ok(self.clone());
                }
                let d = wrap_dim(dim, self.ndim())?;
                self.dims()
                    .iter()
                    .enumerate()
                    .map(|(i, &size)| i != d || size != 1)
                    .collect()
            }
        };
        let mut dims = Vec::new();
        let mut strides: Strides = SmallVec::new();
        for (i, k) in keep.iter().enumerate() {
            if *k {
                dims.push(self.dims()[i]);
                strides.push(self.strides[i]);
            }
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: Shape::from(dims),
            strides,
            offset: self.offset,
        })
    }

    /// View of `len` entries along `dim` starting at `start`.
    pub fn narrow(&self, dim: isize, start: usize, len: usize) -> Result<Tensor> {
        let d = wrap_dim(dim, self.ndim())?;
        let size = self.dims()[d];
        if start + len > size {
            return Err(NestedCoreError::IndexOutOfBounds {
                index: start + len,
                axis: d,
                size,
            });
        }
        let mut dims: Vec<usize> = self.dims().to_vec();
        dims[d] = len;
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: Shape::from(dims),
            strides: self.strides.clone(),
            offset: self.offset + start * self.strides[d],
        })
    }

    /// View of entry `index` along `dim`, with that dim removed.
    pub fn select(&self, dim: isize, index: usize) -> Result<Tensor> {
        let d = wrap_dim(dim, self.ndim())?;
        if self.ndim() == 0 {
            return Err(NestedCoreError::InvalidAxis { dim, ndim: 0 });
        }
        let size = self.dims()[d];
        if index >= size {
            return Err(NestedCoreError::IndexOutOfBounds {
                index,
                axis: d,
                size,
            });
        }
        let mut dims: Vec<usize> = self.dims().to_vec();
        let mut strides = self.strides.clone();
        let offset = self.offset + index * strides[d];
        dims.remove(d);
        strides.remove(d);
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: Shape::from(dims),
            strides,
            offset,
        })
    }

    /// Merge dims `start..=end` into one.
    pub fn flatten(&self, start: isize, end: isize) -> Result<Tensor> {
        if self.ndim() == 0 {
            return self.reshape(&[1]);
        }
        let s = wrap_dim(start, self.ndim())?;
        let e = wrap_dim(end, self.ndim())?;
        if s > e {
            return Err(NestedCoreError::InvalidArgument(format!(
                "flatten: start dim {s} must not come after end dim {e}"
            )));
        }
        let dims = self.dims();
        let mut target: Vec<isize> = dims[..s].iter().map(|&d| d as isize).collect();
        target.push(dims[s..=e].iter().product::<usize>() as isize);
        target.extend(dims[e + 1..].iter().map(|&d| d as isize));
        self.reshape(&target)
    }

    /// Return a contiguous copy of this tensor if it isn't already contiguous.
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() && self.offset == 0 && self.storage.numel() == self.numel() {
            return self.clone();
        }
        let buffer = self.storage.buffer().gather(&self.physical_indices());
        Tensor::from_storage(Storage::new(buffer), self.dims())
    }

    // =========================================================================
    // Dtype / device movement
    // =========================================================================

    /// Cast to `dtype`. Returns a shallow clone when the dtype already matches.
    pub fn to_dtype(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype() {
            return self.clone();
        }
        let buffer = self.storage.buffer();
        let values = self
            .physical_indices()
            .into_iter()
            .map(|i| buffer.get_f64(i).unwrap_or(0.0));
        let out = Buffer::from_f64_iter(dtype, values);
        Tensor::from_storage(Storage::new(out), self.dims())
    }

    pub fn to_device(&self, device: Device) -> Result<Tensor> {
        match device {
            Device::Cpu => Ok(self.clone()),
            other => Err(NestedCoreError::DeviceUnavailable(other)),
        }
    }

    /// Copy into freshly allocated storage that shares nothing with `self`.
    pub fn deep_clone(&self) -> Tensor {
        Tensor::from_storage(
            Storage::new(self.storage.buffer().gather(&self.physical_indices())),
            self.dims(),
        )
    }

    /// Copy into freshly allocated, page-locked-flagged storage.
    pub fn pin_memory(&self) -> Tensor {
        let mut out = self.deep_clone();
        out.storage.set_pinned(true);
        out
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={}, contiguous={})",
            self.shape,
            self.dtype(),
            self.device(),
            self.is_contiguous(),
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f32_vec() {
            Ok(data) if data.len() <= 20 => {
                write!(f, "tensor({:?}, shape={})", data, self.shape)
            }
            Ok(data) => write!(
                f,
                "tensor([{:.4}, {:.4}, ..., {:.4}], shape={})",
                data[0],
                data[1],
                data[data.len() - 1],
                self.shape
            ),
            Err(_) => write!(f, "tensor(shape={}, dtype={})", self.shape, self.dtype()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn iota(shape: &[usize]) -> Tensor {
        let n: usize = shape.iter().product();
        Tensor::from_f32(&(0..n).map(|i| i as f32).collect::<Vec<_>>(), shape)
    }

    #[test]
    fn test_transpose_view_order() {
        let t = iota(&[2, 3]);
        let tt = t.transpose(0, 1).unwrap();
        assert_eq!(tt.dims(), &[3, 2]);
        assert!(!tt.is_contiguous());
        assert!(tt.as_f32_slice().is_none());
        assert_eq!(tt.to_f32_vec().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(tt.contiguous().is_contiguous());
    }

    #[test]
    fn test_narrow_select_offsets() {
        let t = iota(&[4, 2]);
        let n = t.narrow(0, 1, 2).unwrap();
        assert!(n.is_contiguous());
        assert_eq!(n.offset(), 2);
        assert_eq!(n.as_f32_slice().unwrap(), &[2.0, 3.0, 4.0, 5.0]);
        let col = t.select(1, 1).unwrap();
        assert_eq!(col.to_f32_vec().unwrap(), vec![1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_squeeze_unsqueeze() {
        let t = iota(&[3, 4]);
        let u = t.unsqueeze(0).unwrap();
        assert_eq!(u.dims(), &[1, 3, 4]);
        assert_eq!(u.squeeze(Some(0)).unwrap().dims(), &[3, 4]);
        assert_eq!(u.squeeze(Some(1)).unwrap().dims(), &[1, 3, 4]);
        assert_eq!(t.unsqueeze(-1).unwrap().dims(), &[3, 4, 1]);
        assert!(t.unsqueeze(3).is_err());
    }

    #[test]
    fn test_reshape_noncontiguous_copies() {
        let t = iota(&[2, 3]).transpose(0, 1).unwrap();
        let r = t.reshape(&[-1]).unwrap();
        assert_eq!(r.to_f32_vec().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert!(iota(&[2, 3]).reshape(&[4, -1]).is_err());
    }

    #[test]
    fn test_flatten() {
        let t = iota(&[2, 3, 4]);
        assert_eq!(t.flatten(1, 2).unwrap().dims(), &[2, 12]);
        assert_eq!(t.flatten(0, -1).unwrap().dims(), &[24]);
        assert!(t.flatten(2, 1).is_err());
    }

    #[test]
    fn test_map_inplace_on_view_is_copy_on_write() {
        let base = iota(&[2, 2]);
        let mut view = base.transpose(0, 1).unwrap();
        view.map_inplace(|v| v * 10.0).unwrap();
        assert_eq!(base.to_f32_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(view.to_f32_vec().unwrap(), vec![0.0, 20.0, 10.0, 30.0]);
    }

    #[test]
    fn test_dtype_round_trip_and_unsupported() {
        let t = Tensor::from_f32(&[1.5, -2.25], &[2]);
        let d = t.to_dtype(DType::F64);
        assert_eq!(d.dtype(), DType::F64);
        assert!(d.to_f32_vec().is_err());
        assert_eq!(d.to_dtype(DType::F32).to_f32_vec().unwrap(), vec![1.5, -2.25]);
        let ints = t.to_dtype(DType::I32);
        assert_eq!(ints.to_dtype(DType::F32).to_f32_vec().unwrap(), vec![1.0, -2.0]);
        assert!(t.to_device(Device::Cuda(0)).is_err());
    }

    #[test]
    fn test_pin_memory_allocates() {
        let t = iota(&[3]);
        let p = t.pin_memory();
        assert!(p.is_pinned());
        assert!(!t.is_pinned());
        assert!(!p.storage_ref().same_allocation(t.storage_ref()));
    }

    #[test]
    fn test_seeded_randn_is_deterministic() {
        let a = Tensor::randn_with(&[8], &mut StdRng::seed_from_u64(7));
        let b = Tensor::randn_with(&[8], &mut StdRng::seed_from_u64(7));
        assert_eq!(a.to_f32_vec().unwrap(), b.to_f32_vec().unwrap());
    }

    #[test]
    fn test_from_parts_bounds() {
        let storage = Storage::from_f32(&[0.0; 6]);
        assert!(Tensor::from_parts(storage.clone(), Shape::new(&[2, 2]), SmallVec::from_slice(&[2, 1]), 2).is_ok());
        assert!(Tensor::from_parts(storage, Shape::new(&[2, 2]), SmallVec::from_slice(&[2, 1]), 3).is_err());
    }
}
