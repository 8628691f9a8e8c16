use crate::error::NestedCoreError;
use crate::shape::wrap_dim;
use crate::storage::{Buffer, Storage};
use crate::{Result, Tensor};

impl Tensor {
    /// Views of every entry along `dim`.
    pub fn unbind(&self, dim: isize) -> Result<Vec<Tensor>> {
        let d = wrap_dim(dim, self.ndim())?;
        if self.ndim() == 0 {
            return Err(NestedCoreError::InvalidAxis { dim, ndim: 0 });
        }
        (0..self.dims()[d])
            .map(|i| self.select(d as isize, i))
            .collect()
    }

    /// Concatenate along an existing dim. Every input must match in all
    /// other dims and share a dtype.
    pub fn cat(tensors: &[Tensor], dim: isize) -> Result<Tensor> {
        let first = tensors.first().ok_or_else(|| {
            NestedCoreError::InvalidArgument("cat expects a non-empty list of tensors".into())
        })?;
        if first.ndim() == 0 {
            return Err(NestedCoreError::InvalidArgument(
                "zero-dimensional tensors cannot be concatenated".into(),
            ));
        }
        let axis = wrap_dim(dim, first.ndim())?;
        let dtype = first.dtype();
        for t in tensors {
            let same_rest = t.ndim() == first.ndim()
                && t.dims()
                    .iter()
                    .zip(first.dims())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !same_rest {
                return Err(NestedCoreError::ShapeMismatch {
                    expected: first.dims().to_vec(),
                    got: t.dims().to_vec(),
                });
            }
            if t.dtype() != dtype {
                return Err(NestedCoreError::DTypeMismatch {
                    expected: dtype,
                    got: t.dtype(),
                });
            }
        }

        let outer: usize = first.dims()[..axis].iter().product();
        let inner: usize = first.dims()[axis + 1..].iter().product();
        let compact: Vec<Tensor> = tensors.iter().map(|t| t.contiguous()).collect();
        let buffers: Vec<Buffer> = compact
            .iter()
            .map(|t| t.storage_ref().buffer().gather(&t.physical_indices()))
            .collect();
        let mut bases = Vec::with_capacity(buffers.len());
        let mut running = 0;
        for b in &buffers {
            bases.push(running);
            running += b.len();
        }
        let refs: Vec<&Buffer> = buffers.iter().collect();
        let joined = Buffer::concat(&refs, dtype)?;

        let mut order = Vec::with_capacity(running);
        for o in 0..outer {
            for (t, &base) in compact.iter().zip(bases.iter()) {
                let chunk = t.dims()[axis] * inner;
                order.extend(base + o * chunk..base + (o + 1) * chunk);
            }
        }
        let mut dims = first.dims().to_vec();
        dims[axis] = compact.iter().map(|t| t.dims()[axis]).sum();
        Ok(Tensor::from_storage(Storage::new(joined.gather(&order)), &dims))
    }

    /// Join equally shaped tensors along a new dim.
    pub fn stack(tensors: &[Tensor], dim: isize) -> Result<Tensor> {
        let first = tensors.first().ok_or_else(|| {
            NestedCoreError::InvalidArgument("stack expects a non-empty list of tensors".into())
        })?;
        if let Some(bad) = tensors.iter().find(|t| t.dims() != first.dims()) {
            return Err(NestedCoreError::ShapeMismatch {
                expected: first.dims().to_vec(),
                got: bad.dims().to_vec(),
            });
        }
        let axis = wrap_dim(dim, first.ndim() + 1)? as isize;
        let expanded: Vec<Tensor> = tensors
            .iter()
            .map(|t| t.unsqueeze(axis))
            .collect::<Result<_>>()?;
        Tensor::cat(&expanded, axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn test_cat_dim0_and_dim1() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::from_f32(&[5.0, 6.0], &[1, 2]);
        let c = Tensor::cat(&[a.clone(), b], 0).unwrap();
        assert_eq!(c.dims(), &[3, 2]);
        assert_eq!(c.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let d = Tensor::from_f32(&[9.0, 8.0], &[2, 1]);
        let e = Tensor::cat(&[a, d], 1).unwrap();
        assert_eq!(e.dims(), &[2, 3]);
        assert_eq!(e.to_f32_vec().unwrap(), vec![1.0, 2.0, 9.0, 3.0, 4.0, 8.0]);
    }

    #[test]
    fn test_cat_keeps_dtype() {
        let a = Tensor::ones(&[2]).to_dtype(DType::I64);
        let b = Tensor::zeros(&[1], DType::I64);
        let c = Tensor::cat(&[a, b], 0).unwrap();
        assert_eq!(c.dtype(), DType::I64);
        assert_eq!(c.dims(), &[3]);
        let mixed = [Tensor::ones(&[1]), Tensor::zeros(&[1], DType::F64)];
        assert!(Tensor::cat(&mixed, 0).is_err());
    }

    #[test]
    fn test_stack_and_unbind() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[2]);
        let b = Tensor::from_f32(&[3.0, 4.0], &[2]);
        let s = Tensor::stack(&[a, b], 1).unwrap();
        assert_eq!(s.dims(), &[2, 2]);
        assert_eq!(s.to_f32_vec().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
        let parts = s.unbind(0).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].to_f32_vec().unwrap(), vec![2.0, 4.0]);
        assert!(Tensor::stack(&[], 0).is_err());
    }

    #[test]
    fn test_stack_scalars() {
        let s = Tensor::stack(&[Tensor::scalar(1.0), Tensor::scalar(2.0)], 0).unwrap();
        assert_eq!(s.dims(), &[2]);
        assert_eq!(s.to_f32_vec().unwrap(), vec![1.0, 2.0]);
    }
}
