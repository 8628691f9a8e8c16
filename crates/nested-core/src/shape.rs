use smallvec::SmallVec;
use std::fmt;

use crate::error::NestedCoreError;
use crate::Result;

pub type Strides = SmallVec<[usize; 4]>;

/// Tensor shape with stack-allocated storage for ≤4 dimensions.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    pub fn scalar() -> Self {
        Self {
            dims: SmallVec::new(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn contiguous_strides(&self) -> Strides {
        let ndim = self.dims.len();
        if ndim == 0 {
            return SmallVec::new();
        }
        let mut strides = SmallVec::from_elem(0usize, ndim);
        strides[ndim - 1] = 1;
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Resolve a reshape target that may contain a single `-1`.
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let numel = self.numel();
        let mut inferred_idx = None;
        let mut known_product: usize = 1;

        for (i, &d) in target.iter().enumerate() {
            if d == -1 {
                if inferred_idx.is_some() {
                    return None;
                }
                inferred_idx = Some(i);
            } else if d < 0 {
                return None;
            } else {
                known_product = known_product.checked_mul(d as usize)?;
            }
        }

        let mut result: SmallVec<[usize; 4]> = target
            .iter()
            .map(|&d| if d == -1 { 0 } else { d as usize })
            .collect();

        if let Some(idx) = inferred_idx {
            if known_product == 0 || numel % known_product != 0 {
                return None;
            }
            result[idx] = numel / known_product;
        }

        let result_shape = Shape { dims: result };
        if result_shape.numel() != numel {
            return None;
        }
        Some(result_shape)
    }

    /// Numpy-style broadcast of two shapes, aligned from the trailing dim.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape> {
        let n = self.ndim().max(other.ndim());
        let mut dims: SmallVec<[usize; 4]> = SmallVec::from_elem(0, n);
        for i in 0..n {
            let a = axis_from_end(self.dims(), n, i);
            let b = axis_from_end(other.dims(), n, i);
            dims[i] = match (a, b) {
                (x, y) if x == y => x,
                (1, y) => y,
                (x, 1) => x,
                _ => {
                    return Err(NestedCoreError::BroadcastError {
                        a: self.dims.to_vec(),
                        b: other.dims.to_vec(),
                    })
                }
            };
        }
        Ok(Shape { dims })
    }
}

fn axis_from_end(dims: &[usize], n: usize, i: usize) -> usize {
    let pad = n - dims.len();
    if i < pad {
        1
    } else {
        dims[i - pad]
    }
}

/// Wrap a possibly negative dim into `0..ndim`.
///
/// Scalars accept `0` and `-1`, matching how reductions treat them.
pub fn wrap_dim(dim: isize, ndim: usize) -> Result<usize> {
    let bound = ndim.max(1) as isize;
    let wrapped = if dim < 0 { dim + bound } else { dim };
    if wrapped < 0 || wrapped >= bound {
        return Err(NestedCoreError::InvalidAxis { dim, ndim });
    }
    Ok(wrapped as usize)
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape {
            dims: SmallVec::from_vec(dims),
        }
    }
}

macro_rules! impl_shape_from_array {
    ($($n:expr),*) => {
        $(
            impl From<[usize; $n]> for Shape {
                fn from(dims: [usize; $n]) -> Self {
                    Shape::new(&dims)
                }
            }
        )*
    };
}

impl_shape_from_array!(0, 1, 2, 3, 4, 5, 6);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_strides() {
        let s = Shape::new(&[2, 3, 4]);
        assert_eq!(s.contiguous_strides().as_slice(), &[12, 4, 1]);
        assert!(Shape::scalar().contiguous_strides().is_empty());
        assert_eq!(Shape::scalar().numel(), 1);
    }

    #[test]
    fn test_resolve_reshape() {
        let s = Shape::new(&[4, 6]);
        assert_eq!(s.resolve_reshape(&[-1, 3]).unwrap().dims(), &[8, 3]);
        assert!(s.resolve_reshape(&[-1, -1]).is_none());
        assert!(s.resolve_reshape(&[5, -1]).is_none());
        let empty = Shape::new(&[0, 3]);
        assert_eq!(empty.resolve_reshape(&[3, 0]).unwrap().dims(), &[3, 0]);
    }

    #[test]
    fn test_broadcast() {
        let a = Shape::new(&[3, 1, 5]);
        let b = Shape::new(&[4, 5]);
        assert_eq!(a.broadcast(&b).unwrap().dims(), &[3, 4, 5]);
        assert!(Shape::new(&[2, 3]).broadcast(&Shape::new(&[4])).is_err());
    }

    #[test]
    fn test_wrap_dim() {
        assert_eq!(wrap_dim(-1, 3).unwrap(), 2);
        assert_eq!(wrap_dim(0, 0).unwrap(), 0);
        assert!(wrap_dim(3, 3).is_err());
        assert!(wrap_dim(-4, 3).is_err());
    }
}
