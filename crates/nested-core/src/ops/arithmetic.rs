use crate::error::NestedCoreError;
use crate::shape::Shape;
use crate::{Result, Tensor};

/// Logical index into a tensor of `src_dims` for every element of
/// `out_dims`, with broadcast dims pinned to 0.
pub(crate) fn broadcast_indices(src_dims: &[usize], out_dims: &[usize]) -> Vec<usize> {
    let out_numel: usize = out_dims.iter().product();
    let n = out_dims.len();
    let pad = n - src_dims.len();
    let src_strides = Shape::new(src_dims).contiguous_strides();
    // stride of each output axis inside the source, 0 where broadcast
    let mut strides = vec![0usize; n];
    for i in pad..n {
        if src_dims[i - pad] != 1 {
            strides[i] = src_strides[i - pad];
        }
    }
    let mut out = Vec::with_capacity(out_numel);
    let mut counter = vec![0usize; n];
    let mut idx = 0usize;
    for _ in 0..out_numel {
        out.push(idx);
        for axis in (0..n).rev() {
            counter[axis] += 1;
            idx += strides[axis];
            if counter[axis] < out_dims[axis] {
                break;
            }
            idx -= strides[axis] * out_dims[axis];
            counter[axis] = 0;
        }
    }
    out
}

macro_rules! unary_ops {
    ($($name:ident, $name_:ident => $f:expr;)*) => {
        impl Tensor {
            $(
                pub fn $name(&self) -> Result<Tensor> {
                    self.map($f)
                }

                pub fn $name_(&mut self) -> Result<()> {
                    self.map_inplace($f)
                }
            )*
        }
    };
}

unary_ops! {
    neg, neg_ => |x: f32| -x;
    abs, abs_ => |x: f32| x.abs();
    exp, exp_ => |x: f32| x.exp();
    log, log_ => |x: f32| x.ln();
    sqrt, sqrt_ => |x: f32| x.sqrt();
    sin, sin_ => |x: f32| x.sin();
    cos, cos_ => |x: f32| x.cos();
    tanh, tanh_ => |x: f32| x.tanh();
    sigmoid, sigmoid_ => |x: f32| 1.0 / (1.0 + (-x).exp());
    relu, relu_ => |x: f32| x.max(0.0);
}

macro_rules! binary_ops {
    ($($name:ident, $name_:ident => $f:expr;)*) => {
        impl Tensor {
            $(
                pub fn $name(&self, other: &Tensor) -> Result<Tensor> {
                    self.zip_map(other, $f)
                }

                pub fn $name_(&mut self, other: &Tensor) -> Result<()> {
                    self.zip_map_inplace(other, $f)
                }
            )*
        }
    };
}

binary_ops! {
    add, add_ => |a: f32, b: f32| a + b;
    sub, sub_ => |a: f32, b: f32| a - b;
    mul, mul_ => |a: f32, b: f32| a * b;
    div, div_ => |a: f32, b: f32| a / b;
}

impl Tensor {
    /// Elementwise `f` into a new contiguous tensor.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Result<Tensor> {
        let data: Vec<f32> = self.to_f32_vec()?.into_iter().map(f).collect();
        Tensor::from_vec(data, self.dims())
    }

    /// Elementwise binary op with numpy-style broadcasting.
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
        self.require_f32()?;
        other.require_f32()?;
        if self.dims() == other.dims() {
            let a = self.to_f32_vec()?;
            let b = other.to_f32_vec()?;
            let data = a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect();
            return Tensor::from_vec(data, self.dims());
        }
        let out_shape = self.shape().broadcast(other.shape())?;
        let a = self.to_f32_vec()?;
        let b = other.to_f32_vec()?;
        let ia = broadcast_indices(self.dims(), out_shape.dims());
        let ib = broadcast_indices(other.dims(), out_shape.dims());
        let data = ia
            .iter()
            .zip(ib.iter())
            .map(|(&i, &j)| f(a[i], b[j]))
            .collect();
        Tensor::from_vec(data, out_shape.dims())
    }

    /// In-place binary op. `other` must broadcast to this tensor's shape.
    pub fn zip_map_inplace(&mut self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Result<()> {
        self.require_f32()?;
        other.require_f32()?;
        let out_shape = self.shape().broadcast(other.shape())?;
        if out_shape.dims() != self.dims() {
            return Err(NestedCoreError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: out_shape.dims().to_vec(),
            });
        }
        let b = other.to_f32_vec()?;
        if other.dims() == self.dims() {
            if let Some(slice) = self.as_f32_slice_mut() {
                slice.iter_mut().zip(b.iter()).for_each(|(x, &y)| *x = f(*x, y));
                return Ok(());
            }
        }
        let a = self.to_f32_vec()?;
        let ib = broadcast_indices(other.dims(), self.dims());
        let data: Vec<f32> = a.iter().zip(ib.iter()).map(|(&x, &j)| f(x, b[j])).collect();
        self.write_f32(&data)
    }

    /// `self += alpha * other`.
    pub fn add_scaled_(&mut self, other: &Tensor, alpha: f32) -> Result<()> {
        self.zip_map_inplace(other, |a, b| a + alpha * b)
    }

    pub fn add_scalar(&self, value: f32) -> Result<Tensor> {
        self.map(|x| x + value)
    }

    pub fn mul_scalar(&self, value: f32) -> Result<Tensor> {
        self.map(|x| x * value)
    }
}
