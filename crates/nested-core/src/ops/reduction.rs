use crate::shape::wrap_dim;
use crate::{Result, Tensor};

/// Split `dims` around `axis` into (outer, len, inner) element counts.
pub(crate) fn split_at_axis(dims: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = dims[..axis].iter().product();
    let len = dims[axis];
    let inner = dims[axis + 1..].iter().product();
    (outer, len, inner)
}

impl Tensor {
    /// Sum of all elements as a 0-d tensor. Empty tensors sum to 0.
    pub fn sum(&self) -> Result<Tensor> {
        let total: f32 = self.to_f32_vec()?.iter().sum();
        Ok(Tensor::scalar(total))
    }

    /// Sum along `dim`, optionally keeping it as size 1.
    pub fn sum_dim(&self, dim: isize, keepdim: bool) -> Result<Tensor> {
        let data = self.to_f32_vec()?;
        if self.ndim() == 0 {
            wrap_dim(dim, 0)?;
            return Ok(self.clone());
        }
        let axis = wrap_dim(dim, self.ndim())?;
        let (outer, len, inner) = split_at_axis(self.dims(), axis);
        let mut out = vec![0.0f32; outer * inner];
        for o in 0..outer {
            for l in 0..len {
                let base = (o * len + l) * inner;
                for i in 0..inner {
                    out[o * inner + i] += data[base + i];
                }
            }
        }
        let mut dims: Vec<usize> = self.dims().to_vec();
        if keepdim {
            dims[axis] = 1;
        } else {
            dims.remove(axis);
        }
        Tensor::from_vec(out, &dims)
    }

    /// Mean of all elements as a 0-d tensor. Empty tensors give NaN.
    pub fn mean(&self) -> Result<Tensor> {
        let data = self.to_f32_vec()?;
        let total: f32 = data.iter().sum();
        Ok(Tensor::scalar(total / data.len() as f32))
    }

    /// Largest element, or `None` for an empty tensor.
    pub fn max_value(&self) -> Result<Option<f32>> {
        let data = self.to_f32_vec()?;
        Ok(data.into_iter().reduce(f32::max))
    }

    /// Numerically stable softmax along `dim`.
    pub fn softmax(&self, dim: isize) -> Result<Tensor> {
        self.softmax_impl(dim, false)
    }

    /// `log(softmax(x))` along `dim`, computed without the intermediate.
    pub fn log_softmax(&self, dim: isize) -> Result<Tensor> {
        self.softmax_impl(dim, true)
    }

    fn softmax_impl(&self, dim: isize, log: bool) -> Result<Tensor> {
        let mut data = self.to_f32_vec()?;
        if self.ndim() == 0 {
            wrap_dim(dim, 0)?;
            let v = if log { 0.0 } else { 1.0 };
            return Ok(Tensor::scalar(v));
        }
        let axis = wrap_dim(dim, self.ndim())?;
        let (outer, len, inner) = split_at_axis(self.dims(), axis);
        for o in 0..outer {
            for i in 0..inner {
                let at = |l: usize| (o * len + l) * inner + i;
                let max = (0..len).map(|l| data[at(l)]).fold(f32::NEG_INFINITY, f32::max);
                let denom: f32 = (0..len).map(|l| (data[at(l)] - max).exp()).sum();
                let log_denom = denom.ln();
                for l in 0..len {
                    let shifted = data[at(l)] - max;
                    data[at(l)] = if log {
                        shifted - log_denom
                    } else {
                        shifted.exp() / denom
                    };
                }
            }
        }
        Tensor::from_vec(data, self.dims())
    }
}
