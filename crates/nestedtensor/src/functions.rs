//! Elementwise, reduction and shape operations on NestedTensors.
//!
//! Elementwise work on a packed tensor is one pass over the buffer and the
//! result is packed again; everything else goes component by component.

use nested_core::{wrap_dim, Tensor};

use crate::error::NestedTensorError;
use crate::nested::NestedTensor;
use crate::Result;

macro_rules! nested_unary_ops {
    ($($name:ident, $name_:ident;)*) => {
        impl NestedTensor {
            $(
                pub fn $name(&self) -> Result<NestedTensor> {
                    self.map_elementwise(Tensor::$name)
                }

                pub fn $name_(&mut self) -> Result<()> {
                    self.apply_elementwise_(Tensor::$name_)
                }
            )*
        }
    };
}

nested_unary_ops! {
    neg, neg_;
    abs, abs_;
    exp, exp_;
    log, log_;
    sqrt, sqrt_;
    sin, sin_;
    cos, cos_;
    tanh, tanh_;
    sigmoid, sigmoid_;
    relu, relu_;
}

macro_rules! nested_binary_ops {
    ($($name:ident, $tensor_name:ident;)*) => {
        impl NestedTensor {
            $(
                /// Elementwise against a NestedTensor of the same nested size.
                pub fn $name(&self, other: &NestedTensor) -> Result<NestedTensor> {
                    self.zip_elementwise(other, Tensor::$name)
                }

                /// Each component against the same dense tensor, broadcasting.
                pub fn $tensor_name(&self, other: &Tensor) -> Result<NestedTensor> {
                    self.map_components(|t| t.$name(other))
                }
            )*
        }
    };
}

nested_binary_ops! {
    add, add_tensor;
    sub, sub_tensor;
    mul, mul_tensor;
    div, div_tensor;
}

macro_rules! nested_binary_inplace_ops {
    ($($name_:ident, $tensor_name_:ident;)*) => {
        impl NestedTensor {
            $(
                pub fn $name_(&mut self, other: &NestedTensor) -> Result<()> {
                    self.zip_elementwise_(other, Tensor::$name_)
                }

                pub fn $tensor_name_(&mut self, other: &Tensor) -> Result<()> {
                    self.modify_components(|_, t| t.$name_(other))
                }
            )*
        }
    };
}

nested_binary_inplace_ops! {
    sub_, sub_tensor_;
    mul_, mul_tensor_;
    div_, div_tensor_;
}

impl NestedTensor {
    fn zip_elementwise_(
        &mut self,
        other: &NestedTensor,
        mut f: impl FnMut(&mut Tensor, &Tensor) -> nested_core::Result<()>,
    ) -> Result<()> {
        self.check_nested_size(other)?;
        if let (true, Some(b)) = (self.is_contiguous(), other.packed()) {
            let b = b.clone();
            return self.apply_elementwise_(|a| f(a, &b));
        }
        let others = other.components();
        self.modify_components(|i, t| f(t, others[i]))
    }

    /// `self += alpha * other`.
    pub fn add_(&mut self, other: &NestedTensor, alpha: f32) -> Result<()> {
        self.zip_elementwise_(other, |a, b| a.add_scaled_(b, alpha))
    }

    /// `component += alpha * other` for every component.
    pub fn add_tensor_(&mut self, other: &Tensor, alpha: f32) -> Result<()> {
        self.modify_components(|_, t| t.add_scaled_(other, alpha))
    }

    pub fn add_scalar(&self, value: f32) -> Result<NestedTensor> {
        self.map_elementwise(|t| t.add_scalar(value))
    }

    pub fn mul_scalar(&self, value: f32) -> Result<NestedTensor> {
        self.map_elementwise(|t| t.mul_scalar(value))
    }

    // =========================================================================
    // Reductions
    // =========================================================================

    /// Sum of every element, as a 0-d tensor. An empty NestedTensor sums to 0.
    pub fn sum(&self) -> Result<Tensor> {
        if let Some(buffer) = self.packed() {
            return Ok(buffer.sum()?);
        }
        let parts = self
            .components()
            .into_iter()
            .map(Tensor::sum)
            .collect::<nested_core::Result<Vec<_>>>()?;
        if parts.is_empty() {
            return Ok(Tensor::scalar(0.0));
        }
        Ok(Tensor::stack(&parts, 0)?.sum()?)
    }

    /// True when every element is non-zero. Vacuously true when empty.
    pub fn all(&self) -> bool {
        self.components().iter().all(|t| t.all())
    }

    pub fn any(&self) -> bool {
        self.components().iter().any(|t| t.any())
    }

    pub fn softmax(&self, dim: isize) -> Result<NestedTensor> {
        let d = self.tensor_dim_of(dim, "softmax")?;
        self.map_components(|t| t.softmax(d))
    }

    pub fn log_softmax(&self, dim: isize) -> Result<NestedTensor> {
        let d = self.tensor_dim_of(dim, "log_softmax")?;
        self.map_components(|t| t.log_softmax(d))
    }

    // =========================================================================
    // Shape
    // =========================================================================

    /// Reshape every component. Entries for nested dims must be `-1`; the
    /// remaining entries are the component shape.
    pub fn reshape(&self, shape: &[isize]) -> Result<NestedTensor> {
        let nested_dim = self.nested_dim();
        if shape.len() <= nested_dim {
            return Err(NestedTensorError::InvalidArgument(
                "reshape cannot be exclusive to nested dimensions".into(),
            ));
        }
        if let Some(i) = shape[..nested_dim].iter().position(|&s| s != -1) {
            return Err(NestedTensorError::InvalidArgument(format!(
                "cannot reshape nested dimension {i}, pass -1 for it"
            )));
        }
        let target = &shape[nested_dim..];
        self.map_components(|t| t.reshape(target))
    }

    pub fn transpose(&self, dim0: isize, dim1: isize) -> Result<NestedTensor> {
        let (a, b) = (wrap_dim(dim0, self.dim())?, wrap_dim(dim1, self.dim())?);
        if a == b {
            return Ok(self.clone());
        }
        let a = self.tensor_dim_of(a as isize, "transpose")?;
        let b = self.tensor_dim_of(b as isize, "transpose")?;
        self.map_components(|t| t.transpose(a, b))
    }

    pub fn flatten(&self, start_dim: isize, end_dim: isize) -> Result<NestedTensor> {
        let start = self.tensor_dim_of(start_dim, "flatten")?;
        let end = self.tensor_dim_of(end_dim, "flatten")?;
        if end < start {
            return Err(NestedTensorError::InvalidArgument(format!(
                "flatten: end dim {end_dim} comes before start dim {start_dim}"
            )));
        }
        self.map_components(|t| t.flatten(start, end))
    }

    // =========================================================================
    // Matrix products
    // =========================================================================

    /// Component-wise matrix product; both sides need the same tree shape.
    pub fn matmul(&self, other: &NestedTensor) -> Result<NestedTensor> {
        NestedTensor::from_structure(
            self.structure()
                .try_zip_map(other.structure(), |a, b| Ok(a.matmul(b)?))?,
        )
    }

    pub fn matmul_tensor(&self, other: &Tensor) -> Result<NestedTensor> {
        self.map_components(|t| t.matmul(other))
    }

    /// `matmul` written into the components of `out`.
    pub fn matmul_out(out: &mut NestedTensor, a: &NestedTensor, b: &NestedTensor) -> Result<()> {
        if !a.structure().same_structure(b.structure()) || !out.structure().same_structure(a.structure()) {
            return Err(NestedTensorError::InvalidStructure(
                "matmul_out operands and output must share a tree shape".into(),
            ));
        }
        let (lhs, rhs) = (a.components(), b.components());
        out.modify_components(|i, t| Tensor::matmul_out(t, lhs[i], rhs[i]))
    }
}
