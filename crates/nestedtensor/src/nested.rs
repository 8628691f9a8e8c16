use std::fmt;
use std::time::Instant;

use nested_core::{wrap_dim, DType, Device, NestedCoreError, Shape, Tensor};

use crate::error::NestedTensorError;
use crate::node::{NestedNode, SizeNode, TensorNode};
use crate::Result;

/// Leaf count at which per-component work moves onto the rayon pool.
pub(crate) const PAR_THRESHOLD: usize = 4;

/// The size (or stride) of one dimension across a NestedTensor: a single
/// value for dimension 0, otherwise one entry per child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedDimSize {
    Value(usize),
    List(Vec<NestedDimSize>),
}

impl fmt::Display for NestedDimSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestedDimSize::Value(v) => write!(f, "{v}"),
            NestedDimSize::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One entry produced by `unbind` and friends: either a dense component or
/// a NestedTensor one level shallower.
#[derive(Debug, Clone)]
pub enum NestedItem {
    Tensor(Tensor),
    Nested(NestedTensor),
}

impl NestedItem {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            NestedItem::Tensor(t) => Some(t),
            NestedItem::Nested(_) => None,
        }
    }

    pub fn as_nested(&self) -> Option<&NestedTensor> {
        match self {
            NestedItem::Tensor(_) => None,
            NestedItem::Nested(n) => Some(n),
        }
    }

    pub fn into_tensor(self) -> Option<Tensor> {
        match self {
            NestedItem::Tensor(t) => Some(t),
            NestedItem::Nested(_) => None,
        }
    }

    pub fn into_nested(self) -> Option<NestedTensor> {
        match self {
            NestedItem::Tensor(_) => None,
            NestedItem::Nested(n) => Some(n),
        }
    }

    /// The item as a subtree: a dense tensor becomes a leaf.
    pub fn into_node(self) -> TensorNode {
        match self {
            NestedItem::Tensor(t) => NestedNode::Leaf(t),
            NestedItem::Nested(n) => n.structure,
        }
    }
}

/// A list (of lists ...) of tensors that agree in dtype, device and number
/// of dimensions but not necessarily in size.
///
/// When `buffer` is set the components are row-major views into it, packed
/// depth-first. Mutation is copy-on-write: a clone never observes writes
/// made through another clone.
#[derive(Clone)]
pub struct NestedTensor {
    buffer: Option<Tensor>,
    structure: TensorNode,
    nested_size: SizeNode,
    dtype: DType,
    device: Device,
    tensor_dim: usize,
    requires_grad: bool,
}

fn validate(structure: &TensorNode) -> Result<(DType, Device, usize)> {
    if structure.is_leaf() {
        return Err(NestedTensorError::InvalidStructure(
            "expected a list of tensors, got a single tensor".into(),
        ));
    }
    if !structure.is_balanced() {
        return Err(NestedTensorError::InvalidStructure(
            "all components must sit at the same nesting depth".into(),
        ));
    }
    let leaves = structure.flatten();
    let Some(first) = leaves.first() else {
        return Ok((DType::F32, Device::Cpu, 0));
    };
    for t in &leaves {
        if t.ndim() != first.ndim() {
            return Err(NestedTensorError::InvalidStructure(format!(
                "components must have the same number of dimensions, got {} and {}",
                first.ndim(),
                t.ndim()
            )));
        }
        if t.dtype() != first.dtype() {
            return Err(NestedCoreError::DTypeMismatch {
                expected: first.dtype(),
                got: t.dtype(),
            }
            .into());
        }
        if t.device() != first.device() {
            return Err(NestedCoreError::DeviceMismatch {
                expected: first.device(),
                got: t.device(),
            }
            .into());
        }
    }
    Ok((first.dtype(), first.device(), first.ndim()))
}

/// Component views into a packed 1-D buffer, laid out by `nested_size`.
fn build_views(buffer: &Tensor, nested_size: &SizeNode) -> Result<TensorNode> {
    let mut offset = buffer.offset();
    nested_size.try_map(|dims| {
        let shape = Shape::new(dims);
        let strides = shape.contiguous_strides();
        let numel = shape.numel();
        let view = Tensor::from_parts(buffer.storage_ref().clone(), shape, strides, offset)?;
        offset += numel;
        Ok(view)
    })
}

fn uniform(mut values: impl Iterator<Item = usize>) -> Option<usize> {
    let first = values.next()?;
    values.all(|v| v == first).then_some(first)
}

fn dim_size(node: &SizeNode, dim: usize) -> NestedDimSize {
    match node {
        NestedNode::Leaf(dims) => NestedDimSize::Value(dims[dim]),
        NestedNode::List(children) if dim == 0 => NestedDimSize::Value(children.len()),
        NestedNode::List(children) => {
            NestedDimSize::List(children.iter().map(|c| dim_size(c, dim - 1)).collect())
        }
    }
}

fn stack_node(node: &TensorNode, dims: &[usize], dtype: DType) -> Result<Tensor> {
    match node {
        NestedNode::Leaf(t) => Ok(t.clone()),
        NestedNode::List(children) if children.is_empty() => Ok(Tensor::zeros(dims, dtype)),
        NestedNode::List(children) => {
            let parts = children
                .iter()
                .map(|c| stack_node(c, &dims[1..], dtype))
                .collect::<Result<Vec<_>>>()?;
            Ok(Tensor::stack(&parts, 0)?)
        }
    }
}

fn split_leaves(node: &TensorNode) -> Result<TensorNode> {
    match node {
        NestedNode::Leaf(t) => Ok(NestedNode::from_leaves(t.unbind(0)?)),
        NestedNode::List(children) => Ok(NestedNode::List(
            children.iter().map(split_leaves).collect::<Result<_>>()?,
        )),
    }
}

fn squeeze_nested(node: &TensorNode, dim: usize) -> TensorNode {
    let children = node.children();
    if dim == 1 {
        NestedNode::List(
            children
                .iter()
                .flat_map(|c| c.children().iter().cloned())
                .collect(),
        )
    } else {
        NestedNode::List(children.iter().map(|c| squeeze_nested(c, dim - 1)).collect())
    }
}

fn render(node: &TensorNode, tabs: usize) -> String {
    let indent = "\t".repeat(tabs);
    match node {
        NestedNode::Leaf(t) => t
            .to_string()
            .lines()
            .map(|line| format!("{indent}{line}"))
            .collect::<Vec<_>>()
            .join("\n"),
        NestedNode::List(children) if children.is_empty() => format!("{indent}[]"),
        NestedNode::List(children) => {
            let body = children
                .iter()
                .map(|c| render(c, tabs + 1))
                .collect::<Vec<_>>()
                .join(",\n");
            format!("{indent}[\n{body}\n{indent}]")
        }
    }
}

impl NestedTensor {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Wrap a tree of tensors without copying. The result is not contiguous.
    pub fn from_structure(structure: TensorNode) -> Result<Self> {
        let (dtype, device, tensor_dim) = validate(&structure)?;
        let nested_size = structure.map(|t| t.dims().to_vec());
        Ok(Self {
            buffer: None,
            structure,
            nested_size,
            dtype,
            device,
            tensor_dim,
            requires_grad: false,
        })
    }

    pub fn from_tensors(tensors: Vec<Tensor>) -> Result<Self> {
        Self::from_structure(NestedNode::from_leaves(tensors))
    }

    /// Components are views into `buffer` at running offsets. The buffer
    /// must hold exactly the elements `nested_size` describes.
    pub fn from_buffer(buffer: Tensor, nested_size: SizeNode) -> Result<Self> {
        if nested_size.is_leaf() || !nested_size.is_balanced() {
            return Err(NestedTensorError::InvalidStructure(
                "nested size must be a list with all entries at the same depth".into(),
            ));
        }
        let sizes = nested_size.flatten();
        let tensor_dim = sizes.first().map_or(0, |d| d.len());
        if let Some(bad) = sizes.iter().find(|d| d.len() != tensor_dim) {
            return Err(NestedTensorError::InvalidStructure(format!(
                "components must have the same number of dimensions, got {} and {}",
                tensor_dim,
                bad.len()
            )));
        }
        let total: usize = sizes.iter().map(|d| d.iter().product::<usize>()).sum();
        if buffer.numel() != total {
            return Err(NestedTensorError::NestedSizeMismatch {
                expected: format!("{total} elements"),
                got: format!("buffer of {} elements", buffer.numel()),
            });
        }
        let buffer = buffer.contiguous().reshape(&[-1])?;
        let structure = build_views(&buffer, &nested_size)?;
        Ok(Self {
            dtype: buffer.dtype(),
            device: buffer.device(),
            buffer: Some(buffer),
            structure,
            nested_size,
            tensor_dim,
            requires_grad: false,
        })
    }

    /// One component per entry of dim 0.
    pub fn from_tensor(tensor: Tensor) -> Result<Self> {
        let Some((&n, rest)) = tensor.dims().split_first() else {
            return Err(NestedTensorError::InvalidArgument(
                "from_tensor needs a tensor with at least one dimension".into(),
            ));
        };
        let nested_size = NestedNode::from_leaves(vec![rest.to_vec(); n]);
        Self::from_buffer(tensor, nested_size)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn buffer(&self) -> Option<&Tensor> {
        self.buffer.as_ref()
    }

    /// The buffer, when the components are packed into it.
    pub(crate) fn packed(&self) -> Option<&Tensor> {
        self.buffer.as_ref().filter(|_| self.is_contiguous())
    }

    pub fn structure(&self) -> &TensorNode {
        &self.structure
    }

    pub fn into_structure(self) -> TensorNode {
        self.structure
    }

    /// Components in depth-first order.
    pub fn components(&self) -> Vec<&Tensor> {
        self.structure.flatten()
    }

    pub fn len(&self) -> usize {
        self.structure.degree()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nested_dim(&self) -> usize {
        self.structure.height()
    }

    pub fn tensor_dim(&self) -> usize {
        self.tensor_dim
    }

    pub fn dim(&self) -> usize {
        self.nested_dim() + self.tensor_dim
    }

    pub fn numel(&self) -> usize {
        self.nested_size
            .reduce(0, |acc, dims| acc + dims.iter().product::<usize>())
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn element_size(&self) -> usize {
        self.dtype.element_size()
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn is_pinned(&self) -> bool {
        match &self.buffer {
            Some(b) => b.is_pinned(),
            None => {
                let leaves = self.components();
                !leaves.is_empty() && leaves.iter().all(|t| t.is_pinned())
            }
        }
    }

    pub fn is_contiguous(&self) -> bool {
        match &self.buffer {
            Some(b) => b.is_contiguous() && self.components().iter().all(|t| t.is_contiguous()),
            None => false,
        }
    }

    /// Size of every dimension, `None` where the components disagree.
    pub fn sizes(&self) -> Vec<Option<usize>> {
        let mut out = Vec::with_capacity(self.dim());
        let mut level: Vec<&SizeNode> = vec![&self.nested_size];
        for _ in 0..self.nested_dim() {
            out.push(uniform(level.iter().map(|n| n.degree())));
            level = level.into_iter().flat_map(|n| n.children()).collect();
        }
        let leaves: Vec<&Vec<usize>> = level.iter().filter_map(|n| n.payload()).collect();
        for i in 0..self.tensor_dim {
            out.push(uniform(leaves.iter().map(|d| d[i])));
        }
        out
    }

    pub fn nested_size(&self) -> &SizeNode {
        &self.nested_size
    }

    pub fn nested_stride(&self) -> SizeNode {
        self.structure.map(|t| t.strides().to_vec())
    }

    pub fn nested_size_at(&self, dim: isize) -> Result<NestedDimSize> {
        let d = wrap_dim(dim, self.dim())?;
        Ok(dim_size(&self.nested_size, d))
    }

    pub fn nested_stride_at(&self, dim: isize) -> Result<NestedDimSize> {
        let d = wrap_dim(dim, self.dim())?;
        Ok(dim_size(&self.nested_stride(), d))
    }

    /// Translate `dim` to a dimension of the components, rejecting nested
    /// dims.
    pub(crate) fn tensor_dim_of(&self, dim: isize, op: &'static str) -> Result<isize> {
        let d = wrap_dim(dim, self.dim())?;
        let nested_dim = self.nested_dim();
        if d < nested_dim {
            return Err(NestedTensorError::NestedDim { op, dim: d, nested_dim });
        }
        Ok((d - nested_dim) as isize)
    }

    pub(crate) fn check_nested_size(&self, other: &NestedTensor) -> Result<()> {
        if self.nested_size != other.nested_size {
            return Err(NestedTensorError::NestedSizeMismatch {
                expected: format!("{:?}", self.nested_size),
                got: format!("{:?}", other.nested_size),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Conversion
    // =========================================================================

    /// Pack the components into a single buffer. Already packed tensors are
    /// returned as a shallow clone.
    pub fn contiguous(&self) -> Result<Self> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };
        let flat = self
            .components()
            .into_iter()
            .map(|t| t.reshape(&[-1]))
            .collect::<nested_core::Result<Vec<_>>>()?;
        let buffer = if flat.is_empty() {
            Tensor::zeros(&[0], self.dtype)
        } else {
            Tensor::cat(&flat, 0)?
        };
        let mut out = Self::from_buffer(buffer, self.nested_size.clone())?;
        out.requires_grad = self.requires_grad;
        if let Some(t) = _t {
            log::trace!(
                "[perf] nested::contiguous {} components, {} elements {:.3}ms",
                flat.len(),
                out.numel(),
                t.elapsed().as_secs_f64() * 1000.0
            );
        }
        Ok(out)
    }

    fn packed_buffer(&self) -> Result<Tensor> {
        self.contiguous()?
            .buffer
            .ok_or_else(|| NestedTensorError::InvalidStructure("packing produced no buffer".into()))
    }

    /// Dense tensor of shape `sizes()`. Fails when any dimension is irregular.
    pub fn to_tensor(&self) -> Result<Tensor> {
        let dims = self
            .sizes()
            .into_iter()
            .enumerate()
            .map(|(dim, s)| s.ok_or(NestedTensorError::IrregularShape { dim }))
            .collect::<Result<Vec<usize>>>()?;
        if let Some(buffer) = self.packed() {
            let target: Vec<isize> = dims.iter().map(|&d| d as isize).collect();
            return Ok(buffer.reshape(&target)?);
        }
        stack_node(&self.structure, &dims, self.dtype)
    }

    /// Collapse every dimension from `dim` on into dense components.
    pub fn to_tensor_dim(&self, dim: isize) -> Result<NestedItem> {
        let d = wrap_dim(dim, self.dim())?;
        if d == 0 {
            return Ok(NestedItem::Tensor(self.to_tensor()?));
        }
        if self.nested_dim() == 1 {
            return Ok(NestedItem::Nested(self.clone()));
        }
        let children = self
            .structure
            .children()
            .iter()
            .map(|c| Ok(Self::from_structure(c.clone())?.to_tensor_dim(d as isize - 1)?.into_node()))
            .collect::<Result<Vec<_>>>()?;
        let mut out = Self::from_structure(NestedNode::List(children))?;
        out.requires_grad = self.requires_grad;
        Ok(NestedItem::Nested(out))
    }

    /// Turn leading component dims into nested dims until `nested_dim()`
    /// equals `dim + 1`. `None` nests every dimension.
    pub fn to_nested_tensor(&self, dim: Option<isize>) -> Result<Self> {
        let target = match dim {
            Some(d) => wrap_dim(d, self.dim())?,
            None => self.dim() - 1,
        };
        if target < self.nested_dim() {
            return Ok(self.clone());
        }
        let mut structure = self.structure.clone();
        for _ in self.nested_dim()..=target {
            structure = split_leaves(&structure)?;
        }
        let mut out = Self::from_structure(structure)?;
        out.requires_grad = self.requires_grad;
        Ok(out)
    }

    /// Split along `dim`. Dim 0 yields the children; deeper dims regroup
    /// the children's pieces by index, so ragged children contribute only
    /// to the groups they reach.
    pub fn unbind(&self, dim: isize) -> Result<Vec<NestedItem>> {
        let d = wrap_dim(dim, self.dim())?;
        let children = self.structure.children();
        let mut groups: Vec<Vec<TensorNode>> = Vec::new();

        if self.nested_dim() == 1 {
            let leaves = children.iter().filter_map(NestedNode::payload);
            if d == 0 {
                return Ok(leaves.cloned().map(NestedItem::Tensor).collect());
            }
            for t in leaves {
                for (j, part) in t.unbind(d as isize - 1)?.into_iter().enumerate() {
                    if groups.len() <= j {
                        groups.push(Vec::new());
                    }
                    groups[j].push(NestedNode::Leaf(part));
                }
            }
        } else {
            let nested = children
                .iter()
                .map(|c| Self::from_structure(c.clone()))
                .collect::<Result<Vec<_>>>()?;
            if d == 0 {
                return Ok(nested.into_iter().map(NestedItem::Nested).collect());
            }
            for child in &nested {
                for (j, item) in child.unbind(d as isize - 1)?.into_iter().enumerate() {
                    if groups.len() <= j {
                        groups.push(Vec::new());
                    }
                    groups[j].push(item.into_node());
                }
            }
        }

        groups
            .into_iter()
            .map(|g| Ok(NestedItem::Nested(Self::from_structure(NestedNode::List(g))?)))
            .collect()
    }

    /// Packed copy whose storage is flagged page-locked.
    pub fn pin_memory(&self) -> Result<Self> {
        let mut out = Self::from_buffer(self.packed_buffer()?.pin_memory(), self.nested_size.clone())?;
        out.requires_grad = self.requires_grad;
        Ok(out)
    }

    pub fn detach(&self) -> Self {
        let mut out = self.clone();
        out.requires_grad = false;
        out
    }

    pub fn requires_grad_(&mut self, requires_grad: bool) -> Result<&mut Self> {
        if requires_grad && !self.dtype.is_float() {
            return Err(NestedTensorError::InvalidArgument(format!(
                "only floating point NestedTensors can require gradients, got {}",
                self.dtype
            )));
        }
        self.requires_grad = requires_grad;
        Ok(self)
    }

    /// Cast and/or move. `None` keeps the current value.
    pub fn to(&self, dtype: Option<DType>, device: Option<Device>) -> Result<Self> {
        let dtype = dtype.unwrap_or(self.dtype);
        let device = device.unwrap_or(self.device);
        if dtype == self.dtype && device == self.device {
            return Ok(self.clone());
        }
        let mut out = match self.packed() {
            Some(buffer) => Self::from_buffer(
                buffer.to_device(device)?.to_dtype(dtype),
                self.nested_size.clone(),
            )?,
            None => Self::from_structure(
                self.structure
                    .try_map(|t| Ok(t.to_device(device)?.to_dtype(dtype)))?,
            )?,
        };
        out.requires_grad = self.requires_grad && dtype.is_float();
        Ok(out)
    }

    // =========================================================================
    // Component-wise application
    // =========================================================================

    pub fn map_components(
        &self,
        f: impl Fn(&Tensor) -> nested_core::Result<Tensor>,
    ) -> Result<NestedTensor> {
        Self::from_structure(self.structure.try_map(|t| Ok(f(t)?))?)
    }

    /// `map_components` on the rayon pool once there are enough leaves.
    pub(crate) fn par_map_components(
        &self,
        f: impl Fn(&Tensor) -> nested_core::Result<Tensor> + Sync + Send,
    ) -> Result<NestedTensor> {
        let leaves = self.nested_size.flatten().len();
        let structure = if leaves >= PAR_THRESHOLD {
            log::trace!("per-component op on {leaves} leaves via rayon");
            self.structure.par_try_map(|t| Ok(f(t)?))?
        } else {
            self.structure.try_map(|t| Ok(f(t)?))?
        };
        Self::from_structure(structure)
    }

    /// Run `f` over the packed buffer when there is one, otherwise over each
    /// component. Only valid for elementwise `f`.
    pub(crate) fn map_elementwise(
        &self,
        f: impl Fn(&Tensor) -> nested_core::Result<Tensor>,
    ) -> Result<NestedTensor> {
        match self.packed() {
            Some(buffer) => {
                log::trace!("elementwise op on packed buffer of {} elements", buffer.numel());
                Self::from_buffer(f(buffer)?, self.nested_size.clone())
            }
            None => self.map_components(f),
        }
    }

    pub(crate) fn zip_elementwise(
        &self,
        other: &NestedTensor,
        f: impl Fn(&Tensor, &Tensor) -> nested_core::Result<Tensor>,
    ) -> Result<NestedTensor> {
        self.check_nested_size(other)?;
        if let (Some(a), Some(b)) = (self.packed(), other.packed()) {
            log::trace!("binary op on packed buffers of {} elements", a.numel());
            return Self::from_buffer(f(a, b)?, self.nested_size.clone());
        }
        Self::from_structure(
            self.structure
                .try_zip_map(&other.structure, |a, b| Ok(f(a, b)?))?,
        )
    }

    /// Mutate the packed buffer with the component views detached, then
    /// point fresh views at the result.
    fn modify_buffer(&mut self, f: impl FnOnce(&mut Tensor) -> Result<()>) -> Result<()> {
        let mut buffer = self.buffer.take().ok_or_else(|| {
            NestedTensorError::InvalidStructure("in-place buffer update without a buffer".into())
        })?;
        self.structure = NestedNode::List(Vec::new());
        let outcome = f(&mut buffer);
        let rebuilt = build_views(&buffer, &self.nested_size);
        self.buffer = Some(buffer);
        self.structure = rebuilt?;
        outcome
    }

    /// In-place elementwise `f`: one pass over the buffer when packed.
    pub(crate) fn apply_elementwise_(
        &mut self,
        mut f: impl FnMut(&mut Tensor) -> nested_core::Result<()>,
    ) -> Result<()> {
        if self.is_contiguous() {
            log::trace!("in-place elementwise op on packed buffer");
            self.modify_buffer(|buffer| Ok(f(buffer)?))
        } else {
            self.structure.try_apply(|t| Ok(f(t)?))
        }
    }

    /// In-place `f` per component; `f` receives the depth-first leaf index.
    /// Packed components are written back into the buffer and must keep
    /// their shape.
    pub(crate) fn modify_components(
        &mut self,
        mut f: impl FnMut(usize, &mut Tensor) -> nested_core::Result<()>,
    ) -> Result<()> {
        if !self.is_contiguous() {
            let mut index = 0;
            return self.structure.try_apply(|t| {
                f(index, t)?;
                index += 1;
                Ok(())
            });
        }
        let sizes: Vec<Vec<usize>> = self.nested_size.flatten().into_iter().cloned().collect();
        self.modify_buffer(|buffer| {
            let dtype = buffer.dtype();
            let data = buffer
                .as_f32_slice_mut()
                .ok_or(NestedCoreError::UnsupportedDType(dtype))?;
            let mut offset = 0;
            for (index, dims) in sizes.iter().enumerate() {
                let numel = dims.iter().product::<usize>();
                let slot = &mut data[offset..offset + numel];
                let mut component = Tensor::from_vec(slot.to_vec(), dims)?;
                f(index, &mut component)?;
                if component.dims() != dims.as_slice() {
                    return Err(NestedCoreError::ShapeMismatch {
                        expected: dims.clone(),
                        got: component.dims().to_vec(),
                    }
                    .into());
                }
                slot.copy_from_slice(&component.to_f32_vec()?);
                offset += numel;
            }
            Ok(())
        })
    }

    // =========================================================================
    // In-place structure updates
    // =========================================================================

    /// Copy `source` into this tensor. Nested sizes must match.
    pub fn copy_(&mut self, source: &NestedTensor) -> Result<()> {
        self.check_nested_size(source)?;
        if self.is_contiguous() {
            if let Some(src) = source.packed() {
                let src = src.clone();
                return self.modify_buffer(|buffer| Ok(buffer.copy_(&src)?));
            }
        }
        let sources = source.components();
        self.modify_components(|i, t| t.copy_(sources[i]))
    }

    /// Remove size-1 dimensions: `dim` only, or every singleton when `None`.
    /// Dimension 0 cannot be squeezed.
    pub fn squeeze_(&mut self, dim: Option<isize>) -> Result<()> {
        let Some(dim) = dim else {
            let sizes = self.sizes();
            for i in (1..sizes.len()).rev() {
                if sizes[i] == Some(1) {
                    self.squeeze_(Some(i as isize))?;
                }
            }
            return Ok(());
        };
        let d = wrap_dim(dim, self.dim())?;
        if d == 0 {
            return Err(NestedTensorError::InvalidArgument(
                "cannot squeeze the first dimension of a NestedTensor".into(),
            ));
        }
        if self.sizes()[d] != Some(1) {
            return Err(NestedTensorError::InvalidArgument(format!(
                "dimension {d} is either irregular or not a singleton"
            )));
        }
        let nested_dim = self.nested_dim();
        // The depth-first leaf order is unchanged, so the buffer stays valid.
        self.structure = if d < nested_dim {
            squeeze_nested(&self.structure, d)
        } else {
            let td = (d - nested_dim) as isize;
            self.structure.try_map(|t| Ok(t.squeeze(Some(td))?))?
        };
        self.nested_size = self.structure.map(|t| t.dims().to_vec());
        if d >= nested_dim {
            self.tensor_dim -= 1;
        }
        Ok(())
    }
}

impl fmt::Display for NestedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "nested_tensor([])");
        }
        let body = self
            .structure
            .children()
            .iter()
            .map(|c| render(c, 1))
            .collect::<Vec<_>>()
            .join(",\n");
        write!(f, "nested_tensor([\n{body}\n])")
    }
}

impl fmt::Debug for NestedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NestedTensor(nested_dim={}, tensor_dim={}, sizes={:?}, dtype={}, device={}, contiguous={})",
            self.nested_dim(),
            self.tensor_dim,
            self.sizes(),
            self.dtype,
            self.device,
            self.is_contiguous(),
        )
    }
}
