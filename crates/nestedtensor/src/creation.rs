use std::time::Instant;

use nested_core::{DType, Device, Tensor};

use crate::nested::NestedTensor;
use crate::node::{NestedNode, TensorNode};
use crate::Result;

/// Options applied after construction, in field order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreationOptions {
    pub dtype: Option<DType>,
    pub device: Option<Device>,
    pub requires_grad: bool,
    pub pin_memory: bool,
}

impl CreationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    pub fn pin_memory(mut self, pin_memory: bool) -> Self {
        self.pin_memory = pin_memory;
        self
    }

    fn apply(&self, nt: NestedTensor) -> Result<NestedTensor> {
        let mut nt = nt.to(self.dtype, self.device)?;
        if self.requires_grad {
            nt.requires_grad_(true)?;
        }
        if self.pin_memory {
            nt = nt.pin_memory()?;
        }
        Ok(nt)
    }
}

/// Anything a NestedTensor can be built from.
pub enum NestedData {
    Tensors(TensorNode),
    Nested(NestedTensor),
}

impl From<Vec<Tensor>> for NestedData {
    fn from(tensors: Vec<Tensor>) -> Self {
        NestedData::Tensors(NestedNode::from_leaves(tensors))
    }
}

impl From<Vec<TensorNode>> for NestedData {
    fn from(children: Vec<TensorNode>) -> Self {
        NestedData::Tensors(NestedNode::List(children))
    }
}

impl From<TensorNode> for NestedData {
    fn from(node: TensorNode) -> Self {
        NestedData::Tensors(node)
    }
}

impl From<NestedTensor> for NestedData {
    fn from(nt: NestedTensor) -> Self {
        NestedData::Nested(nt)
    }
}

/// Build a NestedTensor that owns a fresh packed copy of `data`.
pub fn nested_tensor(data: impl Into<NestedData>, options: &CreationOptions) -> Result<NestedTensor> {
    let _t = if log::log_enabled!(log::Level::Debug) { Some(Instant::now()) } else { None };
    let packed = match data.into() {
        NestedData::Tensors(node) => NestedTensor::from_structure(node)?.contiguous()?,
        NestedData::Nested(nt) => {
            let packed = nt.contiguous()?;
            match packed.buffer().map(Tensor::deep_clone) {
                Some(copy) => NestedTensor::from_buffer(copy, packed.nested_size().clone())?,
                None => packed,
            }
        }
    };
    let out = options.apply(packed)?;
    if let Some(t) = _t {
        log::debug!(
            "nested_tensor: packed {} components ({} elements) in {:.3}ms",
            out.components().len(),
            out.numel(),
            t.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(out)
}

/// Like `nested_tensor`, but an existing NestedTensor is reused without
/// copying its data.
pub fn as_nested_tensor(data: impl Into<NestedData>, options: &CreationOptions) -> Result<NestedTensor> {
    match data.into() {
        NestedData::Nested(nt) => options.apply(nt),
        tensors => nested_tensor(tensors, options),
    }
}
