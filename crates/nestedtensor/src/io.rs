//! Save and load NestedTensors as safetensors files.
//!
//! Every component is stored under its tree path (`"1"`, `"0.2"`, ...).
//! The header metadata records the nested size as JSON, so empty lists and
//! the nesting depth survive a round trip.

use std::collections::HashMap;
use std::path::Path;

use nested_core::{Buffer, DType, Tensor};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::NestedTensorError;
use crate::nested::NestedTensor;
use crate::node::SizeNode;
use crate::Result;

const NESTED_SIZE_KEY: &str = "nested_size";
const NESTED_DIM_KEY: &str = "nested_dim";
const DTYPE_KEY: &str = "dtype";

fn to_safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
        DType::F32 => Dtype::F32,
        DType::F64 => Dtype::F64,
        DType::I8 => Dtype::I8,
        DType::U8 => Dtype::U8,
        DType::I32 => Dtype::I32,
        DType::I64 => Dtype::I64,
    }
}

fn from_safetensors_dtype(dtype: Dtype) -> Result<DType> {
    Ok(match dtype {
        Dtype::F16 => DType::F16,
        Dtype::BF16 => DType::BF16,
        Dtype::F32 => DType::F32,
        Dtype::F64 => DType::F64,
        Dtype::I8 => DType::I8,
        Dtype::U8 => DType::U8,
        Dtype::I32 => DType::I32,
        Dtype::I64 => DType::I64,
        other => {
            return Err(NestedTensorError::Serialization(format!(
                "unsupported safetensors dtype {other:?}"
            )))
        }
    })
}

fn parse_dtype(name: &str) -> Result<DType> {
    [
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
        DType::I8,
        DType::U8,
        DType::I32,
        DType::I64,
    ]
    .into_iter()
    .find(|d| d.to_string() == name)
    .ok_or_else(|| NestedTensorError::Serialization(format!("unknown dtype {name:?}")))
}

fn path_key(path: &[usize]) -> String {
    path.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(".")
}

/// Serialize `nt` to safetensors bytes.
pub fn to_bytes(nt: &NestedTensor) -> Result<Vec<u8>> {
    let dtype = to_safetensors_dtype(nt.dtype());
    let entries: Vec<(String, Vec<usize>, Vec<u8>)> = nt
        .structure()
        .enumerate_leaves()
        .into_iter()
        .map(|(path, t)| {
            let bytes = t.deep_clone().storage_ref().buffer().to_le_bytes();
            (path_key(&path), t.dims().to_vec(), bytes)
        })
        .collect();
    let views = entries
        .iter()
        .map(|(key, shape, bytes)| Ok((key.as_str(), TensorView::new(dtype, shape.clone(), bytes)?)))
        .collect::<Result<Vec<_>>>()?;

    let metadata = HashMap::from([
        (NESTED_SIZE_KEY.to_string(), serde_json::to_string(nt.nested_size())?),
        (NESTED_DIM_KEY.to_string(), nt.nested_dim().to_string()),
        (DTYPE_KEY.to_string(), nt.dtype().to_string()),
    ]);
    Ok(safetensors::serialize(views.iter().map(|(k, v)| (*k, v)), &Some(metadata))?)
}

/// Rebuild a packed NestedTensor from safetensors bytes written by `to_bytes`.
pub fn from_bytes(data: &[u8]) -> Result<NestedTensor> {
    let (_, header) = SafeTensors::read_metadata(data)?;
    let metadata = header.metadata().as_ref().ok_or_else(|| {
        NestedTensorError::Serialization("missing __metadata__ header".into())
    })?;
    let field = |key: &str| {
        metadata
            .get(key)
            .ok_or_else(|| NestedTensorError::Serialization(format!("missing metadata key {key:?}")))
    };
    let nested_size: SizeNode = serde_json::from_str(field(NESTED_SIZE_KEY)?)?;
    let dtype = parse_dtype(field(DTYPE_KEY)?)?;

    let tensors = SafeTensors::deserialize(data)?;
    let mut parts = Vec::new();
    for (path, dims) in nested_size.enumerate_leaves() {
        let key = path_key(&path);
        let view = tensors.tensor(&key)?;
        if view.shape() != dims.as_slice() {
            return Err(NestedTensorError::NestedSizeMismatch {
                expected: format!("{dims:?} for component {key}"),
                got: format!("{:?}", view.shape()),
            });
        }
        let stored = from_safetensors_dtype(view.dtype())?;
        if stored != dtype {
            return Err(NestedTensorError::Serialization(format!(
                "component {key} is {stored}, header says {dtype}"
            )));
        }
        parts.push(Buffer::from_le_bytes(dtype, view.data())?);
    }

    let buffer = if parts.is_empty() {
        Buffer::zeros(dtype, 0)
    } else {
        Buffer::concat(&parts.iter().collect::<Vec<_>>(), dtype)?
    };
    let numel = buffer.len();
    let nt = NestedTensor::from_buffer(Tensor::from_buffer(buffer, &[numel])?, nested_size)?;

    if let Some(expected) = metadata.get(NESTED_DIM_KEY) {
        if expected != &nt.nested_dim().to_string() {
            return Err(NestedTensorError::Serialization(format!(
                "nested_dim {} does not match header value {expected}",
                nt.nested_dim()
            )));
        }
    }
    Ok(nt)
}

pub fn save(path: impl AsRef<Path>, nt: &NestedTensor) -> Result<()> {
    let bytes = to_bytes(nt)?;
    std::fs::write(path.as_ref(), bytes)?;
    log::debug!("saved NestedTensor ({} components) to {}", nt.components().len(), path.as_ref().display());
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<NestedTensor> {
    let data = std::fs::read(path.as_ref())?;
    from_bytes(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NestedNode;

    #[test]
    fn test_bytes_round_trip_keeps_structure() {
        let nt = NestedTensor::from_structure(NestedNode::list(vec![
            NestedNode::from_leaves(vec![Tensor::arange(0.0, 6.0, 1.0).unwrap().reshape(&[2, 3]).unwrap()]),
            NestedNode::list(vec![]),
            NestedNode::from_leaves(vec![Tensor::full(&[1, 3], 7.0), Tensor::zeros(&[0, 3], DType::F32)]),
        ]))
        .unwrap();
        let back = from_bytes(&to_bytes(&nt).unwrap()).unwrap();
        assert!(back.is_contiguous());
        assert_eq!(back.nested_size(), nt.nested_size());
        assert_eq!(back.nested_dim(), 2);
        assert_eq!(back.components()[0].to_f32_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(back.components()[1].to_f32_vec().unwrap(), vec![7.0; 3]);
    }

    #[test]
    fn test_round_trip_other_dtype() {
        let nt = NestedTensor::from_tensors(vec![Tensor::from_f32(&[1.5, -2.0], &[2])])
            .unwrap()
            .to(Some(DType::F64), None)
            .unwrap();
        let back = from_bytes(&to_bytes(&nt).unwrap()).unwrap();
        assert_eq!(back.dtype(), DType::F64);
        assert_eq!(back.components()[0].to_dtype(DType::F32).to_f32_vec().unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_rejects_foreign_file() {
        let data: Vec<u8> = [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = TensorView::new(Dtype::F32, vec![2], &data).unwrap();
        let bytes = safetensors::serialize(vec![("weight", &view)], &None).unwrap();
        assert!(matches!(from_bytes(&bytes), Err(NestedTensorError::Serialization(_))));
    }
}
