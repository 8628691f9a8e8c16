//! Running the dense layers over NestedTensors.

use nested_core::nn::{BatchNorm2d, Conv2d, Dropout, LayerNorm, Linear, MaxPool2d, ReLU};
use nested_core::Module;

use crate::error::NestedTensorError;
use crate::nested::NestedTensor;
use crate::Result;

/// A layer that can consume a NestedTensor.
///
/// The default treats every component as a batch of one:
/// `unsqueeze(0)`, `forward`, `squeeze(0)`.
pub trait NestedModule: Module {
    fn forward_nested(&self, input: &NestedTensor) -> Result<NestedTensor> {
        input.map_components(|t| self.forward(&t.unsqueeze(0)?)?.squeeze(Some(0)))
    }
}

impl NestedModule for Conv2d {
    fn forward_nested(&self, input: &NestedTensor) -> Result<NestedTensor> {
        input.conv2d(&self.weight, self.bias.as_ref(), self.params)
    }
}

impl NestedModule for BatchNorm2d {
    fn forward_nested(&self, input: &NestedTensor) -> Result<NestedTensor> {
        if !input.is_empty() && input.tensor_dim() != 3 {
            return Err(NestedTensorError::InvalidArgument(format!(
                "BatchNorm2d: expected [C, H, W] components, got tensor_dim {}",
                input.tensor_dim()
            )));
        }
        let training = self.is_training();
        self.with_running_stats(|stats| {
            input.batch_norm(
                Some(stats),
                Some(&self.weight),
                Some(&self.bias),
                training,
                self.momentum(),
                self.eps(),
            )
        })
    }
}

impl NestedModule for Dropout {}

impl NestedModule for Linear {}

impl NestedModule for ReLU {
    fn forward_nested(&self, input: &NestedTensor) -> Result<NestedTensor> {
        input.relu()
    }
}

impl NestedModule for MaxPool2d {
    fn forward_nested(&self, input: &NestedTensor) -> Result<NestedTensor> {
        input.max_pool2d(self.params)
    }
}

impl NestedModule for LayerNorm {
    fn forward_nested(&self, input: &NestedTensor) -> Result<NestedTensor> {
        input.layer_norm(self.normalized_shape(), Some(&self.weight), Some(&self.bias), self.eps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nested_core::functional::{Conv2dParams, Pool2dParams};
    use nested_core::Tensor;

    fn images() -> NestedTensor {
        NestedTensor::from_tensors(vec![Tensor::randn(&[3, 8, 8]), Tensor::randn(&[3, 5, 6])])
            .unwrap()
            .contiguous()
            .unwrap()
    }

    #[test]
    fn test_relu_keeps_packing() {
        let out = ReLU.forward_nested(&images()).unwrap();
        assert!(out.is_contiguous());
        assert!(out.components().iter().all(|t| t.to_f32_vec().unwrap().iter().all(|&v| v >= 0.0)));
    }

    #[test]
    fn test_conv_then_pool() {
        let conv = Conv2d::new(3, 4, (3, 3), Conv2dParams { padding: (1, 1), ..Default::default() }, true).unwrap();
        let pool = MaxPool2d::new(Pool2dParams::new((2, 2)));
        let x = conv.forward_nested(&images()).unwrap();
        assert_eq!(x.components()[1].dims(), &[4, 5, 6]);
        let y = pool.forward_nested(&x).unwrap();
        assert_eq!(y.components()[0].dims(), &[4, 4, 4]);
        assert_eq!(y.components()[1].dims(), &[4, 2, 3]);
    }

    #[test]
    fn test_batchnorm_per_component_in_eval() {
        let mut bn = BatchNorm2d::new(3, 1e-5, 0.1);
        bn.eval();
        let input = images();
        let out = bn.forward_nested(&input).unwrap();
        let x = input.components()[1].to_f32_vec().unwrap();
        let y = out.components()[1].to_f32_vec().unwrap();
        assert!((y[7] - x[7] / (1.0f32 + 1e-5).sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_conv2d_matches_dense_layer() {
        let conv = Conv2d::new(3, 2, (3, 3), Conv2dParams::default(), true).unwrap();
        let input = images();
        let out = conv.forward_nested(&input).unwrap();
        for (dense, nested) in input.components().iter().zip(out.components()) {
            let reference = conv.forward(&dense.unsqueeze(0).unwrap()).unwrap().squeeze(Some(0)).unwrap();
            assert_eq!(reference.to_f32_vec().unwrap(), nested.to_f32_vec().unwrap());
        }
    }

    #[test]
    fn test_batchnorm_training_updates_layer_stats() {
        let nested_bn = BatchNorm2d::new(3, 1e-5, 0.1);
        let looped_bn = BatchNorm2d::new(3, 1e-5, 0.1);
        let input = images();
        let out = nested_bn.forward_nested(&input).unwrap();
        for (dense, nested) in input.components().iter().zip(out.components()) {
            let reference = looped_bn.forward(&dense.unsqueeze(0).unwrap()).unwrap().squeeze(Some(0)).unwrap();
            assert!(reference.allclose(nested, 1e-5, 1e-6).unwrap());
        }
        assert_eq!(nested_bn.running_stats(), looped_bn.running_stats());
        assert_ne!(nested_bn.running_stats(), BatchNorm2d::new(3, 1e-5, 0.1).running_stats());
    }

    #[test]
    fn test_batchnorm_rejects_non_image_components() {
        let bn = BatchNorm2d::new(3, 1e-5, 0.1);
        let nt = NestedTensor::from_tensors(vec![Tensor::randn(&[3, 4])]).unwrap();
        assert!(matches!(bn.forward_nested(&nt), Err(NestedTensorError::InvalidArgument(_))));
    }

    #[test]
    fn test_linear_and_layer_norm() {
        let nt = NestedTensor::from_tensors(vec![Tensor::randn(&[2, 4]), Tensor::randn(&[5, 4])]).unwrap();
        let lin = Linear::new(4, 6, true);
        let out = lin.forward_nested(&nt).unwrap();
        assert_eq!(out.components()[1].dims(), &[5, 6]);
        let ln = LayerNorm::new(&[6], 1e-5);
        let normed = ln.forward_nested(&out).unwrap();
        assert_eq!(normed.sizes(), vec![Some(2), None, Some(6)]);
    }
}
