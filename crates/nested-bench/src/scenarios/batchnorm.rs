//! Eval-mode `BatchNorm2d`: once over a NestedTensor, once in a loop with
//! each input as a batch of one.

use std::hint::black_box;

use nested_core::nn::BatchNorm2d;
use nested_core::{Module, Tensor};
use nestedtensor::{as_nested_tensor, CreationOptions, NestedModule};
use rand::Rng;

use super::Scenario;
use crate::config::BenchConfig;

const EPS: f32 = 1e-5;
const MOMENTUM: f32 = 0.1;

/// `bn_inputs` tensors of `[bn_channels, size, size]`.
pub fn inputs<R: Rng + ?Sized>(config: &BenchConfig, rng: &mut R) -> Vec<Tensor> {
    let size = config.scaled(config.bn_size);
    (0..config.bn_inputs)
        .map(|_| Tensor::randn_with(&[config.bn_channels, size, size], rng))
        .collect()
}

fn eval_layer(channels: usize) -> BatchNorm2d {
    let mut bn = BatchNorm2d::new(channels, EPS, MOMENTUM);
    bn.eval();
    bn
}

/// Packing happens once up front; only the layer call is timed.
pub fn gen_bn_nested(inputs: &[Tensor], channels: usize) -> anyhow::Result<Scenario> {
    let nt = as_nested_tensor(inputs.to_vec(), &CreationOptions::new())?;
    let bn = eval_layer(channels);
    Ok(Scenario::new("bn_nested", move || {
        black_box(bn.forward_nested(&nt)?);
        Ok(())
    }))
}

pub fn gen_bn_loop(inputs: &[Tensor], channels: usize) -> Scenario {
    let inputs = inputs.to_vec();
    let bn = eval_layer(channels);
    Scenario::new("bn_loop", move || {
        for t in &inputs {
            black_box(bn.forward(&t.unsqueeze(0)?)?.squeeze(Some(0))?);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_input_is_packed_before_timing() {
        let ragged = vec![Tensor::randn(&[2, 3, 3]), Tensor::randn(&[2, 3])];
        assert!(gen_bn_nested(&ragged, 2).is_err());

        let inputs = vec![Tensor::randn(&[2, 3, 3]), Tensor::randn(&[2, 4, 2])];
        let mut scenario = gen_bn_nested(&inputs, 2).unwrap();
        scenario.run().unwrap();
        gen_bn_loop(&inputs, 2).run().unwrap();
    }
}
