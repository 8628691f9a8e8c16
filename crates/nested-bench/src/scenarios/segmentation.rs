//! ReLU over a batch of differently sized images, the first layer of a
//! segmentation model.

use std::hint::black_box;

use nested_core::{functional, Tensor};
use nestedtensor::{nested_tensor, CreationOptions};
use rand::Rng;

use super::Scenario;
use crate::config::BenchConfig;

const IMAGE_SIZES: [(usize, usize); 6] = [(500, 600), (500, 600), (128, 128), (500, 600), (500, 600), (128, 128)];

/// Six three-channel images with the height and width scaled.
pub fn inputs<R: Rng + ?Sized>(config: &BenchConfig, rng: &mut R) -> Vec<Tensor> {
    IMAGE_SIZES
        .iter()
        .map(|&(h, w)| Tensor::randn_with(&[3, config.scaled(h), config.scaled(w)], rng))
        .collect()
}

/// Only the first two inputs go through the loop.
pub fn relu_tensor(inputs: &[Tensor]) -> Scenario {
    let inputs = inputs.to_vec();
    Scenario::new("relu_tensor", move || {
        for t in inputs.iter().take(2) {
            black_box(functional::relu(&t.unsqueeze(0)?)?.squeeze(Some(0))?);
        }
        Ok(())
    })
}

/// Packing into a NestedTensor is part of the timed work.
pub fn relu_nt_contiguous(inputs: &[Tensor]) -> Scenario {
    let inputs = inputs.to_vec();
    Scenario::new("relu_nt_contiguous", move || {
        let nt = nested_tensor(inputs.clone(), &CreationOptions::new())?;
        black_box(nt.relu()?);
        Ok(())
    })
}
