//! Layers built on the functional kernels.

use std::sync::{Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::NestedCoreError;
use crate::functional::{self, Conv2dParams, Pool2dParams, RunningStats};
use crate::{Module, Result, Tensor};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        functional::relu(input)
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        Vec::new()
    }

    fn is_training(&self) -> bool {
        false
    }
}

/// Dropout with its own seeded generator.
pub struct Dropout {
    p: f64,
    training: bool,
    rng: Mutex<StdRng>,
}

impl Dropout {
    pub fn new(p: f64) -> Result<Self> {
        Self::with_seed(p, rand::random())
    }

    pub fn with_seed(p: f64, seed: u64) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(NestedCoreError::InvalidArgument(format!(
                "dropout probability has to be between 0 and 1, but got {p}"
            )));
        }
        Ok(Self {
            p,
            training: true,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    pub fn p(&self) -> f64 {
        self.p
    }
}

impl Module for Dropout {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        functional::dropout(input, self.p, self.training, &mut *lock(&self.rng))
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        Vec::new()
    }

    fn train(&mut self, mode: bool) {
        self.training = mode;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// 2-D convolution over `[N, C, H, W]`.
pub struct Conv2d {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
    pub params: Conv2dParams,
}

impl Conv2d {
    /// Uniform init in `±1/sqrt(fan_in)`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        params: Conv2dParams,
        bias: bool,
    ) -> Result<Self> {
        if params.groups == 0 || in_channels % params.groups != 0 || out_channels % params.groups != 0 {
            return Err(NestedCoreError::InvalidArgument(format!(
                "conv2d: {in_channels} in / {out_channels} out channels are not divisible by {} groups",
                params.groups
            )));
        }
        let fan_in = in_channels / params.groups * kernel_size.0 * kernel_size.1;
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        let weight = Tensor::rand_uniform(
            &[out_channels, in_channels / params.groups, kernel_size.0, kernel_size.1],
            -bound,
            bound,
        );
        let bias = bias.then(|| Tensor::rand_uniform(&[out_channels], -bound, bound));
        Ok(Self { weight, bias, params })
    }

    pub fn from_weights(weight: Tensor, bias: Option<Tensor>, params: Conv2dParams) -> Self {
        Self { weight, bias, params }
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        functional::conv2d(input, &self.weight, self.bias.as_ref(), self.params)
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        let mut out = vec![("weight", &self.weight)];
        if let Some(b) = &self.bias {
            out.push(("bias", b));
        }
        out
    }
}

pub struct MaxPool2d {
    pub params: Pool2dParams,
}

impl MaxPool2d {
    pub fn new(params: Pool2dParams) -> Self {
        Self { params }
    }
}

impl Module for MaxPool2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        functional::max_pool2d(input, self.params)
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        Vec::new()
    }
}

/// Batch norm over `[N, C, H, W]` with running statistics.
///
/// Running stats sit behind a mutex so `forward(&self)` can update them in
/// training mode.
pub struct BatchNorm2d {
    pub weight: Tensor,
    pub bias: Tensor,
    stats: Mutex<RunningStats>,
    num_features: usize,
    eps: f32,
    momentum: f32,
    training: bool,
}

impl BatchNorm2d {
    pub fn new(num_features: usize, eps: f32, momentum: f32) -> Self {
        Self {
            weight: Tensor::ones(&[num_features]),
            bias: Tensor::full(&[num_features], 0.0),
            stats: Mutex::new(RunningStats::new(num_features)),
            num_features,
            eps,
            momentum,
            training: true,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }

    pub fn running_stats(&self) -> RunningStats {
        lock(&self.stats).clone()
    }

    pub fn set_running_stats(&self, stats: RunningStats) -> Result<()> {
        if stats.mean.len() != self.num_features || stats.var.len() != self.num_features {
            return Err(NestedCoreError::ShapeMismatch {
                expected: vec![self.num_features],
                got: vec![stats.mean.len()],
            });
        }
        *lock(&self.stats) = stats;
        Ok(())
    }

    /// Run `f` with the running stats locked.
    pub fn with_running_stats<R>(&self, f: impl FnOnce(&mut RunningStats) -> R) -> R {
        f(&mut lock(&self.stats))
    }
}

impl Module for BatchNorm2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if input.ndim() != 4 {
            return Err(NestedCoreError::InvalidArgument(format!(
                "BatchNorm2d: expected 4-D input, got {}",
                input.shape()
            )));
        }
        let mut stats = lock(&self.stats);
        functional::batch_norm(
            input,
            Some(&mut *stats),
            Some(&self.weight),
            Some(&self.bias),
            self.training,
            self.momentum,
            self.eps,
        )
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }

    fn train(&mut self, mode: bool) {
        self.training = mode;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Tensor,
    normalized_shape: Vec<usize>,
    eps: f32,
}

impl LayerNorm {
    pub fn new(normalized_shape: &[usize], eps: f32) -> Self {
        Self {
            weight: Tensor::ones(normalized_shape),
            bias: Tensor::full(normalized_shape, 0.0),
            normalized_shape: normalized_shape.to_vec(),
            eps,
        }
    }

    pub fn normalized_shape(&self) -> &[usize] {
        &self.normalized_shape
    }

    pub fn eps(&self) -> f32 {
        self.eps
    }
}

impl Module for LayerNorm {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        functional::layer_norm(
            input,
            &self.normalized_shape,
            Some(&self.weight),
            Some(&self.bias),
            self.eps,
        )
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }
}

/// `y = x W^T + b` with `W` of shape `[out, in]`.
pub struct Linear {
    pub weight: Tensor,
    pub bias: Option<Tensor>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        Self {
            weight: Tensor::rand_uniform(&[out_features, in_features], -bound, bound),
            bias: bias.then(|| Tensor::rand_uniform(&[out_features], -bound, bound)),
        }
    }

    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> Self {
        Self { weight, bias }
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let y = input.matmul(&self.weight.t()?)?;
        match &self.bias {
            Some(b) => y.add(b),
            None => Ok(y),
        }
    }

    fn named_parameters(&self) -> Vec<(&str, &Tensor)> {
        let mut out = vec![("weight", &self.weight)];
        if let Some(b) = &self.bias {
            out.push(("bias", b));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batchnorm2d_train_then_eval() {
        let mut bn = BatchNorm2d::new(2, 1e-5, 0.1);
        let x = Tensor::randn(&[4, 2, 3, 3]);
        let y = bn.forward(&x).unwrap();
        assert_eq!(y.dims(), &[4, 2, 3, 3]);
        let after_train = bn.running_stats();
        assert_ne!(after_train, RunningStats::new(2));

        bn.eval();
        assert!(!bn.is_training());
        bn.forward(&x).unwrap();
        assert_eq!(bn.running_stats(), after_train);
        assert!(bn.forward(&Tensor::ones(&[2, 3, 3])).is_err());
    }

    #[test]
    fn test_dropout_eval_is_identity() {
        let mut d = Dropout::with_seed(0.9, 3).unwrap();
        d.eval();
        let x = Tensor::randn(&[16]);
        assert_eq!(d.forward(&x).unwrap().to_f32_vec().unwrap(), x.to_f32_vec().unwrap());
        assert!(Dropout::new(-0.1).is_err());
    }

    #[test]
    fn test_linear_and_state_dict() {
        let w = Tensor::from_f32(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
        let lin = Linear::from_weights(w, Some(Tensor::from_f32(&[0.0, 0.0, 1.0], &[3])));
        let y = lin.forward(&Tensor::from_f32(&[2.0, 3.0], &[1, 2])).unwrap();
        assert_eq!(y.to_f32_vec().unwrap(), vec![2.0, 3.0, 6.0]);
        let sd = lin.state_dict();
        assert!(sd.contains_key("weight") && sd.contains_key("bias"));
        assert_eq!(lin.parameters().len(), 2);
    }

    #[test]
    fn test_conv2d_layer_shapes() {
        let conv = Conv2d::new(3, 8, (3, 3), Conv2dParams { padding: (1, 1), ..Default::default() }, true).unwrap();
        let y = conv.forward(&Tensor::randn(&[1, 3, 5, 7])).unwrap();
        assert_eq!(y.dims(), &[1, 8, 5, 7]);
        assert!(Conv2d::new(3, 8, (3, 3), Conv2dParams { groups: 2, ..Default::default() }, false).is_err());
    }
}
