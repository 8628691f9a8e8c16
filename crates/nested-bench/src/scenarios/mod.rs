//! Benchmark scenarios. Each generator builds its inputs up front and
//! returns a [`Scenario`] whose body is the work being timed.

pub mod batchnorm;
pub mod binary;
pub mod segmentation;
pub mod unary;

use std::fmt;

use nested_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BenchConfig;

pub type BenchBody = Box<dyn FnMut() -> anyhow::Result<()>>;

pub struct Scenario {
    pub name: &'static str,
    body: BenchBody,
}

impl Scenario {
    pub fn new(name: &'static str, body: impl FnMut() -> anyhow::Result<()> + 'static) -> Self {
        Self { name, body: Box::new(body) }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        (self.body)()
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    Binary,
    Unary,
    Segmentation,
    BatchNorm,
}

impl Suite {
    pub const ALL: [Suite; 4] = [Suite::Binary, Suite::Unary, Suite::Segmentation, Suite::BatchNorm];
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Suite::Binary => "binary",
            Suite::Unary => "unary",
            Suite::Segmentation => "segmentation",
            Suite::BatchNorm => "batchnorm",
        };
        f.write_str(name)
    }
}

/// Row counts for the ragged components: `num_tensors` draws from
/// `[min_rows, max_rows]`, then scaled.
pub fn rand_ints<R: Rng + ?Sized>(config: &BenchConfig, rng: &mut R) -> Vec<usize> {
    (0..config.num_tensors)
        .map(|_| config.scaled(rng.gen_range(config.min_rows..=config.max_rows)))
        .collect()
}

/// One uniform `[rows, cols]` tensor per entry of `rows`.
pub fn ragged_tensors<R: Rng + ?Sized>(rows: &[usize], cols: usize, rng: &mut R) -> Vec<Tensor> {
    rows.iter().map(|&r| Tensor::rand_with(&[r, cols], rng)).collect()
}

/// Build every scenario of `suite`. Inputs are drawn from a generator
/// seeded with `config.seed`, so two runs time the same data.
pub fn build(suite: Suite, config: &BenchConfig) -> anyhow::Result<Vec<Scenario>> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let scenarios = match suite {
        Suite::Binary | Suite::Unary => {
            let rows = rand_ints(config, &mut rng);
            let cols = config.scaled(config.cols);
            let tensors = ragged_tensors(&rows, cols, &mut rng);
            log::info!("{suite}: {} components, {} rows total", tensors.len(), rows.iter().sum::<usize>());
            if suite == Suite::Binary {
                let others = ragged_tensors(&rows, cols, &mut rng);
                vec![
                    binary::gen_t_mul(&tensors, &others)?,
                    binary::gen_t_loop_mul(&tensors, &others),
                    binary::gen_nt_mul(&tensors, &others)?,
                ]
            } else {
                vec![
                    unary::gen_t_cos(&tensors)?,
                    unary::gen_t_loop_cos(&tensors),
                    unary::gen_nt_cos(&tensors)?,
                ]
            }
        }
        Suite::Segmentation => {
            let inputs = segmentation::inputs(config, &mut rng);
            vec![segmentation::relu_tensor(&inputs), segmentation::relu_nt_contiguous(&inputs)]
        }
        Suite::BatchNorm => {
            let inputs = batchnorm::inputs(config, &mut rng);
            vec![
                batchnorm::gen_bn_nested(&inputs, config.bn_channels)?,
                batchnorm::gen_bn_loop(&inputs, config.bn_channels),
            ]
        }
    };
    Ok(scenarios)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> BenchConfig {
        BenchConfig {
            scale: 0.02,
            num_tensors: 4,
            bn_channels: 4,
            bn_inputs: 2,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn test_rand_ints_in_range() {
        let config = BenchConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let rows = rand_ints(&config, &mut rng);
        assert_eq!(rows.len(), 20);
        assert!(rows.iter().all(|r| (100..=300).contains(r)));
    }

    #[test]
    fn test_same_seed_same_inputs() {
        let config = tiny();
        let a = rand_ints(&config, &mut StdRng::seed_from_u64(config.seed));
        let b = rand_ints(&config, &mut StdRng::seed_from_u64(config.seed));
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_suite_runs() {
        let config = tiny();
        for suite in Suite::ALL {
            let scenarios = build(suite, &config).unwrap();
            assert!(scenarios.len() >= 2, "{suite}");
            for mut scenario in scenarios {
                scenario.run().unwrap();
                scenario.run().unwrap();
            }
        }
    }

    #[test]
    fn test_binary_operands_are_independent() {
        let config = tiny();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let rows = rand_ints(&config, &mut rng);
        let lhs = ragged_tensors(&rows, 8, &mut rng);
        let rhs = ragged_tensors(&rows, 8, &mut rng);
        for (a, b) in lhs.iter().zip(&rhs) {
            assert_eq!(a.dims(), b.dims());
            assert_ne!(a.to_f32_vec().unwrap(), b.to_f32_vec().unwrap());
        }
    }

    #[test]
    fn test_bad_config_rejected() {
        let config = BenchConfig { scale: -1.0, ..BenchConfig::default() };
        assert!(build(Suite::Binary, &config).is_err());
    }
}
