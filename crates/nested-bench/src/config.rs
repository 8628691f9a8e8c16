use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::harness::BenchOptions;

/// Benchmark settings. Every field has a default, so a JSON file only
/// needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default = "default_warmup")]
    pub warmup: usize,
    #[serde(default = "default_run_time_ms")]
    pub run_time_ms: u64,
    #[serde(default = "default_min_runs")]
    pub min_runs: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Multiplies every spatial size and row count; 1.0 runs the full shapes.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_num_tensors")]
    pub num_tensors: usize,
    #[serde(default = "default_min_rows")]
    pub min_rows: usize,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_cols")]
    pub cols: usize,
    #[serde(default = "default_bn_channels")]
    pub bn_channels: usize,
    #[serde(default = "default_bn_inputs")]
    pub bn_inputs: usize,
    #[serde(default = "default_bn_size")]
    pub bn_size: usize,
}

fn default_warmup() -> usize { 1 }
fn default_run_time_ms() -> u64 { 1000 }
fn default_min_runs() -> usize { 5 }
fn default_seed() -> u64 { 0 }
fn default_scale() -> f64 { 1.0 }
fn default_num_tensors() -> usize { 20 }
fn default_min_rows() -> usize { 100 }
fn default_max_rows() -> usize { 300 }
fn default_cols() -> usize { 2560 }
fn default_bn_channels() -> usize { 256 }
fn default_bn_inputs() -> usize { 8 }
fn default_bn_size() -> usize { 80 }

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            warmup: default_warmup(),
            run_time_ms: default_run_time_ms(),
            min_runs: default_min_runs(),
            seed: default_seed(),
            scale: default_scale(),
            num_tensors: default_num_tensors(),
            min_rows: default_min_rows(),
            max_rows: default_max_rows(),
            cols: default_cols(),
            bn_channels: default_bn_channels(),
            bn_inputs: default_bn_inputs(),
            bn_size: default_bn_size(),
        }
    }
}

impl BenchConfig {
    /// Parse a JSON object. Arrays are rejected even though serde would
    /// read them positionally.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        anyhow::ensure!(value.is_object(), "bench config must be a JSON object");
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.scale > 0.0 && self.scale.is_finite(), "scale must be positive, got {}", self.scale);
        anyhow::ensure!(self.min_runs >= 1, "min_runs must be at least 1");
        anyhow::ensure!(
            self.min_rows <= self.max_rows,
            "min_rows ({}) is larger than max_rows ({})",
            self.min_rows,
            self.max_rows
        );
        Ok(())
    }

    pub fn bench_options(&self) -> BenchOptions {
        BenchOptions {
            warmup: self.warmup,
            run_time: Duration::from_millis(self.run_time_ms),
            min_runs: self.min_runs,
        }
    }

    /// `n` multiplied by `scale`, never below 1.
    pub fn scaled(&self, n: usize) -> usize {
        ((n as f64 * self.scale).round() as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(BenchConfig::from_json("{}").unwrap(), BenchConfig::default());
    }

    #[test]
    fn test_partial_json() {
        let config = BenchConfig::from_json(r#"{"scale": 0.5, "min_runs": 2}"#).unwrap();
        assert_eq!(config.min_runs, 2);
        assert_eq!(config.cols, 2560);
        assert_eq!(config.scaled(300), 150);
        assert_eq!(config.scaled(1), 1);
        assert_eq!(config.bench_options().run_time, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values() {
        assert!(BenchConfig::from_json(r#"{"scale": 0.0}"#).is_err());
        assert!(BenchConfig::from_json(r#"{"min_rows": 400}"#).is_err());
        assert!(BenchConfig::from_json("[1, 2]").is_err());
        assert!(BenchConfig::from_json("{\"warmup\": ").is_err());
        assert!(BenchConfig::from_json(r#"{"warmup": "two"}"#).is_err());
    }
}
