//! Wall-clock timing loop.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchOptions {
    /// Untimed calls before measuring.
    pub warmup: usize,
    /// Keep measuring until this much time has been spent.
    pub run_time: Duration,
    /// Keep measuring until this many calls have been timed.
    pub min_runs: usize,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self { warmup: 1, run_time: Duration::from_secs(1), min_runs: 5 }
    }
}

/// Timings in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchResult {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub runs: usize,
}

impl BenchResult {
    fn from_samples(name: &str, samples: &[f64]) -> Self {
        let runs = samples.len();
        let mean = if runs == 0 { 0.0 } else { samples.iter().sum::<f64>() / runs as f64 };
        let std = if runs < 2 {
            0.0
        } else {
            let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (runs - 1) as f64;
            var.sqrt()
        };
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        Self {
            name: name.to_string(),
            mean,
            std,
            min: if runs == 0 { 0.0 } else { min },
            runs,
        }
    }
}

impl fmt::Display for BenchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: avg {:.2} us, std {:.2} us, min {:.2} us, runs {}",
            self.name, self.mean, self.std, self.min, self.runs
        )
    }
}

/// Time `f` until both `min_runs` and `run_time` are satisfied. The first
/// error from `f` aborts the measurement.
pub fn benchmark_fn<F>(name: &str, mut f: F, options: &BenchOptions) -> anyhow::Result<BenchResult>
where
    F: FnMut() -> anyhow::Result<()>,
{
    for _ in 0..options.warmup {
        f()?;
    }
    log::debug!("{name}: warmed up with {} calls", options.warmup);

    let mut samples = Vec::with_capacity(options.min_runs.max(1));
    let started = Instant::now();
    while samples.len() < options.min_runs || started.elapsed() < options.run_time {
        let t = Instant::now();
        f()?;
        samples.push(t.elapsed().as_secs_f64() * 1e6);
    }
    let result = BenchResult::from_samples(name, &samples);
    log::debug!("{name}: {} samples in {:.3}s", result.runs, started.elapsed().as_secs_f64());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_at_least_min_runs() {
        let mut calls = 0;
        let options = BenchOptions { warmup: 2, run_time: Duration::ZERO, min_runs: 7 };
        let result = benchmark_fn("count", || {
            calls += 1;
            Ok(())
        }, &options)
        .unwrap();
        assert_eq!(result.runs, 7);
        assert_eq!(calls, 9);
        assert!(result.min <= result.mean);
    }

    #[test]
    fn test_run_time_keeps_going() {
        let options = BenchOptions { warmup: 0, run_time: Duration::from_millis(20), min_runs: 1 };
        let result = benchmark_fn("sleep", || {
            std::thread::sleep(Duration::from_millis(2));
            Ok(())
        }, &options)
        .unwrap();
        assert!(result.runs > 1);
        assert!(result.min >= 2000.0);
    }

    #[test]
    fn test_error_stops_measurement() {
        let mut calls = 0;
        let err = benchmark_fn("fails", || {
            calls += 1;
            anyhow::ensure!(calls < 3, "boom");
            Ok(())
        }, &BenchOptions::default());
        assert!(err.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_display_and_stats() {
        let result = BenchResult::from_samples("x", &[1.0, 2.0, 3.0]);
        assert_eq!(result.mean, 2.0);
        assert_eq!(result.std, 1.0);
        assert_eq!(result.to_string(), "x: avg 2.00 us, std 1.00 us, min 1.00 us, runs 3");
    }
}
