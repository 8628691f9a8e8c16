use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use nested_bench::{benchmark_fn, scenarios, BenchConfig, Suite};

#[derive(Parser)]
#[command(name = "nested-bench", about = "Time NestedTensor ops against looped and flattened tensor ops")]
struct Cli {
    /// Which comparison to run
    #[arg(value_enum, default_value = "all")]
    suite: SuiteArg,

    /// JSON file with benchmark settings; the flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Untimed calls before measuring
    #[arg(long)]
    warmup: Option<usize>,

    /// Minimum measuring time per scenario in milliseconds
    #[arg(long)]
    run_time_ms: Option<u64>,

    /// Minimum timed calls per scenario
    #[arg(long)]
    min_runs: Option<usize>,

    /// Seed for the random inputs
    #[arg(long)]
    seed: Option<u64>,

    /// Multiply input sizes by this factor (e.g. 0.1 for a quick run)
    #[arg(long)]
    scale: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SuiteArg {
    Binary,
    Unary,
    Segmentation,
    Batchnorm,
    All,
}

impl SuiteArg {
    fn suites(self) -> Vec<Suite> {
        match self {
            SuiteArg::Binary => vec![Suite::Binary],
            SuiteArg::Unary => vec![Suite::Unary],
            SuiteArg::Segmentation => vec![Suite::Segmentation],
            SuiteArg::Batchnorm => vec![Suite::BatchNorm],
            SuiteArg::All => Suite::ALL.to_vec(),
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BenchConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            BenchConfig::from_json(&text).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => BenchConfig::default(),
    };
    if let Some(v) = cli.warmup {
        config.warmup = v;
    }
    if let Some(v) = cli.run_time_ms {
        config.run_time_ms = v;
    }
    if let Some(v) = cli.min_runs {
        config.min_runs = v;
    }
    if let Some(v) = cli.seed {
        config.seed = v;
    }
    if let Some(v) = cli.scale {
        config.scale = v;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    log::info!("config: {}", serde_json::to_string(&config)?);

    let options = config.bench_options();
    for suite in cli.suite.suites() {
        println!("== {suite} ==");
        for mut scenario in scenarios::build(suite, &config)? {
            let name = scenario.name;
            let result = benchmark_fn(name, || scenario.run(), &options)
                .with_context(|| format!("{suite}/{name} failed"))?;
            println!("{result}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nested-bench").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, r#"{"min_runs": 3, "seed": 7, "cols": 64}"#).unwrap();
        let path = path.to_str().unwrap();

        let config = load_config(&parse(&["unary", "--config", path, "--min-runs", "9"])).unwrap();
        assert_eq!(config.min_runs, 9);
        assert_eq!(config.seed, 7);
        assert_eq!(config.cols, 64);
        assert_eq!(config.warmup, 1);

        let config = load_config(&parse(&["--config", path])).unwrap();
        assert_eq!(config.min_runs, 3);
    }

    #[test]
    fn test_invalid_merged_config_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, r#"{"scale": 0.5}"#).unwrap();
        let path = path.to_str().unwrap();
        assert!(load_config(&parse(&["--config", path, "--scale", "0"])).is_err());
        assert!(load_config(&parse(&["--min-runs", "0"])).is_err());

        let missing = dir.path().join("missing.json");
        assert!(load_config(&parse(&["--config", missing.to_str().unwrap()])).is_err());
    }

    #[test]
    fn test_suite_selection() {
        assert_eq!(parse(&[]).suite.suites(), Suite::ALL.to_vec());
        assert_eq!(parse(&["batchnorm"]).suite.suites(), vec![Suite::BatchNorm]);
    }
}
