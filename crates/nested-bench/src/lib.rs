//! # nested-bench
//!
//! Micro-benchmarks comparing NestedTensor ops with the equivalent dense
//! work: one flat tensor holding every component, and a plain loop over
//! the components.
//!
//! ```rust,no_run
//! use nested_bench::{benchmark_fn, scenarios, BenchConfig, Suite};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = BenchConfig { scale: 0.1, ..BenchConfig::default() };
//! for mut scenario in scenarios::build(Suite::Unary, &config)? {
//!     let name = scenario.name;
//!     let result = benchmark_fn(name, || scenario.run(), &config.bench_options())?;
//!     println!("{result}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod harness;
pub mod scenarios;

pub use config::BenchConfig;
pub use harness::{benchmark_fn, BenchOptions, BenchResult};
pub use scenarios::{Scenario, Suite};
