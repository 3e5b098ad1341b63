//! Strata - portfolio allocation and long-horizon risk simulation.
//!
//! # Overview
//!
//! Strata estimates portfolio weights under several objectives and projects
//! their long-horizon return distribution by simulating asset prices:
//!
//! - **Allocation strategies**: maximum Sharpe, minimum volatility, risk parity
//!   and hierarchical risk parity, addressed by name
//! - **Volatility models**: GARCH(1,1) with Student's-t innovations, fit per
//!   instrument by maximum likelihood
//! - **Monte Carlo simulation**: reproducible, seeded price paths, independent
//!   or coupled through a Gaussian copula
//! - **Risk statistics**: percentiles, CVaR, shortfall and large-loss
//!   probabilities of the simulated annual returns
//! - **Historical analytics**: cumulative returns, Sharpe, drawdown and
//!   crisis-window stress returns
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use strata::data::{CsvMarketData, RiskFreeSource, StaticAllocations};
//! use strata::engine::{Engine, RunConfig};
//! use strata::monte_carlo::SimulationConfig;
//!
//! let provider = CsvMarketData::from_path("data/prices.csv", RiskFreeSource::Fixed(0.03)).unwrap();
//! let config = RunConfig::new(vec!["SPY".to_string(), "AGG".to_string()])
//!     .with_simulation(SimulationConfig::default().with_paths(500));
//!
//! let report = Engine::new(provider, config).run(&StaticAllocations::new()).unwrap();
//! for (name, stats) in report.statistics.iter() {
//!     println!("{}: mean {:.2}%, CVaR {:.2}%", name, stats.mean_annual_return * 100.0, stats.cvar * 100.0);
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Price matrices, weight vectors and strategy weight tables
//! - [`returns`]: Daily returns, annualized covariance and correlation
//! - [`strategies`]: Allocation strategies and their dispatcher
//! - [`volatility`]: GARCH(1,1)-t estimation
//! - [`copula`]: Gaussian copula over standardized residuals
//! - [`monte_carlo`]: Price path simulation
//! - [`analytics`]: Simulated risk statistics and historical performance
//! - [`stress`]: Historical crisis windows
//! - [`data`]: Market data providers and reference allocations
//! - [`engine`]: End-to-end runs producing a [`Report`]
//! - [`export`]: CSV/JSON export and terminal tables
//! - [`config`]: TOML configuration file support

pub mod analytics;
pub mod config;
pub mod copula;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod monte_carlo;
pub mod returns;
pub mod strategies;
pub mod stress;
pub mod types;
pub mod volatility;

// Re-exports for convenience
pub use analytics::{
    HistoricalPerformance, PerformanceMetrics, PortfolioStatistics, StatisticsAggregator,
    StatisticsTable,
};
pub use data::{
    normalize_allocation, AllocationSource, CachedMarketData, CsvMarketData, MarketData,
    MarketDataProvider, RiskFreeSource, StaticAllocations,
};
pub use engine::{Engine, Report, RunConfig};
pub use error::{Result, StrataError};
pub use monte_carlo::{DependenceModel, PathSimulator, SimulatedPriceCube, SimulationConfig};
pub use returns::ReturnsCovariance;
pub use strategies::{OptimizationConfig, OptimizationEngine, Strategy};
pub use stress::{CrisisEvent, StressTable};
pub use types::{CleanPrices, PriceMatrix, StrategyWeights, WeightVector};
pub use volatility::{GarchFit, VolatilityModel, VolatilityModelParams};
