//! Portfolio allocation strategies.
//!
//! Four strategies, each turning a price matrix into a [`WeightVector`]:
//!
//! - [`Strategy::MaxSharpe`]: tangency portfolio, long-only
//! - [`Strategy::MinVolatility`]: global minimum variance, long-only
//! - [`Strategy::RiskParity`]: equal risk contribution (SQP)
//! - [`Strategy::HierarchicalRiskParity`]: clustering + recursive bisection
//!
//! Strategies are addressed by name through [`OptimizationEngine`]; results
//! are keyed by the strategy's own name.

mod hrp;
mod mean_variance;
mod qp;
mod risk_parity;

pub use hrp::{quasi_diagonal_order, HierarchicalRiskParityOptimizer, Merge};
pub use mean_variance::MeanVarianceOptimizer;
pub use qp::QuadraticProgram;
pub use risk_parity::{RiskParityConfig, RiskParityOptimizer};

use crate::error::{Result, StrataError};
use crate::returns::ReturnsCovariance;
use crate::types::{PriceMatrix, StrategyWeights, WeightVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Allocation strategy identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    MaxSharpe,
    MinVolatility,
    RiskParity,
    HierarchicalRiskParity,
}

impl Strategy {
    /// Every strategy, in reporting order.
    pub const ALL: [Strategy; 4] = [
        Strategy::MaxSharpe,
        Strategy::MinVolatility,
        Strategy::RiskParity,
        Strategy::HierarchicalRiskParity,
    ];

    /// Name used for dispatch and for keying results.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::MaxSharpe => "max_sharpe",
            Strategy::MinVolatility => "min_volatility",
            Strategy::RiskParity => "risk_parity",
            Strategy::HierarchicalRiskParity => "hierarchical_risk_parity",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Strategy::MaxSharpe => "Maximize (return - risk-free rate) / volatility",
            Strategy::MinVolatility => "Minimize portfolio volatility",
            Strategy::RiskParity => "Equalize each instrument's contribution to portfolio risk",
            Strategy::HierarchicalRiskParity => {
                "Cluster by correlation, split risk recursively between clusters"
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        Strategy::ALL
            .iter()
            .find(|strategy| strategy.name() == s)
            .copied()
            .ok_or_else(|| StrataError::UnknownStrategy(s.to_string()))
    }
}

/// Solver settings shared by the strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Annualized risk-free rate for the Sharpe objective. When `None`, the
    /// rate supplied by the market data provider is used.
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    /// Interior-point iteration cap for each Clarabel solve.
    #[serde(default = "default_solver_max_iter")]
    pub solver_max_iter: u32,
    #[serde(default)]
    pub risk_parity: RiskParityConfig,
}

fn default_solver_max_iter() -> u32 {
    200
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: None,
            solver_max_iter: default_solver_max_iter(),
            risk_parity: RiskParityConfig::default(),
        }
    }
}

/// Runs allocation strategies against one set of return estimates.
#[derive(Debug, Clone)]
pub struct OptimizationEngine {
    returns: ReturnsCovariance,
    risk_free_rate: f64,
    config: OptimizationConfig,
}

impl OptimizationEngine {
    /// Estimate returns and covariance from prices.
    pub fn new(prices: &PriceMatrix, risk_free_rate: f64) -> Result<Self> {
        Ok(Self::from_returns(
            ReturnsCovariance::from_prices(prices)?,
            risk_free_rate,
        ))
    }

    pub fn from_returns(returns: ReturnsCovariance, risk_free_rate: f64) -> Self {
        Self {
            returns,
            risk_free_rate,
            config: OptimizationConfig::default(),
        }
    }

    /// Apply solver settings. An explicit rate in the config overrides the
    /// engine's risk-free rate.
    pub fn with_config(mut self, config: OptimizationConfig) -> Self {
        if let Some(rate) = config.risk_free_rate {
            self.risk_free_rate = rate;
        }
        self.config = config;
        self
    }

    pub fn returns(&self) -> &ReturnsCovariance {
        &self.returns
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    /// Weights for one strategy.
    pub fn optimize(&self, strategy: Strategy) -> Result<WeightVector> {
        let weights = match strategy {
            Strategy::MaxSharpe => {
                MeanVarianceOptimizer::from_returns(&self.returns, self.risk_free_rate)?
                    .with_max_iter(self.config.solver_max_iter)
                    .maximum_sharpe_ratio()?
            }
            Strategy::MinVolatility => {
                let optimizer =
                    MeanVarianceOptimizer::from_returns(&self.returns, self.risk_free_rate)?
                        .with_max_iter(self.config.solver_max_iter);
                optimizer.ensure_nonsingular()?;
                optimizer.minimum_variance()?
            }
            Strategy::RiskParity => {
                RiskParityOptimizer::from_returns(&self.returns, self.config.risk_parity.clone())?
                    .with_solver_max_iter(self.config.solver_max_iter)
                    .optimize()?
            }
            Strategy::HierarchicalRiskParity => {
                HierarchicalRiskParityOptimizer::from_returns(&self.returns)?.optimize()?
            }
        };

        debug!("{} weights: {:?}", strategy, weights);
        WeightVector::from_slices(&self.returns.instruments, &weights)
    }

    /// Weights for a strategy given by name.
    pub fn optimize_named(&self, name: &str) -> Result<WeightVector> {
        self.optimize(name.parse()?)
    }

    /// Run several strategies in parallel. The first failure is returned.
    pub fn optimize_all(&self, strategies: &[Strategy]) -> Result<StrategyWeights> {
        info!(
            "Optimizing {} strategies over {} instruments",
            strategies.len(),
            self.returns.n_instruments()
        );

        let results: Vec<(Strategy, WeightVector)> = strategies
            .par_iter()
            .map(|&s| self.optimize(s).map(|w| (s, w)))
            .collect::<Result<_>>()?;

        let mut table = StrategyWeights::new();
        for (strategy, weights) in results {
            table.insert(strategy.name(), weights);
        }
        Ok(table)
    }

    /// Run strategies given by name; any unknown name fails before solving.
    pub fn optimize_all_named<S: AsRef<str>>(&self, names: &[S]) -> Result<StrategyWeights> {
        let strategies = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<Strategy>>>()?;
        self.optimize_all(&strategies)
    }
}

/// Maximum Sharpe ratio weights.
pub fn max_sharpe(prices: &PriceMatrix, risk_free_rate: f64) -> Result<WeightVector> {
    OptimizationEngine::new(prices, risk_free_rate)?.optimize(Strategy::MaxSharpe)
}

/// Minimum volatility weights.
pub fn min_volatility(prices: &PriceMatrix) -> Result<WeightVector> {
    OptimizationEngine::new(prices, 0.0)?.optimize(Strategy::MinVolatility)
}

/// Equal risk contribution weights.
pub fn risk_parity(prices: &PriceMatrix) -> Result<WeightVector> {
    OptimizationEngine::new(prices, 0.0)?.optimize(Strategy::RiskParity)
}

/// Hierarchical risk parity weights.
pub fn hierarchical_risk_parity(prices: &PriceMatrix) -> Result<WeightVector> {
    OptimizationEngine::new(prices, 0.0)?.optimize(Strategy::HierarchicalRiskParity)
}

/// Dispatch by strategy name.
pub fn optimize(name: &str, prices: &PriceMatrix, risk_free_rate: f64) -> Result<WeightVector> {
    let strategy: Strategy = name.parse()?;
    OptimizationEngine::new(prices, risk_free_rate)?.optimize(strategy)
}
