//! End-to-end run: prices in, report out.
//!
//! Data flows through the engine as
//! prices → returns/covariance → strategy weights, and
//! prices → volatility fits → simulated cube → statistics per weight vector.
//! Historical performance and stress windows are computed on the side.

use crate::analytics::{HistoricalPerformance, PerformanceMetrics, StatisticsAggregator, StatisticsTable};
use crate::data::{normalize_allocation, AllocationSource, MarketData, MarketDataProvider};
use crate::error::Result;
use crate::monte_carlo::{PathSimulator, SimulationConfig};
use crate::returns::ReturnsCovariance;
use crate::strategies::{OptimizationConfig, OptimizationEngine, Strategy};
use crate::stress::{default_crisis_events, stress_test, CrisisEvent, StressTable};
use crate::types::StrategyWeights;
use crate::volatility::{GarchFitConfig, VolatilityModel, VolatilityModelParams};
use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::{info, warn};

/// Everything a run needs besides the data.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub instruments: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub strategies: Vec<Strategy>,
    pub optimization: OptimizationConfig,
    pub garch: GarchFitConfig,
    pub simulation: SimulationConfig,
    pub aggregator: StatisticsAggregator,
    /// Empty disables the stress table.
    pub stress_events: Vec<CrisisEvent>,
}

impl RunConfig {
    /// Defaults for the given instruments over all available dates.
    pub fn new(instruments: Vec<String>) -> Self {
        Self {
            instruments,
            start: NaiveDate::MIN,
            end: NaiveDate::MAX,
            strategies: Strategy::ALL.to_vec(),
            optimization: OptimizationConfig::default(),
            garch: GarchFitConfig::default(),
            simulation: SimulationConfig::default(),
            aggregator: StatisticsAggregator::default(),
            stress_events: default_crisis_events(),
        }
    }

    pub fn with_dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.optimization.risk_free_rate = Some(rate);
        self
    }

    pub fn without_stress(mut self) -> Self {
        self.stress_events.clear();
        self
    }
}

/// Results of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub instruments: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Price rows left after cleaning.
    pub observations: usize,
    pub risk_free_rate: f64,
    pub simulation: SimulationConfig,
    /// Optimized strategies first, then reference portfolios.
    pub weights: StrategyWeights,
    pub statistics: StatisticsTable,
    #[serde(serialize_with = "ordered_map")]
    pub performance: Vec<(String, PerformanceMetrics)>,
    #[serde(serialize_with = "ordered_map")]
    pub volatility_models: Vec<(String, VolatilityModelParams)>,
    pub stress: StressTable,
}

impl Report {
    pub fn performance_of(&self, name: &str) -> Option<&PerformanceMetrics> {
        self.performance.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }
}

fn ordered_map<S: Serializer, V: Serialize>(
    entries: &[(String, V)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (k, v) in entries {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

/// Runs the full analysis against a market data provider.
pub struct Engine<P> {
    provider: P,
    config: RunConfig,
}

impl<P: MarketDataProvider> Engine<P> {
    pub fn new(provider: P, config: RunConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Fetch the configured window and run.
    pub fn run(&self, allocations: &dyn AllocationSource) -> Result<Report> {
        let market = self
            .provider
            .fetch(&self.config.instruments, self.config.start, self.config.end)?;
        self.run_on(market, allocations)
    }

    /// Run on already fetched market data.
    pub fn run_on(&self, market: MarketData, allocations: &dyn AllocationSource) -> Result<Report> {
        let config = &self.config;
        let clean = market.prices.clean()?;
        info!(
            "Running {} strategies on {} instruments, {} rows ({} to {})",
            config.strategies.len(),
            clean.instruments.len(),
            clean.len(),
            clean.dates[0],
            clean.dates[clean.len() - 1]
        );

        let returns = ReturnsCovariance::from_clean(&clean)?;
        let engine = OptimizationEngine::from_returns(returns.clone(), market.risk_free_rate)
            .with_config(config.optimization.clone());
        let risk_free_rate = engine.risk_free_rate();

        let mut weights = engine.optimize_all(&config.strategies)?;
        for name in allocations.names() {
            if weights.get(&name).is_some() {
                warn!("Reference portfolio {} replaces the strategy of the same name", name);
            }
            let raw = allocations.allocation(&name)?;
            weights.insert(name, normalize_allocation(&raw, &clean.instruments)?);
        }

        let model = VolatilityModel::new(config.garch.clone());
        let simulator = PathSimulator::new(config.simulation.clone());
        let (cube, fits) = simulator.simulate_prices(&clean, &model)?;
        let statistics = config.aggregator.aggregate(&cube, &weights)?;

        let histories = weights
            .iter()
            .map(|(name, w)| {
                HistoricalPerformance::compute(&returns, w, risk_free_rate)
                    .map(|h| (name.to_string(), h))
            })
            .collect::<Result<Vec<_>>>()?;
        let stress = stress_test(&histories, &config.stress_events);

        Ok(Report {
            instruments: clean.instruments.clone(),
            start: clean.dates[0],
            end: clean.dates[clean.len() - 1],
            observations: clean.len(),
            risk_free_rate,
            simulation: config.simulation.clone(),
            weights,
            statistics,
            performance: histories
                .into_iter()
                .map(|(name, h)| (name, h.metrics))
                .collect(),
            volatility_models: clean
                .instruments
                .iter()
                .cloned()
                .zip(fits.into_iter().map(|f| f.params))
                .collect(),
            stress,
        })
    }
}
