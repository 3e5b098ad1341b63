//! Configuration file support.
//!
//! A run (data source, strategies, simulation settings and reference
//! portfolios) can be described in one TOML file for reproducibility.

use crate::analytics::StatisticsAggregator;
use crate::data::{normalize_allocation, parse_date, RiskFreeSource, StaticAllocations};
use crate::engine::RunConfig;
use crate::error::{Result, StrataError};
use crate::monte_carlo::{DependenceModel, SimulationConfig};
use crate::strategies::{OptimizationConfig, RiskParityConfig, Strategy};
use crate::stress::{default_crisis_events, CrisisEvent};
use crate::types::WeightVector;
use crate::volatility::GarchFitConfig;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete run configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataFileConfig {
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub optimization: OptimizationSettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub stress: StressSettings,
    /// Reference portfolios simulated next to the optimized strategies.
    #[serde(default)]
    pub portfolios: Vec<PortfolioSettings>,
}

/// Data settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to the wide price CSV.
    pub path: Option<String>,
    /// Instrument columns to analyse.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Start date (YYYY-MM-DD format).
    #[serde(default)]
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    #[serde(default)]
    pub end_date: Option<String>,
    /// Fixed annual risk-free rate (decimal).
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    /// Yield column in percent; its window mean / 100 becomes the rate.
    #[serde(default)]
    pub risk_free_column: Option<String>,
    /// Renames applied to reference portfolio instruments.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl DataSettings {
    /// Requested date range; open ends span the whole file.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = match &self.start_date {
            Some(s) => parse_date(s)?,
            None => NaiveDate::MIN,
        };
        let end = match &self.end_date {
            Some(s) => parse_date(s)?,
            None => NaiveDate::MAX,
        };
        Ok((start, end))
    }

    pub fn risk_free_source(&self) -> RiskFreeSource {
        match &self.risk_free_column {
            Some(column) => RiskFreeSource::Column(column.clone()),
            None => RiskFreeSource::Fixed(self.risk_free_rate.unwrap_or(0.0)),
        }
    }
}

/// Strategy selection and solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationSettings {
    /// Strategy names, in reporting order.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
    #[serde(default = "default_solver_max_iter")]
    pub solver_max_iter: u32,
    #[serde(default)]
    pub risk_parity: RiskParityConfig,
}

fn default_strategies() -> Vec<String> {
    Strategy::ALL.iter().map(|s| s.name().to_string()).collect()
}

fn default_solver_max_iter() -> u32 {
    OptimizationConfig::default().solver_max_iter
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            solver_max_iter: default_solver_max_iter(),
            risk_parity: RiskParityConfig::default(),
        }
    }
}

impl OptimizationSettings {
    pub fn parsed_strategies(&self) -> Result<Vec<Strategy>> {
        self.strategies.iter().map(|s| s.parse()).collect()
    }
}

/// Simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    #[serde(default = "default_num_paths")]
    pub num_paths: usize,
    #[serde(default = "default_horizon_years")]
    pub horizon_years: usize,
    #[serde(default)]
    pub horizon_days: Option<usize>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// "independent" or "copula".
    #[serde(default)]
    pub dependence_model: DependenceModel,
    #[serde(default)]
    pub garch: GarchFitConfig,
    #[serde(default)]
    pub statistics: StatisticsAggregator,
}

fn default_num_paths() -> usize { 1000 }
fn default_horizon_years() -> usize { 10 }
fn default_seed() -> u64 { 42 }

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            num_paths: default_num_paths(),
            horizon_years: default_horizon_years(),
            horizon_days: None,
            seed: default_seed(),
            dependence_model: DependenceModel::default(),
            garch: GarchFitConfig::default(),
            statistics: StatisticsAggregator::default(),
        }
    }
}

impl SimulationSettings {
    pub fn to_simulation_config(&self) -> SimulationConfig {
        let config = SimulationConfig::default()
            .with_paths(self.num_paths)
            .with_horizon_years(self.horizon_years)
            .with_seed(self.seed)
            .with_dependence_model(self.dependence_model);
        match self.horizon_days {
            Some(days) => config.with_horizon_days(days),
            None => config,
        }
    }
}

/// Historical stress window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_crisis_events")]
    pub events: Vec<CrisisEvent>,
}

fn default_true() -> bool { true }

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            events: default_crisis_events(),
        }
    }
}

/// One named reference portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSettings {
    pub name: String,
    /// Instrument → weight in any positive scale (e.g. percent).
    pub weights: BTreeMap<String, f64>,
}

impl StrataFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: StrataFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StrataError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check the configuration without touching any data.
    pub fn validate(&self) -> Result<()> {
        if self.data.path.is_none() {
            return Err(StrataError::ConfigError("data.path is required".to_string()));
        }
        if self.data.instruments.is_empty() {
            return Err(StrataError::ConfigError(
                "data.instruments must name at least one instrument".to_string(),
            ));
        }
        if self.data.risk_free_rate.is_some() && self.data.risk_free_column.is_some() {
            return Err(StrataError::ConfigError(
                "Set either data.risk_free_rate or data.risk_free_column, not both".to_string(),
            ));
        }
        let (start, end) = self.data.date_range()?;
        if start > end {
            return Err(StrataError::ConfigError(format!(
                "Start date {} is after end date {}",
                start, end
            )));
        }
        self.optimization.parsed_strategies()?;
        if self.simulation.num_paths == 0 {
            return Err(StrataError::ConfigError(
                "simulation.num_paths must be positive".to_string(),
            ));
        }
        if self.simulation.to_simulation_config().horizon() == 0 {
            return Err(StrataError::ConfigError(
                "simulation horizon must be at least one trading day".to_string(),
            ));
        }
        let allocations = self.allocations();
        for portfolio in &self.portfolios {
            let raw = crate::data::AllocationSource::allocation(&allocations, &portfolio.name)?;
            let known: Vec<String> = raw.iter().map(|(name, _)| name.clone()).collect();
            normalize_allocation(&raw, &known)?;
        }
        Ok(())
    }

    /// Reference portfolios with instrument aliases applied.
    pub fn allocations(&self) -> StaticAllocations {
        let mut source = StaticAllocations::new().with_aliases(self.data.aliases.clone());
        for portfolio in &self.portfolios {
            let weights: WeightVector = portfolio
                .weights
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            source.insert(portfolio.name.clone(), weights);
        }
        source
    }

    /// Convert to the engine's run configuration.
    pub fn to_run_config(&self) -> Result<RunConfig> {
        let (start, end) = self.data.date_range()?;
        Ok(RunConfig {
            instruments: self.data.instruments.clone(),
            start,
            end,
            strategies: self.optimization.parsed_strategies()?,
            optimization: OptimizationConfig {
                risk_free_rate: None,
                solver_max_iter: self.optimization.solver_max_iter,
                risk_parity: self.optimization.risk_parity.clone(),
            },
            garch: self.simulation.garch.clone(),
            simulation: self.simulation.to_simulation_config(),
            aggregator: self.simulation.statistics.clone(),
            stress_events: if self.stress.enabled {
                self.stress.events.clone()
            } else {
                Vec::new()
            },
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Strata Configuration File
# Optimizes allocations and simulates their 10-year outcome distribution

[data]
path = "data/prices.csv"
instruments = ["CSPX.L", "EIMI.L", "AGGU.L", "IUAA.L"]
start_date = "2010-01-01"
# end_date = "2024-12-31"
risk_free_rate = 0.04
# risk_free_column = "TNX"   # yield in percent, mean / 100

[data.aliases]
CSPX = "CSPX.L"
EIMI = "EIMI.L"
AGGU = "AGGU.L"
IUAA = "IUAA.L"

[optimization]
strategies = ["max_sharpe", "min_volatility", "risk_parity", "hierarchical_risk_parity"]
solver_max_iter = 200

[optimization.risk_parity]
max_iterations = 200

[simulation]
num_paths = 1000
horizon_years = 10
seed = 42
dependence_model = "independent"   # or "copula"

[simulation.garch]
min_observations = 30

[simulation.statistics]
tail_percentile = 5.0
large_loss_threshold = -0.30

[stress]
enabled = true

[[portfolios]]
name = "core-growth"
weights = { CSPX = 60.0, EIMI = 20.0, AGGU = 20.0 }

[[portfolios]]
name = "core-defensive"
weights = { CSPX = 30.0, AGGU = 50.0, IUAA = 20.0 }
"#
        .to_string()
    }
}
