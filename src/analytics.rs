//! Risk statistics of simulated portfolios and historical performance metrics.

use crate::error::{Result, StrataError};
use crate::monte_carlo::SimulatedPriceCube;
use crate::returns::{cumulative_returns, mean, ReturnsCovariance};
use crate::types::{StrategyWeights, WeightVector, TRADING_DAYS_PER_YEAR};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

/// Steps in the short (three-year) window.
pub const THREE_YEAR_DAYS: usize = 3 * TRADING_DAYS_PER_YEAR;

/// Distributional risk statistics of one simulated portfolio.
///
/// Returns are annualized over the full horizon unless named otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStatistics {
    pub mean_annual_return: f64,
    /// Standard deviation of annualized returns × √(horizon / 252).
    pub annual_return_std: f64,
    pub min_annual_return: f64,
    pub p5_annual_return: f64,
    pub p25_annual_return: f64,
    pub median_annual_return: f64,
    pub p75_annual_return: f64,
    pub p95_annual_return: f64,
    pub max_annual_return: f64,
    /// Cumulative return at the tail percentile.
    pub tail_cutoff: f64,
    /// Mean annualized return of the paths at or below the tail cutoff.
    pub cvar: f64,
    /// P(cumulative return < 0) over the full horizon.
    pub shortfall_probability: f64,
    /// P(cumulative return < large-loss threshold) over the short window.
    pub large_loss_probability: f64,
    pub mean_cumulative_return: f64,
}

impl PortfolioStatistics {
    /// Row labels and values, in display order.
    pub fn rows(&self) -> [(&'static str, f64); 14] {
        [
            ("Mean annual return", self.mean_annual_return),
            ("Annual return std", self.annual_return_std),
            ("Min annual return", self.min_annual_return),
            ("5th percentile", self.p5_annual_return),
            ("25th percentile", self.p25_annual_return),
            ("Median annual return", self.median_annual_return),
            ("75th percentile", self.p75_annual_return),
            ("95th percentile", self.p95_annual_return),
            ("Max annual return", self.max_annual_return),
            ("Tail cutoff (cumulative)", self.tail_cutoff),
            ("CVaR (annual)", self.cvar),
            ("Shortfall probability", self.shortfall_probability),
            ("P(large 3y loss)", self.large_loss_probability),
            ("Mean cumulative return", self.mean_cumulative_return),
        ]
    }
}

/// Statistics of several strategies: one row per metric, one column per strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsTable {
    columns: Vec<(String, PortfolioStatistics)>,
}

impl StatisticsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, stats: PortfolioStatistics) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = stats,
            None => self.columns.push((name, stats)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PortfolioStatistics> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PortfolioStatistics)> {
        self.columns.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Metric rows: label followed by one value per strategy column.
    pub fn rows(&self) -> Vec<(&'static str, Vec<f64>)> {
        let Some((_, first)) = self.columns.first() else {
            return Vec::new();
        };
        first
            .rows()
            .iter()
            .enumerate()
            .map(|(r, (label, _))| {
                (
                    *label,
                    self.columns.iter().map(|(_, s)| s.rows()[r].1).collect(),
                )
            })
            .collect()
    }
}

impl Serialize for StatisticsTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, stats) in &self.columns {
            map.serialize_entry(name, stats)?;
        }
        map.end()
    }
}

/// Turns a simulated price cube and weight vectors into risk statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsAggregator {
    /// Percentile of the cumulative-return distribution used as tail cutoff.
    pub tail_percentile: f64,
    /// Cumulative return below which a short-window loss counts as large.
    pub large_loss_threshold: f64,
    /// Short window length in trading days.
    pub short_window_days: usize,
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self {
            tail_percentile: 5.0,
            large_loss_threshold: -0.30,
            short_window_days: THREE_YEAR_DAYS,
        }
    }
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tail_percentile(mut self, percentile: f64) -> Self {
        self.tail_percentile = percentile;
        self
    }

    pub fn with_large_loss_threshold(mut self, threshold: f64) -> Self {
        self.large_loss_threshold = threshold;
        self
    }

    /// Statistics for every weight vector in the table, in table order.
    pub fn aggregate(
        &self,
        cube: &SimulatedPriceCube,
        weights: &StrategyWeights,
    ) -> Result<StatisticsTable> {
        info!(
            "Aggregating {} strategies over {} paths × {} days",
            weights.len(),
            cube.n_paths(),
            cube.horizon_days()
        );

        let columns: Vec<(String, WeightVector)> = weights
            .iter()
            .map(|(name, w)| (name.to_string(), w.clone()))
            .collect();
        let stats = columns
            .par_iter()
            .map(|(name, w)| self.statistics(cube, w).map(|s| (name.clone(), s)))
            .collect::<Result<Vec<_>>>()?;

        let mut table = StatisticsTable::new();
        for (name, s) in stats {
            table.insert(name, s);
        }
        Ok(table)
    }

    /// Statistics for one weight vector.
    pub fn statistics(
        &self,
        cube: &SimulatedPriceCube,
        weights: &WeightVector,
    ) -> Result<PortfolioStatistics> {
        let horizon = cube.horizon_days();
        if horizon == 0 {
            return Err(StrataError::InsufficientData(
                "Simulation horizon is 0 days; annualized returns undefined".to_string(),
            ));
        }
        if cube.n_paths() == 0 {
            return Err(StrataError::InsufficientData(
                "Simulation has no paths".to_string(),
            ));
        }

        let values = portfolio_paths(cube, weights)?;
        let short = self.short_window_days.clamp(1, horizon);
        let n_paths = cube.n_paths();

        let mut cumulative = Vec::with_capacity(n_paths);
        let mut cumulative_short = Vec::with_capacity(n_paths);
        for p in 0..n_paths {
            let path: Vec<f64> = values.iter().map(|step| step[p]).collect();
            let growth = cumulative_returns(&step_returns(&path));
            cumulative.push(growth[horizon - 1] - 1.0);
            cumulative_short.push(growth[short - 1] - 1.0);
        }

        let annual: Vec<f64> = cumulative.iter().map(|c| annualize(*c, horizon)).collect();

        let cutoff = percentile(&cumulative, self.tail_percentile);
        let tail: Vec<f64> = cumulative
            .iter()
            .zip(annual.iter())
            .filter(|(c, _)| **c <= cutoff)
            .map(|(_, a)| *a)
            .collect();

        let n = n_paths as f64;
        let stats = PortfolioStatistics {
            mean_annual_return: mean(&annual),
            annual_return_std: sample_std(&annual)
                * (horizon as f64 / TRADING_DAYS_PER_YEAR as f64).sqrt(),
            min_annual_return: annual.iter().cloned().fold(f64::INFINITY, f64::min),
            p5_annual_return: percentile(&annual, 5.0),
            p25_annual_return: percentile(&annual, 25.0),
            median_annual_return: percentile(&annual, 50.0),
            p75_annual_return: percentile(&annual, 75.0),
            p95_annual_return: percentile(&annual, 95.0),
            max_annual_return: annual.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            tail_cutoff: cutoff,
            cvar: mean(&tail),
            shortfall_probability: cumulative.iter().filter(|c| **c < 0.0).count() as f64 / n,
            large_loss_probability: cumulative_short
                .iter()
                .filter(|c| **c < self.large_loss_threshold)
                .count() as f64
                / n,
            mean_cumulative_return: mean(&cumulative),
        };

        debug!(
            "Mean annual return {:.4}, CVaR {:.4}, shortfall {:.3}",
            stats.mean_annual_return, stats.cvar, stats.shortfall_probability
        );
        Ok(stats)
    }
}

/// Weighted sum of instrument prices: `values[t][p]`.
pub fn portfolio_paths(cube: &SimulatedPriceCube, weights: &WeightVector) -> Result<Vec<Vec<f64>>> {
    let w = weights.aligned(cube.instruments())?;
    let n_paths = cube.n_paths();

    let values: Vec<Vec<f64>> = (0..cube.n_steps())
        .map(|t| {
            let mut row = vec![0.0; n_paths];
            for (i, wi) in w.iter().enumerate() {
                if *wi == 0.0 {
                    continue;
                }
                for (v, price) in row.iter_mut().zip(cube.step(i, t)) {
                    *v += wi * price;
                }
            }
            row
        })
        .collect();

    if values
        .first()
        .is_some_and(|start| start.iter().any(|v| !(*v > 0.0)))
    {
        return Err(StrataError::InvalidInput(
            "Portfolio value at step 0 must be positive".to_string(),
        ));
    }
    Ok(values)
}

/// Simple returns of a value path. A value at or below zero ends the path at -100%.
fn step_returns(path: &[f64]) -> Vec<f64> {
    let mut ruined = false;
    path.windows(2)
        .map(|w| {
            if ruined {
                0.0
            } else if w[1] <= 0.0 {
                ruined = true;
                -1.0
            } else {
                w[1] / w[0] - 1.0
            }
        })
        .collect()
}

/// `(1 + cumulative)^(252 / days) - 1`.
pub fn annualize(cumulative: f64, days: usize) -> f64 {
    (1.0 + cumulative)
        .max(0.0)
        .powf(TRADING_DAYS_PER_YEAR as f64 / days as f64)
        - 1.0
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Sample standard deviation; zero for fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64).sqrt()
}

/// Historical performance of a constant-weight portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return_pct: f64,
    /// Compound annual growth rate.
    pub annual_return_pct: f64,
    /// Mean daily return × 252.
    pub expected_return_pct: f64,
    pub volatility_annual_pct: f64,
    /// `None` when the returns have no volatility.
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown_pct: f64,
    pub trading_days: usize,
}

impl PerformanceMetrics {
    /// Metrics from daily portfolio returns and an annual risk-free rate.
    pub fn from_returns(daily_returns: &[f64], risk_free_rate: f64) -> Result<Self> {
        if daily_returns.is_empty() {
            return Err(StrataError::InsufficientData(
                "No returns to measure performance over".to_string(),
            ));
        }
        let curve = cumulative_returns(daily_returns);
        let total = curve.last().copied().unwrap_or(1.0) - 1.0;
        let days = daily_returns.len();

        let expected = mean(daily_returns) * TRADING_DAYS_PER_YEAR as f64;
        let volatility = sample_std(daily_returns) * (TRADING_DAYS_PER_YEAR as f64).sqrt();
        let sharpe = (volatility > 1e-12).then(|| (expected - risk_free_rate) / volatility);

        Ok(Self {
            total_return_pct: total * 100.0,
            annual_return_pct: annualize(total, days) * 100.0,
            expected_return_pct: expected * 100.0,
            volatility_annual_pct: volatility * 100.0,
            sharpe_ratio: sharpe,
            max_drawdown_pct: max_drawdown(&curve) * 100.0,
            trading_days: days,
        })
    }
}

/// Largest peak-to-trough decline of a growth curve that starts at 1.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = 1.0_f64;
    let mut worst = 0.0_f64;
    for v in curve {
        peak = peak.max(*v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak);
        }
    }
    worst
}

/// Cumulative-return curve and metrics of one weight vector over the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalPerformance {
    pub dates: Vec<NaiveDate>,
    /// Growth of one unit invested at the start.
    pub cumulative: Vec<f64>,
    pub metrics: PerformanceMetrics,
}

impl HistoricalPerformance {
    pub fn compute(
        returns: &ReturnsCovariance,
        weights: &WeightVector,
        risk_free_rate: f64,
    ) -> Result<Self> {
        let daily = returns.portfolio_returns(weights)?;
        Ok(Self {
            dates: returns.dates.clone(),
            cumulative: cumulative_returns(&daily),
            metrics: PerformanceMetrics::from_returns(&daily, risk_free_rate)?,
        })
    }

    /// Portfolio value at each date, starting from 1 the day before the first.
    pub fn value_on(&self, date: NaiveDate) -> Option<f64> {
        self.dates
            .iter()
            .position(|d| *d == date)
            .map(|i| self.cumulative[i])
    }
}
