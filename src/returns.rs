//! Periodic returns and annualized covariance estimation.
//!
//! Everything downstream of the price matrix reads from a [`ReturnsCovariance`]:
//! the optimizers use the annualized mean returns, covariance and correlation,
//! the historical analytics use the daily return series.

use crate::error::{Result, StrataError};
use crate::types::{CleanPrices, PriceMatrix, WeightVector, TRADING_DAYS_PER_YEAR};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Daily returns, annualized mean returns and annualized covariance of a
/// cleaned price matrix. Instrument order matches the price columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnsCovariance {
    pub instruments: Vec<String>,
    /// Dates of the return observations (the later date of each pair).
    pub dates: Vec<NaiveDate>,
    /// Simple returns per instrument, `len = price rows - 1`.
    pub returns: Vec<Vec<f64>>,
    /// Mean daily return × 252.
    pub mean_returns: Vec<f64>,
    /// Sample covariance of daily returns × 252.
    pub covariance: Vec<Vec<f64>>,
}

impl ReturnsCovariance {
    /// Clean the price matrix and estimate returns and covariance.
    pub fn from_prices(prices: &PriceMatrix) -> Result<Self> {
        let clean = prices.clean()?;
        Self::from_clean(&clean)
    }

    /// Estimate from already-cleaned prices.
    pub fn from_clean(prices: &CleanPrices) -> Result<Self> {
        if prices.len() < 2 {
            return Err(StrataError::InsufficientData(format!(
                "{} price rows, need at least 2",
                prices.len()
            )));
        }

        let returns: Vec<Vec<f64>> = prices.columns.iter().map(|c| simple_returns(c)).collect();
        let mean_returns = returns
            .iter()
            .map(|r| mean(r) * TRADING_DAYS_PER_YEAR as f64)
            .collect();
        let covariance = annualized_covariance(&returns);

        debug!(
            "Estimated covariance for {} instruments over {} returns",
            prices.instruments.len(),
            prices.len() - 1
        );

        Ok(Self {
            instruments: prices.instruments.clone(),
            dates: prices.dates[1..].to_vec(),
            returns,
            mean_returns,
            covariance,
        })
    }

    pub fn n_instruments(&self) -> usize {
        self.instruments.len()
    }

    /// Number of return observations.
    pub fn n_observations(&self) -> usize {
        self.dates.len()
    }

    /// Annualized volatility of each instrument.
    pub fn volatilities(&self) -> Vec<f64> {
        (0..self.n_instruments())
            .map(|i| self.covariance[i][i].max(0.0).sqrt())
            .collect()
    }

    /// Pearson correlation matrix derived from the covariance.
    ///
    /// Pairs involving a zero-variance instrument get correlation 0 off the
    /// diagonal.
    pub fn correlation(&self) -> Vec<Vec<f64>> {
        let n = self.n_instruments();
        let vols = self.volatilities();
        let mut corr = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                corr[i][j] = if i == j {
                    1.0
                } else if vols[i] > 1e-12 && vols[j] > 1e-12 {
                    (self.covariance[i][j] / (vols[i] * vols[j])).clamp(-1.0, 1.0)
                } else {
                    0.0
                };
            }
        }
        corr
    }

    /// Daily returns of a portfolio held at constant weights.
    pub fn portfolio_returns(&self, weights: &WeightVector) -> Result<Vec<f64>> {
        let w = weights.aligned(&self.instruments)?;
        Ok((0..self.n_observations())
            .map(|t| {
                w.iter()
                    .zip(self.returns.iter())
                    .map(|(wi, r)| wi * r[t])
                    .sum()
            })
            .collect())
    }
}

/// Simple percentage change between consecutive prices.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Growth of one unit invested: cumulative product of `1 + r`.
pub fn cumulative_returns(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0, |growth, r| {
            *growth *= 1.0 + r;
            Some(*growth)
        })
        .collect()
}

/// Sample covariance (denominator `n - 1`) of aligned series, × 252.
pub fn annualized_covariance(returns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = returns.len();
    let means: Vec<f64> = returns.iter().map(|r| mean(r)).collect();
    let mut cov = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in i..n {
            let len = returns[i].len().min(returns[j].len());
            let value = if len > 1 {
                returns[i][..len]
                    .iter()
                    .zip(returns[j][..len].iter())
                    .map(|(ri, rj)| (ri - means[i]) * (rj - means[j]))
                    .sum::<f64>()
                    / (len - 1) as f64
            } else {
                0.0
            };
            cov[i][j] = value * TRADING_DAYS_PER_YEAR as f64;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
