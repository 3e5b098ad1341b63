//! Gaussian copula over standardized residuals.
//!
//! Residuals of each instrument are mapped to pseudo-observations
//! `u = rank / (n + 1)`, then to normal scores `Φ⁻¹(u)`. The copula
//! correlation is the Pearson correlation of those scores. Sampling draws
//! correlated normals through the Cholesky factor, maps them back to uniforms
//! with `Φ` and inverts each instrument's empirical residual distribution.

use crate::error::{Result, StrataError};
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

/// Inverse of an empirical distribution, interpolated between order statistics.
#[derive(Debug, Clone)]
pub struct EmpiricalDistribution {
    sorted: Vec<f64>,
}

impl EmpiricalDistribution {
    pub fn new(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(StrataError::InsufficientData(
                "Empirical distribution needs at least one value".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(StrataError::InvalidInput(
                "Empirical distribution values must be finite".to_string(),
            ));
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Ok(Self { sorted })
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Value at probability `u`.
    ///
    /// The k-th smallest value (1-based) sits at `k / (n + 1)`; values in
    /// between are interpolated and the tails are clamped to the extremes.
    pub fn quantile(&self, u: f64) -> f64 {
        let n = self.sorted.len();
        let h = (u * (n + 1) as f64 - 1.0).clamp(0.0, (n - 1) as f64);
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = h - lo as f64;
        self.sorted[lo] + frac * (self.sorted[hi] - self.sorted[lo])
    }
}

/// Pseudo-observations `rank / (n + 1)`. Ties keep their input order.
pub fn pseudo_observations(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut u = vec![0.0; n];
    for (rank, &i) in order.iter().enumerate() {
        u[i] = (rank + 1) as f64 / (n + 1) as f64;
    }
    u
}

/// Fitted Gaussian copula with per-instrument empirical marginals.
#[derive(Debug, Clone)]
pub struct GaussianCopula {
    correlation: DMatrix<f64>,
    factor: DMatrix<f64>,
    marginals: Vec<EmpiricalDistribution>,
    normal: Normal,
}

impl GaussianCopula {
    /// Fit from aligned residual series, one per instrument.
    pub fn fit(residuals: &[Vec<f64>]) -> Result<Self> {
        let k = residuals.len();
        if k == 0 {
            return Err(StrataError::InsufficientData(
                "Copula needs at least one instrument".to_string(),
            ));
        }
        let n = residuals[0].len();
        if residuals.iter().any(|r| r.len() != n) {
            return Err(StrataError::DimensionMismatch(
                "Residual series must share one length".to_string(),
            ));
        }
        if n < 2 {
            return Err(StrataError::InsufficientData(format!(
                "{} residuals, copula needs at least 2",
                n
            )));
        }

        let normal = standard_normal()?;
        let scores: Vec<Vec<f64>> = residuals
            .iter()
            .map(|r| {
                pseudo_observations(r)
                    .into_iter()
                    .map(|u| normal.inverse_cdf(u))
                    .collect()
            })
            .collect();

        let correlation = DMatrix::from_fn(k, k, |i, j| {
            if i == j {
                1.0
            } else {
                pearson(&scores[i], &scores[j])
            }
        });

        let marginals = residuals
            .iter()
            .map(|r| EmpiricalDistribution::new(r))
            .collect::<Result<Vec<_>>>()?;

        Self::new(correlation, marginals)
    }

    /// Build from an explicit correlation matrix and marginals.
    pub fn new(correlation: DMatrix<f64>, marginals: Vec<EmpiricalDistribution>) -> Result<Self> {
        let k = marginals.len();
        if correlation.nrows() != k || correlation.ncols() != k {
            return Err(StrataError::DimensionMismatch(format!(
                "Copula correlation is {}x{} for {} marginals",
                correlation.nrows(),
                correlation.ncols(),
                k
            )));
        }

        let factor = Cholesky::new(correlation.clone())
            .ok_or_else(|| {
                StrataError::ModelFit(
                    "Copula correlation matrix is not positive definite".to_string(),
                )
            })?
            .l();

        debug!("Fitted Gaussian copula over {} instruments", k);

        Ok(Self {
            correlation,
            factor,
            marginals,
            normal: standard_normal()?,
        })
    }

    pub fn dimension(&self) -> usize {
        self.marginals.len()
    }

    pub fn correlation(&self) -> &DMatrix<f64> {
        &self.correlation
    }

    /// One vector of correlated uniforms.
    pub fn sample_uniforms<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let k = self.dimension();
        let z = DVector::from_fn(k, |_, _| rng.sample::<f64, _>(StandardNormal));
        let x = &self.factor * z;
        x.iter().map(|v| self.normal.cdf(*v)).collect()
    }

    /// One vector of correlated residuals drawn from the empirical marginals.
    pub fn sample_residuals<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        self.sample_uniforms(rng)
            .into_iter()
            .zip(self.marginals.iter())
            .map(|(u, m)| m.quantile(u))
            .collect()
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| StrataError::ModelFit(format!("Normal distribution: {}", e)))
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va > 0.0 && vb > 0.0 {
        (cov / (va * vb).sqrt()).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
