//! Long-only mean-variance optimization (Markowitz).

use super::qp::QuadraticProgram;
use crate::error::{Result, StrataError};
use crate::returns::ReturnsCovariance;
use nalgebra::{DMatrix, SymmetricEigen};
use tracing::debug;

/// Smallest/largest eigenvalue ratio below which a covariance matrix is
/// treated as singular.
const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Mean-variance portfolio optimizer over the long-only simplex.
///
/// Solves quadratic programs for the minimum-variance and the maximum Sharpe
/// ratio portfolios, weights in `[0, 1]` summing to one.
#[derive(Debug, Clone)]
pub struct MeanVarianceOptimizer {
    /// Expected returns for each asset (annualized).
    expected_returns: Vec<f64>,
    /// Covariance matrix (annualized).
    covariance_matrix: Vec<Vec<f64>>,
    /// Risk-free rate for Sharpe ratio calculation (annualized).
    risk_free_rate: f64,
    max_iter: u32,
}

impl MeanVarianceOptimizer {
    /// Create a new optimizer with expected returns and covariance matrix.
    pub fn new(
        expected_returns: Vec<f64>,
        covariance_matrix: Vec<Vec<f64>>,
        risk_free_rate: f64,
    ) -> Result<Self> {
        let n = expected_returns.len();
        if n == 0 {
            return Err(StrataError::InsufficientData(
                "Need at least one instrument".to_string(),
            ));
        }
        if covariance_matrix.len() != n || covariance_matrix.iter().any(|row| row.len() != n) {
            return Err(StrataError::DimensionMismatch(
                "Covariance matrix must be square and match number of instruments".to_string(),
            ));
        }
        if expected_returns
            .iter()
            .chain(covariance_matrix.iter().flatten())
            .any(|v| !v.is_finite())
        {
            return Err(StrataError::InvalidInput(
                "Expected returns and covariance must be finite".to_string(),
            ));
        }

        Ok(Self {
            expected_returns,
            covariance_matrix,
            risk_free_rate,
            max_iter: 200,
        })
    }

    /// Create an optimizer from estimated returns and covariance.
    pub fn from_returns(returns: &ReturnsCovariance, risk_free_rate: f64) -> Result<Self> {
        Self::new(
            returns.mean_returns.clone(),
            returns.covariance.clone(),
            risk_free_rate,
        )
    }

    /// Cap the interior-point iterations of each solve.
    pub fn with_max_iter(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Minimum variance portfolio: minimize `w'Σw` over the long-only simplex.
    pub fn minimum_variance(&self) -> Result<Vec<f64>> {
        let n = self.expected_returns.len();

        let x = QuadraticProgram::new(self.covariance_matrix.clone(), vec![0.0; n])
            .equality(vec![1.0; n], 1.0)
            .bounds(&vec![0.0; n], &vec![1.0; n])
            .solve(self.max_iter)?;

        Ok(clean_weights(&x))
    }

    /// Maximum Sharpe ratio portfolio.
    ///
    /// Uses the homogenized form: minimize `y'Σy` subject to
    /// `(μ - rf)'y = 1, y >= 0`, then `w = y / sum(y)`. The result always
    /// satisfies the `[0, 1]` bounds.
    pub fn maximum_sharpe_ratio(&self) -> Result<Vec<f64>> {
        let n = self.expected_returns.len();

        if let Some(i) = (0..n).find(|&i| self.covariance_matrix[i][i] <= 0.0) {
            return Err(StrataError::InfeasibleOptimization(format!(
                "Instrument {} has zero variance; Sharpe ratio undefined",
                i
            )));
        }
        self.ensure_nonsingular()?;

        let excess_returns: Vec<f64> = self
            .expected_returns
            .iter()
            .map(|&r| r - self.risk_free_rate)
            .collect();

        if excess_returns.iter().all(|&r| r <= 0.0) {
            return Err(StrataError::InfeasibleOptimization(format!(
                "No instrument has an expected return above the risk-free rate {:.4}",
                self.risk_free_rate
            )));
        }

        let mut qp = QuadraticProgram::new(self.covariance_matrix.clone(), vec![0.0; n])
            .equality(excess_returns, 1.0);
        for i in 0..n {
            let mut row = vec![0.0; n];
            row[i] = -1.0;
            qp = qp.inequality(row, 0.0);
        }
        let y = qp.solve(self.max_iter)?;

        let total: f64 = y.iter().map(|v| v.max(0.0)).sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(StrataError::InfeasibleOptimization(
                "Max Sharpe solution has no positive weight".to_string(),
            ));
        }
        let weights: Vec<f64> = y.iter().map(|v| v.max(0.0) / total).collect();

        debug!(
            "Max Sharpe portfolio: return {:.4}, volatility {:.4}",
            self.portfolio_return(&weights),
            self.portfolio_volatility(&weights)
        );

        Ok(clean_weights(&weights))
    }

    /// Fail if the covariance matrix is (numerically) singular.
    pub fn ensure_nonsingular(&self) -> Result<()> {
        let n = self.expected_returns.len();
        let matrix = DMatrix::from_fn(n, n, |i, j| self.covariance_matrix[i][j]);
        let eigen = SymmetricEigen::new(matrix);
        let max = eigen.eigenvalues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = eigen.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);

        if max <= 0.0 || min <= max * SINGULARITY_TOLERANCE {
            return Err(StrataError::InfeasibleOptimization(format!(
                "Covariance matrix is singular (eigenvalues in [{:.3e}, {:.3e}])",
                min, max
            )));
        }
        Ok(())
    }

    /// Portfolio expected return given weights.
    pub fn portfolio_return(&self, weights: &[f64]) -> f64 {
        weights
            .iter()
            .zip(self.expected_returns.iter())
            .map(|(w, r)| w * r)
            .sum()
    }

    /// Portfolio variance given weights.
    pub fn portfolio_variance(&self, weights: &[f64]) -> f64 {
        quadratic_form(&self.covariance_matrix, weights)
    }

    /// Portfolio volatility (standard deviation) given weights.
    pub fn portfolio_volatility(&self, weights: &[f64]) -> f64 {
        self.portfolio_variance(weights).max(0.0).sqrt()
    }

    /// Sharpe ratio of the given weights against the optimizer's risk-free rate.
    pub fn sharpe_ratio(&self, weights: &[f64]) -> Option<f64> {
        let vol = self.portfolio_volatility(weights);
        (vol > 0.0).then(|| (self.portfolio_return(weights) - self.risk_free_rate) / vol)
    }
}

/// `w'Σw`.
pub(crate) fn quadratic_form(matrix: &[Vec<f64>], w: &[f64]) -> f64 {
    let mut total = 0.0;
    for (i, wi) in w.iter().enumerate() {
        for (j, wj) in w.iter().enumerate() {
            total += wi * wj * matrix[i][j];
        }
    }
    total
}

/// Clip solver noise to `[0, 1]` and renormalize to an exact unit sum.
pub(crate) fn clean_weights(x: &[f64]) -> Vec<f64> {
    let clipped: Vec<f64> = x
        .iter()
        .map(|&w| if w.abs() < 1e-10 { 0.0 } else { w.clamp(0.0, 1.0) })
        .collect();
    let sum: f64 = clipped.iter().sum();
    if sum > 0.0 {
        clipped.iter().map(|w| w / sum).collect()
    } else {
        clipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_invalid_dimensions() {
        let optimizer =
            MeanVarianceOptimizer::new(vec![0.10], vec![vec![0.04, 0.01], vec![0.01, 0.09]], 0.02);
        assert!(matches!(optimizer, Err(StrataError::DimensionMismatch(_))));
    }

    #[test]
    fn test_minimum_variance_prefers_low_volatility() {
        let optimizer = MeanVarianceOptimizer::new(
            vec![0.08, 0.12],
            vec![vec![0.01, 0.00], vec![0.00, 0.04]],
            0.02,
        )
        .unwrap();

        let weights = optimizer.minimum_variance().unwrap();

        // Uncorrelated: w_a = σb² / (σa² + σb²) = 0.8
        assert!((weights[0] - 0.8).abs() < 1e-4, "got {:?}", weights);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_maximum_sharpe_prefers_high_sharpe() {
        let optimizer = MeanVarianceOptimizer::new(
            vec![0.06, 0.15],
            vec![vec![0.04, 0.00], vec![0.00, 0.09]],
            0.02,
        )
        .unwrap();

        let weights = optimizer.maximum_sharpe_ratio().unwrap();

        assert!(weights[1] > weights[0]);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));

        // Tangency portfolio of uncorrelated assets: w ∝ (μ - rf) / σ²
        let raw = [0.04 / 0.04, 0.13 / 0.09];
        let expected = raw[1] / (raw[0] + raw[1]);
        assert!((weights[1] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_maximum_sharpe_singular_covariance() {
        let optimizer = MeanVarianceOptimizer::new(
            vec![0.08, 0.10],
            vec![vec![0.04, 0.04], vec![0.04, 0.04]],
            0.02,
        )
        .unwrap();
        assert!(matches!(
            optimizer.maximum_sharpe_ratio(),
            Err(StrataError::InfeasibleOptimization(_))
        ));
    }

    #[test]
    fn test_maximum_sharpe_all_negative_excess_returns() {
        let optimizer = MeanVarianceOptimizer::new(
            vec![0.01, 0.015],
            vec![vec![0.04, 0.0], vec![0.0, 0.09]],
            0.05,
        )
        .unwrap();
        assert!(matches!(
            optimizer.maximum_sharpe_ratio(),
            Err(StrataError::InfeasibleOptimization(_))
        ));
    }

    #[test]
    fn test_maximum_sharpe_zero_variance() {
        let optimizer = MeanVarianceOptimizer::new(
            vec![0.05, 0.10],
            vec![vec![0.0, 0.0], vec![0.0, 0.09]],
            0.02,
        )
        .unwrap();
        assert!(matches!(
            optimizer.maximum_sharpe_ratio(),
            Err(StrataError::InfeasibleOptimization(_))
        ));
    }

    #[test]
    fn test_three_assets_minimum_variance_bounds() {
        let optimizer = MeanVarianceOptimizer::new(
            vec![0.08, 0.10, 0.12],
            vec![
                vec![0.04, 0.006, 0.002],
                vec![0.006, 0.09, 0.009],
                vec![0.002, 0.009, 0.16],
            ],
            0.02,
        )
        .unwrap();

        let weights = optimizer.minimum_variance().unwrap();
        assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights[0] > weights[1] && weights[1] > weights[2]);
    }

    #[test]
    fn test_clean_weights() {
        let w = clean_weights(&[0.5000001, -1e-12, 0.4999999]);
        assert_eq!(w[1], 0.0);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }
}
