//! Equal risk contribution portfolio by sequential quadratic programming.
//!
//! Each instrument's risk contribution is `RC_i = w_i (Σw)_i`; the contributions
//! sum to the portfolio variance `V = w'Σw`. The optimizer minimizes
//! `Σ_i (RC_i/V - 1/N)²` over `w ∈ [0, 1]`, `Σw = 1`.
//!
//! Every iteration solves a QP for the search direction (damped BFGS model of
//! the Hessian, box bounds and the budget constraint) and takes a backtracking
//! step. The search starts from equal weights and restarts from
//! inverse-volatility weights when it settles on a point whose contributions
//! are not equal.

use super::mean_variance::clean_weights;
use super::qp::QuadraticProgram;
use crate::error::{Result, StrataError};
use crate::returns::ReturnsCovariance;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings for the risk parity solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParityConfig {
    /// Maximum SQP iterations before the solve is reported as non-converged.
    pub max_iterations: usize,
    /// Converged once the step's largest component falls below this.
    pub step_tolerance: f64,
    /// Converged once the objective improves by less than this.
    pub objective_tolerance: f64,
    /// A solution is accepted only if its objective is at most this.
    pub acceptance_tolerance: f64,
    /// Backtracking gives up below this step length.
    pub min_step: f64,
}

impl Default for RiskParityConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            step_tolerance: 1e-10,
            objective_tolerance: 1e-16,
            acceptance_tolerance: 1e-8,
            min_step: 1e-12,
        }
    }
}

impl RiskParityConfig {
    /// Set the SQP iteration cap.
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }
}

/// Risk parity optimizer over an annualized covariance matrix.
#[derive(Debug, Clone)]
pub struct RiskParityOptimizer {
    covariance_matrix: Vec<Vec<f64>>,
    config: RiskParityConfig,
    solver_max_iter: u32,
}

impl RiskParityOptimizer {
    pub fn new(covariance_matrix: Vec<Vec<f64>>, config: RiskParityConfig) -> Result<Self> {
        let n = covariance_matrix.len();
        if n == 0 {
            return Err(StrataError::InsufficientData(
                "Need at least one instrument".to_string(),
            ));
        }
        if covariance_matrix.iter().any(|row| row.len() != n) {
            return Err(StrataError::DimensionMismatch(
                "Covariance matrix must be square".to_string(),
            ));
        }
        if let Some(i) = (0..n).find(|&i| !(covariance_matrix[i][i] > 1e-14)) {
            return Err(StrataError::InfeasibleOptimization(format!(
                "Instrument {} has zero variance; risk contributions undefined",
                i
            )));
        }

        Ok(Self {
            covariance_matrix,
            config,
            solver_max_iter: 200,
        })
    }

    /// Iteration cap of each direction-finding QP.
    pub fn with_solver_max_iter(mut self, max_iter: u32) -> Self {
        self.solver_max_iter = max_iter;
        self
    }

    pub fn from_returns(returns: &ReturnsCovariance, config: RiskParityConfig) -> Result<Self> {
        Self::new(returns.covariance.clone(), config)
    }

    /// Risk contribution of each instrument as a fraction of portfolio variance.
    pub fn risk_contributions(&self, w: &[f64]) -> Vec<f64> {
        let marginal = self.marginal(w);
        let variance = dot(w, &marginal);
        w.iter()
            .zip(marginal.iter())
            .map(|(wi, mi)| wi * mi / variance)
            .collect()
    }

    /// Objective value at `w`.
    pub fn objective(&self, w: &[f64]) -> f64 {
        let target = 1.0 / w.len() as f64;
        self.risk_contributions(w)
            .iter()
            .map(|rc| (rc - target).powi(2))
            .sum()
    }

    /// Weights with equal risk contributions.
    ///
    /// Fails when no start reaches an objective within the acceptance
    /// tolerance, when the line search stalls, or at the iteration cap.
    pub fn optimize(&self) -> Result<Vec<f64>> {
        let n = self.covariance_matrix.len();
        if n == 1 {
            return Ok(vec![1.0]);
        }

        let inverse_vol: Vec<f64> = (0..n)
            .map(|i| 1.0 / self.covariance_matrix[i][i].sqrt())
            .collect();
        let total: f64 = inverse_vol.iter().sum();
        let starts = [
            vec![1.0 / n as f64; n],
            inverse_vol.iter().map(|v| v / total).collect::<Vec<f64>>(),
        ];

        let mut failure = None;
        for start in starts {
            match self.solve_from(start) {
                Ok((w, f)) if f <= self.config.acceptance_tolerance => return Ok(clean_weights(&w)),
                Ok((_, f)) => {
                    debug!("Risk parity settled at a local optimum (f = {:.3e}), restarting", f);
                    failure = Some(StrataError::InfeasibleOptimization(format!(
                        "Risk parity settled at unequal contributions (objective {:.3e})",
                        f
                    )));
                }
                Err(e) => {
                    debug!("Risk parity start failed: {}", e);
                    failure = Some(e);
                }
            }
        }
        Err(failure.unwrap_or_else(|| {
            StrataError::InfeasibleOptimization("Risk parity found no solution".to_string())
        }))
    }

    /// SQP iterations from one starting point; returns the point and its objective.
    fn solve_from(&self, start: Vec<f64>) -> Result<(Vec<f64>, f64)> {
        let n = start.len();
        let mut w = start;
        let mut f = self.objective(&w);
        let mut g = self.gradient(&w)?;
        let mut hessian = identity(n);

        for iteration in 0..self.config.max_iterations {
            let lower: Vec<f64> = w.iter().map(|wi| -wi).collect();
            let upper: Vec<f64> = w.iter().map(|wi| 1.0 - wi).collect();

            // Search direction keeps Σw = 1 and stays inside the box.
            let d = QuadraticProgram::new(hessian.clone(), g.clone())
                .equality(vec![1.0; n], 0.0)
                .bounds(&lower, &upper)
                .solve(self.solver_max_iter)?;

            if max_abs(&d) < self.config.step_tolerance {
                debug!("Risk parity converged after {} iterations (f = {:.3e})", iteration, f);
                return Ok((w, f));
            }

            let Some((w_next, f_next)) = self.backtrack(&w, f, &d, dot(&g, &d)) else {
                if f <= self.config.acceptance_tolerance {
                    debug!("Risk parity reached round-off after {} iterations (f = {:.3e})", iteration, f);
                    return Ok((w, f));
                }
                return Err(StrataError::InfeasibleOptimization(format!(
                    "Risk parity line search failed at iteration {} (objective {:.3e})",
                    iteration, f
                )));
            };

            let s: Vec<f64> = w_next.iter().zip(w.iter()).map(|(a, b)| a - b).collect();
            if max_abs(&s) < self.config.step_tolerance
                || (f - f_next).abs() < self.config.objective_tolerance
            {
                debug!(
                    "Risk parity converged after {} iterations (f = {:.3e})",
                    iteration + 1,
                    f_next
                );
                return Ok((w_next, f_next));
            }

            let g_next = self.gradient(&w_next)?;
            let y: Vec<f64> = g_next.iter().zip(g.iter()).map(|(a, b)| a - b).collect();
            damped_bfgs_update(&mut hessian, &s, &y);

            w = w_next;
            f = f_next;
            g = g_next;
        }

        Err(StrataError::InfeasibleOptimization(format!(
            "Risk parity did not converge within {} iterations (objective {:.3e})",
            self.config.max_iterations, f
        )))
    }

    /// Armijo backtracking along `d`. `None` once the step falls below `min_step`.
    fn backtrack(&self, w: &[f64], f: f64, d: &[f64], slope: f64) -> Option<(Vec<f64>, f64)> {
        let mut step = 1.0;
        while step >= self.config.min_step {
            let candidate: Vec<f64> = w
                .iter()
                .zip(d.iter())
                .map(|(wi, di)| (wi + step * di).clamp(0.0, 1.0))
                .collect();
            let value = self.objective(&candidate);
            if value.is_finite() && value <= f + 1e-4 * step * slope.min(0.0) {
                return Some((candidate, value));
            }
            step *= 0.5;
        }
        None
    }

    fn marginal(&self, w: &[f64]) -> Vec<f64> {
        self.covariance_matrix
            .iter()
            .map(|row| dot(row, w))
            .collect()
    }

    /// Analytic gradient of the objective.
    fn gradient(&self, w: &[f64]) -> Result<Vec<f64>> {
        let n = w.len();
        let m = self.marginal(w);
        let v = dot(w, &m);
        if !(v > 0.0) {
            return Err(StrataError::InfeasibleOptimization(format!(
                "Portfolio variance {:.3e} is not positive",
                v
            )));
        }
        let target = 1.0 / n as f64;
        let residual: Vec<f64> = (0..n).map(|i| w[i] * m[i] / v - target).collect();

        Ok((0..n)
            .map(|k| {
                (0..n)
                    .map(|i| {
                        let direct = if i == k { m[i] } else { 0.0 };
                        let d_rc = (direct + w[i] * self.covariance_matrix[i][k]) / v
                            - 2.0 * w[i] * m[i] * m[k] / (v * v);
                        2.0 * residual[i] * d_rc
                    })
                    .sum()
            })
            .collect())
    }
}

/// Powell-damped BFGS update, keeps `b` positive definite.
fn damped_bfgs_update(b: &mut [Vec<f64>], s: &[f64], y: &[f64]) {
    let n = s.len();
    let bs: Vec<f64> = b.iter().map(|row| dot(row, s)).collect();
    let sbs = dot(s, &bs);
    if sbs <= 1e-300 {
        return;
    }
    let sy = dot(s, y);
    let theta = if sy >= 0.2 * sbs {
        1.0
    } else {
        0.8 * sbs / (sbs - sy)
    };
    let r: Vec<f64> = (0..n).map(|i| theta * y[i] + (1.0 - theta) * bs[i]).collect();
    let sr = dot(s, &r);
    if sr <= 1e-300 {
        return;
    }

    for i in 0..n {
        for j in 0..n {
            b[i][j] += r[i] * r[j] / sr - bs[i] * bs[j] / sbs;
        }
    }
    // Symmetrize against round-off
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (b[i][j] + b[j][i]);
            b[i][j] = avg;
            b[j][i] = avg;
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}
