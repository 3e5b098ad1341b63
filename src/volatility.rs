//! GARCH(1,1) volatility model with standardized Student's-t innovations.
//!
//! Returns are modelled in percent:
//!
//! ```text
//! r_t = μ + ε_t,   ε_t = σ_t z_t,   σ²_t = ω + α ε²_{t-1} + β σ²_{t-1}
//! ```
//!
//! with `z_t` a Student's-t variate rescaled to unit variance. Parameters are
//! estimated by maximum likelihood with argmin's Nelder–Mead solver over an
//! unconstrained reparameterization that keeps `ω > 0`, `α, β ≥ 0`,
//! `α + β < 1` and `ν > 2`.

use crate::error::{Result, StrataError};
use crate::returns::mean;
use argmin::core::{CostFunction, Executor, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Lower bound on the degrees of freedom.
const MIN_NU: f64 = 2.05;

/// Fitted GARCH(1,1)-t parameters for one instrument (percent units).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityModelParams {
    pub mu: f64,
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    pub nu: f64,
}

impl VolatilityModelParams {
    /// `α + β`.
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Long-run variance `ω / (1 - α - β)`.
    pub fn unconditional_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    /// Next-step conditional variance.
    pub fn next_variance(&self, innovation: f64, variance: f64) -> f64 {
        self.omega + self.alpha * innovation * innovation + self.beta * variance
    }

    /// Map an unconstrained point to parameters.
    fn from_unconstrained(x: &[f64]) -> Self {
        let persistence = logistic(x[2]);
        let share = logistic(x[3]);
        Self {
            mu: x[0],
            omega: x[1].exp(),
            alpha: persistence * share,
            beta: persistence * (1.0 - share),
            nu: MIN_NU + x[4].exp(),
        }
    }

    fn to_unconstrained(&self) -> Vec<f64> {
        let persistence = self.persistence();
        vec![
            self.mu,
            self.omega.ln(),
            logit(persistence),
            logit(self.alpha / persistence),
            (self.nu - MIN_NU).ln(),
        ]
    }
}

/// State a forward simulation starts from: parameters plus the last in-sample
/// innovation and conditional volatility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityState {
    pub params: VolatilityModelParams,
    pub last_innovation: f64,
    pub last_volatility: f64,
}

/// Estimation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GarchFitConfig {
    /// Shortest return series accepted.
    pub min_observations: usize,
    /// Residuals used for the σ²₀ backcast.
    pub backcast_window: usize,
    /// Decay of the backcast weights.
    pub backcast_decay: f64,
    pub search: LikelihoodSearch,
}

/// Nelder–Mead settings for the likelihood search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LikelihoodSearch {
    pub max_iterations: u64,
    /// Converged once the standard deviation of the simplex costs drops below this.
    pub sd_tolerance: f64,
    /// Edge length of the initial simplex in unconstrained coordinates.
    pub initial_step: f64,
}

impl Default for LikelihoodSearch {
    fn default() -> Self {
        Self {
            max_iterations: 20_000,
            sd_tolerance: 1e-8,
            initial_step: 0.5,
        }
    }
}

impl Default for GarchFitConfig {
    fn default() -> Self {
        Self {
            min_observations: 30,
            backcast_window: 75,
            backcast_decay: 0.94,
            search: LikelihoodSearch::default(),
        }
    }
}

impl GarchFitConfig {
    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.search.max_iterations = n;
        self
    }

    pub fn with_min_observations(mut self, n: usize) -> Self {
        self.min_observations = n;
        self
    }
}

/// Result of fitting one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarchFit {
    pub params: VolatilityModelParams,
    /// In-sample conditional volatility σ_t (percent).
    pub conditional_volatility: Vec<f64>,
    /// ε_t / σ_t.
    pub standardized_residuals: Vec<f64>,
    pub log_likelihood: f64,
    pub iterations: usize,
    last_innovation: f64,
}

impl GarchFit {
    /// Final-period innovation ε_T.
    pub fn last_innovation(&self) -> f64 {
        self.last_innovation
    }

    /// Final-period conditional volatility σ_T.
    pub fn last_volatility(&self) -> f64 {
        self.conditional_volatility.last().copied().unwrap_or_default()
    }

    pub fn state(&self) -> VolatilityState {
        VolatilityState {
            params: self.params,
            last_innovation: self.last_innovation,
            last_volatility: self.last_volatility(),
        }
    }
}

/// Maximum likelihood GARCH(1,1)-t estimator.
#[derive(Debug, Clone, Default)]
pub struct VolatilityModel {
    config: GarchFitConfig,
}

impl VolatilityModel {
    pub fn new(config: GarchFitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GarchFitConfig {
        &self.config
    }

    /// Fit on simple returns in decimal form (0.01 = 1%).
    pub fn fit(&self, returns: &[f64]) -> Result<GarchFit> {
        let percent: Vec<f64> = returns.iter().map(|r| r * 100.0).collect();
        self.fit_percent(&percent)
    }

    /// Fit on returns already expressed in percent.
    pub fn fit_percent(&self, returns: &[f64]) -> Result<GarchFit> {
        if returns.len() < self.config.min_observations {
            return Err(StrataError::InsufficientData(format!(
                "{} returns, volatility model needs at least {}",
                returns.len(),
                self.config.min_observations
            )));
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(StrataError::InvalidInput(
                "Return series contains non-finite values".to_string(),
            ));
        }

        let mu0 = mean(returns);
        let variance = returns.iter().map(|r| (r - mu0).powi(2)).sum::<f64>() / returns.len() as f64;
        if !(variance > 1e-12) {
            return Err(StrataError::ModelFit(
                "Return series is flat; conditional variance undefined".to_string(),
            ));
        }

        let start = VolatilityModelParams {
            mu: mu0,
            omega: variance * 0.05,
            alpha: 0.10,
            beta: 0.85,
            nu: 8.0,
        };

        let (x, neg_log_likelihood, iterations) = self.search(returns, &start)?;

        let params = VolatilityModelParams::from_unconstrained(&x);
        let variances = self.conditional_variances(&params, returns);
        let conditional_volatility: Vec<f64> = variances.iter().map(|v| v.sqrt()).collect();
        let standardized_residuals = returns
            .iter()
            .zip(conditional_volatility.iter())
            .map(|(r, s)| (r - params.mu) / s)
            .collect();
        let last_innovation = returns.last().map(|r| r - params.mu).unwrap_or_default();

        debug!(
            "GARCH fit: mu={:.4} omega={:.4} alpha={:.4} beta={:.4} nu={:.2} ({} iterations)",
            params.mu, params.omega, params.alpha, params.beta, params.nu, iterations
        );

        Ok(GarchFit {
            params,
            conditional_volatility,
            standardized_residuals,
            log_likelihood: -neg_log_likelihood,
            iterations,
            last_innovation,
        })
    }

    /// Minimize the negative log-likelihood from `start`.
    ///
    /// Returns the unconstrained optimum, its cost and the iteration count.
    fn search(&self, returns: &[f64], start: &VolatilityModelParams) -> Result<(Vec<f64>, f64, usize)> {
        let search = &self.config.search;
        let x0 = start.to_unconstrained();
        let mut simplex = vec![x0.clone()];
        for i in 0..x0.len() {
            let mut vertex = x0.clone();
            vertex[i] += search.initial_step;
            simplex.push(vertex);
        }

        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(search.sd_tolerance)
            .map_err(|e| StrataError::ModelFit(e.to_string()))?;
        let problem = NegativeLogLikelihood {
            model: self,
            returns,
        };
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(search.max_iterations))
            .run()
            .map_err(|e| StrataError::ModelFit(format!("Likelihood search failed: {}", e)))?;

        let state = result.state();
        let cost = state.get_best_cost();
        if !cost.is_finite() {
            return Err(StrataError::ModelFit(
                "Log-likelihood is not finite at the optimum".to_string(),
            ));
        }
        if !matches!(
            state.get_termination_reason(),
            Some(TerminationReason::SolverConverged)
        ) {
            return Err(StrataError::ModelFit(format!(
                "Likelihood search did not converge within {} iterations",
                search.max_iterations
            )));
        }
        let x = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| StrataError::ModelFit("Likelihood search returned no optimum".to_string()))?;

        Ok((x, cost, state.get_iter() as usize))
    }

    /// Fit every series in parallel, preserving order.
    pub fn fit_all(&self, returns: &[Vec<f64>]) -> Result<Vec<GarchFit>> {
        info!("Fitting volatility models for {} instruments", returns.len());
        returns.par_iter().map(|r| self.fit(r)).collect()
    }

    /// Exponentially weighted mean of the first squared residuals.
    pub fn backcast(&self, residuals: &[f64]) -> f64 {
        let tau = residuals.len().min(self.config.backcast_window);
        let mut weight = 1.0;
        let mut total_weight = 0.0;
        let mut value = 0.0;
        for e in &residuals[..tau] {
            value += weight * e * e;
            total_weight += weight;
            weight *= self.config.backcast_decay;
        }
        if total_weight > 0.0 {
            value / total_weight
        } else {
            0.0
        }
    }

    /// σ²_t for every observation.
    pub fn conditional_variances(&self, params: &VolatilityModelParams, returns: &[f64]) -> Vec<f64> {
        let residuals: Vec<f64> = returns.iter().map(|r| r - params.mu).collect();
        let backcast = self.backcast(&residuals);

        let mut variances = Vec::with_capacity(residuals.len());
        let mut prev_var = backcast;
        let mut prev_sq = backcast;
        for e in &residuals {
            let var = params.omega + params.alpha * prev_sq + params.beta * prev_var;
            variances.push(var);
            prev_var = var;
            prev_sq = e * e;
        }
        variances
    }

    /// Log-likelihood of percent returns under standardized-t innovations.
    pub fn log_likelihood(&self, params: &VolatilityModelParams, returns: &[f64]) -> f64 {
        let nu = params.nu;
        let constant = ln_gamma((nu + 1.0) / 2.0) - ln_gamma(nu / 2.0) - 0.5 * (PI * (nu - 2.0)).ln();
        let variances = self.conditional_variances(params, returns);

        returns
            .iter()
            .zip(variances.iter())
            .map(|(r, var)| {
                let e = r - params.mu;
                constant
                    - 0.5 * var.ln()
                    - 0.5 * (nu + 1.0) * (1.0 + e * e / (var * (nu - 2.0))).ln()
            })
            .sum()
    }
}

/// Negative log-likelihood over unconstrained coordinates.
struct NegativeLogLikelihood<'a> {
    model: &'a VolatilityModel,
    returns: &'a [f64],
}

impl CostFunction for NegativeLogLikelihood<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let params = VolatilityModelParams::from_unconstrained(x);
        let value = -self.model.log_likelihood(&params, self.returns);
        // Non-finite regions rank behind every finite point
        Ok(if value.is_finite() { value } else { f64::INFINITY })
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    (p / (1.0 - p)).ln()
}
