//! Monte Carlo price path simulation from fitted volatility models.
//!
//! Each instrument is rolled forward from its last observed price with the
//! GARCH(1,1) recurrence of its fitted [`VolatilityState`]:
//!
//! ```text
//! σ²_t = ω + α ε²_{t-1} + β σ²_{t-1},  ε_t = σ_t z_t,  r_t = μ + ε_t  (percent)
//! price_t = price_{t-1} × (1 + r_t / 100)
//! ```
//!
//! Under [`DependenceModel::Independent`] the shocks `z_t` are standardized
//! Student's-t draws, drawn separately for every instrument. Under
//! [`DependenceModel::Copula`] they are drawn jointly from a Gaussian copula
//! over the in-sample standardized residuals.
//!
//! # Example
//!
//! ```ignore
//! use strata::monte_carlo::{PathSimulator, SimulationConfig};
//!
//! let config = SimulationConfig::default().with_paths(500).with_seed(7);
//! let cube = PathSimulator::new(config).simulate(&instruments, &last_prices, &fits)?;
//! println!("{} steps × {} paths", cube.n_steps(), cube.n_paths());
//! ```

use crate::copula::GaussianCopula;
use crate::error::{Result, StrataError};
use crate::types::{CleanPrices, TRADING_DAYS_PER_YEAR};
use crate::volatility::{GarchFit, VolatilityModel, VolatilityState};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StudentT};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// How shocks are coupled across instruments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependenceModel {
    /// Each instrument draws its own shocks.
    #[default]
    Independent,
    /// Gaussian copula over standardized residuals.
    Copula,
}

impl fmt::Display for DependenceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependenceModel::Independent => f.write_str("independent"),
            DependenceModel::Copula => f.write_str("copula"),
        }
    }
}

impl FromStr for DependenceModel {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "independent" => Ok(DependenceModel::Independent),
            "copula" => Ok(DependenceModel::Copula),
            other => Err(StrataError::ConfigError(format!(
                "Unknown dependence model: {} (expected independent or copula)",
                other
            ))),
        }
    }
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of simulated paths per instrument.
    pub num_paths: usize,
    /// Horizon in years of 252 trading days.
    pub horizon_years: usize,
    /// Explicit horizon in trading days; overrides `horizon_years`.
    pub horizon_days: Option<usize>,
    /// Seed for every random stream of the run.
    pub seed: u64,
    pub dependence_model: DependenceModel,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_paths: 1000,
            horizon_years: 10,
            horizon_days: None,
            seed: 42,
            dependence_model: DependenceModel::Independent,
        }
    }
}

impl SimulationConfig {
    /// Create config for quick analysis.
    pub fn quick() -> Self {
        Self {
            num_paths: 100,
            ..Default::default()
        }
    }

    pub fn with_paths(mut self, n: usize) -> Self {
        self.num_paths = n;
        self
    }

    pub fn with_horizon_years(mut self, years: usize) -> Self {
        self.horizon_years = years;
        self.horizon_days = None;
        self
    }

    pub fn with_horizon_days(mut self, days: usize) -> Self {
        self.horizon_days = Some(days);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dependence_model(mut self, model: DependenceModel) -> Self {
        self.dependence_model = model;
        self
    }

    /// Horizon length `T` in trading days.
    pub fn horizon(&self) -> usize {
        self.horizon_days
            .unwrap_or(self.horizon_years * TRADING_DAYS_PER_YEAR)
    }
}

/// Simulated prices indexed by (instrument, time step `0..=T`, path).
///
/// Step 0 holds the last observed price on every path.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPriceCube {
    instruments: Vec<String>,
    n_steps: usize,
    n_paths: usize,
    /// Per instrument, step-major: `data[i][t * n_paths + p]`.
    data: Vec<Vec<f64>>,
}

impl SimulatedPriceCube {
    pub fn new(
        instruments: Vec<String>,
        n_steps: usize,
        n_paths: usize,
        data: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if data.len() != instruments.len() {
            return Err(StrataError::DimensionMismatch(format!(
                "{} instruments but {} simulated blocks",
                instruments.len(),
                data.len()
            )));
        }
        if let Some((i, _)) = data
            .iter()
            .enumerate()
            .find(|(_, block)| block.len() != n_steps * n_paths)
        {
            return Err(StrataError::DimensionMismatch(format!(
                "Simulated block for {} has {} values, expected {}",
                instruments[i],
                data[i].len(),
                n_steps * n_paths
            )));
        }
        Ok(Self {
            instruments,
            n_steps,
            n_paths,
            data,
        })
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Time steps including step 0, i.e. `T + 1`.
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Horizon `T` in trading days.
    pub fn horizon_days(&self) -> usize {
        self.n_steps.saturating_sub(1)
    }

    pub fn n_paths(&self) -> usize {
        self.n_paths
    }

    pub fn price(&self, instrument: usize, step: usize, path: usize) -> f64 {
        self.data[instrument][step * self.n_paths + path]
    }

    /// Prices of every path at one step.
    pub fn step(&self, instrument: usize, step: usize) -> &[f64] {
        let start = step * self.n_paths;
        &self.data[instrument][start..start + self.n_paths]
    }

    /// One path of one instrument over all steps.
    pub fn path(&self, instrument: usize, path: usize) -> Vec<f64> {
        (0..self.n_steps)
            .map(|t| self.price(instrument, t, path))
            .collect()
    }
}

/// Forward simulator for fitted volatility models.
#[derive(Debug, Clone, Default)]
pub struct PathSimulator {
    config: SimulationConfig,
}

impl PathSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Fit a volatility model per instrument, then simulate.
    pub fn simulate_prices(
        &self,
        prices: &CleanPrices,
        model: &VolatilityModel,
    ) -> Result<(SimulatedPriceCube, Vec<GarchFit>)> {
        let returns: Vec<Vec<f64>> = prices
            .columns
            .iter()
            .map(|c| crate::returns::simple_returns(c))
            .collect();
        let fits = model.fit_all(&returns)?;
        let cube = self.simulate(&prices.instruments, &prices.last_prices(), &fits)?;
        Ok((cube, fits))
    }

    /// Simulate from fitted models with the configured dependence model.
    pub fn simulate(
        &self,
        instruments: &[String],
        last_prices: &[f64],
        fits: &[GarchFit],
    ) -> Result<SimulatedPriceCube> {
        if instruments.len() != last_prices.len() || instruments.len() != fits.len() {
            return Err(StrataError::DimensionMismatch(format!(
                "{} instruments, {} prices, {} fitted models",
                instruments.len(),
                last_prices.len(),
                fits.len()
            )));
        }
        let states: Vec<VolatilityState> = fits.iter().map(|f| f.state()).collect();

        match self.config.dependence_model {
            DependenceModel::Independent => self.simulate_independent(instruments, last_prices, &states),
            DependenceModel::Copula => {
                let residuals: Vec<Vec<f64>> =
                    fits.iter().map(|f| f.standardized_residuals.clone()).collect();
                let copula = GaussianCopula::fit(&residuals)?;
                self.simulate_copula(instruments, last_prices, &states, &copula)
            }
        }
    }

    /// Independent Student's-t shocks; one random stream per instrument.
    pub fn simulate_independent(
        &self,
        instruments: &[String],
        last_prices: &[f64],
        states: &[VolatilityState],
    ) -> Result<SimulatedPriceCube> {
        let horizon = self.config.horizon();
        let paths = self.config.num_paths;
        info!(
            "Simulating {} instruments × {} paths × {} days (independent)",
            instruments.len(),
            paths,
            horizon
        );

        let data = last_prices
            .par_iter()
            .zip(states.par_iter())
            .enumerate()
            .map(|(i, (&price, state))| {
                let mut rng = StdRng::seed_from_u64(stream_seed(self.config.seed, i as u64));
                simulate_instrument(price, state, horizon, paths, &mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        SimulatedPriceCube::new(instruments.to_vec(), horizon + 1, paths, data)
    }

    /// Copula-coupled shocks; one random stream per path.
    pub fn simulate_copula(
        &self,
        instruments: &[String],
        last_prices: &[f64],
        states: &[VolatilityState],
        copula: &GaussianCopula,
    ) -> Result<SimulatedPriceCube> {
        let k = instruments.len();
        if copula.dimension() != k || states.len() != k || last_prices.len() != k {
            return Err(StrataError::DimensionMismatch(format!(
                "Copula over {} instruments, {} states, {} prices for {} instruments",
                copula.dimension(),
                states.len(),
                last_prices.len(),
                k
            )));
        }
        let horizon = self.config.horizon();
        let paths = self.config.num_paths;
        info!(
            "Simulating {} instruments × {} paths × {} days (copula)",
            k, paths, horizon
        );

        // Path-major: per_path[p][i][t]
        let per_path: Vec<Vec<Vec<f64>>> = (0..paths)
            .into_par_iter()
            .map(|p| {
                let mut rng = StdRng::seed_from_u64(stream_seed(self.config.seed, p as u64));
                let mut recurrences: Vec<Recurrence> =
                    states.iter().map(Recurrence::from_state).collect();
                let mut series: Vec<Vec<f64>> = last_prices
                    .iter()
                    .map(|&price| {
                        let mut s = Vec::with_capacity(horizon + 1);
                        s.push(price);
                        s
                    })
                    .collect();
                for _ in 0..horizon {
                    let shocks = copula.sample_residuals(&mut rng);
                    for i in 0..k {
                        let r = recurrences[i].step(shocks[i]);
                        let prev = series[i][series[i].len() - 1];
                        series[i].push(prev * (1.0 + r / 100.0));
                    }
                }
                series
            })
            .collect();

        let mut data = vec![vec![0.0; (horizon + 1) * paths]; k];
        for (p, series) in per_path.iter().enumerate() {
            for (i, s) in series.iter().enumerate() {
                for (t, price) in s.iter().enumerate() {
                    data[i][t * paths + p] = *price;
                }
            }
        }

        SimulatedPriceCube::new(instruments.to_vec(), horizon + 1, paths, data)
    }
}

/// Simulate one instrument, returning a step-major `(horizon + 1) × paths` block.
pub fn simulate_instrument(
    last_price: f64,
    state: &VolatilityState,
    horizon: usize,
    paths: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    let sampler = StandardizedStudentT::new(state.params.nu)?;

    let mut out = Vec::with_capacity((horizon + 1) * paths);
    out.extend(std::iter::repeat(last_price).take(paths));
    let mut recurrences = vec![Recurrence::from_state(state); paths];

    for t in 1..=horizon {
        let prev_start = (t - 1) * paths;
        for (p, rec) in recurrences.iter_mut().enumerate() {
            let r = rec.step(sampler.sample(rng));
            let prev = out[prev_start + p];
            out.push(prev * (1.0 + r / 100.0));
        }
    }
    Ok(out)
}

/// Student's-t draws rescaled to unit variance.
#[derive(Debug, Clone)]
pub struct StandardizedStudentT {
    dist: StudentT<f64>,
    scale: f64,
}

impl StandardizedStudentT {
    pub fn new(nu: f64) -> Result<Self> {
        if !(nu > 2.0) {
            return Err(StrataError::ModelFit(format!(
                "Degrees of freedom {} must exceed 2 for unit variance",
                nu
            )));
        }
        let dist = StudentT::new(nu)
            .map_err(|e| StrataError::ModelFit(format!("Student's t with nu={}: {}", nu, e)))?;
        Ok(Self {
            dist,
            scale: ((nu - 2.0) / nu).sqrt(),
        })
    }

    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        self.dist.sample(rng) * self.scale
    }
}

/// GARCH recurrence state of one simulated path.
#[derive(Debug, Clone, Copy)]
struct Recurrence {
    mu: f64,
    omega: f64,
    alpha: f64,
    beta: f64,
    innovation: f64,
    variance: f64,
}

impl Recurrence {
    fn from_state(state: &VolatilityState) -> Self {
        Self {
            mu: state.params.mu,
            omega: state.params.omega,
            alpha: state.params.alpha,
            beta: state.params.beta,
            innovation: state.last_innovation,
            variance: state.last_volatility * state.last_volatility,
        }
    }

    /// Advance one step with shock `z`, returning the percent return.
    fn step(&mut self, z: f64) -> f64 {
        self.variance =
            self.omega + self.alpha * self.innovation * self.innovation + self.beta * self.variance;
        self.innovation = self.variance.sqrt() * z;
        self.mu + self.innovation
    }
}

/// Seed of an independent stream derived from the run seed (SplitMix64 mix).
pub fn stream_seed(seed: u64, index: u64) -> u64 {
    let mut z = seed ^ index.wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
