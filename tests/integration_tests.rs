//! Integration tests for the allocation and simulation engine.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::io::Write;

use strata::analytics::StatisticsAggregator;
use strata::config::StrataFileConfig;
use strata::copula::GaussianCopula;
use strata::data::{
    CachedMarketData, CsvMarketData, MarketDataProvider, RiskFreeSource, StaticAllocations,
};
use strata::engine::{Engine, RunConfig};
use strata::monte_carlo::{DependenceModel, PathSimulator, SimulationConfig};
use strata::returns::{cumulative_returns, simple_returns, ReturnsCovariance};
use strata::strategies::{self, OptimizationEngine, Strategy};
use strata::types::{PriceMatrix, StrategyWeights, WeightVector};
use strata::volatility::{VolatilityModel, VolatilityModelParams, VolatilityState};
use strata::StrataError;

fn dates(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2015, 1, 2).unwrap();
    (0..n as i64).map(|i| start + chrono::Duration::days(i)).collect()
}

/// Random-walk prices with the given daily volatilities and a common factor.
fn random_prices(n: usize, vols: &[f64], common: f64, seed: u64) -> PriceMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut columns: Vec<Vec<f64>> = vols.iter().map(|_| vec![100.0]).collect();
    for _ in 1..n {
        let market: f64 = rng.sample(StandardNormal);
        for (col, vol) in columns.iter_mut().zip(vols) {
            let own: f64 = rng.sample(StandardNormal);
            let r = 0.0003 + vol * (common * market + (1.0 - common * common).sqrt() * own);
            let last = *col.last().unwrap();
            col.push(last * (1.0 + r));
        }
    }
    let named = columns
        .into_iter()
        .enumerate()
        .map(|(i, c)| (format!("I{}", i), c))
        .collect();
    PriceMatrix::from_columns(dates(n), named).unwrap()
}

fn state(last_volatility: f64) -> VolatilityState {
    VolatilityState {
        params: VolatilityModelParams {
            mu: 0.03,
            omega: 0.02,
            alpha: 0.08,
            beta: 0.9,
            nu: 6.0,
        },
        last_innovation: 0.5,
        last_volatility,
    }
}

#[test]
fn test_min_volatility_prefers_low_variance_instrument() {
    let prices = random_prices(500, &[0.004, 0.02], 0.2, 1);
    let weights = strategies::min_volatility(&prices).unwrap();
    assert!(weights.weight("I0") > weights.weight("I1"));
    assert!((weights.sum() - 1.0).abs() < 1e-6);
}

#[test]
fn test_hrp_on_identical_instruments_splits_evenly() {
    let a: Vec<f64> = (0..300)
        .map(|i| 100.0 * (1.0 + 0.01 * (i as f64 * 0.3).sin()))
        .collect();
    let prices = PriceMatrix::from_columns(
        dates(300),
        vec![("A".to_string(), a.clone()), ("B".to_string(), a)],
    )
    .unwrap();

    let weights = strategies::hierarchical_risk_parity(&prices).unwrap();
    assert!((weights.weight("A") - 0.5).abs() < 1e-9);
    assert!((weights.weight("B") - 0.5).abs() < 1e-9);
}

#[test]
fn test_every_strategy_is_long_only_and_fully_invested() {
    let prices = random_prices(600, &[0.006, 0.01, 0.015, 0.008], 0.4, 5);
    let engine = OptimizationEngine::new(&prices, 0.0).unwrap();
    let table = engine.optimize_all(&Strategy::ALL).unwrap();

    assert_eq!(table.len(), 4);
    for (name, weights) in table.iter() {
        for (instrument, w) in weights.iter() {
            assert!(
                (-1e-9..=1.0 + 1e-9).contains(w),
                "{} gives {} weight {}",
                name,
                instrument,
                w
            );
        }
        assert!((weights.sum() - 1.0).abs() < 1e-6, "{} sums to {}", name, weights.sum());
    }
}

#[test]
fn test_unknown_strategy_name() {
    let prices = random_prices(100, &[0.01, 0.02], 0.0, 2);
    assert!(matches!(
        "banana".parse::<Strategy>(),
        Err(StrataError::UnknownStrategy(name)) if name == "banana"
    ));
    assert!(matches!(
        strategies::optimize("banana", &prices, 0.0),
        Err(StrataError::UnknownStrategy(_))
    ));
}

#[test]
fn test_cumulative_returns_round_trip() {
    let prices = [100.0, 101.0, 99.5, 103.0, 104.2];
    let growth = cumulative_returns(&simple_returns(&prices));
    for (g, p) in growth.iter().zip(prices[1..].iter()) {
        assert!((g - p / prices[0]).abs() < 1e-12);
    }

    let recovered: Vec<f64> = std::iter::once(1.0)
        .chain(growth.iter().copied())
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    for (a, b) in recovered.iter().zip(simple_returns(&prices)) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_zero_horizon_single_path() {
    let config = SimulationConfig::default().with_paths(1).with_horizon_days(0);
    let cube = PathSimulator::new(config)
        .simulate_independent(&["A".to_string()], &[123.45], &[state(1.0)])
        .unwrap();
    assert_eq!(cube.n_steps(), 1);
    assert_eq!(cube.n_paths(), 1);
    assert_eq!(cube.price(0, 0, 0), 123.45);

    let mut weights = StrategyWeights::new();
    weights.insert("all_in", [("A".to_string(), 1.0)].into_iter().collect::<WeightVector>());
    assert!(matches!(
        StatisticsAggregator::default().aggregate(&cube, &weights),
        Err(StrataError::InsufficientData(_))
    ));
}

#[test]
fn test_simulation_is_deterministic_for_a_seed() {
    let instruments = vec!["A".to_string(), "B".to_string()];
    let states = [state(1.0), state(1.5)];
    let config = SimulationConfig::default().with_paths(50).with_horizon_days(252).with_seed(9);

    let first = PathSimulator::new(config.clone())
        .simulate_independent(&instruments, &[100.0, 50.0], &states)
        .unwrap();
    let second = PathSimulator::new(config)
        .simulate_independent(&instruments, &[100.0, 50.0], &states)
        .unwrap();
    assert_eq!(first, second);
}

/// Correlated unit-variance residual series for two instruments.
fn correlated_residuals(n: usize, rho: f64, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut a = Vec::with_capacity(n);
    let mut b = Vec::with_capacity(n);
    for _ in 0..n {
        let x: f64 = rng.sample(StandardNormal);
        let y: f64 = rng.sample(StandardNormal);
        a.push(x);
        b.push(rho * x + (1.0 - rho * rho).sqrt() * y);
    }
    vec![a, b]
}

#[test]
fn test_copula_simulation_is_deterministic_for_a_seed() {
    let instruments = vec!["A".to_string(), "B".to_string()];
    let states = [state(1.0), state(1.5)];
    let copula = GaussianCopula::fit(&correlated_residuals(500, 0.6, 13)).unwrap();
    let config = SimulationConfig::default()
        .with_paths(50)
        .with_horizon_days(252)
        .with_seed(9)
        .with_dependence_model(DependenceModel::Copula);

    let first = PathSimulator::new(config.clone())
        .simulate_copula(&instruments, &[100.0, 50.0], &states, &copula)
        .unwrap();
    let second = PathSimulator::new(config.clone())
        .simulate_copula(&instruments, &[100.0, 50.0], &states, &copula)
        .unwrap();
    assert_eq!(first, second);

    let reseeded = PathSimulator::new(config.with_seed(10))
        .simulate_copula(&instruments, &[100.0, 50.0], &states, &copula)
        .unwrap();
    assert_ne!(first, reseeded);
    assert_eq!(reseeded.price(0, 0, 0), 100.0);
}

#[test]
fn test_fitted_copula_run_is_deterministic_for_a_seed() {
    let clean = random_prices(400, &[0.008, 0.012], 0.6, 17).clean().unwrap();
    let model = VolatilityModel::default();
    let config = SimulationConfig::default()
        .with_paths(30)
        .with_horizon_days(100)
        .with_seed(5)
        .with_dependence_model(DependenceModel::Copula);

    let (first, _) = PathSimulator::new(config.clone()).simulate_prices(&clean, &model).unwrap();
    let (second, _) = PathSimulator::new(config.clone()).simulate_prices(&clean, &model).unwrap();
    assert_eq!(first, second);

    let (other, _) = PathSimulator::new(config.with_seed(6)).simulate_prices(&clean, &model).unwrap();
    assert_ne!(first, other);
}

/// Two trending instruments and one that never moves.
fn prices_with_flat_instrument() -> PriceMatrix {
    let base = random_prices(300, &[0.008, 0.012], 0.3, 31);
    let mut instruments = base.instruments().to_vec();
    instruments.push("FLAT".to_string());
    let rows = base
        .rows()
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.push(Some(50.0));
            row
        })
        .collect();
    PriceMatrix::new(base.dates().to_vec(), instruments, rows).unwrap()
}

#[test]
fn test_flat_instrument_is_infeasible_for_sharpe_and_risk_parity() {
    let prices = prices_with_flat_instrument();
    for name in ["max_sharpe", "risk_parity"] {
        assert!(
            matches!(
                strategies::optimize(name, &prices, 0.0),
                Err(StrataError::InfeasibleOptimization(_))
            ),
            "{} accepted a zero-variance instrument",
            name
        );
    }
    assert!(matches!(
        strategies::max_sharpe(&prices, 0.0),
        Err(StrataError::InfeasibleOptimization(_))
    ));
    assert!(matches!(
        strategies::risk_parity(&prices),
        Err(StrataError::InfeasibleOptimization(_))
    ));
}

#[test]
fn test_flat_instrument_fails_engine_runs() {
    let prices = prices_with_flat_instrument();
    let instruments = prices.instruments().to_vec();
    let provider = CsvMarketData::from_matrix(prices, RiskFreeSource::Fixed(0.0));
    let market = provider
        .fetch(&instruments, NaiveDate::MIN, NaiveDate::MAX)
        .unwrap();
    let simulation = SimulationConfig::default().with_paths(20).with_horizon_days(50);

    // Strategies run before the volatility models
    let optimized = Engine::new(
        CsvMarketData::from_matrix(market.prices.clone(), RiskFreeSource::Fixed(0.0)),
        RunConfig::new(instruments.clone())
            .with_strategies(vec![Strategy::MaxSharpe, Strategy::RiskParity])
            .with_simulation(simulation.clone()),
    );
    assert!(matches!(
        optimized.run_on(market.clone(), &StaticAllocations::new()),
        Err(StrataError::InfeasibleOptimization(_))
    ));

    // With only a reference portfolio the flat series reaches the volatility fit
    let mut allocations = StaticAllocations::new();
    allocations.insert(
        "even",
        instruments.iter().map(|i| (i.clone(), 1.0)).collect::<WeightVector>(),
    );
    let reference_only = Engine::new(
        provider,
        RunConfig::new(instruments)
            .with_strategies(vec![])
            .with_simulation(simulation),
    );
    assert!(matches!(
        reference_only.run_on(market, &allocations),
        Err(StrataError::ModelFit(_))
    ));
}

#[test]
fn test_statistics_invariants_on_fitted_simulation() {
    let prices = random_prices(800, &[0.008, 0.012, 0.006], 0.5, 21);
    let clean = prices.clean().unwrap();
    let model = VolatilityModel::default();

    for dependence in [DependenceModel::Independent, DependenceModel::Copula] {
        let config = SimulationConfig::default()
            .with_paths(200)
            .with_horizon_years(3)
            .with_dependence_model(dependence);
        let (cube, fits) = PathSimulator::new(config).simulate_prices(&clean, &model).unwrap();
        assert_eq!(fits.len(), 3);
        assert_eq!(cube.horizon_days(), 756);

        let engine = OptimizationEngine::from_returns(ReturnsCovariance::from_clean(&clean).unwrap(), 0.0);
        let weights = engine
            .optimize_all(&[Strategy::MinVolatility, Strategy::HierarchicalRiskParity])
            .unwrap();
        let table = StatisticsAggregator::default().aggregate(&cube, &weights).unwrap();

        for (name, stats) in table.iter() {
            assert!(stats.cvar <= stats.mean_annual_return, "{}: CVaR above mean", name);
            assert!((0.0..=1.0).contains(&stats.shortfall_probability));
            assert!((0.0..=1.0).contains(&stats.large_loss_probability));
            assert!(stats.min_annual_return <= stats.p5_annual_return);
            assert!(stats.p95_annual_return <= stats.max_annual_return);
        }
    }
}

#[test]
fn test_csv_provider_end_to_end_with_config() {
    let prices = random_prices(400, &[0.007, 0.011], 0.3, 8);
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("prices.csv");
    strata::data::write_price_csv(&prices, &csv_path).unwrap();

    let config_path = dir.path().join("strata.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    write!(
        file,
        r#"
[data]
path = "{}"
instruments = ["I0", "I1"]
risk_free_rate = 0.01

[optimization]
strategies = ["min_volatility", "risk_parity"]

[simulation]
num_paths = 40
horizon_days = 252
seed = 3

[[portfolios]]
name = "even"
weights = {{ I0 = 1.0, I1 = 1.0 }}
"#,
        csv_path.display()
    )
    .unwrap();

    let file_config = StrataFileConfig::load(&config_path).unwrap();
    file_config.validate().unwrap();
    let provider = CachedMarketData::new(
        CsvMarketData::from_path(file_config.data.path.as_ref().unwrap(), file_config.data.risk_free_source())
            .unwrap(),
    );
    let report = Engine::new(provider, file_config.to_run_config().unwrap())
        .run(&file_config.allocations())
        .unwrap();

    let names: Vec<&str> = report.weights.names().collect();
    assert_eq!(names, vec!["min_volatility", "risk_parity", "even"]);
    assert!((report.weights.get("even").unwrap().weight("I0") - 0.5).abs() < 1e-12);
    assert_eq!(report.statistics.len(), 3);
    assert_eq!(report.risk_free_rate, 0.01);
    // 2015-01-02 plus 400 days covers only the 2015 crash window
    assert_eq!(report.stress.len(), 1);
    let row = report.stress.get("Chinese Stock Market Crash").unwrap();
    assert_eq!(row.returns.len(), 3);
}

#[test]
fn test_cached_provider_returns_same_data() {
    let prices = random_prices(50, &[0.01], 0.0, 4);
    let cached = CachedMarketData::new(CsvMarketData::from_matrix(prices, RiskFreeSource::Fixed(0.02)));
    let request = vec!["I0".to_string()];
    let start = NaiveDate::from_ymd_opt(2015, 1, 10).unwrap();
    let end = NaiveDate::from_ymd_opt(2015, 2, 10).unwrap();

    let a = cached.fetch(&request, start, end).unwrap();
    let b = cached.fetch(&request, start, end).unwrap();
    assert_eq!(a, b);
    assert_eq!(cached.len(), 1);
    assert_eq!(a.prices.len(), 32);
}

#[test]
fn test_run_config_defaults() {
    let config = RunConfig::new(vec!["A".to_string()]);
    assert_eq!(config.strategies.len(), 4);
    assert_eq!(config.simulation.horizon(), 2520);
    assert_eq!(config.stress_events.len(), 5);
    assert!(config.without_stress().stress_events.is_empty());
    let _ = StaticAllocations::new();
}
