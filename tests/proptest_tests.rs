//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Strategy weights stay long-only and fully invested for random markets
//! 2. Reference allocations normalize to one
//! 3. Simulation is reproducible and starts from the last price
//! 4. Risk statistics are internally consistent

use chrono::NaiveDate;
use proptest::prelude::*;

use strata::analytics::{annualize, percentile, StatisticsAggregator};
use strata::data::normalize_allocation;
use strata::monte_carlo::{PathSimulator, SimulationConfig};
use strata::returns::{cumulative_returns, simple_returns};
use strata::strategies::{OptimizationEngine, Strategy as Allocation};
use strata::types::{PriceMatrix, StrategyWeights, WeightVector};
use strata::volatility::{VolatilityModelParams, VolatilityState};

// ============================================================================
// Generators
// ============================================================================

/// Price matrix of `k` instruments built from bounded daily returns.
fn price_matrix_strategy(k: usize) -> impl Strategy<Value = PriceMatrix> {
    prop::collection::vec(prop::collection::vec(-0.03..0.03f64, 120), k).prop_map(move |series| {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..121).map(|i| start + chrono::Duration::days(i)).collect();
        let columns = series
            .into_iter()
            .enumerate()
            .map(|(i, returns)| {
                let mut prices = vec![100.0];
                for r in returns {
                    let last = *prices.last().unwrap();
                    prices.push(last * (1.0 + r));
                }
                (format!("X{}", i), prices)
            })
            .collect();
        PriceMatrix::from_columns(dates, columns).unwrap()
    })
}

fn state_strategy() -> impl Strategy<Value = VolatilityState> {
    (
        -0.05..0.1f64,
        0.01..0.2f64,
        0.0..0.15f64,
        0.6..0.84f64,
        3.0..30.0f64,
        -2.0..2.0f64,
        0.5..2.0f64,
    )
        .prop_map(|(mu, omega, alpha, beta, nu, innovation, volatility)| VolatilityState {
            params: VolatilityModelParams {
                mu,
                omega,
                alpha,
                beta,
                nu,
            },
            last_innovation: innovation,
            last_volatility: volatility,
        })
}

// ============================================================================
// Optimizer Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_weights_long_only_and_fully_invested(prices in price_matrix_strategy(3)) {
        let engine = OptimizationEngine::new(&prices, 0.0).unwrap();
        for strategy in [Allocation::MinVolatility, Allocation::HierarchicalRiskParity, Allocation::RiskParity] {
            let weights = engine.optimize(strategy).unwrap();
            prop_assert!((weights.sum() - 1.0).abs() < 1e-6, "{} sums to {}", strategy, weights.sum());
            for (_, w) in weights.iter() {
                prop_assert!(*w >= -1e-9 && *w <= 1.0 + 1e-9);
            }
        }
    }

    #[test]
    fn prop_normalized_allocation_sums_to_one(
        raw in prop::collection::vec(0.0..100.0f64, 1..6).prop_filter("positive total", |v| v.iter().sum::<f64>() > 1e-6)
    ) {
        let names: Vec<String> = (0..raw.len()).map(|i| format!("X{}", i)).collect();
        let weights = WeightVector::from_slices(&names, &raw).unwrap();
        let normalized = normalize_allocation(&weights, &names).unwrap();
        prop_assert!((normalized.sum() - 1.0).abs() < 1e-12);
        for (_, w) in normalized.iter() {
            prop_assert!((0.0..=1.0 + 1e-12).contains(w));
        }
    }
}

// ============================================================================
// Return and Statistics Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_cumulative_returns_reproduce_relative_prices(
        prices in prop::collection::vec(1.0..1000.0f64, 2..60)
    ) {
        let growth = cumulative_returns(&simple_returns(&prices));
        for (g, p) in growth.iter().zip(prices[1..].iter()) {
            prop_assert!((g - p / prices[0]).abs() < 1e-9 * (p / prices[0]).max(1.0));
        }
    }

    #[test]
    fn prop_percentile_within_range(
        values in prop::collection::vec(-1.0..1.0f64, 1..100),
        pct in 0.0..100.0f64
    ) {
        let p = percentile(&values, pct);
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(p >= min && p <= max);
    }

    #[test]
    fn prop_annualize_preserves_sign(
        cumulative in (-0.99..5.0f64).prop_filter("away from zero", |c| c.abs() > 1e-6),
        days in 1usize..5000
    ) {
        let annual = annualize(cumulative, days);
        prop_assert_eq!(annual > 0.0, cumulative > 0.0);
    }
}

// ============================================================================
// Simulation Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_simulation_reproducible(
        state in state_strategy(),
        last_price in 1.0..500.0f64,
        seed in any::<u64>()
    ) {
        let config = SimulationConfig::default().with_paths(8).with_horizon_days(60).with_seed(seed);
        let instruments = vec!["X".to_string()];
        let a = PathSimulator::new(config.clone())
            .simulate_independent(&instruments, &[last_price], &[state])
            .unwrap();
        let b = PathSimulator::new(config)
            .simulate_independent(&instruments, &[last_price], &[state])
            .unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert!(a.step(0, 0).iter().all(|p| *p == last_price));
    }

    #[test]
    fn prop_statistics_consistent(
        states in prop::collection::vec(state_strategy(), 2),
        seed in any::<u64>(),
        w in 0.0..1.0f64
    ) {
        let instruments = vec!["A".to_string(), "B".to_string()];
        let config = SimulationConfig::default().with_paths(40).with_horizon_days(300).with_seed(seed);
        let cube = PathSimulator::new(config)
            .simulate_independent(&instruments, &[100.0, 40.0], &states)
            .unwrap();

        let mut weights = StrategyWeights::new();
        weights.insert(
            "mix",
            WeightVector::from_slices(&instruments, &[w, 1.0 - w]).unwrap(),
        );
        let table = StatisticsAggregator::default().aggregate(&cube, &weights).unwrap();
        let stats = table.get("mix").unwrap();

        prop_assert!(stats.cvar <= stats.mean_annual_return + 1e-12);
        prop_assert!((0.0..=1.0).contains(&stats.shortfall_probability));
        prop_assert!((0.0..=1.0).contains(&stats.large_loss_probability));
        prop_assert!(stats.min_annual_return <= stats.median_annual_return);
        prop_assert!(stats.median_annual_return <= stats.max_annual_return);
        prop_assert!(stats.annual_return_std >= 0.0);
    }
}
