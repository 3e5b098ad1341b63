//! Export and display of run reports.
//!
//! | Format | Use Case |
//! |--------|----------|
//! | CSV | Weight, statistics, performance and stress tables |
//! | JSON | The full [`Report`] as nested key-value structures |
//! | Text | Terminal tables via [`ResultFormatter`] |
//!
//! # Example
//!
//! ```ignore
//! use strata::export::Exporter;
//!
//! let exporter = Exporter::new(report);
//! exporter.export_weights_csv("weights.csv")?;
//! exporter.export_report_json("report.json")?;
//! ```

use crate::engine::Report;
use crate::error::Result;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tabled::{builder::Builder, settings::Style};

/// Configuration for exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Decimal precision for numeric values.
    pub precision: usize,
    /// Whether to include headers in CSV.
    pub include_headers: bool,
    /// Delimiter for CSV files.
    pub delimiter: char,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            precision: 6,
            include_headers: true,
            delimiter: ',',
        }
    }
}

/// Writes a report's tables to files.
pub struct Exporter {
    report: Report,
    config: ExportConfig,
}

impl Exporter {
    pub fn new(report: Report) -> Self {
        Self {
            report,
            config: ExportConfig::default(),
        }
    }

    pub fn with_config(report: Report, config: ExportConfig) -> Self {
        Self { report, config }
    }

    pub fn report(&self) -> &Report {
        &self.report
    }

    /// Instruments as rows, strategies as columns.
    pub fn export_weights_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        let d = self.config.delimiter;
        let prec = self.config.precision;

        if self.config.include_headers {
            write!(writer, "instrument")?;
            for name in self.report.weights.names() {
                write!(writer, "{}{}", d, name)?;
            }
            writeln!(writer)?;
        }
        for instrument in &self.report.instruments {
            write!(writer, "{}", instrument)?;
            for (_, weights) in self.report.weights.iter() {
                write!(writer, "{}{:.prec$}", d, weights.weight(instrument))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Metrics as rows, strategies as columns.
    pub fn export_statistics_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        let d = self.config.delimiter;
        let prec = self.config.precision;

        if self.config.include_headers {
            write!(writer, "metric")?;
            for name in self.report.statistics.names() {
                write!(writer, "{}{}", d, name)?;
            }
            writeln!(writer)?;
        }
        for (metric, values) in self.report.statistics.rows() {
            write!(writer, "{}", metric)?;
            for v in values {
                write!(writer, "{}{:.prec$}", d, v)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// One row per strategy.
    pub fn export_performance_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        let d = self.config.delimiter;
        let prec = self.config.precision;

        if self.config.include_headers {
            writeln!(
                writer,
                "strategy{d}total_return_pct{d}annual_return_pct{d}expected_return_pct{d}volatility_annual_pct{d}sharpe_ratio{d}max_drawdown_pct{d}trading_days"
            )?;
        }
        for (name, m) in &self.report.performance {
            writeln!(
                writer,
                "{}{d}{:.prec$}{d}{:.prec$}{d}{:.prec$}{d}{:.prec$}{d}{}{d}{:.prec$}{d}{}",
                name,
                m.total_return_pct,
                m.annual_return_pct,
                m.expected_return_pct,
                m.volatility_annual_pct,
                Self::format_optional(m.sharpe_ratio, prec),
                m.max_drawdown_pct,
                m.trading_days,
            )?;
        }
        Ok(())
    }

    /// Events as rows, strategies as columns.
    pub fn export_stress_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        let d = self.config.delimiter;
        let prec = self.config.precision;

        if self.config.include_headers {
            write!(writer, "event{d}start{d}end{d}trading_days")?;
            for name in self.report.weights.names() {
                write!(writer, "{}{}", d, name)?;
            }
            writeln!(writer)?;
        }
        for row in &self.report.stress.rows {
            write!(
                writer,
                "{}{d}{}{d}{}{d}{}",
                row.event.name, row.event.start, row.event.end, row.trading_days
            )?;
            for name in self.report.weights.names() {
                match row.returns.iter().find(|(n, _)| n == name) {
                    Some((_, r)) => write!(writer, "{}{:.prec$}", d, r)?,
                    None => write!(writer, "{}", d)?,
                }
            }
            writeln!(writer)?;
        }
        Ok(())
    }

    /// Write the full report as JSON.
    pub fn export_report_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.report)?;
        Ok(())
    }

    /// Fixed-precision value, or `n/a` when undefined.
    fn format_optional(value: Option<f64>, precision: usize) -> String {
        match value {
            Some(v) => format!("{:.precision$}", v),
            None => "n/a".to_string(),
        }
    }

    /// Write every table into `dir` under fixed file names.
    pub fn export_all(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        self.export_weights_csv(dir.join("weights.csv"))?;
        self.export_statistics_csv(dir.join("statistics.csv"))?;
        self.export_performance_csv(dir.join("performance.csv"))?;
        self.export_stress_csv(dir.join("stress.csv"))?;
        self.export_report_json(dir.join("report.json"))?;
        Ok(())
    }
}

/// Terminal output of reports.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print every section of a report to stdout.
    pub fn print_report(report: &Report) {
        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " ALLOCATION & SIMULATION RESULTS ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Instruments:     {}", report.instruments.join(", "));
        println!("  Period:          {} to {}", report.start, report.end);
        println!("  Observations:    {}", report.observations);
        println!("  Risk-free rate:  {:.2}%", report.risk_free_rate * 100.0);
        println!(
            "  Simulation:      {} paths × {} days, seed {}, {}",
            report.simulation.num_paths,
            report.simulation.horizon(),
            report.simulation.seed,
            report.simulation.dependence_model
        );
        println!();

        println!("{}", "Weights".bold().underline());
        Self::print_weights(report);
        println!();

        println!("{}", "Simulated Annual Returns".bold().underline());
        Self::print_statistics(report);
        println!();

        println!("{}", "Historical Performance".bold().underline());
        Self::print_performance(report);
        println!();

        if !report.stress.is_empty() {
            println!("{}", "Stress Windows (annualized)".bold().underline());
            Self::print_stress(report);
            println!();
        }

        println!("{}", "═".repeat(60).blue());
    }

    pub fn print_weights(report: &Report) {
        let mut builder = Builder::new();
        let mut header = vec!["Instrument".to_string()];
        header.extend(report.weights.names().map(str::to_string));
        builder.push_record(header);

        for instrument in &report.instruments {
            let mut row = vec![instrument.clone()];
            row.extend(
                report
                    .weights
                    .iter()
                    .map(|(_, w)| format!("{:.2}%", w.weight(instrument) * 100.0)),
            );
            builder.push_record(row);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    pub fn print_statistics(report: &Report) {
        let mut builder = Builder::new();
        let mut header = vec!["Metric".to_string()];
        header.extend(report.statistics.names().map(str::to_string));
        builder.push_record(header);

        for (metric, values) in report.statistics.rows() {
            let mut row = vec![metric.to_string()];
            row.extend(values.iter().map(|v| Self::format_metric(metric, *v)));
            builder.push_record(row);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    pub fn print_performance(report: &Report) {
        let mut builder = Builder::new();
        builder.push_record([
            "Strategy", "Total %", "Annual %", "Volatility %", "Sharpe", "Max DD %",
        ]);
        for (name, m) in &report.performance {
            builder.push_record([
                name.clone(),
                Self::format_pct_change(m.total_return_pct),
                format!("{:.2}", m.annual_return_pct),
                format!("{:.2}", m.volatility_annual_pct),
                Exporter::format_optional(m.sharpe_ratio, 2),
                format!("{:.2}", -m.max_drawdown_pct),
            ]);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    pub fn print_stress(report: &Report) {
        let mut builder = Builder::new();
        let mut header = vec!["Event".to_string(), "Days".to_string()];
        header.extend(report.weights.names().map(str::to_string));
        builder.push_record(header);

        for row in &report.stress.rows {
            let mut cells = vec![row.event.name.clone(), row.trading_days.to_string()];
            cells.extend(report.weights.names().map(|name| {
                row.returns
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, r)| Self::format_pct_change(r * 100.0))
                    .unwrap_or_else(|| "-".to_string())
            }));
            builder.push_record(cells);
        }
        println!("{}", builder.build().with(Style::rounded()));
    }

    /// Probabilities as percentages, everything else as percent returns.
    fn format_metric(metric: &str, value: f64) -> String {
        if metric.contains("probability") || metric.starts_with("P(") {
            format!("{:.1}%", value * 100.0)
        } else {
            format!("{:.2}%", value * 100.0)
        }
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("+{:.2}%", pct).green().to_string()
        } else {
            format!("{:.2}%", pct).red().to_string()
        }
    }

    /// Export a report to JSON.
    pub fn to_json(report: &Report) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{PerformanceMetrics, PortfolioStatistics, StatisticsTable};
    use crate::monte_carlo::SimulationConfig;
    use crate::stress::{CrisisEvent, StressRow, StressTable};
    use crate::types::{StrategyWeights, WeightVector};
    use chrono::NaiveDate;
    use std::fs;

    fn stats(mean: f64) -> PortfolioStatistics {
        PortfolioStatistics {
            mean_annual_return: mean,
            annual_return_std: 0.1,
            min_annual_return: -0.2,
            p5_annual_return: -0.05,
            p25_annual_return: 0.0,
            median_annual_return: mean,
            p75_annual_return: 0.08,
            p95_annual_return: 0.15,
            max_annual_return: 0.3,
            tail_cutoff: -0.3,
            cvar: -0.08,
            shortfall_probability: 0.12,
            large_loss_probability: 0.02,
            mean_cumulative_return: 0.9,
        }
    }

    fn report() -> Report {
        let d = |m| NaiveDate::from_ymd_opt(2020, m, 1).unwrap();
        let mut weights = StrategyWeights::new();
        weights.insert(
            "min_volatility",
            [("AGG".to_string(), 0.8), ("SPY".to_string(), 0.2)].into_iter().collect::<WeightVector>(),
        );
        weights.insert(
            "max_sharpe",
            [("SPY".to_string(), 1.0)].into_iter().collect::<WeightVector>(),
        );
        let mut statistics = StatisticsTable::new();
        statistics.insert("min_volatility", stats(0.04));
        statistics.insert("max_sharpe", stats(0.07));
        let metrics = PerformanceMetrics::from_returns(&[0.01, -0.005, 0.002], 0.0).unwrap();
        let riskless = PerformanceMetrics::from_returns(&[0.0; 3], 0.0).unwrap();

        Report {
            instruments: vec!["SPY".to_string(), "AGG".to_string()],
            start: d(1),
            end: d(6),
            observations: 100,
            risk_free_rate: 0.02,
            simulation: SimulationConfig::quick(),
            weights,
            statistics,
            performance: vec![
                ("min_volatility".to_string(), metrics),
                ("max_sharpe".to_string(), riskless),
            ],
            volatility_models: Vec::new(),
            stress: StressTable {
                rows: vec![StressRow {
                    event: CrisisEvent::new("COVID-19 Pandemic", d(2), d(4)),
                    trading_days: 40,
                    returns: vec![("max_sharpe".to_string(), -0.35)],
                }],
            },
        }
    }

    #[test]
    fn test_weights_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.csv");
        Exporter::new(report()).export_weights_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "instrument,min_volatility,max_sharpe");
        assert_eq!(lines[1], "SPY,0.200000,1.000000");
        assert_eq!(lines[2], "AGG,0.800000,0.000000");
    }

    #[test]
    fn test_statistics_csv_has_one_row_per_metric() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        Exporter::new(report()).export_statistics_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 15);
        assert!(content.starts_with("metric,min_volatility,max_sharpe"));
    }

    #[test]
    fn test_performance_csv_marks_undefined_sharpe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("performance.csv");
        Exporter::new(report()).export_performance_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        let sharpe_column = lines[0].split(',').position(|c| c == "sharpe_ratio").unwrap();
        assert_ne!(lines[1].split(',').nth(sharpe_column), Some("n/a"));
        assert_eq!(lines[2].split(',').nth(sharpe_column), Some("n/a"));
    }

    #[test]
    fn test_stress_csv_leaves_missing_cells_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stress.csv");
        Exporter::new(report()).export_stress_csv(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let row = content.lines().nth(1).unwrap();
        assert!(row.starts_with("COVID-19 Pandemic,2020-02-01,2020-04-01,40,,"));
    }

    #[test]
    fn test_export_all_and_json() {
        let dir = tempfile::tempdir().unwrap();
        Exporter::new(report()).export_all(dir.path()).unwrap();
        for file in ["weights.csv", "statistics.csv", "performance.csv", "stress.csv", "report.json"] {
            assert!(dir.path().join(file).exists(), "{} missing", file);
        }

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
                .unwrap();
        assert_eq!(json["weights"]["min_volatility"]["AGG"], 0.8);
        assert_eq!(json["statistics"]["max_sharpe"]["mean_annual_return"], 0.07);
    }

    #[test]
    fn test_to_json() {
        let json = ResultFormatter::to_json(&report());
        assert!(json.contains("COVID-19 Pandemic"));
        assert!(json.contains("risk_free_rate"));
    }
}
