//! Command-line interface for the allocation and simulation engine.

use strata::config::StrataFileConfig;
use strata::data::{parse_date, CachedMarketData, CsvMarketData, RiskFreeSource, StaticAllocations};
use strata::engine::{Engine, Report, RunConfig};
use strata::error::{Result, StrataError};
use strata::export::{Exporter, ResultFormatter};
use strata::monte_carlo::{DependenceModel, SimulationConfig};
use strata::strategies::Strategy;

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Strata - portfolio allocation and long-horizon risk simulation.
#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Optimize portfolio allocations and simulate their long-horizon risk")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Optimize and simulate instruments from a price CSV
    Run {
        /// Path to a wide price CSV (date column, then one column per instrument)
        #[arg(short, long)]
        data: PathBuf,

        /// Instruments to use (default: every column except the risk-free column)
        #[arg(short, long, value_delimiter = ',')]
        instruments: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Annual risk-free rate as a decimal
        #[arg(short, long, default_value = "0.0")]
        risk_free_rate: f64,

        /// Yield column (percent) to derive the risk-free rate from
        #[arg(long)]
        risk_free_column: Option<String>,

        /// Strategies to run (default: all)
        #[arg(short = 'S', long, value_delimiter = ',')]
        strategies: Vec<String>,

        /// Number of simulated paths
        #[arg(short, long, default_value = "1000")]
        paths: usize,

        /// Horizon in years of 252 trading days
        #[arg(long, default_value = "10")]
        years: usize,

        /// Horizon in trading days (overrides --years)
        #[arg(long)]
        days: Option<usize>,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Cross-instrument dependence of simulated shocks
        #[arg(long, value_enum, default_value = "independent")]
        dependence: DependenceArg,

        /// Skip the historical stress table
        #[arg(long)]
        no_stress: bool,

        /// Directory to write CSV/JSON tables into
        #[arg(short, long)]
        export_dir: Option<PathBuf>,
    },

    /// Run from a configuration file
    RunConfig {
        /// Path to TOML configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Directory to write CSV/JSON tables into
        #[arg(short, long)]
        export_dir: Option<PathBuf>,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "strata.toml")]
        output: PathBuf,
    },

    /// Show information about available strategies
    Strategies,

    /// Validate a price file and/or a configuration file
    Validate {
        /// Path to a wide price CSV
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Path to TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum DependenceArg {
    Independent,
    Copula,
}

impl From<DependenceArg> for DependenceModel {
    fn from(arg: DependenceArg) -> Self {
        match arg {
            DependenceArg::Independent => DependenceModel::Independent,
            DependenceArg::Copula => DependenceModel::Copula,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Logging was already initialized");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            data,
            instruments,
            start,
            end,
            risk_free_rate,
            risk_free_column,
            strategies,
            paths,
            years,
            days,
            seed,
            dependence,
            no_stress,
            export_dir,
        } => {
            let risk_free = match risk_free_column {
                Some(column) => RiskFreeSource::Column(column.clone()),
                None => RiskFreeSource::Fixed(*risk_free_rate),
            };
            let provider = CsvMarketData::from_path(data, risk_free)?;

            let instruments = if instruments.is_empty() {
                provider
                    .columns()
                    .iter()
                    .filter(|c| Some(*c) != risk_free_column.as_ref())
                    .cloned()
                    .collect()
            } else {
                instruments.clone()
            };

            let mut simulation = SimulationConfig::default()
                .with_paths(*paths)
                .with_horizon_years(*years)
                .with_seed(*seed)
                .with_dependence_model((*dependence).into());
            if let Some(d) = days {
                simulation = simulation.with_horizon_days(*d);
            }

            let mut config = RunConfig::new(instruments)
                .with_dates(parse_bound(start, true)?, parse_bound(end, false)?)
                .with_simulation(simulation);
            if !strategies.is_empty() {
                config = config.with_strategies(parse_strategies(strategies)?);
            }
            if *no_stress {
                config = config.without_stress();
            }

            let report = Engine::new(CachedMarketData::new(provider), config)
                .run(&StaticAllocations::new())?;
            emit(report, cli.output, export_dir.as_ref())
        }

        Commands::RunConfig { config, export_dir } => {
            run_from_config(config, cli.output, export_dir.as_ref())
        }

        Commands::Init { output } => init_config(output),

        Commands::Strategies => {
            print_strategies();
            Ok(())
        }

        Commands::Validate { data, config } => validate(data.as_ref(), config.as_ref()),
    }
}

fn parse_bound(value: &Option<String>, is_start: bool) -> Result<chrono::NaiveDate> {
    match value {
        Some(s) => parse_date(s),
        None if is_start => Ok(chrono::NaiveDate::MIN),
        None => Ok(chrono::NaiveDate::MAX),
    }
}

fn parse_strategies(names: &[String]) -> Result<Vec<Strategy>> {
    names.iter().map(|n| n.parse()).collect()
}

fn emit(report: Report, output: OutputFormat, export_dir: Option<&PathBuf>) -> Result<()> {
    match output {
        OutputFormat::Text => ResultFormatter::print_report(&report),
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&report)),
    }
    if let Some(dir) = export_dir {
        Exporter::new(report).export_all(dir)?;
        info!("Wrote tables to {}", dir.display());
    }
    Ok(())
}

fn print_strategies() {
    println!("\nAvailable Strategies:\n");
    for strategy in Strategy::ALL {
        println!("  {}", strategy.name());
        println!("    {}", strategy.description());
        println!();
    }

    println!("Reference portfolios:");
    println!("  Add [[portfolios]] entries to a config file to simulate fixed");
    println!("  allocations next to the optimized strategies.");
    println!();
}

fn init_config(output: &PathBuf) -> Result<()> {
    let example = StrataFileConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to point at your price data, then run:");
    println!("  strata run-config -c {}", output.display());
    Ok(())
}

fn run_from_config(
    config_path: &PathBuf,
    output: OutputFormat,
    export_dir: Option<&PathBuf>,
) -> Result<()> {
    let file_config = StrataFileConfig::load(config_path)?;
    file_config.validate()?;

    let data_path = file_config.data.path.clone().ok_or_else(|| {
        StrataError::ConfigError("No data path specified in config".to_string())
    })?;
    let provider = CsvMarketData::from_path(&data_path, file_config.data.risk_free_source())?;

    let run_config = file_config.to_run_config()?;
    let report = Engine::new(CachedMarketData::new(provider), run_config)
        .run(&file_config.allocations())?;
    emit(report, output, export_dir)
}

fn validate(data: Option<&PathBuf>, config: Option<&PathBuf>) -> Result<()> {
    if data.is_none() && config.is_none() {
        return Err(StrataError::InvalidInput(
            "Pass --data and/or --config".to_string(),
        ));
    }

    if let Some(config_path) = config {
        println!("Validating configuration: {}", config_path.display());
        let file_config = StrataFileConfig::load(config_path)?;
        file_config.validate()?;
        println!("  Instruments: {}", file_config.data.instruments.join(", "));
        println!("  Strategies:  {}", file_config.optimization.strategies.join(", "));
        println!("  Portfolios:  {}", file_config.portfolios.len());
    }

    if let Some(data_path) = data {
        println!("Validating data file: {}", data_path.display());
        let provider = CsvMarketData::from_path(data_path, RiskFreeSource::default())?;
        let table = provider.table();

        println!("\nData Summary:");
        println!("  Rows: {}", table.len());
        if let (Some(first), Some(last)) = (table.dates().first(), table.dates().last()) {
            println!("  Start: {}", first);
            println!("  End: {}", last);
        }
        for (i, column) in table.instruments().iter().enumerate() {
            let missing = table.rows().iter().filter(|r| r[i].is_none()).count();
            println!("  {:<12} missing: {}", column, missing);
        }
        let clean = table.clean()?;
        println!("  Complete rows: {}", clean.len());
    }

    println!("\nValidation: PASSED");
    Ok(())
}
