//! chronicle-tsdb CLI
//!
//! Runs selectors against a JSON dataset:
//! - Query series and their samples
//! - List label values
//! - Generate a default config file

use anyhow::{bail, Context};
use chronicle_tsdb::config::{generate_default_config, Config, LoggingConfig};
use chronicle_tsdb::query::{parse_selector, BufferedSeriesIterator, Querier, Series, SeriesIterator};
use chronicle_tsdb::storage::{Dataset, Label};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Parser)]
#[command(name = "chronicle-tsdb")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query sharded, block-partitioned time-series data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Select series matching a selector
    Query {
        /// Dataset file (JSON)
        dataset: PathBuf,
        /// Selector, e.g. 'http_requests{job="api", env=~"prod.*"}'
        selector: String,
        /// Window start, Unix milliseconds
        #[arg(long, default_value_t = i64::MIN, allow_negative_numbers = true)]
        mint: i64,
        /// Window end, Unix milliseconds
        #[arg(long, default_value_t = i64::MAX, allow_negative_numbers = true)]
        maxt: i64,
        /// Print every sample in the window
        #[arg(long)]
        samples: bool,
        /// Print the per-second rate over the last N samples of the window
        #[arg(long)]
        rate: Option<usize>,
    },

    /// List the values of a label
    Labels {
        /// Dataset file (JSON)
        dataset: PathBuf,
        /// Label name
        name: String,
        /// Only series carrying this label, as name=value
        #[arg(long = "for")]
        for_label: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Query {
            dataset,
            selector,
            mint,
            maxt,
            samples,
            rate,
        } => {
            if mint > maxt {
                bail!("--mint ({}) is after --maxt ({})", mint, maxt);
            }
            let matchers = parse_selector(&selector)?;
            let db = Dataset::load(&dataset)?.into_db(config.query_options())?;

            let lookback = config.query.lookback_samples.max(rate.unwrap_or(0));
            let mut querier = db.querier(mint, maxt);
            let mut set = querier.select(&matchers);
            let mut matched = 0usize;

            while set.next() {
                if let Some(series) = set.current() {
                    print_series(series.as_ref(), mint, maxt, samples, rate, lookback)?;
                    matched += 1;
                }
            }
            if let Some(e) = set.err() {
                return Err(e.clone()).context("select failed");
            }
            querier.close()?;

            tracing::info!("{} series matched {}", matched, selector);
        }

        Commands::Labels {
            dataset,
            name,
            for_label,
        } => {
            let db = Dataset::load(&dataset)?.into_db(config.query_options())?;
            let mut querier = db.querier(i64::MIN, i64::MAX);

            let values = match for_label.as_deref() {
                None => querier.label_values(&name)?,
                Some(pair) => {
                    let (label, value) = pair
                        .split_once('=')
                        .with_context(|| format!("--for expects name=value, got '{}'", pair))?;
                    querier.label_values_for(&name, &Label::new(label, value))?
                }
            };
            querier.close()?;

            for value in values {
                println!("{}", value);
            }
        }

        Commands::Config { output } => write_config(output.as_deref())?,
    }

    Ok(())
}

fn print_series(
    series: &dyn Series,
    mint: i64,
    maxt: i64,
    print_samples: bool,
    rate: Option<usize>,
    lookback: usize,
) -> anyhow::Result<()> {
    println!("{}", series.labels());

    let mut it = BufferedSeriesIterator::new(series.iterator(), lookback);
    let mut count = 0usize;
    let mut trailing = None;

    let mut positioned = it.seek(mint);
    while positioned {
        let (t, v) = it.values();
        if t > maxt {
            break;
        }
        count += 1;
        if print_samples {
            println!("  {}  {}", format_timestamp(t), v);
        }
        if let Some(n) = rate {
            trailing = it.trailing_rate(n);
        }
        positioned = it.next();
    }
    if let Some(e) = it.err() {
        return Err(e.clone()).with_context(|| format!("reading {}", series.labels()));
    }

    println!("  samples: {}", count);
    if let Some(n) = rate {
        match trailing {
            Some(r) => println!("  rate[{}]: {:.6}/s", n, r),
            None => println!("  rate[{}]: not enough samples", n),
        }
    }
    Ok(())
}

fn format_timestamp(t: i64) -> String {
    chrono::DateTime::from_timestamp_millis(t)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| t.to_string())
}

fn write_config(output: Option<&Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("writing config to {:?}", path))?;
            println!("Wrote default config to {:?}", path);
        }
        None => print!("{}", content),
    }
    Ok(())
}

/// Logs go to stderr, or to the configured file, so stdout stays clean
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty().with_writer(writer))
            .init(),
    }
    Ok(())
}
