use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::model::{
    QueryBuilderQuery, QueryRangeRequest, QueryResult, RequestType, Signal, TelemetryFieldKey,
    TimeSeriesData, TraceAggregation,
};
use querier::PostProcessor;
use querier::postprocess::formula::FormulaEvaluator;
use querier::query::Statement;
use querier::query::keys::InMemoryMetadataStore;
use querier::query::resource_filter::ResourceFilterStatementBuilder;

#[derive(Parser)]
#[command(name = "telequery")]
#[command(about = "Telequery - telemetry query compiler and result post-processor")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<TelequeryCommands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SignalArg {
    Traces,
    Logs,
}

impl From<SignalArg> for Signal {
    fn from(signal: SignalArg) -> Self {
        match signal {
            SignalArg::Traces => Signal::Traces,
            SignalArg::Logs => Signal::Logs,
        }
    }
}

#[derive(Subcommand)]
enum TelequeryCommands {
    /// Compile a filter expression into a resource fingerprint statement
    Compile {
        /// Filter expression, e.g. "service.name = 'redis'"
        filter: String,
        #[arg(long, value_enum, default_value = "traces")]
        signal: SignalArg,
        /// Window start in epoch nanoseconds
        #[arg(long)]
        start: u64,
        /// Window end in epoch nanoseconds; 0 leaves the window open
        #[arg(long, default_value_t = 0)]
        end: u64,
        /// JSON file with the known field keys
        #[arg(long)]
        keys: Option<PathBuf>,
        /// Resource key names, in addition to those from --keys
        #[arg(long = "resource", value_name = "NAME")]
        resources: Vec<String>,
    },
    /// Evaluate a formula over query results read from a JSON file
    Formula {
        /// Formula expression, e.g. "A / B * 100"
        expression: String,
        /// JSON object mapping query names to time series data
        #[arg(long)]
        input: PathBuf,
        /// Queries whose missing series count as zero
        #[arg(long = "default-zero", value_name = "QUERY")]
        default_zero: Vec<String>,
    },
    /// Post-process executed results for a query range request
    Process {
        /// JSON query range request
        #[arg(long)]
        request: PathBuf,
        /// JSON object mapping query names to results
        #[arg(long)]
        results: PathBuf,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for TelequeryCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

fn metadata_store(keys: Option<&Path>, resources: &[String]) -> Result<InMemoryMetadataStore> {
    let mut store = match keys {
        Some(path) => read_json::<Vec<TelemetryFieldKey>>(path)?
            .into_iter()
            .collect(),
        None => InMemoryMetadataStore::new(),
    };
    for name in resources {
        store.insert(TelemetryFieldKey::resource(name.as_str()));
    }
    log::debug!("Metadata store holds {} keys", store.len());
    Ok(store)
}

fn compile_filter(
    config: &Configuration,
    filter: &str,
    signal: Signal,
    start: u64,
    end: u64,
    store: InMemoryMetadataStore,
) -> Result<Statement> {
    let query: QueryBuilderQuery<TraceAggregation> =
        QueryBuilderQuery::new("A", signal).with_filter(filter);
    let builder =
        ResourceFilterStatementBuilder::new(signal, Arc::new(store)).with_config(config.query.clone());
    let statement = builder
        .build(start, end, RequestType::TimeSeries, &query, &HashMap::new())
        .context("Failed to compile filter")?;
    for warning in &statement.warnings {
        log::warn!("{warning}");
    }
    Ok(statement)
}

fn evaluate_formula(
    expression: &str,
    input: HashMap<String, TimeSeriesData>,
    default_zero: &[String],
) -> Result<TimeSeriesData> {
    let defaults: HashMap<String, bool> = default_zero
        .iter()
        .map(|name| (name.clone(), true))
        .collect();
    let evaluator = FormulaEvaluator::new(expression, &defaults)
        .with_context(|| format!("Invalid formula '{expression}'"))?;
    for name in evaluator.query_names() {
        if !input.contains_key(name) {
            log::warn!("Formula references query '{name}' which is not in the input");
        }
    }
    let series = evaluator.evaluate(&input);
    log::info!("Formula produced {} series", series.len());
    Ok(TimeSeriesData {
        query_name: expression.to_string(),
        aggregations: vec![common::model::AggregationBucket {
            index: 0,
            alias: String::new(),
            series,
        }],
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command.unwrap_or_default() {
        TelequeryCommands::Compile {
            filter,
            signal,
            start,
            end,
            keys,
            resources,
        } => {
            let store = metadata_store(keys.as_deref(), &resources)?;
            let statement = compile_filter(&config, &filter, signal.into(), start, end, store)?;
            print_json(&statement)
        }
        TelequeryCommands::Formula {
            expression,
            input,
            default_zero,
        } => {
            let input = read_json(&input)?;
            print_json(&evaluate_formula(&expression, input, &default_zero)?)
        }
        TelequeryCommands::Process { request, results } => {
            let request: QueryRangeRequest = read_json(&request)?;
            let results: HashMap<String, QueryResult> = read_json(&results)?;
            let processor = PostProcessor::new(&config.postprocess);
            print_json(&processor.process(results, &request))
        }
        TelequeryCommands::Common(command) => {
            if utils::handle_common_command(&command, &config).await? {
                return Ok(());
            }
            log::info!("Nothing to do. Run with --help to list the available commands.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::Value;
    use common::testing::{series, time_series_data, values};
    use std::io::Write;

    #[test]
    fn test_compile_with_declared_resource() {
        let store = metadata_store(None, &["service.name".to_string()]).unwrap();
        let statement = compile_filter(
            &Configuration::default(),
            "service.name = 'redis'",
            Signal::Traces,
            1747947419000000000,
            1747983448000000000,
            store,
        )
        .unwrap();
        assert!(statement.query.contains("extract(labels,'service.name') = ?"));
        assert_eq!(statement.args[0], Value::from("redis"));
    }

    #[test]
    fn test_keys_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "env", "fieldContext": "resource", "fieldDataType": "string"}}]"#
        )
        .unwrap();
        let store = metadata_store(Some(file.path()), &[]).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_evaluate_formula() {
        let input = HashMap::from([
            (
                "A".to_string(),
                time_series_data("A", vec![series(&[], &[(0, 10.0)])]),
            ),
            (
                "B".to_string(),
                time_series_data("B", vec![series(&[], &[(0, 4.0)])]),
            ),
        ]);
        let out = evaluate_formula("A / B", input, &[]).unwrap();
        assert_eq!(values(&out.aggregations[0].series[0]), vec![2.5]);

        assert!(evaluate_formula("A +", HashMap::new(), &[]).is_err());
    }
}
