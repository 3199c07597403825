use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tandem_agents::{BatchAnalyzer, BatchTask};
use tandem_models::{AnalysisBundle, BatchItem, Candidate, SocialMetrics};
use tracing_subscriber::EnvFilter;

/// Exit code when the consensus pipeline aborted without a result.
const EXIT_NO_CONSENSUS: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "tandem", about = "Dual-model consensus and arbitration for stock signals")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/tandem.toml", global = true)]
    config: String,

    /// Pretty-print the output JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the consensus pipeline on one AnalysisBundle
    Consensus {
        /// Read JSON from a file instead of stdin
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Arbitrate a shortlist of candidates
    Arbitrate {
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Run a batch enrichment stage and persist the results
    Enrich {
        #[arg(long, value_enum)]
        task: EnrichTask,
        #[arg(short, long)]
        input: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EnrichTask {
    Vision,
    Social,
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read input: {path}"))
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}

fn parse_input<T: DeserializeOwned>(path: Option<&str>, what: &str) -> Result<T> {
    let text = read_input(path)?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {what} JSON"))
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

async fn run_batch<T>(analyzer: BatchAnalyzer<T>, input: Option<&str>, pretty: bool) -> Result<()>
where
    T: BatchTask,
    T::Payload: DeserializeOwned,
    T::Output: Serialize,
{
    let items: Vec<BatchItem<T::Payload>> = parse_input(input, "batch items")?;
    let report = analyzer.analyze_batch(items).await;
    emit(&report, pretty)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = tandem::load_config(&cli.config)?;
    let registry = tandem::build_registry(&config).context("Failed to build backends")?;

    match cli.command {
        Command::Consensus { input } => {
            let bundle: AnalysisBundle = parse_input(input.as_deref(), "AnalysisBundle")?;
            let engine =
                tandem::build_consensus_engine(&config, &registry, tandem::build_cache(&config))
                    .context("Failed to build consensus engine")?;

            match engine.analyze(&bundle).await {
                Some(result) => emit(&result, cli.pretty)?,
                None => {
                    emit(
                        &serde_json::json!({"status": "no_consensus", "symbol": bundle.symbol}),
                        cli.pretty,
                    )?;
                    return Ok(ExitCode::from(EXIT_NO_CONSENSUS));
                }
            }
        }
        Command::Arbitrate { input } => {
            let candidates: Vec<Candidate> = parse_input(input.as_deref(), "shortlist")?;
            let arbitrator = tandem::build_arbitrator(&config, registry);
            let result = arbitrator
                .arbitrate(&candidates)
                .await
                .map_err(|e| anyhow::anyhow!("Arbitration failed: {e}"))?;
            emit(&result, cli.pretty)?;
        }
        Command::Enrich { task, input } => {
            let store = tandem::build_store(&config)?;
            match task {
                EnrichTask::Vision => {
                    let analyzer = tandem::build_vision_analyzer(&config, &registry, store)?;
                    run_batch(analyzer, input.as_deref(), cli.pretty).await?;
                }
                EnrichTask::Social => {
                    let analyzer = tandem::build_social_analyzer(&config, &registry, store)?;
                    run_batch::<tandem_agents::SocialSentimentTask>(
                        analyzer,
                        input.as_deref(),
                        cli.pretty,
                    )
                    .await?;
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "tandem",
            "--pretty",
            "enrich",
            "--task",
            "social",
            "--input",
            "items.json",
        ])
        .unwrap();
        assert!(cli.pretty);
        assert!(matches!(
            cli.command,
            Command::Enrich {
                task: EnrichTask::Social,
                input: Some(_)
            }
        ));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["tandem", "consensus", "-c", "alt.toml"]).unwrap();
        assert_eq!(cli.config, "alt.toml");
    }

    #[test]
    fn social_items_deserialize() {
        let items: Vec<BatchItem<SocialMetrics>> = serde_json::from_str(
            r#"[{"symbol": "AMD", "payload": {"sources": {"reddit": {"mentions": 12, "sentiment": 0.3}}}}]"#,
        )
        .unwrap();
        assert_eq!(items[0].payload.total_mentions(), 12);
    }
}
