use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use walkdir::WalkDir;
use wayfarer_agents::{BudgetReport, PlanEvent, PlannerAgent};
use wayfarer_core::{daily_from_text, normalize, PlanRequest};
use wayfarer_geo::{AmapClient, AmapConfig, MapBackend, OfflineMap};
use wayfarer_llm::{LlmConfig, ModelBackend, OpenAiCompatClient, ReplayModel, UnconfiguredModel};
use wayfarer_observability::{init_tracing, AppMetrics};

#[derive(Debug, Parser)]
#[command(name = "wayfarer")]
#[command(about = "Wayfarer trip-planning toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the normalized budget text.
    Normalize {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Normalize, parse and reconcile budget text.
    Budget {
        #[arg(long, conflicts_with = "dir")]
        input: Option<PathBuf>,
        /// Process every .md and .txt file below this directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Split itinerary prose into classified per-day records.
    Daily {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Plan a trip with the configured or replayed language model.
    Plan {
        #[arg(long)]
        text: String,
        #[arg(long)]
        city: Option<String>,
        /// Model responses to replay instead of calling the API, in order.
        #[arg(long)]
        replay: Vec<PathBuf>,
        /// Print streamed events instead of the final response only.
        #[arg(long)]
        stream: bool,
        #[arg(long, env = "WAYFARER_LLM_API_KEY", hide_env_values = true)]
        llm_api_key: Option<String>,
        #[arg(long, env = "WAYFARER_AMAP_KEY", hide_env_values = true)]
        amap_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("wayfarer_cli");
    let cli = Cli::parse();

    match cli.command {
        Command::Normalize { input } => {
            let text = read_input(input.as_deref())?;
            println!("{}", normalize(&text));
        }
        Command::Budget { input, dir } => match dir {
            Some(dir) => {
                let reports = budget_dir(&dir)?;
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            None => {
                let text = read_input(input.as_deref())?;
                println!("{}", serde_json::to_string_pretty(&BudgetReport::from_text(&text))?);
            }
        },
        Command::Daily { input } => {
            let text = read_input(input.as_deref())?;
            let records = daily_from_text(&text).unwrap_or_else(|| {
                warn!("no day headings found; model extraction is not available offline");
                Vec::new()
            });
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Plan {
            text,
            city,
            replay,
            stream,
            llm_api_key,
            amap_key,
        } => {
            let model = if !replay.is_empty() {
                ModelBackend::Replay(load_replay(&replay)?)
            } else {
                match non_blank(llm_api_key) {
                    Some(key) => ModelBackend::OpenAi(
                        OpenAiCompatClient::new(LlmConfig::with_api_key(key))
                            .context("failed to build language model client")?,
                    ),
                    None => ModelBackend::Unconfigured(UnconfiguredModel),
                }
            };
            let maps = match non_blank(amap_key) {
                Some(key) => MapBackend::Amap(
                    AmapClient::new(AmapConfig::with_api_key(key))
                        .context("failed to build map client")?,
                ),
                None => MapBackend::Offline(OfflineMap),
            };
            let agent = Arc::new(PlannerAgent::new(
                Arc::new(maps),
                Arc::new(model),
                AppMetrics::shared(),
            ));
            let request = PlanRequest { text, city };

            if stream {
                let mut events = agent.plan_stream(request);
                while let Some(event) = events.recv().await {
                    print_event(&event);
                }
            } else {
                let response = agent.plan(request).await?;
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
    }

    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading input file: {}", path.display())),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("failed reading stdin")?;
            Ok(text)
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn budget_dir(root: &Path) -> Result<Vec<serde_json::Value>> {
    let mut reports = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            matches!(
                entry.path().extension().and_then(|ext| ext.to_str()),
                Some("md") | Some("txt")
            )
        })
    {
        let path = entry.path();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed reading budget document: {}", path.display()))?;
        let report = BudgetReport::from_text(&text);
        reports.push(json!({
            "path": path.display().to_string(),
            "budget": report.budget,
            "budgetAligned": report.budget_aligned,
        }));
    }
    Ok(reports)
}

fn load_replay(paths: &[PathBuf]) -> Result<ReplayModel> {
    let responses = paths
        .iter()
        .map(|path| {
            fs::read_to_string(path)
                .with_context(|| format!("failed reading replay file: {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ReplayModel::new(responses))
}

fn print_event(event: &PlanEvent) {
    println!("event: {}\ndata: {}\n", event.name(), event.payload());
}
