// Copyright 2025 Verdict Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! `verdict` — run experiments and arena comparisons from the shell.
//!
//! Exit code 0 on successful completion; non-zero on pre-flight failures
//! (unreadable config, bad JSON). Runtime evaluation failures mark the
//! experiment `failed` and still exit 0 — callers poll status.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use verdict_arena::ArenaEngine;
use verdict_core::{ArenaComparison, ArenaConfig, Experiment, ExperimentConfig};
use verdict_engine::{CancellationFlag, Orchestrator};
use verdict_storage::{EvalStore, JobStatusStore};

#[derive(Parser)]
#[command(name = "verdict", about = "LLM evaluation engine", version)]
struct Cli {
    /// Tenant every record is scoped to.
    #[arg(long, global = true, default_value = "default")]
    tenant: String,

    /// Root for built-in datasets and relative dataset paths.
    #[arg(long, global = true, default_value = "data")]
    data_root: PathBuf,

    /// Durable store directory.
    #[arg(long, global = true, default_value = "verdict-data")]
    store: PathBuf,

    /// Artifacts directory (results, quality gates).
    #[arg(long, global = true, default_value = "artifacts")]
    artifacts: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one experiment from a JSON config file.
    Run {
        /// Experiment config (JSON).
        #[arg(long)]
        config: PathBuf,
    },
    /// Run an arena comparison from a JSON config file.
    Arena {
        /// Arena config (JSON).
        #[arg(long)]
        config: PathBuf,
    },
    /// Manage custom LLM-judge scorers.
    Scorers {
        #[command(subcommand)]
        command: ScorerCommand,
    },
}

#[derive(Subcommand)]
enum ScorerCommand {
    /// List the tenant's scorers.
    List,
    /// Register a scorer from a JSON definition file.
    Add {
        #[arg(long)]
        file: PathBuf,
    },
    /// Delete a scorer by id.
    Remove {
        #[arg(long)]
        id: String,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = Arc::new(EvalStore::open(&cli.store)?);
    let jobs = Arc::new(JobStatusStore::new());

    match cli.command {
        Command::Run { config } => {
            let config: ExperimentConfig = read_json(&config)?;
            let experiment =
                store.create_experiment(&Experiment::new(cli.tenant.as_str(), config.clone()))?;
            println!("experiment {} created", experiment.id);

            let orchestrator = Orchestrator::new(
                store.clone(),
                jobs,
                cli.data_root.clone(),
                cli.artifacts.clone(),
            );
            orchestrator
                .run_experiment(&cli.tenant, &experiment.id, &config, CancellationFlag::new())
                .await;

            let finished = store
                .get_experiment_by_id(&cli.tenant, &experiment.id)?
                .context("experiment vanished")?;
            println!("status: {}", finished.status.as_str());
            if let Some(error) = &finished.error_message {
                println!("error: {error}");
            }
            if let Some(results) = &finished.results {
                println!("{}", serde_json::to_string_pretty(results)?);
            }
        }
        Command::Arena { config } => {
            let config: ArenaConfig = read_json(&config)?;
            let api_keys = config.api_keys.clone();
            let arena =
                store.create_arena_comparison(&ArenaComparison::new(cli.tenant.as_str(), config))?;
            println!("arena comparison {} created", arena.id);

            let engine = ArenaEngine::new(store.clone(), jobs, cli.data_root.clone());
            engine.run(&cli.tenant, &arena.id, &api_keys).await;

            let finished = store
                .get_arena_comparison(&cli.tenant, &arena.id)?
                .context("comparison vanished")?;
            println!("status: {}", finished.status.as_str());
            if let Some(winner) = &finished.winner {
                println!("winner: {winner}");
            }
            if let Some(win_counts) = &finished.win_counts {
                println!("{}", serde_json::to_string_pretty(win_counts)?);
            }
        }
        Command::Scorers { command } => match command {
            ScorerCommand::List => {
                for scorer in store.list_scorers(&cli.tenant)? {
                    println!(
                        "{}  {}  enabled={}  metric_key={}",
                        scorer.id, scorer.name, scorer.enabled, scorer.metric_key
                    );
                }
            }
            ScorerCommand::Add { file } => {
                let scorer: verdict_core::ScorerDefinition = read_json(&file)?;
                store.create_scorer(&scorer)?;
                println!("scorer {} registered", scorer.id);
            }
            ScorerCommand::Remove { id } => {
                store.delete_scorer(&cli.tenant, &id)?;
                println!("scorer {id} deleted");
            }
        },
    }

    Ok(())
}
