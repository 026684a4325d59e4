//! CLI entry point for the papernet tool.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use papernet_core::corpus::DEFAULT_TOP_AUTHORS;
use papernet_core::{
    AuthorCollectionRequest, CollectionEngine, CollectionSession, Database, EngineConfig,
    KeywordCollectionRequest, SessionError, SharedCorpus, SqliteCorpusStore, analyze_network,
    load_config,
};
use serde_json::json;
use tracing::{debug, info, warn};

mod cli;

use cli::{AuthorsArgs, Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?cli, "CLI arguments parsed");

    let loaded = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if loaded.loaded_from_file {
        info!(path = ?loaded.path, "configuration loaded");
    }
    let config = apply_cli_overrides(loaded.config, &cli)?;

    let mut engine = CollectionEngine::from_config(&config);
    if let Some(path) = &config.database {
        let db = Database::new(path)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?;
        let store = SqliteCorpusStore::new(db);
        // Sessions merge into what earlier runs stored.
        let stored = store
            .load_corpus()
            .await
            .with_context(|| format!("failed to load corpus from {}", path.display()))?;
        engine = engine
            .with_corpus(SharedCorpus::new(stored))
            .with_sink(Arc::new(store));
        info!(path = %path.display(), "persisting corpus");
    }

    let cancel = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing current call and stopping");
            cancel.cancel();
        }
    });

    let outcome = match cli.command {
        Command::Authors(ref args) => {
            let request = AuthorCollectionRequest::new(args.names.clone(), args.expand)
                .with_limits(config.limits);
            engine.collect_by_authors(request).await
        }
        Command::Keywords(ref args) => {
            let max_papers = usize::try_from(args.max_papers).context("--max-papers too large")?;
            let request = KeywordCollectionRequest::new(args.keywords.clone(), max_papers);
            engine.collect_by_keywords(request).await
        }
    };

    match outcome {
        Ok(session) => {
            print_report(&engine, &session, cli.analysis)?;
            Ok(())
        }
        Err(error) => {
            if let SessionError::Storage { session, .. } = &error {
                print_report(&engine, session, cli.analysis)?;
            }
            Err(error).context("collection failed")
        }
    }
}

fn apply_cli_overrides(mut config: EngineConfig, cli: &Cli) -> Result<EngineConfig> {
    if !cli.sources.is_empty() {
        config.sources.clone_from(&cli.sources);
    }
    if cli.database.is_some() {
        config.database.clone_from(&cli.database);
    }
    if let Command::Authors(args) = &cli.command {
        apply_author_limits(&mut config, args)?;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn apply_author_limits(config: &mut EngineConfig, args: &AuthorsArgs) -> Result<()> {
    let limits = &mut config.limits;
    if let Some(value) = args.max_papers {
        limits.max_papers_per_author = usize::try_from(value).context("--max-papers too large")?;
    }
    if let Some(value) = args.max_generations {
        limits.max_generations = value;
    }
    if let Some(value) = args.max_total_papers {
        limits.max_total_papers =
            usize::try_from(value).context("--max-total-papers too large")?;
    }
    if let Some(value) = args.max_new_authors {
        limits.max_new_authors_per_generation =
            usize::try_from(value).context("--max-new-authors too large")?;
    }
    if let Some(value) = args.max_authors {
        limits.max_authors = usize::try_from(value).context("--max-authors too large")?;
    }
    Ok(())
}

fn print_report(
    engine: &CollectionEngine,
    session: &CollectionSession,
    with_analysis: bool,
) -> Result<()> {
    let analysis = if with_analysis {
        let analysis = engine
            .corpus()
            .read(|corpus| analyze_network(corpus, DEFAULT_TOP_AUTHORS))
            .context("corpus unavailable for analysis")?;
        Some(analysis)
    } else {
        None
    };

    let report = json!({
        "session": session,
        "analysis": analysis,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode report")?
    );
    Ok(())
}
