//! Command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::info;

use crate::config::AppConfig;
use crate::embedding::{provider_from_config, EmbeddingProvider};
use crate::extract::HandlerRegistry;
use crate::rag::{DocumentPipeline, RagQueryHandler, TextChunker};
use crate::tracker::DocumentTracker;
use crate::vector::{ImportanceLevel, VectorStoreManager};
use crate::watcher::{reconcile, run_cycle, WorkspaceWatcherManager};

use super::{OutputFormat, QueryArgs, ScanArgs, StatusArgs, WatchArgs};

/// Everything the commands need, wired from configuration.
struct Components {
    tracker: DocumentTracker,
    registry: Arc<HandlerRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<VectorStoreManager>,
    pipeline: Arc<DocumentPipeline>,
}

fn build_components(config: &AppConfig) -> Result<Components> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory {:?}", config.data_dir))?;

    let tracker = DocumentTracker::new(&config.tracking_db_path())?;
    let registry = Arc::new(HandlerRegistry::with_defaults(config.max_file_size_bytes()));
    let embedder = provider_from_config(&config.embedding)?;
    let store = Arc::new(VectorStoreManager::open(
        &config.vector_db_path(),
        Arc::clone(&embedder),
        &config.collection_prefix,
    )?);
    let pipeline = Arc::new(DocumentPipeline::new(
        Arc::clone(&registry),
        TextChunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap),
        Arc::clone(&store),
    ));
    Ok(Components {
        tracker,
        registry,
        embedder,
        store,
        pipeline,
    })
}

/// Workspaces addressed by a command: one named, or all configured.
fn select_workspaces(
    config: &AppConfig,
    workspace: Option<&str>,
) -> Result<Vec<(String, Vec<PathBuf>)>> {
    match workspace {
        Some(id) => {
            let ws = config
                .workspaces
                .get(id)
                .ok_or_else(|| anyhow!("workspace '{id}' is not configured"))?;
            Ok(vec![(id.to_string(), ws.paths.clone())])
        }
        None => {
            if config.workspaces.is_empty() {
                return Err(anyhow!("no workspaces configured"));
            }
            Ok(config
                .workspaces
                .iter()
                .map(|(id, ws)| (id.clone(), ws.paths.clone()))
                .collect())
        }
    }
}

/// Watch workspaces and process changes until interrupted.
pub fn cmd_watch(config: &AppConfig, args: &WatchArgs) -> Result<()> {
    let components = build_components(config)?;
    let workspaces = select_workspaces(config, args.workspace.as_deref())?;

    let mut manager = WorkspaceWatcherManager::new(
        components.tracker,
        components.registry,
        components.pipeline,
        Duration::from_secs(config.poll_interval_secs),
    );
    for (id, roots) in workspaces {
        manager.start_workspace(&id, roots)?;
    }

    info!("watching {} workspace(s), press Ctrl+C to stop", manager.active_workspaces().len());
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

#[derive(Serialize)]
struct ScanReport {
    workspace: String,
    queued: usize,
    unchanged: usize,
    processed: usize,
    errored: usize,
    deleted: usize,
}

/// One-shot reconcile (and optionally process) for each workspace.
pub fn cmd_scan(config: &AppConfig, args: &ScanArgs, format: OutputFormat) -> Result<()> {
    let components = build_components(config)?;
    let conn = components.tracker.connect()?;

    let mut reports = Vec::new();
    for (id, roots) in select_workspaces(config, args.workspace.as_deref())? {
        let summary = reconcile(&id, &roots, &components.registry, &conn)?;
        let cycle = if args.no_process {
            Default::default()
        } else {
            run_cycle(&id, &conn, &components.pipeline)?
        };
        reports.push(ScanReport {
            workspace: id,
            queued: summary.queued,
            unchanged: summary.unchanged,
            processed: cycle.processed,
            errored: cycle.errored,
            deleted: cycle.deleted,
        });
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            for r in &reports {
                println!(
                    "{}: {} queued, {} unchanged, {} processed, {} errors, {} deleted",
                    r.workspace, r.queued, r.unchanged, r.processed, r.errored, r.deleted
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct QueryReport {
    source: String,
    final_score: f64,
    vector_similarity: f64,
    semantic_score: f64,
    content: String,
}

/// Run a similarity query against one workspace.
pub fn cmd_query(config: &AppConfig, args: &QueryArgs, format: OutputFormat) -> Result<()> {
    let components = build_components(config)?;
    let handler = RagQueryHandler::new(components.store, components.embedder);

    let importance = args
        .importance
        .as_deref()
        .map(|s| {
            ImportanceLevel::parse(s).ok_or_else(|| anyhow!("unknown importance level: {s}"))
        })
        .transpose()?;

    let results = handler.query_filtered(
        &args.text,
        &args.workspace,
        args.top_k.unwrap_or(config.retrieval.top_k),
        args.threshold.unwrap_or(config.retrieval.similarity_threshold),
        importance,
    );

    let reports: Vec<QueryReport> = results
        .iter()
        .map(|r| QueryReport {
            source: r.source().to_string(),
            final_score: r.final_score,
            vector_similarity: r.vector_similarity,
            semantic_score: r.semantic_score,
            content: r.content.clone(),
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("no results above threshold");
            }
            for r in &reports {
                println!("[Source: {}, Score: {:.2}]", r.source, r.final_score);
                println!("{}\n", r.content);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    workspace: String,
    counts: Vec<(String, u64)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<(String, String)>,
}

/// Show per-workspace tracking counts, with error details on request.
pub fn cmd_status(config: &AppConfig, args: &StatusArgs, format: OutputFormat) -> Result<()> {
    let tracker = DocumentTracker::new(&config.tracking_db_path())?;
    let conn = tracker.connect()?;

    let workspace_ids = match &args.workspace {
        Some(id) => vec![id.clone()],
        None => conn.workspace_ids()?,
    };

    let mut reports = Vec::new();
    for id in workspace_ids {
        let counts = conn
            .counts_by_status(&id)?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect();
        let errors = if args.detailed {
            conn.documents_for_workspace(&id)?
                .into_iter()
                .filter(|d| d.status == crate::tracker::DocumentStatus::Error)
                .map(|d| (d.file_path, d.error_message.unwrap_or_default()))
                .collect()
        } else {
            Vec::new()
        };
        reports.push(StatusReport {
            workspace: id,
            counts,
            errors,
        });
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            if reports.is_empty() {
                println!("no tracked workspaces");
            }
            for r in &reports {
                println!("{}:", r.workspace);
                for (status, count) in &r.counts {
                    println!("  {status}: {count}");
                }
                for (file, message) in &r.errors {
                    println!("  error {file}: {message}");
                }
            }
        }
    }
    Ok(())
}

/// Print the effective configuration, optionally writing it to disk.
pub fn cmd_config(
    config: &AppConfig,
    config_path: &std::path::Path,
    init: bool,
    format: OutputFormat,
) -> Result<()> {
    if init {
        config.save(config_path)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}
