//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::error::RecvError;

use tessera_core::{
    FileSnapshotStore, Graph, GraphRead, IdStrategy, compare, compare_graphs, create_snapshot,
    load_graph, save_graph,
};
use tessera_indexer::{GitCli, HistoricalSnapshots, IndexReport, Indexer};
use tessera_laws::{ValidationScope, Validator};
use tessera_watcher::{ChangeEvent, IncrementalEngine, WatchService, impact_of};

fn open(root: &Path) -> Result<Indexer> {
    let root = root
        .canonicalize()
        .with_context(|| format!("repository root {} not found", root.display()))?;
    Indexer::open(root.clone()).with_context(|| format!("failed to open {}", root.display()))
}

/// Index from scratch and refresh the graph cache.
fn build(indexer: &Indexer) -> Result<(Graph, IndexReport)> {
    let mut graph = Graph::new();
    let report = indexer
        .index_all(&mut graph)
        .context("indexing failed")?;
    for failure in &report.failures {
        tracing::warn!("{}: {}", failure.path.display(), failure.error);
    }
    save_graph(&graph, indexer.root()).context("failed to write the graph cache")?;
    Ok((graph, report))
}

pub fn index(root: &Path) -> Result<()> {
    let indexer = open(root)?;
    tracing::info!("Indexing repository: {}", indexer.root().display());
    let (_, report) = build(&indexer)?;
    println!(
        "Indexed {} files ({} failed): {} nodes, {} edges, {}/{} calls resolved in {}ms",
        report.files_indexed,
        report.failures.len(),
        report.nodes,
        report.edges,
        report.calls_resolved,
        report.calls_resolved + report.calls_unresolved,
        report.duration_ms
    );
    Ok(())
}

/// Returns whether the repository is free of errors.
pub fn check(root: &Path, json: bool, errors_only: bool) -> Result<bool> {
    let indexer = open(root)?;
    let (graph, _) = build(&indexer)?;
    let validator = Validator::from_config(indexer.config())
        .context("invalid validation settings")?
        .with_sources(indexer.root());
    let mut report = validator.validate(&graph, &ValidationScope::Full);
    if errors_only {
        report = report.errors_only();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for violation in &report.violations {
            println!("{}", violation);
        }
        println!(
            "{} nodes checked: {} errors, {} warnings",
            report.nodes_checked, report.errors, report.warnings
        );
    }
    Ok(report.is_clean())
}

pub async fn watch(root: &Path, json: bool) -> Result<()> {
    let indexer = open(root)?;
    let root = indexer.root().to_path_buf();
    let engine = IncrementalEngine::new(indexer, Graph::new())?;
    let report = engine.index_all()?;
    tracing::info!(
        "Indexed {} files: {} nodes, {} edges",
        report.files_indexed,
        report.nodes,
        report.edges
    );
    let initial = engine.validate_all()?;
    tracing::info!(
        "Initial validation: {} errors, {} warnings",
        initial.errors,
        initial.warnings
    );

    let service = WatchService::new(Arc::new(engine));
    let mut events = service.bus().subscribe();
    let running = service.start()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} change events", missed)
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    running.stop();
    service
        .engine()
        .read(|graph| save_graph(graph, &root))?
        .context("failed to write the graph cache")?;
    Ok(())
}

fn print_event(event: &ChangeEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let stats = &event.reindex_stats;
    let state = if stats.removed {
        "removed".to_string()
    } else if let Some(failure) = &stats.failure {
        format!("kept previous graph ({})", failure)
    } else {
        format!("{} nodes written", stats.rebuild.nodes_written)
    };
    println!(
        "{}: {}, {} propagated, {} errors, {} warnings ({}ms)",
        event.file_path.display(),
        state,
        event.propagation_stats.propagated(),
        event.validation_result.errors,
        event.validation_result.warnings,
        stats.duration_ms
    );
    for violation in &event.validation_result.violations {
        println!("  {}", violation);
    }
    Ok(())
}

/// The cached graph if there is one, otherwise a fresh index.
fn current_graph(indexer: &Indexer) -> Result<Graph> {
    match load_graph(indexer.root()).context("failed to read the graph cache")? {
        Some(graph) => Ok(graph),
        None => Ok(build(indexer)?.0),
    }
}

pub fn snapshot_create(
    root: &Path,
    description: Option<String>,
    tags: Vec<String>,
    content_id: bool,
) -> Result<()> {
    let indexer = open(root)?;
    let (graph, _) = build(&indexer)?;
    let strategy = if content_id {
        IdStrategy::Content
    } else {
        IdStrategy::Timestamp
    };
    let snapshot = create_snapshot(&graph, strategy, description, tags)?;
    let path = FileSnapshotStore::for_root(indexer.root()).save(&snapshot)?;
    tracing::debug!("Snapshot written to {}", path.display());
    println!(
        "{} ({} nodes, {} edges)",
        snapshot.snapshot_id, snapshot.node_count, snapshot.edge_count
    );
    Ok(())
}

pub fn snapshot_list(root: &Path) -> Result<()> {
    let indexer = open(root)?;
    let summaries = FileSnapshotStore::for_root(indexer.root()).list()?;
    if summaries.is_empty() {
        println!("No snapshots");
    }
    for s in summaries {
        println!(
            "{}  {}  {} nodes, {} edges  {}",
            s.snapshot_id,
            s.created_at.format("%Y-%m-%d %H:%M:%S"),
            s.node_count,
            s.edge_count,
            s.description.unwrap_or_default()
        );
    }
    Ok(())
}

pub fn snapshot_diff(root: &Path, old: &str, new: Option<&str>, json: bool) -> Result<()> {
    let indexer = open(root)?;
    let store = FileSnapshotStore::for_root(indexer.root());
    let load = |id: &str| -> Result<_> {
        match store.load(id)? {
            Some(snapshot) => Ok(snapshot),
            None => bail!("no snapshot named {}", id),
        }
    };

    let old = load(old)?;
    let diff = match new {
        Some(new) => compare(&old, &load(new)?),
        None => {
            let (graph, _) = build(&indexer)?;
            compare_graphs(&old.to_graph()?, &graph)
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
    } else {
        println!("{}", diff.summary());
    }
    Ok(())
}

pub fn snapshot_commit(root: &Path, rev: &str) -> Result<()> {
    let indexer = open(root)?;
    let store = FileSnapshotStore::for_root(indexer.root());
    let history = HistoricalSnapshots::new(GitCli::new(indexer.root()), &indexer, store);
    let snapshot = history
        .snapshot_for(rev)
        .with_context(|| format!("failed to snapshot {}", rev))?;
    println!(
        "{} ({} nodes, {} edges)",
        snapshot.snapshot_id, snapshot.node_count, snapshot.edge_count
    );
    Ok(())
}

pub fn impact(root: &Path, name: &str, json: bool) -> Result<()> {
    let indexer = open(root)?;
    let graph = current_graph(&indexer)?;
    let Some(impact) = impact_of(&graph, name) else {
        bail!("no function or class named {}", name);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&impact)?);
        return Ok(());
    }
    let location = |file: &Option<PathBuf>, line: u32| match file {
        Some(file) => format!("{}:{}", file.display(), line),
        None => "<builtin>".to_string(),
    };
    println!("{} callers of {}", impact.callers.len(), impact.target);
    for caller in &impact.callers {
        println!(
            "  {}  {}",
            caller.qualified_name,
            location(&caller.file_path, caller.line)
        );
    }
    if !impact.subclasses.is_empty() {
        println!("{} subclasses", impact.subclasses.len());
        for sub in &impact.subclasses {
            println!("  {}  {}", sub.qualified_name, location(&sub.file_path, sub.line));
        }
    }
    tracing::debug!("{} nodes in graph", graph.node_count());
    Ok(())
}

pub fn clear(root: &Path) -> Result<()> {
    tracing::info!("Clearing cache for: {}", root.display());
    tessera_core::clear_cache(root)?;
    tracing::info!("Cache cleared");
    Ok(())
}
