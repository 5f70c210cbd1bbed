//! File system watching
//!
//! One watcher per workspace: a notify backend feeds raw events to a
//! dedicated thread that hashes changed files and records them as pending
//! in the tracking store. A startup reconciliation walk catches whatever
//! changed while nothing was watching. Actual indexing happens in the
//! background [`ChangeProcessor`], never on the event path.

mod processor;

pub use processor::{run_cycle, ChangeProcessor, CycleSummary};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::extract::HandlerRegistry;
use crate::hash::hash_file;
use crate::rag::DocumentPipeline;
use crate::tracker::{DocumentStatus, DocumentTracker, TrackerConn};

/// Counts from a reconciliation walk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Files transitioned to pending
    pub queued: usize,
    /// Files whose tracked hash still matches
    pub unchanged: usize,
}

/// Walk the workspace roots and queue files that need (re)processing.
///
/// A file becomes `pending` when it is unseen, currently `deleted`
/// (deletion alone invalidates the index, even for identical bytes), or
/// its hash differs from the tracked one. Matching-hash files keep their
/// status, so `error` rows are not retried until their content changes.
pub fn reconcile(
    workspace_id: &str,
    roots: &[PathBuf],
    registry: &HandlerRegistry,
    conn: &TrackerConn,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    for root in roots {
        if !root.exists() {
            warn!(workspace = workspace_id, root = %root.display(), "workspace root does not exist");
            continue;
        }
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !registry.is_supported(entry.path()) {
                continue;
            }

            let path = entry.path();
            let (mtime, digest) = match hash_file(path) {
                Ok(info) => info,
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "file vanished during scan");
                    continue;
                }
            };

            let file_path = path.to_string_lossy();
            let tracked = conn.get_document(workspace_id, &file_path)?;
            let needs_processing = match &tracked {
                None => true,
                Some(doc) if doc.status == DocumentStatus::Deleted => true,
                Some(doc) => doc.hash.as_deref() != Some(digest.as_str()),
            };

            if needs_processing {
                conn.update_document(
                    workspace_id,
                    &file_path,
                    DocumentStatus::Pending,
                    None,
                    Some(mtime),
                    Some(&digest),
                )?;
                summary.queued += 1;
            } else {
                summary.unchanged += 1;
            }
        }
    }
    info!(
        workspace = workspace_id,
        queued = summary.queued,
        unchanged = summary.unchanged,
        "reconciliation complete"
    );
    Ok(summary)
}

/// Apply one notify event to the tracking store.
///
/// Create/modify record the file as pending with a fresh hash, without
/// comparing to the stored one; the hash comparison belongs to
/// reconciliation, where events may have been missed. Removals mark the
/// row deleted while preserving its last known hash.
fn handle_event(
    workspace_id: &str,
    event: &Event,
    registry: &HandlerRegistry,
    conn: &TrackerConn,
) -> Result<()> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                if !registry.is_supported(path) {
                    continue;
                }
                match hash_file(path) {
                    Ok((mtime, digest)) => {
                        debug!(workspace = workspace_id, file = %path.display(), "change detected");
                        conn.update_document(
                            workspace_id,
                            &path.to_string_lossy(),
                            DocumentStatus::Pending,
                            None,
                            Some(mtime),
                            Some(&digest),
                        )?;
                    }
                    // Gone before we could hash it; the remove event follows
                    Err(e) => {
                        debug!(file = %path.display(), error = %e, "changed file not readable")
                    }
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                if !registry.is_supported(path) {
                    continue;
                }
                debug!(workspace = workspace_id, file = %path.display(), "removal detected");
                conn.mark_deleted(workspace_id, &path.to_string_lossy())?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Watches one workspace's roots and keeps its tracking rows current.
pub struct WorkspaceWatcher {
    workspace_id: String,
    roots: Vec<PathBuf>,
    tracker: DocumentTracker,
    registry: Arc<HandlerRegistry>,
    watcher: Option<RecommendedWatcher>,
    event_thread: Option<JoinHandle<()>>,
    processor: ChangeProcessor,
}

impl WorkspaceWatcher {
    pub fn new(
        workspace_id: &str,
        roots: Vec<PathBuf>,
        tracker: DocumentTracker,
        registry: Arc<HandlerRegistry>,
        pipeline: Arc<DocumentPipeline>,
        poll_interval: Duration,
    ) -> Self {
        let processor = ChangeProcessor::new(workspace_id, tracker.clone(), pipeline, poll_interval);
        Self {
            workspace_id: workspace_id.to_string(),
            roots,
            tracker,
            registry,
            watcher: None,
            event_thread: None,
            processor,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Start watching: subscribe to events first, then reconcile (changes
    /// racing the walk show up as duplicate pending upserts, which are
    /// harmless), then start the background processor.
    pub fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())
            .context("failed to create file watcher")?;
        for root in &self.roots {
            if root.exists() {
                watcher
                    .watch(root, RecursiveMode::Recursive)
                    .with_context(|| format!("failed to watch {root:?}"))?;
            } else {
                warn!(workspace = %self.workspace_id, root = %root.display(), "skipping missing root");
            }
        }
        self.watcher = Some(watcher);

        let workspace_id = self.workspace_id.clone();
        let registry = Arc::clone(&self.registry);
        let tracker = self.tracker.clone();
        self.event_thread = Some(std::thread::spawn(move || {
            let conn = match tracker.connect() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(workspace = %workspace_id, error = %e, "event thread failed to open tracking database");
                    return;
                }
            };
            // Exits when the watcher (the sender) is dropped
            for result in rx {
                match result {
                    Ok(event) => {
                        if let Err(e) = handle_event(&workspace_id, &event, &registry, &conn) {
                            error!(workspace = %workspace_id, error = %e, "failed to record file event");
                        }
                    }
                    Err(e) => warn!(workspace = %workspace_id, error = %e, "watch error"),
                }
            }
            debug!(workspace = %workspace_id, "event thread exiting");
        }));

        let conn = self.tracker.connect()?;
        reconcile(&self.workspace_id, &self.roots, &self.registry, &conn)?;

        self.processor.start();
        info!(workspace = %self.workspace_id, roots = self.roots.len(), "workspace watcher started");
        Ok(())
    }

    /// Stop watching: drop the notify backend, join the event thread,
    /// stop the processor.
    pub fn stop(&mut self) {
        self.watcher.take();
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
        self.processor.stop();
        info!(workspace = %self.workspace_id, "workspace watcher stopped");
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Lifecycle manager for all workspace watchers.
pub struct WorkspaceWatcherManager {
    tracker: DocumentTracker,
    registry: Arc<HandlerRegistry>,
    pipeline: Arc<DocumentPipeline>,
    poll_interval: Duration,
    watchers: HashMap<String, WorkspaceWatcher>,
}

impl WorkspaceWatcherManager {
    pub fn new(
        tracker: DocumentTracker,
        registry: Arc<HandlerRegistry>,
        pipeline: Arc<DocumentPipeline>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            registry,
            pipeline,
            poll_interval,
            watchers: HashMap::new(),
        }
    }

    pub fn start_workspace(&mut self, workspace_id: &str, roots: Vec<PathBuf>) -> Result<()> {
        if self.watchers.contains_key(workspace_id) {
            return Ok(());
        }
        let mut watcher = WorkspaceWatcher::new(
            workspace_id,
            roots,
            self.tracker.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.pipeline),
            self.poll_interval,
        );
        watcher.start()?;
        self.watchers.insert(workspace_id.to_string(), watcher);
        Ok(())
    }

    pub fn stop_workspace(&mut self, workspace_id: &str) {
        if let Some(mut watcher) = self.watchers.remove(workspace_id) {
            watcher.stop();
        }
    }

    pub fn stop_all(&mut self) {
        for (_, mut watcher) in self.watchers.drain() {
            watcher.stop();
        }
    }

    pub fn active_workspaces(&self) -> Vec<&str> {
        self.watchers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::content_hash;
    use std::path::Path;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::with_defaults(10 * 1024 * 1024)
    }

    fn tracked(conn: &TrackerConn, ws: &str, path: &Path) -> crate::tracker::TrackedDocument {
        conn.get_document(ws, &path.to_string_lossy()).unwrap().unwrap()
    }

    #[test]
    fn test_reconcile_queues_unseen_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.md"), "beta").unwrap();
        std::fs::write(dir.path().join("ignored.png"), "img").unwrap();

        let conn = TrackerConn::open_in_memory().unwrap();
        let summary =
            reconcile("ws", &[dir.path().to_path_buf()], &registry(), &conn).unwrap();

        assert_eq!(summary.queued, 2);
        assert_eq!(summary.unchanged, 0);
        assert_eq!(conn.get_pending_documents("ws").unwrap().len(), 2);
    }

    #[test]
    fn test_reconcile_is_hash_gated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "original content").unwrap();

        let conn = TrackerConn::open_in_memory().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        reconcile("ws", &roots, &registry(), &conn).unwrap();

        // Simulate processing, then re-scan without changing the file
        let doc = tracked(&conn, "ws", &path);
        conn.update_document(
            "ws",
            &doc.file_path,
            DocumentStatus::Processed,
            None,
            Some(doc.last_modified),
            doc.hash.as_deref(),
        )
        .unwrap();

        let summary = reconcile("ws", &roots, &registry(), &conn).unwrap();
        assert_eq!(summary.queued, 0);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(tracked(&conn, "ws", &path).status, DocumentStatus::Processed);

        // Changing the content re-queues it
        std::fs::write(&path, "different content").unwrap();
        let summary = reconcile("ws", &roots, &registry(), &conn).unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(tracked(&conn, "ws", &path).status, DocumentStatus::Pending);
    }

    #[test]
    fn test_recreated_identical_file_is_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        let content = "identical bytes";
        std::fs::write(&path, content).unwrap();

        let conn = TrackerConn::open_in_memory().unwrap();
        let file_path = path.to_string_lossy().into_owned();
        // Tracked as deleted with the same content hash it will have again
        conn.update_document(
            "ws",
            &file_path,
            DocumentStatus::Deleted,
            None,
            None,
            Some(&content_hash(content)),
        )
        .unwrap();

        let summary =
            reconcile("ws", &[dir.path().to_path_buf()], &registry(), &conn).unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(tracked(&conn, "ws", &path).status, DocumentStatus::Pending);
    }

    #[test]
    fn test_create_event_records_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.txt");
        std::fs::write(&path, "created").unwrap();

        let conn = TrackerConn::open_in_memory().unwrap();
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path.clone());
        handle_event("ws", &event, &registry(), &conn).unwrap();

        let doc = tracked(&conn, "ws", &path);
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.hash.as_deref(), Some(content_hash("created").as_str()));
    }

    #[test]
    fn test_modify_event_requeues_even_when_processed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "content").unwrap();

        let conn = TrackerConn::open_in_memory().unwrap();
        conn.update_document(
            "ws",
            &path.to_string_lossy(),
            DocumentStatus::Processed,
            None,
            None,
            Some(&content_hash("content")),
        )
        .unwrap();

        // Live events queue unconditionally, without a hash comparison
        let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(path.clone());
        handle_event("ws", &event, &registry(), &conn).unwrap();
        assert_eq!(tracked(&conn, "ws", &path).status, DocumentStatus::Pending);
    }

    #[test]
    fn test_remove_event_preserves_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");

        let conn = TrackerConn::open_in_memory().unwrap();
        conn.update_document(
            "ws",
            &path.to_string_lossy(),
            DocumentStatus::Processed,
            None,
            None,
            Some("knownhash"),
        )
        .unwrap();

        let event = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(path.clone());
        handle_event("ws", &event, &registry(), &conn).unwrap();

        let doc = tracked(&conn, "ws", &path);
        assert_eq!(doc.status, DocumentStatus::Deleted);
        assert_eq!(doc.hash.as_deref(), Some("knownhash"));
    }

    #[test]
    fn test_unsupported_extension_events_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, "img").unwrap();

        let conn = TrackerConn::open_in_memory().unwrap();
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(path.clone());
        handle_event("ws", &event, &registry(), &conn).unwrap();
        assert!(conn.get_document("ws", &path.to_string_lossy()).unwrap().is_none());
    }
}
