//! Background change processor
//!
//! A dedicated thread per workspace drains pending documents on a poll
//! interval. One bad document never stops the batch: its row records the
//! error and the loop moves on. A cycle-level failure (e.g. the tracking
//! database is unavailable) doubles the sleep before retrying.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::rag::DocumentPipeline;
use crate::tracker::{DocumentStatus, DocumentTracker, TrackerConn};
use crate::vector::ImportanceLevel;

/// Outcome counts for one processing cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub processed: usize,
    pub errored: usize,
    pub deleted: usize,
}

/// Process every pending document for a workspace, oldest first.
///
/// Per-document transitions: file gone → `deleted` (hash preserved),
/// pipeline success → `processed`, pipeline failure → `error` with the
/// failure message. The pending hash travels with the transition so the
/// row records exactly which content version was attempted.
pub fn run_cycle(
    workspace_id: &str,
    conn: &TrackerConn,
    pipeline: &DocumentPipeline,
) -> Result<CycleSummary> {
    let pending = conn.get_pending_documents(workspace_id)?;
    if pending.is_empty() {
        return Ok(CycleSummary::default());
    }
    debug!(workspace = workspace_id, count = pending.len(), "processing pending documents");

    let mut summary = CycleSummary::default();
    for doc in pending {
        let path = std::path::Path::new(&doc.file_path);
        if !path.exists() {
            conn.update_document(
                workspace_id,
                &doc.file_path,
                DocumentStatus::Deleted,
                None,
                Some(doc.last_modified),
                doc.hash.as_deref(),
            )?;
            summary.deleted += 1;
            continue;
        }

        match pipeline.process_document(path, workspace_id, ImportanceLevel::Medium) {
            Ok(_) => {
                conn.update_document(
                    workspace_id,
                    &doc.file_path,
                    DocumentStatus::Processed,
                    None,
                    Some(doc.last_modified),
                    doc.hash.as_deref(),
                )?;
                summary.processed += 1;
            }
            Err(e) => {
                let password_protected = e
                    .downcast_ref::<crate::extract::ExtractError>()
                    .is_some_and(|err| err.is_password_protected());
                if password_protected {
                    warn!(file = %doc.file_path, "document is password protected");
                } else {
                    warn!(file = %doc.file_path, error = %e, "document processing failed");
                }
                conn.update_document(
                    workspace_id,
                    &doc.file_path,
                    DocumentStatus::Error,
                    Some(&e.to_string()),
                    Some(doc.last_modified),
                    doc.hash.as_deref(),
                )?;
                summary.errored += 1;
            }
        }
    }
    Ok(summary)
}

/// Shared stop signal: flag + condvar so the poll sleep is interruptible.
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn stop(&self) {
        if let Ok(mut stopped) = self.stopped.lock() {
            *stopped = true;
        }
        self.condvar.notify_all();
    }

    /// Sleep up to `duration`; returns true if stop was requested.
    fn wait(&self, duration: Duration) -> bool {
        let Ok(guard) = self.stopped.lock() else {
            return true;
        };
        match self
            .condvar
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
        {
            Ok((stopped, _)) => *stopped,
            Err(_) => true,
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.lock().map(|s| *s).unwrap_or(true)
    }
}

/// Owns the background processing thread for one workspace.
pub struct ChangeProcessor {
    workspace_id: String,
    tracker: DocumentTracker,
    pipeline: Arc<DocumentPipeline>,
    poll_interval: Duration,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeProcessor {
    pub fn new(
        workspace_id: &str,
        tracker: DocumentTracker,
        pipeline: Arc<DocumentPipeline>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            workspace_id: workspace_id.to_string(),
            tracker,
            pipeline,
            poll_interval,
            signal: Arc::new(StopSignal::new()),
            handle: None,
        }
    }

    /// Spawn the processing thread. Idempotent while running.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let workspace_id = self.workspace_id.clone();
        let tracker = self.tracker.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let poll_interval = self.poll_interval;
        let signal = Arc::clone(&self.signal);

        self.handle = Some(std::thread::spawn(move || {
            // This thread's own connection; SQLite handles are not shared
            let conn = match tracker.connect() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(workspace = %workspace_id, error = %e, "processor failed to open tracking database");
                    return;
                }
            };
            info!(workspace = %workspace_id, "change processor started");

            while !signal.is_stopped() {
                let sleep = match run_cycle(&workspace_id, &conn, &pipeline) {
                    Ok(summary) => {
                        if summary != CycleSummary::default() {
                            info!(
                                workspace = %workspace_id,
                                processed = summary.processed,
                                errored = summary.errored,
                                deleted = summary.deleted,
                                "processing cycle complete"
                            );
                        }
                        poll_interval
                    }
                    Err(e) => {
                        error!(workspace = %workspace_id, error = %e, "processing cycle failed");
                        // Back off so a persistent failure does not spin
                        poll_interval * 2
                    }
                };
                if signal.wait(sleep) {
                    break;
                }
            }
            info!(workspace = %workspace_id, "change processor stopped");
        }));
    }

    /// Signal the thread and join it.
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChangeProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}
