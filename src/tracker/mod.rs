//! Document tracking store
//!
//! SQLite-backed record of every file seen per workspace and where it sits
//! in the pending → processed/error/deleted lifecycle. Rows are never
//! physically deleted, so the last known content hash survives removal and
//! a recreated identical file is still detected as needing reprocessing.
//!
//! SQLite connections are not shared across threads: [`DocumentTracker`]
//! is a cheap handle holding the database path, and each thread opens its
//! own [`TrackerConn`].

mod schema;

pub use schema::SCHEMA;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Awaiting (re)processing
    Pending,
    /// Indexed successfully
    Processed,
    /// Last processing attempt failed
    Error,
    /// File removed; row retained with its last known hash
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
            DocumentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processed" => Some(DocumentStatus::Processed),
            "error" => Some(DocumentStatus::Error),
            "deleted" => Some(DocumentStatus::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked document row
#[derive(Debug, Clone)]
pub struct TrackedDocument {
    pub workspace_id: String,
    pub file_path: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub last_processed: Option<DateTime<Utc>>,
    pub hash: Option<String>,
}

/// Handle to the tracking database; open a [`TrackerConn`] per thread.
#[derive(Debug, Clone)]
pub struct DocumentTracker {
    path: PathBuf,
}

impl DocumentTracker {
    /// Create the handle and ensure the schema exists.
    pub fn new(path: &Path) -> Result<Self> {
        let tracker = Self {
            path: path.to_path_buf(),
        };
        tracker.connect()?;
        Ok(tracker)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a connection for the calling thread.
    pub fn connect(&self) -> Result<TrackerConn> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open tracking database at {:?}", self.path))?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize tracking schema")?;
        // Cross-thread writers share one database file
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("failed to set busy timeout")?;
        Ok(TrackerConn { conn })
    }
}

/// A single thread's connection to the tracking database
pub struct TrackerConn {
    conn: Connection,
}

impl TrackerConn {
    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(SCHEMA)
            .context("failed to initialize tracking schema")?;
        Ok(Self { conn })
    }

    /// Insert or update a document row keyed by (workspace_id, file_path).
    ///
    /// `last_processed` is written only when the new status is `processed`;
    /// any other transition preserves the previous value, so a later error
    /// still shows when the document last succeeded. A `None` hash
    /// overwrites a stored hash with NULL.
    pub fn update_document(
        &self,
        workspace_id: &str,
        file_path: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
        last_modified: Option<DateTime<Utc>>,
        hash: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let last_modified = last_modified.unwrap_or_else(Utc::now).to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO document_tracking
                     (workspace_id, file_path, status, error_message, last_modified, last_processed, hash)
                 VALUES (?1, ?2, ?3, ?4, ?5,
                         CASE WHEN ?3 = 'processed' THEN ?6 ELSE NULL END, ?7)
                 ON CONFLICT(workspace_id, file_path) DO UPDATE SET
                     status = excluded.status,
                     error_message = excluded.error_message,
                     last_modified = excluded.last_modified,
                     last_processed = CASE WHEN excluded.status = 'processed'
                                           THEN ?6
                                           ELSE document_tracking.last_processed END,
                     hash = excluded.hash",
                params![
                    workspace_id,
                    file_path,
                    status.as_str(),
                    error_message,
                    last_modified,
                    now,
                    hash
                ],
            )
            .with_context(|| format!("failed to upsert tracking row for {file_path}"))?;
        Ok(())
    }

    /// Mark a document deleted, preserving its last known hash.
    pub fn mark_deleted(&self, workspace_id: &str, file_path: &str) -> Result<()> {
        let prior = self.get_document(workspace_id, file_path)?;
        let hash = prior.and_then(|d| d.hash);
        self.update_document(
            workspace_id,
            file_path,
            DocumentStatus::Deleted,
            None,
            None,
            hash.as_deref(),
        )
    }

    pub fn get_document(
        &self,
        workspace_id: &str,
        file_path: &str,
    ) -> Result<Option<TrackedDocument>> {
        self.conn
            .query_row(
                "SELECT workspace_id, file_path, status, error_message,
                        last_modified, last_processed, hash
                 FROM document_tracking
                 WHERE workspace_id = ?1 AND file_path = ?2",
                params![workspace_id, file_path],
                row_to_document,
            )
            .optional()
            .with_context(|| format!("failed to read tracking row for {file_path}"))?
            .map(TrackedDocument::try_from)
            .transpose()
    }

    /// Pending documents, oldest modification first.
    pub fn get_pending_documents(&self, workspace_id: &str) -> Result<Vec<TrackedDocument>> {
        self.query_documents(
            "SELECT workspace_id, file_path, status, error_message,
                    last_modified, last_processed, hash
             FROM document_tracking
             WHERE workspace_id = ?1 AND status = 'pending'
             ORDER BY last_modified ASC",
            workspace_id,
        )
    }

    /// All rows for a workspace, most recently modified first.
    pub fn documents_for_workspace(&self, workspace_id: &str) -> Result<Vec<TrackedDocument>> {
        self.query_documents(
            "SELECT workspace_id, file_path, status, error_message,
                    last_modified, last_processed, hash
             FROM document_tracking
             WHERE workspace_id = ?1
             ORDER BY last_modified DESC",
            workspace_id,
        )
    }

    pub fn counts_by_status(&self, workspace_id: &str) -> Result<Vec<(DocumentStatus, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT status, COUNT(*) FROM document_tracking
                 WHERE workspace_id = ?1 GROUP BY status ORDER BY status",
            )
            .context("failed to prepare status counts query")?;
        let rows = stmt
            .query_map(params![workspace_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })
            .context("failed to query status counts")?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row.context("failed to read status count row")?;
            let status = DocumentStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown status in database: {status}"))?;
            counts.push((status, count));
        }
        Ok(counts)
    }

    pub fn workspace_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT workspace_id FROM document_tracking ORDER BY workspace_id")
            .context("failed to prepare workspace listing")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("failed to list workspaces")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to read workspace row")
    }

    fn query_documents(&self, sql: &str, workspace_id: &str) -> Result<Vec<TrackedDocument>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("failed to prepare tracking query")?;
        let rows = stmt
            .query_map(params![workspace_id], row_to_document)
            .context("failed to query tracking rows")?;

        let mut documents = Vec::new();
        for row in rows {
            documents.push(row.context("failed to read tracking row")?.try_into()?);
        }
        Ok(documents)
    }
}

/// Raw row before timestamp/status decoding
struct DocumentRow {
    workspace_id: String,
    file_path: String,
    status: String,
    error_message: Option<String>,
    last_modified: String,
    last_processed: Option<String>,
    hash: Option<String>,
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        workspace_id: row.get(0)?,
        file_path: row.get(1)?,
        status: row.get(2)?,
        error_message: row.get(3)?,
        last_modified: row.get(4)?,
        last_processed: row.get(5)?,
        hash: row.get(6)?,
    })
}

impl TryFrom<DocumentRow> for TrackedDocument {
    type Error = anyhow::Error;

    fn try_from(row: DocumentRow) -> Result<Self> {
        let status = DocumentStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("unknown status in database: {}", row.status))?;
        Ok(TrackedDocument {
            workspace_id: row.workspace_id,
            file_path: row.file_path,
            status,
            error_message: row.error_message,
            last_modified: parse_timestamp(&row.last_modified)?,
            last_processed: row.last_processed.as_deref().map(parse_timestamp).transpose()?,
            hash: row.hash,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in database: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conn() -> TrackerConn {
        TrackerConn::open_in_memory().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let c = conn();
        c.update_document("ws", "/a.txt", DocumentStatus::Pending, None, None, Some("h1"))
            .unwrap();

        let doc = c.get_document("ws", "/a.txt").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.hash.as_deref(), Some("h1"));
        assert!(doc.last_processed.is_none());
        assert!(c.get_document("other", "/a.txt").unwrap().is_none());
    }

    #[test]
    fn test_last_processed_only_set_on_processed() {
        let c = conn();
        c.update_document("ws", "/a.txt", DocumentStatus::Pending, None, None, Some("h1"))
            .unwrap();
        assert!(c.get_document("ws", "/a.txt").unwrap().unwrap().last_processed.is_none());

        c.update_document("ws", "/a.txt", DocumentStatus::Processed, None, None, Some("h1"))
            .unwrap();
        let processed_at = c
            .get_document("ws", "/a.txt")
            .unwrap()
            .unwrap()
            .last_processed
            .expect("set on processed transition");

        // A later error keeps the last successful processing time
        c.update_document(
            "ws",
            "/a.txt",
            DocumentStatus::Error,
            Some("extraction failed"),
            None,
            Some("h2"),
        )
        .unwrap();
        let doc = c.get_document("ws", "/a.txt").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.error_message.as_deref(), Some("extraction failed"));
        assert_eq!(doc.last_processed, Some(processed_at));
        assert_eq!(doc.hash.as_deref(), Some("h2"));
    }

    #[test]
    fn test_pending_ordered_oldest_first() {
        let c = conn();
        let base = Utc::now();
        c.update_document("ws", "/new.txt", DocumentStatus::Pending, None, Some(base), Some("b"))
            .unwrap();
        c.update_document(
            "ws",
            "/old.txt",
            DocumentStatus::Pending,
            None,
            Some(base - Duration::minutes(5)),
            Some("a"),
        )
        .unwrap();
        c.update_document("ws", "/done.txt", DocumentStatus::Processed, None, Some(base), Some("c"))
            .unwrap();

        let pending = c.get_pending_documents("ws").unwrap();
        let paths: Vec<_> = pending.iter().map(|d| d.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/old.txt", "/new.txt"]);
    }

    #[test]
    fn test_mark_deleted_preserves_hash() {
        let c = conn();
        c.update_document("ws", "/a.txt", DocumentStatus::Processed, None, None, Some("h1"))
            .unwrap();
        c.mark_deleted("ws", "/a.txt").unwrap();

        let doc = c.get_document("ws", "/a.txt").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Deleted);
        assert_eq!(doc.hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_mark_deleted_without_prior_row() {
        let c = conn();
        c.mark_deleted("ws", "/ghost.txt").unwrap();

        let doc = c.get_document("ws", "/ghost.txt").unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Deleted);
        assert!(doc.hash.is_none());
    }

    #[test]
    fn test_counts_by_status() {
        let c = conn();
        c.update_document("ws", "/a.txt", DocumentStatus::Pending, None, None, None)
            .unwrap();
        c.update_document("ws", "/b.txt", DocumentStatus::Pending, None, None, None)
            .unwrap();
        c.update_document("ws", "/c.txt", DocumentStatus::Error, Some("boom"), None, None)
            .unwrap();

        let counts = c.counts_by_status("ws").unwrap();
        assert!(counts.contains(&(DocumentStatus::Pending, 2)));
        assert!(counts.contains(&(DocumentStatus::Error, 1)));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processed,
            DocumentStatus::Error,
            DocumentStatus::Deleted,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("unknown"), None);
    }
}
