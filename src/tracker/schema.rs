//! SQLite schema for document tracking

/// Schema for the tracking database
pub const SCHEMA: &str = r#"
-- One row per (workspace, file); rows are never physically deleted so the
-- last known hash survives file removal.
CREATE TABLE IF NOT EXISTS document_tracking (
    workspace_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processed', 'error', 'deleted')),
    error_message TEXT,
    last_modified TEXT NOT NULL,
    last_processed TEXT,
    hash TEXT,
    PRIMARY KEY (workspace_id, file_path)
);

CREATE INDEX IF NOT EXISTS idx_tracking_status
    ON document_tracking(workspace_id, status);

CREATE INDEX IF NOT EXISTS idx_tracking_last_modified
    ON document_tracking(workspace_id, last_modified);
"#;
