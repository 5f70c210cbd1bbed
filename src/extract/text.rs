//! Plain-text family handler: txt, markdown, and JSON
//!
//! Markdown is indexed as-is; formatting markers are useful retrieval
//! signal. JSON is flattened to its scalar leaves so structured exports
//! (chat logs, API dumps) become searchable prose.

use std::fs;
use std::path::Path;

use serde_json::Value;

use super::{DocumentHandler, DocumentMetadata, ExtractError};

pub struct TextHandler {
    max_file_size: u64,
}

impl TextHandler {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl DocumentHandler for TextHandler {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md", "markdown", "json"]
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn extract_text(&self, path: &Path) -> Result<(String, DocumentMetadata), ExtractError> {
        let metadata = DocumentMetadata::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| ExtractError::io(path, e))?;

        let text = if metadata.file_type == "json" {
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| ExtractError::invalid(path, format!("invalid JSON: {e}")))?;
            flatten_json(&value)
        } else {
            content
        };

        Ok((text, metadata))
    }
}

/// Depth-first collection of scalar leaves, one per line. Object fields
/// keep insertion order; nulls contribute nothing.
fn flatten_json(value: &Value) -> String {
    let mut lines = Vec::new();
    collect_scalars(value, &mut lines);
    lines.join("\n")
}

fn collect_scalars(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                collect_scalars(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_scalars(item, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> TextHandler {
        TextHandler::new(10 * 1024 * 1024)
    }

    #[test]
    fn test_plain_text_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "line one\nline two").unwrap();

        let (text, meta) = handler().extract_text(&path).unwrap();
        assert_eq!(text, "line one\nline two");
        assert_eq!(meta.file_name, "notes.txt");
        assert_eq!(meta.file_type, "txt");
    }

    #[test]
    fn test_markdown_kept_raw() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.md");
        fs::write(&path, "# Title\n\nSome **bold** text").unwrap();

        let (text, _) = handler().extract_text(&path).unwrap();
        assert_eq!(text, "# Title\n\nSome **bold** text");
    }

    #[test]
    fn test_json_scalar_flattening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"title": "Report", "tags": ["alpha", "beta"], "meta": {"pages": 12, "draft": false, "notes": null}}"#,
        )
        .unwrap();

        let (text, _) = handler().extract_text(&path).unwrap();
        assert_eq!(text, "Report\nalpha\nbeta\n12\nfalse");
    }

    #[test]
    fn test_json_object_keys_keep_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ordered.json");
        // Keys in reverse-alphabetical order; output must follow the file
        fs::write(&path, r#"{"zeta": "first", "mid": "second", "alpha": "third"}"#).unwrap();

        let (text, _) = handler().extract_text(&path).unwrap();
        assert_eq!(text, "first\nsecond\nthird");
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();

        let err = handler().extract_text(&path).unwrap_err();
        assert!(matches!(err, ExtractError::Invalid { .. }));
        assert!(!err.is_password_protected());
    }
}
