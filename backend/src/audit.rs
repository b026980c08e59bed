//! Audit trail of outbound protocol messages.
//!
//! Every message written to a session stream is first handed to an
//! [`AuditSink`]. Sinks may fail; the transport logs the failure and still
//! delivers the message.

use async_trait::async_trait;
use chrono::Utc;
use relay_types::JsonRpcMessage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Destination for recorded outbound messages.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, session_id: &str, message: &JsonRpcMessage) -> anyhow::Result<()>;
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _session_id: &str, _message: &JsonRpcMessage) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One line of the audit file.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuditRecord<'a> {
    session_id: &'a str,
    message: &'a JsonRpcMessage,
    recorded_at: String,
}

/// Sink that appends one JSON object per line to a file.
///
/// The file is opened on first write and the handle is kept for later
/// records. A failed write drops the handle so the next record reopens it.
pub struct JsonlAuditSink {
    path: PathBuf,
    /// Serializes appends so lines from concurrent sessions never mix.
    file: Mutex<Option<File>>,
}

impl JsonlAuditSink {
    /// Create a new sink writing to `path`. The file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        info!("Recording outbound messages to {}", path.display());
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        let mut handle = match file.take() {
            Some(handle) => handle,
            None => {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?
            }
        };

        handle.write_all(line).await?;
        handle.flush().await?;
        *file = Some(handle);
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, session_id: &str, message: &JsonRpcMessage) -> anyhow::Result<()> {
        let record = AuditRecord {
            session_id,
            message,
            recorded_at: Utc::now().to_rfc3339(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        self.append(&line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::JsonRpcResponse;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_sink_appends_records() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("audit.jsonl"));

        let first: JsonRpcMessage = JsonRpcResponse::success(Some(json!(1)), json!({})).into();
        let second: JsonRpcMessage = JsonRpcResponse::success(Some(json!(2)), json!({})).into();
        sink.record("s1", &first).await.unwrap();
        sink.record("s2", &second).await.unwrap();

        let contents = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["sessionId"], "s1");
        assert_eq!(lines[0]["message"]["id"], 1);
        assert_eq!(lines[1]["sessionId"], "s2");
        assert!(lines[1]["recordedAt"].is_string());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_jsonl_sink_keeps_file_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let moved = dir.path().join("moved.jsonl");
        let sink = JsonlAuditSink::new(&path);
        let message: JsonRpcMessage = JsonRpcResponse::success(Some(json!(1)), json!({})).into();

        sink.record("s", &message).await.unwrap();
        std::fs::rename(&path, &moved).unwrap();
        sink.record("s", &message).await.unwrap();

        assert!(!path.exists());
        let contents = std::fs::read_to_string(&moved).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_sink_reports_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("missing").join("audit.jsonl"));
        let message: JsonRpcMessage = JsonRpcResponse::success(None, json!({})).into();

        assert!(sink.record("s", &message).await.is_err());
    }
}
