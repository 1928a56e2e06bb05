//! Audit logging for privileged operations
//!
//! Every change nftban makes to the firewall (table bootstrap, peer bans, full
//! ban list replacement) is recorded as one JSON line. Audit failures are
//! logged and never fail the operation being audited.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Bootstrap,
    BanPeers,
    ReplaceBans,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Unique id of the operation
    pub operation_id: Uuid,

    pub event_type: EventType,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            operation_id: Uuid::new_v4(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Builds an event from the outcome of an engine call.
    pub fn from_result<T>(
        event_type: EventType,
        details: serde_json::Value,
        result: &crate::Result<T>,
    ) -> Self {
        Self::new(
            event_type,
            result.is_ok(),
            details,
            result.as_ref().err().map(ToString::to_string),
        )
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub async fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut json = serde_json::to_string(event)?;
        json.push('\n');

        if let Some(parent) = self.log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            crate::utils::ensure_dir(parent)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Writes `event`, downgrading any failure to a warning.
    pub async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event).await {
            tracing::warn!(
                "Failed to write audit log {}: {}",
                self.log_path.display(),
                e
            );
        }
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_event_serialization() {
        let event = AuditEvent::new(
            EventType::BanPeers,
            false,
            serde_json::json!({"entries": 2}),
            Some("nft failed".to_string()),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"ban_peers\""));
        assert!(json.contains("nft failed"));
        assert!(json.contains(&event.operation_id.to_string()));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","operation_id":"67e55044-10b1-426f-9247-bb680e5fe0c8","event_type":"replace_bans","success":true,"details":{},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert_eq!(event.event_type, EventType::ReplaceBans);
    }

    #[test]
    fn test_from_result() {
        let ok: crate::Result<()> = Ok(());
        let event = AuditEvent::from_result(EventType::Bootstrap, serde_json::json!({}), &ok);
        assert!(event.success);
        assert!(event.error.is_none());

        let failed: crate::Result<()> = Err(Error::Internal("worker gone".to_string()));
        let event =
            AuditEvent::from_result(EventType::BanPeers, serde_json::json!({}), &failed);
        assert!(!event.success);
        assert!(event.error.unwrap().contains("worker gone"));
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let a = AuditEvent::new(EventType::BanPeers, true, serde_json::json!({}), None);
        let b = AuditEvent::new(EventType::BanPeers, true, serde_json::json!({}), None);
        assert_ne!(a.operation_id, b.operation_id);
    }

    #[tokio::test]
    async fn test_log_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("nested/audit.log"));

        for event_type in [EventType::Bootstrap, EventType::BanPeers, EventType::ReplaceBans] {
            audit
                .log(&AuditEvent::new(event_type, true, serde_json::json!({}), None))
                .await
                .unwrap();
        }

        let content = std::fs::read_to_string(audit.path()).unwrap();
        assert_eq!(content.lines().count(), 3);

        let recent = audit.read_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, EventType::ReplaceBans);
        assert_eq!(recent[1].event_type, EventType::BanPeers);
    }

    #[tokio::test]
    async fn test_record_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for appending
        let audit = AuditLog::new(dir.path());

        audit
            .record(AuditEvent::new(EventType::Bootstrap, true, serde_json::json!({}), None))
            .await;
        assert!(audit.read_recent(1).await.is_err());
    }
}
