use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One successful flag mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub feature_name: String,
    /// `None` for deletes.
    pub new_value: Option<bool>,
    pub performed_by: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        feature_name: &str,
        new_value: Option<bool>,
        performed_by: &str,
    ) -> Self {
        Self {
            action,
            feature_name: feature_name.to_string(),
            new_value,
            performed_by: performed_by.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Receives audit events after the mutation has already landed.
///
/// `record` has no error channel: an implementation that can fail must deal with
/// the failure itself, and can never undo or fail the mutation it describes.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Writes every event as a structured log line on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            action = %event.action,
            feature_name = %event.feature_name,
            new_value = ?event.new_value,
            performed_by = %event.performed_by,
            created_at = %event.created_at.to_rfc3339(),
            "Feature flag changed"
        );
    }
}
