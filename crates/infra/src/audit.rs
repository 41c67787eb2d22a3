//! Audit trail sinks.
//!
//! The engine records one [`AuditEntry`] per committed change. Sinks run
//! strictly after commit: a failing sink is logged and ignored, it never rolls
//! back the change it describes.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use stockroom_core::UserId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor: UserId,
    /// e.g. `document_finish`, `hu_pick`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: Option<JsonValue>,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: UserId,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
        payload: Option<JsonValue>,
    ) -> Self {
        Self {
            actor,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            payload,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
#[error("audit sink failed: {0}")]
pub struct AuditError(pub String);

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Emits audit entries as structured log events (target `audit`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let payload = entry
            .payload
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        tracing::info!(
            target: "audit",
            actor = %entry.actor,
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            payload = %payload,
            "audit"
        );
        Ok(())
    }
}

/// Keeps entries in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded action names, in order.
    pub fn actions(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries
            .lock()
            .map_err(|_| AuditError("lock poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}
