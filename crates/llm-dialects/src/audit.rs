//! Audit records for completed calls.
//!
//! The client records one [`AuditRecord`] per completed request through an
//! [`AuditLog`]. A failing sink never fails the completion; the client logs
//! the error and moves on.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::Provider;
use crate::error::LlmError;
use crate::usage::Usage;

/// What was sent and received for one completed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// The provider that served the call.
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// The request body as sent.
    pub request_payload: String,
    /// The final text plus any tool calls, as returned to the caller.
    pub response_payload: String,
    /// Token counts.
    pub usage: Usage,
    /// `true` when `usage` was computed with the model's tokenizer because
    /// the provider reported none.
    pub usage_estimated: bool,
}

/// Persists audit records.
pub trait AuditLog: Send + Sync {
    /// Stores one record.
    fn record(&self, record: AuditRecord) -> Result<(), LlmError>;
}

/// Keeps records in memory. Useful in tests.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn record(&self, record: AuditRecord) -> Result<(), LlmError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// Emits each record as an `info` event on the `llm_dialects::audit` target.
///
/// Payloads go out at `trace` level only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, record: AuditRecord) -> Result<(), LlmError> {
        tracing::info!(
            target: "llm_dialects::audit",
            provider = %record.provider,
            model = %record.model,
            input_tokens = record.usage.input_tokens,
            output_tokens = record.usage.output_tokens,
            estimated = record.usage_estimated,
            "completion recorded"
        );
        tracing::trace!(
            target: "llm_dialects::audit",
            request = %record.request_payload,
            response = %record.response_payload,
        );
        Ok(())
    }
}
