//! Structured audit events, one per externally-visible key operation.
//!
//! Events record the operation, tenant, generation, and outcome; they never
//! contain key material. Sinks: structured `tracing` records under the
//! `keymint::audit` target, and an optional append-only JSONL file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::middleware::TraceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditResult {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub operation: &'static str,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    pub result: AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

impl AuditEvent {
    pub fn new(
        operation: &'static str,
        tenant_id: &str,
        generation: Option<i64>,
        result: AuditResult,
        error_code: Option<&'static str>,
        correlation_id: &str,
        trace: Option<&TraceContext>,
    ) -> Self {
        Self {
            operation,
            tenant_id: tenant_id.to_string(),
            generation,
            result,
            error_code,
            timestamp: Utc::now(),
            correlation_id: correlation_id.to_string(),
            trace_id: trace.map(|t| t.trace_id.clone()),
            span_id: trace.map(|t| t.span_id.clone()),
        }
    }
}

pub struct AuditLogger {
    file_writer: Option<Mutex<BufWriter<File>>>,
}

impl AuditLogger {
    /// Logger writing to the tracing sink only.
    pub fn new() -> Self {
        Self { file_writer: None }
    }

    /// Logger that additionally appends JSONL records to `path`.
    pub fn with_file(path: &PathBuf) -> Self {
        let file_writer = {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "audit file sink unavailable");
                    e
                })
                .ok()
                .map(|f| Mutex::new(BufWriter::new(f)))
        };
        Self { file_writer }
    }

    pub fn record(&self, event: &AuditEvent) {
        tracing::info!(
            target: "keymint::audit",
            operation = event.operation,
            tenant_id = %event.tenant_id,
            generation = event.generation,
            result = ?event.result,
            error_code = event.error_code,
            correlation_id = %event.correlation_id,
            trace_id = event.trace_id.as_deref(),
            span_id = event.span_id.as_deref(),
            "key operation completed"
        );

        if let Some(writer) = &self.file_writer {
            let json = match serde_json::to_string(event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize audit event");
                    return;
                }
            };
            if let Ok(mut guard) = writer.lock() {
                let _ = writeln!(guard, "{json}");
                let _ = guard.flush();
            }
        }
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_event_serializes_error_code_and_no_key_material() {
        let event = AuditEvent::new(
            "DISABLE_KEY",
            "tenant-001",
            Some(2),
            AuditResult::Failed,
            Some("KEY_ALREADY_DISABLED"),
            "req-1",
            None,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["operation"], "DISABLE_KEY");
        assert_eq!(json["result"], "FAILED");
        assert_eq!(json["error_code"], "KEY_ALREADY_DISABLED");
        assert_eq!(json["generation"], 2);
        assert!(json.get("trace_id").is_none());
        assert!(json.get("key").is_none());
    }

    #[test]
    fn success_event_omits_error_code() {
        let event = AuditEvent::new(
            "CREATE_KEY",
            "tenant-001",
            Some(1),
            AuditResult::Success,
            None,
            "req-2",
            Some(&TraceContext {
                trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
                span_id: "b7ad6b7169203331".into(),
                sampled: true,
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["result"], "SUCCESS");
        assert!(json.get("error_code").is_none());
        assert_eq!(json["trace_id"], "0af7651916cd43dd8448eb211c80319c");
    }

    #[test]
    fn file_sink_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = AuditLogger::with_file(&path);

        for result in [AuditResult::Success, AuditResult::Failed] {
            logger.record(&AuditEvent::new(
                "ROTATE_KEY",
                "tenant-001",
                None,
                result,
                None,
                "req-3",
                None,
            ));
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"SUCCESS\""));
        assert!(lines[1].contains("\"FAILED\""));
    }
}
