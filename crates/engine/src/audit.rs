use anyhow::Result;
use chrono::Utc;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

static AUDIT_PATH: OnceCell<PathBuf> = OnceCell::new();

/// One line of the JSONL audit trail. Every state change of a collection
/// flow gets an event; settlement rejections are recorded here for manual
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub invoice_ref: String,
    pub state: String,
    pub session_id: Option<String>,
    pub provider: Option<String>,
    pub amount: Option<i64>,
    pub receipt_number: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, invoice_ref: &str, state: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            invoice_ref: invoice_ref.to_string(),
            state: state.to_string(),
            session_id: None,
            provider: None,
            amount: None,
            receipt_number: None,
            error: None,
        }
    }

    pub fn with_session(mut self, session_id: String) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_provider(mut self, provider: String) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_receipt(mut self, receipt_number: String) -> Self {
        self.receipt_number = Some(receipt_number);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Override the audit trail location. Must be called before the first event
/// is written; later calls are ignored.
pub fn set_audit_path(path: PathBuf) {
    let _ = AUDIT_PATH.set(path);
}

fn audit_log_path() -> PathBuf {
    AUDIT_PATH
        .get()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("payments_audit.jsonl"))
}

pub fn write_audit_event(event: &AuditEvent) -> Result<()> {
    let path = audit_log_path();
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

    let json = serde_json::to_string(event)?;
    writeln!(file, "{}", json)?;
    tracing::debug!(event_type=%event.event_type, invoice_ref=%event.invoice_ref, "Audit event written");
    Ok(())
}
