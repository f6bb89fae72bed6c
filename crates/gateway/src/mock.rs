use super::{
    CreateSessionRequest, CreateSessionResponse, GatewayError, ReportedState, SettlementBackend,
    SettlementError, SettlementReceipt, SettlementRequest, StatusReport, WalletGateway,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use walletdesk_core::{Invoice, LedgerEntry, Provider};

/// In-memory stand-in for the whole function-call backend: wallet sessions on
/// one side, the invoice ledger on the other.
///
/// Sessions keep an "active" registry per invoice+provider pair so the
/// acquire-or-reuse path behaves like the real gateway, and settlements go
/// through a single mutex so the atomicity and idempotency guarantees hold
/// the same way the backend's per-invoice critical section does.
pub struct MockBackoffice {
    state: Mutex<State>,
}

struct SessionRecord {
    invoice_ref: String,
    provider: Provider,
    script: VecDeque<ReportedState>,
    provider_reference: Option<String>,
    queries: u32,
}

#[derive(Default)]
struct State {
    invoices: HashMap<String, Invoice>,
    ledger: HashMap<String, LedgerEntry>,
    active: HashMap<(String, Provider), String>,
    sessions: HashMap<String, SessionRecord>,
    default_script: Vec<ReportedState>,
    fail_queries: u32,
    receipt_seq: u64,
}

fn random_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

impl MockBackoffice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                default_script: vec![ReportedState::AwaitingPayer],
                ..State::default()
            }),
        })
    }

    pub fn seed_invoice(&self, invoice: Invoice) {
        let mut state = self.state.lock().unwrap();
        state.invoices.insert(invoice.id.clone(), invoice);
    }

    pub fn invoice(&self, id: &str) -> Option<Invoice> {
        self.state.lock().unwrap().invoices.get(id).cloned()
    }

    /// Status sequence applied to sessions created from now on. The last
    /// entry repeats once the script runs out.
    pub fn set_status_script(&self, script: &[ReportedState]) {
        let mut state = self.state.lock().unwrap();
        state.default_script = script.to_vec();
    }

    /// Replace the remaining script of an existing session.
    pub fn script_session(&self, session_id: &str, script: &[ReportedState]) {
        let mut state = self.state.lock().unwrap();
        if let Some(rec) = state.sessions.get_mut(session_id) {
            rec.script = script.iter().copied().collect();
        }
    }

    /// Make the next `n` status queries fail with a transport error.
    pub fn fail_next_queries(&self, n: u32) {
        self.state.lock().unwrap().fail_queries = n;
    }

    /// Injected transport failures not yet consumed by status queries.
    pub fn remaining_query_failures(&self) -> u32 {
        self.state.lock().unwrap().fail_queries
    }

    pub fn query_count(&self, session_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .map(|r| r.queries)
            .unwrap_or(0)
    }

    pub fn active_session(&self, invoice_ref: &str, provider: Provider) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .active
            .get(&(invoice_ref.to_string(), provider))
            .cloned()
    }

    pub fn ledger_entry(&self, session_id: &str) -> Option<LedgerEntry> {
        self.state.lock().unwrap().ledger.get(session_id).cloned()
    }

    pub fn ledger_entries_for(&self, invoice_ref: &str) -> Vec<LedgerEntry> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<LedgerEntry> = state
            .ledger
            .values()
            .filter(|e| e.invoice_ref == invoice_ref)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        out
    }
}

#[async_trait]
impl WalletGateway for MockBackoffice {
    async fn create_session(
        &self,
        req: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, GatewayError> {
        let mut state = self.state.lock().unwrap();

        let invoice = state
            .invoices
            .get(&req.invoice_ref)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown invoice {}", req.invoice_ref)))?;
        if req.amount <= 0 {
            return Err(GatewayError::Rejected("amount must be positive".into()));
        }
        if invoice.amount_remaining() == 0 {
            return Err(GatewayError::Rejected(format!(
                "invoice {} is already fully paid",
                req.invoice_ref
            )));
        }

        let key = (req.invoice_ref.clone(), req.provider);
        if let Some(existing) = state.active.get(&key).cloned() {
            // Acquire-or-reuse: the old session is still chargeable, hand it
            // back instead of opening a second one. No new artifact.
            return Ok(CreateSessionResponse {
                session_id: existing,
                qr_data: None,
                deep_link_primary: None,
                deep_link_fallback: None,
                reused: true,
            });
        }

        let session_id = random_id("sess");
        let script: VecDeque<ReportedState> = state.default_script.iter().copied().collect();
        state.sessions.insert(
            session_id.clone(),
            SessionRecord {
                invoice_ref: req.invoice_ref.clone(),
                provider: req.provider,
                script,
                provider_reference: None,
                queries: 0,
            },
        );
        state.active.insert(key, session_id.clone());

        let (qr_data, deep_link_primary, deep_link_fallback) = match req.provider {
            Provider::Gopay => (
                Some(format!("00020101QRIS.{session_id}")),
                Some(format!("gojek://gopay/pay?session={session_id}")),
                Some(format!("https://gojek.link/pay/{session_id}")),
            ),
            // OVO pushes the charge to the payer's phone, nothing to present.
            Provider::Ovo => (None, None, None),
        };

        Ok(CreateSessionResponse {
            session_id,
            qr_data,
            deep_link_primary,
            deep_link_fallback,
            reused: false,
        })
    }

    async fn query_status(&self, session_id: &str) -> Result<StatusReport, GatewayError> {
        let mut state = self.state.lock().unwrap();

        if state.fail_queries > 0 {
            state.fail_queries -= 1;
            return Err(GatewayError::Transport("connection reset".into()));
        }

        let rec = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown session {session_id}")))?;
        rec.queries += 1;

        let reported = if rec.script.len() > 1 {
            rec.script.pop_front().unwrap_or(ReportedState::Unknown)
        } else {
            rec.script.front().copied().unwrap_or(ReportedState::Unknown)
        };

        let provider_reference = match reported {
            ReportedState::Succeeded => Some(
                rec.provider_reference
                    .get_or_insert_with(|| format!("trx-{}", uuid::Uuid::new_v4()))
                    .clone(),
            ),
            _ => None,
        };

        let raw_payload = json!({
            "session_id": session_id,
            "provider": rec.provider.as_str(),
            "status": reported,
        });

        // Gateway-side terminal: the session is no longer reusable.
        if matches!(
            reported,
            ReportedState::Succeeded | ReportedState::Failed | ReportedState::Expired
        ) {
            let key = (rec.invoice_ref.clone(), rec.provider);
            state.active.remove(&key);
        }

        Ok(StatusReport {
            session_id: session_id.to_string(),
            state: reported,
            provider_reference,
            raw_payload,
        })
    }
}

#[async_trait]
impl SettlementBackend for MockBackoffice {
    async fn record_settlement(
        &self,
        req: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        // One lock for the whole operation: validate, write ledger, update
        // invoice. This is the serialization point.
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.ledger.get(&req.session_id) {
            let remaining = state
                .invoices
                .get(&existing.invoice_ref)
                .map(|i| i.amount_remaining())
                .unwrap_or(0);
            return Ok(SettlementReceipt {
                receipt_number: existing.receipt_number.clone(),
                new_amount_remaining: remaining,
            });
        }

        let invoice = state
            .invoices
            .get(&req.invoice_ref)
            .ok_or_else(|| SettlementError::Rejected(format!("unknown invoice {}", req.invoice_ref)))?;

        if req.amount <= 0 {
            return Err(SettlementError::Rejected(
                "settlement amount must be positive".into(),
            ));
        }
        if req.amount > invoice.amount_remaining() {
            return Err(SettlementError::Rejected(format!(
                "amount {} exceeds remaining balance {}",
                req.amount,
                invoice.amount_remaining()
            )));
        }

        state.receipt_seq += 1;
        let receipt_number = format!("RCP-{:06}", state.receipt_seq);
        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            invoice_ref: req.invoice_ref.clone(),
            session_id: req.session_id.clone(),
            provider_reference: req.provider_reference.clone(),
            amount: req.amount,
            method: req.method,
            timestamp: Utc::now(),
            receipt_number: receipt_number.clone(),
        };
        state.ledger.insert(req.session_id.clone(), entry);

        let invoice = state
            .invoices
            .get_mut(&req.invoice_ref)
            .expect("invoice checked above");
        invoice.amount_settled += req.amount;
        let new_amount_remaining = invoice.amount_remaining();

        Ok(SettlementReceipt {
            receipt_number,
            new_amount_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletdesk_core::PaymentMethod;

    fn seeded() -> Arc<MockBackoffice> {
        let backoffice = MockBackoffice::new();
        backoffice.seed_invoice(Invoice {
            id: "INV-1".into(),
            total_amount: 10_000,
            amount_settled: 0,
            line_items: Vec::new(),
        });
        backoffice
    }

    fn settlement(session_id: &str, amount: i64) -> SettlementRequest {
        SettlementRequest {
            invoice_ref: "INV-1".into(),
            session_id: session_id.into(),
            amount,
            provider_reference: "trx-1".into(),
            method: PaymentMethod::Gopay,
            payer_phone: None,
        }
    }

    #[tokio::test]
    async fn partial_then_full_settlement() {
        let backoffice = seeded();

        let first = backoffice
            .record_settlement(&settlement("sess-a", 4_000))
            .await
            .unwrap();
        assert_eq!(first.new_amount_remaining, 6_000);
        assert_eq!(
            backoffice.invoice("INV-1").unwrap().state(),
            walletdesk_core::InvoiceState::Partial
        );

        let second = backoffice
            .record_settlement(&settlement("sess-b", 6_000))
            .await
            .unwrap();
        assert_eq!(second.new_amount_remaining, 0);
        assert_eq!(
            backoffice.invoice("INV-1").unwrap().state(),
            walletdesk_core::InvoiceState::Paid
        );
    }

    #[tokio::test]
    async fn duplicate_delivery_returns_same_receipt() {
        let backoffice = seeded();

        let first = backoffice
            .record_settlement(&settlement("sess-a", 4_000))
            .await
            .unwrap();
        let second = backoffice
            .record_settlement(&settlement("sess-a", 4_000))
            .await
            .unwrap();

        assert_eq!(first.receipt_number, second.receipt_number);
        assert_eq!(backoffice.invoice("INV-1").unwrap().amount_settled, 4_000);
        assert_eq!(backoffice.ledger_entries_for("INV-1").len(), 1);
    }

    #[tokio::test]
    async fn overpayment_is_rejected_without_side_effects() {
        let backoffice = seeded();
        backoffice
            .record_settlement(&settlement("sess-a", 5_000))
            .await
            .unwrap();

        let err = backoffice
            .record_settlement(&settlement("sess-b", 7_000))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Rejected(_)));

        let invoice = backoffice.invoice("INV-1").unwrap();
        assert_eq!(invoice.amount_settled, 5_000);
        assert!(backoffice.ledger_entry("sess-b").is_none());
    }

    #[tokio::test]
    async fn second_create_reuses_active_session() {
        let backoffice = seeded();
        let req = CreateSessionRequest {
            provider: Provider::Gopay,
            invoice_ref: "INV-1".into(),
            amount: 10_000,
            payer_phone: None,
        };

        let first = backoffice.create_session(&req).await.unwrap();
        assert!(!first.reused);
        assert!(first.qr_data.is_some());

        let second = backoffice.create_session(&req).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.session_id, first.session_id);
        assert!(second.qr_data.is_none());
    }

    #[tokio::test]
    async fn terminal_report_clears_active_registry() {
        let backoffice = seeded();
        let req = CreateSessionRequest {
            provider: Provider::Gopay,
            invoice_ref: "INV-1".into(),
            amount: 10_000,
            payer_phone: None,
        };
        let created = backoffice.create_session(&req).await.unwrap();
        backoffice.script_session(&created.session_id, &[ReportedState::Succeeded]);

        let report = backoffice.query_status(&created.session_id).await.unwrap();
        assert_eq!(report.state, ReportedState::Succeeded);
        assert!(report.provider_reference.is_some());
        assert!(backoffice.active_session("INV-1", Provider::Gopay).is_none());
    }
}
