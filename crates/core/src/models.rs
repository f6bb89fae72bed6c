use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wallet providers the back office can collect through.
///
/// GoPay sessions present a scannable QR plus an app deep link; OVO sessions
/// are push charges delivered to the payer's phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gopay,
    Ovo,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gopay => "gopay",
            Provider::Ovo => "ovo",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a settlement was paid. Cash entries go through the same ledger
/// operation as wallet settlements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gopay,
    Ovo,
    Cash,
}

impl From<Provider> for PaymentMethod {
    fn from(p: Provider) -> Self {
        match p {
            Provider::Gopay => PaymentMethod::Gopay,
            Provider::Ovo => PaymentMethod::Ovo,
        }
    }
}

/// Lifecycle of one collection attempt. Terminal states stop polling for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiating,
    AwaitingAction,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiating => "initiating",
            SessionStatus::AwaitingAction => "awaiting_action",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::TimedOut => "timed_out",
        }
    }
}

/// One payment-collection attempt at the gateway. Owned by the flow that
/// created it and discarded on terminal state, cancel, or retry; never
/// persisted on the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: String,
    pub provider: Provider,
    pub invoice_ref: String,
    /// Amount to collect, in rupiah (no minor units).
    pub amount: i64,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Unpaid,
    Partial,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: i64,
}

/// Invoice ledger view. `amount_remaining` and `state` are derived from the
/// amounts rather than stored, so they can never disagree with them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub total_amount: i64,
    pub amount_settled: i64,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl Invoice {
    pub fn amount_remaining(&self) -> i64 {
        self.total_amount - self.amount_settled
    }

    pub fn state(&self) -> InvoiceState {
        match self.amount_remaining() {
            0 => InvoiceState::Paid,
            r if r == self.total_amount => InvoiceState::Unpaid,
            _ => InvoiceState::Partial,
        }
    }
}

/// Durable proof of payment. At most one entry exists per session_id; entries
/// are immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub invoice_ref: String,
    pub session_id: String,
    pub provider_reference: String,
    pub amount: i64,
    pub method: PaymentMethod,
    pub timestamp: DateTime<Utc>,
    pub receipt_number: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(total: i64, settled: i64) -> Invoice {
        Invoice {
            id: "INV-1".into(),
            total_amount: total,
            amount_settled: settled,
            line_items: Vec::new(),
        }
    }

    #[test]
    fn invoice_state_follows_amounts() {
        assert_eq!(invoice(10_000, 0).state(), InvoiceState::Unpaid);
        assert_eq!(invoice(10_000, 4_000).state(), InvoiceState::Partial);
        assert_eq!(invoice(10_000, 10_000).state(), InvoiceState::Paid);
    }

    #[test]
    fn remaining_is_total_minus_settled() {
        assert_eq!(invoice(10_000, 4_000).amount_remaining(), 6_000);
        assert_eq!(invoice(10_000, 10_000).amount_remaining(), 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::TimedOut.is_terminal());
        assert!(!SessionStatus::AwaitingAction.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
    }
}
