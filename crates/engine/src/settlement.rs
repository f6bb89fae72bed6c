use crate::audit::{write_audit_event, AuditEvent};
use crate::poller::Completion;
use crate::FlowError;
use gateway::{SettlementBackend, SettlementError, SettlementReceipt, SettlementRequest};
use walletdesk_core::{PaymentMethod, PaymentSession};

/// Forward a COMPLETED terminal event to the backend's atomic settlement
/// operation.
///
/// The backend keys the ledger by session_id, so delivering the same
/// completion twice yields the original receipt instead of a second entry.
/// A rejection is final: it is surfaced verbatim and never replayed, since
/// replaying a rejected settlement risks inconsistent crediting. The
/// session's COMPLETED status is not retracted on rejection; the audit
/// trail flags the mismatch for manual reconciliation.
pub async fn record_completed(
    backend: &dyn SettlementBackend,
    session: &PaymentSession,
    completion: &Completion,
    payer_phone: Option<&str>,
) -> Result<SettlementReceipt, FlowError> {
    let request = SettlementRequest {
        invoice_ref: session.invoice_ref.clone(),
        session_id: session.session_id.clone(),
        amount: session.amount,
        provider_reference: completion.provider_reference.clone(),
        method: session.provider.into(),
        payer_phone: payer_phone.map(|p| p.to_string()),
    };

    match backend.record_settlement(&request).await {
        Ok(receipt) => {
            tracing::info!(
                session_id = %session.session_id,
                receipt_number = %receipt.receipt_number,
                new_amount_remaining = receipt.new_amount_remaining,
                "Payment settled"
            );
            let _ = write_audit_event(
                &AuditEvent::new("settlement_recorded", &session.invoice_ref, "settled")
                    .with_session(session.session_id.clone())
                    .with_provider(session.provider.to_string())
                    .with_amount(session.amount)
                    .with_receipt(receipt.receipt_number.clone()),
            );
            Ok(receipt)
        }
        Err(SettlementError::Rejected(reason)) => {
            tracing::error!(
                session_id = %session.session_id,
                reason = %reason,
                "Settlement rejected for a completed payment, manual reconciliation required"
            );
            let _ = write_audit_event(
                &AuditEvent::new("settlement_rejected", &session.invoice_ref, "needs_reconciliation")
                    .with_session(session.session_id.clone())
                    .with_provider(session.provider.to_string())
                    .with_amount(session.amount)
                    .with_error(reason.clone()),
            );
            Err(FlowError::SettlementRejected(reason))
        }
        Err(SettlementError::Transport(e)) => {
            let _ = write_audit_event(
                &AuditEvent::new("settlement_unreachable", &session.invoice_ref, "needs_reconciliation")
                    .with_session(session.session_id.clone())
                    .with_amount(session.amount)
                    .with_error(e.clone()),
            );
            Err(FlowError::SettlementUnreachable(e))
        }
    }
}

/// Settle an over-the-counter cash payment through the same idempotent
/// ledger operation. The locally minted id doubles as the idempotency key.
pub async fn record_cash_payment(
    backend: &dyn SettlementBackend,
    invoice_ref: &str,
    amount: i64,
) -> Result<SettlementReceipt, FlowError> {
    let session_id = format!("cash-{}", uuid::Uuid::new_v4());
    let request = SettlementRequest {
        invoice_ref: invoice_ref.to_string(),
        session_id: session_id.clone(),
        amount,
        provider_reference: session_id.clone(),
        method: PaymentMethod::Cash,
        payer_phone: None,
    };

    match backend.record_settlement(&request).await {
        Ok(receipt) => {
            let _ = write_audit_event(
                &AuditEvent::new("cash_settlement_recorded", invoice_ref, "settled")
                    .with_session(session_id)
                    .with_amount(amount)
                    .with_receipt(receipt.receipt_number.clone()),
            );
            Ok(receipt)
        }
        Err(SettlementError::Rejected(reason)) => Err(FlowError::SettlementRejected(reason)),
        Err(SettlementError::Transport(e)) => Err(FlowError::SettlementUnreachable(e)),
    }
}
