use crate::audit::{write_audit_event, AuditEvent};
use crate::FlowError;
use chrono::Utc;
use gateway::{CreateSessionRequest, WalletGateway};
use serde::{Deserialize, Serialize};
use walletdesk_core::validation::{check_charge_request, normalize_msisdn};
use walletdesk_core::{PaymentSession, Provider, SessionStatus};

/// What the operator asked to collect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub invoice_ref: String,
    pub amount: i64,
    pub provider: Provider,
    pub payer_phone: Option<String>,
}

/// Presentation artifact for a freshly created session, tagged by provider.
/// Provider-specific fields are validated here, once, so render code never
/// has to re-check them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SessionArtifact {
    Gopay {
        qr_data: String,
        deeplink: Option<String>,
        web_fallback: Option<String>,
    },
    Ovo {
        push_sent_to: String,
    },
}

/// Outcome of acquiring a session: either a new one with its presentation
/// artifact, or an already-active one the gateway handed back. The reuse
/// path never carries an artifact.
#[derive(Debug, Clone)]
pub enum SessionAcquired {
    Created {
        session: PaymentSession,
        artifact: SessionArtifact,
    },
    Reused {
        session: PaymentSession,
    },
}

impl SessionAcquired {
    pub fn session(&self) -> &PaymentSession {
        match self {
            SessionAcquired::Created { session, .. } => session,
            SessionAcquired::Reused { session } => session,
        }
    }

    pub fn reused(&self) -> bool {
        matches!(self, SessionAcquired::Reused { .. })
    }
}

/// Open a collection session at the gateway, or adopt the active one for
/// this invoice+provider pair.
pub async fn open_session(
    gateway: &dyn WalletGateway,
    req: &ChargeRequest,
) -> Result<SessionAcquired, FlowError> {
    check_charge_request(req.provider, req.amount, req.payer_phone.as_deref())
        .map_err(|errs| FlowError::SessionCreationFailed(errs.join("; ")))?;

    let payer_phone = req
        .payer_phone
        .as_deref()
        .and_then(normalize_msisdn);

    let response = gateway
        .create_session(&CreateSessionRequest {
            provider: req.provider,
            invoice_ref: req.invoice_ref.clone(),
            amount: req.amount,
            payer_phone: payer_phone.clone(),
        })
        .await
        .map_err(|e| {
            let _ = write_audit_event(
                &AuditEvent::new("session_open_failed", &req.invoice_ref, "failed")
                    .with_provider(req.provider.to_string())
                    .with_amount(req.amount)
                    .with_error(e.to_string()),
            );
            FlowError::SessionCreationFailed(e.to_string())
        })?;

    let session = PaymentSession {
        session_id: response.session_id.clone(),
        provider: req.provider,
        invoice_ref: req.invoice_ref.clone(),
        amount: req.amount,
        created_at: Utc::now(),
        status: SessionStatus::AwaitingAction,
    };

    if response.reused {
        tracing::info!(
            session_id = %session.session_id,
            invoice_ref = %session.invoice_ref,
            "Adopted active collection session"
        );
        let _ = write_audit_event(
            &AuditEvent::new("session_reused", &req.invoice_ref, "awaiting_action")
                .with_session(session.session_id.clone())
                .with_provider(req.provider.to_string())
                .with_amount(req.amount),
        );
        return Ok(SessionAcquired::Reused { session });
    }

    let artifact = match req.provider {
        Provider::Gopay => {
            let qr_data = response.qr_data.ok_or_else(|| {
                FlowError::SessionCreationFailed(
                    "gateway returned a GoPay session without QR data".to_string(),
                )
            })?;
            SessionArtifact::Gopay {
                qr_data,
                deeplink: response.deep_link_primary,
                web_fallback: response.deep_link_fallback,
            }
        }
        Provider::Ovo => {
            // check_charge_request guarantees a valid phone for OVO
            let push_sent_to = payer_phone.ok_or_else(|| {
                FlowError::SessionCreationFailed(
                    "OVO session acquired without a payer phone".to_string(),
                )
            })?;
            SessionArtifact::Ovo { push_sent_to }
        }
    };

    let _ = write_audit_event(
        &AuditEvent::new("session_opened", &req.invoice_ref, "awaiting_action")
            .with_session(session.session_id.clone())
            .with_provider(req.provider.to_string())
            .with_amount(req.amount),
    );

    Ok(SessionAcquired::Created { session, artifact })
}
