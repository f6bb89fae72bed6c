mod audit;
pub mod initiator;
pub mod poller;
pub mod settlement;

pub use audit::set_audit_path;
pub use initiator::{ChargeRequest, SessionAcquired, SessionArtifact};
pub use poller::{Completion, PollConfig, PollOutcome};
pub use settlement::record_cash_payment;

use audit::{write_audit_event, AuditEvent};
use gateway::{SettlementBackend, SettlementReceipt, WalletGateway};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use walletdesk_core::SessionStatus;

/// Errors the flow surfaces to its caller. Transient polling failures never
/// appear here; they are absorbed inside the poll loop and eventually show
/// up as a timeout.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Init-time network or validation failure. Not retried automatically,
    /// the operator has to trigger the collection again.
    #[error("could not open a collection session: {0}")]
    SessionCreationFailed(String),
    /// Business-rule rejection from the ledger. Never auto-retried.
    #[error("settlement rejected: {0}")]
    SettlementRejected(String),
    #[error("settlement backend unreachable: {0}")]
    SettlementUnreachable(String),
}

#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub poll_interval: Duration,
    /// Hard wall-clock bound on one collection attempt, measured from
    /// session creation.
    pub ceiling: Duration,
    pub transport_retry_limit: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(120),
            transport_retry_limit: 3,
        }
    }
}

/// Terminal outcome of one collection attempt. `Failed`, `TimedOut` and
/// `Canceled` leave the invoice untouched; a retry goes back through the
/// initiator's reuse path.
#[derive(Debug)]
pub enum CollectionOutcome {
    Settled { receipt: SettlementReceipt },
    Failed { reason: String },
    TimedOut,
    Canceled,
}

/// One invoice's collection flow: initiator, poller, ceiling and settlement
/// recorder behind a single entry point.
///
/// Independent flows share no client-side state; the invoice row is
/// protected by the backend's atomic settlement operation alone. Observers
/// subscribe to the status and artifact watch channels; the session object
/// itself stays private to `collect` and is dropped on every terminal
/// outcome.
pub struct PaymentFlow {
    gateway: Arc<dyn WalletGateway>,
    backend: Arc<dyn SettlementBackend>,
    cfg: FlowConfig,
    cancel_tx: watch::Sender<bool>,
    status_tx: watch::Sender<SessionStatus>,
    artifact_tx: watch::Sender<Option<SessionArtifact>>,
}

impl PaymentFlow {
    pub fn new(
        gateway: Arc<dyn WalletGateway>,
        backend: Arc<dyn SettlementBackend>,
        cfg: FlowConfig,
    ) -> Arc<Self> {
        let (cancel_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(SessionStatus::Initiating);
        let (artifact_tx, _) = watch::channel(None);
        Arc::new(Self {
            gateway,
            backend,
            cfg,
            cancel_tx,
            status_tx,
            artifact_tx,
        })
    }

    /// Live view of the session status, for rendering the in-progress /
    /// success / failure / timeout states distinctly.
    pub fn status_feed(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// The presentation artifact of the current attempt, once one exists.
    /// Stays `None` on the reuse path.
    pub fn artifact_feed(&self) -> watch::Receiver<Option<SessionArtifact>> {
        self.artifact_tx.subscribe()
    }

    /// Stop the flow cooperatively. No further status queries are scheduled;
    /// an in-flight query's result is discarded when it lands.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Run one collection attempt end to end.
    pub async fn collect(&self, req: &ChargeRequest) -> Result<CollectionOutcome, FlowError> {
        self.status_tx.send_replace(SessionStatus::Initiating);
        self.artifact_tx.send_replace(None);

        let acquired = initiator::open_session(self.gateway.as_ref(), req).await?;
        let (mut session, artifact) = match acquired {
            SessionAcquired::Created { session, artifact } => (session, Some(artifact)),
            SessionAcquired::Reused { session } => (session, None),
        };
        self.artifact_tx.send_replace(artifact);
        self.status_tx.send_replace(SessionStatus::AwaitingAction);

        let deadline = Instant::now() + self.cfg.ceiling;
        let poll_cfg = PollConfig {
            interval: self.cfg.poll_interval,
            transport_retry_limit: self.cfg.transport_retry_limit,
        };
        let cancel_rx = self.cancel_tx.subscribe();

        let outcome = poller::poll_until_terminal(
            self.gateway.as_ref(),
            &mut session,
            deadline,
            &poll_cfg,
            &cancel_rx,
            &self.status_tx,
        )
        .await;

        match outcome {
            PollOutcome::Completed(completion) => {
                let receipt = settlement::record_completed(
                    self.backend.as_ref(),
                    &session,
                    &completion,
                    req.payer_phone.as_deref(),
                )
                .await?;
                Ok(CollectionOutcome::Settled { receipt })
            }
            PollOutcome::Failed { reason } => {
                let _ = write_audit_event(
                    &AuditEvent::new("collection_failed", &session.invoice_ref, "failed")
                        .with_session(session.session_id.clone())
                        .with_error(reason.clone()),
                );
                Ok(CollectionOutcome::Failed { reason })
            }
            PollOutcome::TimedOut => {
                let _ = write_audit_event(
                    &AuditEvent::new("collection_timed_out", &session.invoice_ref, "timed_out")
                        .with_session(session.session_id.clone()),
                );
                Ok(CollectionOutcome::TimedOut)
            }
            PollOutcome::Canceled => {
                let _ = write_audit_event(
                    &AuditEvent::new("collection_canceled", &session.invoice_ref, "canceled")
                        .with_session(session.session_id.clone()),
                );
                Ok(CollectionOutcome::Canceled)
            }
        }
    }

    /// Discard the previous attempt and run a fresh one. The gateway's
    /// acquire-or-reuse path guarantees this cannot open a second chargeable
    /// session while the old one is still active.
    pub async fn retry(&self, req: &ChargeRequest) -> Result<CollectionOutcome, FlowError> {
        self.cancel_tx.send_replace(false);
        let _ = write_audit_event(
            &AuditEvent::new("collection_retried", &req.invoice_ref, "initiating")
                .with_provider(req.provider.to_string())
                .with_amount(req.amount),
        );
        self.collect(req).await
    }

    /// Settle a cash payment against the same ledger. Exposed on the flow so
    /// the desk has one surface for every settlement path.
    pub async fn settle_cash(
        &self,
        invoice_ref: &str,
        amount: i64,
    ) -> Result<SettlementReceipt, FlowError> {
        settlement::record_cash_payment(self.backend.as_ref(), invoice_ref, amount).await
    }
}
