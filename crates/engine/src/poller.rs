use gateway::{GatewayError, ReportedState, WalletGateway};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use walletdesk_core::{PaymentSession, SessionStatus};

#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Gap between consecutive status queries.
    pub interval: Duration,
    /// Consecutive transport failures tolerated before the loop stops
    /// querying and waits out the ceiling.
    pub transport_retry_limit: u32,
}

/// Provider payload carried by a COMPLETED terminal event, forwarded to the
/// settlement recorder.
#[derive(Debug, Clone)]
pub struct Completion {
    pub provider_reference: String,
    pub raw_payload: Value,
}

#[derive(Debug)]
pub enum PollOutcome {
    Completed(Completion),
    Failed { reason: String },
    TimedOut,
    Canceled,
}

/// Drive one session to a terminal outcome.
///
/// Strictly sequential: a single query is in flight at a time and the next
/// one is only scheduled after the previous response resolves. The deadline
/// and the cancel flag are checked on every tick; a response that lands
/// after cancellation is discarded.
pub async fn poll_until_terminal(
    gateway: &dyn WalletGateway,
    session: &mut PaymentSession,
    deadline: Instant,
    cfg: &PollConfig,
    cancel: &watch::Receiver<bool>,
    status_tx: &watch::Sender<SessionStatus>,
) -> PollOutcome {
    let mut consecutive_transport_errors: u32 = 0;

    loop {
        if *cancel.borrow() {
            return PollOutcome::Canceled;
        }
        if Instant::now() >= deadline {
            session.status = SessionStatus::TimedOut;
            status_tx.send_replace(SessionStatus::TimedOut);
            tracing::warn!(
                session_id = %session.session_id,
                "Collection ceiling exceeded, session timed out"
            );
            return PollOutcome::TimedOut;
        }

        let stalled = consecutive_transport_errors >= cfg.transport_retry_limit;
        if !stalled {
            let report = gateway.query_status(&session.session_id).await;

            // the flow may have been canceled while the query was in flight
            if *cancel.borrow() {
                return PollOutcome::Canceled;
            }

            match report {
                Ok(report) => {
                    consecutive_transport_errors = 0;
                    match report.state {
                        ReportedState::Succeeded => {
                            session.status = SessionStatus::Completed;
                            status_tx.send_replace(SessionStatus::Completed);
                            return PollOutcome::Completed(Completion {
                                provider_reference: report
                                    .provider_reference
                                    .unwrap_or_default(),
                                raw_payload: report.raw_payload,
                            });
                        }
                        ReportedState::Failed => {
                            session.status = SessionStatus::Failed;
                            status_tx.send_replace(SessionStatus::Failed);
                            return PollOutcome::Failed {
                                reason: "gateway reported the payment as failed".to_string(),
                            };
                        }
                        ReportedState::Expired => {
                            session.status = SessionStatus::Failed;
                            status_tx.send_replace(SessionStatus::Failed);
                            return PollOutcome::Failed {
                                reason: "the session expired at the gateway".to_string(),
                            };
                        }
                        ReportedState::InProgress => {
                            if session.status == SessionStatus::AwaitingAction {
                                session.status = SessionStatus::Processing;
                                status_tx.send_replace(SessionStatus::Processing);
                            }
                        }
                        // unchanged or unrecognized, keep polling
                        ReportedState::Created
                        | ReportedState::AwaitingPayer
                        | ReportedState::Unknown => {}
                    }
                }
                Err(GatewayError::Transport(e)) => {
                    consecutive_transport_errors += 1;
                    tracing::warn!(
                        session_id = %session.session_id,
                        attempt = consecutive_transport_errors,
                        error = %e,
                        "Status query transport failure"
                    );
                    if consecutive_transport_errors >= cfg.transport_retry_limit {
                        tracing::warn!(
                            session_id = %session.session_id,
                            "Polling stalled, waiting for the collection ceiling"
                        );
                    }
                }
                Err(GatewayError::Rejected(e)) => {
                    // A refused status query is indistinguishable from a
                    // stall from the flow's point of view.
                    consecutive_transport_errors += 1;
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "Status query refused by the gateway"
                    );
                }
            }
        }

        sleep(cfg.interval).await;
    }
}
