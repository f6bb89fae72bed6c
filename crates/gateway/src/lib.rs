use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use walletdesk_core::{PaymentMethod, Provider};

/// Errors from the wallet gateway operations.
///
/// `Transport` covers network and server-side failures and is considered
/// transient; `Rejected` means the gateway understood and refused the request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("settlement backend unreachable: {0}")]
    Transport(String),
    #[error("settlement rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub provider: Provider,
    pub invoice_ref: String,
    pub amount: i64,
    pub payer_phone: Option<String>,
}

/// Gateway answer to a create-session call.
///
/// `reused: true` means an active session already existed for this
/// invoice+provider pair; its id is returned and no new presentation
/// artifact accompanies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub qr_data: Option<String>,
    pub deep_link_primary: Option<String>,
    pub deep_link_fallback: Option<String>,
    pub reused: bool,
}

/// Session status as the gateway reports it, before the engine maps it onto
/// the local session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Created,
    AwaitingPayer,
    InProgress,
    Succeeded,
    Failed,
    Expired,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub session_id: String,
    pub state: ReportedState,
    pub provider_reference: Option<String>,
    pub raw_payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub invoice_ref: String,
    pub session_id: String,
    pub amount: i64,
    pub provider_reference: String,
    pub method: PaymentMethod,
    pub payer_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub receipt_number: String,
    pub new_amount_remaining: i64,
}

#[async_trait]
pub trait WalletGateway: Send + Sync {
    async fn create_session(
        &self,
        req: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, GatewayError>;
    async fn query_status(&self, session_id: &str) -> Result<StatusReport, GatewayError>;
}

/// The settlement side of the function-call backend. `record_settlement` is
/// atomic and idempotent on `session_id`; those guarantees live behind this
/// trait, not in the caller.
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    async fn record_settlement(
        &self,
        req: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError>;
}

pub mod http;
pub mod mock;
