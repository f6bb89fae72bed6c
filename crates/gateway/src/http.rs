use super::{
    CreateSessionRequest, CreateSessionResponse, GatewayError, ReportedState, SettlementBackend,
    SettlementError, SettlementReceipt, SettlementRequest, StatusReport, WalletGateway,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// HTTP client for the back-office function-call backend, which fronts both
/// the wallet gateway operations and the settlement ledger.
#[derive(Clone)]
pub struct HttpBackofficeClient {
    pub base_url: String,
    pub auth: BackofficeAuth,
    http_client: reqwest::Client,
    access_token: Arc<RwLock<Option<String>>>,
}

#[derive(Clone)]
pub enum BackofficeAuth {
    ApiKey {
        key: String,
    },
    OAuth2 {
        client_id: String,
        client_secret: String,
        token_url: String,
    },
}

#[derive(Debug, Serialize)]
struct CreateSessionWire<'a> {
    provider: &'a str,
    invoice_ref: &'a str,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer_phone: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SessionCreatedWire {
    session_id: String,
    qr_data: Option<String>,
    deep_link_primary: Option<String>,
    deep_link_fallback: Option<String>,
    #[serde(default)]
    reused: bool,
}

#[derive(Debug, Deserialize)]
struct StatusWire {
    session_id: String,
    status: String,
    provider_reference: Option<String>,
    #[serde(default)]
    raw_payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SettlementWire {
    success: bool,
    receipt_number: Option<String>,
    new_amount_remaining: Option<i64>,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct OAuth2TokenRequest {
    grant_type: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct OAuth2TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

impl HttpBackofficeClient {
    pub fn new(base_url: String, auth: BackofficeAuth) -> Arc<Self> {
        Arc::new(Self {
            base_url,
            auth,
            http_client: reqwest::Client::new(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    async fn get_auth_header(&self) -> Result<String, GatewayError> {
        match &self.auth {
            BackofficeAuth::ApiKey { key } => Ok(format!("Bearer {}", key)),
            BackofficeAuth::OAuth2 {
                client_id,
                client_secret,
                token_url,
            } => {
                {
                    let token_read = self.access_token.read().await;
                    if let Some(t) = token_read.as_ref() {
                        return Ok(format!("Bearer {}", t));
                    }
                }

                let req_body = OAuth2TokenRequest {
                    grant_type: "client_credentials".to_string(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                };

                let resp = self
                    .http_client
                    .post(token_url)
                    .json(&req_body)
                    .send()
                    .await
                    .map_err(|e| GatewayError::Transport(format!("token request: {e}")))?;

                if !resp.status().is_success() {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(GatewayError::Transport(format!(
                        "OAuth2 token request failed: {status} - {body}"
                    )));
                }

                let token_resp: OAuth2TokenResponse = resp
                    .json()
                    .await
                    .map_err(|e| GatewayError::Transport(format!("token response: {e}")))?;

                {
                    let mut token_write = self.access_token.write().await;
                    *token_write = Some(token_resp.access_token.clone());
                }

                Ok(format!("Bearer {}", token_resp.access_token))
            }
        }
    }

    fn map_state(status: &str) -> ReportedState {
        match status.to_lowercase().as_str() {
            "created" | "pending" => ReportedState::Created,
            "awaiting_payer" | "awaiting_action" | "presented" => ReportedState::AwaitingPayer,
            "in_progress" | "processing" | "authorizing" => ReportedState::InProgress,
            "succeeded" | "settled" | "paid" => ReportedState::Succeeded,
            "failed" | "denied" | "canceled" => ReportedState::Failed,
            "expired" => ReportedState::Expired,
            _ => ReportedState::Unknown,
        }
    }
}

#[async_trait]
impl WalletGateway for HttpBackofficeClient {
    async fn create_session(
        &self,
        req: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, GatewayError> {
        let auth_header = self.get_auth_header().await?;
        let url = format!("{}/api/v1/wallet/sessions", self.base_url);

        let payload = CreateSessionWire {
            provider: req.provider.as_str(),
            invoice_ref: &req.invoice_ref,
            amount: req.amount,
            payer_phone: req.payer_phone.as_deref(),
        };

        let resp = self
            .http_client
            .post(&url)
            .header("Authorization", auth_header)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("create session: {e}")))?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status} - {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Transport(format!("{status} - {body}")));
        }

        let wire: SessionCreatedWire = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("create session response: {e}")))?;

        tracing::info!(
            session_id = %wire.session_id,
            provider = %req.provider,
            invoice_ref = %req.invoice_ref,
            reused = wire.reused,
            "Collection session acquired"
        );

        Ok(CreateSessionResponse {
            session_id: wire.session_id,
            qr_data: wire.qr_data,
            deep_link_primary: wire.deep_link_primary,
            deep_link_fallback: wire.deep_link_fallback,
            reused: wire.reused,
        })
    }

    async fn query_status(&self, session_id: &str) -> Result<StatusReport, GatewayError> {
        let auth_header = self.get_auth_header().await?;
        let url = format!(
            "{}/api/v1/wallet/sessions/{}/status",
            self.base_url, session_id
        );

        let resp = self
            .http_client
            .get(&url)
            .header("Authorization", auth_header)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("status query: {e}")))?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status} - {body}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Transport(format!("{status} - {body}")));
        }

        let wire: StatusWire = resp
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("status response: {e}")))?;

        tracing::debug!(
            session_id = %wire.session_id,
            status = %wire.status,
            "Polled session status"
        );

        Ok(StatusReport {
            session_id: wire.session_id,
            state: Self::map_state(&wire.status),
            provider_reference: wire.provider_reference,
            raw_payload: wire.raw_payload,
        })
    }
}

#[async_trait]
impl SettlementBackend for HttpBackofficeClient {
    async fn record_settlement(
        &self,
        req: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        let auth_header = self
            .get_auth_header()
            .await
            .map_err(|e| SettlementError::Transport(e.to_string()))?;
        let url = format!("{}/api/v1/ledger/settlements", self.base_url);

        let resp = self
            .http_client
            .post(&url)
            .header("Authorization", auth_header)
            .header("Content-Type", "application/json")
            .json(req)
            .send()
            .await
            .map_err(|e| SettlementError::Transport(format!("record settlement: {e}")))?;

        let status = resp.status();
        if !status.is_success() && !status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SettlementError::Transport(format!("{status} - {body}")));
        }

        let wire: SettlementWire = resp
            .json()
            .await
            .map_err(|e| SettlementError::Transport(format!("settlement response: {e}")))?;

        if !wire.success {
            let reason = wire
                .reason
                .unwrap_or_else(|| "settlement refused without a reason".to_string());
            return Err(SettlementError::Rejected(reason));
        }

        let receipt_number = wire.receipt_number.ok_or_else(|| {
            SettlementError::Transport("settlement response missing receipt_number".to_string())
        })?;
        let new_amount_remaining = wire.new_amount_remaining.ok_or_else(|| {
            SettlementError::Transport(
                "settlement response missing new_amount_remaining".to_string(),
            )
        })?;

        tracing::info!(
            session_id = %req.session_id,
            receipt_number = %receipt_number,
            "Settlement recorded"
        );

        Ok(SettlementReceipt {
            receipt_number,
            new_amount_remaining,
        })
    }
}
