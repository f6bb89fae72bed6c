use anyhow::{bail, Context, Result};
use engine::{
    ChargeRequest, CollectionOutcome, FlowConfig, FlowError, PaymentFlow, SessionArtifact,
};
use gateway::http::{BackofficeAuth, HttpBackofficeClient};
use gateway::mock::MockBackoffice;
use gateway::{ReportedState, SettlementBackend, WalletGateway};
use std::sync::Arc;
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walletdesk_core::{Invoice, Provider};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

struct Backoffice {
    gateway: Arc<dyn WalletGateway>,
    backend: Arc<dyn SettlementBackend>,
}

fn create_backoffice(
    cfg: &config::AppConfig,
    invoice_ref: &str,
    amount: i64,
) -> Result<Backoffice> {
    match cfg.backoffice.kind.as_str() {
        "http" => {
            let base_url = cfg
                .backoffice
                .base_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Backoffice base_url not configured"))?;

            // Try API key first from env or keychain
            if let Ok(api_key) = std::env::var("WALLETDESK_API_KEY")
                .or_else(|_| config::get_secret("backoffice_api_key"))
            {
                tracing::info!("Using backoffice with API key auth");
                let auth = BackofficeAuth::ApiKey { key: api_key };
                let client = HttpBackofficeClient::new(base_url, auth);
                return Ok(Backoffice {
                    gateway: client.clone(),
                    backend: client,
                });
            }

            // Fall back to OAuth2
            let client_id = cfg
                .backoffice
                .client_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("Backoffice client_id not configured"))?;

            let client_secret = std::env::var("WALLETDESK_CLIENT_SECRET")
                .or_else(|_| config::get_secret("backoffice_client_secret"))
                .map_err(|_| {
                    anyhow::anyhow!("Backoffice client_secret not found in env or keychain")
                })?;

            let token_url = cfg
                .backoffice
                .token_url
                .clone()
                .unwrap_or_else(|| format!("{}/oauth/token", base_url));

            tracing::info!("Using backoffice with OAuth2 auth");
            let auth = BackofficeAuth::OAuth2 {
                client_id,
                client_secret,
                token_url,
            };
            let client = HttpBackofficeClient::new(base_url, auth);
            Ok(Backoffice {
                gateway: client.clone(),
                backend: client,
            })
        }
        _ => {
            tracing::info!("Using mock backoffice with a demo invoice");
            let mock = MockBackoffice::new();
            mock.seed_invoice(Invoice {
                id: invoice_ref.to_string(),
                total_amount: amount,
                amount_settled: 0,
                line_items: Vec::new(),
            });
            mock.set_status_script(&[
                ReportedState::AwaitingPayer,
                ReportedState::AwaitingPayer,
                ReportedState::InProgress,
                ReportedState::Succeeded,
            ]);
            Ok(Backoffice {
                gateway: mock.clone(),
                backend: mock,
            })
        }
    }
}

fn print_artifact(artifact: &SessionArtifact) {
    match artifact {
        SessionArtifact::Gopay {
            qr_data,
            deeplink,
            web_fallback,
        } => {
            println!("Scan to pay: {qr_data}");
            if let Some(link) = deeplink {
                println!("Open in app: {link}");
            }
            if let Some(link) = web_fallback {
                println!("Or pay at:   {link}");
            }
        }
        SessionArtifact::Ovo { push_sent_to } => {
            println!("Charge pushed to OVO account {push_sent_to}, ask the payer to confirm");
        }
    }
}

fn usage() -> ! {
    eprintln!("usage: walletdesk <invoice_ref> <amount> <gopay|ovo|cash> [payer_phone]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        usage();
    }
    let invoice_ref = args[0].clone();
    let amount: i64 = args[1].parse().context("amount must be an integer")?;
    let method = args[2].as_str();
    let payer_phone = args.get(3).cloned();

    let cfg = config::load().unwrap_or_default();
    let backoffice = create_backoffice(&cfg, &invoice_ref, amount)?;

    let flow = PaymentFlow::new(
        backoffice.gateway,
        backoffice.backend,
        FlowConfig {
            poll_interval: Duration::from_secs(cfg.flow.poll_interval_secs),
            ceiling: Duration::from_secs(cfg.flow.ceiling_secs),
            transport_retry_limit: cfg.flow.transport_retry_limit,
        },
    );

    if method == "cash" {
        let receipt = flow
            .settle_cash(&invoice_ref, amount)
            .await
            .context("cash settlement failed")?;
        println!(
            "Cash payment recorded, receipt {} ({} remaining)",
            receipt.receipt_number, receipt.new_amount_remaining
        );
        return Ok(());
    }

    let provider = match method {
        "gopay" => Provider::Gopay,
        "ovo" => Provider::Ovo,
        _ => usage(),
    };

    // show the payment artifact as soon as the session is open
    let mut artifacts = flow.artifact_feed();
    tokio::spawn(async move {
        while artifacts.changed().await.is_ok() {
            let artifact = artifacts.borrow_and_update().clone();
            if let Some(artifact) = artifact {
                print_artifact(&artifact);
            }
        }
    });
    let mut statuses = flow.status_feed();
    tokio::spawn(async move {
        while statuses.changed().await.is_ok() {
            let status = *statuses.borrow_and_update();
            tracing::info!(status = status.as_str(), "collection status");
        }
    });

    let request = ChargeRequest {
        invoice_ref,
        amount,
        provider,
        payer_phone,
    };

    match flow.collect(&request).await {
        Ok(CollectionOutcome::Settled { receipt }) => {
            println!(
                "Payment settled, receipt {} ({} remaining)",
                receipt.receipt_number, receipt.new_amount_remaining
            );
            Ok(())
        }
        Ok(CollectionOutcome::Failed { reason }) => {
            println!("Payment failed: {reason}. Start a new collection to try again.");
            Ok(())
        }
        Ok(CollectionOutcome::TimedOut) => {
            println!("The payer did not complete in time. Retrying continues the same session.");
            Ok(())
        }
        Ok(CollectionOutcome::Canceled) => {
            println!("Collection canceled.");
            Ok(())
        }
        Err(FlowError::SettlementRejected(reason)) => {
            // The gateway says paid, the ledger says no. Never replayed.
            println!(
                "Payment completed at the gateway but the ledger rejected it: {reason}. \
                 Do not retry; reconcile this payment manually."
            );
            bail!("settlement rejected: {reason}");
        }
        Err(e) => Err(e.into()),
    }
}
