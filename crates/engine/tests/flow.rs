use engine::{
    settlement, ChargeRequest, CollectionOutcome, FlowConfig, FlowError, PaymentFlow,
    SessionArtifact,
};
use gateway::mock::MockBackoffice;
use gateway::{ReportedState, SettlementBackend, WalletGateway};
use std::sync::Arc;
use tokio::time::Duration;
use walletdesk_core::{Invoice, InvoiceState, PaymentSession, Provider, SessionStatus};

fn quiet_audit() {
    engine::set_audit_path(std::env::temp_dir().join("walletdesk_flow_tests_audit.jsonl"));
}

fn seeded_backoffice(total: i64, settled: i64) -> Arc<MockBackoffice> {
    quiet_audit();
    let backoffice = MockBackoffice::new();
    backoffice.seed_invoice(Invoice {
        id: "INV-1".into(),
        total_amount: total,
        amount_settled: settled,
        line_items: Vec::new(),
    });
    backoffice
}

fn flow_with(backoffice: &Arc<MockBackoffice>, cfg: FlowConfig) -> Arc<PaymentFlow> {
    let gateway: Arc<dyn WalletGateway> = backoffice.clone();
    let backend: Arc<dyn SettlementBackend> = backoffice.clone();
    PaymentFlow::new(gateway, backend, cfg)
}

fn fast_cfg() -> FlowConfig {
    FlowConfig {
        poll_interval: Duration::from_millis(10),
        ceiling: Duration::from_secs(5),
        transport_retry_limit: 3,
    }
}

fn gopay_charge(amount: i64) -> ChargeRequest {
    ChargeRequest {
        invoice_ref: "INV-1".into(),
        amount,
        provider: Provider::Gopay,
        payer_phone: None,
    }
}

#[tokio::test(start_paused = true)]
async fn completed_payment_settles_the_invoice() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[
        ReportedState::AwaitingPayer,
        ReportedState::InProgress,
        ReportedState::Succeeded,
    ]);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    let receipt = match outcome {
        CollectionOutcome::Settled { receipt } => receipt,
        other => panic!("expected settlement, got {other:?}"),
    };

    assert_eq!(receipt.new_amount_remaining, 0);
    let invoice = backoffice.invoice("INV-1").unwrap();
    assert_eq!(invoice.state(), InvoiceState::Paid);
    assert_eq!(backoffice.ledger_entries_for("INV-1").len(), 1);
    assert_eq!(*flow.status_feed().borrow(), SessionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn duplicate_completed_delivery_creates_one_ledger_entry() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::Succeeded]);
    let flow = flow_with(&backoffice, fast_cfg());

    flow.collect(&gopay_charge(10_000)).await.unwrap();
    let entry = backoffice.ledger_entries_for("INV-1").pop().unwrap();

    // the gateway redelivers the COMPLETED event for the same session
    let session = PaymentSession {
        session_id: entry.session_id.clone(),
        provider: Provider::Gopay,
        invoice_ref: "INV-1".into(),
        amount: 10_000,
        created_at: entry.timestamp,
        status: SessionStatus::Completed,
    };
    let completion = engine::Completion {
        provider_reference: entry.provider_reference.clone(),
        raw_payload: serde_json::Value::Null,
    };
    let replayed =
        settlement::record_completed(backoffice.as_ref(), &session, &completion, None)
            .await
            .unwrap();

    assert_eq!(replayed.receipt_number, entry.receipt_number);
    assert_eq!(backoffice.ledger_entries_for("INV-1").len(), 1);
    assert_eq!(backoffice.invoice("INV-1").unwrap().amount_settled, 10_000);
}

#[tokio::test(start_paused = true)]
async fn partial_settlements_accumulate() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::Succeeded]);
    let flow = flow_with(&backoffice, fast_cfg());

    flow.collect(&gopay_charge(4_000)).await.unwrap();
    let invoice = backoffice.invoice("INV-1").unwrap();
    assert_eq!(invoice.amount_remaining(), 6_000);
    assert_eq!(invoice.state(), InvoiceState::Partial);

    flow.collect(&gopay_charge(6_000)).await.unwrap();
    let invoice = backoffice.invoice("INV-1").unwrap();
    assert_eq!(invoice.amount_remaining(), 0);
    assert_eq!(invoice.state(), InvoiceState::Paid);
    assert_eq!(backoffice.ledger_entries_for("INV-1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn ceiling_forces_timeout_and_stops_querying() {
    let backoffice = seeded_backoffice(10_000, 0);
    // never reaches a terminal state
    backoffice.set_status_script(&[ReportedState::AwaitingPayer]);
    let flow = flow_with(
        &backoffice,
        FlowConfig {
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(120),
            transport_retry_limit: 3,
        },
    );

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    assert!(matches!(outcome, CollectionOutcome::TimedOut));
    assert_eq!(*flow.status_feed().borrow(), SessionStatus::TimedOut);

    // one query per second from t=0 to t=119, none at or after t=120
    let session_id = backoffice.active_session("INV-1", Provider::Gopay).unwrap();
    assert_eq!(backoffice.query_count(&session_id), 120);
    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(backoffice.query_count(&session_id), 120);
}

#[tokio::test(start_paused = true)]
async fn retry_after_timeout_reuses_the_active_session() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::AwaitingPayer]);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    assert!(matches!(outcome, CollectionOutcome::TimedOut));

    // the payer finished just after the client gave up
    let session_id = backoffice.active_session("INV-1", Provider::Gopay).unwrap();
    backoffice.script_session(&session_id, &[ReportedState::Succeeded]);

    let outcome = flow.retry(&gopay_charge(10_000)).await.unwrap();
    assert!(matches!(outcome, CollectionOutcome::Settled { .. }));

    // no second session was opened and the ledger holds exactly one entry
    let entries = backoffice.ledger_entries_for("INV-1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].session_id, session_id);
}

#[tokio::test(start_paused = true)]
async fn gateway_failure_is_terminal() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::AwaitingPayer, ReportedState::Failed]);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    match outcome {
        CollectionOutcome::Failed { reason } => assert!(reason.contains("failed")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(backoffice.invoice("INV-1").unwrap().amount_settled, 0);
}

#[tokio::test(start_paused = true)]
async fn expired_session_surfaces_as_failed() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::Expired]);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    match outcome {
        CollectionOutcome::Failed { reason } => assert!(reason.contains("expired")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn transient_transport_errors_are_absorbed() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::Succeeded]);
    backoffice.fail_next_queries(2);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    assert!(matches!(outcome, CollectionOutcome::Settled { .. }));
}

#[tokio::test(start_paused = true)]
async fn stalled_polling_waits_out_the_ceiling() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::AwaitingPayer]);
    backoffice.fail_next_queries(100);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow.collect(&gopay_charge(10_000)).await.unwrap();
    assert!(matches!(outcome, CollectionOutcome::TimedOut));
    // querying stopped after the retry limit, not at the ceiling
    assert_eq!(backoffice.remaining_query_failures(), 97);
}

#[tokio::test(start_paused = true)]
async fn rejected_settlement_leaves_the_invoice_unchanged() {
    let backoffice = seeded_backoffice(10_000, 5_000);
    backoffice.set_status_script(&[ReportedState::Succeeded]);
    let flow = flow_with(&backoffice, fast_cfg());

    // payer completed a 7000 charge while only 5000 remains
    let err = flow.collect(&gopay_charge(7_000)).await.unwrap_err();
    match err {
        FlowError::SettlementRejected(reason) => assert!(reason.contains("exceeds")),
        other => panic!("expected rejection, got {other:?}"),
    }

    let invoice = backoffice.invoice("INV-1").unwrap();
    assert_eq!(invoice.amount_settled, 5_000);
    assert_eq!(invoice.amount_remaining(), 5_000);
    // the poller's COMPLETED report is not retracted; reconciliation is manual
    assert_eq!(*flow.status_feed().borrow(), SessionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_polling() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::AwaitingPayer]);
    let flow = flow_with(
        &backoffice,
        FlowConfig {
            poll_interval: Duration::from_secs(1),
            ceiling: Duration::from_secs(120),
            transport_retry_limit: 3,
        },
    );

    let task = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.collect(&gopay_charge(10_000)).await })
    };

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    flow.cancel();

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, CollectionOutcome::Canceled));
    assert_eq!(backoffice.ledger_entries_for("INV-1").len(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_invoice_fails_session_creation() {
    quiet_audit();
    let backoffice = MockBackoffice::new();
    let flow = flow_with(&backoffice, fast_cfg());

    let err = flow.collect(&gopay_charge(10_000)).await.unwrap_err();
    assert!(matches!(err, FlowError::SessionCreationFailed(_)));
}

#[tokio::test(start_paused = true)]
async fn ovo_without_phone_is_rejected_before_the_gateway() {
    let backoffice = seeded_backoffice(10_000, 0);
    let flow = flow_with(&backoffice, fast_cfg());

    let err = flow
        .collect(&ChargeRequest {
            invoice_ref: "INV-1".into(),
            amount: 10_000,
            provider: Provider::Ovo,
            payer_phone: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::SessionCreationFailed(_)));
    assert!(backoffice.active_session("INV-1", Provider::Ovo).is_none());
}

#[tokio::test(start_paused = true)]
async fn ovo_artifact_carries_the_normalized_push_target() {
    let backoffice = seeded_backoffice(10_000, 0);
    backoffice.set_status_script(&[ReportedState::Succeeded]);
    let flow = flow_with(&backoffice, fast_cfg());

    let outcome = flow
        .collect(&ChargeRequest {
            invoice_ref: "INV-1".into(),
            amount: 10_000,
            provider: Provider::Ovo,
            payer_phone: Some("0812-3456-7890".into()),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, CollectionOutcome::Settled { .. }));

    match flow.artifact_feed().borrow().clone() {
        Some(SessionArtifact::Ovo { push_sent_to }) => {
            assert_eq!(push_sent_to, "6281234567890");
        }
        other => panic!("expected an OVO artifact, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cash_settlement_goes_through_the_same_ledger() {
    let backoffice = seeded_backoffice(10_000, 0);
    let flow = flow_with(&backoffice, fast_cfg());

    let receipt = flow.settle_cash("INV-1", 10_000).await.unwrap();
    assert_eq!(receipt.new_amount_remaining, 0);

    let entries = backoffice.ledger_entries_for("INV-1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].method, walletdesk_core::PaymentMethod::Cash);
    assert!(entries[0].session_id.starts_with("cash-"));
}
