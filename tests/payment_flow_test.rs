mod common;

use common::{EMAIL, drain, flow, plan, valid_token};
use mentorpay::application::checkout::{FlowEvent, FlowOutcome, PaymentFlow};
use mentorpay::application::poller::PollSchedule;
use mentorpay::application::wizard::{FormField, PaymentForm, WizardStep};
use mentorpay::domain::payment::{PaymentMethod, PaymentStatus};
use mentorpay::error::PlatformError;
use mentorpay::infrastructure::in_memory::{BackendCall, InMemoryBackend};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

async fn ready_for_mpesa(flow: &PaymentFlow, phone: &str) {
    flow.open(plan(7, "online", "KES 5000")).await;
    flow.set_field(FormField::PaymentMethod, "Mpesa").await;
    flow.next_step().await.unwrap();
    flow.set_field(FormField::PayerIdentifier, phone).await;
}

#[tokio::test(start_paused = true)]
async fn test_mpesa_checkout_polls_then_activates() {
    let backend = InMemoryBackend::new();
    backend.queue_payment_id("abc").await;
    backend
        .script_statuses([
            PaymentStatus::Pending,
            PaymentStatus::Pending,
            PaymentStatus::Completed,
        ])
        .await;
    let (flow, mut events) = flow(&backend).await;
    ready_for_mpesa(&flow, "+254712345678").await;

    let started = Instant::now();
    let session = flow.initiate().await.unwrap();
    assert_eq!(session.payment_id, "abc");
    assert!(flow.is_polling());

    tokio::time::sleep(Duration::from_secs(60)).await;

    let calls = backend.timed_calls().await;
    assert_eq!(
        calls[0].1,
        BackendCall::Initiate {
            method: PaymentMethod::Mpesa,
            body: json!({
                "phoneNumber": "+254712345678",
                "amount": 5000,
                "planId": 7,
                "email": EMAIL
            }),
        }
    );

    let reads: Vec<Duration> = calls
        .iter()
        .filter(|(_, call)| matches!(call, BackendCall::Status { payment_id } if payment_id == "abc"))
        .map(|(at, _)| at.duration_since(started))
        .collect();
    assert_eq!(
        reads,
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(15)
        ]
    );

    let activations: Vec<&BackendCall> = calls
        .iter()
        .map(|(_, call)| call)
        .filter(|call| matches!(call, BackendCall::Activate { .. }))
        .collect();
    assert_eq!(
        activations,
        vec![&BackendCall::Activate {
            plan_id: 7,
            bearer: valid_token(),
        }]
    );

    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.outcome, Some(FlowOutcome::Activated));
    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::Completed);
    assert!(snapshot.alert.is_none());
    assert!(!flow.is_polling());

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(FlowEvent::Initiated { payment_id, .. }) if payment_id == "abc"));
    assert_eq!(
        events.last(),
        Some(&FlowEvent::Activated {
            payment_id: "abc".to_string(),
            plan_id: 7,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_payment_stops_polling_without_activation() {
    let backend = InMemoryBackend::new();
    backend
        .script_statuses([PaymentStatus::Pending, PaymentStatus::Failed])
        .await;
    let (flow, mut events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(backend.status_reads().await, 2);
    assert_eq!(backend.activations().await, 0);
    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.outcome, Some(FlowOutcome::PaymentFailed));
    assert!(snapshot.alert.is_some());
    assert!(matches!(
        drain(&mut events).last(),
        Some(FlowEvent::PaymentFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_canceled_payment_stops_polling_without_activation() {
    let backend = InMemoryBackend::new();
    backend.script_statuses([PaymentStatus::Canceled]).await;
    let (flow, _events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(backend.status_reads().await, 1);
    assert_eq!(backend.activations().await, 0);
    assert_eq!(
        flow.snapshot().await.outcome,
        Some(FlowOutcome::PaymentCanceled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_activation_failure_is_reported_separately() {
    let backend = InMemoryBackend::new();
    backend.script_statuses([PaymentStatus::Completed]).await;
    backend.fail_activation(Some("subscription service down")).await;
    let (flow, mut events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::Completed);
    assert!(matches!(snapshot.outcome, Some(FlowOutcome::ActivationFailed(_))));
    assert!(
        snapshot
            .alert
            .unwrap()
            .contains("Payment succeeded but subscription activation failed")
    );
    assert_eq!(backend.activations().await, 1);
    assert_eq!(backend.status_reads().await, 1);
    assert!(matches!(
        drain(&mut events).last(),
        Some(FlowEvent::ActivationFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_status_read_errors_keep_polling() {
    let backend = InMemoryBackend::new();
    backend.fail_status_reads(2).await;
    backend.script_statuses([PaymentStatus::Completed]).await;
    let (flow, mut events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(backend.status_reads().await, 3);
    assert_eq!(flow.snapshot().await.outcome, Some(FlowOutcome::Activated));
    let failures = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, FlowEvent::StatusCheckFailed { .. }))
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_phone_never_reaches_provider() {
    let backend = InMemoryBackend::new();
    let (flow, _events) = flow(&backend).await;
    ready_for_mpesa(&flow, "12345").await;

    let result = flow.initiate().await;
    assert!(matches!(result, Err(PlatformError::Validation(_))));
    assert_eq!(backend.initiations().await, 0);

    let snapshot = flow.snapshot().await;
    assert!(snapshot.errors.contains("phoneNumber"));
    assert!(snapshot.payment.is_none());
    assert!(!snapshot.in_flight);
    assert!(!flow.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_empty_payment_method_keeps_first_step() {
    let backend = InMemoryBackend::new();
    let (flow, _events) = flow(&backend).await;
    flow.open(plan(1, "online", "KES 100")).await;

    assert!(flow.next_step().await.is_err());
    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.step, WizardStep::Details);
    assert!(snapshot.errors.contains("paymentMethod"));
}

#[tokio::test(start_paused = true)]
async fn test_second_click_while_pending_is_rejected() {
    let backend = InMemoryBackend::new();
    let (flow, _events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    assert!(!flow.snapshot().await.can_initiate());
    assert!(matches!(flow.initiate().await, Err(PlatformError::Busy)));
    assert_eq!(backend.initiations().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_clicks_issue_one_initiation() {
    let backend = InMemoryBackend::new();
    backend.delay_initiation(Some(Duration::from_secs(2))).await;
    let (flow, _events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;

    let (first, second) = tokio::join!(flow.initiate(), flow.initiate());
    assert!(first.is_ok());
    assert!(matches!(second, Err(PlatformError::Busy)));
    assert_eq!(backend.initiations().await, 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(backend.status_reads().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_provider_failure_allows_retry_on_same_step() {
    let backend = InMemoryBackend::new();
    backend.fail_initiation(Some("Insufficient balance")).await;
    let (flow, mut events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;

    assert!(matches!(flow.initiate().await, Err(PlatformError::Provider(_))));
    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.step, WizardStep::Payment);
    assert!(snapshot.alert.as_deref().unwrap().contains("Insufficient balance"));
    assert!(snapshot.can_initiate());
    assert!(!flow.is_polling());
    assert_eq!(
        drain(&mut events),
        vec![FlowEvent::InitiationFailed {
            reason: "Payment provider error: Insufficient balance".to_string(),
        }]
    );

    backend.fail_initiation(None).await;
    flow.initiate().await.unwrap();
    assert!(flow.snapshot().await.alert.is_none());
    assert!(flow.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_close_resets_state_and_cancels_timer() {
    let backend = InMemoryBackend::new();
    let (flow, mut events) = flow(&backend).await;
    flow.open(plan(3, "physical", "KES 900")).await;
    flow.set_field(FormField::PaymentMethod, "Mpesa").await;
    flow.set_field(FormField::Location, "Nakuru").await;
    flow.next_step().await.unwrap();
    flow.set_field(FormField::PayerIdentifier, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(backend.status_reads().await, 1);

    flow.close().await;
    assert!(!flow.is_polling());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.status_reads().await, 1);

    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.step, WizardStep::Details);
    assert_eq!(snapshot.form, PaymentForm::default());
    assert!(snapshot.errors.is_empty());
    assert!(snapshot.payment.is_none());
    assert!(snapshot.outcome.is_none());
    assert_eq!(drain(&mut events).last(), Some(&FlowEvent::Closed));

    flow.open(plan(4, "online", "KES 100")).await;
    let reopened = flow.snapshot().await;
    assert_eq!(reopened.step, WizardStep::Details);
    assert_eq!(reopened.form, PaymentForm::default());
    assert!(reopened.can_initiate());
}

#[tokio::test(start_paused = true)]
async fn test_close_during_initiation_discards_late_result() {
    let backend = InMemoryBackend::new();
    backend.delay_initiation(Some(Duration::from_secs(3))).await;
    let (flow, _events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;

    let (result, ()) = tokio::join!(flow.initiate(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        flow.close().await;
    });
    assert!(matches!(result, Err(PlatformError::Stale)));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.status_reads().await, 0);
    let snapshot = flow.snapshot().await;
    assert!(snapshot.payment.is_none());
    assert!(!snapshot.in_flight);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_activating_still_activates() {
    let backend = InMemoryBackend::new();
    backend.script_statuses([PaymentStatus::Completed]).await;
    backend.delay_activation(Some(Duration::from_secs(2))).await;
    let (flow, mut events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_millis(5500)).await;
    assert_eq!(backend.status_reads().await, 1);
    assert_eq!(backend.activations().await, 0);

    flow.close().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(backend.activations().await, 1);
    assert_eq!(backend.status_reads().await, 1);
    let snapshot = flow.snapshot().await;
    assert!(snapshot.outcome.is_none());
    assert!(snapshot.payment.is_none());
    assert_eq!(drain(&mut events).last(), Some(&FlowEvent::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_flow_stops_polling() {
    let backend = InMemoryBackend::new();
    let (flow, _events) = flow(&backend).await;
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(backend.status_reads().await, 2);

    drop(flow);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.status_reads().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_gives_up_on_stuck_payment() {
    let backend = InMemoryBackend::new();
    let shared = Arc::new(backend.clone());
    let (flow, _events) = PaymentFlow::new(
        shared.clone(),
        shared,
        common::signed_in_session().await,
        PollSchedule {
            interval: Duration::from_secs(5),
            max_wait: Some(Duration::from_secs(12)),
        },
    );
    ready_for_mpesa(&flow, "0712345678").await;
    flow.initiate().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(backend.status_reads().await, 2);
    let snapshot = flow.snapshot().await;
    assert_eq!(snapshot.outcome, Some(FlowOutcome::TimedOut));
    assert_eq!(snapshot.payment.unwrap().status, PaymentStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_binance_checkout_exposes_payment_links() {
    let backend = InMemoryBackend::new();
    backend.queue_payment_id("bn-1").await;
    let (flow, mut events) = flow(&backend).await;
    flow.open(plan(2, "online", "USD 25")).await;
    flow.set_field(FormField::PaymentMethod, "Binance").await;
    flow.next_step().await.unwrap();
    flow.set_field(FormField::PayerIdentifier, "binance-user").await;
    flow.initiate().await.unwrap();

    match drain(&mut events).first() {
        Some(FlowEvent::Initiated {
            method,
            qr_code_url,
            checkout_url,
            ..
        }) => {
            assert_eq!(*method, PaymentMethod::Binance);
            assert!(qr_code_url.as_deref().unwrap().contains("bn-1"));
            assert!(checkout_url.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}
