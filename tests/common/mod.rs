#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mentorpay::application::checkout::{FlowEvent, PaymentFlow};
use mentorpay::application::poller::PollSchedule;
use mentorpay::application::session::SessionContext;
use mentorpay::domain::plan::{Plan, Price};
use mentorpay::domain::session::CachedUser;
use mentorpay::infrastructure::credentials::InMemoryCredentialStore;
use mentorpay::infrastructure::in_memory::InMemoryBackend;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const EMAIL: &str = "learner@example.com";

/// Unsigned JWT carrying the given claims.
pub fn token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

pub fn valid_token() -> String {
    token(serde_json::json!({"id": 42, "exp": 4_000_000_000i64}))
}

pub fn plan(id: u64, plan_type: &str, price: &str) -> Plan {
    Plan {
        id,
        plan_type: plan_type.to_string(),
        price: Price::Label(price.to_string()),
        duration: "1 month".to_string(),
        currency: "KES".to_string(),
        is_active: true,
        benefits: vec![],
    }
}

pub async fn signed_in_session() -> Arc<SessionContext> {
    let session = SessionContext::load(Box::new(InMemoryCredentialStore::new()))
        .await
        .unwrap();
    session
        .login(
            &valid_token(),
            Some(CachedUser {
                id: 42,
                email: EMAIL.to_string(),
                username: None,
            }),
        )
        .await
        .unwrap();
    Arc::new(session)
}

pub async fn flow(
    backend: &InMemoryBackend,
) -> (PaymentFlow, mpsc::UnboundedReceiver<FlowEvent>) {
    let backend = Arc::new(backend.clone());
    PaymentFlow::new(
        backend.clone(),
        backend,
        signed_in_session().await,
        PollSchedule::default(),
    )
}

pub fn drain(events: &mut mpsc::UnboundedReceiver<FlowEvent>) -> Vec<FlowEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
