use crate::domain::learning::{
    Assignment, AssignmentQuery, AssignmentSubmission, LiveSession, UploadedFile, User,
    UserSubscription,
};
use crate::domain::payment::{PaymentMethod, PaymentRequest, PaymentSession, PaymentStatus};
use crate::domain::plan::{Plan, Price};
use crate::domain::ports::{LearningApi, PaymentGateway, SubscriptionApi};
use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// One request received by [`InMemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Initiate { method: PaymentMethod, body: Value },
    Status { payment_id: String },
    Activate { plan_id: u64, bearer: String },
    PublicPlans,
    Learning { endpoint: &'static str, bearer: String },
}

#[derive(Debug, Default)]
struct BackendState {
    plans: Vec<Plan>,
    payment_ids: VecDeque<String>,
    issued: u64,
    statuses: VecDeque<PaymentStatus>,
    last_status: Option<PaymentStatus>,
    failing_status_reads: usize,
    initiation_error: Option<String>,
    initiation_delay: Option<Duration>,
    activation_error: Option<String>,
    activation_delay: Option<Duration>,
    users: HashMap<u64, User>,
    subscriptions: HashMap<u64, Vec<UserSubscription>>,
    live_sessions: HashMap<u64, Vec<LiveSession>>,
    assignments: Vec<Assignment>,
    calls: Vec<(Instant, BackendCall)>,
}

/// Scripted stand-in for the content and payment backend.
///
/// Status reads replay the scripted statuses in order and then keep repeating
/// the last one. Every call is recorded with the (tokio) time it arrived.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    state: Arc<RwLock<BackendState>>,
}

impl InMemoryBackend {
    /// Creates an empty backend: no plans, and payments stay pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with a small catalogue whose payments complete on the second read.
    pub async fn demo() -> Self {
        let backend = Self::new();
        backend
            .set_plans(vec![
                Plan {
                    id: 1,
                    plan_type: "Online".to_string(),
                    price: Price::Label("KES 5000".to_string()),
                    duration: "1 month".to_string(),
                    currency: "KES".to_string(),
                    is_active: true,
                    benefits: vec!["Weekly mentor call".to_string(), "Code reviews".to_string()],
                },
                Plan {
                    id: 2,
                    plan_type: "Physical".to_string(),
                    price: Price::Label("KES 12,000".to_string()),
                    duration: "3 months".to_string(),
                    currency: "KES".to_string(),
                    is_active: true,
                    benefits: vec!["In-person bootcamp".to_string()],
                },
                Plan {
                    id: 3,
                    plan_type: "Online".to_string(),
                    price: Price::Label("KES 2000".to_string()),
                    duration: "1 week".to_string(),
                    currency: "KES".to_string(),
                    is_active: false,
                    benefits: vec![],
                },
            ])
            .await;
        backend
            .script_statuses([PaymentStatus::Pending, PaymentStatus::Completed])
            .await;
        backend
    }

    /// Replaces the plan catalogue.
    pub async fn set_plans(&self, plans: Vec<Plan>) {
        self.state.write().await.plans = plans;
    }

    /// Payment ids handed out by the next initiations, in order.
    pub async fn queue_payment_id(&self, payment_id: impl Into<String>) {
        self.state.write().await.payment_ids.push_back(payment_id.into());
    }

    /// Appends statuses for the next status reads to return, in order.
    pub async fn script_statuses(&self, statuses: impl IntoIterator<Item = PaymentStatus>) {
        self.state.write().await.statuses.extend(statuses);
    }

    /// Makes the next `count` status reads fail with a network-style error.
    pub async fn fail_status_reads(&self, count: usize) {
        self.state.write().await.failing_status_reads = count;
    }

    /// Makes initiations fail with a provider error until reset with `None`.
    pub async fn fail_initiation(&self, message: Option<&str>) {
        self.state.write().await.initiation_error = message.map(str::to_string);
    }

    /// Holds each initiation this long before it answers.
    pub async fn delay_initiation(&self, delay: Option<Duration>) {
        self.state.write().await.initiation_delay = delay;
    }

    /// Holds each activation this long before it is recorded and answered.
    pub async fn delay_activation(&self, delay: Option<Duration>) {
        self.state.write().await.activation_delay = delay;
    }

    /// Makes activations fail with a provider error until reset with `None`.
    pub async fn fail_activation(&self, message: Option<&str>) {
        self.state.write().await.activation_error = message.map(str::to_string);
    }

    /// Registers a user profile for `user` lookups.
    pub async fn add_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn add_subscription(&self, user_id: u64, subscription: UserSubscription) {
        self.state
            .write()
            .await
            .subscriptions
            .entry(user_id)
            .or_default()
            .push(subscription);
    }

    pub async fn add_live_session(&self, user_id: u64, session: LiveSession) {
        self.state
            .write()
            .await
            .live_sessions
            .entry(user_id)
            .or_default()
            .push(session);
    }

    pub async fn add_assignment(&self, assignment: Assignment) {
        self.state.write().await.assignments.push(assignment);
    }

    /// Every call received so far, oldest first.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Like [`InMemoryBackend::calls`], with the instant each call arrived.
    pub async fn timed_calls(&self) -> Vec<(Instant, BackendCall)> {
        self.state.read().await.calls.clone()
    }

    /// Number of status reads received.
    pub async fn status_reads(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Status { .. })).await
    }

    pub async fn activations(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Activate { .. })).await
    }

    pub async fn initiations(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Initiate { .. })).await
    }

    async fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|(_, call)| pred(call))
            .count()
    }

    async fn record(&self, call: BackendCall) {
        self.state.write().await.calls.push((Instant::now(), call));
    }

    async fn record_learning(&self, endpoint: &'static str, bearer: &str) -> Result<()> {
        if bearer.is_empty() {
            return Err(PlatformError::Unauthenticated("missing bearer token".to_string()));
        }
        self.record(BackendCall::Learning {
            endpoint,
            bearer: bearer.to_string(),
        })
        .await;
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryBackend {
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession> {
        let body = match request.method {
            PaymentMethod::Mpesa => serde_json::to_value(request.mpesa_body())?,
            PaymentMethod::Binance => serde_json::to_value(request.binance_body())?,
        };
        self.record(BackendCall::Initiate {
            method: request.method,
            body,
        })
        .await;

        let delay = self.state.read().await.initiation_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if let Some(message) = &state.initiation_error {
            return Err(PlatformError::Provider(message.clone()));
        }
        state.issued += 1;
        let issued = state.issued;
        let payment_id = state
            .payment_ids
            .pop_front()
            .unwrap_or_else(|| format!("pay-{issued}"));
        let (qr_code_url, checkout_url) = match request.method {
            PaymentMethod::Mpesa => (None, None),
            PaymentMethod::Binance => (
                Some(format!("https://pay.example/qr/{payment_id}.png")),
                Some(format!("https://pay.example/checkout/{payment_id}")),
            ),
        };
        Ok(PaymentSession {
            payment_id,
            status: PaymentStatus::Pending,
            qr_code_url,
            checkout_url,
        })
    }

    async fn status(&self, payment_id: &str) -> Result<PaymentStatus> {
        self.record(BackendCall::Status {
            payment_id: payment_id.to_string(),
        })
        .await;
        let mut state = self.state.write().await;
        if state.failing_status_reads > 0 {
            state.failing_status_reads -= 1;
            return Err(PlatformError::Provider("status service unavailable".to_string()));
        }
        let status = state
            .statuses
            .pop_front()
            .or(state.last_status)
            .unwrap_or(PaymentStatus::Pending);
        state.last_status = Some(status);
        Ok(status)
    }
}

#[async_trait]
impl SubscriptionApi for InMemoryBackend {
    async fn public_plans(&self) -> Result<Vec<Plan>> {
        self.record(BackendCall::PublicPlans).await;
        Ok(self.state.read().await.plans.clone())
    }

    async fn activate(&self, plan_id: u64, bearer: &str) -> Result<()> {
        let delay = self.state.read().await.activation_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.record(BackendCall::Activate {
            plan_id,
            bearer: bearer.to_string(),
        })
        .await;
        match &self.state.read().await.activation_error {
            Some(message) => Err(PlatformError::Provider(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LearningApi for InMemoryBackend {
    async fn user(&self, user_id: u64, bearer: &str) -> Result<User> {
        self.record_learning("users", bearer).await?;
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PlatformError::Provider(format!("user {user_id} not found")))
    }

    async fn user_subscriptions(&self, user_id: u64, bearer: &str) -> Result<Vec<UserSubscription>> {
        self.record_learning("user/subscriptions", bearer).await?;
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn live_sessions(&self, user_id: u64, bearer: &str) -> Result<Vec<LiveSession>> {
        self.record_learning("user/courses/live/sessions", bearer).await?;
        Ok(self
            .state
            .read()
            .await
            .live_sessions
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn assignments(&self, query: &AssignmentQuery, bearer: &str) -> Result<Vec<Assignment>> {
        self.record_learning("assignments", bearer).await?;
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| query.status.as_ref().is_none_or(|s| &a.status == s))
            .cloned()
            .collect())
    }

    async fn submit_assignment(
        &self,
        assignment_id: u64,
        submission: &AssignmentSubmission,
        bearer: &str,
    ) -> Result<Assignment> {
        self.record_learning("assignments/update", bearer).await?;
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .iter_mut()
            .find(|a| a.id == assignment_id)
            .ok_or_else(|| PlatformError::Provider(format!("assignment {assignment_id} not found")))?;
        assignment.status = submission.status.clone();
        Ok(assignment.clone())
    }

    async fn upload(&self, path: &Path, bearer: &str) -> Result<Vec<UploadedFile>> {
        self.record_learning("upload", bearer).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut state = self.state.write().await;
        state.issued += 1;
        Ok(vec![UploadedFile {
            id: state.issued,
            url: format!("/uploads/{name}"),
            name,
        }])
    }
}
