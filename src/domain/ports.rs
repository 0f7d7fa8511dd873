use super::learning::{
    Assignment, AssignmentQuery, AssignmentSubmission, LiveSession, UploadedFile, User,
    UserSubscription,
};
use super::payment::{PaymentRequest, PaymentSession, PaymentStatus};
use super::plan::Plan;
use super::session::StoredCredentials;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Payment-provider endpoints exposed by the backend.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Starts a payment with the request's provider and returns a pending session.
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession>;
    /// Reads the current status of a payment by its provider id.
    async fn status(&self, payment_id: &str) -> Result<PaymentStatus>;
}

/// Plan catalogue and subscription activation.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    /// Lists every published plan, active or not.
    async fn public_plans(&self) -> Result<Vec<Plan>>;
    /// Links a completed payment's plan to the bearer's account.
    async fn activate(&self, plan_id: u64, bearer: &str) -> Result<()>;
}

/// Dashboard reads and writes. All calls are bearer-authenticated.
#[async_trait]
pub trait LearningApi: Send + Sync {
    /// Fetches a user profile.
    async fn user(&self, user_id: u64, bearer: &str) -> Result<User>;
    /// Lists the subscriptions held by a user.
    async fn user_subscriptions(&self, user_id: u64, bearer: &str) -> Result<Vec<UserSubscription>>;
    /// Lists the live sessions of the courses a user is enrolled in.
    async fn live_sessions(&self, user_id: u64, bearer: &str) -> Result<Vec<LiveSession>>;
    /// Lists assignments matching the query filters.
    async fn assignments(&self, query: &AssignmentQuery, bearer: &str) -> Result<Vec<Assignment>>;
    /// Updates an assignment with the submitted files and comment.
    async fn submit_assignment(
        &self,
        assignment_id: u64,
        submission: &AssignmentSubmission,
        bearer: &str,
    ) -> Result<Assignment>;
    /// Uploads a local file to the media library.
    async fn upload(&self, path: &Path, bearer: &str) -> Result<Vec<UploadedFile>>;
}

/// Client-local persistence for the bearer token and cached user.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads stored credentials. Nothing stored yields the empty default.
    async fn load(&self) -> Result<StoredCredentials>;
    /// Replaces whatever was stored.
    async fn save(&self, credentials: &StoredCredentials) -> Result<()>;
    /// Removes stored credentials. Clearing an empty store is not an error.
    async fn clear(&self) -> Result<()>;
}

pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type SubscriptionApiRef = Arc<dyn SubscriptionApi>;
pub type LearningApiRef = Arc<dyn LearningApi>;
pub type CredentialStoreBox = Box<dyn CredentialStore>;
