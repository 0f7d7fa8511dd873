use crate::domain::learning::{
    Assignment, AssignmentQuery, AssignmentSubmission, Envelope, LiveSession, UploadedFile, User,
    UserSubscription,
};
use crate::domain::payment::{
    InitiationResponse, PaymentMethod, PaymentRequest, PaymentSession, PaymentStatus,
};
use crate::domain::plan::Plan;
use crate::domain::ports::{LearningApi, PaymentGateway, SubscriptionApi};
use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url, multipart};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Strapi nests `{error: {message}}`; custom routes use a flat `message`.
    fn text(self) -> Option<String> {
        self.message.or_else(|| match self.error? {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        })
    }
}

/// REST client for the content and payment backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| PlatformError::Config(format!("invalid API url '{base_url}': {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Resolves an API path such as `api/payments/status/abc` against the base url.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| PlatformError::Config(format!("invalid endpoint '{path}': {e}")))
    }

    fn get(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.get(self.endpoint(path)?).header(ACCEPT, "application/json"))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.post(self.endpoint(path)?).header(ACCEPT, "application/json"))
    }

    fn put(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.client.put(self.endpoint(path)?).header(ACCEPT, "application/json"))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let bytes = check(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn bearer(request: RequestBuilder, token: &str) -> RequestBuilder {
    request.header(AUTHORIZATION, format!("Bearer {token}"))
}

/// Maps non-2xx responses onto the error taxonomy.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    let detail = serde_json::from_slice::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::text)
        .unwrap_or_else(|| status.to_string());
    debug!(%status, %detail, "request rejected");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(PlatformError::Unauthenticated(detail))
        }
        _ => Err(PlatformError::Provider(detail)),
    }
}

#[async_trait]
impl PaymentGateway for HttpBackend {
    #[instrument(skip(self, request), fields(method = %request.method, plan_id = request.plan_id))]
    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentSession> {
        let builder = match request.method {
            PaymentMethod::Mpesa => self
                .post("api/payments/mpesa/initiate")?
                .json(&request.mpesa_body()),
            PaymentMethod::Binance => self
                .post("api/payments/binance/initiate")?
                .json(&request.binance_body()),
        };
        let response: InitiationResponse = self.send(builder).await?;
        response.into_session()
    }

    #[instrument(skip(self))]
    async fn status(&self, payment_id: &str) -> Result<PaymentStatus> {
        let path = format!("api/payments/status/{payment_id}");
        let response: StatusResponse = self.send(self.get(&path)?).await?;
        Ok(PaymentStatus::from_wire(&response.status))
    }
}

#[async_trait]
impl SubscriptionApi for HttpBackend {
    async fn public_plans(&self) -> Result<Vec<Plan>> {
        let plans: Envelope<Vec<Plan>> = self.send(self.get("api/subscriptions/public")?).await?;
        Ok(plans.into_inner())
    }

    #[instrument(skip(self, bearer_token))]
    async fn activate(&self, plan_id: u64, bearer_token: &str) -> Result<()> {
        let request = bearer(self.post("api/subscribe")?, bearer_token)
            .json(&json!({ "subscriptionId": plan_id }));
        let response = request.send().await?;
        check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl LearningApi for HttpBackend {
    async fn user(&self, user_id: u64, token: &str) -> Result<User> {
        let request = bearer(self.get(&format!("api/users/{user_id}"))?, token);
        let user: Envelope<User> = self.send(request).await?;
        Ok(user.into_inner())
    }

    async fn user_subscriptions(&self, user_id: u64, token: &str) -> Result<Vec<UserSubscription>> {
        let request = bearer(self.get(&format!("api/user/subscriptions/{user_id}"))?, token);
        let subscriptions: Envelope<Vec<UserSubscription>> = self.send(request).await?;
        Ok(subscriptions.into_inner())
    }

    async fn live_sessions(&self, user_id: u64, token: &str) -> Result<Vec<LiveSession>> {
        let path = format!("api/user/courses/live/sessions/{user_id}");
        let sessions: Envelope<Vec<LiveSession>> =
            self.send(bearer(self.get(&path)?, token)).await?;
        Ok(sessions.into_inner())
    }

    async fn assignments(&self, query: &AssignmentQuery, token: &str) -> Result<Vec<Assignment>> {
        let request = bearer(self.get("api/assignments")?, token).query(&query.to_params());
        let assignments: Envelope<Vec<Assignment>> = self.send(request).await?;
        Ok(assignments.into_inner())
    }

    async fn submit_assignment(
        &self,
        assignment_id: u64,
        submission: &AssignmentSubmission,
        token: &str,
    ) -> Result<Assignment> {
        let request = bearer(self.put(&format!("api/assignments/{assignment_id}"))?, token)
            .json(&json!({ "data": submission }));
        let assignment: Envelope<Assignment> = self.send(request).await?;
        Ok(assignment.into_inner())
    }

    async fn upload(&self, path: &Path, token: &str) -> Result<Vec<UploadedFile>> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let form = multipart::Form::new().part("files", multipart::Part::bytes(bytes).file_name(name));
        let request = bearer(self.post("api/upload")?, token).multipart(form);
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let backend = HttpBackend::new("https://cms.example.com/v1", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.endpoint("/api/payments/status/abc").unwrap().as_str(),
            "https://cms.example.com/v1/api/payments/status/abc"
        );
        let root = HttpBackend::new("http://localhost:1337", Duration::from_secs(5)).unwrap();
        assert_eq!(
            root.endpoint("api/subscriptions/public").unwrap().as_str(),
            "http://localhost:1337/api/subscriptions/public"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        assert!(matches!(
            HttpBackend::new("not a url", Duration::from_secs(1)),
            Err(PlatformError::Config(_))
        ));
    }

    #[test]
    fn test_error_body_text() {
        let nested: ErrorBody =
            serde_json::from_str(r#"{"error": {"status": 400, "message": "Invalid phone"}}"#).unwrap();
        assert_eq!(nested.text().as_deref(), Some("Invalid phone"));
        let flat: ErrorBody = serde_json::from_str(r#"{"message": "Declined"}"#).unwrap();
        assert_eq!(flat.text().as_deref(), Some("Declined"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let backend = HttpBackend::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let result = backend.status("abc").await;
        assert!(matches!(result, Err(PlatformError::Network(_))));
    }
}
