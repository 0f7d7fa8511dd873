use crate::application::poller::PollSchedule;
use crate::error::{PlatformError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:1337";
pub const DEFAULT_CREDENTIALS_PATH: &str = ".mentorpay/credentials.json";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime settings shared by every command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub credentials_path: PathBuf,
    pub poll: PollSchedule,
    pub http_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            poll: PollSchedule::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval.is_zero() {
            return Err(PlatformError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.poll.max_wait.is_some_and(|w| w < self.poll.interval) {
            return Err(PlatformError::Config(
                "max wait must be at least one poll interval".to_string(),
            ));
        }
        if self.http_timeout.is_zero() {
            return Err(PlatformError::Config(
                "HTTP timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
