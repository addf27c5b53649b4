#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod config;
pub mod datafeed;
pub mod retry;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub use api::{ApiError, BotInfo, Datafeed, DatafeedApi, FailureClass, SessionApi};
pub use auth::{AuthError, AuthSession, BotAuthenticator, SessionTokens, authenticate_bot};
pub use config::{BotfeedConfig, ConfigError, load_config, load_config_from_path};
pub use datafeed::{
	DatafeedConfig, DatafeedEventListener, DatafeedService, FeedError, FeedIdStore, ListenerRegistry, ServiceState,
	StopHandle,
};
pub use retry::{RecoveryStrategy, RetryPolicy, RetryWithRecovery};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}
