#![forbid(unsafe_code)]

//! Remote operations the datafeed pipeline depends on.
//!
//! Transport and payload (de)serialization live behind these traits; the
//! pipeline only sees typed results and [`ApiError`].

use botfeed_domain::WireEvent;
use thiserror::Error;

/// Coarse classification that drives retry and recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
	/// Credentials rejected (401). Recoverable by a session refresh.
	Unauthorized,

	/// Any other 4xx. Never retried.
	ClientError,

	/// 429, 5xx and network failures. Retried with backoff.
	Transient,
}

/// Failure reported by a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
	#[error("api request failed (status={code}): {message}")]
	Status { code: u16, message: String },

	#[error("api transport error: {0}")]
	Transport(String),
}

impl ApiError {
	pub fn status(code: u16, message: impl Into<String>) -> Self {
		Self::Status {
			code,
			message: message.into(),
		}
	}

	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self::status(401, message)
	}

	pub fn code(&self) -> Option<u16> {
		match self {
			Self::Status { code, .. } => Some(*code),
			Self::Transport(_) => None,
		}
	}

	pub fn class(&self) -> FailureClass {
		match self {
			Self::Status { code: 401, .. } => FailureClass::Unauthorized,
			Self::Status { code: 429, .. } => FailureClass::Transient,
			Self::Status { code, .. } if (400..500).contains(code) => FailureClass::ClientError,
			Self::Status { .. } | Self::Transport(_) => FailureClass::Transient,
		}
	}
}

/// Identity of the authenticated bot account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotInfo {
	pub id: i64,
	pub username: Option<String>,
	pub display_name: Option<String>,
}

/// Server-side feed handle returned by a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datafeed {
	pub id: String,
	pub created_at: Option<i64>,
}

/// Session endpoint: who am I.
#[async_trait::async_trait]
pub trait SessionApi: Send + Sync + 'static {
	async fn session_info(&self, session_token: &str) -> Result<BotInfo, ApiError>;
}

/// Datafeed endpoints.
#[async_trait::async_trait]
pub trait DatafeedApi: Send + Sync + 'static {
	async fn create_datafeed(&self, session_token: &str, key_manager_token: &str) -> Result<Datafeed, ApiError>;

	/// Long-poll read. An empty batch means the poll timed out with nothing new.
	///
	/// `None` entries mirror `null` placeholders in the response array.
	async fn read_datafeed(
		&self,
		feed_id: &str,
		session_token: &str,
		key_manager_token: &str,
	) -> Result<Vec<Option<WireEvent>>, ApiError>;
}
