#![forbid(unsafe_code)]

mod id_store;
mod listener;
mod service;


use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::api::{ApiError, FailureClass};
use crate::auth::AuthError;
use crate::retry::RetryPolicy;

pub use id_store::{DATAFEED_ID_FILE, FeedIdStore};
pub use listener::{DatafeedEventListener, ListenerError, ListenerRegistry};
pub use service::{DatafeedService, StopHandle};

/// Lifecycle of a [`DatafeedService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
	Idle,
	Starting,
	Running,
	Stopping,
}

impl fmt::Display for ServiceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Idle => "idle",
			Self::Starting => "starting",
			Self::Running => "running",
			Self::Stopping => "stopping",
		};
		f.write_str(s)
	}
}

/// Terminal failure of a datafeed run.
#[derive(Debug, Error)]
pub enum FeedError {
	#[error(transparent)]
	Api(#[from] ApiError),

	#[error("session refresh failed: {0}")]
	Auth(#[from] AuthError),

	#[error("datafeed service already {0}")]
	AlreadyStarted(ServiceState),

	#[error("persist datafeed id: {0}")]
	Persist(#[source] io::Error),

	#[error(transparent)]
	Listener(#[from] ListenerError),
}

impl FeedError {
	/// Credentials were rejected; a session refresh may help.
	pub fn is_unauthorized(&self) -> bool {
		matches!(self, Self::Api(e) if e.class() == FailureClass::Unauthorized)
	}

	/// Worth another attempt under the retry policy.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Api(e) if e.class() != FailureClass::ClientError)
	}

	pub fn is_client_error(&self) -> bool {
		matches!(self, Self::Api(e) if e.class() == FailureClass::ClientError)
	}
}

/// Runtime settings for a [`DatafeedService`].
#[derive(Debug, Clone, PartialEq)]
pub struct DatafeedConfig {
	/// Feed id file, or a directory holding [`DATAFEED_ID_FILE`].
	pub id_file_path: PathBuf,
	pub retry: RetryPolicy,
	/// Fail startup when the new feed id cannot be written.
	pub persist_required: bool,
}

impl Default for DatafeedConfig {
	fn default() -> Self {
		Self {
			id_file_path: PathBuf::from("."),
			retry: RetryPolicy::default(),
			persist_required: false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_feed_errors() {
		let unauthorized = FeedError::from(ApiError::unauthorized("expired"));
		assert!(unauthorized.is_unauthorized());
		assert!(unauthorized.is_retryable());

		let bad_request = FeedError::from(ApiError::status(400, "bad id"));
		assert!(bad_request.is_client_error());
		assert!(!bad_request.is_retryable());

		let unavailable = FeedError::from(ApiError::status(503, "down"));
		assert!(unavailable.is_retryable());
		assert!(!unavailable.is_unauthorized());

		let auth = FeedError::from(AuthError::Unauthorized("bad key".into()));
		assert!(!auth.is_retryable());
		assert!(!auth.is_unauthorized());

		let started = FeedError::AlreadyStarted(ServiceState::Running);
		assert_eq!(started.to_string(), "datafeed service already running");
	}
}
