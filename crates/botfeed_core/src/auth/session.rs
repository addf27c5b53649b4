#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{AuthError, BotAuthenticator};
use crate::SecretString;

/// Session and key manager tokens, always held together.
#[derive(Debug, Clone)]
pub struct SessionTokens {
	session: SecretString,
	key_manager: SecretString,
}

impl SessionTokens {
	pub fn new(session: SecretString, key_manager: SecretString) -> Self {
		Self { session, key_manager }
	}

	pub fn session(&self) -> &SecretString {
		&self.session
	}

	pub fn key_manager(&self) -> &SecretString {
		&self.key_manager
	}
}

/// Current token pair for one bot identity.
///
/// Starts unauthenticated; only [`AuthSession::refresh`] mutates it. Readers
/// that need both tokens should take a [`AuthSession::tokens`] snapshot: two
/// separate getter calls may straddle a refresh.
pub struct AuthSession {
	authenticator: Arc<dyn BotAuthenticator>,
	tokens: RwLock<Option<SessionTokens>>,
	refresh_lock: tokio::sync::Mutex<()>,
}

impl AuthSession {
	pub fn new(authenticator: Arc<dyn BotAuthenticator>) -> Self {
		Self {
			authenticator,
			tokens: RwLock::new(None),
			refresh_lock: tokio::sync::Mutex::new(()),
		}
	}

	pub fn session_token(&self) -> Option<SecretString> {
		self.tokens.read().as_ref().map(|t| t.session.clone())
	}

	pub fn key_manager_token(&self) -> Option<SecretString> {
		self.tokens.read().as_ref().map(|t| t.key_manager.clone())
	}

	/// Consistent snapshot of both tokens.
	pub fn tokens(&self) -> Option<SessionTokens> {
		self.tokens.read().clone()
	}

	pub fn is_authenticated(&self) -> bool {
		self.tokens.read().is_some()
	}

	/// Re-run the authentication handshake and replace both tokens.
	///
	/// Concurrent callers are serialized. No retry happens here; wrap the call
	/// in a [`crate::RetryWithRecovery`] when retries are wanted. On failure the
	/// previous pair is kept.
	pub async fn refresh(&self) -> Result<(), AuthError> {
		let _guard = self.refresh_lock.lock().await;
		metrics::counter!("botfeed_auth_refresh_total").increment(1);

		let fetched = async {
			let session = self.authenticator.retrieve_session_token().await?;
			let key_manager = self.authenticator.retrieve_key_manager_token().await?;
			Ok::<_, AuthError>(SessionTokens::new(session, key_manager))
		}
		.await;

		match fetched {
			Ok(tokens) => {
				*self.tokens.write() = Some(tokens);
				debug!("auth session refreshed");
				Ok(())
			}
			Err(e) => {
				metrics::counter!("botfeed_auth_refresh_errors_total").increment(1);
				warn!(error = %e, "auth session refresh failed");
				Err(e)
			}
		}
	}
}

impl fmt::Debug for AuthSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthSession")
			.field("authenticated", &self.is_authenticated())
			.finish_non_exhaustive()
	}
}

/// Build a session for `authenticator` and perform the initial handshake.
pub async fn authenticate_bot(authenticator: Arc<dyn BotAuthenticator>) -> Result<AuthSession, AuthError> {
	let session = AuthSession::new(authenticator);
	session.refresh().await?;
	Ok(session)
}
