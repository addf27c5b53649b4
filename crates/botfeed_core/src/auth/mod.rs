#![forbid(unsafe_code)]

mod cert;
mod rsa_key;
mod session;


use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::SecretString;

pub use cert::CertBotAuthenticator;
pub use rsa_key::{RsaBotAuthenticator, RsaJwtSigner};
pub use session::{AuthSession, SessionTokens, authenticate_bot};

/// Lifetime of a signed identity assertion.
pub const ASSERTION_TTL: Duration = Duration::from_millis(30_000);

/// Authentication failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
	/// The identity provider rejected the credentials.
	#[error("not authorized: {0}")]
	Unauthorized(String),

	/// The identity provider could not be reached.
	#[error("auth transport error: {0}")]
	Transport(String),

	#[error("sign identity assertion: {0}")]
	Signing(String),

	#[error("invalid private key: {0}")]
	InvalidKey(String),
}

/// Which token a credential exchange produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenTarget {
	Session,
	KeyManager,
}

impl fmt::Display for TokenTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Session => f.write_str("session"),
			Self::KeyManager => f.write_str("key manager"),
		}
	}
}

/// Proof of identity presented to the identity provider.
#[derive(Debug, Clone)]
pub enum Credential {
	/// Signed, short-lived identity assertion.
	Assertion(SecretString),

	/// Identity carried by the transport's client certificate.
	ClientCertificate,
}

/// Signs identity assertions.
pub trait AssertionSigner: Send + Sync + 'static {
	fn sign(&self, identity: &str, ttl: Duration) -> Result<String, AuthError>;
}

/// Exchanges a credential for a token at the identity provider.
#[async_trait::async_trait]
pub trait TokenExchange: Send + Sync + 'static {
	async fn exchange(&self, target: TokenTarget, credential: Credential) -> Result<SecretString, AuthError>;
}

/// One way of acquiring the bot's token pair.
#[async_trait::async_trait]
pub trait BotAuthenticator: Send + Sync + 'static {
	async fn retrieve_session_token(&self) -> Result<SecretString, AuthError>;

	async fn retrieve_key_manager_token(&self) -> Result<SecretString, AuthError>;
}
