#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::debug;

use super::{AuthError, BotAuthenticator, Credential, TokenExchange, TokenTarget};
use crate::SecretString;

/// Authentication through the transport's client certificate.
pub struct CertBotAuthenticator {
	exchange: Arc<dyn TokenExchange>,
}

impl CertBotAuthenticator {
	pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
		Self { exchange }
	}

	async fn retrieve(&self, target: TokenTarget) -> Result<SecretString, AuthError> {
		debug!(%target, "retrieving token using certificate authentication");
		self.exchange.exchange(target, Credential::ClientCertificate).await
	}
}

#[async_trait::async_trait]
impl BotAuthenticator for CertBotAuthenticator {
	async fn retrieve_session_token(&self) -> Result<SecretString, AuthError> {
		self.retrieve(TokenTarget::Session).await
	}

	async fn retrieve_key_manager_token(&self) -> Result<SecretString, AuthError> {
		self.retrieve(TokenTarget::KeyManager).await
	}
}
