#![forbid(unsafe_code)]

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use serde::Serialize;
use sha2::Sha512;
use tracing::debug;

use super::{ASSERTION_TTL, AssertionSigner, AuthError, BotAuthenticator, Credential, TokenExchange, TokenTarget};
use crate::SecretString;

#[derive(Serialize)]
struct JwtHeader {
	alg: &'static str,
	typ: &'static str,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
	sub: &'a str,
	exp: i64,
}

/// RS512 JWT signer backed by an RSA private key.
pub struct RsaJwtSigner {
	signing_key: SigningKey<Sha512>,
}

impl RsaJwtSigner {
	pub fn new(key: RsaPrivateKey) -> Self {
		Self {
			signing_key: SigningKey::<Sha512>::new(key),
		}
	}

	/// Parse a PKCS#8 or PKCS#1 PEM private key.
	pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
		let key = RsaPrivateKey::from_pkcs8_pem(pem)
			.or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
			.map_err(|e| AuthError::InvalidKey(e.to_string()))?;
		Ok(Self::new(key))
	}

	pub fn from_pem_file(path: &Path) -> Result<Self, AuthError> {
		let pem = std::fs::read_to_string(path)
			.map_err(|e| AuthError::InvalidKey(format!("read {}: {e}", path.display())))?;
		Self::from_pem(&pem)
	}
}

impl fmt::Debug for RsaJwtSigner {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("RsaJwtSigner(<redacted>)")
	}
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
	let json = serde_json::to_vec(value).map_err(|e| AuthError::Signing(e.to_string()))?;
	Ok(URL_SAFE_NO_PAD.encode(json))
}

impl AssertionSigner for RsaJwtSigner {
	fn sign(&self, identity: &str, ttl: Duration) -> Result<String, AuthError> {
		let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
		let header = encode_segment(&JwtHeader {
			alg: "RS512",
			typ: "JWT",
		})?;
		let claims = encode_segment(&JwtClaims {
			sub: identity,
			exp: chrono::Utc::now().timestamp().saturating_add(ttl_secs),
		})?;

		let signing_input = format!("{header}.{claims}");
		let signature = self
			.signing_key
			.try_sign(signing_input.as_bytes())
			.map_err(|e| AuthError::Signing(e.to_string()))?;

		Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes())))
	}
}

/// Service-account authentication with a signed identity assertion.
pub struct RsaBotAuthenticator {
	username: String,
	signer: Arc<dyn AssertionSigner>,
	exchange: Arc<dyn TokenExchange>,
}

impl RsaBotAuthenticator {
	pub fn new(username: impl Into<String>, signer: Arc<dyn AssertionSigner>, exchange: Arc<dyn TokenExchange>) -> Self {
		Self {
			username: username.into(),
			signer,
			exchange,
		}
	}

	async fn retrieve(&self, target: TokenTarget) -> Result<SecretString, AuthError> {
		debug!(%target, username = %self.username, "retrieving token using RSA authentication");
		let assertion = self.signer.sign(&self.username, ASSERTION_TTL)?;
		let token = self
			.exchange
			.exchange(target, Credential::Assertion(SecretString::new(assertion)))
			.await?;
		debug!(%target, "token retrieved");
		Ok(token)
	}
}

impl fmt::Debug for RsaBotAuthenticator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RsaBotAuthenticator")
			.field("username", &self.username)
			.finish_non_exhaustive()
	}
}

#[async_trait::async_trait]
impl BotAuthenticator for RsaBotAuthenticator {
	async fn retrieve_session_token(&self) -> Result<SecretString, AuthError> {
		self.retrieve(TokenTarget::Session).await
	}

	async fn retrieve_key_manager_token(&self) -> Result<SecretString, AuthError> {
		self.retrieve(TokenTarget::KeyManager).await
	}
}
