#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::SecretString;
use crate::auth::{AuthError, BotAuthenticator, Credential, TokenTarget};

fn no_env(_: &str) -> Option<String> {
	None
}

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
	let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
	move |key: &str| map.get(key).cloned()
}

fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("config.toml");
	std::fs::write(&path, contents).expect("write config");
	(dir, path)
}

#[test]
fn missing_file_yields_defaults() {
	let dir = tempfile::tempdir().expect("tempdir");
	let cfg = load_config_with_env(&dir.path().join("absent.toml"), no_env).expect("defaults");

	assert_eq!(cfg, BotfeedConfig::default());
	assert_eq!(cfg.datafeed.id_file_path, PathBuf::from("."));
	assert_eq!(cfg.datafeed.retry, RetryPolicy::default());
	assert!(!cfg.datafeed.persist_required);
}

#[test]
fn file_values_are_loaded() {
	let (_dir, path) = write_config(
		r#"
[bot]
username = "feed-bot"
private_key_path = "/etc/bot/rsa.pem"

[retry]
max_attempts = 4
initial_interval_ms = 250
multiplier = 1.5
max_interval_ms = 5000

[datafeed]
id_file_path = "/var/lib/bot"
persist_required = true
"#,
	);

	let cfg = load_config_with_env(&path, no_env).expect("load");

	assert_eq!(cfg.bot.username.as_deref(), Some("feed-bot"));
	assert_eq!(cfg.bot.private_key_path, Some(PathBuf::from("/etc/bot/rsa.pem")));
	assert_eq!(cfg.retry.max_attempts(), 4);
	assert_eq!(cfg.retry.initial_interval(), Duration::from_millis(250));
	assert_eq!(cfg.retry.multiplier(), 1.5);
	assert_eq!(cfg.retry.max_interval(), Duration::from_millis(5000));
	assert_eq!(cfg.datafeed.id_file_path, PathBuf::from("/var/lib/bot"));
	assert_eq!(cfg.datafeed.retry, cfg.retry);
	assert!(cfg.datafeed.persist_required);
}

#[test]
fn datafeed_retry_falls_back_to_global_per_key() {
	let (_dir, path) = write_config(
		r#"
[retry]
max_attempts = 4
initial_interval_ms = 250

[datafeed.retry]
max_attempts = 100
"#,
	);

	let cfg = load_config_with_env(&path, no_env).expect("load");

	assert_eq!(cfg.retry.max_attempts(), 4);
	assert_eq!(cfg.datafeed.retry.max_attempts(), 100);
	assert_eq!(cfg.datafeed.retry.initial_interval(), Duration::from_millis(250));
	assert_eq!(cfg.datafeed.retry.max_interval(), DEFAULT_MAX_INTERVAL);
}

#[test]
fn env_overrides_file_values() {
	let (_dir, path) = write_config(
		r#"
[bot]
username = "from-file"

[retry]
max_attempts = 4
"#,
	);
	let env = env_of(&[
		("BOTFEED_BOT_USERNAME", " from-env "),
		("BOTFEED_PRIVATE_KEY_PATH", "/keys/bot.pem"),
		("BOTFEED_DATAFEED_ID_FILE_PATH", "/tmp/feed.id"),
		("BOTFEED_DATAFEED_PERSIST_REQUIRED", "yes"),
		("BOTFEED_RETRY_MAX_ATTEMPTS", "7"),
		("BOTFEED_RETRY_INITIAL_INTERVAL_MS", "100"),
		("BOTFEED_RETRY_MULTIPLIER", "3"),
		("BOTFEED_RETRY_MAX_INTERVAL_MS", "900"),
	]);

	let cfg = load_config_with_env(&path, env).expect("load");

	assert_eq!(cfg.bot.username.as_deref(), Some("from-env"));
	assert_eq!(cfg.bot.private_key_path, Some(PathBuf::from("/keys/bot.pem")));
	assert_eq!(cfg.datafeed.id_file_path, PathBuf::from("/tmp/feed.id"));
	assert!(cfg.datafeed.persist_required);
	assert_eq!(cfg.retry.max_attempts(), 7);
	assert_eq!(cfg.retry.initial_interval(), Duration::from_millis(100));
	assert_eq!(cfg.retry.multiplier(), 3.0);
	assert_eq!(cfg.retry.max_interval(), Duration::from_millis(900));
	assert_eq!(cfg.datafeed.retry, cfg.retry);
}

#[test]
fn blank_and_unparseable_env_values_are_ignored() {
	let (_dir, path) = write_config("[retry]\nmax_attempts = 4\n");
	let env = env_of(&[
		("BOTFEED_BOT_USERNAME", "   "),
		("BOTFEED_RETRY_MAX_ATTEMPTS", "many"),
		("BOTFEED_DATAFEED_PERSIST_REQUIRED", "maybe"),
	]);

	let cfg = load_config_with_env(&path, env).expect("load");

	assert_eq!(cfg.bot.username, None);
	assert_eq!(cfg.retry.max_attempts(), 4);
	assert!(!cfg.datafeed.persist_required);
}

#[test]
fn invalid_retry_policy_is_rejected() {
	let (_dir, path) = write_config("[retry]\nmax_attempts = 0\n");
	let err = load_config_with_env(&path, no_env).expect_err("zero attempts");
	assert!(matches!(
		err,
		ConfigError::InvalidRetry {
			section: "retry",
			source: RetryPolicyError::ZeroAttempts
		}
	));

	let (_dir, path) = write_config("[datafeed.retry]\nmultiplier = 0.5\n");
	let err = load_config_with_env(&path, no_env).expect_err("multiplier below one");
	assert!(matches!(
		err,
		ConfigError::InvalidRetry {
			section: "datafeed.retry",
			..
		}
	));

	let (_dir, path) = write_config("");
	let env = env_of(&[("BOTFEED_RETRY_MAX_INTERVAL_MS", "10")]);
	let err = load_config_with_env(&path, env).expect_err("max below initial");
	assert!(err.to_string().contains("max_interval"));
}

#[test]
fn malformed_toml_is_an_error() {
	let (_dir, path) = write_config("[retry\nmax_attempts = ");
	let err = load_config_with_env(&path, no_env).expect_err("parse error");
	assert!(matches!(err, ConfigError::Parse { .. }));
}

struct NullExchange;

#[async_trait::async_trait]
impl TokenExchange for NullExchange {
	async fn exchange(&self, target: TokenTarget, credential: Credential) -> Result<SecretString, AuthError> {
		match credential {
			Credential::Assertion(_) => Ok(SecretString::new(format!("{target}-ok"))),
			Credential::ClientCertificate => Err(AuthError::Unauthorized("expected assertion".into())),
		}
	}
}

#[tokio::test]
async fn builds_rsa_authenticator_from_key_file() {
	let dir = tempfile::tempdir().expect("tempdir");
	let key_path = dir.path().join("bot.pem");
	std::fs::write(&key_path, include_str!("../auth/testdata/bot_rsa_key.pem")).expect("write key");

	let cfg = BotfeedConfig {
		bot: BotSettings {
			username: Some("feed-bot".into()),
			private_key_path: Some(key_path),
		},
		..BotfeedConfig::default()
	};

	let authenticator = cfg.rsa_authenticator(Arc::new(NullExchange)).expect("authenticator");
	let token = authenticator.retrieve_session_token().await.expect("session");
	assert_eq!(token.expose(), "session-ok");
}

#[test]
fn rsa_authenticator_requires_bot_settings() {
	let err = BotfeedConfig::default()
		.rsa_authenticator(Arc::new(NullExchange))
		.expect_err("no username");
	assert!(matches!(err, ConfigError::MissingBotSetting("username")));

	let cfg = BotfeedConfig {
		bot: BotSettings {
			username: Some("feed-bot".into()),
			private_key_path: Some(PathBuf::from("/definitely/not/here.pem")),
		},
		..BotfeedConfig::default()
	};
	let err = cfg.rsa_authenticator(Arc::new(NullExchange)).expect_err("missing key");
	assert!(matches!(err, ConfigError::Key(AuthError::InvalidKey(_))));
}
