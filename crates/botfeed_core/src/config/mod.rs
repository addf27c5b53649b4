#![forbid(unsafe_code)]

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{RsaBotAuthenticator, RsaJwtSigner, TokenExchange};
use crate::datafeed::DatafeedConfig;
use crate::retry::{
	DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER, RetryPolicy,
	RetryPolicyError,
};

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("could not determine home directory")]
	MissingHome,

	#[error("read config from {}: {source}", path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("parse TOML in {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid [{section}] policy: {source}")]
	InvalidRetry {
		section: &'static str,
		#[source]
		source: RetryPolicyError,
	},

	#[error("missing bot setting: {0}")]
	MissingBotSetting(&'static str),

	#[error(transparent)]
	Key(#[from] crate::auth::AuthError),
}

/// Default config path: `~/.botfeed/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
	let home = dirs::home_dir().ok_or(ConfigError::MissingHome)?;
	Ok(home.join(".botfeed").join("config.toml"))
}

/// Load the config from the default path plus env overrides.
pub fn load_config() -> Result<BotfeedConfig, ConfigError> {
	let path = default_config_path()?;
	load_config_from_path(&path)
}

/// Same as `load_config` but with an explicit config path.
pub fn load_config_from_path(path: &Path) -> Result<BotfeedConfig, ConfigError> {
	load_config_with_env(path, |key| std::env::var(key).ok())
}

fn load_config_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<BotfeedConfig, ConfigError> {
	let mut file_cfg = read_toml_if_exists(path)?.unwrap_or_else(|| {
		debug!(path = %path.display(), "no config file; using defaults");
		FileConfig::default()
	});

	apply_env_overrides(&mut file_cfg, &env);

	BotfeedConfig::from_file(file_cfg)
}

/// Bot pipeline config (v1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotfeedConfig {
	pub bot: BotSettings,
	/// Policy for remote calls outside the datafeed loop.
	pub retry: RetryPolicy,
	pub datafeed: DatafeedConfig,
}

/// Service account identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotSettings {
	pub username: Option<String>,
	/// PEM-encoded RSA private key (PKCS#8 or PKCS#1).
	pub private_key_path: Option<PathBuf>,
}

impl BotfeedConfig {
	fn from_file(file: FileConfig) -> Result<Self, ConfigError> {
		let retry = file.retry.to_policy("retry")?;

		// [datafeed.retry] keys fall back to [retry] one by one.
		let datafeed_retry = match file.datafeed.retry {
			Some(section) => FileRetrySettings {
				max_attempts: section.max_attempts.or(file.retry.max_attempts),
				initial_interval_ms: section.initial_interval_ms.or(file.retry.initial_interval_ms),
				multiplier: section.multiplier.or(file.retry.multiplier),
				max_interval_ms: section.max_interval_ms.or(file.retry.max_interval_ms),
			}
			.to_policy("datafeed.retry")?,
			None => retry,
		};

		Ok(Self {
			bot: BotSettings {
				username: file.bot.username.filter(|s| !s.trim().is_empty()),
				private_key_path: file
					.bot
					.private_key_path
					.filter(|s| !s.trim().is_empty())
					.map(PathBuf::from),
			},
			retry,
			datafeed: DatafeedConfig {
				id_file_path: file
					.datafeed
					.id_file_path
					.filter(|s| !s.trim().is_empty())
					.map(PathBuf::from)
					.unwrap_or_else(|| PathBuf::from(".")),
				retry: datafeed_retry,
				persist_required: file.datafeed.persist_required.unwrap_or(false),
			},
		})
	}

	/// RSA authenticator for the configured bot account.
	pub fn rsa_authenticator(&self, exchange: Arc<dyn TokenExchange>) -> Result<RsaBotAuthenticator, ConfigError> {
		let username = self
			.bot
			.username
			.clone()
			.ok_or(ConfigError::MissingBotSetting("username"))?;
		let key_path = self
			.bot
			.private_key_path
			.as_deref()
			.ok_or(ConfigError::MissingBotSetting("private_key_path"))?;

		let signer = RsaJwtSigner::from_pem_file(key_path)?;
		Ok(RsaBotAuthenticator::new(username, Arc::new(signer), exchange))
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	bot: FileBotSettings,

	#[serde(default)]
	retry: FileRetrySettings,

	#[serde(default)]
	datafeed: FileDatafeedSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileBotSettings {
	username: Option<String>,
	private_key_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileRetrySettings {
	max_attempts: Option<u32>,
	initial_interval_ms: Option<u64>,
	multiplier: Option<f64>,
	max_interval_ms: Option<u64>,
}

impl FileRetrySettings {
	fn to_policy(&self, section: &'static str) -> Result<RetryPolicy, ConfigError> {
		RetryPolicy::new(
			self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
			self.initial_interval_ms
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_INITIAL_INTERVAL),
			self.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
			self.max_interval_ms.map(Duration::from_millis).unwrap_or(DEFAULT_MAX_INTERVAL),
		)
		.map_err(|source| ConfigError::InvalidRetry { section, source })
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDatafeedSettings {
	id_file_path: Option<String>,
	persist_required: Option<bool>,
	retry: Option<FileRetrySettings>,
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> Result<Option<FileConfig>, ConfigError> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).map_err(|source| ConfigError::Parse {
				path: path.to_path_buf(),
				source,
			})?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(source) => Err(ConfigError::Read {
			path: path.to_path_buf(),
			source,
		}),
	}
}

fn env_string(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
	env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
	let raw = env_string(env, key)?;
	match raw.parse::<T>() {
		Ok(v) => Some(v),
		Err(_) => {
			warn!(key, value = %raw, "ignoring unparseable env override");
			None
		}
	}
}

fn apply_env_overrides(cfg: &mut FileConfig, env: &impl Fn(&str) -> Option<String>) {
	if let Some(v) = env_string(env, "BOTFEED_BOT_USERNAME") {
		cfg.bot.username = Some(v);
		info!("bot config: username overridden by env");
	}

	if let Some(v) = env_string(env, "BOTFEED_PRIVATE_KEY_PATH") {
		cfg.bot.private_key_path = Some(v);
		info!("bot config: private_key_path overridden by env");
	}

	if let Some(v) = env_string(env, "BOTFEED_DATAFEED_ID_FILE_PATH") {
		cfg.datafeed.id_file_path = Some(v);
		info!("datafeed config: id_file_path overridden by env");
	}

	if let Some(v) = env_string(env, "BOTFEED_DATAFEED_PERSIST_REQUIRED")
		&& let Some(required) = parse_env_bool(&v)
	{
		cfg.datafeed.persist_required = Some(required);
		info!(required, "datafeed config: persist_required overridden by env");
	}

	if let Some(attempts) = env_parsed::<u32>(env, "BOTFEED_RETRY_MAX_ATTEMPTS") {
		cfg.retry.max_attempts = Some(attempts);
		info!(attempts, "retry config: max_attempts overridden by env");
	}

	if let Some(initial_ms) = env_parsed::<u64>(env, "BOTFEED_RETRY_INITIAL_INTERVAL_MS") {
		cfg.retry.initial_interval_ms = Some(initial_ms);
		info!(initial_ms, "retry config: initial_interval_ms overridden by env");
	}

	if let Some(multiplier) = env_parsed::<f64>(env, "BOTFEED_RETRY_MULTIPLIER") {
		cfg.retry.multiplier = Some(multiplier);
		info!(multiplier, "retry config: multiplier overridden by env");
	}

	if let Some(max_ms) = env_parsed::<u64>(env, "BOTFEED_RETRY_MAX_INTERVAL_MS") {
		cfg.retry.max_interval_ms = Some(max_ms);
		info!(max_ms, "retry config: max_interval_ms overridden by env");
	}
}
