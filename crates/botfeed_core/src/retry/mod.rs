#![forbid(unsafe_code)]

#[cfg(test)]
mod tests;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::BoxFuture;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(300);

/// Rejected retry policy parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryPolicyError {
	#[error("max_attempts must be at least 1")]
	ZeroAttempts,
	#[error("multiplier must be >= 1 (got {0})")]
	MultiplierBelowOne(f64),
	#[error("max_interval ({max:?}) must be >= initial_interval ({initial:?})")]
	MaxBelowInitial { initial: Duration, max: Duration },
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
	max_attempts: u32,
	initial_interval: Duration,
	multiplier: f64,
	max_interval: Duration,
}

impl RetryPolicy {
	pub fn new(
		max_attempts: u32,
		initial_interval: Duration,
		multiplier: f64,
		max_interval: Duration,
	) -> Result<Self, RetryPolicyError> {
		if max_attempts == 0 {
			return Err(RetryPolicyError::ZeroAttempts);
		}
		// NaN fails this check too.
		if !(multiplier >= 1.0) {
			return Err(RetryPolicyError::MultiplierBelowOne(multiplier));
		}
		if max_interval < initial_interval {
			return Err(RetryPolicyError::MaxBelowInitial {
				initial: initial_interval,
				max: max_interval,
			});
		}

		Ok(Self {
			max_attempts,
			initial_interval,
			multiplier,
			max_interval,
		})
	}

	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	pub fn initial_interval(&self) -> Duration {
		self.initial_interval
	}

	pub fn multiplier(&self) -> f64 {
		self.multiplier
	}

	pub fn max_interval(&self) -> Duration {
		self.max_interval
	}

	/// Delay after the failed attempt `attempt` (0-indexed):
	/// `min(initial * multiplier^attempt, max)`.
	pub fn interval(&self, attempt: u32) -> Duration {
		let initial_ms = self.initial_interval.as_millis() as f64;
		let max_ms = self.max_interval.as_millis() as f64;
		let exp = attempt.min(i32::MAX as u32) as i32;
		let scaled = initial_ms * self.multiplier.powi(exp);
		let ms = if scaled.is_finite() { scaled.min(max_ms) } else { max_ms };
		Duration::from_millis(ms.round() as u64)
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			initial_interval: DEFAULT_INITIAL_INTERVAL,
			multiplier: DEFAULT_MULTIPLIER,
			max_interval: DEFAULT_MAX_INTERVAL,
		}
	}
}

type Condition<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;
type Action<E> = Box<dyn Fn() -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

/// Corrective action run before a failed operation is retried.
pub struct RecoveryStrategy<E> {
	name: &'static str,
	condition: Condition<E>,
	action: Action<E>,
}

impl<E> RecoveryStrategy<E> {
	pub fn new<C, A, Fut>(name: &'static str, condition: C, action: A) -> Self
	where
		C: Fn(&E) -> bool + Send + Sync + 'static,
		A: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), E>> + Send + 'static,
	{
		Self {
			name,
			condition: Box::new(condition),
			action: Box::new(move || Box::pin(action()) as BoxFuture<'static, Result<(), E>>),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn matches(&self, err: &E) -> bool {
		(self.condition)(err)
	}

	pub async fn recover(&self) -> Result<(), E> {
		(self.action)().await
	}
}

impl<E> fmt::Debug for RecoveryStrategy<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RecoveryStrategy").field("name", &self.name).finish_non_exhaustive()
	}
}

/// Runs a remote operation under a [`RetryPolicy`], applying every matching
/// [`RecoveryStrategy`] after each failure.
///
/// Per attempt: run the operation; on failure run the matching strategies in
/// registration order (a failing strategy ends the call with its error), then
/// give up if the error is not retryable or the attempt budget is spent,
/// otherwise back off and try the same operation again.
pub struct RetryWithRecovery<E> {
	name: String,
	policy: RetryPolicy,
	retry_if: Condition<E>,
	strategies: Vec<RecoveryStrategy<E>>,
	stop: Option<watch::Receiver<bool>>,
}

impl<E: fmt::Display> RetryWithRecovery<E> {
	pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
		Self {
			name: name.into(),
			policy,
			retry_if: Box::new(|_| true),
			strategies: Vec::new(),
			stop: None,
		}
	}

	/// Only errors matching `predicate` are retried; others end the call after recovery.
	pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
		self.retry_if = Box::new(predicate);
		self
	}

	pub fn with_strategy(mut self, strategy: RecoveryStrategy<E>) -> Self {
		self.strategies.push(strategy);
		self
	}

	/// Abandon pending backoffs once the watched flag turns `true`.
	pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
		self.stop = Some(stop);
		self
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Execute `operation` until it succeeds or a terminal condition is met.
	///
	/// When a stop signal fires before or during a backoff, the last failure is
	/// returned without a further attempt.
	pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, E>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let mut attempt: u32 = 0;
		loop {
			metrics::counter!("botfeed_retry_attempts_total").increment(1);

			let err = match operation().await {
				Ok(v) => return Ok(v),
				Err(e) => e,
			};
			debug!(retry = %self.name, attempt, error = %err, "operation failed");

			self.recover(&err).await?;

			if !(self.retry_if)(&err) {
				debug!(retry = %self.name, error = %err, "error is not retryable");
				return Err(err);
			}

			if attempt.saturating_add(1) >= self.policy.max_attempts {
				warn!(retry = %self.name, attempts = attempt + 1, error = %err, "retries exhausted");
				return Err(err);
			}

			let delay = self.policy.interval(attempt);
			info!(retry = %self.name, delay_ms = delay.as_millis() as u64, "retry in {:.1} secs...", delay.as_secs_f64());
			if !self.backoff(delay).await {
				debug!(retry = %self.name, "stop requested; abandoning retries");
				return Err(err);
			}

			attempt += 1;
		}
	}

	async fn recover(&self, err: &E) -> Result<(), E> {
		let mut triggered = false;
		for strategy in self.strategies.iter().filter(|s| s.matches(err)) {
			triggered = true;
			metrics::counter!("botfeed_recovery_actions_total").increment(1);
			debug!(retry = %self.name, strategy = strategy.name(), "running recovery strategy");
			strategy.recover().await?;
		}

		if !triggered {
			warn!(retry = %self.name, error = %err, "no recovery strategy matched");
		}
		Ok(())
	}

	/// Sleep for `delay`; `false` when interrupted by the stop signal.
	async fn backoff(&self, delay: Duration) -> bool {
		let Some(mut stop) = self.stop.clone() else {
			sleep(delay).await;
			return true;
		};

		if *stop.borrow_and_update() {
			return false;
		}

		tokio::select! {
			_ = sleep(delay) => true,
			Ok(_) = stop.wait_for(|stopped| *stopped) => false,
		}
	}
}

impl<E> fmt::Debug for RetryWithRecovery<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RetryWithRecovery")
			.field("name", &self.name)
			.field("policy", &self.policy)
			.field("strategies", &self.strategies)
			.finish_non_exhaustive()
	}
}
