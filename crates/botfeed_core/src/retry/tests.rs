#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::watch;
use tokio::time::Instant;

use super::*;
use crate::api::{ApiError, FailureClass};

fn policy(max_attempts: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> RetryPolicy {
	RetryPolicy::new(
		max_attempts,
		Duration::from_millis(initial_ms),
		multiplier,
		Duration::from_millis(max_ms),
	)
	.expect("valid policy")
}

fn counting_strategy(
	name: &'static str,
	class: FailureClass,
	runs: Arc<AtomicUsize>,
	outcome: Result<(), ApiError>,
) -> RecoveryStrategy<ApiError> {
	RecoveryStrategy::new(
		name,
		move |e: &ApiError| e.class() == class,
		move || {
			let runs = Arc::clone(&runs);
			let outcome = outcome.clone();
			async move {
				runs.fetch_add(1, Ordering::SeqCst);
				outcome
			}
		},
	)
}

fn not_client_error(e: &ApiError) -> bool {
	e.class() != FailureClass::ClientError
}

#[test]
fn default_policy_matches_documented_values() {
	let p = RetryPolicy::default();
	assert_eq!(p.max_attempts(), 10);
	assert_eq!(p.initial_interval(), Duration::from_millis(500));
	assert_eq!(p.multiplier(), 2.0);
	assert_eq!(p.max_interval(), Duration::from_secs(300));
}

#[test]
fn policy_rejects_invalid_parameters() {
	let ms = Duration::from_millis;
	assert_eq!(RetryPolicy::new(0, ms(1), 2.0, ms(2)), Err(RetryPolicyError::ZeroAttempts));
	assert!(matches!(
		RetryPolicy::new(3, ms(1), 0.5, ms(2)),
		Err(RetryPolicyError::MultiplierBelowOne(_))
	));
	assert!(matches!(
		RetryPolicy::new(3, ms(1), f64::NAN, ms(2)),
		Err(RetryPolicyError::MultiplierBelowOne(_))
	));
	assert!(matches!(
		RetryPolicy::new(3, ms(10), 2.0, ms(5)),
		Err(RetryPolicyError::MaxBelowInitial { .. })
	));
	assert!(RetryPolicy::new(1, ms(0), 1.0, ms(0)).is_ok());
}

#[test]
fn interval_grows_then_caps() {
	let p = policy(10, 100, 2.0, 1_000);
	let got: Vec<u64> = (0..6).map(|n| p.interval(n).as_millis() as u64).collect();
	assert_eq!(got, vec![100, 200, 400, 800, 1_000, 1_000]);
	assert_eq!(p.interval(u32::MAX), Duration::from_millis(1_000));
}

proptest! {
	#[test]
	fn interval_is_monotonic_and_bounded(
		initial in 0u64..10_000,
		extra in 0u64..100_000,
		multiplier in 1.0f64..8.0,
		attempt in 0u32..64,
	) {
		let p = policy(5, initial, multiplier, initial + extra);
		let cur = p.interval(attempt);
		let next = p.interval(attempt + 1);
		prop_assert!(cur <= p.max_interval());
		prop_assert!(cur >= p.initial_interval().min(p.max_interval()));
		prop_assert!(next + Duration::from_millis(1) >= cur);
	}
}

#[tokio::test(start_paused = true)]
async fn always_failing_operation_is_bounded_by_max_attempts() {
	let calls = AtomicUsize::new(0);
	let executor = RetryWithRecovery::<ApiError>::new("bounded", policy(3, 100, 2.0, 1_000));

	let started = Instant::now();
	let err = executor
		.execute(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err::<(), _>(ApiError::status(503, "unavailable")) }
		})
		.await
		.expect_err("retries should be exhausted");
	let elapsed = started.elapsed();

	assert_eq!(calls.load(Ordering::SeqCst), 3);
	assert_eq!(err.code(), Some(503));
	assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
	assert!(elapsed < Duration::from_millis(700), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn unauthorized_recovery_runs_before_each_retry() {
	let calls = AtomicUsize::new(0);
	let refreshes = Arc::new(AtomicUsize::new(0));
	let executor = RetryWithRecovery::new("recover", policy(5, 10, 2.0, 100))
		.retry_if(not_client_error)
		.with_strategy(counting_strategy(
			"refresh",
			FailureClass::Unauthorized,
			refreshes.clone(),
			Ok(()),
		));

	let value = executor
		.execute(|| {
			let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
			async move {
				if n < 3 {
					Err(ApiError::unauthorized("expired"))
				} else {
					Ok("done")
				}
			}
		})
		.await
		.expect("third attempt succeeds");

	assert_eq!(value, "done");
	assert_eq!(calls.load(Ordering::SeqCst), 3);
	assert_eq!(refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn client_error_is_not_retried() {
	let calls = AtomicUsize::new(0);
	let executor = RetryWithRecovery::<ApiError>::new("terminal", policy(5, 10, 2.0, 100)).retry_if(not_client_error);

	let err = executor
		.execute(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err::<(), _>(ApiError::status(400, "bad feed id")) }
		})
		.await
		.expect_err("client error is terminal");

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(err.class(), FailureClass::ClientError);
}

#[tokio::test(start_paused = true)]
async fn single_attempt_policy_still_runs_strategies_once() {
	let calls = AtomicUsize::new(0);
	let refreshes = Arc::new(AtomicUsize::new(0));
	let executor = RetryWithRecovery::new("once", policy(1, 10, 2.0, 100)).with_strategy(counting_strategy(
		"refresh",
		FailureClass::Unauthorized,
		refreshes.clone(),
		Ok(()),
	));

	executor
		.execute(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err::<(), _>(ApiError::unauthorized("expired")) }
		})
		.await
		.expect_err("no retries with max_attempts = 1");

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn every_matching_strategy_runs_in_registration_order() {
	let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
	let push = |label: &'static str| {
		let order = Arc::clone(&order);
		RecoveryStrategy::new(
			label,
			|e: &ApiError| e.class() == FailureClass::Transient,
			move || {
				let order = Arc::clone(&order);
				async move {
					order.lock().push(label);
					Ok(())
				}
			},
		)
	};
	let executor = RetryWithRecovery::new("ordered", policy(2, 10, 2.0, 100))
		.with_strategy(push("first"))
		.with_strategy(counting_strategy(
			"unmatched",
			FailureClass::Unauthorized,
			Arc::new(AtomicUsize::new(0)),
			Ok(()),
		))
		.with_strategy(push("second"));

	executor
		.execute(|| async { Err::<(), _>(ApiError::Transport("reset".into())) })
		.await
		.expect_err("exhausted");

	assert_eq!(*order.lock(), vec!["first", "second", "first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn failing_recovery_action_is_terminal() {
	let calls = AtomicUsize::new(0);
	let runs = Arc::new(AtomicUsize::new(0));
	let executor = RetryWithRecovery::new("broken-recovery", policy(5, 10, 2.0, 100)).with_strategy(
		counting_strategy(
			"refresh",
			FailureClass::Unauthorized,
			runs.clone(),
			Err(ApiError::status(500, "idp down")),
		),
	);

	let err = executor
		.execute(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err::<(), _>(ApiError::unauthorized("expired")) }
		})
		.await
		.expect_err("recovery failure surfaces");

	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert_eq!(runs.load(Ordering::SeqCst), 1);
	assert_eq!(err.code(), Some(500));
}

#[tokio::test(start_paused = true)]
async fn stop_signal_cuts_backoff_short() {
	let (stop_tx, stop_rx) = watch::channel(false);
	let calls = Arc::new(AtomicUsize::new(0));
	let executor = RetryWithRecovery::<ApiError>::new("stoppable", policy(10, 60_000, 2.0, 60_000)).with_stop_signal(stop_rx);

	let task = {
		let calls = Arc::clone(&calls);
		tokio::spawn(async move {
			executor
				.execute(|| {
					calls.fetch_add(1, Ordering::SeqCst);
					async { Err::<(), _>(ApiError::status(502, "bad gateway")) }
				})
				.await
		})
	};

	tokio::time::sleep(Duration::from_millis(10)).await;
	let started = Instant::now();
	stop_tx.send_replace(true);

	let err = task.await.expect("task").expect_err("last failure is returned");
	assert_eq!(err.code(), Some(502));
	assert_eq!(calls.load(Ordering::SeqCst), 1);
	assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn already_stopped_signal_skips_retries() {
	let (_stop_tx, stop_rx) = watch::channel(true);
	let calls = AtomicUsize::new(0);
	let executor = RetryWithRecovery::<ApiError>::new("stopped", policy(10, 10, 2.0, 100)).with_stop_signal(stop_rx);

	executor
		.execute(|| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Err::<(), _>(ApiError::Transport("reset".into())) }
		})
		.await
		.expect_err("stopped");

	assert_eq!(calls.load(Ordering::SeqCst), 1);
}
