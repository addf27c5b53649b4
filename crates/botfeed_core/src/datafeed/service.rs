#![forbid(unsafe_code)]

use std::sync::Arc;

use botfeed_domain::WireEvent;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{DatafeedConfig, DatafeedEventListener, FeedError, FeedIdStore, ListenerRegistry, ServiceState};
use crate::api::{ApiError, DatafeedApi, SessionApi};
use crate::auth::{AuthSession, SessionTokens};
use crate::retry::{RecoveryStrategy, RetryWithRecovery};

/// Shared lifecycle state: the current [`ServiceState`] and the stop flag.
struct Lifecycle {
	state: Mutex<ServiceState>,
	stop_tx: watch::Sender<bool>,
}

impl Lifecycle {
	fn new() -> Self {
		let (stop_tx, _) = watch::channel(false);
		Self {
			state: Mutex::new(ServiceState::Idle),
			stop_tx,
		}
	}

	fn state(&self) -> ServiceState {
		*self.state.lock()
	}

	/// Idle -> Starting. Only one run may hold a [`RunGuard`] at a time.
	fn begin(self: &Arc<Self>) -> Result<RunGuard, FeedError> {
		let mut state = self.state.lock();
		if *state != ServiceState::Idle {
			return Err(FeedError::AlreadyStarted(*state));
		}
		*state = ServiceState::Starting;
		self.stop_tx.send_replace(false);
		Ok(RunGuard(Arc::clone(self)))
	}

	/// Starting -> Running, unless a stop arrived during startup.
	fn enter_running(&self) -> bool {
		let mut state = self.state.lock();
		if *self.stop_tx.borrow() {
			return false;
		}
		*state = ServiceState::Running;
		true
	}

	fn stop(&self) {
		let mut state = self.state.lock();
		match *state {
			ServiceState::Idle | ServiceState::Stopping => {}
			ServiceState::Starting => {
				self.stop_tx.send_replace(true);
			}
			ServiceState::Running => {
				*state = ServiceState::Stopping;
				self.stop_tx.send_replace(true);
			}
		}
	}

	fn stop_requested(&self) -> bool {
		*self.stop_tx.borrow()
	}
}

/// Returns the service to Idle when a run ends, however it ends.
struct RunGuard(Arc<Lifecycle>);

impl Drop for RunGuard {
	fn drop(&mut self) {
		*self.0.state.lock() = ServiceState::Idle;
	}
}

/// Cloneable handle that stops a running [`DatafeedService`].
#[derive(Clone)]
pub struct StopHandle(Arc<Lifecycle>);

impl StopHandle {
	/// Request a cooperative stop. No-op while idle or already stopping.
	pub fn stop(&self) {
		self.0.stop();
	}

	pub fn state(&self) -> ServiceState {
		self.0.state()
	}
}

impl std::fmt::Debug for StopHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("StopHandle").field(&self.state()).finish()
	}
}

/// Long-poll datafeed loop.
///
/// `start` resolves the bot id, resumes the cached feed or creates a new one,
/// then reads and dispatches batches until [`DatafeedService::stop`] is called
/// or a terminal error occurs. Every remote call goes through a
/// [`RetryWithRecovery`] that refreshes the session on 401, backs off on
/// transient failures and gives up on other client errors.
pub struct DatafeedService {
	datafeed_api: Arc<dyn DatafeedApi>,
	session_api: Arc<dyn SessionApi>,
	auth: Arc<AuthSession>,
	config: DatafeedConfig,
	store: FeedIdStore,
	listeners: ListenerRegistry,
	lifecycle: Arc<Lifecycle>,
	bot_id: Mutex<Option<i64>>,
	feed_id: Mutex<Option<String>>,
}

impl DatafeedService {
	pub fn new(
		datafeed_api: Arc<dyn DatafeedApi>,
		session_api: Arc<dyn SessionApi>,
		auth: Arc<AuthSession>,
		config: DatafeedConfig,
	) -> Self {
		let store = FeedIdStore::new(config.id_file_path.clone());
		Self {
			datafeed_api,
			session_api,
			auth,
			config,
			store,
			listeners: ListenerRegistry::new(),
			lifecycle: Arc::new(Lifecycle::new()),
			bot_id: Mutex::new(None),
			feed_id: Mutex::new(None),
		}
	}

	pub fn subscribe(&self, listener: Arc<dyn DatafeedEventListener>) {
		self.listeners.subscribe(listener);
	}

	pub fn unsubscribe(&self, listener: &Arc<dyn DatafeedEventListener>) -> bool {
		self.listeners.unsubscribe(listener)
	}

	pub fn state(&self) -> ServiceState {
		self.lifecycle.state()
	}

	pub fn stop_handle(&self) -> StopHandle {
		StopHandle(Arc::clone(&self.lifecycle))
	}

	/// Request a cooperative stop. An in-flight read completes first.
	pub fn stop(&self) {
		info!(state = %self.state(), "datafeed stop requested");
		self.lifecycle.stop();
	}

	/// Bot user id resolved by the last start.
	pub fn bot_id(&self) -> Option<i64> {
		*self.bot_id.lock()
	}

	/// Feed currently being read.
	pub fn feed_id(&self) -> Option<String> {
		self.feed_id.lock().clone()
	}

	pub fn id_store(&self) -> &FeedIdStore {
		&self.store
	}

	/// Run the datafeed on the calling task until stopped or a terminal error.
	///
	/// Fails with [`FeedError::AlreadyStarted`] when a run is in progress.
	pub async fn start(&self) -> Result<(), FeedError> {
		let guard = self.lifecycle.begin()?;
		self.drive(guard).await
	}

	/// Run the datafeed on a dedicated task; the handle yields the terminal result.
	///
	/// The service leaves Idle before this returns, so a following `stop()` is
	/// never lost.
	pub fn spawn(self: &Arc<Self>) -> JoinHandle<Result<(), FeedError>> {
		let guard = self.lifecycle.begin();
		let this = Arc::clone(self);
		tokio::spawn(async move {
			match guard {
				Ok(guard) => this.drive(guard).await,
				Err(e) => Err(e),
			}
		})
	}

	async fn drive(&self, _guard: RunGuard) -> Result<(), FeedError> {
		let span = info_span!("datafeed", run_id = %uuid::Uuid::new_v4());
		let result = self.run().instrument(span.clone()).await;

		span.in_scope(|| match result {
			// A backoff interrupted by stop surfaces the last remote failure.
			Err(FeedError::Api(e)) if self.lifecycle.stop_requested() => {
				debug!(error = %e, "datafeed stopped while retrying");
				info!("datafeed stopped");
				Ok(())
			}
			Err(e) => {
				error!(error = %e, "datafeed terminated");
				Err(e)
			}
			Ok(()) => {
				info!("datafeed stopped");
				Ok(())
			}
		})
	}

	async fn run(&self) -> Result<(), FeedError> {
		let bot_id = self.resolve_bot_id().await?;
		*self.bot_id.lock() = Some(bot_id);

		let (mut feed_id, mut resumed) = match self.store.load() {
			Some(id) => {
				info!(feed_id = %id, "resuming cached datafeed");
				(id, true)
			}
			None => (self.create_feed().await?, false),
		};
		*self.feed_id.lock() = Some(feed_id.clone());

		if !self.lifecycle.enter_running() {
			debug!("stop requested during startup");
			return Ok(());
		}
		info!(feed_id = %feed_id, bot_id, "datafeed running");

		while !self.lifecycle.stop_requested() {
			let batch = match self.read_feed(&feed_id).await {
				Ok(batch) => batch,
				Err(e) if self.lifecycle.stop_requested() => {
					debug!(error = %e, "read failed after stop request");
					break;
				}
				Err(e) if resumed && e.is_client_error() => {
					warn!(feed_id = %feed_id, error = %e, "cached datafeed rejected; creating a new one");
					if let Err(e) = self.store.clear() {
						warn!(error = %e, "failed to clear stale datafeed id");
					}
					feed_id = self.create_feed().await?;
					*self.feed_id.lock() = Some(feed_id.clone());
					resumed = false;
					continue;
				}
				Err(e) => return Err(e),
			};
			resumed = false;

			if batch.is_empty() {
				continue;
			}
			let dispatched = self.listeners.dispatch_batch(batch, Some(bot_id))?;
			debug!(feed_id = %feed_id, dispatched, "datafeed batch dispatched");
		}

		Ok(())
	}

	fn executor(&self, name: &str) -> RetryWithRecovery<FeedError> {
		let auth = Arc::clone(&self.auth);
		RetryWithRecovery::new(name, self.config.retry)
			.retry_if(FeedError::is_retryable)
			.with_strategy(RecoveryStrategy::new("refresh-session", FeedError::is_unauthorized, move || {
				let auth = Arc::clone(&auth);
				async move { auth.refresh().await.map_err(FeedError::from) }
			}))
			.with_stop_signal(self.lifecycle.stop_tx.subscribe())
	}

	fn tokens(&self) -> Result<SessionTokens, FeedError> {
		self.auth
			.tokens()
			.ok_or_else(|| ApiError::unauthorized("session not authenticated").into())
	}

	async fn resolve_bot_id(&self) -> Result<i64, FeedError> {
		let info = self
			.executor("session_info")
			.execute(|| async move {
				let tokens = self.tokens()?;
				Ok::<_, FeedError>(self.session_api.session_info(tokens.session().expose()).await?)
			})
			.await?;
		debug!(bot_id = info.id, username = ?info.username, "bot identity resolved");
		Ok(info.id)
	}

	async fn create_feed(&self) -> Result<String, FeedError> {
		let feed = self
			.executor("create_datafeed")
			.execute(|| async move {
				let tokens = self.tokens()?;
				Ok::<_, FeedError>(self
					.datafeed_api
					.create_datafeed(tokens.session().expose(), tokens.key_manager().expose())
					.await?)
			})
			.await?;
		info!(feed_id = %feed.id, "datafeed created");

		if let Err(e) = self.store.save(&feed.id) {
			if self.config.persist_required {
				return Err(FeedError::Persist(e));
			}
			warn!(path = %self.store.file_path().display(), error = %e, "unable to persist datafeed id");
		}
		Ok(feed.id)
	}

	async fn read_feed(&self, feed_id: &str) -> Result<Vec<Option<WireEvent>>, FeedError> {
		self.executor("read_datafeed")
			.execute(|| async move {
				metrics::counter!("botfeed_datafeed_reads_total").increment(1);
				let tokens = self.tokens()?;
				Ok::<_, FeedError>(self
					.datafeed_api
					.read_datafeed(feed_id, tokens.session().expose(), tokens.key_manager().expose())
					.await?)
			})
			.await
	}
}

impl std::fmt::Debug for DatafeedService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DatafeedService")
			.field("state", &self.state())
			.field("feed_id", &self.feed_id())
			.field("listeners", &self.listeners)
			.finish_non_exhaustive()
	}
}
