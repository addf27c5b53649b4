#![forbid(unsafe_code)]

use std::sync::Arc;

use botfeed_domain::{
	ConnectionAccepted, ConnectionRequested, Decoded, ElementsAction, Event, EventKind, EventPayload, Initiator,
	InstantMessageCreated, MessageSent, MessageSuppressed, RoomCreated, RoomDeactivated, RoomMemberChange,
	RoomReactivated, RoomUpdated, SharedPost, UserRequestedToJoinRoom, WireEvent,
};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A listener handler failed; dispatch of the batch stopped there.
#[derive(Debug, Error)]
#[error("listener failed handling {kind}: {source}")]
pub struct ListenerError {
	pub kind: EventKind,
	#[source]
	pub source: BoxError,
}

/// Application callbacks for datafeed events.
///
/// Every handler defaults to a no-op; implement only the kinds of interest.
/// Handlers run sequentially on the read loop task, so a slow handler delays
/// the next read and an `Err` ends the loop.
#[allow(unused_variables)]
pub trait DatafeedEventListener: Send + Sync + 'static {
	fn on_message_sent(&self, initiator: &Initiator, event: &MessageSent) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_message_suppressed(&self, initiator: &Initiator, event: &MessageSuppressed) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_elements_action(&self, initiator: &Initiator, event: &ElementsAction) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_shared_post(&self, initiator: &Initiator, event: &SharedPost) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_instant_message_created(&self, initiator: &Initiator, event: &InstantMessageCreated) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_room_created(&self, initiator: &Initiator, event: &RoomCreated) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_room_updated(&self, initiator: &Initiator, event: &RoomUpdated) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_room_deactivated(&self, initiator: &Initiator, event: &RoomDeactivated) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_room_reactivated(&self, initiator: &Initiator, event: &RoomReactivated) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_connection_requested(&self, initiator: &Initiator, event: &ConnectionRequested) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_connection_accepted(&self, initiator: &Initiator, event: &ConnectionAccepted) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_room_member_demoted_from_owner(&self, initiator: &Initiator, event: &RoomMemberChange) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_room_member_promoted_to_owner(&self, initiator: &Initiator, event: &RoomMemberChange) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_user_left_room(&self, initiator: &Initiator, event: &RoomMemberChange) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_user_joined_room(&self, initiator: &Initiator, event: &RoomMemberChange) -> anyhow::Result<()> {
		Ok(())
	}

	fn on_user_requested_to_join_room(
		&self,
		initiator: &Initiator,
		event: &UserRequestedToJoinRoom,
	) -> anyhow::Result<()> {
		Ok(())
	}
}

fn deliver(listener: &dyn DatafeedEventListener, event: &Event) -> anyhow::Result<()> {
	let who = &event.initiator;
	match &event.payload {
		EventPayload::MessageSent(p) => listener.on_message_sent(who, p),
		EventPayload::MessageSuppressed(p) => listener.on_message_suppressed(who, p),
		EventPayload::ElementsAction(p) => listener.on_elements_action(who, p),
		EventPayload::SharedPost(p) => listener.on_shared_post(who, p),
		EventPayload::InstantMessageCreated(p) => listener.on_instant_message_created(who, p),
		EventPayload::RoomCreated(p) => listener.on_room_created(who, p),
		EventPayload::RoomUpdated(p) => listener.on_room_updated(who, p),
		EventPayload::RoomDeactivated(p) => listener.on_room_deactivated(who, p),
		EventPayload::RoomReactivated(p) => listener.on_room_reactivated(who, p),
		EventPayload::ConnectionRequested(p) => listener.on_connection_requested(who, p),
		EventPayload::ConnectionAccepted(p) => listener.on_connection_accepted(who, p),
		EventPayload::RoomMemberDemotedFromOwner(p) => listener.on_room_member_demoted_from_owner(who, p),
		EventPayload::RoomMemberPromotedToOwner(p) => listener.on_room_member_promoted_to_owner(who, p),
		EventPayload::UserLeftRoom(p) => listener.on_user_left_room(who, p),
		EventPayload::UserJoinedRoom(p) => listener.on_user_joined_room(who, p),
		EventPayload::UserRequestedToJoinRoom(p) => listener.on_user_requested_to_join_room(who, p),
	}
}

/// Subscribed listeners, compared by `Arc` identity.
#[derive(Default)]
pub struct ListenerRegistry {
	listeners: RwLock<Vec<Arc<dyn DatafeedEventListener>>>,
}

impl ListenerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, listener: Arc<dyn DatafeedEventListener>) {
		self.listeners.write().push(listener);
	}

	/// Returns `false` when `listener` was not subscribed.
	pub fn unsubscribe(&self, listener: &Arc<dyn DatafeedEventListener>) -> bool {
		let mut listeners = self.listeners.write();
		let before = listeners.len();
		listeners.retain(|l| !Arc::ptr_eq(l, listener));
		listeners.len() != before
	}

	pub fn len(&self) -> usize {
		self.listeners.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.listeners.read().is_empty()
	}

	/// Deliver one decoded event to every listener, in subscription order.
	pub fn dispatch(&self, event: &Event) -> Result<(), ListenerError> {
		let snapshot = self.listeners.read().clone();
		for listener in snapshot {
			deliver(listener.as_ref(), event).map_err(|e| ListenerError {
				kind: event.kind(),
				source: e.into(),
			})?;
		}
		metrics::counter!("botfeed_events_dispatched_total").increment(1);
		Ok(())
	}

	/// Decode and dispatch a read batch in order. Returns how many events reached listeners.
	///
	/// `null` entries and untyped placeholders are skipped silently, unknown and malformed events are
	/// dropped with a log entry, and events initiated by `skip_initiator` are
	/// skipped. The first listener error aborts the rest of the batch.
	pub fn dispatch_batch(
		&self,
		batch: Vec<Option<WireEvent>>,
		skip_initiator: Option<i64>,
	) -> Result<usize, ListenerError> {
		let mut dispatched = 0;
		for wire in batch.into_iter().flatten() {
			let event = match wire.decode() {
				Decoded::Event(event) => event,
				Decoded::Empty => continue,
				Decoded::Unknown(tag) => {
					metrics::counter!("botfeed_events_dropped_total").increment(1);
					warn!(event_type = %tag, "dropping event of unknown type");
					continue;
				}
				Decoded::Malformed { kind, reason } => {
					metrics::counter!("botfeed_events_dropped_total").increment(1);
					warn!(%kind, %reason, "dropping malformed event");
					continue;
				}
			};

			if let Some(bot_id) = skip_initiator
				&& event.initiator.user_id() == Some(bot_id)
			{
				debug!(kind = %event.kind(), "skipping self-generated event");
				continue;
			}

			self.dispatch(&event)?;
			dispatched += 1;
		}
		Ok(dispatched)
	}
}

impl std::fmt::Debug for ListenerRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ListenerRegistry").field("listeners", &self.len()).finish()
	}
}
