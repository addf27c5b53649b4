#![forbid(unsafe_code)]

mod payloads;

use core::fmt;
use core::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use payloads::{
	ConnectionAccepted, ConnectionRequested, ElementsAction, InstantMessageCreated, Message, MessageSent,
	MessageSuppressed, RoomCreated, RoomDeactivated, RoomMemberChange, RoomProperties, RoomReactivated, RoomUpdated,
	SharedPost, Stream, User, UserRequestedToJoinRoom,
};

/// Recognized datafeed event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
	MessageSent,
	MessageSuppressed,
	ElementsAction,
	SharedPost,
	InstantMessageCreated,
	RoomCreated,
	RoomUpdated,
	RoomDeactivated,
	RoomReactivated,
	ConnectionRequested,
	ConnectionAccepted,
	RoomMemberDemotedFromOwner,
	RoomMemberPromotedToOwner,
	UserLeftRoom,
	UserJoinedRoom,
	UserRequestedToJoinRoom,
}

impl EventKind {
	pub const ALL: [EventKind; 16] = [
		EventKind::MessageSent,
		EventKind::MessageSuppressed,
		EventKind::ElementsAction,
		EventKind::SharedPost,
		EventKind::InstantMessageCreated,
		EventKind::RoomCreated,
		EventKind::RoomUpdated,
		EventKind::RoomDeactivated,
		EventKind::RoomReactivated,
		EventKind::ConnectionRequested,
		EventKind::ConnectionAccepted,
		EventKind::RoomMemberDemotedFromOwner,
		EventKind::RoomMemberPromotedToOwner,
		EventKind::UserLeftRoom,
		EventKind::UserJoinedRoom,
		EventKind::UserRequestedToJoinRoom,
	];

	/// Wire `type` tag.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::MessageSent => "MESSAGESENT",
			EventKind::MessageSuppressed => "MESSAGESUPPRESSED",
			EventKind::ElementsAction => "SYMPHONYELEMENTSACTION",
			EventKind::SharedPost => "SHAREDPOST",
			EventKind::InstantMessageCreated => "INSTANTMESSAGECREATED",
			EventKind::RoomCreated => "ROOMCREATED",
			EventKind::RoomUpdated => "ROOMUPDATED",
			EventKind::RoomDeactivated => "ROOMDEACTIVATED",
			EventKind::RoomReactivated => "ROOMREACTIVATED",
			EventKind::ConnectionRequested => "CONNECTIONREQUESTED",
			EventKind::ConnectionAccepted => "CONNECTIONACCEPTED",
			EventKind::RoomMemberDemotedFromOwner => "ROOMMEMBERDEMOTEDFROMOWNER",
			EventKind::RoomMemberPromotedToOwner => "ROOMMEMBERPROMOTEDTOOWNER",
			EventKind::UserLeftRoom => "USERLEFTROOM",
			EventKind::UserJoinedRoom => "USERJOINEDROOM",
			EventKind::UserRequestedToJoinRoom => "USERREQUESTEDTOJOINROOM",
		}
	}

	/// Key of the kind-specific object inside the wire `payload`.
	pub const fn payload_key(self) -> &'static str {
		match self {
			EventKind::MessageSent => "messageSent",
			EventKind::MessageSuppressed => "messageSuppressed",
			EventKind::ElementsAction => "symphonyElementsAction",
			EventKind::SharedPost => "sharedPost",
			EventKind::InstantMessageCreated => "instantMessageCreated",
			EventKind::RoomCreated => "roomCreated",
			EventKind::RoomUpdated => "roomUpdated",
			EventKind::RoomDeactivated => "roomDeactivated",
			EventKind::RoomReactivated => "roomReactivated",
			EventKind::ConnectionRequested => "connectionRequested",
			EventKind::ConnectionAccepted => "connectionAccepted",
			EventKind::RoomMemberDemotedFromOwner => "roomMemberDemotedFromOwner",
			EventKind::RoomMemberPromotedToOwner => "roomMemberPromotedToOwner",
			EventKind::UserLeftRoom => "userLeftRoom",
			EventKind::UserJoinedRoom => "userJoinedRoom",
			EventKind::UserRequestedToJoinRoom => "userRequestedToJoinRoom",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing an event kind tag.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseKindError {
	#[error("empty event type")]
	Empty,
	#[error("unknown event type: {0}")]
	Unknown(String),
}

impl FromStr for EventKind {
	type Err = ParseKindError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseKindError::Empty);
		}

		EventKind::ALL
			.into_iter()
			.find(|k| k.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| ParseKindError::Unknown(s.to_string()))
	}
}

/// User who triggered an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Initiator {
	pub user: Option<User>,
}

impl Initiator {
	pub fn user_id(&self) -> Option<i64> {
		self.user.as_ref().and_then(|u| u.user_id)
	}
}

/// Event exactly as returned by a feed read, before routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WireEvent {
	pub id: Option<String>,
	pub message_id: Option<String>,
	pub timestamp: Option<i64>,
	#[serde(rename = "type")]
	pub event_type: Option<String>,
	pub initiator: Option<Initiator>,
	pub payload: Option<serde_json::Value>,
}

impl WireEvent {
	/// Build a wire event of `kind` carrying `payload` under the kind's payload key.
	pub fn new<P: Serialize>(kind: EventKind, payload: &P) -> Result<Self, serde_json::Error> {
		let mut obj = serde_json::Map::new();
		obj.insert(kind.payload_key().to_string(), serde_json::to_value(payload)?);
		Ok(Self {
			event_type: Some(kind.as_str().to_string()),
			payload: Some(serde_json::Value::Object(obj)),
			..Self::default()
		})
	}

	pub fn with_initiator(mut self, user_id: i64) -> Self {
		self.initiator = Some(Initiator {
			user: Some(User {
				user_id: Some(user_id),
				..User::default()
			}),
		});
		self
	}

	/// Resolve the kind tag and decode the kind-specific payload.
	pub fn decode(self) -> Decoded {
		let raw_type = self.event_type.clone().unwrap_or_default();
		let kind = match raw_type.parse::<EventKind>() {
			Ok(k) => k,
			Err(ParseKindError::Empty) => return Decoded::Empty,
			Err(ParseKindError::Unknown(_)) => return Decoded::Unknown(raw_type),
		};

		let section = self.payload.as_ref().and_then(|p| p.get(kind.payload_key()));
		let payload = match EventPayload::from_section(kind, section) {
			Ok(p) => p,
			Err(e) => {
				return Decoded::Malformed {
					kind,
					reason: e.to_string(),
				};
			}
		};

		Decoded::Event(Event {
			id: self.id,
			timestamp: self.timestamp,
			initiator: self.initiator.unwrap_or_default(),
			payload,
		})
	}
}

/// Outcome of decoding a [`WireEvent`].
#[derive(Debug, Clone)]
pub enum Decoded {
	Event(Event),

	/// Placeholder entry with no `type` tag.
	Empty,

	/// The `type` tag is not one of [`EventKind::ALL`].
	Unknown(String),

	/// Recognized kind whose payload section failed to deserialize.
	Malformed { kind: EventKind, reason: String },
}

/// Decoded, typed datafeed event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
	pub id: Option<String>,
	pub timestamp: Option<i64>,
	pub initiator: Initiator,
	pub payload: EventPayload,
}

impl Event {
	pub fn kind(&self) -> EventKind {
		self.payload.kind()
	}
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
	MessageSent(MessageSent),
	MessageSuppressed(MessageSuppressed),
	ElementsAction(ElementsAction),
	SharedPost(SharedPost),
	InstantMessageCreated(InstantMessageCreated),
	RoomCreated(RoomCreated),
	RoomUpdated(RoomUpdated),
	RoomDeactivated(RoomDeactivated),
	RoomReactivated(RoomReactivated),
	ConnectionRequested(ConnectionRequested),
	ConnectionAccepted(ConnectionAccepted),
	RoomMemberDemotedFromOwner(RoomMemberChange),
	RoomMemberPromotedToOwner(RoomMemberChange),
	UserLeftRoom(RoomMemberChange),
	UserJoinedRoom(RoomMemberChange),
	UserRequestedToJoinRoom(UserRequestedToJoinRoom),
}

fn section<T: DeserializeOwned + Default>(value: Option<&serde_json::Value>) -> Result<T, serde_json::Error> {
	match value {
		None | Some(serde_json::Value::Null) => Ok(T::default()),
		Some(v) => T::deserialize(v),
	}
}

impl EventPayload {
	/// Decode the payload section for `kind`; a missing section yields an empty payload.
	pub fn from_section(kind: EventKind, value: Option<&serde_json::Value>) -> Result<Self, serde_json::Error> {
		Ok(match kind {
			EventKind::MessageSent => Self::MessageSent(section(value)?),
			EventKind::MessageSuppressed => Self::MessageSuppressed(section(value)?),
			EventKind::ElementsAction => Self::ElementsAction(section(value)?),
			EventKind::SharedPost => Self::SharedPost(section(value)?),
			EventKind::InstantMessageCreated => Self::InstantMessageCreated(section(value)?),
			EventKind::RoomCreated => Self::RoomCreated(section(value)?),
			EventKind::RoomUpdated => Self::RoomUpdated(section(value)?),
			EventKind::RoomDeactivated => Self::RoomDeactivated(section(value)?),
			EventKind::RoomReactivated => Self::RoomReactivated(section(value)?),
			EventKind::ConnectionRequested => Self::ConnectionRequested(section(value)?),
			EventKind::ConnectionAccepted => Self::ConnectionAccepted(section(value)?),
			EventKind::RoomMemberDemotedFromOwner => Self::RoomMemberDemotedFromOwner(section(value)?),
			EventKind::RoomMemberPromotedToOwner => Self::RoomMemberPromotedToOwner(section(value)?),
			EventKind::UserLeftRoom => Self::UserLeftRoom(section(value)?),
			EventKind::UserJoinedRoom => Self::UserJoinedRoom(section(value)?),
			EventKind::UserRequestedToJoinRoom => Self::UserRequestedToJoinRoom(section(value)?),
		})
	}

	pub fn kind(&self) -> EventKind {
		match self {
			Self::MessageSent(_) => EventKind::MessageSent,
			Self::MessageSuppressed(_) => EventKind::MessageSuppressed,
			Self::ElementsAction(_) => EventKind::ElementsAction,
			Self::SharedPost(_) => EventKind::SharedPost,
			Self::InstantMessageCreated(_) => EventKind::InstantMessageCreated,
			Self::RoomCreated(_) => EventKind::RoomCreated,
			Self::RoomUpdated(_) => EventKind::RoomUpdated,
			Self::RoomDeactivated(_) => EventKind::RoomDeactivated,
			Self::RoomReactivated(_) => EventKind::RoomReactivated,
			Self::ConnectionRequested(_) => EventKind::ConnectionRequested,
			Self::ConnectionAccepted(_) => EventKind::ConnectionAccepted,
			Self::RoomMemberDemotedFromOwner(_) => EventKind::RoomMemberDemotedFromOwner,
			Self::RoomMemberPromotedToOwner(_) => EventKind::RoomMemberPromotedToOwner,
			Self::UserLeftRoom(_) => EventKind::UserLeftRoom,
			Self::UserJoinedRoom(_) => EventKind::UserJoinedRoom,
			Self::UserRequestedToJoinRoom(_) => EventKind::UserRequestedToJoinRoom,
		}
	}
}
