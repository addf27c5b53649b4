#![forbid(unsafe_code)]

use serde::{Deserialize, Deserializer, Serialize};

/// Explicit `null` lists decode as empty.
fn null_as_empty<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
	D: Deserializer<'de>,
	T: Deserialize<'de>,
{
	Ok(Option::<Vec<T>>::deserialize(d)?.unwrap_or_default())
}

/// Platform user reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
	pub user_id: Option<i64>,
	pub first_name: Option<String>,
	pub last_name: Option<String>,
	pub display_name: Option<String>,
	pub email: Option<String>,
	pub username: Option<String>,
}

/// Conversation (room, IM, MIM) reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stream {
	pub stream_id: Option<String>,
	pub stream_type: Option<String>,
	pub room_name: Option<String>,
	#[serde(deserialize_with = "null_as_empty")]
	pub members: Vec<User>,
	pub external: Option<bool>,
	pub cross_pod: Option<bool>,
}

/// Room attributes snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomProperties {
	pub name: Option<String>,
	pub description: Option<String>,
	pub creator_user: Option<User>,
	pub created_date: Option<i64>,
	pub public: Option<bool>,
	pub read_only: Option<bool>,
	pub discoverable: Option<bool>,
	pub members_can_invite: Option<bool>,
}

/// Message as delivered on the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
	pub message_id: Option<String>,
	pub timestamp: Option<i64>,

	/// Rendered message markup.
	pub message: Option<String>,

	/// Structured entity data (JSON string).
	pub data: Option<String>,
	pub user: Option<User>,
	pub stream: Option<Stream>,
	pub external_recipients: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageSent {
	pub message: Option<Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageSuppressed {
	pub message_id: Option<String>,
	pub stream: Option<Stream>,
}

/// Form submission from an interactive message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElementsAction {
	pub stream: Option<Stream>,
	pub form_message_id: Option<String>,
	pub form_id: Option<String>,
	pub form_values: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SharedPost {
	pub message: Option<Message>,
	pub shared_message: Option<Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstantMessageCreated {
	pub stream: Option<Stream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomCreated {
	pub stream: Option<Stream>,
	pub room_properties: Option<RoomProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomUpdated {
	pub stream: Option<Stream>,
	pub new_room_properties: Option<RoomProperties>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomDeactivated {
	pub stream: Option<Stream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomReactivated {
	pub stream: Option<Stream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionRequested {
	pub to_user: Option<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionAccepted {
	pub from_user: Option<User>,
}

/// Membership change affecting a single user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomMemberChange {
	pub stream: Option<Stream>,
	pub affected_user: Option<User>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRequestedToJoinRoom {
	pub stream: Option<Stream>,
	#[serde(deserialize_with = "null_as_empty")]
	pub affected_users: Vec<User>,
}
