//! WebSocket message types. Client ↔ server JSON, `{"type": ..., "payload": ...}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// --- Client → server ---

/// Something the user asked the session to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Post `content` to a room.
    Send { room_id: String, content: String },
    JoinRoom { room_id: String },
    CreateRoom { name: String },
    /// Ask for the rooms the user belongs to.
    ListRooms,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPayload<'a> {
    pub token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload<'a> {
    pub token: &'a str,
    #[serde(rename = "roomId")]
    pub room_id: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinRoomPayload<'a> {
    pub token: &'a str,
    #[serde(rename = "roomId")]
    pub room_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRoomPayload<'a> {
    pub token: &'a str,
    pub name: &'a str,
}

/// One client frame. The server authorizes every payload by its token.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientFrame<'a> {
    Authenticate(TokenPayload<'a>),
    Message(MessagePayload<'a>),
    JoinRoom(JoinRoomPayload<'a>),
    CreateRoom(CreateRoomPayload<'a>),
    GetUserRooms(TokenPayload<'a>),
}

impl<'a> ClientFrame<'a> {
    pub fn authenticate(token: &'a str) -> Self {
        ClientFrame::Authenticate(TokenPayload { token })
    }

    pub fn for_command(command: &'a ChatCommand, token: &'a str) -> Self {
        match command {
            ChatCommand::Send { room_id, content } => ClientFrame::Message(MessagePayload {
                token,
                room_id,
                content,
            }),
            ChatCommand::JoinRoom { room_id } => {
                ClientFrame::JoinRoom(JoinRoomPayload { token, room_id })
            }
            ChatCommand::CreateRoom { name } => {
                ClientFrame::CreateRoom(CreateRoomPayload { token, name })
            }
            ChatCommand::ListRooms => ClientFrame::GetUserRooms(TokenPayload { token }),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// --- Server → client ---

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthenticatedPayload {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimpleMessagePayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggedInPayload {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomPayload {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserRoomsPayload {
    pub rooms: Vec<RoomInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Author {
    pub username: String,
}

/// A chat line as the server relays it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub author: Author,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryPayload {
    #[serde(rename = "roomId")]
    pub room_id: String,
    pub messages: Vec<ChatMessage>,
}

/// One server message; discriminator is the JSON "type" field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    Authenticated(AuthenticatedPayload),
    Registered(SimpleMessagePayload),
    LoggedIn(LoggedInPayload),
    JoinedRoom(RoomPayload),
    History(HistoryPayload),
    Message(ChatMessage),
    UserJoined(SimpleMessagePayload),
    UserLeft(SimpleMessagePayload),
    JoinRequest(SimpleMessagePayload),
    JoinApproved(RoomPayload),
    JoinRejected(SimpleMessagePayload),
    JoinRequestSent(SimpleMessagePayload),
    Info(SimpleMessagePayload),
    RoomDeleted(SimpleMessagePayload),
    Error(SimpleMessagePayload),
    RoomCreated(RoomPayload),
    UserRooms(UserRoomsPayload),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol {
            message: format!("bad server frame: {}", e),
        })
    }
}
