//! Logical operations and notifications exchanged between clients and the
//! room coordinator. Everything here travels as JSON inside a
//! [`TcpCommand::Json`] frame, except audio segments which use
//! [`TcpCommand::Chunk`].

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{error::ProtocolError, tcp_command::TcpCommand, tcp_command_id::TcpCommandId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: MemberId,
    pub name: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PlaybackSource {
    Track {
        source_url: String,
        source_name: String,
    },
    LiveStream,
}

/// The room's stored playback descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default)]
    pub source: Option<PlaybackSource>,
    pub position_seconds: f64,
    pub is_playing: bool,
    pub server_timestamp: i64,
}

impl PlaybackState {
    pub fn is_live_stream(&self) -> bool {
        matches!(self.source, Some(PlaybackSource::LiveStream))
    }

    pub fn snapshot(&self, emitted_by: &MemberId) -> PlaybackSnapshot {
        let (source_url, source_name) = match &self.source {
            Some(PlaybackSource::Track {
                source_url,
                source_name,
            }) => (Some(source_url.clone()), Some(source_name.clone())),
            _ => (None, None),
        };

        PlaybackSnapshot {
            position_seconds: self.position_seconds,
            is_playing: self.is_playing,
            emitted_at_server_time: self.server_timestamp,
            source_url,
            source_name,
            emitted_by: emitted_by.clone(),
        }
    }
}

/// A server-stamped playback position broadcast to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub position_seconds: f64,
    pub is_playing: bool,
    pub emitted_at_server_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    pub emitted_by: MemberId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: String,
    pub name: String,
    pub admin_id: MemberId,
    pub members: Vec<MemberInfo>,
    #[serde(default)]
    pub playback: Option<PlaybackState>,
}

impl RoomSnapshot {
    pub fn member(&self, id: &MemberId) -> Option<&MemberInfo> {
        self.members.iter().find(|member| &member.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Request {
    CreateRoom {
        room_name: String,
        user_name: String,
    },
    JoinRoom {
        room_code: String,
        user_name: String,
    },
    LeaveRoom {
        room_code: String,
    },
    UpdatePlayback {
        room_code: String,
        position_seconds: f64,
        is_playing: bool,
        client_timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_name: Option<String>,
    },
    LoadTrack {
        room_code: String,
        source_url: String,
        source_name: String,
    },
    StartLiveStream {
        room_code: String,
    },
    StopLiveStream {
        room_code: String,
    },
    GetDiagnostics,
}

impl Request {
    /// Requests answered with a [`Response`]. The rest are fire-and-forget.
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Request::CreateRoom { .. }
                | Request::JoinRoom { .. }
                | Request::LeaveRoom { .. }
                | Request::GetDiagnostics
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    RoomNotFound,
    InvalidName,
    Protocol,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDiagnostics {
    pub name: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDiagnostics {
    pub code: String,
    pub name: String,
    pub member_count: usize,
    pub members: Vec<MemberDiagnostics>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayCounters {
    pub chunks_received: u64,
    pub chunks_forwarded: u64,
    pub chunks_dropped: u64,
    pub chunks_rejected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub total_rooms: usize,
    pub rooms: Vec<RoomDiagnostics>,
    pub relay: RelayCounters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ResponseBody {
    RoomCreated {
        room_code: String,
        member: MemberInfo,
    },
    RoomJoined {
        room: RoomSnapshot,
        member: MemberInfo,
    },
    Left,
    Diagnostics {
        report: DiagnosticsReport,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub request_id: u64,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Event {
    MemberJoined { member: MemberInfo },
    MemberLeft { member_id: MemberId },
    RoomUpdated { room: RoomSnapshot },
    RoomClosed { room_code: String },
    TrackChanged { source_url: String, source_name: String },
    PlaybackSnapshot { snapshot: PlaybackSnapshot },
    LiveStreamStarted,
    LiveStreamStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub protocol_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: u64,
    pub server_time: i64,
}

impl Event {
    pub fn to_command(&self) -> Result<TcpCommand, ProtocolError> {
        TcpCommand::json(TcpCommandId::Event, self)
    }
}

impl Response {
    pub fn to_command(&self) -> Result<TcpCommand, ProtocolError> {
        TcpCommand::json(TcpCommandId::Response, self)
    }
}

impl RequestEnvelope {
    pub fn to_command(&self) -> Result<TcpCommand, ProtocolError> {
        TcpCommand::json(TcpCommandId::Request, self)
    }
}

pub fn parse_json<T: DeserializeOwned>(payload: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(payload)?)
}
