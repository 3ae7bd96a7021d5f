//! 클라이언트-서버 메시지 프로토콜
//!
//! 모든 프레임은 UTF-8 JSON `{"type": "<kind>", "payload": {...}}` 형식.
//! kind는 snake_case, payload 필드는 camelCase.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 클라이언트 -> 서버 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    // 연결
    Heartbeat {},

    // 방 관리
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
    },
    JoinRequest {
        room_id: String,
        #[serde(default)]
        name: Option<String>,
    },
    ApproveJoin {
        target_client_id: String,
    },
    RejectJoin {
        target_client_id: String,
    },
    LeaveRoom {},

    // 시그널 중계
    Signal {
        target: String,
        signal: Value,
    },
    CursorMove {
        position: CursorPosition,
    },
}

impl ClientMessage {
    /// 라우터가 처리하는 kind 목록
    pub const KINDS: &'static [&'static str] = &[
        "heartbeat",
        "create_room",
        "join_request",
        "approve_join",
        "reject_join",
        "leave_room",
        "signal",
        "cursor_move",
    ];

    /// 메시지 kind의 wire 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat {} => "heartbeat",
            Self::CreateRoom { .. } => "create_room",
            Self::JoinRequest { .. } => "join_request",
            Self::ApproveJoin { .. } => "approve_join",
            Self::RejectJoin { .. } => "reject_join",
            Self::LeaveRoom {} => "leave_room",
            Self::Signal { .. } => "signal",
            Self::CursorMove { .. } => "cursor_move",
        }
    }
}

/// 서버 -> 클라이언트 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    // 연결
    HeartbeatAck {},
    Error {
        message: String,
    },

    // 방 이벤트
    RoomCreated {
        room_id: String,
        client_id: String,
    },
    Joined {
        room_id: String,
        client_id: String,
        is_host: bool,
    },
    JoinRequest {
        client_id: String,
        name: String,
    },
    PeerJoined {
        client_id: String,
        name: String,
    },
    ExistingPeers {
        peers: Vec<PeerInfo>,
    },
    PeerLeft {
        client_id: String,
    },
    HostLeft {},

    // 시그널 중계
    Signal {
        sender: String,
        signal: Value,
    },
    CursorUpdate {
        client_id: String,
        position: CursorPosition,
    },
}

/// `existing_peers`에 담기는 멤버 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
}

/// 송신자 화면 기준으로 정규화된 커서 위치 (0.0 - 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// 수신 프레임 파싱
///
/// payload가 없거나 `null`이면 `{}`로 취급 (`heartbeat`, `leave_room` 등)
pub fn decode(text: &str) -> Result<ClientMessage, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

    if !ClientMessage::KINDS.contains(&raw.kind.as_str()) {
        return Err(ProtocolError::UnknownKind(raw.kind));
    }

    let payload = match raw.payload {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let envelope = serde_json::json!({ "type": raw.kind.clone(), "payload": payload });

    serde_json::from_value(envelope).map_err(|source| ProtocolError::Malformed {
        kind: raw.kind,
        source,
    })
}
