//! 에러 타입

use thiserror::Error;

/// 파싱 실패. 서버 로그에만 남기고 클라이언트에는 보내지 않음
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON envelope: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownKind(String),

    #[error("malformed {kind} payload: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 방 프로토콜 에러. 표시 문자열이 그대로 클라이언트에 전달됨
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is full")]
    RoomFull,

    #[error("Already in a room")]
    AlreadyInRoom,

    #[error("Only the host can do that")]
    NotHost,

    #[error("No pending join request from that client")]
    StaleTarget,

    #[error("Host rejected your request")]
    Rejected,

    #[error("Could not allocate a room id")]
    IdExhausted,
}

/// 미디어 트랜스포트 구현이 보고한 실패
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 클라이언트 측 제어 연결 실패
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// 클라이언트 측 협상 실패
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid negotiation envelope: {0}")]
    InvalidSignal(#[source] serde_json::Error),

    #[error("control connection closed")]
    ChannelClosed,
}
