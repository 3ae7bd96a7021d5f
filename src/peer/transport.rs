//! 미디어 트랜스포트 추상화
//!
//! 오케스트레이터는 [`MediaTransport`]를 통해 협상을 구동하고,
//! 실제 피어 연결(캡처, 인코딩, 렌더링)은 그 뒤에 있다.

use crate::error::TransportError;
use crate::protocol::{ClientMessage, IceCandidate, SessionDescription, Signal};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// 로컬 캡처 스트림
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<MediaTrack>,
}

/// 원격 참여자 한 명과의 직접 미디어 세션
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// 로컬 트랙 송신 시작
    fn attach_local_media(&self, media: &LocalMedia);

    /// 로컬 트랙 송신 중지
    fn detach_local_media(&self);

    /// 세션 종료. 이후 원격 미디어는 전달되지 않는다.
    async fn close(&self);
}

/// 원격 참여자별 트랜스포트 생성
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        remote_id: &str,
        candidates: CandidateSink,
    ) -> Result<Arc<dyn MediaTransport>, TransportError>;
}

/// 트랜스포트가 수집한 ICE candidate 전달 경로
#[derive(Clone)]
pub struct CandidateSink {
    remote_id: String,
    outbound: UnboundedSender<ClientMessage>,
}

impl CandidateSink {
    pub fn new(remote_id: impl Into<String>, outbound: UnboundedSender<ClientMessage>) -> Self {
        Self {
            remote_id: remote_id.into(),
            outbound,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// 로컬 candidate를 상대에게 전송. 제어 연결이 끊겼으면 false
    pub fn send(&self, candidate: IceCandidate) -> bool {
        let signal = Signal::Candidate { candidate };
        match serde_json::to_value(&signal) {
            Ok(signal) => self
                .outbound
                .send(ClientMessage::Signal {
                    target: self.remote_id.clone(),
                    signal,
                })
                .is_ok(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode local candidate");
                false
            }
        }
    }
}
