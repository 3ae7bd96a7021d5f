//! 원격 피어별 협상 상태 머신

use super::transport::{LocalMedia, MediaTransport};
use crate::error::NegotiationError;
use crate::protocol::{IceCandidate, SessionDescription, Signal};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 첫 offer를 보내는 쪽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 상대가 들어올 때 이미 방에 있던 쪽. 먼저 offer
    Initiator,
    /// 방금 참여한 쪽. 상대 offer를 기다림
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Absent,
    Negotiating,
    Established,
    Closed,
}

/// 원격 메시지 적용 결과
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    /// 순서대로 돌려보낼 메시지
    pub replies: Vec<Signal>,
    /// 이번 단계에서 세션이 수립됨
    pub established: bool,
}

/// 원격 참여자 한 명의 협상 및 미디어 트랜스포트
pub struct PeerSession {
    remote_id: String,
    role: Role,
    state: NegotiationState,
    transport: Arc<dyn MediaTransport>,
    local_offer_pending: bool,
    renegotiate_pending: bool,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    round_started: Instant,
}

impl PeerSession {
    pub fn new(remote_id: impl Into<String>, role: Role, transport: Arc<dyn MediaTransport>) -> Self {
        Self {
            remote_id: remote_id.into(),
            role,
            state: NegotiationState::Absent,
            transport,
            local_offer_pending: false,
            renegotiate_pending: false,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            round_started: Instant::now(),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn renegotiation_pending(&self) -> bool {
        self.renegotiate_pending
    }

    /// 로컬 offer 생성 및 적용
    ///
    /// initiator의 첫 offer와 수립된 세션의 재협상에 사용.
    /// 협상 라운드 진행 중에는 호출하지 말고 [`PeerSession::renegotiate`]를 사용한다.
    pub async fn start_offer(&mut self) -> Result<Signal, NegotiationError> {
        let offer = self.transport.create_offer().await?;
        self.transport.set_local_description(offer.clone()).await?;

        self.local_offer_pending = true;
        self.renegotiate_pending = false;
        self.enter_negotiating();

        tracing::debug!(peer = %self.remote_id, role = ?self.role, "Local offer created");
        Ok(Signal::Offer { sdp: offer })
    }

    /// 현재 로컬 트랙으로 새 offer 요청
    ///
    /// 수립된 세션은 즉시 offer, 협상 중인 세션은 라운드가 끝난 뒤 offer.
    /// 아직 시작하지 않은 세션은 첫 교환에서 트랙을 반영한다.
    pub async fn renegotiate(&mut self) -> Result<Option<Signal>, NegotiationError> {
        match self.state {
            NegotiationState::Established => self.start_offer().await.map(Some),
            NegotiationState::Negotiating => {
                self.renegotiate_pending = true;
                tracing::debug!(peer = %self.remote_id, "Renegotiation deferred until round completes");
                Ok(None)
            }
            NegotiationState::Absent | NegotiationState::Closed => Ok(None),
        }
    }

    /// 원격 메시지 적용
    ///
    /// `Err`이면 세션을 더 진행할 수 없으므로 닫아야 한다.
    pub async fn apply_signal(&mut self, signal: Signal) -> Result<Applied, NegotiationError> {
        let mut applied = Applied::default();
        if self.state == NegotiationState::Closed {
            tracing::debug!(peer = %self.remote_id, kind = signal.kind(), "Signal for closed session ignored");
            return Ok(applied);
        }

        let began_established = self.state == NegotiationState::Established;
        match signal {
            Signal::Offer { sdp } => applied.replies.extend(self.apply_offer(sdp).await?),
            Signal::Answer { sdp } => self.apply_answer(sdp).await?,
            Signal::Candidate { candidate } => self.apply_candidate(candidate).await,
        }

        let reached = self.state == NegotiationState::Established;
        applied.established = reached && !began_established;

        // 미뤄둔 offer는 기다리던 라운드가 끝난 뒤에만 전송
        if reached && self.renegotiate_pending {
            applied.replies.push(self.start_offer().await?);
        }
        Ok(applied)
    }

    async fn apply_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<Option<Signal>, NegotiationError> {
        if self.local_offer_pending {
            // 양쪽이 동시에 offer. responder 쪽이 양보
            match self.role {
                Role::Initiator => {
                    tracing::warn!(peer = %self.remote_id, "Offer collision, keeping local offer");
                    return Ok(None);
                }
                Role::Responder => {
                    tracing::info!(peer = %self.remote_id, "Offer collision, accepting remote offer");
                    self.local_offer_pending = false;
                    self.renegotiate_pending = true;
                }
            }
        }

        self.enter_negotiating();
        self.set_remote(offer).await?;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.state = NegotiationState::Established;

        tracing::debug!(peer = %self.remote_id, "Answered remote offer");
        Ok(Some(Signal::Answer { sdp: answer }))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), NegotiationError> {
        if self.state != NegotiationState::Negotiating || !self.local_offer_pending {
            tracing::warn!(
                peer = %self.remote_id,
                state = ?self.state,
                "Answer without an outstanding offer ignored"
            );
            return Ok(());
        }

        self.set_remote(answer).await?;
        self.local_offer_pending = false;
        self.state = NegotiationState::Established;

        tracing::debug!(peer = %self.remote_id, "Remote answer applied");
        Ok(())
    }

    /// 원격 디스크립션 전에 도착한 candidate는 보관
    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            tracing::debug!(
                peer = %self.remote_id,
                queued = self.pending_candidates.len(),
                "Candidate queued until remote description"
            );
            return;
        }

        if let Err(err) = self.transport.add_ice_candidate(candidate).await {
            tracing::warn!(peer = %self.remote_id, error = %err, "Failed to add candidate");
        }
    }

    async fn set_remote(&mut self, description: SessionDescription) -> Result<(), NegotiationError> {
        self.transport.set_remote_description(description).await?;
        self.remote_description_set = true;

        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(err) = self.transport.add_ice_candidate(candidate).await {
                tracing::warn!(peer = %self.remote_id, error = %err, "Failed to add queued candidate");
            }
        }
        Ok(())
    }

    fn enter_negotiating(&mut self) {
        if self.state != NegotiationState::Negotiating {
            self.round_started = Instant::now();
        }
        self.state = NegotiationState::Negotiating;
    }

    pub fn attach_local_media(&self, media: &LocalMedia) {
        self.transport.attach_local_media(media);
    }

    pub fn detach_local_media(&self) {
        self.transport.detach_local_media();
    }

    /// 상대를 너무 오래 기다렸는지 여부
    pub fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        matches!(
            self.state,
            NegotiationState::Absent | NegotiationState::Negotiating
        ) && now.saturating_duration_since(self.round_started) >= timeout
    }

    /// 트랜스포트 종료 (멱등)
    pub async fn close(&mut self) {
        if self.state == NegotiationState::Closed {
            return;
        }
        self.state = NegotiationState::Closed;
        self.renegotiate_pending = false;
        self.pending_candidates.clear();
        self.transport.close().await;
    }
}
