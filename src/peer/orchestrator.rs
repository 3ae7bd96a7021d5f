//! 피어 협상 오케스트레이터
//!
//! 원격 멤버마다 [`PeerSession`]을 하나씩 두고, 중계된 제어 메시지와
//! 로컬 공유 이벤트를 협상 메시지로 바꾼다. 세션끼리는 독립적이며
//! 한 세션의 작업은 그 세션의 락으로 직렬화된다.

use super::session::{NegotiationState, PeerSession, Role};
use super::transport::{CandidateSink, LocalMedia, TransportFactory};
use crate::config::NegotiationConfig;
use crate::error::NegotiationError;
use crate::protocol::{ClientMessage, CursorPosition, PeerInfo, ServerMessage, Signal};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// 애플리케이션 계층 알림
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    RoomCreated { room_id: String, client_id: String },
    Joined { room_id: String, client_id: String, is_host: bool },
    JoinRequested { client_id: String, name: String },
    PeerAdded { peer: PeerInfo, role: Role },
    PeerRemoved { client_id: String },
    HostLeft,
    CursorMoved { client_id: String, position: CursorPosition },
    ServerError { message: String },
    /// 미디어 세션 수립됨
    Established { peer_id: String },
    /// 이 피어의 미디어 렌더링 즉시 중단
    RemoteMediaEnded { peer_id: String },
    NegotiationFailed { peer_id: String, reason: String },
    NegotiationTimedOut { peer_id: String },
}

type SharedSession = Arc<Mutex<PeerSession>>;

pub struct PeerOrchestrator {
    sessions: DashMap<String, SharedSession>,
    factory: Arc<dyn TransportFactory>,
    outbound: UnboundedSender<ClientMessage>,
    events: UnboundedSender<PeerEvent>,
    local_media: RwLock<Option<LocalMedia>>,
}

impl PeerOrchestrator {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        outbound: UnboundedSender<ClientMessage>,
        events: UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            factory,
            outbound,
            events,
            local_media: RwLock::new(None),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_peer(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    /// 피어 협상 상태 조회
    pub async fn peer_state(&self, peer_id: &str) -> Option<NegotiationState> {
        let session = self.session(peer_id)?;
        let state = session.lock().await.state();
        Some(state)
    }

    pub fn is_sharing(&self) -> bool {
        self.local_media.read().map(|m| m.is_some()).unwrap_or(false)
    }

    /// 코디네이터 메시지 처리
    pub async fn handle_server_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::HeartbeatAck {} => {}
            ServerMessage::Error { message } => self.emit(PeerEvent::ServerError { message }),
            ServerMessage::RoomCreated { room_id, client_id } => {
                self.emit(PeerEvent::RoomCreated { room_id, client_id })
            }
            ServerMessage::Joined {
                room_id,
                client_id,
                is_host,
            } => self.emit(PeerEvent::Joined {
                room_id,
                client_id,
                is_host,
            }),
            ServerMessage::JoinRequest { client_id, name } => {
                self.emit(PeerEvent::JoinRequested { client_id, name })
            }
            ServerMessage::ExistingPeers { peers } => {
                for peer in peers {
                    self.add_peer(peer, Role::Responder).await;
                }
            }
            ServerMessage::PeerJoined { client_id, name } => {
                let peer = PeerInfo {
                    id: client_id,
                    name,
                };
                self.add_peer(peer, Role::Initiator).await;
            }
            ServerMessage::Signal { sender, signal } => {
                match serde_json::from_value::<Signal>(signal) {
                    Ok(signal) => self.handle_signal(&sender, signal).await,
                    Err(err) => {
                        let err = NegotiationError::InvalidSignal(err);
                        tracing::warn!(peer = %sender, error = %err, "Dropped signal");
                    }
                }
            }
            ServerMessage::PeerLeft { client_id } => {
                self.remove_peer(&client_id).await;
                self.emit(PeerEvent::PeerRemoved { client_id });
            }
            ServerMessage::HostLeft {} => {
                self.close_all().await;
                self.emit(PeerEvent::HostLeft);
            }
            ServerMessage::CursorUpdate {
                client_id,
                position,
            } => self.emit(PeerEvent::CursorMoved {
                client_id,
                position,
            }),
        }
    }

    /// 새 멤버 세션 생성
    ///
    /// Initiator는 즉시 offer를 보내고, Responder는 원격 offer를 기다린다.
    async fn add_peer(&self, peer: PeerInfo, role: Role) {
        // 중복 확인부터 삽입까지 entry 락 유지
        let (session, mut guard) = match self.sessions.entry(peer.id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!(peer = %peer.id, "Peer already known");
                return;
            }
            Entry::Vacant(slot) => {
                let sink = CandidateSink::new(peer.id.clone(), self.outbound.clone());
                let transport = match self.factory.create(&peer.id, sink) {
                    Ok(transport) => transport,
                    Err(err) => {
                        drop(slot);
                        tracing::warn!(peer = %peer.id, error = %err, "Could not create transport");
                        self.emit(PeerEvent::NegotiationFailed {
                            peer_id: peer.id,
                            reason: err.to_string(),
                        });
                        return;
                    }
                };

                let mut session = PeerSession::new(peer.id.clone(), role, transport);
                if let Some(media) = self.current_media() {
                    session.attach_local_media(&media);
                }
                let session = Arc::new(Mutex::new(session));

                // 빠른 answer가 우리 offer보다 먼저 처리되지 않도록 락을 먼저 잡는다
                let Ok(guard) = session.clone().try_lock_owned() else {
                    return;
                };
                slot.insert(session.clone());
                (session, guard)
            }
        };

        tracing::info!(peer = %peer.id, role = ?role, "Peer session created");
        self.emit(PeerEvent::PeerAdded {
            peer: peer.clone(),
            role,
        });

        if role == Role::Initiator {
            let result = match guard.start_offer().await {
                Ok(offer) => self.send_signal(&peer.id, &offer),
                Err(err) => Err(err),
            };
            drop(guard);
            if let Err(err) = result {
                self.fail_peer(&peer.id, &session, err).await;
            }
        }
    }

    async fn handle_signal(&self, sender: &str, signal: Signal) {
        let Some(session) = self.session(sender) else {
            tracing::warn!(peer = %sender, kind = signal.kind(), "Received signal for unknown peer");
            return;
        };

        let mut guard = session.lock().await;
        let result = match guard.apply_signal(signal).await {
            Ok(applied) => applied
                .replies
                .iter()
                .try_for_each(|reply| self.send_signal(sender, reply))
                .map(|()| applied.established),
            Err(err) => Err(err),
        };
        drop(guard);

        match result {
            Ok(true) => {
                tracing::info!(peer = %sender, "Media session established");
                self.emit(PeerEvent::Established {
                    peer_id: sender.to_string(),
                });
            }
            Ok(false) => {}
            Err(err) => self.fail_peer(sender, &session, err).await,
        }
    }

    /// 로컬 화면 공유 시작: 모든 세션에 트랙 연결 후 재협상
    ///
    /// 수립된 세션은 즉시 offer, 협상 중인 세션은 진행 중인 라운드가 끝난 뒤 offer
    pub async fn start_sharing(&self, media: LocalMedia) {
        if let Ok(mut current) = self.local_media.write() {
            *current = Some(media.clone());
        }
        tracing::info!(stream = %media.stream_id, peers = self.sessions.len(), "Sharing started");

        for (peer_id, session) in self.snapshot() {
            let mut guard = session.lock().await;
            guard.attach_local_media(&media);

            let result = match guard.renegotiate().await {
                Ok(Some(offer)) => self.send_signal(&peer_id, &offer),
                Ok(None) => Ok(()),
                Err(err) => Err(err),
            };
            drop(guard);
            if let Err(err) = result {
                self.fail_peer(&peer_id, &session, err).await;
            }
        }
    }

    /// 로컬 화면 공유 중지. 트랙만 분리하고 메시지는 보내지 않음
    pub async fn stop_sharing(&self) {
        let had_media = self
            .local_media
            .write()
            .map(|mut current| current.take().is_some())
            .unwrap_or(false);
        if !had_media {
            return;
        }

        for (_, session) in self.snapshot() {
            session.lock().await.detach_local_media();
        }
        tracing::info!("Sharing stopped");
    }

    /// 방 나가기: 코디네이터에 알리고 모든 세션 종료
    pub async fn leave_room(&self) {
        if self.outbound.send(ClientMessage::LeaveRoom {}).is_err() {
            tracing::debug!("Control connection already closed");
        }
        self.close_all().await;
    }

    /// 협상이 완료되지 않은 세션 정리
    ///
    /// 처리 중인 세션은 이번 라운드에서 건너뛴다.
    pub async fn expire_stalled(&self, timeout: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();

        for (peer_id, session) in self.snapshot() {
            let Ok(mut guard) = session.try_lock() else {
                continue;
            };
            if !guard.is_stalled(now, timeout) {
                continue;
            }
            guard.close().await;
            drop(guard);

            self.sessions
                .remove_if(&peer_id, |_, current| Arc::ptr_eq(current, &session));
            tracing::warn!(peer = %peer_id, timeout_ms = timeout.as_millis() as u64, "Negotiation timed out");
            self.emit(PeerEvent::RemoteMediaEnded {
                peer_id: peer_id.clone(),
            });
            self.emit(PeerEvent::NegotiationTimedOut {
                peer_id: peer_id.clone(),
            });
            expired.push(peer_id);
        }
        expired
    }

    /// 주기적 협상 타임아웃 정리 태스크
    pub fn spawn_timeout_sweeper(self: &Arc<Self>, config: NegotiationConfig) -> JoinHandle<()> {
        let orchestrator = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.sweep_interval);
            loop {
                interval.tick().await;
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                orchestrator.expire_stalled(config.timeout).await;
            }
        })
    }

    async fn remove_peer(&self, peer_id: &str) {
        let Some((_, session)) = self.sessions.remove(peer_id) else {
            tracing::debug!(peer = %peer_id, "Departure for unknown peer");
            return;
        };
        session.lock().await.close().await;
        tracing::info!(peer = %peer_id, "Peer session closed");
        self.emit(PeerEvent::RemoteMediaEnded {
            peer_id: peer_id.to_string(),
        });
    }

    async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for peer_id in ids {
            self.remove_peer(&peer_id).await;
        }
    }

    /// 협상 실패 세션 종료
    async fn fail_peer(&self, peer_id: &str, session: &SharedSession, err: NegotiationError) {
        tracing::warn!(peer = %peer_id, error = %err, "Negotiation failed");
        session.lock().await.close().await;
        self.sessions
            .remove_if(peer_id, |_, current| Arc::ptr_eq(current, session));
        self.emit(PeerEvent::RemoteMediaEnded {
            peer_id: peer_id.to_string(),
        });
        self.emit(PeerEvent::NegotiationFailed {
            peer_id: peer_id.to_string(),
            reason: err.to_string(),
        });
    }

    fn send_signal(&self, target: &str, signal: &Signal) -> Result<(), NegotiationError> {
        let signal = serde_json::to_value(signal).map_err(NegotiationError::InvalidSignal)?;
        self.outbound
            .send(ClientMessage::Signal {
                target: target.to_string(),
                signal,
            })
            .map_err(|_| NegotiationError::ChannelClosed)
    }

    fn session(&self, peer_id: &str) -> Option<SharedSession> {
        self.sessions.get(peer_id).map(|entry| entry.value().clone())
    }

    /// await 중 맵 가드를 잡지 않도록 세션 맵 복사본 반환
    fn snapshot(&self) -> Vec<(String, SharedSession)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn current_media(&self) -> Option<LocalMedia> {
        self.local_media.read().ok().and_then(|m| m.clone())
    }

    fn emit(&self, event: PeerEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No listener for peer events");
        }
    }
}
