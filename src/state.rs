//! 코디네이터 상태: 연결 레지스트리와 방 레지스트리
//!
//! 두 레지스트리는 [`Coordinator`]가 소유한 단일 락 뒤의 [`Registry`] 하나에 있다.
//! 순서가 보장되어야 하는 모든 변경과 송신은 이 락을 잡은 채로 수행되므로
//! 호스트 없는 방이나 사라진 방을 가리키는 클라이언트는 어떤 태스크에도 보이지 않는다.

use crate::config::Config;
use crate::error::RoomError;
use crate::protocol::{PeerInfo, ServerMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, Mutex, MutexGuard};

/// 모든 연결 태스크가 공유하는 코디네이터 (명시적으로 생성)
pub struct Coordinator {
    registry: Mutex<Registry>,
    /// 설정
    pub config: Arc<Config>,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Mutex::new(Registry::new(config.room.id_attempts)),
            config: Arc::new(config),
        }
    }

    /// 단일 상호 배제 영역 진입
    pub async fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().await
    }
}

/// 살아있는 제어 연결
pub struct Client {
    pub id: String,
    pub name: Option<String>,
    /// 방 생성/참여 요청 시 설정. 방은 설정됐지만 멤버가 아니면 대기 중인 참여 요청
    pub room_id: Option<String>,
    pub sender: UnboundedSender<ServerMessage>,
    pub connected_at: Instant,
}

/// 방 정보
pub struct Room {
    pub id: String,
    pub members: HashSet<String>,
    pub host: String,
    pub created_at: Instant,
}

/// 멤버 제거 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    /// 호스트 퇴장. 방은 삭제되고 남은 멤버 목록
    HostLeft { remaining: Vec<String> },
    /// 일반 멤버 퇴장. 방은 남은 멤버로 유지
    PeerLeft { remaining: Vec<String> },
    /// 멤버가 아니었음 (대기 중인 요청 또는 없는 방)
    NotMember,
}

/// 연결 레지스트리 + 방 레지스트리 (메모리 전용, I/O 없음)
pub struct Registry {
    clients: HashMap<String, Client>,
    rooms: HashMap<String, Room>,
    id_attempts: usize,
}

impl Registry {
    pub fn new(id_attempts: usize) -> Self {
        Self {
            clients: HashMap::new(),
            rooms: HashMap::new(),
            id_attempts: id_attempts.max(1),
        }
    }

    // ---- 연결 레지스트리 ----

    /// 새 연결 등록 후 생성된 id 반환
    pub fn register(&mut self, sender: UnboundedSender<ServerMessage>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.clients.insert(
            id.clone(),
            Client {
                id: id.clone(),
                name: None,
                room_id: None,
                sender,
                connected_at: Instant::now(),
            },
        );
        id
    }

    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn contains_client(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// 클라이언트의 방 지정 (멤버 추가 없음) 및 이름 기록
    pub fn set_room(&mut self, id: &str, room_id: &str, name: &str) {
        if let Some(client) = self.clients.get_mut(id) {
            client.room_id = Some(room_id.to_string());
            client.name = Some(name.to_string());
        }
    }

    pub fn clear_room(&mut self, id: &str) {
        if let Some(client) = self.clients.get_mut(id) {
            client.room_id = None;
        }
    }

    /// 연결 제거. 호출자가 방 정리를 마칠 수 있도록 반환
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    // ---- 방 레지스트리 ----

    /// `host`를 호스트이자 유일한 멤버로 새 방 생성
    pub fn create_room(&mut self, host: &str) -> Result<String, RoomError> {
        for _ in 0..self.id_attempts {
            let candidate = generate_room_id();
            if self.rooms.contains_key(&candidate) {
                tracing::warn!(room_id = %candidate, "Room id collision, retrying");
                continue;
            }
            self.rooms.insert(
                candidate.clone(),
                Room {
                    id: candidate.clone(),
                    members: HashSet::from([host.to_string()]),
                    host: host.to_string(),
                    created_at: Instant::now(),
                },
            );
            return Ok(candidate);
        }
        Err(RoomError::IdExhausted)
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// 방 멤버 id 스냅샷
    pub fn room_members(&self, room_id: &str) -> HashSet<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }

    pub fn room_host(&self, room_id: &str) -> Option<&str> {
        self.rooms.get(room_id).map(|room| room.host.as_str())
    }

    pub fn is_member(&self, room_id: &str, id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.members.contains(id))
    }

    pub fn add_member(&mut self, room_id: &str, id: &str) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => room.members.insert(id.to_string()),
            None => false,
        }
    }

    /// 멤버 제거. 호스트가 나가면 방 삭제
    pub fn remove_member(&mut self, room_id: &str, id: &str) -> Departure {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Departure::NotMember;
        };
        if !room.members.remove(id) {
            return Departure::NotMember;
        }

        let remaining: Vec<String> = room.members.iter().cloned().collect();
        if room.host == id {
            self.rooms.remove(room_id);
            for member in &remaining {
                self.clear_room(member);
            }
            // 대기 중인 요청자도 사라진 방을 가리키지 않도록 정리
            let stale: Vec<String> = self
                .clients
                .values()
                .filter(|c| c.room_id.as_deref() == Some(room_id))
                .map(|c| c.id.clone())
                .collect();
            for pending in stale {
                self.clear_room(&pending);
            }
            Departure::HostLeft { remaining }
        } else {
            Departure::PeerLeft { remaining }
        }
    }

    /// `exclude`를 제외한 멤버 목록 (표시 이름 포함, 시점 스냅샷)
    pub fn peer_infos(&self, room_id: &str, exclude: &str) -> Vec<PeerInfo> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter(|id| id.as_str() != exclude)
            .map(|id| PeerInfo {
                id: id.clone(),
                name: self
                    .clients
                    .get(id)
                    .and_then(|c| c.name.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    // ---- 전송 ----

    /// 특정 클라이언트에게 메시지 전송. 없으면 false
    pub fn send_to(&self, id: &str, message: ServerMessage) -> bool {
        match self.clients.get(id) {
            Some(client) => client.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// 주어진 id들에게 전송 (`exclude` 제외)
    pub fn send_to_all<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a String>,
        exclude: Option<&str>,
        message: &ServerMessage,
    ) -> usize {
        let mut delivered = 0;
        for id in ids {
            if Some(id.as_str()) == exclude {
                continue;
            }
            if self.send_to(id, message.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// 방의 현재 멤버 전체에게 브로드캐스트 (`exclude` 제외)
    pub fn broadcast(&self, room_id: &str, exclude: Option<&str>, message: &ServerMessage) -> usize {
        match self.rooms.get(room_id) {
            Some(room) => self.send_to_all(room.members.iter(), exclude, message),
            None => 0,
        }
    }

    /// 구조 불변식 검사. 처음 발견한 위반 반환
    pub fn check_invariants(&self) -> Result<(), String> {
        for (room_id, room) in &self.rooms {
            if !room.members.contains(&room.host) {
                return Err(format!("room {room_id} host {} is not a member", room.host));
            }
        }
        for (id, client) in &self.clients {
            let Some(room_id) = &client.room_id else {
                continue;
            };
            if !self.rooms.contains_key(room_id) {
                return Err(format!("client {id} points at missing room {room_id}"));
            }
        }
        Ok(())
    }
}

/// 공유용 짧은 토큰 (소문자 hex 8자)
fn generate_room_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}
