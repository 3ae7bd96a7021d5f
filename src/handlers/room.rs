//! 방 관리 핸들러

use crate::error::RoomError;
use crate::protocol::ServerMessage;
use crate::state::{Coordinator, Departure, Registry};

const DEFAULT_HOST_NAME: &str = "Host";
const DEFAULT_GUEST_NAME: &str = "Guest";

/// 방 생성 처리
pub async fn handle_create_room(
    state: &Coordinator,
    client_id: &str,
    name: Option<String>,
) -> Result<(), RoomError> {
    let mut registry = state.lock().await;

    if current_room(&registry, client_id).is_some() {
        return Err(RoomError::AlreadyInRoom);
    }

    let name = display_name(name, DEFAULT_HOST_NAME);
    let room_id = registry.create_room(client_id)?;
    registry.set_room(client_id, &room_id, &name);

    registry.send_to(
        client_id,
        ServerMessage::RoomCreated {
            room_id: room_id.clone(),
            client_id: client_id.to_string(),
        },
    );

    tracing::info!(client_id = %client_id, room_id = %room_id, name = %name, "Room created");
    Ok(())
}

/// 참여 요청 처리
///
/// 요청자의 방은 기록하지만 멤버 추가는 호스트 승인을 기다린다.
pub async fn handle_join_request(
    state: &Coordinator,
    client_id: &str,
    room_id: &str,
    name: Option<String>,
) -> Result<(), RoomError> {
    let room_id = room_id.trim();
    let max_size = state.config.room.max_size;
    let mut registry = state.lock().await;

    if current_room(&registry, client_id).is_some() {
        return Err(RoomError::AlreadyInRoom);
    }

    let Some(room) = registry.room(room_id) else {
        tracing::debug!(client_id = %client_id, room_id = %room_id, "Join request for missing room");
        return Err(RoomError::RoomNotFound);
    };
    if is_full(room.members.len(), max_size) {
        tracing::warn!(room_id = %room_id, "Room full, rejected join request");
        return Err(RoomError::RoomFull);
    }
    let host = room.host.clone();

    let name = display_name(name, DEFAULT_GUEST_NAME);
    registry.set_room(client_id, room_id, &name);

    registry.send_to(
        &host,
        ServerMessage::JoinRequest {
            client_id: client_id.to_string(),
            name: name.clone(),
        },
    );

    tracing::info!(client_id = %client_id, room_id = %room_id, name = %name, "Join request forwarded to host");
    Ok(())
}

/// 참여 승인 처리
///
/// 대상은 `joined`, `existing_peers` 순으로 받고, 두 메시지가 큐에 들어간 뒤에야
/// 나머지 멤버가 `peer_joined`를 받는다. 첫 offer를 누가 보낼지가 이 순서로 정해진다.
pub async fn handle_approve_join(
    state: &Coordinator,
    host_id: &str,
    target_id: &str,
) -> Result<(), RoomError> {
    let max_size = state.config.room.max_size;
    let mut registry = state.lock().await;

    let room_id = hosted_room(&registry, host_id)?;
    ensure_pending(&registry, &room_id, target_id)?;

    if is_full(registry.room_members(&room_id).len(), max_size) {
        tracing::warn!(room_id = %room_id, target = %target_id, "Room full, cannot approve");
        return Err(RoomError::RoomFull);
    }

    registry.add_member(&room_id, target_id);
    let peers = registry.peer_infos(&room_id, target_id);
    let name = registry
        .client(target_id)
        .and_then(|c| c.name.clone())
        .unwrap_or_else(|| DEFAULT_GUEST_NAME.to_string());

    registry.send_to(
        target_id,
        ServerMessage::Joined {
            room_id: room_id.clone(),
            client_id: target_id.to_string(),
            is_host: false,
        },
    );
    registry.send_to(target_id, ServerMessage::ExistingPeers { peers });

    registry.broadcast(
        &room_id,
        Some(target_id),
        &ServerMessage::PeerJoined {
            client_id: target_id.to_string(),
            name,
        },
    );

    tracing::info!(
        room_id = %room_id,
        client_id = %target_id,
        members = registry.room_members(&room_id).len(),
        "Join approved"
    );
    Ok(())
}

/// 참여 거절 처리
pub async fn handle_reject_join(
    state: &Coordinator,
    host_id: &str,
    target_id: &str,
) -> Result<(), RoomError> {
    let mut registry = state.lock().await;

    let room_id = hosted_room(&registry, host_id)?;
    ensure_pending(&registry, &room_id, target_id)?;

    registry.clear_room(target_id);
    registry.send_to(
        target_id,
        ServerMessage::Error {
            message: RoomError::Rejected.to_string(),
        },
    );

    tracing::info!(room_id = %room_id, client_id = %target_id, "Join rejected");
    Ok(())
}

/// 방 나가기 처리 (연결은 유지)
pub async fn handle_leave_room(state: &Coordinator, client_id: &str) {
    let mut registry = state.lock().await;

    let Some(room_id) = current_room(&registry, client_id) else {
        tracing::debug!(client_id = %client_id, "Leave without a room ignored");
        return;
    };

    depart_room(&mut registry, client_id, &room_id);
    registry.clear_room(client_id);
}

/// 방에서 클라이언트 제거 후 남은 멤버에게 알림
///
/// 연결 해제와 방 나가기에서 공용. 승인 전 요청자는 알림 없이 제거된다.
pub(crate) fn depart_room(registry: &mut Registry, client_id: &str, room_id: &str) {
    match registry.remove_member(room_id, client_id) {
        Departure::HostLeft { remaining } => {
            registry.send_to_all(remaining.iter(), None, &ServerMessage::HostLeft {});
            tracing::info!(
                room_id = %room_id,
                host = %client_id,
                notified = remaining.len(),
                "Host left, room closed"
            );
        }
        Departure::PeerLeft { remaining } => {
            registry.send_to_all(
                remaining.iter(),
                None,
                &ServerMessage::PeerLeft {
                    client_id: client_id.to_string(),
                },
            );
            tracing::info!(
                room_id = %room_id,
                client_id = %client_id,
                remaining = remaining.len(),
                "User left room"
            );
        }
        Departure::NotMember => {
            tracing::debug!(room_id = %room_id, client_id = %client_id, "Pending join request dropped");
        }
    }
}

fn current_room(registry: &Registry, client_id: &str) -> Option<String> {
    registry.client(client_id).and_then(|c| c.room_id.clone())
}

/// `host_id`가 호스트인 방, 아니면 `NotHost`
fn hosted_room(registry: &Registry, host_id: &str) -> Result<String, RoomError> {
    let room_id = current_room(registry, host_id).ok_or(RoomError::NotHost)?;
    if registry.room_host(&room_id) != Some(host_id) {
        return Err(RoomError::NotHost);
    }
    Ok(room_id)
}

/// `target_id`가 아직 멤버가 아니고 `room_id`에 대기 중인지 확인
fn ensure_pending(registry: &Registry, room_id: &str, target_id: &str) -> Result<(), RoomError> {
    let pending = registry
        .client(target_id)
        .is_some_and(|c| c.room_id.as_deref() == Some(room_id))
        && !registry.is_member(room_id, target_id);
    if pending {
        Ok(())
    } else {
        Err(RoomError::StaleTarget)
    }
}

fn is_full(members: usize, max_size: usize) -> bool {
    max_size > 0 && members >= max_size
}

fn display_name(name: Option<String>, fallback: &str) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
