//! 시그널 중계 및 커서 브로드캐스트

use crate::protocol::{CursorPosition, ServerMessage};
use crate::state::Coordinator;
use serde_json::Value;

/// 협상 메시지를 특정 클라이언트에게 중계
///
/// 내용은 검사하지 않는다. 대상이 없으면 송신자에게 알리지 않고 버린다.
pub async fn handle_signal(state: &Coordinator, from_id: &str, target_id: &str, signal: Value) {
    let registry = state.lock().await;

    let delivered = registry.send_to(
        target_id,
        ServerMessage::Signal {
            sender: from_id.to_string(),
            signal,
        },
    );

    if delivered {
        tracing::debug!(from = %from_id, to = %target_id, "Relayed signal");
    } else {
        tracing::warn!(from = %from_id, to = %target_id, "Dropped signal for unknown target");
    }
}

/// 커서 위치를 같은 방 멤버에게 브로드캐스트
pub async fn handle_cursor_move(state: &Coordinator, from_id: &str, position: CursorPosition) {
    let registry = state.lock().await;

    let Some(room_id) = registry.client(from_id).and_then(|c| c.room_id.clone()) else {
        return;
    };
    if !registry.is_member(&room_id, from_id) {
        // 아직 승인 대기 중
        return;
    }

    registry.broadcast(
        &room_id,
        Some(from_id),
        &ServerMessage::CursorUpdate {
            client_id: from_id.to_string(),
            position,
        },
    );
}
