//! 연결 핸들러

use crate::handlers::room::depart_room;
use crate::protocol::ServerMessage;
use crate::state::Coordinator;
use tokio::sync::mpsc::UnboundedSender;

/// 새 연결 처리
pub async fn handle_connection(
    state: &Coordinator,
    sender: UnboundedSender<ServerMessage>,
) -> String {
    let client_id = state.lock().await.register(sender);
    tracing::info!(client_id = %client_id, "New connection established");
    client_id
}

/// 연결 해제 처리 (클라이언트 제거 및 방 정리)
///
/// 같은 id로 여러 번 호출해도 안전. 첫 호출만 클라이언트를 찾아 처리한다.
pub async fn handle_disconnect(state: &Coordinator, client_id: &str) {
    let mut registry = state.lock().await;

    let Some(client) = registry.remove(client_id) else {
        tracing::debug!(client_id = %client_id, "Disconnect for unknown client ignored");
        return;
    };

    if let Some(room_id) = client.room_id.as_deref() {
        depart_room(&mut registry, client_id, room_id);
    }

    tracing::info!(
        client_id = %client_id,
        connected_secs = client.connected_at.elapsed().as_secs(),
        "Connection closed"
    );
}

/// Heartbeat 처리
pub async fn handle_heartbeat(state: &Coordinator, client_id: &str) {
    state
        .lock()
        .await
        .send_to(client_id, ServerMessage::HeartbeatAck {});
}
