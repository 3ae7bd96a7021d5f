//! 핸들러 모듈
//!
//! 수신 제어 메시지의 단일 진입점은 [`route`]

pub mod connection;
pub mod room;
pub mod signaling;

pub use connection::*;
pub use room::*;
pub use signaling::*;

use crate::error::ProtocolError;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::state::Coordinator;

/// 원시 프레임 디코딩 후 라우팅. 잘못된 입력은 로그만 남기고 버림
pub async fn handle_text(state: &Coordinator, client_id: &str, text: &str) {
    match protocol::decode(text) {
        Ok(message) => route(state, client_id, message).await,
        Err(ProtocolError::UnknownKind(kind)) => {
            tracing::info!(client_id = %client_id, kind = %kind, "Unknown message type ignored");
        }
        Err(err) => {
            tracing::warn!(client_id = %client_id, error = %err, "Dropped malformed message");
        }
    }
}

/// `client_id`가 보낸 메시지 처리
///
/// 프로토콜 오류는 송신자에게 `error` 메시지로 돌려보낸다. 연결은 끊지 않는다.
pub async fn route(state: &Coordinator, client_id: &str, message: ClientMessage) {
    let kind = message.kind();

    let result = match message {
        ClientMessage::Heartbeat {} => {
            handle_heartbeat(state, client_id).await;
            Ok(())
        }
        ClientMessage::CreateRoom { name } => handle_create_room(state, client_id, name).await,
        ClientMessage::JoinRequest { room_id, name } => {
            handle_join_request(state, client_id, &room_id, name).await
        }
        ClientMessage::ApproveJoin { target_client_id } => {
            handle_approve_join(state, client_id, &target_client_id).await
        }
        ClientMessage::RejectJoin { target_client_id } => {
            handle_reject_join(state, client_id, &target_client_id).await
        }
        ClientMessage::LeaveRoom {} => {
            handle_leave_room(state, client_id).await;
            Ok(())
        }
        ClientMessage::Signal { target, signal } => {
            handle_signal(state, client_id, &target, signal).await;
            Ok(())
        }
        ClientMessage::CursorMove { position } => {
            handle_cursor_move(state, client_id, position).await;
            Ok(())
        }
    };

    if let Err(err) = result {
        tracing::info!(client_id = %client_id, kind = %kind, error = %err, "Request refused");
        state.lock().await.send_to(
            client_id,
            ServerMessage::Error {
                message: err.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::{CursorPosition, PeerInfo};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct TestClient {
        id: String,
        rx: UnboundedReceiver<ServerMessage>,
    }

    impl TestClient {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    async fn connect(state: &Coordinator) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = handle_connection(state, tx).await;
        TestClient { id, rx }
    }

    async fn create_room(state: &Coordinator, host: &mut TestClient, name: &str) -> String {
        route(
            state,
            &host.id,
            ClientMessage::CreateRoom {
                name: Some(name.to_string()),
            },
        )
        .await;
        match host.drain().as_slice() {
            [ServerMessage::RoomCreated { room_id, client_id }] => {
                assert_eq!(client_id, &host.id);
                room_id.clone()
            }
            other => panic!("expected room_created, got {other:?}"),
        }
    }

    async fn request(state: &Coordinator, guest: &TestClient, room_id: &str, name: &str) {
        route(
            state,
            &guest.id,
            ClientMessage::JoinRequest {
                room_id: room_id.to_string(),
                name: Some(name.to_string()),
            },
        )
        .await;
    }

    async fn approve(state: &Coordinator, host: &TestClient, guest: &TestClient) {
        route(
            state,
            &host.id,
            ClientMessage::ApproveJoin {
                target_client_id: guest.id.clone(),
            },
        )
        .await;
    }

    async fn admit(
        state: &Coordinator,
        host: &mut TestClient,
        guest: &mut TestClient,
        room_id: &str,
        name: &str,
    ) {
        request(state, guest, room_id, name).await;
        approve(state, host, guest).await;
        host.drain();
        guest.drain();
    }

    async fn assert_invariants(state: &Coordinator) {
        if let Err(violation) = state.lock().await.check_invariants() {
            panic!("{violation}");
        }
    }

    #[tokio::test]
    async fn create_request_approve_scenario() {
        let state = Coordinator::new(Config::default());
        let mut x = connect(&state).await;
        let mut y = connect(&state).await;

        let room_id = create_room(&state, &mut x, "Ann").await;
        assert_eq!(room_id.len(), 8);

        request(&state, &y, &room_id, "Bo").await;
        assert_eq!(
            x.drain(),
            vec![ServerMessage::JoinRequest {
                client_id: y.id.clone(),
                name: "Bo".to_string()
            }]
        );
        assert!(y.drain().is_empty());

        approve(&state, &x, &y).await;
        assert_eq!(
            y.drain(),
            vec![
                ServerMessage::Joined {
                    room_id: room_id.clone(),
                    client_id: y.id.clone(),
                    is_host: false
                },
                ServerMessage::ExistingPeers {
                    peers: vec![PeerInfo {
                        id: x.id.clone(),
                        name: "Ann".to_string()
                    }]
                },
            ]
        );
        assert_eq!(
            x.drain(),
            vec![ServerMessage::PeerJoined {
                client_id: y.id.clone(),
                name: "Bo".to_string()
            }]
        );
        assert_invariants(&state).await;
    }

    #[tokio::test]
    async fn existing_peers_snapshot_excludes_target_and_precedes_fanout() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut a = connect(&state).await;
        let mut b = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut a, &room_id, "Al").await;

        request(&state, &b, &room_id, "Bea").await;
        host.drain();
        approve(&state, &host, &b).await;

        let b_msgs = b.drain();
        assert!(matches!(b_msgs[0], ServerMessage::Joined { .. }));
        match &b_msgs[1] {
            ServerMessage::ExistingPeers { peers } => {
                let mut ids: Vec<&str> = peers.iter().map(|p| p.id.as_str()).collect();
                ids.sort_unstable();
                let mut expected = vec![host.id.as_str(), a.id.as_str()];
                expected.sort_unstable();
                assert_eq!(ids, expected);
            }
            other => panic!("expected existing_peers, got {other:?}"),
        }
        assert_eq!(b_msgs.len(), 2);

        let joined = ServerMessage::PeerJoined {
            client_id: b.id.clone(),
            name: "Bea".to_string(),
        };
        assert_eq!(host.drain(), vec![joined.clone()]);
        assert_eq!(a.drain(), vec![joined]);
    }

    #[tokio::test]
    async fn join_request_for_missing_room_reports_error() {
        let state = Coordinator::new(Config::default());
        let mut y = connect(&state).await;

        request(&state, &y, "deadbeef", "Bo").await;

        assert_eq!(
            y.drain(),
            vec![ServerMessage::Error {
                message: "Room not found".to_string()
            }]
        );
        assert!(state.lock().await.client(&y.id).unwrap().room_id.is_none());
    }

    #[tokio::test]
    async fn rejected_client_never_becomes_member() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut member = connect(&state).await;
        let mut y = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut member, &room_id, "Al").await;

        request(&state, &y, &room_id, "Bo").await;
        route(
            &state,
            &host.id,
            ClientMessage::RejectJoin {
                target_client_id: y.id.clone(),
            },
        )
        .await;

        assert_eq!(
            y.drain(),
            vec![ServerMessage::Error {
                message: "Host rejected your request".to_string()
            }]
        );
        assert!(!state.lock().await.is_member(&room_id, &y.id));

        // 늦은 승인은 대기 중인 요청을 찾지 못함
        host.drain();
        approve(&state, &host, &y).await;
        assert!(y.drain().is_empty());
        assert!(member.drain().is_empty());
        assert_eq!(
            host.drain(),
            vec![ServerMessage::Error {
                message: "No pending join request from that client".to_string()
            }]
        );
        assert_invariants(&state).await;
    }

    #[tokio::test]
    async fn only_host_may_approve_or_reject() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut member = connect(&state).await;
        let mut y = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut member, &room_id, "Al").await;
        request(&state, &y, &room_id, "Bo").await;

        approve(&state, &member, &y).await;
        route(
            &state,
            &member.id,
            ClientMessage::RejectJoin {
                target_client_id: y.id.clone(),
            },
        )
        .await;

        assert!(y.drain().is_empty());
        assert_eq!(member.drain().len(), 2);
        assert!(!state.lock().await.is_member(&room_id, &y.id));
    }

    #[tokio::test]
    async fn host_disconnect_closes_room_with_single_host_left() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut a = connect(&state).await;
        let mut b = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut a, &room_id, "Al").await;
        admit(&state, &mut host, &mut b, &room_id, "Bea").await;
        a.drain();

        handle_disconnect(&state, &host.id).await;
        handle_disconnect(&state, &host.id).await;

        assert!(!state.lock().await.room_exists(&room_id));
        assert_eq!(a.drain(), vec![ServerMessage::HostLeft {}]);
        assert_eq!(b.drain(), vec![ServerMessage::HostLeft {}]);
        assert_invariants(&state).await;
    }

    #[tokio::test]
    async fn member_disconnect_keeps_room_and_notifies_once() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut a = connect(&state).await;
        let mut b = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut a, &room_id, "Al").await;
        admit(&state, &mut host, &mut b, &room_id, "Bea").await;
        a.drain();

        handle_disconnect(&state, &a.id).await;
        handle_disconnect(&state, &a.id).await;

        let left = ServerMessage::PeerLeft {
            client_id: a.id.clone(),
        };
        assert_eq!(host.drain(), vec![left.clone()]);
        assert_eq!(b.drain(), vec![left]);
        assert_eq!(
            state.lock().await.room_members(&room_id),
            HashSet::from([host.id.clone(), b.id.clone()])
        );
        assert_invariants(&state).await;
    }

    #[tokio::test]
    async fn pending_requester_disconnect_is_silent() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let y = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        request(&state, &y, &room_id, "Bo").await;
        host.drain();

        handle_disconnect(&state, &y.id).await;

        assert!(host.drain().is_empty());
        assert!(state.lock().await.room_exists(&room_id));
    }

    #[tokio::test]
    async fn signal_is_relayed_with_sender() {
        let state = Coordinator::new(Config::default());
        let a = connect(&state).await;
        let mut b = connect(&state).await;
        let envelope = json!({"type": "offer", "sdp": {"type": "offer", "sdp": "v=0"}});

        route(
            &state,
            &a.id,
            ClientMessage::Signal {
                target: b.id.clone(),
                signal: envelope.clone(),
            },
        )
        .await;

        assert_eq!(
            b.drain(),
            vec![ServerMessage::Signal {
                sender: a.id.clone(),
                signal: envelope
            }]
        );
    }

    #[tokio::test]
    async fn signal_to_unknown_target_is_silently_dropped() {
        let state = Coordinator::new(Config::default());
        let mut a = connect(&state).await;
        let mut b = connect(&state).await;

        route(
            &state,
            &a.id,
            ClientMessage::Signal {
                target: "nobody".to_string(),
                signal: json!({"type": "candidate"}),
            },
        )
        .await;

        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn cursor_updates_reach_room_mates_only() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut a = connect(&state).await;
        let mut outsider = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut a, &room_id, "Al").await;
        let position = CursorPosition { x: 0.5, y: 0.25 };

        route(&state, &a.id, ClientMessage::CursorMove { position }).await;
        route(&state, &outsider.id, ClientMessage::CursorMove { position }).await;

        assert_eq!(
            host.drain(),
            vec![ServerMessage::CursorUpdate {
                client_id: a.id.clone(),
                position
            }]
        );
        assert!(a.drain().is_empty());
        assert!(outsider.drain().is_empty());
    }

    #[tokio::test]
    async fn pending_requester_cursor_is_not_broadcast() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let y = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        request(&state, &y, &room_id, "Bo").await;
        host.drain();

        route(
            &state,
            &y.id,
            ClientMessage::CursorMove {
                position: CursorPosition { x: 0.1, y: 0.1 },
            },
        )
        .await;

        assert!(host.drain().is_empty());
    }

    #[tokio::test]
    async fn second_create_is_refused() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        create_room(&state, &mut host, "Ann").await;

        route(&state, &host.id, ClientMessage::CreateRoom { name: None }).await;

        assert_eq!(
            host.drain(),
            vec![ServerMessage::Error {
                message: "Already in a room".to_string()
            }]
        );
        assert_eq!(state.lock().await.room_count(), 1);
    }

    #[tokio::test]
    async fn full_room_refuses_requests() {
        let config = Config {
            room: crate::config::RoomConfig {
                max_size: 2,
                id_attempts: 8,
            },
            ..Config::default()
        };
        let state = Coordinator::new(config);
        let mut host = connect(&state).await;
        let mut a = connect(&state).await;
        let mut b = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut a, &room_id, "Al").await;

        request(&state, &b, &room_id, "Bea").await;

        assert_eq!(
            b.drain(),
            vec![ServerMessage::Error {
                message: "Room is full".to_string()
            }]
        );
        assert!(host.drain().is_empty());
    }

    #[tokio::test]
    async fn leave_room_by_host_closes_room_but_keeps_connection() {
        let state = Coordinator::new(Config::default());
        let mut host = connect(&state).await;
        let mut a = connect(&state).await;
        let room_id = create_room(&state, &mut host, "Ann").await;
        admit(&state, &mut host, &mut a, &room_id, "Al").await;

        route(&state, &host.id, ClientMessage::LeaveRoom {}).await;

        assert_eq!(a.drain(), vec![ServerMessage::HostLeft {}]);
        let registry = state.lock().await;
        assert!(!registry.room_exists(&room_id));
        assert!(registry.contains_client(&host.id));
        assert!(registry.client(&host.id).unwrap().room_id.is_none());
        assert!(registry.client(&a.id).unwrap().room_id.is_none());
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_dropped() {
        let state = Coordinator::new(Config::default());
        let mut a = connect(&state).await;

        handle_text(&state, &a.id, "{not json").await;
        handle_text(&state, &a.id, r#"{"type":"teleport","payload":{}}"#).await;
        handle_text(&state, &a.id, r#"{"type":"approve_join","payload":{}}"#).await;
        handle_text(&state, &a.id, r#"{"type":"heartbeat"}"#).await;

        assert_eq!(a.drain(), vec![ServerMessage::HeartbeatAck {}]);
        assert!(state.lock().await.contains_client(&a.id));
    }

    #[tokio::test]
    async fn host_invariant_holds_across_mixed_sequence() {
        let state = Coordinator::new(Config::default());
        let mut h1 = connect(&state).await;
        let mut h2 = connect(&state).await;
        let mut a = connect(&state).await;
        let mut b = connect(&state).await;
        let r1 = create_room(&state, &mut h1, "One").await;
        assert_invariants(&state).await;
        let r2 = create_room(&state, &mut h2, "Two").await;
        admit(&state, &mut h1, &mut a, &r1, "A").await;
        assert_invariants(&state).await;
        request(&state, &b, &r2, "B").await;
        assert_invariants(&state).await;
        handle_disconnect(&state, &h2.id).await;
        assert_invariants(&state).await;
        handle_disconnect(&state, &a.id).await;
        assert_invariants(&state).await;

        let registry = state.lock().await;
        assert!(registry.room_exists(&r1));
        assert!(!registry.room_exists(&r2));
        assert!(registry.client(&b.id).unwrap().room_id.is_none());
        drop(registry);
        b.drain();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_approve_and_reject_settle_one_way() {
        for _ in 0..32 {
            let state = Arc::new(Coordinator::new(Config::default()));
            let mut host = connect(&state).await;
            let mut y = connect(&state).await;
            let room_id = create_room(&state, &mut host, "Ann").await;
            request(&state, &y, &room_id, "Bo").await;
            host.drain();

            let send = |message: ClientMessage| {
                let state = state.clone();
                let host_id = host.id.clone();
                tokio::spawn(async move { route(&state, &host_id, message).await })
            };
            let approving = send(ClientMessage::ApproveJoin {
                target_client_id: y.id.clone(),
            });
            let rejecting = send(ClientMessage::RejectJoin {
                target_client_id: y.id.clone(),
            });
            let (approved, rejected) = tokio::join!(approving, rejecting);
            approved.unwrap();
            rejected.unwrap();

            assert_invariants(&state).await;
            let is_member = state.lock().await.is_member(&room_id, &y.id);
            let y_msgs = y.drain();
            if is_member {
                assert!(
                    matches!(
                        y_msgs.as_slice(),
                        [ServerMessage::Joined { .. }, ServerMessage::ExistingPeers { .. }]
                    ),
                    "admitted client got {y_msgs:?}"
                );
            } else {
                assert_eq!(
                    y_msgs,
                    vec![ServerMessage::Error {
                        message: "Host rejected your request".to_string()
                    }]
                );
                assert!(state.lock().await.client(&y.id).unwrap().room_id.is_none());
            }

            // 나중에 처리된 쪽은 대기 중인 요청을 찾지 못함
            assert!(host.drain().contains(&ServerMessage::Error {
                message: "No pending join request from that client".to_string()
            }));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_host_and_joiner_disconnects_close_room_once() {
        for _ in 0..32 {
            let state = Arc::new(Coordinator::new(Config::default()));
            let mut host = connect(&state).await;
            let mut joiner = connect(&state).await;
            let mut watcher = connect(&state).await;
            let pending = connect(&state).await;
            let room_id = create_room(&state, &mut host, "Ann").await;
            admit(&state, &mut host, &mut joiner, &room_id, "Bo").await;
            admit(&state, &mut host, &mut watcher, &room_id, "Cy").await;
            request(&state, &pending, &room_id, "Di").await;
            joiner.drain();
            watcher.drain();

            let tasks: Vec<_> = [&host.id, &joiner.id, &pending.id]
                .into_iter()
                .map(|id| {
                    let state = state.clone();
                    let id = id.clone();
                    tokio::spawn(async move { handle_disconnect(&state, &id).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            assert_invariants(&state).await;
            let registry = state.lock().await;
            assert!(!registry.room_exists(&room_id));
            assert_eq!(registry.client_count(), 1);
            assert!(registry.client(&watcher.id).unwrap().room_id.is_none());
            drop(registry);

            let host_left = ServerMessage::HostLeft {};
            let joiner_left = ServerMessage::PeerLeft {
                client_id: joiner.id.clone(),
            };
            let seen = watcher.drain();
            assert!(
                seen == vec![host_left.clone()] || seen == vec![joiner_left, host_left],
                "watcher saw {seen:?}"
            );
        }
    }
}
