//! 제어 연결 클라이언트
//!
//! WebSocket으로 코디네이터 프로토콜을 주고받고,
//! 수신한 메시지로 [`PeerOrchestrator`]를 구동한다.

use crate::error::ClientError;
use crate::peer::PeerOrchestrator;
use crate::protocol::{ClientMessage, CursorPosition, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub struct ControlConnection {
    outbound: UnboundedSender<ClientMessage>,
    inbound: UnboundedReceiver<ServerMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ControlConnection {
    /// 제어 연결 열기 (예: `ws://127.0.0.1:3000/ws`)
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut ws_sender, mut ws_receiver) = stream.split();

        let (outbound, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (in_tx, inbound) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(error = %err, "Failed to encode control message");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => {
                                if in_tx.send(msg).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "Dropped unreadable server message")
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Err(err) => {
                        tracing::debug!(error = %err, "Control connection read failed");
                        break;
                    }
                    _ => {}
                }
            }
        });

        tracing::info!(url = %url, "Control connection open");
        Ok(Self {
            outbound,
            inbound,
            writer,
            reader,
        })
    }

    /// 이 연결로 송신하는 컴포넌트(오케스트레이터)용 핸들
    pub fn sender(&self) -> UnboundedSender<ClientMessage> {
        self.outbound.clone()
    }

    /// 코디네이터의 다음 메시지. 연결이 끊기면 `None`
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }

    pub fn send(&self, message: ClientMessage) -> bool {
        self.outbound.send(message).is_ok()
    }

    pub fn create_room(&self, name: &str) -> bool {
        self.send(ClientMessage::CreateRoom {
            name: Some(name.to_string()),
        })
    }

    pub fn join_room(&self, room_id: &str, name: &str) -> bool {
        self.send(ClientMessage::JoinRequest {
            room_id: room_id.to_string(),
            name: Some(name.to_string()),
        })
    }

    pub fn approve_join(&self, client_id: &str) -> bool {
        self.send(ClientMessage::ApproveJoin {
            target_client_id: client_id.to_string(),
        })
    }

    pub fn reject_join(&self, client_id: &str) -> bool {
        self.send(ClientMessage::RejectJoin {
            target_client_id: client_id.to_string(),
        })
    }

    pub fn heartbeat(&self) -> bool {
        self.send(ClientMessage::Heartbeat {})
    }

    /// 로컬 화면 기준으로 정규화된 커서 전송
    pub fn send_cursor(&self, x: f64, y: f64) -> bool {
        self.send(ClientMessage::CursorMove {
            position: CursorPosition {
                x: x.clamp(0.0, 1.0),
                y: y.clamp(0.0, 1.0),
            },
        })
    }

    /// 연결이 닫힐 때까지 수신 메시지를 오케스트레이터에 전달
    pub async fn run(mut self, orchestrator: &PeerOrchestrator) {
        while let Some(message) = self.inbound.recv().await {
            orchestrator.handle_server_message(message).await;
        }
        tracing::info!("Control connection closed");
    }
}

impl Drop for ControlConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
