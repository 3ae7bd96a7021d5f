//! PeerShare 시그널링
//!
//! 즉석 화면 공유 방 코디네이터. 호스트가 참여 요청을 승인하고,
//! 승인된 멤버들은 코디네이터를 거쳐 직접 미디어 세션을 협상한다.
//! 코디네이터는 작은 제어 메시지만 중계한다.
//!
//! 서버 쪽은 [`state::Coordinator`]와 [`handlers`] 라우터이며 [`server::app`]으로 서비스된다.
//! 클라이언트 쪽은 [`client::ControlConnection`]이 구동하는 [`peer::PeerOrchestrator`].

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod peer;
pub mod protocol;
pub mod server;
pub mod state;

pub use config::Config;
pub use server::app;
pub use state::Coordinator;
