//! 클라이언트 측 피어 협상

pub mod orchestrator;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use orchestrator::{PeerEvent, PeerOrchestrator};
pub use session::{Applied, NegotiationState, PeerSession, Role};
pub use transport::{CandidateSink, LocalMedia, MediaTrack, MediaTransport, TrackKind, TransportFactory};
