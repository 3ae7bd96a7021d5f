//! 프로토콜 모듈

pub mod messages;
pub mod signal;

pub use messages::*;
pub use signal::*;
