//! Realtime transport: the in-process room hub and its WebSocket front.

pub mod hub;

#[cfg(feature = "web-axum")]
pub mod ws;

pub use hub::{ConnectionId, RoomHub};
