//! HTTP surface: server, dispatch pipeline, forwarding, WebSocket proxy.

pub mod forward;
pub mod pipeline;
pub mod request;
pub mod server;
pub mod websocket;

pub use server::{AppState, GatewayServer};
