//! WebSocket layer: STOMP sessions over the `/ws` endpoint.
//!
//! Clients connect, subscribe to `/topic/...` destinations, and send to
//! `/app/...` destinations; see [`crate::stomp`] for the frame format.

pub mod connection;
pub mod handler;
pub mod subscription;
