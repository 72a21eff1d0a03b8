//! Push transport for interest and channel events.
//!
//! [`Connection`] keeps one STOMP-over-WebSocket session subscribed to the
//! signed-in user's topic and hands every decoded envelope to an
//! [`EventRouter`].

pub mod codec;
pub mod connection;
pub mod router;
pub mod socket;

pub use codec::{CodecError, decode_envelope};
pub use connection::{Connection, ConnectionConfig, Identity, Subscription};
pub use router::EventRouter;
pub use socket::{Dialer, MemoryDialer, MemoryPeer, WsDialer, http_to_ws_scheme};
