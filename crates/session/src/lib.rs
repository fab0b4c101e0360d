//! Parley session engine.
//!
//! Room-scoped real-time sessions over WebSocket: passcode admission,
//! refcounted presence, typing aggregation, message relay, a durable
//! log bridge, and a cross-process fan-out backplane.

pub mod auth;
pub mod backplane;
pub mod durable_log;
pub mod error;
pub mod events;
pub mod hub;
pub mod relay;
pub mod rooms;
pub mod socket;

pub use auth::{AdmittedConnection, Admission, HandshakeParams};
pub use backplane::{Backplane, LocalBackplane};
pub use durable_log::LogProducer;
pub use error::{SessionError, SessionResult};
pub use events::{
    ClientEvent, ConnectionId, Envelope, MemberProfile, RelayedMessage, RoomEvent, RoomFrame,
    ServerEvent,
};
pub use hub::{SessionConnection, SessionHub};
pub use rooms::{LeaveSnapshot, RoomRegistry};
pub use socket::{websocket_handler, SessionState};
