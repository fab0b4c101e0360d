//! Domain entities for the storage layer.

pub mod member;
pub mod message;
pub mod room;

pub use member::Member;
pub use message::{NewStoredMessage, StoredMessage};
pub use room::Room;
