//! Repository implementations.

pub mod member_repository;
pub mod message_repository;
pub mod room_repository;

pub use member_repository::MemberRepository;
pub use message_repository::MessageRepository;
pub use room_repository::RoomRepository;
