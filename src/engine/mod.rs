//! State machine engines (`spec.md` §4.4): one module per entity type.

pub mod room_engine;
pub mod session_engine;

pub use room_engine::RoomEngine;
pub use session_engine::SessionEngine;
