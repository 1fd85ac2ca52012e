//! Protocol implementations.

pub mod event;
pub mod h4;

// Re-export common types
pub use event::{EventFrame, RESPONSE_CAPACITY, ResponseBuffer, read_event};
pub use h4::{PacketType, TransferConfig, receive_exact, send_exact, send_packet};
