//! DHT wire protocol module
//!
//! Message types and length-prefixed JSON framing.

pub mod message;
pub mod wire;

// Re-export main types
pub use message::{Query, Reply, Request, Response};
pub use wire::{read_frame, write_frame, MAX_FRAME_LEN};
