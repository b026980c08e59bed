//! API handlers.

pub mod message;
pub mod root;
pub mod sse;
