//! Tether Bridge Library
//!
//! Core functionality for the Tether bridge:
//! - Channel abstraction and the Telegram long-poll backend
//! - Pending-request store with exactly-once resolution
//! - Permission orchestrator relaying host requests to the operator
//! - Remote dispatcher for operator commands and prompt forwarding
//! - Notification emitter for fire-and-forget status events
//! - NDJSON hook feed over stdin/stdout

pub mod channel;
pub mod dispatcher;
pub mod hook;
pub mod notify;
pub mod orchestrator;
pub mod pending;
