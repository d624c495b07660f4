//! `Tether` Core Library
//!
//! Shared functionality for `Tether` components:
//! - Configuration resolution and hierarchy
//! - Decision model and reply-text normalization
//! - Persisted bridge state (active session, poll cursor, enabled flag)
//! - Host session API (listing sessions, submitting prompts)
//! - Common error types

pub mod config;
pub mod decision;
pub mod error;
pub mod sessions;
pub mod state;
pub mod tracing_init;

pub use config::Config;
pub use decision::Decision;
pub use error::{Error, Result};
pub use sessions::{HostError, SessionHost, SessionInfo};
pub use state::StateStore;
