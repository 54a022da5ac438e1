//! Shared types for the agentmux workspace.
//!
//! Holds the configuration surface, the error enum, and the wire records
//! (producer messages, completed agent turns, readiness state) that every
//! other crate in the workspace consumes.

pub mod config;
pub mod error;
pub mod message;

pub use config::Config;
pub use error::MuxError;
pub use message::{Message, ReadyState, Turn};
