//! Test doubles and fixtures for agentmux.
//!
//! [`MockPane`] stands in for the tmux pane: it records every injected
//! keystroke, serves scripted pane snapshots, and lets tests steer the
//! client-activity timestamp and the visible agent pid.
//! [`RuntimeFixture`] builds throwaway runtime directories with real named
//! pipes.

pub mod fixtures;
pub mod mocks;

pub use fixtures::RuntimeFixture;
pub use mocks::{MockPane, SentKeys};
