//! Driver for the Bitwarden `bw` command-line tool.
//!
//! This module provides:
//! - The `ToolRunner` seam over which every tool interaction flows
//! - Session key extraction from the tool's human-readable output
//! - The session state machine (environment session, unlock, login)
//! - Vault export with throttled, sequential attachment downloads
//!
//! # Architecture
//! `BwClient` knows the tool's argument forms; `SessionManager` and
//! `VaultExportGateway` build on it. Tests swap the process-backed runner
//! for `ScriptedRunner`.

pub mod client;
pub mod export;
pub mod extractor;
pub mod runner;
pub mod scripted;
pub mod session;
pub mod throttle;

pub use client::BwClient;
pub use export::VaultExportGateway;
pub use extractor::{SessionKeyExtractor, TextExtractor};
pub use runner::{
    CredentialChannel, Invocation, ProcessRunner, StderrMode, StdinMode, ToolOutput, ToolRunner,
};
pub use scripted::{RecordedCall, ScriptedRunner};
pub use session::{SessionManager, SessionState};
pub use throttle::Throttle;

/// Default delay between attachment requests, in milliseconds.
pub const DEFAULT_ATTACHMENT_DELAY_MS: u64 = 300;
