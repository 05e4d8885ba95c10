//! Session key extraction from the vault tool's output.
//!
//! The tool has no structured protocol for unlock and login: success and
//! failure are both human-readable text, sometimes mixed with echoed prompts.
//! Known failure markers always win over anything that looks like a token,
//! because failure paths can still leave token-shaped noise on stdout.

use regex::Regex;
use std::sync::LazyLock;

use portvault_common::{Error, Result, Session};

/// Printed when no account is logged in.
pub const NOT_LOGGED_IN: &str = "You are not logged in.";

/// Printed when a command needs an unlocked vault.
pub const VAULT_LOCKED: &str = "Vault is locked.";

/// Printed when unlock or login is given the wrong master password.
pub const INVALID_MASTER_PASSWORD: &str = "Invalid master password.";

/// Prompt echoes that can precede the answer on stdout.
const PROMPTS: [&str; 2] = ["? Email address:", "? Master password:"];

/// Shortest line accepted as a bare session token.
const MIN_TOKEN_LEN: usize = 16;

static SESSION_ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"BW_SESSION="([^"\s]+)""#).expect("valid regex"));

/// Turns captured tool output into a session or a classified failure.
pub trait SessionKeyExtractor: Send + Sync {
    /// Classify text against the known failure markers.
    fn classify_failure(&self, text: &str) -> Option<Error>;

    /// Extract a session token from unlock/login output.
    ///
    /// # Errors
    /// - `NotLoggedIn`, `VaultLocked`, `InvalidMasterPassword` when a marker is present
    /// - `UnrecognizedOutput` when neither a marker nor a token is found
    fn extract(&self, stdout: &str, stderr: Option<&str>) -> Result<Session>;
}

/// Extractor for the tool's plain-text output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl TextExtractor {
    fn token_from_assignment(stdout: &str) -> Option<&str> {
        SESSION_ASSIGNMENT
            .captures_iter(stdout)
            .last()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    fn token_from_trailing_line(stdout: &str) -> Option<&str> {
        let line = stdout
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty() && !PROMPTS.iter().any(|p| line.starts_with(p)))?;

        let token_shaped = line.len() >= MIN_TOKEN_LEN
            && !line.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'');
        token_shaped.then_some(line)
    }
}

impl SessionKeyExtractor for TextExtractor {
    fn classify_failure(&self, text: &str) -> Option<Error> {
        if text.contains(NOT_LOGGED_IN) {
            Some(Error::NotLoggedIn)
        } else if text.contains(INVALID_MASTER_PASSWORD) {
            Some(Error::InvalidMasterPassword)
        } else if text.contains(VAULT_LOCKED) {
            Some(Error::VaultLocked)
        } else {
            None
        }
    }

    fn extract(&self, stdout: &str, stderr: Option<&str>) -> Result<Session> {
        for text in [Some(stdout), stderr].into_iter().flatten() {
            if let Some(err) = self.classify_failure(text) {
                return Err(err);
            }
        }

        let token = Self::token_from_assignment(stdout)
            .or_else(|| Self::token_from_trailing_line(stdout));

        match token {
            Some(token) => Session::new(token),
            None => {
                let hint = stderr
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .and_then(|s| s.lines().next())
                    .unwrap_or("no session key in tool output");
                Err(Error::UnrecognizedOutput(hint.to_string()))
            }
        }
    }
}
