//! Vault session management.
//!
//! Obtains a session token for the current run: an environment-provided
//! token when one was handed in, otherwise by unlocking, otherwise by
//! logging in. The environment token is an explicit constructor input, never
//! read from the process environment here.

use tracing::{debug, info, warn};

use crate::client::BwClient;
use portvault_common::{Error, Result, Session};

/// State of session acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been obtained yet.
    NoSession,
    /// Waiting on `unlock`.
    Unlocking,
    /// `unlock` reported that no account is logged in.
    LoggedOut,
    /// Waiting on `login`.
    LoggingIn,
    /// A session token is available.
    Ready,
    /// Acquisition failed; the manager will not retry.
    Failed,
}

/// Drives the vault tool to an authenticated session.
pub struct SessionManager {
    client: BwClient,
    env_session: Option<Session>,
    session: Option<Session>,
    state: SessionState,
}

impl SessionManager {
    /// Create a manager.
    ///
    /// `env_session` is a pre-authenticated token (e.g. from `BW_SESSION`);
    /// it is used as-is without validation.
    pub fn new(client: BwClient, env_session: Option<Session>) -> Self {
        Self {
            client,
            env_session,
            session: None,
            state: SessionState::NoSession,
        }
    }

    /// Current acquisition state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The client this manager drives.
    pub fn client(&self) -> &BwClient {
        &self.client
    }

    /// Obtain a session token.
    ///
    /// # Order
    /// 1. The environment session, if one was given
    /// 2. `unlock`, assuming an account is logged in but locked
    /// 3. `login`, only if `unlock` reported `NotLoggedIn`
    ///
    /// # Errors
    /// - Any `unlock` failure other than `NotLoggedIn`, without attempting login
    /// - Any `login` failure
    /// - Called again after a failed acquisition
    pub async fn acquire_session_key(&mut self) -> Result<Session> {
        match self.state {
            SessionState::Ready => {
                if let Some(session) = &self.session {
                    return Ok(session.clone());
                }
            }
            SessionState::Failed => {
                return Err(Error::InvalidInput(
                    "session acquisition already failed for this run".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(session) = &self.env_session {
            debug!("Using session from environment");
            let session = session.clone();
            return Ok(self.ready(session));
        }

        self.transition(SessionState::Unlocking);
        match self.client.unlock().await {
            Ok(session) => {
                info!("Vault unlocked");
                return Ok(self.ready(session));
            }
            Err(Error::NotLoggedIn) => self.transition(SessionState::LoggedOut),
            Err(err) => return Err(self.fail(err)),
        }

        self.transition(SessionState::LoggingIn);
        match self.client.login().await {
            Ok(session) => {
                info!("Logged in");
                Ok(self.ready(session))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Log out of the vault tool.
    ///
    /// Already being logged out is not an error.
    pub async fn logout(&mut self) -> Result<()> {
        self.session = None;
        self.state = SessionState::NoSession;
        match self.client.logout().await {
            Ok(()) => {
                info!("Logged out");
                Ok(())
            }
            Err(Error::NotLoggedIn) => {
                debug!("Logout skipped: not logged in");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Drop the environment session so the next acquisition unlocks or logs in.
    pub fn forget_env_session(&mut self) {
        if self.env_session.take().is_some() {
            debug!("Ignoring environment session for this run");
        }
        if self.state == SessionState::Ready {
            self.session = None;
            self.state = SessionState::NoSession;
        }
    }

    fn ready(&mut self, session: Session) -> Session {
        self.transition(SessionState::Ready);
        self.session = Some(session.clone());
        session
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!("Session acquisition failed: {}", err);
        self.transition(SessionState::Failed);
        err
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{StderrMode, ToolOutput};
    use crate::scripted::ScriptedRunner;
    use std::sync::Arc;

    const TOKEN_OUTPUT: &str = "$ export BW_SESSION=\"fresh-session-token-42\"\n";

    fn manager(runner: &Arc<ScriptedRunner>, env: Option<&str>) -> SessionManager {
        let client = BwClient::new(runner.clone());
        SessionManager::new(client, env.map(|t| Session::new(t).unwrap()))
    }

    #[tokio::test]
    async fn test_env_session_used_without_tool() {
        let runner = Arc::new(ScriptedRunner::new(|_| panic!("tool must not run")));
        let mut sessions = manager(&runner, Some("env-token-abcdefgh"));

        let session = sessions.acquire_session_key().await.unwrap();
        assert_eq!(session.expose(), "env-token-abcdefgh");
        assert_eq!(sessions.state(), SessionState::Ready);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unlock_path() {
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.args()[0].as_str() {
            "unlock" => Ok(ToolOutput::ok(TOKEN_OUTPUT)),
            other => panic!("unexpected command {}", other),
        }));
        let mut sessions = manager(&runner, None);

        let session = sessions.acquire_session_key().await.unwrap();
        assert_eq!(session.expose(), "fresh-session-token-42");
        assert_eq!(runner.commands(), vec!["unlock"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_login_when_not_logged_in() {
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.args()[0].as_str() {
            "unlock" => Ok(ToolOutput::failed("You are not logged in.")),
            "login" => {
                assert_eq!(inv.stderr, StderrMode::Inherit);
                Ok(ToolOutput::ok(TOKEN_OUTPUT))
            }
            other => panic!("unexpected command {}", other),
        }));
        let mut sessions = manager(&runner, None);

        let session = sessions.acquire_session_key().await.unwrap();
        assert_eq!(session.expose(), "fresh-session-token-42");
        assert_eq!(runner.commands(), vec!["unlock", "login"]);
        assert_eq!(sessions.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_other_unlock_failure_does_not_login() {
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.args()[0].as_str() {
            "unlock" => Ok(ToolOutput::failed("Invalid master password.")),
            other => panic!("unexpected command {}", other),
        }));
        let mut sessions = manager(&runner, None);

        assert!(matches!(
            sessions.acquire_session_key().await,
            Err(Error::InvalidMasterPassword)
        ));
        assert_eq!(sessions.state(), SessionState::Failed);
        assert_eq!(runner.commands(), vec!["unlock"]);

        // Failed is terminal.
        assert!(sessions.acquire_session_key().await.is_err());
        assert_eq!(runner.commands(), vec!["unlock"]);
    }

    #[tokio::test]
    async fn test_login_failure_is_terminal() {
        let runner = Arc::new(ScriptedRunner::new(|inv| match inv.args()[0].as_str() {
            "unlock" => Ok(ToolOutput::failed("You are not logged in.")),
            _ => Ok(ToolOutput::ok("Username or password is incorrect. Try again.")),
        }));
        let mut sessions = manager(&runner, None);

        assert!(matches!(
            sessions.acquire_session_key().await,
            Err(Error::UnrecognizedOutput(_))
        ));
        assert_eq!(sessions.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_ready_session_is_reused() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(ToolOutput::ok(TOKEN_OUTPUT))));
        let mut sessions = manager(&runner, None);

        sessions.acquire_session_key().await.unwrap();
        sessions.acquire_session_key().await.unwrap();
        assert_eq!(runner.commands(), vec!["unlock"]);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            Ok(ToolOutput::failed("You are not logged in."))
        }));
        let mut sessions = manager(&runner, None);

        sessions.logout().await.unwrap();
        sessions.logout().await.unwrap();
        assert_eq!(sessions.state(), SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_logout_propagates_other_errors() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(ToolOutput::failed("boom"))));
        let mut sessions = manager(&runner, None);

        assert!(matches!(sessions.logout().await, Err(Error::Tool(_))));
    }

    #[tokio::test]
    async fn test_forget_env_session_forces_unlock() {
        let runner = Arc::new(ScriptedRunner::new(|_| Ok(ToolOutput::ok(TOKEN_OUTPUT))));
        let mut sessions = manager(&runner, Some("stale-env-token-xyz"));

        sessions.forget_env_session();
        let session = sessions.acquire_session_key().await.unwrap();
        assert_eq!(session.expose(), "fresh-session-token-42");
        assert_eq!(runner.commands(), vec!["unlock"]);
    }
}
