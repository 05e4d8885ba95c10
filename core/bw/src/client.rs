//! Typed wrappers over the vault tool's argument forms.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::extractor::{SessionKeyExtractor, TextExtractor};
use crate::runner::{Invocation, ToolOutput, ToolRunner};
use portvault_common::{Error, Folder, Result, Session, VaultItem};

/// Client for the `bw` command-line tool.
#[derive(Clone)]
pub struct BwClient {
    runner: Arc<dyn ToolRunner>,
    extractor: Arc<dyn SessionKeyExtractor>,
}

impl BwClient {
    /// Create a client using the plain-text extractor.
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self::with_extractor(runner, Arc::new(TextExtractor))
    }

    /// Create a client with a custom extractor.
    pub fn with_extractor(
        runner: Arc<dyn ToolRunner>,
        extractor: Arc<dyn SessionKeyExtractor>,
    ) -> Self {
        Self { runner, extractor }
    }

    /// Unlock an already logged-in vault; the master password is read from stdin.
    pub async fn unlock(&self) -> Result<Session> {
        let output = self
            .runner
            .run(&Invocation::new("unlock").with_credentials())
            .await?;
        self.extractor
            .extract(&output.stdout, Some(&output.stderr))
    }

    /// Log in interactively; prompts and errors go to the user's terminal.
    pub async fn login(&self) -> Result<Session> {
        let output = self
            .runner
            .run(&Invocation::new("login").with_credentials().inherit_stderr())
            .await?;
        self.extractor.extract(&output.stdout, None)
    }

    /// Log out of the tool.
    pub async fn logout(&self) -> Result<()> {
        self.run_checked(Invocation::new("logout")).await.map(|_| ())
    }

    /// Pull the latest vault state from the server.
    pub async fn sync(&self, session: &Session) -> Result<()> {
        self.run_checked(Invocation::new("sync").session(session))
            .await
            .map(|_| ())
    }

    /// List all items in the vault.
    pub async fn list_items(&self, session: &Session) -> Result<Vec<VaultItem>> {
        let stdout = self
            .run_checked(Invocation::new("list").arg("items").session(session))
            .await?;
        parse_json(&stdout, "item list")
    }

    /// List all folders in the vault.
    pub async fn list_folders(&self, session: &Session) -> Result<Vec<Folder>> {
        let stdout = self
            .run_checked(Invocation::new("list").arg("folders").session(session))
            .await?;
        parse_json(&stdout, "folder list")
    }

    /// Download one attachment to `output`.
    pub async fn get_attachment(
        &self,
        session: &Session,
        item_id: &str,
        attachment_id: &str,
        output: &Path,
    ) -> Result<()> {
        let invocation = Invocation::new("get")
            .arg("attachment")
            .arg(attachment_id)
            .arg("--itemid")
            .arg(item_id)
            .arg("--output")
            .arg(output.to_string_lossy())
            .session(session);
        self.run_checked(invocation).await.map(|_| ())
    }

    /// Create a folder; returns the new folder id.
    pub async fn create_folder(&self, session: &Session, folder: &Value) -> Result<String> {
        self.create("folder", session, folder).await
    }

    /// Create an item; returns the new item id.
    pub async fn create_item(&self, session: &Session, item: &Value) -> Result<String> {
        self.create("item", session, item).await
    }

    /// Upload `file` as an attachment of `item_id`.
    pub async fn create_attachment(
        &self,
        session: &Session,
        item_id: &str,
        file: &Path,
    ) -> Result<()> {
        let invocation = Invocation::new("create")
            .arg("attachment")
            .arg("--file")
            .arg(file.to_string_lossy())
            .arg("--itemid")
            .arg(item_id)
            .session(session);
        self.run_checked(invocation).await.map(|_| ())
    }

    async fn create(&self, object: &str, session: &Session, payload: &Value) -> Result<String> {
        let json =
            serde_json::to_string(payload).map_err(|e| Error::Serialization(e.to_string()))?;
        let invocation = Invocation::new("create")
            .arg(object)
            .secret_arg(STANDARD.encode(json))
            .session(session);
        let stdout = self.run_checked(invocation).await?;

        let created: Value = parse_json(&stdout, object)?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Tool(format!("created {} has no id", object)))
    }

    /// Run and return stdout, turning a failed exit into a classified error.
    async fn run_checked(&self, invocation: Invocation) -> Result<String> {
        let output = self.runner.run(&invocation).await?;
        if output.success {
            return Ok(output.stdout);
        }
        debug!("{} failed: {}", invocation.display_args(), output.message());
        Err(self.failure(&output))
    }

    fn failure(&self, output: &ToolOutput) -> Error {
        self.extractor
            .classify_failure(&output.stderr)
            .or_else(|| self.extractor.classify_failure(&output.stdout))
            .unwrap_or_else(|| Error::Tool(output.message().to_string()))
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &str, what: &str) -> Result<T> {
    serde_json::from_str(stdout.trim())
        .map_err(|e| Error::Serialization(format!("invalid {} from vault tool: {}", what, e)))
}
