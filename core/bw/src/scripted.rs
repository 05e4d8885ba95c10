//! In-memory stand-in for the vault tool.
//!
//! Records every invocation and answers through a handler closure. Used by
//! the test suites of every crate that drives the tool.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::runner::{Invocation, StdinMode, ToolOutput, ToolRunner};
use portvault_common::Result;

type Handler = dyn Fn(&Invocation) -> Result<ToolOutput> + Send + Sync;

/// One invocation seen by a [`ScriptedRunner`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub args: Vec<String>,
    pub stdin: StdinMode,
    pub at: Instant,
}

impl RecordedCall {
    /// First two arguments joined, e.g. `"list items"` or `"unlock"`.
    pub fn command(&self) -> String {
        self.args
            .iter()
            .take(2)
            .filter(|a| !a.starts_with("--"))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Tool runner answering from a closure.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    /// Create a runner that answers every invocation with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Invocation) -> Result<ToolOutput> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All invocations so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Commands of all invocations so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::command).collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                args: invocation.args().to_vec(),
                stdin: invocation.stdin,
                at: Instant::now(),
            });
        }
        (self.handler)(invocation)
    }
}
