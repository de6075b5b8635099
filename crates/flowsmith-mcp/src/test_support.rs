//! Scripted stand-ins for the tool lister and the agent runner.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;

use crate::mcp::{ListError, RemoteTool, ServiceDescriptor, ToolLister};
use crate::model::ToolsArtifact;
use crate::phases::discover::build_artifact;
use crate::runner::AgentRunner;

enum Listing {
    Tools(Vec<RemoteTool>),
    SessionFails(String),
    ListingFails(String),
}

/// Lister that counts how many sessions were opened.
pub struct StubLister {
    listing: Listing,
    sessions: AtomicUsize,
}

impl StubLister {
    pub fn new(names: &[&str]) -> Self {
        Self {
            listing: Listing::Tools(remote_tools(names)),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            listing: Listing::SessionFails(message.to_string()),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn failing_listing(message: &str) -> Self {
        Self {
            listing: Listing::ListingFails(message.to_string()),
            sessions: AtomicUsize::new(0),
        }
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolLister for StubLister {
    async fn list_tools(&self, _service: &ServiceDescriptor) -> Result<Vec<RemoteTool>, ListError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        match &self.listing {
            Listing::Tools(tools) => Ok(tools.clone()),
            Listing::SessionFails(m) => Err(ListError::Session(anyhow::anyhow!(m.clone()))),
            Listing::ListingFails(m) => Err(ListError::Listing(anyhow::anyhow!(m.clone()))),
        }
    }
}

pub fn remote_tools(names: &[&str]) -> Vec<RemoteTool> {
    names
        .iter()
        .map(|n| RemoteTool {
            name: n.to_string(),
            description: Some(format!("{n} tool")),
            input_schema: Some(json!({ "type": "object", "properties": {} })),
        })
        .collect()
}

pub fn tools_artifact(service: &str, names: &[&str]) -> ToolsArtifact {
    build_artifact(service, remote_tools(names))
}

#[derive(Debug, Clone)]
pub struct RunnerCall {
    pub system: String,
    pub task: String,
    pub step_budget: u32,
}

/// Runner that replays a canned reply (or failure) and records its prompts.
pub struct ScriptedRunner {
    reply: Result<String, String>,
    calls: Mutex<Vec<RunnerCall>>,
}

impl ScriptedRunner {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn invoke(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        step_budget: u32,
    ) -> anyhow::Result<String> {
        self.calls.lock().unwrap().push(RunnerCall {
            system: system_prompt.to_string(),
            task: task_prompt.to_string(),
            step_budget,
        });
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(m) => Err(anyhow::anyhow!(m.clone()).context("agent loop failed")),
        }
    }
}
