//! Agent Config Synthesizer: one agent per distinct `agent_config_name`.

use std::path::Path;

use serde::Serialize;

use super::{PhaseTools, require_input};
use crate::error::{PhaseError, Status};
use crate::extract::{AGENT_CONFIGS_MARKER, Extraction, MarkerParser};
use crate::layout::{ProjectDir, json_files, read_json, write_json};
use crate::model::{AgentConfig, AgentDefaults, WorkflowConfig, raw_tool_name, service_from_workflow_name};

/// Only the head of a tool sequence shapes the capability sentence.
const CAPABILITY_TOOLS: usize = 5;

const FALLBACK_CAPABILITY: &str = "perform various operations";

/// Capability phrase for one tool, by keyword on its raw name.
fn capability(tool: &str) -> Option<&'static str> {
    let raw = raw_tool_name(tool).to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| raw.contains(w));
    if has(&["add", "create"]) {
        Some("create new entities")
    } else if has(&["query", "search", "get"]) {
        Some("search and retrieve information")
    } else if has(&["list"]) {
        Some("list existing entities")
    } else if has(&["update", "edit"]) {
        Some("modify existing entities")
    } else {
        None
    }
}

/// Deduplicated phrases for the first few tools, in first-seen order.
pub fn capabilities(tools: &[String]) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for phrase in tools.iter().take(CAPABILITY_TOOLS).filter_map(|t| capability(t)) {
        if !out.contains(&phrase) {
            out.push(phrase);
        }
    }
    out
}

pub fn system_prompt(service: &str, capabilities: &[&str]) -> String {
    let can = if capabilities.is_empty() {
        FALLBACK_CAPABILITY.to_string()
    } else {
        capabilities.join(", ")
    };
    format!(
        "You are an expert agent for the {service} system. You can {can} using the available tools. Execute tasks efficiently and provide clear results."
    )
}

/// Agents for a workflow set. The first workflow naming an agent defines it.
pub fn rule_based_agents(workflows: &[WorkflowConfig], defaults: &AgentDefaults) -> Vec<AgentConfig> {
    let mut out: Vec<AgentConfig> = Vec::new();
    for wf in workflows {
        if out.iter().any(|a| a.agent_name == wf.agent_config_name) {
            tracing::debug!(
                agent = %wf.agent_config_name,
                workflow = %wf.workflow_name,
                "agent already defined; keeping first"
            );
            continue;
        }
        let service = service_from_workflow_name(&wf.workflow_name);
        let prompt = system_prompt(service, &capabilities(&wf.tool_sequence));
        out.push(AgentConfig::new(
            &wf.agent_config_name,
            prompt,
            wf.tool_sequence.clone(),
            defaults,
        ));
    }
    out
}

/// A workflow file that could not be used.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentConfigsReport {
    pub status: Status,
    pub agents_created: usize,
    pub agent_names: Vec<String>,
    pub configs_directory: String,
    pub project_complete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentDesignReport {
    pub status: Status,
    pub configs_directory: String,
    pub extraction: &'static str,
    pub message: String,
}

impl PhaseTools {
    /// Rule-based derivation from every `*.json` workflow in `workflows_dir`.
    ///
    /// Unreadable workflow files are reported in `failures` and the rest are
    /// still processed; the report is then `partial`. A missing directory is
    /// a hard error.
    pub async fn create_agent_configs(
        &self,
        workflows_dir: &Path,
    ) -> Result<AgentConfigsReport, PhaseError> {
        let files = json_files(workflows_dir)?;
        let mut workflows = Vec::with_capacity(files.len());
        let mut failures = Vec::new();
        for file in files {
            match read_json::<WorkflowConfig>(&file) {
                Ok(wf) => workflows.push(wf),
                Err(e) => {
                    tracing::warn!(path = %file.display(), "skipping workflow: {e}");
                    failures.push(FileFailure {
                        path: file.display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let project = ProjectDir::containing(workflows_dir);
        let agents = rule_based_agents(&workflows, &self.settings.agent_defaults);
        for agent in &agents {
            write_json(&project.agent_config_file(&agent.agent_name), agent)?;
        }
        let dir = project.agent_configs_dir();
        let project_complete = failures.is_empty() && !agents.is_empty();
        tracing::info!(
            agents = agents.len(),
            failures = failures.len(),
            dir = %dir.display(),
            "agent configs written"
        );

        Ok(AgentConfigsReport {
            status: if project_complete {
                Status::Success
            } else {
                Status::Partial
            },
            agents_created: agents.len(),
            agent_names: agents.into_iter().map(|a| a.agent_name).collect(),
            configs_directory: dir.display().to_string(),
            project_complete,
            failures,
        })
    }

    /// Delegated derivation. `designs` is the designs file (or workflows
    /// directory) the agent reads; configs default to `<project>/agent_configs`.
    pub async fn design_agent_configs_via_agent(
        &self,
        designs: &Path,
    ) -> Result<AgentDesignReport, PhaseError> {
        require_input(designs, "workflow designs")?;
        let designer = self.designer()?;
        let target = ProjectDir::containing(designs).agent_configs_dir();
        let defaults = &self.settings.agent_defaults;

        let task = format!(
            "Read the workflow designs in {}.\n\
             Write one agent config JSON file per distinct agent_config_name into {}, named <agent_name>.json.\n\
             Use model \"{}\", provider \"{}\" and max_steps {} unless a workflow needs otherwise.\n\
             Finish with a line of the form: {AGENT_CONFIGS_MARKER}<absolute directory>",
            designs.display(),
            target.display(),
            defaults.model,
            defaults.provider,
            defaults.max_steps,
        );
        let reply = designer
            .invoke(AGENT_DESIGNER_PROMPT, &task, self.settings.designer_step_budget)
            .await
            .map_err(|cause| PhaseError::Agent { cause })?;

        let extraction = MarkerParser::agent_configs().extract(&reply, || target.clone());
        let (status, message) = match &extraction {
            Extraction::Found(_) => (
                Status::Success,
                "Agent configurations generated by the designer agent".to_string(),
            ),
            Extraction::NotFound(_) => (
                Status::Partial,
                format!(
                    "Designer agent did not report a location; assuming the default {}",
                    target.display()
                ),
            ),
        };
        Ok(AgentDesignReport {
            status,
            extraction: extraction.label(),
            configs_directory: extraction.into_path().display().to_string(),
            message,
        })
    }
}

const AGENT_DESIGNER_PROMPT: &str = "\
You write agent configurations for workflows. An agent config is a JSON object with the fields \
agent_name, mcp_names, system_prompt, allowed_tools, model, provider and max_steps. \
allowed_tools are tool names of the form mcp__<service>__<tool>, and mcp_names lists the distinct \
<service> parts of allowed_tools. Create exactly one config per distinct agent name.";
