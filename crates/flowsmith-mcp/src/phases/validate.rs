//! Re-validate the workflows and agent configs of a finished project.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{PhaseTools, require_input};
use crate::error::PhaseError;
use crate::layout::{AGENT_CONFIGS_DIR, WORKFLOWS_DIR, json_files, read_json};
use crate::model::{AgentConfig, WorkflowConfig, mcp_names_from_tools, split_prefixed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub status: Verdict,
    pub workflows_checked: usize,
    pub agents_checked: usize,
    pub issues: Vec<Issue>,
}

#[derive(Default)]
struct Checker {
    issues: Vec<Issue>,
}

impl Checker {
    fn error(&mut self, path: &Path, message: String) {
        self.issues.push(Issue {
            severity: Severity::Error,
            path: path.display().to_string(),
            message,
        });
    }

    fn warn(&mut self, path: &Path, message: String) {
        self.issues.push(Issue {
            severity: Severity::Warning,
            path: path.display().to_string(),
            message,
        });
    }

    fn tool_names(&mut self, path: &Path, field: &str, tools: &[String]) {
        for t in tools {
            if split_prefixed(t).is_none() {
                self.error(path, format!("{field} entry '{t}' is not of the form mcp__<service>__<tool>"));
            }
        }
    }

    fn workflow(&mut self, path: &Path, wf: &WorkflowConfig) {
        if wf.workflow_name.trim().is_empty() {
            self.error(path, "workflow_name is empty".to_string());
        }
        if wf.agent_config_name.trim().is_empty() {
            self.error(path, "agent_config_name is empty".to_string());
        }
        if wf.tool_sequence.is_empty() {
            self.error(path, "tool_sequence is empty".to_string());
        }
        self.tool_names(path, "tool_sequence", &wf.tool_sequence);

        let placeholders = wf.placeholders();
        let mut declared = HashSet::new();
        for arg in &wf.templated_args {
            if !declared.insert(arg.name.as_str()) {
                self.error(path, format!("templated arg '{}' is declared twice", arg.name));
            }
        }
        for token in &placeholders {
            if !declared.contains(token.as_str()) {
                self.error(path, format!("placeholder '{{{{{token}}}}}' has no templated arg"));
            }
        }
        for arg in &wf.templated_args {
            if !placeholders.iter().any(|p| p == &arg.name) {
                self.warn(path, format!("templated arg '{}' is not used by input_prompt", arg.name));
            }
        }
    }

    fn agent(&mut self, path: &Path, agent: &AgentConfig) {
        if agent.agent_name.trim().is_empty() {
            self.error(path, "agent_name is empty".to_string());
        }
        if agent.max_steps == 0 {
            self.error(path, "max_steps must be positive".to_string());
        }
        self.tool_names(path, "allowed_tools", &agent.allowed_tools);
        let derived = mcp_names_from_tools(&agent.allowed_tools);
        let declared: HashSet<&str> = agent.mcp_names.iter().map(String::as_str).collect();
        let expected: HashSet<&str> = derived.iter().map(String::as_str).collect();
        if declared != expected {
            self.error(
                path,
                format!(
                    "mcp_names {:?} do not match the services in allowed_tools {:?}",
                    agent.mcp_names, derived
                ),
            );
        }
    }
}

/// Load every `T` in `dir`, recording unreadable files as issues.
fn load_dir<T: serde::de::DeserializeOwned>(
    dir: &Path,
    checker: &mut Checker,
) -> Result<Vec<(PathBuf, T)>, PhaseError> {
    let mut out = Vec::new();
    for file in json_files(dir)? {
        match read_json::<T>(&file) {
            Ok(v) => out.push((file, v)),
            Err(e) => checker.error(&file, e.to_string()),
        }
    }
    Ok(out)
}

impl PhaseTools {
    /// Check a project directory, or a single delegated designs file.
    pub async fn validate_project(&self, target: &Path) -> Result<ValidationReport, PhaseError> {
        require_input(target, "project")?;
        let mut checker = Checker::default();

        let (workflows, agents) = if target.is_file() {
            let designs: Vec<WorkflowConfig> = read_json(target)?;
            let workflows = designs
                .into_iter()
                .map(|wf| (target.to_path_buf(), wf))
                .collect::<Vec<_>>();
            (workflows, None)
        } else {
            let wf_dir = target.join(WORKFLOWS_DIR);
            let agent_dir = target.join(AGENT_CONFIGS_DIR);
            if !wf_dir.is_dir() && !agent_dir.is_dir() {
                return Err(PhaseError::Validation {
                    path: target.to_path_buf(),
                    reason: format!("neither {WORKFLOWS_DIR}/ nor {AGENT_CONFIGS_DIR}/ exists"),
                });
            }
            let workflows = if wf_dir.is_dir() {
                load_dir::<WorkflowConfig>(&wf_dir, &mut checker)?
            } else {
                Vec::new()
            };
            let agents = if agent_dir.is_dir() {
                Some(load_dir::<AgentConfig>(&agent_dir, &mut checker)?)
            } else {
                None
            };
            (workflows, agents)
        };

        let mut workflow_names = HashSet::new();
        for (path, wf) in &workflows {
            if !workflow_names.insert(wf.workflow_name.as_str()) {
                checker.error(path, format!("duplicate workflow_name '{}'", wf.workflow_name));
            }
            checker.workflow(path, wf);
        }

        let agents = agents.unwrap_or_default();
        let mut agent_names = HashSet::new();
        for (path, agent) in &agents {
            if !agent_names.insert(agent.agent_name.as_str()) {
                checker.error(path, format!("duplicate agent_name '{}'", agent.agent_name));
            }
            if path.file_stem().and_then(|s| s.to_str()) != Some(agent.agent_name.as_str()) {
                checker.warn(path, "file name does not match agent_name".to_string());
            }
            checker.agent(path, agent);
        }
        if !agents.is_empty() {
            for (path, wf) in &workflows {
                if !agent_names.contains(wf.agent_config_name.as_str()) {
                    checker.error(
                        path,
                        format!("agent_config_name '{}' has no agent config", wf.agent_config_name),
                    );
                }
            }
        }

        let invalid = checker
            .issues
            .iter()
            .any(|i| i.severity == Severity::Error);
        tracing::info!(
            target = %target.display(),
            workflows = workflows.len(),
            agents = agents.len(),
            issues = checker.issues.len(),
            invalid,
            "project validated"
        );
        Ok(ValidationReport {
            status: if invalid {
                Verdict::Invalid
            } else {
                Verdict::Valid
            },
            workflows_checked: workflows.len(),
            agents_checked: agents.len(),
            issues: checker.issues,
        })
    }
}
