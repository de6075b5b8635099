//! LLM agent loop behind a narrow `invoke(system, task, step_budget)` seam.
//!
//! Pipeline logic only sees [`AgentRunner`]; the in-process Codex runner is
//! the production implementation and tests use a scripted stub.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use codex_core::config_types::McpServerConfig;

use crate::mcp::ServiceDescriptor;

/// Profile name written into the in-memory Codex config.
const PROFILE: &str = "flowsmith";

/// Appended to the transcript when the run was interrupted at the step cap.
pub const STEP_BUDGET_NOTE: &str = "[stopped after reaching the step budget]";

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one agent session to completion and return its free-text output.
    ///
    /// `step_budget` caps tool invocations (MCP calls, shell commands and
    /// patches). Reaching the cap interrupts the turn; whatever the agent
    /// said so far is still returned. Launch failures, transport errors and
    /// timeouts are errors.
    async fn invoke(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        step_budget: u32,
    ) -> anyhow::Result<String>;
}

/// Codex conversation run in-process, with a fixed set of MCP servers attached.
pub struct InprocCodexRunner {
    model: String,
    provider: String,
    cwd: PathBuf,
    timeout: Duration,
    servers: Vec<ServiceDescriptor>,
}

impl InprocCodexRunner {
    pub fn new(model: &str, provider: &str, cwd: PathBuf, timeout: Duration) -> Self {
        Self {
            model: model.to_string(),
            provider: provider.to_string(),
            cwd,
            timeout,
            servers: Vec::new(),
        }
    }

    /// Attach an MCP server the agent may call.
    pub fn with_server(mut self, server: ServiceDescriptor) -> Self {
        self.servers.push(server);
        self
    }

    async fn run(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        step_budget: u32,
    ) -> anyhow::Result<String> {
        use codex_core::config::{ConfigOverrides, ConfigToml, find_codex_home, load_config_as_toml};
        use codex_core::config_profile::ConfigProfile;
        use codex_core::protocol::{
            AskForApproval, EventMsg, InputItem, Op, TaskCompleteEvent, TurnAbortReason,
        };
        use codex_core::{ConversationManager, NewConversation};
        use codex_login::AuthManager;
        use codex_protocol::config_types::SandboxMode;

        if !self.cwd.is_absolute() {
            return Err(anyhow!("cwd must be an absolute path"));
        }
        std::fs::create_dir_all(&self.cwd)
            .with_context(|| format!("create agent cwd {}", self.cwd.display()))?;

        let codex_home = find_codex_home().context("failed to resolve codex home")?;
        let root = load_config_as_toml(&codex_home)?;
        let mut cfg: ConfigToml = root
            .try_into()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .context("failed to deserialize config.toml")?;

        cfg.profile = Some(PROFILE.to_string());
        let profile = ConfigProfile {
            model: Some(self.model.clone()),
            model_provider: Some(self.provider.clone()),
            approval_policy: Some(AskForApproval::Never),
            ..Default::default()
        };
        cfg.profiles.insert(PROFILE.to_string(), profile);
        for server in &self.servers {
            cfg.mcp_servers
                .insert(server.name.clone(), to_mcp_server_config(server)?);
        }

        let mut overrides = ConfigOverrides {
            config_profile: Some(PROFILE.to_string()),
            cwd: Some(self.cwd.clone()),
            sandbox_mode: Some(SandboxMode::WorkspaceWrite),
            ..Default::default()
        };
        if !system_prompt.trim().is_empty() {
            overrides.base_instructions = Some(system_prompt.to_string());
        }

        let config = codex_core::config::Config::load_from_base_config_with_overrides(
            cfg, overrides, codex_home,
        )?;
        tracing::info!(
            model = %config.model,
            provider = %config.model_provider_id,
            cwd = %config.cwd.display(),
            servers = self.servers.len(),
            step_budget,
            "starting agent run"
        );

        let conversation_manager = ConversationManager::new(AuthManager::shared(
            config.codex_home.clone(),
            config.preferred_auth_method,
        ));
        let NewConversation { conversation, .. } =
            conversation_manager.new_conversation(config).await?;

        let items = vec![InputItem::Text {
            text: task_prompt.to_string(),
        }];
        let initial_id = conversation.submit(Op::UserInput { items }).await?;
        tracing::debug!("submitted task event_id={}", initial_id);

        let mut transcript: Vec<String> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut steps: u32 = 0;
        let mut budget_hit = false;
        let mut shut_down = false;

        loop {
            let event = match conversation.next_event().await {
                Ok(ev) => ev,
                Err(e) => {
                    errors.push(format!("error receiving event: {e}"));
                    break;
                }
            };

            let step = match event.msg {
                EventMsg::AgentMessage(ev) => {
                    tracing::debug!("agent message len={}", ev.message.len());
                    transcript.push(ev.message);
                    false
                }
                EventMsg::TaskComplete(TaskCompleteEvent { last_agent_message }) => {
                    if let Some(msg) = last_agent_message
                        && transcript.last() != Some(&msg)
                    {
                        transcript.push(msg);
                    }
                    tracing::info!("task complete; shutting down conversation");
                    conversation.submit(Op::Shutdown).await.ok();
                    false
                }
                EventMsg::TurnAborted(ev) => {
                    match ev.reason {
                        TurnAbortReason::Interrupted => tracing::warn!("turn interrupted"),
                        TurnAbortReason::Replaced => tracing::warn!("turn replaced"),
                    }
                    conversation.submit(Op::Shutdown).await.ok();
                    false
                }
                EventMsg::ShutdownComplete => {
                    shut_down = true;
                    break;
                }
                EventMsg::Error(err) => {
                    tracing::warn!("agent error: {}", err.message);
                    errors.push(err.message);
                    false
                }
                EventMsg::StreamError(err) => {
                    tracing::warn!("stream error: {}", err.message);
                    false
                }
                EventMsg::McpToolCallBegin(ev) => {
                    tracing::info!(
                        "tool call server={}, tool={}",
                        ev.invocation.server,
                        ev.invocation.tool
                    );
                    true
                }
                EventMsg::McpToolCallEnd(ev) => {
                    tracing::debug!(
                        "tool call end tool={}, ok={}, duration_ms={}",
                        ev.invocation.tool,
                        ev.is_success(),
                        ev.duration.as_millis()
                    );
                    false
                }
                EventMsg::ExecCommandBegin(ev) => {
                    tracing::info!("exec cmd='{}'", ev.command.join(" "));
                    true
                }
                EventMsg::PatchApplyBegin(ev) => {
                    tracing::info!("apply_patch files={}", ev.changes.len());
                    true
                }
                EventMsg::TokenCount(usage) => {
                    tracing::debug!("tokens used: {}", usage.blended_total());
                    false
                }
                _ => false,
            };

            if step {
                steps += 1;
                if steps > step_budget && !budget_hit {
                    budget_hit = true;
                    tracing::warn!(steps, step_budget, "step budget exhausted; interrupting");
                    conversation.submit(Op::Interrupt).await.ok();
                }
            }
        }

        tracing::info!(
            steps,
            budget_hit,
            shut_down,
            messages = transcript.len(),
            "agent run finished"
        );
        if transcript.is_empty() && !errors.is_empty() {
            return Err(anyhow!(errors.join("\n"))).context("agent produced no output");
        }
        if !shut_down && transcript.is_empty() {
            return Err(anyhow!("agent event stream closed before completion"));
        }
        let mut out = transcript.join("\n");
        if budget_hit {
            out.push('\n');
            out.push_str(STEP_BUDGET_NOTE);
        }
        Ok(out)
    }
}

#[async_trait]
impl AgentRunner for InprocCodexRunner {
    async fn invoke(
        &self,
        system_prompt: &str,
        task_prompt: &str,
        step_budget: u32,
    ) -> anyhow::Result<String> {
        tokio::time::timeout(self.timeout, self.run(system_prompt, task_prompt, step_budget))
            .await
            .map_err(|_| anyhow!("agent run timed out after {:?}", self.timeout))?
    }
}

/// Codex server entry for a stdio descriptor.
pub fn to_mcp_server_config(server: &ServiceDescriptor) -> anyhow::Result<McpServerConfig> {
    let mut tbl = toml::Table::new();
    tbl.insert(
        "command".to_string(),
        toml::Value::String(server.command.clone()),
    );
    if !server.args.is_empty() {
        tbl.insert(
            "args".to_string(),
            toml::Value::Array(
                server
                    .args
                    .iter()
                    .map(|s| toml::Value::String(s.clone()))
                    .collect(),
            ),
        );
    }
    if !server.env.is_empty() {
        let env_tbl: toml::Table = server
            .env
            .iter()
            .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
            .collect();
        tbl.insert("env".to_string(), toml::Value::Table(env_tbl));
    }
    toml::Value::Table(tbl)
        .try_into()
        .with_context(|| format!("convert mcp server '{}'", server.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_becomes_codex_server_entry() {
        let mut svc = ServiceDescriptor::stdio("demo", "python", &["demo_server.py"]);
        svc.env.insert("FLOWSMITH_ROLE".into(), "phases".into());
        let cfg = to_mcp_server_config(&svc).unwrap();
        assert_eq!(cfg.command, "python");
        assert_eq!(cfg.args, vec!["demo_server.py".to_string()]);
        assert_eq!(
            cfg.env
                .as_ref()
                .and_then(|e| e.get("FLOWSMITH_ROLE"))
                .map(String::as_str),
            Some("phases")
        );
    }

    #[tokio::test]
    async fn relative_cwd_is_rejected() {
        let runner = InprocCodexRunner::new(
            "gpt-5-mini",
            "openai",
            PathBuf::from("relative/dir"),
            Duration::from_secs(1),
        );
        let err = runner.invoke("sys", "task", 1).await.unwrap_err();
        assert!(err.to_string().contains("absolute"));
    }
}
