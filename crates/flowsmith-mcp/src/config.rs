use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::layout::WorkDir;
use crate::model::AgentDefaults;

/// Optional `<FLOWSMITH_HOME>/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub pipeline: Option<PipelineCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub compact: Option<bool>,
    pub pretty: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PipelineCfg {
    pub work_dir: Option<String>,
    pub strategy: Option<String>,
    pub list_timeout_ms: Option<u64>,
    pub agent_timeout_secs: Option<u64>,
    pub orchestrator_step_budget: Option<u32>,
    pub designer_step_budget: Option<u32>,
    pub agent_model: Option<String>,
    pub agent_provider: Option<String>,
    pub agent_max_steps: Option<u32>,
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// How workflow and agent definitions are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStrategy {
    /// Deterministic keyword grouping; no LLM involved.
    RuleBased,
    /// An LLM agent writes the artifacts; we recover their location.
    Delegated,
}

impl SynthesisStrategy {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rule_based" | "rule-based" | "rules" | "table" => Ok(SynthesisStrategy::RuleBased),
            "delegated" | "agent" | "llm" => Ok(SynthesisStrategy::Delegated),
            other => anyhow::bail!("unknown synthesis strategy '{other}'"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SynthesisStrategy::RuleBased => "rule_based",
            SynthesisStrategy::Delegated => "delegated",
        }
    }
}

/// Which tool surface the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    /// Phase tools plus `generate`.
    Full,
    /// Phase tools only; what the orchestrator's agent session attaches.
    Phases,
}

impl ServerRole {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(ServerRole::Full),
            "phases" => Ok(ServerRole::Phases),
            other => anyhow::bail!("unknown server role '{other}'"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Full => "full",
            ServerRole::Phases => "phases",
        }
    }
}

/// Everything the pipeline needs, resolved once at startup and passed down.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_dir: WorkDir,
    pub strategy: SynthesisStrategy,
    /// Bound on each step of a discovery session (start, list, shutdown).
    pub list_timeout: Duration,
    /// Bound on one whole agent run.
    pub agent_timeout: Duration,
    pub orchestrator_step_budget: u32,
    pub designer_step_budget: u32,
    pub agent_defaults: AgentDefaults,
}

impl PipelineSettings {
    pub fn new(work_dir: impl Into<PathBuf>, strategy: SynthesisStrategy) -> Self {
        Self {
            work_dir: WorkDir::new(work_dir),
            strategy,
            list_timeout: Duration::from_millis(15_000),
            agent_timeout: Duration::from_secs(900),
            orchestrator_step_budget: 10,
            designer_step_budget: 30,
            agent_defaults: AgentDefaults::default(),
        }
    }

    /// Resolved settings as the environment a relaunched server reads them
    /// back from. The agent host may launch MCP servers with a scrubbed
    /// environment, so values are passed explicitly instead of inherited.
    pub fn to_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("WORK_DIR", self.work_dir.root().display().to_string()),
            ("SYNTHESIS_STRATEGY", self.strategy.as_str().to_string()),
            ("LIST_TIMEOUT_MS", self.list_timeout.as_millis().to_string()),
            ("AGENT_TIMEOUT_SECS", self.agent_timeout.as_secs().to_string()),
            (
                "ORCHESTRATOR_STEP_BUDGET",
                self.orchestrator_step_budget.to_string(),
            ),
            ("DESIGNER_STEP_BUDGET", self.designer_step_budget.to_string()),
            ("AGENT_MODEL", self.agent_defaults.model.clone()),
            ("AGENT_PROVIDER", self.agent_defaults.provider.clone()),
            ("AGENT_MAX_STEPS", self.agent_defaults.max_steps.to_string()),
        ]
    }
}

/// Logging knobs forwarded verbatim to a relaunched server when set.
pub const LOGGING_VARS: [&str; 7] = [
    "RUST_LOG",
    "TRACING_FILTER",
    "TRACING_JSON",
    "TRACING_COMPACT",
    "TRACING_PRETTY",
    "LOG_TO_FILE",
    "LOG_DIR",
];

/// Environment variables recognised as LLM provider credentials.
pub const CREDENTIAL_VARS: [&str; 4] = [
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GOOGLE_API_KEY",
    "AZURE_OPENAI_API_KEY",
];

/// Which credential variables are set (names only, never values).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmCredentials {
    pub found: Vec<&'static str>,
}

impl LlmCredentials {
    pub fn detect() -> Self {
        Self::detect_with(|k| std::env::var(k).ok())
    }

    pub fn detect_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let found = CREDENTIAL_VARS
            .iter()
            .copied()
            .filter(|k| lookup(k).is_some_and(|v| !v.trim().is_empty()))
            .collect();
        Self { found }
    }

    pub fn is_available(&self) -> bool {
        !self.found.is_empty()
    }
}
