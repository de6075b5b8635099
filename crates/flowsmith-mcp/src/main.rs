use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use env_flags::env_flags;
use once_cell::sync::OnceCell;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{
    HyperServerOptions, ServerRuntime, hyper_server_core, server_runtime_core,
};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use flowsmith_mcp::config::{
    CREDENTIAL_VARS, LOGGING_VARS, LlmCredentials, PipelineSettings, ServerRole,
    SynthesisStrategy, UserConfig, expand_home, load_user_config,
};
use flowsmith_mcp::handler::FlowsmithHandler;
use flowsmith_mcp::mcp::{ServiceDescriptor, StdioToolLister};
use flowsmith_mcp::model::AgentDefaults;
use flowsmith_mcp::orchestrator::Orchestrator;
use flowsmith_mcp::phases::PhaseTools;
use flowsmith_mcp::runner::{AgentRunner, InprocCodexRunner};

/// `$FLOWSMITH_HOME`, else `$HOME/.flowsmith`, else `./.flowsmith`.
fn flowsmith_home() -> PathBuf {
    match std::env::var("FLOWSMITH_HOME") {
        Ok(h) if !h.is_empty() => expand_home(&h),
        _ => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(".flowsmith"),
            Err(_) => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".flowsmith"),
        },
    }
}

fn env_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

/// Environment wins when set, then the user config, then the default.
fn prefer<T>(key: &str, env: T, cfg: Option<T>) -> T {
    if env_set(key) { env } else { cfg.unwrap_or(env) }
}

#[derive(Clone, Copy)]
enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

fn styled<S, W>(style: LogStyle, ansi: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match style {
        LogStyle::Json => base.json().boxed(),
        LogStyle::Compact => base.compact().boxed(),
        LogStyle::Pretty => base.pretty().boxed(),
        LogStyle::Full => base.boxed(),
    }
}

fn init_tracing(home: &std::path::Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <FLOWSMITH_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = true;
        /// Optional explicit log directory (absolute). Defaults to <FLOWSMITH_HOME>/logs
        LOG_DIR: &str = "";
    }

    let logging = user_cfg.and_then(|c| c.logging.as_ref());
    let filter_env = env_set("TRACING_FILTER") || env_set("RUST_LOG");
    let rust_log = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else if !filter_env && let Some(level) = logging.and_then(|l| l.level.clone()) {
        level
    } else {
        (*RUST_LOG).to_string()
    };
    let json = prefer("TRACING_JSON", *TRACING_JSON, logging.and_then(|l| l.json));
    let compact = prefer("TRACING_COMPACT", *TRACING_COMPACT, logging.and_then(|l| l.compact));
    let pretty = prefer("TRACING_PRETTY", *TRACING_PRETTY, logging.and_then(|l| l.pretty));
    let log_to_file = prefer("LOG_TO_FILE", *LOG_TO_FILE, logging.and_then(|l| l.to_file));
    let log_dir = if !(*LOG_DIR).is_empty() {
        PathBuf::from((*LOG_DIR).to_string())
    } else {
        logging
            .and_then(|l| l.dir.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| home.join("logs"))
    };

    let style = if json {
        LogStyle::Json
    } else if compact {
        LogStyle::Compact
    } else if pretty {
        LogStyle::Pretty
    } else {
        LogStyle::Full
    };
    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

    // Always write console logs to stderr to avoid contaminating stdio JSON-RPC.
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> =
        vec![styled(style, true, std::io::stderr)];
    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let mut dir_error = None;
    if log_to_file {
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&log_dir, "flowsmith-mcp.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(styled(style, false, nb));
            }
            Err(e) => dir_error = Some(e),
        }
    }
    if let Err(e) = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
    {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some(e) = dir_error {
        tracing::warn!("failed to create log dir {}: {}", log_dir.display(), e);
    }
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    let home = flowsmith_home();
    let user_cfg = match load_user_config(&home) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ignoring unreadable {}/config.toml: {e:#}", home.display());
            None
        }
    };
    init_tracing(&home, user_cfg.as_ref());

    env_flags! {
        /// Transport: "stdio" (default) or "http"
        TRANSPORT: &str = "stdio";
        /// Host for HTTP transport
        HOST: &str = "127.0.0.1";
        /// Port for HTTP transport
        PORT: u16 = 8081;
        /// Ping interval for HTTP SSE
        PING_SECS: u64 = 5;
        /// Enable JSON response mode for HTTP
        HTTP_JSON: bool = false;
        /// Base working directory for descriptors and projects. Defaults to <FLOWSMITH_HOME>/work
        WORK_DIR: &str = "";
        /// "full" serves generate plus the phase tools; "phases" serves the phase tools only
        FLOWSMITH_ROLE: &str = "full";
        /// Workflow/agent synthesis: "rule_based" or "delegated"
        SYNTHESIS_STRATEGY: &str = "rule_based";
        /// Timeout for each step of a tool-listing session, in milliseconds
        LIST_TIMEOUT_MS: u64 = 15000;
        /// Timeout for one whole agent run, in seconds
        AGENT_TIMEOUT_SECS: u64 = 900;
        /// Tool-call budget of the orchestrating agent
        ORCHESTRATOR_STEP_BUDGET: u32 = 10;
        /// Tool-call budget of the designer agents
        DESIGNER_STEP_BUDGET: u32 = 30;
        /// Model for generated agent configs and for the pipeline's own agents
        AGENT_MODEL: &str = "gpt-5-mini";
        /// Provider for generated agent configs and for the pipeline's own agents
        AGENT_PROVIDER: &str = "openai";
        /// max_steps written into generated agent configs
        AGENT_MAX_STEPS: u32 = 20;
    }

    let pipeline = user_cfg.as_ref().and_then(|c| c.pipeline.as_ref());
    let pick = |key: &str, env: &str, cfg: Option<&String>| -> String {
        prefer(key, env.to_string(), cfg.cloned())
    };

    let work_dir = if !(*WORK_DIR).is_empty() {
        expand_home(*WORK_DIR)
    } else {
        pipeline
            .and_then(|p| p.work_dir.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| home.join("work"))
    };
    let strategy_raw = pick(
        "SYNTHESIS_STRATEGY",
        *SYNTHESIS_STRATEGY,
        pipeline.and_then(|p| p.strategy.as_ref()),
    );
    let strategy = match SynthesisStrategy::parse(&strategy_raw) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(2);
        }
    };
    let role = match ServerRole::parse(*FLOWSMITH_ROLE) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(2);
        }
    };

    let mut settings = PipelineSettings::new(work_dir.clone(), strategy);
    settings.list_timeout = Duration::from_millis(prefer(
        "LIST_TIMEOUT_MS",
        *LIST_TIMEOUT_MS,
        pipeline.and_then(|p| p.list_timeout_ms),
    ));
    settings.agent_timeout = Duration::from_secs(prefer(
        "AGENT_TIMEOUT_SECS",
        *AGENT_TIMEOUT_SECS,
        pipeline.and_then(|p| p.agent_timeout_secs),
    ));
    settings.orchestrator_step_budget = prefer(
        "ORCHESTRATOR_STEP_BUDGET",
        *ORCHESTRATOR_STEP_BUDGET,
        pipeline.and_then(|p| p.orchestrator_step_budget),
    );
    settings.designer_step_budget = prefer(
        "DESIGNER_STEP_BUDGET",
        *DESIGNER_STEP_BUDGET,
        pipeline.and_then(|p| p.designer_step_budget),
    );
    settings.agent_defaults = AgentDefaults {
        model: pick(
            "AGENT_MODEL",
            *AGENT_MODEL,
            pipeline.and_then(|p| p.agent_model.as_ref()),
        ),
        provider: pick(
            "AGENT_PROVIDER",
            *AGENT_PROVIDER,
            pipeline.and_then(|p| p.agent_provider.as_ref()),
        ),
        max_steps: prefer(
            "AGENT_MAX_STEPS",
            *AGENT_MAX_STEPS,
            pipeline.and_then(|p| p.agent_max_steps),
        ),
    };

    tracing::info!(
        "starting flowsmith-mcp (transport={}, role={}, strategy={:?})",
        *TRANSPORT,
        role.as_str(),
        strategy
    );
    tracing::info!("flowsmith_home={}, work_dir={}", home.display(), work_dir.display());

    // Credentials are checked before serving anything.
    let creds = LlmCredentials::detect();
    if !creds.is_available() {
        if strategy == SynthesisStrategy::Delegated {
            tracing::error!(
                "delegated synthesis needs one of {} to be set",
                CREDENTIAL_VARS.join(", ")
            );
            std::process::exit(1);
        }
        tracing::warn!("no LLM credential found; generate is limited to mode=direct");
    } else {
        tracing::info!("LLM credentials found: {}", creds.found.join(", "));
    }

    let defaults = settings.agent_defaults.clone();
    let agent_timeout = settings.agent_timeout;
    let lister = Arc::new(StdioToolLister::new(settings.list_timeout));
    let mut phases = PhaseTools::new(settings, lister);
    if creds.is_available() {
        let designer = InprocCodexRunner::new(
            &defaults.model,
            &defaults.provider,
            work_dir.clone(),
            agent_timeout,
        );
        phases = phases.with_designer(Arc::new(designer));
    }
    let phases = Arc::new(phases);

    let mut orchestrator = Orchestrator::new(phases.clone());
    if role == ServerRole::Full && creds.is_available() {
        match phase_server(&home, phases.settings(), &creds) {
            Ok(server) => {
                let driver: Arc<dyn AgentRunner> = Arc::new(
                    InprocCodexRunner::new(
                        &defaults.model,
                        &defaults.provider,
                        work_dir.clone(),
                        agent_timeout,
                    )
                    .with_server(server),
                );
                orchestrator = orchestrator.with_driver(driver);
            }
            Err(e) => tracing::warn!("agent mode disabled: {e:#}"),
        }
    }

    let server_details = InitializeResult {
        server_info: Implementation {
            name: "flowsmith-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Flowsmith MCP Server".to_string()),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(
            "Run install_service, discover_tools, then the workflow and agent-config phases in order, \
             passing each returned path to the next phase; or call generate."
                .to_string(),
        ),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let handler = FlowsmithHandler::new(phases, role, orchestrator);

    if *TRANSPORT == "stdio" {
        let transport = StdioTransport::new(TransportOptions::default())?;
        let server: ServerRuntime =
            server_runtime_core::create_server(server_details, transport, handler);
        tracing::info!("starting stdio server");
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("server runtime error: {}", msg);
        }
    } else {
        let host = (*HOST).to_string();
        let port = *PORT;
        let server = hyper_server_core::create_server(
            server_details,
            handler,
            HyperServerOptions {
                host: host.clone(),
                port,
                ping_interval: Duration::from_secs(*PING_SECS),
                enable_json_response: Some(*HTTP_JSON),
                ..Default::default()
            },
        );
        tracing::info!(
            "http server configured; starting listener on {}:{} (json={}, ping_secs={})",
            host,
            port,
            *HTTP_JSON,
            *PING_SECS
        );
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("hyper server error: {}", msg);
        }
    }
    tracing::info!("server stopped");
    Ok(())
}

/// This binary relaunched in the phases role, for the orchestrating agent.
fn phase_server(
    home: &std::path::Path,
    settings: &PipelineSettings,
    creds: &LlmCredentials,
) -> anyhow::Result<ServiceDescriptor> {
    let exe = std::env::current_exe()?;
    let mut server = ServiceDescriptor::stdio("flowsmith", &exe.display().to_string(), &[]);
    server.env = phase_server_env(home, settings, creds, |k| std::env::var(k).ok());
    Ok(server)
}

fn phase_server_env(
    home: &std::path::Path,
    settings: &PipelineSettings,
    creds: &LlmCredentials,
    lookup: impl Fn(&str) -> Option<String>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = settings
        .to_env()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    env.insert("FLOWSMITH_ROLE".to_string(), ServerRole::Phases.as_str().to_string());
    env.insert("TRANSPORT".to_string(), "stdio".to_string());
    env.insert("FLOWSMITH_HOME".to_string(), home.display().to_string());
    for key in creds.found.iter().copied().chain(LOGGING_VARS) {
        if let Some(v) = lookup(key) {
            env.insert(key.to_string(), v);
        }
    }
    env
}
