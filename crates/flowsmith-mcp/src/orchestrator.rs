//! Phase Orchestrator.
//!
//! `generate` runs the four phases for one service, strictly in order. In
//! agent mode an LLM session holding the phase tools drives them and we
//! classify its final transcript; in direct mode the phases run in-process
//! and the state machine is walked explicitly.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::config::SynthesisStrategy;
use crate::error::{PhaseError, Status};
use crate::mcp::ServiceDescriptor;
use crate::phases::PhaseTools;
use crate::runner::AgentRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Connect,
    Discover,
    Design,
    Configure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Connected,
    Discovered,
    Designed,
    Configured,
    /// `phase` is `None` when the driving agent itself failed.
    Failed {
        phase: Option<Phase>,
        reason: String,
    },
}

impl PipelineState {
    /// Phase that may run next, if any.
    pub fn next_phase(&self) -> Option<Phase> {
        match self {
            PipelineState::Init => Some(Phase::Connect),
            PipelineState::Connected => Some(Phase::Discover),
            PipelineState::Discovered => Some(Phase::Design),
            PipelineState::Designed => Some(Phase::Configure),
            PipelineState::Configured | PipelineState::Failed { .. } => None,
        }
    }

    /// State after `phase` completes. Out-of-order phases are refused.
    pub fn advance(&self, phase: Phase) -> Option<PipelineState> {
        if self.next_phase() != Some(phase) {
            return None;
        }
        Some(match phase {
            Phase::Connect => PipelineState::Connected,
            Phase::Discover => PipelineState::Discovered,
            Phase::Design => PipelineState::Designed,
            Phase::Configure => PipelineState::Configured,
        })
    }

    pub fn fail(&self, reason: impl Into<String>) -> PipelineState {
        PipelineState::Failed {
            phase: self.next_phase(),
            reason: reason.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Configured | PipelineState::Failed { .. }
        )
    }

    /// Furthest state a transcript shows evidence of, walking phase by phase.
    pub fn from_transcript(transcript: &str) -> PipelineState {
        const EVIDENCE: [(Phase, &[&str]); 4] = [
            (Phase::Connect, &["connection_tested"]),
            (Phase::Discover, &["tools_file_path"]),
            (Phase::Design, &["workflows_directory", "designs_file_path"]),
            (Phase::Configure, &["project_complete", "configs_directory"]),
        ];
        let mut state = PipelineState::Init;
        for (phase, markers) in EVIDENCE {
            if !markers.iter().any(|m| transcript.contains(m)) {
                break;
            }
            match state.advance(phase) {
                Some(next) => state = next,
                None => break,
            }
        }
        state
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Init => f.write_str("init"),
            PipelineState::Connected => f.write_str("connected"),
            PipelineState::Discovered => f.write_str("discovered"),
            PipelineState::Designed => f.write_str("designed"),
            PipelineState::Configured => f.write_str("configured"),
            PipelineState::Failed { phase: Some(p), .. } => write!(f, "failed({p:?})"),
            PipelineState::Failed { phase: None, .. } => f.write_str("failed"),
        }
    }
}

/// Markers in a final transcript that confirm the last phase ran.
const COMPLETION_MARKERS: [&str; 2] = ["project_complete", "configs_directory"];

/// Success when a completion marker is present, partial otherwise.
pub fn classify_transcript(transcript: &str) -> Status {
    if COMPLETION_MARKERS.iter().any(|m| transcript.contains(m)) {
        Status::Success
    } else {
        Status::Partial
    }
}

/// Status and state of an agent-driven run. A completed run is `Configured`
/// even when the transcript skipped evidence of earlier phases.
pub fn transcript_outcome(transcript: &str) -> (Status, PipelineState) {
    match classify_transcript(transcript) {
        Status::Success => (Status::Success, PipelineState::Configured),
        status => (status, PipelineState::from_transcript(transcript)),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerateMode {
    #[default]
    Agent,
    Direct,
}

impl GenerateMode {
    pub fn parse(raw: &str) -> Result<Self, PhaseError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(GenerateMode::Agent),
            "direct" => Ok(GenerateMode::Direct),
            other => Err(PhaseError::Configuration(format!(
                "unknown mode '{other}' (expected agent or direct)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateReport {
    pub status: Status,
    pub run_id: String,
    pub mcp_name: String,
    pub mode: GenerateMode,
    pub state: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

pub struct Orchestrator {
    phases: Arc<PhaseTools>,
    driver: Option<Arc<dyn AgentRunner>>,
}

impl Orchestrator {
    pub fn new(phases: Arc<PhaseTools>) -> Self {
        Self {
            phases,
            driver: None,
        }
    }

    /// Agent session that has the phase tools attached.
    pub fn with_driver(mut self, driver: Arc<dyn AgentRunner>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub async fn generate(
        &self,
        descriptor: &ServiceDescriptor,
        mode: GenerateMode,
    ) -> Result<GenerateReport, PhaseError> {
        descriptor.validate()?;
        let run = Run {
            id: uuid::Uuid::new_v4().to_string(),
            service: descriptor.name.clone(),
            mode,
        };
        tracing::info!(run_id = %run.id, service = %run.service, ?mode, "generate started");
        let report = match mode {
            GenerateMode::Agent => {
                let driver = self.driver.as_ref().ok_or_else(|| {
                    PhaseError::Configuration(
                        "agent mode needs an LLM credential; use mode=direct or set a provider key"
                            .to_string(),
                    )
                })?;
                self.drive_with_agent(driver.as_ref(), descriptor, &run).await
            }
            GenerateMode::Direct => self.drive_directly(descriptor, &run).await,
        };
        tracing::info!(
            run_id = %report.run_id,
            status = ?report.status,
            state = %report.state,
            "generate finished"
        );
        Ok(report)
    }

    async fn drive_with_agent(
        &self,
        driver: &dyn AgentRunner,
        descriptor: &ServiceDescriptor,
        run: &Run,
    ) -> GenerateReport {
        let strategy = self.phases.settings().strategy;
        let task = format!(
            "Generate workflows for this service:\n\nName: {}\nCommand: {}\nArgs: {}\n\nExecute all 4 phases and return the project directory.",
            descriptor.name,
            descriptor.command,
            serde_json::to_string(&descriptor.args).unwrap_or_default(),
        );
        let budget = self.phases.settings().orchestrator_step_budget;
        match driver.invoke(orchestrator_prompt(strategy), &task, budget).await {
            Ok(transcript) => {
                let (status, state) = transcript_outcome(&transcript);
                let message = match status {
                    Status::Success => "Workflow package generated successfully",
                    _ => "Generation may be incomplete; inspect the project manually",
                };
                run.report(status, &state, message, Some(JsonValue::String(transcript)))
            }
            Err(cause) => {
                let err = PhaseError::Agent { cause };
                let state = PipelineState::Failed {
                    phase: None,
                    reason: err.to_string(),
                };
                run.failed(&state, &err)
            }
        }
    }

    async fn drive_directly(&self, descriptor: &ServiceDescriptor, run: &Run) -> GenerateReport {
        let mut state = PipelineState::Init;
        let mut results = serde_json::Map::new();
        match self.run_phases(descriptor, &mut state, &mut results).await {
            Ok(status) => {
                let message = match status {
                    Status::Success => "Workflow package generated successfully",
                    _ => "Generation finished with degraded results; inspect the project manually",
                };
                run.report(status, &state, message, Some(JsonValue::Object(results)))
            }
            Err(err) => {
                state = state.fail(err.to_string());
                let mut report = run.failed(&state, &err);
                report.result = Some(JsonValue::Object(results));
                report
            }
        }
    }

    /// Walk the phases in order, recording each report under its phase key.
    async fn run_phases(
        &self,
        descriptor: &ServiceDescriptor,
        state: &mut PipelineState,
        results: &mut serde_json::Map<String, JsonValue>,
    ) -> Result<Status, PhaseError> {
        let phases = &self.phases;
        let mut status = Status::Success;

        let install = phases.install_service(descriptor).await?;
        step(state, Phase::Connect, results, &install)?;

        let discovery = phases.discover_tools(descriptor).await?;
        step(state, Phase::Discover, results, &discovery)?;
        let tools_file = PathBuf::from(&discovery.tools_file_path);

        match phases.settings().strategy {
            SynthesisStrategy::RuleBased => {
                let workflows = phases.create_workflows(&tools_file, None).await?;
                step(state, Phase::Design, results, &workflows)?;
                let agents = phases
                    .create_agent_configs(&PathBuf::from(&workflows.workflows_directory))
                    .await?;
                step(state, Phase::Configure, results, &agents)?;
                if agents.status != Status::Success {
                    status = Status::Partial;
                }
            }
            SynthesisStrategy::Delegated => {
                let designs = phases.design_workflows_via_agent(&tools_file, None).await?;
                step(state, Phase::Design, results, &designs)?;
                let agents = phases
                    .design_agent_configs_via_agent(&PathBuf::from(&designs.designs_file_path))
                    .await?;
                step(state, Phase::Configure, results, &agents)?;
                if designs.status != Status::Success || agents.status != Status::Success {
                    status = Status::Partial;
                }
            }
        }
        Ok(status)
    }
}

fn step<T: Serialize>(
    state: &mut PipelineState,
    phase: Phase,
    results: &mut serde_json::Map<String, JsonValue>,
    report: &T,
) -> Result<(), PhaseError> {
    let next = state.advance(phase).ok_or_else(|| {
        PhaseError::Configuration(format!("phase {phase:?} cannot run from state {state}"))
    })?;
    let key = serde_json::to_value(phase)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{phase:?}"));
    results.insert(key, serde_json::to_value(report).unwrap_or(JsonValue::Null));
    tracing::debug!(from = %state, to = %next, "phase complete");
    *state = next;
    Ok(())
}

struct Run {
    id: String,
    service: String,
    mode: GenerateMode,
}

impl Run {
    fn report(
        &self,
        status: Status,
        state: &PipelineState,
        message: &str,
        result: Option<JsonValue>,
    ) -> GenerateReport {
        GenerateReport {
            status,
            run_id: self.id.clone(),
            mcp_name: self.service.clone(),
            mode: self.mode,
            state: state.to_string(),
            message: message.to_string(),
            result,
            kind: None,
            error: None,
            traceback: None,
        }
    }

    fn failed(&self, state: &PipelineState, err: &PhaseError) -> GenerateReport {
        tracing::error!(run_id = %self.id, kind = err.kind(), "generate failed: {err}");
        GenerateReport {
            kind: Some(err.kind()),
            error: Some(err.to_string()),
            traceback: err.traceback(),
            ..self.report(Status::Error, state, "Workflow generation failed", None)
        }
    }
}

fn orchestrator_prompt(strategy: SynthesisStrategy) -> &'static str {
    match strategy {
        SynthesisStrategy::RuleBased => {
            "You are a workflow generator. Execute the 4 phase tools in sequence:\n\
             1. Call install_service to test the connection.\n\
             2. Call discover_tools to discover tools (save the tools_file_path).\n\
             3. Call create_workflows with the tools_file_path (save the workflows_directory).\n\
             4. Call create_agent_configs with the workflows_directory.\n\
             Return the final tool result and the project directory when complete."
        }
        SynthesisStrategy::Delegated => {
            "You are a workflow generator. Execute the 4 phase tools in sequence:\n\
             1. Call install_service to test the connection.\n\
             2. Call discover_tools to discover tools (save the tools_file_path).\n\
             3. Call design_workflows_via_agent with the tools_file_path (save the designs_file_path).\n\
             4. Call design_agent_configs_via_agent with the designs_file_path.\n\
             Return the final tool result and the project directory when complete."
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::PipelineSettings;
    use crate::layout::json_files;
    use crate::model::AgentConfig;
    use crate::test_support::{ScriptedRunner, StubLister};

    fn phases(dir: &std::path::Path, lister: StubLister) -> Arc<PhaseTools> {
        Arc::new(PhaseTools::new(
            PipelineSettings::new(dir, SynthesisStrategy::RuleBased),
            Arc::new(lister),
        ))
    }

    #[test]
    fn states_advance_strictly_in_order() {
        let s = PipelineState::Init;
        assert_eq!(s.advance(Phase::Discover), None);
        let s = s.advance(Phase::Connect).unwrap();
        assert_eq!(s, PipelineState::Connected);
        assert_eq!(s.advance(Phase::Connect), None);
        let s = s
            .advance(Phase::Discover)
            .and_then(|s| s.advance(Phase::Design))
            .and_then(|s| s.advance(Phase::Configure))
            .unwrap();
        assert!(s.is_terminal());
        assert_eq!(s.next_phase(), None);
        let failed = PipelineState::Discovered.fail("boom");
        assert_eq!(
            failed,
            PipelineState::Failed {
                phase: Some(Phase::Design),
                reason: "boom".into()
            }
        );
        assert!(failed.is_terminal());
        assert_eq!(failed.to_string(), "failed(Design)");
    }

    #[test]
    fn transcript_markers_drive_state_and_outcome() {
        let t = r#"{"connection_tested": true} {"tools_file_path": "/x"} {"workflows_directory": "/w"} {"configs_directory": "/c", "project_complete": true}"#;
        assert_eq!(PipelineState::from_transcript(t), PipelineState::Configured);
        assert_eq!(classify_transcript(t), Status::Success);

        let partial = r#"{"connection_tested": true} {"tools_file_path": "/x"}"#;
        assert_eq!(PipelineState::from_transcript(partial), PipelineState::Discovered);
        assert_eq!(classify_transcript(partial), Status::Partial);

        // evidence must be contiguous
        assert_eq!(
            PipelineState::from_transcript("configs_directory only"),
            PipelineState::Init
        );
        assert_eq!(classify_transcript("configs_directory only"), Status::Success);
    }

    #[test]
    fn completed_run_reports_configured_state() {
        assert_eq!(
            transcript_outcome("configs_directory only"),
            (Status::Success, PipelineState::Configured)
        );
        assert_eq!(
            transcript_outcome(r#"{"connection_tested": true}"#),
            (Status::Partial, PipelineState::Connected)
        );
    }

    #[tokio::test]
    async fn agent_mode_state_agrees_with_status() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = Arc::new(ScriptedRunner::replying(
            "Agent configs written to /p/agent_configs (configs_directory)",
        ));
        let orch = Orchestrator::new(phases(tmp.path(), StubLister::new(&[]))).with_driver(driver);
        let svc = ServiceDescriptor::stdio("demo", "python", &["demo_server.py"]);
        let report = orch.generate(&svc, GenerateMode::Agent).await.unwrap();
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["status"], json!("success"));
        assert_eq!(v["state"], json!("configured"));
    }

    #[tokio::test]
    async fn agent_mode_classifies_transcript() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = Arc::new(ScriptedRunner::replying(
            "connection_tested tools_file_path workflows_directory configs_directory project_complete",
        ));
        let orch = Orchestrator::new(phases(tmp.path(), StubLister::new(&[])))
            .with_driver(driver.clone());
        let svc = ServiceDescriptor::stdio("demo", "python", &["demo_server.py"]);
        let report = orch.generate(&svc, GenerateMode::Agent).await.unwrap();
        assert_eq!(report.status, Status::Success);
        assert_eq!(report.state, "configured");
        assert_eq!(report.mcp_name, "demo");
        assert!(uuid::Uuid::parse_str(&report.run_id).is_ok());

        let calls = driver.calls();
        assert_eq!(calls[0].step_budget, 10);
        assert!(calls[0].task.contains("Name: demo"));
        assert!(calls[0].task.contains(r#"Args: ["demo_server.py"]"#));
        assert!(calls[0].system.contains("create_agent_configs"));
    }

    #[tokio::test]
    async fn agent_mode_without_marker_is_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(phases(tmp.path(), StubLister::new(&[])))
            .with_driver(Arc::new(ScriptedRunner::replying("I gave up after phase 2.")));
        let svc = ServiceDescriptor::stdio("demo", "python", &[]);
        let report = orch.generate(&svc, GenerateMode::Agent).await.unwrap();
        assert_eq!(report.status, Status::Partial);
        assert_eq!(report.result, Some(JsonValue::String("I gave up after phase 2.".into())));
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn agent_failure_is_error_with_traceback() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(phases(tmp.path(), StubLister::new(&[])))
            .with_driver(Arc::new(ScriptedRunner::failing("stream closed")));
        let svc = ServiceDescriptor::stdio("demo", "python", &[]);
        let report = orch.generate(&svc, GenerateMode::Agent).await.unwrap();
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.kind, Some("agent_error"));
        assert_eq!(report.state, "failed");
        assert!(report.traceback.unwrap().contains("stream closed"));
    }

    #[tokio::test]
    async fn agent_mode_needs_driver() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(phases(tmp.path(), StubLister::new(&[])));
        let svc = ServiceDescriptor::stdio("demo", "python", &[]);
        let err = orch.generate(&svc, GenerateMode::Agent).await.unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[tokio::test]
    async fn direct_mode_runs_demo_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let lister = StubLister::new(&["add_item", "get_item", "list_items"]);
        let orch = Orchestrator::new(phases(tmp.path(), lister));
        let svc = ServiceDescriptor::stdio("demo", "python", &["demo_server.py"]);
        let report = orch.generate(&svc, GenerateMode::Direct).await.unwrap();
        assert_eq!(report.status, Status::Success, "{report:?}");
        assert_eq!(report.state, "configured");

        let result = report.result.unwrap();
        assert_eq!(result["discover"]["tools_count"], json!(3));
        assert_eq!(
            result["discover"]["tools"],
            json!(["mcp__demo__add_item", "mcp__demo__get_item", "mcp__demo__list_items"])
        );
        assert_eq!(
            result["design"]["workflow_names"],
            json!(["demo_crud_workflow", "demo_general_workflow"])
        );
        assert_eq!(result["configure"]["agents_created"], json!(2));
        assert_eq!(result["configure"]["project_complete"], json!(true));

        let configs_dir = PathBuf::from(result["configure"]["configs_directory"].as_str().unwrap());
        let files = json_files(&configs_dir).unwrap();
        assert_eq!(files.len(), 2);
        for f in files {
            let agent: AgentConfig = crate::layout::read_json(&f).unwrap();
            assert_eq!(agent.mcp_names, vec!["demo"]);
        }

        let workflows_dir = configs_dir.parent().unwrap().join("workflows");
        let crud: crate::model::WorkflowConfig =
            crate::layout::read_json(&workflows_dir.join("demo_crud_workflow.json")).unwrap();
        assert_eq!(
            crud.tool_sequence,
            vec!["mcp__demo__add_item", "mcp__demo__get_item", "mcp__demo__list_items"]
        );
        let general: crate::model::WorkflowConfig =
            crate::layout::read_json(&workflows_dir.join("demo_general_workflow.json")).unwrap();
        assert_eq!(general.tool_sequence.len(), 3);
    }

    #[tokio::test]
    async fn direct_mode_records_failed_phase() {
        let tmp = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(phases(tmp.path(), StubLister::failing("refused")));
        let svc = ServiceDescriptor::stdio("demo", "python", &[]);
        let report = orch.generate(&svc, GenerateMode::Direct).await.unwrap();
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.state, "failed(Connect)");
        assert_eq!(report.kind, Some("connection_error"));
        assert!(report.error.unwrap().contains("refused"));
    }
}
