//! Workflow Synthesizer.
//!
//! Rule-based synthesis groups tools by keyword into CRUD, query and general
//! workflows. Delegated synthesis hands the tools file to a designer agent
//! that writes the workflows itself; we only recover where it wrote them.

use std::path::Path;

use serde::Serialize;

use super::{PhaseTools, require_input};
use crate::error::{PhaseError, Status};
use crate::extract::{Extraction, MarkerParser, WORKFLOWS_MARKER};
use crate::layout::{ProjectDir, read_json, write_json};
use crate::model::{TemplatedArg, ToolsArtifact, WorkflowConfig, raw_tool_name};

/// Keyword bucket a tool falls into, by substring of its raw name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolBucket {
    Create,
    Read,
    Update,
    Delete,
    Query,
    Other,
}

/// Checked in order; the first bucket with a matching keyword wins.
const BUCKET_KEYWORDS: [(ToolBucket, &[&str]); 5] = [
    (ToolBucket::Create, &["create", "add", "new"]),
    (ToolBucket::Read, &["read", "get", "list", "fetch"]),
    (ToolBucket::Update, &["update", "edit", "modify"]),
    (ToolBucket::Delete, &["delete", "remove"]),
    (ToolBucket::Query, &["query", "search", "find"]),
];

const CRUD_CREATES: usize = 2;
const CRUD_READS: usize = 2;
const QUERY_TOOLS: usize = 3;
const GENERAL_TOOLS: usize = 10;

pub fn classify(tool_name: &str) -> ToolBucket {
    let raw = raw_tool_name(tool_name).to_lowercase();
    BUCKET_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| raw.contains(w)))
        .map(|(bucket, _)| *bucket)
        .unwrap_or(ToolBucket::Other)
}

/// Deterministic workflow set for one tools artifact.
pub fn rule_based_workflows(artifact: &ToolsArtifact) -> Vec<WorkflowConfig> {
    let svc = artifact.mcp_name.as_str();
    let in_bucket = |bucket: ToolBucket| -> Vec<String> {
        artifact
            .tools
            .iter()
            .filter(|t| classify(t) == bucket)
            .cloned()
            .collect()
    };
    let creates = in_bucket(ToolBucket::Create);
    let reads = in_bucket(ToolBucket::Read);
    let queries = in_bucket(ToolBucket::Query);

    let mut out = Vec::new();
    if !creates.is_empty() && !reads.is_empty() {
        let mut sequence: Vec<String> = creates.iter().take(CRUD_CREATES).cloned().collect();
        sequence.extend(reads.iter().take(CRUD_READS).cloned());
        out.push(WorkflowConfig {
            workflow_name: format!("{svc}_crud_workflow"),
            description: format!("Create, read, update, and delete operations for {svc}"),
            agent_config_name: format!("{svc}_crud_agent"),
            input_prompt: "Perform {{operation}} on {{entity}} with data: {{data}}".to_string(),
            templated_args: vec![
                TemplatedArg::required("operation", "CRUD operation to perform"),
                TemplatedArg::required("entity", "Entity to operate on"),
                TemplatedArg::required("data", "Data for the operation"),
            ],
            tool_sequence: sequence,
            domain: Some("data_management".to_string()),
        });
    }
    if !queries.is_empty() {
        out.push(WorkflowConfig {
            workflow_name: format!("{svc}_query_workflow"),
            description: format!("Query and search operations for {svc}"),
            agent_config_name: format!("{svc}_query_agent"),
            input_prompt: "Search for {{query}} with filters: {{filters}}".to_string(),
            templated_args: vec![
                TemplatedArg::required("query", "Search query"),
                TemplatedArg::optional("filters", "Optional filters"),
            ],
            tool_sequence: queries.into_iter().take(QUERY_TOOLS).collect(),
            domain: Some("information_retrieval".to_string()),
        });
    }
    out.push(WorkflowConfig {
        workflow_name: format!("{svc}_general_workflow"),
        description: format!("General purpose workflow using all {svc} tools"),
        agent_config_name: format!("{svc}_general_agent"),
        input_prompt: "{{task_description}}".to_string(),
        templated_args: vec![TemplatedArg::required(
            "task_description",
            "Description of task to perform",
        )],
        tool_sequence: artifact.tools.iter().take(GENERAL_TOOLS).cloned().collect(),
        domain: Some("general".to_string()),
    });
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowsReport {
    pub status: Status,
    pub workflows_created: usize,
    pub workflow_names: Vec<String>,
    pub workflows_directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDesignReport {
    pub status: Status,
    pub designs_file_path: String,
    /// `found` when the agent named the file, `fallback` otherwise.
    pub extraction: &'static str,
    pub message: String,
}

impl PhaseTools {
    /// Rule-based synthesis: one file per workflow under `<project>/workflows/`.
    pub async fn create_workflows(
        &self,
        tools_file: &Path,
        user_requirements: Option<&str>,
    ) -> Result<WorkflowsReport, PhaseError> {
        require_input(tools_file, "tools file")?;
        let artifact: ToolsArtifact = read_json(tools_file)?;
        if user_requirements.is_some_and(|r| !r.trim().is_empty()) {
            tracing::debug!("rule-based synthesis ignores free-text requirements");
        }

        let project = ProjectDir::containing(tools_file);
        let workflows = rule_based_workflows(&artifact);
        for wf in &workflows {
            write_json(&project.workflow_file(&wf.workflow_name), wf)?;
        }
        let dir = project.workflows_dir();
        tracing::info!(
            service = %artifact.mcp_name,
            count = workflows.len(),
            dir = %dir.display(),
            "workflows written"
        );

        Ok(WorkflowsReport {
            status: Status::Success,
            workflows_created: workflows.len(),
            workflow_names: workflows.into_iter().map(|w| w.workflow_name).collect(),
            workflows_directory: dir.display().to_string(),
        })
    }

    /// Delegated synthesis: the designer agent writes a JSON array of
    /// workflows and names the file in its reply.
    pub async fn design_workflows_via_agent(
        &self,
        tools_file: &Path,
        user_requirements: Option<&str>,
    ) -> Result<WorkflowDesignReport, PhaseError> {
        require_input(tools_file, "tools file")?;
        let designer = self.designer()?;
        let artifact: ToolsArtifact = read_json(tools_file)?;
        let project = ProjectDir::containing(tools_file);
        let target = project.designs_file(&artifact.mcp_name);

        let task = workflow_design_task(tools_file, &target, user_requirements);
        let reply = designer
            .invoke(
                WORKFLOW_DESIGNER_PROMPT,
                &task,
                self.settings.designer_step_budget,
            )
            .await
            .map_err(|cause| PhaseError::Agent { cause })?;
        tracing::debug!(reply_len = reply.len(), "workflow designer replied");

        let extraction = MarkerParser::workflows().extract(&reply, || target.clone());
        let (status, message) = match &extraction {
            Extraction::Found(_) => (
                Status::Success,
                "Workflow designs generated by the designer agent".to_string(),
            ),
            Extraction::NotFound(_) => (
                Status::Partial,
                format!(
                    "Designer agent did not report a location; assuming the default {}",
                    target.display()
                ),
            ),
        };
        Ok(WorkflowDesignReport {
            status,
            extraction: extraction.label(),
            designs_file_path: extraction.into_path().display().to_string(),
            message,
        })
    }
}

const WORKFLOW_DESIGNER_PROMPT: &str = "\
You design reusable workflows for a tool-providing service. A workflow is a JSON object with \
the fields workflow_name, description, agent_config_name, input_prompt, templated_args, \
tool_sequence and domain. input_prompt uses {{placeholder}} tokens, and every token must have a \
templated_args entry {name, description, required}. tool_sequence lists tool names exactly as \
they appear in the tools file. Write all workflows as one JSON array to the requested file.";

fn workflow_design_task(tools_file: &Path, target: &Path, requirements: Option<&str>) -> String {
    let mut task = format!(
        "Read the discovered tools in {}.\nDesign workflows for them and write the JSON array to {}.\n",
        tools_file.display(),
        target.display()
    );
    if let Some(req) = requirements.map(str::trim).filter(|r| !r.is_empty()) {
        task.push_str(&format!("User requirements: {req}\n"));
    }
    task.push_str(&format!(
        "Finish with a line of the form: {WORKFLOWS_MARKER}<absolute path>"
    ));
    task
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{PipelineSettings, SynthesisStrategy};
    use crate::layout::json_files;
    use crate::model::prefixed_tool_name;
    use crate::test_support::{ScriptedRunner, StubLister, tools_artifact};

    fn phase_tools(dir: &Path) -> PhaseTools {
        PhaseTools::new(
            PipelineSettings::new(dir, SynthesisStrategy::RuleBased),
            Arc::new(StubLister::new(&[])),
        )
    }

    #[test]
    fn classifies_by_first_matching_bucket() {
        assert_eq!(classify("mcp__demo__add_item"), ToolBucket::Create);
        assert_eq!(classify("mcp__demo__List_Items"), ToolBucket::Read);
        assert_eq!(classify("edit_note"), ToolBucket::Update);
        assert_eq!(classify("remove_tag"), ToolBucket::Delete);
        assert_eq!(classify("search_docs"), ToolBucket::Query);
        assert_eq!(classify("ping"), ToolBucket::Other);
        // "create" is checked before "query"
        assert_eq!(classify("create_query"), ToolBucket::Create);
    }

    #[test]
    fn crud_needs_create_and_read() {
        let artifact = tools_artifact("demo", &["get_item", "list_items", "find_item"]);
        let wfs = rule_based_workflows(&artifact);
        let names: Vec<_> = wfs.iter().map(|w| w.workflow_name.as_str()).collect();
        assert_eq!(names, vec!["demo_query_workflow", "demo_general_workflow"]);
        assert!(!wfs[0].templated_args[1].required);
    }

    #[test]
    fn sequences_are_capped_and_ordered() {
        let raw: Vec<String> = (0..12).map(|i| format!("tool_{i}")).collect();
        let mut names: Vec<&str> = vec!["add_a", "create_b", "new_c", "get_a", "list_b", "read_c"];
        names.extend(raw.iter().map(String::as_str));
        let artifact = tools_artifact("svc", &names);
        let wfs = rule_based_workflows(&artifact);
        let crud = &wfs[0];
        let expect: Vec<String> = ["add_a", "create_b", "get_a", "list_b"]
            .iter()
            .map(|t| prefixed_tool_name("svc", t))
            .collect();
        assert_eq!(crud.tool_sequence, expect);
        let general = wfs.last().unwrap();
        assert_eq!(general.tool_sequence.len(), 10);
        assert_eq!(general.tool_sequence[0], "mcp__svc__add_a");
    }

    #[test]
    fn synthesis_is_deterministic() {
        let artifact = tools_artifact("demo", &["add_item", "get_item", "search"]);
        let a = serde_json::to_string(&rule_based_workflows(&artifact)).unwrap();
        let b = serde_json::to_string(&rule_based_workflows(&artifact)).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn writes_one_file_per_workflow() {
        let tmp = tempfile::tempdir().unwrap();
        let project = ProjectDir::new(tmp.path().join("demo_project_20250101_000000"));
        let tools_file = project.tools_file("demo");
        write_json(
            &tools_file,
            &tools_artifact("demo", &["add_item", "get_item", "list_items"]),
        )
        .unwrap();

        let report = phase_tools(tmp.path())
            .create_workflows(&tools_file, Some("keep it short"))
            .await
            .unwrap();
        assert_eq!(report.workflows_created, 2);
        assert_eq!(
            report.workflows_directory,
            project.workflows_dir().display().to_string()
        );
        assert_eq!(json_files(&project.workflows_dir()).unwrap().len(), 2);
        let crud: WorkflowConfig = read_json(&project.workflow_file("demo_crud_workflow")).unwrap();
        assert_eq!(crud.agent_config_name, "demo_crud_agent");
        assert_eq!(crud.placeholders(), vec!["operation", "entity", "data"]);
    }

    #[tokio::test]
    async fn missing_tools_file_fails_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let err = phase_tools(tmp.path())
            .create_workflows(&tmp.path().join("nope/mcp_tools_x.json"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        assert!(!tmp.path().join("nope").exists());
    }

    #[tokio::test]
    async fn delegated_design_recovers_reported_path() {
        let tmp = tempfile::tempdir().unwrap();
        let project = ProjectDir::new(tmp.path().join("demo_project_20250101_000000"));
        let tools_file = project.tools_file("demo");
        write_json(&tools_file, &tools_artifact("demo", &["add_item"])).unwrap();

        let runner = Arc::new(ScriptedRunner::replying(
            "Designed 2 workflows.\nWorkflows written to /elsewhere/designs.json",
        ));
        let tools = phase_tools(tmp.path()).with_designer(runner.clone());
        let report = tools
            .design_workflows_via_agent(&tools_file, Some("focus on inventory"))
            .await
            .unwrap();
        assert_eq!(report.status, Status::Success);
        assert_eq!(report.extraction, "found");
        assert_eq!(report.designs_file_path, "/elsewhere/designs.json");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].task.contains("focus on inventory"));
        assert!(calls[0].task.contains(WORKFLOWS_MARKER));
        assert_eq!(calls[0].step_budget, 30);
    }

    #[tokio::test]
    async fn delegated_design_falls_back_to_default_path() {
        let tmp = tempfile::tempdir().unwrap();
        let project = ProjectDir::new(tmp.path().join("demo_project_20250101_000000"));
        let tools_file = project.tools_file("demo");
        write_json(&tools_file, &tools_artifact("demo", &["add_item"])).unwrap();

        let tools = phase_tools(tmp.path())
            .with_designer(Arc::new(ScriptedRunner::replying("All done!")));
        let report = tools
            .design_workflows_via_agent(&tools_file, None)
            .await
            .unwrap();
        assert_eq!(report.status, Status::Partial);
        assert_eq!(report.extraction, "fallback");
        assert_eq!(
            report.designs_file_path,
            project.designs_file("demo").display().to_string()
        );
    }

    #[tokio::test]
    async fn designer_failure_is_agent_error() {
        let tmp = tempfile::tempdir().unwrap();
        let project = ProjectDir::new(tmp.path().join("demo_project_20250101_000000"));
        let tools_file = project.tools_file("demo");
        write_json(&tools_file, &tools_artifact("demo", &["add_item"])).unwrap();

        let tools = phase_tools(tmp.path())
            .with_designer(Arc::new(ScriptedRunner::failing("rate limited")));
        let err = tools
            .design_workflows_via_agent(&tools_file, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "agent_error");
        assert!(err.to_string().contains("rate limited"));
    }
}
