//! MCP server handler that exposes the pipeline phases as callable tools.
//!
//! Phase failures are never RPC errors: every call returns a JSON payload,
//! either the phase report or an error report with its traceback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_sdk::schema::{
    CallToolResult, ClientRequest, ListToolsResult, RpcError, TextContent, Tool, ToolInputSchema,
    schema_utils::{NotificationFromClient, RequestFromClient, ResultFromServer},
};
use rust_mcp_sdk::{
    McpServer,
    mcp_server::{ServerHandlerCore, enforce_compatible_protocol_version},
};
use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::config::{ServerRole, SynthesisStrategy};
use crate::error::{PhaseError, into_payload};
use crate::mcp::ServiceDescriptor;
use crate::orchestrator::{GenerateMode, Orchestrator};
use crate::phases::PhaseTools;

type Args = JsonMap<String, JsonValue>;

/// One input property: name, JSON type, description.
type Prop = (&'static str, &'static str, &'static str);

const DESCRIPTOR_PROPS: [Prop; 5] = [
    ("name", "string", "Service name; becomes part of every tool and file name."),
    ("command", "string", "Executable that launches the service."),
    ("args", "array", "Command-line arguments for the service."),
    ("transport", "string", "Transport kind (default stdio)."),
    ("env", "object", "Extra environment variables for the service process."),
];
const DESCRIPTOR_REQUIRED: [&str; 3] = ["name", "command", "args"];

pub struct FlowsmithHandler {
    phases: Arc<PhaseTools>,
    /// Present only when `generate` is served.
    orchestrator: Option<Orchestrator>,
}

impl FlowsmithHandler {
    pub fn new(phases: Arc<PhaseTools>, role: ServerRole, orchestrator: Orchestrator) -> Self {
        let orchestrator = match role {
            ServerRole::Full => Some(orchestrator),
            ServerRole::Phases => None,
        };
        Self {
            phases,
            orchestrator,
        }
    }

    fn strategy(&self) -> SynthesisStrategy {
        self.phases.settings().strategy
    }

    /// Build the list of tool definitions exposed by this server.
    fn tool_definitions(&self) -> Vec<Tool> {
        let mut tools = vec![
            tool(
                "install_service",
                "Test the connection to a service and save its launch descriptor.",
                &DESCRIPTOR_PROPS,
                &DESCRIPTOR_REQUIRED,
            ),
            tool(
                "discover_tools",
                "List a service's tools, namespace them and write the tools file of a new project.",
                &DESCRIPTOR_PROPS,
                &DESCRIPTOR_REQUIRED,
            ),
        ];
        let designs_props: [Prop; 2] = [
            ("tools_file_path", "string", "Path returned by discover_tools."),
            ("user_requirements", "string", "Optional free-text requirements."),
        ];
        match self.strategy() {
            SynthesisStrategy::RuleBased => {
                tools.push(tool(
                    "create_workflows",
                    "Group discovered tools into CRUD, query and general workflows.",
                    &designs_props,
                    &["tools_file_path"],
                ));
                tools.push(tool(
                    "create_agent_configs",
                    "Derive one agent config per agent referenced by the workflows.",
                    &[(
                        "workflows_directory",
                        "string",
                        "Path returned by create_workflows.",
                    )],
                    &["workflows_directory"],
                ));
            }
            SynthesisStrategy::Delegated => {
                tools.push(tool(
                    "design_workflows_via_agent",
                    "Have a designer agent write workflow designs for the discovered tools.",
                    &designs_props,
                    &["tools_file_path"],
                ));
                tools.push(tool(
                    "design_agent_configs_via_agent",
                    "Have a designer agent write agent configs for the workflow designs.",
                    &[(
                        "designs_file_path",
                        "string",
                        "Path returned by design_workflows_via_agent.",
                    )],
                    &["designs_file_path"],
                ));
            }
        }
        tools.push(tool(
            "validate_project",
            "Re-validate the workflows and agent configs of a project directory or designs file.",
            &[(
                "project_dir",
                "string",
                "Project directory or workflow designs file.",
            )],
            &["project_dir"],
        ));
        if self.orchestrator.is_some() {
            let mut props = DESCRIPTOR_PROPS.to_vec();
            props.push((
                "mode",
                "string",
                "agent (LLM-driven, default) or direct (in-process).",
            ));
            tools.push(tool(
                "generate",
                "Run all four phases for a service and report success, partial or error.",
                &props,
                &DESCRIPTOR_REQUIRED,
            ));
        }
        tools
    }

    /// Run a tool call. `None` means the tool is not served.
    pub async fn dispatch(&self, tool: &str, args: &Args) -> Option<JsonValue> {
        let strategy = self.strategy();
        let phases = &self.phases;
        let payload = match (tool, strategy) {
            ("install_service", _) => match ServiceDescriptor::from_arguments(args) {
                Ok(d) => into_payload(phases.install_service(&d).await),
                Err(e) => into_payload::<()>(Err(e)),
            },
            ("discover_tools", _) => match ServiceDescriptor::from_arguments(args) {
                Ok(d) => into_payload(phases.discover_tools(&d).await),
                Err(e) => into_payload::<()>(Err(e)),
            },
            ("create_workflows", SynthesisStrategy::RuleBased) => {
                match required_str(args, "tools_file_path") {
                    Ok(p) => into_payload(
                        phases
                            .create_workflows(Path::new(p), optional_str(args, "user_requirements"))
                            .await,
                    ),
                    Err(e) => into_payload::<()>(Err(e)),
                }
            }
            ("create_agent_configs", SynthesisStrategy::RuleBased) => {
                match required_str(args, "workflows_directory") {
                    Ok(p) => into_payload(phases.create_agent_configs(Path::new(p)).await),
                    Err(e) => into_payload::<()>(Err(e)),
                }
            }
            ("design_workflows_via_agent", SynthesisStrategy::Delegated) => {
                match required_str(args, "tools_file_path") {
                    Ok(p) => into_payload(
                        phases
                            .design_workflows_via_agent(
                                Path::new(p),
                                optional_str(args, "user_requirements"),
                            )
                            .await,
                    ),
                    Err(e) => into_payload::<()>(Err(e)),
                }
            }
            ("design_agent_configs_via_agent", SynthesisStrategy::Delegated) => {
                match required_str(args, "designs_file_path") {
                    Ok(p) => into_payload(phases.design_agent_configs_via_agent(Path::new(p)).await),
                    Err(e) => into_payload::<()>(Err(e)),
                }
            }
            ("validate_project", _) => match required_str(args, "project_dir") {
                Ok(p) => into_payload(phases.validate_project(Path::new(p)).await),
                Err(e) => into_payload::<()>(Err(e)),
            },
            ("generate", _) => {
                let orchestrator = self.orchestrator.as_ref()?;
                let parsed = ServiceDescriptor::from_arguments(args).and_then(|d| {
                    let mode = optional_str(args, "mode")
                        .map(GenerateMode::parse)
                        .transpose()?
                        .unwrap_or_default();
                    Ok((d, mode))
                });
                match parsed {
                    Ok((d, mode)) => into_payload(orchestrator.generate(&d, mode).await),
                    Err(e) => into_payload::<()>(Err(e)),
                }
            }
            _ => return None,
        };
        Some(payload)
    }
}

fn required_str<'a>(args: &'a Args, key: &str) -> Result<&'a str, PhaseError> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(PhaseError::Configuration(format!(
            "missing required string '{key}'"
        ))),
    }
}

fn optional_str<'a>(args: &'a Args, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn tool(name: &str, description: &str, props: &[Prop], required: &[&str]) -> Tool {
    let mut schema = HashMap::<String, JsonMap<String, JsonValue>>::new();
    for (prop, ty, desc) in props {
        let mut p = JsonMap::new();
        p.insert("type".to_string(), JsonValue::String(ty.to_string()));
        p.insert("description".to_string(), JsonValue::String(desc.to_string()));
        if *ty == "array" {
            p.insert("items".to_string(), json!({ "type": "string" }));
        }
        schema.insert(prop.to_string(), p);
    }
    Tool {
        annotations: None,
        description: Some(description.to_string()),
        input_schema: ToolInputSchema::new(
            required.iter().map(|s| s.to_string()).collect(),
            Some(schema),
        ),
        meta: None,
        name: name.to_string(),
        output_schema: None,
        title: None,
    }
}

#[async_trait]
impl ServerHandlerCore for FlowsmithHandler {
    async fn handle_request(
        &self,
        request: RequestFromClient,
        runtime: &dyn McpServer,
    ) -> std::result::Result<ResultFromServer, RpcError> {
        let method_name = request.method().to_owned();
        tracing::debug!("handle_request: method={}", method_name);
        match request {
            RequestFromClient::ClientRequest(client_request) => match client_request {
                ClientRequest::InitializeRequest(initialize_request) => {
                    let mut server_info = runtime.server_info().to_owned();
                    if let Some(updated_protocol_version) = enforce_compatible_protocol_version(
                        &initialize_request.params.protocol_version,
                        &server_info.protocol_version,
                    )
                    .map_err(|err| {
                        tracing::error!(
                            "incompatible protocol version (client={}, server={})",
                            initialize_request.params.protocol_version,
                            server_info.protocol_version
                        );
                        RpcError::internal_error().with_message(err.to_string())
                    })? {
                        server_info.protocol_version = updated_protocol_version;
                    }
                    tracing::info!("initialized (protocol={})", server_info.protocol_version);
                    Ok(server_info.into())
                }

                ClientRequest::ListToolsRequest(_) => {
                    let tools = self.tool_definitions();
                    tracing::info!("list_tools (count={})", tools.len());
                    Ok(ListToolsResult {
                        meta: None,
                        next_cursor: None,
                        tools,
                    }
                    .into())
                }

                ClientRequest::CallToolRequest(request) => {
                    let tool = request.tool_name().to_string();
                    let args = request.params.arguments.clone().unwrap_or_default();
                    tracing::info!(
                        "call_tool: tool={}, arg_keys={:?}",
                        tool,
                        args.keys().collect::<Vec<_>>()
                    );
                    let Some(payload) = self.dispatch(&tool, &args).await else {
                        tracing::warn!("unknown tool: {}", tool);
                        return Err(RpcError::method_not_found()
                            .with_message(format!("Unknown tool '{}'", tool)));
                    };
                    Ok(
                        CallToolResult::text_content(vec![TextContent::from(payload.to_string())])
                            .into(),
                    )
                }

                _ => {
                    tracing::warn!("method not implemented: {}", method_name);
                    Err(RpcError::method_not_found()
                        .with_message(format!("No handler is implemented for '{method_name}'.")))
                }
            },
            RequestFromClient::CustomRequest(_) => {
                tracing::warn!("custom request not implemented");
                Err(RpcError::method_not_found()
                    .with_message("No handler is implemented for custom requests.".to_string()))
            }
        }
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromClient,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::debug!("handle_notification");
        Ok(())
    }

    async fn handle_error(
        &self,
        error: &RpcError,
        _: &dyn McpServer,
    ) -> std::result::Result<(), RpcError> {
        tracing::error!(
            "handle_error from client (code={:?}, message={:?})",
            error.code,
            error.message
        );
        Ok(())
    }
}
