//! Tool Discoverer: enumerate, namespace and persist a service's tools.

use chrono::Local;
use serde::Serialize;

use super::PhaseTools;
use crate::error::{PhaseError, Status};
use crate::layout::write_json;
use crate::mcp::{ListError, RemoteTool, ServiceDescriptor};
use crate::model::{NAMESPACE_SEPARATOR, ToolRecord, ToolsArtifact, prefixed_tool_name};

/// Tools echoed back in the report; the full set is in the artifact.
const PREVIEW_TOOLS: usize = 5;
const PREVIEW_SCHEMAS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub status: Status,
    pub service_name: String,
    pub tools_count: usize,
    pub tools: Vec<String>,
    pub schemas: Vec<ToolRecord>,
    pub tools_file_path: String,
    pub message: String,
}

impl PhaseTools {
    /// Open a fresh session, list and namespace every tool, and write
    /// `mcp_tools_<service>.json` into a new timestamped project directory.
    pub async fn discover_tools(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<DiscoveryReport, PhaseError> {
        descriptor.validate()?;
        let _guard = self.service_lock(&descriptor.name).await;
        tracing::info!(service = %descriptor.name, "discovering tools");

        let remote = self
            .lister
            .list_tools(descriptor)
            .await
            .map_err(|e| match e {
                ListError::Session(cause) => PhaseError::Connection {
                    service: descriptor.name.clone(),
                    cause,
                },
                ListError::Listing(cause) => PhaseError::Discovery {
                    service: descriptor.name.clone(),
                    cause,
                },
            })?;

        let artifact = build_artifact(&descriptor.name, remote);
        let project = self
            .settings
            .work_dir
            .project_at(&descriptor.name, Local::now());
        let path = project.tools_file(&descriptor.name);
        write_json(&path, &artifact)?;
        tracing::info!(
            service = %descriptor.name,
            count = artifact.tools.len(),
            path = %path.display(),
            "tools artifact written"
        );

        Ok(DiscoveryReport {
            status: Status::Success,
            service_name: descriptor.name.clone(),
            tools_count: artifact.tools.len(),
            message: format!(
                "Discovered {} tools from {}",
                artifact.tools.len(),
                descriptor.name
            ),
            tools: artifact.tools.iter().take(PREVIEW_TOOLS).cloned().collect(),
            schemas: artifact.schemas.into_iter().take(PREVIEW_SCHEMAS).collect(),
            tools_file_path: path.display().to_string(),
        })
    }
}

/// Apply the `mcp__<service>__<tool>` transform, keeping discovery order.
///
/// Missing descriptions and schemas default to empty. A repeated raw name is
/// dropped so prefixed names stay unique within the artifact.
pub fn build_artifact(service: &str, remote: Vec<RemoteTool>) -> ToolsArtifact {
    let mut tools: Vec<String> = Vec::with_capacity(remote.len());
    let mut schemas = Vec::with_capacity(remote.len());
    for tool in remote {
        if tool.name.contains(NAMESPACE_SEPARATOR) {
            tracing::warn!(
                service,
                tool = %tool.name,
                "raw tool name contains the namespace separator; splitting it is ambiguous"
            );
        }
        let name = prefixed_tool_name(service, &tool.name);
        if tools.contains(&name) {
            tracing::warn!(service, tool = %tool.name, "duplicate tool name dropped");
            continue;
        }
        tools.push(name.clone());
        schemas.push(ToolRecord {
            name,
            description: tool.description.unwrap_or_default(),
            parameters: tool
                .input_schema
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        });
    }
    ToolsArtifact {
        mcp_name: service.to_string(),
        tools,
        schemas,
    }
}
