//! Connection Validator: prove a service answers, then remember how to launch it.

use serde::Serialize;

use super::PhaseTools;
use crate::error::{PhaseError, Status};
use crate::layout::write_json;
use crate::mcp::ServiceDescriptor;

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub status: Status,
    pub service_name: String,
    pub connection_tested: bool,
    pub tools_found: usize,
    pub descriptor_path: String,
    pub message: String,
}

impl PhaseTools {
    /// Open one session, list tools, and on success persist the descriptor
    /// to `mcp_configs/<service>_config.json` (last write wins).
    pub async fn install_service(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<InstallReport, PhaseError> {
        descriptor.validate()?;
        let _guard = self.service_lock(&descriptor.name).await;
        tracing::info!(service = %descriptor.name, "testing connection");

        let tools = self
            .lister
            .list_tools(descriptor)
            .await
            .map_err(|e| PhaseError::Connection {
                service: descriptor.name.clone(),
                cause: e.into_cause(),
            })?;

        let path = self.settings.work_dir.descriptor_path(&descriptor.name);
        write_json(&path, descriptor)?;
        tracing::info!(
            service = %descriptor.name,
            tools = tools.len(),
            path = %path.display(),
            "connection verified"
        );

        Ok(InstallReport {
            status: Status::Success,
            service_name: descriptor.name.clone(),
            connection_tested: true,
            tools_found: tools.len(),
            descriptor_path: path.display().to_string(),
            message: format!(
                "Connected to {} and found {} tools",
                descriptor.name,
                tools.len()
            ),
        })
    }
}
