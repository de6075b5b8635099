//! Stdio MCP client used to list a target service's tools.
//!
//! Each call launches the service, initializes a client, fetches every page of
//! the tool list and shuts the session down again, success or not. Every step
//! is bounded by the configured timeout.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rust_mcp_sdk::McpClient;
use rust_mcp_sdk::mcp_client::{ClientHandlerCore, client_runtime_core};
use rust_mcp_sdk::schema::schema_utils::{
    NotificationFromServer, RequestFromServer, ResultFromClient,
};
use rust_mcp_sdk::schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, LATEST_PROTOCOL_VERSION,
    ListToolsRequestParams, RpcError,
};
use rust_mcp_sdk::{StdioTransport, TransportOptions};

use super::{RemoteTool, ServiceDescriptor, TransportKind};

/// Why a listing attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ListError {
    /// Launch, handshake, transport or timeout before the listing call.
    #[error("session failed: {0:#}")]
    Session(anyhow::Error),
    /// The session came up but `tools/list` failed.
    #[error("tool listing failed: {0:#}")]
    Listing(anyhow::Error),
}

impl ListError {
    pub fn into_cause(self) -> anyhow::Error {
        match self {
            ListError::Session(e) | ListError::Listing(e) => e,
        }
    }
}

/// Opens a session against a service and returns its tools.
#[async_trait]
pub trait ToolLister: Send + Sync {
    /// List every tool the service exposes. The session is closed before
    /// this returns, whatever the outcome.
    async fn list_tools(&self, service: &ServiceDescriptor) -> Result<Vec<RemoteTool>, ListError>;
}

/// Default lister: launches the service as a child process over stdio.
pub struct StdioToolLister {
    timeout: Duration,
}

impl StdioToolLister {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolLister for StdioToolLister {
    async fn list_tools(&self, service: &ServiceDescriptor) -> Result<Vec<RemoteTool>, ListError> {
        if let TransportKind::Other(kind) = &service.transport {
            return Err(ListError::Session(anyhow::anyhow!(
                "unsupported transport '{kind}' (only stdio can be listed)"
            )));
        }

        let client_details = InitializeRequestParams {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "flowsmith-mcp-discovery".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
            },
            protocol_version: LATEST_PROTOCOL_VERSION.into(),
        };

        let transport = StdioTransport::create_with_server_launch(
            &service.command,
            service.args.clone(),
            Some(service.env.clone()),
            TransportOptions::default(),
        )
        .map_err(|e| ListError::Session(anyhow::anyhow!("transport error: {e}")))?;

        let client =
            client_runtime_core::create_client(client_details, transport, NoopClientHandler);
        tracing::debug!(
            service = %service.name,
            command = %service.command,
            "opening discovery session"
        );

        let listed = async {
            tokio::time::timeout(self.timeout, client.clone().start())
                .await
                .map_err(|_| anyhow::anyhow!("session start timed out after {:?}", self.timeout))
                .and_then(|r| r.map_err(|e| anyhow::anyhow!("start error: {e}")))
                .map_err(ListError::Session)?;

            let timeout = self.timeout;
            let tools = collect_pages(|cursor| {
                let client = client.clone();
                async move {
                    let params = cursor.map(|c| ListToolsRequestParams { cursor: Some(c) });
                    let resp = tokio::time::timeout(timeout, client.list_tools(params))
                        .await
                        .map_err(|_| anyhow::anyhow!("list_tools timed out after {timeout:?}"))?
                        .map_err(|e| anyhow::anyhow!("list_tools error: {e}"))?;
                    let page: Vec<RemoteTool> = resp
                        .tools
                        .into_iter()
                        .map(|t| RemoteTool {
                            input_schema: serde_json::to_value(&t.input_schema).ok(),
                            description: t.description,
                            name: t.name,
                        })
                        .collect();
                    Ok::<_, anyhow::Error>((page, resp.next_cursor))
                }
            })
            .await
            .map_err(ListError::Listing)?;
            Ok::<_, ListError>(tools)
        }
        .await;

        // Close the session on every path; a failed shutdown only matters when
        // listing itself succeeded.
        let shutdown = tokio::time::timeout(self.timeout, client.shut_down())
            .await
            .map_err(|_| anyhow::anyhow!("session shutdown timed out after {:?}", self.timeout))
            .and_then(|r| r.map_err(|e| anyhow::anyhow!("shutdown error: {e}")));
        if let Err(e) = &shutdown {
            tracing::warn!(service = %service.name, "discovery session did not close cleanly: {e:#}");
        }

        let tools = listed?;
        tracing::debug!(service = %service.name, count = tools.len(), "listed tools");
        Ok(tools)
    }
}

/// Walk a cursor-paginated listing until the server stops returning a cursor.
/// A cursor seen twice is an error rather than an endless loop.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> anyhow::Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = anyhow::Result<(Vec<T>, Option<String>)>>,
{
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = None;
    loop {
        let (page, next) = fetch(cursor).await?;
        items.extend(page);
        match next {
            None => return Ok(items),
            Some(next) if !seen.insert(next.clone()) => {
                anyhow::bail!("server repeated pagination cursor '{next}'")
            }
            Some(next) => {
                tracing::debug!(cursor = %next, fetched = items.len(), "fetching next tool page");
                cursor = Some(next);
            }
        }
    }
}

#[derive(Clone)]
struct NoopClientHandler;

#[async_trait]
impl ClientHandlerCore for NoopClientHandler {
    async fn handle_request(
        &self,
        _request: RequestFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<ResultFromClient, RpcError> {
        Err(RpcError::method_not_found())
    }

    async fn handle_notification(
        &self,
        _notification: NotificationFromServer,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }

    async fn handle_error(
        &self,
        _error: &RpcError,
        _runtime: &dyn McpClient,
    ) -> std::result::Result<(), RpcError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn other_transport_is_rejected_without_launching() {
        let mut svc = ServiceDescriptor::stdio("remote", "does-not-exist", &[]);
        svc.transport = TransportKind::Other("sse".to_string());
        let lister = StdioToolLister::new(Duration::from_millis(100));
        let err = lister.list_tools(&svc).await.expect_err("unsupported");
        assert!(matches!(err, ListError::Session(_)));
        assert!(err.to_string().contains("unsupported transport"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_session_error() {
        let svc = ServiceDescriptor::stdio("ghost", "definitely-not-a-binary", &[]);
        let lister = StdioToolLister::new(Duration::from_millis(100));
        let err = lister.list_tools(&svc).await.expect_err("no such binary");
        assert!(matches!(err, ListError::Session(_)), "{err}");
    }

    #[tokio::test]
    async fn silent_server_is_time_boxed() {
        let svc = ServiceDescriptor::stdio("sleepy", "sleep", &["5"]);
        let lister = StdioToolLister::new(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = lister.list_tools(&svc).await.expect_err("never answers");
        assert!(matches!(err, ListError::Session(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn pages_are_followed_until_cursor_ends() {
        let pages = [
            (vec!["add_item", "get_item"], Some("2")),
            (vec!["list_items"], Some("3")),
            (vec!["delete_item"], None),
        ];
        let mut requested = Vec::new();
        let names = collect_pages(|cursor| {
            requested.push(cursor.clone());
            let idx = cursor.map(|c| c.parse::<usize>().unwrap() - 1).unwrap_or(0);
            let (page, next) = pages[idx].clone();
            async move { Ok::<_, anyhow::Error>((page, next.map(str::to_string))) }
        })
        .await
        .unwrap();
        assert_eq!(names, vec!["add_item", "get_item", "list_items", "delete_item"]);
        assert_eq!(requested, vec![None, Some("2".to_string()), Some("3".to_string())]);
    }

    #[tokio::test]
    async fn repeated_cursor_stops_listing() {
        let err = collect_pages(|_| async {
            Ok::<_, anyhow::Error>((vec![1], Some("same".to_string())))
        })
        .await
        .expect_err("cursor loop");
        assert!(err.to_string().contains("repeated"));
    }
}
