//! Tool namespacing and the name conventions that tie artifacts together.

/// Separator between the namespace segments of a prefixed tool name.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Leading segment of every prefixed tool name.
pub const NAMESPACE_PREFIX: &str = "mcp";

/// Compose a tool name as `mcp__<service>__<tool>`.
pub fn prefixed_tool_name(service: &str, tool: &str) -> String {
    format!("{NAMESPACE_PREFIX}{NAMESPACE_SEPARATOR}{service}{NAMESPACE_SEPARATOR}{tool}")
}

/// Split a prefixed name back into `(service, tool)`.
///
/// The tool part keeps any further separators, so a raw tool name containing
/// `__` still yields its service. Returns `None` for names outside the
/// namespace.
pub fn split_prefixed(name: &str) -> Option<(&str, &str)> {
    let rest = name
        .strip_prefix(NAMESPACE_PREFIX)?
        .strip_prefix(NAMESPACE_SEPARATOR)?;
    let (service, tool) = rest.split_once(NAMESPACE_SEPARATOR)?;
    if service.is_empty() || tool.is_empty() {
        return None;
    }
    Some((service, tool))
}

/// The un-prefixed tool name: the text after the last separator, or the
/// whole name when it is not namespaced.
pub fn raw_tool_name(name: &str) -> &str {
    name.rsplit(NAMESPACE_SEPARATOR).next().unwrap_or(name)
}

/// Distinct service names referenced by prefixed tool names, in first-seen order.
pub fn mcp_names_from_tools<S: AsRef<str>>(tools: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in tools {
        if let Some((service, _)) = split_prefixed(t.as_ref())
            && !out.iter().any(|s| s == service)
        {
            out.push(service.to_string());
        }
    }
    out
}

/// Service name encoded in a workflow name: everything before its last two
/// underscore-delimited segments (`demo_crud_workflow` -> `demo`).
pub fn service_from_workflow_name(workflow_name: &str) -> &str {
    let mut parts = workflow_name.rsplitn(3, '_');
    let last = parts.next();
    let second = parts.next();
    match (last, second, parts.next()) {
        (Some(_), Some(_), Some(head)) => head,
        _ => workflow_name,
    }
}
