//! Shared types for target services and the tools they expose.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::PhaseError;
use crate::model::NAMESPACE_SEPARATOR;

/// Transport used to reach a target service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    /// Anything else (sse, http, ...). Persisted verbatim but not listable.
    #[serde(untagged)]
    Other(String),
}

impl TransportKind {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("stdio") {
            TransportKind::Stdio
        } else {
            TransportKind::Other(raw.trim().to_string())
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Other(s) => f.write_str(s),
        }
    }
}

/// Launch descriptor for a target service. Identity key is `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    #[serde(default)]
    pub transport: TransportKind,
    /// Launch-time environment. Never written to disk; values often hold
    /// secrets.
    #[serde(default, skip_serializing)]
    pub env: HashMap<String, String>,
}

impl ServiceDescriptor {
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            transport: TransportKind::Stdio,
            env: HashMap::new(),
        }
    }

    /// Build a descriptor from flat tool-call arguments.
    ///
    /// `name`, `command` and `args` must all be present; nothing is launched
    /// here, so a missing field fails before any I/O happens.
    pub fn from_arguments(arguments: &JsonMap<String, JsonValue>) -> Result<Self, PhaseError> {
        let mut missing: Vec<&str> = Vec::new();
        let name = arguments.get("name").and_then(|v| v.as_str());
        let command = arguments.get("command").and_then(|v| v.as_str());
        let args = arguments.get("args").and_then(|v| v.as_array());
        if name.is_none() {
            missing.push("name");
        }
        if command.is_none() {
            missing.push("command");
        }
        if args.is_none() {
            missing.push("args");
        }
        let (Some(name), Some(command), Some(args)) = (name, command, args) else {
            return Err(PhaseError::Configuration(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        };

        let mut parsed_args = Vec::with_capacity(args.len());
        for (idx, a) in args.iter().enumerate() {
            let Some(s) = a.as_str() else {
                return Err(PhaseError::Configuration(format!(
                    "args[{idx}] must be a string"
                )));
            };
            parsed_args.push(s.to_string());
        }

        let transport = arguments
            .get("transport")
            .and_then(|v| v.as_str())
            .map(TransportKind::parse)
            .unwrap_or_default();
        let env = arguments
            .get("env")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let descriptor = Self {
            name: name.to_string(),
            command: command.to_string(),
            args: parsed_args,
            transport,
            env,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the fields that later become path and namespace components.
    pub fn validate(&self) -> Result<(), PhaseError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(PhaseError::Configuration(
                "service name must not be empty".to_string(),
            ));
        }
        if name != self.name {
            return Err(PhaseError::Configuration(format!(
                "service name '{}' has leading or trailing whitespace",
                self.name
            )));
        }
        if self.name.contains(NAMESPACE_SEPARATOR) {
            return Err(PhaseError::Configuration(format!(
                "service name '{}' must not contain '{}'",
                self.name, NAMESPACE_SEPARATOR
            )));
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(PhaseError::Configuration(format!(
                "service name '{}' must not contain path separators",
                self.name
            )));
        }
        if self.command.trim().is_empty() {
            return Err(PhaseError::Configuration(
                "command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One tool as reported by a service's `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<JsonValue>,
}
