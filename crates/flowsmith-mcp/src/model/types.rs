use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::naming::mcp_names_from_tools;

/// One discovered tool, stored under its namespaced name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// `mcp__<service>__<tool>`
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the tool input; `{}` when the service omitted it.
    #[serde(default = "empty_object")]
    pub parameters: JsonValue,
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("placeholder regex"));

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

/// Result of one discovery call, persisted as `mcp_tools_<service>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsArtifact {
    pub mcp_name: String,
    /// Prefixed names in discovery order.
    pub tools: Vec<String>,
    pub schemas: Vec<ToolRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatedArg {
    pub name: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
}

fn default_true() -> bool {
    true
}

impl TemplatedArg {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// A reusable multi-tool recipe, one file per workflow under `workflows/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub workflow_name: String,
    pub description: String,
    /// Name of the [`AgentConfig`] meant to run this workflow.
    pub agent_config_name: String,
    /// Instruction text containing `{{placeholder}}` tokens.
    pub input_prompt: String,
    #[serde(default)]
    pub templated_args: Vec<TemplatedArg>,
    pub tool_sequence: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl WorkflowConfig {
    /// Distinct `{{token}}` names in `input_prompt`, in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for cap in PLACEHOLDER.captures_iter(&self.input_prompt) {
            let token = &cap[1];
            if !out.iter().any(|t| t == token) {
                out.push(token.to_string());
            }
        }
        out
    }
}

/// Model settings and tool allowance for one agent, one file per agent under
/// `agent_configs/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_name: String,
    /// Services named by `allowed_tools`; see [`AgentConfig::new`].
    pub mcp_names: Vec<String>,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub provider: String,
    pub max_steps: u32,
}

impl AgentConfig {
    /// Build a config whose `mcp_names` are derived from `allowed_tools`.
    pub fn new(
        agent_name: &str,
        system_prompt: String,
        allowed_tools: Vec<String>,
        defaults: &AgentDefaults,
    ) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            mcp_names: mcp_names_from_tools(&allowed_tools),
            system_prompt,
            allowed_tools,
            model: defaults.model.clone(),
            provider: defaults.provider.clone(),
            max_steps: defaults.max_steps,
        }
    }
}

/// Model settings applied to every synthesized agent unless overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefaults {
    pub model: String,
    pub provider: String,
    pub max_steps: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".to_string(),
            provider: "openai".to_string(),
            max_steps: 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_record_tolerates_missing_metadata() {
        let r: ToolRecord = serde_json::from_value(json!({ "name": "mcp__a__b" })).unwrap();
        assert_eq!(r.description, "");
        assert_eq!(r.parameters, json!({}));
    }

    #[test]
    fn templated_arg_defaults_to_required() {
        let a: TemplatedArg =
            serde_json::from_value(json!({ "name": "x", "description": "d" })).unwrap();
        assert!(a.required);
        assert!(a.default.is_none());
        assert!(!TemplatedArg::optional("f", "d").required);
    }

    #[test]
    fn placeholders_are_extracted_once() {
        let wf = WorkflowConfig {
            workflow_name: "w".into(),
            description: "d".into(),
            agent_config_name: "a".into(),
            input_prompt: "Search {{query}} then {{ filters }} then {{query}} {{unclosed".into(),
            templated_args: vec![],
            tool_sequence: vec![],
            domain: None,
        };
        assert_eq!(wf.placeholders(), vec!["query", "filters"]);
    }

    #[test]
    fn empty_braces_are_not_placeholders() {
        let wf = WorkflowConfig {
            workflow_name: "w".into(),
            description: "d".into(),
            agent_config_name: "a".into(),
            input_prompt: "{{}} {{   }} {{ item.id }} {{two words}}".into(),
            templated_args: vec![],
            tool_sequence: vec![],
            domain: None,
        };
        assert_eq!(wf.placeholders(), vec!["item.id"]);
    }

    #[test]
    fn agent_config_derives_mcp_names() {
        let cfg = AgentConfig::new(
            "demo_agent",
            "prompt".into(),
            vec!["mcp__demo__add_item".into(), "mcp__demo__get_item".into()],
            &AgentDefaults::default(),
        );
        assert_eq!(cfg.mcp_names, vec!["demo"]);
        assert_eq!(cfg.model, "gpt-5-mini");
        assert_eq!(cfg.max_steps, 20);
    }
}
