//! Recover an artifact location from an agent's free-text reply.
//!
//! Delegated phases ask the agent to finish with a marker line such as
//! `Workflows written to <path>`. The parser tries the exact marker first,
//! then a lenient variant (case, colon, backticks or quotes), and otherwise
//! yields the caller's deterministic default. It never fails.
//!
//! Both patterns stay on the marker's line, and a capture only counts when it
//! looks like a path, so failure prose such as "no workflows written to disk"
//! falls back instead of naming a bogus location.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker emitted by the workflow designer agent.
pub const WORKFLOWS_MARKER: &str = "Workflows written to ";

/// Marker emitted by the agent-config designer agent.
pub const AGENT_CONFIGS_MARKER: &str = "Agent configs written to ";

static WORKFLOWS: Lazy<MarkerParser> = Lazy::new(|| MarkerParser::new(WORKFLOWS_MARKER));
static AGENT_CONFIGS: Lazy<MarkerParser> = Lazy::new(|| MarkerParser::new(AGENT_CONFIGS_MARKER));

/// Where an artifact path came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The reply named the path.
    Found(PathBuf),
    /// No marker; this is the deterministic default.
    NotFound(PathBuf),
}

impl Extraction {
    pub fn path(&self) -> &Path {
        match self {
            Extraction::Found(p) | Extraction::NotFound(p) => p,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Extraction::Found(p) | Extraction::NotFound(p) => p,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Extraction::Found(_) => "found",
            Extraction::NotFound(_) => "fallback",
        }
    }
}

/// Primary/lenient pattern pair for one marker phrase.
#[derive(Debug)]
pub struct MarkerParser {
    marker: &'static str,
    primary: Regex,
    lenient: Regex,
}

impl MarkerParser {
    fn new(marker: &'static str) -> Self {
        let primary = Regex::new(&format!(
            r"{}[ \t]+([^\n]+)",
            regex::escape(marker.trim_end())
        ))
        .expect("escaped marker regex");
        let words: Vec<String> = marker.split_whitespace().map(regex::escape).collect();
        let lenient = Regex::new(&format!(
            r#"(?i){}[ \t]*:?[ \t]*[`"']?([^\s`"']+)"#,
            words.join(r"[ \t]+")
        ))
        .expect("escaped lenient marker regex");
        Self {
            marker,
            primary,
            lenient,
        }
    }

    pub fn workflows() -> &'static MarkerParser {
        &WORKFLOWS
    }

    pub fn agent_configs() -> &'static MarkerParser {
        &AGENT_CONFIGS
    }

    /// Find the path named after the marker in `reply`.
    ///
    /// The last occurrence wins, so a final summary overrides earlier
    /// progress chatter. `fallback` is only computed when nothing matches.
    pub fn extract(&self, reply: &str, fallback: impl FnOnce() -> PathBuf) -> Extraction {
        if let Some(path) = last_capture(&self.primary, reply) {
            return Extraction::Found(PathBuf::from(path));
        }
        if let Some(path) = last_capture(&self.lenient, reply) {
            tracing::debug!(marker = %self.marker.trim_end(), "lenient marker match");
            return Extraction::Found(PathBuf::from(path));
        }
        let path = fallback();
        tracing::warn!(
            marker = %self.marker.trim_end(),
            fallback = %path.display(),
            "marker not found in agent reply; using default path"
        );
        Extraction::NotFound(path)
    }
}

fn last_capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| trim_path(m.as_str())))
        .filter(|s| looks_like_path(s))
        .last()
}

fn trim_path(raw: &str) -> &str {
    raw.trim().trim_end_matches(['.', ',', ';', ')', '`', '"', '\''])
}

/// A directory separator or a `.json` file name; bare words are prose.
fn looks_like_path(s: &str) -> bool {
    s.contains(['/', '\\']) || s.ends_with(".json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never() -> PathBuf {
        panic!("fallback must not be computed")
    }

    #[test]
    fn exact_marker_takes_rest_of_line() {
        let reply = "Done.\nWorkflows written to /w/demo_project_1/workflow_designs_demo.json  \nBye";
        let got = MarkerParser::workflows().extract(reply, never);
        assert_eq!(
            got,
            Extraction::Found(PathBuf::from("/w/demo_project_1/workflow_designs_demo.json"))
        );
        assert_eq!(got.label(), "found");
    }

    #[test]
    fn last_marker_wins() {
        let reply = "Agent configs written to /tmp/a\nretrying\nAgent configs written to /tmp/b";
        let got = MarkerParser::agent_configs().extract(reply, never);
        assert_eq!(got.path(), Path::new("/tmp/b"));
    }

    #[test]
    fn lenient_marker_handles_case_and_backticks() {
        let reply = "All set: agent configs written to: `/p/agent_configs`.";
        let got = MarkerParser::agent_configs().extract(reply, never);
        assert_eq!(got, Extraction::Found(PathBuf::from("/p/agent_configs")));
    }

    #[test]
    fn missing_marker_yields_default_under_project() {
        let project = PathBuf::from("/w/demo_project_20250101_000000");
        let got = MarkerParser::workflows().extract("I could not finish.", || {
            project.join("workflow_designs_demo.json")
        });
        assert_eq!(got.label(), "fallback");
        assert!(got.path().starts_with(&project));
        assert!(!got.path().as_os_str().is_empty());
    }

    #[test]
    fn failure_prose_is_not_a_marker() {
        let reply = "Sorry, no workflows written to disk because the tools file was empty.";
        let got = MarkerParser::workflows().extract(reply, || PathBuf::from("/d"));
        assert_eq!(got, Extraction::NotFound(PathBuf::from("/d")));
    }

    #[test]
    fn lenient_marker_does_not_cross_lines() {
        let reply = "Workflows written to \nI could not write the file.";
        let got = MarkerParser::workflows().extract(reply, || PathBuf::from("/d"));
        assert_eq!(got, Extraction::NotFound(PathBuf::from("/d")));
    }

    #[test]
    fn bare_json_file_name_counts_as_path() {
        let got = MarkerParser::workflows()
            .extract("workflows written to designs.json.", never);
        assert_eq!(got, Extraction::Found(PathBuf::from("designs.json")));
    }

    #[test]
    fn marker_without_path_falls_back() {
        let got =
            MarkerParser::workflows().extract("Workflows written to \n", || PathBuf::from("/d"));
        assert_eq!(got, Extraction::NotFound(PathBuf::from("/d")));
    }
}
