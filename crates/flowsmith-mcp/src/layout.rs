//! On-disk layout shared by every phase.
//!
//! ```text
//! <work_dir>/mcp_configs/<service>_config.json
//! <work_dir>/<service>_project_<YYYYMMDD_HHMMSS>/mcp_tools_<service>.json
//! <work_dir>/<service>_project_<YYYYMMDD_HHMMSS>/workflows/<workflow>.json
//! <work_dir>/<service>_project_<YYYYMMDD_HHMMSS>/agent_configs/<agent>.json
//! ```
//!
//! Nothing here is locked; see `PhaseTools` for in-process serialization.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PhaseError;

pub const DESCRIPTORS_DIR: &str = "mcp_configs";
pub const WORKFLOWS_DIR: &str = "workflows";
pub const AGENT_CONFIGS_DIR: &str = "agent_configs";

/// Timestamp format used in project directory names.
const PROJECT_STAMP: &str = "%Y%m%d_%H%M%S";

/// Base working directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor_path(&self, service: &str) -> PathBuf {
        self.root
            .join(DESCRIPTORS_DIR)
            .join(format!("{service}_config.json"))
    }

    /// Location of a new project for `service` stamped with `at`.
    pub fn project_at(&self, service: &str, at: DateTime<Local>) -> ProjectDir {
        ProjectDir::new(self.root.join(format!(
            "{service}_project_{}",
            at.format(PROJECT_STAMP)
        )))
    }
}

/// One timestamped project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDir {
    root: PathBuf,
}

impl ProjectDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project a tools artifact, designs file or workflows directory lives in.
    pub fn containing(path: &Path) -> Self {
        Self::new(
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tools_file(&self, service: &str) -> PathBuf {
        self.root.join(format!("mcp_tools_{service}.json"))
    }

    pub fn designs_file(&self, service: &str) -> PathBuf {
        self.root.join(format!("workflow_designs_{service}.json"))
    }

    pub fn workflows_dir(&self) -> PathBuf {
        self.root.join(WORKFLOWS_DIR)
    }

    pub fn workflow_file(&self, workflow_name: &str) -> PathBuf {
        self.workflows_dir().join(format!("{workflow_name}.json"))
    }

    pub fn agent_configs_dir(&self) -> PathBuf {
        self.root.join(AGENT_CONFIGS_DIR)
    }

    pub fn agent_config_file(&self, agent_name: &str) -> PathBuf {
        self.agent_configs_dir().join(format!("{agent_name}.json"))
    }
}

/// Write `value` as pretty JSON, creating parent directories. Overwrites.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PhaseError> {
    let write = || -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create_dir_all {}", dir.display()))?;
        }
        let body = serde_json::to_string_pretty(value).context("serialize")?;
        fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    };
    write().map_err(|e| PhaseError::persistence(path, e))?;
    tracing::debug!("wrote {}", path.display());
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PhaseError> {
    let read = || -> anyhow::Result<T> {
        let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))
    };
    read().map_err(|e| PhaseError::persistence(path, e))
}

/// `*.json` files directly inside `dir`, sorted by path.
pub fn json_files(dir: &Path) -> Result<Vec<PathBuf>, PhaseError> {
    let list = || -> anyhow::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false);
            if path.is_file() && is_json {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    };
    list().map_err(|e| PhaseError::persistence(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn paths_follow_convention() {
        let wd = WorkDir::new("/work");
        assert_eq!(
            wd.descriptor_path("demo"),
            PathBuf::from("/work/mcp_configs/demo_config.json")
        );
        let at = Local.with_ymd_and_hms(2025, 3, 9, 7, 5, 1).unwrap();
        let p = wd.project_at("demo", at);
        assert_eq!(p.root(), Path::new("/work/demo_project_20250309_070501"));
        assert_eq!(
            p.tools_file("demo"),
            PathBuf::from("/work/demo_project_20250309_070501/mcp_tools_demo.json")
        );
        assert_eq!(
            p.workflow_file("demo_crud_workflow"),
            PathBuf::from("/work/demo_project_20250309_070501/workflows/demo_crud_workflow.json")
        );
        assert_eq!(
            p.agent_config_file("demo_crud_agent"),
            PathBuf::from("/work/demo_project_20250309_070501/agent_configs/demo_crud_agent.json")
        );
        assert_eq!(ProjectDir::containing(&p.tools_file("demo")), p);
    }

    #[test]
    fn json_round_trip_and_listing() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/one.json");
        write_json(&nested, &vec![1, 2, 3]).unwrap();
        std::fs::write(tmp.path().join("a/b/skip.txt"), "x").unwrap();
        let back: Vec<u32> = read_json(&nested).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        let files = json_files(&tmp.path().join("a/b")).unwrap();
        assert_eq!(files, vec![nested]);
    }

    #[test]
    fn missing_dir_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = json_files(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), "persistence_error");
    }
}
