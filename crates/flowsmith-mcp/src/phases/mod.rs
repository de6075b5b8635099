//! The four pipeline phases plus project validation, behind one facade.
//!
//! Each phase reads the artifact the previous one wrote, located by the
//! path conventions in [`crate::layout`], and returns a serializable report
//! or a [`PhaseError`]. Nothing here panics or leaks an error past the
//! phase boundary.

pub mod agents;
pub mod connect;
pub mod discover;
pub mod validate;
pub mod workflows;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::PipelineSettings;
use crate::error::PhaseError;
use crate::mcp::ToolLister;
use crate::runner::AgentRunner;

pub use agents::{AgentConfigsReport, AgentDesignReport, FileFailure};
pub use connect::InstallReport;
pub use discover::DiscoveryReport;
pub use validate::{Issue, Severity, ValidationReport, Verdict};
pub use workflows::{WorkflowDesignReport, WorkflowsReport};

/// Owns everything the phases need: settings, the tool lister, the optional
/// designer agent and the per-service locks.
pub struct PhaseTools {
    settings: PipelineSettings,
    lister: Arc<dyn ToolLister>,
    designer: Option<Arc<dyn AgentRunner>>,
    /// Held by guards and waiters only; idle entries are pruned on the next lock.
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl PhaseTools {
    pub fn new(settings: PipelineSettings, lister: Arc<dyn ToolLister>) -> Self {
        Self {
            settings,
            lister,
            designer: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Agent used by the delegated synthesis phases.
    pub fn with_designer(mut self, designer: Arc<dyn AgentRunner>) -> Self {
        self.designer = Some(designer);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Serialize work for one service within this process. Runs in other
    /// processes can still race on the descriptor file.
    async fn service_lock(&self, service: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, w| w.strong_count() > 0);
            match locks.get(service).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(service.to_string(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    fn designer(&self) -> Result<&Arc<dyn AgentRunner>, PhaseError> {
        self.designer.as_ref().ok_or_else(|| {
            PhaseError::Configuration(
                "delegated synthesis needs an LLM credential; none was configured".to_string(),
            )
        })
    }
}

/// Fail with a `Configuration` error unless `path` exists.
fn require_input(path: &Path, what: &str) -> Result<(), PhaseError> {
    if path.as_os_str().is_empty() {
        return Err(PhaseError::Configuration(format!("{what} path is empty")));
    }
    if !path.exists() {
        return Err(PhaseError::Configuration(format!(
            "{what} not found at {}; run the previous phase first",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthesisStrategy;
    use crate::test_support::StubLister;

    #[tokio::test]
    async fn same_service_shares_one_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = PhaseTools::new(
            PipelineSettings::new(tmp.path(), SynthesisStrategy::RuleBased),
            Arc::new(StubLister::new(&[])),
        );
        let guard = tools.service_lock("demo").await;
        assert!(
            tokio::time::timeout(
                std::time::Duration::from_millis(50),
                tools.service_lock("demo")
            )
            .await
            .is_err()
        );
        let _other = tools.service_lock("other").await;
        drop(guard);
        let _again = tools.service_lock("demo").await;
    }

    #[tokio::test]
    async fn idle_service_locks_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = PhaseTools::new(
            PipelineSettings::new(tmp.path(), SynthesisStrategy::RuleBased),
            Arc::new(StubLister::new(&[])),
        );
        drop(tools.service_lock("first").await);
        let _held = tools.service_lock("second").await;
        let locks = tools.locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key("second"));
    }

    #[test]
    fn missing_input_is_configuration_error() {
        let err = require_input(Path::new("/definitely/not/here.json"), "tools file").unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        assert!(err.to_string().contains("previous phase"));
    }

    #[test]
    fn designer_is_required_for_delegation() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = PhaseTools::new(
            PipelineSettings::new(tmp.path(), SynthesisStrategy::Delegated),
            Arc::new(StubLister::new(&[])),
        );
        assert_eq!(tools.designer().err().map(|e| e.kind()), Some("configuration_error"));
    }
}
