//! Generate workflows and agent configs for an MCP service.
//!
//! The pipeline connects to a service, discovers its tools, synthesizes
//! workflows and synthesizes the agents that run them. Each phase writes a
//! JSON artifact that the next phase reads back from a shared project
//! directory.

pub mod config;
pub mod error;
pub mod extract;
pub mod handler;
pub mod layout;
pub mod mcp;
pub mod model;
pub mod orchestrator;
pub mod phases;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;
