//! Artifact types and the naming conventions that link them.

pub mod naming;
pub mod types;

pub use naming::*;
pub use types::*;
