//! Target-service descriptors and the MCP client used to list their tools.
//!
//! Only stdio transports are launched; other transports are accepted as data
//! so descriptors round-trip, but listing them fails.

pub mod enumerator;
pub mod types;

pub use enumerator::*;
pub use types::*;
