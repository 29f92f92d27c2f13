//! Error types for the verification engine
//!
//! Verification outcomes are never errors: a clause that does not hold is
//! reported as `passed = false` on its assertion. `Error` covers the
//! infrastructural failures around it (unparseable source, unreadable build
//! configuration, malformed serialized units), and callers inside the engine
//! degrade on them rather than propagate.

use thiserror::Error;

/// Engine error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Implementation source could not be tokenized or is structurally broken
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Build configuration could not be read or decoded
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Serialized unit is malformed
    #[error("Unit error: {0}")]
    UnitError(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
