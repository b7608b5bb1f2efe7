//! Lightweight, non-`thiserror` error type. Operational failures that
//! propagate out of a `Result<T>` use `anyhow::Error`; this struct exists
//! only where a caller needs to pattern-match a specific shape.

/// A fatal failure while loading or validating policy/runtime config.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}
