//! Typed errors for boundaries where callers must branch on the failure kind.
//!
//! Everything above the adapter layer converts into one of these rather than
//! propagating a raw `anyhow::Error`; `anyhow` is still used for startup and
//! for wrapping I/O failures before they cross into a typed boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("policy block: {0}")]
    PolicyBlock(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn policy_block(reason: impl Into<String>) -> Self {
        Self::PolicyBlock(reason.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Stable short reason code, used as the `ExecutionResult::error` string
    /// and as the alert/audit reason field.
    pub fn reason_code(&self) -> String {
        match self {
            Self::Validation(m) => format!("validation:{m}"),
            Self::PolicyBlock(m) => m.clone(),
            Self::Io(e) => format!("io:{e}"),
            Self::InvariantViolation(m) => format!("invariant:{m}"),
            Self::Fatal(m) => format!("fatal:{m}"),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
