//! Kernel error taxonomy.

use thiserror::Error;

/// Result type used across the kernel's externally visible surface.
pub type KernelResult<T> = Result<T, KernelError>;

/// Externally visible kernel error.
///
/// Every error that crosses the runtime façade carries exactly one of these
/// tags. Callers can rely on `code()` as a stable, machine-readable
/// discriminator; the message is for humans and audit logs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The referenced session does not exist or the request is malformed at
    /// the session boundary (e.g. an empty tenant id).
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// The session exists but belongs to a different tenant than the caller
    /// claimed. The caller never learns anything about the other tenant.
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),

    /// No capability is registered for the submitted intent type.
    #[error("no capability registered for intent type '{0}'")]
    NoCapability(String),

    /// The saga driving the execution reached a terminal failure.
    #[error("saga execution failed: {0}")]
    SagaExecutionFailed(String),

    /// A step exceeded its per-capability timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Infrastructure failure (store unavailable, append failure) after
    /// bounded retries, with the underlying cause preserved for audit.
    #[error("internal error: {0}")]
    Unknown(String),
}

impl KernelError {
    pub fn invalid_session(msg: impl Into<String>) -> Self {
        Self::InvalidSession(msg.into())
    }

    pub fn tenant_mismatch(msg: impl Into<String>) -> Self {
        Self::TenantMismatch(msg.into())
    }

    pub fn no_capability(intent_type: impl Into<String>) -> Self {
        Self::NoCapability(intent_type.into())
    }

    pub fn saga_failed(msg: impl Into<String>) -> Self {
        Self::SagaExecutionFailed(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    /// Stable machine-readable tag for this error.
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::InvalidSession(_) => "InvalidSession",
            KernelError::TenantMismatch(_) => "TenantMismatch",
            KernelError::NoCapability(_) => "NoCapability",
            KernelError::SagaExecutionFailed(_) => "SagaExecutionFailed",
            KernelError::Timeout(_) => "Timeout",
            KernelError::Unknown(_) => "Unknown",
        }
    }
}
