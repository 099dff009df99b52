//! Return codes and the client error type

use thiserror::Error;

/// Wire-visible return code taxonomy
///
/// The set is closed: every public entry point resolves to exactly one of
/// these codes, and the stat reporter records them verbatim. Retry logic
/// keys off [`ReturnCode::is_retryable`] — only transport-class failures
/// may be retried within the caller's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// Call succeeded
    Ok,
    /// Request failed validation; no remote call was made
    InvalidArgument,
    /// Transport-level failure (connect, send or deadline)
    NetworkFailed,
    /// Control plane answered with an internal error
    ServerError,
    /// Plugin lookup or registration failed
    PluginError,
    /// Resource already exists
    ExistedResource,
    /// Service (or instance) unknown to the control plane
    ServiceNotFound,
    /// Control plane rejected the call due to rate limiting
    RateLimited,
    /// Anything that does not map into the taxonomy
    Unknown,
}

impl ReturnCode {
    /// True for codes the retry envelope is allowed to recover from
    pub fn is_retryable(self) -> bool {
        matches!(self, ReturnCode::NetworkFailed | ReturnCode::ServerError)
    }

    /// Stable string form used in logs and stat records
    pub fn as_str(self) -> &'static str {
        match self {
            ReturnCode::Ok => "ok",
            ReturnCode::InvalidArgument => "invalid-argument",
            ReturnCode::NetworkFailed => "network-failed",
            ReturnCode::ServerError => "server-error",
            ReturnCode::PluginError => "plugin-error",
            ReturnCode::ExistedResource => "existed-resource",
            ReturnCode::ServiceNotFound => "service-not-found",
            ReturnCode::RateLimited => "rate-limited",
            ReturnCode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for all Polaris client operations
///
/// Mirrors the non-`Ok` half of [`ReturnCode`] and carries a short context
/// string where one helps debugging. Cheap to clone so it can be recorded
/// and returned at the same time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolarisError {
    /// Request failed local validation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport failure talking to the control plane
    #[error("network failed: {0}")]
    NetworkFailed(String),

    /// Control plane internal error
    #[error("server error: {0}")]
    ServerError(String),

    /// Plugin registry or plugin construction failure
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Resource already registered
    #[error("resource already exists: {0}")]
    ExistedResource(String),

    /// Service not known
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// Rate limited by the control plane
    #[error("rate limited")]
    RateLimited,

    /// Unmapped failure
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Result alias used across the SDK
pub type PolarisResult<T> = Result<T, PolarisError>;

impl PolarisError {
    /// The wire-visible code for this error
    pub fn code(&self) -> ReturnCode {
        match self {
            PolarisError::InvalidArgument(_) => ReturnCode::InvalidArgument,
            PolarisError::NetworkFailed(_) => ReturnCode::NetworkFailed,
            PolarisError::ServerError(_) => ReturnCode::ServerError,
            PolarisError::Plugin(_) => ReturnCode::PluginError,
            PolarisError::ExistedResource(_) => ReturnCode::ExistedResource,
            PolarisError::ServiceNotFound(_) => ReturnCode::ServiceNotFound,
            PolarisError::RateLimited => ReturnCode::RateLimited,
            PolarisError::Unknown(_) => ReturnCode::Unknown,
        }
    }

    /// True when the retry envelope may try again
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// The code a result resolves to, for stat recording
pub fn result_code<T>(result: &PolarisResult<T>) -> ReturnCode {
    match result {
        Ok(_) => ReturnCode::Ok,
        Err(e) => e.code(),
    }
}
