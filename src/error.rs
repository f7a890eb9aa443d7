//! Error taxonomy for the execution engine.
//!
//! A single [`EngineError`] enum covers validation, execution, HTTP, quota
//! and expression-evaluation failures. [`EngineError::kind`] maps every
//! variant onto the sentinel tags the rest of the system (and callers)
//! match against, so code never has to match on display strings.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Sentinel error kind, stable across error message wording changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    InvalidInput,
    MissingRequiredInput,
    InputTypeMismatch,
    InvalidInputValue,
    InvalidOperation,
    UnsupportedOperation,
    OperationFailed,
    DivisionByZero,
    HttpRequestFailed,
    HttpTimeout,
    InvalidUrl,
    UrlNotAllowed,
    MaxRedirectsExceeded,
    ResponseTooLarge,
    NotAnArray,
    InvalidArrayIndex,
    ArrayEmpty,
    ArrayTooLarge,
    ExpressionEvaluation,
    InvalidExpression,
    MaxLoopIterations,
    InfiniteLoop,
    CacheKeyNotFound,
    CacheExpired,
    MaxAttemptsExceeded,
    RetryFailed,
    /// Operator registration/lookup failures. Not enumerated in the spec's
    /// error-kind list but required by the registry contract (duplicate
    /// registration, unknown node type).
    Registry,
    /// Run-level quota exceeded (node executions, HTTP calls).
    QuotaExceeded,
    /// The run was cancelled via its cancellation token.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("missing required input: {field}")]
    MissingRequiredInput { field: String },

    #[error("input type mismatch: expected {expected}, got {actual}")]
    InputTypeMismatch { expected: String, actual: String },

    #[error("invalid input value: {message}")]
    InvalidInputValue { message: String },

    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("HTTP request failed: {message}")]
    HttpRequestFailed { message: String },

    #[error("HTTP request timed out after {timeout_ms}ms")]
    HttpTimeout { timeout_ms: u64 },

    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("URL not allowed: {url} ({reason})")]
    UrlNotAllowed { url: String, reason: String },

    #[error("maximum redirects ({max}) exceeded")]
    MaxRedirectsExceeded { max: u32 },

    #[error("response too large: exceeded {max_bytes} bytes")]
    ResponseTooLarge { max_bytes: u64 },

    #[error("value is not an array")]
    NotAnArray,

    #[error("invalid array index: {index}")]
    InvalidArrayIndex { index: i64 },

    #[error("array is empty")]
    ArrayEmpty,

    #[error("array too large: {len} exceeds limit {limit}")]
    ArrayTooLarge { len: usize, limit: usize },

    #[error("expression evaluation failed: {message}")]
    ExpressionEvaluation { message: String },

    #[error("invalid expression: {expression}: {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("maximum loop iterations ({max}) exceeded")]
    MaxLoopIterations { max: u64 },

    #[error("infinite loop detected")]
    InfiniteLoop,

    #[error("cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    #[error("cache entry expired: {key}")]
    CacheExpired { key: String },

    #[error("maximum retry attempts ({max_attempts}) exceeded: {last_error}")]
    MaxAttemptsExceeded { max_attempts: u32, last_error: String },

    #[error("retry failed: {message}")]
    RetryFailed { message: String },

    #[error("registry error: {message}")]
    Registry { message: String },

    #[error("quota exceeded: {quota} (limit {limit})")]
    QuotaExceeded { quota: String, limit: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Map this error onto its sentinel kind.
    pub fn kind(&self) -> EngineErrorKind {
        use EngineErrorKind as K;
        match self {
            Self::InvalidInput { .. } => K::InvalidInput,
            Self::MissingRequiredInput { .. } => K::MissingRequiredInput,
            Self::InputTypeMismatch { .. } => K::InputTypeMismatch,
            Self::InvalidInputValue { .. } => K::InvalidInputValue,
            Self::InvalidOperation { .. } => K::InvalidOperation,
            Self::UnsupportedOperation { .. } => K::UnsupportedOperation,
            Self::OperationFailed { .. } => K::OperationFailed,
            Self::DivisionByZero => K::DivisionByZero,
            Self::HttpRequestFailed { .. } => K::HttpRequestFailed,
            Self::HttpTimeout { .. } => K::HttpTimeout,
            Self::InvalidUrl { .. } => K::InvalidUrl,
            Self::UrlNotAllowed { .. } => K::UrlNotAllowed,
            Self::MaxRedirectsExceeded { .. } => K::MaxRedirectsExceeded,
            Self::ResponseTooLarge { .. } => K::ResponseTooLarge,
            Self::NotAnArray => K::NotAnArray,
            Self::InvalidArrayIndex { .. } => K::InvalidArrayIndex,
            Self::ArrayEmpty => K::ArrayEmpty,
            Self::ArrayTooLarge { .. } => K::ArrayTooLarge,
            Self::ExpressionEvaluation { .. } => K::ExpressionEvaluation,
            Self::InvalidExpression { .. } => K::InvalidExpression,
            Self::MaxLoopIterations { .. } => K::MaxLoopIterations,
            Self::InfiniteLoop => K::InfiniteLoop,
            Self::CacheKeyNotFound { .. } => K::CacheKeyNotFound,
            Self::CacheExpired { .. } => K::CacheExpired,
            Self::MaxAttemptsExceeded { .. } => K::MaxAttemptsExceeded,
            Self::RetryFailed { .. } => K::RetryFailed,
            Self::Registry { .. } => K::Registry,
            Self::QuotaExceeded { .. } => K::QuotaExceeded,
            Self::Cancelled => K::Cancelled,
            Self::Http(_) => K::HttpRequestFailed,
            Self::Json(_) => K::InvalidInputValue,
        }
    }

    /// Whether this error is a non-recoverable, run-ending condition
    /// (quota exhaustion, cancellation) as opposed to a node-local failure.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. } | Self::Cancelled)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput { message: message.into() }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingRequiredInput { field: field.into() }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InputTypeMismatch { expected: expected.into(), actual: actual.into() }
    }
}
