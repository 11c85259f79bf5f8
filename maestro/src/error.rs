//! Error taxonomy for the mission core.
//!
//! Kinds map to how the controller reacts: configuration errors fail the
//! mission immediately, transient provider errors are retried by the
//! dispatcher, schema/tool failures degrade the step, cancellation unwinds
//! silently, consistency warnings never interrupt a mission.

use thiserror::Error;

/// Coarse error kind persisted into `error_info` and surfaced to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    TransientProvider,
    SchemaValidation,
    Tool,
    Cancellation,
    Consistency,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::TransientProvider => "transient_provider",
            ErrorKind::SchemaValidation => "schema_validation",
            ErrorKind::Tool => "tool",
            ErrorKind::Cancellation => "cancellation",
            ErrorKind::Consistency => "consistency",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Errors from the context store and its persistence layer.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("mission not found: {0}")]
    NotFound(String),
    /// Rejected status transition (see the lifecycle state machine).
    #[error("illegal status transition for mission {mission_id}: {from} -> {to}")]
    IllegalTransition {
        mission_id: String,
        from: String,
        to: String,
    },
    /// Persistence failed; the in-memory mutation was rolled back and the
    /// caller must treat the operation as not applied.
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("invalid outline: {0}")]
    InvalidOutline(String),
    #[error("unknown section: {0}")]
    UnknownSection(String),
    #[error("unknown report version: {0}")]
    UnknownVersion(u32),
}

/// Errors from the model dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing/invalid API key, unknown model, missing endpoint. Not retried;
    /// the user-facing message asks for a settings update.
    #[error("provider configuration error: {0}")]
    Configuration(String),
    /// 5xx / network / 429 after exhausting retries.
    #[error("provider error after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
    /// Output could not be parsed to the requested schema after all repair passes.
    #[error("schema validation failed: {0}")]
    Schema(String),
    /// The mission stopped while the call was queued or in flight.
    #[error("call cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Configuration(_) => ErrorKind::Configuration,
            DispatchError::Transient { .. } => ErrorKind::TransientProvider,
            DispatchError::Schema(_) => ErrorKind::SchemaValidation,
            DispatchError::Cancelled => ErrorKind::Cancellation,
        }
    }

    /// True when the controller should fail the mission rather than degrade the step.
    pub fn is_fatal_for_mission(&self) -> bool {
        matches!(self, DispatchError::Configuration(_))
    }
}

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("fetch timed out: {0}")]
    Timeout(String),
}

impl ToolError {
    /// Short machine-readable tag used in `{error, error_type}` tool results.
    pub fn error_type(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "not_found",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Execution(_) => "execution_error",
            ToolError::Transport(_) => "transport_error",
            ToolError::Timeout(_) => "timeout",
        }
    }
}

/// Errors from the realtime bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown connection: {0}")]
    UnknownConnection(String),
    #[error("delivery failed after {0} retries")]
    DeliveryFailed(u32),
}

/// Top-level mission run error: what `run_mission` reports when a mission
/// moves to `failed`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RunError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunError::Context(_) => ErrorKind::Fatal,
            RunError::Dispatch(e) => e.kind(),
            RunError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Concise user-facing message stored in `error_info`.
    pub fn user_message(&self) -> String {
        match self {
            RunError::Dispatch(DispatchError::Configuration(msg)) => format!(
                "Provider configuration problem: {}. Update the model settings and try again.",
                msg
            ),
            other => other.to_string(),
        }
    }
}
