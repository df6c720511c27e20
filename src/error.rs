//! Typed errors for the runner subsystems.
//!
//! Fatal-versus-continue is decided by the walker, not here: these types only
//! carry the kind and enough context to report it. The CLI downcasts them to
//! pick an exit code.

use thiserror::Error;

/// Error kinds reserved by the executor wire contract.
///
/// Codes 460-465 are reserved status codes; everything else non-200 maps to
/// [`ProtocolErrorKind::Unhandled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    ModelNotFound,
    StepNotFound,
    InvalidStepHandler,
    PathNotFound,
    LoadError,
    NoCodeLoaded,
    Unhandled,
}

impl ProtocolErrorKind {
    /// Map a reserved executor status code onto a kind.
    pub fn from_status(status: u16) -> Self {
        match status {
            460 => Self::ModelNotFound,
            461 => Self::StepNotFound,
            462 => Self::InvalidStepHandler,
            463 => Self::PathNotFound,
            464 => Self::LoadError,
            465 => Self::NoCodeLoaded,
            _ => Self::Unhandled,
        }
    }

    /// Load-time kinds end the run immediately; the rest fail the current
    /// step and let the walker continue.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::PathNotFound | Self::LoadError | Self::NoCodeLoaded)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::ModelNotFound => "Model Not Found",
            Self::StepNotFound => "Step Not Found",
            Self::InvalidStepHandler => "Invalid Step Handler",
            Self::PathNotFound => "Path Not Found",
            Self::LoadError => "Load Error",
            Self::NoCodeLoaded => "Test Code Not Loaded",
            Self::Unhandled => "Unhandled Error",
        }
    }
}

/// Errors raised by the executor layer.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// HTTP failure unrelated to the protocol contract (connection refused,
    /// timeouts, malformed transport).
    #[error("executor transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The executor answered with a reserved error status.
    #[error("executor responded with status code {status} {}: {message}", .kind.describe())]
    Protocol {
        kind: ProtocolErrorKind,
        status: u16,
        message: String,
        trace: Option<String>,
    },

    /// A 200 response that does not match the wire contract.
    #[error("invalid executor response: {0}")]
    InvalidResponse(String),

    /// The co-spawned executor service never became healthy.
    #[error("executor service failed to start: {0}")]
    ServiceStart(String),
}

impl ExecutorError {
    pub fn protocol_kind(&self) -> Option<ProtocolErrorKind> {
        match self {
            Self::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Errors raised by the GraphWalker subprocess or its REST client.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("failed to spawn GraphWalker: {0}")]
    Spawn(String),

    /// The child died; `tail` is the last captured output.
    #[error("GraphWalker exited with code {exit_code:?}\n{tail}")]
    Exited {
        exit_code: Option<i32>,
        tail: String,
    },

    #[error("GraphWalker did not become ready on port {port} within {timeout_secs}s\n{tail}")]
    StartTimeout {
        port: u16,
        timeout_secs: u64,
        tail: String,
    },

    #[error("GraphWalker responded with status code: {0}")]
    Status(u16),

    #[error("GraphWalker responded with the error: {0}")]
    Envelope(String),

    /// Empty or unparsable response body. Whether this means "path exhausted"
    /// or "generator died" depends on child liveness, which the planner owns.
    #[error("GraphWalker sent a malformed response: {0}")]
    MalformedResponse(String),

    #[error("GraphWalker transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A one-shot subcommand (`offline`, `check`, ...) wrote to stderr.
    #[error("GraphWalker command failed: {0}")]
    Command(String),
}

/// Aggregate model-set validation failure. The issues are already rendered
/// in stable (model, element) order.
#[derive(Debug, Error)]
#[error("invalid model(s):\n{}", .issues.join("\n"))]
pub struct ValidationError {
    pub issues: Vec<String>,
}

/// Command-line usage error caught after argument parsing (e.g. a stop
/// condition the command cannot accept).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UsageError(pub String);
