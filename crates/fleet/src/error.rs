//! Error types for fleet operations.
//!
//! Errors are categorized so callers can tell a descriptor mistake from a
//! failing remote call or a monitor that converged into a failed state.
//! Remote messages are carried verbatim.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Kind of failure reported by an external API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The addressed object does not exist
    NotFound,
    /// An object with the same name already exists
    AlreadyExists,
    /// Anything else
    Other,
}

/// Failure returned by one call to an external API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::AlreadyExists,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ProviderErrorKind::AlreadyExists
    }
}

/// Result type for external API calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Categories of fleet errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    /// Invalid descriptor, selection or settings
    Configuration,
    /// A supporting bucket or role could not be deployed
    Dependency,
    /// An external API call failed
    Provider,
    /// The monitor or its latest run ended in a failed state
    TerminalState,
    /// Polling gave up after the configured maximum wait
    Timeout,
    /// Some units of a batch failed
    Batch,
    /// Local packaging, build or filesystem failure
    Local,
}

impl ErrorCategory {
    /// Get a user-friendly description of this error category.
    pub fn description(self) -> &'static str {
        match self {
            Self::Configuration => "Invalid configuration",
            Self::Dependency => "Supporting resource failed",
            Self::Provider => "Remote call failed",
            Self::TerminalState => "Monitor failed",
            Self::Timeout => "Gave up waiting",
            Self::Batch => "Batch partially failed",
            Self::Local => "Local failure",
        }
    }
}

/// Errors that can occur while reconciling monitors.
#[derive(Debug, Error)]
pub enum Error {
    /// Descriptor, selection or settings are invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },

    /// A supporting object failed to deploy
    #[error("failed to deploy {object}: {source}")]
    Dependency {
        /// Kind and name of the object, e.g. `bucket cw-syn-results-1-us-east-1`
        object: String,
        /// Underlying remote failure
        #[source]
        source: ProviderError,
    },

    /// An external API call failed
    #[error("{operation}: {source}")]
    Provider {
        /// The call that failed
        operation: String,
        /// Remote failure, message passed through unchanged
        #[source]
        source: ProviderError,
    },

    /// Monitor or run reached a failed terminal state
    #[error("[{monitor}] {state}: {reason}")]
    TerminalState {
        /// Monitor name
        monitor: String,
        /// State that was reached (monitor or run state)
        state: String,
        /// Reason reported by the remote side
        reason: String,
    },

    /// Monitor did not leave its transient states in time
    #[error("[{monitor}] not stable after {elapsed:?}")]
    PollTimeout {
        /// Monitor name
        monitor: String,
        /// Time spent polling
        elapsed: Duration,
    },

    /// Operation requires a deployed monitor
    #[error("[{monitor}] not yet deployed")]
    NotDeployed {
        /// Monitor name
        monitor: String,
    },

    /// Aggregate failure of a batch
    #[error("{failed} of {total} monitors failed {operation}")]
    PartialBatchFailure {
        /// Number of failed units
        failed: usize,
        /// Number of units in the batch
        total: usize,
        /// Operation name
        operation: String,
    },

    /// Code archive could not be produced
    #[error("failed to package {path}: {message}")]
    Package {
        /// Source directory
        path: PathBuf,
        /// Details
        message: String,
    },

    /// Dependency installation failed
    #[error("failed to install dependencies in {dir}: {stderr}")]
    Build {
        /// Source directory the installer ran in
        dir: PathBuf,
        /// Standard error output of the installer
        stderr: String,
    },

    /// Run log could not be located
    #[error("cannot find log file in artifact location {location}")]
    MissingLog {
        /// Artifact location that was searched
        location: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn dependency(object: impl Into<String>, source: ProviderError) -> Self {
        Self::Dependency {
            object: object.into(),
            source,
        }
    }

    pub fn provider(operation: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            operation: operation.into(),
            source,
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::NotDeployed { .. } => ErrorCategory::Configuration,
            Self::Dependency { .. } => ErrorCategory::Dependency,
            Self::Provider { .. } | Self::MissingLog { .. } => ErrorCategory::Provider,
            Self::TerminalState { .. } => ErrorCategory::TerminalState,
            Self::PollTimeout { .. } => ErrorCategory::Timeout,
            Self::PartialBatchFailure { .. } => ErrorCategory::Batch,
            Self::Package { .. }
            | Self::Build { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorCategory::Local,
        }
    }
}

/// Result type for fleet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Attach the name of the failed call to a provider result.
pub(crate) trait ProviderResultExt<T> {
    fn during<F, S>(self, operation: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;

    fn deploying<F, S>(self, object: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ProviderResultExt<T> for ProviderResult<T> {
    fn during<F, S>(self, operation: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::provider(operation(), e))
    }

    fn deploying<F, S>(self, object: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::dependency(object(), e))
    }
}
