//! Error types for the Filament runtime core

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::fiber::FiberId;

/// Interruption signal raised on protocol violations and cancellation.
///
/// Not a domain error: the fiber observing it was cancelled or misused a
/// primitive, for example emitting onto an async input that already
/// terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interrupted {
    /// The fiber that observed the interruption.
    pub fiber: FiberId,
}

impl Interrupted {
    /// Create an interruption attributed to `fiber`
    pub fn new(fiber: FiberId) -> Self {
        Self { fiber }
    }

    /// Create an interruption attributed to the currently running fiber
    pub fn current() -> Self {
        Self::new(crate::runtime::current_fiber_id())
    }
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber {} was interrupted", self.fiber)
    }
}

impl std::error::Error for Interrupted {}

/// Main error type for Filament
#[derive(Error, Debug)]
pub enum Error {
    /// Fiber interruption (cancellation or protocol violation)
    #[error("Interrupted: {0}")]
    Interrupted(#[from] Interrupted),

    /// Invalid configuration value
    #[error("ConfigError: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("ConfigError: cannot read {}: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration JSON is malformed
    #[error("ConfigError: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The runtime ran out of work before the fiber completed
    #[error("StalledError: fiber {fiber} is suspended with no pending work to resume it")]
    Stalled { fiber: FiberId },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Returns `true` if this error is an interruption rather than a failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }
}

/// Result type alias for Filament operations
pub type Result<T> = std::result::Result<T, Error>;
