//! Error types for pool and proxy operations
use std::time::Duration;

use thiserror::Error;

/// Boxed error type used for user-supplied factory and hook failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type covering pool and proxy failures
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// Pool has been shut down and rejects new acquisitions
    #[error("Pool {pool_id} is closed")]
    Closed {
        /// The process-unique pool identifier
        pool_id: u64,
    },

    /// Waiting for a capacity slot exceeded the allowed time
    #[error("Timed out after {waited:?} waiting for a pool slot")]
    Timeout {
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// The user factory failed while constructing a resource
    #[error("Factory failed creating resource {index}: {source}")]
    Factory {
        /// The creation index passed to the factory
        index: u64,
        /// The underlying factory error
        #[source]
        source: BoxError,
    },

    /// A lifecycle hook rejected the operation
    #[error("Hook '{hook}' failed: {source}")]
    Hook {
        /// Which hook failed (`getter`, `retter`, ...)
        hook: &'static str,
        /// The underlying hook error
        #[source]
        source: BoxError,
    },

    /// Proxy-originated failure (unbound object, missing provider, ...)
    #[error("Proxy error: {reason}")]
    Proxy {
        /// The failure reason
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a proxy error
    pub fn proxy<S: Into<String>>(reason: S) -> Self {
        Self::Proxy {
            reason: reason.into(),
        }
    }

    /// Check if this error is a capacity timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error means the pool is shut down
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Check if the operation may succeed when retried later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Factory { .. } => true,
            Self::Configuration { .. } | Self::Closed { .. } | Self::Hook { .. } => false,
            Self::Proxy { .. } => false,
        }
    }
}
