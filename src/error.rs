//! Error types for the kuberecovery operator
//!
//! Errors carry enough context to be actionable from logs alone: the label or
//! duration that failed to parse, the GVK that discovery could not resolve,
//! and so on. `is_retryable` drives the controller error policy.

use thiserror::Error;

/// Main error type for kuberecovery operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A retention period string that could not be parsed
    #[error("invalid retention period {period:?}: {message}")]
    InvalidDuration {
        /// The offending duration string
        period: String,
        /// Description of what's invalid
        message: String,
    },

    /// A timestamp label that could not be parsed
    #[error("invalid timestamp {value:?}: {message}")]
    InvalidTimestamp {
        /// The offending label value
        value: String,
        /// Description of what's invalid
        message: String,
    },

    /// Discovery could not resolve a group/version/kind to a resource
    #[error("discovery failed for {api_version}/{kind}: {message}")]
    Discovery {
        /// apiVersion of the object being resolved
        api_version: String,
        /// Kind of the object being resolved
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "capture", "pool")
        context: String,
    },
}

impl Error {
    /// Create an invalid-duration error
    pub fn invalid_duration(period: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidDuration {
            period: period.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid-timestamp error
    pub fn invalid_timestamp(value: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            value: value.into(),
            message: msg.into(),
        }
    }

    /// Create a discovery error for a given apiVersion/kind
    pub fn discovery(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Discovery {
            api_version: api_version.into(),
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Transient API errors (timeouts, conflicts, server errors) should be
    /// requeued. Malformed input (durations, timestamps) is terminal for the
    /// object and requires a spec or label fix, so retrying is pointless.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Don't retry on 4xx errors other than 409 Conflict
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::InvalidDuration { .. } => false,
            Error::InvalidTimestamp { .. } => false,
            Error::Discovery { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }
}

/// Check whether a kube error is an AlreadyExists conflict on create
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// Check whether a kube error is a NotFound response
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
