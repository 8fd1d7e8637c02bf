//! Error types for the integration crate.

use std::fmt;

/// Errors resolving credential material for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The run carries no credential under this name.
    NotFound { name: String },
    /// The credential could not be parsed.
    Malformed { name: String, reason: String },
    /// The stored token has expired or is about to.
    RefreshRequired { name: String },
    /// The credential kind has no access token.
    NoAccessToken { name: String, kind: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "credential '{name}' not found"),
            Self::Malformed { name, reason } => {
                write!(f, "credential '{name}' is malformed: {reason}")
            }
            Self::RefreshRequired { name } => {
                write!(f, "credential '{name}' has expired and must be refreshed")
            }
            Self::NoAccessToken { name, kind } => {
                write!(f, "credential '{name}' of type {kind} has no access token")
            }
        }
    }
}

impl std::error::Error for CredentialError {}
