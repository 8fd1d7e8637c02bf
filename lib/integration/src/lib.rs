//! Integrations for flowloom.
//!
//! - **Credentials**: typed credential material passed to a run, and the
//!   [`AccessTokenProvider`] seam that turns it into a usable token
//! - **HTTP request node**: the `http.request` executor

pub mod credential;
pub mod error;
pub mod http;

pub use credential::{AccessTokenProvider, CredentialData, CredentialType, StoredTokenProvider};
pub use error::CredentialError;
pub use http::{HTTP_REQUEST, HttpRequestExecutor};
