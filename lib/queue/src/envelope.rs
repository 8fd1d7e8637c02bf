//! Versioned envelope for jobs on the wire.
//!
//! Every job published to NATS is wrapped as `{"version": N, "payload": ...}`
//! so that the job shape can evolve while older messages are still queued.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The envelope version this build writes.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned wrapper around a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

/// Why an envelope could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Bytes are not a JSON envelope or the payload does not match `T`.
    Malformed { reason: String },
    /// Written by a newer build.
    UnsupportedVersion { found: u32 },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed envelope: {reason}"),
            Self::UnsupportedVersion { found } => write!(
                f,
                "unsupported envelope version {found} (this build reads up to {CURRENT_VERSION})"
            ),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl<T> Envelope<T> {
    /// Wraps a payload with the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes a payload inside a current-version envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn seal(payload: T) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Self::new(payload))
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Reads the version first, then the payload.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed bytes or a version newer than
    /// [`CURRENT_VERSION`].
    pub fn open(bytes: &[u8]) -> Result<T, EnvelopeError> {
        let raw: Envelope<JsonValue> =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed {
                reason: e.to_string(),
            })?;
        if raw.version > CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion { found: raw.version });
        }
        serde_json::from_value(raw.payload).map_err(|e| EnvelopeError::Malformed {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn seal_writes_version_header() {
        let bytes = Envelope::seal(Ping { n: 3 }).expect("seal");
        let json: JsonValue = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(json, json!({"version": CURRENT_VERSION, "payload": {"n": 3}}));
    }

    #[test]
    fn open_reads_sealed_payload() {
        let bytes = Envelope::seal(Ping { n: 9 }).expect("seal");
        assert_eq!(Envelope::<Ping>::open(&bytes), Ok(Ping { n: 9 }));
    }

    #[test]
    fn open_rejects_future_versions() {
        let bytes = serde_json::to_vec(&json!({"version": 99, "payload": {"n": 1}})).expect("json");
        assert_eq!(
            Envelope::<Ping>::open(&bytes),
            Err(EnvelopeError::UnsupportedVersion { found: 99 })
        );
    }

    #[test]
    fn open_rejects_mismatched_payload() {
        let bytes = serde_json::to_vec(&json!({"version": 1, "payload": {"m": 1}})).expect("json");
        assert!(matches!(
            Envelope::<Ping>::open(&bytes),
            Err(EnvelopeError::Malformed { .. })
        ));
    }
}
