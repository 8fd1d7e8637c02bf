//! Typed identifiers.
//!
//! Every identifier wraps a ULID, so IDs of one kind sort by creation time.
//! On the wire (JSON, database rows) an ID is the bare ULID; for humans
//! (logs, error messages) it is rendered with a short kind prefix such as
//! `run_01J...`. Parsing accepts both forms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// An identifier string that is not a ULID, with or without the expected prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Name of the identifier type being parsed.
    pub id_type: &'static str,
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

fn parse_prefixed(s: &str, prefix: &str, id_type: &'static str) -> Result<Ulid, ParseIdError> {
    let raw = s
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(s);
    Ulid::from_str(raw).map_err(|e| ParseIdError {
        id_type,
        reason: e.to_string(),
    })
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Kind prefix used when displaying this ID.
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(s, Self::PREFIX, stringify!($name)).map(Self)
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }
    };
}

define_id!(
    /// User on whose behalf a run executes.
    UserId,
    "usr"
);

define_id!(
    /// A registered workflow graph.
    WorkflowId,
    "wf"
);

define_id!(
    /// One execution of a workflow.
    ///
    /// Callers may supply one up front so that redelivered jobs overwrite
    /// the same run record.
    WorkflowRunId,
    "run"
);

define_id!(JobId, "job");

define_id!(
    /// A change-driven trigger registration.
    WatchId,
    "watch"
);

define_id!(
    /// A monitor listener attached to a run.
    ListenerId,
    "lsn"
);

define_id!(SessionId, "sess");

define_id!(AgentId, "agt");
