//! Platform-minted identifiers.
//!
//! Workflows and sessions are keyed by ULIDs written with a short type
//! prefix (`wf_…`, `ses_…`). The prefixed form is what appears in URLs,
//! logs, and JSON; bare ULIDs are still accepted when parsing. Ordering
//! follows the ULID, so sessions sort by when they started.
//!
//! Identifiers authored in the flow editor (nodes, connections) are
//! free-form strings and live in `callflow-workflow`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use ulid::{DecodeError, Ulid};

/// A string that is not a valid identifier of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// Prefix of the identifier kind that was expected.
    pub prefix: &'static str,
    pub input: String,
    pub reason: DecodeError,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` is not a {}_ identifier: {}",
            self.input, self.prefix, self.reason
        )
    }
}

impl std::error::Error for ParseIdError {}

fn parse_prefixed(prefix: &'static str, input: &str) -> Result<Ulid, ParseIdError> {
    let encoded = input
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .unwrap_or(input);
    Ulid::from_string(encoded).map_err(|reason| ParseIdError {
        prefix,
        input: input.to_string(),
        reason,
    })
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mints a fresh identifier stamped with the current time.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            #[must_use]
            pub const fn ulid(self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
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
                parse_prefixed(Self::PREFIX, s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_id!(
    /// A stored call-flow definition.
    WorkflowId => "wf"
);

ulid_id!(
    /// One call walking one workflow.
    SessionId => "ses"
);
