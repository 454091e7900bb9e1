//! Identifiers for runs, job runs and leased environments.
//!
//! All ids are time-ordered UUIDs rendered as `<prefix>_<uuid>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Returned when a string is not an id of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id: '{input}'")]
pub struct ParseIdError {
    kind: &'static str,
    input: String,
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Trailing random part of the id, for compact display.
            pub fn short(&self) -> String {
                let simple = self.0.simple().to_string();
                simple[simple.len() - 8..].to_string()
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

        impl std::str::FromStr for $name {
            type Err = ParseIdError;

            /// Accepts `<prefix>_<uuid>` or a bare UUID; another kind's
            /// prefix is rejected.
            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let invalid = || ParseIdError {
                    kind: Self::PREFIX,
                    input: s.to_string(),
                };
                let raw = match s.split_once('_') {
                    Some((prefix, rest)) if prefix == Self::PREFIX => rest,
                    Some(_) => return Err(invalid()),
                    None => s,
                };
                Uuid::parse_str(raw).map(Self).map_err(|_| invalid())
            }
        }
    };
}

define_id!(
    /// One pipeline invocation for one matched event.
    RunId => "run"
);
define_id!(
    /// One job's execution within a run.
    JobRunId => "job"
);
define_id!(
    /// A provisioned execution environment.
    EnvironmentId => "env"
);
