//! Unique identifiers for PromptForge entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new identifier
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

define_id!(
    /// Unique identifier for a template version
    TemplateVersionId
);

define_id!(
    /// Unique identifier for a usage record
    UsageId
);

define_id!(
    /// Unique identifier for a context descriptor
    ContextId
);

define_id!(
    /// Unique identifier for an experiment
    ExperimentId
);

define_id!(
    /// Unique identifier for an experiment assignment
    AssignmentId
);

define_id!(
    /// Unique identifier for an optimization run
    RunId
);
