//! Context descriptors: metadata that ranks templates for a situation.

use serde::{Deserialize, Serialize};

use crate::{ContextId, Time};

/// How a rule compares a payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Field must equal the value exactly
    Equals(String),
    /// Field must contain the value as a substring
    Contains(String),
    /// Field must match the regular expression
    Pattern(String),
}

/// One weighted matching rule against a payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    /// Payload field the rule inspects
    pub field: String,

    /// Comparison to apply
    pub kind: MatchKind,

    /// Relative weight of this rule in the accuracy score
    pub weight: f64,
}

impl MatchRule {
    /// Rule requiring exact equality.
    pub fn equals(field: impl Into<String>, value: impl Into<String>, weight: f64) -> Self {
        Self {
            field: field.into(),
            kind: MatchKind::Equals(value.into()),
            weight,
        }
    }

    /// Rule requiring a substring match.
    pub fn contains(field: impl Into<String>, value: impl Into<String>, weight: f64) -> Self {
        Self {
            field: field.into(),
            kind: MatchKind::Contains(value.into()),
            weight,
        }
    }

    /// Rule requiring a regex match.
    pub fn pattern(field: impl Into<String>, pattern: impl Into<String>, weight: f64) -> Self {
        Self {
            field: field.into(),
            kind: MatchKind::Pattern(pattern.into()),
            weight,
        }
    }
}

/// Describes a usage situation and which templates fit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDescriptor {
    /// Unique id
    pub id: ContextId,

    /// Context type this descriptor applies to
    pub context_type: String,

    /// Weighted matching rules evaluated against the payload
    pub rules: Vec<MatchRule>,

    /// Priority among descriptors of the same type (higher wins)
    pub priority: u8,

    /// Recommended template name
    pub recommended: Option<String>,

    /// Fallback template name when the recommendation is unusable
    pub fallback: Option<String>,

    /// Historical match accuracy for this descriptor (0-1)
    pub match_accuracy: f64,

    /// Creation time
    pub created_at: Time,
}

impl ContextDescriptor {
    /// Create a descriptor with no rules yet.
    pub fn new(context_type: impl Into<String>) -> Self {
        Self {
            id: ContextId::new(),
            context_type: context_type.into(),
            rules: Vec::new(),
            priority: 0,
            recommended: None,
            fallback: None,
            match_accuracy: 0.0,
            created_at: chrono::Utc::now(),
        }
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: MatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the recommended template name.
    pub fn with_recommended(mut self, name: impl Into<String>) -> Self {
        self.recommended = Some(name.into());
        self
    }

    /// Set the fallback template name.
    pub fn with_fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}
