//! Versioned prompt templates.

use serde::{Deserialize, Serialize};

use crate::{TemplateVersionId, Time};

/// Lifecycle status of a template version.
///
/// Transitions are forward-only and move one step at a time:
/// Draft -> Testing -> Active -> Deprecated -> Archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    /// Newly proposed, not yet serving traffic
    Draft,
    /// Under evaluation (experiments, canaries)
    Testing,
    /// Serving production traffic
    Active,
    /// Superseded; still readable, no longer recommended
    Deprecated,
    /// Retired; kept for history only
    Archived,
}

impl TemplateStatus {
    fn rank(self) -> u8 {
        match self {
            TemplateStatus::Draft => 0,
            TemplateStatus::Testing => 1,
            TemplateStatus::Active => 2,
            TemplateStatus::Deprecated => 3,
            TemplateStatus::Archived => 4,
        }
    }

    /// Whether moving to `next` is a legal single forward step.
    pub fn can_advance_to(self, next: TemplateStatus) -> bool {
        next.rank() == self.rank() + 1
    }

    /// Whether this version may serve selection traffic.
    pub fn is_usable(self) -> bool {
        matches!(self, TemplateStatus::Testing | TemplateStatus::Active)
    }
}

impl std::fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TemplateStatus::Draft => "draft",
            TemplateStatus::Testing => "testing",
            TemplateStatus::Active => "active",
            TemplateStatus::Deprecated => "deprecated",
            TemplateStatus::Archived => "archived",
        };
        write!(f, "{}", s)
    }
}

/// Declared template variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable name as it appears in the content
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Default value, used when the caller omits an optional variable
    pub default_value: Option<String>,

    /// Whether the variable must be supplied at render time
    pub required: bool,
}

impl VariableSpec {
    /// Declare a required variable.
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default_value: None,
            required: true,
        }
    }

    /// Declare an optional variable with a default.
    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default_value: Some(default.into()),
            required: false,
        }
    }
}

/// Metadata supplied when proposing a template version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateMetadata {
    /// Render engine tag (which `Renderer` understands this content)
    pub engine: String,

    /// Category used for fallback selection
    pub category: String,

    /// Declared variables
    pub variables: Vec<VariableSpec>,
}

/// One immutable version of a named template.
///
/// Content is never edited in place. A change allocates the next version
/// number and flips the `is_latest` pointer; exactly one version per name
/// carries `is_latest = true` at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVersion {
    /// Unique id of this version
    pub id: TemplateVersionId,

    /// Stable template name shared by all versions
    pub name: String,

    /// Monotonic version number within the name
    pub version: u32,

    /// Template content (placeholder syntax is engine-defined)
    pub content: String,

    /// Render engine tag
    pub engine: String,

    /// Category used for fallback selection
    pub category: String,

    /// Declared variables
    pub variables: Vec<VariableSpec>,

    /// Lifecycle status
    pub status: TemplateStatus,

    /// Whether this is the latest version of the name
    pub is_latest: bool,

    /// Completed usages recorded against this version
    pub usage_count: u64,

    /// Percentage of completed usages that succeeded (0-100)
    pub success_rate: f64,

    /// Mean feedback rating
    pub avg_rating: f64,

    /// Mean overall quality over usages that reported one (0-1)
    pub avg_quality: f64,

    /// Blended effectiveness score (0-100)
    pub effectiveness: f64,

    /// When a usage last completed against this version
    pub last_used: Option<Time>,

    /// Creation time
    pub created_at: Time,
}

impl TemplateVersion {
    /// Create version 1 of a new template name, in draft.
    pub fn first(name: impl Into<String>, content: impl Into<String>, meta: TemplateMetadata) -> Self {
        Self::next_of(name, 1, content, meta)
    }

    /// Create a successor version (caller supplies the allocated number).
    pub fn next_of(
        name: impl Into<String>,
        version: u32,
        content: impl Into<String>,
        meta: TemplateMetadata,
    ) -> Self {
        Self {
            id: TemplateVersionId::new(),
            name: name.into(),
            version,
            content: content.into(),
            engine: meta.engine,
            category: meta.category,
            variables: meta.variables,
            status: TemplateStatus::Draft,
            is_latest: true,
            usage_count: 0,
            success_rate: 0.0,
            avg_rating: 0.0,
            avg_quality: 0.0,
            effectiveness: 0.0,
            last_used: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Names of all required variables.
    pub fn required_variables(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| v.required)
            .map(|v| v.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        assert!(TemplateStatus::Draft.can_advance_to(TemplateStatus::Testing));
        assert!(TemplateStatus::Testing.can_advance_to(TemplateStatus::Active));
        assert!(TemplateStatus::Active.can_advance_to(TemplateStatus::Deprecated));
        assert!(TemplateStatus::Deprecated.can_advance_to(TemplateStatus::Archived));

        // Backward and skipped steps are illegal
        assert!(!TemplateStatus::Active.can_advance_to(TemplateStatus::Testing));
        assert!(!TemplateStatus::Draft.can_advance_to(TemplateStatus::Active));
        assert!(!TemplateStatus::Archived.can_advance_to(TemplateStatus::Draft));
    }

    #[test]
    fn test_first_version_defaults() {
        let v = TemplateVersion::first("greet", "Hello {{name}}", TemplateMetadata::default());
        assert_eq!(v.version, 1);
        assert!(v.is_latest);
        assert_eq!(v.status, TemplateStatus::Draft);
        assert_eq!(v.usage_count, 0);
    }

    #[test]
    fn test_required_variables() {
        let meta = TemplateMetadata {
            engine: "simple".into(),
            category: "test".into(),
            variables: vec![
                VariableSpec::required("name", "Name"),
                VariableSpec::optional("tone", "Tone", "neutral"),
            ],
        };
        let v = TemplateVersion::first("greet", "Hi {{name}}, be {{tone}}", meta);
        assert_eq!(v.required_variables(), vec!["name"]);
    }
}
