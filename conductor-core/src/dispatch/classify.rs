//! Task-type classification table

use crate::agent::{CapabilitySet, capability_set};

/// Kinds of agent task a client can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    CodeReview,
    BugFix,
    FeatureImplementation,
    General,
}

impl TaskType {
    /// Classify a wire task type; anything unrecognized is `General`
    pub fn classify(name: Option<&str>) -> Self {
        match name {
            Some("CODE_REVIEW") => Self::CodeReview,
            Some("BUG_FIX") => Self::BugFix,
            Some("FEATURE_IMPLEMENTATION") => Self::FeatureImplementation,
            _ => Self::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeReview => "CODE_REVIEW",
            Self::BugFix => "BUG_FIX",
            Self::FeatureImplementation => "FEATURE_IMPLEMENTATION",
            Self::General => "GENERAL",
        }
    }

    /// Capabilities an agent needs for this kind of task
    pub fn capabilities(&self) -> CapabilitySet {
        match self {
            Self::CodeReview => capability_set(["code-analysis", "review"]),
            Self::BugFix => capability_set(["debugging", "code-modification"]),
            Self::FeatureImplementation => capability_set(["code-generation", "testing"]),
            Self::General => capability_set(["general"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_types_map_to_their_capabilities() {
        assert_eq!(
            TaskType::classify(Some("CODE_REVIEW")).capabilities(),
            capability_set(["code-analysis", "review"])
        );
        assert_eq!(
            TaskType::classify(Some("BUG_FIX")).capabilities(),
            capability_set(["debugging", "code-modification"])
        );
        assert_eq!(
            TaskType::classify(Some("FEATURE_IMPLEMENTATION")).capabilities(),
            capability_set(["code-generation", "testing"])
        );
    }

    #[test]
    fn unknown_or_missing_type_falls_back_to_general() {
        assert_eq!(TaskType::classify(Some("REFACTOR")), TaskType::General);
        assert_eq!(TaskType::classify(None), TaskType::General);
        assert_eq!(
            TaskType::General.capabilities(),
            capability_set(["general"])
        );
    }
}
