//! Task analysis seam
//!
//! Required capabilities are decided at creation time by a [`TaskAnalyzer`].
//! Production analyzers typically call out to a language model; that lives
//! outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{CapabilitySet, capability_set};
use crate::error::AnalyzerError;

/// What an analyzer learned about a task description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAnalysis {
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub steps: Vec<Value>,
}

impl TaskAnalysis {
    pub fn capabilities(&self) -> CapabilitySet {
        capability_set(self.required_capabilities.iter().cloned())
    }
}

/// Decides which capabilities a task needs
#[async_trait]
pub trait TaskAnalyzer: Send + Sync {
    async fn analyze(&self, description: &str) -> Result<TaskAnalysis, AnalyzerError>;
}

/// Analyzer that assigns the same capabilities to every task
#[derive(Debug, Clone)]
pub struct StaticAnalyzer {
    capabilities: Vec<String>,
}

impl StaticAnalyzer {
    pub fn new<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for StaticAnalyzer {
    /// Everything is `general` work
    fn default() -> Self {
        Self::new(["general"])
    }
}

#[async_trait]
impl TaskAnalyzer for StaticAnalyzer {
    async fn analyze(&self, _description: &str) -> Result<TaskAnalysis, AnalyzerError> {
        Ok(TaskAnalysis {
            required_capabilities: self.capabilities.clone(),
            details: Value::Null,
            steps: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_analyzer_defaults_to_general() {
        let analysis = StaticAnalyzer::default().analyze("anything").await.unwrap();
        assert_eq!(analysis.capabilities(), capability_set(["general"]));
        assert!(analysis.steps.is_empty());
    }

    #[test]
    fn analysis_parses_model_response_shape() {
        let json = serde_json::json!({
            "requiredCapabilities": ["browser", "browser", "files"],
            "details": {"summary": "scrape and save"},
            "steps": [{"name": "open"}, {"name": "save"}]
        });
        let analysis: TaskAnalysis = serde_json::from_value(json).unwrap();
        assert_eq!(analysis.capabilities().len(), 2);
        assert_eq!(analysis.steps.len(), 2);
    }
}
