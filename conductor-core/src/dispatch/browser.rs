//! Browser automation seam
//!
//! `BROWSER_ACTION` payloads are decoded here and handed to whatever
//! [`BrowserAutomation`] the host wires in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AutomationError;

/// One browser action, encoded as `{type, data}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum BrowserAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Screenshot {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        full_page: bool,
    },
}

impl BrowserAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Screenshot { .. } => "screenshot",
        }
    }
}

/// Executes browser actions
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn execute(&self, action: BrowserAction) -> Result<Value, AutomationError>;
}

/// Stand-in used when no browser is configured; every action fails
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredBrowser;

#[async_trait]
impl BrowserAutomation for UnconfiguredBrowser {
    async fn execute(&self, action: BrowserAction) -> Result<Value, AutomationError> {
        Err(AutomationError(format!(
            "no browser configured for '{}'",
            action.name()
        )))
    }
}
