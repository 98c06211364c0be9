//! Tool-server method table
//!
//! `MCP_REQUEST` messages carry `{method, params}` and are answered by the
//! handler registered for `method`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{DispatchError, ToolError};

/// A tool-server request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Handler for one tool method
#[async_trait]
pub trait ToolMethod: Send + Sync {
    async fn call(&self, params: Value) -> Result<Value, ToolError>;
}

/// Method name to handler table
pub struct ToolRegistry {
    methods: RwLock<HashMap<String, Arc<dyn ToolMethod>>>,
}

impl ToolRegistry {
    /// Empty table
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Table with the `model.*` methods installed
    pub fn with_builtins() -> Self {
        let models = Arc::new(LoadedModels::default());
        let mut methods: HashMap<String, Arc<dyn ToolMethod>> = HashMap::new();
        methods.insert(
            "model.load".to_string(),
            Arc::new(ModelLoad(models)),
        );
        methods.insert("model.generate".to_string(), Arc::new(ModelGenerate));
        methods.insert("model.stream".to_string(), Arc::new(ModelStream));
        Self {
            methods: RwLock::new(methods),
        }
    }

    /// Install or replace a handler
    pub async fn register(&self, method: impl Into<String>, handler: Arc<dyn ToolMethod>) {
        let method = method.into();
        debug!(method = %method, "Tool method registered");
        self.methods.write().await.insert(method, handler);
    }

    pub async fn methods(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methods.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the handler for `request.method`
    pub async fn call(&self, request: ToolRequest) -> Result<Value, DispatchError> {
        let handler = self
            .methods
            .read()
            .await
            .get(&request.method)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownMethod(request.method.clone()))?;

        handler
            .call(request.params)
            .await
            .map_err(|source| DispatchError::Tool {
                method: request.method,
                source,
            })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Models loaded through `model.load`
#[derive(Default)]
struct LoadedModels(RwLock<BTreeSet<String>>);

struct ModelLoad(Arc<LoadedModels>);

#[async_trait]
impl ToolMethod for ModelLoad {
    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let model_id = params
            .get("modelId")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParams("modelId is required".to_string()))?;

        info!(model_id, "Loading model");
        let mut loaded = self.0.0.write().await;
        loaded.insert(model_id.to_string());
        Ok(json!({
            "loaded": true,
            "modelId": model_id,
            "models": loaded.iter().collect::<Vec<_>>(),
        }))
    }
}

struct ModelGenerate;

#[async_trait]
impl ToolMethod for ModelGenerate {
    async fn call(&self, params: Value) -> Result<Value, ToolError> {
        let mut reply = json!({
            "generated": true,
            "text": "Sample generated text",
        });
        if let Some(model_id) = params.get("modelId") {
            reply["modelId"] = model_id.clone();
        }
        Ok(reply)
    }
}

/// Streams finish immediately; there is no model behind them
struct ModelStream;

#[async_trait]
impl ToolMethod for ModelStream {
    async fn call(&self, _params: Value) -> Result<Value, ToolError> {
        Ok(json!({"done": true, "chunks": []}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolMethod for Echo {
        async fn call(&self, params: Value) -> Result<Value, ToolError> {
            Ok(params)
        }
    }

    fn request(method: &str, params: Value) -> ToolRequest {
        ToolRequest {
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn builtins_are_installed() {
        let tools = ToolRegistry::with_builtins();
        assert_eq!(
            tools.methods().await,
            vec!["model.generate", "model.load", "model.stream"]
        );
    }

    #[tokio::test]
    async fn unknown_method_names_the_method() {
        let tools = ToolRegistry::with_builtins();

        let err = tools.call(request("model.delete", Value::Null)).await.unwrap_err();

        assert_eq!(err.code(), "UnknownMethod");
        assert_eq!(err.to_string(), "Unknown method: model.delete");
    }

    #[tokio::test]
    async fn model_load_requires_model_id() {
        let tools = ToolRegistry::with_builtins();

        let err = tools.call(request("model.load", json!({}))).await.unwrap_err();
        assert_eq!(err.code(), "ToolFailure");

        let loaded = tools
            .call(request("model.load", json!({"modelId": "llama3"})))
            .await
            .unwrap();
        assert_eq!(loaded["models"], json!(["llama3"]));
    }

    #[tokio::test]
    async fn model_generate_and_stream_replies() {
        let tools = ToolRegistry::with_builtins();

        let generated = tools
            .call(request("model.generate", json!({"prompt": "hi"})))
            .await
            .unwrap();
        assert_eq!(generated["generated"], true);
        assert_eq!(generated["text"], "Sample generated text");

        let stream = tools.call(request("model.stream", Value::Null)).await.unwrap();
        assert_eq!(stream, json!({"done": true, "chunks": []}));
    }

    #[tokio::test]
    async fn empty_table_serves_only_registered_methods() {
        let tools = ToolRegistry::new();
        tools.register("echo", Arc::new(Echo)).await;

        let reply = tools.call(request("echo", json!({"x": 1}))).await.unwrap();

        assert_eq!(reply, json!({"x": 1}));
        assert!(tools.call(request("model.load", Value::Null)).await.is_err());
    }
}
