//! Agent-callable tools.
//!
//! Every service operation an agent might want is wrapped as a [`Tool`] and
//! held in a [`ToolRegistry`]. The HTTP server lists them at
//! `GET /tools/list` and dispatches `POST /tools/{name}` through
//! [`ToolRegistry::call`], which validates parameters against the tool's
//! JSON Schema before executing.
//!
//! Custom tools can be registered next to the built-ins:
//!
//! ```rust
//! use repo_rag::tools::ToolRegistry;
//!
//! let mut tools = ToolRegistry::with_builtins();
//! // tools.register(Box::new(MyTool));
//! assert!(tools.find("search").is_some());
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::models::Role;
use crate::service::{AppendRequest, IndexRequest, RagService, SearchFormat, SearchRequest, ServiceError};

/// A tool that agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name, used as `POST /tools/{name}`.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    fn is_builtin(&self) -> bool {
        false
    }

    /// JSON Schema (`type: "object"`) for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Run the tool with parameters already checked against the schema.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ServiceError>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    service: Arc<RagService>,
}

impl ToolContext {
    pub fn new(service: Arc<RagService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &RagService {
        &self.service
    }
}

/// Discovery entry returned by `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub builtin: bool,
    pub parameters: Value,
}

// ============ Built-in tools ============

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Semantic search over the indexed code and docs"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language query" },
                "limit": { "type": "integer", "description": "Number of unfiltered results" },
                "threshold": { "type": "number", "description": "Minimum similarity for relevant results" },
                "format": { "type": "string", "enum": ["text", "json"], "default": "json" },
                "session_id": { "type": "string", "description": "Fold recent turns of this session into the query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        let format = match params["format"].as_str() {
            Some(f) => f.parse::<SearchFormat>().map_err(ServiceError::invalid_input)?,
            None => SearchFormat::Json,
        };
        let req = SearchRequest {
            query: params["query"].as_str().unwrap_or("").to_string(),
            limit: non_negative(&params, "limit")?,
            threshold: params["threshold"].as_f64(),
            format,
            session_id: params["session_id"].as_str().map(str::to_string),
        };
        to_value(ctx.service().search(req).await?)
    }
}

pub struct IndexTool;

#[async_trait]
impl Tool for IndexTool {
    fn name(&self) -> &str {
        "index"
    }

    fn description(&self) -> &str {
        "Index the corpus, or a single file, and wait for the result"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "force": { "type": "boolean", "default": false },
                "file": { "type": "string", "description": "Index only this path" }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        let req = IndexRequest {
            force: params["force"].as_bool().unwrap_or(false),
            file: params["file"].as_str().map(Into::into),
        };
        to_value(ctx.service().index(req).await?)
    }
}

pub struct StatusTool;

#[async_trait]
impl Tool for StatusTool {
    fn name(&self) -> &str {
        "status"
    }

    fn description(&self) -> &str {
        "Document counts by type and language"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        to_value(ctx.service().status().await?)
    }
}

pub struct ProgressTool;

#[async_trait]
impl Tool for ProgressTool {
    fn name(&self) -> &str {
        "progress"
    }

    fn description(&self) -> &str {
        "Phase and counters of the current indexing pass"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        to_value(ctx.service().progress())
    }
}

pub struct ClearTool;

#[async_trait]
impl Tool for ClearTool {
    fn name(&self) -> &str {
        "clear"
    }

    fn description(&self) -> &str {
        "Delete every indexed document"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        to_value(ctx.service().clear().await?)
    }
}

pub struct SessionHistoryTool;

#[async_trait]
impl Tool for SessionHistoryTool {
    fn name(&self) -> &str {
        "session_history"
    }

    fn description(&self) -> &str {
        "Recent messages of a conversation session"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["session_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        let id = params["session_id"].as_str().unwrap_or("");
        let limit = non_negative(&params, "limit")?;
        to_value(ctx.service().session_history(id, limit).await?)
    }
}

pub struct SessionAppendTool;

#[async_trait]
impl Tool for SessionAppendTool {
    fn name(&self) -> &str {
        "session_append"
    }

    fn description(&self) -> &str {
        "Record a user or assistant message in a session"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string" },
                "role": { "type": "string", "enum": ["user", "assistant"] },
                "content": { "type": "string" },
                "sources": { "type": "array" }
            },
            "required": ["session_id", "role", "content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        let id = params["session_id"].as_str().unwrap_or("").to_string();
        let role: Role = params["role"]
            .as_str()
            .unwrap_or("")
            .parse()
            .map_err(ServiceError::invalid_input)?;
        let sources = match params.get("sources") {
            Some(v) if !v.is_null() => Some(
                serde_json::from_value(v.clone())
                    .map_err(|e| ServiceError::invalid_input(format!("sources: {e}")))?,
            ),
            _ => None,
        };
        let req = AppendRequest {
            role,
            content: params["content"].as_str().unwrap_or("").to_string(),
            sources,
        };
        to_value(ctx.service().session_append(&id, req).await?)
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, ServiceError> {
    serde_json::to_value(value).map_err(|e| ServiceError::new("internal", e.to_string()))
}

fn non_negative(params: &Value, key: &str) -> Result<Option<usize>, ServiceError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ServiceError::invalid_input(format!("{key} must be a non-negative integer"))),
    }
}

// ============ Parameter validation ============

/// Check `params` against a tool's schema and return the parameter object
/// with schema defaults filled in.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, ServiceError> {
    let provided = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(ServiceError::invalid_input(format!(
                "parameters must be an object, got {}",
                json_type_name(other)
            )))
        }
    };

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !provided.contains_key(field) {
                return Err(ServiceError::invalid_input(format!(
                    "missing required parameter: {field}"
                )));
            }
        }
    }

    let mut result = provided.clone();
    for (name, prop) in &properties {
        match provided.get(name) {
            Some(value) => {
                if let Some(expected) = prop.get("type").and_then(Value::as_str) {
                    let ok = match expected {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !ok {
                        return Err(ServiceError::invalid_input(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            name,
                            expected,
                            json_type_name(value)
                        )));
                    }
                }
                if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
                    if !allowed.contains(value) {
                        return Err(ServiceError::invalid_input(format!(
                            "parameter '{}' must be one of {}",
                            name,
                            Value::Array(allowed.clone())
                        )));
                    }
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    result.insert(name.clone(), default.clone());
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(IndexTool));
        registry.register(Box::new(StatusTool));
        registry.register(Box::new(ProgressTool));
        registry.register(Box::new(ClearTool));
        registry.register(Box::new(SessionHistoryTool));
        registry.register(Box::new(SessionAppendTool));
        registry
    }

    /// Register a tool. Lookups return the first tool with a given name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                builtin: t.is_builtin(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Look up, validate, and execute.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value, ServiceError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ServiceError::new("not_found", format!("no tool registered with name: {name}")))?;
        let params = validate_params(&tool.parameters_schema(), &params)?;
        tool.execute(params, ctx).await
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn validation_checks_required_types_and_enums() {
        let schema = SearchTool.parameters_schema();

        let err = validate_params(&schema, &json!({})).unwrap_err();
        assert_eq!(err.code, "invalid_input");
        assert!(err.message.contains("query"));

        let err = validate_params(&schema, &json!({ "query": 3 })).unwrap_err();
        assert!(err.message.contains("must be of type 'string'"));

        let err = validate_params(&schema, &json!({ "query": "q", "format": "xml" })).unwrap_err();
        assert!(err.message.contains("must be one of"));

        let ok = validate_params(&schema, &json!({ "query": "q" })).unwrap();
        assert_eq!(ok["format"], "json");
    }

    #[test]
    fn builtins_are_registered_once() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<String> = registry.infos().into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            vec!["search", "index", "status", "progress", "clear", "session_history", "session_append"]
        );
        assert!(registry.infos().iter().all(|i| i.builtin));
    }

    #[tokio::test]
    async fn dispatch_through_the_registry() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("corpus");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("NOTES.md"), "# Notes\n\nDeployment runbook.\n").unwrap();

        let mut config = Config::with_db_path(tmp.path().join("rag.sqlite"));
        config.corpus.root = root;
        config.embedding.provider = "hash".into();
        crate::config::validate(&mut config).unwrap();
        let ctx = ToolContext::new(Arc::new(RagService::open(config).await.unwrap()));
        let registry = ToolRegistry::with_builtins();

        let indexed = registry.call("index", json!({}), &ctx).await.unwrap();
        assert_eq!(indexed["indexed_count"], 1);

        let found = registry
            .call("search", json!({ "query": "runbook", "threshold": 0.0 }), &ctx)
            .await
            .unwrap();
        assert_eq!(found["count"], 1);
        assert_eq!(found["results"][0]["file_path"], "NOTES.md");

        let status = registry.call("status", Value::Null, &ctx).await.unwrap();
        assert_eq!(status["total"], 1);

        let missing = registry.call("nope", json!({}), &ctx).await.unwrap_err();
        assert_eq!(missing.code, "not_found");
    }
}
