//! JSON-RPC request handlers.

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use lingua_core::{CancellationToken, LanguagePair, LinguaError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Error response carrying the failing load stage, if any.
    pub fn from_error(id: Option<Value>, err: &LinguaError) -> Self {
        let mut response = Self::error(id, err.to_rpc_error_code(), err.to_string());
        if let (Some(error), LinguaError::LoadFailed { pair, stage, .. }) =
            (response.error.as_mut(), err)
        {
            error.data = Some(json!({ "pair": pair, "stage": stage.as_str() }));
        }
        response
    }
}

/// Extract an optional string parameter under its name or an alias.
fn get_str_param<'a>(params: &'a Value, name: &str, alias: &str) -> Option<&'a str> {
    params
        .get(name)
        .or_else(|| params.get(alias))
        .and_then(|v| v.as_str())
}

/// Extract a required string parameter or return an error.
fn require_str_param(params: &Value, name: &str, alias: &str) -> lingua_core::Result<String> {
    get_str_param(params, name, alias)
        .map(String::from)
        .ok_or_else(|| LinguaError::InvalidParams {
            message: format!("Missing required parameter: {}", name),
        })
}

/// Extract an optional bool parameter under its name or an alias.
fn get_bool_param(params: &Value, name: &str, alias: &str) -> Option<bool> {
    params
        .get(name)
        .or_else(|| params.get(alias))
        .and_then(|v| v.as_bool())
}

/// `from`/`to` (or `source`/`target`) of a request.
fn pair_params(params: &Value) -> lingua_core::Result<(String, String)> {
    Ok((
        require_str_param(params, "from", "source")?,
        require_str_param(params, "to", "target")?,
    ))
}

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    // Handle built-in methods
    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    match dispatch_method(&state, method, &params).await {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            // Cancellations are expected; front ends suppress them.
            if e.is_cancellation() {
                info!("RPC {} cancelled: {}", method, e);
            } else {
                error!("RPC error for {}: {}", method, e);
            }
            (StatusCode::OK, Json(JsonRpcResponse::from_error(id, &e)))
        }
    }
}

/// Dispatch a method call to its handler.
async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: &Value,
) -> lingua_core::Result<Value> {
    match method {
        // Registry
        "list_language_pairs" => list_language_pairs(state).await,
        "resolve_pair" => resolve_pair(state, params).await,
        "clear_registry_cache" => {
            state.api.clear_registry_cache().await;
            Ok(json!({"cleared": true}))
        }

        // Translation
        "translate" => translate(state, params).await,
        "load_translator" => load_translator(state, params).await,
        "get_load_progress" => get_load_progress(state, params),
        "cancel_translation" => cancel_translation(state, params).await,
        "unload_translator" => unload_translator(state, params).await,
        "remove_model_files" => remove_model_files(state, params).await,
        "list_loaded_translators" => Ok(json!({
            "pairs": state
                .api
                .loaded_pairs()
                .iter()
                .map(LanguagePair::key)
                .collect::<Vec<_>>(),
        })),

        // Unknown method
        _ => {
            warn!("Method not found: {}", method);
            Err(LinguaError::Other(format!("Method not found: {}", method)))
        }
    }
}

async fn list_language_pairs(state: &AppState) -> lingua_core::Result<Value> {
    let registry = state.api.language_pairs().await;
    let mut direct = Map::new();
    for source in registry.sources() {
        let targets: Vec<&String> = registry
            .targets(source)
            .map(|targets| targets.iter().collect())
            .unwrap_or_default();
        direct.insert(source.to_string(), json!(targets));
    }

    Ok(json!({
        "hubLanguage": state.api.hub_language(),
        "direct": direct,
        "pivot": state.api.pivot_targets().await,
    }))
}

async fn resolve_pair(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let info = state.api.resolve_pair(&from, &to).await;
    Ok(serde_json::to_value(info)?)
}

async fn translate(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let text = require_str_param(params, "text", "input")?;
    let html = get_bool_param(params, "html", "isHtml").unwrap_or(false);

    let translated = state
        .api
        .translate(&from, &to, &text, html, Some(state.progress.callback()))
        .await?;
    Ok(json!({ "text": translated }))
}

async fn load_translator(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let handle = state
        .api
        .load(
            &from,
            &to,
            &CancellationToken::new(),
            Some(state.progress.callback()),
        )
        .await?;
    Ok(json!({
        "pair": handle.pair().key(),
        "isPivot": handle.is_pivot(),
        "modelCount": handle.hops().len(),
    }))
}

fn get_load_progress(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let pair = LanguagePair::new(from, to);
    let loading = state.api.loader().is_loading(&pair);
    let loaded = state.api.loader().is_loaded(&pair);
    Ok(json!({
        "loading": loading,
        "loaded": loaded,
        "progress": state.progress.latest(&pair.key()),
    }))
}

async fn cancel_translation(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let cancelled = state.api.cancel(&from, &to).await;
    state.progress.forget(&LanguagePair::new(from, to).key());
    Ok(json!({ "cancelled": cancelled }))
}

async fn unload_translator(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let unloaded = state.api.unload(&from, &to).await;
    state.progress.forget(&LanguagePair::new(from, to).key());
    Ok(json!({ "unloaded": unloaded }))
}

async fn remove_model_files(state: &AppState, params: &Value) -> lingua_core::Result<Value> {
    let (from, to) = pair_params(params)?;
    let removed = state.api.remove_model_files(&from, &to).await?;
    state.progress.forget(&LanguagePair::new(from, to).key());
    let pairs: Vec<String> = removed.iter().map(LanguagePair::key).collect();
    Ok(json!({ "removed": !pairs.is_empty(), "pairs": pairs }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lingua_core::rpc::InProcessSpawner;
    use lingua_core::{
        FetchedBody, FileFetcher, LocalModel, ModelsJsonParser, RegistrySource, TranslateRequest,
        TranslateResponse, TranslationEngine,
    };
    use tempfile::TempDir;
    use url::Url;

    const BASE: &str = "https://models.test/";

    struct StaticRegistry;

    #[async_trait]
    impl RegistrySource for StaticRegistry {
        async fn fetch(&self) -> lingua_core::Result<Vec<u8>> {
            let entry = |tag: &str| {
                json!([{
                    "releaseStatus": "Release",
                    "files": {
                        "model": { "path": format!("{}/model.bin", tag) },
                        "vocab": { "path": format!("{}/vocab.spm", tag) },
                    }
                }])
            };
            Ok(serde_json::to_vec(&json!({
                "models": { "en-fr": entry("enfr"), "ja-en": entry("jaen") }
            }))?)
        }

        fn describe(&self) -> String {
            "static".to_string()
        }
    }

    struct AnyFile;

    #[async_trait]
    impl FileFetcher for AnyFile {
        async fn fetch(&self, url: &str) -> lingua_core::Result<FetchedBody> {
            Ok(FetchedBody::from_bytes(url.as_bytes().to_vec().into()))
        }
    }

    struct UpperEngine;

    #[async_trait]
    impl TranslationEngine for UpperEngine {
        async fn initialize(&mut self, _models: Vec<LocalModel>) -> lingua_core::Result<()> {
            Ok(())
        }

        async fn translate(
            &mut self,
            request: TranslateRequest,
        ) -> lingua_core::Result<TranslateResponse> {
            Ok(TranslateResponse::new(request.text.to_uppercase()))
        }
    }

    async fn state(temp: &TempDir) -> AppState {
        let api = lingua_core::LinguaApi::builder()
            .cache_dir(temp.path())
            .registry_source(Arc::new(StaticRegistry))
            .registry_parser(Arc::new(ModelsJsonParser::new(BASE).unwrap()))
            .file_fetcher(Arc::new(AnyFile))
            .worker_spawner(Arc::new(InProcessSpawner::new(|| Box::new(UpperEngine))))
            .build()
            .await
            .unwrap();
        AppState::new(api, Url::parse(BASE).unwrap()).unwrap()
    }

    #[test]
    fn test_json_rpc_response_success() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({"data": "test"}));
        assert!(response.error.is_none());
        assert!(response.result.is_some());
    }

    #[test]
    fn test_json_rpc_response_error() {
        let response = JsonRpcResponse::error(Some(json!(1)), -32600, "Test error".into());
        assert!(response.error.is_some());
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[test]
    fn test_cancellation_code() {
        let err = LinguaError::LoadAborted {
            pair: "en-fr".into(),
        };
        let response = JsonRpcResponse::from_error(None, &err);
        assert_eq!(response.error.unwrap().code, -32004);
    }

    #[test]
    fn test_pair_params_accept_aliases() {
        let (from, to) = pair_params(&json!({"source": "en", "target": "fr"})).unwrap();
        assert_eq!((from.as_str(), to.as_str()), ("en", "fr"));
        assert!(pair_params(&json!({"from": "en"})).is_err());
    }

    #[tokio::test]
    async fn test_translate_records_progress() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp).await;

        let result = dispatch_method(
            &state,
            "translate",
            &json!({"from": "en", "to": "fr", "text": "bonjour"}),
        )
        .await
        .unwrap();
        assert_eq!(result["text"], "BONJOUR");

        let progress = get_load_progress(&state, &json!({"from": "en", "to": "fr"})).unwrap();
        assert_eq!(progress["loaded"], true);
        assert_eq!(progress["loading"], false);
        assert_eq!(progress["progress"]["percent"], 100.0);
    }

    #[tokio::test]
    async fn test_list_and_resolve() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp).await;

        let pairs = dispatch_method(&state, "list_language_pairs", &json!({}))
            .await
            .unwrap();
        assert_eq!(pairs["hubLanguage"], "en");
        assert_eq!(pairs["direct"]["en"], json!(["fr"]));
        assert_eq!(pairs["pivot"]["ja"], json!(["fr"]));

        let info = dispatch_method(&state, "resolve_pair", &json!({"from": "ja", "to": "fr"}))
            .await
            .unwrap();
        assert_eq!(info["isPivot"], true);
        assert_eq!(info["pivotPath"], "ja → en → fr");
    }

    #[tokio::test]
    async fn test_load_failure_carries_stage() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp).await;

        let err = dispatch_method(
            &state,
            "load_translator",
            &json!({"from": "fr", "to": "ko"}),
        )
        .await
        .unwrap_err();
        let response = JsonRpcResponse::from_error(Some(json!(7)), &err);
        let error = response.error.unwrap();
        assert_eq!(error.code, -32002);
        assert_eq!(error.data.unwrap()["stage"], "resolve");
    }

    #[tokio::test]
    async fn test_unload_and_unknown_method() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp).await;

        dispatch_method(&state, "load_translator", &json!({"from": "en", "to": "fr"}))
            .await
            .unwrap();
        let loaded = dispatch_method(&state, "list_loaded_translators", &json!({}))
            .await
            .unwrap();
        assert_eq!(loaded["pairs"], json!(["en-fr"]));

        let unloaded = dispatch_method(&state, "unload_translator", &json!({"from": "en", "to": "fr"}))
            .await
            .unwrap();
        assert_eq!(unloaded["unloaded"], true);

        assert!(dispatch_method(&state, "no_such_method", &json!({}))
            .await
            .is_err());
    }
}
