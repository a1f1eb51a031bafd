use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use syllabus_core::prompt::{assemble, PromptOptions, Role, Turn};
use syllabus_core::{RetrievalConfig, RetrievalEngine, RetrievalPath};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Upper bound on `k` accepted over HTTP.
const MAX_K: usize = 100;

/// Everything the router needs at startup.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub corpus: PathBuf,
    pub retrieval: RetrievalConfig,
    pub system_instruction: String,
    pub prompt: PromptOptions,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub k: Option<usize>,
}

#[derive(Deserialize)]
pub struct PromptParams {
    pub new_input: Option<String>,
    /// JSON array of `[role, text]` pairs.
    pub history: Option<String>,
    pub k: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub strategy: &'static str,
    pub path: RetrievalPath,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub score: Option<f32>,
    pub title: String,
    pub instructor: String,
    pub period: String,
}

#[derive(Clone)]
pub struct AppState {
    /// `None` when the corpus could not be loaded; prompts are then built without context.
    pub engine: Option<Arc<RetrievalEngine>>,
    pub system_instruction: Arc<str>,
    pub prompt: PromptOptions,
    pub default_k: usize,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "request failed");
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: "internal error".into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub fn build_app(config: ServerConfig) -> Result<Router> {
    let engine = RetrievalEngine::open(&config.corpus, &config.retrieval).map(Arc::new);
    let state = AppState {
        engine,
        system_instruction: config.system_instruction.into(),
        prompt: config.prompt,
        default_k: config.retrieval.k,
    };
    Ok(build_router(state))
}

pub fn build_router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/search", get(search_handler))
        .route("/prompt", get(prompt_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let num_docs = state.engine.as_ref().map(|e| e.corpus().len()).unwrap_or(0);
    Json(serde_json::json!({
        "status": "ok",
        "retrieval": state.engine.is_some(),
        "num_docs": num_docs,
    }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let k = params.k.unwrap_or(state.default_k).min(MAX_K);

    let Some(engine) = state.engine.clone() else {
        let elapsed = start.elapsed();
        return Ok(Json(SearchResponse {
            query: params.q,
            took_s: elapsed.as_secs_f64(),
            strategy: "disabled",
            path: RetrievalPath::Similarity,
            total_hits: 0,
            results: vec![],
        }));
    };

    let strategy = engine.index().strategy().label();
    let query = params.q.clone();
    // Scoring may load the embedding model on first use; keep it off the async workers.
    let (path, results) = tokio::task::spawn_blocking(move || {
        let outcome = engine.retrieve_scored(&query, k);
        let results: Vec<SearchHit> = outcome
            .hits
            .iter()
            .map(|hit| SearchHit {
                doc_id: hit.doc_id,
                score: hit.score,
                title: hit.document.title().to_string(),
                instructor: hit.document.instructor().to_string(),
                period: hit.document.period().to_string(),
            })
            .collect();
        (outcome.path, results)
    })
    .await
    .map_err(ApiError::internal)?;

    let elapsed = start.elapsed();
    tracing::debug!(query = %params.q, hits = results.len(), took_s = elapsed.as_secs_f64(), "search");
    Ok(Json(SearchResponse {
        query: params.q,
        took_s: elapsed.as_secs_f64(),
        strategy,
        path,
        total_hits: results.len(),
        results,
    }))
}

pub async fn prompt_handler(State(state): State<AppState>, Query(params): Query<PromptParams>) -> Result<Response, ApiError> {
    let new_input = params
        .new_input
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing new_input"))?;
    let history = match params.history.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_history(raw)?,
        _ => Vec::new(),
    };
    let k = params.k.unwrap_or(state.default_k).min(MAX_K);

    let prompt = tokio::task::spawn_blocking(move || match state.engine.as_ref() {
        Some(engine) => {
            let docs = engine.retrieve(&new_input, k);
            assemble(&state.system_instruction, &history, &new_input, &docs, &state.prompt)
        }
        None => assemble(&state.system_instruction, &history, &new_input, &[], &state.prompt),
    })
    .await
    .map_err(ApiError::internal)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], prompt).into_response())
}

/// Parse `[["user", "..."], ["assistant", "..."]]` into turns.
fn parse_history(raw: &str) -> Result<Vec<Turn>, ApiError> {
    let pairs: Vec<(String, String)> =
        serde_json::from_str(raw).map_err(|e| ApiError::bad_request(format!("invalid history: {e}")))?;
    pairs
        .into_iter()
        .map(|(role, text)| {
            let role: Role = role.parse().map_err(|e: String| ApiError::bad_request(format!("invalid history: {e}")))?;
            Ok(Turn { role, text })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_pairs_are_parsed_in_order() {
        let turns = parse_history(r#"[["user","学科: 情報学部"],["assistant","学年は？"]]"#).unwrap();
        assert_eq!(turns, vec![Turn::user("学科: 情報学部"), Turn::assistant("学年は？")]);
    }

    #[test]
    fn malformed_history_is_rejected() {
        assert!(parse_history(r#"{"role":"user"}"#).is_err());
        assert!(parse_history(r#"[["system","x"]]"#).is_err());
        assert!(parse_history(r#"[["user"]]"#).is_err());
    }
}
