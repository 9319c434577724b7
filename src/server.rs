use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::AppError;
use crate::knowledge::{self, KnowledgeBase, SearchRequest};
use crate::rag::{AnswerGenerator, QaRequest};
use crate::search::SearchFilters;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;
const DEFAULT_CATEGORY_PAPERS: u32 = 50;
const DEFAULT_CATEGORY_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub knowledge: Arc<KnowledgeBase>,
    pub qa: Arc<AnswerGenerator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/search", get(search_get).post(search_post))
        .route("/api/search/suggestions", get(search_suggestions))
        .route("/api/search/trending", get(trending))
        .route("/api/search/categories", get(categories))
        .route("/api/paper/{id}", get(paper_detail))
        .route("/api/paper/{id}/abstract", get(paper_abstract))
        .route("/api/paper/{id}/download", get(paper_download))
        .route("/api/qa", post(ask))
        .route("/api/qa/suggestions", get(qa_suggestions))
        .route("/api/knowledge/stats", get(knowledge_stats))
        .route("/api/knowledge/update", post(knowledge_update))
        .route("/api/knowledge/sync", post(knowledge_sync))
        .route("/api/knowledge/search", post(knowledge_search))
        .route("/api/knowledge/trending", get(trending))
        .route("/api/knowledge/categories", get(categories))
        .route("/api/knowledge/paper/{id}", get(knowledge_paper))
        .route("/api/knowledge/categories/{category}/papers", get(category_papers))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "search": "/api/search",
            "paper": "/api/paper/{id}",
            "qa": "/api/qa",
            "knowledge": "/api/knowledge/stats",
            "health": "/api/health",
        },
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now(),
    }))
}

// --- search ---

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default, alias = "query")]
    q: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    category: Option<String>,
    year_from: Option<i32>,
    year_to: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    limit: Option<usize>,
    offset: Option<usize>,
    category: Option<String>,
    year_from: Option<i32>,
    year_to: Option<i32>,
}

/// Comma-separated category list; blank entries are dropped.
fn split_categories(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn search_request(
    query: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    filters: SearchFilters,
) -> Result<SearchRequest, AppError> {
    let query = query.unwrap_or_default();
    if query.trim().is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }
    let mut request = SearchRequest::new(query, limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT));
    request.offset = offset.unwrap_or(0);
    request.filters = filters;
    Ok(request)
}

async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, AppError> {
    let filters = SearchFilters {
        categories: split_categories(params.category.as_deref()),
        year_from: params.year_from,
        year_to: params.year_to,
    };
    let request = search_request(params.q, params.limit, params.offset, filters)?;
    let outcome = state.knowledge.search(&request, false).await?;
    Ok(Json(outcome).into_response())
}

async fn search_post(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Response, AppError> {
    let filters = SearchFilters {
        categories: split_categories(body.category.as_deref()),
        year_from: body.year_from,
        year_to: body.year_to,
    };
    let request = search_request(Some(body.query), body.limit, body.offset, filters)?;
    let outcome = state.knowledge.search(&request, false).await?;
    Ok(Json(outcome).into_response())
}

#[derive(Debug, Deserialize)]
struct SuggestionParams {
    #[serde(default)]
    q: String,
}

async fn search_suggestions(Query(params): Query<SuggestionParams>) -> Result<Json<Value>, AppError> {
    if params.q.trim().is_empty() {
        return Err(AppError::bad_request("q must not be empty"));
    }
    Ok(Json(json!({ "suggestions": knowledge::search_suggestions(&params.q) })))
}

async fn trending(State(state): State<AppState>) -> Json<Value> {
    let papers = state.knowledge.trending().await;
    Json(json!({ "total": papers.len(), "trending_papers": papers }))
}

async fn categories(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "categories": state.knowledge.categories().await }))
}

// --- papers ---

async fn paper_detail(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, AppError> {
    let paper = state.knowledge.paper(&id).await?;
    Ok(Json(paper).into_response())
}

async fn paper_abstract(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let paper = state.knowledge.paper(&id).await?;
    Ok(Json(json!({ "id": id, "abstract": paper.abstract_text })))
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "pdf".to_string()
}

async fn paper_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> Result<Redirect, AppError> {
    if !params.format.eq_ignore_ascii_case("pdf") {
        return Err(AppError::not_found(format!("{} download for {}", params.format, id)));
    }
    let paper = state.knowledge.paper(&id).await?;
    Ok(Redirect::temporary(&paper.best_url()))
}

// --- question answering ---

async fn ask(State(state): State<AppState>, Json(request): Json<QaRequest>) -> Result<Response, AppError> {
    let response = state.qa.answer(&request).await?;
    Ok(Json(response).into_response())
}

async fn qa_suggestions(Query(params): Query<SuggestionParams>) -> Result<Json<Value>, AppError> {
    if params.q.trim().is_empty() {
        return Err(AppError::bad_request("q must not be empty"));
    }
    Ok(Json(json!({ "suggestions": knowledge::question_suggestions(&params.q) })))
}

// --- knowledge base ---

async fn knowledge_stats(State(state): State<AppState>) -> Response {
    Json(state.knowledge.stats().await).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct UpdateBody {
    #[serde(default)]
    categories: Vec<String>,
}

async fn knowledge_update(
    State(state): State<AppState>,
    body: Option<Json<UpdateBody>>,
) -> (StatusCode, Json<Value>) {
    let categories = body.map(|Json(b)| b.categories).unwrap_or_default();
    let kb = state.knowledge.clone();
    let requested = categories.clone();
    tokio::spawn(async move {
        let chosen = (!requested.is_empty()).then_some(requested.as_slice());
        if let Err(e) = kb.update(chosen).await {
            tracing::error!("Background knowledge base update failed: {}", e);
        }
    });
    let categories = if categories.is_empty() {
        state.config.supported_categories.clone()
    } else {
        categories
    };
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "knowledge base update started", "categories": categories })),
    )
}

async fn knowledge_sync(
    State(state): State<AppState>,
    body: Option<Json<UpdateBody>>,
) -> Result<Json<Value>, AppError> {
    let categories = body.map(|Json(b)| b.categories).unwrap_or_default();
    let chosen = (!categories.is_empty()).then_some(categories.as_slice());
    let report = state.knowledge.update(chosen).await?;
    let stats = state.knowledge.stats().await;
    Ok(Json(json!({ "report": report, "stats": stats })))
}

#[derive(Debug, Deserialize)]
struct KnowledgeSearchBody {
    query: String,
    max_results: Option<usize>,
    #[serde(default)]
    categories: Vec<String>,
    year_from: Option<i32>,
    year_to: Option<i32>,
}

async fn knowledge_search(
    State(state): State<AppState>,
    Json(body): Json<KnowledgeSearchBody>,
) -> Result<Response, AppError> {
    let filters = SearchFilters {
        categories: body.categories,
        year_from: body.year_from,
        year_to: body.year_to,
    };
    let request = search_request(Some(body.query), body.max_results, None, filters)?;
    let outcome = state.knowledge.search(&request, true).await?;
    Ok(Json(outcome).into_response())
}

async fn knowledge_paper(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, AppError> {
    let paper = state.knowledge.paper(&id).await?;
    Ok(Json(json!({ "paper": paper })))
}

#[derive(Debug, Deserialize)]
struct CategoryParams {
    max_results: Option<u32>,
    days: Option<i64>,
}

async fn category_papers(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<CategoryParams>,
) -> Result<Json<Value>, AppError> {
    let papers = state
        .knowledge
        .papers_by_category(
            &category,
            params.max_results.unwrap_or(DEFAULT_CATEGORY_PAPERS),
            params.days.unwrap_or(DEFAULT_CATEGORY_DAYS),
        )
        .await?;
    Ok(Json(json!({ "category": category, "total": papers.len(), "papers": papers })))
}
