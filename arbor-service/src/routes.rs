use crate::error::AppError;
use crate::state::SharedState;
use arbor_core::search::SearchHit;
use arbor_core::{
    answer_question, select_context, Action, Answer, Caller, NodeKind, RetryPolicy, Snapshot,
    SummaryCache, Task, TreeNode,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

fn caller(passphrase: Option<String>) -> Caller {
    Caller { passphrase }
}

async fn load_snapshot(state: &SharedState, snapshot_id: &str) -> Result<Snapshot, AppError> {
    let id = snapshot_id.to_string();
    state
        .with_index(move |index| index.get_snapshot(&id))
        .await?
        .ok_or_else(|| AppError::not_found(&format!("snapshot {}", snapshot_id)))
}

// POST /analyze
#[derive(Deserialize)]
pub struct AnalyzeRequest {
    pub origin: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub task_id: String,
    pub snapshot_id: String,
    pub status: String,
}

pub async fn analyze(
    State(state): State<SharedState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), AppError> {
    let task = state
        .runner
        .submit(&req.origin, caller(req.passphrase))
        .await?;
    info!(task_id = %task.id, origin = %task.origin, "POST /analyze");
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            task_id: task.id,
            snapshot_id: task.snapshot_id,
            status: task.status.as_str().to_string(),
        }),
    ))
}

// GET /status/{task_id}
pub async fn task_status(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, AppError> {
    let id = task_id.clone();
    let task = state
        .with_index(move |index| index.get_task(&id))
        .await?
        .ok_or_else(|| AppError::not_found(&format!("task {}", task_id)))?;
    Ok(Json(task))
}

// POST /tasks/{task_id}/cancel
#[derive(Serialize)]
pub struct CancelResponse {
    pub task_id: String,
    pub cancelled: bool,
}

pub async fn cancel_task(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let runner = Arc::clone(&state.runner);
    let id = task_id.clone();
    let cancelled = tokio::task::spawn_blocking(move || runner.cancel(&id))
        .await
        .map_err(|err| AppError::internal(format!("cancel failed: {err}")))??;
    Ok(Json(CancelResponse { task_id, cancelled }))
}

// GET /snapshots
pub async fn list_snapshots(
    State(state): State<SharedState>,
) -> Result<Json<Vec<Snapshot>>, AppError> {
    let snapshots = state.with_index(|index| index.list_snapshots()).await?;
    Ok(Json(snapshots))
}

// GET /tree/{snapshot_id}
pub async fn tree(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<String>,
) -> Result<Json<TreeNode>, AppError> {
    let id = snapshot_id.clone();
    let tree = state
        .with_index(move |index| index.tree(&id))
        .await?
        .ok_or_else(|| AppError::not_found(&format!("snapshot {}", snapshot_id)))?;
    Ok(Json(tree))
}

// GET /snapshots/{snapshot_id}/nodes
#[derive(Deserialize)]
pub struct NodesQuery {
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Serialize)]
pub struct NodeEntry {
    pub path: String,
    pub name: String,
    pub kind: NodeKind,
    pub has_summary: bool,
}

pub async fn list_nodes(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<String>,
    Query(params): Query<NodesQuery>,
) -> Result<Json<Vec<NodeEntry>>, AppError> {
    load_snapshot(&state, &snapshot_id).await?;
    let filter = params.filter.filter(|f| !f.trim().is_empty());
    let nodes = state
        .with_index(move |index| {
            index.list_filtered(&snapshot_id, params.parent.as_deref(), filter.as_deref())
        })
        .await?;
    Ok(Json(
        nodes
            .into_iter()
            .map(|node| NodeEntry {
                name: node.name().to_string(),
                has_summary: node.summary.is_some(),
                kind: node.kind,
                path: node.path,
            })
            .collect(),
    ))
}

// GET /snapshots/{snapshot_id}/node?path=
#[derive(Deserialize)]
pub struct NodeQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Serialize)]
pub struct NodeResponse {
    pub snapshot_id: String,
    pub path: String,
    pub kind: NodeKind,
    pub summary: Option<String>,
}

pub async fn get_node(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<String>,
    Query(params): Query<NodeQuery>,
) -> Result<Json<NodeResponse>, AppError> {
    let snapshot = load_snapshot(&state, &snapshot_id).await?;
    let cache = SummaryCache::for_snapshot(&snapshot, &state.config().storage.sidecar_extension);
    let path = params.path.trim_matches('/').to_string();

    let response = state
        .with_index(move |index| {
            let Some(node) = index.get_node(&snapshot_id, &path)? else {
                return Ok(None);
            };
            let summary = index.resolve_summary(&snapshot_id, &path, node.kind, &cache)?;
            Ok(Some(NodeResponse {
                snapshot_id,
                path,
                kind: node.kind,
                summary,
            }))
        })
        .await?
        .ok_or_else(|| AppError::not_found(&format!("node {:?}", params.path)))?;
    Ok(Json(response))
}

// POST /snapshots/{snapshot_id}/rebuild
#[derive(Serialize)]
pub struct RebuildResponse {
    pub snapshot_id: String,
    pub restored: usize,
}

pub async fn rebuild(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<String>,
) -> Result<Json<RebuildResponse>, AppError> {
    let ignore = state.config().ignore.clone();
    let ext = state.config().storage.sidecar_extension.clone();
    let id = snapshot_id.clone();
    let restored = state
        .with_index(move |index| index.rebuild_snapshot(&id, &ignore, &ext))
        .await?;
    info!(snapshot_id = %snapshot_id, restored, "POST /rebuild");
    Ok(Json(RebuildResponse {
        snapshot_id,
        restored,
    }))
}

// GET /search?q=&snapshot_id=&limit=
#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
}

pub async fn search(
    State(state): State<SharedState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let start = Instant::now();
    let query = params.q.trim().to_string();
    if query.is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }

    let scorer = state.scorer.clone();
    let config = state.config().search.clone();
    let q = query.clone();
    let results = state
        .with_index(move |index| {
            arbor_core::search(
                index,
                scorer.as_ref(),
                &q,
                params.snapshot_id.as_deref(),
                params.limit,
                &config,
            )
        })
        .await?;

    info!(
        query = %query,
        hits = results.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "GET /search"
    );
    Ok(Json(SearchResponse { query, results }))
}

// POST /qa
#[derive(Deserialize)]
pub struct QaRequest {
    pub snapshot_id: String,
    pub question: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

pub async fn qa(
    State(state): State<SharedState>,
    Json(req): Json<QaRequest>,
) -> Result<Json<Answer>, AppError> {
    let start = Instant::now();
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }
    let caller = caller(req.passphrase);
    let snapshot = load_snapshot(&state, &req.snapshot_id).await?;

    let access = Arc::clone(state.runner.access());
    let (check, who, id) = (Arc::clone(&access), caller.clone(), snapshot.id.clone());
    tokio::task::spawn_blocking(move || check.authorize(&who, Action::Ask, &id))
        .await
        .map_err(|err| AppError::internal(format!("access check failed: {err}")))??;

    let answered = answer_for(&state, &snapshot, &question).await;

    // Confirm the reserved question on success, hand it back otherwise.
    let succeeded = answered.is_ok();
    let id = snapshot.id.clone();
    let usage = tokio::task::spawn_blocking(move || {
        if succeeded {
            access.record_usage(&caller, Action::Ask, &id);
        } else {
            access.release(&caller, Action::Ask, &id);
        }
    });
    if let Err(err) = usage.await {
        warn!(error = %err, "failed to record question usage");
    }
    let answer = answered?;

    info!(
        snapshot_id = %snapshot.id,
        sources = answer.sources.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "POST /qa"
    );
    Ok(Json(answer))
}

async fn answer_for(
    state: &SharedState,
    snapshot: &Snapshot,
    question: &str,
) -> Result<Answer, AppError> {
    let cache = SummaryCache::for_snapshot(snapshot, &state.config().storage.sidecar_extension);
    let scorer = state.scorer.clone();
    let top_k = state.config().search.qa_top_k;
    let q = question.to_string();
    let snapshot_id = snapshot.id.clone();
    let context = state
        .with_index(move |index| {
            select_context(index, scorer.as_ref(), &snapshot_id, &cache, &q, top_k)
        })
        .await?;

    let retry = RetryPolicy::from_config(&state.config().summarizer);
    Ok(answer_question(state.runner.summarizer().as_ref(), &retry, &context, question).await?)
}

// GET /health
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub model: String,
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let summarizer = &state.config().summarizer;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.runner.summarizer().provider().to_string(),
        model: summarizer.model_name(),
    })
}
