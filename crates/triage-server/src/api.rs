//! Route handlers.

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use triage_engine::{
    Actor, ActorRole, CloseRequest, CreateTaskRequest, IntentType, ManualLogEntry, Severity,
    SweepOutcome, TaskChanges, TaskFilter, TaskStatus, TriageError, TriageTask, TriageTaskLog,
    VerifyReport,
};

use crate::error::ApiError;
use crate::AppState;

type ApiResult<T> = Result<T, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn actor(id: Option<String>, role: Option<ActorRole>) -> ApiResult<Actor> {
    let id = id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| TriageError::validation("actorId is required"))?;
    let role = role.ok_or_else(|| TriageError::validation("actorRole is required"))?;
    Ok(Actor::new(id, role))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/triage/tasks", post(create_handler).get(list_handler))
        .route("/triage/tasks/mark-overdue", post(mark_overdue_handler))
        .route("/triage/tasks/:id", get(get_handler).patch(update_handler))
        .route("/triage/tasks/:id/close", post(close_handler))
        .route("/triage/tasks/:id/appointment", post(appointment_handler))
        .route(
            "/triage/tasks/:id/logs",
            get(logs_handler).post(append_log_handler),
        )
        .route("/triage/tasks/:id/verify", get(verify_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
    pub severity: Option<Severity>,
    pub intent_type: Option<IntentType>,
    pub patient_id: Option<String>,
    pub overdue: Option<bool>,
}

impl From<ListQuery> for TaskFilter {
    fn from(query: ListQuery) -> Self {
        TaskFilter {
            status: query.status,
            severity: query.severity,
            intent_type: query.intent_type,
            patient_id: query.patient_id,
            overdue: query.overdue,
            active_only: false,
        }
    }
}

/// PATCH body: the changes plus who is making them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    #[serde(flatten)]
    pub changes: TaskChanges,
    pub actor_id: Option<String>,
    pub actor_role: Option<ActorRole>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub appointment_id: Option<String>,
    pub actor_id: Option<String>,
    pub actor_role: Option<ActorRole>,
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": state.service.now().to_rfc3339(),
    }))
}

async fn create_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let task = state.service.create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_handler(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<TriageTask>>> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.service.list(&query.into())?))
}

async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TriageTask>> {
    Ok(Json(state.service.get(&id)?))
}

async fn update_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateRequest>, JsonRejection>,
) -> ApiResult<Json<TriageTask>> {
    let request = body(payload)?;
    let actor = actor(request.actor_id, request.actor_role)?;
    Ok(Json(state.service.update(&id, request.changes, actor).await?))
}

async fn close_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CloseRequest>, JsonRejection>,
) -> ApiResult<Json<TriageTask>> {
    Ok(Json(state.service.close(&id, body(payload)?).await?))
}

async fn appointment_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AppointmentRequest>, JsonRejection>,
) -> ApiResult<Json<TriageTask>> {
    let request = body(payload)?;
    let actor = actor(request.actor_id, request.actor_role)?;
    let appointment_id = request.appointment_id.unwrap_or_default();
    Ok(Json(
        state
            .service
            .record_appointment_booked(&id, &appointment_id, actor)
            .await?,
    ))
}

async fn logs_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TriageTaskLog>>> {
    Ok(Json(state.service.logs(&id)?))
}

async fn append_log_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ManualLogEntry>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let entry = state.service.append_log(&id, body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn verify_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VerifyReport>> {
    Ok(Json(state.service.verify(&id)?))
}

async fn mark_overdue_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let response = match state.sweep.run_once().await? {
        SweepOutcome::Completed(summary) => json!({
            "count": summary.count,
            "taskIds": summary.task_ids,
            "tasks": summary.tasks,
            "skipped": false,
        }),
        SweepOutcome::Skipped => json!({
            "count": 0,
            "taskIds": [],
            "tasks": [],
            "skipped": true,
        }),
    };
    Ok(Json(response))
}
