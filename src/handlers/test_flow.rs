// src/handlers/test_flow.rs

use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::test_record::SubmitAnswersRequest,
    services::test_flow::TestService,
    utils::jwt::Claims,
};

#[derive(Debug, Deserialize)]
pub struct DisciplineQuery {
    pub discipline_id: i32,
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub task_id: Uuid,
}

/// Topics the generator should cover.
#[derive(Debug, Deserialize)]
pub struct ThemesRequest {
    #[serde(default)]
    pub themes: Vec<String>,
}

/// The caller's history for a discipline with the tests still to take.
pub async fn history(
    State(tests): State<TestService>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DisciplineQuery>,
) -> Result<impl IntoResponse, AppError> {
    let view = tests.history(claims.sub, query.discipline_id).await?;
    Ok(Json(json!({ "roadmap_history": view })))
}

/// Creates the diagnostic test synchronously and returns it.
pub async fn first_test(
    State(tests): State<TestService>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DisciplineQuery>,
    Json(body): Json<ThemesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let test = tests
        .create_first_test(claims.sub, query.discipline_id, body.themes)
        .await?;
    Ok(Json(test))
}

/// Queues generation of a regular test. Poll `/tests/status` with the task id.
pub async fn default_test(
    State(tests): State<TestService>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DisciplineQuery>,
    Json(body): Json<ThemesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let info = tests
        .create_default_test(claims.sub, query.discipline_id, body.themes)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "task_id": info.id }))))
}

pub async fn task_status(
    State(tests): State<TestService>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TaskQuery>,
) -> Result<impl IntoResponse, AppError> {
    let info = tests.task_status(claims.sub, query.task_id).await?;
    Ok(Json(info))
}

/// Scores submitted answers and returns the per-topic results.
pub async fn submit_answers(
    State(tests): State<TestService>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let sheet = tests
        .submit_answers(claims.sub, req.test_id, req.answers)
        .await?;
    Ok(Json(sheet))
}

/// Results of the caller's passed tests, as they would go into a report.
pub async fn passed_tests(
    State(tests): State<TestService>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<DisciplineQuery>,
) -> Result<impl IntoResponse, AppError> {
    let history = tests.passed_results(claims.sub, query.discipline_id).await?;
    Ok(Json(json!({ "history": history })))
}
