// src/handlers/reports.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError, handlers::test_flow::DisciplineQuery, services::reports::ReportService,
    utils::jwt::Claims,
};

#[derive(Debug, Deserialize)]
pub struct CreateReportQuery {
    pub discipline_id: i32,
    pub discipline_name: String,
}

#[derive(Debug, Deserialize)]
pub struct DisciplineNameQuery {
    pub discipline_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CohortQuery {
    pub discipline_name: String,
    pub group: String,
}

/// Creates or refreshes the caller's report for a discipline.
pub async fn create_report(
    State(reports): State<ReportService>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<CreateReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let report = reports
        .create_report(claims.sub, query.discipline_id, query.discipline_name)
        .await?;
    Ok(Json(json!({ "report": report })))
}

/// Teacher only.
pub async fn get_report(
    State(reports): State<ReportService>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let report = reports.report(id).await?;
    Ok(Json(json!({ "report": report })))
}

/// Teacher only.
pub async fn reports_by_discipline(
    State(reports): State<ReportService>,
    Query(query): Query<DisciplineQuery>,
) -> Result<impl IntoResponse, AppError> {
    let list = reports.reports_by_discipline(query.discipline_id).await?;
    Ok(Json(json!({ "reports": list })))
}

/// Teacher only.
pub async fn disciplines(
    State(reports): State<ReportService>,
) -> Result<impl IntoResponse, AppError> {
    let disciplines = reports.disciplines().await?;
    Ok(Json(json!({ "disciplines": disciplines })))
}

/// Teacher only.
pub async fn groups(
    State(reports): State<ReportService>,
    Query(query): Query<DisciplineNameQuery>,
) -> Result<impl IntoResponse, AppError> {
    let groups = reports.groups(&query.discipline_name).await?;
    Ok(Json(json!({ "groups": groups })))
}

/// Reports of a group with their aggregated scores. Teacher only.
pub async fn cohort_stats(
    State(reports): State<ReportService>,
    Query(query): Query<CohortQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (list, stats) = reports
        .cohort(&query.discipline_name, &query.group)
        .await?;
    Ok(Json(json!({ "reports": list, "stats": stats })))
}
