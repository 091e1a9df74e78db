// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{auth, reports, teacher_tests, test_flow},
    state::AppState,
    utils::jwt::{auth_middleware, teacher_middleware},
};

/// Assembles the main application router.
///
/// * Everything lives under `/api/v1`.
/// * Applies global middleware (Trace, CORS).
/// * Student routes need a token; teacher routes also need the teacher role.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let authenticated = middleware::from_fn_with_state(state.clone(), auth_middleware);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let test_routes = Router::new()
        .route("/history", get(test_flow::history))
        .route("/first-test", post(test_flow::first_test))
        .route("/default-test", post(test_flow::default_test))
        .route("/status", get(test_flow::task_status))
        .route("/answers", post(test_flow::submit_answers))
        .route("/report", get(test_flow::passed_tests))
        .layer(authenticated.clone());

    let report_routes = Router::new()
        .merge(
            Router::new()
                .route("/", post(reports::create_report))
                .layer(authenticated.clone()),
        )
        .merge(
            Router::new()
                .route("/{id}", get(reports::get_report))
                .route("/by-discipline", get(reports::reports_by_discipline))
                .route("/disciplines", get(reports::disciplines))
                .route("/groups", get(reports::groups))
                .route("/stats", get(reports::cohort_stats))
                // Auth first, then the teacher check
                .layer(middleware::from_fn(teacher_middleware))
                .layer(authenticated.clone()),
        );

    let teacher_test_routes = Router::new()
        .merge(
            Router::new()
                .route("/random", get(teacher_tests::random_teacher_test))
                .layer(authenticated.clone()),
        )
        .merge(
            Router::new()
                .route(
                    "/",
                    get(teacher_tests::list_teacher_tests).post(teacher_tests::create_teacher_test),
                )
                .route(
                    "/{id}",
                    get(teacher_tests::get_teacher_test)
                        .put(teacher_tests::update_teacher_test)
                        .delete(teacher_tests::delete_teacher_test),
                )
                .layer(middleware::from_fn(teacher_middleware))
                .layer(authenticated),
        );

    Router::new()
        .nest("/api/v1", auth_routes)
        .nest("/api/v1/tests", test_routes)
        .nest("/api/v1/reports", report_routes)
        .nest("/api/v1/teacher-tests", teacher_test_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
