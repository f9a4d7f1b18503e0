//! HTTP server implementation using Axum.

use crate::content::{Course, Exercise, Lesson};
use crate::duration;
use crate::outcome::ApiResult;
use crate::sandbox::ExecutionContext;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// Request types
#[derive(Deserialize)]
struct ExecuteCodeRequest {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
struct CheckExerciseRequest {
    #[serde(default)]
    course_id: Option<String>,
    // exercise IDs arrive as strings or numbers, same as in the content files
    #[serde(default)]
    exercise_id: Option<serde_json::Value>,
    #[serde(default)]
    code: Option<String>,
}

type JsonError = (StatusCode, Json<serde_json::Value>);

fn not_found(message: String) -> JsonError {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": message })),
    )
}

/// Build the application router. Split out from [`run_server`] so tests
/// can drive it without binding a socket.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/courses", get(list_courses))
        .route("/api/courses/:course_id/lessons", get(course_lessons))
        .route("/api/courses/:course_id/exercises", get(course_exercises))
        .route("/api/execute-code", post(execute_code))
        .route("/api/check-exercise", post(check_exercise))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "OK"
}

async fn list_courses(State(state): State<AppState>) -> Json<Vec<Course>> {
    let courses = state
        .store
        .courses()
        .iter()
        .map(|course| {
            let lessons = state.store.lessons(course);
            let exercises = state.store.exercises(course);
            let mut course = course.clone();
            course.duration = Some(duration::estimate(&course, &lessons, &exercises));
            course
        })
        .collect();
    Json(courses)
}

async fn course_lessons(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Lesson>>, JsonError> {
    let course = state
        .store
        .course(&course_id)
        .ok_or_else(|| not_found(format!("The course '{}' was not found.", course_id)))?;
    Ok(Json(state.store.lessons(course)))
}

async fn course_exercises(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<Vec<Exercise>>, JsonError> {
    let course = state
        .store
        .course(&course_id)
        .ok_or_else(|| not_found(format!("The course '{}' was not found.", course_id)))?;
    Ok(Json(state.store.exercises(course)))
}

/// Ungraded execution: run the submitted fragment and return the
/// normalized outcome.
async fn execute_code(
    State(state): State<AppState>,
    Json(req): Json<ExecuteCodeRequest>,
) -> (StatusCode, Json<ApiResult>) {
    info!("POST /api/execute-code");
    let Some(code) = req.code else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResult::rejected("Invalid payload or missing 'code' field.")),
        );
    };

    match state
        .checker
        .sandbox()
        .run(&code, ExecutionContext::new())
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome.into())),
        Err(e) => {
            error!(%e, "execute-code failed on the host side");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResult::rejected(format!("Internal server error: {}", e))),
            )
        }
    }
}

/// Graded execution: resolve the exercise's test fragment and grade the
/// submission against it.
async fn check_exercise(
    State(state): State<AppState>,
    Json(req): Json<CheckExerciseRequest>,
) -> (StatusCode, Json<ApiResult>) {
    info!("POST /api/check-exercise");
    let (Some(course_id), Some(exercise_id), Some(code)) =
        (req.course_id, req.exercise_id, req.code)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResult::rejected("Invalid payload.")),
        );
    };
    let exercise_id = match exercise_id {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResult::rejected("Invalid payload.")),
            );
        }
    };

    let Some(exercise) = state.store.exercise(&course_id, &exercise_id) else {
        let details = if state.store.course(&course_id).is_none() {
            format!("The course '{}' was not found.", course_id)
        } else {
            format!("Exercise '{}' not found.", exercise_id)
        };
        return (StatusCode::NOT_FOUND, Json(ApiResult::rejected(details)));
    };

    match state
        .checker
        .check(&code, exercise.test_code.as_deref())
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome.into())),
        Err(e) => {
            error!(%e, "check-exercise failed on the host side");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResult::rejected(format!("Internal server error: {}", e))),
            )
        }
    }
}
