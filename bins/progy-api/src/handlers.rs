// HTTP route handlers for the local Progy server

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use progy_common::error::EngineError;
use progy_engine::content;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeQuery {
    pub path: Option<String>,
    pub markdown_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuizQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    #[serde(default)]
    pub success: bool,
    pub score: Option<u32>,
    pub total_questions: Option<u32>,
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::PathNotFound { .. }
        | EngineError::NoEntryFile { .. }
        | EngineError::UnknownExercise { .. } => StatusCode::NOT_FOUND,
        EngineError::Configuration(_) | EngineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(e: EngineError) -> Response {
    (engine_status(&e), Json(json!({ "success": false, "error": e.to_string() }))).into_response()
}

fn missing_path() -> Response {
    (StatusCode::BAD_REQUEST, "Missing path").into_response()
}

/// GET /exercises - Manifest of the current course
pub async fn list_exercises(State(state): State<Arc<AppState>>) -> Response {
    match state.ctx.manifest().await {
        Ok(manifest) => (StatusCode::OK, Json(manifest)).into_response(),
        Err(e) => {
            error!(error = %e, "Manifest scan failed");
            engine_error(e)
        }
    }
}

/// GET /exercises/code?path=&markdownPath=
pub async fn exercise_code(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CodeQuery>,
) -> Response {
    let Some(path) = query.path else {
        return missing_path();
    };

    match content::read_code(&state.ctx.resolver(), &path, query.markdown_path.as_deref()) {
        Ok(content) => (StatusCode::OK, Json(content)).into_response(),
        Err(e) => {
            warn!(path = %path, error = %e, "Could not read exercise code");
            engine_error(e)
        }
    }
}

/// GET /exercises/quiz?path=
pub async fn exercise_quiz(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QuizQuery>,
) -> Response {
    let Some(path) = query.path else {
        return missing_path();
    };

    match content::read_quiz(&state.ctx.resolver(), &path) {
        Ok(quiz) => (StatusCode::OK, Json(quiz)).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /exercises/run - Run an exercise and record the attempt
///
/// Background work (remote sync, tutor escalation) is detached; the
/// response never waits for it.
pub async fn run_exercise(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RunRequest>,
) -> Response {
    let started = Instant::now();

    match progy_engine::run_exercise(&state.ctx, &payload.id).await {
        Ok(run) => {
            let outcome = if run.outcome.report.success { "pass" } else { "fail" };
            metrics::record_run(outcome, started.elapsed().as_secs_f64());
            if run.escalation.is_some() {
                metrics::TUTOR_ESCALATIONS.inc();
            }

            info!(exercise_id = %payload.id, outcome, "Run finished");
            (StatusCode::OK, Json(run.outcome)).into_response()
        }
        Err(e) => {
            metrics::record_run("error", started.elapsed().as_secs_f64());
            warn!(exercise_id = %payload.id, error = %e, "Run aborted");
            engine_error(e)
        }
    }
}

/// GET /progress - Current progress. A failed load is an error, never an
/// empty document.
pub async fn get_progress(State(state): State<Arc<AppState>>) -> Response {
    match state.ctx.load_progress().await {
        Ok(progress) => (StatusCode::OK, Json(progress)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load progress");
            engine_error(e)
        }
    }
}

/// POST /progress/update - Record a quiz result
///
/// Only `type: "quiz"` changes anything; exercise progress is recorded by
/// runs, so other types just echo the current progress.
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ProgressUpdate>,
) -> impl IntoResponse {
    let Some(id) = payload.id.filter(|id| !id.is_empty()) else {
        return Json(json!({ "success": false, "error": "Missing ID" }));
    };

    if payload.kind.as_deref() == Some("quiz") {
        return match progy_engine::record_quiz(
            &state.ctx,
            &id,
            payload.success,
            payload.score,
            payload.total_questions,
        )
        .await
        {
            Ok(outcome) => Json(json!({
                "success": true,
                "xpAwarded": outcome.xp_awarded,
                "progress": outcome.progress,
            })),
            Err(e) => {
                error!(quiz_id = %id, error = %e, "Failed to record quiz");
                Json(json!({ "success": false, "error": e.to_string() }))
            }
        };
    }

    match state.ctx.load_progress().await {
        Ok(progress) => Json(json!({ "success": true, "progress": progress })),
        Err(e) => Json(json!({ "success": false, "error": e.to_string() })),
    }
}

/// GET /status - Health check with course summary
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ctx = &state.ctx;
    Json(json!({
        "status": "ok",
        "courseId": ctx.course.id,
        "courseName": ctx.course.name,
        "runner": ctx.course.runner.strategy.name(),
        "offline": ctx.settings.offline,
    }))
}

/// GET /metrics - Prometheus text format
pub async fn metrics_text() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use progy_engine::config::EngineSettings;
    use progy_engine::EngineContext;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn state() -> (TempDir, Arc<AppState>) {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "course.json",
            r#"{"id":"sh-course","name":"Shell","runner":{"command":"sh","args":["{{exercise}}"],"timeout_secs":5},"content":{"exercises":"content"}}"#,
        );
        write(
            dir.path(),
            "content/01_intro/01_hello/exercise.py",
            "printf '__SRP_BEGIN__{\"success\":true,\"summary\":\"ok\",\"raw\":\"Hi\"}__SRP_END__'\n",
        );
        write(dir.path(), "content/01_intro/01_hello/README.md", "# Hello");
        write(dir.path(), "content/01_intro/01_hello/quiz.json", r#"{"questions":[1]}"#);

        let ctx = EngineContext::from_settings(EngineSettings::for_workspace(dir.path())).unwrap();
        (dir, Arc::new(AppState { ctx }))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_run_returns_outcome() {
        let (_dir, state) = state();
        let response = run_exercise(
            State(state),
            Json(RunRequest {
                id: "01_intro/01_hello".to_string(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["output"], "Hi");
        assert!(body["friendlyOutput"].as_str().unwrap().contains("✅"));
        assert_eq!(body["progress"]["stats"]["totalXp"], 20);
        assert!(body["error"].is_null());
    }

    #[tokio::test]
    async fn test_run_unknown_exercise_is_not_found() {
        let (_dir, state) = state();
        let response = run_exercise(
            State(state),
            Json(RunRequest {
                id: "../../secret".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_code_and_quiz() {
        let (_dir, state) = state();

        let response = exercise_code(
            State(state.clone()),
            Query(CodeQuery {
                path: Some("content/01_intro/01_hello".to_string()),
                markdown_path: Some("content/01_intro/01_hello/README.md".to_string()),
            }),
        )
        .await;
        let body = body_json(response).await;
        assert!(body["code"].as_str().unwrap().contains("__SRP_BEGIN__"));
        assert_eq!(body["markdown"], "# Hello");

        let response = exercise_quiz(
            State(state.clone()),
            Query(QuizQuery {
                path: Some("content/01_intro/01_hello".to_string()),
            }),
        )
        .await;
        assert_eq!(body_json(response).await["questions"][0], 1);

        let response = exercise_quiz(State(state), Query(QuizQuery { path: None })).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_progress_update_quiz() {
        let (_dir, state) = state();

        let response = update_progress(
            State(state.clone()),
            Json(ProgressUpdate {
                kind: Some("quiz".to_string()),
                id: Some("01_intro/01_hello".to_string()),
                success: true,
                score: Some(3),
                total_questions: Some(3),
            }),
        )
        .await
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["xpAwarded"], 10);

        let response = update_progress(
            State(state),
            Json(ProgressUpdate {
                kind: Some("quiz".to_string()),
                id: None,
                success: true,
                score: None,
                total_questions: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(body_json(response).await["error"], "Missing ID");
    }

    #[tokio::test]
    async fn test_get_progress() {
        let (_dir, state) = state();
        let response = get_progress(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["stats"]["totalXp"], 0);
    }

    #[tokio::test]
    async fn test_unreadable_progress_is_an_error() {
        let (dir, state) = state();
        write(dir.path(), ".progy/progress.json", "{not json");

        let response = get_progress(State(state)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("Failed to load progress"));
    }

    #[tokio::test]
    async fn test_exercises_and_status() {
        let (_dir, state) = state();

        let response = list_exercises(State(state.clone())).await;
        let body = body_json(response).await;
        assert_eq!(body["01_intro"][0]["id"], "01_intro/01_hello");
        assert_eq!(body["01_intro"][0]["hasQuiz"], true);

        let body = body_json(status(State(state)).await.into_response()).await;
        assert_eq!(body["runner"], "process");
        assert_eq!(body["courseId"], "sh-course");
    }
}
