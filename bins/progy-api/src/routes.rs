use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exercises", get(handlers::list_exercises))
        .route("/exercises/code", get(handlers::exercise_code))
        .route("/exercises/quiz", get(handlers::exercise_quiz))
        .route("/exercises/run", post(handlers::run_exercise))
        .route("/progress", get(handlers::get_progress))
        .route("/progress/update", post(handlers::update_progress))
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics_text))
}
