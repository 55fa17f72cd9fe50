//! Tutor escalation: a best-effort request to the tutoring workflow after
//! the third consecutive failure of an exercise.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const TUTOR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorContext {
    pub course_name: String,
    pub exercise_name: String,
    pub code: String,
    pub error: String,
    pub last_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorRequest {
    pub course_id: String,
    pub exercise_id: String,
    pub context: TutorContext,
}

#[async_trait]
pub trait TutorNotifier: Send + Sync {
    async fn notify(&self, request: &TutorRequest) -> Result<()>;
}

/// POSTs the request to `{api}/tutor/trigger`
pub struct HttpTutorNotifier {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpTutorNotifier {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(TUTOR_TIMEOUT)
            .build()
            .context("Failed to build tutor HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/tutor/trigger", api_url.trim_end_matches('/')),
            token,
        })
    }
}

#[async_trait]
impl TutorNotifier for HttpTutorNotifier {
    async fn notify(&self, request: &TutorRequest) -> Result<()> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach tutor endpoint {}", self.endpoint))?;
        response
            .error_for_status()
            .context("Tutor endpoint rejected the escalation")?;
        Ok(())
    }
}

/// Used when there is nowhere to escalate to (offline mode)
pub struct DisabledTutor;

#[async_trait]
impl TutorNotifier for DisabledTutor {
    async fn notify(&self, request: &TutorRequest) -> Result<()> {
        info!(exercise_id = %request.exercise_id, "Tutor escalation skipped (offline)");
        Ok(())
    }
}

/// Fire the escalation in the background. Errors are logged and swallowed;
/// the handle only exists so callers (and tests) can wait for delivery.
pub fn spawn_escalation(notifier: Arc<dyn TutorNotifier>, request: TutorRequest) -> JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.notify(&request).await {
            Ok(()) => info!(
                course_id = %request.course_id,
                exercise_id = %request.exercise_id,
                "Tutor escalation sent"
            ),
            Err(e) => warn!(
                exercise_id = %request.exercise_id,
                error = %format!("{:#}", e),
                "Tutor escalation failed"
            ),
        }
    })
}
