// Progress persistence: local JSON file or the remote progress service
use async_trait::async_trait;
use progy_common::error::StoreError;
use progy_common::progress::Progress;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-aggregate read and write. Implementations never expose a
/// partially written aggregate.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self) -> Result<Progress, StoreError>;
    async fn save(&self, progress: &Progress) -> Result<(), StoreError>;
}

/// `.progy/progress.json` in the workspace
#[derive(Debug, Clone)]
pub struct LocalProgressStore {
    path: PathBuf,
}

impl LocalProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProgressStore for LocalProgressStore {
    async fn load(&self) -> Result<Progress, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No progress file yet, starting fresh");
                Ok(Progress::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, progress: &Progress) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(progress)?;
        // Write beside the target, then rename over it
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncRequest<'a> {
    course_id: &'a str,
    data: &'a Progress,
}

/// Progress held by the progress service, keyed by course
#[derive(Debug, Clone)]
pub struct RemoteProgressStore {
    client: reqwest::Client,
    api_url: String,
    course_id: String,
    token: Option<String>,
}

impl RemoteProgressStore {
    pub fn new(
        api_url: impl Into<String>,
        course_id: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            course_id: course_id.into(),
            token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ProgressStore for RemoteProgressStore {
    async fn load(&self) -> Result<Progress, StoreError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/progress/get", self.api_url),
            &[("courseId", self.course_id.as_str())],
        )
        .map_err(|e| StoreError::Http(e.to_string()))?;

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(course_id = %self.course_id, "No remote progress yet, starting fresh");
            return Ok(Progress::default());
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn save(&self, progress: &Progress) -> Result<(), StoreError> {
        let body = SyncRequest {
            course_id: &self.course_id,
            data: progress,
        };

        let response = self
            .authorize(self.client.post(format!("{}/progress/sync", self.api_url)))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
            });
        }

        info!(course_id = %self.course_id, "Progress synced to cloud");
        Ok(())
    }
}
