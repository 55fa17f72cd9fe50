// Course configuration (course.json), decoded once and validated
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";
pub const DEFAULT_COMPOSE_SERVICE: &str = "app";

/// Runner section exactly as a course author writes it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRunnerConfig {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub image_tag: Option<String>,
    #[serde(default)]
    pub network_access: Option<bool>,
    #[serde(default)]
    pub compose_file: Option<String>,
    #[serde(default)]
    pub service_to_run: Option<String>,
}

/// Execution strategy, a closed set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerStrategy {
    Process,
    DockerFile {
        dockerfile: String,
        image_tag: Option<String>,
        network_access: bool,
    },
    DockerCompose {
        compose_file: String,
        service_to_run: String,
    },
}

impl RunnerStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RunnerStrategy::Process => "process",
            RunnerStrategy::DockerFile { .. } => "docker-file",
            RunnerStrategy::DockerCompose { .. } => "docker-compose",
        }
    }
}

/// Validated runner configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub timeout: Duration,
    pub strategy: RunnerStrategy,
}

impl TryFrom<RawRunnerConfig> for RunnerConfig {
    type Error = EngineError;

    fn try_from(raw: RawRunnerConfig) -> Result<Self, Self::Error> {
        let command = raw
            .command
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| EngineError::Configuration("runner.command is required".to_string()))?;

        let strategy = match raw.kind.as_deref().unwrap_or("process") {
            "process" => RunnerStrategy::Process,
            "docker-file" | "docker-local" => RunnerStrategy::DockerFile {
                dockerfile: raw.dockerfile.unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
                image_tag: raw.image_tag.filter(|t| !t.trim().is_empty()),
                network_access: raw.network_access.unwrap_or(false),
            },
            "docker-compose" => RunnerStrategy::DockerCompose {
                compose_file: raw.compose_file.unwrap_or_else(|| DEFAULT_COMPOSE_FILE.to_string()),
                service_to_run: raw
                    .service_to_run
                    .unwrap_or_else(|| DEFAULT_COMPOSE_SERVICE.to_string()),
            },
            other => {
                return Err(EngineError::Configuration(format!(
                    "unknown runner type '{}' (expected process, docker-file or docker-compose)",
                    other
                )))
            }
        };

        let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_RUNNER_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(EngineError::Configuration(
                "runner.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(RunnerConfig {
            command,
            args: raw.args,
            cwd: raw.cwd.filter(|c| !c.is_empty()),
            timeout: Duration::from_secs(timeout_secs),
            strategy,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    pub exercises: String,
    #[serde(default)]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupCheck {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetupConfig {
    #[serde(default)]
    pub checks: Vec<SetupCheck>,
    #[serde(default)]
    pub guide: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressionMode {
    #[default]
    Sequential,
    Open,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressionConfig {
    #[serde(default)]
    pub mode: ProgressionMode,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCourseConfig {
    id: String,
    name: String,
    runner: RawRunnerConfig,
    content: ContentConfig,
    #[serde(default)]
    setup: Option<SetupConfig>,
    #[serde(default)]
    progression: Option<ProgressionConfig>,
}

/// Validated course configuration
#[derive(Debug, Clone)]
pub struct CourseConfig {
    pub id: String,
    pub name: String,
    pub runner: RunnerConfig,
    pub content: ContentConfig,
    pub setup: SetupConfig,
    pub progression: ProgressionConfig,
}

impl CourseConfig {
    /// Parse and validate course.json content
    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        let raw: RawCourseConfig = serde_json::from_str(content)
            .map_err(|e| EngineError::Configuration(format!("invalid course.json: {}", e)))?;

        if raw.id.trim().is_empty() {
            return Err(EngineError::Configuration("course id is required".to_string()));
        }

        Ok(Self {
            id: raw.id,
            name: raw.name,
            runner: RunnerConfig::try_from(raw.runner)?,
            content: raw.content,
            setup: raw.setup.unwrap_or_default(),
            progression: raw.progression.unwrap_or_default(),
        })
    }

    /// Image tag for the docker-file strategy: the configured tag, or one
    /// derived from the course id.
    pub fn image_tag(&self) -> Option<String> {
        match &self.runner.strategy {
            RunnerStrategy::DockerFile { image_tag, .. } => Some(
                image_tag
                    .clone()
                    .unwrap_or_else(|| generate_image_tag(&self.id)),
            ),
            _ => None,
        }
    }
}

/// `progy-course-<id>:latest` with the id reduced to `[a-z0-9-]`
pub fn generate_image_tag(course_id: &str) -> String {
    let safe: String = course_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    format!("progy-course-{}:latest", safe)
}
