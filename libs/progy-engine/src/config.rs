// Engine settings and course configuration loading
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use progy_common::config::CourseConfig;
use progy_common::error::EngineError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

pub const COURSE_CONFIG_NAME: &str = "course.json";
pub const PROG_DIR_NAME: &str = ".progy";
pub const DEFAULT_API_URL: &str = "https://api.progy.dev";
pub const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;

/// Environment-derived settings for one workspace
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Mutable student workspace
    pub workspace_root: PathBuf,
    /// Read-only unpacked course content, if any
    pub runtime_root: Option<PathBuf>,
    /// Local-file progress instead of the remote progress service
    pub offline: bool,
    pub api_url: String,
    pub token: Option<String>,
    pub build_timeout: Duration,
    /// Disable manifest locks
    pub bypass_locks: bool,
}

impl EngineSettings {
    /// Offline settings rooted at `workspace_root`
    pub fn for_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            runtime_root: None,
            offline: true,
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            build_timeout: Duration::from_secs(DEFAULT_BUILD_TIMEOUT_SECS),
            bypass_locks: false,
        }
    }

    pub fn with_runtime_root(mut self, runtime_root: impl Into<PathBuf>) -> Self {
        self.runtime_root = Some(runtime_root.into());
        self
    }

    /// Read settings from PROG_CWD, PROGY_RUNTIME_ROOT, PROGY_OFFLINE,
    /// PROGY_API_URL, PROGY_TOKEN, PROGY_BUILD_TIMEOUT_SECS and
    /// PROGY_BYPASS_MODE.
    pub fn from_env() -> Result<Self> {
        let workspace_root = match std::env::var("PROG_CWD") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::current_dir().context("Failed to determine current directory")?,
        };

        let runtime_root = std::env::var("PROGY_RUNTIME_ROOT")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let build_timeout_secs = match std::env::var("PROGY_BUILD_TIMEOUT_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .context("PROGY_BUILD_TIMEOUT_SECS must be a number of seconds")?,
            Err(_) => DEFAULT_BUILD_TIMEOUT_SECS,
        };

        let token = std::env::var("PROGY_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(load_global_token);

        Ok(Self {
            workspace_root,
            runtime_root,
            offline: env_flag("PROGY_OFFLINE"),
            api_url: std::env::var("PROGY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            token,
            build_timeout: Duration::from_secs(build_timeout_secs),
            bypass_locks: env_flag("PROGY_BYPASS_MODE"),
        })
    }

    /// `.progy` metadata directory inside the workspace
    pub fn prog_dir(&self) -> PathBuf {
        self.workspace_root.join(PROG_DIR_NAME)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.prog_dir().join("progress.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.prog_dir().join("manifest.json")
    }

    /// Candidate layer roots, workspace first
    pub fn layers(&self) -> Vec<&Path> {
        let mut layers = vec![self.workspace_root.as_path()];
        if let Some(runtime) = &self.runtime_root {
            layers.push(runtime.as_path());
        }
        layers
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Token saved by `progy login` in ~/.progy/config.json
fn load_global_token() -> Option<String> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    let path = Path::new(&home).join(PROG_DIR_NAME).join("config.json");
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str::<serde_json::Value>(&content) {
        Ok(value) => value.get("token").and_then(|t| t.as_str()).map(str::to_string),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable global config");
            None
        }
    }
}

/// Load course.json from the workspace, falling back to the runtime root
pub fn load_course_config(settings: &EngineSettings) -> Result<CourseConfig, EngineError> {
    for layer in settings.layers() {
        let path = layer.join(COURSE_CONFIG_NAME);
        if path.is_file() {
            debug!(path = %path.display(), "Loading course configuration");
            let content = std::fs::read_to_string(&path)?;
            return CourseConfig::from_json(&content);
        }
    }

    Err(EngineError::Configuration(format!(
        "{} not found in {}",
        COURSE_CONFIG_NAME,
        settings.workspace_root.display()
    )))
}

/// Time source, injectable so tests control dates
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const COURSE: &str = r#"{"id":"py","name":"Python","runner":{"command":"python3","args":["{{exercise}}"]},"content":{"exercises":"content"}}"#;

    #[test]
    fn test_load_course_config_prefers_workspace() {
        let workspace = TempDir::new().unwrap();
        let runtime = TempDir::new().unwrap();
        std::fs::write(workspace.path().join(COURSE_CONFIG_NAME), COURSE).unwrap();
        std::fs::write(
            runtime.path().join(COURSE_CONFIG_NAME),
            COURSE.replace("\"py\"", "\"other\""),
        )
        .unwrap();

        let settings = EngineSettings::for_workspace(workspace.path()).with_runtime_root(runtime.path());
        let config = load_course_config(&settings).unwrap();
        assert_eq!(config.id, "py");
    }

    #[test]
    fn test_load_course_config_falls_back_to_runtime() {
        let workspace = TempDir::new().unwrap();
        let runtime = TempDir::new().unwrap();
        std::fs::write(runtime.path().join(COURSE_CONFIG_NAME), COURSE).unwrap();

        let settings = EngineSettings::for_workspace(workspace.path()).with_runtime_root(runtime.path());
        assert_eq!(load_course_config(&settings).unwrap().id, "py");
    }

    #[test]
    fn test_missing_course_config() {
        let workspace = TempDir::new().unwrap();
        let settings = EngineSettings::for_workspace(workspace.path());
        assert!(matches!(
            load_course_config(&settings),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
    }
}
