// Docker collaborators: course image management and the Compose CLI
use crate::engine::{run_process, CONTAINER_COURSE, CONTAINER_WORKSPACE};
use bollard::Docker;
use progy_common::error::ExecutionFailure;
use progy_common::types::RawExecutionResult;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const COMPOSE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const COMPOSE_DOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the course image when it is missing from the local cache
pub struct ImageManager<'a> {
    docker: &'a Docker,
    build_timeout: Duration,
}

impl<'a> ImageManager<'a> {
    pub fn new(docker: &'a Docker, build_timeout: Duration) -> Self {
        Self { docker, build_timeout }
    }

    pub async fn image_exists(&self, tag: &str) -> bool {
        self.docker.inspect_image(tag).await.is_ok()
    }

    /// Ensure `tag` exists, building it from `dockerfile` in `context` if not.
    ///
    /// The build is bounded by the build timeout independently of the
    /// runner timeout.
    #[tracing::instrument(skip(self, dockerfile, context))]
    pub async fn ensure_image(&self, tag: &str, dockerfile: &Path, context: &Path) -> Result<(), ExecutionFailure> {
        if self.image_exists(tag).await {
            debug!("✓ Image cache hit: {}", tag);
            return Ok(());
        }

        warn!("⚠ Image cache miss: {} (building now)", tag);
        let args = build_args(tag, dockerfile, context);

        let result = match run_process("docker", &args, Some(context), self.build_timeout).await {
            Ok(result) => result,
            Err(ExecutionFailure::SpawnError { command, source }) => {
                return Err(ExecutionFailure::BuildFailed {
                    tag: tag.to_string(),
                    output: format!("Failed to spawn '{}': {}", command, source),
                })
            }
            Err(other) => return Err(other),
        };

        if result.exit_code != 0 {
            return Err(ExecutionFailure::BuildFailed {
                tag: tag.to_string(),
                output: result.output,
            });
        }

        info!("✓ Image built successfully: {}", tag);
        Ok(())
    }
}

fn build_args(tag: &str, dockerfile: &Path, context: &Path) -> Vec<String> {
    vec![
        "build".to_string(),
        "-t".to_string(),
        tag.to_string(),
        "-f".to_string(),
        dockerfile.display().to_string(),
        context.display().to_string(),
    ]
}

/// Host directories bound into the compose service, plus its working dir
#[derive(Debug, Clone, Copy)]
pub struct ComposeMounts<'a> {
    /// Read-write at `/workspace`
    pub workspace: &'a Path,
    /// Read-only at `/course`
    pub runtime: Option<&'a Path>,
    /// Container path passed to `-w`
    pub working_dir: &'a str,
}

/// `docker compose` (v2) or the standalone `docker-compose` (v1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeClient {
    v2: bool,
}

impl ComposeClient {
    pub fn with_version(v2: bool) -> Self {
        Self { v2 }
    }

    /// Prefer the v2 plugin, fall back to v1 when `docker compose version` fails
    pub async fn detect() -> Self {
        let probe = vec!["compose".to_string(), "version".to_string()];
        let v2 = matches!(
            run_process("docker", &probe, None, COMPOSE_PROBE_TIMEOUT).await,
            Ok(RawExecutionResult { exit_code: 0, .. })
        );
        debug!(v2, "Detected docker compose flavour");
        Self { v2 }
    }

    pub fn program(&self) -> &'static str {
        if self.v2 {
            "docker"
        } else {
            "docker-compose"
        }
    }

    fn base_args(&self, compose_file: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if self.v2 {
            args.push("compose".to_string());
        }
        args.push("-f".to_string());
        args.push(compose_file.display().to_string());
        args
    }

    pub fn run_args(
        &self,
        compose_file: &Path,
        service: &str,
        mounts: &ComposeMounts<'_>,
        shell_line: &str,
    ) -> Vec<String> {
        let mut args = self.base_args(compose_file);
        args.extend([
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:{}", mounts.workspace.display(), CONTAINER_WORKSPACE),
        ]);
        if let Some(runtime) = mounts.runtime {
            args.push("-v".to_string());
            args.push(format!("{}:{}:ro", runtime.display(), CONTAINER_COURSE));
        }
        args.extend([
            "-w".to_string(),
            mounts.working_dir.to_string(),
            service.to_string(),
            "sh".to_string(),
            "-c".to_string(),
            shell_line.to_string(),
        ]);
        args
    }

    pub fn down_args(&self, compose_file: &Path) -> Vec<String> {
        let mut args = self.base_args(compose_file);
        args.push("down".to_string());
        args
    }

    /// Run `shell_line` in `service`, then tear the stack down whatever the outcome
    #[tracing::instrument(skip(self, compose_file, mounts, shell_line), fields(program = self.program()))]
    pub async fn run_service(
        &self,
        compose_file: &Path,
        service: &str,
        mounts: &ComposeMounts<'_>,
        shell_line: &str,
        timeout: Duration,
    ) -> Result<RawExecutionResult, ExecutionFailure> {
        let project_dir = compose_file.parent();
        let args = self.run_args(compose_file, service, mounts, shell_line);

        info!(service, "Starting compose service");
        let result = run_process(self.program(), &args, project_dir, timeout).await;

        self.down(compose_file).await;

        match result {
            Err(ExecutionFailure::SpawnError { command, source }) => Err(ExecutionFailure::ComposeError {
                message: format!("Failed to spawn {}: {}", command, source),
                output: String::new(),
            }),
            other => other,
        }
    }

    async fn down(&self, compose_file: &Path) {
        let args = self.down_args(compose_file);
        match run_process(self.program(), &args, compose_file.parent(), COMPOSE_DOWN_TIMEOUT).await {
            Ok(result) if result.exit_code == 0 => debug!("Compose stack removed"),
            Ok(result) => warn!(exit_code = result.exit_code, output = %result.output, "compose down failed"),
            Err(e) => warn!(error = %e, "compose down failed"),
        }
    }
}
