/// Runner Dispatcher - Strategy Selection and Execution
///
/// **Core Responsibility:**
/// Run a templated runner command with one of three strategies and return
/// the merged stdout+stderr and exit code.
///
/// **Critical Architectural Boundary:**
/// - Dispatcher knows HOW to execute (host process, Docker image, Compose service)
/// - Dispatcher does NOT interpret output (evaluator's job)
/// - Dispatcher does NOT touch progress
/// - Every strategy converges on `RawExecutionResult`, or an `ExecutionFailure`
///   that the pipeline renders as a failed run
///
/// **Strategies:**
/// - `process`: spawn the command on the host, bounded by the runner timeout
/// - `docker-file`: ping the daemon, ensure the course image, run it with the
///   workspace mounted at `/workspace`
/// - `docker-compose`: ping the daemon, run the command inside the configured
///   service, always tear the stack down afterwards
use crate::docker::{ComposeClient, ComposeMounts, ImageManager};
use crate::resolver::{Layer, PathResolver, ResolvedPath};
use crate::runner::{render_argv, render_invocation, TemplateValues};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use progy_common::config::{generate_image_tag, RunnerConfig, RunnerStrategy};
use progy_common::error::ExecutionFailure;
use progy_common::types::{ExerciseIdentity, RawExecutionResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mount point of the student workspace inside containers
pub const CONTAINER_WORKSPACE: &str = "/workspace";
/// Read-only mount point of the course runtime inside containers
pub const CONTAINER_COURSE: &str = "/course";

const CONTAINER_MEMORY_BYTES: i64 = 2 * 1024 * 1024 * 1024;
const CONTAINER_NANO_CPUS: i64 = 2_000_000_000;

/// How long output pipes may stay open after the child exited
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Selects and runs a strategy for one exercise
pub struct RunnerDispatcher {
    resolver: PathResolver,
    course_id: String,
    build_timeout: Duration,
}

impl RunnerDispatcher {
    pub fn new(resolver: PathResolver, course_id: impl Into<String>, build_timeout: Duration) -> Self {
        Self {
            resolver,
            course_id: course_id.into(),
            build_timeout,
        }
    }

    #[tracing::instrument(
        skip(self, runner, entry),
        fields(exercise_id = %identity.id, strategy = runner.strategy.name())
    )]
    pub async fn dispatch(
        &self,
        runner: &RunnerConfig,
        identity: &ExerciseIdentity,
        entry: &ResolvedPath,
    ) -> Result<RawExecutionResult, ExecutionFailure> {
        let started = Instant::now();

        let result = match &runner.strategy {
            RunnerStrategy::Process => self.run_on_host(runner, identity, entry).await,
            RunnerStrategy::DockerFile {
                dockerfile,
                image_tag,
                network_access,
            } => {
                let tag = image_tag
                    .clone()
                    .unwrap_or_else(|| generate_image_tag(&self.course_id));
                self.run_in_image(runner, identity, entry, dockerfile, &tag, *network_access)
                    .await
            }
            RunnerStrategy::DockerCompose {
                compose_file,
                service_to_run,
            } => {
                self.run_in_compose(runner, identity, entry, compose_file, service_to_run)
                    .await
            }
        };

        match &result {
            Ok(raw) => info!(
                exit_code = raw.exit_code,
                output_bytes = raw.output.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Runner finished"
            ),
            Err(failure) => warn!(
                kind = failure.title(),
                error = %failure,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Runner strategy failed"
            ),
        }

        result
    }

    async fn run_on_host(
        &self,
        runner: &RunnerConfig,
        identity: &ExerciseIdentity,
        entry: &ResolvedPath,
    ) -> Result<RawExecutionResult, ExecutionFailure> {
        let values = TemplateValues::new(identity, entry.absolute.display().to_string());
        let invocation = render_invocation(runner, &values);
        let argv = render_argv(runner, &values);

        let Some((program, args)) = argv.split_first() else {
            return Err(ExecutionFailure::SpawnError {
                command: runner.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty runner command"),
            });
        };

        let cwd = match &invocation.cwd {
            Some(dir) => self.resolver.workspace().join(dir),
            None => self.resolver.workspace().to_path_buf(),
        };

        debug!(program = %program, args = ?args, cwd = %cwd.display(), "Spawning runner");
        run_process(program, args, Some(&cwd), runner.timeout).await
    }

    async fn run_in_image(
        &self,
        runner: &RunnerConfig,
        identity: &ExerciseIdentity,
        entry: &ResolvedPath,
        dockerfile: &str,
        tag: &str,
        network_access: bool,
    ) -> Result<RawExecutionResult, ExecutionFailure> {
        let engine = DockerEngine::connect()?;
        engine.ping().await?;

        let dockerfile_path = self
            .resolver
            .resolve(dockerfile)
            .map_err(|e| ExecutionFailure::BuildFailed {
                tag: tag.to_string(),
                output: e.to_string(),
            })?;
        let context = dockerfile_path
            .absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dockerfile_path.base.clone());

        ImageManager::new(engine.client(), self.build_timeout)
            .ensure_image(tag, &dockerfile_path.absolute, &context)
            .await?;

        let values = TemplateValues::new(identity, container_path(entry));
        let invocation = render_invocation(runner, &values);

        let spec = ContainerSpec {
            image: tag.to_string(),
            shell_line: invocation.shell_line(),
            working_dir: container_working_dir(invocation.cwd.as_deref()),
            workspace: host_mount_path(self.resolver.workspace()),
            runtime: self.resolver.runtime().map(host_mount_path),
            network_access,
            timeout: runner.timeout,
        };

        engine.run_container(&spec).await
    }

    async fn run_in_compose(
        &self,
        runner: &RunnerConfig,
        identity: &ExerciseIdentity,
        entry: &ResolvedPath,
        compose_file: &str,
        service: &str,
    ) -> Result<RawExecutionResult, ExecutionFailure> {
        DockerEngine::connect()?.ping().await?;

        let compose_path =
            self.resolver
                .resolve(compose_file)
                .map_err(|e| ExecutionFailure::ComposeError {
                    message: e.to_string(),
                    output: String::new(),
                })?;

        let values = TemplateValues::new(identity, container_path(entry));
        let invocation = render_invocation(runner, &values);

        let workspace = host_mount_path(self.resolver.workspace());
        let runtime = self.resolver.runtime().map(host_mount_path);
        let working_dir = container_working_dir(invocation.cwd.as_deref());
        let mounts = ComposeMounts {
            workspace: &workspace,
            runtime: runtime.as_deref(),
            working_dir: &working_dir,
        };

        ComposeClient::detect()
            .await
            .run_service(
                &compose_path.absolute,
                service,
                &mounts,
                &invocation.shell_line(),
                runner.timeout,
            )
            .await
    }
}

/// Path of a resolved entry as seen from inside a container
pub fn container_path(entry: &ResolvedPath) -> String {
    let relative = entry.relative.to_string_lossy().replace('\\', "/");
    let mount = match entry.layer {
        Layer::Workspace => CONTAINER_WORKSPACE,
        Layer::Runtime => CONTAINER_COURSE,
    };
    if relative.is_empty() {
        mount.to_string()
    } else {
        format!("{}/{}", mount, relative)
    }
}

fn container_working_dir(cwd: Option<&str>) -> String {
    match cwd.map(|c| c.trim_matches('/')).filter(|c| !c.is_empty()) {
        Some(dir) => format!("{}/{}", CONTAINER_WORKSPACE, dir),
        None => CONTAINER_WORKSPACE.to_string(),
    }
}

/// Bind mounts need absolute host paths
fn host_mount_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Merged stdout+stderr in arrival order
#[derive(Clone, Default)]
struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    fn push(&self, bytes: &[u8]) {
        let mut buffer = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buffer.extend_from_slice(bytes);
    }

    fn snapshot(&self) -> String {
        let buffer = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: OutputBuffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink.push(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "Output pipe closed with error");
                break;
            }
        }
    }
}

/// Wait for the readers, but never longer than the grace period: a
/// grandchild that inherited the pipes can keep them open indefinitely.
async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }
}

/// Spawn `program` with `args`, capture merged output and stop it after `limit`.
///
/// A spawn failure is `SpawnError`; running past `limit` kills the child and
/// yields `Timeout` with whatever output was captured so far.
pub async fn run_process(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    limit: Duration,
) -> Result<RawExecutionResult, ExecutionFailure> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ExecutionFailure::SpawnError {
        command: program.to_string(),
        source,
    })?;

    let buffer = OutputBuffer::default();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(pump(stdout, buffer.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(pump(stderr, buffer.clone())));
    }

    match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => {
            drain(readers).await;
            Ok(RawExecutionResult {
                output: buffer.snapshot(),
                exit_code: status.code().map(i64::from).unwrap_or(-1),
            })
        }
        Ok(Err(source)) => {
            drain(readers).await;
            Err(ExecutionFailure::SpawnError {
                command: program.to_string(),
                source,
            })
        }
        Err(_) => {
            warn!(program, timeout_ms = limit.as_millis() as u64, "Process timed out, killing");
            if let Err(e) = child.kill().await {
                warn!(program, error = %e, "Failed to kill timed-out process");
            }
            for reader in &readers {
                reader.abort();
            }
            Err(ExecutionFailure::Timeout {
                after: limit,
                partial_output: buffer.snapshot(),
            })
        }
    }
}

/// Container cleanup guard - guarantees container removal on drop, even if
/// the run is cancelled or panics
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Drop cannot be async
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

/// What to run inside the course image
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    /// Executed as `sh -c <shell_line>`
    pub shell_line: String,
    pub working_dir: String,
    pub workspace: PathBuf,
    pub runtime: Option<PathBuf>,
    pub network_access: bool,
    pub timeout: Duration,
}

impl ContainerSpec {
    fn binds(&self) -> Vec<String> {
        let mut binds = vec![format!("{}:{}:rw", self.workspace.display(), CONTAINER_WORKSPACE)];
        if let Some(runtime) = &self.runtime {
            binds.push(format!("{}:{}:ro", runtime.display(), CONTAINER_COURSE));
        }
        binds
    }

    fn network_mode(&self) -> &'static str {
        if self.network_access {
            "bridge"
        } else {
            "none"
        }
    }
}

/// Docker-backed execution of the course image
///
/// **Container Rules:**
/// - Workspace bound read-write at `/workspace`, runtime root read-only at `/course`
/// - `bridge` network only when the course asks for it, otherwise `none`
/// - 2 CPUs, 2 GiB memory
/// - Hard timeout kills the container; the drop guard removes it
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, ExecutionFailure> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            ExecutionFailure::RuntimeUnavailable {
                reason: e.to_string(),
            }
        })?;
        Ok(Self { docker })
    }

    pub fn client(&self) -> &Docker {
        &self.docker
    }

    /// Daemon reachability check
    pub async fn ping(&self) -> Result<(), ExecutionFailure> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| ExecutionFailure::RuntimeUnavailable {
                reason: e.to_string(),
            })
    }

    #[tracing::instrument(skip(self, spec), fields(image = %spec.image, network = spec.network_mode()))]
    pub async fn run_container(&self, spec: &ContainerSpec) -> Result<RawExecutionResult, ExecutionFailure> {
        let container_name = format!("progy-run-{}", uuid::Uuid::new_v4());

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), spec.shell_line.clone()]),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(spec.binds()),
                network_mode: Some(spec.network_mode().to_string()),
                memory: Some(CONTAINER_MEMORY_BYTES),
                nano_cpus: Some(CONTAINER_NANO_CPUS),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| ExecutionFailure::RuntimeUnavailable {
                reason: format!("Failed to create container: {}", e),
            })?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ExecutionFailure::RuntimeUnavailable {
                reason: format!("Failed to start container: {}", e),
            })?;

        let mut output = String::new();

        let execution = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs = self.docker.logs(&container_id, logs_options);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait = self.docker.wait_container(&container_id, Some(wait_options));
            match wait.next().await {
                Some(Ok(response)) => Some(response.status_code),
                // Non-zero exits surface as a wait error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                Some(Err(e)) => {
                    warn!(error = %e, "Failed to get container exit code");
                    None
                }
                None => None,
            }
        };

        let outcome = tokio::time::timeout(spec.timeout, execution).await;

        match outcome {
            Ok(exit_code) => {
                let exit_code = exit_code.unwrap_or(-1);
                match exit_code {
                    137 => output.push_str("\n[Container killed: likely out of memory]"),
                    139 => output.push_str("\n[Container killed: segmentation fault]"),
                    _ => {}
                }
                debug!(exit_code, "Container exited");
                Ok(RawExecutionResult { output, exit_code })
            }
            Err(_) => {
                warn!(timeout_ms = spec.timeout.as_millis() as u64, "Container timed out, killing");
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "Failed to kill timed-out container");
                }
                Err(ExecutionFailure::Timeout {
                    after: spec.timeout,
                    partial_output: output,
                })
            }
        }
    }
}
