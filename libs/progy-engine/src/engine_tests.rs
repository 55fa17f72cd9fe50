/// Integration tests for the exercise pipeline
///
/// These tests drive `run_exercise` end to end against a temporary course:
/// 1. A structured SRP pass awards XP and marks the exercise passed
/// 2. Exactly one tutor escalation on the third consecutive failure
/// 3. Strategy failures (spawn, timeout) count as failed attempts
/// 4. Progress persistence in offline and networked modes
/// 5. Docker strategies (ignored unless a daemon is available)

mod pipeline_tests {
    use crate::config::{EngineSettings, FixedClock, COURSE_CONFIG_NAME};
    use crate::context::EngineContext;
    use crate::executor::{record_quiz, run_exercise};
    use crate::store::{LocalProgressStore, ProgressStore};
    use crate::tutor::{TutorNotifier, TutorRequest};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use progy_common::config::CourseConfig;
    use progy_common::error::{EngineError, StoreError};
    use progy_common::progress::{ExerciseStatus, Progress};
    use std::fs;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const HELLO: &str = "01_intro/01_hello";

    const PASSING_SCRIPT: &str =
        "printf '__SRP_BEGIN__{\"success\":true,\"summary\":\"ok\",\"raw\":\"Hi\"}__SRP_END__\\n'\n";
    const FAILING_SCRIPT: &str = "echo '❌ assertion failed: left == right'\nexit 1\n";

    /// Records every escalation instead of sending it
    #[derive(Default)]
    struct RecordingTutor {
        requests: Mutex<Vec<TutorRequest>>,
    }

    impl RecordingTutor {
        fn count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TutorNotifier for RecordingTutor {
        async fn notify(&self, request: &TutorRequest) -> anyhow::Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl ProgressStore for UnreachableStore {
        async fn load(&self) -> Result<Progress, StoreError> {
            Err(StoreError::Http("connection refused".to_string()))
        }

        async fn save(&self, _progress: &Progress) -> Result<(), StoreError> {
            Err(StoreError::Http("connection refused".to_string()))
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn course_json(runner: &str) -> String {
        format!(
            r#"{{"id":"py-basics","name":"Python Basics","runner":{},"content":{{"exercises":"content"}},"progression":{{"mode":"open"}}}}"#,
            runner
        )
    }

    /// Workspace with one passing-capable exercise, runner `sh {{exercise}}`
    fn workspace(runner: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        write(dir.path(), COURSE_CONFIG_NAME, &course_json(runner));
        write(dir.path(), "content/01_intro/01_hello/exercise.py", PASSING_SCRIPT);
        write(dir.path(), "content/01_intro/01_hello/README.md", "# Hello");
        write(dir.path(), "content/01_intro/02_empty/README.md", "# Nothing to run");
        dir
    }

    fn sh_runner() -> &'static str {
        r#"{"type":"process","command":"sh","args":["{{exercise}}"],"timeout_secs":5}"#
    }

    struct Harness {
        ctx: EngineContext,
        clock: Arc<FixedClock>,
        tutor: Arc<RecordingTutor>,
        store: Arc<LocalProgressStore>,
    }

    fn harness(dir: &TempDir) -> Harness {
        harness_with(EngineSettings::for_workspace(dir.path()))
    }

    fn harness_with(settings: EngineSettings) -> Harness {
        let course = CourseConfig::from_json(
            &fs::read_to_string(settings.workspace_root.join(COURSE_CONFIG_NAME)).unwrap(),
        )
        .unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0).unwrap()));
        let tutor = Arc::new(RecordingTutor::default());
        let store = Arc::new(LocalProgressStore::new(settings.progress_path()));
        let ctx = EngineContext::new(settings, course, clock.clone(), store.clone(), tutor.clone());
        Harness {
            ctx,
            clock,
            tutor,
            store,
        }
    }

    fn set_script(dir: &TempDir, script: &str) {
        write(dir.path(), "content/01_intro/01_hello/exercise.py", script);
    }

    #[tokio::test]
    async fn test_srp_pass_awards_xp_and_marks_pass() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        let mut run = run_exercise(&h.ctx, HELLO).await.unwrap();
        run.wait_background().await;

        assert!(run.outcome.report.success);
        assert_eq!(run.outcome.report.output, "Hi");
        assert!(run.outcome.error.is_none());

        let progress = run.outcome.progress.as_ref().unwrap();
        assert_eq!(progress.exercise(HELLO).unwrap().status, ExerciseStatus::Pass);
        assert_eq!(progress.stats.total_xp, 20);
        assert_eq!(run.transition.unwrap().xp_awarded, 20);

        // Persisted as a whole aggregate
        let stored = h.store.load().await.unwrap();
        assert_eq!(stored.exercises, progress.exercises);
        assert_eq!(stored.stats.total_xp, 20);
        assert_eq!(h.tutor.count(), 0);
    }

    #[tokio::test]
    async fn test_command_template_with_placeholder_runs() {
        let dir = workspace(r#"{"type":"process","command":"sh {{exercise}}","timeout_secs":5}"#);
        let h = harness(&dir);

        let run = run_exercise(&h.ctx, HELLO).await.unwrap();
        assert!(run.outcome.report.success, "{}", run.outcome.report.friendly_output);
        assert_eq!(run.outcome.report.output, "Hi");
        assert_eq!(run.outcome.progress.unwrap().stats.total_xp, 20);
    }

    #[tokio::test]
    async fn test_re_pass_does_not_re_award() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        run_exercise(&h.ctx, HELLO).await.unwrap();
        h.clock.advance(chrono::Duration::hours(1));
        let run = run_exercise(&h.ctx, HELLO).await.unwrap();

        assert_eq!(run.transition.unwrap().xp_awarded, 0);
        assert_eq!(run.outcome.progress.unwrap().stats.total_xp, 20);
    }

    #[tokio::test]
    async fn test_third_consecutive_failure_escalates_once() {
        let dir = workspace(sh_runner());
        set_script(&dir, FAILING_SCRIPT);
        let h = harness(&dir);

        for attempt in 1..=5u32 {
            let mut run = run_exercise(&h.ctx, HELLO).await.unwrap();
            assert_eq!(run.escalation.is_some(), attempt == 3, "attempt {}", attempt);
            run.wait_background().await;

            assert!(!run.outcome.report.success);
            assert_eq!(run.transition.unwrap().attempts, attempt);
            let expected = if attempt >= 3 { 1 } else { 0 };
            assert_eq!(h.tutor.count(), expected, "after attempt {}", attempt);
        }

        let requests = h.tutor.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.course_id, "py-basics");
        assert_eq!(request.exercise_id, HELLO);
        assert_eq!(request.context.course_name, "Python Basics");
        assert_eq!(request.context.code, FAILING_SCRIPT);
        assert!(request.context.last_output.contains("assertion failed"));
    }

    #[tokio::test]
    async fn test_pass_restarts_escalation_count() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        set_script(&dir, FAILING_SCRIPT);
        for _ in 0..2 {
            run_exercise(&h.ctx, HELLO).await.unwrap().wait_background().await;
        }

        set_script(&dir, PASSING_SCRIPT);
        let run = run_exercise(&h.ctx, HELLO).await.unwrap();
        assert_eq!(run.transition.unwrap().attempts, 0);

        set_script(&dir, FAILING_SCRIPT);
        for _ in 0..2 {
            run_exercise(&h.ctx, HELLO).await.unwrap().wait_background().await;
        }
        assert_eq!(h.tutor.count(), 0);

        let mut run = run_exercise(&h.ctx, HELLO).await.unwrap();
        run.wait_background().await;
        assert_eq!(h.tutor.count(), 1);
        // A failure after a pass keeps the XP already earned
        assert_eq!(run.outcome.progress.unwrap().stats.total_xp, 20);
    }

    #[tokio::test]
    async fn test_spawn_error_is_a_failed_attempt() {
        let dir = workspace(r#"{"command":"progy-no-such-runner","args":["{{exercise}}"]}"#);
        let h = harness(&dir);

        let run = run_exercise(&h.ctx, HELLO).await.unwrap();
        assert!(!run.outcome.report.success);
        assert!(run
            .outcome
            .report
            .friendly_output
            .starts_with("## ❌ Failed\n\n> Spawn Error"));

        let progress = run.outcome.progress.unwrap();
        let exercise = progress.exercise(HELLO).unwrap();
        assert_eq!(exercise.status, ExerciseStatus::Fail);
        assert_eq!(exercise.attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_not_hung() {
        let dir = workspace(r#"{"command":"sh","args":["{{exercise}}"],"timeout_secs":1}"#);
        set_script(&dir, "echo working\nsleep 10\n");
        let h = harness(&dir);

        let run = run_exercise(&h.ctx, HELLO).await.unwrap();
        assert!(!run.outcome.report.success);
        assert!(run.outcome.report.friendly_output.contains("> Timeout"));
        assert!(run.outcome.report.output.contains("working"));
    }

    #[tokio::test]
    async fn test_unknown_exercise_aborts_before_attempt() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        let result = run_exercise(&h.ctx, "01_intro/../../etc").await;
        assert!(matches!(result, Err(EngineError::UnknownExercise { .. })));
        assert!(h.store.load().await.unwrap().exercises.is_empty());
    }

    #[tokio::test]
    async fn test_directory_without_entry_aborts() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        let result = run_exercise(&h.ctx, "01_intro/02_empty").await;
        assert!(matches!(result, Err(EngineError::NoEntryFile { .. })));
    }

    #[tokio::test]
    async fn test_runtime_layer_exercise_runs() {
        let workspace_dir = TempDir::new().unwrap();
        let runtime_dir = workspace(sh_runner());
        let settings = EngineSettings::for_workspace(workspace_dir.path()).with_runtime_root(runtime_dir.path());
        // course.json only exists in the runtime layer
        write(
            workspace_dir.path(),
            COURSE_CONFIG_NAME,
            &fs::read_to_string(runtime_dir.path().join(COURSE_CONFIG_NAME)).unwrap(),
        );
        let h = harness_with(settings);

        let run = run_exercise(&h.ctx, HELLO).await.unwrap();
        assert!(run.outcome.report.success);
    }

    #[tokio::test]
    async fn test_progress_load_failure_reports_without_recording() {
        let dir = workspace(sh_runner());
        set_script(&dir, FAILING_SCRIPT);
        let settings = EngineSettings::for_workspace(dir.path());
        let course = CourseConfig::from_json(&fs::read_to_string(dir.path().join(COURSE_CONFIG_NAME)).unwrap()).unwrap();
        let tutor = Arc::new(RecordingTutor::default());
        let ctx = EngineContext::new(
            settings,
            course,
            Arc::new(FixedClock::new(Utc::now())),
            Arc::new(UnreachableStore),
            tutor.clone(),
        );

        let run = run_exercise(&ctx, HELLO).await.unwrap();
        assert!(!run.outcome.report.success);
        assert!(run.outcome.progress.is_none());
        assert!(run.outcome.error.unwrap().contains("connection refused"));
        assert!(run.transition.is_none());
        assert_eq!(tutor.count(), 0);
    }

    #[tokio::test]
    async fn test_networked_mode_saves_in_background() {
        let dir = workspace(sh_runner());
        let mut settings = EngineSettings::for_workspace(dir.path());
        settings.offline = false;
        let h = harness_with(settings);

        let mut run = run_exercise(&h.ctx, HELLO).await.unwrap();
        assert!(run.sync.is_some());
        run.wait_background().await;

        assert_eq!(h.store.load().await.unwrap().stats.total_xp, 20);
    }

    #[tokio::test]
    async fn test_streak_across_days() {
        let dir = workspace(sh_runner());
        write(dir.path(), "content/01_intro/03_next/exercise.py", PASSING_SCRIPT);
        let h = harness(&dir);

        run_exercise(&h.ctx, HELLO).await.unwrap();
        h.clock.advance(chrono::Duration::days(1));
        let run = run_exercise(&h.ctx, "01_intro/03_next").await.unwrap();

        let stats = run.outcome.progress.unwrap().stats;
        assert_eq!(stats.current_streak, 2);
        assert_eq!(stats.longest_streak, 2);
        assert_eq!(stats.total_xp, 40);
    }

    #[tokio::test]
    async fn test_quiz_awards_once() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        let first = record_quiz(&h.ctx, HELLO, true, Some(9), Some(10)).await.unwrap();
        assert_eq!(first.xp_awarded, 10);
        let second = record_quiz(&h.ctx, HELLO, true, Some(10), Some(10)).await.unwrap();
        assert_eq!(second.xp_awarded, 0);
        assert_eq!(second.progress.stats.total_xp, 10);
    }

    #[tokio::test]
    async fn test_manifest_syncs_total_and_writes_file() {
        let dir = workspace(sh_runner());
        let h = harness(&dir);

        let manifest = h.ctx.manifest().await.unwrap();
        assert_eq!(manifest.total_entries(), 2);
        assert_eq!(h.store.load().await.unwrap().stats.total_exercises, 2);
        assert!(h.ctx.settings.manifest_path().is_file());

        // Cached within the window even if files change
        write(dir.path(), "content/01_intro/04_new/exercise.py", "");
        assert_eq!(h.ctx.manifest().await.unwrap().total_entries(), 2);
        h.clock.advance(chrono::Duration::seconds(6));
        assert_eq!(h.ctx.manifest().await.unwrap().total_entries(), 3);
    }
}

/// Docker strategy tests. These need a running daemon and pull `alpine`.
mod docker_tests {
    use crate::config::{EngineSettings, FixedClock, COURSE_CONFIG_NAME};
    use crate::context::EngineContext;
    use crate::engine::{ContainerSpec, DockerEngine};
    use crate::executor::run_exercise;
    use crate::store::LocalProgressStore;
    use crate::tutor::DisabledTutor;
    use chrono::Utc;
    use progy_common::config::CourseConfig;
    use progy_common::error::ExecutionFailure;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn docker_course(runner: &str) -> (TempDir, EngineContext) {
        let dir = TempDir::new().unwrap();
        let course = format!(
            r#"{{"id":"docker-test","name":"Docker Test","runner":{},"content":{{"exercises":"content"}}}}"#,
            runner
        );
        fs::write(dir.path().join(COURSE_CONFIG_NAME), &course).unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM alpine:3.19\n").unwrap();
        let ex = dir.path().join("content/01_intro/01_hello");
        fs::create_dir_all(&ex).unwrap();
        fs::write(
            ex.join("exercise.py"),
            "printf '__SRP_BEGIN__{\"success\":true,\"summary\":\"in container\",\"raw\":\"\"}__SRP_END__\\n'\n",
        )
        .unwrap();

        let settings = EngineSettings::for_workspace(dir.path());
        let ctx = EngineContext::new(
            settings.clone(),
            CourseConfig::from_json(&course).unwrap(),
            Arc::new(FixedClock::new(Utc::now())),
            Arc::new(LocalProgressStore::new(settings.progress_path())),
            Arc::new(DisabledTutor),
        );
        (dir, ctx)
    }

    /// Test: docker-file strategy builds the image and runs with /workspace mounted
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_file_strategy_runs_exercise() {
        let (_dir, ctx) = docker_course(
            r#"{"type":"docker-file","command":"sh","args":["{{exercise}}"],"image_tag":"progy-test-alpine:latest","timeout_secs":30}"#,
        );

        let run = run_exercise(&ctx, "01_intro/01_hello").await.unwrap();
        assert!(run.outcome.report.success, "{}", run.outcome.report.friendly_output);
        assert!(run.outcome.report.friendly_output.contains("in container"));
    }

    /// Test: network is disabled unless the course enables it
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_container_network_isolated_by_default() {
        let engine = DockerEngine::connect().expect("Failed to connect to Docker");
        engine.ping().await.expect("Docker daemon not reachable");

        let dir = TempDir::new().unwrap();
        let spec = ContainerSpec {
            image: "alpine:3.19".to_string(),
            shell_line: "ip link show | grep -c 'state UP' || true".to_string(),
            working_dir: "/workspace".to_string(),
            workspace: dir.path().to_path_buf(),
            runtime: None,
            network_access: false,
            timeout: Duration::from_secs(30),
        };
        let result = engine.run_container(&spec).await.unwrap();
        assert_eq!(result.output.trim(), "0");
    }

    /// Test: container timeout kills the container and reports Timeout
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_container_timeout() {
        let engine = DockerEngine::connect().expect("Failed to connect to Docker");
        let spec = ContainerSpec {
            image: "alpine:3.19".to_string(),
            shell_line: "echo started; sleep 30".to_string(),
            working_dir: "/workspace".to_string(),
            workspace: PathBuf::from(std::env::temp_dir()),
            runtime: None,
            network_access: false,
            timeout: Duration::from_secs(2),
        };
        match engine.run_container(&spec).await {
            Err(ExecutionFailure::Timeout { partial_output, .. }) => {
                assert!(partial_output.contains("started"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    /// Test: compose strategy runs the command in the service and tears down
    #[tokio::test]
    #[ignore] // Requires Docker with compose
    async fn test_docker_compose_strategy() {
        let (dir, ctx) = docker_course(
            r#"{"type":"docker-compose","command":"sh","args":["{{exercise}}"],"service_to_run":"app","timeout_secs":60}"#,
        );
        fs::write(
            dir.path().join("docker-compose.yml"),
            "services:\n  app:\n    image: alpine:3.19\n",
        )
        .unwrap();

        let run = run_exercise(&ctx, "01_intro/01_hello").await.unwrap();
        assert!(run.outcome.report.success, "{}", run.outcome.report.friendly_output);
    }
}
