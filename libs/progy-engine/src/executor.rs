/// Exercise Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Run one exercise end to end and record the attempt.
///
/// **Pipeline (strictly in order):**
/// 1. Manifest lookup -> `ExerciseIdentity` (unknown ids abort)
/// 2. PathResolver -> entry file (missing paths abort)
/// 3. RunnerDispatcher -> raw output (strategy failures become a failed report)
/// 4. Evaluator -> `RunReport`
/// 5. Progress state machine -> transition, persisted
/// 6. Tutor escalation on exactly the third consecutive failure
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How output is judged (evaluator's job)
use crate::context::EngineContext;
use crate::evaluator;
use crate::tutor::{spawn_escalation, TutorContext, TutorRequest};
use progy_common::error::{EngineError, StoreError};
use progy_common::progress::{ExerciseTransition, Progress};
use progy_common::types::{ExerciseIdentity, RunReport};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What the caller sees for one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    #[serde(flatten)]
    pub report: RunReport,
    pub progress: Option<Progress>,
    pub error: Option<String>,
}

/// A finished run plus its detached background work
#[derive(Debug)]
pub struct ExerciseRun {
    pub outcome: RunOutcome,
    pub transition: Option<ExerciseTransition>,
    /// Tutor escalation, when this run triggered one
    pub escalation: Option<JoinHandle<()>>,
    /// Remote progress save in networked mode
    pub sync: Option<JoinHandle<()>>,
}

impl ExerciseRun {
    /// Wait for the background tasks. The result never depends on them.
    pub async fn wait_background(&mut self) {
        for handle in [self.escalation.take(), self.sync.take()].into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task did not complete");
            }
        }
    }
}

#[tracing::instrument(skip(ctx), fields(course_id = %ctx.course.id))]
pub async fn run_exercise(ctx: &EngineContext, exercise_id: &str) -> Result<ExerciseRun, EngineError> {
    let identity = ctx.lookup(exercise_id).await?;
    let entry = ctx.resolver().resolve_entry(&identity.entry_path())?;

    info!(
        exercise_id = %identity.id,
        strategy = ctx.course.runner.strategy.name(),
        entry = %entry.absolute.display(),
        "Running exercise"
    );

    let started = Instant::now();
    let report = match ctx.dispatcher().dispatch(&ctx.course.runner, &identity, &entry).await {
        Ok(raw) => evaluator::parse_runner_output(&raw.output, raw.exit_code),
        Err(failure) => evaluator::failure_report(&failure),
    };

    info!(
        exercise_id = %identity.id,
        success = report.success,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Run evaluated"
    );

    let mut progress = match ctx.store().load().await {
        Ok(progress) => progress,
        Err(e) => {
            error!(exercise_id = %identity.id, error = %e, "Could not load progress, attempt not recorded");
            return Ok(ExerciseRun {
                outcome: RunOutcome {
                    report,
                    progress: None,
                    error: Some(format!("Failed to load progress: {}", e)),
                },
                transition: None,
                escalation: None,
                sync: None,
            });
        }
    };

    let now = ctx.clock().now();
    let transition = if report.success {
        progress.record_success(&identity.id, now)
    } else {
        progress.record_failure(&identity.id, now)
    };

    info!(
        exercise_id = %identity.id,
        status = ?transition.status,
        attempts = transition.attempts,
        xp_awarded = transition.xp_awarded,
        "Progress updated"
    );

    let (error, sync) = persist(ctx, &progress).await;
    ctx.invalidate_manifest();

    let escalation = if transition.should_escalate() {
        let request = tutor_request(ctx, &identity, &entry.absolute, &report).await;
        warn!(exercise_id = %identity.id, "Third consecutive failure, escalating to tutor");
        Some(spawn_escalation(ctx.tutor(), request))
    } else {
        None
    };

    Ok(ExerciseRun {
        outcome: RunOutcome {
            report,
            progress: Some(progress),
            error,
        },
        transition: Some(transition),
        escalation,
        sync,
    })
}

/// Offline saves are awaited and reported; networked saves run in the
/// background and only log failures.
async fn persist(ctx: &EngineContext, progress: &Progress) -> (Option<String>, Option<JoinHandle<()>>) {
    if ctx.settings.offline {
        return match ctx.store().save(progress).await {
            Ok(()) => (None, None),
            Err(e) => {
                error!(error = %e, "Failed to save progress");
                (Some(format!("Failed to save progress: {}", e)), None)
            }
        };
    }

    let store = ctx.store();
    let snapshot = progress.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = store.save(&snapshot).await {
            warn!(error = %e, "Background progress sync failed");
        }
    });
    (None, Some(handle))
}

async fn tutor_request(
    ctx: &EngineContext,
    identity: &ExerciseIdentity,
    entry: &Path,
    report: &RunReport,
) -> TutorRequest {
    let code = tokio::fs::read_to_string(entry).await.unwrap_or_else(|e| {
        warn!(error = %e, "Could not read exercise source for tutor context");
        String::new()
    });

    let exercise_name = identity
        .id
        .rsplit('/')
        .next()
        .unwrap_or(&identity.id)
        .to_string();

    TutorRequest {
        course_id: ctx.course.id.clone(),
        exercise_id: identity.id.clone(),
        context: TutorContext {
            course_name: ctx.course.name.clone(),
            exercise_name,
            code,
            error: failure_summary(&report.friendly_output),
            last_output: report.output.clone(),
        },
    }
}

/// The `> summary` line of a rendered report, if it has one
fn failure_summary(friendly_output: &str) -> String {
    friendly_output
        .lines()
        .find_map(|line| line.strip_prefix("> "))
        .map(str::to_string)
        .unwrap_or_else(|| "Run failed".to_string())
}

/// XP awarded by a quiz attempt and the progress after it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOutcome {
    pub xp_awarded: u32,
    pub progress: Progress,
}

/// Record a quiz result; the save is always awaited
pub async fn record_quiz(
    ctx: &EngineContext,
    quiz_id: &str,
    passed: bool,
    score: Option<u32>,
    total_questions: Option<u32>,
) -> Result<QuizOutcome, StoreError> {
    let store = ctx.store();
    let mut progress = store.load().await?;
    let xp_awarded = progress.record_quiz(quiz_id, passed, score, total_questions, ctx.clock().now());
    store.save(&progress).await?;
    ctx.invalidate_manifest();

    info!(quiz_id, passed, xp_awarded, "Quiz recorded");
    Ok(QuizOutcome { xp_awarded, progress })
}
