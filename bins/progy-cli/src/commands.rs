// CLI commands for running exercises and inspecting progress
use anyhow::{Context, Result};
use progy_common::progress::{ExerciseStatus, Progress};
use progy_engine::manifest::{Manifest, ManifestEntry};
use progy_engine::setup::{run_setup_checks, CheckStatus};
use progy_engine::{config::EngineSettings, EngineContext};
use tracing::{debug, warn};

/// Build the engine context from the environment and course.json
pub fn load_context() -> Result<EngineContext> {
    let settings = EngineSettings::from_env().context("Failed to read engine settings")?;
    debug!(workspace = %settings.workspace_root.display(), offline = settings.offline, "Loading course");
    EngineContext::from_settings(settings).context("Failed to load course")
}

/// Run one exercise. Returns whether it passed.
pub async fn run(ctx: &EngineContext, id: &str, json: bool) -> Result<bool> {
    if !json {
        println!("🚀 Running {}...\n", id);
    }

    let mut run = progy_engine::run_exercise(ctx, id)
        .await
        .with_context(|| format!("Could not run exercise '{}'", id))?;

    // The process may exit right after, so let the tutor request and sync finish
    run.wait_background().await;

    let passed = run.outcome.report.success;

    if json {
        println!("{}", serde_json::to_string_pretty(&run.outcome)?);
        return Ok(passed);
    }

    println!("{}", run.outcome.report.friendly_output);

    if let Some(transition) = &run.transition {
        if transition.xp_awarded > 0 {
            println!("⭐ +{} XP", transition.xp_awarded);
        }
        if transition.status == ExerciseStatus::Fail {
            println!("🔁 Attempt {} on this exercise", transition.attempts);
        }
        if transition.should_escalate() {
            println!("🤖 Stuck? A tutor hint has been requested for this exercise.");
        }
    }

    if let Some(error) = &run.outcome.error {
        println!("\n⚠️  {}", error);
    }

    Ok(passed)
}

/// List the manifest grouped by module
pub async fn list_exercises(ctx: &EngineContext, json: bool) -> Result<()> {
    let manifest = ctx.manifest().await.context("Failed to scan exercises")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    if manifest.total_entries() == 0 {
        println!("No exercises found in '{}'.", ctx.course.content.exercises);
        return Ok(());
    }

    let progress = match ctx.load_progress().await {
        Ok(progress) => Some(progress),
        Err(e) => {
            warn!(error = %e, "Progress unavailable, listing without status");
            println!("⚠️  Progress unavailable ({}), status not shown\n", e);
            None
        }
    };
    print!("{}", render_manifest(&manifest, progress.as_ref()));
    println!("\n✅ Total: {} exercise(s)", manifest.total_entries());

    Ok(())
}

/// Print the progress summary
pub async fn show_progress(ctx: &EngineContext, json: bool) -> Result<()> {
    let progress = ctx.load_progress().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    let passed = progress
        .exercises
        .values()
        .filter(|e| e.status == ExerciseStatus::Pass)
        .count();

    println!("📊 {} progress\n", ctx.course.name);
    println!("  XP:             {}", progress.stats.total_xp);
    println!(
        "  Streak:         {} day(s) (best {})",
        progress.stats.current_streak, progress.stats.longest_streak
    );
    println!("  Exercises:      {}/{}", passed, progress.stats.total_exercises);
    println!(
        "  Quizzes passed: {}",
        progress.quizzes.values().filter(|q| q.passed).count()
    );
    if let Some(date) = progress.stats.last_active_date {
        println!("  Last active:    {}", date);
    }

    Ok(())
}

pub async fn record_quiz(
    ctx: &EngineContext,
    id: &str,
    passed: bool,
    score: Option<u32>,
    total: Option<u32>,
    json: bool,
) -> Result<()> {
    let outcome = progy_engine::record_quiz(ctx, id, passed, score, total)
        .await
        .context("Failed to record quiz result")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let icon = if passed { "✅" } else { "❌" };
    match (score, total) {
        (Some(score), Some(total)) => println!("{} Quiz {}: {}/{}", icon, id, score, total),
        _ => println!("{} Quiz {}", icon, id),
    }
    if outcome.xp_awarded > 0 {
        println!("⭐ +{} XP", outcome.xp_awarded);
    }

    Ok(())
}

/// Run the course's setup checks. Returns whether every check passed.
pub async fn check_setup(ctx: &EngineContext, json: bool) -> Result<bool> {
    let results = run_setup_checks(&ctx.course.setup).await;
    let ok = results.iter().all(|r| r.status == CheckStatus::Pass);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(ok);
    }

    if results.is_empty() {
        println!("No setup checks declared by this course.");
        return Ok(true);
    }

    println!("🔧 Checking environment:\n");
    for result in &results {
        let icon = match result.status {
            CheckStatus::Pass => "✅",
            CheckStatus::Fail => "❌",
        };
        println!("  {} {:<24} {}", icon, result.name, result.message);
    }

    if !ok {
        if let Some(guide) = &ctx.course.setup.guide {
            println!("\n💡 See {} for installation instructions", guide);
        }
    }

    Ok(ok)
}

/// Status icon of an entry; blank when progress could not be loaded
fn entry_marker(entry: &ManifestEntry, progress: Option<&Progress>) -> &'static str {
    if entry.is_locked {
        return "🔒";
    }
    match progress.and_then(|p| p.exercise(&entry.id)).map(|e| e.status) {
        Some(ExerciseStatus::Pass) => "✅",
        Some(ExerciseStatus::Fail) => "❌",
        None => "  ",
    }
}

fn render_manifest(manifest: &Manifest, progress: Option<&Progress>) -> String {
    let mut out = String::new();

    for module in &manifest.modules {
        let title = module
            .entries
            .first()
            .map(|e| e.module_title.as_str())
            .unwrap_or(&module.module);
        out.push_str(&format!("📦 {}\n", title));

        for entry in &module.entries {
            out.push_str(&format!(
                "  {} {:<40} {}\n",
                entry_marker(entry, progress),
                entry.id,
                entry.friendly_name
            ));
            if let Some(reason) = &entry.lock_reason {
                out.push_str(&format!("       {}\n", reason));
            }
        }
    }

    out
}
