mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "progy")]
#[command(about = "Progy - Run exercises, check progress and verify your setup", long_about = None)]
struct Cli {
    /// Print machine-readable JSON instead of the formatted report
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an exercise and record the attempt
    Run {
        /// Exercise id (e.g., 01_intro/01_hello)
        id: String,
    },

    /// List modules and exercises of the current course
    Exercises,

    /// Show XP, streak and completed exercises
    Progress,

    /// Record a quiz result
    Quiz {
        /// Quiz id (usually the exercise id)
        id: String,

        /// Mark the quiz as passed
        #[arg(long, default_value = "false")]
        passed: bool,

        /// Number of correct answers
        #[arg(short, long)]
        score: Option<u32>,

        /// Number of questions in the quiz
        #[arg(short, long)]
        total: Option<u32>,
    },

    /// Check that the course toolchain is installed
    Setup,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("PROGY_LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Logs go to stderr, reports to stdout
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ctx = commands::load_context()?;

    match cli.command {
        Commands::Run { id } => {
            let passed = commands::run(&ctx, &id, cli.json).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Exercises => {
            commands::list_exercises(&ctx, cli.json).await?;
        }
        Commands::Progress => {
            commands::show_progress(&ctx, cli.json).await?;
        }
        Commands::Quiz {
            id,
            passed,
            score,
            total,
        } => {
            commands::record_quiz(&ctx, &id, passed, score, total, cli.json).await?;
        }
        Commands::Setup => {
            let ok = commands::check_setup(&ctx, cli.json).await?;
            if !ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
