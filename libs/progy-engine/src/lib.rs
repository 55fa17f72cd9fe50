pub mod config;
pub mod content;
pub mod context;
pub mod docker;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod manifest;
pub mod resolver;
pub mod runner;
pub mod setup;
pub mod store;
pub mod tutor;

#[cfg(test)]
mod engine_tests;

pub use context::EngineContext;
pub use executor::{record_quiz, run_exercise, ExerciseRun, RunOutcome};
