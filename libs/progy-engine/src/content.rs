// Exercise source, markdown and quiz retrieval through the two layers
use crate::manifest::QUIZ_FILE;
use crate::resolver::{find_entry_file, PathResolver};
use progy_common::error::EngineError;
use serde::Serialize;
use std::fs;

pub const NO_ENTRY_PLACEHOLDER: &str = "// No entry file found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExerciseContent {
    pub code: String,
    pub markdown: Option<String>,
}

/// Source of an exercise (its entry file for directories) plus the optional
/// markdown next to it
pub fn read_code(
    resolver: &PathResolver,
    path: &str,
    markdown_path: Option<&str>,
) -> Result<ExerciseContent, EngineError> {
    let resolved = resolver.resolve(path)?;

    let code = if resolved.absolute.is_dir() {
        match find_entry_file(&resolved.absolute) {
            Some(entry) => {
                // The entry is containment-checked like any other path
                let child = format!("{}/{}", path.trim_end_matches('/'), entry);
                fs::read_to_string(resolver.resolve(&child)?.absolute)?
            }
            None => NO_ENTRY_PLACEHOLDER.to_string(),
        }
    } else {
        fs::read_to_string(&resolved.absolute)?
    };

    let markdown = markdown_path
        .and_then(|md| resolver.resolve(md).ok())
        .filter(|md| md.absolute.is_file())
        .and_then(|md| fs::read_to_string(md.absolute).ok());

    Ok(ExerciseContent { code, markdown })
}

/// `quiz.json` of an exercise directory, the directory holding a file
/// exercise, or the quiz file itself
pub fn read_quiz(resolver: &PathResolver, path: &str) -> Result<serde_json::Value, EngineError> {
    let path = path.trim_end_matches('/');
    let quiz_path = if path.ends_with(QUIZ_FILE) {
        path.to_string()
    } else {
        let is_file = resolver
            .resolve(path)
            .map(|resolved| resolved.absolute.is_file())
            .unwrap_or(false);
        match path.rsplit_once('/') {
            Some((dir, _)) if is_file => format!("{}/{}", dir, QUIZ_FILE),
            _ => format!("{}/{}", path, QUIZ_FILE),
        }
    };

    let resolved = resolver.resolve(&quiz_path)?;
    let content = fs::read_to_string(&resolved.absolute)?;
    serde_json::from_str(&content)
        .map_err(|e| EngineError::Configuration(format!("Invalid quiz file {}: {}", quiz_path, e)))
}
