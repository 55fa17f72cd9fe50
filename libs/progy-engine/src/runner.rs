// Runner command templating
//
// Placeholders are replaced by literal substring substitution only. Unknown
// placeholders pass through verbatim.

use progy_common::config::RunnerConfig;
use progy_common::types::ExerciseIdentity;

pub const EXERCISE_PLACEHOLDER: &str = "{{exercise}}";
pub const ID_PLACEHOLDER: &str = "{{id}}";
pub const MODULE_PLACEHOLDER: &str = "{{module}}";

/// Values substituted into a runner template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    /// Path of the exercise as the chosen strategy sees it
    pub exercise: String,
    pub id: String,
    pub module: String,
}

impl TemplateValues {
    pub fn new(identity: &ExerciseIdentity, exercise_path: impl Into<String>) -> Self {
        Self {
            exercise: exercise_path.into(),
            id: identity.id.clone(),
            module: identity.module.clone(),
        }
    }

    pub fn expand(&self, template: &str) -> String {
        template
            .replace(EXERCISE_PLACEHOLDER, &self.exercise)
            .replace(ID_PLACEHOLDER, &self.id)
            .replace(MODULE_PLACEHOLDER, &self.module)
    }
}

/// Runner invocation after substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

impl RunnerInvocation {
    /// Single command line for `sh -c`, used by the container strategies
    pub fn shell_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Expand command, each arg and cwd of a runner
pub fn render_invocation(runner: &RunnerConfig, values: &TemplateValues) -> RunnerInvocation {
    RunnerInvocation {
        command: values.expand(&runner.command),
        args: runner.args.iter().map(|a| values.expand(a)).collect(),
        cwd: runner.cwd.as_deref().map(|c| values.expand(c)),
    }
}

/// Argument vector for a host spawn
///
/// The command template is split on whitespace before substitution, so a
/// `"sh {{exercise}}"` command runs `sh` and an expanded path containing
/// spaces stays one argument.
pub fn render_argv(runner: &RunnerConfig, values: &TemplateValues) -> Vec<String> {
    runner
        .command
        .split_whitespace()
        .chain(runner.args.iter().map(String::as_str))
        .map(|token| values.expand(token))
        .collect()
}
