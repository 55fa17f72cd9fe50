// Environment checks declared by the course (`setup.checks`)
use crate::engine::run_process;
use progy_common::config::SetupConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

/// Run every `command` check; exit 0 means the tool was found.
/// Checks of other types are skipped.
pub async fn run_setup_checks(setup: &SetupConfig) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for check in setup.checks.iter().filter(|c| c.kind == "command") {
        let mut parts = check.command.split_whitespace();
        let Some(program) = parts.next() else {
            continue;
        };
        let args: Vec<String> = parts.map(str::to_string).collect();

        let passed = match run_process(program, &args, None, CHECK_TIMEOUT).await {
            Ok(result) => result.exit_code == 0,
            Err(e) => {
                debug!(check = %check.name, error = %e, "Setup check could not run");
                false
            }
        };

        results.push(CheckResult {
            name: check.name.clone(),
            status: if passed { CheckStatus::Pass } else { CheckStatus::Fail },
            message: if passed { "Found" } else { "Not found" }.to_string(),
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use progy_common::config::SetupCheck;

    fn check(name: &str, kind: &str, command: &str) -> SetupCheck {
        SetupCheck {
            name: name.to_string(),
            kind: kind.to_string(),
            command: command.to_string(),
        }
    }

    #[tokio::test]
    async fn test_command_checks() {
        let setup = SetupConfig {
            checks: vec![
                check("Shell", "command", "sh -c true"),
                check("Failing", "command", "sh -c false"),
                check("Missing", "command", "progy-no-such-tool --version"),
                check("Manual", "manual", "read the docs"),
                check("Empty", "command", "   "),
            ],
            guide: None,
        };

        let results = run_setup_checks(&setup).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[0].message, "Found");
        assert_eq!(results[1].status, CheckStatus::Fail);
        assert_eq!(results[2].status, CheckStatus::Fail);
        assert_eq!(results[2].message, "Not found");
    }
}
