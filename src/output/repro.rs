//! Reproduction guide generation.
//!
//! Produces ordered, numbered steps a reader can follow to observe the
//! reported findings, plus verification steps with explicit success criteria
//! and failure indicators.

use serde::{Deserialize, Serialize};

use crate::output::diff::ProposedDiff;
use crate::output::evidence::EvidenceTable;
use crate::types::Severity;

/// One numbered reproduction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideStep {
    /// 1-based step number
    pub number: usize,
    /// What to do
    pub description: String,
    /// Command to run, when one applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// What the output should show
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
}

/// One verification step with explicit pass/fail signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStep {
    /// 1-based step number
    pub number: usize,
    /// What to verify
    pub description: String,
    /// Command to run
    pub command: String,
    /// What success looks like
    pub success_criteria: String,
    /// Signals that the verification failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_indicators: Vec<String>,
}

/// The assembled reproduction guide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReproductionGuide {
    /// Steps to observe the findings
    pub reproduction_steps: Vec<GuideStep>,
    /// Steps to verify a fix
    pub verification_steps: Vec<VerificationStep>,
    /// Test commands worth running
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_commands: Vec<String>,
    /// Non-test validation commands (lint, build)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_commands: Vec<String>,
}

/// Reproduction guide knobs.
#[derive(Debug, Clone)]
pub struct ReproConfig {
    /// Maximum findings turned into reproduction steps
    pub max_steps: usize,
}

impl Default for ReproConfig {
    fn default() -> Self {
        Self { max_steps: 10 }
    }
}

/// Builds reproduction guides from evidence and proposed diffs.
#[derive(Debug, Clone, Default)]
pub struct ReproBuilder {
    config: ReproConfig,
}

impl ReproBuilder {
    pub fn new(config: ReproConfig) -> Self {
        Self { config }
    }

    /// Compose the guide. Critical and major findings become reproduction
    /// steps; diff verification commands become verification steps.
    pub fn build(&self, evidence: &EvidenceTable, diffs: &[ProposedDiff]) -> ReproductionGuide {
        let mut reproduction_steps = Vec::new();

        for entry in evidence
            .entries
            .iter()
            .filter(|e| e.severity != Severity::Minor)
            .take(self.config.max_steps)
        {
            let number = reproduction_steps.len() + 1;
            reproduction_steps.push(GuideStep {
                number,
                description: format!("Observe '{}' at {}", entry.issue, entry.location),
                command: command_for_location(&entry.location),
                expected_output: if entry.proof.is_empty() {
                    None
                } else {
                    Some(entry.proof.clone())
                },
            });
        }

        let mut test_commands: Vec<String> = Vec::new();
        let mut validation_commands: Vec<String> = Vec::new();
        for diff in diffs {
            for command in &diff.verification_commands {
                let bucket = if command.contains("test") {
                    &mut test_commands
                } else {
                    &mut validation_commands
                };
                if !bucket.contains(command) {
                    bucket.push(command.clone());
                }
            }
        }

        let verification_steps: Vec<VerificationStep> = test_commands
            .iter()
            .chain(validation_commands.iter())
            .enumerate()
            .map(|(i, command)| VerificationStep {
                number: i + 1,
                description: format!("Run `{}` after applying the fix", command),
                command: command.clone(),
                success_criteria: "exits with status 0 and reports no failures".to_string(),
                failure_indicators: vec![
                    "non-zero exit status".to_string(),
                    "failed or panicked test cases".to_string(),
                ],
            })
            .collect();

        ReproductionGuide {
            reproduction_steps,
            verification_steps,
            test_commands,
            validation_commands,
        }
    }
}

fn command_for_location(location: &str) -> Option<String> {
    let file = location.split(':').next()?;
    if file.ends_with(".rs") {
        Some("cargo test".to_string())
    } else if file.ends_with(".py") {
        Some(format!("pytest {}", file))
    } else if file.ends_with(".ts") || file.ends_with(".js") {
        Some("npm test".to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::Finding;
    use crate::output::diff::DiffBuilder;
    use crate::output::evidence::EvidenceBuilder;

    fn evidence() -> EvidenceTable {
        EvidenceBuilder::default().build(&[
            Finding::new(Severity::Critical, "logic", "src/a.rs:3", "wrong bound")
                .with_proof("loop runs one short"),
            Finding::new(Severity::Minor, "style", "src/a.rs:9", "long line"),
        ])
    }

    #[test]
    fn test_minor_findings_not_reproduced() {
        let guide = ReproBuilder::default().build(&evidence(), &[]);
        assert_eq!(guide.reproduction_steps.len(), 1);
        assert!(guide.reproduction_steps[0].description.contains("wrong bound"));
    }

    #[test]
    fn test_steps_are_numbered_from_one() {
        let guide = ReproBuilder::default().build(&evidence(), &[]);
        assert_eq!(guide.reproduction_steps[0].number, 1);
    }

    #[test]
    fn test_proof_becomes_expected_output() {
        let guide = ReproBuilder::default().build(&evidence(), &[]);
        assert_eq!(
            guide.reproduction_steps[0].expected_output.as_deref(),
            Some("loop runs one short")
        );
    }

    #[test]
    fn test_verification_from_diff_commands() {
        let diffs = DiffBuilder::default().build(Some(
            "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1 +1 @@\n-a\n+b\n",
        ));
        let guide = ReproBuilder::default().build(&evidence(), &diffs);
        assert!(!guide.verification_steps.is_empty());
        assert!(guide.test_commands.contains(&"cargo test".to_string()));
        assert!(guide.validation_commands.contains(&"cargo check".to_string()));
        assert!(guide.verification_steps[0]
            .success_criteria
            .contains("status 0"));
    }
}
