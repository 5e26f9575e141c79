//! Proposed-diff packaging and validation.
//!
//! Judges may attach a unified diff with concrete fixes. This module parses
//! the diff into per-file changes, validates it against size limits, orders
//! test-file changes first, and attaches verification commands for the
//! touched file types.

use serde::{Deserialize, Serialize};

/// A changed file within a proposed diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Path on the `+++` side
    pub path: String,
    /// Whether the path looks like a test file
    pub is_test: bool,
    /// Added line count
    pub lines_added: usize,
    /// Removed line count
    pub lines_removed: usize,
    /// Number of hunks touching this file
    pub hunks: usize,
    /// Largest hunk, in total lines
    pub largest_hunk: usize,
}

/// Validation outcome for one proposed diff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffValidation {
    /// Whether the diff is within every limit
    pub valid: bool,
    /// Total changed lines across files
    pub total_lines: usize,
    /// Limit violations, empty when valid
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
}

/// A validated fix proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedDiff {
    /// The unified diff text
    pub unified_diff: String,
    /// Per-file changes, test files first
    pub file_changes: Vec<FileChange>,
    /// Size validation outcome
    pub validation: DiffValidation,
    /// Commands that verify the fix once applied
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_commands: Vec<String>,
}

/// Diff size limits.
#[derive(Debug, Clone)]
pub struct DiffConfig {
    /// Maximum changed lines per diff
    pub max_lines_per_diff: usize,
    /// Maximum files per diff
    pub max_files_per_diff: usize,
    /// Maximum lines in a single hunk
    pub max_hunk_size: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_lines_per_diff: 500,
            max_files_per_diff: 10,
            max_hunk_size: 100,
        }
    }
}

/// Parses and validates proposed diffs.
#[derive(Debug, Clone, Default)]
pub struct DiffBuilder {
    config: DiffConfig,
}

impl DiffBuilder {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    /// Package a raw unified diff, or nothing when no diff was proposed.
    pub fn build(&self, unified_diff: Option<&str>) -> Vec<ProposedDiff> {
        let Some(diff) = unified_diff.filter(|d| !d.trim().is_empty()) else {
            return Vec::new();
        };

        let mut file_changes = parse_file_changes(diff);
        // Test changes first so verification starts from the tests.
        file_changes.sort_by_key(|f| (!f.is_test, f.path.clone()));

        let total_lines: usize = file_changes
            .iter()
            .map(|f| f.lines_added + f.lines_removed)
            .sum();

        let mut violations = Vec::new();
        if total_lines > self.config.max_lines_per_diff {
            violations.push(format!(
                "{} changed lines exceed the {}-line limit",
                total_lines, self.config.max_lines_per_diff
            ));
        }
        if file_changes.len() > self.config.max_files_per_diff {
            violations.push(format!(
                "{} files exceed the {}-file limit",
                file_changes.len(),
                self.config.max_files_per_diff
            ));
        }
        for change in &file_changes {
            if change.largest_hunk > self.config.max_hunk_size {
                violations.push(format!(
                    "hunk of {} lines in {} exceeds the {}-line limit",
                    change.largest_hunk, change.path, self.config.max_hunk_size
                ));
            }
        }

        let verification_commands = verification_commands(&file_changes);

        vec![ProposedDiff {
            unified_diff: diff.to_string(),
            validation: DiffValidation {
                valid: violations.is_empty(),
                total_lines,
                violations,
            },
            file_changes,
            verification_commands,
        }]
    }
}

fn parse_file_changes(diff: &str) -> Vec<FileChange> {
    let mut changes: Vec<FileChange> = Vec::new();
    let mut current: Option<FileChange> = None;
    let mut hunk_size = 0usize;

    let mut close_hunk = |current: &mut Option<FileChange>, hunk_size: &mut usize| {
        if let Some(change) = current.as_mut() {
            if *hunk_size > 0 {
                change.largest_hunk = change.largest_hunk.max(*hunk_size);
            }
        }
        *hunk_size = 0;
    };

    for line in diff.lines() {
        if let Some(path) = line.strip_prefix("+++ ") {
            close_hunk(&mut current, &mut hunk_size);
            if let Some(change) = current.take() {
                changes.push(change);
            }
            let path = path
                .trim()
                .trim_start_matches("b/")
                .to_string();
            current = Some(FileChange {
                is_test: looks_like_test(&path),
                path,
                lines_added: 0,
                lines_removed: 0,
                hunks: 0,
                largest_hunk: 0,
            });
        } else if line.starts_with("@@") {
            close_hunk(&mut current, &mut hunk_size);
            if let Some(change) = current.as_mut() {
                change.hunks += 1;
            }
        } else if let Some(change) = current.as_mut() {
            if line.starts_with("--- ") || line.starts_with("diff ") || line.starts_with("index ") {
                continue;
            }
            if change.hunks > 0 {
                hunk_size += 1;
            }
            if line.starts_with('+') {
                change.lines_added += 1;
            } else if line.starts_with('-') {
                change.lines_removed += 1;
            }
        }
    }

    close_hunk(&mut current, &mut hunk_size);
    if let Some(change) = current {
        changes.push(change);
    }
    changes
}

fn looks_like_test(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("/tests/")
        || lower.starts_with("tests/")
        || lower.contains("_test.")
        || lower.contains(".test.")
        || lower.contains("test_")
        || lower.ends_with("_spec.rb")
        || lower.contains(".spec.")
}

fn verification_commands(changes: &[FileChange]) -> Vec<String> {
    let mut commands = Vec::new();
    let has_ext = |ext: &str| changes.iter().any(|c| c.path.ends_with(ext));

    if has_ext(".rs") {
        commands.push("cargo check".to_string());
        commands.push("cargo test".to_string());
    }
    if has_ext(".py") {
        commands.push("pytest".to_string());
    }
    if has_ext(".ts") || has_ext(".js") || has_ext(".tsx") {
        commands.push("npm test".to_string());
    }
    if has_ext(".go") {
        commands.push("go test ./...".to_string());
    }
    if commands.is_empty() && !changes.is_empty() {
        commands.push("run the project test suite".to_string());
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn a() {
-    1
+    2
+    // note
 }
--- a/tests/lib_test.rs
+++ b/tests/lib_test.rs
@@ -1,2 +1,3 @@
 #[test]
+fn test_two() {}
 fn test_one() {}
";

    #[test]
    fn test_parse_counts_files_and_lines() {
        let diffs = DiffBuilder::default().build(Some(SAMPLE));
        assert_eq!(diffs.len(), 1);
        let diff = &diffs[0];
        assert_eq!(diff.file_changes.len(), 2);
        assert!(diff.validation.valid);
        assert_eq!(diff.validation.total_lines, 4);
    }

    #[test]
    fn test_test_files_sorted_first() {
        let diffs = DiffBuilder::default().build(Some(SAMPLE));
        let first = &diffs[0].file_changes[0];
        assert!(first.is_test);
        assert_eq!(first.path, "tests/lib_test.rs");
    }

    #[test]
    fn test_verification_commands_for_rust() {
        let diffs = DiffBuilder::default().build(Some(SAMPLE));
        assert!(diffs[0]
            .verification_commands
            .contains(&"cargo test".to_string()));
    }

    #[test]
    fn test_line_limit_violation() {
        let mut big = String::from("--- a/src/big.rs\n+++ b/src/big.rs\n@@ -1,3 +1,600 @@\n");
        for i in 0..600 {
            big.push_str(&format!("+line {}\n", i));
        }
        let builder = DiffBuilder::new(DiffConfig {
            max_lines_per_diff: 500,
            max_files_per_diff: 10,
            max_hunk_size: 1000,
        });
        let diffs = builder.build(Some(&big));
        assert!(!diffs[0].validation.valid);
        assert!(diffs[0].validation.violations[0].contains("500-line"));
    }

    #[test]
    fn test_hunk_size_violation() {
        let mut big = String::from("--- a/src/big.rs\n+++ b/src/big.rs\n@@ -1,3 +1,200 @@\n");
        for i in 0..150 {
            big.push_str(&format!("+line {}\n", i));
        }
        let builder = DiffBuilder::new(DiffConfig {
            max_hunk_size: 100,
            ..Default::default()
        });
        let diffs = builder.build(Some(&big));
        assert!(!diffs[0].validation.valid);
        assert!(diffs[0].validation.violations[0].contains("hunk"));
    }

    #[test]
    fn test_empty_or_missing_diff() {
        assert!(DiffBuilder::default().build(None).is_empty());
        assert!(DiffBuilder::default().build(Some("   ")).is_empty());
    }
}
