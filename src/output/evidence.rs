//! Evidence table assembly.
//!
//! Collects findings from step results, dimension evaluations, and any
//! additional evidence, deduplicates them, sorts by severity and category
//! importance, caps the table, and optionally groups entries by file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::judge::Finding;
use crate::types::Severity;

/// One row of the evidence table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceEntry {
    /// Stable row id, `ev-1` onward after sorting
    pub id: String,
    /// Short issue statement
    pub issue: String,
    /// How bad it is
    pub severity: Severity,
    /// Finding category
    pub category: String,
    /// Where it was observed
    pub location: String,
    /// Evidence backing the finding
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proof: String,
    /// One-line fix sketch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_summary: Option<String>,
}

/// The assembled evidence table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceTable {
    /// Rows, severity-sorted
    pub entries: Vec<EvidenceEntry>,
    /// One-line rollup of the table
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    /// Entries grouped by file, when grouping is enabled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_file: Vec<FileGroup>,
}

/// Entries that share a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGroup {
    /// File path, or "(unlocated)" for findings without one
    pub file: String,
    /// Row ids in this file
    pub entry_ids: Vec<String>,
}

/// Evidence table knobs.
#[derive(Debug, Clone)]
pub struct EvidenceConfig {
    /// Maximum rows kept after sorting
    pub max_entries: usize,
    /// Whether to emit the by-file grouping
    pub group_by_file: bool,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            max_entries: 50,
            group_by_file: true,
        }
    }
}

/// Builds evidence tables from collected findings.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBuilder {
    config: EvidenceConfig,
}

impl EvidenceBuilder {
    pub fn new(config: EvidenceConfig) -> Self {
        Self { config }
    }

    /// Collect, dedupe, sort, cap, and group findings into a table.
    pub fn build<'a>(&self, findings: impl IntoIterator<Item = &'a Finding>) -> EvidenceTable {
        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut unique: Vec<&Finding> = Vec::new();

        for finding in findings {
            let key = (
                finding.category.to_lowercase(),
                finding.location.to_lowercase(),
                finding.issue.to_lowercase(),
            );
            if seen.insert(key) {
                unique.push(finding);
            }
        }

        unique.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| category_rank(&a.category).cmp(&category_rank(&b.category)))
                .then_with(|| a.location.cmp(&b.location))
        });

        let dropped = unique.len().saturating_sub(self.config.max_entries);
        unique.truncate(self.config.max_entries);

        let entries: Vec<EvidenceEntry> = unique
            .into_iter()
            .enumerate()
            .map(|(i, f)| EvidenceEntry {
                id: format!("ev-{}", i + 1),
                issue: f.issue.clone(),
                severity: f.severity,
                category: f.category.clone(),
                location: f.location.clone(),
                proof: f.proof.clone(),
                fix_summary: f.fix_summary.clone(),
            })
            .collect();

        let critical = entries
            .iter()
            .filter(|e| e.severity == Severity::Critical)
            .count();
        let major = entries
            .iter()
            .filter(|e| e.severity == Severity::Major)
            .count();
        let minor = entries.len() - critical - major;

        let mut summary = format!(
            "{} finding(s): {} critical, {} major, {} minor",
            entries.len(),
            critical,
            major,
            minor
        );
        if dropped > 0 {
            summary.push_str(&format!(" ({} lower-severity rows dropped)", dropped));
        }

        let by_file = if self.config.group_by_file {
            group_by_file(&entries)
        } else {
            Vec::new()
        };

        EvidenceTable {
            entries,
            summary,
            by_file,
        }
    }
}

/// Lower rank sorts first within a severity band.
fn category_rank(category: &str) -> u8 {
    match category.to_ascii_lowercase().as_str() {
        "security" => 0,
        "logic" | "logic_error" | "correctness" => 1,
        "error_handling" => 2,
        "testing" => 3,
        "performance" => 4,
        "api" | "api_misuse" => 5,
        "maintainability" | "style" => 6,
        "documentation" => 7,
        _ => 8,
    }
}

fn group_by_file(entries: &[EvidenceEntry]) -> Vec<FileGroup> {
    let mut groups: Vec<FileGroup> = Vec::new();
    for entry in entries {
        let file = entry
            .location
            .split(':')
            .next()
            .filter(|f| !f.is_empty())
            .unwrap_or("(unlocated)")
            .to_string();
        match groups.iter_mut().find(|g| g.file == file) {
            Some(group) => group.entry_ids.push(entry.id.clone()),
            None => groups.push(FileGroup {
                file,
                entry_ids: vec![entry.id.clone()],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity, category: &str, location: &str, issue: &str) -> Finding {
        Finding::new(severity, category, location, issue)
    }

    #[test]
    fn test_dedupe_by_category_location_issue() {
        let findings = vec![
            finding(Severity::Major, "logic", "src/a.rs:1", "off by one"),
            finding(Severity::Major, "logic", "src/a.rs:1", "Off by one"),
            finding(Severity::Major, "logic", "src/a.rs:2", "off by one"),
        ];
        let table = EvidenceBuilder::default().build(&findings);
        assert_eq!(table.entries.len(), 2);
    }

    #[test]
    fn test_sorted_by_severity_then_category() {
        let findings = vec![
            finding(Severity::Minor, "style", "src/a.rs:1", "long line"),
            finding(Severity::Critical, "testing", "src/b.rs:1", "no tests"),
            finding(Severity::Critical, "security", "src/c.rs:1", "injection"),
            finding(Severity::Major, "logic", "src/d.rs:1", "bad bound"),
        ];
        let table = EvidenceBuilder::default().build(&findings);
        let order: Vec<&str> = table.entries.iter().map(|e| e.category.as_str()).collect();
        assert_eq!(order, vec!["security", "testing", "logic", "style"]);
        assert_eq!(table.entries[0].id, "ev-1");
    }

    #[test]
    fn test_cap_drops_tail_and_notes_it() {
        let findings: Vec<Finding> = (0..10)
            .map(|i| finding(Severity::Minor, "style", &format!("src/a.rs:{}", i), &format!("issue {}", i)))
            .collect();
        let builder = EvidenceBuilder::new(EvidenceConfig {
            max_entries: 4,
            group_by_file: false,
        });
        let table = builder.build(&findings);
        assert_eq!(table.entries.len(), 4);
        assert!(table.summary.contains("dropped"));
    }

    #[test]
    fn test_group_by_file() {
        let findings = vec![
            finding(Severity::Major, "logic", "src/a.rs:1", "one"),
            finding(Severity::Major, "logic", "src/a.rs:9", "two"),
            finding(Severity::Minor, "style", "src/b.rs:2", "three"),
        ];
        let table = EvidenceBuilder::default().build(&findings);
        assert_eq!(table.by_file.len(), 2);
        let a = table.by_file.iter().find(|g| g.file == "src/a.rs").unwrap();
        assert_eq!(a.entry_ids.len(), 2);
    }

    #[test]
    fn test_empty_findings() {
        let table = EvidenceBuilder::default().build(&[]);
        assert!(table.entries.is_empty());
        assert!(table.summary.starts_with("0 finding"));
    }
}
