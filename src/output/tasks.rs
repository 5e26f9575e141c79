//! Follow-up task list generation.
//!
//! Turns critical issues, evidence rows, unmet acceptance criteria, and
//! missing tests into a categorized, prioritized task list with optional
//! effort estimates.

use serde::{Deserialize, Serialize};

use crate::output::evidence::EvidenceTable;
use crate::output::traceability::TraceabilityMatrix;
use crate::types::Severity;

/// Task category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    BugFix,
    Security,
    Testing,
    Traceability,
    Refactoring,
    Documentation,
}

impl TaskCategory {
    /// Base effort in hours for a task of this category.
    fn base_effort_hours(&self) -> f64 {
        match self {
            Self::Security => 4.0,
            Self::BugFix => 2.0,
            Self::Testing => 1.5,
            Self::Traceability => 3.0,
            Self::Refactoring => 3.0,
            Self::Documentation => 0.5,
        }
    }

    /// Lower ranks first under impact-based prioritization.
    fn impact_rank(&self) -> u8 {
        match self {
            Self::Security => 0,
            Self::BugFix => 1,
            Self::Traceability => 2,
            Self::Testing => 3,
            Self::Refactoring => 4,
            Self::Documentation => 5,
        }
    }
}

/// Prioritization strategy for the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPrioritization {
    /// Severity drives order
    #[default]
    SeverityFirst,
    /// Category impact drives order
    ImpactBased,
    /// Cheapest tasks first
    EffortWeighted,
    /// Fixes before the tests that depend on them
    DependencyAware,
}

/// One follow-up task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpTask {
    /// Stable id, `task-1` onward after sorting
    pub id: String,
    /// Imperative task title
    pub title: String,
    /// Task category
    pub category: TaskCategory,
    /// 1 is highest
    pub priority: u8,
    /// Estimated effort in hours, when estimation is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_hours: Option<f64>,
    /// Evidence row or criterion id this task came from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// The assembled task list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpTasks {
    /// Tasks in priority order
    pub tasks: Vec<FollowUpTask>,
    /// One-line rollup
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
}

/// Task list knobs.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Ordering strategy
    pub prioritization: TaskPrioritization,
    /// Whether to attach effort estimates
    pub include_effort_estimates: bool,
    /// Maximum tasks kept after sorting
    pub max_tasks: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            prioritization: TaskPrioritization::SeverityFirst,
            include_effort_estimates: true,
            max_tasks: 20,
        }
    }
}

/// Builds follow-up task lists.
#[derive(Debug, Clone, Default)]
pub struct TaskBuilder {
    config: TaskConfig,
}

impl TaskBuilder {
    pub fn new(config: TaskConfig) -> Self {
        Self { config }
    }

    /// Derive tasks from evidence and traceability gaps.
    pub fn build(&self, evidence: &EvidenceTable, traceability: &TraceabilityMatrix) -> FollowUpTasks {
        let mut tasks: Vec<FollowUpTask> = Vec::new();

        for entry in &evidence.entries {
            if entry.severity == Severity::Minor && tasks.len() >= self.config.max_tasks {
                continue;
            }
            let category = category_for(&entry.category);
            let complexity = complexity_multiplier(entry.severity);
            tasks.push(FollowUpTask {
                id: String::new(),
                title: entry
                    .fix_summary
                    .clone()
                    .unwrap_or_else(|| format!("Fix: {} ({})", entry.issue, entry.location)),
                category,
                priority: priority_for(entry.severity),
                effort_hours: self
                    .config
                    .include_effort_estimates
                    .then(|| category.base_effort_hours() * complexity),
                source: entry.id.clone(),
            });
        }

        for unmet in &traceability.unmet_acs {
            tasks.push(FollowUpTask {
                id: String::new(),
                title: format!("Implement unmet criterion {}: {}", unmet.ac_id, unmet.ac_text),
                category: TaskCategory::Traceability,
                priority: unmet.priority,
                effort_hours: self
                    .config
                    .include_effort_estimates
                    .then(|| TaskCategory::Traceability.base_effort_hours()),
                source: unmet.ac_id.clone(),
            });
        }

        for missing in &traceability.missing_tests {
            tasks.push(FollowUpTask {
                id: String::new(),
                title: missing.suggestion.clone(),
                category: TaskCategory::Testing,
                priority: missing.priority,
                effort_hours: self
                    .config
                    .include_effort_estimates
                    .then(|| TaskCategory::Testing.base_effort_hours()),
                source: missing.ac_id.clone(),
            });
        }

        self.sort(&mut tasks);
        tasks.truncate(self.config.max_tasks);
        for (i, task) in tasks.iter_mut().enumerate() {
            task.id = format!("task-{}", i + 1);
        }

        let highest = tasks.iter().filter(|t| t.priority == 1).count();
        let summary = format!(
            "{} follow-up task(s), {} at top priority",
            tasks.len(),
            highest
        );

        FollowUpTasks { tasks, summary }
    }

    fn sort(&self, tasks: &mut [FollowUpTask]) {
        match self.config.prioritization {
            TaskPrioritization::SeverityFirst => {
                tasks.sort_by_key(|t| (t.priority, t.category.impact_rank()));
            }
            TaskPrioritization::ImpactBased => {
                tasks.sort_by_key(|t| (t.category.impact_rank(), t.priority));
            }
            TaskPrioritization::EffortWeighted => {
                tasks.sort_by(|a, b| {
                    let ea = a.effort_hours.unwrap_or(f64::MAX);
                    let eb = b.effort_hours.unwrap_or(f64::MAX);
                    ea.partial_cmp(&eb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.priority.cmp(&b.priority))
                });
            }
            TaskPrioritization::DependencyAware => {
                // Implementation work unblocks tests; docs last.
                tasks.sort_by_key(|t| {
                    let phase = match t.category {
                        TaskCategory::Security | TaskCategory::BugFix | TaskCategory::Traceability => 0,
                        TaskCategory::Refactoring => 1,
                        TaskCategory::Testing => 2,
                        TaskCategory::Documentation => 3,
                    };
                    (phase, t.priority)
                });
            }
        }
    }
}

fn category_for(evidence_category: &str) -> TaskCategory {
    match evidence_category.to_ascii_lowercase().as_str() {
        "security" => TaskCategory::Security,
        "testing" => TaskCategory::Testing,
        "documentation" | "docs" => TaskCategory::Documentation,
        "maintainability" | "style" | "refactoring" => TaskCategory::Refactoring,
        _ => TaskCategory::BugFix,
    }
}

fn priority_for(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 1,
        Severity::Major => 2,
        Severity::Minor => 3,
    }
}

fn complexity_multiplier(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 2.0,
        Severity::Major => 1.5,
        Severity::Minor => 1.0,
    }
}
