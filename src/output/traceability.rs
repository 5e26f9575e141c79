//! Acceptance-criteria traceability matrix.
//!
//! Maps each acceptance criterion to the implementation and test locations
//! that appear to satisfy it. Confidence combines direct criterion-id
//! references (weight 80) with keyword overlap (weight 20); both weights and
//! the coverage threshold are tunable knobs, not proven policy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::judge::Citation;

/// Matches `AC-1:`-style criterion lines and checklist bullets.
static AC_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:-\s*\[[ xX]?\]\s*|(?:AC[-_]?(\d+))[:.)]\s*|\d+[.)]\s+)(.+)$")
        .expect("ac line regex")
});

/// An acceptance criterion extracted from the task statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceCriterion {
    /// Stable id, `AC-1` onward
    pub id: String,
    /// Criterion text
    pub text: String,
}

/// Coverage status for one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    FullyCovered,
    PartiallyCovered,
    NotCovered,
    OverCovered,
}

/// One criterion's mapping row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcMapping {
    /// Criterion id
    pub ac_id: String,
    /// Criterion text
    pub ac_text: String,
    /// Implementation locations that reference the criterion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implementation_refs: Vec<String>,
    /// Test locations that reference the criterion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_refs: Vec<String>,
    /// Coverage status under the confidence threshold
    pub coverage: CoverageStatus,
    /// Mapping confidence in 0..=100
    pub confidence: f64,
}

/// Counts per coverage status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub fully_covered: usize,
    pub partially_covered: usize,
    pub not_covered: usize,
    pub over_covered: usize,
    /// Fraction of criteria at least partially covered, 0..=100
    pub coverage_percent: f64,
}

/// A criterion with no satisfying implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmetAc {
    pub ac_id: String,
    pub ac_text: String,
    /// 1 is highest
    pub priority: u8,
}

/// A covered criterion with no test reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingTest {
    pub ac_id: String,
    pub suggestion: String,
    /// 1 is highest
    pub priority: u8,
}

/// The assembled traceability matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceabilityMatrix {
    /// One row per criterion
    pub ac_mappings: Vec<AcMapping>,
    /// Rollup counts
    pub coverage_summary: CoverageSummary,
    /// Criteria without satisfying implementation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmet_acs: Vec<UnmetAc>,
    /// Covered criteria without tests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_tests: Vec<MissingTest>,
}

/// Traceability scoring knobs.
#[derive(Debug, Clone)]
pub struct TraceabilityConfig {
    /// Confidence contribution of a direct criterion-id reference
    pub direct_reference_weight: f64,
    /// Confidence contribution of full keyword overlap
    pub keyword_overlap_weight: f64,
    /// Confidence at or above which a criterion counts as covered
    pub confidence_threshold: f64,
}

impl Default for TraceabilityConfig {
    fn default() -> Self {
        Self {
            direct_reference_weight: 80.0,
            keyword_overlap_weight: 20.0,
            confidence_threshold: 60.0,
        }
    }
}

/// Builds traceability matrices.
#[derive(Debug, Clone, Default)]
pub struct TraceabilityBuilder {
    config: TraceabilityConfig,
}

impl TraceabilityBuilder {
    pub fn new(config: TraceabilityConfig) -> Self {
        Self { config }
    }

    /// Map criteria against the artifact and the judge's citations.
    pub fn build(
        &self,
        criteria: &[AcceptanceCriterion],
        artifact: &str,
        citations: &[Citation],
    ) -> TraceabilityMatrix {
        let artifact_lower = artifact.to_lowercase();
        let artifact_tokens = keyword_set(&artifact_lower);

        let mut ac_mappings = Vec::new();
        let mut unmet_acs = Vec::new();
        let mut missing_tests = Vec::new();

        for criterion in criteria {
            let id_lower = criterion.id.to_lowercase();
            let direct_hits = artifact_lower.matches(&id_lower).count()
                + citations
                    .iter()
                    .filter(|c| {
                        c.location.to_lowercase().contains(&id_lower)
                            || c.excerpt.to_lowercase().contains(&id_lower)
                    })
                    .count();

            let ac_keywords = keyword_set(&criterion.text.to_lowercase());
            let overlap = if ac_keywords.is_empty() {
                0.0
            } else {
                ac_keywords.intersection(&artifact_tokens).count() as f64
                    / ac_keywords.len() as f64
            };

            let confidence = ((direct_hits.min(1) as f64) * self.config.direct_reference_weight
                + overlap * self.config.keyword_overlap_weight)
                .clamp(0.0, 100.0);

            let mut implementation_refs = Vec::new();
            let mut test_refs = Vec::new();
            for citation in citations {
                let relevant = citation.location.to_lowercase().contains(&id_lower)
                    || citation.excerpt.to_lowercase().contains(&id_lower)
                    || keyword_set(&citation.excerpt.to_lowercase())
                        .intersection(&ac_keywords)
                        .count()
                        * 2
                        >= ac_keywords.len().max(1);
                if relevant {
                    if looks_like_test(&citation.location) {
                        test_refs.push(citation.location.clone());
                    } else {
                        implementation_refs.push(citation.location.clone());
                    }
                }
            }

            let covered = confidence >= self.config.confidence_threshold;
            let coverage = if !covered {
                CoverageStatus::NotCovered
            } else if test_refs.is_empty() {
                CoverageStatus::PartiallyCovered
            } else if direct_hits > 3 && implementation_refs.len() > 2 {
                CoverageStatus::OverCovered
            } else {
                CoverageStatus::FullyCovered
            };

            match coverage {
                CoverageStatus::NotCovered => unmet_acs.push(UnmetAc {
                    ac_id: criterion.id.clone(),
                    ac_text: criterion.text.clone(),
                    priority: 1,
                }),
                CoverageStatus::PartiallyCovered => missing_tests.push(MissingTest {
                    ac_id: criterion.id.clone(),
                    suggestion: format!("Add a test exercising: {}", criterion.text),
                    priority: 2,
                }),
                _ => {}
            }

            ac_mappings.push(AcMapping {
                ac_id: criterion.id.clone(),
                ac_text: criterion.text.clone(),
                implementation_refs,
                test_refs,
                coverage,
                confidence,
            });
        }

        let coverage_summary = summarize(&ac_mappings);

        TraceabilityMatrix {
            ac_mappings,
            coverage_summary,
            unmet_acs,
            missing_tests,
        }
    }
}

/// Extract acceptance criteria from a task statement: `AC-n:` lines,
/// checklist bullets, and numbered items.
pub fn extract_acceptance_criteria(task: &str) -> Vec<AcceptanceCriterion> {
    let mut criteria = Vec::new();
    for cap in AC_LINE_RE.captures_iter(task) {
        let text = cap[2].trim().to_string();
        if text.is_empty() {
            continue;
        }
        let id = match cap.get(1) {
            Some(n) => format!("AC-{}", n.as_str()),
            None => format!("AC-{}", criteria.len() + 1),
        };
        criteria.push(AcceptanceCriterion { id, text });
    }
    criteria
}

fn summarize(mappings: &[AcMapping]) -> CoverageSummary {
    let mut summary = CoverageSummary::default();
    for mapping in mappings {
        match mapping.coverage {
            CoverageStatus::FullyCovered => summary.fully_covered += 1,
            CoverageStatus::PartiallyCovered => summary.partially_covered += 1,
            CoverageStatus::NotCovered => summary.not_covered += 1,
            CoverageStatus::OverCovered => summary.over_covered += 1,
        }
    }
    let total = mappings.len();
    summary.coverage_percent = if total == 0 {
        100.0
    } else {
        (total - summary.not_covered) as f64 / total as f64 * 100.0
    };
    summary
}

fn keyword_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 3)
        .map(|t| t.to_string())
        .collect()
}

fn looks_like_test(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.contains("test") || lower.contains(".spec.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ac_lines() {
        let task = "Implement the parser.\nAC-1: rejects empty input\nAC-2: accepts nested blocks\n- [ ] reports line numbers";
        let criteria = extract_acceptance_criteria(task);
        assert_eq!(criteria.len(), 3);
        assert_eq!(criteria[0].id, "AC-1");
        assert_eq!(criteria[1].text, "accepts nested blocks");
        assert_eq!(criteria[2].id, "AC-3");
    }

    #[test]
    fn test_direct_reference_scores_high() {
        let criteria = vec![AcceptanceCriterion {
            id: "AC-1".to_string(),
            text: "rejects empty input".to_string(),
        }];
        // Artifact mentions AC-1 directly and shares keywords.
        let matrix = TraceabilityBuilder::default().build(
            &criteria,
            "// AC-1: handled below\nfn parse(input: &str) { if input.is_empty() { reject(); } }",
            &[],
        );
        assert!(matrix.ac_mappings[0].confidence >= 80.0);
        assert_ne!(matrix.ac_mappings[0].coverage, CoverageStatus::NotCovered);
    }

    #[test]
    fn test_unreferenced_criterion_is_unmet() {
        let criteria = vec![AcceptanceCriterion {
            id: "AC-9".to_string(),
            text: "streams gigabyte archives incrementally".to_string(),
        }];
        let matrix =
            TraceabilityBuilder::default().build(&criteria, "fn add(a: u32, b: u32) {}", &[]);
        assert_eq!(matrix.ac_mappings[0].coverage, CoverageStatus::NotCovered);
        assert_eq!(matrix.unmet_acs.len(), 1);
        assert_eq!(matrix.unmet_acs[0].priority, 1);
    }

    #[test]
    fn test_covered_without_tests_reports_missing_test() {
        let criteria = vec![AcceptanceCriterion {
            id: "AC-1".to_string(),
            text: "rejects empty input".to_string(),
        }];
        let citations = vec![Citation {
            location: "src/parser.rs:10".to_string(),
            excerpt: "AC-1 rejects empty input".to_string(),
        }];
        let matrix = TraceabilityBuilder::default().build(
            &criteria,
            "// implements AC-1 rejects empty input",
            &citations,
        );
        assert_eq!(
            matrix.ac_mappings[0].coverage,
            CoverageStatus::PartiallyCovered
        );
        assert_eq!(matrix.missing_tests.len(), 1);
    }

    #[test]
    fn test_test_citation_counts_as_full_coverage() {
        let criteria = vec![AcceptanceCriterion {
            id: "AC-1".to_string(),
            text: "rejects empty input".to_string(),
        }];
        let citations = vec![
            Citation {
                location: "src/parser.rs:10".to_string(),
                excerpt: "AC-1 handling".to_string(),
            },
            Citation {
                location: "tests/parser_test.rs:4".to_string(),
                excerpt: "AC-1 rejects empty".to_string(),
            },
        ];
        let matrix =
            TraceabilityBuilder::default().build(&criteria, "// AC-1 covered", &citations);
        assert_eq!(matrix.ac_mappings[0].coverage, CoverageStatus::FullyCovered);
        assert_eq!(matrix.ac_mappings[0].test_refs.len(), 1);
        assert_eq!(matrix.coverage_summary.fully_covered, 1);
        assert_eq!(matrix.coverage_summary.coverage_percent, 100.0);
    }

    #[test]
    fn test_empty_criteria_full_coverage() {
        let matrix = TraceabilityBuilder::default().build(&[], "anything", &[]);
        assert!(matrix.ac_mappings.is_empty());
        assert_eq!(matrix.coverage_summary.coverage_percent, 100.0);
    }
}
