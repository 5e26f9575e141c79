//! Session and engine configuration.
//!
//! `SessionConfig` travels with a session and can be amended per-thought via
//! inline configuration; `EngineConfig` is the per-process surface with
//! documented defaults for every component. Quality dimensions carry the
//! rubric weights the score assembler rolls up.

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::completion::CompletionConfig;
use crate::error::{Error, Result};
use crate::output::OutputConfig;
use crate::progress::ProgressConfig;
use crate::queue::QueueConfig;
use crate::sanitize::SanitizeConfig;
use crate::session::SessionStoreConfig;
use crate::stagnation::StagnationConfig;

/// Default ship threshold for session configs.
pub const DEFAULT_THRESHOLD: f64 = 85.0;

/// What portion of the repository the audit should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditScope {
    /// Only the current change set
    #[default]
    Diff,
    /// An explicit list of paths
    Paths,
    /// The whole workspace
    Workspace,
}

impl std::str::FromStr for AuditScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "diff" => Ok(Self::Diff),
            "paths" => Ok(Self::Paths),
            "workspace" => Ok(Self::Workspace),
            other => Err(Error::config(format!("unknown scope '{}'", other))),
        }
    }
}

/// Per-session audit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// What the candidate is supposed to accomplish
    pub task: String,
    /// Audit scope
    pub scope: AuditScope,
    /// Paths to audit; required when `scope == Paths`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Ship threshold in 0..=100
    pub threshold: f64,
    /// Advisory per-call iteration limit; the engine's hard stop is the
    /// global ceiling regardless of this value
    pub max_cycles: u32,
    /// Number of candidates the caller intends to drive
    pub candidates: u32,
    /// Judge model identifiers to consult
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub judges: Vec<String>,
    /// Whether the caller wants proposed fixes applied
    pub apply_fixes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            task: "Audit and improve the given candidate".to_string(),
            scope: AuditScope::Diff,
            paths: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            max_cycles: 1,
            candidates: 1,
            judges: Vec::new(),
            apply_fixes: false,
        }
    }
}

impl SessionConfig {
    /// Validate range and cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(Error::config(format!(
                "threshold {} outside 0..=100",
                self.threshold
            )));
        }
        if self.scope == AuditScope::Paths && self.paths.is_empty() {
            return Err(Error::config("scope=paths requires a non-empty path list"));
        }
        if self.max_cycles < 1 {
            return Err(Error::config("maxCycles must be >= 1"));
        }
        if self.candidates < 1 {
            return Err(Error::config("candidates must be >= 1"));
        }
        Ok(())
    }

    /// Digest of the fields that affect review content, for cache keying.
    pub fn digest(&self) -> String {
        // Stable field order; serde_json preserves struct order.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A weighted criterion within a quality dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Unique id within the dimension
    pub id: String,
    /// Display name
    pub name: String,
    /// Weight within the dimension, 0..=1
    pub weight: f64,
}

impl Criterion {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
        }
    }
}

/// A weighted quality dimension in the audit rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityDimension {
    /// Unique id across the rubric
    pub id: String,
    /// Display name
    pub name: String,
    /// Weight across the rubric, 0..=1
    pub weight: f64,
    /// Minimum acceptable score when `required`
    pub min_threshold: f64,
    /// Whether failing `min_threshold` blocks a pass verdict
    pub required: bool,
    /// Weighted criteria within this dimension
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub criteria: Vec<Criterion>,
}

impl QualityDimension {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            min_threshold: 0.0,
            required: false,
            criteria: Vec::new(),
        }
    }

    pub fn required_above(mut self, min_threshold: f64) -> Self {
        self.required = true;
        self.min_threshold = min_threshold;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }
}

/// Tolerance for rubric weight sums.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Validate a rubric: weights sum to 1.0 ± tolerance at both levels, and ids
/// are unique.
pub fn validate_dimensions(dimensions: &[QualityDimension]) -> Result<()> {
    if dimensions.is_empty() {
        return Err(Error::config("rubric must contain at least one dimension"));
    }

    let total: f64 = dimensions.iter().map(|d| d.weight).sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(Error::config(format!(
            "dimension weights sum to {:.3}, expected 1.0",
            total
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for dim in dimensions {
        if !seen.insert(dim.id.as_str()) {
            return Err(Error::config(format!("duplicate dimension id '{}'", dim.id)));
        }

        if !dim.criteria.is_empty() {
            let csum: f64 = dim.criteria.iter().map(|c| c.weight).sum();
            if (csum - 1.0).abs() > WEIGHT_TOLERANCE {
                return Err(Error::config(format!(
                    "criterion weights in '{}' sum to {:.3}, expected 1.0",
                    dim.id, csum
                )));
            }
            let mut cseen = std::collections::HashSet::new();
            for c in &dim.criteria {
                if !cseen.insert(c.id.as_str()) {
                    return Err(Error::config(format!(
                        "duplicate criterion id '{}' in dimension '{}'",
                        c.id, dim.id
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Default code-audit rubric.
pub fn default_dimensions() -> Vec<QualityDimension> {
    vec![
        QualityDimension::new("correctness", "Correctness", 0.30)
            .required_above(60.0)
            .with_criterion(Criterion::new("logic", "Logic soundness", 0.6))
            .with_criterion(Criterion::new("edge-cases", "Edge-case handling", 0.4)),
        QualityDimension::new("security", "Security", 0.20)
            .required_above(50.0)
            .with_criterion(Criterion::new("input-handling", "Input handling", 0.5))
            .with_criterion(Criterion::new("secrets", "Secret hygiene", 0.5)),
        QualityDimension::new("testing", "Testing", 0.20),
        QualityDimension::new("maintainability", "Maintainability", 0.15),
        QualityDimension::new("performance", "Performance", 0.10),
        QualityDimension::new("documentation", "Documentation", 0.05),
    ]
}

/// Per-process engine configuration. All fields have working defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Defaults applied to newly created sessions
    pub session_defaults: SessionConfig,
    /// Rubric used by the score assembler
    pub dimensions: Option<Vec<QualityDimension>>,
    /// Result cache sizing
    pub cache: CacheConfig,
    /// Session journal location and retry policy
    pub store: SessionStoreConfig,
    /// Queue concurrency and admission limits
    pub queue: QueueConfig,
    /// Progress tracking activation and capacity
    pub progress: ProgressConfig,
    /// Completion tiers and hard stop
    pub completion: CompletionConfig,
    /// Stagnation detection thresholds
    pub stagnation: StagnationConfig,
    /// Structured output assembly deadlines
    pub output: OutputConfig,
    /// Sanitizer level and knobs
    pub sanitizer: SanitizeConfig,
}

impl EngineConfig {
    /// Resolve the rubric, falling back to the default dimension set.
    pub fn rubric(&self) -> Vec<QualityDimension> {
        self.dimensions.clone().unwrap_or_else(default_dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_paths_scope_requires_paths() {
        let config = SessionConfig {
            scope: AuditScope::Paths,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            scope: AuditScope::Paths,
            paths: vec!["src/lib.rs".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_range_enforced() {
        let config = SessionConfig {
            threshold: 101.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            threshold: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_dimensions_validate() {
        assert!(validate_dimensions(&default_dimensions()).is_ok());
    }

    #[test]
    fn test_weight_sum_tolerance() {
        let dims = vec![
            QualityDimension::new("a", "A", 0.5),
            QualityDimension::new("b", "B", 0.49),
        ];
        // 0.99 is within tolerance
        assert!(validate_dimensions(&dims).is_ok());

        let dims = vec![
            QualityDimension::new("a", "A", 0.5),
            QualityDimension::new("b", "B", 0.4),
        ];
        assert!(validate_dimensions(&dims).is_err());
    }

    #[test]
    fn test_duplicate_dimension_ids_rejected() {
        let dims = vec![
            QualityDimension::new("a", "A", 0.5),
            QualityDimension::new("a", "A again", 0.5),
        ];
        assert!(validate_dimensions(&dims).is_err());
    }

    #[test]
    fn test_criterion_weights_validated() {
        let dims = vec![QualityDimension::new("a", "A", 1.0)
            .with_criterion(Criterion::new("x", "X", 0.5))
            .with_criterion(Criterion::new("y", "Y", 0.2))];
        assert!(validate_dimensions(&dims).is_err());
    }

    #[test]
    fn test_scope_parsing() {
        assert_eq!("diff".parse::<AuditScope>().unwrap(), AuditScope::Diff);
        assert_eq!(
            "Workspace".parse::<AuditScope>().unwrap(),
            AuditScope::Workspace
        );
        assert!("everything".parse::<AuditScope>().is_err());
    }

    #[test]
    fn test_config_digest_changes_with_content() {
        let a = SessionConfig::default();
        let mut b = SessionConfig::default();
        b.threshold = 90.0;
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), SessionConfig::default().digest());
    }
}
