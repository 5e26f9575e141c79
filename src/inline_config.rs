//! Inline configuration embedded in artifacts.
//!
//! Callers may embed a fenced block labeled `gan-config` in the artifact
//! text to amend the session configuration for this and subsequent thoughts:
//!
//! ````text
//! ```gan-config
//! scope=paths
//! paths=src/lib.rs,src/queue.rs
//! threshold=90
//! ```
//! ````
//!
//! Unknown keys warn and are ignored; out-of-range values are clamped with a
//! warning; a malformed block leaves the session configuration untouched.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::config::{AuditScope, SessionConfig};

/// Matches a fenced `gan-config` block and captures its body.
static GAN_CONFIG_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ms)^[ \t]*```gan-config[ \t]*\r?\n(.*?)^[ \t]*```").expect("fence regex")
});

/// Result of extracting and merging inline configuration.
#[derive(Debug, Clone)]
pub struct InlineConfigOutcome {
    /// The effective configuration after the merge
    pub config: SessionConfig,
    /// Whether any field differs from the base configuration
    pub changed: bool,
    /// Parse and clamp warnings, in input order
    pub warnings: Vec<String>,
}

impl InlineConfigOutcome {
    fn unchanged(config: SessionConfig) -> Self {
        Self {
            config,
            changed: false,
            warnings: Vec::new(),
        }
    }
}

/// Extract the raw body of a `gan-config` block from artifact text.
pub fn extract_inline_config(artifact: &str) -> Option<String> {
    GAN_CONFIG_FENCE
        .captures(artifact)
        .map(|cap| cap[1].to_string())
}

/// Merge inline configuration into `base`.
///
/// `explicit_text` (the thought's `inlineConfigText`) takes precedence over a
/// block embedded in the artifact. Absent config inherits `base` untouched.
pub fn resolve_inline_config(
    artifact: &str,
    explicit_text: Option<&str>,
    base: &SessionConfig,
) -> InlineConfigOutcome {
    let body = match explicit_text {
        Some(text) => Some(text.to_string()),
        None => extract_inline_config(artifact),
    };

    match body {
        Some(body) => merge_key_values(&body, base),
        None => InlineConfigOutcome::unchanged(base.clone()),
    }
}

fn merge_key_values(body: &str, base: &SessionConfig) -> InlineConfigOutcome {
    let mut config = base.clone();
    let mut warnings = Vec::new();

    for (line_no, raw_line) in body.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warnings.push(format!(
                "line {}: expected key=value, got '{}'",
                line_no + 1,
                line
            ));
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "task" => {
                if value.is_empty() {
                    warnings.push("task: empty value ignored".to_string());
                } else {
                    config.task = value.to_string();
                }
            }
            "scope" => match value.parse::<AuditScope>() {
                Ok(scope) => config.scope = scope,
                Err(_) => warnings.push(format!(
                    "scope: '{}' is not one of diff|paths|workspace, keeping {:?}",
                    value, config.scope
                )),
            },
            "paths" => {
                config.paths = value
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect();
            }
            "threshold" => match value.parse::<f64>() {
                Ok(t) => {
                    let clamped = t.clamp(0.0, 100.0);
                    if (clamped - t).abs() > f64::EPSILON {
                        warnings.push(format!("threshold: {} clamped to {}", t, clamped));
                    }
                    config.threshold = clamped;
                }
                Err(_) => warnings.push(format!("threshold: '{}' is not a number", value)),
            },
            "maxCycles" => match value.parse::<u32>() {
                Ok(n) if n >= 1 => config.max_cycles = n,
                Ok(n) => {
                    warnings.push(format!("maxCycles: {} clamped to 1", n));
                    config.max_cycles = 1;
                }
                Err(_) => warnings.push(format!("maxCycles: '{}' is not an integer", value)),
            },
            "candidates" => match value.parse::<u32>() {
                Ok(n) if n >= 1 => config.candidates = n,
                Ok(n) => {
                    warnings.push(format!("candidates: {} clamped to 1", n));
                    config.candidates = 1;
                }
                Err(_) => warnings.push(format!("candidates: '{}' is not an integer", value)),
            },
            "judges" => {
                config.judges = value
                    .split(',')
                    .map(|j| j.trim().to_string())
                    .filter(|j| !j.is_empty())
                    .collect();
            }
            "applyFixes" => match parse_bool(value) {
                Some(b) => config.apply_fixes = b,
                None => warnings.push(format!("applyFixes: '{}' is not a boolean", value)),
            },
            unknown => {
                warnings.push(format!("unknown key '{}' ignored", unknown));
            }
        }
    }

    // scope=paths with no paths is not enforceable; fall back rather than
    // carry an invalid config into the session.
    if config.scope == AuditScope::Paths && config.paths.is_empty() {
        warnings.push("scope=paths without paths, reverting scope".to_string());
        config.scope = base.scope;
    }

    let changed = config != *base;
    if changed {
        debug!(warnings = warnings.len(), "inline config merged");
    }

    InlineConfigOutcome {
        config,
        changed,
        warnings,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_with(block: &str) -> String {
        format!("some code above\n```gan-config\n{}\n```\nsome code below", block)
    }

    #[test]
    fn test_extract_fenced_block() {
        let artifact = artifact_with("threshold=90");
        let body = extract_inline_config(&artifact).unwrap();
        assert_eq!(body.trim(), "threshold=90");
    }

    #[test]
    fn test_no_block_inherits_base() {
        let base = SessionConfig::default();
        let outcome = resolve_inline_config("plain artifact text", None, &base);
        assert!(!outcome.changed);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.config, base);
    }

    #[test]
    fn test_merge_known_keys() {
        let base = SessionConfig::default();
        let artifact = artifact_with(
            "task=Harden the parser\nscope=paths\npaths=src/a.rs, src/b.rs\nthreshold=92\nmaxCycles=3\njudges=sonnet,haiku\napplyFixes=true",
        );
        let outcome = resolve_inline_config(&artifact, None, &base);
        assert!(outcome.changed);
        assert_eq!(outcome.config.task, "Harden the parser");
        assert_eq!(outcome.config.scope, AuditScope::Paths);
        assert_eq!(outcome.config.paths, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(outcome.config.threshold, 92.0);
        assert_eq!(outcome.config.max_cycles, 3);
        assert_eq!(outcome.config.judges, vec!["sonnet", "haiku"]);
        assert!(outcome.config.apply_fixes);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_unknown_key_warns_and_ignores() {
        let base = SessionConfig::default();
        let outcome = resolve_inline_config(&artifact_with("frobnicate=9"), None, &base);
        assert!(!outcome.changed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("frobnicate"));
    }

    #[test]
    fn test_out_of_range_threshold_clamped() {
        let base = SessionConfig::default();
        let outcome = resolve_inline_config(&artifact_with("threshold=150"), None, &base);
        assert_eq!(outcome.config.threshold, 100.0);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("clamped"));
    }

    #[test]
    fn test_malformed_line_warns() {
        let base = SessionConfig::default();
        let outcome = resolve_inline_config(&artifact_with("this is not a pair"), None, &base);
        assert!(!outcome.changed);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_paths_scope_without_paths_reverts() {
        let base = SessionConfig::default();
        let outcome = resolve_inline_config(&artifact_with("scope=paths"), None, &base);
        assert_eq!(outcome.config.scope, base.scope);
        assert!(outcome.warnings.iter().any(|w| w.contains("reverting")));
    }

    #[test]
    fn test_explicit_text_overrides_embedded_block() {
        let base = SessionConfig::default();
        let artifact = artifact_with("threshold=92");
        let outcome = resolve_inline_config(&artifact, Some("threshold=70"), &base);
        assert_eq!(outcome.config.threshold, 70.0);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let base = SessionConfig::default();
        let outcome =
            resolve_inline_config(&artifact_with("# a comment\n\nthreshold=90"), None, &base);
        assert_eq!(outcome.config.threshold, 90.0);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_invalid_bool_warns() {
        let base = SessionConfig::default();
        let outcome = resolve_inline_config(&artifact_with("applyFixes=maybe"), None, &base);
        assert!(!outcome.config.apply_fixes);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
