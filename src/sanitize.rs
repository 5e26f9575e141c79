//! Output sanitization.
//!
//! Five rewriting passes over every textual field of the assembled review:
//! secrets, PII, tool-invocation syntax, path anonymization, and (at the
//! strict level) debug/stack-trace content. Running the sanitizer on its own
//! output is a fixed point: replacement markers never re-match a pattern.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::StructuredReview;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email"));

static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\+\d{1,2}[\s.-]?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]\d{4}\b").expect("phone")
});

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn"));

static CREDIT_CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b").expect("cc"));

static API_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(api[_-]?key|apikey)(\s*[:=]\s*)["']?([A-Za-z0-9_\-]{16,})["']?"#)
        .expect("api key")
});

static PASSWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(password|passwd|pwd)(\s*[:=]\s*)["']?([^\s"']{6,})["']?"#)
        .expect("password")
});

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(token|secret)(\s*[:=]\s*)["']?([A-Za-z0-9_.\-]{16,})["']?"#)
        .expect("token")
});

static BEARER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9_.\-]{16,}").expect("bearer"));

static TOOL_EXECUTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<function_calls>.*?(?:</function_calls>|\z)").expect("tool execution")
});

static TOOL_CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<invoke\b.*?(?:</invoke>|\z)|```tool_(?:use|code|call)\b.*?```")
        .expect("tool call")
});

static HOME_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:/home/|/Users/|C:\\Users\\)[A-Za-z0-9._-]+").expect("home prefix")
});

static DEEP_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/[A-Za-z0-9._\[\]-]+){4,}").expect("deep path"));

static DEBUG_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:DEBUG[:\s]|TRACE[:\s]|console\.log\(|println!\(|dbg!\(|eprintln!\().*\r?\n?",
    )
    .expect("debug line")
});

static STACK_TRACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:at\s+\S+\s*\(.*\)|File "[^"]+", line \d+.*|\d+:\s+0x[0-9a-fA-F]+.*|Traceback \(most recent call last\):.*)\r?\n?"#,
    )
    .expect("stack trace")
});

/// How aggressively to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizeLevel {
    /// Secrets and PII only
    Minimal,
    /// Secrets, PII, tool syntax, and path anonymization
    #[default]
    Standard,
    /// Everything, plus debug lines and stack traces
    Strict,
}

/// Sanitizer knobs.
#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    /// Rewrite aggressiveness
    pub level: SanitizeLevel,
    /// Paths deeper than this are contracted with `…`
    pub max_path_depth: usize,
    /// Average confidence below which a warning is emitted
    pub low_confidence_threshold: f64,
    /// PII action count at which a density warning is emitted
    pub pii_density_warning: usize,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            level: SanitizeLevel::Standard,
            max_path_depth: 5,
            low_confidence_threshold: 70.0,
            pii_density_warning: 10,
        }
    }
}

/// What kind of content an action redacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeCategory {
    Email,
    PhoneNumber,
    Ssn,
    CreditCard,
    ApiKey,
    Password,
    Token,
    ToolSyntax,
    Path,
    DebugContent,
}

impl SanitizeCategory {
    fn is_pii(&self) -> bool {
        matches!(
            self,
            Self::Email | Self::PhoneNumber | Self::Ssn | Self::CreditCard
        )
    }
}

/// One redaction performed by the sanitizer. The original content is never
/// echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationAction {
    /// Field path the redaction happened in
    pub location: String,
    /// What was redacted
    pub category: SanitizeCategory,
    /// The marker written in place of the content
    pub replacement: String,
    /// Confidence in the match, 0..=100
    pub confidence: f64,
}

/// Redaction log attached to every review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationResult {
    /// Redactions, in field order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<SanitizationAction>,
    /// Low-confidence and density warnings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Rewrites the textual fields of an assembled review.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    config: SanitizeConfig,
}

impl Sanitizer {
    pub fn new(config: SanitizeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SanitizeConfig {
        &self.config
    }

    /// Sanitize a single text field, recording actions under `location`.
    pub fn sanitize_text(&self, text: &str, location: &str) -> (String, Vec<SanitizationAction>) {
        let mut actions = Vec::new();
        let mut out = text.to_string();

        // Tool syntax first: it can wrap anything, including secrets.
        if self.config.level != SanitizeLevel::Minimal {
            out = replace_all(&out, &TOOL_EXECUTION_RE, "[TOOL EXECUTION]", || {
                action(location, SanitizeCategory::ToolSyntax, "[TOOL EXECUTION]", 90.0)
            }, &mut actions);
            out = replace_all(&out, &TOOL_CALL_RE, "[TOOL CALL]", || {
                action(location, SanitizeCategory::ToolSyntax, "[TOOL CALL]", 90.0)
            }, &mut actions);
        }

        // Secrets before PII so key material is tagged as a secret, not a
        // stray number.
        out = replace_groups(&out, &API_KEY_RE, "[API_KEY]", location, SanitizeCategory::ApiKey, &mut actions);
        out = replace_groups(&out, &PASSWORD_RE, "[PASSWORD]", location, SanitizeCategory::Password, &mut actions);
        out = replace_groups(&out, &TOKEN_RE, "[TOKEN]", location, SanitizeCategory::Token, &mut actions);
        out = replace_all(&out, &BEARER_RE, "[TOKEN]", || {
            action(location, SanitizeCategory::Token, "[TOKEN]", 85.0)
        }, &mut actions);

        // PII.
        out = replace_all(&out, &EMAIL_RE, "[email]", || {
            action(location, SanitizeCategory::Email, "[email]", 95.0)
        }, &mut actions);
        out = replace_all(&out, &SSN_RE, "[ssn]", || {
            action(location, SanitizeCategory::Ssn, "[ssn]", 90.0)
        }, &mut actions);
        out = replace_all(&out, &CREDIT_CARD_RE, "[credit_card]", || {
            action(location, SanitizeCategory::CreditCard, "[credit_card]", 85.0)
        }, &mut actions);
        out = replace_all(&out, &PHONE_RE, "[phone_number]", || {
            action(location, SanitizeCategory::PhoneNumber, "[phone_number]", 70.0)
        }, &mut actions);

        // Paths.
        if self.config.level != SanitizeLevel::Minimal {
            out = replace_all(&out, &HOME_PREFIX_RE, "[HOME]", || {
                action(location, SanitizeCategory::Path, "[HOME]", 99.0)
            }, &mut actions);
            out = self.contract_deep_paths(&out, location, &mut actions);
        }

        // Content filter.
        if self.config.level == SanitizeLevel::Strict {
            out = replace_all(&out, &DEBUG_LINE_RE, "", || {
                action(location, SanitizeCategory::DebugContent, "", 60.0)
            }, &mut actions);
            out = replace_all(&out, &STACK_TRACE_RE, "", || {
                action(location, SanitizeCategory::DebugContent, "", 60.0)
            }, &mut actions);
        }

        (out, actions)
    }

    fn contract_deep_paths(
        &self,
        text: &str,
        location: &str,
        actions: &mut Vec<SanitizationAction>,
    ) -> String {
        let max_depth = self.config.max_path_depth;
        let mut recorded = 0usize;
        let out = DEEP_PATH_RE
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let path = &caps[0];
                let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() <= max_depth {
                    return path.to_string();
                }
                recorded += 1;
                let head = &segments[..2];
                let tail = &segments[segments.len() - 2..];
                format!("/{}/…/{}", head.join("/"), tail.join("/"))
            })
            .into_owned();
        for _ in 0..recorded {
            actions.push(action(location, SanitizeCategory::Path, "…", 99.0));
        }
        out
    }

    /// Sanitize every textual field of the review in place and attach the
    /// resulting log to `review.sanitization`.
    pub fn sanitize_review(&self, review: &mut StructuredReview) -> SanitizationResult {
        let mut actions = Vec::new();

        {
            let verdict = &mut review.executive_verdict;
            for (i, bullet) in verdict.summary.iter_mut().enumerate() {
                self.scrub_in_place(bullet, &format!("executiveVerdict.summary[{}]", i), &mut actions);
            }
            for (i, step) in verdict.next_steps.iter_mut().enumerate() {
                self.scrub_in_place(step, &format!("executiveVerdict.nextSteps[{}]", i), &mut actions);
            }
            self.scrub_in_place(
                &mut verdict.justification,
                "executiveVerdict.justification",
                &mut actions,
            );
        }

        self.scrub_in_place(
            &mut review.evidence_table.summary,
            "evidenceTable.summary",
            &mut actions,
        );
        for (i, entry) in review.evidence_table.entries.iter_mut().enumerate() {
            let base = format!("evidenceTable.entries[{}]", i);
            self.scrub_in_place(&mut entry.issue, &format!("{}.issue", base), &mut actions);
            self.scrub_in_place(&mut entry.location, &format!("{}.location", base), &mut actions);
            self.scrub_in_place(&mut entry.proof, &format!("{}.proof", base), &mut actions);
            if let Some(fix) = entry.fix_summary.as_mut() {
                self.scrub_in_place(fix, &format!("{}.fixSummary", base), &mut actions);
            }
        }

        for (i, diff) in review.proposed_diffs.iter_mut().enumerate() {
            self.scrub_in_place(
                &mut diff.unified_diff,
                &format!("proposedDiffs[{}].unifiedDiff", i),
                &mut actions,
            );
        }

        for (i, step) in review.reproduction_guide.reproduction_steps.iter_mut().enumerate() {
            let base = format!("reproductionGuide.reproductionSteps[{}]", i);
            self.scrub_in_place(&mut step.description, &format!("{}.description", base), &mut actions);
            if let Some(command) = step.command.as_mut() {
                self.scrub_in_place(command, &format!("{}.command", base), &mut actions);
            }
            if let Some(expected) = step.expected_output.as_mut() {
                self.scrub_in_place(expected, &format!("{}.expectedOutput", base), &mut actions);
            }
        }
        for (i, step) in review.reproduction_guide.verification_steps.iter_mut().enumerate() {
            let base = format!("reproductionGuide.verificationSteps[{}]", i);
            self.scrub_in_place(&mut step.description, &format!("{}.description", base), &mut actions);
            self.scrub_in_place(&mut step.command, &format!("{}.command", base), &mut actions);
        }

        for (i, mapping) in review.traceability_matrix.ac_mappings.iter_mut().enumerate() {
            self.scrub_in_place(
                &mut mapping.ac_text,
                &format!("traceabilityMatrix.acMappings[{}].acText", i),
                &mut actions,
            );
        }

        self.scrub_in_place(
            &mut review.follow_up_tasks.summary,
            "followUpTasks.summary",
            &mut actions,
        );
        for (i, task) in review.follow_up_tasks.tasks.iter_mut().enumerate() {
            self.scrub_in_place(
                &mut task.title,
                &format!("followUpTasks.tasks[{}].title", i),
                &mut actions,
            );
        }

        for (i, card) in review.judge_cards.iter_mut().enumerate() {
            if let Some(notes) = card.notes.as_mut() {
                self.scrub_in_place(notes, &format!("judgeCards[{}].notes", i), &mut actions);
            }
        }

        self.scrub_in_place(&mut review.completion.message, "completion.message", &mut actions);
        for (i, warning) in review.metadata.warnings.iter_mut().enumerate() {
            self.scrub_in_place(
                &mut warning.message,
                &format!("metadata.warnings[{}]", i),
                &mut actions,
            );
        }

        let warnings = self.warnings_for(&actions);
        let result = SanitizationResult { actions, warnings };
        review.sanitization = result.clone();
        result
    }

    fn scrub_in_place(
        &self,
        field: &mut String,
        location: &str,
        actions: &mut Vec<SanitizationAction>,
    ) {
        let (out, mut field_actions) = self.sanitize_text(field, location);
        if !field_actions.is_empty() {
            *field = out;
            actions.append(&mut field_actions);
        }
    }

    fn warnings_for(&self, actions: &[SanitizationAction]) -> Vec<String> {
        let mut warnings = Vec::new();
        if !actions.is_empty() {
            let avg = actions.iter().map(|a| a.confidence).sum::<f64>() / actions.len() as f64;
            if avg < self.config.low_confidence_threshold {
                warnings.push(format!(
                    "average sanitization confidence {:.0} is below {:.0}; review the redactions",
                    avg, self.config.low_confidence_threshold
                ));
            }
        }
        let pii = actions.iter().filter(|a| a.category.is_pii()).count();
        if pii >= self.config.pii_density_warning {
            warnings.push(format!(
                "{} PII redactions in one review; the artifact may embed personal data",
                pii
            ));
        }
        warnings
    }
}

fn action(
    location: &str,
    category: SanitizeCategory,
    replacement: &str,
    confidence: f64,
) -> SanitizationAction {
    SanitizationAction {
        location: location.to_string(),
        category,
        replacement: replacement.to_string(),
        confidence,
    }
}

fn replace_all(
    text: &str,
    re: &Regex,
    replacement: &str,
    make_action: impl Fn() -> SanitizationAction,
    actions: &mut Vec<SanitizationAction>,
) -> String {
    let count = re.find_iter(text).count();
    if count == 0 {
        return text.to_string();
    }
    for _ in 0..count {
        actions.push(make_action());
    }
    re.replace_all(text, replacement).into_owned()
}

/// Replace the secret value (capture group 3) while keeping the key and
/// separator, so `api_key=XYZ` becomes `api_key=[API_KEY]`. Longer secrets
/// raise confidence.
fn replace_groups(
    text: &str,
    re: &Regex,
    marker: &str,
    location: &str,
    category: SanitizeCategory,
    actions: &mut Vec<SanitizationAction>,
) -> String {
    let mut local = Vec::new();
    let out = re
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let secret_len = caps[3].len();
            let base: f64 = match category {
                SanitizeCategory::ApiKey => 85.0,
                SanitizeCategory::Password => 80.0,
                _ => 75.0,
            };
            let confidence = (base + if secret_len >= 32 { 10.0 } else { 0.0 }).min(99.0);
            local.push(action(location, category, marker, confidence));
            format!("{}{}{}", &caps[1], &caps[2], marker)
        })
        .into_owned();
    actions.append(&mut local);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructuredReview;

    fn sanitizer() -> Sanitizer {
        Sanitizer::default()
    }

    #[test]
    fn test_api_key_redacted_with_key_kept() {
        let (out, actions) = sanitizer().sanitize_text(
            r#"api_key="ABCD1234EFGH5678IJKL9012MNOP3456""#,
            "test",
        );
        assert!(out.contains("api_key"));
        assert!(out.contains("[API_KEY]"));
        assert!(!out.contains("ABCD1234"));
        assert_eq!(actions.len(), 1);
        assert!(actions[0].confidence >= 80.0);
    }

    #[test]
    fn test_long_secret_raises_confidence() {
        let (_, actions) = sanitizer()
            .sanitize_text("apikey=ABCD1234EFGH5678IJKL9012MNOP3456", "test");
        assert_eq!(actions[0].confidence, 95.0);

        let (_, actions) = sanitizer().sanitize_text("apikey=ABCD1234EFGH5678", "test");
        assert_eq!(actions[0].confidence, 85.0);
    }

    #[test]
    fn test_email_and_ssn_redacted() {
        let (out, actions) = sanitizer()
            .sanitize_text("Contact alice@example.com, SSN 123-45-6789", "test");
        assert!(out.contains("[email]"));
        assert!(out.contains("[ssn]"));
        assert!(!out.contains("alice@"));
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_credit_card_and_phone() {
        let (out, _) = sanitizer()
            .sanitize_text("card 4111 1111 1111 1111, call 555-867-5309", "test");
        assert!(out.contains("[credit_card]"));
        assert!(out.contains("[phone_number]"));
    }

    #[test]
    fn test_tool_syntax_hidden() {
        let (out, actions) = sanitizer().sanitize_text(
            "before <function_calls>anything here</function_calls> after",
            "test",
        );
        assert_eq!(out, "before [TOOL EXECUTION] after");
        assert_eq!(actions[0].category, SanitizeCategory::ToolSyntax);
    }

    #[test]
    fn test_home_prefix_anonymized() {
        let (out, _) = sanitizer().sanitize_text("stored in /home/alice/project/file.rs", "test");
        assert!(out.contains("[HOME]"));
        assert!(!out.contains("alice"));
    }

    #[test]
    fn test_deep_path_contracted() {
        let (out, _) = sanitizer()
            .sanitize_text("see /opt/builds/ci/workspace/project/module/src/deep.rs", "test");
        assert!(out.contains("…"));
        assert!(out.contains("deep.rs"));
    }

    #[test]
    fn test_shallow_path_untouched() {
        let text = "see src/lib.rs and /etc/hosts";
        let (out, _) = sanitizer().sanitize_text(text, "test");
        assert_eq!(out, text);
    }

    #[test]
    fn test_strict_strips_debug_lines() {
        let sanitizer = Sanitizer::new(SanitizeConfig {
            level: SanitizeLevel::Strict,
            ..Default::default()
        });
        let (out, actions) = sanitizer.sanitize_text(
            "keep this\nDEBUG: noisy internals\nkeep that\n",
            "test",
        );
        assert!(out.contains("keep this"));
        assert!(out.contains("keep that"));
        assert!(!out.contains("noisy internals"));
        assert!(actions
            .iter()
            .any(|a| a.category == SanitizeCategory::DebugContent));
    }

    #[test]
    fn test_minimal_level_keeps_paths_and_tools() {
        let sanitizer = Sanitizer::new(SanitizeConfig {
            level: SanitizeLevel::Minimal,
            ..Default::default()
        });
        let text = "in /home/alice/x and password=hunter42!";
        let (out, _) = sanitizer.sanitize_text(text, "test");
        assert!(out.contains("/home/alice"));
        assert!(out.contains("[PASSWORD]"));
    }

    #[test]
    fn test_sanitize_is_fixed_point() {
        let input = r#"api_key="ABCD1234EFGH5678IJKL9012" sent to alice@example.com from /home/alice/deep/nested/dir/tree/file"#;
        let (once, _) = sanitizer().sanitize_text(input, "test");
        let (twice, actions) = sanitizer().sanitize_text(&once, "test");
        assert_eq!(once, twice);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_sanitize_review_walks_fields() {
        let mut review = StructuredReview::fallback("judge said api_key=SECRETSECRETSECRET99", 1);
        review
            .executive_verdict
            .summary
            .push("mail bob@example.com".to_string());

        let result = sanitizer().sanitize_review(&mut review);

        assert!(result
            .actions
            .iter()
            .any(|a| a.location.starts_with("judgeCards")));
        assert!(result
            .actions
            .iter()
            .any(|a| a.location.starts_with("executiveVerdict.summary")));
        let json = serde_json::to_string(&review).unwrap();
        assert!(!json.contains("SECRETSECRETSECRET99"));
        assert!(!json.contains("bob@example.com"));
    }

    #[test]
    fn test_sanitize_review_is_fixed_point() {
        let mut review =
            StructuredReview::fallback("note api_key=FIXEDPOINTSECRET1234 here", 1);
        review.completion.message = "mail carol@example.com from /home/carol/work".to_string();

        let first = sanitizer().sanitize_review(&mut review);
        assert!(!first.actions.is_empty());

        let mut again = review.clone();
        let second = sanitizer().sanitize_review(&mut again);
        assert!(second.actions.is_empty());
        // Scrubbing a scrubbed review changes nothing but the action log.
        again.sanitization = review.sanitization.clone();
        assert_eq!(review, again);
    }

    #[test]
    fn test_low_confidence_warning() {
        let sanitizer = Sanitizer::new(SanitizeConfig {
            low_confidence_threshold: 99.0,
            ..Default::default()
        });
        let mut review = StructuredReview::fallback("judge note", 1);
        review.completion.message = "call 555-867-5309".to_string();
        let result = sanitizer.sanitize_review(&mut review);
        assert!(!result.warnings.is_empty());
    }
}
