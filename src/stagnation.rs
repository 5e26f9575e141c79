//! Stagnation detection across session iterations.
//!
//! Tracks recent artifact revisions per session and measures whether
//! successive iterations have stopped making meaningful progress. The
//! similarity metric is a weighted composite of edit-distance similarity,
//! token Jaccard, and structural-token Jaccard; a stricter normalization
//! pass flags cosmetic-only changes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// Weight of edit-distance similarity in the composite.
const EDIT_WEIGHT: f64 = 0.4;
/// Weight of token Jaccard in the composite.
const TOKEN_WEIGHT: f64 = 0.4;
/// Weight of structural Jaccard in the composite.
const STRUCTURAL_WEIGHT: f64 = 0.2;

/// Inputs longer than this are sampled before edit-distance comparison.
const EDIT_SAMPLE_THRESHOLD: usize = 1000;
/// Size of each sampled segment (beginning, middle, end).
const EDIT_SAMPLE_SEGMENT: usize = 333;

/// Function, class, and method declarations across common languages.
static DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)\b(?:fn|func|function|def|class|struct|enum|trait|impl|interface)\s+([A-Za-z_][A-Za-z0-9_]*)")
        .expect("decl regex")
});

/// Import targets across common languages.
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*(?:use|import|from|require|include)\s+([A-Za-z0-9_:./"'<>-]+)"#)
        .expect("import regex")
});

/// Control-flow keywords.
static CONTROL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(if|else|for|while|loop|match|switch|case|return|break|continue|try|catch)\b")
        .expect("control regex")
});

/// Spaces around punctuation and operators, for strict normalization.
static PUNCT_SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*([{}()\[\];,.:=+\-*/<>!&|])\s*").expect("punct regex"));

/// Stagnation detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagnationConfig {
    /// Minimum recorded iterations before analysis reports anything
    pub min_iterations: usize,
    /// Loop before which stagnation is never reported
    pub stagnation_start_loop: u32,
    /// Number of recent iterations compared pairwise
    pub window: usize,
    /// Composite similarity above which a pair counts as stagnant
    pub similarity_threshold: f64,
    /// Score movement at or below which scores count as non-improving
    pub score_delta: f64,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            min_iterations: 3,
            stagnation_start_loop: 10,
            window: 3,
            similarity_threshold: 0.95,
            score_delta: 0.01,
        }
    }
}

/// One recorded iteration for similarity purposes.
#[derive(Debug, Clone)]
struct IterationSample {
    artifact: String,
    score: f64,
    issue_signatures: Vec<String>,
}

/// Report on whether a session is still making progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAnalysis {
    /// Whether the stagnation rule fired
    pub is_stagnant: bool,
    /// Mean pairwise composite similarity over the window
    pub average_similarity: f64,
    /// Pairwise similarities, most recent pair last
    pub pair_similarities: Vec<f64>,
    /// Recent iterations keep surfacing the same issues
    pub stuck_on_same_issues: bool,
    /// Changes between recent iterations are cosmetic only
    pub cosmetic_changes_only: bool,
    /// The current iteration closely resembles the one before last
    pub reverting_changes: bool,
    /// Scores are declining across most of the window
    pub shows_confusion: bool,
    /// Alternative approaches suggested from the flags above
    pub suggestions: Vec<String>,
}

impl ProgressAnalysis {
    fn no_signal() -> Self {
        Self {
            is_stagnant: false,
            average_similarity: 0.0,
            pair_similarities: Vec::new(),
            stuck_on_same_issues: false,
            cosmetic_changes_only: false,
            reverting_changes: false,
            shows_confusion: false,
            suggestions: Vec::new(),
        }
    }

    /// Human-readable diagnostic for completion messages.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!(
            "Successive iterations are {:.0}% similar and no longer improving",
            self.average_similarity * 100.0
        )];
        if self.cosmetic_changes_only {
            parts.push("recent changes are cosmetic only".to_string());
        }
        if self.reverting_changes {
            parts.push("recent changes revert earlier ones".to_string());
        }
        if self.shows_confusion {
            parts.push("scores are declining".to_string());
        }
        parts.join("; ")
    }

    #[cfg(test)]
    pub fn stagnant_for_test(average_similarity: f64) -> Self {
        Self {
            is_stagnant: true,
            average_similarity,
            pair_similarities: vec![average_similarity; 3],
            stuck_on_same_issues: false,
            cosmetic_changes_only: true,
            reverting_changes: false,
            shows_confusion: false,
            suggestions: vec!["try a different decomposition".to_string()],
        }
    }
}

/// Per-session similarity tracker and stagnation detector.
pub struct StagnationAnalyzer {
    config: StagnationConfig,
    history: Mutex<HashMap<String, VecDeque<IterationSample>>>,
}

impl StagnationAnalyzer {
    pub fn new(config: StagnationConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StagnationConfig {
        &self.config
    }

    /// Record an iteration for later analysis. Keeps one more sample than the
    /// comparison window so reversion can look back to N-2.
    pub fn record(
        &self,
        session_id: &str,
        artifact: &str,
        score: f64,
        issue_signatures: Vec<String>,
    ) {
        let mut history = self.history.lock().expect("stagnation history lock");
        let samples = history.entry(session_id.to_string()).or_default();
        samples.push_back(IterationSample {
            artifact: artifact.to_string(),
            score,
            issue_signatures,
        });
        while samples.len() > self.config.window + 2 {
            samples.pop_front();
        }
    }

    /// Drop a session's samples.
    pub fn clear(&self, session_id: &str) {
        let mut history = self.history.lock().expect("stagnation history lock");
        history.remove(session_id);
    }

    /// Analyze the session's recent iterations.
    ///
    /// Returns `None` until enough iterations are recorded or while the loop
    /// counter has not reached the stagnation start loop.
    pub fn analyze(&self, session_id: &str, current_loop: u32) -> Option<ProgressAnalysis> {
        let history = self.history.lock().expect("stagnation history lock");
        let samples = history.get(session_id)?;
        if samples.len() < self.config.min_iterations {
            return None;
        }
        if current_loop < self.config.stagnation_start_loop {
            // Flags are still useful early; stagnation itself never fires.
            let mut analysis = self.analyze_window(samples);
            analysis.is_stagnant = false;
            return Some(analysis);
        }
        Some(self.analyze_window(samples))
    }

    fn analyze_window(&self, samples: &VecDeque<IterationSample>) -> ProgressAnalysis {
        let window: Vec<&IterationSample> = samples
            .iter()
            .rev()
            .take(self.config.window)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        if window.len() < 2 {
            return ProgressAnalysis::no_signal();
        }

        let mut pair_similarities = Vec::new();
        for pair in window.windows(2) {
            pair_similarities.push(composite_similarity(&pair[0].artifact, &pair[1].artifact));
        }
        // All unordered pairs in the window, not just adjacent ones.
        for i in 0..window.len() {
            for j in (i + 2)..window.len() {
                pair_similarities.push(composite_similarity(&window[i].artifact, &window[j].artifact));
            }
        }

        let average_similarity =
            pair_similarities.iter().sum::<f64>() / pair_similarities.len() as f64;
        let above = pair_similarities
            .iter()
            .filter(|s| **s > self.config.similarity_threshold)
            .count();
        let majority_above = above * 2 > pair_similarities.len();

        let scores: Vec<f64> = window.iter().map(|s| s.score).collect();
        let non_improving = scores
            .windows(2)
            .all(|pair| pair[1] - pair[0] <= self.config.score_delta);
        let declines = scores.windows(2).filter(|pair| pair[1] < pair[0]).count();
        let shows_confusion = declines * 2 > scores.len();

        let cosmetic_changes_only = window
            .windows(2)
            .all(|pair| is_cosmetic_change(&pair[0].artifact, &pair[1].artifact));

        let reverting_changes = if window.len() >= 3 {
            composite_similarity(
                &window[window.len() - 1].artifact,
                &window[window.len() - 3].artifact,
            ) >= 0.9
        } else {
            false
        };

        let stuck_on_same_issues = window.windows(2).all(|pair| {
            let a: HashSet<&String> = pair[0].issue_signatures.iter().collect();
            let b: HashSet<&String> = pair[1].issue_signatures.iter().collect();
            if a.is_empty() || b.is_empty() {
                return false;
            }
            let shared = a.intersection(&b).count();
            shared * 2 >= a.len().max(b.len())
        });

        let is_stagnant = (average_similarity > self.config.similarity_threshold
            && majority_above)
            || (non_improving && average_similarity > self.config.similarity_threshold);

        let mut analysis = ProgressAnalysis {
            is_stagnant,
            average_similarity,
            pair_similarities,
            stuck_on_same_issues,
            cosmetic_changes_only,
            reverting_changes,
            shows_confusion,
            suggestions: Vec::new(),
        };
        analysis.suggestions = suggestions_for(&analysis);
        analysis
    }
}

impl Default for StagnationAnalyzer {
    fn default() -> Self {
        Self::new(StagnationConfig::default())
    }
}

fn suggestions_for(analysis: &ProgressAnalysis) -> Vec<String> {
    let mut suggestions = Vec::new();
    if analysis.cosmetic_changes_only {
        suggestions.push(
            "Recent revisions only reformat; restructure the failing logic instead".to_string(),
        );
    }
    if analysis.stuck_on_same_issues {
        suggestions.push(
            "The same findings recur; address the cited evidence directly before polishing"
                .to_string(),
        );
    }
    if analysis.reverting_changes {
        suggestions
            .push("Revisions are undoing earlier ones; pick one direction and commit".to_string());
    }
    if analysis.shows_confusion {
        suggestions.push(
            "Scores are declining; re-read the task and roll back to the best-scoring revision"
                .to_string(),
        );
    }
    if suggestions.is_empty() && analysis.is_stagnant {
        suggestions.push(
            "Try a different decomposition of the problem rather than further small edits"
                .to_string(),
        );
    }
    suggestions
}

/// Composite similarity in 0..=1.
pub fn composite_similarity(a: &str, b: &str) -> f64 {
    EDIT_WEIGHT * edit_similarity(a, b)
        + TOKEN_WEIGHT * token_jaccard(a, b)
        + STRUCTURAL_WEIGHT * structural_jaccard(a, b)
}

/// Edit-distance similarity over whitespace-collapsed text. Long inputs are
/// sampled (beginning, middle, end) to bound the quadratic distance cost.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_whitespace(a);
    let b = normalize_whitespace(b);
    let a = sample_long(&a);
    let b = sample_long(&b);

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Jaccard similarity over lowercased whitespace tokens.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = a.split_whitespace().map(|t| t.to_lowercase()).collect();
    let tb: HashSet<String> = b.split_whitespace().map(|t| t.to_lowercase()).collect();
    jaccard(&ta, &tb)
}

/// Jaccard similarity over structural tokens: declared names, import
/// targets, and control-flow keywords.
pub fn structural_jaccard(a: &str, b: &str) -> f64 {
    jaccard(&structural_tokens(a), &structural_tokens(b))
}

/// Whether the change between two revisions is cosmetic only: equal under
/// strict normalization, or ≥0.98 similar.
pub fn is_cosmetic_change(a: &str, b: &str) -> bool {
    let sa = strict_normalize(a);
    let sb = strict_normalize(b);
    if sa == sb {
        return true;
    }
    let max_len = sa.chars().count().max(sb.chars().count());
    if max_len == 0 {
        return true;
    }
    let sa = sample_long(&sa);
    let sb = sample_long(&sb);
    let max_len = sa.chars().count().max(sb.chars().count());
    1.0 - levenshtein(&sa, &sb) as f64 / max_len as f64 >= 0.98
}

fn structural_tokens(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for cap in DECL_RE.captures_iter(text) {
        tokens.insert(format!("decl:{}", &cap[1]));
    }
    for cap in IMPORT_RE.captures_iter(text) {
        tokens.insert(format!("import:{}", cap[1].trim_matches(|c| c == '"' || c == '\'')));
    }
    for cap in CONTROL_RE.captures_iter(text) {
        tokens.insert(format!("kw:{}", &cap[1]));
    }
    tokens
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strict_normalize(text: &str) -> String {
    let collapsed = normalize_whitespace(text);
    PUNCT_SPACING_RE.replace_all(&collapsed, "$1").into_owned()
}

fn sample_long(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= EDIT_SAMPLE_THRESHOLD {
        return text.to_string();
    }
    let seg = EDIT_SAMPLE_SEGMENT;
    let middle_start = chars.len() / 2 - seg / 2;
    let mut sampled = String::with_capacity(seg * 3);
    sampled.extend(&chars[..seg]);
    sampled.extend(&chars[middle_start..middle_start + seg]);
    sampled.extend(&chars[chars.len() - seg..]);
    sampled
}

/// Classic two-row Levenshtein distance over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
