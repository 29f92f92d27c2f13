//! Assertion classifier - maps contract clauses to verification strategies
//!
//! A clause's category comes from its lexical prefix (`input.*`, `system.*`)
//! and the contract section it sits in. Each category has a strategy and the
//! level that strategy yields by default; the verifier may refine the level
//! when the semantic model confirms something stronger.
//!
//! The word helpers here implement whole-word matching: `Error` matches
//! `throw Error(...)` but not `ErrorHandler`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Levels, sections, categories ──────────────────────────

/// Confidence attached to one assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationLevel {
    /// Syntactically conclusive
    Proven,
    /// Deferred to a runtime check
    Instrumented,
    /// Covered by generated tests (never assigned by this crate)
    Tested,
    /// Needs human judgment
    Unverifiable,
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerificationLevel::Proven => write!(f, "PROVEN"),
            VerificationLevel::Instrumented => write!(f, "INSTRUMENTED"),
            VerificationLevel::Tested => write!(f, "TESTED"),
            VerificationLevel::Unverifiable => write!(f, "UNVERIFIABLE"),
        }
    }
}

/// Contract section a clause came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Requires,
    OnSuccess,
    OnFailure,
    Invariants,
    Fails,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Section::Requires => write!(f, "requires"),
            Section::OnSuccess => write!(f, "on_success"),
            Section::OnFailure => write!(f, "on_failure"),
            Section::Invariants => write!(f, "invariants"),
            Section::Fails => write!(f, "fails"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseCategory {
    /// `input.X ...`
    InputPrecondition,
    /// `system.X ...`
    SystemPrecondition,
    /// Any other `requires` clause
    Precondition,
    SuccessGuarantee,
    FailureGuarantee,
    Invariant,
    FailureMode,
}

impl fmt::Display for ClauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClauseCategory::InputPrecondition => write!(f, "input precondition"),
            ClauseCategory::SystemPrecondition => write!(f, "system precondition"),
            ClauseCategory::Precondition => write!(f, "precondition"),
            ClauseCategory::SuccessGuarantee => write!(f, "success guarantee"),
            ClauseCategory::FailureGuarantee => write!(f, "failure guarantee"),
            ClauseCategory::Invariant => write!(f, "invariant"),
            ClauseCategory::FailureMode => write!(f, "failure mode"),
        }
    }
}

/// How a clause is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Look for a parameter supplying input field `field`
    ParameterSearch { field: String },
    /// Confirm a returned object literal carries every field
    ReturnShape { fields: Vec<String> },
    /// Look for the subjects inside logging/output calls
    ExposureScan { subjects: Vec<String> },
    /// Whole-word search of the implementation text
    WordSearch { word: String },
    /// Runtime lifetime claims; never checkable from syntax
    MemoryLifetime,
    /// Defer to a runtime guard
    RuntimeCheck,
    /// Nothing to check; flag for review
    HumanReview,
}

/// Category, strategy and default level for one clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: ClauseCategory,
    pub strategy: Strategy,
    pub default_level: VerificationLevel,
}

impl Classification {
    fn new(category: ClauseCategory, strategy: Strategy) -> Self {
        let default_level = match strategy {
            Strategy::ParameterSearch { .. }
            | Strategy::ExposureScan { .. }
            | Strategy::WordSearch { .. } => VerificationLevel::Proven,
            Strategy::ReturnShape { .. } | Strategy::MemoryLifetime | Strategy::RuntimeCheck => {
                VerificationLevel::Instrumented
            }
            Strategy::HumanReview => VerificationLevel::Unverifiable,
        };
        Self {
            category,
            strategy,
            default_level,
        }
    }
}

// ── Public API ────────────────────────────────────────────

/// Classify a clause from a contract section
pub fn classify(section: Section, text: &str) -> Classification {
    let text = text.trim();
    let category = match section {
        Section::Requires => requires_category(text),
        Section::OnSuccess => ClauseCategory::SuccessGuarantee,
        Section::OnFailure => ClauseCategory::FailureGuarantee,
        Section::Invariants => ClauseCategory::Invariant,
        Section::Fails => ClauseCategory::FailureMode,
    };

    if text.is_empty() {
        return Classification::new(category, Strategy::HumanReview);
    }

    let strategy = match category {
        ClauseCategory::InputPrecondition => match input_field(text) {
            Some(field) => Strategy::ParameterSearch { field },
            None => Strategy::RuntimeCheck,
        },
        ClauseCategory::SystemPrecondition | ClauseCategory::Precondition => Strategy::RuntimeCheck,
        ClauseCategory::SuccessGuarantee | ClauseCategory::FailureGuarantee => {
            let fields = shape_fields(text);
            if fields.is_empty() {
                Strategy::RuntimeCheck
            } else {
                Strategy::ReturnShape { fields }
            }
        }
        ClauseCategory::Invariant => invariant_strategy(text),
        ClauseCategory::FailureMode => Strategy::WordSearch {
            word: text.to_string(),
        },
    };
    Classification::new(category, strategy)
}

/// Classify a named failure mode by its error type
pub fn classify_failure_mode(error_type: &str) -> Classification {
    classify(Section::Fails, error_type)
}

fn requires_category(text: &str) -> ClauseCategory {
    if text.starts_with("input.") {
        ClauseCategory::InputPrecondition
    } else if text.starts_with("system.") {
        ClauseCategory::SystemPrecondition
    } else {
        ClauseCategory::Precondition
    }
}

/// `input.name is String` → `name`
pub fn input_field(text: &str) -> Option<String> {
    let rest = text.trim().strip_prefix("input.")?;
    let field: String = rest.chars().take_while(|&c| is_ident_char(c)).collect();
    (!field.is_empty()).then_some(field)
}

/// Output fields named by a guarantee: `result.token`, `returns {token, user}`
pub fn shape_fields(text: &str) -> Vec<String> {
    const ROOTS: &[&str] = &["result", "output", "response", "returns", "return"];
    let mut fields = Vec::new();

    for root in ROOTS {
        let pattern = format!("{}.", root);
        for (start, _) in text.match_indices(&pattern) {
            if start > 0 && text[..start].chars().next_back().is_some_and(is_ident_char) {
                continue;
            }
            let field: String = text[start + pattern.len()..]
                .chars()
                .take_while(|&c| is_ident_char(c))
                .collect();
            if !field.is_empty() && !fields.contains(&field) {
                fields.push(field);
            }
        }
    }

    if let (Some(open), Some(close)) = (text.find('{'), text.rfind('}')) {
        if open < close {
            for piece in text[open + 1..close].split(',') {
                let field = piece.trim();
                if !field.is_empty() && field.chars().all(is_ident_char) && !fields.iter().any(|f| f == field) {
                    fields.push(field.to_string());
                }
            }
        }
    }

    fields
}

// ── Invariants ────────────────────────────────────────────

const MEMORY_MARKERS: &[&str] = &["memory", "zeroed", "wiped", "held"];
const EXPOSURE_MARKERS: &[&str] = &[
    "expos", "logged", "logging", "logs", "leak", "reveal", "print", "output", "display",
];
const NEGATIONS: &[&str] = &["never", "not", "no"];
const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "be", "must", "should", "shall", "will", "any", "all", "its",
    "their", "of", "in", "to", "and", "or", "it", "this", "that", "value", "field",
];

fn invariant_strategy(text: &str) -> Strategy {
    let lower = text.to_lowercase();
    if MEMORY_MARKERS.iter().any(|m| lower.contains(m)) {
        return Strategy::MemoryLifetime;
    }

    let negation = NEGATIONS
        .iter()
        .filter_map(|n| find_word(&lower, n))
        .min();
    let exposure =
        EXPOSURE_MARKERS.iter().any(|m| lower.contains(m)) || contains_word(&lower, "log");
    match negation {
        Some(at) if exposure => {
            let subjects = exposure_subjects(text.get(..at).unwrap_or(text));
            if subjects.is_empty() {
                Strategy::RuntimeCheck
            } else {
                Strategy::ExposureScan { subjects }
            }
        }
        _ => Strategy::RuntimeCheck,
    }
}

/// Sensitive identifiers named before the negation
///
/// `input.password` yields `password`; `api key` yields `key`, `apiKey` and
/// `api_key`; lists split on `and`, `or` and commas.
pub fn exposure_subjects(text: &str) -> Vec<String> {
    let mut subjects = Vec::new();
    let mut push = |s: String| {
        if !subjects.contains(&s) {
            subjects.push(s);
        }
    };

    let normalized = text.replace(',', " and ");
    let mut group: Vec<String> = Vec::new();
    let words = normalized
        .split_whitespace()
        .chain(std::iter::once("and"));
    for raw in words {
        let lower = raw.to_lowercase();
        if lower == "and" || lower == "or" {
            match group.len() {
                0 => {}
                1 => push(group[0].clone()),
                _ => {
                    if let Some(last) = group.last() {
                        push(last.clone());
                    }
                    push(camel_case(&group));
                    push(group.join("_").to_lowercase());
                }
            }
            group.clear();
            continue;
        }
        let word = raw
            .rsplit('.')
            .next()
            .unwrap_or(raw)
            .trim_matches(|c: char| !is_ident_char(c));
        if word.is_empty() || STOPWORDS.contains(&word.to_lowercase().as_str()) {
            continue;
        }
        group.push(word.to_string());
    }
    subjects
}

fn camel_case(words: &[String]) -> String {
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

// ── Word helpers ──────────────────────────────────────────

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Byte offset of the first whole-word occurrence of `word`
pub fn find_word(haystack: &str, word: &str) -> Option<usize> {
    if word.is_empty() {
        return None;
    }
    haystack.match_indices(word).map(|(at, _)| at).find(|&at| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + word.len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    })
}

pub fn contains_word(haystack: &str, word: &str) -> bool {
    find_word(haystack, word).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(section: Section, text: &str) -> Strategy {
        classify(section, text).strategy
    }

    // ── Categories ─────────────────────────────────────

    #[test]
    fn test_requires_categories() {
        let c = classify(Section::Requires, "input.name is String");
        assert_eq!(c.category, ClauseCategory::InputPrecondition);
        assert_eq!(c.strategy, Strategy::ParameterSearch { field: "name".into() });
        assert_eq!(c.default_level, VerificationLevel::Proven);

        let c = classify(Section::Requires, "system.database is active");
        assert_eq!(c.category, ClauseCategory::SystemPrecondition);
        assert_eq!(c.default_level, VerificationLevel::Instrumented);

        let c = classify(Section::Requires, "caller is authenticated");
        assert_eq!(c.category, ClauseCategory::Precondition);
        assert_eq!(c.strategy, Strategy::RuntimeCheck);
    }

    #[test]
    fn test_empty_clause_is_unverifiable() {
        let c = classify(Section::OnSuccess, "   ");
        assert_eq!(c.strategy, Strategy::HumanReview);
        assert_eq!(c.default_level, VerificationLevel::Unverifiable);
    }

    #[test]
    fn test_guarantees() {
        assert_eq!(
            strategy(Section::OnSuccess, "result.token is a signed JWT and result.user is set"),
            Strategy::ReturnShape {
                fields: vec!["token".into(), "user".into()]
            }
        );
        assert_eq!(
            strategy(Section::OnSuccess, "returns {token, expiresAt}"),
            Strategy::ReturnShape {
                fields: vec!["token".into(), "expiresAt".into()]
            }
        );
        assert_eq!(strategy(Section::OnFailure, "no session is created"), Strategy::RuntimeCheck);
        assert_eq!(
            classify(Section::OnFailure, "no session is created").category,
            ClauseCategory::FailureGuarantee
        );
    }

    #[test]
    fn test_invariants() {
        assert_eq!(
            strategy(Section::Invariants, "input.password is never exposed in output or logs"),
            Strategy::ExposureScan {
                subjects: vec!["password".into()]
            }
        );
        assert_eq!(
            strategy(Section::Invariants, "password never held in memory after comparison"),
            Strategy::MemoryLifetime
        );
        assert_eq!(
            strategy(Section::Invariants, "balance is never negative"),
            Strategy::RuntimeCheck
        );
    }

    #[test]
    fn test_exposure_subjects() {
        assert_eq!(exposure_subjects("User password is "), vec!["password", "userPassword", "user_password"]);
        assert_eq!(exposure_subjects("token, secret and apiKey "), vec!["token", "secret", "apiKey"]);
        assert!(exposure_subjects("it is ").is_empty());
    }

    #[test]
    fn test_failure_mode_classification() {
        let c = classify_failure_mode("NetworkError");
        assert_eq!(c.category, ClauseCategory::FailureMode);
        assert_eq!(c.strategy, Strategy::WordSearch { word: "NetworkError".into() });
        assert_eq!(classify_failure_mode("").strategy, Strategy::HumanReview);
    }

    // ── Word helpers ───────────────────────────────────

    #[test]
    fn test_whole_word_matching() {
        assert!(contains_word("throw new Error('x')", "Error"));
        assert!(!contains_word("class ErrorHandler {}", "Error"));
        assert!(!contains_word("const MyError = 1", "Error"));
        assert!(!contains_word("const $Error = 1", "Error"));
        assert!(contains_word("ErrorHandler; Error", "Error"));
        assert_eq!(find_word("a Error", "Error"), Some(2));
        assert!(!contains_word("anything", ""));
    }

    #[test]
    fn test_level_serialization() {
        assert_eq!(serde_json::to_string(&VerificationLevel::Unverifiable).unwrap(), "\"UNVERIFIABLE\"");
        assert_eq!(serde_json::to_string(&Section::OnSuccess).unwrap(), "\"on_success\"");
    }
}
