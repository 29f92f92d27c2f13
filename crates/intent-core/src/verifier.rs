//! Contract verifier - checks an implementation against its contract
//!
//! Produces exactly one assertion per clause and per failure mode, in
//! contract order: `requires`, `on_success`, `on_failure`, `invariants`,
//! then `fails`. Advisories pass through untouched.
//!
//! # Architecture
//!
//! Every rule branches explicitly on the semantic model being present. Word
//! search over the raw implementation text is the baseline; the model only
//! adds evidence (a parameter binding, a catch handler, a logging call) and
//! never overrides a text-level hit.
//!
//! # Rules
//!
//! 1. **Input preconditions**: a parameter supplies the field, else the field
//!    is referenced in the text; absence is a proven failure
//! 2. **System preconditions**: instrumented, optimistic
//! 3. **Guarantees**: proven when a returned object carries the named fields,
//!    otherwise instrumented
//! 4. **Exposure invariants**: proven pass/fail from logging calls and
//!    returned keys; memory-lifetime invariants are instrumented
//! 5. **Failure modes**: whole-word search for the error type
//! 6. **Advisories**: passed through

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::{
    self, contains_word, ClauseCategory, Classification, Section, Strategy, VerificationLevel,
};
use crate::config::VerifierOptions;
use crate::model::SemanticModel;
use crate::{Advisory, FailureMode, Unit};

// ── Verification Result Types ─────────────────────────────

/// Outcome for one clause or failure mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationAssertion {
    pub assertion_text: String,
    pub section: Section,
    pub passed: bool,
    pub level: VerificationLevel,
    pub message: String,
}

impl VerificationAssertion {
    fn new(section: Section, text: &str, passed: bool, level: VerificationLevel, message: String) -> Self {
        Self {
            assertion_text: text.to_string(),
            section,
            passed,
            level,
            message,
        }
    }
}

impl fmt::Display for VerificationAssertion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mark = if self.passed { "pass" } else { "FAIL" };
        write!(
            f,
            "[{}] {} {}: {} ({})",
            mark, self.level, self.section, self.assertion_text, self.message
        )
    }
}

/// Overall unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Proven,
    Failed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerificationStatus::Proven => write!(f, "PROVEN"),
            VerificationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of verifying one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub unit_id: String,
    pub status: VerificationStatus,
    pub assertions: Vec<VerificationAssertion>,
    pub advisories: Vec<Advisory>,
    /// SHA-256 of the unit's canonical JSON
    pub fingerprint: String,
}

impl VerificationResult {
    pub fn is_proven(&self) -> bool {
        self.status == VerificationStatus::Proven
    }

    /// Assertions that did not pass
    pub fn failures(&self) -> Vec<&VerificationAssertion> {
        self.assertions.iter().filter(|a| !a.passed).collect()
    }

    /// Assertions at `level`
    pub fn at_level(&self, level: VerificationLevel) -> Vec<&VerificationAssertion> {
        self.assertions.iter().filter(|a| a.level == level).collect()
    }

    /// Number of assertions per level
    pub fn level_counts(&self) -> BTreeMap<VerificationLevel, usize> {
        let mut counts = BTreeMap::new();
        for assertion in &self.assertions {
            *counts.entry(assertion.level).or_insert(0) += 1;
        }
        counts
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let counts: Vec<String> = self
            .level_counts()
            .iter()
            .map(|(level, n)| format!("{} {}", n, level))
            .collect();
        write!(f, "{}: {}", self.unit_id, self.status)?;
        if !counts.is_empty() {
            write!(f, " ({}", counts.join(", "))?;
            let failed = self.failures().len();
            if failed > 0 {
                write!(f, "; {} failed", failed)?;
            }
            write!(f, ")")?;
        }
        for assertion in &self.assertions {
            write!(f, "\n  {}", assertion)?;
        }
        for advisory in &self.advisories {
            write!(f, "\n  [advisory] {}", advisory)?;
        }
        Ok(())
    }
}

// ── Public API ────────────────────────────────────────────

/// Verify a unit against its semantic model (`None` when the implementation
/// did not parse).
///
/// Deterministic and side-effect free: the same inputs always produce an
/// identical result, and `unit` is never modified.
pub fn verify(unit: &Unit, model: Option<&SemanticModel>, options: &VerifierOptions) -> VerificationResult {
    let contract = &unit.contract;
    let checker = Checker { unit, model, options };

    let sections = [
        (Section::Requires, &contract.requires),
        (Section::OnSuccess, &contract.on_success),
        (Section::OnFailure, &contract.on_failure),
        (Section::Invariants, &contract.invariants),
    ];

    let mut assertions = Vec::new();
    for (section, clauses) in sections {
        for clause in clauses.iter() {
            assertions.push(checker.check_clause(section, clause));
        }
    }
    for failure_mode in &contract.fails {
        assertions.push(checker.check_failure_mode(failure_mode));
    }

    let status = if assertions.iter().all(|a| a.passed) {
        VerificationStatus::Proven
    } else {
        VerificationStatus::Failed
    };
    debug!(unit = %unit.id, %status, assertions = assertions.len(), "verified unit");

    VerificationResult {
        unit_id: unit.id.clone(),
        status,
        assertions,
        advisories: contract.advisories.clone(),
        fingerprint: unit.fingerprint(),
    }
}

// ── Rules ─────────────────────────────────────────────────

struct Checker<'a> {
    unit: &'a Unit,
    model: Option<&'a SemanticModel>,
    options: &'a VerifierOptions,
}

impl<'a> Checker<'a> {
    fn text(&self) -> &'a str {
        &self.unit.implementation_text
    }

    fn check_clause(&self, section: Section, clause: &str) -> VerificationAssertion {
        let Classification {
            category,
            strategy,
            default_level,
        } = classifier::classify(section, clause);

        let (passed, level, message) = match strategy {
            Strategy::ParameterSearch { field } => self.input_field(&field),
            Strategy::ReturnShape { fields } => self.return_shape(&fields),
            Strategy::ExposureScan { subjects } => self.exposure(&subjects),
            Strategy::WordSearch { word } => self.word_search(&word),
            Strategy::MemoryLifetime => (
                true,
                default_level,
                "memory lifetime cannot be checked syntactically; deferred to runtime check".to_string(),
            ),
            Strategy::RuntimeCheck => {
                let message = match category {
                    ClauseCategory::SystemPrecondition => {
                        "external dependency; checked at runtime before execution".to_string()
                    }
                    _ => format!("{} not statically confirmable; deferred to runtime check", category),
                };
                (true, default_level, message)
            }
            Strategy::HumanReview => (
                true,
                default_level,
                "no checkable text; flagged for human review".to_string(),
            ),
        };

        VerificationAssertion::new(section, clause, passed, level, message)
    }

    fn check_failure_mode(&self, failure_mode: &FailureMode) -> VerificationAssertion {
        let text = failure_mode.assertion_text();
        let classification = classifier::classify_failure_mode(&failure_mode.error_type);
        let (passed, level, message) = match classification.strategy {
            Strategy::WordSearch { word } => self.word_search(&word),
            _ => (
                true,
                classification.default_level,
                "failure mode names no error type; flagged for human review".to_string(),
            ),
        };
        VerificationAssertion::new(Section::Fails, &text, passed, level, message)
    }

    /// Rule 1
    fn input_field(&self, field: &str) -> (bool, VerificationLevel, String) {
        if let Some(evidence) = self.model.and_then(|m| m.input_field_evidence(field)) {
            return (true, VerificationLevel::Proven, format!("input field `{}`: {}", field, evidence));
        }
        if contains_word(self.text(), field) {
            (
                true,
                VerificationLevel::Proven,
                format!("`{}` referenced in implementation", field),
            )
        } else {
            (
                false,
                VerificationLevel::Proven,
                format!("input field `{}` is not referenced in implementation", field),
            )
        }
    }

    /// Rule 3
    fn return_shape(&self, fields: &[String]) -> (bool, VerificationLevel, String) {
        match self.model.and_then(|m| m.return_shape_with(fields)) {
            Some(shape) => (
                true,
                VerificationLevel::Proven,
                format!("returned object at {} carries `{}`", shape.span, fields.join("`, `")),
            ),
            None => (
                true,
                VerificationLevel::Instrumented,
                "return shape not confirmed statically; deferred to runtime check".to_string(),
            ),
        }
    }

    /// Rule 4
    fn exposure(&self, subjects: &[String]) -> (bool, VerificationLevel, String) {
        let level = VerificationLevel::Proven;

        if let Some(model) = self.model {
            for subject in subjects {
                if let Some(call) = model.logging_calls_with(subject, self.options).first() {
                    return (
                        false,
                        level,
                        format!("`{}` passed to `{}` at {}", subject, call.callee, call.span),
                    );
                }
                if let Some(shape) = model.returned_with_key(subject) {
                    return (
                        false,
                        level,
                        format!("`{}` exposed in returned object at {}", subject, shape.span),
                    );
                }
            }
        }

        // text hits stand whether or not a model exists
        let markers = self.options.text_markers();
        for (n, line) in self.text().lines().enumerate() {
            for subject in subjects {
                if let Some(marker) = logging_marker_before(line, &markers, subject, self.options) {
                    return (
                        false,
                        level,
                        format!(
                            "`{}` appears in `{}` call on line {}",
                            subject,
                            marker.trim_end_matches(['.', '(']),
                            n + 1
                        ),
                    );
                }
            }
        }

        let model = match self.model {
            Some(model) => model,
            None => {
                return (
                    true,
                    level,
                    format!(
                        "no logging or output exposure of `{}` (text scan)",
                        subjects.join("`, `")
                    ),
                )
            }
        };
        let safe: Vec<&str> = subjects
            .iter()
            .flat_map(|s| model.safe_calls_with(s, self.options))
            .map(|call| call.callee.as_str())
            .collect();
        if safe.is_empty() {
            (
                true,
                level,
                format!("no logging or output exposure of `{}`", subjects.join("`, `")),
            )
        } else {
            (
                true,
                level,
                format!(
                    "`{}` only reaches comparison/hashing calls (`{}`)",
                    subjects.join("`, `"),
                    safe.join("`, `")
                ),
            )
        }
    }

    /// Rule 5
    fn word_search(&self, word: &str) -> (bool, VerificationLevel, String) {
        if !contains_word(self.text(), word) {
            return (
                false,
                VerificationLevel::Proven,
                format!("`{}` not found in implementation", word),
            );
        }

        let mut message = format!("`{}` referenced in implementation", word);
        if let Some(model) = self.model {
            if let Some(handler) = model.handler_for(word) {
                message.push_str(&format!("; handled in catch at {}", handler.span));
            } else if let Some(site) = model.throw_site(word) {
                message.push_str(&format!("; thrown at {}", site.span));
            }
        }
        (true, VerificationLevel::Proven, message)
    }
}

/// The logging marker on `line` whose call arguments mention `subject`, if any
fn logging_marker_before<'m>(
    line: &str,
    markers: &'m [String],
    subject: &str,
    options: &VerifierOptions,
) -> Option<&'m str> {
    markers.iter().map(String::as_str).find(|marker| {
        line.match_indices(*marker).any(|(at, _)| {
            let boundary = !line[..at].chars().next_back().is_some_and(classifier::is_ident_char);
            // `print(` markers already include the call paren
            let rest = &line[at + marker.len() - usize::from(marker.ends_with('('))..];
            boundary && contains_word(&exposed_arguments(rest, options), subject)
        })
    })
}

/// Argument text of the call that `rest` continues, with comparison/hash call groups blanked
///
/// `rest` starts at the callee tail (`log(...)` after `console.`) or at the call paren.
/// An unclosed call runs to the end of the line.
fn exposed_arguments(rest: &str, options: &VerifierOptions) -> String {
    let open = match rest.find('(') {
        Some(open) => open,
        None => return String::new(),
    };
    if !rest[..open]
        .chars()
        .all(|c| classifier::is_ident_char(c) || c == '.')
    {
        return String::new();
    }

    let mut out = String::new();
    let mut callee = String::new();
    let mut open_callees: Vec<String> = Vec::new();
    let mut shielded_at: Option<usize> = None;

    for c in rest[open + 1..].chars() {
        match c {
            '(' => {
                let segments: Vec<&str> = callee.split('.').map(|s| s.trim_end_matches("()")).collect();
                if shielded_at.is_none() && !callee.is_empty() && options.is_safe_callee(&segments) {
                    shielded_at = Some(open_callees.len());
                }
                open_callees.push(std::mem::take(&mut callee));
            }
            ')' => {
                let inner = match open_callees.pop() {
                    Some(inner) => inner,
                    None => break,
                };
                if shielded_at == Some(open_callees.len()) {
                    shielded_at = None;
                }
                callee = format!("{}()", inner);
            }
            c if classifier::is_ident_char(c) || c == '.' => callee.push(c),
            _ => callee.clear(),
        }
        out.push(if shielded_at.is_some() { ' ' } else { c });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Contract;

    fn unit(contract: Contract, text: &str) -> Unit {
        Unit {
            id: "app.test".to_string(),
            purpose: "test unit".to_string(),
            contract,
            implementation_text: text.to_string(),
            implementation_path: None,
        }
    }

    fn run(unit: &Unit) -> VerificationResult {
        let model = SemanticModel::from_source(&unit.implementation_text).ok();
        verify(unit, model.as_ref(), &VerifierOptions::default())
    }

    fn run_without_model(unit: &Unit) -> VerificationResult {
        verify(unit, None, &VerifierOptions::default())
    }

    fn requires(clauses: &[&str]) -> Contract {
        Contract {
            requires: clauses.iter().map(|s| s.to_string()).collect(),
            ..Contract::default()
        }
    }

    fn invariants(clauses: &[&str]) -> Contract {
        Contract {
            invariants: clauses.iter().map(|s| s.to_string()).collect(),
            ..Contract::default()
        }
    }

    fn fails(error_type: &str) -> Contract {
        Contract {
            fails: vec![FailureMode {
                error_type: error_type.to_string(),
                handling_strategy: "retry".to_string(),
            }],
            ..Contract::default()
        }
    }

    // ── Input preconditions ────────────────────────────

    #[test]
    fn test_input_field_proven() {
        let u = unit(requires(&["input.name is String"]), "function greet(input){ return \"Hi \" + input.name }");
        let result = run(&u);
        assert_eq!(result.status, VerificationStatus::Proven);
        let a = &result.assertions[0];
        assert!(a.passed);
        assert_eq!(a.level, VerificationLevel::Proven);
        assert_eq!(a.section, Section::Requires);
        assert!(a.message.contains("input.name"), "{}", a.message);
    }

    #[test]
    fn test_input_field_absent_fails() {
        let u = unit(requires(&["input.name is String"]), "function greet(){ return \"Hi\" }");
        let result = run(&u);
        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(!result.assertions[0].passed);
        assert_eq!(result.assertions[0].level, VerificationLevel::Proven);
    }

    #[test]
    fn test_input_field_text_fallback() {
        let broken = "function greet(input { return input.name";
        let u = unit(requires(&["input.name is String"]), broken);
        assert!(SemanticModel::from_source(broken).is_err());
        let result = run(&u);
        assert!(result.assertions[0].passed);
        assert_eq!(result.assertions[0].level, VerificationLevel::Proven);

        let u = unit(requires(&["input.age is Integer"]), broken);
        assert!(!run(&u).assertions[0].passed);
    }

    // ── System preconditions & guarantees ──────────────

    #[test]
    fn test_system_precondition_instrumented() {
        let u = unit(requires(&["system.database is active"]), "function f() {}");
        let a = &run(&u).assertions[0];
        assert!(a.passed);
        assert_eq!(a.level, VerificationLevel::Instrumented);
    }

    #[test]
    fn test_guarantee_return_shape() {
        let contract = Contract {
            on_success: vec!["result.token is issued".into(), "session is persisted".into()],
            on_failure: vec!["result.error describes the problem".into()],
            ..Contract::default()
        };
        let u = unit(contract, "function login(u) { if (!u) return { error: 'no user' }\n return { token: sign(u), user: u } }");
        let result = run(&u);
        assert_eq!(result.assertions[0].level, VerificationLevel::Proven);
        assert_eq!(result.assertions[1].level, VerificationLevel::Instrumented);
        assert_eq!(result.assertions[2].level, VerificationLevel::Proven);
        assert_eq!(result.assertions[2].section, Section::OnFailure);
        assert!(result.is_proven());
    }

    #[test]
    fn test_guarantee_without_model_is_instrumented() {
        let u = unit(
            Contract {
                on_success: vec!["result.token is issued".into()],
                ..Contract::default()
            },
            "return { token }",
        );
        let a = &run_without_model(&u).assertions[0];
        assert!(a.passed);
        assert_eq!(a.level, VerificationLevel::Instrumented);
    }

    // ── Invariants ─────────────────────────────────────

    #[test]
    fn test_exposure_in_logging_call_fails() {
        let u = unit(
            invariants(&["input.password is never exposed in output or logs"]),
            "async function login({ email, password }) {\n  console.log('login', email, password)\n  return db.check(email, password)\n}",
        );
        let result = run(&u);
        let a = &result.assertions[0];
        assert!(!a.passed);
        assert_eq!(a.level, VerificationLevel::Proven);
        assert!(a.message.contains("console.log"), "{}", a.message);
        assert_eq!(result.status, VerificationStatus::Failed);
    }

    #[test]
    fn test_exposure_through_hash_only_passes() {
        let u = unit(
            invariants(&["password never logged"]),
            "async function login({ email, password }) {\n  logger.info('login attempt', email)\n  return bcrypt.compare(password, stored)\n}",
        );
        let a = &run(&u).assertions[0];
        assert!(a.passed);
        assert_eq!(a.level, VerificationLevel::Proven);
        assert!(a.message.contains("bcrypt.compare"), "{}", a.message);
    }

    #[test]
    fn test_exposure_in_returned_object_fails() {
        let u = unit(
            invariants(&["password is never exposed"]),
            "function profile(user) { return { name: user.name, password: user.password } }",
        );
        let a = &run(&u).assertions[0];
        assert!(!a.passed);
        assert!(a.message.contains("returned object"), "{}", a.message);
    }

    #[test]
    fn test_exposure_text_fallback() {
        let u = unit(invariants(&["secret never logged"]), "function f( {\n  console.log(`value ${secret}`)");
        let a = &run(&u).assertions[0];
        assert!(!a.passed);
        assert!(a.message.contains("line 2"), "{}", a.message);

        let u = unit(invariants(&["secret never logged"]), "function f( {\n  verify(secret)");
        assert!(run(&u).assertions[0].passed);
    }

    #[test]
    fn test_exposure_through_serializing_wrapper_fails() {
        let parsed = "function send(password) {\n  console.log(JSON.stringify(password))\n}";
        let broken = "function send(password {\n  console.log(JSON.stringify(password))\n}";
        assert!(SemanticModel::from_source(parsed).is_ok());
        for text in [parsed, broken] {
            let a = &run(&unit(invariants(&["password never logged"]), text)).assertions[0];
            assert!(!a.passed, "{}", a.message);
            assert_eq!(a.level, VerificationLevel::Proven);
        }

        let u = unit(
            invariants(&["password never logged"]),
            "function send(password) {\n  logger.warn('pw ' + String(password))\n}",
        );
        let a = &run(&u).assertions[0];
        assert!(!a.passed);
        assert!(a.message.contains("logger.warn"), "{}", a.message);
    }

    #[test]
    fn test_exposure_hashed_inside_logging_call_passes() {
        let text = "function audit(pw) {\n  console.log('digest', crypto.createHash('sha256').update(pw).digest('hex'))\n}";
        let u = unit(invariants(&["pw never logged"]), text);
        assert!(run(&u).assertions[0].passed);
        assert!(run_without_model(&u).assertions[0].passed);
    }

    #[test]
    fn test_text_scan_reads_only_the_logging_call() {
        let u = unit(
            invariants(&["password never logged"]),
            "function f( {\n  logger.debug('attempt', email); return bcrypt.compare(password, stored)",
        );
        assert!(run(&u).assertions[0].passed);
    }

    #[test]
    fn test_memory_invariant_instrumented() {
        let u = unit(
            invariants(&["password never held in memory after comparison"]),
            "console.log(password)",
        );
        let a = &run(&u).assertions[0];
        assert!(a.passed);
        assert_eq!(a.level, VerificationLevel::Instrumented);
    }

    // ── Failure modes ──────────────────────────────────

    #[test]
    fn test_failure_mode_handled_in_catch() {
        let u = unit(
            fails("NetworkError"),
            "async function f(url) { try { return await fetch(url) } catch (e) { if (e instanceof NetworkError) { return retry(url) } throw e } }",
        );
        let result = run(&u);
        let a = &result.assertions[0];
        assert!(a.passed);
        assert_eq!(a.level, VerificationLevel::Proven);
        assert_eq!(a.assertion_text, "NetworkError: retry");
        assert!(a.message.starts_with("`NetworkError` referenced in implementation"));
        assert!(a.message.contains("catch"), "{}", a.message);
    }

    #[test]
    fn test_failure_mode_missing_fails() {
        let u = unit(fails("NetworkError"), "function f(){ return 1 }");
        let result = run(&u);
        assert!(!result.assertions[0].passed);
        assert_eq!(result.assertions[0].message, "`NetworkError` not found in implementation");
        assert_eq!(result.status, VerificationStatus::Failed);
    }

    #[test]
    fn test_failure_mode_whole_word_only() {
        let u = unit(fails("Error"), "class ErrorHandler {}");
        assert!(!run(&u).assertions[0].passed);
        assert!(!run_without_model(&u).assertions[0].passed);
    }

    // ── Result shape ───────────────────────────────────

    #[test]
    fn test_empty_clause_unverifiable() {
        let u = unit(requires(&[""]), "function f() {}");
        let result = run(&u);
        assert_eq!(result.assertions[0].level, VerificationLevel::Unverifiable);
        assert!(result.is_proven());
    }

    #[test]
    fn test_advisories_pass_through() {
        let contract = Contract {
            advisories: vec![Advisory::from("review rate limits")],
            ..Contract::default()
        };
        let result = run(&unit(contract, "function f() {}"));
        assert!(result.assertions.is_empty());
        assert_eq!(result.advisories, vec![Advisory::from("review rate limits")]);
        assert!(result.is_proven());
    }

    #[test]
    fn test_display_and_counts() {
        let contract = Contract {
            requires: vec!["input.name is String".into(), "system.cache is warm".into()],
            ..Contract::default()
        };
        let result = run(&unit(contract, "function greet(){ return 1 }"));
        let counts = result.level_counts();
        assert_eq!(counts[&VerificationLevel::Proven], 1);
        assert_eq!(counts[&VerificationLevel::Instrumented], 1);
        let rendered = result.to_string();
        assert!(rendered.starts_with("app.test: FAILED (1 PROVEN, 1 INSTRUMENTED; 1 failed)"), "{}", rendered);
        assert!(rendered.contains("[FAIL] PROVEN requires: input.name is String"));
    }

    #[test]
    fn test_verification_determinism_100_iterations() {
        let contract = Contract {
            requires: vec!["input.email is String".into(), "system.db is up".into()],
            on_success: vec!["result.token is set".into()],
            invariants: vec!["password never logged".into()],
            fails: vec![FailureMode {
                error_type: "AuthError".into(),
                handling_strategy: "reject".into(),
            }],
            ..Contract::default()
        };
        let u = unit(
            contract,
            "export async function login({ email, password }) { if (!ok) throw new AuthError(); return { token: sign(email) } }",
        );
        let first = run(&u);
        for i in 0..100 {
            assert_eq!(first, run(&u), "Determinism failure at iteration {}", i);
        }
    }
}
