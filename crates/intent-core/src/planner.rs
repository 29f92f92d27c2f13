//! Instrumentation planner - runtime checks for what static analysis deferred
//!
//! Only `INSTRUMENTED` assertions produce checks. Preconditions are checked
//! before the call, guarantees and invariants after it. The plan is plain
//! data; weaving it into emitted code happens elsewhere.

use serde::{Deserialize, Serialize};

use crate::classifier::{is_ident_char, Section, VerificationLevel};
use crate::verifier::{VerificationAssertion, VerificationResult};
use crate::Unit;

/// Where a check runs relative to the unit's body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionPoint {
    Pre,
    Post,
}

/// One runtime guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub assertion_text: String,
    pub level: VerificationLevel,
    pub insertion_point: InsertionPoint,
    pub guard_expression: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationPlan {
    pub unit_id: String,
    pub checks: Vec<Check>,
}

impl InstrumentationPlan {
    pub fn pre_checks(&self) -> Vec<&Check> {
        self.checks_at(InsertionPoint::Pre)
    }

    pub fn post_checks(&self) -> Vec<&Check> {
        self.checks_at(InsertionPoint::Post)
    }

    fn checks_at(&self, point: InsertionPoint) -> Vec<&Check> {
        self.checks
            .iter()
            .filter(|c| c.insertion_point == point)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

// ── Public API ────────────────────────────────────────────

/// Build the runtime checks for a verified unit
pub fn plan(unit: &Unit, result: &VerificationResult) -> InstrumentationPlan {
    let checks = result
        .assertions
        .iter()
        .filter(|a| a.level == VerificationLevel::Instrumented)
        .map(|a| check_for(&unit.id, a))
        .collect();

    InstrumentationPlan {
        unit_id: unit.id.clone(),
        checks,
    }
}

fn check_for(unit_id: &str, assertion: &VerificationAssertion) -> Check {
    let (insertion_point, kind) = match assertion.section {
        Section::Requires => (InsertionPoint::Pre, "Precondition"),
        Section::Invariants => (InsertionPoint::Post, "Invariant"),
        Section::OnSuccess | Section::OnFailure | Section::Fails => (InsertionPoint::Post, "Postcondition"),
    };

    Check {
        assertion_text: assertion.assertion_text.clone(),
        level: assertion.level,
        insertion_point,
        guard_expression: guard_expression(&assertion.assertion_text),
        error_message: format!("{} failed in {}: {}", kind, unit_id, assertion.assertion_text),
    }
}

// ── Guard derivation ──────────────────────────────────────

const COMPARISONS: &[&str] = &["===", "!==", "==", "!=", ">=", "<=", ">", "<"];

/// Derive a guard from clause text
///
/// ```text
/// input.name is String      → typeof input.name === "string"
/// input.tags is Array       → Array.isArray(input.tags)
/// input.user is not null    → input.user != null
/// input.items is not empty  → input.items != null && input.items.length > 0
/// input.age >= 18           → input.age >= 18
/// ```
///
/// Anything else is carried verbatim as a readable description.
pub fn guard_expression(text: &str) -> String {
    let text = text.trim();
    let words: Vec<&str> = text.split_whitespace().collect();
    let subject = match words.first() {
        Some(s) if is_path(s) => *s,
        _ => return text.to_string(),
    };
    let rest: Vec<String> = words[1..].iter().map(|w| w.to_lowercase()).collect();
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

    match rest.as_slice() {
        ["is", "not", "null"] | ["is", "not", "undefined"] | ["is", "defined"] | ["is", "present"]
        | ["exists"] => format!("{} != null", subject),
        ["is", "not", "empty"] | ["is", "non-empty"] | ["is", "nonempty"] => {
            format!("{0} != null && {0}.length > 0", subject)
        }
        ["is", "a", ty] | ["is", "an", ty] | ["is", ty] => match type_guard(subject, ty) {
            Some(guard) => guard,
            None => text.to_string(),
        },
        [op, ..] if COMPARISONS.contains(op) => text.to_string(),
        _ => text.to_string(),
    }
}

fn type_guard(subject: &str, ty: &str) -> Option<String> {
    let primitive = match ty {
        "string" | "str" => "string",
        "number" | "float" | "double" => "number",
        "integer" | "int" => return Some(format!("Number.isInteger({})", subject)),
        "boolean" | "bool" => "boolean",
        "object" => "object",
        "function" => "function",
        "bigint" => "bigint",
        "symbol" => "symbol",
        "array" | "list" => return Some(format!("Array.isArray({})", subject)),
        _ => return None,
    };
    Some(format!("typeof {} === \"{}\"", subject, primitive))
}

fn is_path(word: &str) -> bool {
    !word.is_empty()
        && word.split('.').all(|segment| {
            !segment.is_empty()
                && segment.chars().all(is_ident_char)
                && !segment.starts_with(|c: char| c.is_ascii_digit())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VerifierOptions;
    use crate::model::SemanticModel;
    use crate::verifier::verify;
    use crate::{Contract, FailureMode};

    fn verified(contract: Contract, text: &str) -> (Unit, VerificationResult) {
        let unit = Unit {
            id: "billing.charge".to_string(),
            purpose: "charge a card".to_string(),
            contract,
            implementation_text: text.to_string(),
            implementation_path: None,
        };
        let model = SemanticModel::from_source(text).ok();
        let result = verify(&unit, model.as_ref(), &VerifierOptions::default());
        (unit, result)
    }

    // ── Guards ─────────────────────────────────────────

    #[test]
    fn test_type_guards() {
        assert_eq!(guard_expression("input.name is String"), "typeof input.name === \"string\"");
        assert_eq!(guard_expression("input.count is an Integer"), "Number.isInteger(input.count)");
        assert_eq!(guard_expression("input.tags is Array"), "Array.isArray(input.tags)");
        assert_eq!(guard_expression("input.flag is a boolean"), "typeof input.flag === \"boolean\"");
    }

    #[test]
    fn test_presence_guards() {
        assert_eq!(guard_expression("input.user is not null"), "input.user != null");
        assert_eq!(guard_expression("system.cache exists"), "system.cache != null");
        assert_eq!(
            guard_expression("input.items is not empty"),
            "input.items != null && input.items.length > 0"
        );
    }

    #[test]
    fn test_comparisons_and_verbatim() {
        assert_eq!(guard_expression("input.amount > 0"), "input.amount > 0");
        assert_eq!(guard_expression("system.database is active"), "system.database is active");
        assert_eq!(guard_expression("the card is valid"), "the card is valid");
        assert_eq!(guard_expression("input.x is Money"), "input.x is Money");
    }

    // ── Plans ──────────────────────────────────────────

    #[test]
    fn test_plan_covers_instrumented_only() {
        let contract = Contract {
            requires: vec!["input.amount > 0".into(), "system.gateway is reachable".into()],
            on_success: vec!["receipt is emailed".into()],
            invariants: vec!["card number never held in memory".into()],
            fails: vec![FailureMode {
                error_type: "CardDeclined".into(),
                handling_strategy: "surface to caller".into(),
            }],
            ..Contract::default()
        };
        let (unit, result) = verified(
            contract,
            "function charge(input) { if (input.amount <= 0) throw new CardDeclined(); return gateway.charge(input) }",
        );
        let plan = plan(&unit, &result);

        assert_eq!(plan.unit_id, "billing.charge");
        assert_eq!(plan.checks.len(), 3);
        assert!(plan.checks.iter().all(|c| c.level == VerificationLevel::Instrumented));
        assert_eq!(plan.pre_checks().len(), 1);
        assert_eq!(plan.post_checks().len(), 2);

        let pre = plan.pre_checks()[0];
        assert_eq!(pre.guard_expression, "system.gateway is reachable");
        assert_eq!(
            pre.error_message,
            "Precondition failed in billing.charge: system.gateway is reachable"
        );
        assert!(plan.checks[2].error_message.starts_with("Invariant failed"));
    }

    #[test]
    fn test_plan_is_minimal() {
        let contract = Contract {
            requires: vec!["input.amount is Number".into()],
            fails: vec![FailureMode {
                error_type: "Timeout".into(),
                handling_strategy: "retry".into(),
            }],
            ..Contract::default()
        };
        let (unit, result) = verified(contract, "function charge(input) { return input.amount }");
        let plan = plan(&unit, &result);
        for check in &plan.checks {
            let assertion = result
                .assertions
                .iter()
                .find(|a| a.assertion_text == check.assertion_text)
                .unwrap();
            assert_ne!(assertion.level, VerificationLevel::Proven);
        }
        assert!(plan.is_empty());
    }

    #[test]
    fn test_insertion_point_serialization() {
        assert_eq!(serde_json::to_string(&InsertionPoint::Pre).unwrap(), "\"pre\"");
        assert_eq!(serde_json::to_string(&InsertionPoint::Post).unwrap(), "\"post\"");
    }
}
