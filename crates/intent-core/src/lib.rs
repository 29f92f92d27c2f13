//! Intent Core - contract verification engine
//!
//! Decides, assertion by assertion, whether an implementation module
//! structurally satisfies its declared contract, and at what confidence.
//!
//! # Architecture
//!
//! ```text
//! Unit(s) → AnalysisContext → SemanticModel (or None when unparseable)
//!                                   ↓
//!                     Classifier + Verifier → VerificationResult
//!                                   ↓
//!                          Planner → InstrumentationPlan
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic**: Same unit and model always produce an identical result
//! - **Non-throwing**: Unparseable code degrades to text matching, never errors
//! - **Complete**: Every clause and failure mode yields exactly one assertion
//! - **Minimal**: Only deferred (`INSTRUMENTED`) assertions become runtime checks

pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod parser;
pub mod planner;
pub mod verifier;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

pub use classifier::{Section, VerificationLevel};
pub use config::{CompilerOptions, VerifierOptions};
pub use context::{AnalysisContext, CacheStats};
pub use error::{Error, Result};
pub use model::SemanticModel;
pub use planner::{plan, Check, InsertionPoint, InstrumentationPlan};
pub use verifier::{verify, VerificationAssertion, VerificationResult, VerificationStatus};

/// Free-text assertion inside a contract section
pub type Clause = String;

/// One contract unit paired with its implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Dotted path (`app.auth.login`)
    pub id: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub contract: Contract,
    #[serde(alias = "implementationText")]
    pub implementation_text: String,
    #[serde(
        default,
        alias = "implementationPath",
        skip_serializing_if = "Option::is_none"
    )]
    pub implementation_path: Option<PathBuf>,
}

impl Unit {
    /// Parse a serialized unit
    ///
    /// # Errors
    /// Returns `UnitError` for malformed JSON or an empty id.
    pub fn from_json(json: &str) -> Result<Self> {
        let unit: Unit = serde_json::from_str(json).map_err(|e| Error::UnitError(e.to_string()))?;
        if unit.id.trim().is_empty() {
            return Err(Error::UnitError("unit id must not be empty".into()));
        }
        Ok(unit)
    }

    /// SHA-256 hex digest of the unit's canonical JSON
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Machine-checkable contract
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contract {
    pub requires: Vec<Clause>,
    #[serde(alias = "onSuccess")]
    pub on_success: Vec<Clause>,
    #[serde(alias = "onFailure")]
    pub on_failure: Vec<Clause>,
    pub invariants: Vec<Clause>,
    /// Accepts a list of failure modes or an `{ErrorType: strategy}` map
    #[serde(deserialize_with = "deserialize_fails")]
    pub fails: Vec<FailureMode>,
    pub advisories: Vec<Advisory>,
}

impl Contract {
    /// Number of assertions verification produces
    pub fn assertion_count(&self) -> usize {
        self.requires.len()
            + self.on_success.len()
            + self.on_failure.len()
            + self.invariants.len()
            + self.fails.len()
    }
}

/// Named failure mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureMode {
    #[serde(alias = "errorType")]
    pub error_type: String,
    #[serde(default, alias = "handlingStrategy")]
    pub handling_strategy: String,
}

impl FailureMode {
    /// `ErrorType: strategy`, or just the type when no strategy is given
    pub fn assertion_text(&self) -> String {
        if self.handling_strategy.trim().is_empty() {
            self.error_type.clone()
        } else {
            format!("{}: {}", self.error_type, self.handling_strategy)
        }
    }
}

/// Non-checkable note flagged for human review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Advisory(pub String);

impl From<&str> for Advisory {
    fn from(text: &str) -> Self {
        Advisory(text.to_string())
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn deserialize_fails<'de, D>(deserializer: D) -> std::result::Result<Vec<FailureMode>, D::Error>
where
    D: Deserializer<'de>,
{
    struct FailsVisitor;

    impl<'de> Visitor<'de> for FailsVisitor {
        type Value = Vec<FailureMode>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a list of failure modes or a map of error type to strategy")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
            let mut fails = Vec::new();
            while let Some(mode) = seq.next_element::<FailureMode>()? {
                fails.push(mode);
            }
            Ok(fails)
        }

        // declaration order is kept
        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
            let mut fails = Vec::new();
            while let Some((error_type, handling_strategy)) = map.next_entry::<String, String>()? {
                fails.push(FailureMode {
                    error_type,
                    handling_strategy,
                });
            }
            Ok(fails)
        }

        fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(FailsVisitor)
}

// ── Shared analysis context ───────────────────────────────

thread_local! {
    static SHARED_CONTEXT: RefCell<AnalysisContext> = RefCell::new(AnalysisContext::new());
}

/// Run `f` against the calling thread's shared context
pub fn with_shared_context<R>(f: impl FnOnce(&mut AnalysisContext) -> R) -> R {
    SHARED_CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()))
}

/// Verify one unit using the shared context
pub fn verify_one(unit: &Unit) -> VerificationResult {
    with_shared_context(|ctx| ctx.verify_one(unit))
}

/// Verify a batch under `project_root`, sharing one context
pub fn verify_all(units: &[Unit], project_root: &Path) -> BTreeMap<String, VerificationResult> {
    with_shared_context(|ctx| ctx.verify_all(units, project_root))
}

/// Clear the calling thread's shared context
pub fn reset_analysis_cache() {
    with_shared_context(AnalysisContext::reset)
}
