//! Module syntax tree - the structural view of one implementation module
//!
//! The tree records what the classifier needs to answer questions about a
//! module: its top-level functions and their signatures, its imports, and
//! where everything else sits. Expression bodies are not modelled as trees;
//! module-wide facts (calls, catch handlers, return shapes) are extracted
//! from the token stream by [`crate::model`].
//!
//! All nodes are immutable after construction.

use serde::{Deserialize, Serialize};

use super::tokenizer::Span;

/// A parsed implementation module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleNode {
    pub items: Vec<Item>,
    /// Interpreter directive (`#!...`) found on the first line, if any
    pub interpreter: Option<String>,
}

impl ModuleNode {
    /// Top-level function declarations, in source order
    pub fn functions(&self) -> impl Iterator<Item = &FunctionNode> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(f) => Some(f),
            _ => None,
        })
    }

    /// Import declarations (ES and CommonJS), in source order
    pub fn imports(&self) -> impl Iterator<Item = &ImportNode> {
        self.items.iter().filter_map(|item| match item {
            Item::Import(i) => Some(i),
            _ => None,
        })
    }
}

/// A top-level module item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Function(FunctionNode),
    Import(ImportNode),
    Class(ClassNode),
    /// Any other statement (variables, type declarations, expressions)
    Statement(Span),
}

/// Top-level function: declaration, function expression or arrow bound to a name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    /// `None` for `export default function () {}`
    pub name: Option<String>,
    pub params: Vec<ParamNode>,
    /// Return type annotation, normalized to text
    pub return_type: Option<String>,
    pub is_async: bool,
    pub is_arrow: bool,
    pub exported: bool,
    pub span: Span,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamNode {
    pub pattern: ParamPattern,
    /// Type annotation, normalized to text
    pub type_annotation: Option<String>,
    pub optional: bool,
    pub has_default: bool,
    pub span: Span,
}

impl ParamNode {
    /// Local names this parameter binds
    pub fn bindings(&self) -> Vec<&str> {
        match &self.pattern {
            ParamPattern::Named(name) | ParamPattern::Rest(name) => vec![name.as_str()],
            ParamPattern::Object(fields) => fields.iter().map(|f| f.binding.as_str()).collect(),
            ParamPattern::Array(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Whether the parameter binds or destructures `field`
    pub fn matches_field(&self, field: &str) -> bool {
        match &self.pattern {
            ParamPattern::Named(name) | ParamPattern::Rest(name) => name == field,
            ParamPattern::Object(fields) => fields.iter().any(|f| f.key == field),
            ParamPattern::Array(names) => names.iter().any(|n| n == field),
        }
    }
}

/// Parameter binding pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamPattern {
    Named(String),
    Rest(String),
    /// `{ key: binding = default, ... }`
    Object(Vec<DestructuredField>),
    /// `[a, b]`
    Array(Vec<String>),
}

/// One property of an object-destructuring parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestructuredField {
    pub key: String,
    pub binding: String,
}

/// Import declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportNode {
    pub specifier: String,
    pub bindings: Vec<ImportBinding>,
    pub kind: ImportKind,
    pub type_only: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportKind {
    /// `import ... from "x"`
    Module,
    /// `const x = require("x")`
    Require,
}

/// A name brought into scope by an import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBinding {
    /// Exported name (`default`, `*`, or the named export)
    pub imported: String,
    pub local: String,
}

/// Top-level class declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub name: Option<String>,
    pub exported: bool,
    pub span: Span,
}
