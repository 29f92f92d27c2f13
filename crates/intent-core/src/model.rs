//! Semantic model - the queryable per-module view used by the classifier
//!
//! Built from a [`ParsedSource`]: the syntax tree supplies top-level function
//! signatures and imports, and one pass over the token stream (template
//! expressions inlined) collects the module-wide facts:
//!
//! - identifier reference counts and member-access paths (`input.name`)
//! - call sites with their direct argument identifiers
//! - try regions, catch handlers and the error types tested in them
//! - thrown error types and returned object-literal shapes
//!
//! The model is immutable once built, apart from import resolution, which the
//! analysis context fills in before handing the model out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::VerifierOptions;
use crate::parser::ast::{FunctionNode, ImportBinding, ModuleNode, ParamPattern};
use crate::parser::tokenizer::{Span, SpannedToken, Token};
use crate::parser::{self, ParsedSource};
use crate::Result;

/// Words the tokenizer leaves as identifiers that never name a value
const RESERVED_WORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "break", "continue", "null", "true", "false",
    "undefined", "void", "delete", "in", "of", "yield", "with", "debugger", "this", "super",
];

/// Identifiers followed by `(` that are statements, not calls
const CONTROL_WORDS: &[&str] = &["if", "for", "while", "switch", "with"];

// ── Model types ───────────────────────────────────────────

/// Per-module semantic view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticModel {
    /// The parsed syntax tree
    pub module: ModuleNode,
    /// How often each identifier occurs (declarations included)
    pub identifier_counts: BTreeMap<String, usize>,
    /// Every member-access path of two or more segments
    pub member_paths: BTreeSet<String>,
    pub calls: Vec<CallSite>,
    pub try_regions: Vec<TryRegion>,
    /// `.catch(...)` handlers on promises
    pub promise_handlers: Vec<CatchHandler>,
    pub thrown: Vec<ThrowSite>,
    pub return_shapes: Vec<ReturnShape>,
    pub imports: Vec<ImportTarget>,
}

/// A call expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    /// Dotted callee path; calls in the middle of a chain appear as `a.b().c`
    pub callee: String,
    /// Identifiers, property names and member paths passed directly
    pub arguments: BTreeSet<String>,
    /// Names that reach the call only through inner calls (`log(JSON.stringify(x))`)
    pub nested: Vec<NestedArgument>,
    /// `new X(...)`
    pub constructor: bool,
    pub span: Span,
}

/// A name passed through inner calls, outermost wrapper first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedArgument {
    pub name: String,
    pub wrappers: Vec<String>,
}

impl CallSite {
    /// Callee segments with call markers removed (`a.b().c` → `[a, b, c]`)
    pub fn segments(&self) -> Vec<&str> {
        callee_segments(&self.callee)
    }

    pub fn mentions(&self, name: &str) -> bool {
        self.arguments.contains(name)
    }

    /// Whether `name` reaches this call directly or through inner calls
    /// none of which compares or hashes it
    pub fn receives(&self, name: &str, options: &VerifierOptions) -> bool {
        self.mentions(name)
            || self.nested.iter().any(|arg| {
                arg.name == name
                    && !arg
                        .wrappers
                        .iter()
                        .any(|wrapper| options.is_safe_callee(&callee_segments(wrapper)))
            })
    }
}

fn callee_segments(callee: &str) -> Vec<&str> {
    callee.split('.').map(|s| s.trim_end_matches("()")).collect()
}

/// A `try` block and its handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryRegion {
    pub start: Span,
    pub end: Span,
    pub handler: Option<CatchHandler>,
}

/// A `catch` clause or promise `.catch` callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchHandler {
    pub param: Option<String>,
    /// Error types / codes tested inside the handler
    pub tested_types: BTreeSet<String>,
    pub span: Span,
}

/// `throw new X(...)` or `reject(new X(...))`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowSite {
    pub error_type: String,
    pub span: Span,
}

/// Keys of an object literal returned by the module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnShape {
    pub keys: Vec<String>,
    pub span: Span,
}

/// An import with its resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportTarget {
    pub specifier: String,
    pub bindings: Vec<ImportBinding>,
    pub type_only: bool,
    /// `None` when the specifier could not be resolved (bare packages, missing files)
    pub resolved: Option<ResolvedModule>,
}

impl ImportTarget {
    pub fn is_relative(&self) -> bool {
        self.specifier.starts_with("./") || self.specifier.starts_with("../")
    }
}

/// Where an import specifier points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedModule {
    /// Another unit of the current batch
    Unit(String),
    /// A file on disk
    File(PathBuf),
}

/// Why an input field counts as used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldEvidence {
    /// Bound or destructured by a parameter and referenced in the body
    Parameter { function: String, binding: String },
    /// Read through a parameter (`input.name`)
    MemberAccess { function: String, path: String },
}

impl fmt::Display for FieldEvidence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldEvidence::Parameter { function, binding } => {
                write!(f, "parameter `{}` of `{}` is referenced", binding, function)
            }
            FieldEvidence::MemberAccess { function, path } => {
                write!(f, "`{}` is read in `{}`", path, function)
            }
        }
    }
}

// ── Construction ──────────────────────────────────────────

impl SemanticModel {
    /// Parse and analyze implementation text
    ///
    /// # Errors
    /// Returns `ParseError` when the text does not parse; callers degrade to
    /// text matching.
    pub fn from_source(text: &str) -> Result<Self> {
        parser::parse(text).map(Self::from_parsed)
    }

    /// Analyze an already parsed module
    pub fn from_parsed(parsed: ParsedSource) -> Self {
        let tokens = flatten(&parsed.tokens);
        let matching = parser::match_delimiters(&tokens)
            .unwrap_or_else(|_| vec![None; tokens.len()]);

        let imports = parsed
            .module
            .imports()
            .map(|import| ImportTarget {
                specifier: import.specifier.clone(),
                bindings: import.bindings.clone(),
                type_only: import.type_only,
                resolved: None,
            })
            .collect();

        let mut model = SemanticModel {
            module: parsed.module,
            identifier_counts: BTreeMap::new(),
            member_paths: BTreeSet::new(),
            calls: Vec::new(),
            try_regions: Vec::new(),
            promise_handlers: Vec::new(),
            thrown: Vec::new(),
            return_shapes: Vec::new(),
            imports,
        };

        Scanner {
            tokens: &tokens,
            matching: &matching,
        }
        .scan(&mut model);

        model
    }

    /// Fill in import resolutions
    pub fn resolve_imports(&mut self, mut resolve: impl FnMut(&str) -> Option<ResolvedModule>) {
        for import in &mut self.imports {
            import.resolved = resolve(&import.specifier);
        }
    }

    // ── Queries ───────────────────────────────────────

    /// Top-level function signatures
    pub fn functions(&self) -> impl Iterator<Item = &FunctionNode> {
        self.module.functions()
    }

    /// Whether `name` occurs anywhere in the module
    pub fn references(&self, name: &str) -> bool {
        self.identifier_counts.contains_key(name)
    }

    pub fn reference_count(&self, name: &str) -> usize {
        self.identifier_counts.get(name).copied().unwrap_or(0)
    }

    /// Find a top-level parameter that supplies input field `field` and is used
    pub fn input_field_evidence(&self, field: &str) -> Option<FieldEvidence> {
        for function in self.functions() {
            let function_name = function.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
            for param in &function.params {
                if param.matches_field(field) {
                    let binding = match &param.pattern {
                        ParamPattern::Object(fields) => fields
                            .iter()
                            .find(|f| f.key == field)
                            .map(|f| f.binding.clone())
                            .unwrap_or_else(|| field.to_string()),
                        _ => field.to_string(),
                    };
                    // one occurrence is the declaration itself
                    if self.reference_count(&binding) >= 2 {
                        return Some(FieldEvidence::Parameter {
                            function: function_name,
                            binding,
                        });
                    }
                }
                for binding in param.bindings() {
                    let path = format!("{}.{}", binding, field);
                    if self.member_paths.contains(&path) {
                        return Some(FieldEvidence::MemberAccess {
                            function: function_name,
                            path,
                        });
                    }
                }
            }
        }
        None
    }

    /// The import a local binding comes from
    pub fn import_of(&self, local: &str) -> Option<&ImportTarget> {
        self.imports
            .iter()
            .find(|import| import.bindings.iter().any(|b| b.local == local))
    }

    /// Whether a call writes to a log, console or response
    pub fn is_logging_call(&self, call: &CallSite, options: &VerifierOptions) -> bool {
        if options.is_logging_callee(&call.segments()) {
            return true;
        }
        let root = call.segments().first().copied().unwrap_or_default();
        self.import_of(root)
            .is_some_and(|import| options.is_logging_module(&import.specifier))
    }

    /// Logging/output calls that receive `name`, directly or wrapped in non-hashing calls
    pub fn logging_calls_with<'m>(&'m self, name: &str, options: &VerifierOptions) -> Vec<&'m CallSite> {
        self.calls
            .iter()
            .filter(|call| call.receives(name, options) && self.is_logging_call(call, options))
            .collect()
    }

    /// Comparison/hashing calls that receive `name` directly
    pub fn safe_calls_with<'m>(&'m self, name: &str, options: &VerifierOptions) -> Vec<&'m CallSite> {
        self.calls
            .iter()
            .filter(|call| call.mentions(name) && options.is_safe_callee(&call.segments()))
            .collect()
    }

    /// Returned object literal that exposes `key`
    pub fn returned_with_key(&self, key: &str) -> Option<&ReturnShape> {
        self.return_shapes
            .iter()
            .find(|shape| shape.keys.iter().any(|k| k == key))
    }

    /// Returned object literal containing every key in `keys`
    pub fn return_shape_with(&self, keys: &[String]) -> Option<&ReturnShape> {
        self.return_shapes
            .iter()
            .find(|shape| keys.iter().all(|k| shape.keys.contains(k)))
    }

    /// All catch handlers: `try/catch` clauses then promise `.catch` callbacks
    pub fn catch_handlers(&self) -> impl Iterator<Item = &CatchHandler> {
        self.try_regions
            .iter()
            .filter_map(|region| region.handler.as_ref())
            .chain(self.promise_handlers.iter())
    }

    /// Catch handler that tests for `error_type`
    pub fn handler_for(&self, error_type: &str) -> Option<&CatchHandler> {
        self.catch_handlers()
            .find(|handler| handler.tested_types.contains(error_type))
    }

    /// First place `error_type` is thrown
    pub fn throw_site(&self, error_type: &str) -> Option<&ThrowSite> {
        self.thrown.iter().find(|t| t.error_type == error_type)
    }
}

/// Inline template expressions as parenthesized groups (`` tag`${a}` `` reads as `tag(a)`)
fn flatten(tokens: &[SpannedToken]) -> Vec<SpannedToken> {
    let mut out = Vec::with_capacity(tokens.len());
    for st in tokens {
        match &st.token {
            Token::TemplateLiteral(template) if !template.expressions.is_empty() => {
                out.push(SpannedToken {
                    token: Token::LParen,
                    span: st.span.clone(),
                });
                for (n, expression) in template.expressions.iter().enumerate() {
                    if n > 0 {
                        out.push(SpannedToken {
                            token: Token::Comma,
                            span: st.span.clone(),
                        });
                    }
                    out.extend(flatten(expression));
                }
                out.push(SpannedToken {
                    token: Token::RParen,
                    span: st.span.clone(),
                });
            }
            _ => out.push(st.clone()),
        }
    }
    out
}

fn is_identifier_like(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_equality(tok: &Token) -> bool {
    matches!(tok, Token::Operator(op) if op == "===" || op == "==" || op == "!==" || op == "!=")
}

// ── Token scanner ─────────────────────────────────────────

struct Scanner<'a> {
    tokens: &'a [SpannedToken],
    matching: &'a [Option<usize>],
}

impl<'a> Scanner<'a> {
    fn tok(&self, idx: usize) -> &'a Token {
        self.tokens
            .get(idx)
            .map(|st| &st.token)
            .unwrap_or(&Token::Eof)
    }

    fn prev(&self, idx: usize) -> &'a Token {
        if idx == 0 {
            &Token::Eof
        } else {
            self.tok(idx - 1)
        }
    }

    fn span(&self, idx: usize) -> Span {
        self.tokens
            .get(idx)
            .or_else(|| self.tokens.last())
            .map(|st| st.span.clone())
            .unwrap_or(Span {
                line: 1,
                column: 1,
                offset: 0,
            })
    }

    fn close(&self, idx: usize) -> Option<usize> {
        self.matching.get(idx).copied().flatten()
    }

    fn after_group(&self, idx: usize) -> usize {
        match self.tok(idx) {
            Token::LParen | Token::LBracket | Token::LBrace => {
                self.close(idx).map(|c| c + 1).unwrap_or(idx + 1)
            }
            _ => idx + 1,
        }
    }

    fn is_member_access(&self, idx: usize) -> bool {
        matches!(self.prev(idx), Token::Dot | Token::OptionalChain)
    }

    fn scan(&self, model: &mut SemanticModel) {
        for idx in 0..self.tokens.len() {
            match self.tok(idx) {
                Token::Identifier(name) => {
                    if !RESERVED_WORDS.contains(&name.as_str()) {
                        *model.identifier_counts.entry(name.clone()).or_insert(0) += 1;
                    }
                    // `this.logger.info(...)` is a chain; `if (...)` is not
                    if (name == "this" || !RESERVED_WORDS.contains(&name.as_str()))
                        && !self.is_member_access(idx)
                    {
                        self.scan_chain(idx, model);
                    }
                }
                Token::Try => self.scan_try(idx, model),
                Token::Catch if self.is_member_access(idx) => self.scan_promise_catch(idx, model),
                Token::Throw => {
                    if matches!(self.tok(idx + 1), Token::New) {
                        self.record_throw(idx + 2, model);
                    }
                }
                Token::New => {
                    // reject(new X(...))
                    if matches!(self.prev(idx), Token::LParen)
                        && idx >= 2
                        && self.tok(idx - 2).ident().is_some_and(|n| n == "reject")
                    {
                        self.record_throw(idx + 1, model);
                    }
                }
                Token::Return => {
                    if matches!(self.tok(idx + 1), Token::LBrace) {
                        self.record_shape(idx + 1, model);
                    }
                }
                Token::Arrow => {
                    // => ({ ... })
                    if matches!(self.tok(idx + 1), Token::LParen)
                        && matches!(self.tok(idx + 2), Token::LBrace)
                        && self.close(idx + 1) == self.close(idx + 2).map(|c| c + 1)
                    {
                        self.record_shape(idx + 2, model);
                    }
                }
                _ => {}
            }
        }
    }

    /// Walk `a.b["c"]().d(...)` starting at identifier `start`
    fn scan_chain(&self, start: usize, model: &mut SemanticModel) {
        let root = match self.tok(start).ident() {
            Some(name) if !matches!(self.prev(start), Token::Function) => name,
            _ => return,
        };
        let mut path = root.to_string();
        let mut pure_path = true;
        let mut constructor = matches!(self.prev(start), Token::New);
        let mut idx = start;

        loop {
            // property access: .name / ?.name
            if matches!(self.tok(idx + 1), Token::Dot | Token::OptionalChain) {
                if let Some(prop) = self.tok(idx + 2).property_name() {
                    path.push('.');
                    path.push_str(prop);
                    if pure_path {
                        model.member_paths.insert(path.clone());
                    }
                    idx += 2;
                    continue;
                }
            }
            // computed access with a string key: ["name"]
            if matches!(self.tok(idx + 1), Token::LBracket) && matches!(self.tok(idx + 3), Token::RBracket) {
                if let Token::StringLiteral(key) = self.tok(idx + 2) {
                    path.push('.');
                    path.push_str(key);
                    if pure_path {
                        model.member_paths.insert(path.clone());
                    }
                    idx += 3;
                    continue;
                }
            }
            // call: f(...) / f?.(...)
            let open = match (self.tok(idx + 1), self.tok(idx + 2)) {
                (Token::LParen, _) => Some(idx + 1),
                (Token::OptionalChain, Token::LParen) => Some(idx + 2),
                _ => None,
            };
            if let Some(open) = open {
                if path == root && CONTROL_WORDS.contains(&root) {
                    return;
                }
                let close = match self.close(open) {
                    Some(close) => close,
                    None => return,
                };
                let (arguments, nested) = self.call_arguments(open, close);
                model.calls.push(CallSite {
                    callee: path.clone(),
                    arguments,
                    nested,
                    constructor,
                    span: self.span(start),
                });
                if matches!(self.tok(close + 1), Token::Dot | Token::OptionalChain)
                    && self.tok(close + 2).property_name().is_some()
                {
                    path.push_str("()");
                    pure_path = false;
                    constructor = false;
                    idx = close;
                    continue;
                }
            }
            return;
        }
    }

    /// Names inside `(open, close)`: direct ones, and those wrapped in inner calls
    fn call_arguments(&self, open: usize, close: usize) -> (BTreeSet<String>, Vec<NestedArgument>) {
        let mut direct = BTreeSet::new();
        let mut nested = Vec::new();
        self.collect_arguments(open, close, &mut Vec::new(), &mut direct, &mut nested);
        (direct, nested)
    }

    fn collect_arguments(
        &self,
        open: usize,
        close: usize,
        wrappers: &mut Vec<String>,
        direct: &mut BTreeSet<String>,
        nested: &mut Vec<NestedArgument>,
    ) {
        let mut record = |name: String| {
            if wrappers.is_empty() {
                direct.insert(name);
            } else {
                nested.push(NestedArgument {
                    name,
                    wrappers: wrappers.clone(),
                });
            }
        };
        let mut inner_calls = Vec::new();
        let mut idx = open + 1;

        while idx < close {
            let tok = self.tok(idx);
            if matches!(tok, Token::LParen) && self.is_callee_end(idx - 1) {
                if let Some(inner_close) = self.close(idx) {
                    inner_calls.push((idx, inner_close));
                }
                idx = self.after_group(idx);
                continue;
            }
            let name = if self.is_member_access(idx) {
                tok.property_name()
            } else {
                tok.ident()
            };
            if let Some(name) = name {
                record(name.to_string());
                if !self.is_member_access(idx) {
                    // also record the dotted path rooted here
                    let mut path = name.to_string();
                    let mut k = idx;
                    while matches!(self.tok(k + 1), Token::Dot | Token::OptionalChain) {
                        match self.tok(k + 2).property_name() {
                            Some(prop) => {
                                path.push('.');
                                path.push_str(prop);
                                record(path.clone());
                                k += 2;
                            }
                            None => break,
                        }
                    }
                }
            }
            idx += 1;
        }

        for (inner_open, inner_close) in inner_calls {
            wrappers.push(self.callee_before(inner_open));
            self.collect_arguments(inner_open, inner_close, wrappers, direct, nested);
            wrappers.pop();
        }
    }

    /// Dotted callee path ending at the call paren `open` (`a.b().c` for `a.b().c(`)
    fn callee_before(&self, open: usize) -> String {
        let mut parts = Vec::new();
        let mut idx = if matches!(self.prev(open), Token::OptionalChain) {
            open - 1
        } else {
            open
        };
        let mut called = false;

        while idx > 0 {
            let tok = self.tok(idx - 1);
            let name = if self.is_member_access(idx - 1) {
                tok.property_name()
            } else {
                tok.ident()
            };
            let name = match name {
                Some(name) => name,
                None => break,
            };
            parts.push(if called {
                format!("{}()", name)
            } else {
                name.to_string()
            });
            called = false;
            idx -= 1;
            if !self.is_member_access(idx) {
                break;
            }
            idx -= 1;
            if matches!(self.prev(idx), Token::RParen) {
                match self.close(idx - 1) {
                    Some(paren) => {
                        idx = paren;
                        called = true;
                    }
                    None => break,
                }
            }
        }

        parts.reverse();
        parts.join(".")
    }

    fn is_callee_end(&self, idx: usize) -> bool {
        match self.tok(idx) {
            Token::Identifier(name) => !CONTROL_WORDS.contains(&name.as_str()),
            Token::OptionalChain => true,
            tok => tok.keyword_text().is_some() && self.is_member_access(idx),
        }
    }

    fn scan_try(&self, idx: usize, model: &mut SemanticModel) {
        if !matches!(self.tok(idx + 1), Token::LBrace) {
            return;
        }
        let try_close = match self.close(idx + 1) {
            Some(close) => close,
            None => return,
        };

        let catch_idx = try_close + 1;
        let handler = if matches!(self.tok(catch_idx), Token::Catch) {
            let (param, block) = if matches!(self.tok(catch_idx + 1), Token::LParen) {
                (
                    self.tok(catch_idx + 2).ident().map(str::to_string),
                    self.after_group(catch_idx + 1),
                )
            } else {
                (None, catch_idx + 1) // optional catch binding
            };
            match (self.tok(block), self.close(block)) {
                (Token::LBrace, Some(block_close)) => Some(CatchHandler {
                    param,
                    tested_types: self.tested_types(block + 1, block_close),
                    span: self.span(catch_idx),
                }),
                _ => None,
            }
        } else {
            None
        };

        model.try_regions.push(TryRegion {
            start: self.span(idx),
            end: self.span(try_close),
            handler,
        });
    }

    fn scan_promise_catch(&self, idx: usize, model: &mut SemanticModel) {
        if !matches!(self.tok(idx + 1), Token::LParen) {
            return;
        }
        let close = match self.close(idx + 1) {
            Some(close) => close,
            None => return,
        };
        let mut first = idx + 2;
        if matches!(self.tok(first), Token::Async) {
            first += 1;
        }
        let param = match self.tok(first) {
            Token::Identifier(name) => Some(name.clone()),
            Token::LParen => self.tok(first + 1).ident().map(str::to_string),
            Token::Function => {
                let mut k = first + 1;
                if self.tok(k).ident().is_some() {
                    k += 1;
                }
                self.tok(k + 1).ident().map(str::to_string)
            }
            _ => None,
        };
        model.promise_handlers.push(CatchHandler {
            param,
            tested_types: self.tested_types(idx + 2, close),
            span: self.span(idx),
        });
    }

    /// Error types and codes tested in `[start, end)`
    fn tested_types(&self, start: usize, end: usize) -> BTreeSet<String> {
        let mut tested = BTreeSet::new();
        for idx in start..end {
            match self.tok(idx) {
                Token::Instanceof | Token::Case => {
                    if let Token::StringLiteral(s) = self.tok(idx + 1) {
                        if is_identifier_like(s) {
                            tested.insert(s.clone());
                        }
                    } else if let Some(name) = self.chain_tail(idx + 1) {
                        tested.insert(name);
                    }
                }
                Token::StringLiteral(s)
                    if is_identifier_like(s)
                        && (is_equality(self.prev(idx)) || is_equality(self.tok(idx + 1))) =>
                {
                    tested.insert(s.clone());
                }
                _ => {}
            }
        }
        tested
    }

    /// Last segment of the dotted name starting at `idx` (`errors.NotFound` → `NotFound`)
    fn chain_tail(&self, idx: usize) -> Option<String> {
        let mut name = self.tok(idx).ident()?;
        let mut k = idx;
        while matches!(self.tok(k + 1), Token::Dot) {
            match self.tok(k + 2).property_name() {
                Some(prop) => {
                    name = prop;
                    k += 2;
                }
                None => break,
            }
        }
        Some(name.to_string())
    }

    fn record_throw(&self, idx: usize, model: &mut SemanticModel) {
        if let Some(error_type) = self.chain_tail(idx) {
            model.thrown.push(ThrowSite {
                error_type,
                span: self.span(idx),
            });
        }
    }

    fn record_shape(&self, open: usize, model: &mut SemanticModel) {
        let close = match self.close(open) {
            Some(close) => close,
            None => return,
        };
        let mut keys = Vec::new();
        let mut piece_start = open + 1;
        let mut idx = open + 1;
        while idx <= close {
            if idx == close || matches!(self.tok(idx), Token::Comma) {
                if piece_start < idx {
                    if let Some(key) = self.object_key(piece_start) {
                        keys.push(key);
                    }
                }
                piece_start = idx + 1;
                idx += 1;
                continue;
            }
            idx = self.after_group(idx);
        }
        model.return_shapes.push(ReturnShape {
            keys,
            span: self.span(open),
        });
    }

    fn object_key(&self, idx: usize) -> Option<String> {
        match self.tok(idx) {
            Token::Ellipsis | Token::LBracket => None,
            Token::StringLiteral(s) => Some(s.clone()),
            Token::Async if self.tok(idx + 1).property_name().is_some() => {
                self.tok(idx + 1).property_name().map(str::to_string)
            }
            tok => tok.property_name().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(input: &str) -> SemanticModel {
        SemanticModel::from_source(input).expect("test input should parse")
    }

    // ── Identifiers & paths ────────────────────────────

    #[test]
    fn test_member_paths_and_counts() {
        let m = model("function greet(input) { return \"Hi \" + input.name + input?.profile['nick'] }");
        assert!(m.member_paths.contains("input.name"));
        assert!(m.member_paths.contains("input.profile.nick"));
        assert_eq!(m.reference_count("input"), 3);
        assert!(m.references("greet"));
        assert!(!m.references("if"));
    }

    #[test]
    fn test_template_expressions_are_analyzed() {
        let m = model("function f(user) { console.log(`user ${user.email}`) }");
        assert!(m.member_paths.contains("user.email"));
        let log = m.calls.iter().find(|c| c.callee == "console.log").unwrap();
        assert!(log.mentions("email"));
        assert!(log.mentions("user.email"));
    }

    // ── Input field evidence ───────────────────────────

    #[test]
    fn test_input_field_via_member_access() {
        let m = model("function greet(input){ return \"Hi \" + input.name }");
        assert_eq!(
            m.input_field_evidence("name"),
            Some(FieldEvidence::MemberAccess {
                function: "greet".into(),
                path: "input.name".into()
            })
        );
        assert_eq!(m.input_field_evidence("age"), None);
    }

    #[test]
    fn test_input_field_via_destructuring() {
        let m = model("const login = async ({ email, password: pw }) => check(email, pw)");
        assert!(matches!(
            m.input_field_evidence("password"),
            Some(FieldEvidence::Parameter { binding, .. }) if binding == "pw"
        ));
        assert!(m.input_field_evidence("email").is_some());
    }

    #[test]
    fn test_unused_parameter_is_not_evidence() {
        let m = model("function f(name) { return 1 }");
        assert_eq!(m.input_field_evidence("name"), None);
    }

    // ── Calls ──────────────────────────────────────────

    #[test]
    fn test_nested_call_arguments_belong_to_inner_call() {
        let m = model("function f(pw) { logger.info('hash', hash(pw)) }");
        let info = m.calls.iter().find(|c| c.callee == "logger.info").unwrap();
        assert!(!info.mentions("pw"));
        let hash = m.calls.iter().find(|c| c.callee == "hash").unwrap();
        assert!(hash.mentions("pw"));

        assert_eq!(
            info.nested,
            vec![NestedArgument {
                name: "pw".into(),
                wrappers: vec!["hash".into()]
            }]
        );
        assert!(!info.receives("pw", &VerifierOptions::default()));
    }

    #[test]
    fn test_arguments_wrapped_in_plain_calls_reach_outer_call() {
        let options = VerifierOptions::default();
        let m = model("function f(password) {\n  console.log(JSON.stringify(password))\n  logger.warn('pw ' + String(password))\n}");
        let logging: Vec<&str> = m
            .logging_calls_with("password", &options)
            .iter()
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(logging, vec!["console.log", "logger.warn"]);
    }

    #[test]
    fn test_hashing_wrapper_in_chain_shields_argument() {
        let options = VerifierOptions::default();
        let m = model("function f(pw) { console.log(crypto.createHash('sha256').update(pw).digest('hex')) }");
        let log = m.calls.iter().find(|c| c.callee == "console.log").unwrap();
        assert!(log
            .nested
            .iter()
            .any(|arg| arg.name == "pw" && arg.wrappers == vec!["crypto.createHash().update".to_string()]));
        assert!(m.logging_calls_with("pw", &options).is_empty());
    }

    #[test]
    fn test_chained_calls() {
        let m = model("logger.child({ req }).warn(secret)");
        let warn = m.calls.iter().find(|c| c.callee == "logger.child().warn").unwrap();
        assert_eq!(warn.segments(), vec!["logger", "child", "warn"]);
        assert!(warn.mentions("secret"));
    }

    #[test]
    fn test_control_words_are_not_calls() {
        let m = model("function f(a) { if (a) { while (a) { a-- } } }");
        assert!(m.calls.is_empty());
    }

    #[test]
    fn test_constructor_calls() {
        let m = model("const e = new ValidationError('bad')");
        assert!(m.calls.iter().any(|c| c.callee == "ValidationError" && c.constructor));
    }

    #[test]
    fn test_logging_sinks() {
        let options = VerifierOptions::default();
        let m = model(
            "import audit from './audit-log'\nfunction f(pw) { console.log(pw); bcrypt.compare(pw, h); audit(pw); res.json({ ok: true }) }",
        );
        let logging: Vec<&str> = m
            .logging_calls_with("pw", &options)
            .iter()
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(logging, vec!["console.log", "audit"]);
        let safe: Vec<&str> = m
            .safe_calls_with("pw", &options)
            .iter()
            .map(|c| c.callee.as_str())
            .collect();
        assert_eq!(safe, vec!["bcrypt.compare"]);
    }

    #[test]
    fn test_imports_with_log_inside_a_word_are_not_sinks() {
        let options = VerifierOptions::default();
        let m = model(
            "import { login } from './login'\nimport { fetchCatalog } from './catalog'\nexport function handle(email, password, apiKey) { login(email, password); return fetchCatalog(apiKey) }",
        );
        assert!(m.logging_calls_with("password", &options).is_empty());
        assert!(m.logging_calls_with("apiKey", &options).is_empty());
    }

    // ── Error handling ─────────────────────────────────

    #[test]
    fn test_catch_handler_tested_types() {
        let m = model(
            "async function f(u) { try { return await fetch(u) } catch (e) { if (e instanceof NetworkError) retry(); if (e.code === 'ETIMEDOUT') return null; switch (e.name) { case 'AbortError': break } } }",
        );
        assert_eq!(m.try_regions.len(), 1);
        let handler = m.try_regions[0].handler.as_ref().unwrap();
        assert_eq!(handler.param.as_deref(), Some("e"));
        let tested: Vec<&str> = handler.tested_types.iter().map(String::as_str).collect();
        assert_eq!(tested, vec!["AbortError", "ETIMEDOUT", "NetworkError"]);
        assert!(m.handler_for("NetworkError").is_some());
    }

    #[test]
    fn test_optional_catch_binding_and_promise_catch() {
        let m = model("try { run() } catch { cleanup() }\nload().catch(err => { if (err instanceof errors.NotFound) return [] })");
        assert_eq!(m.try_regions[0].handler.as_ref().unwrap().param, None);
        assert_eq!(m.promise_handlers.len(), 1);
        assert_eq!(m.promise_handlers[0].param.as_deref(), Some("err"));
        assert!(m.handler_for("NotFound").is_some());
    }

    #[test]
    fn test_thrown_types() {
        let m = model("function f(x) { if (!x) throw new errors.InvalidInput('x'); return new Promise((_, reject) => reject(new TimeoutError())) }");
        let thrown: Vec<&str> = m.thrown.iter().map(|t| t.error_type.as_str()).collect();
        assert_eq!(thrown, vec!["InvalidInput", "TimeoutError"]);
    }

    // ── Return shapes ──────────────────────────────────

    #[test]
    fn test_return_shapes() {
        let m = model("function f(u) { return { token: sign(u), 'expires-at': 1, ...rest, user } }\nconst g = () => ({ ok: true })");
        assert_eq!(m.return_shapes.len(), 2);
        assert_eq!(m.return_shapes[0].keys, vec!["token", "expires-at", "user"]);
        assert_eq!(m.return_shapes[1].keys, vec!["ok"]);
        assert!(m.return_shape_with(&["token".into(), "user".into()]).is_some());
        assert!(m.return_shape_with(&["token".into(), "missing".into()]).is_none());
    }

    // ── Imports ────────────────────────────────────────

    #[test]
    fn test_imports_start_unresolved() {
        let mut m = model("import { db } from './db'\nimport express from 'express'");
        assert_eq!(m.imports.len(), 2);
        assert!(m.imports.iter().all(|i| i.resolved.is_none()));
        m.resolve_imports(|specifier| {
            specifier.starts_with("./")
                .then(|| ResolvedModule::Unit("app.db".to_string()))
        });
        assert_eq!(m.imports[0].resolved, Some(ResolvedModule::Unit("app.db".into())));
        assert_eq!(m.imports[1].resolved, None);
        assert!(m.imports[0].is_relative());
    }

    #[test]
    fn test_unparseable_source_is_error() {
        assert!(SemanticModel::from_source("function f( {").is_err());
    }

    #[test]
    fn test_model_determinism_100_iterations() {
        let input = "import log from './log'\nexport function f({ a }, b) { try { log(a) } catch (e) { if (e instanceof X) throw new Y() } return { a, b } }";
        let first = model(input);
        for i in 0..100 {
            assert_eq!(first, model(input), "Determinism failure at iteration {}", i);
        }
    }
}
