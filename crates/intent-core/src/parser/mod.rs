//! Implementation parser - tokenizer, syntax tree types, and item-level parser
//!
//! Converts one JavaScript/TypeScript module into a [`ModuleNode`]. The parser
//! is structural: it recognizes top-level functions (with parameter and return
//! signatures), imports and classes, and steps over everything else. A module
//! parses iff it tokenizes and every `()`, `[]`, `{}` pair balances; anything
//! the item parser does not understand becomes an [`Item::Statement`].

pub mod ast;
pub mod tokenizer;

use std::borrow::Cow;

use crate::{Error, Result};
use ast::*;
use tokenizer::{Span, SpannedToken, Token, Tokenizer};

/// A parsed module plus the token stream it was built from
#[derive(Debug, Clone)]
pub struct ParsedSource {
    pub module: ModuleNode,
    pub tokens: Vec<SpannedToken>,
}

/// Parse implementation text into a module tree and its tokens
///
/// # Guarantees
/// - Deterministic: same input always produces same tree
/// - An interpreter directive on the first line never causes a failure
///
/// # Errors
/// Returns `ParseError` with line:column when the text does not tokenize or
/// its delimiters do not balance.
pub fn parse(text: &str) -> Result<ParsedSource> {
    let (source, interpreter) = neutralize_interpreter_directive(text);
    let tokens = Tokenizer::new(&source).tokenize()?;
    let matching = match_delimiters(&tokens)?;

    let items = Parser {
        tokens: &tokens,
        matching: &matching,
        pos: 0,
    }
    .parse_items();

    Ok(ParsedSource {
        module: ModuleNode { items, interpreter },
        tokens,
    })
}

/// Parse implementation text into a module tree
pub fn parse_module(text: &str) -> Result<ModuleNode> {
    parse(text).map(|parsed| parsed.module)
}

/// Rewrite a leading `#!` line into a line comment, returning the directive
///
/// The rewrite keeps every character offset and line number intact. A leading
/// byte-order mark is dropped.
pub fn neutralize_interpreter_directive(text: &str) -> (Cow<'_, str>, Option<String>) {
    let body = text.strip_prefix('\u{feff}').unwrap_or(text);
    match body.strip_prefix("#!") {
        Some(rest) => {
            let directive = rest.lines().next().unwrap_or("").trim().to_string();
            (Cow::Owned(format!("//{}", rest)), Some(directive))
        }
        None => (Cow::Borrowed(body), None),
    }
}

/// Pair every opening delimiter with its closer (and vice versa)
pub(crate) fn match_delimiters(tokens: &[SpannedToken]) -> Result<Vec<Option<usize>>> {
    let mut matching = vec![None; tokens.len()];
    let mut stack: Vec<usize> = Vec::new();

    for (i, st) in tokens.iter().enumerate() {
        match &st.token {
            Token::LParen | Token::LBracket | Token::LBrace => stack.push(i),
            Token::RParen | Token::RBracket | Token::RBrace => {
                let open = stack.pop().ok_or_else(|| {
                    Error::ParseError(format!(
                        "Unexpected '{}' at {}",
                        st.token.text(),
                        st.span
                    ))
                })?;
                if !closes(&tokens[open].token, &st.token) {
                    return Err(Error::ParseError(format!(
                        "Mismatched '{}' at {}: '{}' opened at {} is still open",
                        st.token.text(),
                        st.span,
                        tokens[open].token.text(),
                        tokens[open].span
                    )));
                }
                matching[open] = Some(i);
                matching[i] = Some(open);
            }
            Token::TemplateLiteral(template) => {
                for expression in &template.expressions {
                    match_delimiters(expression)?;
                }
            }
            _ => {}
        }
    }

    if let Some(open) = stack.pop() {
        return Err(Error::ParseError(format!(
            "Unclosed '{}' opened at {}",
            tokens[open].token.text(),
            tokens[open].span
        )));
    }

    Ok(matching)
}

fn closes(open: &Token, close: &Token) -> bool {
    matches!(
        (open, close),
        (Token::LParen, Token::RParen)
            | (Token::LBracket, Token::RBracket)
            | (Token::LBrace, Token::RBrace)
    )
}

/// Render a token slice as normalized type text (`Promise<Map<string, number>>`)
pub(crate) fn tokens_to_text(tokens: &[SpannedToken]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;

    for st in tokens {
        let tok = &st.token;
        if let Some(p) = prev {
            let spaced_op = |t: &Token| {
                matches!(t, Token::Arrow | Token::Equals)
                    || matches!(t, Token::Operator(op) if op == "|" || op == "&")
            };
            let needs_space = (is_wordy(p) && is_wordy(tok))
                || matches!(p, Token::Comma | Token::Colon)
                || spaced_op(p)
                || spaced_op(tok);
            if needs_space {
                out.push(' ');
            }
        }
        out.push_str(&tok.text());
        prev = Some(tok);
    }

    out
}

fn is_wordy(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Identifier(_) | Token::NumberLiteral(_) | Token::StringLiteral(_)
    ) || tok.keyword_text().is_some()
}

const PARAM_MODIFIERS: &[&str] = &["public", "private", "protected", "readonly", "override"];

// ── Item parser ──────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [SpannedToken],
    matching: &'a [Option<usize>],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_items(&mut self) -> Vec<Item> {
        let mut items = Vec::new();
        while !self.at_eof() {
            let before = self.pos;
            if let Some(item) = self.parse_item() {
                items.push(item);
            }
            if self.pos == before {
                self.pos += 1;
            }
        }
        items
    }

    // ── Cursor helpers ─────────────────────────────────

    fn token_at(&self, idx: usize) -> &'a Token {
        self.tokens
            .get(idx)
            .map(|st| &st.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek(&self) -> &'a Token {
        self.token_at(self.pos)
    }

    fn peek_ahead(&self, offset: usize) -> &'a Token {
        self.token_at(self.pos + offset)
    }

    fn span(&self) -> Span {
        self.span_at(self.pos)
    }

    fn span_at(&self, idx: usize) -> Span {
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

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn closing(&self, idx: usize) -> Option<usize> {
        self.matching.get(idx).copied().flatten()
    }

    /// Index just past the group starting at `idx` (or `idx + 1` for plain tokens)
    fn after_group(&self, idx: usize) -> usize {
        match self.token_at(idx) {
            Token::LParen | Token::LBracket | Token::LBrace => {
                self.closing(idx).map(|c| c + 1).unwrap_or(idx + 1)
            }
            _ => idx + 1,
        }
    }

    fn skip_group(&mut self) {
        self.pos = self.after_group(self.pos);
    }

    /// Step over a `<...>` type-argument list
    fn skip_angle(&mut self) {
        let mut depth: i32 = 0;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::LAngle => depth += 1,
                Token::RAngle => depth -= 1,
                Token::Operator(op) if op == ">>" => depth -= 2,
                Token::Operator(op) if op == ">>>" => depth -= 3,
                Token::LParen | Token::LBracket | Token::LBrace => {
                    self.skip_group();
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
            if depth <= 0 {
                return;
            }
        }
    }

    /// Skip the rest of a statement: up to `;`, or a new top-level declaration on a later line
    fn skip_statement(&mut self) {
        let start_line = self.span().line;
        let mut first = true;
        loop {
            match self.peek() {
                Token::Eof => return,
                Token::Semicolon => {
                    self.pos += 1;
                    return;
                }
                Token::RBrace | Token::RParen | Token::RBracket if first => {
                    self.pos += 1;
                    return;
                }
                tok if !first && starts_declaration(tok) => {
                    let prev = self.token_at(self.pos - 1);
                    if self.span().line > start_line && !continues_expression(prev) {
                        return;
                    }
                }
                _ => {}
            }
            self.skip_group();
            first = false;
        }
    }

    /// Close a declaration that has already been consumed: take an optional `;`,
    /// stop at a line break, or skip a same-line continuation (`.bind(this)`)
    fn finish_statement(&mut self) {
        if self.pos == 0 || matches!(self.token_at(self.pos - 1), Token::Semicolon) {
            return;
        }
        match self.peek() {
            Token::Semicolon => self.pos += 1,
            Token::Eof => {}
            _ => {
                if self.span().line == self.span_at(self.pos - 1).line {
                    self.skip_statement();
                }
            }
        }
    }

    // ── Items ──────────────────────────────────────────

    fn parse_item(&mut self) -> Option<Item> {
        let start = self.pos;
        let span = self.span();

        match self.peek() {
            Token::Semicolon => {
                self.pos += 1;
                None
            }
            Token::At => {
                self.skip_decorator();
                None
            }
            Token::Import if !matches!(self.peek_ahead(1), Token::LParen | Token::Dot) => {
                match self.parse_import() {
                    Some(import) => Some(Item::Import(import)),
                    None => self.fallback_statement(start, span),
                }
            }
            Token::Export => {
                self.pos += 1;
                let is_default = matches!(self.peek(), Token::Default);
                if is_default {
                    self.pos += 1;
                }
                let item = self.parse_declaration(true, is_default);
                match item {
                    Some(item) => Some(item),
                    None => self.fallback_statement(start, span),
                }
            }
            _ => match self.parse_declaration(false, false) {
                Some(item) => Some(item),
                None => {
                    self.pos = start;
                    if let Some(function) = self.parse_assigned_function() {
                        return Some(Item::Function(function));
                    }
                    self.fallback_statement(start, span)
                }
            },
        }
    }

    fn fallback_statement(&mut self, start: usize, span: Span) -> Option<Item> {
        self.pos = start;
        self.skip_statement();
        Some(Item::Statement(span))
    }

    /// Function, class or variable declaration at the cursor
    fn parse_declaration(&mut self, exported: bool, is_default: bool) -> Option<Item> {
        let start = self.pos;
        let result = match self.peek() {
            Token::Function => self.parse_function(exported).map(Item::Function),
            Token::Async if matches!(self.peek_ahead(1), Token::Function) => {
                self.parse_function(exported).map(Item::Function)
            }
            Token::Class => Some(Item::Class(self.parse_class(exported))),
            Token::Const | Token::Let | Token::Var => self.parse_variable(exported),
            Token::Async | Token::LParen | Token::Identifier(_) if is_default => {
                let span = self.span();
                let function = self.parse_arrow(None, exported, span);
                if function.is_some() {
                    self.finish_statement();
                }
                function.map(Item::Function)
            }
            _ => None,
        };
        if result.is_none() {
            self.pos = start;
        }
        result
    }

    fn skip_decorator(&mut self) {
        self.pos += 1; // @
        while self.peek().property_name().is_some() {
            self.pos += 1;
            if matches!(self.peek(), Token::Dot) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if matches!(self.peek(), Token::LParen) {
            self.skip_group();
        }
    }

    // ── Functions ──────────────────────────────────────

    /// `async? function *? name? <T>? (params) (: Ret)? { body }`
    fn parse_function(&mut self, exported: bool) -> Option<FunctionNode> {
        let span = self.span();
        let is_async = matches!(self.peek(), Token::Async);
        if is_async {
            self.pos += 1;
        }
        if !matches!(self.peek(), Token::Function) {
            return None;
        }
        self.pos += 1;
        if matches!(self.peek(), Token::Operator(op) if op == "*") {
            self.pos += 1;
        }
        let name = self.peek().ident().map(str::to_string);
        if name.is_some() {
            self.pos += 1;
        }
        if matches!(self.peek(), Token::LAngle) {
            self.skip_angle();
        }
        if !matches!(self.peek(), Token::LParen) {
            return None;
        }
        let params = self.parse_params(self.pos)?;
        self.skip_group();

        let return_type = if matches!(self.peek(), Token::Colon) {
            self.read_return_type(ReturnTypeEnd::Body)
        } else {
            None
        };

        match self.peek() {
            Token::LBrace => self.skip_group(),
            Token::Semicolon => self.pos += 1, // overload signature
            _ => {}
        }

        Some(FunctionNode {
            name,
            params,
            return_type,
            is_async,
            is_arrow: false,
            exported,
            span,
        })
    }

    /// `async? (params) (: Ret)? => body` or `async? ident => body`
    fn parse_arrow(&mut self, name: Option<String>, exported: bool, span: Span) -> Option<FunctionNode> {
        let start = self.pos;
        let is_async = matches!(self.peek(), Token::Async)
            && !matches!(self.peek_ahead(1), Token::Arrow);
        if is_async {
            self.pos += 1;
        }
        if matches!(self.peek(), Token::LAngle) {
            self.skip_angle();
        }

        let (params, return_type) = match self.peek() {
            Token::Identifier(param) if matches!(self.peek_ahead(1), Token::Arrow) => {
                let param_span = self.span();
                self.pos += 1;
                (
                    vec![ParamNode {
                        pattern: ParamPattern::Named(param.clone()),
                        type_annotation: None,
                        optional: false,
                        has_default: false,
                        span: param_span,
                    }],
                    None,
                )
            }
            Token::Async if matches!(self.peek_ahead(1), Token::Arrow) => {
                // `async => ...` binds a parameter literally named async
                let param_span = self.span();
                self.pos += 1;
                (
                    vec![ParamNode {
                        pattern: ParamPattern::Named("async".to_string()),
                        type_annotation: None,
                        optional: false,
                        has_default: false,
                        span: param_span,
                    }],
                    None,
                )
            }
            Token::LParen => {
                let params = self.parse_params(self.pos)?;
                self.skip_group();
                let return_type = if matches!(self.peek(), Token::Colon) {
                    self.read_return_type(ReturnTypeEnd::Arrow)
                } else {
                    None
                };
                (params, return_type)
            }
            _ => {
                self.pos = start;
                return None;
            }
        };

        if !matches!(self.peek(), Token::Arrow) {
            self.pos = start;
            return None;
        }
        self.pos += 1;
        if matches!(self.peek(), Token::LBrace) {
            self.skip_group();
        } else {
            self.skip_statement();
        }

        Some(FunctionNode {
            name,
            params,
            return_type,
            is_async,
            is_arrow: true,
            exported,
            span,
        })
    }

    /// `module.exports = function ...`, `exports.name = (...) => ...`
    fn parse_assigned_function(&mut self) -> Option<FunctionNode> {
        let start = self.pos;
        let span = self.span();
        let root = self.peek().ident()?.to_string();
        self.pos += 1;
        let mut last = root.clone();
        while matches!(self.peek(), Token::Dot) {
            last = self.peek_ahead(1).property_name()?.to_string();
            self.pos += 2;
        }
        if !matches!(self.peek(), Token::Equals) {
            self.pos = start;
            return None;
        }
        self.pos += 1;

        let exported = root == "module" || root == "exports";
        let name = if last == "exports" { None } else { Some(last) };
        let function = match self.peek() {
            Token::Function => self.parse_function(exported).map(|f| FunctionNode { name: f.name.or(name), ..f }),
            Token::Async if matches!(self.peek_ahead(1), Token::Function) => {
                self.parse_function(exported).map(|f| FunctionNode { name: f.name.or(name), ..f })
            }
            _ => self.parse_arrow(name, exported, span),
        };
        match function {
            Some(f) => {
                self.finish_statement();
                Some(f)
            }
            None => {
                self.pos = start;
                None
            }
        }
    }

    /// Parameter list of the `(` group at `open`
    fn parse_params(&self, open: usize) -> Option<Vec<ParamNode>> {
        let close = self.closing(open)?;
        Some(
            self.split_commas(open + 1, close)
                .into_iter()
                .filter_map(|(start, end)| self.parse_param(start, end))
                .collect(),
        )
    }

    /// Split `[start, end)` at depth-0 commas (parens, brackets, braces and angles count)
    fn split_commas(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut pieces = Vec::new();
        let mut piece_start = start;
        let mut angle: i32 = 0;
        let mut idx = start;

        while idx < end {
            match self.token_at(idx) {
                Token::LParen | Token::LBracket | Token::LBrace => {
                    idx = self.after_group(idx).min(end);
                    continue;
                }
                Token::LAngle => angle += 1,
                Token::RAngle => angle -= 1,
                Token::Operator(op) if op == ">>" => angle -= 2,
                Token::Operator(op) if op == ">>>" => angle -= 3,
                Token::Arrow => {}
                Token::Comma if angle <= 0 => {
                    if idx > piece_start {
                        pieces.push((piece_start, idx));
                    }
                    piece_start = idx + 1;
                    angle = 0;
                }
                _ => {}
            }
            idx += 1;
        }
        if end > piece_start {
            pieces.push((piece_start, end));
        }
        pieces
    }

    fn parse_param(&self, mut start: usize, end: usize) -> Option<ParamNode> {
        // Decorators and constructor-parameter modifiers
        loop {
            match self.token_at(start) {
                Token::At => {
                    start += 1;
                    while start < end && self.token_at(start).property_name().is_some() {
                        start += 1;
                        if matches!(self.token_at(start), Token::Dot) {
                            start += 1;
                        } else {
                            break;
                        }
                    }
                    if matches!(self.token_at(start), Token::LParen) {
                        start = self.after_group(start);
                    }
                }
                Token::Identifier(word)
                    if PARAM_MODIFIERS.contains(&word.as_str())
                        && start + 1 < end
                        && !matches!(
                            self.token_at(start + 1),
                            Token::Colon | Token::Equals | Token::Question | Token::Comma
                        ) =>
                {
                    start += 1
                }
                _ => break,
            }
        }
        if start >= end {
            return None;
        }

        let span = self.span_at(start);
        let (pattern, mut idx) = match self.token_at(start) {
            Token::Ellipsis => {
                let name = self.token_at(start + 1).ident()?.to_string();
                (ParamPattern::Rest(name), start + 2)
            }
            Token::LBrace => {
                let close = self.closing(start)?;
                (ParamPattern::Object(self.object_pattern(start + 1, close)), close + 1)
            }
            Token::LBracket => {
                let close = self.closing(start)?;
                (ParamPattern::Array(self.array_pattern(start + 1, close)), close + 1)
            }
            tok => {
                let name = tok.property_name()?.to_string();
                (ParamPattern::Named(name), start + 1)
            }
        };

        let optional = matches!(self.token_at(idx), Token::Question);
        if optional {
            idx += 1;
        }

        let mut type_annotation = None;
        if idx < end && matches!(self.token_at(idx), Token::Colon) {
            let type_start = idx + 1;
            let mut type_end = type_start;
            while type_end < end && !matches!(self.token_at(type_end), Token::Equals) {
                type_end = self.after_group(type_end).min(end);
            }
            if type_end > type_start {
                type_annotation = Some(tokens_to_text(&self.tokens[type_start..type_end]));
            }
            idx = type_end;
        }

        let has_default = idx < end && matches!(self.token_at(idx), Token::Equals);

        Some(ParamNode {
            pattern,
            type_annotation,
            optional,
            has_default,
            span,
        })
    }

    /// Fields of an object pattern between `start` and `end` (exclusive of braces)
    fn object_pattern(&self, start: usize, end: usize) -> Vec<DestructuredField> {
        let mut fields = Vec::new();
        for (piece_start, piece_end) in self.split_commas(start, end) {
            let first = self.token_at(piece_start);
            if matches!(first, Token::Ellipsis) {
                if let Some(name) = self.token_at(piece_start + 1).ident() {
                    fields.push(DestructuredField {
                        key: name.to_string(),
                        binding: name.to_string(),
                    });
                }
                continue;
            }
            let key = match first {
                Token::StringLiteral(s) => s.clone(),
                tok => match tok.property_name() {
                    Some(name) => name.to_string(),
                    None => continue, // computed key
                },
            };
            let binding = if piece_start + 1 < piece_end
                && matches!(self.token_at(piece_start + 1), Token::Colon)
            {
                self.token_at(piece_start + 2)
                    .ident()
                    .map(str::to_string)
                    .unwrap_or_else(|| key.clone())
            } else {
                key.clone()
            };
            fields.push(DestructuredField { key, binding });
        }
        fields
    }

    fn array_pattern(&self, start: usize, end: usize) -> Vec<String> {
        self.split_commas(start, end)
            .into_iter()
            .filter_map(|(piece_start, _)| match self.token_at(piece_start) {
                Token::Ellipsis => self.token_at(piece_start + 1).ident(),
                tok => tok.ident(),
            })
            .map(str::to_string)
            .collect()
    }

    /// Return type after `:`; the cursor ends on the body (or arrow)
    fn read_return_type(&mut self, end: ReturnTypeEnd) -> Option<String> {
        self.pos += 1; // :
        let start = self.pos;
        if matches!(self.peek(), Token::LBrace) {
            self.skip_group();
        }
        let mut angle: i32 = 0;
        loop {
            match self.peek() {
                Token::Eof | Token::Semicolon => break,
                Token::LBrace if angle <= 0 && end == ReturnTypeEnd::Body => break,
                Token::Arrow if angle <= 0 && end == ReturnTypeEnd::Arrow => break,
                Token::LParen | Token::LBracket | Token::LBrace => {
                    self.skip_group();
                    continue;
                }
                Token::LAngle => angle += 1,
                Token::RAngle => angle -= 1,
                Token::Operator(op) if op == ">>" => angle -= 2,
                Token::Operator(op) if op == ">>>" => angle -= 3,
                _ => {}
            }
            self.pos += 1;
        }
        if self.pos > start {
            Some(tokens_to_text(&self.tokens[start..self.pos]))
        } else {
            None
        }
    }

    // ── Variables ──────────────────────────────────────

    /// `const name (: T)? = <function | arrow | require(...)>`; anything else is `None`
    fn parse_variable(&mut self, exported: bool) -> Option<Item> {
        let span = self.span();
        self.pos += 1; // const / let / var

        // `const { a, b } = require("x")`
        if matches!(self.peek(), Token::LBrace) {
            let open = self.pos;
            let close = self.closing(open)?;
            let fields = self.object_pattern(open + 1, close);
            self.pos = close + 1;
            if !matches!(self.peek(), Token::Equals) {
                return None;
            }
            self.pos += 1;
            let (specifier, _) = self.require_call()?;
            self.finish_statement();
            return Some(Item::Import(ImportNode {
                specifier,
                bindings: fields
                    .into_iter()
                    .map(|f| ImportBinding {
                        imported: f.key,
                        local: f.binding,
                    })
                    .collect(),
                kind: ImportKind::Require,
                type_only: false,
                span,
            }));
        }

        let name = self.peek().ident()?.to_string();
        self.pos += 1;
        if matches!(self.peek(), Token::Colon) {
            self.pos += 1;
            while !matches!(self.peek(), Token::Equals | Token::Semicolon | Token::Eof) {
                self.skip_group();
            }
        }
        if !matches!(self.peek(), Token::Equals) {
            return None;
        }
        self.pos += 1;

        if let Some((specifier, member)) = self.require_call() {
            self.finish_statement();
            return Some(Item::Import(ImportNode {
                specifier,
                bindings: vec![ImportBinding {
                    imported: member.unwrap_or_else(|| "*".to_string()),
                    local: name,
                }],
                kind: ImportKind::Require,
                type_only: false,
                span,
            }));
        }

        let function = match self.peek() {
            Token::Function => self
                .parse_function(exported)
                .map(|f| FunctionNode { name: Some(name), span: span.clone(), ..f }),
            Token::Async if matches!(self.peek_ahead(1), Token::Function) => self
                .parse_function(exported)
                .map(|f| FunctionNode { name: Some(name), span: span.clone(), ..f }),
            _ => self.parse_arrow(Some(name), exported, span),
        }?;
        self.finish_statement();
        Some(Item::Function(function))
    }

    /// `require("x")` or `require("x").member` at the cursor
    fn require_call(&mut self) -> Option<(String, Option<String>)> {
        if !self.peek().is_word("require") || !matches!(self.peek_ahead(1), Token::LParen) {
            return None;
        }
        let specifier = match (self.peek_ahead(2), self.peek_ahead(3)) {
            (Token::StringLiteral(s), Token::RParen) => s.clone(),
            _ => return None,
        };
        self.pos += 4;
        let mut member = None;
        if matches!(self.peek(), Token::Dot) {
            member = self.peek_ahead(1).property_name().map(str::to_string);
            self.pos += 2;
        }
        Some((specifier, member))
    }

    // ── Classes ────────────────────────────────────────

    fn parse_class(&mut self, exported: bool) -> ClassNode {
        let span = self.span();
        self.pos += 1; // class
        let name = self.peek().ident().map(str::to_string);
        while !matches!(self.peek(), Token::LBrace | Token::Eof | Token::Semicolon) {
            self.skip_group();
        }
        if matches!(self.peek(), Token::LBrace) {
            self.skip_group();
        }
        ClassNode {
            name,
            exported,
            span,
        }
    }

    // ── Imports ────────────────────────────────────────

    fn parse_import(&mut self) -> Option<ImportNode> {
        let span = self.span();
        self.pos += 1; // import

        let type_only = self.peek().is_word("type")
            && !self.peek_ahead(1).is_word("from")
            && !matches!(self.peek_ahead(1), Token::Comma);
        if type_only {
            self.pos += 1;
        }

        let mut bindings = Vec::new();
        let specifier = match self.peek() {
            Token::StringLiteral(s) => {
                let s = s.clone();
                self.pos += 1;
                s
            }
            _ => {
                loop {
                    match self.peek() {
                        Token::Identifier(local) => {
                            bindings.push(ImportBinding {
                                imported: "default".to_string(),
                                local: local.clone(),
                            });
                            self.pos += 1;
                        }
                        Token::Operator(op) if op == "*" => {
                            if !self.peek_ahead(1).is_word("as") {
                                return None;
                            }
                            let local = self.peek_ahead(2).ident()?.to_string();
                            bindings.push(ImportBinding {
                                imported: "*".to_string(),
                                local,
                            });
                            self.pos += 3;
                        }
                        Token::LBrace => {
                            let open = self.pos;
                            let close = self.closing(open)?;
                            bindings.extend(self.named_imports(open + 1, close));
                            self.pos = close + 1;
                        }
                        _ => return None,
                    }
                    if matches!(self.peek(), Token::Comma) {
                        self.pos += 1;
                        continue;
                    }
                    break;
                }
                if !self.peek().is_word("from") {
                    return None;
                }
                self.pos += 1;
                match self.peek() {
                    Token::StringLiteral(s) => {
                        let s = s.clone();
                        self.pos += 1;
                        s
                    }
                    _ => return None,
                }
            }
        };

        // Import attributes: `with { type: "json" }` / `assert { ... }`
        if (self.peek().is_word("with") || self.peek().is_word("assert"))
            && matches!(self.peek_ahead(1), Token::LBrace)
        {
            self.pos += 1;
            self.skip_group();
        }
        if matches!(self.peek(), Token::Semicolon) {
            self.pos += 1;
        }

        Some(ImportNode {
            specifier,
            bindings,
            kind: ImportKind::Module,
            type_only,
            span,
        })
    }

    /// `{ a, b as c, type T }` between braces
    fn named_imports(&self, start: usize, end: usize) -> Vec<ImportBinding> {
        self.split_commas(start, end)
            .into_iter()
            .filter_map(|(mut piece_start, piece_end)| {
                if self.token_at(piece_start).is_word("type") && piece_start + 1 < piece_end {
                    piece_start += 1;
                }
                let imported = match self.token_at(piece_start) {
                    Token::StringLiteral(s) => s.clone(),
                    tok => tok.property_name()?.to_string(),
                };
                let local = if self.token_at(piece_start + 1).is_word("as") {
                    self.token_at(piece_start + 2).ident()?.to_string()
                } else {
                    imported.clone()
                };
                Some(ImportBinding { imported, local })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReturnTypeEnd {
    Body,
    Arrow,
}

/// Tokens that begin a new top-level declaration
fn starts_declaration(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Function
            | Token::Async
            | Token::Import
            | Token::Export
            | Token::Class
            | Token::Const
            | Token::Let
            | Token::Var
    )
}

/// Tokens after which a line break cannot end a statement
fn continues_expression(tok: &Token) -> bool {
    matches!(
        tok,
        Token::Operator(_)
            | Token::Dot
            | Token::OptionalChain
            | Token::Comma
            | Token::Equals
            | Token::Arrow
            | Token::Colon
            | Token::Question
            | Token::New
            | Token::Return
            | Token::Await
            | Token::Typeof
    )
}
