//! Implementation tokenizer - converts JavaScript/TypeScript text into a token stream
//!
//! Handles: keywords, identifiers, string literals, template literals (with
//! tokenized `${}` expressions), numbers, regex literals, punctuators and
//! operators. Comments (`//` and `/* */`) are discarded.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every error carries line:column

use crate::{Error, Result};

/// Token types for implementation source
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords the structural parser cares about
    Function,
    Async,
    Await,
    Return,
    Try,
    Catch,
    Finally,
    Import,
    Export,
    Default,
    Const,
    Let,
    Var,
    Class,
    New,
    Throw,
    Instanceof,
    Typeof,
    Case,

    // Literals
    StringLiteral(String),
    TemplateLiteral(Template),
    NumberLiteral(String),
    RegexLiteral(String),

    // Symbols
    LBrace,        // {
    RBrace,        // }
    LParen,        // (
    RParen,        // )
    LBracket,      // [
    RBracket,      // ]
    LAngle,        // <
    RAngle,        // >
    Semicolon,     // ;
    Comma,         // ,
    Colon,         // :
    Dot,           // .
    OptionalChain, // ?.
    Question,      // ?
    Arrow,         // =>
    Ellipsis,      // ...
    Equals,        // =
    At,            // @
    Operator(String),

    // Other
    Identifier(String),
    Eof,
}

impl Token {
    /// Source spelling of a keyword token
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::Function => "function",
            Token::Async => "async",
            Token::Await => "await",
            Token::Return => "return",
            Token::Try => "try",
            Token::Catch => "catch",
            Token::Finally => "finally",
            Token::Import => "import",
            Token::Export => "export",
            Token::Default => "default",
            Token::Const => "const",
            Token::Let => "let",
            Token::Var => "var",
            Token::Class => "class",
            Token::New => "new",
            Token::Throw => "throw",
            Token::Instanceof => "instanceof",
            Token::Typeof => "typeof",
            Token::Case => "case",
            _ => return None,
        };
        Some(text)
    }

    /// Name usable in property position: identifiers and keywords (`promise.catch`)
    pub fn property_name(&self) -> Option<&str> {
        match self {
            Token::Identifier(name) => Some(name),
            other => other.keyword_text(),
        }
    }

    /// Identifier text, if this is an identifier
    pub fn ident(&self) -> Option<&str> {
        match self {
            Token::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Whether this identifier token spells `word` (contextual keywords: `from`, `as`, `type`)
    pub fn is_word(&self, word: &str) -> bool {
        matches!(self, Token::Identifier(name) if name == word)
    }

    /// Render the token back to source-like text
    pub fn text(&self) -> String {
        if let Some(kw) = self.keyword_text() {
            return kw.to_string();
        }
        match self {
            Token::StringLiteral(s) => format!("\"{}\"", s),
            Token::TemplateLiteral(t) => format!("`{}`", t.quasis.join("${}")),
            Token::NumberLiteral(n) => n.clone(),
            Token::RegexLiteral(r) => r.clone(),
            Token::LBrace => "{".into(),
            Token::RBrace => "}".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::LAngle => "<".into(),
            Token::RAngle => ">".into(),
            Token::Semicolon => ";".into(),
            Token::Comma => ",".into(),
            Token::Colon => ":".into(),
            Token::Dot => ".".into(),
            Token::OptionalChain => "?.".into(),
            Token::Question => "?".into(),
            Token::Arrow => "=>".into(),
            Token::Ellipsis => "...".into(),
            Token::Equals => "=".into(),
            Token::At => "@".into(),
            Token::Operator(op) => op.clone(),
            Token::Identifier(name) => name.clone(),
            Token::Eof => String::new(),
            _ => String::new(),
        }
    }

    /// Whether a `/` after this token starts a regex literal rather than a division
    fn allows_regex_after(&self) -> bool {
        match self {
            Token::Identifier(_)
            | Token::NumberLiteral(_)
            | Token::StringLiteral(_)
            | Token::TemplateLiteral(_)
            | Token::RegexLiteral(_)
            | Token::RParen
            | Token::RBracket
            | Token::RBrace => false,
            // `</p>` closes a JSX element
            Token::LAngle => false,
            _ => true,
        }
    }
}

/// Template literal: text chunks plus the tokens of each `${}` expression
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub quasis: Vec<String>,
    pub expressions: Vec<Vec<SpannedToken>>,
}

/// Position in source text for error reporting
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Multi-character operators, longest first
const OPERATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Tokenizer for implementation source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    regex_allowed: bool,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            regex_allowed: true,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                });
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.peek_ahead(i) == Some(c))
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            if self.starts_with("//") {
                while let Some(ch) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            if self.starts_with("/*") {
                let start = self.current_span();
                self.advance();
                self.advance();
                loop {
                    if self.is_at_end() {
                        return Err(Error::ParseError(format!(
                            "Unterminated block comment starting at {}",
                            start
                        )));
                    }
                    if self.starts_with("*/") {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            return Ok(());
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken> {
        let span = self.current_span();
        let ch = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(SpannedToken {
                    token: Token::Eof,
                    span,
                })
            }
        };

        let token = match ch {
            '"' | '\'' => self.read_string(ch, &span)?,
            '`' => self.read_template(&span)?,
            '/' if self.regex_allowed => self.read_regex(&span)?,
            c if c.is_ascii_digit() => self.read_number(),
            '.' if self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            c if is_ident_start(c) => self.read_identifier_or_keyword(),
            '#' if self.peek_ahead(1).is_some_and(is_ident_start) => {
                self.advance();
                match self.read_identifier_or_keyword() {
                    Token::Identifier(name) => Token::Identifier(format!("#{}", name)),
                    other => Token::Identifier(format!("#{}", other.text())),
                }
            }
            _ => self.read_punctuator(&span)?,
        };

        self.regex_allowed = token.allows_regex_after();
        Ok(SpannedToken { token, span })
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, quote: char, span: &Span) -> Result<Token> {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(Error::ParseError(format!(
                        "Unterminated string starting at {}",
                        span
                    )));
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('\n') => {} // line continuation
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::ParseError(format!(
                            "Unterminated escape sequence at {}",
                            self.current_span()
                        )));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(Token::StringLiteral(value))
    }

    // ── Template literals ──────────────────────────────────

    fn read_template(&mut self, span: &Span) -> Result<Token> {
        self.advance(); // consume opening backtick
        let mut quasis = Vec::new();
        let mut expressions = Vec::new();
        let mut chunk = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(Error::ParseError(format!(
                        "Unterminated template literal starting at {}",
                        span
                    )));
                }
                Some('`') => break,
                Some('\\') => {
                    if let Some(c) = self.advance() {
                        chunk.push(c);
                    }
                }
                Some('$') if self.peek() == Some('{') => {
                    self.advance();
                    quasis.push(std::mem::take(&mut chunk));
                    expressions.push(self.read_template_expression(span)?);
                }
                Some(c) => chunk.push(c),
            }
        }
        quasis.push(chunk);

        Ok(Token::TemplateLiteral(Template { quasis, expressions }))
    }

    /// Tokens of one `${ ... }` expression, up to its closing brace
    fn read_template_expression(&mut self, span: &Span) -> Result<Vec<SpannedToken>> {
        let mut tokens = Vec::new();
        let mut depth = 0usize;
        self.regex_allowed = true;

        loop {
            self.skip_whitespace_and_comments()?;
            if self.is_at_end() {
                return Err(Error::ParseError(format!(
                    "Unterminated template expression in literal starting at {}",
                    span
                )));
            }
            if self.peek() == Some('}') && depth == 0 {
                self.advance();
                return Ok(tokens);
            }
            let token = self.next_token()?;
            match token.token {
                Token::LBrace => depth += 1,
                Token::RBrace => depth = depth.saturating_sub(1),
                _ => {}
            }
            tokens.push(token);
        }
    }

    // ── Regex literals ─────────────────────────────────────

    fn read_regex(&mut self, span: &Span) -> Result<Token> {
        let start = self.position;
        self.advance(); // consume opening /
        let mut in_class = false;

        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(Error::ParseError(format!(
                        "Unterminated regex literal starting at {}",
                        span
                    )));
                }
                Some('\\') => {
                    self.advance();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        Ok(Token::RegexLiteral(text))
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self) -> Token {
        let start = self.position;
        let radix_prefixed = self.peek() == Some('0')
            && matches!(self.peek_ahead(1), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O'));

        while let Some(ch) = self.peek() {
            let exponent_sign = !radix_prefixed
                && (ch == '+' || ch == '-')
                && matches!(self.input.get(self.position.wrapping_sub(1)), Some('e' | 'E'));
            let is_dot = ch == '.' && !radix_prefixed && self.peek_ahead(1) != Some('.');
            if ch.is_ascii_alphanumeric() || ch == '_' || is_dot || exponent_sign {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        Token::NumberLiteral(text)
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self) -> Token {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        match text.as_str() {
            "function" => Token::Function,
            "async" => Token::Async,
            "await" => Token::Await,
            "return" => Token::Return,
            "try" => Token::Try,
            "catch" => Token::Catch,
            "finally" => Token::Finally,
            "import" => Token::Import,
            "export" => Token::Export,
            "default" => Token::Default,
            "const" => Token::Const,
            "let" => Token::Let,
            "var" => Token::Var,
            "class" => Token::Class,
            "new" => Token::New,
            "throw" => Token::Throw,
            "instanceof" => Token::Instanceof,
            "typeof" => Token::Typeof,
            "case" => Token::Case,
            _ => Token::Identifier(text),
        }
    }

    // ── Punctuators ────────────────────────────────────────

    fn read_punctuator(&mut self, span: &Span) -> Result<Token> {
        for op in OPERATORS {
            if self.starts_with(op) {
                // `a?.5:b` is a conditional, not an optional chain
                if *op == "?." && self.peek_ahead(2).is_some_and(|c| c.is_ascii_digit()) {
                    continue;
                }
                for _ in 0..op.chars().count() {
                    self.advance();
                }
                return Ok(match *op {
                    "..." => Token::Ellipsis,
                    "=>" => Token::Arrow,
                    "?." => Token::OptionalChain,
                    other => Token::Operator(other.to_string()),
                });
            }
        }

        let ch = self.advance().unwrap_or('\0');
        let token = match ch {
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '<' => Token::LAngle,
            '>' => Token::RAngle,
            ';' => Token::Semicolon,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            '?' => Token::Question,
            '=' => Token::Equals,
            '@' => Token::At,
            '+' | '-' | '*' | '/' | '%' | '!' | '~' | '&' | '|' | '^' => {
                Token::Operator(ch.to_string())
            }
            _ => {
                return Err(Error::ParseError(format!(
                    "Unexpected character '{}' at {}",
                    ch, span
                )));
            }
        };
        Ok(token)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
