//! Analysis configuration
//!
//! [`CompilerOptions`] is discovered from the project's build configuration
//! (`tsconfig.json`, then `jsconfig.json`); [`VerifierOptions`] holds the sink
//! tables the exposure rule consults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// Build-configuration files, in lookup order
pub const CONFIG_FILES: &[&str] = &["tsconfig.json", "jsconfig.json"];

// ── Compiler options ──────────────────────────────────────

/// The subset of `compilerOptions` the analysis reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerOptions {
    pub strict: bool,
    pub declaration: bool,
    pub allow_js: bool,
    pub base_url: Option<String>,
    /// `paths` aliases: pattern → substitutions
    pub paths: BTreeMap<String, Vec<String>>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            strict: true,
            declaration: false,
            allow_js: true,
            base_url: None,
            paths: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(rename = "compilerOptions", default)]
    compiler_options: CompilerOptions,
}

impl CompilerOptions {
    /// Parse a build-configuration file body (comments and trailing commas allowed)
    ///
    /// # Errors
    /// Returns `ConfigError` when the text is not valid JSON after stripping.
    pub fn from_config_text(text: &str) -> Result<Self> {
        let json = strip_json_comments(text);
        serde_json::from_str::<ConfigFile>(&json)
            .map(|file| file.compiler_options)
            .map_err(|e| Error::ConfigError(e.to_string()))
    }

    /// Locate the build-configuration file under `root`
    pub fn find_config(root: &Path) -> Option<PathBuf> {
        CONFIG_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|path| path.is_file())
    }

    /// Load options for `root`, falling back to defaults
    ///
    /// A missing file yields defaults silently; an unreadable or malformed
    /// one yields defaults and a warning.
    pub fn discover(root: &Path) -> Self {
        let path = match Self::find_config(root) {
            Some(path) => path,
            None => return Self::default(),
        };
        let loaded = fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(e.to_string()))
            .and_then(|text| Self::from_config_text(&text));
        match loaded {
            Ok(options) => {
                info!(config = %path.display(), strict = options.strict, "loaded build configuration");
                options
            }
            Err(err) => {
                warn!(config = %path.display(), error = %err, "ignoring malformed build configuration");
                Self::default()
            }
        }
    }

    /// Candidate paths (extension-less) for a non-relative specifier via `baseUrl` / `paths`
    pub fn alias_candidates(&self, root: &Path, specifier: &str) -> Vec<PathBuf> {
        let base = match &self.base_url {
            Some(base_url) => root.join(base_url),
            None if !self.paths.is_empty() => root.to_path_buf(),
            None => return Vec::new(),
        };

        let mut candidates = Vec::new();
        for (pattern, substitutions) in &self.paths {
            let captured = match pattern.split_once('*') {
                Some((prefix, suffix)) => specifier
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(suffix)),
                None => (pattern == specifier).then_some(""),
            };
            if let Some(captured) = captured {
                for substitution in substitutions {
                    candidates.push(base.join(substitution.replacen('*', captured, 1)));
                }
            }
        }
        if self.base_url.is_some() {
            candidates.push(base.join(specifier));
        }
        candidates
    }
}

/// Remove `//` and `/* */` comments and trailing commas, leaving strings intact
fn strip_json_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let ch = chars[i];
                    out.push(ch);
                    i += 1;
                    if ch == '\\' && i < chars.len() {
                        out.push(chars[i]);
                        i += 1;
                    } else if ch == '"' {
                        break;
                    }
                }
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ch => {
                out.push(ch);
                i += 1;
            }
        }
    }

    strip_trailing_commas(&out)
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            out.push(ch);
            if ch == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
            out.push(ch);
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if !matches!(next, Some('}') | Some(']')) {
                out.push(ch);
            }
        } else {
            out.push(ch);
        }
        i += 1;
    }
    out
}

// ── Verifier options ──────────────────────────────────────

/// Sink tables for the exposure rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierOptions {
    /// Objects/functions whose calls write to a log (`console`, `logger`)
    pub logging_roots: Vec<String>,
    /// Bare printing functions and stream writers, matched against the full callee
    pub printing_functions: Vec<String>,
    /// Response writers, matched against the full callee
    pub output_sinks: Vec<String>,
    /// Modules whose every call is a comparison/hash (`bcrypt`, `crypto`)
    pub safe_roots: Vec<String>,
    /// Callee name fragments marking comparison/hash calls (case-insensitive)
    pub safe_fragments: Vec<String>,
    /// Import specifiers with one of these as a whole name part (`./audit-log`) name a logging module
    pub logging_module_markers: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            logging_roots: strings(&[
                "console", "logger", "log", "logging", "winston", "pino", "bunyan", "debug",
            ]),
            printing_functions: strings(&[
                "print",
                "println",
                "printf",
                "puts",
                "alert",
                "process.stdout.write",
                "process.stderr.write",
            ]),
            output_sinks: strings(&[
                "res.send",
                "res.json",
                "res.write",
                "res.end",
                "response.send",
                "response.json",
                "reply.send",
            ]),
            safe_roots: strings(&["bcrypt", "bcryptjs", "argon2", "scrypt", "crypto"]),
            safe_fragments: strings(&[
                "compare",
                "hash",
                "verify",
                "digest",
                "timingsafeequal",
                "encrypt",
                "sign",
                "hmac",
            ]),
            logging_module_markers: strings(&["log", "logs", "logger", "logging", "audit-log"]),
        }
    }
}

/// Lowercased words of an import specifier, split at `/`, `.`, `-`, `_`, `@` and camelCase humps
fn name_parts(specifier: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in specifier.chars() {
        if matches!(c, '/' | '.' | '-' | '_' | '@') {
            parts.push(std::mem::take(&mut current));
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            parts.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    parts.push(current);
    parts.retain(|part| !part.is_empty());
    parts
}

impl VerifierOptions {
    /// Whether a callee (split into segments) writes to a log, console or response
    pub fn is_logging_callee(&self, segments: &[&str]) -> bool {
        if segments
            .iter()
            .any(|segment| self.logging_roots.iter().any(|root| root == segment))
        {
            return true;
        }
        let callee = segments.join(".");
        self.printing_functions.contains(&callee) || self.output_sinks.contains(&callee)
    }

    /// Whether a callee is a comparison/hashing call
    pub fn is_safe_callee(&self, segments: &[&str]) -> bool {
        if let Some(root) = segments.first() {
            if self.safe_roots.iter().any(|r| r == root) {
                return true;
            }
        }
        segments.last().is_some_and(|name| {
            let name = name.to_lowercase();
            self.safe_fragments.iter().any(|f| name.contains(f.as_str()))
        })
    }

    /// Whether an import specifier names a logging module (`./audit-log`, `winston`)
    pub fn is_logging_module(&self, specifier: &str) -> bool {
        let name = specifier.rsplit('/').next().unwrap_or(specifier).to_lowercase();
        let parts = name_parts(specifier);
        self.logging_module_markers
            .iter()
            .chain(self.logging_roots.iter())
            .any(|marker| *marker == name || parts.iter().any(|part| part == marker))
    }

    /// Call markers for line-based scanning when no model is available
    pub fn text_markers(&self) -> Vec<String> {
        let mut markers: Vec<String> = self
            .logging_roots
            .iter()
            .flat_map(|root| [format!("{}.", root), format!("{}(", root)])
            .collect();
        markers.extend(
            self.printing_functions
                .iter()
                .chain(self.output_sinks.iter())
                .map(|sink| format!("{}(", sink)),
        );
        markers
    }
}
