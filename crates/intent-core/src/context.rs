//! Analysis context - the long-lived state behind batched verification
//!
//! One context is shared by every unit of a batch so configuration loading,
//! parsing and import resolution are paid once:
//!
//! - the parse cache maps SHA-256(location, text) to the parsed model, with
//!   parse failures cached as `None`
//! - the resolution table memoizes `(importing directory, specifier)` lookups
//! - the virtual-module table lets batch members import each other without
//!   existing on disk
//!
//! The context is an explicit value; [`crate::verify_one`] and friends use a
//! thread-local instance that [`crate::reset_analysis_cache`] resets.

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{CompilerOptions, VerifierOptions};
use crate::model::{ResolvedModule, SemanticModel};
use crate::verifier::{self, VerificationResult};
use crate::Unit;

/// Module file extensions, in resolution order
pub const MODULE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Cached modules (parse failures included)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub parse_failures: u64,
    /// Memoized import resolutions
    pub resolutions: usize,
}

/// Shared analysis state for one project root
#[derive(Debug, Default)]
pub struct AnalysisContext {
    project_root: Option<PathBuf>,
    compiler_options: CompilerOptions,
    options: VerifierOptions,
    cache: HashMap<String, Option<Arc<SemanticModel>>>,
    resolutions: HashMap<(PathBuf, String), Option<ResolvedModule>>,
    /// Extension-less module location → unit id, for the current batch
    virtual_modules: BTreeMap<PathBuf, String>,
    hits: u64,
    misses: u64,
    parse_failures: u64,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with custom sink tables
    pub fn with_options(options: VerifierOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    pub fn compiler_options(&self) -> &CompilerOptions {
        &self.compiler_options
    }

    pub fn verifier_options(&self) -> &VerifierOptions {
        &self.options
    }

    /// Point the context at a project root
    ///
    /// Configuration is reloaded and root-dependent tables are cleared only
    /// when the root actually changes.
    pub fn set_project_root(&mut self, root: &Path) {
        if self.project_root.as_deref() == Some(root) {
            return;
        }
        debug!(root = %root.display(), "switching project root");
        self.compiler_options = CompilerOptions::discover(root);
        self.project_root = Some(root.to_path_buf());
        self.resolutions.clear();
        self.virtual_modules.clear();
    }

    /// Drop all cached state and configuration (sink tables are kept)
    pub fn reset(&mut self) {
        let options = std::mem::take(&mut self.options);
        *self = Self::with_options(options);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            hits: self.hits,
            misses: self.misses,
            parse_failures: self.parse_failures,
            resolutions: self.resolutions.len(),
        }
    }

    // ── Verification ──────────────────────────────────

    /// Verify one unit against this context
    pub fn verify_one(&mut self, unit: &Unit) -> VerificationResult {
        let model = self.model_for(unit);
        debug!(unit = %unit.id, parsed = model.is_some(), "verifying unit");
        verifier::verify(unit, model.as_deref(), &self.options)
    }

    /// Verify a batch sharing this context; batch members resolve each other's imports
    pub fn verify_all(&mut self, units: &[Unit], project_root: &Path) -> BTreeMap<String, VerificationResult> {
        self.set_project_root(project_root);
        self.register_batch(units);

        let mut results = BTreeMap::new();
        for unit in units {
            let result = self.verify_one(unit);
            if results.insert(unit.id.clone(), result).is_some() {
                warn!(unit = %unit.id, "duplicate unit id in batch; keeping the last result");
            }
        }
        results
    }

    fn register_batch(&mut self, units: &[Unit]) {
        let mut table = BTreeMap::new();
        for unit in units {
            for location in self.location_candidates(unit) {
                table
                    .entry(strip_module_extension(&location))
                    .or_insert_with(|| unit.id.clone());
            }
        }
        if table != self.virtual_modules {
            self.virtual_modules = table;
            self.resolutions.clear();
        }
    }

    // ── Semantic models ───────────────────────────────

    /// Semantic model for a unit's implementation, `None` when it does not parse
    pub fn model_for(&mut self, unit: &Unit) -> Option<Arc<SemanticModel>> {
        let location = self.inferred_location(unit);
        let key = cache_key(&location, &unit.implementation_text);

        let parsed = match self.cache.get(&key) {
            Some(entry) => {
                self.hits += 1;
                debug!(unit = %unit.id, "parse cache hit");
                entry.clone()
            }
            None => {
                self.misses += 1;
                debug!(unit = %unit.id, "parse cache miss");
                let entry = match SemanticModel::from_source(&unit.implementation_text) {
                    Ok(model) => Some(Arc::new(model)),
                    Err(err) => {
                        self.parse_failures += 1;
                        warn!(unit = %unit.id, error = %err, "implementation does not parse; falling back to text matching");
                        None
                    }
                };
                self.cache.insert(key, entry.clone());
                entry
            }
        };

        let model = parsed?;
        if model.imports.is_empty() {
            return Some(model);
        }
        let mut resolved = (*model).clone();
        resolved.resolve_imports(|specifier| self.resolve(&location, specifier));
        Some(Arc::new(resolved))
    }

    /// Where a unit's implementation lives (or would live) on disk
    ///
    /// An explicit `implementation_path` wins; otherwise the dotted id maps to
    /// `<root>/a/b/c.<ext>` or `<root>/src/a/b/c.<ext>`, preferring a file that
    /// exists and defaulting to `<root>/a/b/c.ts`.
    pub fn inferred_location(&self, unit: &Unit) -> PathBuf {
        let candidates = self.location_candidates(unit);
        if self.project_root.is_some() && unit.implementation_path.is_none() {
            for stem in &candidates {
                for ext in MODULE_EXTENSIONS {
                    let path = stem.with_extension(ext);
                    if path.is_file() {
                        return path;
                    }
                }
            }
        }
        match candidates.into_iter().next() {
            Some(path) if unit.implementation_path.is_some() => path,
            Some(stem) => stem.with_extension(MODULE_EXTENSIONS[0]),
            None => PathBuf::new(),
        }
    }

    /// Explicit path, or extension-less candidates derived from the dotted id
    fn location_candidates(&self, unit: &Unit) -> Vec<PathBuf> {
        let root = self.project_root.clone().unwrap_or_default();
        if let Some(path) = &unit.implementation_path {
            return vec![normalize(&root.join(path))];
        }
        let relative: PathBuf = unit.id.split('.').filter(|s| !s.is_empty()).collect();
        vec![normalize(&root.join(&relative)), normalize(&root.join("src").join(&relative))]
    }

    // ── Import resolution ─────────────────────────────

    fn resolve(&mut self, from: &Path, specifier: &str) -> Option<ResolvedModule> {
        let dir = from.parent().map(Path::to_path_buf).unwrap_or_default();
        let key = (dir, specifier.to_string());
        if let Some(resolved) = self.resolutions.get(&key) {
            return resolved.clone();
        }

        let candidates: Vec<PathBuf> = if specifier.starts_with("./") || specifier.starts_with("../") {
            vec![normalize(&key.0.join(specifier))]
        } else {
            match &self.project_root {
                Some(root) => self
                    .compiler_options
                    .alias_candidates(root, specifier)
                    .iter()
                    .map(|path| normalize(path))
                    .collect(),
                None => Vec::new(),
            }
        };

        let resolved = candidates.iter().find_map(|candidate| self.lookup(candidate));
        if resolved.is_none() {
            debug!(specifier, from = %from.display(), "import left unresolved");
        }
        self.resolutions.insert(key, resolved.clone());
        resolved
    }

    /// Batch members first, then the filesystem (only with a project root)
    fn lookup(&self, target: &Path) -> Option<ResolvedModule> {
        let stem = strip_module_extension(target);
        for candidate in [stem.clone(), stem.join("index")] {
            if let Some(id) = self.virtual_modules.get(&candidate) {
                return Some(ResolvedModule::Unit(id.clone()));
            }
        }

        self.project_root.as_ref()?;
        if target != stem && target.is_file() {
            return Some(ResolvedModule::File(target.to_path_buf()));
        }
        for base in [stem.clone(), stem.join("index")] {
            for ext in MODULE_EXTENSIONS {
                let path = base.with_extension(ext);
                if path.is_file() {
                    return Some(ResolvedModule::File(path));
                }
            }
        }
        None
    }
}

fn cache_key(location: &Path, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(location.to_string_lossy().as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn strip_module_extension(path: &Path) -> PathBuf {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if MODULE_EXTENSIONS.contains(&ext) => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Lexically resolve `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Contract, Unit};
    use std::fs;

    fn unit(id: &str, text: &str) -> Unit {
        Unit {
            id: id.to_string(),
            purpose: String::new(),
            contract: Contract::default(),
            implementation_text: text.to_string(),
            implementation_path: None,
        }
    }

    // ── Parse cache ────────────────────────────────────

    #[test]
    fn test_cache_hits_and_failures() {
        let mut ctx = AnalysisContext::new();
        let good = unit("app.greet", "function greet(input) { return input.name }");
        let bad = unit("app.broken", "function broken( {");

        assert!(ctx.model_for(&good).is_some());
        assert!(ctx.model_for(&good).is_some());
        assert!(ctx.model_for(&bad).is_none());
        assert!(ctx.model_for(&bad).is_none());

        let stats = ctx.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.parse_failures, 1);
    }

    #[test]
    fn test_same_text_different_location_is_separate_entry() {
        let mut ctx = AnalysisContext::new();
        ctx.model_for(&unit("a.one", "const x = 1"));
        ctx.model_for(&unit("a.two", "const x = 1"));
        assert_eq!(ctx.stats().entries, 2);
        assert_eq!(ctx.stats().hits, 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = AnalysisContext::new();
        ctx.set_project_root(dir.path());
        ctx.model_for(&unit("a.b", "const x = 1"));
        ctx.reset();
        assert_eq!(ctx.stats(), CacheStats::default());
        assert!(ctx.project_root().is_none());
        assert_eq!(ctx.compiler_options(), &CompilerOptions::default());
    }

    #[test]
    fn test_reset_keeps_custom_options() {
        let options = VerifierOptions {
            logging_roots: vec!["audit".into()],
            ..VerifierOptions::default()
        };
        let mut ctx = AnalysisContext::with_options(options.clone());
        ctx.reset();
        assert_eq!(ctx.verifier_options(), &options);
    }

    // ── Configuration ──────────────────────────────────

    #[test]
    fn test_project_root_change_reloads_config() {
        let strict_off = tempfile::tempdir().unwrap();
        fs::write(
            strict_off.path().join("tsconfig.json"),
            "{ \"compilerOptions\": { \"strict\": false } }",
        )
        .unwrap();
        let plain = tempfile::tempdir().unwrap();

        let mut ctx = AnalysisContext::new();
        ctx.set_project_root(strict_off.path());
        assert!(!ctx.compiler_options().strict);

        // same root: config is not reloaded even if the file changes
        fs::write(strict_off.path().join("tsconfig.json"), "{}").unwrap();
        ctx.set_project_root(strict_off.path());
        assert!(!ctx.compiler_options().strict);

        ctx.set_project_root(plain.path());
        assert!(ctx.compiler_options().strict);
    }

    // ── Locations & imports ────────────────────────────

    #[test]
    fn test_inferred_location() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::write(dir.path().join("src/app/login.js"), "").unwrap();

        let mut ctx = AnalysisContext::new();
        ctx.set_project_root(dir.path());
        assert_eq!(
            ctx.inferred_location(&unit("app.login", "")),
            dir.path().join("src/app/login.js")
        );
        assert_eq!(
            ctx.inferred_location(&unit("app.logout", "")),
            dir.path().join("app/logout.ts")
        );

        let mut explicit = unit("app.login", "");
        explicit.implementation_path = Some(PathBuf::from("lib/./auth.mjs"));
        assert_eq!(ctx.inferred_location(&explicit), dir.path().join("lib/auth.mjs"));
    }

    #[test]
    fn test_batch_members_resolve_as_virtual_modules() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = AnalysisContext::new();
        let units = vec![
            unit("app.auth.login", "import { find } from '../db'\nimport jwt from 'jsonwebtoken'\nexport function login(u) { return find(u) }"),
            unit("app.db", "export function find(u) { return u }"),
        ];
        ctx.set_project_root(dir.path());
        ctx.register_batch(&units);

        let model = ctx.model_for(&units[0]).unwrap();
        assert_eq!(model.imports[0].resolved, Some(ResolvedModule::Unit("app.db".into())));
        assert_eq!(model.imports[1].resolved, None);
        assert_eq!(ctx.stats().resolutions, 2);
    }

    #[test]
    fn test_imports_resolve_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app/util")).unwrap();
        fs::write(dir.path().join("app/util/index.js"), "").unwrap();

        let mut ctx = AnalysisContext::new();
        ctx.set_project_root(dir.path());
        let model = ctx
            .model_for(&unit("app.main", "import util from './util'\nimport cfg from './missing'"))
            .unwrap();
        assert_eq!(
            model.imports[0].resolved,
            Some(ResolvedModule::File(dir.path().join("app/util/index.js")))
        );
        assert_eq!(model.imports[1].resolved, None);
    }

    #[test]
    fn test_alias_imports_use_compiler_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "@/*": ["src/*"] } } }"#,
        )
        .unwrap();
        let mut ctx = AnalysisContext::new();
        let units = vec![
            unit("app.page", "import { db } from '@/services/db'"),
            unit("services.db", "export const db = {}"),
        ];
        let results = ctx.verify_all(&units, dir.path());
        assert_eq!(results.len(), 2);
        let model = ctx.model_for(&units[0]).unwrap();
        assert_eq!(
            model.imports[0].resolved,
            Some(ResolvedModule::Unit("services.db".into()))
        );
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/./c/../d")), PathBuf::from("/a/b/d"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
    }
}
