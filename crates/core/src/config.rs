//! Typed runtime configuration, loaded env-var-first, `.jinx.toml`-file-second,
//! hardcoded-default-third, covering the knobs the retrieval/snippet/context/
//! patch/verify components read.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RetrievalError, Result};

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub project_root: PathBuf,
    pub exclude_dirs: HashSet<String>,
    pub include_exts: HashSet<String>,
    pub max_file_bytes: u64,

    pub top_k: usize,
    pub snippet_per_hit_chars: usize,
    pub total_code_budget: usize,
    pub no_code_budget: bool,

    pub always_full_py_scope: bool,
    pub full_scope_top_n: usize,

    pub multi_segment: bool,
    pub head_lines: usize,
    pub tail_lines: usize,
    pub mid_windows: usize,
    pub mid_around: usize,
    pub strip_comments: bool,
    pub scope_max_chars: usize,

    pub callgraph_enabled: bool,
    pub callgraph_callers_limit: usize,
    pub callgraph_callees_limit: usize,
    pub callgraph_around: usize,
    pub callgraph_scan_cap_files: usize,
    pub callgraph_time_budget_ms: u64,

    pub exhaustive: bool,
    pub no_stage_budgets: bool,
    pub stage_default_ms: u64,
    pub overall_single_ms: u64,
    pub overall_multi_ms: u64,
    pub literal_burst_ms: u64,

    pub snippet_ttl: Duration,
    pub snippet_cache_max: usize,
    pub snippet_coalesce_wait_ms: u64,
    pub snippet_conc: usize,

    pub refs_policy: RefsPolicy,
    pub refs_max_chars: usize,
    pub refs_auto_min: usize,

    pub patch_max_span: usize,
    pub filesize_warn: bool,
    pub filesize_max_lines: usize,
    pub filesize_max_bytes: u64,
    pub dump_force: bool,

    pub verify_pass: f64,
    pub verify_topk: usize,
    pub verify_ms: u64,

    pub runtime_heartbeat_sec: u64,

    pub expand_callees_top_n: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefsPolicy {
    Always,
    Auto,
    Never,
}

impl RefsPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(Self::Always),
            "auto" => Some(Self::Auto),
            "never" => Some(Self::Never),
            _ => None,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env_str(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_str(key).as_deref() {
        Some("0") | Some("false") | Some("off") | Some("no") => false,
        Some("1") | Some("true") | Some("on") | Some("yes") => true,
        _ => default,
    }
}

impl RetrievalConfig {
    /// Build a config for `project_root`, reading `.jinx.toml` if present and
    /// letting any recognized environment variable override either it or the
    /// hardcoded defaults below.
    pub fn load(project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let file_table = Self::read_toml(&project_root)?;

        let mut exclude_dirs: HashSet<String> =
            [".git", ".jinx", "log", "node_modules", "__pycache__", "target", "dist", "build"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        if let Some(extra) = env_str("EMBED_PROJECT_EXCLUDE_DIRS") {
            exclude_dirs.extend(extra.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
        } else if let Some(tbl) = &file_table {
            if let Some(arr) = tbl.get("exclude_dirs").and_then(|v| v.as_array()) {
                exclude_dirs.extend(arr.iter().filter_map(|v| v.as_str()).map(|s| s.to_string()));
            }
        }
        // the agent's internal directories are always excluded, regardless of config
        exclude_dirs.insert(".jinx".to_string());
        exclude_dirs.insert("log".to_string());

        let include_exts: HashSet<String> = env_str("EMBED_PROJECT_INCLUDE_EXTS")
            .map(|v| v.split(',').map(|s| s.trim().trim_start_matches('.').to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            project_root,
            exclude_dirs,
            include_exts,
            max_file_bytes: env_u64("EMBED_PROJECT_MAX_FILE_BYTES", 1_000_000),

            top_k: env_usize("EMBED_PROJECT_TOP_K", 20),
            snippet_per_hit_chars: env_usize("EMBED_PROJECT_SNIPPET_PER_HIT_CHARS", 1600),
            total_code_budget: env_usize("EMBED_PROJECT_TOTAL_CODE_BUDGET", 20_000),
            no_code_budget: env_bool("EMBED_PROJECT_NO_CODE_BUDGET", true),

            always_full_py_scope: env_bool("EMBED_PROJECT_ALWAYS_FULL_PY_SCOPE", true),
            full_scope_top_n: env_usize("EMBED_PROJECT_FULL_SCOPE_TOP_N", 0),

            multi_segment: env_bool("EMBED_PROJECT_MULTI_SEGMENT", true),
            head_lines: env_usize("EMBED_PROJECT_HEAD_LINES", 12),
            tail_lines: env_usize("EMBED_PROJECT_TAIL_LINES", 8),
            mid_windows: env_usize("EMBED_PROJECT_MID_WINDOWS", 3),
            mid_around: env_usize("EMBED_PROJECT_MID_AROUND", 4),
            strip_comments: env_bool("EMBED_PROJECT_STRIP_COMMENTS", true),
            scope_max_chars: env_usize("EMBED_PROJECT_SCOPE_MAX_CHARS", 6000),

            callgraph_enabled: env_bool("EMBED_PROJECT_CALLGRAPH", true),
            callgraph_callers_limit: env_usize("EMBED_PROJECT_CALLGRAPH_CALLERS", 3),
            callgraph_callees_limit: env_usize("EMBED_PROJECT_CALLGRAPH_CALLEES", 3),
            callgraph_around: env_usize("EMBED_PROJECT_CALLGRAPH_AROUND", 6),
            callgraph_scan_cap_files: env_usize("EMBED_PROJECT_CALLGRAPH_SCAN_CAP", 800),
            callgraph_time_budget_ms: env_u64("EMBED_PROJECT_CALLGRAPH_MS", 150),

            exhaustive: env_bool("EMBED_PROJECT_EXHAUSTIVE", true),
            no_stage_budgets: env_bool("EMBED_PROJECT_NO_STAGE_BUDGETS", false),
            stage_default_ms: env_u64("EMBED_PROJECT_STAGE_DEFAULT_MS", 180),
            overall_single_ms: env_u64("EMBED_PROJECT_OVERALL_MS", 280),
            overall_multi_ms: env_u64("EMBED_PROJECT_OVERALL_MULTI_MS", 300),
            literal_burst_ms: env_u64("EMBED_PROJECT_LITERAL_BURST_MS", 800),

            snippet_ttl: Duration::from_millis(env_u64("EMBED_PROJECT_SNIPPET_TTL_MS", 1200)),
            snippet_cache_max: env_usize("EMBED_PROJECT_SNIPPET_CACHE_MAX", 1024),
            snippet_coalesce_wait_ms: env_u64("EMBED_PROJECT_SNIPPET_COALESCE_WAIT_MS", 250),
            snippet_conc: env_usize("EMBED_PROJECT_SNIPPET_CONC", 4),

            refs_policy: env_str("JINX_REFS_POLICY")
                .and_then(|v| RefsPolicy::parse(&v))
                .unwrap_or(RefsPolicy::Always),
            refs_max_chars: env_usize("JINX_REFS_MAX_CHARS", 1600),
            refs_auto_min: env_usize("JINX_REFS_AUTO_MIN", 2),

            patch_max_span: env_usize("JINX_PATCH_MAX_SPAN", 80),
            filesize_warn: env_bool("JINX_FILESIZE_WARN", true),
            filesize_max_lines: env_usize("JINX_FILESIZE_MAXLINES", 1200),
            filesize_max_bytes: env_u64("JINX_FILESIZE_MAXBYTES", 150_000),
            dump_force: env_bool("JINX_DUMP_FORCE", false),

            verify_pass: env_f64("JINX_VERIFY_PASS", 0.6),
            verify_topk: env_usize("JINX_VERIFY_TOPK", 6),
            verify_ms: env_u64("JINX_VERIFY_MS", 400),

            runtime_heartbeat_sec: env_u64("JINX_RUNTIME_HEARTBEAT_SEC", 5),

            expand_callees_top_n: env_usize("EMBED_PROJECT_EXPAND_CALLEES_TOP_N", 2),
        })
    }

    fn read_toml(root: &Path) -> Result<Option<toml::Table>> {
        let path = root.join(".jinx.toml");
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RetrievalError::Io { path: path.clone(), source: e })?;
        let table: toml::Table =
            content.parse().map_err(|e| RetrievalError::Config(format!("{path:?}: {e}")))?;
        Ok(Some(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.top_k, 20);
        assert_eq!(cfg.snippet_per_hit_chars, 1600);
        assert!(cfg.exclude_dirs.contains(".jinx"));
        assert_eq!(cfg.refs_policy, RefsPolicy::Always);
    }

    #[test]
    fn jinx_toml_exclude_dirs_are_merged_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".jinx.toml"), "exclude_dirs = [\"vendor\"]\n").unwrap();
        let cfg = RetrievalConfig::load(dir.path()).unwrap();
        assert!(cfg.exclude_dirs.contains("vendor"));
        assert!(cfg.exclude_dirs.contains(".git"));
    }
}
