//! The micro-program base: identity, liveness, and an exports map for
//! prompt macros (§3 "Program", §4.M). Tracks the `program.spawn` /
//! `program.exit` / `program.heartbeat` lifecycle; both concrete programs
//! (`patch::PatcherProgram`, `verify::VerifierProgram`) embed one of these
//! rather than inheriting from it, matching the "data-driven, not
//! inheritance" dispatch style called out in §9.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::types::{truncate_export, ProgramInfo};

/// A running micro-program: a stable 12-hex id, a display name, a liveness
/// flag, and an exports map that task handlers write string values into
/// (`last_patch_preview`, `last_verify_score`, ...).
pub struct Program {
    id: String,
    name: String,
    alive: AtomicBool,
    exports: DashMap<String, String>,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: new_program_id(),
            name: name.into(),
            alive: AtomicBool::new(true),
            exports: DashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn mark_exited(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Write an export value, truncating to `EXPORT_MAX_CHARS` per §4.J.
    pub fn set_export(&self, key: &str, value: impl AsRef<str>) {
        self.exports.insert(key.to_string(), truncate_export(value.as_ref()));
    }

    pub fn export(&self, key: &str) -> Option<String> {
        self.exports.get(key).map(|v| v.clone())
    }

    pub fn exports_snapshot(&self) -> std::collections::HashMap<String, String> {
        self.exports.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn info(&self) -> ProgramInfo {
        ProgramInfo { id: self.id.clone(), name: self.name.clone(), alive: self.is_alive() }
    }
}

/// 12 lowercase hex characters, the program/task id format used throughout
/// §3 ("Program", "Task").
pub fn new_program_id() -> String {
    let u = Uuid::new_v4();
    u.simple().to_string()[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_program_id_is_12_hex_chars() {
        let id = new_program_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn exports_are_truncated_through_the_shared_helper() {
        let p = Program::new("patcher");
        let long = "x".repeat(7000);
        p.set_export("last_patch_preview", &long);
        let stored = p.export("last_patch_preview").unwrap();
        assert!(stored.len() < long.len());
        assert!(stored.ends_with("...[truncated]"));
    }

    #[test]
    fn mark_exited_flips_alive_flag() {
        let p = Program::new("verifier");
        assert!(p.is_alive());
        p.mark_exited();
        assert!(!p.is_alive());
        assert!(!p.info().alive);
    }
}
