//! Program registry (§4.I): a plain thread-safe map from program id to
//! program handle, with its own lock independent of the bus's
//! subscriber-list lock.

use std::sync::Arc;

use dashmap::DashMap;

use crate::program::Program;
use crate::types::ProgramInfo;

#[derive(Default)]
pub struct Registry {
    programs: DashMap<String, Arc<Program>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, program: Arc<Program>) {
        self.programs.insert(program.id().to_string(), program);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Program>> {
        self.programs.get(id).map(|e| e.value().clone())
    }

    pub fn unregister(&self, id: &str) {
        self.programs.remove(id);
    }

    pub fn list(&self) -> Vec<ProgramInfo> {
        self.programs.iter().map(|e| e.value().info()).collect()
    }

    pub fn alive_ids(&self) -> Vec<String> {
        self.programs.iter().filter(|e| e.value().is_alive()).map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_fetch_round_trips() {
        let reg = Registry::new();
        let p = Program::new("patcher");
        let id = p.id().to_string();
        reg.register(p);
        assert!(reg.get(&id).is_some());
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn unregister_removes_program() {
        let reg = Registry::new();
        let p = Program::new("verifier");
        let id = p.id().to_string();
        reg.register(p);
        reg.unregister(&id);
        assert!(reg.get(&id).is_none());
    }
}
