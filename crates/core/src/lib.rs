//! Retrieval & context-assembly core for an autonomous coding-agent runtime:
//! multi-stage code retrieval, snippet building, context assembly, and a
//! micro-runtime pub/sub bus driving patch/verify programs.

pub mod ast;
pub mod buffers;
pub mod bus;
pub mod callgraph;
pub mod config;
pub mod context;
pub mod deadline;
pub mod embed_store;
pub mod error;
pub mod fuzzy;
pub mod line_window;
pub mod orchestrator;
pub mod patch;
pub mod program;
pub mod py_scope;
pub mod query;
pub mod refs;
pub mod registry;
pub mod rerank;
pub mod runtime;
pub mod snippet;
pub mod stages;
pub mod supervisor;
pub mod types;
pub mod verify;
pub mod walker;
