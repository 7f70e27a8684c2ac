//! Internal error seam. Per the propagation policy (retrieval, snippets, the
//! context builder, and the bus never raise to their callers), this type is
//! used only at the edges — config loading, file IO helpers — and is never
//! threaded through the public retrieval/snippet/context/bus API.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("path escapes project root: {0}")]
    PathTraversal(PathBuf),

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed chunk record at {0}")]
    MalformedChunk(PathBuf),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
