use std::io;

use jsrdbg_wire::JsrdbgError;
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Error, Debug)]
pub enum DebugError {
    #[error("jsrdbg: {0}")]
    Wire(#[from] JsrdbgError),
    #[error("unknown frame id {0}")]
    UnknownFrame(u64),
    #[error("unknown variablesReference {0}")]
    UnknownVariablesReference(u64),
    #[error("variablesReference {0} cannot be expanded")]
    NotExpandable(u64),
    #[error("identifier space exhausted pairing {0} with {1}")]
    IdSpaceExhausted(u64, u64),
    #[error("failed to read source {path}: {source}")]
    SourceRead {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl DebugError {
    /// The remote error code, when the engine rejected a request.
    pub fn remote_code(&self) -> Option<jsrdbg_wire::ErrorCode> {
        match self {
            DebugError::Wire(err) => err.remote_code(),
            _ => None,
        }
    }
}
