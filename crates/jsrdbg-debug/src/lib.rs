//! Debugger model on top of the jsrdbg wire client.
//!
//! Turns the engine's context-relative answers into ids a generic
//! step/pause/evaluate front end can hold on to:
//! - frame ids are `pair(context_id, depth)` ([`FrameMap`]),
//! - variable handles are `pair(frame_id, slot)` ([`VariablesMap`]),
//! - server lines map to local files through [`SourceMap`] and
//!   [`ServerSource`].
//!
//! [`DebugSession`] wires these to one [`jsrdbg_wire::Connection`].

pub mod breakpoints;
pub mod error;
pub mod frame_map;
pub mod pairing;
pub mod server_source;
pub mod session;
pub mod source_map;
pub mod variables;

pub use crate::breakpoints::BreakpointResult;
pub use crate::error::{DebugError, DebugResult};
pub use crate::frame_map::{FrameMap, StackFrame};
pub use crate::server_source::{Chunk, LocalPosition, ServerSource};
pub use crate::session::{DebugSession, FrameView, PausedStop, Scope, SessionOptions, StepKind};
pub use crate::source_map::{LocalSource, SourceMap};
pub use crate::variables::{Variable, VariablesContainer, VariablesMap};

/// Re-export the wire client so consumers can depend only on `jsrdbg-debug`.
pub mod wire {
    pub use jsrdbg_wire::*;
}
