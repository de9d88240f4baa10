use std::path::Path;

use jsrdbg_wire::{BreakpointInfo, Command, Connection, ErrorCode, JsrdbgError, Payload};

use crate::error::DebugResult;
use crate::server_source::LocalPosition;
use crate::source_map::SourceMap;

/// Outcome of one requested breakpoint line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointResult {
    /// The requested local line.
    pub line: usize,
    pub verified: bool,
    /// Engine breakpoint id, for [`clear_breakpoints`].
    pub id: Option<u64>,
    pub message: Option<String>,
}

/// Set one breakpoint per line of `local_path`.
///
/// A line the engine refuses with `CANNOT_SET_BREAKPOINT` comes back
/// unverified with the engine's message; the rest of the batch is still set.
/// Any other failure aborts the batch.
pub async fn set_breakpoints(
    connection: &Connection,
    source_map: &SourceMap,
    local_path: &Path,
    lines: &[usize],
) -> DebugResult<Vec<BreakpointResult>> {
    let remote_name = source_map.to_remote_name(local_path);
    let mut results = Vec::with_capacity(lines.len());

    for &line in lines {
        let remote_line = source_map.to_remote_line(&LocalPosition::new(remote_name.clone(), line));
        let remote_line = u32::try_from(remote_line)
            .map_err(|_| JsrdbgError::Protocol(format!("line {remote_line} is out of range")))?;

        let reply = connection
            .request(Command::set_breakpoint(&remote_name, remote_line, true))
            .await?
            .into_result();

        let result = match reply {
            Ok(response) => match response.payload()? {
                Payload::BreakpointSet(info) => BreakpointResult {
                    line,
                    verified: true,
                    id: info.bid,
                    message: None,
                },
                other => {
                    return Err(JsrdbgError::UnexpectedResponse {
                        expected: "breakpoint_set",
                        actual: other.kind().to_owned(),
                    }
                    .into())
                }
            },
            Err(JsrdbgError::Remote {
                code: ErrorCode::CannotSetBreakpoint,
                message,
            }) => {
                tracing::debug!(
                    target: "jsrdbg.debug",
                    source = %remote_name,
                    line,
                    remote_line,
                    %message,
                    "breakpoint rejected"
                );
                BreakpointResult {
                    line,
                    verified: false,
                    id: None,
                    message: Some(message),
                }
            }
            Err(err) => return Err(err.into()),
        };
        results.push(result);
    }

    Ok(results)
}

/// Delete breakpoints by engine id.
pub async fn clear_breakpoints(connection: &Connection, ids: &[u64]) -> DebugResult<()> {
    for &bid in ids {
        connection
            .request(Command::delete_breakpoint(bid))
            .await?
            .into_result()?;
    }
    Ok(())
}

pub async fn clear_all_breakpoints(connection: &Connection) -> DebugResult<()> {
    connection
        .request(Command::delete_all_breakpoints())
        .await?
        .into_result()?;
    Ok(())
}

/// Breakpoints the engine currently holds.
pub async fn list_breakpoints(connection: &Connection) -> DebugResult<Vec<BreakpointInfo>> {
    let response = connection
        .request(Command::get_all_breakpoints())
        .await?
        .into_result()?;
    match response.payload()? {
        Payload::AllBreakpoints(breakpoints) => Ok(breakpoints),
        other => Err(JsrdbgError::UnexpectedResponse {
            expected: "all_breakpoints",
            actual: other.kind().to_owned(),
        }
        .into()),
    }
}
