use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde_json::{json, Map, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::split_context_prefix,
    lock::LockRecovered,
    types::{ContextId, ContextInfo, ErrorCode, FrameVariables, WireStackFrame},
};

/// A tiny jsrdbg engine used for unit and integration tests.
///
/// It answers the command set this crate speaks with canned data from
/// [`MockJsrdbgServerConfig`], records every line it receives, and can push
/// unsolicited messages to connected clients.
pub struct MockJsrdbgServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug)]
pub struct MockJsrdbgServerConfig {
    /// Initial `contexts_list` snapshot.
    pub contexts: Vec<ContextInfo>,
    /// Frames returned by `get_stacktrace`, for every context.
    pub stacktrace: Vec<WireStackFrame>,
    /// Frames returned by `get_variables`. A `depth` query filters by
    /// `frame_index`.
    pub variables: Vec<FrameVariables>,
    /// Lines returned by `get_source`.
    pub source: Vec<String>,
    /// `evaluate` results keyed by expression. Unknown expressions fail with
    /// `EVALUATION_FAILED`.
    pub evaluations: HashMap<String, Value>,
    /// Contexts for which `pause` answers `IS_PAUSED`.
    pub already_paused: Vec<ContextId>,
    /// Lines for which `set_breakpoint` answers `CANNOT_SET_BREAKPOINT`.
    pub unsettable_lines: Vec<u32>,
    /// `(context, line)` stops of other contexts sent ahead of the answer to
    /// every `step`/`step_out`.
    pub stops_before_step: Vec<(ContextId, u32)>,
    pub version: String,
}

impl Default for MockJsrdbgServerConfig {
    fn default() -> Self {
        Self {
            contexts: vec![ContextInfo {
                id: 1,
                name: "main".to_owned(),
                paused: true,
            }],
            stacktrace: vec![WireStackFrame {
                depth: 0,
                line: 3,
                url: "main".to_owned(),
            }],
            variables: Vec::new(),
            source: Vec::new(),
            evaluations: HashMap::new(),
            already_paused: Vec::new(),
            unsettable_lines: Vec::new(),
            stops_before_step: Vec::new(),
            version: "mock-1.0".to_owned(),
        }
    }
}

struct State {
    config: MockJsrdbgServerConfig,
    contexts: Mutex<Vec<ContextInfo>>,
    received: Mutex<Vec<String>>,
    push: broadcast::Sender<String>,
    next_bid: AtomicU64,
}

impl MockJsrdbgServer {
    pub async fn spawn() -> io::Result<Self> {
        Self::spawn_with_config(MockJsrdbgServerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockJsrdbgServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let (push, _) = broadcast::channel(64);

        let state = Arc::new(State {
            contexts: Mutex::new(config.contexts.clone()),
            config,
            received: Mutex::new(Vec::new()),
            push,
            next_bid: AtomicU64::new(1),
        });

        tokio::spawn(accept_loop(listener, state.clone(), shutdown.clone()));

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every line received so far, without terminators.
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock_recovered("MockJsrdbgServer::received").clone()
    }

    /// Replace the snapshot returned by later `get_available_contexts`.
    pub fn set_contexts(&self, contexts: Vec<ContextInfo>) {
        *self.state.contexts.lock_recovered("MockJsrdbgServer::set_contexts") = contexts;
    }

    /// Send `message` (without terminator) to every connected client.
    ///
    /// Clients that connected but have not yet completed a request may miss
    /// it; tests should round-trip one request first.
    pub fn push_raw(&self, message: impl Into<String>) {
        let _ = self.state.push.send(message.into());
    }

    pub fn push_paused(&self, context_id: ContextId, line: u32) {
        let url = self
            .state
            .config
            .stacktrace
            .first()
            .map(|frame| frame.url.clone())
            .unwrap_or_default();
        self.push_raw(paused_event(context_id, &url, line));
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockJsrdbgServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<State>, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            res = listener.accept() => res,
        };
        let Ok((stream, _)) = accepted else {
            return;
        };
        tokio::spawn(handle_connection(stream, state.clone(), shutdown.clone()));
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<State>, shutdown: CancellationToken) {
    let mut pushes = state.push.subscribe();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let outgoing = tokio::select! {
            _ = shutdown.cancelled() => break,
            pushed = pushes.recv() => match pushed {
                Ok(message) => vec![message],
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    state.received.lock_recovered("mock received").push(line.clone());
                    if line == "exit" {
                        break;
                    }
                    replies(&state, &line)
                }
                _ => break,
            },
        };

        for message in outgoing {
            let mut bytes = message.into_bytes();
            bytes.push(b'\n');
            if writer.write_all(&bytes).await.is_err() {
                return;
            }
        }
    }
}

fn replies(state: &State, line: &str) -> Vec<String> {
    if line == "get_available_contexts" {
        let contexts = state.contexts.lock_recovered("mock contexts").clone();
        return vec![encode(
            None,
            "info",
            Some("contexts_list"),
            None,
            json!({ "contexts": contexts }),
        )];
    }

    let Ok((context_id, body)) = split_context_prefix(line.as_bytes()) else {
        return vec![error(None, None, ErrorCode::NotACommandPackage, "bad prefix")];
    };
    let Ok(Value::Object(command)) = serde_json::from_slice::<Value>(body) else {
        return vec![error(
            context_id,
            None,
            ErrorCode::NotACommandPackage,
            "not a command package",
        )];
    };
    let id = command.get("id");
    let Some(name) = command.get("name").and_then(Value::as_str) else {
        return vec![error(context_id, id, ErrorCode::NoCommandName, "missing name")];
    };

    let config = &state.config;
    let ack = || encode(context_id, "info", None, id, json!({}));
    let paused_here = |line: u32| {
        let url = config
            .stacktrace
            .first()
            .map(|frame| frame.url.clone())
            .unwrap_or_default();
        paused_event(context_id.unwrap_or_default(), &url, line)
    };

    match name {
        "pause" => {
            if context_id.is_some_and(|ctx| config.already_paused.contains(&ctx)) {
                vec![error(context_id, id, ErrorCode::IsPaused, "already paused")]
            } else {
                vec![ack()]
            }
        }
        "continue" => match id {
            Some(_) => vec![ack()],
            None => Vec::new(),
        },
        "stop" => Vec::new(),
        "next" => vec![paused_here(current_line(config) + 1)],
        "step" | "step_out" => {
            let url = config
                .stacktrace
                .first()
                .map(|frame| frame.url.as_str())
                .unwrap_or_default();
            let mut out: Vec<String> = config
                .stops_before_step
                .iter()
                .map(|&(ctx, line)| paused_event(ctx, url, line))
                .collect();
            out.push(ack());
            out.push(paused_here(current_line(config) + 1));
            out
        }
        "get_stacktrace" => vec![encode(
            context_id,
            "info",
            Some("stacktrace"),
            id,
            json!({ "stacktrace": config.stacktrace }),
        )],
        "get_variables" => {
            let depth = command
                .get("query")
                .and_then(|query| query.get("depth"))
                .and_then(Value::as_u64);
            let frames: Vec<&FrameVariables> = config
                .variables
                .iter()
                .filter(|frame| depth.is_none_or(|depth| u64::from(frame.frame_index) == depth))
                .collect();
            vec![encode(
                context_id,
                "info",
                Some("variables"),
                id,
                json!({ "variables": frames }),
            )]
        }
        "set_variables" => vec![encode(context_id, "info", Some("variables_set"), id, json!({}))],
        "evaluate" => {
            let expression = command.get("path").and_then(Value::as_str).unwrap_or_default();
            match config.evaluations.get(expression) {
                Some(result) => vec![encode(
                    context_id,
                    "info",
                    Some("evaluated"),
                    id,
                    json!({ "result": result }),
                )],
                None => vec![error(
                    context_id,
                    id,
                    ErrorCode::EvaluationFailed,
                    &format!("cannot evaluate {expression}"),
                )],
            }
        }
        "get_source" => vec![encode(
            context_id,
            "info",
            Some("source_code"),
            id,
            json!({ "source": config.source }),
        )],
        "set_breakpoint" => {
            let breakpoint = command.get("breakpoint").cloned().unwrap_or(Value::Null);
            let line = breakpoint.get("line").and_then(Value::as_u64).unwrap_or(0);
            if config.unsettable_lines.iter().any(|l| u64::from(*l) == line) {
                return vec![error(
                    context_id,
                    id,
                    ErrorCode::CannotSetBreakpoint,
                    &format!("cannot set breakpoint at line {line}"),
                )];
            }
            let bid = state.next_bid.fetch_add(1, Ordering::Relaxed);
            vec![encode(
                context_id,
                "info",
                Some("breakpoint_set"),
                id,
                json!({ "breakpoint": {
                    "bid": bid,
                    "url": breakpoint.get("url").cloned().unwrap_or(Value::Null),
                    "line": line,
                    "pending": breakpoint.get("pending").cloned().unwrap_or(Value::Bool(false)),
                }}),
            )]
        }
        "delete_breakpoint" => vec![encode(
            context_id,
            "info",
            Some("breakpoint_deleted"),
            id,
            json!({}),
        )],
        "delete_all_breakpoints" => vec![encode(
            context_id,
            "info",
            Some("all_breakpoints_deleted"),
            id,
            json!({}),
        )],
        "get_all_breakpoints" => vec![encode(
            context_id,
            "info",
            Some("all_breakpoints"),
            id,
            json!({ "breakpoints": [] }),
        )],
        "server_version" => vec![encode(
            context_id,
            "info",
            Some("server_version"),
            id,
            json!({ "version": config.version }),
        )],
        other => vec![error(
            context_id,
            id,
            ErrorCode::UnknownCommand,
            &format!("unknown command {other}"),
        )],
    }
}

fn current_line(config: &MockJsrdbgServerConfig) -> u32 {
    config.stacktrace.first().map(|frame| frame.line).unwrap_or(1)
}

fn paused_event(context_id: ContextId, url: &str, line: u32) -> String {
    encode(
        Some(context_id),
        "info",
        Some("paused"),
        None,
        json!({ "url": url, "line": line }),
    )
}

fn error(context_id: Option<ContextId>, id: Option<&Value>, code: ErrorCode, message: &str) -> String {
    encode(
        context_id,
        "error",
        None,
        id,
        json!({ "code": code.code(), "message": message }),
    )
}

fn encode(
    context_id: Option<ContextId>,
    kind: &str,
    subtype: Option<&str>,
    id: Option<&Value>,
    fields: Value,
) -> String {
    let mut body = Map::new();
    body.insert("type".to_owned(), Value::String(kind.to_owned()));
    if let Some(subtype) = subtype {
        body.insert("subtype".to_owned(), Value::String(subtype.to_owned()));
    }
    if let Value::Object(fields) = fields {
        body.extend(fields);
    }
    if let Some(id) = id {
        body.insert("id".to_owned(), id.clone());
    }
    let json = Value::Object(body).to_string();
    match context_id {
        Some(context_id) => format!("{context_id}/{json}"),
        None => json,
    }
}
