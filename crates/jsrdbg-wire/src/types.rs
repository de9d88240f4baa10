use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Engine-assigned identifier of a JS context.
pub type ContextId = u64;

pub type Result<T> = std::result::Result<T, JsrdbgError>;

#[derive(Debug, Error)]
pub enum JsrdbgError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid JSON on the wire: {0}")]
    Json(#[from] serde_json::Error),
    #[error("jsrdbg protocol error: {0}")]
    Protocol(String),
    #[error("remote engine reported {code}: {message}")]
    Remote { code: ErrorCode, message: String },
    #[error("connection to the debugger engine was closed")]
    ConnectionClosed,
    #[error("request was cancelled")]
    Cancelled,
    #[error("timed out waiting for the debugger engine")]
    Timeout,
    #[error("No such context {0}")]
    NoSuchContext(ContextId),
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: String,
    },
}

impl JsrdbgError {
    /// The remote error code, when this error came from an engine `error` response.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            JsrdbgError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Closed set of commands understood by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    GetAvailableContexts,
    Exit,
    Continue,
    Next,
    Stop,
    Pause,
    Step,
    StepOut,
    GetStacktrace,
    GetVariables,
    SetVariables,
    Evaluate,
    GetSource,
    SetBreakpoint,
    DeleteBreakpoint,
    DeleteAllBreakpoints,
    GetAllBreakpoints,
    ServerVersion,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::GetAvailableContexts => "get_available_contexts",
            CommandName::Exit => "exit",
            CommandName::Continue => "continue",
            CommandName::Next => "next",
            CommandName::Stop => "stop",
            CommandName::Pause => "pause",
            CommandName::Step => "step",
            CommandName::StepOut => "step_out",
            CommandName::GetStacktrace => "get_stacktrace",
            CommandName::GetVariables => "get_variables",
            CommandName::SetVariables => "set_variables",
            CommandName::Evaluate => "evaluate",
            CommandName::GetSource => "get_source",
            CommandName::SetBreakpoint => "set_breakpoint",
            CommandName::DeleteBreakpoint => "delete_breakpoint",
            CommandName::DeleteAllBreakpoints => "delete_all_breakpoints",
            CommandName::GetAllBreakpoints => "get_all_breakpoints",
            CommandName::ServerVersion => "server_version",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "get_available_contexts" => CommandName::GetAvailableContexts,
            "exit" => CommandName::Exit,
            "continue" => CommandName::Continue,
            "next" => CommandName::Next,
            "stop" => CommandName::Stop,
            "pause" => CommandName::Pause,
            "step" => CommandName::Step,
            "step_out" => CommandName::StepOut,
            "get_stacktrace" => CommandName::GetStacktrace,
            "get_variables" => CommandName::GetVariables,
            "set_variables" => CommandName::SetVariables,
            "evaluate" => CommandName::Evaluate,
            "get_source" => CommandName::GetSource,
            "set_breakpoint" => CommandName::SetBreakpoint,
            "delete_breakpoint" => CommandName::DeleteBreakpoint,
            "delete_all_breakpoints" => CommandName::DeleteAllBreakpoints,
            "get_all_breakpoints" => CommandName::GetAllBreakpoints,
            "server_version" => CommandName::ServerVersion,
            _ => return None,
        })
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried by `type: "error"` responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UnknownCommand,
    NoCommandName,
    NotACommandPackage,
    NotPaused,
    BadArgs,
    ScriptNotFound,
    CannotSetBreakpoint,
    IsPaused,
    UnexpectedException,
    EvaluationFailed,
    PcNotAvailable,
    NoActiveFrame,
    /// A code this client does not know about.
    Unknown(i64),
}

impl ErrorCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => ErrorCode::UnknownCommand,
            2 => ErrorCode::NoCommandName,
            3 => ErrorCode::NotACommandPackage,
            4 => ErrorCode::NotPaused,
            5 => ErrorCode::BadArgs,
            6 => ErrorCode::ScriptNotFound,
            7 => ErrorCode::CannotSetBreakpoint,
            8 => ErrorCode::IsPaused,
            9 => ErrorCode::UnexpectedException,
            10 => ErrorCode::EvaluationFailed,
            11 => ErrorCode::PcNotAvailable,
            12 => ErrorCode::NoActiveFrame,
            other => ErrorCode::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            ErrorCode::UnknownCommand => 1,
            ErrorCode::NoCommandName => 2,
            ErrorCode::NotACommandPackage => 3,
            ErrorCode::NotPaused => 4,
            ErrorCode::BadArgs => 5,
            ErrorCode::ScriptNotFound => 6,
            ErrorCode::CannotSetBreakpoint => 7,
            ErrorCode::IsPaused => 8,
            ErrorCode::UnexpectedException => 9,
            ErrorCode::EvaluationFailed => 10,
            ErrorCode::PcNotAvailable => 11,
            ErrorCode::NoActiveFrame => 12,
            ErrorCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::UnknownCommand => "unknown command",
            ErrorCode::NoCommandName => "missing command name",
            ErrorCode::NotACommandPackage => "not a command package",
            ErrorCode::NotPaused => "context is not paused",
            ErrorCode::BadArgs => "bad arguments",
            ErrorCode::ScriptNotFound => "script not found",
            ErrorCode::CannotSetBreakpoint => "cannot set breakpoint",
            ErrorCode::IsPaused => "context is already paused",
            ErrorCode::UnexpectedException => "unexpected exception",
            ErrorCode::EvaluationFailed => "evaluation failed",
            ErrorCode::PcNotAvailable => "program counter not available",
            ErrorCode::NoActiveFrame => "no active frame",
            ErrorCode::Unknown(_) => "unknown error",
        };
        write!(f, "{name} (code {})", self.code())
    }
}

/// A command to the engine.
///
/// Constructors assign a fresh correlation id exactly when the command expects
/// a correlated reply (see [`Command::requires_id`]).
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub name: CommandName,
    pub context_id: Option<ContextId>,
    pub id: Option<String>,
    pub fields: Map<String, Value>,
}

impl Command {
    pub fn new(name: CommandName, context_id: Option<ContextId>) -> Self {
        let mut command = Self {
            name,
            context_id,
            id: None,
            fields: Map::new(),
        };
        if command.requires_id() {
            command.id = Some(uuid::Uuid::new_v4().to_string());
        }
        command
    }

    /// Commands the engine never answers with a correlated reply.
    pub fn requires_id(&self) -> bool {
        match self.name {
            CommandName::GetAvailableContexts
            | CommandName::Exit
            | CommandName::Next
            | CommandName::Stop => false,
            CommandName::Continue => self.context_id.is_some(),
            _ => true,
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_owned(), value);
        self
    }

    pub fn get_available_contexts() -> Self {
        Self::new(CommandName::GetAvailableContexts, None)
    }

    pub fn exit() -> Self {
        Self::new(CommandName::Exit, None)
    }

    pub fn server_version() -> Self {
        Self::new(CommandName::ServerVersion, None)
    }

    pub fn pause(context_id: ContextId) -> Self {
        Self::new(CommandName::Pause, Some(context_id))
    }

    /// `continue` without a context resumes every paused context.
    pub fn r#continue(context_id: Option<ContextId>) -> Self {
        Self::new(CommandName::Continue, context_id)
    }

    pub fn next(context_id: ContextId) -> Self {
        Self::new(CommandName::Next, Some(context_id))
    }

    pub fn step(context_id: ContextId) -> Self {
        Self::new(CommandName::Step, Some(context_id))
    }

    pub fn step_out(context_id: ContextId) -> Self {
        Self::new(CommandName::StepOut, Some(context_id))
    }

    pub fn stop(context_id: ContextId) -> Self {
        Self::new(CommandName::Stop, Some(context_id))
    }

    pub fn get_stacktrace(context_id: ContextId) -> Self {
        Self::new(CommandName::GetStacktrace, Some(context_id))
    }

    /// Request the variables of one frame (`depth`) or of every frame.
    pub fn get_variables(context_id: ContextId, depth: Option<u32>) -> Self {
        let mut query = Map::new();
        if let Some(depth) = depth {
            query.insert("depth".to_owned(), Value::from(depth));
        }
        let mut options = Map::new();
        options.insert("evaluation-depth".to_owned(), Value::from(1));
        query.insert("options".to_owned(), Value::Object(options));
        Self::new(CommandName::GetVariables, Some(context_id))
            .with_field("query", Value::Object(query))
    }

    pub fn set_variables(context_id: ContextId, depth: u32, variables: &[RawVariable]) -> Self {
        let variables = variables
            .iter()
            .map(|v| {
                let mut entry = Map::new();
                entry.insert("name".to_owned(), Value::String(v.name.clone()));
                entry.insert("value".to_owned(), v.value.clone());
                Value::Object(entry)
            })
            .collect();
        Self::new(CommandName::SetVariables, Some(context_id))
            .with_field("variables", Value::Array(variables))
            .with_field("depth", Value::from(depth))
    }

    pub fn evaluate(context_id: ContextId, expression: &str, depth: Option<u32>) -> Self {
        let command = Self::new(CommandName::Evaluate, Some(context_id))
            .with_field("path", Value::String(expression.to_owned()));
        match depth {
            Some(depth) => command.with_field("depth", Value::from(depth)),
            None => command,
        }
    }

    pub fn get_source(url: &str) -> Self {
        Self::new(CommandName::GetSource, None).with_field("url", Value::String(url.to_owned()))
    }

    pub fn set_breakpoint(url: &str, line: u32, pending: bool) -> Self {
        let mut breakpoint = Map::new();
        breakpoint.insert("url".to_owned(), Value::String(url.to_owned()));
        breakpoint.insert("line".to_owned(), Value::from(line));
        breakpoint.insert("pending".to_owned(), Value::Bool(pending));
        Self::new(CommandName::SetBreakpoint, None)
            .with_field("breakpoint", Value::Object(breakpoint))
    }

    pub fn delete_breakpoint(bid: u64) -> Self {
        Self::new(CommandName::DeleteBreakpoint, None).with_field("bid", Value::from(bid))
    }

    pub fn delete_all_breakpoints() -> Self {
        Self::new(CommandName::DeleteAllBreakpoints, None)
    }

    pub fn get_all_breakpoints() -> Self {
        Self::new(CommandName::GetAllBreakpoints, None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subtype {
    ContextsList,
    Paused,
    Stacktrace,
    Variables,
    VariablesSet,
    Evaluated,
    SourceCode,
    BreakpointSet,
    BreakpointDeleted,
    AllBreakpointsDeleted,
    AllBreakpoints,
    ServerVersion,
    Error,
    Other(String),
}

impl Subtype {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "contexts_list" => Subtype::ContextsList,
            "paused" => Subtype::Paused,
            "stacktrace" => Subtype::Stacktrace,
            "variables" => Subtype::Variables,
            "variables_set" => Subtype::VariablesSet,
            "evaluated" => Subtype::Evaluated,
            "source_code" => Subtype::SourceCode,
            "breakpoint_set" => Subtype::BreakpointSet,
            "breakpoint_deleted" => Subtype::BreakpointDeleted,
            "all_breakpoints_deleted" => Subtype::AllBreakpointsDeleted,
            "all_breakpoints" => Subtype::AllBreakpoints,
            "server_version" => Subtype::ServerVersion,
            "error" => Subtype::Error,
            other => Subtype::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Subtype::ContextsList => "contexts_list",
            Subtype::Paused => "paused",
            Subtype::Stacktrace => "stacktrace",
            Subtype::Variables => "variables",
            Subtype::VariablesSet => "variables_set",
            Subtype::Evaluated => "evaluated",
            Subtype::SourceCode => "source_code",
            Subtype::BreakpointSet => "breakpoint_set",
            Subtype::BreakpointDeleted => "breakpoint_deleted",
            Subtype::AllBreakpointsDeleted => "all_breakpoints_deleted",
            Subtype::AllBreakpoints => "all_breakpoints",
            Subtype::ServerVersion => "server_version",
            Subtype::Error => "error",
            Subtype::Other(other) => other,
        }
    }
}

/// A decoded message from the engine.
///
/// Every top-level key other than `type` and `subtype` lives in `content`,
/// including the correlation `id`.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub response_type: ResponseType,
    pub subtype: Option<Subtype>,
    pub context_id: Option<ContextId>,
    pub content: Map<String, Value>,
}

impl Response {
    /// Correlation id echoed from the originating command.
    pub fn id(&self) -> Option<&str> {
        self.content.get("id").and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error || self.subtype == Some(Subtype::Error)
    }

    pub fn is_paused_event(&self) -> bool {
        self.response_type == ResponseType::Info && self.subtype == Some(Subtype::Paused)
    }

    /// Turn an engine `error` response into [`JsrdbgError::Remote`].
    pub fn into_result(self) -> Result<Response> {
        if self.is_error() {
            let error = self.remote_error();
            return Err(JsrdbgError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self)
    }

    fn remote_error(&self) -> RemoteError {
        let code = self
            .content
            .get("code")
            .and_then(Value::as_i64)
            .map(ErrorCode::from_code)
            .unwrap_or(ErrorCode::Unknown(0));
        let message = self
            .content
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        RemoteError { code, message }
    }

    fn content_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.content.clone()))?)
    }

    /// Decode `content` according to `(type, subtype)`.
    pub fn payload(&self) -> Result<Payload> {
        if self.is_error() {
            return Ok(Payload::Error(self.remote_error()));
        }

        let Some(subtype) = &self.subtype else {
            return Ok(Payload::Ack);
        };

        let payload = match subtype {
            Subtype::ContextsList => {
                Payload::ContextsList(self.content_as::<ContextsListBody>()?.contexts)
            }
            Subtype::Paused => Payload::Paused(self.content_as::<PausedLocation>()?),
            Subtype::Stacktrace => {
                Payload::Stacktrace(self.content_as::<StacktraceBody>()?.stacktrace)
            }
            Subtype::Variables => Payload::Variables(self.content_as::<VariablesBody>()?.variables),
            Subtype::VariablesSet => Payload::VariablesSet,
            Subtype::Evaluated => Payload::Evaluated(
                self.content.get("result").cloned().unwrap_or(Value::Null),
            ),
            Subtype::SourceCode => Payload::SourceCode(source_lines(self.content.get("source"))?),
            Subtype::BreakpointSet => {
                Payload::BreakpointSet(self.content_as::<BreakpointBody>()?.breakpoint)
            }
            Subtype::BreakpointDeleted => Payload::BreakpointDeleted,
            Subtype::AllBreakpointsDeleted => Payload::AllBreakpointsDeleted,
            Subtype::AllBreakpoints => {
                Payload::AllBreakpoints(self.content_as::<AllBreakpointsBody>()?.breakpoints)
            }
            Subtype::ServerVersion => {
                Payload::ServerVersion(self.content_as::<ServerVersionBody>()?.version)
            }
            Subtype::Error => Payload::Error(self.remote_error()),
            Subtype::Other(name) => Payload::Unrecognized(name.clone()),
        };
        Ok(payload)
    }
}

fn source_lines(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        Some(Value::String(text)) => Ok(text.split('\n').map(str::to_owned).collect()),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| {
                line.as_str().map(str::to_owned).ok_or_else(|| {
                    JsrdbgError::Protocol(format!("source line is not a string: {line}"))
                })
            })
            .collect(),
        Some(other) => Err(JsrdbgError::Protocol(format!(
            "unexpected source payload: {other}"
        ))),
        None => Ok(Vec::new()),
    }
}

/// Typed view of a response body, keyed by `(type, subtype)`.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// An `info` response without a subtype.
    Ack,
    ContextsList(Vec<ContextInfo>),
    Paused(PausedLocation),
    Stacktrace(Vec<WireStackFrame>),
    Variables(Vec<FrameVariables>),
    VariablesSet,
    Evaluated(Value),
    SourceCode(Vec<String>),
    BreakpointSet(BreakpointInfo),
    BreakpointDeleted,
    AllBreakpointsDeleted,
    AllBreakpoints(Vec<BreakpointInfo>),
    ServerVersion(String),
    Error(RemoteError),
    Unrecognized(String),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Ack => "ack",
            Payload::ContextsList(_) => "contexts_list",
            Payload::Paused(_) => "paused",
            Payload::Stacktrace(_) => "stacktrace",
            Payload::Variables(_) => "variables",
            Payload::VariablesSet => "variables_set",
            Payload::Evaluated(_) => "evaluated",
            Payload::SourceCode(_) => "source_code",
            Payload::BreakpointSet(_) => "breakpoint_set",
            Payload::BreakpointDeleted => "breakpoint_deleted",
            Payload::AllBreakpointsDeleted => "all_breakpoints_deleted",
            Payload::AllBreakpoints(_) => "all_breakpoints",
            Payload::ServerVersion(_) => "server_version",
            Payload::Error(_) => "error",
            Payload::Unrecognized(_) => "unrecognized",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

/// One entry of a `contexts_list` snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    #[serde(rename = "contextId")]
    pub id: ContextId,
    #[serde(rename = "contextName")]
    pub name: String,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PausedLocation {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

/// A stack frame as reported by the engine, relative to its context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStackFrame {
    #[serde(rename = "rDepth")]
    pub depth: u32,
    pub line: u32,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawVariable {
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameVariables {
    #[serde(rename = "frameIndex", default)]
    pub frame_index: u32,
    #[serde(default)]
    pub variables: Vec<RawVariable>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    #[serde(default)]
    pub bid: Option<u64>,
    pub url: String,
    pub line: u32,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Deserialize)]
struct ContextsListBody {
    #[serde(default)]
    contexts: Vec<ContextInfo>,
}

#[derive(Deserialize)]
struct StacktraceBody {
    #[serde(default)]
    stacktrace: Vec<WireStackFrame>,
}

#[derive(Deserialize)]
struct VariablesBody {
    #[serde(default)]
    variables: Vec<FrameVariables>,
}

#[derive(Deserialize)]
struct BreakpointBody {
    breakpoint: BreakpointInfo,
}

#[derive(Deserialize)]
struct AllBreakpointsBody {
    #[serde(default)]
    breakpoints: Vec<BreakpointInfo>,
}

#[derive(Deserialize)]
struct ServerVersionBody {
    version: String,
}
