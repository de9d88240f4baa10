use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{
    Command, CommandName, ContextId, JsrdbgError, Response, ResponseType, Result, Subtype,
};

/// Byte terminating every message on the wire.
pub const MESSAGE_TERMINATOR: u8 = b'\n';

/// Literal wire form of a context-less `continue`. The engine compares the
/// field order (`type` before `name`), so it is not produced through serde.
const CONTINUE_ALL: &str = "{\"type\":\"command\",\"name\":\"continue\"}\n";

#[derive(Serialize)]
struct CommandBody<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

/// Serialize a command to its exact wire text, terminator included.
pub fn encode_command(command: &Command) -> Result<String> {
    match command.name {
        CommandName::GetAvailableContexts | CommandName::Exit => {
            return Ok(format!("{}\n", command.name.as_str()));
        }
        CommandName::Continue if command.context_id.is_none() => {
            return Ok(CONTINUE_ALL.to_owned());
        }
        _ => {}
    }

    let body = CommandBody {
        name: command.name.as_str(),
        kind: "command",
        id: if command.requires_id() {
            command.id.as_deref()
        } else {
            None
        },
        fields: &command.fields,
    };
    let json = serde_json::to_string(&body)?;

    Ok(match command.context_id {
        Some(context_id) => format!("{context_id}/{json}\n"),
        None => format!("{json}\n"),
    })
}

/// Split an optional `<digits>/` context prefix off a message.
pub fn split_context_prefix(message: &[u8]) -> Result<(Option<ContextId>, &[u8])> {
    let digits = message.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || message.get(digits) != Some(&b'/') {
        return Ok((None, message));
    }

    // Digits only, so this is valid UTF-8.
    let raw = std::str::from_utf8(&message[..digits]).unwrap_or_default();
    let context_id = raw
        .parse::<ContextId>()
        .map_err(|err| JsrdbgError::Protocol(format!("invalid context id {raw:?}: {err}")))?;
    Ok((Some(context_id), &message[digits + 1..]))
}

/// Parse one message (with or without its trailing terminator).
pub fn decode_response(message: &[u8]) -> Result<Response> {
    let message = trim_terminator(message);
    let (context_id, body) = split_context_prefix(message)?;

    let value: Value = serde_json::from_slice(body)?;
    let Value::Object(mut content) = value else {
        return Err(JsrdbgError::Protocol(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    };

    let response_type = match content.remove("type") {
        Some(Value::String(kind)) if kind == "info" => ResponseType::Info,
        Some(Value::String(kind)) if kind == "error" => ResponseType::Error,
        Some(other) => {
            return Err(JsrdbgError::Protocol(format!(
                "unknown response type {other}"
            )))
        }
        None => return Err(JsrdbgError::Protocol("response without type".to_owned())),
    };

    let subtype = match content.remove("subtype") {
        Some(Value::String(subtype)) => Some(Subtype::parse(&subtype)),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(JsrdbgError::Protocol(format!(
                "subtype must be a string, got {other}"
            )))
        }
    };

    Ok(Response {
        response_type,
        subtype,
        context_id,
        content,
    })
}

fn trim_terminator(message: &[u8]) -> &[u8] {
    let mut end = message.len();
    while end > 0 && matches!(message[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &message[..end]
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
