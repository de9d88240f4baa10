use std::fmt;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::connection::Connection;
use crate::types::{
    Command, ContextId, ContextInfo, ErrorCode, FrameVariables, JsrdbgError, Payload, RawVariable,
    Response, Result, WireStackFrame,
};

const CONTEXT_EVENT_CAPACITY: usize = 16;

/// Request helpers bound to one remote JS context.
#[derive(Clone)]
pub struct Context {
    info: ContextInfo,
    connection: Connection,
    events: broadcast::Sender<Response>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("paused", &self.info.paused)
            .finish()
    }
}

impl Context {
    pub fn new(info: ContextInfo, connection: Connection) -> Self {
        let (events, _) = broadcast::channel(CONTEXT_EVENT_CAPACITY);
        Self {
            info,
            connection,
            events,
        }
    }

    pub fn id(&self) -> ContextId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Paused state as of the latest `contexts_list` snapshot.
    pub fn is_paused(&self) -> bool {
        self.info.paused
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub(crate) fn replace_snapshot(&mut self, info: ContextInfo) {
        self.info = info;
    }

    /// Responses addressed to this context that no request was waiting for.
    pub fn subscribe(&self) -> broadcast::Receiver<Response> {
        self.events.subscribe()
    }

    pub(crate) fn handle_response(&self, response: Response) {
        if self.events.send(response).is_err() {
            tracing::trace!(
                target: "jsrdbg.wire",
                context = self.info.id,
                "no subscribers for context event"
            );
        }
    }

    /// Pause the context. Pausing an already paused context succeeds.
    pub async fn pause(&self) -> Result<()> {
        match self.ack(Command::pause(self.id())).await {
            Err(JsrdbgError::Remote {
                code: ErrorCode::IsPaused,
                ..
            }) => {
                tracing::debug!(target: "jsrdbg.wire", context = self.id(), "context already paused");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn r#continue(&self) -> Result<()> {
        self.ack(Command::r#continue(Some(self.id()))).await
    }

    /// Step over. The engine does not answer; the next stop arrives as a
    /// `paused` event.
    pub async fn next(&self) -> Result<()> {
        self.connection.send_request(Command::next(self.id())).await?;
        Ok(())
    }

    pub async fn step_in(&self) -> Result<()> {
        self.ack(Command::step(self.id())).await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.ack(Command::step_out(self.id())).await
    }

    /// Terminate the script running in this context.
    pub async fn stop(&self) -> Result<()> {
        self.connection.send_request(Command::stop(self.id())).await?;
        Ok(())
    }

    pub async fn stacktrace(&self) -> Result<Vec<WireStackFrame>> {
        match self.payload(Command::get_stacktrace(self.id())).await? {
            Payload::Stacktrace(frames) => Ok(frames),
            other => Err(unexpected("stacktrace", &other)),
        }
    }

    /// Variables of the frame at `depth`, or of every frame when `None`.
    pub async fn variables(&self, depth: Option<u32>) -> Result<Vec<FrameVariables>> {
        match self.payload(Command::get_variables(self.id(), depth)).await? {
            Payload::Variables(frames) => Ok(frames),
            other => Err(unexpected("variables", &other)),
        }
    }

    pub async fn set_variables(&self, depth: u32, variables: &[RawVariable]) -> Result<()> {
        match self
            .payload(Command::set_variables(self.id(), depth, variables))
            .await?
        {
            Payload::VariablesSet | Payload::Ack => Ok(()),
            other => Err(unexpected("variables_set", &other)),
        }
    }

    pub async fn evaluate(&self, expression: &str, depth: Option<u32>) -> Result<Value> {
        match self
            .payload(Command::evaluate(self.id(), expression, depth))
            .await?
        {
            Payload::Evaluated(value) => Ok(value),
            other => Err(unexpected("evaluated", &other)),
        }
    }

    async fn ack(&self, command: Command) -> Result<()> {
        self.connection.request(command).await?.into_result()?;
        Ok(())
    }

    async fn payload(&self, command: Command) -> Result<Payload> {
        self.connection.request(command).await?.into_result()?.payload()
    }
}

fn unexpected(expected: &'static str, actual: &Payload) -> JsrdbgError {
    JsrdbgError::UnexpectedResponse {
        expected,
        actual: actual.kind().to_owned(),
    }
}
