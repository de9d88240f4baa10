use std::path::Path;
use std::time::Duration;

use jsrdbg_config::DebuggerConfig;
use jsrdbg_wire::{
    describe_io_error, Command, Connection, ConnectionEvent, ConnectionOptions, Context,
    ContextCoordinator, ContextId, ContextInfo, FrameVariables, JsrdbgError, Payload, PausedLocation, RawVariable,
    ReplySlot, Response, Subtype,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::breakpoints::{self, BreakpointResult};
use crate::error::DebugResult;
use crate::frame_map::{FrameMap, StackFrame};
use crate::server_source::{LocalPosition, ServerSource};
use crate::source_map::{LocalSource, SourceMap};
use crate::variables::{FrameKey, Variable, VariablesMap};

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// How long to wait for the `paused` event that ends a step.
    pub prompt_timeout: Duration,
    pub debug_statement_injected: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            prompt_timeout: Duration::from_secs(10),
            debug_statement_injected: false,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &DebuggerConfig) -> Self {
        Self {
            prompt_timeout: config.connection.prompt_timeout(),
            debug_statement_injected: config.source_map.debug_statement_injected,
        }
    }
}

/// A stack frame with its position in local sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameView {
    pub frame: StackFrame,
    pub position: LocalPosition,
    pub source: Option<LocalSource>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables_reference: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Over,
    In,
    Out,
}

/// Where a context stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PausedStop {
    pub context_id: Option<ContextId>,
    pub location: PausedLocation,
    pub position: Option<LocalPosition>,
}

/// Ties one [`Connection`] to the context table and the frame, variable and
/// source maps.
pub struct DebugSession {
    connection: Connection,
    coordinator: ContextCoordinator,
    responses: mpsc::UnboundedReceiver<Response>,
    paused: ReplySlot<Response>,
    pump: JoinHandle<()>,
    source_map: SourceMap,
    frames: FrameMap,
    variables: VariablesMap,
    options: SessionOptions,
}

impl DebugSession {
    /// Must be called from within a tokio runtime.
    pub fn new(connection: Connection, options: SessionOptions) -> Self {
        let events = connection.subscribe_events();
        let paused = ReplySlot::new();
        let (tx, responses) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_events(events, paused.clone(), tx));

        Self {
            coordinator: ContextCoordinator::new(connection.clone()),
            connection,
            responses,
            paused,
            pump,
            source_map: SourceMap::new(),
            frames: FrameMap::new(),
            variables: VariablesMap::new(),
            options,
        }
    }

    pub async fn connect(config: &DebuggerConfig) -> DebugResult<Self> {
        let target = config.connection.address();
        let addr = tokio::net::lookup_host(&target)
            .await
            .map_err(|err| {
                JsrdbgError::Io(std::io::Error::new(err.kind(), describe_io_error(&err, &target)))
            })?
            .next()
            .ok_or_else(|| JsrdbgError::Protocol(format!("{target} did not resolve to an address")))?;

        let options = ConnectionOptions {
            event_capacity: config.connection.event_capacity,
            ..ConnectionOptions::default()
        };
        let connection = Connection::connect_with_options(addr, options).await?;
        Ok(Self::new(connection, SessionOptions::from_config(config)))
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    pub fn source_map_mut(&mut self) -> &mut SourceMap {
        &mut self.source_map
    }

    pub fn coordinator(&self) -> &ContextCoordinator {
        &self.coordinator
    }

    /// Apply every unsolicited response received so far to the context table.
    ///
    /// A response the coordinator cannot route, typically one for a context
    /// no snapshot has listed yet, does not stop the drain. Those errors are
    /// logged and returned.
    pub fn sync(&mut self) -> Vec<JsrdbgError> {
        let mut rejected = Vec::new();
        while let Ok(response) = self.responses.try_recv() {
            if let Err(err) = self.apply(response) {
                rejected.push(err);
            }
        }
        rejected
    }

    fn apply(&mut self, response: Response) -> Result<(), JsrdbgError> {
        let context_id = response.context_id;
        self.coordinator.handle_response(response).inspect_err(|err| {
            tracing::warn!(
                target: "jsrdbg.debug",
                context = context_id,
                error = %err,
                "unsolicited response rejected"
            );
        })
    }

    /// Request a fresh context listing and wait for it to be applied.
    pub async fn refresh_contexts(&mut self) -> DebugResult<Vec<ContextInfo>> {
        self.sync();
        self.coordinator.refresh().await?;

        let deadline = tokio::time::Instant::now() + self.options.prompt_timeout;
        loop {
            let response = tokio::time::timeout_at(deadline, self.responses.recv())
                .await
                .map_err(|_| JsrdbgError::Timeout)?
                .ok_or(JsrdbgError::ConnectionClosed)?;
            let is_listing = response.subtype == Some(Subtype::ContextsList);
            let applied = self.apply(response);
            if is_listing {
                applied?;
                break;
            }
        }
        Ok(self.contexts())
    }

    /// Cached contexts as of the last applied listing.
    pub fn contexts(&self) -> Vec<ContextInfo> {
        self.coordinator
            .contexts()
            .map(|context| context.info().clone())
            .collect()
    }

    fn context(&mut self, context_id: ContextId) -> DebugResult<Context> {
        self.sync();
        Ok(self.coordinator.get_context(context_id)?.clone())
    }

    /// Fetch the merged source of `url` and make it the active server source.
    pub async fn load_server_source(&mut self, url: &str) -> DebugResult<()> {
        let response = self
            .connection
            .request(Command::get_source(url))
            .await?
            .into_result()?;
        match response.payload()? {
            Payload::SourceCode(lines) => {
                self.set_server_source(url, &lines);
                Ok(())
            }
            other => Err(JsrdbgError::UnexpectedResponse {
                expected: "source_code",
                actual: other.kind().to_owned(),
            }
            .into()),
        }
    }

    pub fn set_server_source<S: AsRef<str>>(&mut self, main_name: &str, lines: &[S]) {
        let server_source =
            ServerSource::from_sources(main_name, lines, self.options.debug_statement_injected);
        self.source_map.set_server_source(server_source);
    }

    pub async fn stack_trace(&mut self, context_id: ContextId) -> DebugResult<Vec<FrameView>> {
        let context = self.context(context_id)?;
        let wire = context.stacktrace().await?;

        self.frames.remove_context(context_id);
        let frames = self.frames.add_frames(context_id, &wire)?;
        Ok(frames
            .into_iter()
            .map(|frame| {
                let position = self
                    .source_map
                    .to_local_position(&frame.url, frame.line as usize);
                let source = self.source_map.get_local(&position.name).cloned();
                FrameView {
                    frame,
                    position,
                    source,
                }
            })
            .collect())
    }

    pub async fn scopes(&mut self, frame_id: u64) -> DebugResult<Vec<Scope>> {
        let frame = FrameKey::from(self.frames.get_stack_frame(frame_id)?);
        let context = self.context(frame.context_id)?;

        let frames = context.variables(Some(frame.depth)).await?;
        let raw = locals_at(frames, frame.depth);

        let reference = self.variables.create_scope(frame, &raw)?;
        Ok(vec![Scope {
            name: "Locals".to_owned(),
            variables_reference: reference,
        }])
    }

    /// Children of `reference`, fetching object members on first access.
    pub async fn variables(&mut self, reference: u64) -> DebugResult<Vec<Variable>> {
        let container = self.variables.get(reference)?;
        let context_id = container.context_id();
        if container.needs_expansion() {
            let context = self.context(context_id)?;
            self.variables.add_object_members(&context, reference).await?;
        }
        Ok(self.variables.get(reference)?.variables.clone())
    }

    /// Re-fetch the members of an object container.
    pub async fn expand(&mut self, reference: u64) -> DebugResult<Vec<Variable>> {
        let context_id = self.variables.get(reference)?.context_id();
        let context = self.context(context_id)?;
        self.variables.add_object_members(&context, reference).await?;
        Ok(self.variables.get(reference)?.variables.clone())
    }

    pub async fn evaluate(&mut self, frame_id: u64, expression: &str) -> DebugResult<Variable> {
        let frame = FrameKey::from(self.frames.get_stack_frame(frame_id)?);
        let context = self.context(frame.context_id)?;
        let value = context.evaluate(expression, Some(frame.depth)).await?;
        self.variables
            .create_variable(frame, expression, expression, &value, 0)
    }

    /// Assign `value` to variable `name` of container `reference`, then
    /// update the cached entry in place.
    pub async fn set_variable(
        &mut self,
        reference: u64,
        name: &str,
        value: Value,
    ) -> DebugResult<Variable> {
        let container = self.variables.get(reference)?;
        let frame = container.frame;
        let target = container
            .get(name)
            .map(|variable| variable.evaluate_name.clone())
            .unwrap_or_else(|| name.to_owned());

        let context = self.context(frame.context_id)?;
        context
            .set_variables(
                frame.depth,
                &[RawVariable {
                    name: target,
                    value: value.clone(),
                }],
            )
            .await?;
        self.variables.update_variable(reference, name, &value)
    }

    pub async fn pause(&mut self, context_id: ContextId) -> DebugResult<()> {
        self.context(context_id)?.pause().await?;
        Ok(())
    }

    pub async fn resume(&mut self, context_id: ContextId) -> DebugResult<()> {
        let context = self.context(context_id)?;
        self.forget_context_state(context_id);
        context.r#continue().await?;
        Ok(())
    }

    /// Resume every paused context.
    pub async fn resume_all(&mut self) -> DebugResult<()> {
        self.connection.send_request(Command::r#continue(None)).await?;
        self.frames.clear();
        self.variables.clear();
        Ok(())
    }

    /// Terminate the script running in `context_id`.
    pub async fn stop(&mut self, context_id: ContextId) -> DebugResult<()> {
        let context = self.context(context_id)?;
        self.forget_context_state(context_id);
        context.stop().await?;
        Ok(())
    }

    /// Step and wait for the `paused` event that ends the step.
    pub async fn step(&mut self, context_id: ContextId, kind: StepKind) -> DebugResult<PausedStop> {
        let context = self.context(context_id)?;
        self.forget_context_state(context_id);

        let wait = self
            .paused
            .wait_matching(self.options.prompt_timeout, move |response: &Response| {
                response.context_id == Some(context_id)
            });
        tokio::pin!(wait);
        let send = async {
            match kind {
                StepKind::Over => context.next().await,
                StepKind::In => context.step_in().await,
                StepKind::Out => context.step_out().await,
            }
        };

        // Poll the wait first so the slot is armed before the command leaves.
        let response = tokio::select! {
            biased;
            response = &mut wait => response?,
            sent = send => {
                sent?;
                wait.await?
            }
        };
        self.paused_stop(&response)
    }

    /// Wait for the next `paused` event from any context.
    pub async fn wait_for_pause(&self) -> DebugResult<PausedStop> {
        let response = self.paused.wait(self.options.prompt_timeout).await?;
        self.paused_stop(&response)
    }

    fn paused_stop(&self, response: &Response) -> DebugResult<PausedStop> {
        let location = match response.payload()? {
            Payload::Paused(location) => location,
            other => {
                return Err(JsrdbgError::UnexpectedResponse {
                    expected: "paused",
                    actual: other.kind().to_owned(),
                }
                .into())
            }
        };
        let position = location.line.map(|line| {
            let url = location.url.as_deref().unwrap_or_default();
            self.source_map.to_local_position(url, line as usize)
        });
        Ok(PausedStop {
            context_id: response.context_id,
            location,
            position,
        })
    }

    fn forget_context_state(&mut self, context_id: ContextId) {
        self.frames.remove_context(context_id);
        self.variables.remove_context(context_id);
    }

    pub async fn set_breakpoints(
        &self,
        local_path: &Path,
        lines: &[usize],
    ) -> DebugResult<Vec<BreakpointResult>> {
        breakpoints::set_breakpoints(&self.connection, &self.source_map, local_path, lines).await
    }

    /// End the session. Requests still in flight fail with
    /// [`JsrdbgError::ConnectionClosed`].
    pub async fn disconnect(self) {
        self.connection.disconnect().await;
        self.pump.abort();
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Variables reported for the frame at `depth`. A reply without that frame
/// yields no locals.
fn locals_at(frames: Vec<FrameVariables>, depth: u32) -> Vec<RawVariable> {
    match frames.into_iter().find(|f| f.frame_index == depth) {
        Some(found) => found.variables,
        None => {
            tracing::debug!(target: "jsrdbg.debug", depth, "engine reported no variables for frame");
            Vec::new()
        }
    }
}

async fn pump_events(
    mut events: broadcast::Receiver<ConnectionEvent>,
    paused: ReplySlot<Response>,
    responses: mpsc::UnboundedSender<Response>,
) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Paused(response)) => {
                // Unclaimed stops still reach the owning context's subscribers.
                if let Some(unclaimed) = paused.offer(response) {
                    if responses.send(unclaimed).is_err() {
                        break;
                    }
                }
            }
            Ok(ConnectionEvent::Response(response)) => {
                if responses.send(response).is_err() {
                    break;
                }
            }
            Ok(ConnectionEvent::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(target: "jsrdbg.debug", skipped, "session lagged behind engine events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::debug!(target: "jsrdbg.debug", "event pump finished");
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("closed", &self.connection.is_closed())
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}
