use std::collections::BTreeMap;

use tokio::sync::broadcast;

use crate::connection::Connection;
use crate::context::Context;
use crate::types::{
    Command, ContextId, ContextInfo, JsrdbgError, Payload, Response, Result, Subtype,
};

const NEW_CONTEXT_CAPACITY: usize = 64;

/// Tracks the live set of remote contexts.
///
/// The table is only as fresh as the last `contexts_list` snapshot fed to
/// [`ContextCoordinator::handle_response`].
pub struct ContextCoordinator {
    connection: Connection,
    contexts: BTreeMap<ContextId, Context>,
    new_contexts: broadcast::Sender<ContextInfo>,
}

impl ContextCoordinator {
    pub fn new(connection: Connection) -> Self {
        let (new_contexts, _) = broadcast::channel(NEW_CONTEXT_CAPACITY);
        Self {
            connection,
            contexts: BTreeMap::new(),
            new_contexts,
        }
    }

    /// Notified once for every context the first time a snapshot lists it.
    pub fn subscribe_new_contexts(&self) -> broadcast::Receiver<ContextInfo> {
        self.new_contexts.subscribe()
    }

    /// Route an unsolicited response.
    ///
    /// `contexts_list` snapshots update the table; other context-scoped
    /// responses go to the owning [`Context`]. A context id that is not in the
    /// table is an error.
    pub fn handle_response(&mut self, response: Response) -> Result<()> {
        if response.subtype == Some(Subtype::ContextsList) && !response.is_error() {
            match response.payload()? {
                Payload::ContextsList(listed) => self.reconcile(listed),
                other => {
                    return Err(JsrdbgError::UnexpectedResponse {
                        expected: "contexts_list",
                        actual: other.kind().to_owned(),
                    })
                }
            }
            return Ok(());
        }

        match response.context_id {
            Some(context_id) => {
                let context = self
                    .contexts
                    .get(&context_id)
                    .ok_or(JsrdbgError::NoSuchContext(context_id))?;
                context.handle_response(response);
                Ok(())
            }
            None => {
                tracing::debug!(
                    target: "jsrdbg.wire",
                    subtype = response.subtype.as_ref().map(|s| s.as_str()),
                    "ignoring unsolicited response without context"
                );
                Ok(())
            }
        }
    }

    fn reconcile(&mut self, listed: Vec<ContextInfo>) {
        let before = self.contexts.len();
        let mut fresh = BTreeMap::new();

        for info in listed {
            match self.contexts.remove(&info.id) {
                Some(mut known) => {
                    known.replace_snapshot(info);
                    fresh.insert(known.id(), known);
                }
                None => {
                    tracing::debug!(
                        target: "jsrdbg.wire",
                        context = info.id,
                        name = %info.name,
                        "new context"
                    );
                    let _ = self.new_contexts.send(info.clone());
                    fresh.insert(info.id, Context::new(info, self.connection.clone()));
                }
            }
        }

        for gone in self.contexts.keys() {
            tracing::debug!(target: "jsrdbg.wire", context = *gone, "context went away");
        }
        tracing::trace!(
            target: "jsrdbg.wire",
            before,
            after = fresh.len(),
            "reconciled context table"
        );
        self.contexts = fresh;
    }

    pub fn get_context(&self, context_id: ContextId) -> Result<&Context> {
        self.contexts
            .get(&context_id)
            .ok_or(JsrdbgError::NoSuchContext(context_id))
    }

    pub fn context_by_name(&self, name: &str) -> Option<&Context> {
        self.contexts.values().find(|context| context.name() == name)
    }

    /// Cached contexts, ordered by id.
    pub fn contexts(&self) -> impl Iterator<Item = &Context> + '_ {
        self.contexts.values()
    }

    /// Ask the engine for a fresh `contexts_list`. The snapshot arrives later
    /// as an unsolicited response.
    pub async fn refresh(&self) -> Result<()> {
        self.connection
            .send_request(Command::get_available_contexts())
            .await?;
        Ok(())
    }

    /// The cached contexts, after triggering a refresh.
    ///
    /// The refresh is not awaited: the returned list may predate the snapshot
    /// that this call requests.
    pub async fn get_all_available_contexts(&self) -> Result<Vec<Context>> {
        self.refresh().await?;
        Ok(self.contexts.values().cloned().collect())
    }
}
