use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::{broadcast, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::encode_command,
    describe_io_error,
    transport::Transport,
    types::{Command, JsrdbgError, Payload, Response, Result},
};

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub event_capacity: usize,
    pub read_chunk_size: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            event_capacity: 64,
            read_chunk_size: 8 * 1024,
        }
    }
}

/// Messages the engine sent without a pending request waiting for them.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// `info`/`paused`: a context stopped.
    Paused(Response),
    /// Any other unsolicited response, for the context coordinator.
    Response(Response),
    /// The socket closed or failed; no further events follow.
    Closed,
}

type Pending = HashMap<String, oneshot::Sender<Result<Response>>>;

struct Inner {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Mutex<Pending>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: CancellationToken,
}

/// One debugging session's link to the engine.
///
/// Cloning is cheap; all clones share the socket, the pending-request table
/// and the event channel.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_options(addr, ConnectionOptions::default()).await
    }

    pub async fn connect_with_options(addr: SocketAddr, options: ConnectionOptions) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|err| {
            JsrdbgError::Io(std::io::Error::new(
                err.kind(),
                describe_io_error(&err, &addr.to_string()),
            ))
        })?;
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!(target: "jsrdbg.wire", error = %err, "failed to disable Nagle's algorithm");
        }
        tracing::debug!(target: "jsrdbg.wire", %addr, "connected to debugger engine");
        Ok(Self::from_stream(stream, options))
    }

    /// Run the protocol over an already established stream.
    ///
    /// Must be called from within a tokio runtime; the read loop is spawned
    /// onto it.
    pub fn from_stream<S>(stream: S, options: ConnectionOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            events,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(read_loop(reader, inner.clone(), options.read_chunk_size.max(1)));

        Self { inner }
    }

    /// Receive unsolicited engine messages. Dropping the receiver unsubscribes.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Cancelled once the connection is torn down, by either side.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Send `command` and, if it is answered with a correlated reply, wait for
    /// that reply.
    ///
    /// Returns `Ok(None)` right after the write for commands that carry no
    /// correlation id. Engine `error` replies are returned as `Ok`; see
    /// [`Response::into_result`].
    pub async fn send_request(&self, command: Command) -> Result<Option<Response>> {
        if self.is_closed() {
            return Err(JsrdbgError::ConnectionClosed);
        }

        let wire = encode_command(&command)?;
        let id = command.id.clone().filter(|_| command.requires_id());

        let Some(id) = id else {
            self.write(&wire).await?;
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        // The read loop cancels the token before draining `pending`, so a
        // request registered after the drain is caught here.
        if self.is_closed() {
            self.remove_pending(&id).await;
            return Err(JsrdbgError::ConnectionClosed);
        }

        if let Err(err) = self.write(&wire).await {
            self.remove_pending(&id).await;
            return Err(err);
        }

        match rx.await {
            Ok(reply) => reply.map(Some),
            Err(_dropped) => Err(JsrdbgError::ConnectionClosed),
        }
    }

    /// Like [`Connection::send_request`] for commands that must be answered.
    pub async fn request(&self, command: Command) -> Result<Response> {
        let name = command.name;
        self.send_request(command).await?.ok_or_else(|| {
            JsrdbgError::Protocol(format!("`{name}` is not answered with a correlated reply"))
        })
    }

    pub async fn server_version(&self) -> Result<String> {
        let response = self.request(Command::server_version()).await?.into_result()?;
        match response.payload()? {
            Payload::ServerVersion(version) => Ok(version),
            other => Err(JsrdbgError::UnexpectedResponse {
                expected: "server_version",
                actual: other.kind().to_owned(),
            }),
        }
    }

    /// Ask the engine to end the session, then tear the connection down.
    ///
    /// Every request still waiting for a reply fails with
    /// [`JsrdbgError::ConnectionClosed`].
    pub async fn disconnect(&self) {
        if !self.is_closed() {
            if let Err(err) = self.send_request(Command::exit()).await {
                tracing::debug!(target: "jsrdbg.wire", error = %err, "failed to send exit");
            }
        }
        self.inner.shutdown.cancel();
        fail_pending(&self.inner).await;
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn write(&self, wire: &str) -> Result<()> {
        tracing::trace!(target: "jsrdbg.wire", message = wire.trim_end(), "-> engine");
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(wire.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn remove_pending(&self, id: &str) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(id);
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

async fn read_loop<R>(mut reader: R, inner: Arc<Inner>, chunk_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut transport = Transport::new();
    let mut chunk = vec![0u8; chunk_size];
    let mut decoded = Vec::new();

    loop {
        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            res = reader.read(&mut chunk) => res,
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!(target: "jsrdbg.wire", "debugger engine closed the connection");
                break;
            }
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(target: "jsrdbg.wire", error = %err, "connection read failed");
                break;
            }
        };

        transport.push(&chunk[..n], |res| decoded.push(res));
        for res in decoded.drain(..) {
            match res {
                Ok(response) => dispatch(&inner, response).await,
                Err(err) => {
                    tracing::warn!(target: "jsrdbg.wire", error = %err, "dropping malformed message")
                }
            }
        }
    }

    inner.shutdown.cancel();
    fail_pending(&inner).await;
    let _ = inner.events.send(ConnectionEvent::Closed);
}

async fn dispatch(inner: &Inner, response: Response) {
    if let Some(id) = response.id() {
        let tx = {
            let mut pending = inner.pending.lock().await;
            pending.remove(id)
        };
        if let Some(tx) = tx {
            let _ = tx.send(Ok(response));
            return;
        }
    }

    let event = if response.is_paused_event() {
        ConnectionEvent::Paused(response)
    } else {
        ConnectionEvent::Response(response)
    };
    if inner.events.send(event).is_err() {
        tracing::trace!(target: "jsrdbg.wire", "no event subscribers; dropping unsolicited message");
    }
}

async fn fail_pending(inner: &Inner) {
    let pending = {
        let mut pending = inner.pending.lock().await;
        std::mem::take(&mut *pending)
    };
    if !pending.is_empty() {
        tracing::debug!(
            target: "jsrdbg.wire",
            count = pending.len(),
            "failing requests still waiting for a reply"
        );
    }
    for (_id, tx) in pending {
        let _ = tx.send(Err(JsrdbgError::ConnectionClosed));
    }
}
