//! Client side of the jsrdbg remote script debugger protocol.
//!
//! The engine speaks newline-terminated JSON over TCP. Commands may carry a
//! `<contextId>/` prefix addressing one JS context; most carry a correlation
//! `id` that the engine echoes in its reply. Everything the engine sends
//! without a matching pending request (`paused` events, `contexts_list`
//! snapshots) is broadcast as a [`ConnectionEvent`].
//!
//! Layers, bottom-up:
//! - [`codec`]: one command to bytes, one message to a [`Response`].
//! - [`transport`]: reassembles messages from arbitrarily split reads.
//! - [`Connection`]: the socket, request correlation and the event stream.
//! - [`Context`] and [`ContextCoordinator`]: per-context helpers and the
//!   live context table.

pub mod codec;
mod connection;
mod context;
mod coordinator;
mod lock;
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
mod reply_slot;
pub mod transport;
mod types;

use std::io;

pub use connection::{Connection, ConnectionEvent, ConnectionOptions};
pub use context::Context;
pub use coordinator::ContextCoordinator;
pub use reply_slot::ReplySlot;
pub use types::*;

/// Render a socket error against `target` as something a user can act on.
pub fn describe_io_error(err: &io::Error, target: &str) -> String {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => format!(
            "connection to debugger engine at {target} was refused; is the engine running with the debugger enabled?"
        ),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
            format!("debugger engine at {target} dropped the connection")
        }
        io::ErrorKind::TimedOut => format!("timed out connecting to debugger engine at {target}"),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
            format!("invalid debugger engine address {target}")
        }
        io::ErrorKind::PermissionDenied => {
            format!("not permitted to connect to debugger engine at {target}")
        }
        _ => format!("failed to reach debugger engine at {target}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockJsrdbgServer, MockJsrdbgServerConfig};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn refused_connection_mentions_target() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        let text = describe_io_error(&err, "127.0.0.1:8089");
        assert!(text.contains("127.0.0.1:8089"));
        assert!(text.contains("refused"));
    }

    async fn next_contexts(events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> Response {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed")
            {
                ConnectionEvent::Response(response)
                    if response.subtype == Some(Subtype::ContextsList) =>
                {
                    return response
                }
                _ => continue,
            }
        }
    }

    fn context(id: ContextId, name: &str, paused: bool) -> ContextInfo {
        ContextInfo {
            id,
            name: name.to_owned(),
            paused,
        }
    }

    #[tokio::test]
    async fn coordinator_tracks_snapshots() {
        let server = MockJsrdbgServer::spawn_with_config(MockJsrdbgServerConfig {
            contexts: vec![context(1, "main", true), context(2, "lib", false)],
            ..Default::default()
        })
        .await
        .unwrap();
        let conn = Connection::connect(server.addr()).await.unwrap();
        let mut events = conn.subscribe_events();
        let mut coordinator = ContextCoordinator::new(conn.clone());
        let mut new_contexts = coordinator.subscribe_new_contexts();

        coordinator.refresh().await.unwrap();
        let snapshot = next_contexts(&mut events).await;
        coordinator.handle_response(snapshot.clone()).unwrap();

        let ids: Vec<_> = coordinator.contexts().map(Context::id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(new_contexts.recv().await.unwrap().id, 1);
        assert_eq!(new_contexts.recv().await.unwrap().id, 2);

        // Applying the same snapshot again changes nothing and announces nothing.
        coordinator.handle_response(snapshot).unwrap();
        assert_eq!(coordinator.contexts().count(), 2);
        assert!(new_contexts.try_recv().is_err());

        // A context missing from the next snapshot is forgotten.
        server.set_contexts(vec![context(2, "lib", true)]);
        coordinator.refresh().await.unwrap();
        let snapshot = next_contexts(&mut events).await;
        coordinator.handle_response(snapshot).unwrap();

        let err = coordinator.get_context(1).unwrap_err();
        assert_eq!(err.to_string(), "No such context 1");
        assert!(coordinator.get_context(2).unwrap().is_paused());
        assert_eq!(coordinator.context_by_name("lib").map(Context::id), Some(2));
    }

    #[tokio::test]
    async fn responses_for_unknown_contexts_are_rejected() {
        let server = MockJsrdbgServer::spawn().await.unwrap();
        let conn = Connection::connect(server.addr()).await.unwrap();
        let mut coordinator = ContextCoordinator::new(conn);

        let response = codec::decode_response(b"9/{\"type\":\"info\",\"subtype\":\"paused\"}").unwrap();
        assert!(matches!(
            coordinator.handle_response(response),
            Err(JsrdbgError::NoSuchContext(9))
        ));
    }

    #[tokio::test]
    async fn context_requests_round_trip() {
        let mut evaluations = std::collections::HashMap::new();
        evaluations.insert("1 + 1".to_owned(), serde_json::json!(2));
        let server = MockJsrdbgServer::spawn_with_config(MockJsrdbgServerConfig {
            already_paused: vec![1],
            evaluations,
            ..Default::default()
        })
        .await
        .unwrap();
        let conn = Connection::connect(server.addr()).await.unwrap();
        let ctx = Context::new(context(1, "main", true), conn.clone());

        // The engine answers IS_PAUSED; pausing twice is still fine.
        ctx.pause().await.unwrap();
        ctx.pause().await.unwrap();

        assert_eq!(ctx.evaluate("1 + 1", None).await.unwrap(), serde_json::json!(2));
        let err = ctx.evaluate("nope", Some(0)).await.unwrap_err();
        assert_eq!(err.remote_code(), Some(ErrorCode::EvaluationFailed));

        let frames = ctx.stacktrace().await.unwrap();
        assert_eq!(frames[0].url, "main");
        assert_eq!(conn.server_version().await.unwrap(), "mock-1.0");
        ctx.r#continue().await.unwrap();
    }

    #[tokio::test]
    async fn next_is_answered_by_a_paused_event() {
        let server = MockJsrdbgServer::spawn().await.unwrap();
        let conn = Connection::connect(server.addr()).await.unwrap();
        let mut events = conn.subscribe_events();
        let ctx = Context::new(context(1, "main", true), conn);

        ctx.next().await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let ConnectionEvent::Paused(response) = event else {
            panic!("expected paused event, got {event:?}");
        };
        assert_eq!(response.context_id, Some(1));
        assert_eq!(
            response.payload().unwrap(),
            Payload::Paused(PausedLocation {
                url: Some("main".to_owned()),
                line: Some(4),
            })
        );
    }
}
