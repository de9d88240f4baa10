// Integration suite compiled by `tests/harness.rs`.
mod breakpoints;
mod config;
mod session;

use std::time::Duration;

use jsrdbg_debug::wire::mock::{MockJsrdbgServer, MockJsrdbgServerConfig};
use jsrdbg_debug::wire::Connection;
use jsrdbg_debug::{DebugSession, SessionOptions};

pub(crate) const THREE_FILES: &[&str] = &[
    "var a = 1;",
    "var b = 2;",
    "//# 1 util.js",
    "function u() {}",
    "u();",
    "//# 2 lib-b.js",
    "var l = 3;",
    "l++;",
];

/// A mock engine plus a session whose context table is already populated.
pub(crate) async fn spawn_session(
    config: MockJsrdbgServerConfig,
    prompt_timeout: Duration,
) -> (MockJsrdbgServer, DebugSession) {
    let server = MockJsrdbgServer::spawn_with_config(config)
        .await
        .expect("spawn mock engine");
    let connection = Connection::connect(server.addr())
        .await
        .expect("connect to mock engine");
    let mut session = DebugSession::new(
        connection,
        SessionOptions {
            prompt_timeout,
            debug_statement_injected: false,
        },
    );
    session.refresh_contexts().await.expect("initial context listing");
    (server, session)
}
