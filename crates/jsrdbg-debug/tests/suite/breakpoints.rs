use std::path::Path;
use std::time::Duration;

use jsrdbg_debug::breakpoints::{clear_all_breakpoints, clear_breakpoints, list_breakpoints};
use jsrdbg_debug::wire::mock::MockJsrdbgServerConfig;
use jsrdbg_debug::{BreakpointResult, LocalSource};
use pretty_assertions::assert_eq;

use super::{spawn_session, THREE_FILES};

#[tokio::test]
async fn rejected_line_does_not_fail_the_batch() {
    let (_server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            unsettable_lines: vec![4],
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;
    session
        .source_map_mut()
        .set_source("main", LocalSource::from_path("/work/main.js"));

    let results = session
        .set_breakpoints(Path::new("/work/main.js"), &[2, 4, 6])
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            BreakpointResult {
                line: 2,
                verified: true,
                id: Some(1),
                message: None,
            },
            BreakpointResult {
                line: 4,
                verified: false,
                id: None,
                message: Some("cannot set breakpoint at line 4".to_owned()),
            },
            BreakpointResult {
                line: 6,
                verified: true,
                id: Some(2),
                message: None,
            },
        ]
    );

    let connection = session.connection();
    clear_breakpoints(connection, &[1, 2]).await.unwrap();
    clear_all_breakpoints(connection).await.unwrap();
    assert!(list_breakpoints(connection).await.unwrap().is_empty());
}

#[tokio::test]
async fn breakpoint_lines_are_translated_to_server_lines() {
    let (server, mut session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;
    session.set_server_source("main", THREE_FILES);
    session
        .source_map_mut()
        .set_source("util.js", LocalSource::from_path("/work/util.js"));

    // Matched by alias: the editor has the file somewhere else.
    let results = session
        .set_breakpoints(Path::new("/checkout/util.js"), &[1])
        .await
        .unwrap();
    assert!(results[0].verified);

    let sent = server
        .received()
        .into_iter()
        .find(|line| line.contains("set_breakpoint"))
        .expect("set_breakpoint was sent");
    assert!(sent.contains("\"line\":4"), "{sent}");
    assert!(sent.contains("\"url\":\"util.js\""), "{sent}");
}
