use std::collections::HashMap;
use std::time::Duration;

use jsrdbg_debug::pairing::pair;
use jsrdbg_debug::variables::object_summary_expression;
use jsrdbg_debug::wire::mock::MockJsrdbgServerConfig;
use jsrdbg_debug::wire::{
    ContextInfo, FrameVariables, JsrdbgError, Payload, PausedLocation, RawVariable, WireStackFrame,
};
use jsrdbg_debug::{DebugError, LocalPosition, LocalSource, StepKind};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::{spawn_session, THREE_FILES};

fn frame(depth: u32, line: u32) -> WireStackFrame {
    WireStackFrame {
        depth,
        line,
        url: "main".to_owned(),
    }
}

fn raw(name: &str, value: serde_json::Value) -> RawVariable {
    RawVariable {
        name: name.to_owned(),
        value,
    }
}

#[tokio::test]
async fn stack_frames_map_through_server_source() {
    let (_server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            stacktrace: vec![frame(0, 5), frame(1, 2)],
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;

    session.set_server_source("main", THREE_FILES);
    session
        .source_map_mut()
        .set_source("util.js", LocalSource::from_path("/work/util.js"));

    let frames = session.stack_trace(1).await.unwrap();
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0].frame.id, pair(1, 0).unwrap());
    assert_eq!(frames[0].position, LocalPosition::new("util.js", 2));
    assert_eq!(
        frames[0].source.as_ref().and_then(|s| s.path.clone()),
        Some("/work/util.js".into())
    );

    assert_eq!(frames[1].frame.id, pair(1, 1).unwrap());
    assert_eq!(frames[1].position, LocalPosition::new("main", 2));
    assert!(frames[1].source.is_none());
}

#[tokio::test]
async fn unknown_context_is_a_hard_error() {
    let (_server, mut session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;

    let err = session.stack_trace(99).await.unwrap_err();
    assert!(matches!(err, DebugError::Wire(JsrdbgError::NoSuchContext(99))));
    assert!(err.to_string().contains("No such context 99"));
}

#[tokio::test]
async fn scopes_variables_and_lazy_objects() {
    let mut evaluations = HashMap::new();
    evaluations.insert(
        object_summary_expression("obj"),
        json!("{\"a\":\"x\",\"b\":{\"c\":1}}"),
    );
    evaluations.insert("n + 1".to_owned(), json!(2));

    let (server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            variables: vec![FrameVariables {
                frame_index: 0,
                variables: vec![
                    raw("n", json!(1)),
                    raw("obj", json!({})),
                    raw("list", json!([1, 2])),
                ],
            }],
            evaluations,
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;

    let frames = session.stack_trace(1).await.unwrap();
    let frame_id = frames[0].frame.id;

    let scopes = session.scopes(frame_id).await.unwrap();
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].name, "Locals");
    let locals = scopes[0].variables_reference;

    let variables = session.variables(locals).await.unwrap();
    let names: Vec<_> = variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["n", "obj", "list"]);
    assert_eq!(variables[0].value, "1");
    assert_eq!(variables[2].value, "Array[2]");

    let obj = variables[1].variables_reference;
    assert_ne!(obj, 0);
    let members = session.variables(obj).await.unwrap();
    let evals: Vec<_> = members.iter().map(|v| v.evaluate_name.as_str()).collect();
    assert_eq!(evals, vec!["obj.a", "obj.b"]);
    assert_eq!(members[0].value, "x");
    assert_ne!(members[1].variables_reference, 0);

    // A second read is served from the cache.
    let expansions_before = server
        .received()
        .iter()
        .filter(|line| line.contains("\"evaluate\""))
        .count();
    session.variables(obj).await.unwrap();
    let expansions_after = server
        .received()
        .iter()
        .filter(|line| line.contains("\"evaluate\""))
        .count();
    assert_eq!(expansions_before, expansions_after);

    let evaluated = session.evaluate(frame_id, "n + 1").await.unwrap();
    assert_eq!((evaluated.value.as_str(), evaluated.type_name.as_str()), ("2", "number"));

    let err = session.evaluate(frame_id, "missing()").await.unwrap_err();
    assert_eq!(
        err.remote_code(),
        Some(jsrdbg_debug::wire::ErrorCode::EvaluationFailed)
    );
}

#[tokio::test]
async fn set_variable_updates_cache_in_place() {
    let (server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            variables: vec![FrameVariables {
                frame_index: 0,
                variables: vec![raw("n", json!(1)), raw("s", json!("text"))],
            }],
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;

    let frames = session.stack_trace(1).await.unwrap();
    let locals = session.scopes(frames[0].frame.id).await.unwrap()[0].variables_reference;

    let updated = session.set_variable(locals, "n", json!(5)).await.unwrap();
    assert_eq!(updated.value, "5");

    let variables = session.variables(locals).await.unwrap();
    let values: Vec<_> = variables
        .iter()
        .map(|v| (v.name.as_str(), v.value.as_str()))
        .collect();
    assert_eq!(values, vec![("n", "5"), ("s", "text")]);

    assert!(server
        .received()
        .iter()
        .any(|line| line.starts_with("1/") && line.contains("\"variables\":[{\"name\":\"n\",\"value\":5}]")));
}

#[tokio::test]
async fn stepping_waits_for_the_paused_event() {
    let (_server, mut session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;

    let frames = session.stack_trace(1).await.unwrap();
    let stale = frames[0].frame.id;

    let stop = session.step(1, StepKind::In).await.unwrap();
    assert_eq!(stop.context_id, Some(1));
    assert_eq!(stop.location.line, Some(4));
    assert_eq!(stop.position, Some(LocalPosition::new("main", 4)));

    // Frames from before the step are gone.
    assert!(matches!(
        session.scopes(stale).await,
        Err(DebugError::UnknownFrame(id)) if id == stale
    ));

    let stop = session.step(1, StepKind::Over).await.unwrap();
    assert_eq!(stop.location.line, Some(4));
}

#[tokio::test]
async fn step_ignores_stops_of_other_contexts() {
    let (_server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            contexts: vec![
                ContextInfo {
                    id: 1,
                    name: "main".to_owned(),
                    paused: true,
                },
                ContextInfo {
                    id: 2,
                    name: "lib".to_owned(),
                    paused: false,
                },
            ],
            stops_before_step: vec![(2, 77)],
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;
    let mut lib_events = session.coordinator().get_context(2).unwrap().subscribe();

    let stop = session.step(1, StepKind::In).await.unwrap();
    assert_eq!(stop.context_id, Some(1));
    assert_eq!(stop.location.line, Some(4));

    // The other context's stop is routed to that context instead.
    assert!(session.sync().is_empty());
    let routed = lib_events.try_recv().unwrap();
    assert_eq!(routed.context_id, Some(2));
    assert_eq!(
        routed.payload().unwrap(),
        Payload::Paused(PausedLocation {
            url: Some("main".to_owned()),
            line: Some(77),
        })
    );
}

#[tokio::test]
async fn stop_of_unlisted_context_does_not_fail_other_requests() {
    let (server, mut session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;

    server.push_paused(9, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.pause(1).await.unwrap();
    assert_eq!(session.contexts().len(), 1);
}

#[tokio::test]
async fn sync_reports_unroutable_responses_and_keeps_draining() {
    let (server, mut session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;
    let mut main_events = session.coordinator().get_context(1).unwrap().subscribe();

    server.push_paused(9, 3);
    server.push_paused(1, 8);

    let mut rejected = Vec::new();
    for _ in 0..50 {
        rejected.extend(session.sync());
        if let Ok(event) = main_events.try_recv() {
            assert_eq!(event.context_id, Some(1));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        matches!(rejected.as_slice(), [JsrdbgError::NoSuchContext(9)]),
        "{rejected:?}"
    );

    // A listing applied after the rejected stop still succeeds.
    assert_eq!(session.refresh_contexts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn pushed_pause_reaches_waiter() {
    let (server, session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;

    let (stop, ()) = tokio::join!(session.wait_for_pause(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.push_paused(1, 7);
    });
    let stop = stop.unwrap();
    assert_eq!(stop.context_id, Some(1));
    assert_eq!(stop.location.line, Some(7));
}

#[tokio::test]
async fn waiting_for_a_pause_times_out() {
    let (_server, session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_millis(100)).await;

    let err = session.wait_for_pause().await.unwrap_err();
    assert!(matches!(err, DebugError::Wire(JsrdbgError::Timeout)));
}

#[tokio::test]
async fn pause_of_paused_context_succeeds() {
    let (_server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            already_paused: vec![1],
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;

    session.pause(1).await.unwrap();
    session.resume(1).await.unwrap();
}

#[tokio::test]
async fn load_server_source_installs_chunks() {
    let (_server, mut session) = spawn_session(
        MockJsrdbgServerConfig {
            source: THREE_FILES.iter().map(|line| line.to_string()).collect(),
            ..Default::default()
        },
        Duration::from_secs(5),
    )
    .await;

    session.load_server_source("main").await.unwrap();
    let chunks = session.source_map().server_source().unwrap().chunks();
    let names: Vec<_> = chunks.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["main", "util.js", "lib-b.js"]);
}

#[tokio::test]
async fn disconnect_closes_connection() {
    let (server, session) =
        spawn_session(MockJsrdbgServerConfig::default(), Duration::from_secs(5)).await;
    let connection = session.connection().clone();

    session.disconnect().await;
    assert!(connection.is_closed());

    // The engine saw the exit command.
    for _ in 0..50 {
        if server.received().iter().any(|line| line == "exit") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never received exit: {:?}", server.received());
}
