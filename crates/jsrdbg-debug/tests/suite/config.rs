use jsrdbg_config::DebuggerConfig;
use jsrdbg_debug::wire::mock::MockJsrdbgServer;
use jsrdbg_debug::DebugSession;

#[tokio::test]
async fn session_connects_from_a_config_file() {
    let server = MockJsrdbgServer::spawn().await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jsrdbg.toml");
    std::fs::write(
        &path,
        format!(
            "[connection]\nhost = \"127.0.0.1\"\nport = {}\nprompt_timeout_ms = 2000\n",
            server.addr().port()
        ),
    )
    .unwrap();

    let config = DebuggerConfig::load_from_path(&path).unwrap();
    let mut session = DebugSession::connect(&config).await.unwrap();

    assert_eq!(session.connection().server_version().await.unwrap(), "mock-1.0");
    let contexts = session.refresh_contexts().await.unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].name, "main");

    session.disconnect().await;
}

#[tokio::test]
async fn refused_connection_is_described() {
    // Bind and drop a listener to find a port nothing is listening on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = DebuggerConfig::load_from_str(&format!(
        "[connection]\nhost = \"127.0.0.1\"\nport = {port}\n"
    ))
    .unwrap();

    let err = DebugSession::connect(&config).await.unwrap_err();
    assert!(err.to_string().contains(&format!("127.0.0.1:{port}")), "{err}");
}
