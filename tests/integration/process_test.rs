//! Sessions against real child processes, using small `sh` scripts as servers.
#![cfg(unix)]

#[path = "../common/mod.rs"]
mod common;

use anyhow::Result;
use mcp_stdio_client::{
    transport::ProcessTransport, ClientError, ServerCommand, Session, SessionConfig,
    SessionState,
};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use test_support::{scripts, timeouts};

use common::{params, sh_config, sh_config_with_grace, sh_server, test_options};

#[test_log::test(tokio::test)]
async fn test_projects_server_round_trip() -> Result<()> {
    let session = Session::launch(sh_config(scripts::PROJECTS_SERVER)).await?;
    assert_eq!(session.state(), SessionState::Running);

    let projects = session.call_tool("list_projects", params(json!({}))).await?;
    assert_eq!(projects["projects"], json!([]));

    let err = session
        .call_tool(
            "create_task",
            params(json!({"project_id": "missing", "title": "Write docs"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote { code: -32602, .. }), "{:?}", err);

    let mut drained = Vec::new();
    let status = session.close_with_drain(&mut drained).await?;

    assert!(status.is_some_and(|status| status.success()));
    assert_eq!(String::from_utf8(drained)?, "goodbye\n");
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_echo_server_answers_overlapping_calls() -> Result<()> {
    let session = Session::launch(sh_config(scripts::ECHO_SERVER)).await?;

    let (a, b, c) = tokio::join!(
        session.list_tools(),
        session.call("resources/list", None),
        session.call_tool("noop", params(json!({})))
    );
    assert_eq!(a?["method"], "tools/list");
    assert_eq!(b?["method"], "resources/list");
    assert_eq!(c?["method"], "tools/call");

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_env_overrides_are_added_to_inherited_env() -> Result<()> {
    let command = sh_server(scripts::ENV_SERVER).env("MCP_TEST_VALUE", "from-override");
    let session =
        Session::launch(SessionConfig::new(command).with_options(test_options())).await?;

    let result = session.call("env", None).await?;
    assert_eq!(result["value"], "from-override");
    assert_eq!(result["path"], "inherited");

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_working_dir_is_applied() -> Result<()> {
    let dir = TempDir::new()?;
    let expected = dir.path().canonicalize()?;
    let command = sh_server(scripts::PWD_SERVER).working_dir(dir.path());
    let session =
        Session::launch(SessionConfig::new(command).with_options(test_options())).await?;

    let result = session.call("pwd", None).await?;
    let cwd = result["cwd"].as_str().unwrap_or_default();
    assert_eq!(std::path::Path::new(cwd).canonicalize()?, expected);

    session.close().await?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_crash_fails_pending_call_and_records_exit() -> Result<()> {
    let session = Session::launch(sh_config(scripts::CRASHING_SERVER)).await?;

    let err = session.call("doomed", None).await.unwrap_err();
    assert!(matches!(err, ClientError::TransportClosed), "{:?}", err);

    tokio::time::timeout(timeouts::frame_wait(), session.wait_closed()).await?;
    let status = session.exit_status().await;
    assert_eq!(status.and_then(|status| status.code()), Some(3));

    // Closing again reports the same status.
    let status = session.close().await?;
    assert_eq!(status.and_then(|status| status.code()), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_stubborn_server_is_killed_after_grace() -> Result<()> {
    let grace = Duration::from_millis(200);
    let session =
        Session::launch(sh_config_with_grace(scripts::STUBBORN_SERVER, grace)).await?;

    let started = Instant::now();
    let status = session.close().await?;

    assert!(started.elapsed() < timeouts::stress_timeout());
    assert!(status.is_some_and(|status| !status.success()));
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_garbled_output_fails_pending_call() -> Result<()> {
    let session = Session::launch(sh_config(scripts::GARBLED_SERVER)).await?;

    let err = session.call("first", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Malformed(_)), "{:?}", err);

    // The answer that follows the garbage belongs to nobody any more.
    let mut drained = Vec::new();
    session.close_with_drain(&mut drained).await?;
    let drained = String::from_utf8(drained)?;
    assert!(drained.contains(r#""late":true"#), "{}", drained);
    assert!(!drained.contains("this is not json"));
    Ok(())
}

#[tokio::test]
async fn test_launch_error_names_program() {
    let outcome = Session::launch(SessionConfig::new(ServerCommand::new(
        "/definitely/not/a/server",
    )))
    .await;

    match outcome {
        Err(ClientError::Launch { program, .. }) => {
            assert!(program.contains("/definitely/not/a/server"))
        }
        Err(other) => panic!("expected a launch error, got {:?}", other),
        Ok(_) => panic!("launching a missing executable succeeded"),
    }
}

#[tokio::test]
async fn test_bare_program_name_is_resolved_on_path() -> Result<()> {
    let err = ProcessTransport::start(&ServerCommand::new("no-such-mcp-server-on-path"))
        .await
        .err();
    assert!(matches!(err, Some(ClientError::Launch { .. })));

    // `sh` itself is found through PATH.
    let mut transport = ProcessTransport::start(&sh_server(scripts::ECHO_SERVER)).await?;
    transport
        .write_line(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
        .await?;
    let line = transport.read_line().await?;
    let response: Value = serde_json::from_str(&line)?;
    assert_eq!(response["result"]["method"], "ping");

    transport.close(timeouts::shutdown_grace()).await?;
    Ok(())
}
