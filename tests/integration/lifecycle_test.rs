#[path = "../common/mod.rs"]
mod common;

use anyhow::Result;
use mcp_stdio_client::{ClientError, ServerCommand, Session, SessionConfig, SessionState};
use serde_json::json;
use test_support::timeouts;
use tokio::time::timeout;

use common::{connect, sh_config};

#[test_log::test(tokio::test)]
async fn test_eof_fails_every_pending_call() -> Result<()> {
    let (session, mut server) = connect();

    let calls = async {
        tokio::join!(
            session.call("a", None),
            session.call("b", None),
            session.call("c", None)
        )
    };
    let serve = async {
        server.collect_ids(3).await?;
        server.hang_up();
        anyhow::Ok(())
    };

    let ((a, b, c), served) = tokio::join!(calls, serve);
    served?;
    for outcome in [a, b, c] {
        assert!(
            matches!(outcome, Err(ClientError::TransportClosed)),
            "unexpected outcome {:?}",
            outcome
        );
    }

    timeout(timeouts::frame_wait(), session.wait_closed()).await?;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.pending_calls().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_calls_after_close_are_refused() -> Result<()> {
    let (session, server) = connect();
    server.hang_up();

    assert_eq!(session.close().await?, None);
    assert_eq!(session.state(), SessionState::Closed);

    assert!(matches!(
        session.list_tools().await,
        Err(ClientError::SessionClosed(SessionState::Closed))
    ));
    assert!(matches!(
        session.notify("ping", None).await,
        Err(ClientError::SessionClosed(SessionState::Closed))
    ));
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent() -> Result<()> {
    let (session, server) = connect();
    let serve = tokio::spawn(server.serve_echo());

    session.close().await?;
    session.close().await?;
    assert_eq!(session.state(), SessionState::Closed);

    // The server saw our input close and stopped on its own.
    assert_eq!(serve.await??, 0);
    Ok(())
}

#[tokio::test]
async fn test_close_waits_for_server_to_finish_output() -> Result<()> {
    let (session, mut server) = connect();

    let serve = tokio::spawn(async move {
        // Wait for our input to close, then say goodbye and hang up.
        assert!(server.next_frame().await?.is_none());
        server.notify("goodbye", json!({})).await?;
        server.hang_up();
        anyhow::Ok(())
    });

    let mut drained = Vec::new();
    session.close_with_drain(&mut drained).await?;
    serve.await??;

    let drained = String::from_utf8(drained)?;
    assert_eq!(drained.lines().count(), 1);
    assert!(drained.contains("goodbye"));
    Ok(())
}

#[tokio::test]
async fn test_close_while_server_ignores_it() -> Result<()> {
    let (session, _server) = connect();

    // The fake keeps its output open, so close has to give up on the reader.
    timeout(timeouts::stress_timeout(), session.close()).await??;
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_unstarted_session_refuses_calls() {
    let session = Session::new(sh_config("cat"));

    assert_eq!(session.state(), SessionState::NotStarted);
    assert!(matches!(
        session.call("ping", None).await,
        Err(ClientError::NotStarted)
    ));
}

#[tokio::test]
async fn test_start_is_a_no_op_while_running() -> Result<()> {
    let mut session = Session::new(sh_config("cat >/dev/null"));
    session.start().await?;
    let pid = session.id();
    assert!(pid.is_some());

    session.start().await?;
    assert_eq!(session.id(), pid);

    session.close().await?;
    assert!(matches!(
        session.start().await,
        Err(ClientError::SessionClosed(SessionState::Closed))
    ));
    Ok(())
}

#[tokio::test]
async fn test_failed_launch_leaves_session_unstarted() {
    let mut session = Session::new(SessionConfig::new(ServerCommand::new(
        "/definitely/not/a/server",
    )));

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Launch { .. }), "{:?}", err);
    assert_eq!(session.state(), SessionState::NotStarted);
}
