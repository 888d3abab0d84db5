#[path = "../common/mod.rs"]
mod common;

use anyhow::Result;
use futures::future::join_all;
use mcp_stdio_client::{ClientError, Session, SessionState};
use serde_json::json;
use std::{sync::Arc, time::Instant};
use test_support::timeouts;
use tokio::time::timeout;

use common::{connect, params, sh_config};

const CALLS: usize = 200;

#[tokio::test]
async fn test_many_overlapping_calls_reverse_order() -> Result<()> {
    let (session, mut server) = connect();

    let calls = join_all((0..CALLS).map(|n| {
        let session = &session;
        async move {
            let result = session
                .call_tool("echo", params(json!({"n": n})))
                .await?;
            anyhow::Ok((n, result))
        }
    }));
    let serve = async {
        let mut requests = Vec::with_capacity(CALLS);
        for _ in 0..CALLS {
            requests.push(server.next_request().await?);
        }
        for request in requests.into_iter().rev() {
            let id = request["id"].as_u64().unwrap_or_default();
            let n = request["params"]["arguments"]["n"].clone();
            server.respond(id, json!({ "n": n })).await?;
        }
        anyhow::Ok(())
    };

    let start = Instant::now();
    let (results, served) = timeout(timeouts::stress_timeout(), async {
        tokio::join!(calls, serve)
    })
    .await?;
    served?;

    for outcome in results {
        let (n, result) = outcome?;
        assert_eq!(result["n"], n);
    }
    println!("{} overlapping calls in {:?}", CALLS, start.elapsed());
    assert_eq!(session.pending_calls().await, 0);
    Ok(())
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_from_many_tasks_against_process() -> Result<()> {
    let session = Arc::new(Session::launch(sh_config(test_support::scripts::ECHO_SERVER)).await?);

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let method = format!("method/{}", n);
                let result = session.call(&method, None).await?;
                assert_eq!(result["method"], method.as_str());
                Ok::<_, ClientError>(())
            })
        })
        .collect();

    let outcomes = timeout(timeouts::stress_timeout(), join_all(handles)).await?;
    for outcome in outcomes {
        outcome??;
    }

    session.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_hang_up_under_load_fails_everything() -> Result<()> {
    let (session, mut server) = connect();

    let calls = join_all((0..50).map(|_| session.call("never", None)));
    let serve = async {
        server.collect_ids(50).await?;
        server.hang_up();
        anyhow::Ok(())
    };
    let (results, served) = tokio::join!(calls, serve);
    served?;

    assert!(results
        .iter()
        .all(|outcome| matches!(outcome, Err(ClientError::TransportClosed))));
    session.wait_closed().await;
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}
