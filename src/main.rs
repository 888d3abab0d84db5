use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use serde_json::Value;

use mcp_stdio_client::{cli::Cli, protocol::Params, ClientError, Session};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let session = Session::launch(cli.session_config())
        .await
        .with_context(|| format!("Failed to start {}", cli.server.display()))?;

    let outcome = run_calls(&session, &cli).await;

    // Shut down on every path, then report the call outcome.
    let status = if cli.no_drain {
        session.close().await
    } else {
        session.close_with_drain(&mut tokio::io::stdout()).await
    }
    .context("Failed to shut down the server")?;

    if let Some(status) = status {
        if !status.success() {
            warn!("Server exited with {}", status);
        }
    }

    outcome
}

async fn run_calls(session: &Session, cli: &Cli) -> Result<()> {
    if cli.handshake {
        session
            .initialize()
            .await
            .context("MCP initialize handshake failed")?;
    }

    if cli.list_tools {
        report("Tools", session.list_tools().await)?;
    }

    for call in &cli.calls {
        report(
            "Result",
            session.call_tool(&call.name, call.arguments.clone()).await,
        )?;
    }

    Ok(())
}

/// Print a call outcome. Only errors that end the session stop the run.
fn report(label: &str, outcome: Result<Params, ClientError>) -> Result<()> {
    match outcome {
        Ok(result) => println!("{}: {}", label, Value::Object(result)),
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(ClientError::Remote { message, .. }) => println!("Error: {}", message),
        Err(e) => println!("Error: {}", e),
    }
    Ok(())
}
