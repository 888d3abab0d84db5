//! Command-line interface of the `mcp-stdio-client` binary.

use clap::Parser;
use serde_json::{Map, Value};
use std::{path::PathBuf, time::Duration};

use crate::config::{
    MalformedPolicy, ServerCommand, SessionConfig, SessionOptions, REQUEST_TIMEOUT_SECS,
};

/// One `tools/call` to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Launch an MCP server and call its tools over stdio.
#[derive(Parser, Debug)]
#[command(name = "mcp-stdio-client", version)]
pub struct Cli {
    /// Environment override for the server (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Pass the parent's VAR to the server as KEY (repeatable).
    #[arg(long = "env-from", value_name = "KEY=VAR", value_parser = parse_key_value)]
    pub env_from: Vec<(String, String)>,

    /// Working directory for the server.
    #[arg(long, value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Tool to call, optionally with a JSON object of arguments (repeatable,
    /// issued in order).
    #[arg(long = "call", value_name = "NAME[=JSON]", value_parser = parse_tool_call)]
    pub calls: Vec<ToolCall>,

    /// List the server's tools before making any calls.
    #[arg(long)]
    pub list_tools: bool,

    /// Run the MCP initialize handshake first.
    #[arg(long)]
    pub handshake: bool,

    /// Per-request timeout in seconds; 0 waits forever.
    #[arg(long, value_name = "SECS", default_value_t = REQUEST_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Close the session on the first malformed frame.
    #[arg(long)]
    pub fail_fast: bool,

    /// Do not copy leftover server output to stdout on exit.
    #[arg(long)]
    pub no_drain: bool,

    /// Server executable.
    #[arg(value_name = "SERVER")]
    pub server: PathBuf,

    /// Arguments passed to the server.
    #[arg(
        value_name = "ARG",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub server_args: Vec<String>,
}

impl Cli {
    pub fn session_config(&self) -> SessionConfig {
        let mut command = ServerCommand::new(&self.server)
            .args(self.server_args.iter().cloned())
            .envs(self.env.iter().cloned());
        for (key, parent_var) in &self.env_from {
            command = command.forward_env(key.clone(), parent_var);
        }
        if let Some(dir) = &self.working_dir {
            command = command.working_dir(dir);
        }

        let timeout = (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs));
        let policy = if self.fail_fast {
            MalformedPolicy::FailFast
        } else {
            MalformedPolicy::Skip
        };

        SessionConfig::new(command).with_options(
            SessionOptions::default()
                .request_timeout(timeout)
                .malformed_policy(policy),
        )
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(format!("expected KEY=VALUE, got `{}`", raw));
    };
    if key.is_empty() {
        return Err(format!("empty key in `{}`", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn parse_tool_call(raw: &str) -> Result<ToolCall, String> {
    let (name, arguments) = match raw.split_once('=') {
        Some((name, json)) => {
            let value: Value = serde_json::from_str(json)
                .map_err(|e| format!("invalid JSON arguments for `{}`: {}", name, e))?;
            let Value::Object(arguments) = value else {
                return Err(format!("arguments for `{}` must be a JSON object", name));
            };
            (name, arguments)
        }
        None => (raw, Map::new()),
    };

    if name.is_empty() {
        return Err("tool name is empty".to_string());
    }
    Ok(ToolCall {
        name: name.to_string(),
        arguments,
    })
}
