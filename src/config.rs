use log::warn;
use std::{collections::BTreeMap, fmt, path::PathBuf, time::Duration};

/// Timeout for requests in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long the server gets to exit after its input is closed before it is killed.
pub const SHUTDOWN_GRACE_MILLIS: u64 = 2_000;

/// Maximum number of unclaimed frames kept for draining.
pub const UNCLAIMED_BACKLOG: usize = 256;

/// MCP protocol revision announced during the handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// What the reader does with a frame it cannot decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Fail the call the frame belongs to (if it can be told) and keep reading.
    #[default]
    Skip,
    /// Fail every pending call and tear the session down.
    FailFast,
}

/// The server executable and how to launch it.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Applied on top of the inherited environment, key by key.
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ServerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Pass the parent's `parent_var` to the server as `key`.
    ///
    /// Leaves the override unset (with a warning) when the parent does not
    /// have the variable.
    pub fn forward_env(mut self, key: impl Into<String>, parent_var: &str) -> Self {
        let key = key.into();
        match std::env::var(parent_var) {
            Ok(value) => {
                self.env.insert(key, value);
            }
            Err(_) => warn!(
                "Not forwarding {} to the server: {} is not set",
                key, parent_var
            ),
        }
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Names of the overridden variables, for logging.
    pub fn env_keys(&self) -> Vec<&str> {
        self.env.keys().map(String::as_str).collect()
    }
}

// Override values may be tokens, so only keys are ever printed.
impl fmt::Debug for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env_keys())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// Dispatcher and lifecycle tunables, independent of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Deadline applied to every `call`; `None` waits forever.
    pub request_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub malformed_policy: MalformedPolicy,
    pub unclaimed_backlog: usize,
    pub client_name: String,
    pub client_version: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
            shutdown_grace: Duration::from_millis(SHUTDOWN_GRACE_MILLIS),
            malformed_policy: MalformedPolicy::default(),
            unclaimed_backlog: UNCLAIMED_BACKLOG,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl SessionOptions {
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed_policy = policy;
        self
    }

    pub fn unclaimed_backlog(mut self, frames: usize) -> Self {
        self.unclaimed_backlog = frames;
        self
    }
}

/// Everything a `Session` needs to launch and drive a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command: ServerCommand,
    pub options: SessionOptions,
}

impl SessionConfig {
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command,
            options: SessionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }
}
