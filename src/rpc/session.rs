use log::{info, warn};
use serde_json::{Map, Value};
use std::{process::ExitStatus, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    process::ChildStdin,
    sync::Mutex,
    task::JoinHandle,
    time::timeout,
};

use super::{
    connection::{self, Backlog, Connection},
    dispatcher::Dispatcher,
    state::{SessionState, StateCell},
};
use crate::{
    config::{ServerCommand, SessionConfig, SessionOptions, MCP_PROTOCOL_VERSION},
    error::ClientError,
    protocol::{
        tools::{self, CallToolParams, ClientInfo},
        Params,
    },
    transport::{FrameReader, FrameWriter, ProcessSlot, ProcessTransport},
};

/// Final shutdown steps, shared by `Session::close` and the reader task.
pub(crate) struct Teardown<W> {
    dispatcher: Arc<Dispatcher<W>>,
    process: Arc<ProcessSlot>,
    state: StateCell,
    grace: Duration,
}

impl<W> Clone for Teardown<W> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            process: Arc::clone(&self.process),
            state: self.state.clone(),
            grace: self.grace,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> Teardown<W> {
    pub(crate) fn state(&self) -> &StateCell {
        &self.state
    }

    /// Fail whatever is still pending, close the server's input and reap it.
    /// Safe to run more than once.
    pub(crate) async fn run(&self) -> Option<ExitStatus> {
        self.state.advance(SessionState::Closing);

        let failed = self
            .dispatcher
            .pending
            .fail_all(|| ClientError::TransportClosed);
        if failed > 0 {
            warn!("{} pending request(s) failed: transport closed", failed);
        }

        self.dispatcher.close_writer().await;
        let status = self.process.reap(self.grace).await;

        if self.state.advance(SessionState::Closed) {
            info!("Session closed");
        }
        status
    }
}

/// The live half of a started session.
struct Link<W> {
    dispatcher: Arc<Dispatcher<W>>,
    teardown: Teardown<W>,
    backlog: Arc<Backlog>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<W> Link<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn spawn<R>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
        process: ProcessSlot,
        options: &SessionOptions,
        state: StateCell,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let dispatcher = Arc::new(Dispatcher::new(
            writer,
            state.clone(),
            options.request_timeout,
        ));
        let teardown = Teardown {
            dispatcher: Arc::clone(&dispatcher),
            process: Arc::new(process),
            state,
            grace: options.shutdown_grace,
        };
        let backlog = Arc::new(Backlog::new(options.unclaimed_backlog));

        let connection = Connection::new(
            Arc::clone(&dispatcher),
            teardown.clone(),
            Arc::clone(&backlog),
            options.malformed_policy,
        );
        let handle = tokio::spawn(connection::run(reader, connection));

        Self {
            dispatcher,
            teardown,
            backlog,
            reader: Mutex::new(Some(handle)),
        }
    }

    /// Wait for the reader to hit end of stream. If the server keeps its
    /// output open past `grace`, kill it, and give up on the reader if even
    /// that does not end it.
    async fn finish_reader(&self, grace: Duration) {
        let Some(mut handle) = self.reader.lock().await.take() else {
            return;
        };

        if timeout(grace, &mut handle).await.is_ok() {
            return;
        }

        warn!("Server output still open after {:?}, killing server", grace);
        self.teardown.process.start_kill().await;
        if timeout(grace, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

impl<W> Drop for Link<W> {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

/// A JSON-RPC session with one server.
///
/// Calls may be issued from several tasks at once; responses are matched to
/// their calls by id, in whatever order they arrive.
pub struct Session<W = ChildStdin> {
    options: SessionOptions,
    command: Option<ServerCommand>,
    state: StateCell,
    link: Option<Link<W>>,
}

impl Session<ChildStdin> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            options: config.options,
            command: Some(config.command),
            state: StateCell::new(SessionState::NotStarted),
            link: None,
        }
    }

    /// Create and start a session in one step.
    pub async fn launch(config: SessionConfig) -> Result<Self, ClientError> {
        let mut session = Self::new(config);
        session.start().await?;
        Ok(session)
    }

    /// Spawn the server process. Does nothing if it is already running.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        match self.state.get() {
            SessionState::NotStarted => {}
            SessionState::Running => return Ok(()),
            state => return Err(ClientError::SessionClosed(state)),
        }
        let Some(command) = &self.command else {
            return Err(ClientError::NotStarted);
        };

        let transport = ProcessTransport::start(command).await?;
        if let Some(pid) = transport.id() {
            info!("Server running with pid {}", pid);
        }
        let (reader, writer, process) = transport.into_parts();

        self.state.advance(SessionState::Running);
        self.link = Some(Link::spawn(
            reader,
            writer,
            process,
            &self.options,
            self.state.clone(),
        ));
        Ok(())
    }
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Run a session over an already connected pair of streams.
    pub fn from_streams<R>(reader: R, writer: W, options: SessionOptions) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let state = StateCell::new(SessionState::NotStarted);
        state.advance(SessionState::Running);
        let link = Link::spawn(
            FrameReader::new(reader),
            FrameWriter::new(writer),
            ProcessSlot::detached(),
            &options,
            state.clone(),
        );

        Self {
            options,
            command: None,
            state,
            link: Some(link),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Process id of the server, if there is a process behind this session.
    pub fn id(&self) -> Option<u32> {
        self.link
            .as_ref()
            .and_then(|link| link.teardown.process.id())
    }

    fn link(&self) -> Result<&Link<W>, ClientError> {
        self.link.as_ref().ok_or_else(|| self.state.refusal())
    }

    pub async fn call(&self, method: &str, params: Option<Params>) -> Result<Params, ClientError> {
        self.link()?.dispatcher.call(method, params).await
    }

    /// Like `call`, with a per-call deadline instead of the session default.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Params>,
        deadline: Option<Duration>,
    ) -> Result<Params, ClientError> {
        self.link()?
            .dispatcher
            .call_with_timeout(method, params, deadline)
            .await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.link()?.dispatcher.notify(method, params).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Params, ClientError> {
        let params = CallToolParams::new(name, arguments).into_params();
        self.call(tools::TOOLS_CALL, Some(params)).await
    }

    pub async fn list_tools(&self) -> Result<Params, ClientError> {
        self.call(tools::TOOLS_LIST, None).await
    }

    /// MCP handshake: `initialize`, then the `initialized` notification.
    pub async fn initialize(&self) -> Result<Params, ClientError> {
        let client = ClientInfo {
            name: self.options.client_name.clone(),
            version: self.options.client_version.clone(),
        };
        let params = tools::initialize_params(MCP_PROTOCOL_VERSION, &client);
        let result = self.call(tools::INITIALIZE, Some(params)).await?;

        if let Some(version) = result.get("protocolVersion") {
            info!("Server speaks MCP protocol {}", version);
        }
        self.notify(tools::INITIALIZED, None).await?;
        Ok(result)
    }

    /// Number of calls currently waiting for a response.
    pub async fn pending_calls(&self) -> usize {
        match &self.link {
            Some(link) => link.dispatcher.pending.len(),
            None => 0,
        }
    }

    /// Frames that no call claimed so far: notifications, server requests,
    /// responses to unknown ids and skipped malformed lines.
    pub async fn take_unclaimed(&self) -> Vec<String> {
        match &self.link {
            Some(link) => link.backlog.take().await,
            None => Vec::new(),
        }
    }

    pub async fn exit_status(&self) -> Option<ExitStatus> {
        match &self.link {
            Some(link) => link.teardown.process.exit_status().await,
            None => None,
        }
    }

    pub async fn wait_closed(&self) {
        self.state.wait_for(SessionState::Closed).await;
    }

    pub async fn close(&self) -> Result<Option<ExitStatus>, ClientError> {
        self.close_with_drain(&mut tokio::io::sink()).await
    }

    /// Close the server's input, wait for it to exit and copy whatever it
    /// wrote that no call claimed into `sink`, one frame per line.
    pub async fn close_with_drain<S>(&self, sink: &mut S) -> Result<Option<ExitStatus>, ClientError>
    where
        S: AsyncWrite + Unpin,
    {
        let Some(link) = &self.link else {
            self.state.advance(SessionState::Closed);
            return Ok(None);
        };

        if self.state.advance(SessionState::Closing) {
            info!("Closing session");
        }
        link.dispatcher.close_writer().await;
        link.finish_reader(self.options.shutdown_grace).await;
        let status = link.teardown.run().await;

        for frame in link.backlog.take().await {
            sink.write_all(frame.as_bytes())
                .await
                .map_err(ClientError::Transport)?;
            sink.write_all(b"\n").await.map_err(ClientError::Transport)?;
        }
        sink.flush().await.map_err(ClientError::Transport)?;

        Ok(status)
    }
}
