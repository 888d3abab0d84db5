use log::{debug, error, info, warn};
use std::{collections::VecDeque, ops::ControlFlow, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};

use super::{dispatcher::Dispatcher, session::Teardown, state::SessionState};
use crate::{
    config::MalformedPolicy,
    error::ClientError,
    protocol::{codec, Incoming, MalformedMessage},
    transport::FrameReader,
};

/// Frames nobody asked for, kept until the caller takes or drains them.
/// The oldest frame is dropped when full.
pub(crate) struct Backlog {
    frames: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Backlog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    async fn push(&self, frame: String) {
        if self.capacity == 0 {
            return;
        }
        let mut frames = self.frames.lock().await;
        if frames.len() >= self.capacity {
            frames.pop_front();
            debug!("Unclaimed backlog full, dropped oldest frame");
        }
        frames.push_back(frame);
    }

    pub(crate) async fn take(&self) -> Vec<String> {
        self.frames.lock().await.drain(..).collect()
    }
}

/// Routes everything the server writes: responses to their pending calls,
/// the rest to the backlog.
pub(crate) struct Connection<W> {
    dispatcher: Arc<Dispatcher<W>>,
    teardown: Teardown<W>,
    backlog: Arc<Backlog>,
    policy: MalformedPolicy,
}

impl<W: AsyncWrite + Unpin + Send> Connection<W> {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher<W>>,
        teardown: Teardown<W>,
        backlog: Arc<Backlog>,
        policy: MalformedPolicy,
    ) -> Self {
        Self {
            dispatcher,
            teardown,
            backlog,
            policy,
        }
    }

    async fn handle_frame(&self, frame: String) -> ControlFlow<()> {
        debug!("Received frame: {}", frame);

        match codec::decode_incoming(&frame) {
            Ok(Incoming::Response(response)) => {
                let id = response.id;
                match self.dispatcher.pending.take(id) {
                    Some(slot) => {
                        if slot.send(Ok(response)).is_err() {
                            debug!("Caller for request {} is gone, dropping response", id);
                        }
                    }
                    None => {
                        warn!("Discarding response for unknown request id {}", id);
                        self.backlog.push(frame).await;
                    }
                }
            }
            Ok(Incoming::Notification(notification)) => {
                debug!("Received notification: {}", notification.method);
                self.backlog.push(frame).await;
            }
            Ok(Incoming::ServerRequest(request)) => {
                warn!(
                    "Ignoring request {} from server: {}",
                    request.id, request.method
                );
                self.backlog.push(frame).await;
            }
            Err(err) => return self.handle_malformed(err, frame).await,
        }

        ControlFlow::Continue(())
    }

    async fn handle_malformed(
        &self,
        err: MalformedMessage,
        frame: String,
    ) -> ControlFlow<()> {
        match self.policy {
            MalformedPolicy::Skip => {
                warn!("Skipping malformed frame ({}): {}", err, err.excerpt);
                match err.id {
                    Some(id) => {
                        if let Some(slot) = self.dispatcher.pending.take(id) {
                            let _ = slot.send(Err(ClientError::Malformed(err)));
                            return ControlFlow::Continue(());
                        }
                    }
                    None => {
                        // Any waiting call may have been the intended recipient.
                        let failed = self
                            .dispatcher
                            .pending
                            .fail_pending(|| ClientError::Malformed(err.clone()));
                        if failed > 0 {
                            warn!(
                                "Failed {} pending request(s) on unattributable frame",
                                failed
                            );
                            return ControlFlow::Continue(());
                        }
                    }
                }
                self.backlog.push(frame).await;
                ControlFlow::Continue(())
            }
            MalformedPolicy::FailFast => {
                error!("Malformed frame, closing session ({}): {}", err, err.excerpt);
                self.teardown.state().advance(SessionState::Closing);
                let failed = self
                    .dispatcher
                    .pending
                    .fail_all(|| ClientError::Malformed(err.clone()));
                if failed > 0 {
                    warn!("Failed {} pending request(s)", failed);
                }
                ControlFlow::Break(())
            }
        }
    }

    async fn handle_read_error(&self, err: ClientError) -> ControlFlow<()> {
        match err {
            ClientError::Malformed(malformed) => {
                // Undecodable bytes only survive as their lossy excerpt.
                let frame = malformed.excerpt.clone();
                self.handle_malformed(malformed, frame).await
            }
            ClientError::Eof => {
                info!("Server closed its output stream");
                ControlFlow::Break(())
            }
            ClientError::Transport(e) => {
                error!("Error reading from server: {}", e);
                self.teardown.state().advance(SessionState::Closing);
                self.dispatcher
                    .pending
                    .fail_all(|| ClientError::transport_like(&e));
                ControlFlow::Break(())
            }
            other => {
                error!("Unexpected error reading from server: {}", other);
                ControlFlow::Break(())
            }
        }
    }
}

/// Read frames until the stream ends or a fatal error, then tear the session down.
pub(crate) async fn run<R, W>(mut reader: FrameReader<R>, connection: Connection<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let flow = match reader.read_frame().await {
            Ok(frame) => connection.handle_frame(frame).await,
            Err(err) => connection.handle_read_error(err).await,
        };
        if flow.is_break() {
            break;
        }
    }

    drop(reader);
    connection.teardown.run().await;
}
