use log::{debug, warn};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex as SyncMutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::{
    io::AsyncWrite,
    sync::{oneshot, Mutex},
    time::timeout,
};

use super::state::{SessionState, StateCell};
use crate::{
    error::ClientError,
    protocol::{codec, Notification, Params, Request, Response},
    transport::FrameWriter,
};

type Slot = oneshot::Sender<Result<Response, ClientError>>;
type SlotReceiver = oneshot::Receiver<Result<Response, ClientError>>;

/// Calls waiting for their response, keyed by request id.
///
/// The lock is never held across an await, so a dropped call can clear its
/// slot synchronously.
pub(crate) struct PendingTable {
    inner: SyncMutex<PendingInner>,
}

struct PendingInner {
    slots: HashMap<u64, Slot>,
    closed: bool,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: SyncMutex::new(PendingInner {
                slots: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refused once the table has been failed by a teardown.
    fn register(&self, id: u64) -> Result<(PendingCall<'_>, SlotReceiver), ClientError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ClientError::TransportClosed);
        }
        let (tx, rx) = oneshot::channel();
        inner.slots.insert(id, tx);
        Ok((PendingCall { table: self, id }, rx))
    }

    pub(crate) fn take(&self, id: u64) -> Option<Slot> {
        self.lock().slots.remove(&id)
    }

    /// Resolve every outstanding call with an error and refuse new ones.
    pub(crate) fn fail_all(&self, make_error: impl Fn() -> ClientError) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        Self::fail_slots(&mut inner, make_error)
    }

    /// Resolve every outstanding call with an error; new calls are still
    /// accepted.
    pub(crate) fn fail_pending(&self, make_error: impl Fn() -> ClientError) -> usize {
        Self::fail_slots(&mut self.lock(), make_error)
    }

    fn fail_slots(inner: &mut PendingInner, make_error: impl Fn() -> ClientError) -> usize {
        let count = inner.slots.len();
        for (_, slot) in inner.slots.drain() {
            let _ = slot.send(Err(make_error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().slots.len()
    }
}

/// A registered slot. Dropping it, whether the call finished, timed out or
/// was cancelled by its caller, removes the slot from the table.
struct PendingCall<'a> {
    table: &'a PendingTable,
    id: u64,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        // Ids are never reused, so this cannot remove another call's slot.
        self.table.take(self.id);
    }
}

/// Assigns ids, writes requests and waits for the reader to resolve them.
pub(crate) struct Dispatcher<W> {
    next_id: AtomicU64,
    writer: Mutex<Option<FrameWriter<W>>>,
    pub(crate) pending: PendingTable,
    state: StateCell,
    request_timeout: Option<Duration>,
}

impl<W: AsyncWrite + Unpin + Send> Dispatcher<W> {
    pub(crate) fn new(
        writer: FrameWriter<W>,
        state: StateCell,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            writer: Mutex::new(Some(writer)),
            pending: PendingTable::new(),
            state,
            request_timeout,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn call(
        &self,
        method: &str,
        params: Option<Params>,
    ) -> Result<Params, ClientError> {
        self.call_with_timeout(method, params, self.request_timeout)
            .await
    }

    pub(crate) async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Params>,
        deadline: Option<Duration>,
    ) -> Result<Params, ClientError> {
        self.state.ensure_running()?;

        let id = self.next_id();
        let frame = codec::encode(&Request::new(id, method, params))?;
        let (call, rx) = self.pending.register(id)?;

        if let Err(e) = self.write_frame(&frame).await {
            drop(call);
            self.fail_after_write_error(&e);
            return Err(e);
        }
        debug!("Sent request {}: {}", id, method);

        let outcome = match deadline {
            Some(limit) => match timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // Dropping `call` frees the slot; a late response finds
                    // nothing and is set aside as unclaimed.
                    warn!("Request {} ({}) timed out after {:?}", id, method, limit);
                    return Err(ClientError::Timeout { id, after: limit });
                }
            },
            None => rx.await,
        };

        let response = outcome.map_err(|_| ClientError::TransportClosed)??;
        response.into_result()
    }

    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        self.state.ensure_running()?;

        let frame = codec::encode_notification(&Notification::new(method, params))?;
        if let Err(e) = self.write_frame(&frame).await {
            self.fail_after_write_error(&e);
            return Err(e);
        }
        debug!("Sent notification: {}", method);
        Ok(())
    }

    /// The server's input is gone, so nothing pending can be answered
    /// reliably any more.
    fn fail_after_write_error(&self, err: &ClientError) {
        self.state.advance(SessionState::Closing);
        let failed = self.pending.fail_all(|| match err {
            ClientError::Transport(e) => ClientError::transport_like(e),
            _ => ClientError::TransportClosed,
        });
        warn!(
            "Write to server failed ({}), failed {} pending request(s)",
            err, failed
        );
    }

    async fn write_frame(&self, frame: &str) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(ClientError::closed_input());
        };
        writer.write_line(frame).await
    }

    /// Close the server's input. Idempotent.
    pub(crate) async fn close_writer(&self) {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        if let Err(e) = writer.close().await {
            debug!("Error closing server input: {}", e);
        }
    }
}
