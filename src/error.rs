use serde_json::Value;
use std::{io, time::Duration};
use thiserror::Error;

use crate::{protocol::MalformedMessage, rpc::SessionState};

/// Everything that can go wrong between a caller and the server process.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server executable could not be resolved or spawned.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// I/O failure on an open stream.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// The server closed its output stream.
    #[error("end of stream")]
    Eof,

    /// A frame could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The transport went away while the call was pending.
    #[error("transport closed before a response arrived")]
    TransportClosed,

    /// The call was issued after the session started shutting down.
    #[error("session is {0}")]
    SessionClosed(SessionState),

    #[error("session has not been started")]
    NotStarted,

    #[error("request {id} timed out after {after:?}")]
    Timeout { id: u64, after: Duration },

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ClientError {
    pub(crate) fn launch(program: impl Into<String>, source: io::Error) -> Self {
        Self::Launch {
            program: program.into(),
            source,
        }
    }

    pub(crate) fn closed_input() -> Self {
        Self::Transport(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "server input stream is closed",
        ))
    }

    /// A fresh copy of a transport failure, for fanning out to several callers.
    pub(crate) fn transport_like(err: &io::Error) -> Self {
        Self::Transport(io::Error::new(err.kind(), err.to_string()))
    }

    /// True for errors that mean the session can no longer carry requests.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Launch { .. }
                | Self::Transport(_)
                | Self::Eof
                | Self::TransportClosed
                | Self::SessionClosed(_)
        )
    }
}
