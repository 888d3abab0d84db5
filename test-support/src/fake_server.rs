use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::{
    io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines},
    time::timeout,
};

use crate::timeouts;

/// Size of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// The client's side of an in-memory server: read responses from `reader`,
/// write requests to `writer`.
pub struct ClientEnds {
    pub reader: DuplexStream,
    pub writer: DuplexStream,
}

/// A scripted server on the other end of in-memory pipes.
pub struct FakeServer {
    requests: Option<Lines<BufReader<DuplexStream>>>,
    responses: DuplexStream,
}

/// Create a connected client/server pair.
pub fn fake_server() -> (ClientEnds, FakeServer) {
    let (client_writer, server_reader) = duplex(PIPE_CAPACITY);
    let (server_writer, client_reader) = duplex(PIPE_CAPACITY);

    (
        ClientEnds {
            reader: client_reader,
            writer: client_writer,
        },
        FakeServer {
            requests: Some(BufReader::new(server_reader).lines()),
            responses: server_writer,
        },
    )
}

impl FakeServer {
    /// Next frame from the client, or `None` once the client closed its side.
    pub async fn next_frame(&mut self) -> Result<Option<Value>> {
        timeout(timeouts::frame_wait(), self.read_frame())
            .await
            .map_err(|_| anyhow!("timed out waiting for a client frame"))?
    }

    async fn read_frame(&mut self) -> Result<Option<Value>> {
        let Some(requests) = self.requests.as_mut() else {
            return Ok(None);
        };
        match requests.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }

    /// Next frame from the client, which must exist.
    pub async fn next_request(&mut self) -> Result<Value> {
        self.next_frame()
            .await?
            .ok_or_else(|| anyhow!("client closed its side"))
    }

    /// Read `count` requests and return their ids in arrival order.
    pub async fn collect_ids(&mut self, count: usize) -> Result<Vec<u64>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let request = self.next_request().await?;
            let id = request["id"]
                .as_u64()
                .ok_or_else(|| anyhow!("request without id: {}", request))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Write a line exactly as given (a newline is appended).
    pub async fn send_raw(&mut self, line: &str) -> Result<()> {
        self.responses.write_all(line.as_bytes()).await?;
        self.responses.write_all(b"\n").await?;
        self.responses.flush().await?;
        Ok(())
    }

    /// Write bytes exactly as given, with no newline added.
    pub async fn send_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.responses.write_all(bytes).await?;
        self.responses.flush().await?;
        Ok(())
    }

    pub async fn send(&mut self, frame: &Value) -> Result<()> {
        self.send_raw(&serde_json::to_string(frame)?).await
    }

    pub async fn respond(&mut self, id: u64, result: Value) -> Result<()> {
        self.send(&json!({"jsonrpc": "2.0", "result": result, "id": id}))
            .await
    }

    pub async fn respond_error(&mut self, id: u64, code: i64, message: &str) -> Result<()> {
        self.send(&json!({
            "jsonrpc": "2.0",
            "error": {"code": code, "message": message},
            "id": id
        }))
        .await
    }

    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    /// Answer every request with its own method and params until the client
    /// closes its side, however long that takes. Returns how many requests
    /// were answered.
    pub async fn serve_echo(mut self) -> Result<usize> {
        let mut answered = 0;
        while let Some(frame) = self.read_frame().await? {
            let Some(id) = frame["id"].as_u64() else {
                continue; // notification
            };
            let (method, params) = (frame["method"].clone(), frame["params"].clone());
            let result = json!({ "method": method, "params": params });
            self.respond(id, result).await?;
            answered += 1;
        }
        Ok(answered)
    }

    /// Close only the server's input; its output stays open.
    pub fn stop_reading(&mut self) {
        self.requests = None;
    }

    /// Close both directions, as a crashing server would.
    pub fn hang_up(self) {
        drop(self);
    }
}
