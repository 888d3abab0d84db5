use log::{debug, error, info, warn};
use std::{
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::{
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::Mutex,
    time::timeout,
};

use super::{FrameReader, FrameWriter};
use crate::{config::ServerCommand, error::ClientError};

/// A spawned server process with its stdin/stdout as a line transport.
pub struct ProcessTransport {
    reader: FrameReader<ChildStdout>,
    writer: FrameWriter<ChildStdin>,
    process: ProcessSlot,
}

impl ProcessTransport {
    pub async fn start(command: &ServerCommand) -> Result<Self, ClientError> {
        let program = resolve_program(&command.program)?;
        let display = program.display().to_string();
        info!(
            "Starting server {} with args {:?} and env overrides {:?}",
            display,
            command.args,
            command.env_keys()
        );

        let mut cmd = Command::new(&program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::launch(display.clone(), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::launch(display.clone(), missing_pipe("stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::launch(display.clone(), missing_pipe("stdout")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClientError::launch(display.clone(), missing_pipe("stderr")))?;

        tokio::spawn(log_stderr(stderr, display));

        Ok(Self {
            reader: FrameReader::new(stdout),
            writer: FrameWriter::new(stdin),
            process: ProcessSlot::new(child),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.process.id()
    }

    pub async fn write_line(&mut self, frame: &str) -> Result<(), ClientError> {
        self.writer.write_line(frame).await
    }

    pub async fn read_line(&mut self) -> Result<String, ClientError> {
        self.reader.read_frame().await
    }

    /// Close the server's input and wait for it to exit, killing it once
    /// `grace` has passed.
    pub async fn close(self, grace: Duration) -> Result<Option<ExitStatus>, ClientError> {
        let Self {
            reader,
            mut writer,
            process,
        } = self;

        if let Err(e) = writer.close().await {
            debug!("Error closing server input: {}", e);
        }
        drop(writer);
        drop(reader);

        Ok(process.reap(grace).await)
    }

    pub fn into_parts(
        self,
    ) -> (
        FrameReader<ChildStdout>,
        FrameWriter<ChildStdin>,
        ProcessSlot,
    ) {
        (self.reader, self.writer, self.process)
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("failed to capture {}", name))
}

/// Bare names are looked up on `PATH`; anything with a directory part is used as is.
fn resolve_program(program: &Path) -> Result<PathBuf, ClientError> {
    if program.is_absolute() || program.components().count() > 1 {
        return Ok(program.to_path_buf());
    }

    which::which(program).map_err(|e| {
        ClientError::launch(
            program.display().to_string(),
            io::Error::new(io::ErrorKind::NotFound, e.to_string()),
        )
    })
}

/// Longest stderr line that is logged in full.
const STDERR_LINE_CHARS: usize = 1_000;

/// Forward the server's stderr to the log, one line per record.
async fn log_stderr(stderr: ChildStderr, program: String) {
    let mut lines = FrameReader::new(stderr);

    loop {
        let line = match lines.read_frame().await {
            Ok(line) => line,
            Err(ClientError::Malformed(err)) => err.excerpt,
            Err(ClientError::Eof) => break,
            Err(e) => {
                error!("Error reading {} stderr: {}", program, e);
                break;
            }
        };

        debug!("{} stderr: {}", program, clip_stderr_line(&line));
    }
}

/// Trailing whitespace removed, cut to `STDERR_LINE_CHARS` with a note of
/// how much was left out.
fn clip_stderr_line(line: &str) -> String {
    let line = line.trim_end();
    let chars = line.chars().count();
    if chars <= STDERR_LINE_CHARS {
        return line.to_string();
    }

    let head: String = line.chars().take(STDERR_LINE_CHARS).collect();
    format!("{} [{} more chars]", head, chars - STDERR_LINE_CHARS)
}

/// Owns the child process handle and reaps it exactly once.
pub struct ProcessSlot {
    child: Mutex<Option<Child>>,
    exit: Mutex<Option<ExitStatus>>,
    pid: Option<u32>,
}

impl ProcessSlot {
    pub(crate) fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Mutex::new(Some(child)),
            exit: Mutex::new(None),
            pid,
        }
    }

    /// A slot with no process behind it, for sessions over plain streams.
    pub(crate) fn detached() -> Self {
        Self {
            child: Mutex::new(None),
            exit: Mutex::new(None),
            pid: None,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub async fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit.lock().await
    }

    /// Ask the process to die without waiting for it.
    pub async fn start_kill(&self) {
        if let Some(child) = self.child.lock().await.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill server process: {}", e);
            }
        }
    }

    /// Wait for the process to exit, killing it after `grace`.
    ///
    /// Later calls return the status recorded by the first one.
    pub async fn reap(&self, grace: Duration) -> Option<ExitStatus> {
        let mut slot = self.child.lock().await;
        let Some(mut child) = slot.take() else {
            return *self.exit.lock().await;
        };

        let status = match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                error!("Failed to wait for server process: {}", e);
                None
            }
            Err(_) => {
                warn!("Server did not exit within {:?}, killing it", grace);
                match child.kill().await {
                    Ok(()) => child.wait().await.ok(),
                    Err(e) => {
                        error!("Failed to kill server process: {}", e);
                        None
                    }
                }
            }
        };

        if let Some(status) = status {
            info!("Server process exited with {}", status);
        }
        *self.exit.lock().await = status;
        status
    }
}
