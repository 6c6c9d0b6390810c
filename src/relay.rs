//! Forwarding of child process output to the event channel.
//!
//! stdout is relayed chunk by chunk, stderr is gathered until the stream
//! ends, and the close event is only sent once both readers are done and
//! the child has been reaped.

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::Event;

const READ_BUFFER: usize = 8 * 1024;

/// Takes ownership of `child` and relays its streams and exit code.
pub fn relay_child(
    name: String,
    pid: u32,
    mut child: Child,
    tx: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let stdout_task = stdout.map(|reader| {
            tokio::spawn(forward_stdout(name.clone(), pid, reader, tx.clone()))
        });
        let stderr_task = stderr.map(|reader| {
            tokio::spawn(collect_stderr(name.clone(), pid, reader, tx.clone()))
        });
        if let Some(task) = stdout_task {
            let _ = task.await;
        }
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                tracing::warn!(%name, pid, error = %err, "failed to wait for process");
                None
            }
        };
        tracing::debug!(%name, pid, ?code, "process closed");
        let _ = tx.send(Event::Close { name, pid, code }).await;
    })
}

async fn forward_stdout<R>(name: String, pid: u32, mut reader: R, tx: mpsc::Sender<Event>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut decoder = Utf8Chunker::default();
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(%name, pid, error = %err, "stdout read failed");
                break;
            }
        };
        if let Some(chunk) = decoder.push(&buffer[..read]) {
            let event = Event::Stdout {
                name: name.clone(),
                pid,
                chunk,
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
    if let Some(chunk) = decoder.finish() {
        let _ = tx.send(Event::Stdout { name, pid, chunk }).await;
    }
}

async fn collect_stderr<R>(name: String, pid: u32, mut reader: R, tx: mpsc::Sender<Event>)
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    if let Err(err) = reader.read_to_end(&mut collected).await {
        tracing::debug!(%name, pid, error = %err, "stderr read failed");
    }
    let text = String::from_utf8_lossy(&collected).into_owned();
    if text.trim().is_empty() {
        return;
    }
    tracing::debug!(%name, pid, bytes = collected.len(), "forwarding stderr");
    let _ = tx.send(Event::Stderr { name, pid, text }).await;
}

/// Turns raw byte chunks into text without splitting multi-byte characters
/// across chunk boundaries.
#[derive(Debug, Default)]
struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let complete = self.pending.len() - incomplete_tail(&self.pending);
        if complete == 0 {
            return None;
        }
        let rest = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        Some(text)
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Length of a multi-byte sequence cut off at the end of `bytes`, or 0.
/// Invalid bytes earlier in the buffer do not matter here; they are replaced
/// when the complete part is decoded.
fn incomplete_tail(bytes: &[u8]) -> usize {
    // A UTF-8 sequence is at most four bytes, so only the last three can
    // belong to an unfinished one.
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return 0,
        };
        if needed <= back {
            return 0;
        }
        // Only hold the tail when it is a valid prefix so far.
        return match std::str::from_utf8(&bytes[bytes.len() - back..]) {
            Err(err) if err.valid_up_to() == 0 && err.error_len().is_none() => back,
            _ => 0,
        };
    }
    0
}
