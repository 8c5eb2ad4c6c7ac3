//! Ingestion gateway: hook producers write NDJSON events over a Unix socket.
//!
//! Each connection is read on its own task. Partial reads are buffered and split
//! on `\n`; a final unterminated frame is decoded at EOF. A bad line is logged and
//! dropped without closing the connection. Decoded events are forwarded to the
//! engine in the order they complete, waiting for channel capacity rather than
//! dropping anything already accepted.

use jacques_protocol::{decode_line, Decoded};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::engine::EngineHandle;

const READ_CHUNK_SIZE: usize = 4096;

/// Splits a byte stream into newline-terminated frames.
///
/// A frame longer than `max_line_bytes` is discarded up to its terminating
/// newline; the frames after it are unaffected.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    /// Feeds `bytes`, returning every frame it completed.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();

        while let Some(index) = bytes.iter().position(|b| *b == b'\n') {
            let (head, rest) = bytes.split_at(index);
            bytes = &rest[1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.buffer.len() + head.len() > self.max_line_bytes {
                warn!(limit = self.max_line_bytes, "Dropping oversized ingestion line");
                self.buffer.clear();
                continue;
            }
            self.buffer.extend_from_slice(head);
            frames.push(std::mem::take(&mut self.buffer));
        }

        if !self.discarding {
            if self.buffer.len() + bytes.len() > self.max_line_bytes {
                warn!(limit = self.max_line_bytes, "Dropping oversized ingestion line");
                self.buffer.clear();
                self.discarding = true;
            } else {
                self.buffer.extend_from_slice(bytes);
            }
        }

        frames
    }

    /// The unterminated tail left at EOF, if any.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.discarding || self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer)
        }
    }
}

pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        fs_err::remove_file(path)?;
    }
    UnixListener::bind(path)
}

pub async fn serve(
    listener: UnixListener,
    engine: EngineHandle,
    config: IngestConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
    let idle_timeout = config.idle_timeout();
    let max_line_bytes = config.max_line_bytes;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        warn!(error = %err, "Failed to accept ingestion connection");
                        continue;
                    }
                };

                let permit = match Arc::clone(&permits).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(limit = config.max_connections, "Ingestion connection limit reached; closing connection");
                        drop(stream);
                        continue;
                    }
                };

                let engine = engine.clone();
                tokio::spawn(async move {
                    handle_connection(stream, engine, idle_timeout, max_line_bytes).await;
                    drop(permit);
                });
            }
        }
    }
    info!("Ingestion gateway stopped");
}

async fn handle_connection(
    mut stream: UnixStream,
    engine: EngineHandle,
    idle_timeout: Duration,
    max_line_bytes: usize,
) {
    let mut lines = LineBuffer::new(max_line_bytes);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = match tokio::time::timeout(idle_timeout, stream.read(&mut chunk)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                debug!(error = %err, "Ingestion connection read failed");
                return;
            }
            Err(_) => {
                debug!(timeout_ms = idle_timeout.as_millis() as u64, "Ingestion connection idle; closing");
                return;
            }
        };

        for frame in lines.push(&chunk[..read]) {
            if !forward(&frame, &engine).await {
                return;
            }
        }
    }

    if let Some(frame) = lines.finish() {
        forward(&frame, &engine).await;
    }
}

/// Decodes and forwards one frame. Returns false once the engine is gone.
async fn forward(frame: &[u8], engine: &EngineHandle) -> bool {
    if frame.iter().all(u8::is_ascii_whitespace) {
        return true;
    }

    match decode_line(frame) {
        Ok(Decoded::Event(envelope)) => {
            debug!(
                kind = envelope.event.kind(),
                session_id = ?envelope.event.session_id(),
                "Received event"
            );
            engine.ingest(envelope).await.is_ok()
        }
        Ok(Decoded::Ignored { kind }) => {
            debug!(kind = %kind, "Ignoring event of unknown kind");
            true
        }
        Err(err) => {
            warn!(code = err.code(), error = %err, "Discarding malformed ingestion line");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(buffer: &mut LineBuffer, bytes: &[u8]) -> Vec<String> {
        buffer
            .push(bytes)
            .into_iter()
            .map(|f| String::from_utf8(f).unwrap())
            .collect()
    }

    #[test]
    fn frames_can_span_reads() {
        let mut buffer = LineBuffer::new(1024);
        assert!(frames(&mut buffer, b"{\"event\":").is_empty());
        assert_eq!(
            frames(&mut buffer, b"\"idle\"}\n{\"a\":1}\n{\"b\""),
            vec!["{\"event\":\"idle\"}", "{\"a\":1}"]
        );
        assert_eq!(buffer.finish(), Some(b"{\"b\"".to_vec()));
    }

    #[test]
    fn finish_is_empty_after_terminated_frame() {
        let mut buffer = LineBuffer::new(1024);
        assert_eq!(frames(&mut buffer, b"x\n"), vec!["x"]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn oversized_frame_is_skipped_without_losing_the_next() {
        let mut buffer = LineBuffer::new(8);
        assert!(frames(&mut buffer, b"0123456789").is_empty());
        assert!(frames(&mut buffer, b"abc").is_empty());
        assert_eq!(frames(&mut buffer, b"def\nok\n"), vec!["ok"]);

        let mut buffer = LineBuffer::new(4);
        assert_eq!(frames(&mut buffer, b"toolong\nok\n"), vec!["ok"]);
        assert_eq!(buffer.finish(), None);
    }

    #[tokio::test]
    async fn malformed_line_does_not_close_connection() {
        use crate::engine::Engine;

        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("ingest.sock");
        let listener = bind(&path).expect("bind");
        let (engine, _task) = Engine::new(8).spawn(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(
            listener,
            engine.clone(),
            IngestConfig::default(),
            shutdown_rx,
        ));

        let mut client = UnixStream::connect(&path).await.expect("connect");
        tokio::io::AsyncWriteExt::write_all(
            &mut client,
            b"{not json}\n{\"event\":\"session_start\",\"session_id\":\"S1\"}\n{\"event\":\"activity\",\"session_id\":\"S2\"}",
        )
        .await
        .expect("write");
        drop(client);

        let mut count = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            count = engine.snapshot().await.unwrap().sessions.len();
            if count == 2 {
                break;
            }
        }
        assert_eq!(count, 2);

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }

    async fn read_until_closed(stream: &mut UnixStream) -> usize {
        let mut buf = [0u8; 64];
        tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server closed the connection in time")
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn silent_connection_is_closed_after_idle_timeout() {
        use crate::engine::Engine;

        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("ingest.sock");
        let listener = bind(&path).expect("bind");
        let (engine, _task) = Engine::new(8).spawn(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = IngestConfig {
            idle_timeout_ms: 50,
            ..IngestConfig::default()
        };
        let server = tokio::spawn(serve(listener, engine, config, shutdown_rx));

        let mut client = UnixStream::connect(&path).await.expect("connect");
        assert_eq!(read_until_closed(&mut client).await, 0);

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connections_over_the_cap_are_closed_unread() {
        use crate::engine::Engine;
        use tokio::io::AsyncWriteExt;

        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("ingest.sock");
        let listener = bind(&path).expect("bind");
        let (engine, _task) = Engine::new(8).spawn(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = IngestConfig {
            max_connections: 1,
            ..IngestConfig::default()
        };
        let server = tokio::spawn(serve(listener, engine.clone(), config, shutdown_rx));

        let mut holder = UnixStream::connect(&path).await.expect("connect holder");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut extra = UnixStream::connect(&path).await.expect("connect extra");
        let _ = extra
            .write_all(b"{\"event\":\"session_start\",\"session_id\":\"extra\"}\n")
            .await;
        assert_eq!(read_until_closed(&mut extra).await, 0);
        assert!(engine.snapshot().await.unwrap().sessions.is_empty());

        holder
            .write_all(b"{\"event\":\"session_start\",\"session_id\":\"held\"}\n")
            .await
            .expect("write holder");
        drop(holder);

        let mut ids = Vec::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ids = engine
                .snapshot()
                .await
                .unwrap()
                .sessions
                .into_iter()
                .map(|session| session.session_id)
                .collect::<Vec<_>>();
            if !ids.is_empty() {
                break;
            }
        }
        assert_eq!(ids, vec!["held".to_string()]);

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
