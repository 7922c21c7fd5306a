// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The result stream: a bounded SPSC chunk channel.
//!
//! The producer side ([`ChunkPublisher`]) lives on a worker thread and
//! publishes chunks with blocking retries bounded by the backpressure
//! watermark. The consumer side ([`StreamingResult`]) is async and pulls
//! chunks with per-call timeouts. Terminal is terminal: after a
//! `last = true` publish (or a failure), further publishes are discarded.
//!
//! Cancellation flows consumer → producer through shared state; the
//! producer observes it at the next publish boundary. A consumer timeout
//! never cancels by itself.

use crate::StreamError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One output chunk delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk payload.
    pub data: Vec<u8>,
    /// Terminal chunk of the stream.
    pub last: bool,
}

/// Tuning knobs for a result stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Channel bound: how many chunks may be in flight.
    pub capacity: usize,
    /// How long the consumer may fail to drain before a full-channel
    /// publish drops the chunk with [`StreamError::Backpressure`].
    pub watermark: Duration,
    /// Producer retry interval while the channel is full.
    pub retry_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            watermark: Duration::from_secs(10),
            retry_interval: Duration::from_millis(20),
        }
    }
}

enum Item {
    Chunk(Chunk),
    Failed(String),
}

struct Shared {
    cancelled: AtomicBool,
    /// Last time the consumer asked for a chunk.
    last_drain: Mutex<Instant>,
}

impl Shared {
    fn stalled_for(&self) -> Duration {
        self.last_drain
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    fn touch(&self) {
        *self.last_drain.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

/// Creates a connected publisher/result pair.
pub fn channel(config: StreamConfig) -> (ChunkPublisher, StreamingResult) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let shared = Arc::new(Shared {
        cancelled: AtomicBool::new(false),
        last_drain: Mutex::new(Instant::now()),
    });
    (
        ChunkPublisher {
            tx,
            shared: Arc::clone(&shared),
            config,
            done: false,
        },
        StreamingResult {
            rx,
            shared,
            finished: false,
        },
    )
}

/// Producer half of a result stream. Held by the job, driven by the
/// worker that executes it.
pub struct ChunkPublisher {
    tx: mpsc::Sender<Item>,
    shared: Arc<Shared>,
    config: StreamConfig,
    done: bool,
}

impl ChunkPublisher {
    /// Returns `true` once the consumer has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` after a terminal publish or failure.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Publishes a chunk; `last = true` terminates the stream.
    ///
    /// Blocks with bounded retries while the channel is full. Publishes
    /// after the terminal chunk are discarded and return `Ok`.
    pub fn publish(&mut self, data: Vec<u8>, last: bool) -> Result<(), StreamError> {
        self.send(Item::Chunk(Chunk { data, last }), last)
    }

    /// Terminates the stream with a failure the consumer will observe.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), StreamError> {
        self.send(Item::Failed(message.into()), true)
    }

    fn send(&mut self, item: Item, terminal: bool) -> Result<(), StreamError> {
        if self.done {
            // Terminal is terminal.
            return Ok(());
        }
        if self.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let mut item = item;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    if terminal {
                        self.done = true;
                    }
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Consumer side is gone entirely.
                    return Err(StreamError::Cancelled);
                }
                Err(mpsc::error::TrySendError::Full(back)) => {
                    if self.shared.stalled_for() >= self.config.watermark {
                        tracing::warn!(
                            watermark_ms = self.config.watermark.as_millis() as u64,
                            "dropping chunk: consumer stalled beyond watermark"
                        );
                        return Err(StreamError::Backpressure {
                            watermark: self.config.watermark,
                        });
                    }
                    if self.is_cancelled() {
                        return Err(StreamError::Cancelled);
                    }
                    item = back;
                    std::thread::sleep(self.config.retry_interval);
                }
            }
        }
    }
}

impl fmt::Debug for ChunkPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkPublisher")
            .field("done", &self.done)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A clonable handle that can cancel a stream from another task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Cancels the stream; idempotent.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }
}

/// Consumer half of a result stream: a lazy, finite sequence of chunks.
pub struct StreamingResult {
    rx: mpsc::Receiver<Item>,
    shared: Arc<Shared>,
    finished: bool,
}

impl StreamingResult {
    /// Pulls the next chunk.
    ///
    /// Returns `Ok(Some(chunk))` for each chunk in production order,
    /// `Ok(None)` at the end of the stream (terminal chunk already
    /// delivered, or the stream was cancelled), `Err(Timeout)` if no
    /// chunk arrived in time (the producer keeps running), or the
    /// forwarded failure.
    pub async fn next(&mut self, timeout: Duration) -> Result<Option<Chunk>, StreamError> {
        if self.finished || self.is_cancelled() {
            return Ok(None);
        }
        self.shared.touch();

        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_elapsed) => Err(StreamError::Timeout { waited: timeout }),
            Ok(None) => {
                self.finished = true;
                Err(StreamError::Interrupted)
            }
            Ok(Some(Item::Chunk(chunk))) => {
                self.shared.touch();
                if chunk.last {
                    self.finished = true;
                }
                Ok(Some(chunk))
            }
            Ok(Some(Item::Failed(message))) => {
                self.finished = true;
                Err(StreamError::Failed(message))
            }
        }
    }

    /// Cancels the stream; idempotent. Subsequent publishes are
    /// discarded; the producer observes cancellation at the next chunk
    /// boundary.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    /// A handle for cancelling from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns `true` once the terminal chunk or failure was delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns `true` if the stream was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Convenience: concatenates every remaining chunk, bounding each
    /// wait by `per_chunk`.
    pub async fn drain(&mut self, per_chunk: Duration) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next(per_chunk).await? {
            out.extend_from_slice(&chunk.data);
            if chunk.last {
                break;
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for StreamingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResult")
            .field("finished", &self.finished)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
