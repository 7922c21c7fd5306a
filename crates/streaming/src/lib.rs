// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # streaming
//!
//! Bounded single-producer/single-consumer result streams for the serving
//! workload manager.
//!
//! A stream is created as a connected pair: the [`ChunkPublisher`] rides
//! inside the job to the worker that executes it, the [`StreamingResult`]
//! goes back to the caller. Chunks arrive in production order with an
//! explicit terminal flag; there are no hidden listener lists.
//!
//! - `publish(chunk, last)` — non-blocking up to the channel bound, then
//!   bounded retries; drops with `Backpressure` only once the consumer has
//!   failed to drain past the watermark.
//! - `next(timeout)` — chunk, `None` at end of stream, `Timeout`, or the
//!   forwarded failure.
//! - `cancel()` — idempotent; the producer observes it at the next chunk
//!   boundary. A consumer timeout never cancels by itself.

mod error;
mod result;

pub use error::StreamError;
pub use result::{channel, CancelHandle, Chunk, ChunkPublisher, StreamConfig, StreamingResult};
