// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for result streams.

use std::time::Duration;

/// Errors on either side of a result stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The consumer waited longer than its timeout for the next chunk.
    /// Does not cancel the producer.
    #[error("timed out after {waited:?} waiting for the next chunk")]
    Timeout { waited: Duration },

    /// The consumer failed to drain for longer than the watermark; the
    /// chunk was dropped.
    #[error("consumer stalled beyond the backpressure watermark ({watermark:?})")]
    Backpressure { watermark: Duration },

    /// The consumer cancelled the stream.
    #[error("stream cancelled by the consumer")]
    Cancelled,

    /// The producer vanished without publishing a terminal chunk.
    #[error("producer dropped before the terminal chunk")]
    Interrupted,

    /// The producer reported a terminal failure.
    #[error("{0}")]
    Failed(String),
}
