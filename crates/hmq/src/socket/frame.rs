// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefix framing for the framed endpoint.
//!
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | Frame body        |
//! +----------------+-------------------+
//! ```
//!
//! The reader thread pushes whatever bytes the stream yields into a
//! [`FrameDecoder`] and drains complete frames from it; partial headers and
//! bodies stay buffered across reads.

use crate::{Error, Result};

/// Frame header size (4 bytes for length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Encode `payload` as `[len: u32 BE][payload]`.
pub fn encode(payload: &[u8], max_size: usize) -> Result<Vec<u8>> {
    if payload.len() > max_size || u32::try_from(payload.len()).is_err() {
        return Err(Error::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Waiting for the 4-byte length header
    Header,
    /// Waiting for `len` body bytes
    Body { len: usize },
}

/// Incremental length-prefix decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    state: ReadState,
    buffer: Vec<u8>,
    /// Read offset into `buffer`
    pos: usize,
    max_size: usize,
    frames_decoded: u64,
}

impl FrameDecoder {
    /// Decoder rejecting frames above `max_size` (anti-OOM protection).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            state: ReadState::Header,
            buffer: Vec::with_capacity(4096),
            pos: 0,
            max_size,
            frames_decoded: 0,
        }
    }

    /// Append bytes read from the stream.
    pub fn feed(&mut self, bytes: &[u8]) {
        // Compact consumed prefix before growing.
        if self.pos > 0 && self.pos == self.buffer.len() {
            self.buffer.clear();
            self.pos = 0;
        } else if self.pos > 4096 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if any.
    ///
    /// Fails with `FrameTooLarge` when a header announces more than the
    /// configured maximum; the stream is unusable afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let available = self.buffer.len() - self.pos;
            match self.state {
                ReadState::Header => {
                    if available < FRAME_HEADER_SIZE {
                        return Ok(None);
                    }
                    let header = &self.buffer[self.pos..self.pos + FRAME_HEADER_SIZE];
                    let len =
                        u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
                    if len > self.max_size {
                        return Err(Error::FrameTooLarge(len));
                    }
                    self.pos += FRAME_HEADER_SIZE;
                    self.state = ReadState::Body { len };
                }
                ReadState::Body { len } => {
                    if available < len {
                        return Ok(None);
                    }
                    let frame = self.buffer[self.pos..self.pos + len].to_vec();
                    self.pos += len;
                    self.state = ReadState::Header;
                    self.frames_decoded += 1;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Bytes buffered but not yet returned as a frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() - self.pos
    }

    /// Number of frames decoded so far.
    #[must_use]
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}
