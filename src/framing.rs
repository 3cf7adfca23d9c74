//! Line framing for the text channels.
//!
//! The gateway terminates every message on the control and query sockets with
//! `\r\n`. Reads can end anywhere, including between the two terminator bytes,
//! so the framer keeps the unterminated tail until the next read.

use bytes::{Buf, BytesMut};

pub const TERMINATOR: &[u8] = b"\r\n";

#[derive(Debug, Default)]
pub struct LineFramer {
    pending: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every message completed by them, oldest
    /// first. Invalid UTF-8 is replaced rather than rejected.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        // A terminator may straddle the previous tail, so rescan one byte back.
        let mut scan_from = self.pending.len().saturating_sub(TERMINATOR.len() - 1);
        self.pending.extend_from_slice(bytes);

        let mut messages = Vec::new();
        while let Some(offset) = find_terminator(&self.pending[scan_from..]) {
            let line = self.pending.split_to(scan_from + offset);
            self.pending.advance(TERMINATOR.len());
            messages.push(String::from_utf8_lossy(&line).into_owned());
            scan_from = 0;
        }
        messages
    }

    /// Bytes received after the last terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops the unterminated tail, returning how many bytes were lost.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

/// Encodes a command for the wire.
pub fn encode_line(command: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(command.len() + TERMINATOR.len());
    line.extend_from_slice(command.as_bytes());
    line.extend_from_slice(TERMINATOR);
    line
}
