//! Per-transfer payload and response buffers.

/// Initial capacity of a response buffer; it doubles as data arrives.
pub const RESPONSE_BUFFER_DEFAULT_SIZE: usize = 1024;

/// Bytes to send plus a send cursor. Replaying restarts the cursor at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    bytes: Vec<u8>,
    cursor: usize,
}

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy the next chunk into `out` and advance the cursor. Returns 0 once
    /// everything has been sent.
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        let n = self.remaining().min(out.len());
        out[..n].copy_from_slice(&self.bytes[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Move the cursor to `pos`; fails past the end.
    pub fn seek(&mut self, pos: usize) -> bool {
        if pos > self.bytes.len() {
            return false;
        }
        self.cursor = pos;
        true
    }
}

/// Growable response accumulator owned by exactly one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBuffer {
    data: Vec<u8>,
}

impl Default for ResponseBuffer {
    fn default() -> Self {
        Self {
            data: Vec::with_capacity(RESPONSE_BUFFER_DEFAULT_SIZE),
        }
    }
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes, doubling capacity until they fit.
    pub fn append(&mut self, chunk: &[u8]) {
        let needed = self.data.len() + chunk.len();
        if needed > self.data.capacity() {
            let mut cap = self.data.capacity().max(RESPONSE_BUFFER_DEFAULT_SIZE);
            while cap < needed {
                cap *= 2;
            }
            self.data.reserve_exact(cap - self.data.len());
        }
        self.data.extend_from_slice(chunk);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop whatever a previous attempt wrote; capacity is kept.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Move the bytes out, leaving a fresh empty buffer.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}
