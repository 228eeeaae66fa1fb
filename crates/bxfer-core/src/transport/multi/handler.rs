//! Easy2 Handler for a single transfer in the curl multi backend.
//! Streams the payload out of its send cursor and collects the response body.

use std::io::SeekFrom;
use std::str;

use curl::easy::{Handler, ReadError, SeekResult, WriteError};

use crate::transfer::{Payload, ResponseBuffer};

/// Buffers of one transfer while libcurl drives it.
#[derive(Debug, Default)]
pub struct TransferHandler {
    payload: Payload,
    response: ResponseBuffer,
    response_headers: Vec<String>,
}

impl TransferHandler {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            response: ResponseBuffer::new(),
            response_headers: Vec::new(),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn response(&self) -> &ResponseBuffer {
        &self.response
    }

    /// Header lines of the final response (earlier 1xx/redirect blocks are dropped).
    pub fn response_headers(&self) -> &[String] {
        &self.response_headers
    }

    pub(super) fn rewind(&mut self) {
        self.payload.rewind();
        self.response.clear();
        self.response_headers.clear();
    }

    pub(super) fn take_response(&mut self) -> Vec<u8> {
        self.response.take()
    }
}

impl Handler for TransferHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.response_headers.clear();
            }
            if !line.is_empty() {
                self.response_headers.push(line.to_string());
            }
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.response.append(data);
        Ok(data.len())
    }

    fn read(&mut self, data: &mut [u8]) -> Result<usize, ReadError> {
        Ok(self.payload.fill(data))
    }

    fn seek(&mut self, whence: SeekFrom) -> SeekResult {
        match whence {
            SeekFrom::Start(pos) => match usize::try_from(pos) {
                Ok(pos) if self.payload.seek(pos) => SeekResult::Ok,
                _ => SeekResult::Fail,
            },
            _ => SeekResult::CantSeek,
        }
    }
}
