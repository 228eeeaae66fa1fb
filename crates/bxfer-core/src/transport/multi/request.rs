//! Build a configured Easy2 request for one transfer: target, method, body,
//! headers and timeouts.

use std::path::PathBuf;
use std::time::Duration;

use curl::easy::{Easy2, List};

use crate::transfer::{Direction, Payload};
use crate::transport::TransportError;

use super::handler::TransferHandler;

/// libcurl settings shared by every request of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Hard limit on one attempt; `None` disables it.
    pub timeout: Option<Duration>,
    /// Abort an attempt whose throughput stays below this many bytes/s for
    /// `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    pub buffer_size: Option<usize>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            timeout: Some(Duration::from_secs(3600)),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            buffer_size: None,
        }
    }
}

/// Body encoding understood by the storage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    OctetStream,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::OctetStream => "application/octet-stream",
        }
    }
}

/// Everything needed to issue one transfer. The target and body are built
/// by the caller; this only maps them onto libcurl.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    url: String,
    direction: Direction,
    body: Option<Vec<u8>>,
    content_type: ContentType,
    accept: Option<ContentType>,
    headers: Vec<(String, String)>,
    unix_socket: Option<PathBuf>,
}

impl RequestSpec {
    /// GET the fragment at `url`.
    pub fn read(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            direction: Direction::Read,
            body: None,
            content_type: ContentType::Json,
            accept: None,
            headers: Vec::new(),
            unix_socket: None,
        }
    }

    /// PUT `payload` to `url`.
    pub fn write(url: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            direction: Direction::Write,
            body: Some(payload),
            content_type: ContentType::OctetStream,
            accept: None,
            headers: Vec::new(),
            unix_socket: None,
        }
    }

    /// Read with a selection body: sent as a POST.
    pub fn with_selection(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn accept(mut self, accept: ContentType) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Connect through a local socket instead of TCP.
    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_socket = Some(path.into());
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Produce the Easy2 request. The body becomes the handler's payload so a
    /// retry can resend it from the start.
    pub fn build(self, opts: &CurlOptions) -> Result<Easy2<TransferHandler>, TransportError> {
        let target = validate_target(&self.url)?;
        let body_len = self.body.as_ref().map(|b| b.len() as u64);
        let payload = Payload::new(self.body.unwrap_or_default());
        let mut easy = Easy2::new(TransferHandler::new(payload));
        easy.url(target.as_str())?;

        match (self.direction, body_len) {
            (Direction::Write, len) => {
                easy.upload(true)?;
                easy.in_filesize(len.unwrap_or(0))?;
            }
            (Direction::Read, Some(len)) => {
                easy.post(true)?;
                easy.post_field_size(len)?;
            }
            (Direction::Read, None) => {
                easy.get(true)?;
            }
        }

        let mut list = List::new();
        list.append(&format!("Content-Type: {}", self.content_type.as_str()))?;
        if let Some(accept) = self.accept {
            list.append(&format!("Accept: {}", accept.as_str()))?;
        }
        if body_len.is_some() {
            // Send the body straight away instead of waiting on 100-continue.
            list.append("Expect:")?;
        }
        for (k, v) in &self.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        easy.http_headers(list)?;

        easy.connect_timeout(opts.connect_timeout)?;
        if let Some(t) = opts.timeout {
            easy.timeout(t)?;
        }
        easy.low_speed_limit(opts.low_speed_limit)?;
        easy.low_speed_time(opts.low_speed_time)?;
        if let Some(sz) = opts.buffer_size {
            easy.buffer_size(sz)?;
        }
        if let Some(path) = &self.unix_socket {
            let path = path.to_str().ok_or_else(|| TransportError::InvalidTarget {
                target: path.display().to_string(),
                reason: "socket path is not valid UTF-8".into(),
            })?;
            easy.unix_socket(path)?;
        }
        Ok(easy)
    }
}

/// Parse `raw` and require an http(s) URL with a host.
fn validate_target(raw: &str) -> Result<url::Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidTarget {
        target: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme {:?}", other))),
    }
    if parsed.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid("missing host".into()));
    }
    Ok(parsed)
}
