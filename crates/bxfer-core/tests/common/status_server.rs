//! Minimal HTTP/1.1 fragment server for integration tests.
//!
//! Routes by path:
//! - `/busy-once/...`: first request answers 503, later ones behave normally.
//! - `/busy/...`: always 503.
//! - `/missing/...`: 404.
//! - anything else: GET answers 200 with `fragment:<path>`; PUT and POST echo
//!   the request body.
//!
//! Every connection is closed after one response.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone)]
pub struct StatusServer {
    base: String,
    hits: Arc<Mutex<HashMap<String, u32>>>,
}

impl StatusServer {
    /// URL for `path` (which must start with `/`).
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Requests seen so far for `path`.
    pub fn hits(&self, path: &str) -> u32 {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

/// Starts the server on an ephemeral port in a background thread. The server
/// runs until the process exits.
pub fn start() -> StatusServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let hits: Arc<Mutex<HashMap<String, u32>>> = Arc::default();
    let server = StatusServer {
        base: format!("http://127.0.0.1:{}", port),
        hits: Arc::clone(&hits),
    };
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let hits = Arc::clone(&hits);
            thread::spawn(move || handle(stream, &hits));
        }
    });
    server
}

fn handle(mut stream: TcpStream, hits: &Mutex<HashMap<String, u32>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let Some((method, path, body)) = read_request(&mut stream) else {
        return;
    };
    let hit = {
        let mut hits = hits.lock().unwrap();
        let n = hits.entry(path.clone()).or_insert(0);
        *n += 1;
        *n
    };

    let (status, reply) = if path.starts_with("/busy/") || (path.starts_with("/busy-once/") && hit == 1) {
        ("503 Service Unavailable", b"busy".to_vec())
    } else if path.starts_with("/missing/") {
        ("404 Not Found", b"no such fragment".to_vec())
    } else if method.eq_ignore_ascii_case("GET") {
        ("200 OK", format!("fragment:{}", path).into_bytes())
    } else if method.eq_ignore_ascii_case("PUT") || method.eq_ignore_ascii_case("POST") {
        ("200 OK", body)
    } else {
        ("405 Method Not Allowed", Vec::new())
    };
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        status,
        reply.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&reply);
}

/// Read one request: (method, path, body). The body is read up to
/// Content-Length.
fn read_request(stream: &mut TcpStream) -> Option<(String, String, Vec<u8>)> {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = find(&data, b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = std::str::from_utf8(&data[..header_end]).ok()?;
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = data[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);
    Some((method, path, body))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
