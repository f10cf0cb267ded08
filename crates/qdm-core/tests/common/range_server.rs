//! Minimal HTTP/1.1 server that supports Range GET for integration tests.
//!
//! Serves a single static body. A GET with `Range: bytes=X-` gets a 206
//! Partial Content with the tail of the body; a plain GET gets 200 with
//! the whole body. Behavior toggles let tests simulate servers without
//! range support or with a fixed error status.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If set, every request is answered with this status and no body.
    pub fail_status: Option<u16>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            fail_status: None,
        }
    }
}

/// Starts a server in a background thread serving `body`. Returns the base
/// URL (e.g. "http://127.0.0.1:12345/"). The server runs until the process
/// exits.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, RangeServerOptions::default())
}

/// Like `start` but with customized behavior (no ranges, fixed error).
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            thread::spawn(move || handle(stream, &body, opts));
        }
    });
    format!("http://127.0.0.1:{}/", port)
}

fn handle(mut stream: std::net::TcpStream, body: &[u8], opts: RangeServerOptions) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range) = parse_request(request);

    if let Some(code) = opts.fail_status {
        let response = format!(
            "HTTP/1.1 {} Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            code
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    let total = body.len() as u64;
    let (status, content_range, slice) = match range {
        Some(start) if opts.support_ranges => {
            let start = start.min(total);
            (
                "206 Partial Content",
                Some(format!(
                    "bytes {}-{}/{}",
                    start,
                    total.saturating_sub(1),
                    total
                )),
                &body[start as usize..],
            )
        }
        _ => ("200 OK", None, body),
    };

    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n",
        status,
        slice.len()
    );
    if let Some(content_range) = content_range {
        response.push_str(&format!("Content-Range: {}\r\n", content_range));
    }
    response.push_str("\r\n");
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

/// Returns (method, optional start offset for `Range: bytes=X-`).
fn parse_request(request: &str) -> (&str, Option<u64>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(rest) = value.strip_prefix("bytes=") {
                    if let Some((start, _end)) = rest.split_once('-') {
                        range = start.trim().parse::<u64>().ok();
                    }
                }
            }
        }
    }
    (method, range)
}
