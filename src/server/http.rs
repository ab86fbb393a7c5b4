//! Minimal HTTP/1.1 request reading and response writing.
//!
//! The honeypot fabricates every response, so it works on a raw byte
//! model rather than a routing framework: one request is read per
//! connection (bounded), handled, answered, and the connection closed.

use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request bodies are captured once into a bounded buffer; anything past
/// this cap is discarded.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// Upper bound for the request line plus headers.
const MAX_HEAD_BYTES: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// A parsed inbound request. Header order is preserved as received.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Path plus query, as sent on the request line.
    pub uri: String,
    /// Version string, e.g. `HTTP/1.1`.
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub remote_addr: SocketAddr,
}

impl HttpRequest {
    /// First value of the named header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The `Host` header verbatim, or the empty string.
    pub fn host(&self) -> &str {
        self.header("Host").unwrap_or("")
    }

    pub fn user_agent(&self) -> &str {
        self.header("User-Agent").unwrap_or("")
    }

    /// Absolute URL used for cache keying: `{scheme}://{host}{uri}` when a
    /// Host header is present, the raw URI otherwise.
    pub fn url(&self, scheme: &str) -> String {
        let host = self.host();
        if host.is_empty() {
            self.uri.clone()
        } else {
            format!("{}://{}{}", scheme, host, self.uri)
        }
    }

    /// Canonical HTTP/1.1 text dump of the request, including the body,
    /// as handed to the LLM.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{} {} {}\r\n", self.method, self.uri, self.version);
        for (name, value) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", name, value);
        }
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&self.body));
        out
    }
}

/// A response ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn internal_server_error() -> Self {
        Self {
            status: 500,
            headers: vec![(
                "Content-Type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: b"Internal Server Error\n".to_vec(),
        }
    }
}

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

/// Read and parse one request from the stream. The body is read up to
/// [`MAX_BODY_BYTES`]; a longer declared Content-Length is truncated.
pub async fn read_request<S>(stream: &mut S, remote_addr: SocketAddr) -> Result<HttpRequest>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let (head_len, mut request) = loop {
        let n = stream.read(&mut chunk).await.context("read failed")?;
        if n == 0 {
            bail!("connection closed before a full request was received");
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_HEAD_BYTES + MAX_BODY_BYTES {
            bail!("request too large");
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut headers);
        match parsed.parse(&buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let method = parsed.method.context("missing method")?.to_string();
                let uri = parsed.path.context("missing request path")?.to_string();
                let version = format!("HTTP/1.{}", parsed.version.unwrap_or(1));
                let header_pairs = parsed
                    .headers
                    .iter()
                    .map(|h| {
                        (
                            h.name.to_string(),
                            String::from_utf8_lossy(h.value).into_owned(),
                        )
                    })
                    .collect();
                break (
                    head_len,
                    HttpRequest {
                        method,
                        uri,
                        version,
                        headers: header_pairs,
                        body: Vec::new(),
                        remote_addr,
                    },
                );
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEAD_BYTES {
                    bail!("request head too large");
                }
            }
            Err(e) => bail!("malformed request: {}", e),
        }
    };

    let content_length: usize = request
        .header("Content-Length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let want = content_length.min(MAX_BODY_BYTES);

    let mut body = buf[head_len..].to_vec();
    while body.len() < want {
        let n = stream.read(&mut chunk).await.context("body read failed")?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(want);
    request.body = body;

    Ok(request)
}

/// Write a response to the stream and flush it.
pub async fn write_response<S>(stream: &mut S, response: &WireResponse) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut head = String::new();
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\n",
        response.status,
        status_reason(response.status)
    );
    for (name, value) in &response.headers {
        let _ = write!(head, "{}: {}\r\n", name, value);
    }
    let _ = write!(head, "Content-Length: {}\r\n", response.body.len());
    head.push_str("Connection: close\r\n\r\n");

    stream
        .write_all(head.as_bytes())
        .await
        .context("write failed")?;
    stream
        .write_all(&response.body)
        .await
        .context("write failed")?;
    stream.flush().await.context("flush failed")?;
    Ok(())
}
