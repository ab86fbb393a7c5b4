//! Per-request rule evaluation.
//!
//! Every loaded rule is tested against a set of byte buffers built once
//! per request. A rule matches iff all of its content and PCRE patterns
//! succeed (logical AND). Content matching is a substring test; header
//! buffers are always compared case-insensitively, other buffers honor
//! the `nocase` modifier. The stored `distance`/`within` values are not
//! enforced; patterns carrying them degrade to plain substring tests.

use crate::server::http::HttpRequest;

use super::ast::{Buffer, ContentMatch, PcreMatch, Rule};

/// The named buffers for one request, built once and borrowed by every
/// rule evaluation.
#[derive(Debug, Default)]
pub struct RequestBuffers {
    method: Vec<u8>,
    uri: Vec<u8>,
    body: Vec<u8>,
    host: Vec<u8>,
    host_raw: Vec<u8>,
    cookie: Vec<u8>,
    header: Vec<u8>,
    header_names: Vec<u8>,
    user_agent: Vec<u8>,
    accept: Vec<u8>,
    accept_enc: Vec<u8>,
    accept_lang: Vec<u8>,
    content_type: Vec<u8>,
    protocol: Vec<u8>,
    start: Vec<u8>,
}

impl RequestBuffers {
    pub fn from_request(req: &HttpRequest) -> Self {
        let mut header = Vec::new();
        for (name, value) in &req.headers {
            header.extend_from_slice(name.as_bytes());
            header.extend_from_slice(b": ");
            header.extend_from_slice(value.as_bytes());
            header.extend_from_slice(b"\r\n");
        }

        // CRLF-separated header names, terminated by a blank line.
        let mut header_names = Vec::new();
        header_names.extend_from_slice(b"\r\n");
        for (name, _) in &req.headers {
            header_names.extend_from_slice(name.as_bytes());
            header_names.extend_from_slice(b"\r\n");
        }
        header_names.extend_from_slice(b"\r\n");

        // Request line, headers, blank line.
        let mut start = Vec::new();
        start.extend_from_slice(req.method.as_bytes());
        start.push(b' ');
        start.extend_from_slice(req.uri.as_bytes());
        start.push(b' ');
        start.extend_from_slice(req.version.as_bytes());
        start.extend_from_slice(b"\r\n");
        start.extend_from_slice(&header);
        start.extend_from_slice(b"\r\n");

        let first = |name: &str| {
            req.header(name)
                .map(|v| v.as_bytes().to_vec())
                .unwrap_or_default()
        };

        Self {
            method: req.method.clone().into_bytes(),
            uri: req.uri.clone().into_bytes(),
            body: req.body.clone(),
            host: req.host().to_ascii_lowercase().into_bytes(),
            host_raw: req.host().as_bytes().to_vec(),
            cookie: first("Cookie"),
            header,
            header_names,
            user_agent: first("User-Agent"),
            accept: first("Accept"),
            accept_enc: first("Accept-Encoding"),
            accept_lang: first("Accept-Language"),
            content_type: first("Content-Type"),
            protocol: req.version.clone().into_bytes(),
            start,
        }
    }

    /// Resolve a buffer, or `None` for selectors that are never evaluated.
    fn get(&self, buffer: Buffer) -> Option<&[u8]> {
        match buffer {
            Buffer::Method => Some(&self.method),
            Buffer::Uri => Some(&self.uri),
            Buffer::RequestBody => Some(&self.body),
            Buffer::Host => Some(&self.host),
            Buffer::HostRaw => Some(&self.host_raw),
            Buffer::Cookie => Some(&self.cookie),
            Buffer::Header | Buffer::HeaderRaw => Some(&self.header),
            Buffer::HeaderNames => Some(&self.header_names),
            Buffer::UserAgent => Some(&self.user_agent),
            Buffer::Accept => Some(&self.accept),
            Buffer::AcceptEnc => Some(&self.accept_enc),
            Buffer::AcceptLang => Some(&self.accept_lang),
            Buffer::ContentType => Some(&self.content_type),
            Buffer::Protocol => Some(&self.protocol),
            Buffer::Start => Some(&self.start),
            Buffer::RequestLine | Buffer::ResponseLine => None,
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || (needle.len() <= haystack.len()
            && haystack.windows(needle.len()).any(|window| window == needle))
}

fn content_matches(cm: &ContentMatch, buffers: &RequestBuffers) -> bool {
    let Some(buf) = buffers.get(cm.buffer) else {
        return false;
    };

    let found = if cm.buffer.is_header_buffer() || cm.modifiers.nocase {
        contains(&buf.to_ascii_lowercase(), &cm.pattern.to_ascii_lowercase())
    } else {
        contains(buf, &cm.pattern)
    };

    found != cm.negated
}

fn pcre_matches(pm: &PcreMatch, buffers: &RequestBuffers) -> bool {
    let Some(buf) = buffers.get(pm.buffer) else {
        return false;
    };

    if pm.is_relative() {
        pm.substring_regex.is_match(buf)
    } else {
        pm.regex.is_match(buf)
    }
}

/// Whether every pattern attached to the rule succeeds.
pub(super) fn rule_matches(rule: &Rule, buffers: &RequestBuffers) -> bool {
    rule.contents.iter().all(|cm| content_matches(cm, buffers))
        && rule.pcre.iter().all(|pm| pcre_matches(pm, buffers))
}
