//! Data structures for parsed Suricata HTTP rules.
//!
//! Only the HTTP-buffer subset of the rule grammar is represented: a rule
//! header is ignored entirely, and options other than `msg`, `sid`,
//! buffer selectors, `content`, `pcre`, and the per-content modifiers
//! `nocase`/`distance`/`within` are accepted and discarded.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

/// Named request buffer a content or PCRE pattern is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Buffer {
    Method,
    Uri,
    RequestBody,
    Host,
    HostRaw,
    Cookie,
    Header,
    HeaderRaw,
    HeaderNames,
    UserAgent,
    Accept,
    AcceptEnc,
    AcceptLang,
    ContentType,
    Protocol,
    Start,
    /// Legacy selector, recognized as a switch but never evaluated.
    RequestLine,
    /// Legacy selector, recognized as a switch but never evaluated.
    ResponseLine,
}

/// Buffer tokens that patterns can actually be evaluated against.
pub const SUPPORTED_BUFFER_TOKENS: &[&str] = &[
    "http.method",
    "http.uri",
    "http.request_body",
    "http.host",
    "http.host.raw",
    "http.cookie",
    "http.header",
    "http.header.raw",
    "http.header_names",
    "http.user_agent",
    "http.accept",
    "http.accept_enc",
    "http.accept_lang",
    "http.content_type",
    "http.protocol",
    "http.start",
];

impl Buffer {
    /// Resolve a buffer-selector token. Longer tokens are matched before
    /// their prefixes (`http.host.raw` before `http.host`).
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "http.method" => Some(Buffer::Method),
            "http.uri" => Some(Buffer::Uri),
            "http.request_body" => Some(Buffer::RequestBody),
            "http.host" => Some(Buffer::Host),
            "http.host.raw" => Some(Buffer::HostRaw),
            "http.cookie" => Some(Buffer::Cookie),
            "http.header" => Some(Buffer::Header),
            "http.header.raw" => Some(Buffer::HeaderRaw),
            "http.header_names" => Some(Buffer::HeaderNames),
            "http.user_agent" => Some(Buffer::UserAgent),
            "http.accept" => Some(Buffer::Accept),
            "http.accept_enc" => Some(Buffer::AcceptEnc),
            "http.accept_lang" => Some(Buffer::AcceptLang),
            "http.content_type" => Some(Buffer::ContentType),
            "http.protocol" => Some(Buffer::Protocol),
            "http.start" => Some(Buffer::Start),
            "http_request_line" => Some(Buffer::RequestLine),
            "http_response_line" => Some(Buffer::ResponseLine),
            _ => None,
        }
    }

    /// Whether the matcher can evaluate patterns against this buffer.
    pub fn is_evaluated(&self) -> bool {
        !matches!(self, Buffer::RequestLine | Buffer::ResponseLine)
    }

    /// Header buffers are always compared case-insensitively.
    pub fn is_header_buffer(&self) -> bool {
        matches!(self, Buffer::Header | Buffer::HeaderRaw | Buffer::HeaderNames)
    }
}

/// Modifiers applied to a content match.
///
/// `distance` and `within` are parsed and stored but not enforced by the
/// matcher; see the module documentation in `matcher.rs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentModifiers {
    pub nocase: bool,
    pub distance: Option<i32>,
    pub within: Option<u32>,
}

/// A literal (possibly hex-decoded) substring test against a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMatch {
    pub buffer: Buffer,
    /// Decoded pattern bytes; `|xx yy|` hex runs are already expanded.
    pub pattern: Vec<u8>,
    /// Negated match (`content:!"..."`): succeeds iff the pattern is absent.
    pub negated: bool,
    pub modifiers: ContentModifiers,
}

/// A PCRE test against a buffer.
#[derive(Debug, Clone)]
pub struct PcreMatch {
    pub buffer: Buffer,
    /// Pattern without delimiters or flags.
    pub raw_pattern: String,
    /// Original flags string (may include `i`, `R`, and ignored flags).
    pub flags: String,
    /// Compiled pattern, `(?i)`-prefixed when the `i` flag is present.
    pub regex: Regex,
    /// Variant with any leading `^` stripped, used when the `R` flag asks
    /// for a substring search.
    pub substring_regex: Regex,
}

impl PcreMatch {
    pub fn is_relative(&self) -> bool {
        self.flags.contains('R')
    }
}

/// A parsed rule retained for matching: non-empty `msg` and `sid`, and at
/// least one content or PCRE match on an evaluated buffer.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub msg: String,
    pub sid: String,
    pub contents: Vec<ContentMatch>,
    pub pcre: Vec<PcreMatch>,
}

/// A matched rule as reported in events: just the identifier and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub sid: String,
    pub msg: String,
}

impl From<&Rule> for RuleMatch {
    fn from(rule: &Rule) -> Self {
        Self {
            sid: rule.sid.clone(),
            msg: rule.msg.clone(),
        }
    }
}
