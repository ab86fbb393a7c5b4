//! Structured event logging.
//!
//! Every served request produces exactly one JSONL event: either a
//! `successfulResponse` carrying the response that went out, or a
//! `failedResponse` carrying the error kind and the raw model output.
//! Events are enriched (reverse DNS, scanner tags) and sessionized here,
//! off the response path.

pub mod session;

pub use session::{Sessionizer, SessionizerConfig};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::error;
use uuid::Uuid;

use crate::enrich::Enricher;
use crate::llm::{JsonResponse, LlmConfig, LlmError};
use crate::server::http::HttpRequest;
use crate::suricata::RuleMatch;

/// Which pipeline stage produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Static,
    Cache,
    Llm,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Static => "static",
            Source::Cache => "cache",
            Source::Llm => "llm",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmInfo {
    pub model: String,
    pub provider: String,
    pub temperature: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequestLog {
    #[serde(rename = "sessionID")]
    session_id: String,
    method: String,
    protocol_version: String,
    request: String,
    user_agent: String,
    headers: BTreeMap<String, String>,
    headers_sorted: String,
    headers_sorted_sha256: String,
    body: String,
    body_sha256: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    generation_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<LlmInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLog {
    #[serde(rename = "type")]
    error_type: String,
    msg: String,
    invalid_response: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Event<'a> {
    level: &'static str,
    msg: &'static str,
    event_time: DateTime<Utc>,
    #[serde(rename = "srcIP")]
    src_ip: String,
    src_host: String,
    src_port: String,
    tags: Vec<String>,
    sensor_name: String,
    port: u16,
    http_request: HttpRequestLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_response: Option<&'a JsonResponse>,
    response_metadata: ResponseMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    suricata_matches: Option<&'a [RuleMatch]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorLog>,
}

/// Append-only JSONL event writer plus the enrichment collaborators.
pub struct EventLogger {
    event_file: Mutex<File>,
    llm_config: LlmConfig,
    enricher: Enricher,
    sessionizer: Sessionizer,
}

impl EventLogger {
    pub fn new<P: AsRef<Path>>(
        event_log_file: P,
        llm_config: LlmConfig,
        enricher: Enricher,
        sessionizer: Sessionizer,
    ) -> Result<Self> {
        let event_file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&event_log_file)
            .with_context(|| {
                format!(
                    "failed to open event log file: {}",
                    event_log_file.as_ref().display()
                )
            })?;

        Ok(Self {
            event_file: Mutex::new(event_file),
            llm_config,
            enricher,
            sessionizer,
        })
    }

    /// Log a successful response, with any matched rule identifiers.
    pub async fn log_event(
        &self,
        req: &HttpRequest,
        port: u16,
        response: &JsonResponse,
        source: Source,
        matches: &[RuleMatch],
    ) {
        let common = self.common_fields(req).await;

        let info = if source == Source::Llm {
            Some(self.llm_info())
        } else {
            None
        };

        let event = Event {
            level: "info",
            msg: "successfulResponse",
            event_time: common.event_time,
            src_ip: common.src_ip,
            src_host: common.src_host,
            src_port: common.src_port,
            tags: common.tags,
            sensor_name: common.sensor_name,
            port,
            http_request: common.http_request,
            http_response: Some(response),
            response_metadata: ResponseMetadata {
                generation_source: source.as_str().to_string(),
                info,
            },
            suricata_matches: if matches.is_empty() {
                None
            } else {
                Some(matches)
            },
            error: None,
        };

        self.append(&event);
    }

    /// Log a failed generation: the client got a 500 and this event
    /// records why, including the raw model output.
    pub async fn log_error(&self, req: &HttpRequest, port: u16, raw_response: &str, err: &LlmError) {
        let common = self.common_fields(req).await;

        let event = Event {
            level: "error",
            msg: "failedResponse",
            event_time: common.event_time,
            src_ip: common.src_ip,
            src_host: common.src_host,
            src_port: common.src_port,
            tags: common.tags,
            sensor_name: common.sensor_name,
            port,
            http_request: common.http_request,
            http_response: None,
            response_metadata: ResponseMetadata {
                generation_source: String::new(),
                info: Some(self.llm_info()),
            },
            suricata_matches: None,
            error: Some(ErrorLog {
                error_type: err.kind().to_string(),
                msg: err.detail().to_string(),
                invalid_response: raw_response.to_string(),
            }),
        };

        self.append(&event);
    }

    fn llm_info(&self) -> LlmInfo {
        LlmInfo {
            model: self.llm_config.model.clone(),
            provider: self.llm_config.provider.clone(),
            temperature: self.llm_config.temperature,
        }
    }

    async fn common_fields(&self, req: &HttpRequest) -> CommonFields {
        let now = Utc::now();
        let src_ip = req.remote_addr.ip().to_string();
        let src_port = req.remote_addr.port().to_string();

        let mut tags = Vec::new();
        let mut src_host = String::new();
        match self.enricher.process(&src_ip).await {
            Ok(info) => {
                if !info.known_scanner.is_empty() {
                    tags.push(info.known_scanner);
                }
                src_host = info.host;
            }
            Err(e) => {
                error!("error getting enrichment info for {:?}: {:#}", src_ip, e);
            }
        }

        let session_id = self.sessionizer.process(&src_ip, now);

        let mut header_names: Vec<String> =
            req.headers.iter().map(|(name, _)| name.clone()).collect();
        header_names.sort();
        let headers_sorted = header_names.join(",");

        let mut headers = BTreeMap::new();
        for (name, value) in &req.headers {
            headers
                .entry(name.clone())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }

        CommonFields {
            event_time: now,
            src_ip,
            src_host,
            src_port,
            tags,
            sensor_name: sensor_name(),
            http_request: HttpRequestLog {
                session_id,
                method: req.method.clone(),
                protocol_version: req.version.clone(),
                request: req.uri.clone(),
                user_agent: req.user_agent().to_string(),
                headers,
                headers_sorted_sha256: sha256_hex(headers_sorted.as_bytes()),
                headers_sorted,
                body: String::from_utf8_lossy(&req.body).into_owned(),
                body_sha256: sha256_hex(&req.body),
            },
        }
    }

    fn append(&self, event: &Event<'_>) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                error!("error serializing event: {}", e);
                return;
            }
        };

        let mut file = self.event_file.lock();
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            error!("error writing event log: {}", e);
        }
    }

    /// Flush any buffered event data. Called once on shutdown.
    pub fn close(&self) {
        let mut file = self.event_file.lock();
        if let Err(e) = file.flush() {
            error!("error flushing event log: {}", e);
        }
    }
}

struct CommonFields {
    event_time: DateTime<Utc>,
    src_ip: String,
    src_host: String,
    src_port: String,
    tags: Vec<String>,
    sensor_name: String,
    http_request: HttpRequestLog,
}

/// The local hostname, or a fresh UUID when it cannot be determined.
fn sensor_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| Uuid::new_v4().to_string())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
