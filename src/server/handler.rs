//! The per-request decision ladder: static rules, then the response
//! cache, then LLM synthesis. Whichever stage wins, the resulting bytes
//! must parse as the `{"headers", "body"}` response shape before they
//! reach the wire.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cache::CacheLookup;
use crate::llm::prompt::build_messages;
use crate::llm::{generate_response, JsonResponse, LlmError};
use crate::logger::Source;
use crate::service::Service;

use super::http::{HttpRequest, WireResponse};

/// Response headers suppressed on the wire but preserved in the logged
/// event. The `http*` entries are synthetic names models sometimes
/// invent.
const EXCLUDED_HEADERS: &[&str] = &[
    "content-length",
    "content-type",
    "date",
    "expires",
    "last-modified",
    "http",
    "http/1.0",
    "http/1.1",
    "http/1.2",
    "http/2.0",
];

fn is_excluded_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    EXCLUDED_HEADERS.iter().any(|excluded| *excluded == lower)
}

/// Logging side-effect owed after the response has been written.
pub enum PostAction {
    /// Response parse failure: a 500 went out and no event is logged.
    None,
    LogSuccess {
        response: JsonResponse,
        source: Source,
    },
    LogFailure {
        raw: String,
        error: LlmError,
    },
}

/// Run the decision ladder for one request and produce the wire response
/// plus the logging action to run once the response is written.
pub async fn process_request(
    service: &Service,
    req: &HttpRequest,
    port: u16,
    scheme: &str,
) -> (WireResponse, PostAction) {
    let url = req.url(scheme);
    info!(
        "port {} received a request for {:?}, from source {}",
        port, url, req.remote_addr
    );

    let mut chosen: Option<(Vec<u8>, Source)> = None;

    // Static rules, in declaration order; first match wins.
    for rule in &service.static_rules {
        if rule.regex.is_match(&req.uri) {
            match std::fs::read(&rule.template) {
                Ok(bytes) => {
                    chosen = Some((bytes, Source::Static));
                    break;
                }
                Err(e) => {
                    error!(
                        "error reading template '{}' for rule '{}': {}",
                        rule.template.display(),
                        rule.name,
                        e
                    );
                }
            }
        }
    }

    if chosen.is_none() {
        match service.cache.lookup(port, &url, service.cache_duration) {
            Ok(CacheLookup::Hit(bytes)) => chosen = Some((bytes, Source::Cache)),
            Ok(CacheLookup::Miss) => debug!("cache check for {:?}: not found in cache", url),
            Ok(CacheLookup::Expired) => {
                debug!("cache check for {:?}: cached record is too old", url)
            }
            Ok(CacheLookup::Disabled) => {}
            Err(e) => error!("cache check for {:?} failed: {:#}", url, e),
        }
    }

    let (bytes, source) = match chosen {
        Some(chosen) => chosen,
        None => {
            let messages = build_messages(req, &service.config, &service.llm_config.provider);
            match generate_response(
                service.generator.as_ref(),
                service.llm_config.temperature,
                &messages,
            )
            .await
            {
                Ok(text) => {
                    info!("generated HTTP response: {}", text.replace('\n', " "));
                    let bytes = text.into_bytes();
                    if service.cache_duration != 0 {
                        if let Err(e) = service.cache.store(port, &url, &bytes) {
                            error!("error storing response in cache: {:#}", e);
                        }
                    }
                    (bytes, Source::Llm)
                }
                Err(failure) => {
                    error!("error generating response: {}", failure.error);
                    return (
                        WireResponse::internal_server_error(),
                        PostAction::LogFailure {
                            raw: failure.raw,
                            error: failure.error,
                        },
                    );
                }
            }
        }
    };

    let response: JsonResponse = match serde_json::from_slice(&bytes) {
        Ok(response) => response,
        Err(e) => {
            error!("error unmarshalling the JSON-encoded data: {}", e);
            return (WireResponse::internal_server_error(), PostAction::None);
        }
    };

    info!(
        "sending response to {} (source: {})",
        req.remote_addr,
        source.as_str()
    );
    (build_wire_response(&response), PostAction::LogSuccess { response, source })
}

/// Translate a parsed response into wire form, suppressing excluded
/// headers and stamping `Date`.
pub fn build_wire_response(response: &JsonResponse) -> WireResponse {
    let mut headers: Vec<(String, String)> = response
        .headers
        .iter()
        .filter(|(name, _)| !is_excluded_header(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.sort();
    headers.push((
        "Date".to_string(),
        Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
    ));

    WireResponse {
        status: 200,
        headers,
        body: response.body.clone().into_bytes(),
    }
}

/// Run the logging side-effect. With the rule engine enabled, matching
/// and event emission move to a background task so the connection task
/// never blocks on them; otherwise the event is emitted inline.
pub async fn post_process(service: Arc<Service>, req: HttpRequest, port: u16, action: PostAction) {
    match action {
        PostAction::None => {}
        PostAction::LogFailure { raw, error } => {
            service.event_logger.log_error(&req, port, &raw, &error).await;
        }
        PostAction::LogSuccess { response, source } => match service.suricata.clone() {
            Some(rule_set) => {
                tokio::spawn(async move {
                    let matches = rule_set.safe_matches(&req);
                    for m in &matches {
                        info!("suricata SID={} - {:?}", m.sid, m.msg);
                    }
                    service
                        .event_logger
                        .log_event(&req, port, &response, source, &matches)
                        .await;
                });
            }
            None => {
                service
                    .event_logger
                    .log_event(&req, port, &response, source, &[])
                    .await;
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::Config;
    use crate::enrich::{Enricher, EnricherConfig, LookupInfo};
    use crate::llm::testing::MockGenerator;
    use crate::llm::LlmConfig;
    use crate::logger::{EventLogger, Sessionizer, SessionizerConfig};
    use std::collections::HashMap;
    use std::io::Write as _;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(uri: &str, host: &str) -> HttpRequest {
        let addr: SocketAddr = "203.0.113.9:45678".parse().unwrap();
        HttpRequest {
            method: "GET".into(),
            uri: uri.into(),
            version: "HTTP/1.1".into(),
            headers: vec![("Host".into(), host.into())],
            body: Vec::new(),
            remote_addr: addr,
        }
    }

    struct Harness {
        service: Service,
        generator: Arc<MockGenerator>,
        _dir: TempDir,
        event_log: std::path::PathBuf,
    }

    fn harness(output: Result<String, LlmError>) -> Harness {
        let dir = TempDir::new().unwrap();
        let event_log = dir.path().join("event_log.json");

        let enricher = Enricher::new(EnricherConfig {
            cache_size: 16,
            cache_ttl: Duration::from_secs(60),
        });
        enricher.seed("203.0.113.9", LookupInfo::default());
        let sessionizer = Sessionizer::new(SessionizerConfig {
            cache_size: 16,
            cache_ttl: Duration::from_secs(120),
        });
        let llm_config = LlmConfig {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            temperature: 1.0,
            ..Default::default()
        };
        let event_logger = EventLogger::new(
            &event_log,
            llm_config.clone(),
            enricher,
            sessionizer,
        )
        .unwrap();

        let generator = Arc::new(MockGenerator::returning(output));
        let service = Service {
            config: Config {
                system_prompt: "sys".into(),
                user_prompt: "prompt: %s".into(),
                ..Default::default()
            },
            static_rules: Vec::new(),
            cache: ResponseCache::open_in_memory().unwrap(),
            cache_duration: 24,
            llm_config,
            generator: Box::new(generator.clone()),
            event_logger,
            suricata: None,
        };

        Harness {
            service,
            generator,
            _dir: dir,
            event_log,
        }
    }

    fn body_of(wire: &WireResponse) -> &str {
        std::str::from_utf8(&wire.body).unwrap()
    }

    fn header<'a>(wire: &'a WireResponse, name: &str) -> Option<&'a str> {
        wire.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn static_rule_wins_without_llm() {
        let mut h = harness(Ok(r#"{"headers":{"X":"llm"},"body":"llm"}"#.into()));
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("admin.json");
        let mut f = std::fs::File::create(&template).unwrap();
        f.write_all(br#"{"headers":{},"body":"ok"}"#).unwrap();

        h.service.static_rules = vec![crate::service::CompiledStaticRule {
            name: "admin".into(),
            regex: regex::Regex::new("^/admin$").unwrap(),
            template,
        }];

        let (wire, action) = process_request(&h.service, &request("/admin", "x"), 8080, "http").await;
        assert_eq!(wire.status, 200);
        assert_eq!(body_of(&wire), "ok");
        assert_eq!(h.generator.call_count(), 0);
        match action {
            PostAction::LogSuccess { source, .. } => assert_eq!(source, Source::Static),
            _ => panic!("expected success action"),
        }
    }

    #[tokio::test]
    async fn missing_template_falls_through_to_llm() {
        let mut h = harness(Ok(r#"{"headers":{"X":"1"},"body":"generated"}"#.into()));
        h.service.static_rules = vec![crate::service::CompiledStaticRule {
            name: "gone".into(),
            regex: regex::Regex::new("^/admin$").unwrap(),
            template: "/nonexistent/template.json".into(),
        }];

        let (wire, _) = process_request(&h.service, &request("/admin", "x"), 8080, "http").await;
        assert_eq!(body_of(&wire), "generated");
        assert_eq!(h.generator.call_count(), 1);
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_llm() {
        let h = harness(Ok(r#"{"headers":{"X":"llm"},"body":"llm"}"#.into()));
        h.service
            .cache
            .store(8080, "http://x/p", br#"{"headers":{"X":"1"},"body":"cached"}"#)
            .unwrap();

        let (wire, action) = process_request(&h.service, &request("/p", "x"), 8080, "http").await;
        assert_eq!(body_of(&wire), "cached");
        assert_eq!(header(&wire, "X"), Some("1"));
        assert_eq!(h.generator.call_count(), 0);
        match action {
            PostAction::LogSuccess { source, .. } => assert_eq!(source, Source::Cache),
            _ => panic!("expected success action"),
        }
    }

    #[tokio::test]
    async fn llm_response_is_served_and_cached() {
        let h = harness(Ok(
            r#"{"headers":{"Content-Type":"text/plain"},"body":"hi"}"#.into()
        ));
        let (wire, action) = process_request(&h.service, &request("/new", "x"), 8080, "http").await;

        assert_eq!(body_of(&wire), "hi");
        // Excluded header suppressed on the wire.
        assert_eq!(header(&wire, "Content-Type"), None);
        match action {
            PostAction::LogSuccess { source, response } => {
                assert_eq!(source, Source::Llm);
                // Preserved in the logged response.
                assert_eq!(response.headers["Content-Type"], "text/plain");
            }
            _ => panic!("expected success action"),
        }

        match h.service.cache.lookup(8080, "http://x/new", 1).unwrap() {
            CacheLookup::Hit(bytes) => assert_eq!(
                bytes,
                br#"{"headers":{"Content-Type":"text/plain"},"body":"hi"}"#
            ),
            other => panic!("expected cache hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn disabled_cache_is_not_written() {
        let mut h = harness(Ok(r#"{"headers":{"X":"1"},"body":"hi"}"#.into()));
        h.service.cache_duration = 0;

        let (_, _) = process_request(&h.service, &request("/new", "x"), 8080, "http").await;
        assert_eq!(
            h.service.cache.lookup(8080, "http://x/new", 24).unwrap(),
            CacheLookup::Miss
        );
    }

    #[tokio::test]
    async fn invalid_llm_output_returns_500_without_caching() {
        let h = harness(Ok("not json".into()));
        let (wire, action) = process_request(&h.service, &request("/p", "x"), 8080, "http").await;

        assert_eq!(wire.status, 500);
        match action {
            PostAction::LogFailure { raw, error } => {
                assert_eq!(raw, "not json");
                assert_eq!(error.kind(), "invalidJSONResponse");
            }
            _ => panic!("expected failure action"),
        }
        assert_eq!(
            h.service.cache.lookup(8080, "http://x/p", 24).unwrap(),
            CacheLookup::Miss
        );
    }

    #[tokio::test]
    async fn corrupt_cached_bytes_are_fatal_for_the_request() {
        let h = harness(Ok(r#"{"headers":{"X":"1"},"body":"hi"}"#.into()));
        h.service.cache.store(8080, "http://x/p", b"garbage").unwrap();

        let (wire, action) = process_request(&h.service, &request("/p", "x"), 8080, "http").await;
        assert_eq!(wire.status, 500);
        assert!(matches!(action, PostAction::None));
    }

    #[tokio::test]
    async fn post_process_writes_exactly_one_event() {
        let h = harness(Ok(r#"{"headers":{"X":"1"},"body":"hi"}"#.into()));
        let req = request("/p", "x");
        let (_, action) = process_request(&h.service, &req, 8080, "http").await;

        let service = Arc::new(h.service);
        post_process(service, req, 8080, action).await;

        let content = std::fs::read_to_string(&h.event_log).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["msg"], "successfulResponse");
        assert_eq!(event["responseMetadata"]["generationSource"], "llm");
    }

    #[test]
    fn excluded_headers_are_filtered_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("Content-Length".to_string(), "10".to_string());
        headers.insert("Server".to_string(), "Apache".to_string());
        headers.insert("HTTP/1.1".to_string(), "200 OK".to_string());
        let response = JsonResponse {
            headers,
            body: "x".into(),
        };

        let wire = build_wire_response(&response);
        assert!(header(&wire, "Content-Length").is_none());
        assert!(header(&wire, "HTTP/1.1").is_none());
        assert_eq!(header(&wire, "Server"), Some("Apache"));
        assert!(header(&wire, "Date").is_some());
    }
}
