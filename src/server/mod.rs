//! Port supervisor: one concurrent listener per configured binding,
//! plain TCP or TLS-terminated, with graceful shutdown on SIGINT/SIGTERM.

pub mod handler;
pub mod http;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PortConfig, Protocol};
use crate::service::Service;

use http::{read_request, write_response};

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Runs all configured listeners until shutdown.
pub struct Server {
    service: Arc<Service>,
    interface: Option<String>,
}

impl Server {
    pub fn new(service: Arc<Service>, interface: Option<String>) -> Self {
        Self { service, interface }
    }

    /// Start one listener per port binding and wait for all of them.
    /// Returns the first listener error after every listener has
    /// stopped.
    pub async fn run(&self) -> Result<()> {
        let bind_ip = match &self.interface {
            Some(name) => interface_ipv4(name)?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("received shutdown signal. shutting down servers...");
            let _ = shutdown_tx.send(true);
        });

        let mut listeners = JoinSet::new();
        for pc in &self.service.config.ports {
            listeners.spawn(run_listener(
                self.service.clone(),
                pc.clone(),
                bind_ip,
                shutdown_rx.clone(),
            ));
        }
        drop(shutdown_rx);

        let mut result = Ok(());
        while let Some(joined) = listeners.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("listener error: {:#}", e);
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
                Err(e) => error!("listener task failed: {}", e),
            }
        }

        info!("all servers shut down");
        self.service.close();
        result
    }
}

async fn run_listener(
    service: Arc<Service>,
    pc: PortConfig,
    bind_ip: IpAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    // TLS profiles must be complete before the listener starts.
    let acceptor = match pc.protocol {
        Protocol::Tls => Some(build_tls_acceptor(&service.config, &pc)?),
        Protocol::Http => None,
    };

    let addr = SocketAddr::new(bind_ip, pc.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    match &pc.protocol {
        Protocol::Tls => info!(
            "starting HTTPS server on {} with TLS profile: {}",
            addr,
            pc.tls_profile.as_deref().unwrap_or_default()
        ),
        Protocol::Http => info!("starting HTTP server on {}", addr),
    }

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            service.clone(),
                            stream,
                            peer,
                            pc.port,
                            acceptor.clone(),
                        ));
                    }
                    Err(e) => warn!("accept error on port {}: {}", pc.port, e),
                }
            }
            _ = shutdown.changed() => break,
        }
        // Reap finished connection tasks as we go.
        while connections.try_join_next().is_some() {}
    }

    let drained = timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "shutdown grace elapsed on port {}; abandoning {} connection(s)",
            pc.port,
            connections.len()
        );
        connections.abort_all();
    }
    Ok(())
}

async fn serve_connection(
    service: Arc<Service>,
    stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    acceptor: Option<TlsAcceptor>,
) {
    match acceptor {
        Some(acceptor) => match timeout(READ_TIMEOUT, acceptor.accept(stream)).await {
            Ok(Ok(tls_stream)) => serve_stream(service, tls_stream, peer, port, "https").await,
            Ok(Err(e)) => debug!("TLS handshake failed from {}: {}", peer, e),
            Err(_) => debug!("TLS handshake timed out from {}", peer),
        },
        None => serve_stream(service, stream, peer, port, "http").await,
    }
}

/// Serve one request on an established stream: bounded read, decision
/// ladder, bounded write, then the logging side-effect. The event is
/// never emitted before the response bytes have been handed to the
/// socket.
async fn serve_stream<S>(service: Arc<Service>, mut stream: S, peer: SocketAddr, port: u16, scheme: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req = match timeout(READ_TIMEOUT, read_request(&mut stream, peer)).await {
        Ok(Ok(req)) => req,
        Ok(Err(e)) => {
            debug!("failed to read request from {}: {:#}", peer, e);
            return;
        }
        Err(_) => {
            debug!("read timed out from {}", peer);
            return;
        }
    };

    let (wire, action) = handler::process_request(&service, &req, port, scheme).await;

    match timeout(WRITE_TIMEOUT, write_response(&mut stream, &wire)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("failed to write response to {}: {:#}", peer, e),
        Err(_) => debug!("write timed out to {}", peer),
    }

    handler::post_process(service, req, port, action).await;
}

/// Build a TLS acceptor for a binding, failing fast on an unresolved or
/// incomplete profile.
fn build_tls_acceptor(config: &Config, pc: &PortConfig) -> Result<TlsAcceptor> {
    let profile_name = pc
        .tls_profile
        .as_deref()
        .filter(|name| !name.is_empty())
        .with_context(|| format!("TLS profile is not configured for port {}", pc.port))?;

    let profile = config
        .profiles
        .get(profile_name)
        .with_context(|| format!("TLS profile is incomplete for port {}", pc.port))?;
    if profile.certificate.as_os_str().is_empty() || profile.key.as_os_str().is_empty() {
        anyhow::bail!("TLS profile is incomplete for port {}", pc.port);
    }

    let cert_file = File::open(&profile.certificate).with_context(|| {
        format!("failed to read certificate: {}", profile.certificate.display())
    })?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to parse certificate")?;

    let key_file = File::open(&profile.key)
        .with_context(|| format!("failed to read key: {}", profile.key.display()))?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .context("failed to parse private key")?
        .with_context(|| format!("no private key found in {}", profile.key.display()))?;

    let tls_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("failed to build TLS config")?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

/// First non-loopback IPv4 address of the named interface.
fn interface_ipv4(name: &str) -> Result<IpAddr> {
    let interface = pnet::datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .with_context(|| format!("interface not found: {}", name))?;

    interface
        .ips
        .iter()
        .map(|network| network.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .with_context(|| format!("no non-loopback IPv4 addresses found for interface: {}", name))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::TlsProfile;
    use crate::enrich::{Enricher, EnricherConfig, LookupInfo};
    use crate::llm::testing::MockGenerator;
    use crate::llm::LlmConfig;
    use crate::logger::{EventLogger, Sessionizer, SessionizerConfig};
    use std::collections::HashMap;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn test_service(dir: &tempfile::TempDir) -> Arc<Service> {
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
            dir.path().join("event_log.json"),
            llm_config.clone(),
            enricher,
            sessionizer,
        )
        .unwrap();

        Arc::new(Service {
            config: Config::default(),
            static_rules: Vec::new(),
            cache: ResponseCache::open_in_memory().unwrap(),
            cache_duration: 24,
            llm_config,
            generator: Box::new(MockGenerator::returning(Ok(
                r#"{"headers":{"Server":"nginx"},"body":"welcome"}"#.into(),
            ))),
            event_logger,
            suricata: None,
        })
    }

    #[tokio::test]
    async fn serve_stream_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let service = test_service(&dir);
        let peer: SocketAddr = "203.0.113.9:45678".parse().unwrap();

        let (mut client, server_side) = duplex(64 * 1024);
        let task = tokio::spawn(serve_stream(service, server_side, peer, 8080, "http"));

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: bait\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        task.await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Server: nginx\r\n"));
        assert!(text.ends_with("welcome"));

        // Event emitted after the response was written.
        let log = std::fs::read_to_string(dir.path().join("event_log.json")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn tls_acceptor_requires_a_profile() {
        let config = Config::default();
        let pc = PortConfig {
            port: 8443,
            protocol: Protocol::Tls,
            tls_profile: None,
        };
        assert!(build_tls_acceptor(&config, &pc).is_err());
    }

    #[test]
    fn tls_acceptor_requires_a_resolvable_profile() {
        let mut config = Config::default();
        config.profiles.insert(
            "other".into(),
            TlsProfile {
                certificate: "cert.pem".into(),
                key: "key.pem".into(),
            },
        );
        let pc = PortConfig {
            port: 8443,
            protocol: Protocol::Tls,
            tls_profile: Some("default".into()),
        };
        assert!(build_tls_acceptor(&config, &pc).is_err());
    }

    #[test]
    fn tls_acceptor_requires_existing_files() {
        let mut config = Config::default();
        let mut profiles = HashMap::new();
        profiles.insert(
            "default".to_string(),
            TlsProfile {
                certificate: "/nonexistent/cert.pem".into(),
                key: "/nonexistent/key.pem".into(),
            },
        );
        config.profiles = profiles;
        let pc = PortConfig {
            port: 8443,
            protocol: Protocol::Tls,
            tls_profile: Some("default".into()),
        };
        assert!(build_tls_acceptor(&config, &pc).is_err());
    }
}
