//! Source-IP enrichment: reverse DNS plus known-scanner tagging.
//!
//! Results are cached per IP with a capacity bound and a TTL counted
//! from insertion. Reverse-DNS failures are not cached, so the next
//! request retries the lookup.

use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use moka::sync::Cache;
use std::net::IpAddr;
use std::time::Duration;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Result of an enrichment lookup. Empty strings mean "no reverse-DNS
/// answer" and "not a known scanner".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupInfo {
    pub host: String,
    pub known_scanner: String,
}

/// Known scanners by source subnet. The list is taken from the glutton
/// honeypot project.
const SCANNER_SUBNETS: &[(&str, &[&str])] = &[
    (
        "censys scanner",
        &[
            "162.142.125.0/24",
            "167.94.138.0/24",
            "167.94.145.0/24",
            "167.94.146.0/24",
            "167.248.133.0/24",
        ],
    ),
    (
        "shadowserver scanner",
        &[
            "64.62.202.96/27",
            "66.220.23.112/29",
            "74.82.47.0/26",
            "184.105.139.64/26",
            "184.105.143.128/26",
            "184.105.247.192/26",
            "216.218.206.64/26",
            "141.212.0.0/16",
        ],
    ),
    ("PAN Expanse scanner", &["144.86.173.0/24"]),
    ("rwth scanner", &["137.226.113.56/26"]),
];

/// Known scanners by reverse-DNS name suffix. Names from the resolver
/// keep their trailing dot.
const SCANNER_HOST_SUFFIXES: &[(&str, &str)] = &[
    ("shodan.io.", "shodan scanner"),
    ("censys-scanner.com.", "censys scanner"),
    ("binaryedge.ninja.", "binaryedge scanner"),
    ("rwth-aachen.de.", "rwth scanner"),
];

#[derive(Debug, Clone)]
pub struct EnricherConfig {
    pub cache_size: u64,
    pub cache_ttl: Duration,
}

/// Per-IP enrichment cache backed by the system resolver.
pub struct Enricher {
    cache: Cache<String, LookupInfo>,
    resolver: TokioAsyncResolver,
}

impl Enricher {
    pub fn new(config: EnricherConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_size)
            .time_to_live(config.cache_ttl)
            .build();
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

        Self { cache, resolver }
    }

    /// Enrich an IP address, consulting the cache first.
    pub async fn process(&self, ip: &str) -> Result<LookupInfo> {
        if let Some(info) = self.cache.get(ip) {
            return Ok(info);
        }

        let addr: IpAddr = ip
            .parse()
            .with_context(|| format!("invalid IP address '{}'", ip))?;

        let hosts = self.reverse_lookup(addr).await?;
        let host = hosts.first().cloned().unwrap_or_default();
        let known_scanner = known_scanner(addr, &hosts)?;

        let info = LookupInfo {
            host,
            known_scanner,
        };
        self.cache.insert(ip.to_string(), info.clone());
        Ok(info)
    }

    async fn reverse_lookup(&self, addr: IpAddr) -> Result<Vec<String>> {
        let response = self
            .resolver
            .reverse_lookup(addr)
            .await
            .with_context(|| format!("reverse lookup failed for {}", addr))?;
        Ok(response.iter().map(|name| name.to_utf8()).collect())
    }

    #[cfg(test)]
    pub(crate) fn seed(&self, ip: &str, info: LookupInfo) {
        self.cache.insert(ip.to_string(), info);
    }
}

/// Match an IP and its reverse names against the scanner tables: the
/// subnet table first, then the host-suffix table. Empty string when
/// neither matches; CIDR parse errors propagate.
pub fn known_scanner(addr: IpAddr, hosts: &[String]) -> Result<String> {
    for (scanner, subnets) in SCANNER_SUBNETS {
        for subnet in *subnets {
            let network: IpNetwork = subnet
                .parse()
                .with_context(|| format!("invalid scanner subnet '{}'", subnet))?;
            if network.contains(addr) {
                return Ok(scanner.to_string());
            }
        }
    }

    for host in hosts {
        for (suffix, scanner) in SCANNER_HOST_SUFFIXES {
            if host.ends_with(suffix) {
                return Ok(scanner.to_string());
            }
        }
    }

    Ok(String::new())
}
