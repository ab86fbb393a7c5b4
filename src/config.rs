//! Configuration loading for the honeypot.
//!
//! Two YAML files drive the process: the main config (prompts, port
//! bindings, TLS profiles) and an optional static-rule config that maps
//! request-URI regexes to canned response templates.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// System prompt sent to (or appended for) the LLM.
    #[serde(default)]
    pub system_prompt: String,

    /// User prompt template with a single `%s` placeholder for the
    /// dumped HTTP request.
    #[serde(default)]
    pub user_prompt: String,

    /// Ports to listen on.
    #[serde(default)]
    pub ports: Vec<PortConfig>,

    /// Named TLS profiles referenced by port bindings.
    #[serde(default)]
    pub profiles: HashMap<String, TlsProfile>,
}

/// Listener protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "TLS")]
    Tls,
}

/// A single honeypot port binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_profile: Option<String>,
}

/// Certificate and key paths for a TLS listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsProfile {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

impl Config {
    /// Load the main configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }
}

/// A static response rule: the first enabled rule whose regex matches the
/// request URI serves the template file instead of the cache or LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRule {
    pub name: String,
    pub enabled: bool,
    pub http_request_regex: String,
    pub response: StaticResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticResponse {
    #[serde(rename = "type")]
    pub response_type: String,
    pub template: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Vec<StaticRule>,
}

impl RulesConfig {
    /// Load the static-rule configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read rules file: {}", path.as_ref().display()))?;

        let rules: RulesConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse rules file: {}", path.as_ref().display()))?;

        Ok(rules)
    }
}
