use clap::Parser;
use std::path::PathBuf;

use galah::llm::LlmConfig;
use galah::service::ServiceOptions;

#[derive(Debug, Parser)]
#[command(name = "galah")]
#[command(version, about = "LLM-powered web honeypot")]
pub struct Cli {
    /// LLM provider (openai, ollama, anthropic)
    #[arg(short = 'p', long, env = "LLM_PROVIDER")]
    pub provider: String,

    /// LLM model (e.g. gpt-4o-mini, llama3.1)
    #[arg(short = 'm', long, env = "LLM_MODEL")]
    pub model: String,

    /// LLM server URL (for self-hosted or compatible endpoints)
    #[arg(short = 'u', long, env = "LLM_SERVER_URL")]
    pub server_url: Option<String>,

    /// LLM API key
    #[arg(short = 'k', long, env = "LLM_API_KEY")]
    pub api_key: Option<String>,

    /// LLM sampling temperature (0-2). Higher values make the output more random
    #[arg(short = 't', long, env = "LLM_TEMPERATURE", default_value_t = 1.0)]
    pub temperature: f64,

    /// LLM cloud project ID (required for cloud-hosted models)
    #[arg(long, env = "LLM_CLOUD_PROJECT")]
    pub cloud_project: Option<String>,

    /// LLM cloud location region (required for cloud-hosted models)
    #[arg(long, env = "LLM_CLOUD_LOCATION")]
    pub cloud_location: Option<String>,

    /// Interface to bind listeners to (first non-loopback IPv4 address)
    #[arg(short = 'i', long)]
    pub interface: Option<String>,

    /// Path to config file
    #[arg(short = 'c', long, default_value = "config/config.yaml")]
    pub config_file: PathBuf,

    /// Path to the static-rules config file (omit to disable rule checks)
    #[arg(short = 'r', long)]
    pub rules_config_file: Option<PathBuf>,

    /// Path to event log file
    #[arg(short = 'o', long, default_value = "event_log.json")]
    pub event_log_file: PathBuf,

    /// Path to database file for response caching
    #[arg(short = 'f', long, default_value = "cache.db")]
    pub cache_db_file: PathBuf,

    /// Cache duration in hours (0 disables caching, -1 caches forever)
    #[arg(short = 'd', long, default_value_t = 24, allow_negative_numbers = true)]
    pub cache_duration: i64,

    /// Enable Suricata HTTP rule matching on incoming requests
    #[arg(long, default_value_t = false)]
    pub suricata_enabled: bool,

    /// Directory containing .rules files
    #[arg(long)]
    pub suricata_rules_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            llm: LlmConfig {
                provider: self.provider.clone(),
                model: self.model.clone(),
                server_url: self.server_url.clone(),
                api_key: self.api_key.clone(),
                temperature: self.temperature,
                cloud_project: self.cloud_project.clone(),
                cloud_location: self.cloud_location.clone(),
            },
            config_file: self.config_file.clone(),
            rules_config_file: self.rules_config_file.clone(),
            event_log_file: self.event_log_file.clone(),
            cache_db_file: self.cache_db_file.clone(),
            cache_duration: self.cache_duration,
            suricata_enabled: self.suricata_enabled,
            suricata_rules_dir: self.suricata_rules_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["galah", "-p", "openai", "-m", "gpt-4o-mini"]);
        assert_eq!(cli.config_file, PathBuf::from("config/config.yaml"));
        assert_eq!(cli.event_log_file, PathBuf::from("event_log.json"));
        assert_eq!(cli.cache_db_file, PathBuf::from("cache.db"));
        assert_eq!(cli.cache_duration, 24);
        assert_eq!(cli.temperature, 1.0);
        assert!(!cli.suricata_enabled);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn provider_and_model_are_required() {
        assert!(Cli::try_parse_from(["galah"]).is_err());
        assert!(Cli::try_parse_from(["galah", "-p", "openai"]).is_err());
    }

    #[test]
    fn cache_duration_accepts_negative() {
        let cli = Cli::parse_from([
            "galah", "-p", "openai", "-m", "x", "--cache-duration", "-1",
        ]);
        assert_eq!(cli.cache_duration, -1);
    }
}
