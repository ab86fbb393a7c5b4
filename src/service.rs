//! Process-wide service state.
//!
//! Everything the handlers share — config, compiled static rules, the
//! response cache, the LLM client, the event logger, and the optional
//! rule set — lives on one value constructed at startup and threaded
//! into listeners. No module-level singletons.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::ResponseCache;
use crate::config::{Config, RulesConfig, StaticRule};
use crate::enrich::{Enricher, EnricherConfig};
use crate::llm::{new_generator, Generator, LlmConfig};
use crate::logger::{EventLogger, Sessionizer, SessionizerConfig};
use crate::suricata::RuleSet;

pub const CACHE_SIZE: u64 = 1_000_000;
pub const LOOKUP_TTL: Duration = Duration::from_secs(60 * 60);
pub const SESSION_TTL: Duration = Duration::from_secs(2 * 60);

/// Options for building a [`Service`], mirroring the CLI surface.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub llm: LlmConfig,
    pub config_file: PathBuf,
    pub rules_config_file: Option<PathBuf>,
    pub event_log_file: PathBuf,
    pub cache_db_file: PathBuf,
    /// Hours; 0 disables caching, -1 caches forever.
    pub cache_duration: i64,
    pub suricata_enabled: bool,
    pub suricata_rules_dir: Option<PathBuf>,
}

/// A static rule with its URI regex compiled once at startup.
pub struct CompiledStaticRule {
    pub name: String,
    pub regex: Regex,
    pub template: PathBuf,
}

pub struct Service {
    pub config: Config,
    pub static_rules: Vec<CompiledStaticRule>,
    pub cache: ResponseCache,
    pub cache_duration: i64,
    pub llm_config: LlmConfig,
    pub generator: Box<dyn Generator>,
    pub event_logger: EventLogger,
    pub suricata: Option<Arc<RuleSet>>,
}

impl Service {
    /// Load configuration files and assemble the service.
    pub fn new(opts: ServiceOptions) -> Result<Self> {
        let config = Config::load(&opts.config_file).context("error loading config")?;

        let rules = match &opts.rules_config_file {
            Some(path) => {
                RulesConfig::load(path)
                    .context("error loading rules config")?
                    .rules
            }
            None => Vec::new(),
        };

        Self::from_config(config, rules, opts)
    }

    /// Assemble the service from an already-loaded configuration.
    pub fn from_config(
        config: Config,
        rules: Vec<StaticRule>,
        opts: ServiceOptions,
    ) -> Result<Self> {
        let generator =
            new_generator(&opts.llm).context("error initializing the LLM client")?;

        let cache = ResponseCache::open(&opts.cache_db_file)
            .context("error initializing the cache database")?;

        let enricher = Enricher::new(EnricherConfig {
            cache_size: CACHE_SIZE,
            cache_ttl: LOOKUP_TTL,
        });
        let sessionizer = Sessionizer::new(SessionizerConfig {
            cache_size: CACHE_SIZE,
            cache_ttl: SESSION_TTL,
        });
        let event_logger =
            EventLogger::new(&opts.event_log_file, opts.llm.clone(), enricher, sessionizer)?;

        let static_rules = compile_static_rules(&rules)?;

        let suricata = if opts.suricata_enabled {
            let dir = opts
                .suricata_rules_dir
                .as_ref()
                .context("suricata enabled but no --suricata-rules-dir provided")?;
            let rule_set = crate::suricata::load_rule_set(dir)?;
            info!("loaded {} suricata rules from {}", rule_set.len(), dir.display());
            Some(Arc::new(rule_set))
        } else {
            None
        };

        Ok(Self {
            config,
            static_rules,
            cache,
            cache_duration: opts.cache_duration,
            llm_config: opts.llm,
            generator,
            event_logger,
            suricata,
        })
    }

    /// Release resources held by the service.
    pub fn close(&self) {
        self.event_logger.close();
    }
}

/// Compile the enabled static rules in declaration order. A malformed
/// regex is a fatal configuration error.
fn compile_static_rules(rules: &[StaticRule]) -> Result<Vec<CompiledStaticRule>> {
    rules
        .iter()
        .filter(|rule| rule.enabled)
        .map(|rule| {
            let regex = Regex::new(&rule.http_request_regex).with_context(|| {
                format!("invalid http_request_regex in rule '{}'", rule.name)
            })?;
            Ok(CompiledStaticRule {
                name: rule.name.clone(),
                regex,
                template: rule.response.template.clone(),
            })
        })
        .collect()
}
