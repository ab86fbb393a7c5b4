//! Galah is an LLM-powered web honeypot: it listens on configured ports
//! with HTTP or TLS and answers every request with either an
//! operator-defined static response, a previously cached LLM response,
//! or a freshly synthesized one. Each served request is enriched,
//! sessionized, and appended to a structured JSONL event log, optionally
//! annotated with matching Suricata HTTP rule identifiers.

pub mod cache;
pub mod config;
pub mod enrich;
pub mod llm;
pub mod logger;
pub mod server;
pub mod service;
pub mod suricata;

pub use service::{Service, ServiceOptions};
