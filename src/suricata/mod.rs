//! Suricata-syntax HTTP rule engine.
//!
//! Supports the HTTP-buffer subset of the rule grammar: `msg`, `sid`,
//! buffer selectors, `content` (with `|..|` hex runs, negation, and the
//! `nocase`/`distance`/`within` modifiers), and `pcre`. Rules outside the
//! subset are silently skipped at load.

pub mod ast;
pub mod matcher;
pub mod parser;

pub use ast::{Buffer, ContentMatch, ContentModifiers, PcreMatch, Rule, RuleMatch};
pub use parser::{parse_rule, ParseError};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, error, warn};

use crate::server::http::HttpRequest;
use matcher::RequestBuffers;

use ast::SUPPORTED_BUFFER_TOKENS;

/// Thread-safe set of loaded rules. Loading takes the write lock and
/// fully rebuilds the list; matching runs under a read lock so matches
/// proceed concurrently.
#[derive(Default)]
pub struct RuleSet {
    rules: RwLock<Vec<Rule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and parse all `.rules` files directly under `dir` (files in
    /// subdirectories are not descended into). Lines that are empty,
    /// comments, or mention no supported buffer token are skipped without
    /// parsing; a parse error skips that rule only. Returns the number of
    /// rules retained.
    pub fn load_rules<P: AsRef<Path>>(&self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let mut entries: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read rules directory '{}'", dir.display()))?
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("failed to read rules directory '{}'", dir.display()))?;
        entries.sort_by_key(|e| e.file_name());

        let mut rules = Vec::new();
        for entry in entries {
            let path = entry.path();
            let is_rules_file = path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".rules"));
            if !is_rules_file {
                continue;
            }
            self.parse_rule_file(&path, &mut rules)?;
        }

        let count = rules.len();
        *self.rules.write() = rules;
        Ok(count)
    }

    fn parse_rule_file(&self, path: &Path, rules: &mut Vec<Rule>) -> Result<()> {
        let file = File::open(path)
            .with_context(|| format!("failed to open rule file '{}'", path.display()))?;

        for (line_number, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.with_context(|| format!("error reading file '{}'", path.display()))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !SUPPORTED_BUFFER_TOKENS
                .iter()
                .any(|token| line.contains(token))
            {
                continue;
            }
            match parse_rule(line) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    debug!(
                        file = %path.display(),
                        line = line_number + 1,
                        "skipping rule: {e}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Replace the full rule list.
    pub fn replace(&self, rules: Vec<Rule>) {
        *self.rules.write() = rules;
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Evaluate all rules against a request; matched rules are returned
    /// in load order.
    pub fn matches(&self, req: &HttpRequest) -> Vec<RuleMatch> {
        let buffers = RequestBuffers::from_request(req);
        self.rules
            .read()
            .iter()
            .filter(|rule| matcher::rule_matches(rule, &buffers))
            .map(RuleMatch::from)
            .collect()
    }

    /// [`matches`](Self::matches) with panic containment: a fault in
    /// regex evaluation yields no matches instead of killing the process.
    pub fn safe_matches(&self, req: &HttpRequest) -> Vec<RuleMatch> {
        match catch_unwind(AssertUnwindSafe(|| self.matches(req))) {
            Ok(matches) => matches,
            Err(_) => {
                error!("panic during rule matching; treating as no matches");
                Vec::new()
            }
        }
    }
}

/// Load rules from a directory, logging the outcome.
pub fn load_rule_set<P: AsRef<Path>>(dir: P) -> Result<RuleSet> {
    let set = RuleSet::new();
    let count = set.load_rules(&dir)?;
    if count == 0 {
        warn!(
            "no usable rules found in '{}'",
            dir.as_ref().display()
        );
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) {
        let mut f = File::create(dir.path().join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn loads_only_rules_files_at_top_level() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "web.rules",
            concat!(
                "# comment line\n",
                "\n",
                r#"alert http any any -> any any (msg:"uri hit"; http.uri; content:"/admin"; sid:1;)"#,
                "\n",
                "alert tcp any any -> any any (msg:\"no http buffer\"; content:\"x\"; sid:2;)\n",
                r#"alert http any any -> any any (msg:"broken; http.uri; content:"x"; sid:3;)"#,
                "\n",
            ),
        );
        write_file(
            &dir,
            "notes.txt",
            r#"alert http any any -> any any (msg:"txt"; http.uri; content:"/x"; sid:9;)"#,
        );
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(
            dir.path().join("sub/nested.rules"),
            r#"alert http any any -> any any (msg:"nested"; http.uri; content:"/y"; sid:10;)"#,
        )
        .unwrap();

        let set = load_rule_set(dir.path()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let set = RuleSet::new();
        assert!(set.load_rules("/nonexistent/rules-dir").is_err());
    }

    #[test]
    fn reload_replaces_rules() {
        let dir = TempDir::new().unwrap();
        write_file(
            &dir,
            "a.rules",
            r#"alert http any any -> any any (msg:"one"; http.uri; content:"/a"; sid:1;)"#,
        );
        let set = RuleSet::new();
        assert_eq!(set.load_rules(dir.path()).unwrap(), 1);

        write_file(
            &dir,
            "a.rules",
            concat!(
                r#"alert http any any -> any any (msg:"one"; http.uri; content:"/a"; sid:1;)"#,
                "\n",
                r#"alert http any any -> any any (msg:"two"; http.uri; content:"/b"; sid:2;)"#,
                "\n",
            ),
        );
        assert_eq!(set.load_rules(dir.path()).unwrap(), 2);
        assert_eq!(set.len(), 2);
    }
}
