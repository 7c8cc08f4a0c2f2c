//! Regex filter: bucketed pattern thresholds.
//!
//! Same threshold semantics as [`KeywordFilter`](super::KeywordFilter), but
//! bucket entries are regular expressions compiled once at construction. An
//! invalid pattern is a [`ConfigError`] and prevents instance creation.

use super::{Module, ModuleCore, TriggeredBucket};
use crate::error::{ConfigError, ConfigResult};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Bit flags applied to every pattern of a [`RegexFilter`] at compile time.
pub mod regex_flags {
    pub const NONE: u32 = 0;
    pub const CASE_INSENSITIVE: u32 = 1 << 0;
    pub const MULTI_LINE: u32 = 1 << 1;
    pub const DOT_MATCHES_NEW_LINE: u32 = 1 << 2;
    pub const IGNORE_WHITESPACE: u32 = 1 << 3;
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Flags a query when enough distinct patterns from a threshold bucket find
/// a match in it. A pattern "matches" iff it finds any occurrence.
#[derive(Debug, Clone)]
pub struct RegexFilter {
    core: ModuleCore,
    buckets: BTreeMap<u32, Vec<CompiledPattern>>,
    stop_on_flag: bool,
    regex_flags: u32,
    last_triggered: Vec<TriggeredBucket>,
}

impl RegexFilter {
    pub fn new(
        name: impl Into<String>,
        patterns_by_threshold: BTreeMap<u32, Vec<String>>,
        flags: u32,
    ) -> ConfigResult<Self> {
        if patterns_by_threshold.is_empty() {
            return Err(ConfigError::EmptyThresholds);
        }

        let mut buckets = BTreeMap::new();
        for (threshold, sources) in patterns_by_threshold {
            if threshold < 1 {
                return Err(ConfigError::ZeroThreshold);
            }
            let mut compiled = Vec::with_capacity(sources.len());
            for source in sources {
                let regex = RegexBuilder::new(&source)
                    .case_insensitive(flags & regex_flags::CASE_INSENSITIVE != 0)
                    .multi_line(flags & regex_flags::MULTI_LINE != 0)
                    .dot_matches_new_line(flags & regex_flags::DOT_MATCHES_NEW_LINE != 0)
                    .ignore_whitespace(flags & regex_flags::IGNORE_WHITESPACE != 0)
                    .build()
                    .map_err(|e| ConfigError::InvalidPattern {
                        threshold,
                        source: Box::new(e),
                    })?;
                compiled.push(CompiledPattern { source, regex });
            }
            buckets.insert(threshold, compiled);
        }

        Ok(Self {
            core: ModuleCore::new(name, "Query flagged by regex policy.")?,
            buckets,
            stop_on_flag: true,
            regex_flags: flags,
            last_triggered: Vec::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.core.set_description(description);
        self
    }

    pub fn with_audit(mut self, audit: bool) -> Self {
        self.core.set_audit(audit);
        self
    }

    pub fn with_flagged_response(mut self, response: impl Into<String>) -> Self {
        self.core.set_default_flagged_response(response);
        self
    }

    pub fn with_stop_on_flag(mut self, stop_on_flag: bool) -> Self {
        self.stop_on_flag = stop_on_flag;
        self
    }
}

#[async_trait]
impl Module for RegexFilter {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    async fn run(&mut self, query: &str) -> anyhow::Result<String> {
        let mut identified = Map::new();

        for (&threshold, bucket) in &self.buckets {
            let mut matched: Vec<String> = Vec::new();
            for pattern in bucket {
                if pattern.regex.is_match(query) && !matched.contains(&pattern.source) {
                    matched.push(pattern.source.clone());
                }
            }

            identified.insert(threshold.to_string(), json!(matched));

            if matched.len() as u32 >= threshold {
                self.core.set_flag(true);
                self.last_triggered.push(TriggeredBucket {
                    threshold,
                    count: matched.len(),
                    matched,
                });
                if self.stop_on_flag {
                    break;
                }
            }
        }

        self.core.log_audit("input", json!(query));
        self.core.log_audit("output", json!(query));
        self.core.log_audit("identified", Value::Object(identified));
        self.core.log_audit("triggered", json!(self.last_triggered));
        self.core.log_audit("stop_on_flag", json!(self.stop_on_flag));

        Ok(query.to_string())
    }

    fn reset(&mut self) {
        self.core.reset();
        self.last_triggered.clear();
    }

    fn flagged_response(&self) -> String {
        if !self.core.flag() {
            return String::new();
        }
        if self.last_triggered.is_empty() {
            return self.core.default_flagged_response().to_string();
        }
        let parts: Vec<String> = self
            .last_triggered
            .iter()
            .map(|t| {
                format!(
                    "bucket {}: matched {} pattern(s) [{}]",
                    t.threshold,
                    t.count,
                    t.matched.join(", ")
                )
            })
            .collect();
        format!(
            "The query was flagged by regex policy: {}.",
            parts.join("; ")
        )
    }

    fn config_value(&self) -> Value {
        let patterns: BTreeMap<String, Vec<&str>> = self
            .buckets
            .iter()
            .map(|(t, b)| (t.to_string(), b.iter().map(|p| p.source.as_str()).collect()))
            .collect();
        json!({
            "kind": "regex_filter",
            "name": self.core.name(),
            "description": self.core.description(),
            "audit": self.core.audit_enabled(),
            "default_flagged_response": self.core.default_flagged_response(),
            "patterns_by_threshold": patterns,
            "regex_flags": self.regex_flags,
            "stop_on_flag": self.stop_on_flag,
        })
    }

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}
