//! Keyword filter: bucketed substring thresholds.

use super::{Module, ModuleCore, TriggeredBucket};
use crate::error::{ConfigError, ConfigResult};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Flags a query when enough distinct terms from a threshold bucket occur in
/// it as substrings. Matching is case-sensitive and byte-literal; use
/// [`RegexFilter`](super::RegexFilter) for anything fuzzier.
///
/// Buckets are evaluated in ascending threshold order. A bucket *triggers*
/// when the number of distinct matched terms reaches its threshold; with
/// `stop_on_flag` (the default) evaluation stops at the first trigger.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    core: ModuleCore,
    keywords_by_threshold: BTreeMap<u32, Vec<String>>,
    stop_on_flag: bool,
    last_triggered: Vec<TriggeredBucket>,
}

impl KeywordFilter {
    pub fn new(
        name: impl Into<String>,
        keywords_by_threshold: BTreeMap<u32, Vec<String>>,
    ) -> ConfigResult<Self> {
        if keywords_by_threshold.is_empty() {
            return Err(ConfigError::EmptyThresholds);
        }
        if keywords_by_threshold.keys().any(|&t| t < 1) {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(Self {
            core: ModuleCore::new(name, "Query flagged by keyword policy.")?,
            keywords_by_threshold,
            stop_on_flag: true,
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

    pub fn triggered(&self) -> &[TriggeredBucket] {
        &self.last_triggered
    }
}

#[async_trait]
impl Module for KeywordFilter {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModuleCore {
        &mut self.core
    }

    async fn run(&mut self, query: &str) -> anyhow::Result<String> {
        let mut identified = Map::new();

        for (&threshold, bucket) in &self.keywords_by_threshold {
            // Bucket terms are treated as a set: duplicates count once.
            let mut matched: Vec<String> = Vec::new();
            for keyword in bucket {
                if query.contains(keyword.as_str()) && !matched.contains(keyword) {
                    matched.push(keyword.clone());
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
                    "bucket {}: matched {} keyword(s) [{}]",
                    t.threshold,
                    t.count,
                    t.matched.join(", ")
                )
            })
            .collect();
        format!(
            "The query was flagged by keyword policy: {}.",
            parts.join("; ")
        )
    }

    fn config_value(&self) -> Value {
        json!({
            "kind": "keyword_filter",
            "name": self.core.name(),
            "description": self.core.description(),
            "audit": self.core.audit_enabled(),
            "default_flagged_response": self.core.default_flagged_response(),
            "keywords_by_threshold": self.keywords_by_threshold,
            "stop_on_flag": self.stop_on_flag,
        })
    }

    fn clone_module(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}
