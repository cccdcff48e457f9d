//! Process-wide parse cache.
//!
//! Parsing is deterministic (P6/P8), so a cached plan is indistinguishable
//! from a fresh parse; the cache is keyed by the lambda source text plus the
//! dialect the plan was defined for. The mutex guards the LRU only for the
//! duration of a lookup or store.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use once_cell::sync::Lazy;

use crate::plan::ParsedQuery;
use crate::sql::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseCacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for ParseCacheConfig {
    fn default() -> Self {
        ParseCacheConfig {
            enabled: true,
            capacity: 1024,
        }
    }
}

struct ParseCache {
    config: ParseCacheConfig,
    entries: LruCache<(String, Dialect), Arc<ParsedQuery>>,
}

impl ParseCache {
    fn new(config: ParseCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("non-zero");
        ParseCache {
            config,
            entries: LruCache::new(capacity),
        }
    }

    fn active(&self) -> bool {
        self.config.enabled && self.config.capacity > 0
    }
}

static PARSE_CACHE: Lazy<Mutex<ParseCache>> =
    Lazy::new(|| Mutex::new(ParseCache::new(ParseCacheConfig::default())));

pub(crate) fn lookup(source: &str, dialect: Dialect) -> Option<Arc<ParsedQuery>> {
    let mut cache = PARSE_CACHE.lock().expect("parse cache poisoned");
    if !cache.active() {
        return None;
    }
    cache.entries.get(&(source.to_string(), dialect)).cloned()
}

pub(crate) fn store(source: &str, dialect: Dialect, parsed: Arc<ParsedQuery>) {
    let mut cache = PARSE_CACHE.lock().expect("parse cache poisoned");
    if !cache.active() {
        return;
    }
    cache.entries.put((source.to_string(), dialect), parsed);
}

/// Drops every cached plan.
pub fn clear_parse_cache() {
    let mut cache = PARSE_CACHE.lock().expect("parse cache poisoned");
    let config = cache.config;
    *cache = ParseCache::new(config);
}

/// Replaces the cache configuration. Re-capacitating drops the stored
/// entries wholesale rather than trimming them in LRU order.
pub fn set_parse_cache_config(config: ParseCacheConfig) {
    let mut cache = PARSE_CACHE.lock().expect("parse cache poisoned");
    *cache = ParseCache::new(config);
}

pub fn get_parse_cache_config() -> ParseCacheConfig {
    PARSE_CACHE.lock().expect("parse cache poisoned").config
}

#[cfg(test)]
mod test {
    use super::*;

    // The cache is process-wide; tests touching it reconfigure it first so
    // they do not interfere with the end-to-end tests.
    #[test]
    fn test_capacity_eviction_is_strict_lru() {
        set_parse_cache_config(ParseCacheConfig {
            enabled: true,
            capacity: 2,
        });

        let parsed = |source: &str| {
            Arc::new(ParsedQuery {
                query: crate::ast::ops::Query {
                    kind: crate::ast::ops::QueryKind::Select(crate::ast::ops::SelectQuery {
                        source: crate::ast::ops::Operation::From(crate::ast::ops::FromOp {
                            table: "users".to_string(),
                            index: 0,
                        }),
                        terminal: crate::ast::ops::Terminal::ToArray,
                    }),
                    tables: vec!["users".to_string()],
                },
                auto_params: crate::params::Params::new(),
                param_infos: Default::default(),
                source: source.to_string(),
            })
        };

        store("a", Dialect::Postgres, parsed("a"));
        store("b", Dialect::Postgres, parsed("b"));
        // Touch `a`, then insert `c`: `b` is the least recently used.
        assert!(lookup("a", Dialect::Postgres).is_some());
        store("c", Dialect::Postgres, parsed("c"));

        assert!(lookup("a", Dialect::Postgres).is_some());
        assert!(lookup("b", Dialect::Postgres).is_none());
        assert!(lookup("c", Dialect::Postgres).is_some());

        // Dialect participates in the key.
        assert!(lookup("a", Dialect::Sqlite).is_none());

        set_parse_cache_config(ParseCacheConfig::default());
    }
}
