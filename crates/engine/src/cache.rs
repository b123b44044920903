use compiler::{CompileError, CompileOptions, CompiledQuery};
use model::selector::Selector;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::debug;

/// Hex md5 of the resolved selector and the options it is compiled with.
pub fn cache_key(selector: &Selector, options: &CompileOptions) -> Result<String, CompileError> {
    let serialized = serde_json::to_vec(&(selector, options))?;
    Ok(format!("{:x}", md5::compute(serialized)))
}

pub trait CompiledQueryCache: Send + Sync {
    /// Returns the cached query for `key`, or runs `compile` and caches its
    /// result. Failed compilations are not cached.
    fn get_or_compile(
        &self,
        key: &str,
        compile: &mut dyn FnMut() -> Result<CompiledQuery, CompileError>,
    ) -> Result<Arc<CompiledQuery>, CompileError>;
}

/// Compiles every time.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopQueryCache;

impl CompiledQueryCache for NoopQueryCache {
    fn get_or_compile(
        &self,
        _key: &str,
        compile: &mut dyn FnMut() -> Result<CompiledQuery, CompileError>,
    ) -> Result<Arc<CompiledQuery>, CompileError> {
        compile().map(Arc::new)
    }
}

struct CacheEntry {
    query: Arc<CompiledQuery>,
    inserted: Instant,
}

/// In-process cache with a fixed entry lifetime. The lock is held while
/// compiling, so concurrent requests for one key compile it once.
pub struct MemoryQueryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryQueryCache {
    pub fn new(ttl: Duration) -> Self {
        MemoryQueryCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        // A panic inside `compile` leaves the map itself consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CompiledQueryCache for MemoryQueryCache {
    fn get_or_compile(
        &self,
        key: &str,
        compile: &mut dyn FnMut() -> Result<CompiledQuery, CompileError>,
    ) -> Result<Arc<CompiledQuery>, CompileError> {
        let mut entries = self.lock();
        let now = Instant::now();

        if let Some(entry) = entries.get(key)
            && now.duration_since(entry.inserted) < self.ttl
        {
            debug!("Compiled query cache hit for {}", key);
            return Ok(entry.query.clone());
        }

        let ttl = self.ttl;
        entries.retain(|_, entry| now.duration_since(entry.inserted) < ttl);

        debug!("Compiled query cache miss for {}", key);
        let query = Arc::new(compile()?);
        entries.insert(
            key.to_string(),
            CacheEntry {
                query: query.clone(),
                inserted: now,
            },
        );
        Ok(query)
    }
}

/// Picks the cache implementation for a configured lifetime.
pub fn for_ttl(ttl: Duration) -> Arc<dyn CompiledQueryCache> {
    if ttl.is_zero() {
        Arc::new(NoopQueryCache)
    } else {
        Arc::new(MemoryQueryCache::new(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compiler::{SelectorCompiler, parse::parse_selector};
    use model::selector::environment::Environment;
    use planner::query::dialect::MySql;

    fn selector(entity: &str) -> Selector {
        parse_selector(&format!(r#"{{ "main": {{ "entity": "{entity}" }} }}"#)).unwrap()
    }

    #[test]
    fn test_key_depends_on_selector_and_options() {
        let options = CompileOptions::default();
        let filter = CompileOptions {
            for_filter_items: true,
            environment: None,
        };
        let live = CompileOptions {
            for_filter_items: false,
            environment: Some(Environment::LIVE),
        };

        let key = cache_key(&selector("product"), &options).unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(key, cache_key(&selector("product"), &options).unwrap());
        assert_ne!(key, cache_key(&selector("variant"), &options).unwrap());
        assert_ne!(key, cache_key(&selector("product"), &filter).unwrap());
        assert_ne!(key, cache_key(&selector("product"), &live).unwrap());
    }

    #[test]
    fn test_compiles_once_per_key() {
        let cache = MemoryQueryCache::new(Duration::from_secs(60));
        let selector = selector("product");
        let options = CompileOptions::default();
        let key = cache_key(&selector, &options).unwrap();
        let compiler = SelectorCompiler::new(&MySql);

        let mut compilations = 0;
        for _ in 0..3 {
            let query = cache
                .get_or_compile(&key, &mut || {
                    compilations += 1;
                    compiler.compile(&selector, &options)
                })
                .unwrap();
            assert!(query.sql.starts_with("SELECT"));
        }
        assert_eq!(compilations, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = MemoryQueryCache::new(Duration::from_secs(60));
        let result = cache.get_or_compile("k", &mut || Err(CompileError::MissingInclude(1)));
        assert_eq!(result, Err(CompileError::MissingInclude(1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_recompile() {
        let cache = MemoryQueryCache::new(Duration::from_millis(1));
        let selector = selector("product");
        let options = CompileOptions::default();
        let compiler = SelectorCompiler::new(&MySql);

        let mut compilations = 0;
        let mut compile = || {
            compilations += 1;
            compiler.compile(&selector, &options)
        };
        cache.get_or_compile("k", &mut compile).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        cache.get_or_compile("k", &mut compile).unwrap();
        assert_eq!(compilations, 2);
    }
}
