//! Icon Cache
//!
//! Each key owns a `OnceCell`, so concurrent misses for the same executable
//! share one extraction. Failed extractions are cached as the placeholder.

use super::{Icon, IconExtractor, IconOverrides, IconSource};
use crate::process::ProcessIdentity;
use crate::rules::{normalize_path, SEPARATOR};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves process identities to icons
pub struct IconResolver {
    overrides: RwLock<Arc<IconOverrides>>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Icon>>>>,
    extractor: Arc<dyn IconExtractor>,
}

impl IconResolver {
    pub fn new(extractor: Arc<dyn IconExtractor>, overrides: IconOverrides) -> Self {
        Self {
            overrides: RwLock::new(Arc::new(overrides)),
            cache: Mutex::new(HashMap::new()),
            extractor,
        }
    }

    /// Full lookup; may block on extraction
    pub fn resolve(&self, identity: &ProcessIdentity) -> Icon {
        if let Some(icon) = self.overrides.read().lookup(identity) {
            return icon.clone();
        }

        let key = cache_key(identity);
        let cell = {
            let mut cache = self.cache.lock();
            cache.entry(key.clone()).or_default().clone()
        };

        // Map lock is released here, only same-key callers wait on the cell
        cell.get_or_init(|| self.extract(identity, &key)).clone()
    }

    /// Override or cached icon, never extracts
    pub fn peek(&self, identity: &ProcessIdentity) -> Option<Icon> {
        if let Some(icon) = self.overrides.read().lookup(identity) {
            return Some(icon.clone());
        }
        let cache = self.cache.lock();
        cache.get(&cache_key(identity)).and_then(|cell| cell.get().cloned())
    }

    /// Swaps the override table and drops every cached entry
    pub fn reload_overrides(&self, overrides: IconOverrides) {
        let count = overrides.len();
        *self.overrides.write() = Arc::new(overrides);
        self.cache.lock().clear();
        info!("Custom icons reloaded ({} entries), icon cache cleared", count);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    fn extract(&self, identity: &ProcessIdentity, key: &str) -> Icon {
        let Some(path) = identity.full_path.as_deref() else {
            debug!("No path for {}, using default icon", identity.name);
            return Icon::placeholder();
        };

        match self.extractor.extract(path) {
            Ok(bytes) => {
                debug!("Extracted icon for {}", key);
                Icon::new(bytes, IconSource::Extracted)
            }
            Err(e) => {
                debug!("{}, using default icon", e);
                Icon::placeholder()
            }
        }
    }
}

/// Normalized path, or the bare name when the path is unknown
pub fn cache_key(identity: &ProcessIdentity) -> String {
    match identity.full_path.as_deref() {
        Some(path) => normalize_path(path).trim_end_matches(SEPARATOR).to_string(),
        None => identity.name.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionUnavailable;
    use crate::process::ProcessRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Counts calls; slow so concurrent callers overlap
    struct CountingExtractor {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingExtractor {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl IconExtractor for CountingExtractor {
        fn extract(&self, path: &str) -> Result<Vec<u8>, ExtractionUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            if self.fail {
                return Err(ExtractionUnavailable {
                    path: path.to_string(),
                    reason: "no icon".to_string(),
                });
            }
            Ok(path.as_bytes().to_vec())
        }
    }

    fn identity(path: Option<&str>, name: &str) -> ProcessIdentity {
        ProcessIdentity::new(ProcessRecord::new(1, name, path), false)
    }

    #[test]
    fn test_extracts_once_then_hits_cache() {
        let extractor = CountingExtractor::new(Duration::ZERO, false);
        let resolver = IconResolver::new(extractor.clone(), IconOverrides::empty());
        let id = identity(Some("C:\\Apps\\x.exe"), "x.exe");

        assert!(resolver.peek(&id).is_none());
        let icon = resolver.resolve(&id);
        assert_eq!(icon.source, IconSource::Extracted);

        // Same key regardless of case or separator style
        let other_case = identity(Some("c:/apps/X.EXE"), "x.exe");
        assert_eq!(resolver.resolve(&other_case), icon);
        assert_eq!(resolver.peek(&other_case), Some(icon));
        assert_eq!(extractor.calls(), 1);
    }

    #[test]
    fn test_failure_is_negative_cached() {
        let extractor = CountingExtractor::new(Duration::ZERO, true);
        let resolver = IconResolver::new(extractor.clone(), IconOverrides::empty());
        let id = identity(Some("C:\\Apps\\broken.exe"), "broken.exe");

        for _ in 0..5 {
            assert!(resolver.resolve(&id).is_placeholder());
        }
        assert_eq!(extractor.calls(), 1);
    }

    #[test]
    fn test_missing_path_uses_placeholder_without_extraction() {
        let extractor = CountingExtractor::new(Duration::ZERO, false);
        let resolver = IconResolver::new(extractor.clone(), IconOverrides::empty());
        assert!(resolver.resolve(&identity(None, "system")).is_placeholder());
        assert_eq!(extractor.calls(), 0);
    }

    #[test]
    fn test_override_wins_and_skips_extraction() {
        let extractor = CountingExtractor::new(Duration::ZERO, false);
        let mut overrides = IconOverrides::empty();
        overrides.insert("x.exe", Icon::new(b"custom".to_vec(), IconSource::CustomOverride));
        let resolver = IconResolver::new(extractor.clone(), overrides);

        let icon = resolver.resolve(&identity(Some("C:\\Apps\\x.exe"), "x.exe"));
        assert_eq!(icon.source, IconSource::CustomOverride);
        assert_eq!(extractor.calls(), 0);
    }

    #[test]
    fn test_concurrent_misses_coalesce() {
        let extractor = CountingExtractor::new(Duration::from_millis(200), false);
        let resolver = Arc::new(IconResolver::new(extractor.clone(), IconOverrides::empty()));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let resolver = resolver.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    resolver.resolve(&identity(Some("C:\\Slow\\app.exe"), "app.exe"))
                })
            })
            .collect();

        let icons: Vec<Icon> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(extractor.calls(), 1);
        assert!(icons.iter().all(|i| *i == icons[0]));
    }

    #[test]
    fn test_reload_overrides_clears_cache() {
        let extractor = CountingExtractor::new(Duration::ZERO, false);
        let resolver = IconResolver::new(extractor.clone(), IconOverrides::empty());
        let id = identity(Some("C:\\Apps\\x.exe"), "x.exe");
        resolver.resolve(&id);
        assert_eq!(resolver.cached_len(), 1);

        resolver.reload_overrides(IconOverrides::empty());
        assert_eq!(resolver.cached_len(), 0);
        resolver.resolve(&id);
        assert_eq!(extractor.calls(), 2);
    }
}
