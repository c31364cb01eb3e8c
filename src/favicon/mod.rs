//! Favicon caching: in-memory textures plus on-disk PNGs keyed by
//! normalized domain, with per-domain fetch dedup.
//!
//! Lookup is four-tiered: memory cache, service disk cache, engine
//! favicon database, network fetch. Concurrent lookups for one domain
//! collapse into a single in-flight job whose completion satisfies all
//! waiters.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::config;
use crate::engine::Texture;
use crate::mainloop::TaskRunner;
use crate::navigation::normalized_domain;

/// A cached icon: the engine texture when we have one, otherwise raw PNG
/// bytes loaded from disk.
#[derive(Clone)]
pub enum FaviconImage {
    Texture(Arc<dyn Texture>),
    Png(Vec<u8>),
}

impl FaviconImage {
    pub fn png_bytes(&self) -> Option<Vec<u8>> {
        match self {
            FaviconImage::Texture(texture) => texture.png_data(),
            FaviconImage::Png(bytes) => Some(bytes.clone()),
        }
    }
}

impl std::fmt::Debug for FaviconImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaviconImage::Texture(_) => f.write_str("FaviconImage::Texture"),
            FaviconImage::Png(bytes) => write!(f, "FaviconImage::Png({} bytes)", bytes.len()),
        }
    }
}

/// Engine-side favicon database (third lookup tier).
pub trait EngineFaviconDatabase: Send + Sync {
    fn favicon_for(&self, page_uri: &str) -> Option<Arc<dyn Texture>>;
}

/// Network fetch of `/favicon.ico`-style icons (fourth lookup tier).
pub trait FaviconFetcher: Send + Sync {
    fn fetch(&self, domain: &str) -> Option<Vec<u8>>;
}

/// Replace characters unusable in filenames with `_`.
pub fn sanitize_domain_filename(domain: &str) -> String {
    domain
        .chars()
        .map(|c| match c {
            ':' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | '\\' => '_',
            other => other,
        })
        .collect()
}

type LookupCallback = Box<dyn FnOnce(Option<FaviconImage>) + Send>;

pub struct FaviconService {
    dir: PathBuf,
    runner: Arc<dyn TaskRunner>,
    memory: RwLock<HashMap<String, FaviconImage>>,
    /// Waiters per in-flight domain; presence of a key means a job runs.
    inflight: Mutex<HashMap<String, Vec<LookupCallback>>>,
    on_disk: Mutex<HashSet<String>>,
    /// Domains that already logged a disk failure, with the count of
    /// suppressed repeats.
    warned: Mutex<HashMap<String, u64>>,
    engine_db: Mutex<Option<Arc<dyn EngineFaviconDatabase>>>,
    fetcher: Mutex<Option<Arc<dyn FaviconFetcher>>>,
    weak: Weak<FaviconService>,
}

impl FaviconService {
    pub fn new(dir: PathBuf, runner: Arc<dyn TaskRunner>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            dir,
            runner,
            memory: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            on_disk: Mutex::new(HashSet::new()),
            warned: Mutex::new(HashMap::new()),
            engine_db: Mutex::new(None),
            fetcher: Mutex::new(None),
            weak: weak.clone(),
        })
    }

    pub fn set_engine_database(&self, db: Arc<dyn EngineFaviconDatabase>) {
        *self.engine_db.lock() = Some(db);
    }

    pub fn set_fetcher(&self, fetcher: Arc<dyn FaviconFetcher>) {
        *self.fetcher.lock() = Some(fetcher);
    }

    pub fn disk_path(&self, domain: &str) -> PathBuf {
        self.dir
            .join(format!("{}.png", sanitize_domain_filename(domain)))
    }

    pub fn sized_path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.png",
            sanitize_domain_filename(domain),
            config::FAVICON_EXPORT_SIZE
        ))
    }

    /// Synchronous memory-tier lookup.
    pub fn cached(&self, domain: &str) -> Option<FaviconImage> {
        self.memory.read().get(domain).cloned()
    }

    /// Store a texture the engine reported for `final_uri`, also under the
    /// navigation origin's domain when a redirect crossed domains.
    pub fn store_texture(
        &self,
        texture: Arc<dyn Texture>,
        final_uri: &str,
        nav_origin: Option<&str>,
    ) {
        let mut domains = Vec::new();
        if let Some(domain) = normalized_domain(final_uri) {
            domains.push(domain);
        }
        if let Some(origin_domain) = nav_origin.and_then(normalized_domain) {
            if !domains.contains(&origin_domain) {
                domains.push(origin_domain);
            }
        }

        for domain in domains {
            self.memory
                .write()
                .insert(domain.clone(), FaviconImage::Texture(texture.clone()));
            self.write_to_disk(&domain, texture.clone());
        }
    }

    fn write_to_disk(&self, domain: &str, texture: Arc<dyn Texture>) {
        if !self.on_disk.lock().insert(domain.to_string()) {
            return;
        }
        let weak = self.weak.clone();
        let domain = domain.to_string();
        self.runner.spawn(Box::new(move || {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let original = texture.png_data();
            let sized = texture.scaled_png(config::FAVICON_EXPORT_SIZE);
            let result = (|| -> std::io::Result<()> {
                std::fs::create_dir_all(&this.dir)?;
                if let Some(bytes) = original {
                    std::fs::write(this.disk_path(&domain), bytes)?;
                }
                if let Some(bytes) = sized {
                    std::fs::write(this.sized_path(&domain), bytes)?;
                }
                Ok(())
            })();
            if let Err(e) = result {
                // Retrying is pointless; allow a later attempt to start
                // fresh but only log the first failure per domain.
                this.on_disk.lock().remove(&domain);
                this.warn_once(&domain, &e.to_string());
            }
        }));
    }

    fn warn_once(&self, domain: &str, message: &str) {
        let mut warned = self.warned.lock();
        match warned.get_mut(domain) {
            Some(count) => *count += 1,
            None => {
                warned.insert(domain.to_string(), 0);
                log::warn!(
                    "Favicon disk write failed for {}: {} (further failures suppressed)",
                    domain,
                    message
                );
            }
        }
    }

    /// Count of suppressed warnings for a domain after the first.
    pub fn suppressed_warnings(&self, domain: &str) -> u64 {
        self.warned.lock().get(domain).copied().unwrap_or(0)
    }

    /// Full four-tier lookup. The callback may run synchronously (memory
    /// hit) or from a worker thread; UI consumers route it through the
    /// coalescer.
    pub fn lookup(&self, domain: &str, page_uri: &str, callback: LookupCallback) {
        if let Some(hit) = self.cached(domain) {
            callback(Some(hit));
            return;
        }

        let start_job = {
            let mut inflight = self.inflight.lock();
            match inflight.get_mut(domain) {
                Some(waiters) => {
                    waiters.push(callback);
                    false
                }
                None => {
                    inflight.insert(domain.to_string(), vec![callback]);
                    true
                }
            }
        };
        if !start_job {
            return;
        }

        let weak = self.weak.clone();
        let domain = domain.to_string();
        let page_uri = page_uri.to_string();
        self.runner.spawn(Box::new(move || {
            let Some(this) = weak.upgrade() else {
                return;
            };
            let found = this.lookup_slow_tiers(&domain, &page_uri);
            if let Some(image) = &found {
                this.memory.write().insert(domain.clone(), image.clone());
            }
            let waiters = this.inflight.lock().remove(&domain).unwrap_or_default();
            for waiter in waiters {
                waiter(found.clone());
            }
        }));
    }

    fn lookup_slow_tiers(&self, domain: &str, page_uri: &str) -> Option<FaviconImage> {
        match std::fs::read(self.disk_path(domain)) {
            Ok(bytes) => {
                self.on_disk.lock().insert(domain.to_string());
                return Some(FaviconImage::Png(bytes));
            }
            Err(_) => {}
        }

        let engine_db = self.engine_db.lock().clone();
        if let Some(db) = engine_db {
            if let Some(texture) = db.favicon_for(page_uri) {
                return Some(FaviconImage::Texture(texture));
            }
        }

        let fetcher = self.fetcher.lock().clone();
        if let Some(fetcher) = fetcher {
            if let Some(bytes) = fetcher.fetch(domain) {
                return Some(FaviconImage::Png(bytes));
            }
        }

        None
    }

    /// Warm the memory tier for a domain ahead of navigation.
    pub fn preload(&self, domain: &str) {
        self.lookup(domain, "", Box::new(|_| {}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeTexture, InlineRunner, ManualRunner};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_sanitize_domain_filename() {
        assert_eq!(sanitize_domain_filename("example.com"), "example.com");
        assert_eq!(
            sanitize_domain_filename("weird:domain/with*chars?"),
            "weird_domain_with_chars_"
        );
    }

    #[test]
    fn test_store_writes_original_and_sized_png() {
        let dir = tempfile::tempdir().unwrap();
        let service = FaviconService::new(dir.path().join("favicons"), Arc::new(InlineRunner));

        let texture = Arc::new(FakeTexture::new(64, 64));
        service.store_texture(texture, "https://www.Example.com/page", None);

        assert!(service.cached("example.com").is_some());
        assert!(service.disk_path("example.com").exists());
        assert!(service.sized_path("example.com").exists());
    }

    #[test]
    fn test_cross_domain_redirect_stores_both_domains() {
        let dir = tempfile::tempdir().unwrap();
        let service = FaviconService::new(dir.path().join("favicons"), Arc::new(InlineRunner));

        let texture = Arc::new(FakeTexture::new(16, 16));
        service.store_texture(
            texture,
            "https://final.example/landing",
            Some("https://typed.example/"),
        );

        assert!(service.cached("final.example").is_some());
        assert!(service.cached("typed.example").is_some());
        assert!(service.disk_path("typed.example").exists());
    }

    #[test]
    fn test_lookup_falls_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("favicons");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join("example.com.png"), b"png-bytes").unwrap();

        let service = FaviconService::new(cache, Arc::new(InlineRunner));
        let hit = Arc::new(Mutex::new(None));
        let seen = hit.clone();
        service.lookup(
            "example.com",
            "https://example.com/",
            Box::new(move |image| *seen.lock() = image),
        );

        let got = hit.lock().take().expect("disk tier should hit");
        assert_eq!(got.png_bytes().as_deref(), Some(b"png-bytes".as_slice()));
        // Now cached in memory.
        assert!(service.cached("example.com").is_some());
    }

    #[test]
    fn test_concurrent_lookups_share_one_fetch() {
        struct CountingFetcher(AtomicUsize);
        impl FaviconFetcher for CountingFetcher {
            fn fetch(&self, _domain: &str) -> Option<Vec<u8>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Some(b"fetched".to_vec())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ManualRunner::new());
        let service = FaviconService::new(dir.path().join("favicons"), runner.clone());
        let fetcher = Arc::new(CountingFetcher(AtomicUsize::new(0)));
        service.set_fetcher(fetcher.clone());

        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            service.lookup(
                "example.com",
                "https://example.com/",
                Box::new(move |image| {
                    if image.is_some() {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            );
        }

        // All three waiters queued behind one job.
        assert_eq!(runner.pending(), 1);
        runner.run_all();

        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disk_failure_warns_once() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the cache directory should be makes every write fail.
        let bogus = dir.path().join("favicons");
        std::fs::write(&bogus, b"not a directory").unwrap();

        let service = FaviconService::new(bogus, Arc::new(InlineRunner));
        for _ in 0..3 {
            let texture = Arc::new(FakeTexture::new(8, 8));
            service.store_texture(texture, "https://example.com/", None);
        }

        assert_eq!(service.suppressed_warnings("example.com"), 2);
    }
}
