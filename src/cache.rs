//! Per-run remote document cache.
//!
//! One slot per normalized URL. The first load of a URL runs the fetch;
//! concurrent loads of the same URL wait on that fetch and receive the same
//! document or the same error. A cache lives for one resolution run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};
use url::Url;

use crate::error::LoadError;
use crate::loader::{parse_document, FetchRequest, Fetcher, RequestHook};
use crate::types::CacheStats;

type Loaded = Result<Arc<Value>, LoadError>;

/// Memoized, coalescing document loader.
pub struct RemoteCache<'a> {
    fetcher: &'a dyn Fetcher,
    hook: Option<&'a dyn RequestHook>,
    slots: Mutex<HashMap<Url, Arc<OnceCell<Loaded>>>>,
    fetches: AtomicUsize,
    hits: AtomicUsize,
}

/// Cache key for a document URL: the URL without its fragment.
pub fn normalize(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

impl<'a> RemoteCache<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, hook: Option<&'a dyn RequestHook>) -> Self {
        Self {
            fetcher,
            hook,
            slots: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }

    /// Register an already loaded document (the root) under its URL.
    pub async fn seed(&self, url: &Url, document: Arc<Value>) {
        let slot = Arc::new(OnceCell::new_with(Some(Ok(document))));
        self.slots.lock().await.insert(normalize(url), slot);
    }

    /// Load the document at `url`, fetching it at most once per run.
    pub async fn load(&self, url: &Url) -> Result<Arc<Value>, LoadError> {
        let key = normalize(url);
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(key.clone()).or_default().clone()
        };

        let mut fetched = false;
        let loaded = slot
            .get_or_init(|| {
                fetched = true;
                self.fetch(&key)
            })
            .await;

        if !fetched {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(url = %key, "remote cache hit");
        }
        loaded.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }

    async fn fetch(&self, url: &Url) -> Loaded {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let mut request = FetchRequest::new(url.clone());
        if let Some(hook) = self.hook {
            hook.prepare(&mut request);
        }

        debug!(url = %url, headers = request.headers.len(), "fetching document");
        let result = self.fetcher.fetch(&request).await.and_then(|text| {
            parse_document(&text).map_err(|message| LoadError::Parse {
                url: url.to_string(),
                message,
            })
        });

        match result {
            Ok(document) => Ok(Arc::new(document)),
            Err(e) => {
                warn!(url = %url, error = %e, "failed to load document");
                Err(e)
            }
        }
    }
}
