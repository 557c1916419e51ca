//! Process-wide subscriber cache.
//!
//! One `SubscriberCache` is built at startup and shared by every consumer.
//! It owns the `{subscribers, loading, error, initialized}` state, publishes
//! it through a `watch` channel, and guarantees at most one source fetch in
//! flight: callers that arrive while a fetch is running wait for it and
//! share its result instead of issuing their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::db::SharedDb;
use crate::error::SupportError;
use crate::mirror::RelationalMirror;
use crate::tabular::TabularSource;
use crate::types::Subscriber;

/// Where subscriber lists come from.
#[async_trait]
pub trait SubscriberSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Subscriber>, SupportError>;

    fn name(&self) -> &'static str;
}

/// Reads straight from the tabular store (bounded listing).
pub struct TabularSubscriberSource {
    client: Arc<dyn TabularSource>,
}

impl TabularSubscriberSource {
    pub fn new(client: Arc<dyn TabularSource>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SubscriberSource for TabularSubscriberSource {
    async fn load(&self) -> Result<Vec<Subscriber>, SupportError> {
        let listing = self.client.fetch_subscribers().await?;
        Ok(listing.subscribers)
    }

    fn name(&self) -> &'static str {
        "tabular"
    }
}

/// Reads the relational replica. With `auto_sync` set, an empty replica
/// triggers one mirror run before re-reading.
pub struct ReplicaSubscriberSource {
    db: SharedDb,
    auto_sync: Option<Arc<RelationalMirror>>,
}

impl ReplicaSubscriberSource {
    pub fn new(db: SharedDb, auto_sync: Option<Arc<RelationalMirror>>) -> Self {
        Self { db, auto_sync }
    }
}

#[async_trait]
impl SubscriberSource for ReplicaSubscriberSource {
    async fn load(&self) -> Result<Vec<Subscriber>, SupportError> {
        let rows = self.db.lock().list_subscribers()?;
        if !rows.is_empty() {
            return Ok(rows);
        }
        let Some(mirror) = &self.auto_sync else {
            return Ok(rows);
        };

        log::info!("Subscriber replica empty, running mirror before first read");
        mirror.sync().await?;
        let rows = self.db.lock().list_subscribers()?;
        Ok(rows)
    }

    fn name(&self) -> &'static str {
        "replica"
    }
}

/// Observable cache state.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub subscribers: Arc<Vec<Subscriber>>,
    pub loading: bool,
    /// Human-readable failure; `None` in manual-entry mode.
    pub error: Option<String>,
    pub initialized: bool,
    /// No subscriber source is configured: forms take free-text identities.
    pub manual_entry: bool,
}

pub struct SubscriberCache {
    source: Option<Arc<dyn SubscriberSource>>,
    state: watch::Sender<CacheEntry>,
    fetch_lock: tokio::sync::Mutex<()>,
    /// Completed fetches; lets a waiter detect that the fetch it queued
    /// behind already produced a fresh result.
    generation: AtomicU64,
}

impl SubscriberCache {
    /// `None` means the tabular store is not configured.
    pub fn new(source: Option<Arc<dyn SubscriberSource>>) -> Self {
        let (state, _) = watch::channel(CacheEntry::default());
        Self {
            source,
            state,
            fetch_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> CacheEntry {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheEntry> {
        self.state.subscribe()
    }

    /// Load once; later calls return the cached state.
    pub async fn ensure_loaded(&self) -> CacheEntry {
        let initialized = self.state.borrow().initialized;
        if initialized {
            return self.snapshot();
        }
        self.fetch(false).await
    }

    /// Invalidate and re-fetch, superseding whatever is cached.
    pub async fn reload(&self) -> CacheEntry {
        self.fetch(true).await
    }

    /// Look up a cached subscriber by id or external record id.
    pub fn find(&self, id: &str) -> Option<Subscriber> {
        self.state
            .borrow()
            .subscribers
            .iter()
            .find(|s| s.id == id || s.external_record_id.as_deref() == Some(id))
            .cloned()
    }

    async fn fetch(&self, force: bool) -> CacheEntry {
        let observed = self.generation.load(Ordering::SeqCst);
        let _in_flight = self.fetch_lock.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            // Someone else fetched while we waited
            return self.snapshot();
        }
        let initialized = self.state.borrow().initialized;
        if !force && initialized {
            return self.snapshot();
        }

        self.state.send_modify(|entry| {
            entry.loading = true;
            entry.error = None;
            if force {
                entry.initialized = false;
            }
        });

        let result = match &self.source {
            Some(source) => {
                log::debug!("Loading subscribers from {}", source.name());
                source.load().await
            }
            None => Err(SupportError::ConfigurationMissing(
                "no subscriber source configured".to_string(),
            )),
        };

        self.state.send_modify(|entry| {
            entry.loading = false;
            entry.initialized = true;
            match result {
                Ok(subscribers) => {
                    log::info!("Loaded {} subscribers", subscribers.len());
                    entry.subscribers = Arc::new(subscribers);
                    entry.error = None;
                    entry.manual_entry = false;
                }
                Err(e) if e.is_configuration_missing() => {
                    log::info!("Subscriber source not configured, manual entry mode");
                    entry.subscribers = Arc::new(Vec::new());
                    entry.error = None;
                    entry.manual_entry = true;
                }
                Err(e) => {
                    log::warn!("Subscriber load failed: {}", e);
                    entry.subscribers = Arc::new(Vec::new());
                    entry.error = Some(e.user_message());
                    entry.manual_entry = false;
                }
            }
        });
        self.generation.fetch_add(1, Ordering::SeqCst);

        self.snapshot()
    }
}
