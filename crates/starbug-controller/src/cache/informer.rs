use crate::cache::store::{Store, StoreChange};
use crate::config::InformerConfig;
use crate::traits::{ListerWatcher, ResourceEventHandler};
use futures_util::StreamExt;
use parking_lot::RwLock;
use starbug_core::{Resource, WatchEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared "initial list has been delivered" flag
#[derive(Debug, Clone, Default)]
pub struct SyncedFlag(Arc<AtomicBool>);

impl SyncedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_synced(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Change produced by the reflector, applied by the processor
#[derive(Debug)]
enum Delta<K> {
    Replace(Vec<K>),
    Upsert(K),
    Deleted(K),
}

enum WatchOutcome {
    /// Stream ended normally; watch again from the last version
    Ended { delivered: usize },
    /// Version expired or the watch broke; list again
    Relist,
    Cancelled,
}

/// Keeps a [`Store`] in sync with a [`ListerWatcher`] and notifies handlers.
///
/// Two halves run under [`Informer::run`]: the reflector lists and watches
/// the source and pushes deltas into a bounded channel, and the processor
/// applies each delta to the store and then calls every registered handler.
pub struct Informer<K: Resource> {
    name: String,
    lister_watcher: Arc<dyn ListerWatcher<K>>,
    store: Arc<Store<K>>,
    handlers: RwLock<Vec<Arc<dyn ResourceEventHandler<K>>>>,
    synced: SyncedFlag,
    config: InformerConfig,
}

impl<K: Resource> Informer<K> {
    /// Create an informer with a fresh store
    pub fn new(
        name: impl Into<String>,
        lister_watcher: Arc<dyn ListerWatcher<K>>,
        config: InformerConfig,
    ) -> Self {
        Self::with_store(name, lister_watcher, Arc::new(Store::new()), config)
    }

    /// Create an informer feeding an existing store (e.g. one with extra indexers)
    pub fn with_store(
        name: impl Into<String>,
        lister_watcher: Arc<dyn ListerWatcher<K>>,
        store: Arc<Store<K>>,
        config: InformerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            lister_watcher,
            store,
            handlers: RwLock::new(Vec::new()),
            synced: SyncedFlag::new(),
            config,
        }
    }

    pub fn store(&self) -> Arc<Store<K>> {
        self.store.clone()
    }

    pub fn synced_flag(&self) -> SyncedFlag {
        self.synced.clone()
    }

    /// True once the first full listing has been applied and dispatched
    pub fn has_synced(&self) -> bool {
        self.synced.is_synced()
    }

    /// Register a handler; it only sees changes applied after registration
    pub fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.write().push(handler);
    }

    /// Run reflector and processor until `token` is cancelled
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!("Starting {} informer", self.name);

        let (tx, mut rx) = mpsc::channel(self.config.delta_buffer.max(1));
        let reflector = tokio::spawn(self.clone().reflect(tx, token.clone()));

        let mut resync = self.config.resync_period.map(|period| {
            let mut ticker: Interval = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                delta = rx.recv() => match delta {
                    Some(delta) => self.process(delta),
                    None => break,
                },
                _ = tick(&mut resync) => self.resync(),
            }
        }

        // The reflector may be blocked on a full channel; closing it lets the send fail
        drop(rx);
        if let Err(e) = reflector.await {
            warn!("{} reflector task failed: {}", self.name, e);
        }
        info!("{} informer stopped", self.name);
    }

    async fn reflect(self: Arc<Self>, tx: mpsc::Sender<Delta<K>>, token: CancellationToken) {
        loop {
            let listed = tokio::select! {
                _ = token.cancelled() => return,
                listed = self.lister_watcher.list() => listed,
            };

            let mut resource_version = match listed {
                Ok(list) => {
                    debug!(
                        "{} list returned {} objects at version {}",
                        self.name,
                        list.items.len(),
                        list.resource_version
                    );
                    if !send(&tx, Delta::Replace(list.items), &token).await {
                        return;
                    }
                    list.resource_version
                }
                Err(e) => {
                    warn!("{} list failed: {}", self.name, e);
                    if !self.backoff(&token).await {
                        return;
                    }
                    continue;
                }
            };

            loop {
                match self.watch_once(&mut resource_version, &tx, &token).await {
                    WatchOutcome::Cancelled => return,
                    WatchOutcome::Relist => {
                        if !self.backoff(&token).await {
                            return;
                        }
                        break;
                    }
                    WatchOutcome::Ended { delivered } => {
                        debug!(
                            "{} watch ended, resuming from version {}",
                            self.name, resource_version
                        );
                        // A source that closes immediately would otherwise spin
                        if delivered == 0 && !self.backoff(&token).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn watch_once(
        &self,
        resource_version: &mut String,
        tx: &mpsc::Sender<Delta<K>>,
        token: &CancellationToken,
    ) -> WatchOutcome {
        let opened = tokio::select! {
            _ = token.cancelled() => return WatchOutcome::Cancelled,
            opened = self.lister_watcher.watch(resource_version) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{} watch could not be opened: {}", self.name, e);
                return WatchOutcome::Relist;
            }
        };

        let mut delivered = 0;
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return WatchOutcome::Cancelled,
                next = stream.next() => next,
            };

            let delta = match next {
                None => return WatchOutcome::Ended { delivered },
                Some(Err(e)) => {
                    warn!("{} watch failed: {}", self.name, e);
                    return WatchOutcome::Relist;
                }
                Some(Ok(WatchEvent::Bookmark(version))) => {
                    if !version.is_empty() {
                        *resource_version = version;
                    }
                    continue;
                }
                Some(Ok(WatchEvent::Error(status))) => {
                    if status.is_gone() {
                        info!(
                            "{} watch version {} expired, relisting",
                            self.name, resource_version
                        );
                    } else {
                        warn!(
                            "{} watch returned error status: {}",
                            self.name,
                            status.message.as_deref().unwrap_or("unknown")
                        );
                    }
                    return WatchOutcome::Relist;
                }
                Some(Ok(WatchEvent::Added(obj))) | Some(Ok(WatchEvent::Modified(obj))) => {
                    Delta::Upsert(obj)
                }
                Some(Ok(WatchEvent::Deleted(obj))) => Delta::Deleted(obj),
            };

            let version = match &delta {
                Delta::Upsert(obj) | Delta::Deleted(obj) => obj.resource_version(),
                Delta::Replace(_) => None,
            };
            if let Some(version) = version {
                *resource_version = version.0;
            }

            if !send(tx, delta, token).await {
                return WatchOutcome::Cancelled;
            }
            delivered += 1;
        }
    }

    /// Sleep for the relist backoff; false when cancelled meanwhile
    async fn backoff(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.config.relist_backoff) => true,
        }
    }

    fn process(&self, delta: Delta<K>) {
        match delta {
            Delta::Replace(items) => {
                for change in self.store.replace(items) {
                    self.dispatch(change);
                }
                if !self.synced.is_synced() {
                    self.synced.mark_synced();
                    info!(
                        "{} informer synced with {} objects",
                        self.name,
                        self.store.len()
                    );
                }
            }
            Delta::Upsert(obj) => {
                let obj = Arc::new(obj);
                match self.store.add(obj.clone()) {
                    Ok(Some(old)) => self.dispatch(StoreChange::Updated { old, new: obj }),
                    Ok(None) => self.dispatch(StoreChange::Added(obj)),
                    Err(e) => warn!("{} ignoring watched object: {}", self.name, e),
                }
            }
            Delta::Deleted(obj) => {
                if let Err(e) = self.store.delete(&obj) {
                    warn!("{} ignoring deleted object: {}", self.name, e);
                    return;
                }
                self.dispatch(StoreChange::Deleted(Arc::new(obj)));
            }
        }
    }

    fn dispatch(&self, change: StoreChange<K>) {
        let handlers = self.handlers.read().clone();
        for handler in &handlers {
            match &change {
                StoreChange::Added(obj) => handler.on_add(obj),
                StoreChange::Updated { old, new } => handler.on_update(old, new),
                StoreChange::Deleted(obj) => handler.on_delete(obj),
            }
        }
    }

    fn resync(&self) {
        if !self.synced.is_synced() {
            return;
        }
        let objects = self.store.list();
        debug!("{} resync of {} objects", self.name, objects.len());
        let handlers = self.handlers.read().clone();
        for obj in &objects {
            for handler in &handlers {
                handler.on_update(obj, obj);
            }
        }
    }
}

/// Hand a delta to the processor; false when cancelled or the processor is gone
async fn send<K>(
    tx: &mpsc::Sender<Delta<K>>,
    delta: Delta<K>,
    token: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        sent = tx.send(delta) => sent.is_ok(),
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Wait until every flag is synced; false if cancelled first
pub async fn wait_for_cache_sync(flags: &[SyncedFlag], token: &CancellationToken) -> bool {
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        if flags.iter().all(SyncedFlag::is_synced) {
            return true;
        }
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = poll.tick() => {}
        }
    }
}
