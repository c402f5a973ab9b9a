//! Async asset loading with ticket-based polling
//!
//! Requests go to a worker loop on a dedicated tokio runtime which runs
//! `AssetStore::load` on the blocking pool, a bounded number at a time.
//! Results come back over an unbounded channel and are drained by
//! [`AssetLoader::poll`] from the caller's thread, so nothing here blocks
//! the frame. An immediate mode resolves requests synchronously for
//! headless hosts and tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::core::types::Result;
use crate::streaming::asset::{AssetKind, AssetStore, TextureAsset};

/// Handle to one requested asset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AssetTicket(u64);

#[derive(Debug)]
struct AssetRequest {
    ticket: AssetTicket,
    key: String,
    kind: AssetKind,
}

/// Resolution of a request; `asset` is `None` when not found or failed
#[derive(Debug)]
struct AssetResponse {
    ticket: AssetTicket,
    asset: Option<TextureAsset>,
}

enum Backend {
    Threaded {
        request_tx: mpsc::UnboundedSender<AssetRequest>,
        result_rx: mpsc::UnboundedReceiver<AssetResponse>,
        runtime: Option<Runtime>,
    },
    Immediate,
}

pub struct AssetLoader {
    store: Arc<dyn AssetStore>,
    backend: Backend,
    next_ticket: u64,
    in_flight: HashSet<AssetTicket>,
    /// Released while in flight; results are dropped on arrival
    abandoned: HashSet<AssetTicket>,
    resolved: HashMap<AssetTicket, Option<TextureAsset>>,
}

impl AssetLoader {
    /// Create a loader with its own runtime
    ///
    /// # Arguments
    /// * `store` - Backend that resolves keys
    /// * `max_concurrent` - Maximum number of loads running at once
    pub fn new(store: Arc<dyn AssetStore>, max_concurrent: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("terrain-asset-loader")
            .enable_all()
            .build()?;

        let (request_tx, request_rx) = mpsc::unbounded_channel::<AssetRequest>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<AssetResponse>();

        let worker_store = store.clone();
        runtime.spawn(async move {
            Self::worker_loop(worker_store, max_concurrent.max(1), request_rx, result_tx).await;
        });

        Ok(Self {
            store,
            backend: Backend::Threaded {
                request_tx,
                result_rx,
                runtime: Some(runtime),
            },
            next_ticket: 0,
            in_flight: HashSet::new(),
            abandoned: HashSet::new(),
            resolved: HashMap::new(),
        })
    }

    /// Create a loader that resolves every request inside [`request`](Self::request)
    pub fn immediate(store: Arc<dyn AssetStore>) -> Self {
        Self {
            store,
            backend: Backend::Immediate,
            next_ticket: 0,
            in_flight: HashSet::new(),
            abandoned: HashSet::new(),
            resolved: HashMap::new(),
        }
    }

    async fn worker_loop(
        store: Arc<dyn AssetStore>,
        max_concurrent: usize,
        mut request_rx: mpsc::UnboundedReceiver<AssetRequest>,
        result_tx: mpsc::UnboundedSender<AssetResponse>,
    ) {
        let mut active = JoinSet::new();
        let mut queued: VecDeque<AssetRequest> = VecDeque::new();
        let mut open = true;

        loop {
            while active.len() < max_concurrent {
                let Some(request) = queued.pop_front() else { break };
                let store = store.clone();
                active.spawn_blocking(move || Self::load_blocking(store.as_ref(), request));
            }

            if !open && active.is_empty() {
                break;
            }

            tokio::select! {
                request = request_rx.recv(), if open => match request {
                    Some(request) => queued.push_back(request),
                    None => open = false,
                },
                Some(joined) = active.join_next(), if !active.is_empty() => match joined {
                    Ok(response) => {
                        // Receiver gone means the loader was dropped
                        let _ = result_tx.send(response);
                    }
                    Err(e) => log::error!("Asset load task failed: {}", e),
                },
            }
        }
    }

    fn load_blocking(store: &dyn AssetStore, request: AssetRequest) -> AssetResponse {
        let AssetRequest { ticket, key, kind } = request;
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| store.load(&key, kind)));
        let asset = match outcome {
            Ok(Ok(asset)) => asset,
            Ok(Err(e)) => {
                log::warn!("Asset '{}' failed to load, using default: {}", key, e);
                None
            }
            Err(_) => {
                log::error!("Asset store panicked while loading '{}'", key);
                None
            }
        };
        AssetResponse { ticket, asset }
    }

    /// Request an asset. The result is picked up by [`poll`](Self::poll).
    pub fn request(&mut self, key: String, kind: AssetKind) -> AssetTicket {
        let ticket = AssetTicket(self.next_ticket);
        self.next_ticket += 1;

        match &self.backend {
            Backend::Immediate => {
                let response = Self::load_blocking(self.store.as_ref(), AssetRequest { ticket, key, kind });
                self.resolved.insert(ticket, response.asset);
            }
            Backend::Threaded { request_tx, .. } => {
                log::trace!("Requesting asset '{}' ({:?})", key, kind);
                if request_tx.send(AssetRequest { ticket, key, kind }).is_err() {
                    log::error!("Asset loader worker is gone, treating request as not found");
                    self.resolved.insert(ticket, None);
                } else {
                    self.in_flight.insert(ticket);
                }
            }
        }
        ticket
    }

    /// Drain completed loads (non-blocking)
    pub fn poll(&mut self) {
        let Backend::Threaded { result_rx, .. } = &mut self.backend else {
            return;
        };
        while let Ok(response) = result_rx.try_recv() {
            self.in_flight.remove(&response.ticket);
            if !self.abandoned.remove(&response.ticket) {
                self.resolved.insert(response.ticket, response.asset);
            }
        }
    }

    pub fn is_ready(&self, ticket: AssetTicket) -> bool {
        self.resolved.contains_key(&ticket)
    }

    /// Borrow a resolved asset; `None` if missing or not resolved yet
    pub fn get(&self, ticket: AssetTicket) -> Option<&TextureAsset> {
        self.resolved.get(&ticket).and_then(|a| a.as_ref())
    }

    /// Drop a request and its asset. Safe to call at any point.
    pub fn release(&mut self, ticket: AssetTicket) {
        if self.resolved.remove(&ticket).is_none() && self.in_flight.remove(&ticket) {
            self.abandoned.insert(ticket);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.backend, Backend::Immediate)
    }

    pub fn store(&self) -> Arc<dyn AssetStore> {
        self.store.clone()
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        if let Backend::Threaded { runtime, .. } = &mut self.backend {
            // Blocking loads cannot be cancelled; don't wait for them
            if let Some(runtime) = runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::streaming::asset::MemoryAssetStore;
    use std::time::{Duration, Instant};

    struct FailingStore;

    impl AssetStore for FailingStore {
        fn load(&self, key: &str, _kind: AssetKind) -> Result<Option<TextureAsset>> {
            if key == "panic" {
                panic!("store exploded");
            }
            Err(Error::Asset {
                key: key.to_string(),
                reason: "unreadable".into(),
            })
        }
    }

    fn store_with(key: &str) -> Arc<MemoryAssetStore> {
        let store = Arc::new(MemoryAssetStore::new());
        store.insert(key, TextureAsset::uniform_height(1, 1, 7.0));
        store
    }

    fn wait_ready(loader: &mut AssetLoader, tickets: &[AssetTicket]) {
        let start = Instant::now();
        while !tickets.iter().all(|t| loader.is_ready(*t)) {
            assert!(start.elapsed() < Duration::from_secs(10), "loads never resolved");
            std::thread::sleep(Duration::from_millis(1));
            loader.poll();
        }
    }

    #[test]
    fn test_immediate_resolves_in_request() {
        let mut loader = AssetLoader::immediate(store_with("h"));
        let found = loader.request("h".into(), AssetKind::Height);
        let missing = loader.request("nope".into(), AssetKind::Height);

        assert!(loader.is_ready(found));
        assert!(loader.is_ready(missing));
        assert!(loader.get(found).is_some());
        assert!(loader.get(missing).is_none());

        loader.release(found);
        assert!(!loader.is_ready(found));
        assert_eq!(loader.resolved_count(), 1);
    }

    #[test]
    fn test_threaded_round_trip() {
        let mut loader = AssetLoader::new(store_with("h"), 2).unwrap();
        let tickets: Vec<_> = ["h", "x", "h"]
            .iter()
            .map(|k| loader.request(k.to_string(), AssetKind::Height))
            .collect();

        wait_ready(&mut loader, &tickets);
        assert_eq!(loader.in_flight_count(), 0);
        assert_eq!(loader.get(tickets[0]).map(|a| a.texel(0, 0)[0]), Some(7.0));
        assert!(loader.get(tickets[1]).is_none());
    }

    #[test]
    fn test_released_in_flight_result_is_dropped() {
        let mut loader = AssetLoader::new(store_with("h"), 1).unwrap();
        let dropped = loader.request("h".into(), AssetKind::Height);
        loader.release(dropped);
        let kept = loader.request("h".into(), AssetKind::Height);

        wait_ready(&mut loader, &[kept]);
        // Results arrive in order with a single worker slot
        assert!(!loader.is_ready(dropped));
        assert_eq!(loader.resolved_count(), 1);
    }

    #[test]
    fn test_store_errors_become_not_found() {
        let mut loader = AssetLoader::immediate(Arc::new(FailingStore));
        let err = loader.request("broken".into(), AssetKind::Mask);
        let panicked = loader.request("panic".into(), AssetKind::Mask);
        assert!(loader.is_ready(err) && loader.get(err).is_none());
        assert!(loader.is_ready(panicked) && loader.get(panicked).is_none());
    }
}
