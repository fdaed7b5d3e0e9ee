//! Detects the end of the initial request crawl.
//!
//! The first wave of requests after startup fans out into chained
//! resolve/load/transform work; tooling (notably the deps optimizer) wants a
//! single signal once that activity quiesces. Requests register here and the
//! finder fires its one-shot callbacks once every registered id settled and a
//! quiet window elapsed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Quiet window that coalesces bursts of micro-imports between chained
/// transforms; without it a lull between two imports would read as idle.
const CRAWL_IDLE_DEBOUNCE: Duration = Duration::from_millis(50);

/// How a wait for crawl idle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOutcome {
    /// True when the environment shut down before the crawl quiesced.
    pub cancelled: bool,
}

struct CrawlState {
    /// Ids currently in flight.
    registered: FxHashSet<String>,
    /// Every id ever registered; registration is idempotent per id.
    seen: FxHashSet<String>,
    cancelled: bool,
    called: bool,
    timer: Option<JoinHandle<()>>,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

struct CrawlInner {
    state: Mutex<CrawlState>,
    done_tx: watch::Sender<Option<CrawlOutcome>>,
}

/// Cheap-clone handle; background tasks hold their own copy.
#[derive(Clone)]
pub struct CrawlEndFinder {
    inner: Arc<CrawlInner>,
}

impl Default for CrawlEndFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlEndFinder {
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(CrawlInner {
                state: Mutex::new(CrawlState {
                    registered: FxHashSet::default(),
                    seen: FxHashSet::default(),
                    cancelled: false,
                    called: false,
                    timer: None,
                    callbacks: Vec::new(),
                }),
                done_tx,
            }),
        }
    }

    /// Append a one-shot callback run when the crawl quiesces.
    pub fn on_crawl_end(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.state.lock().callbacks.push(Box::new(callback));
    }

    /// Track `done` as in-flight crawl work for `id`. Re-registering an id
    /// that was seen before is a no-op.
    pub fn register_request_processing(
        &self,
        id: &str,
        done: impl Future<Output = ()> + Send + 'static,
    ) {
        {
            let mut state = self.inner.state.lock();
            if !state.seen.insert(id.to_string()) {
                return;
            }
            state.registered.insert(id.to_string());
        }

        let finder = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            // Settlement matters, not the outcome.
            done.await;
            finder.mark_id_as_done(&id);
        });
    }

    /// Wait until the crawl quiesces or is cancelled.
    ///
    /// `ignored_id` releases a request that would otherwise wait on itself:
    /// it is marked seen and done up front.
    pub async fn wait_for_requests_idle(&self, ignored_id: Option<&str>) -> CrawlOutcome {
        if let Some(id) = ignored_id {
            self.inner.state.lock().seen.insert(id.to_string());
            self.mark_id_as_done(id);
        }

        let mut rx = self.inner.done_tx.subscribe();
        loop {
            if let Some(outcome) = *rx.borrow() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return CrawlOutcome { cancelled: true };
            }
        }
    }

    /// Suppress future fires. Waiters resolve with `cancelled: true`.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.state.lock();
            state.cancelled = true;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
        self.resolve_once(CrawlOutcome { cancelled: true });
    }

    fn mark_id_as_done(&self, id: &str) {
        let mut state = self.inner.state.lock();
        if !state.registered.remove(id) {
            return;
        }
        if state.registered.is_empty() && !state.cancelled {
            self.restart_timer(&mut state);
        }
    }

    /// Restart the quiet-window timer; only an uninterrupted window fires.
    fn restart_timer(&self, state: &mut CrawlState) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let finder = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(CRAWL_IDLE_DEBOUNCE).await;
            finder.fire_if_idle();
        }));
    }

    fn fire_if_idle(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.cancelled || state.called || !state.registered.is_empty() {
                return;
            }
            state.called = true;
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback();
        }
        self.resolve_once(CrawlOutcome { cancelled: false });
    }

    /// First resolution wins; a racing cancel keeps its tag.
    fn resolve_once(&self, outcome: CrawlOutcome) {
        self.inner.done_tx.send_if_modified(|slot| match slot {
            Some(_) => false,
            None => {
                *slot = Some(outcome);
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let in_callback = Arc::clone(&count);
        (count, move || {
            in_callback.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_fires_once_after_quiet_window() {
        let finder = CrawlEndFinder::new();
        let (count, callback) = counter();
        finder.on_crawl_end(callback);

        let (tx_a, rx_a) = oneshot::channel::<()>();
        let (tx_b, rx_b) = oneshot::channel::<()>();
        finder.register_request_processing("a", async {
            let _ = rx_a.await;
        });
        finder.register_request_processing("b", async {
            let _ = rx_b.await;
        });

        tx_a.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tx_b.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // A late registration does not re-fire.
        finder.register_request_processing("c", async {});
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registration_is_idempotent_per_id() {
        let finder = CrawlEndFinder::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits_in_task = Arc::clone(&hits);
            finder.register_request_processing("same", async move {
                hits_in_task.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_resolves_after_fire() {
        let finder = CrawlEndFinder::new();
        finder.register_request_processing("a", async {});

        let outcome = finder.wait_for_requests_idle(None).await;
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_ignored_id_releases_self_waiter() {
        let finder = CrawlEndFinder::new();
        // "self" never completes on its own; ignoring it must unblock the wait.
        let (_tx, rx) = oneshot::channel::<()>();
        finder.register_request_processing("self", async {
            let _ = rx.await;
        });

        let outcome = finder.wait_for_requests_idle(Some("self")).await;
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_cancel_resolves_waiters_with_tag() {
        let finder = CrawlEndFinder::new();
        let (count, callback) = counter();
        finder.on_crawl_end(callback);

        let (_tx, rx) = oneshot::channel::<()>();
        finder.register_request_processing("stuck", async {
            let _ = rx.await;
        });

        let waiter = {
            let finder = finder.clone();
            tokio::spawn(async move { finder.wait_for_requests_idle(None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        finder.cancel();

        let outcome = waiter.await.unwrap();
        assert!(outcome.cancelled);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
