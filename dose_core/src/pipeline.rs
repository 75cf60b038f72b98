//! Live recomputation pipeline.
//!
//! Keeps an up-to-date [`AvailabilityInfo`] flowing to subscribers without
//! them polling the store or re-running the calculator themselves. The
//! first subscription bootstraps the catalog and starts three background
//! threads: a worker that folds the entry window, a timer that re-checks
//! availability as time passes with no writes, and a forwarder that turns
//! store change notifications into recompute triggers. When the last
//! subscriber drops, all three stop and the store listener is released.
//!
//! Entries older than the configured window are dropped before the fold,
//! so a dose outside the window never affects availability even when its
//! re-dose interval is still running. That cutoff is an explicit tradeoff
//! inherited from the windowed-recompute design; widen
//! `EngineConfig::window_days` if long-interval drugs matter.

use crate::config::EngineConfig;
use crate::store::MedicineStore;
use crate::{availability, catalog, AvailabilityInfo};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the store-change forwarder wakes to check for shutdown
const FORWARDER_POLL: Duration = Duration::from_millis(200);

#[derive(Debug)]
enum Trigger {
    Recompute,
    Shutdown,
}

/// Live availability feed over a [`MedicineStore`]
pub struct AvailabilityPipeline {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn MedicineStore>,
    config: EngineConfig,
    state: Mutex<PipelineState>,
    last_good: Mutex<Option<Arc<AvailabilityInfo>>>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct PipelineState {
    subscribers: Vec<(u64, Sender<Arc<AvailabilityInfo>>)>,
    error_subscribers: Vec<(u64, Sender<String>)>,
    worker: Option<Worker>,
}

struct Worker {
    trigger_tx: Sender<Trigger>,
    /// Dropping this disconnects the timer thread's sleep channel
    timer_stop_tx: Sender<()>,
    /// Flipped on teardown so the forwarder exits on its next poll
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

/// Handle to the availability stream; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    rx: Receiver<Arc<AvailabilityInfo>>,
    inner: Arc<Inner>,
}

impl Subscription {
    /// Block until the next snapshot
    pub fn recv(&self) -> Option<Arc<AvailabilityInfo>> {
        self.rx.recv().ok()
    }

    /// Block until the next snapshot or the timeout lapses
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<AvailabilityInfo>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking poll
    pub fn try_recv(&self) -> Option<Arc<AvailabilityInfo>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.remove_subscriber(self.id);
    }
}

/// Handle to the error channel, separate from the availability stream so
/// consumers can tell "no data yet" from "data temporarily unavailable"
pub struct ErrorSubscription {
    id: u64,
    rx: Receiver<String>,
    inner: Arc<Inner>,
}

impl ErrorSubscription {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ErrorSubscription {
    fn drop(&mut self) {
        self.inner.remove_error_subscriber(self.id);
    }
}

impl AvailabilityPipeline {
    pub fn new(store: Arc<dyn MedicineStore>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                state: Mutex::new(PipelineState::default()),
                last_good: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to availability snapshots
    ///
    /// The first subscriber activates the pipeline: the catalog is seeded
    /// if empty and background recomputation starts. Every subscriber
    /// receives the current snapshot right away when one exists, then
    /// every subsequent snapshot in publication order.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel();

        if let Some(current) = self.inner.current() {
            let _ = tx.send(current);
        }

        let mut state = self.inner.state.lock().unwrap();
        state.subscribers.push((id, tx));

        match &state.worker {
            Some(worker) => {
                // Refresh so a late subscriber is not left on a stale tick
                let _ = worker.trigger_tx.send(Trigger::Recompute);
            }
            None => {
                state.worker = Some(Inner::start_worker(&self.inner));
            }
        }
        drop(state);

        Subscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Subscribe to store/seeding failures
    ///
    /// Does not activate the pipeline by itself; errors flow only while
    /// at least one availability subscriber keeps it running.
    pub fn subscribe_errors(&self) -> ErrorSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel();
        self.inner
            .state
            .lock()
            .unwrap()
            .error_subscribers
            .push((id, tx));

        ErrorSubscription {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Latest published snapshot, if any computation has succeeded yet
    pub fn current(&self) -> Option<Arc<AvailabilityInfo>> {
        self.inner.current()
    }
}

impl Inner {
    fn current(&self) -> Option<Arc<AvailabilityInfo>> {
        self.last_good.lock().unwrap().clone()
    }

    fn start_worker(inner: &Arc<Inner>) -> Worker {
        let (trigger_tx, trigger_rx) = channel::<Trigger>();
        let (timer_stop_tx, timer_stop_rx) = channel::<()>();
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(3);

        // Worker: serializes every compute() invocation
        let worker_inner = Arc::clone(inner);
        handles.push(std::thread::spawn(move || {
            worker_inner.bootstrap();
            worker_inner.recompute_and_publish();
            loop {
                match trigger_rx.recv() {
                    Ok(Trigger::Shutdown) | Err(_) => break,
                    Ok(Trigger::Recompute) => {
                        // Coalesce bursts: one fold covers every pending
                        // trigger that arrived while we were busy
                        loop {
                            match trigger_rx.try_recv() {
                                Ok(Trigger::Recompute) => continue,
                                Ok(Trigger::Shutdown) => return,
                                Err(TryRecvError::Empty) => break,
                                Err(TryRecvError::Disconnected) => return,
                            }
                        }
                        worker_inner.recompute_and_publish();
                    }
                }
            }
            tracing::debug!("Availability worker stopped");
        }));

        // Timer: advances can_take transitions caused purely by time
        let tick = inner.config.tick_interval();
        let timer_trigger_tx = trigger_tx.clone();
        handles.push(std::thread::spawn(move || loop {
            match timer_stop_rx.recv_timeout(tick) {
                Err(RecvTimeoutError::Timeout) => {
                    if timer_trigger_tx.send(Trigger::Recompute).is_err() {
                        break;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }));

        // Forwarder: store change notifications become recompute triggers
        let listener = inner.store.subscribe_changes();
        let forward_trigger_tx = trigger_tx.clone();
        let forward_stop = Arc::clone(&stop);
        handles.push(std::thread::spawn(move || loop {
            if forward_stop.load(Ordering::Relaxed) {
                break;
            }
            match listener.recv_timeout(FORWARDER_POLL) {
                Ok(change) => {
                    tracing::debug!("Store changed ({:?}), scheduling recompute", change);
                    if forward_trigger_tx.send(Trigger::Recompute).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }));

        tracing::debug!("Availability pipeline activated");
        Worker {
            trigger_tx,
            timer_stop_tx,
            stop,
            handles,
        }
    }

    /// One-time activation check: make sure the catalog has content
    fn bootstrap(&self) {
        match catalog::seed_default_drugs(self.store.as_ref()) {
            Ok(true) => tracing::info!("Bootstrapped default drug catalog"),
            Ok(false) => {}
            Err(e) => {
                // Degraded but non-fatal: subscribers get an empty
                // snapshot instead of waiting forever
                tracing::warn!("Catalog bootstrap failed: {}", e);
                self.report_error(format!("catalog bootstrap failed: {}", e));
                self.publish(Arc::new(AvailabilityInfo::empty(Utc::now())));
            }
        }
    }

    fn recompute_and_publish(&self) {
        let now = Utc::now();
        let cutoff = now - self.config.window_cutoff();

        let drugs = match self.store.load_drugs() {
            Ok(drugs) => drugs,
            Err(e) => {
                tracing::warn!("Failed to read drug catalog: {}. Keeping last snapshot.", e);
                self.report_error(format!("drug catalog read failed: {}", e));
                return;
            }
        };

        let entries = match self.store.load_entries(Some(cutoff)) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read entry log: {}. Keeping last snapshot.", e);
                self.report_error(format!("entry log read failed: {}", e));
                return;
            }
        };

        let info = Arc::new(availability::compute(&entries, &drugs, now));
        tracing::debug!(
            "Recomputed availability for {} drugs over {} entries",
            info.by_drug.len(),
            entries.len()
        );
        self.publish(info);
    }

    /// Replace the snapshot and fan it out in publication order
    fn publish(&self, info: Arc<AvailabilityInfo>) {
        *self.last_good.lock().unwrap() = Some(Arc::clone(&info));

        let mut state = self.state.lock().unwrap();
        state
            .subscribers
            .retain(|(_, tx)| tx.send(Arc::clone(&info)).is_ok());
    }

    fn report_error(&self, message: String) {
        let mut state = self.state.lock().unwrap();
        state
            .error_subscribers
            .retain(|(_, tx)| tx.send(message.clone()).is_ok());
    }

    fn remove_subscriber(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(sub_id, _)| *sub_id != id);

        // Tear down outside the lock; the worker publishes under it
        let worker = if state.subscribers.is_empty() {
            state.worker.take()
        } else {
            None
        };
        drop(state);

        if let Some(worker) = worker {
            worker.shutdown();
            tracing::debug!("Availability pipeline deactivated");
        }
    }

    fn remove_error_subscriber(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        state.error_subscribers.retain(|(sub_id, _)| *sub_id != id);
    }
}

impl Worker {
    fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.trigger_tx.send(Trigger::Shutdown);
        drop(self.timer_stop_tx);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChangeListener, MemoryStore, StoreChange};
    use crate::{Drug, MedicineEntry, Result};
    use chrono::{DateTime, Duration as ChronoDuration};
    use uuid::Uuid;

    fn test_config() -> EngineConfig {
        EngineConfig {
            window_days: 28,
            // Long enough that ticks never interfere unless a test wants them
            tick_seconds: 3600,
        }
    }

    fn wait_for<F>(sub: &Subscription, mut predicate: F) -> Arc<AvailabilityInfo>
    where
        F: FnMut(&AvailabilityInfo) -> bool,
    {
        for _ in 0..50 {
            if let Some(info) = sub.recv_timeout(Duration::from_millis(200)) {
                if predicate(&info) {
                    return info;
                }
            }
        }
        panic!("Pipeline never published a matching snapshot");
    }

    #[test]
    fn test_first_subscriber_seeds_and_receives_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store.clone(), test_config());

        let sub = pipeline.subscribe();
        let info = wait_for(&sub, |info| !info.by_drug.is_empty());

        assert_eq!(info.by_drug.len(), 5);
        assert!(info.by_drug.values().all(|a| a.can_take));
        assert_eq!(store.load_drugs().unwrap().len(), 5);
    }

    #[test]
    fn test_entry_mutation_triggers_recompute() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store.clone(), test_config());

        let sub = pipeline.subscribe();
        let initial = wait_for(&sub, |info| !info.by_drug.is_empty());

        let drug = initial.by_drug.values().next().unwrap().drug.clone();
        store
            .add_entry(MedicineEntry::single(&drug, 1.0, Utc::now()))
            .unwrap();

        let updated = wait_for(&sub, |info| {
            info.by_drug.get(&drug.id).map_or(false, |a| !a.can_take)
        });
        assert!(updated.by_drug[&drug.id].when > Utc::now());
    }

    #[test]
    fn test_drug_mutation_triggers_recompute() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store.clone(), test_config());

        let sub = pipeline.subscribe();
        wait_for(&sub, |info| !info.by_drug.is_empty());

        let added = Drug {
            id: Uuid::new_v4(),
            name: "Naproxen".into(),
            ingredients: vec!["Naproxen".into()],
            redose_hours: 8.0,
        };
        store.add_drug(added.clone()).unwrap();

        let updated = wait_for(&sub, |info| info.by_drug.contains_key(&added.id));
        assert!(updated.by_drug[&added.id].can_take);
    }

    #[test]
    fn test_timer_tick_republishes_without_mutations() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig {
            window_days: 28,
            tick_seconds: 1,
        };
        let pipeline = AvailabilityPipeline::new(store, config);

        let sub = pipeline.subscribe();
        let first = wait_for(&sub, |info| !info.by_drug.is_empty());

        // With no writes at all, the tick must still republish
        let second = sub
            .recv_timeout(Duration::from_secs(5))
            .expect("No tick-driven snapshot arrived");
        assert!(second.computed_at >= first.computed_at);
    }

    #[test]
    fn test_late_subscriber_gets_current_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store, test_config());

        let first_sub = pipeline.subscribe();
        wait_for(&first_sub, |info| !info.by_drug.is_empty());

        let late_sub = pipeline.subscribe();
        let info = late_sub
            .recv_timeout(Duration::from_secs(2))
            .expect("Late subscriber got nothing");
        assert!(!info.by_drug.is_empty());
    }

    #[test]
    fn test_snapshot_order_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store.clone(), test_config());

        let sub = pipeline.subscribe();
        wait_for(&sub, |info| !info.by_drug.is_empty());

        let drug = store.load_drugs().unwrap()[0].clone();
        for i in 0..5 {
            store
                .add_entry(MedicineEntry::single(
                    &drug,
                    1.0,
                    Utc::now() - ChronoDuration::hours(i),
                ))
                .unwrap();
        }

        let mut last: Option<DateTime<Utc>> = None;
        while let Some(info) = sub.recv_timeout(Duration::from_millis(500)) {
            let stamp = info.computed_at.unwrap();
            if let Some(prev) = last {
                assert!(stamp >= prev, "Snapshot went backwards in time");
            }
            last = Some(stamp);
        }
        assert!(last.is_some());
    }

    #[test]
    fn test_teardown_releases_store_listener() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store.clone(), test_config());

        let sub = pipeline.subscribe();
        wait_for(&sub, |info| !info.by_drug.is_empty());
        assert_eq!(store.listener_count(), 1);

        drop(sub);
        // The forwarder exits within one poll interval; the next
        // notification then prunes its dead sender
        std::thread::sleep(Duration::from_millis(400));
        let drug = store.load_drugs().unwrap()[0].clone();
        store
            .add_entry(MedicineEntry::single(&drug, 1.0, Utc::now()))
            .unwrap();
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_resubscribe_after_teardown_restarts() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = AvailabilityPipeline::new(store, test_config());

        let sub = pipeline.subscribe();
        wait_for(&sub, |info| !info.by_drug.is_empty());
        drop(sub);

        let sub = pipeline.subscribe();
        let info = wait_for(&sub, |info| !info.by_drug.is_empty());
        assert_eq!(info.by_drug.len(), 5);
    }

    /// Store whose reads can be failed on demand
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_reads: AtomicBool::new(false),
            }
        }

        fn check(&self) -> Result<()> {
            if self.fail_reads.load(Ordering::Relaxed) {
                Err(crate::Error::Store("simulated read failure".into()))
            } else {
                Ok(())
            }
        }
    }

    impl MedicineStore for FlakyStore {
        fn load_entries(
            &self,
            cutoff: Option<DateTime<Utc>>,
        ) -> Result<Vec<MedicineEntry>> {
            self.check()?;
            self.inner.load_entries(cutoff)
        }

        fn load_drugs(&self) -> Result<Vec<Drug>> {
            self.check()?;
            self.inner.load_drugs()
        }

        fn add_entry(&self, entry: MedicineEntry) -> Result<()> {
            self.inner.add_entry(entry)
        }

        fn update_entry(&self, entry: MedicineEntry) -> Result<()> {
            self.inner.update_entry(entry)
        }

        fn remove_entry(&self, id: Uuid) -> Result<()> {
            self.inner.remove_entry(id)
        }

        fn add_drug(&self, drug: Drug) -> Result<()> {
            self.inner.add_drug(drug)
        }

        fn update_drug(&self, drug: Drug) -> Result<()> {
            self.inner.update_drug(drug)
        }

        fn remove_drug(&self, id: Uuid) -> Result<()> {
            self.inner.remove_drug(id)
        }

        fn subscribe_changes(&self) -> ChangeListener {
            self.inner.subscribe_changes()
        }
    }

    #[test]
    fn test_read_failure_retains_last_good_snapshot() {
        let store = Arc::new(FlakyStore::new());
        let pipeline = AvailabilityPipeline::new(store.clone(), test_config());

        let errors = pipeline.subscribe_errors();
        let sub = pipeline.subscribe();
        let good = wait_for(&sub, |info| !info.by_drug.is_empty());

        store.fail_reads.store(true, Ordering::Relaxed);
        let drug = good.by_drug.values().next().unwrap().drug.clone();
        store
            .inner
            .add_entry(MedicineEntry::single(&drug, 1.0, Utc::now()))
            .unwrap();

        let message = errors
            .recv_timeout(Duration::from_secs(2))
            .expect("No error reported");
        assert!(message.contains("read failed"));

        // Last-known-good stands; the broken read never replaced it
        assert_eq!(pipeline.current().unwrap(), good);
    }

    #[test]
    fn test_seed_failure_publishes_empty_snapshot() {
        let store = Arc::new(FlakyStore::new());
        store.fail_reads.store(true, Ordering::Relaxed);
        let pipeline = AvailabilityPipeline::new(store, test_config());

        let errors = pipeline.subscribe_errors();
        let sub = pipeline.subscribe();

        let info = sub
            .recv_timeout(Duration::from_secs(2))
            .expect("Degraded snapshot never arrived");
        assert!(info.by_drug.is_empty());

        let message = errors
            .recv_timeout(Duration::from_secs(2))
            .expect("No bootstrap error reported");
        assert!(message.contains("bootstrap failed"));
    }

    #[test]
    fn test_store_change_enum_is_observable() {
        // The forwarder consumes one listener; independent listeners
        // still see every change kind
        let store = MemoryStore::new();
        let listener = store.subscribe_changes();
        store
            .add_drug(Drug {
                id: Uuid::new_v4(),
                name: "Cetirizine".into(),
                ingredients: vec![],
                redose_hours: 24.0,
            })
            .unwrap();
        assert_eq!(listener.try_recv().unwrap(), StoreChange::Drugs);
    }
}
