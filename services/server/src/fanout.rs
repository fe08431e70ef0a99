//! In-memory fan-out of signal records to live subscribers.
//!
//! Every subscriber owns a bounded queue (capacity 100). Broadcast never
//! blocks: a full queue means the consumer stopped reading, and that
//! subscriber is dropped on the spot while the rest keep receiving.
//! Records for a concrete device are mirrored to the `UNKNOWN` bucket so a
//! dashboard can watch everything without naming a device.
//!
//! Subscriber-set mutations hold the lock only for the add/remove itself;
//! broadcast snapshots the set under the lock and delivers outside it.

use adem_core::SignalRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Bounded queue length per subscriber.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 100;

/// Catch-all bucket; also the device id assigned to unidentified records.
pub const UNKNOWN_DEVICE: &str = "UNKNOWN";

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<SignalRecord>>,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

#[derive(Clone, Default)]
pub struct StreamFanout {
    inner: Arc<Inner>,
}

/// A live subscription; dropping it unregisters the queue.
pub struct Subscription {
    pub rx: mpsc::Receiver<Arc<SignalRecord>>,
    id: u64,
    device_id: String,
    inner: Arc<Inner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        remove_subscriber(&self.inner, &self.device_id, self.id);
    }
}

fn remove_subscriber(inner: &Inner, device_id: &str, id: u64) {
    let mut map = inner.subscribers.lock().expect("fanout lock poisoned");
    if let Some(subs) = map.get_mut(device_id) {
        subs.retain(|s| s.id != id);
        if subs.is_empty() {
            map.remove(device_id);
        }
    }
}

impl StreamFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for `device_id` (or [`UNKNOWN_DEVICE`] for all).
    pub fn subscribe(&self, device_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut map = self
                .inner
                .subscribers
                .lock()
                .expect("fanout lock poisoned");
            map.entry(device_id.to_owned())
                .or_default()
                .push(Subscriber { id, tx });
        }
        Subscription {
            rx,
            id,
            device_id: device_id.to_owned(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Deliver `record` to the device's subscribers plus the `UNKNOWN`
    /// bucket. Slow consumers (full queue) are removed, not waited on.
    pub fn broadcast(&self, record: Arc<SignalRecord>) {
        let targets: Vec<(String, u64, mpsc::Sender<Arc<SignalRecord>>)> = {
            let map = self
                .inner
                .subscribers
                .lock()
                .expect("fanout lock poisoned");
            let mut snapshot = Vec::new();
            if let Some(subs) = map.get(&record.device_id) {
                for s in subs {
                    snapshot.push((record.device_id.clone(), s.id, s.tx.clone()));
                }
            }
            if record.device_id != UNKNOWN_DEVICE {
                if let Some(subs) = map.get(UNKNOWN_DEVICE) {
                    for s in subs {
                        snapshot.push((UNKNOWN_DEVICE.to_owned(), s.id, s.tx.clone()));
                    }
                }
            }
            snapshot
        };

        for (bucket, id, tx) in targets {
            if tx.try_send(Arc::clone(&record)).is_err() {
                // Full or closed either way: this consumer is gone.
                remove_subscriber(&self.inner, &bucket, id);
            }
        }
    }

    /// Number of live subscribers for a bucket (diagnostics and tests).
    pub fn subscriber_count(&self, device_id: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("fanout lock poisoned")
            .get(device_id)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adem_core::{SignalKind, SignalPayload};
    use serde_json::Map;

    fn record(device_id: &str, ts: i64) -> Arc<SignalRecord> {
        Arc::new(SignalRecord {
            device_id: device_id.to_owned(),
            session_id: None,
            signal: SignalKind::Marker,
            ts,
            dt: String::new(),
            payload: SignalPayload::Open(Map::new()),
        })
    }

    #[tokio::test]
    async fn delivers_to_device_and_unknown_buckets() {
        let fanout = StreamFanout::new();
        let mut dev_sub = fanout.subscribe("H10A");
        let mut all_sub = fanout.subscribe(UNKNOWN_DEVICE);

        fanout.broadcast(record("H10A", 1));
        assert_eq!(dev_sub.rx.recv().await.unwrap().ts, 1);
        assert_eq!(all_sub.rx.recv().await.unwrap().ts, 1);

        // Records from another device reach only the catch-all bucket.
        fanout.broadcast(record("OTHER", 2));
        assert_eq!(all_sub.rx.recv().await.unwrap().ts, 2);
        assert!(dev_sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_and_others_survive() {
        let fanout = StreamFanout::new();
        let stalled = fanout.subscribe("H10A");
        let mut live = fanout.subscribe("H10A");

        // Fill the stalled queue past capacity while draining the live one.
        for i in 0..150 {
            fanout.broadcast(record("H10A", i));
            assert_eq!(live.rx.recv().await.unwrap().ts, i);
        }
        // The stalled subscriber hit its 100-record cap and was removed.
        assert_eq!(fanout.subscriber_count("H10A"), 1);

        fanout.broadcast(record("H10A", 999));
        assert_eq!(live.rx.recv().await.unwrap().ts, 999);
        drop(stalled);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let fanout = StreamFanout::new();
        let sub = fanout.subscribe("H10A");
        assert_eq!(fanout.subscriber_count("H10A"), 1);
        drop(sub);
        assert_eq!(fanout.subscriber_count("H10A"), 0);
    }

    #[tokio::test]
    async fn per_subscriber_order_is_broadcast_order() {
        let fanout = StreamFanout::new();
        let mut sub = fanout.subscribe("H10A");
        for i in 0..50 {
            fanout.broadcast(record("H10A", i));
        }
        for i in 0..50 {
            assert_eq!(sub.rx.recv().await.unwrap().ts, i);
        }
    }
}
