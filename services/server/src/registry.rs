//! Per-device session state and the device → session registry.
//!
//! Each connected device gets one [`DeviceSession`] holding the sliding ECG
//! buffer, the active parameter snapshot, the breath-target context and the
//! feedback state machine. The whole struct sits behind one `tokio::Mutex`:
//! ingest lifecycle transitions and derivation runs for a device take that
//! lock, which is what keeps `last_emitted_ts` monotonic and the buffer
//! consistent under concurrent requests.

use adem_core::{BreathCycle, ParameterSet};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::feedback::FeedbackState;

/// One raw ECG record in the sliding buffer.
#[derive(Debug, Clone)]
pub struct EcgBlock {
    /// Epoch-ms timestamp of the record's first sample.
    pub ts: i64,
    pub samples: Vec<i16>,
}

pub struct DeviceSession {
    buffer: VecDeque<EcgBlock>,
    capacity: usize,
    /// Parameter snapshot used for derivations; swapped atomically when a
    /// technique activates.
    pub active_params: Arc<ParameterSet>,
    /// Active session, cached from the lifecycle transitions.
    pub session_id: Option<Uuid>,
    pub technique_name: Option<String>,
    pub target_rr: f64,
    /// Latest breath cycle announced by a `BreathTarget` record.
    pub breath_cycle: Option<BreathCycle>,
    pub feedback: FeedbackState,
}

impl DeviceSession {
    fn new() -> Self {
        let params = Arc::new(ParameterSet::default());
        Self {
            buffer: VecDeque::with_capacity(params.buffer_size),
            capacity: params.buffer_size,
            active_params: params,
            session_id: None,
            technique_name: None,
            target_rr: 0.0,
            breath_cycle: None,
            feedback: FeedbackState::default(),
        }
    }

    /// Append one ECG record, evicting the oldest when over capacity.
    pub fn append_ecg(&mut self, block: EcgBlock) {
        self.buffer.push_back(block);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Owned snapshot of the buffer, oldest record first.
    pub fn buffer_snapshot(&self) -> Vec<EcgBlock> {
        self.buffer.iter().cloned().collect()
    }

    /// Swap in a parameter snapshot and resize the ring buffer to its
    /// `BUFFER_SIZE`, keeping the most recent records.
    pub fn apply_params(&mut self, params: Arc<ParameterSet>) {
        self.capacity = params.buffer_size.max(1);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
        self.active_params = params;
    }

    /// Restore the built-in default parameters (and buffer size).
    pub fn reset_params(&mut self) {
        self.apply_params(Arc::new(ParameterSet::default()));
    }

    /// Drop buffered ECG and feedback state; called on session end.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.session_id = None;
        self.technique_name = None;
        self.target_rr = 0.0;
        self.breath_cycle = None;
        self.feedback = FeedbackState::default();
    }
}

/// Lazily-populated map from device id to its session state. Concurrent
/// lookups for the same device always land on the same instance.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<Mutex<DeviceSession>>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, device_id: &str) -> Arc<Mutex<DeviceSession>> {
        {
            let map = self.inner.read().await;
            if let Some(session) = map.get(device_id) {
                return Arc::clone(session);
            }
        }
        let mut map = self.inner.write().await;
        if let Some(session) = map.get(device_id) {
            return Arc::clone(session);
        }
        let session = Arc::new(Mutex::new(DeviceSession::new()));
        map.insert(device_id.to_owned(), Arc::clone(&session));
        session
    }

    /// Clear a device's buffered state (session end from the REST surface).
    pub async fn clear_device(&self, device_id: &str) {
        let maybe = {
            let map = self.inner.read().await;
            map.get(device_id).cloned()
        };
        if let Some(session) = maybe {
            session.lock().await.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(ts: i64) -> EcgBlock {
        EcgBlock {
            ts,
            samples: vec![0; 4],
        }
    }

    #[tokio::test]
    async fn lookups_share_one_instance() {
        let registry = SessionRegistry::new();
        let a = registry.get("H10A").await;
        let b = registry.get("H10A").await;
        assert!(Arc::ptr_eq(&a, &b));
        let other = registry.get("H10B").await;
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn buffer_evicts_oldest_at_capacity() {
        let registry = SessionRegistry::new();
        let handle = registry.get("H10A").await;
        let mut dev = handle.lock().await;

        let mut params = ParameterSet::default();
        params.buffer_size = 3;
        dev.apply_params(Arc::new(params));

        for ts in 0..5 {
            dev.append_ecg(block(ts));
        }
        let ts_list: Vec<i64> = dev.buffer_snapshot().iter().map(|b| b.ts).collect();
        assert_eq!(ts_list, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn shrinking_capacity_keeps_most_recent() {
        let registry = SessionRegistry::new();
        let handle = registry.get("H10A").await;
        let mut dev = handle.lock().await;

        for ts in 0..10 {
            dev.append_ecg(block(ts));
        }
        let mut small = ParameterSet::default();
        small.buffer_size = 4;
        small.version = "v2_small".to_owned();
        dev.apply_params(Arc::new(small));

        let ts_list: Vec<i64> = dev.buffer_snapshot().iter().map(|b| b.ts).collect();
        assert_eq!(ts_list, vec![6, 7, 8, 9]);
        assert_eq!(dev.active_params.version, "v2_small");

        // Growing back does not resurrect evicted records.
        dev.reset_params();
        assert_eq!(dev.buffer_len(), 4);
        assert_eq!(dev.active_params.version, "v1_default");
    }

    #[tokio::test]
    async fn clear_drops_buffer_and_context() {
        let registry = SessionRegistry::new();
        let handle = registry.get("H10A").await;
        {
            let mut dev = handle.lock().await;
            dev.append_ecg(block(1));
            dev.session_id = Some(Uuid::new_v4());
            dev.target_rr = 6.0;
        }
        registry.clear_device("H10A").await;
        let dev = handle.lock().await;
        assert_eq!(dev.buffer_len(), 0);
        assert!(dev.session_id.is_none());
        assert_eq!(dev.target_rr, 0.0);
    }
}
