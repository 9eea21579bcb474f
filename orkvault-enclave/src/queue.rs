//! Serialized lane for enclave operations.
//!
//! The enclave's message protocol pairs replies with requests by arrival
//! order, so only one operation may be outstanding at a time. Every
//! operation runs while holding a fair (FIFO) async mutex: operation n+1
//! starts only after operation n has settled, in the order callers arrived.

use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

pub struct OperationQueue {
    name: &'static str,
    /// Sequence number of the last operation started.
    lane: Mutex<u64>,
}

impl OperationQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lane: Mutex::new(0),
        }
    }

    /// Runs `op` once every previously submitted operation has settled.
    ///
    /// The lane is released when `op` completes or the returned future is
    /// dropped, so a failed or cancelled operation never wedges the queue.
    pub async fn run<F, T>(&self, label: &'static str, op: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut seq = self.lane.lock().await;
        *seq += 1;
        let n = *seq;

        debug!("{} #{n} {label} started", self.name);
        let out = op.await;
        debug!("{} #{n} {label} settled", self.name);

        out
    }

    /// Number of operations started so far.
    pub async fn started(&self) -> u64 {
        *self.lane.lock().await
    }
}
