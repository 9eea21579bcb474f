//! Tests for the serialized operation lane.

use futures::future::join_all;
use orkvault_enclave::OperationQueue;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn operations_run_in_submission_order_without_overlap() {
    let queue = OperationQueue::new("test");
    let order = Mutex::new(Vec::new());
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let ops = (0..8u64).map(|i| {
        let (order, active, peak) = (&order, &active, &peak);
        queue.run("op", async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            // Later submissions finish faster if they were allowed to overlap.
            tokio::time::sleep(Duration::from_millis(8 - i)).await;
            order.lock().unwrap().push(i);
            active.fetch_sub(1, Ordering::SeqCst);
        })
    });
    join_all(ops).await;

    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(queue.started().await, 8);
}

#[tokio::test]
async fn failed_operation_does_not_wedge_the_queue() {
    let queue = OperationQueue::new("test");

    let first: Result<(), &str> = queue.run("fails", async { Err("boom") }).await;
    let second: Result<u8, &str> = queue.run("works", async { Ok(7) }).await;

    assert!(first.is_err());
    assert_eq!(second, Ok(7));
}

#[tokio::test(start_paused = true)]
async fn cancelled_operation_releases_the_lane() {
    let queue = Arc::new(OperationQueue::new("test"));

    let hung = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .run("hangs", std::future::pending::<()>())
                .await;
        })
    };
    tokio::task::yield_now().await;
    hung.abort();
    let _ = hung.await;

    let out = tokio::time::timeout(Duration::from_secs(1), queue.run("next", async { 1 })).await;
    assert_eq!(out, Ok(1));
}
