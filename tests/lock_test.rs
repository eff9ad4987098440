use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use taskhub::error::HubError;
use taskhub::runtime::lock::LockManager;

#[tokio::test]
async fn test_never_two_concurrent_holders() {
    let locks = Arc::new(LockManager::new());
    let in_critical = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let locks = locks.clone();
        let in_critical = in_critical.clone();
        let overlaps = overlaps.clone();
        handles.push(tokio::spawn(async move {
            locks.acquire("instance-1").await.unwrap();
            if in_critical.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_critical.store(false, Ordering::SeqCst);
            locks.release("instance-1");
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0, "two holders overlapped");
}

#[tokio::test]
async fn test_distinct_keys_do_not_serialize() {
    let locks = Arc::new(LockManager::new());
    locks.acquire("a").await.unwrap();
    // A different key must not queue behind "a".
    tokio::time::timeout(Duration::from_millis(100), locks.acquire("b"))
        .await
        .expect("acquire of b blocked behind a")
        .unwrap();
    locks.release("a");
    locks.release("b");
}

#[tokio::test]
async fn test_waiters_queue_fifo() {
    let locks = Arc::new(LockManager::new());
    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    locks.acquire("k").await.unwrap();
    let mut handles = Vec::new();
    for i in 0..5 {
        let locks = locks.clone();
        let order = order.clone();
        // Stagger arrival so the wait queue order is deterministic.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handles.push(tokio::spawn(async move {
            locks.acquire("k").await.unwrap();
            order.lock().await.push(i);
            locks.release("k");
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    locks.release("k");
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_release_unheld_key_is_noop() {
    let locks = LockManager::new();
    // Warns, does not panic, and the key remains acquirable.
    locks.release("never-held");
    locks.acquire("never-held").await.unwrap();
    locks.release("never-held");
}

#[tokio::test]
async fn test_acquire_timeout_policy() {
    let locks = Arc::new(LockManager::with_timeout(Duration::from_millis(50)));
    locks.acquire("stuck").await.unwrap();

    let err = locks.acquire("stuck").await.unwrap_err();
    assert!(matches!(err, HubError::LockTimeout(_)));

    // The holder is unaffected by the failed acquisition.
    locks.release("stuck");
    locks.acquire("stuck").await.unwrap();
    locks.release("stuck");
}

#[tokio::test]
async fn test_lock_or_error() {
    let locks = LockManager::new();
    locks.lock_or_error("k").unwrap();
    assert!(locks.is_locked("k"));
    assert!(locks.lock_or_error("k").is_err());
    locks.release("k");
    assert!(!locks.is_locked("k"));
}

#[tokio::test]
async fn test_lock_held_across_await() {
    let locks = Arc::new(LockManager::new());
    locks.acquire("k").await.unwrap();
    // Simulated awaited round-trip while holding.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(locks.is_locked("k"));
    locks.release("k");
}
