//! Integration tests for the core-async facade.

use core_async::sync::{CancellationToken, KeyedMutex};
use core_async::{sync, task, time};
use std::sync::Arc;

#[tokio::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    assert_eq!(handle.await.unwrap(), 42);
}

#[tokio::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(100)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_mutex() {
    let mutex = Arc::new(sync::Mutex::new(0));
    let mutex_clone = mutex.clone();

    task::spawn(async move {
        *mutex_clone.lock().await += 1;
    })
    .await
    .unwrap();

    assert_eq!(*mutex.lock().await, 1);
}

#[tokio::test]
async fn test_cancellation_token_wakes_waiter() {
    let token = CancellationToken::new();
    let child = token.child_token();

    let waiter = task::spawn(async move {
        child.cancelled().await;
        true
    });

    token.cancel();
    assert!(waiter.await.unwrap());
}

#[tokio::test]
async fn test_keyed_mutex_waits_for_holder() {
    let locks = Arc::new(KeyedMutex::new());
    let guard = locks.lock("avatar:alice".to_string()).await;

    let contender = {
        let locks = locks.clone();
        task::spawn(async move {
            let _g = locks.lock("avatar:alice".to_string()).await;
        })
    };

    time::sleep(time::Duration::from_millis(20)).await;
    assert!(!contender.is_finished());

    drop(guard);
    contender.await.unwrap();
    assert_eq!(locks.active_keys(), 0);
}
