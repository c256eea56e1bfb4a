//! Unit tests for the one-shot guard.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use super::*;

fn counting_guard(runs: &Arc<AtomicUsize>) -> OneShot<usize> {
    let runs = runs.clone();
    OneShot::new(move || async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        runs.fetch_add(1, Ordering::SeqCst) + 1
    })
}

#[tokio::test]
async fn concurrent_callers_share_a_single_execution() {
    let runs = Arc::new(AtomicUsize::new(0));
    let guard = Arc::new(counting_guard(&runs));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let guard = guard.clone();
            tokio::spawn(async move { guard.call().await })
        })
        .collect();
    for caller in callers {
        assert_eq!(caller.await.expect("join caller"), Ok(1));
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(guard.is_finished());
    assert_eq!(guard.outcome(), Some(&1));
}

#[tokio::test]
async fn late_caller_observes_recorded_outcome() {
    let runs = Arc::new(AtomicUsize::new(0));
    let guard = counting_guard(&runs);

    assert_eq!(guard.call().await, Ok(1));
    assert_eq!(guard.call().await, Ok(1));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wait_resolves_once_the_action_finishes() {
    let runs = Arc::new(AtomicUsize::new(0));
    let guard = Arc::new(counting_guard(&runs));
    let waiter = {
        let guard = guard.clone();
        tokio::spawn(async move { guard.wait().await })
    };

    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());
    assert_eq!(guard.call().await, Ok(1));

    waiter.await.expect("join waiter");
    assert!(guard.is_finished());
}

#[tokio::test]
async fn panicking_action_still_marks_completion() {
    let guard: Arc<OneShot<u8>> = Arc::new(OneShot::new(|| async {
        let value: Option<u8> = None;
        value.expect("action exploded")
    }));

    assert_eq!(guard.call().await, Err(OneShotError::Abandoned));
    assert!(guard.is_finished());
    assert_eq!(guard.call().await, Err(OneShotError::Abandoned));
    guard.wait().await;
}

#[tokio::test]
async fn dropping_the_first_caller_does_not_cancel_the_action() {
    let runs = Arc::new(AtomicUsize::new(0));
    let (release, mut released) = tokio::sync::watch::channel(false);
    let counter = runs.clone();
    let guard = Arc::new(OneShot::new(move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = released.wait_for(|go| *go).await;
        7u8
    }));

    let caller = {
        let guard = guard.clone();
        tokio::spawn(async move { guard.call().await })
    };
    while runs.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    caller.abort();
    let _ = caller.await;
    assert!(!guard.is_finished());

    release.send_replace(true);
    assert_eq!(guard.call().await, Ok(7));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
