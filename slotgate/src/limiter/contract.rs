//! Behaviour every [`Limiter`] must share, exercised against each strategy
//! from its own test module.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use super::Limiter;

const GRANT_TIMEOUT: Duration = Duration::from_secs(2);
const STILL_BLOCKED: Duration = Duration::from_millis(50);

fn cancelled_token() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

/// Token that fires after `delay`.
fn cancel_after(delay: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(delay).await;
        trigger.cancel();
    });
    token
}

/// Poll `cond` until it holds, panicking after [`GRANT_TIMEOUT`].
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(GRANT_TIMEOUT, async {
        while !cond() {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub(crate) async fn borrow_until_full<L: Limiter>(limiter: &L) {
    let cancel = CancellationToken::new();
    let capacity = limiter.capacity();

    for held in 0..capacity {
        assert!(limiter.is_available());
        assert!(limiter.borrow(&cancel).await, "borrow {held} should succeed");
    }
    assert_eq!(limiter.active(), capacity);
    assert!(!limiter.is_available());

    assert!(!limiter.borrow(&cancel_after(Duration::from_millis(20))).await);
    assert_eq!(limiter.active(), capacity);

    for _ in 0..capacity {
        limiter.settle_up();
    }
    assert_eq!(limiter.active(), 0);
    assert!(limiter.is_available());
}

pub(crate) async fn settle_up_without_borrow_is_noop<L: Limiter>(limiter: &L) {
    for _ in 0..3 {
        limiter.settle_up();
    }
    assert_eq!(limiter.active(), 0);

    // Over-release must not have minted extra capacity.
    let cancel = CancellationToken::new();
    for _ in 0..limiter.capacity() {
        assert!(limiter.borrow(&cancel).await);
    }
    assert!(!limiter.borrow(&cancelled_token()).await);
    assert_eq!(limiter.active(), limiter.capacity());
}

pub(crate) async fn cancelled_borrow_leaves_no_trace<L: Limiter>(limiter: &L) {
    let cancel = CancellationToken::new();
    for _ in 0..limiter.capacity() {
        assert!(limiter.borrow(&cancel).await);
    }

    assert!(!limiter.borrow(&cancel_after(Duration::from_millis(10))).await);
    assert_eq!(limiter.active(), limiter.capacity());
    assert_eq!(limiter.waiting().unwrap_or(0), 0);

    limiter.settle_up();
    assert_eq!(limiter.active(), limiter.capacity() - 1);

    // A free slot is granted immediately, even to an already-cancelled caller.
    assert!(limiter.borrow(&cancelled_token()).await);
    assert_eq!(limiter.active(), limiter.capacity());
}

pub(crate) async fn precancelled_borrow_is_consistent<L: Limiter>(limiter: &L) {
    let cancelled = cancelled_token();

    if limiter.borrow(&cancelled).await {
        assert_eq!(limiter.active(), 1);
        limiter.settle_up();
    }
    assert_eq!(limiter.active(), 0);

    let cancel = CancellationToken::new();
    for _ in 0..limiter.capacity() {
        assert!(limiter.borrow(&cancel).await);
    }
    assert!(!limiter.borrow(&cancelled).await);
    assert_eq!(limiter.active(), limiter.capacity());
}

pub(crate) async fn blocked_borrow_wakes_on_settle_up<L: Limiter + 'static>(limiter: L) {
    let limiter = Arc::new(limiter);
    let cancel = CancellationToken::new();
    for _ in 0..limiter.capacity() {
        assert!(limiter.borrow(&cancel).await);
    }

    let waiter = {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        tokio::spawn(async move { limiter.borrow(&cancel).await })
    };

    sleep(STILL_BLOCKED).await;
    assert!(!waiter.is_finished(), "borrow must block while full");

    limiter.settle_up();
    let granted = timeout(GRANT_TIMEOUT, waiter)
        .await
        .expect("waiter not woken by settle_up")
        .unwrap();
    assert!(granted);
    assert_eq!(limiter.active(), limiter.capacity());
}

pub(crate) async fn three_borrowers_two_slots<L: Limiter + 'static>(limiter: L) {
    assert_eq!(limiter.capacity(), 2);
    let limiter = Arc::new(limiter);
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..3 {
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(limiter.borrow(&cancel).await);
        });
    }

    for _ in 0..2 {
        let granted = timeout(GRANT_TIMEOUT, rx.recv()).await.unwrap();
        assert_eq!(granted, Some(true));
    }
    assert!(timeout(STILL_BLOCKED, rx.recv()).await.is_err());

    cancel.cancel();
    let third = timeout(GRANT_TIMEOUT, rx.recv()).await.unwrap();
    assert_eq!(third, Some(false));
    assert_eq!(limiter.active(), 2);
}

pub(crate) async fn capacity_never_exceeded<L: Limiter + 'static>(limiter: L, tasks: usize) {
    let limiter = Arc::new(limiter);
    let capacity = limiter.capacity();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..tasks)
        .map(|i| {
            let limiter = Arc::clone(&limiter);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                assert!(limiter.borrow(&CancellationToken::new()).await);

                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(now <= capacity, "{now} holders with capacity {capacity}");
                assert!(limiter.active() <= capacity);

                if i % 2 == 0 {
                    tokio::task::yield_now().await;
                } else {
                    sleep(Duration::from_millis(1)).await;
                }

                in_flight.fetch_sub(1, Ordering::SeqCst);
                limiter.settle_up();
            })
        })
        .collect();

    for handle in futures::future::join_all(handles).await {
        handle.unwrap();
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=capacity).contains(&peak));
    assert_eq!(limiter.active(), 0);
}

pub(crate) async fn cancel_cycles_do_not_leak<L: Limiter + 'static>(limiter: L, cycles: usize) {
    let limiter = Arc::new(limiter);
    let capacity = limiter.capacity();
    let cancel = CancellationToken::new();
    for _ in 0..capacity {
        assert!(limiter.borrow(&cancel).await);
    }

    for _ in 0..cycles {
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let token = cancel_after(Duration::from_millis(2));
                tokio::spawn(async move { limiter.borrow(&token).await })
            })
            .collect();
        for waiter in waiters {
            assert!(!waiter.await.unwrap());
        }
    }
    assert_eq!(limiter.active(), capacity);
    assert_eq!(limiter.waiting().unwrap_or(0), 0);

    for _ in 0..capacity {
        limiter.settle_up();
    }
    assert_eq!(limiter.active(), 0);

    for _ in 0..capacity {
        assert!(limiter.borrow(&cancelled_token()).await);
    }
    assert_eq!(limiter.active(), capacity);
}

pub(crate) async fn dropped_borrow_future_does_not_leak<L: Limiter + 'static>(limiter: L) {
    let limiter = Arc::new(limiter);
    let cancel = CancellationToken::new();
    for _ in 0..limiter.capacity() {
        assert!(limiter.borrow(&cancel).await);
    }

    // The caller gives up by dropping the future rather than cancelling it.
    assert!(timeout(Duration::from_millis(20), limiter.borrow(&cancel)).await.is_err());
    assert_eq!(limiter.waiting().unwrap_or(0), 0);

    limiter.settle_up();
    assert_eq!(limiter.active(), limiter.capacity() - 1);
    assert!(limiter.borrow(&cancelled_token()).await);
}
