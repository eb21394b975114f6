// Copyright 2026 PlayHouse Contributors
// SPDX-License-Identifier: Apache-2.0

//! `AsyncBlock(pre, post)` (spec §4.6 "Async blocks"): run `pre` on the
//! I/O pool, then enqueue its result back onto the owning stage's
//! mailbox so `post` runs inside an ordinary stage cycle.
//!
//! Grounded on `app/worker/mod.rs`'s pattern of handing a boxed
//! callback to a background task and having it post the result back
//! once the blocking work finishes, adapted here to land on a mailbox
//! entry rather than invoking the callback directly off the background
//! thread (that invocation would violate the single-threaded-per-stage
//! invariant, spec §4.6).

use std::sync::Arc;
use tokio::sync::Semaphore;

/// A type-erased callback carrying `pre`'s already-computed result;
/// invoking it runs `post(result)`. Boxed so a stage's mailbox can hold
/// one entry type regardless of what `T` an individual `AsyncBlock`
/// used.
pub type PostCallback = Box<dyn FnOnce() + Send>;

/// Run `pre` on a blocking thread bounded by `io_semaphore` (the node's
/// I/O pool, spec §5), then hand `post` — already bound to `pre`'s
/// result — to `deliver`. `deliver` is expected to enqueue the callback
/// onto the owning stage's mailbox.
///
/// If `pre` panics, the panic is logged and no callback is delivered:
/// there is no result to hand `post`, and spec §4.6's failure semantics
/// cover callbacks invoked from a mailbox cycle, not the `pre` body
/// itself (which never runs application dispatch code).
pub async fn spawn<T, Pre, Post, Deliver, DeliverFut>(io_semaphore: Arc<Semaphore>, pre: Pre, post: Post, deliver: Deliver)
where
    T: Send + 'static,
    Pre: FnOnce() -> T + Send + 'static,
    Post: FnOnce(T) + Send + 'static,
    Deliver: FnOnce(PostCallback) -> DeliverFut + Send + 'static,
    DeliverFut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let permit = io_semaphore.acquire_owned().await;
        let result = tokio::task::spawn_blocking(pre).await;
        drop(permit);

        match result {
            Ok(value) => {
                let callback: PostCallback = Box::new(move || post(value));
                deliver(callback).await;
            }
            Err(join_error) => {
                log::error!("AsyncBlock pre body panicked: {join_error}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{
        AtomicBool,
        Ordering,
    };
    use tokio::sync::{
        mpsc,
        Semaphore,
    };

    #[tokio::test]
    async fn pre_runs_off_thread_and_post_arrives_as_a_mailbox_entry() {
        let (tx, mut rx) = mpsc::channel::<PostCallback>(1);
        let semaphore = Arc::new(Semaphore::new(4));

        spawn(
            semaphore,
            || 2 + 2,
            |result: i32| {
                assert_eq!(result, 4);
            },
            move |callback| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(callback).await;
                }
            },
        )
        .await;

        let callback = rx.recv().await.expect("post callback delivered");
        callback();
    }

    #[tokio::test]
    async fn panicking_pre_delivers_nothing() {
        let (tx, mut rx) = mpsc::channel::<PostCallback>(1);
        let semaphore = Arc::new(Semaphore::new(4));
        let delivered = Arc::new(AtomicBool::new(false));
        let delivered_check = delivered.clone();

        spawn(
            semaphore,
            || -> i32 { panic!("boom") },
            move |_: i32| {
                delivered_check.store(true, Ordering::SeqCst);
            },
            move |callback| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(callback).await;
                }
            },
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert!(!delivered.load(Ordering::SeqCst));
    }
}
