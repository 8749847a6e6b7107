//! End-to-end routine scenarios driven through the public API.

use futures::channel::oneshot;
use lockstep_runtime::{
    CancellationToken, ContinuationFailure, HandleState, HostConfig, Outcome, RoutineContext,
    RoutineError, RoutineFault, RoutineHost, RunMode, RunStatus, RuntimeError, spawn, yield_now,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn host() -> RoutineHost {
    RoutineHost::new(HostConfig::default()).unwrap()
}

#[tokio::test]
async fn test_yield_then_value() {
    let host = host();
    let handle = host.start_fn(|| async {
        yield_now().await;
        Ok::<_, RoutineError>(42)
    });
    assert!(!handle.is_completed());

    let report = handle.pump_when_ready(true).await.unwrap();
    assert_eq!(report.executed, 1);
    assert!(handle.is_completed());
    assert_eq!(handle.outcome(), Some(Outcome::Completed(42)));
}

#[test]
fn test_yield_breaks_between_steps() {
    let host = host();
    let steps = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&steps);
    let (tx, rx) = oneshot::channel::<()>();

    let handle = host.start_fn(move || async move {
        rx.await.map_err(RoutineError::failed)?;
        log.lock().push("A");
        yield_now().await;
        log.lock().push("B");
        Ok::<_, RoutineError>(())
    });
    assert!(steps.lock().is_empty());

    // Resolving the channel queues the resumption; nothing runs yet.
    tx.send(()).unwrap();
    assert!(steps.lock().is_empty());
    assert_eq!(handle.pending_units(), 1);

    let first = handle.pump(true).unwrap();
    assert!(first.stopped_at_yield);
    assert_eq!(*steps.lock(), vec!["A"]);

    let second = handle.pump(true).unwrap();
    assert!(!second.stopped_at_yield);
    assert_eq!(*steps.lock(), vec!["A", "B"]);
    assert!(handle.is_completed());
}

#[test]
fn test_interleaved_handles_reach_own_results() {
    let host = host();
    let a = host.start_fn(|| async { Ok::<_, RoutineError>("a") });
    let b = host.start_fn(|| async {
        yield_now().await;
        Ok::<_, RoutineError>("b")
    });

    // Pump in the unfavourable order: the finished one first.
    a.pump(true).unwrap();
    b.pump(true).unwrap();
    a.pump(true).unwrap();

    assert_eq!(a.outcome(), Some(Outcome::Completed("a")));
    assert_eq!(b.outcome(), Some(Outcome::Completed("b")));
}

#[test]
fn test_handles_are_isolated() {
    let host = host();
    let ticks = Arc::new(AtomicUsize::new(0));
    let make = |ticks: Arc<AtomicUsize>| {
        move || async move {
            for _ in 0..3 {
                ticks.fetch_add(1, Ordering::SeqCst);
                yield_now().await;
            }
            Ok::<_, RoutineError>(())
        }
    };

    let first = host.start_fn(make(Arc::clone(&ticks)));
    let second = host.start_fn(make(Arc::clone(&ticks)));
    assert_eq!(ticks.load(Ordering::SeqCst), 2);

    first.pump(true).unwrap();
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert_eq!(second.pending_units(), 1);
}

#[test]
fn test_completion_kinds() {
    let host = host();

    let value = host.start_fn(|| async {
        yield_now().await;
        Ok::<_, RoutineError>(5u8)
    });
    let failure = host.start_fn(|| async {
        yield_now().await;
        Err::<u8, _>(RoutineError::failed("boom"))
    });
    let cancel = CancellationToken::new();
    let cancelled = host.start(
        |(), token: CancellationToken| async move {
            yield_now().await;
            RoutineError::ensure_not_cancelled(&token)?;
            Ok::<_, RoutineError>(0u8)
        },
        (),
        cancel.clone(),
    );
    cancel.cancel();

    for handle in [&value, &failure, &cancelled] {
        handle.pump(false).unwrap();
        assert_eq!(handle.state(), HandleState::Settled);
    }

    assert_eq!(value.outcome(), Some(Outcome::Completed(5)));
    assert_eq!(
        failure.outcome(),
        Some(Outcome::Faulted(RoutineFault::Failed("boom".into())))
    );
    assert_eq!(cancelled.outcome(), Some(Outcome::Cancelled));
}

#[test]
fn test_unrelated_unit_failure_surfaces_on_pump() {
    let host = host();
    let handle = host.start_fn(|| async {
        let context = RoutineContext::current().ok_or(RoutineError::Cancelled)?;
        context
            .post(|_| Err("side effect failed".into()), Box::new(()))
            .map_err(RoutineError::failed)?;
        yield_now().await;
        Ok::<_, RoutineError>(1)
    });

    match handle.pump(false) {
        Err(RuntimeError::Continuation(ContinuationFailure::Single(failure))) => {
            assert!(failure.to_string().contains("side effect failed"));
        }
        other => panic!("expected a single failure, got {other:?}"),
    }
    assert_eq!(handle.outcome(), Some(Outcome::Completed(1)));
}

#[tokio::test]
async fn test_quiescence_after_detached_work() {
    let host = host();
    let detached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&detached);

    let handle = host.start_fn(move || async move {
        spawn(async move {
            yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .map_err(RoutineError::failed)?;
        yield_now().await;
        Ok::<_, RoutineError>("main")
    });

    let status = handle
        .run_to_completion(RunMode::Inline, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);

    let report = handle
        .drain_remaining_work(CancellationToken::new())
        .await
        .unwrap();
    assert!(report.quiesced);
    assert!(handle.is_quiesced());
    assert_eq!(detached.load(Ordering::SeqCst), 1);
    assert!(handle.when_work_queued().await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timer_after_suspension_inline() {
    let host = host();
    let handle = host.start_fn(|| async {
        yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        Ok::<_, RoutineError>(7)
    });

    let status = handle
        .run_to_completion(RunMode::Inline, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(handle.outcome(), Some(Outcome::Completed(7)));
}

#[tokio::test]
async fn test_timer_after_suspension_background() {
    let host = host();
    let handle = host.start_fn(|| async {
        yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        Ok::<_, RoutineError>("slept")
    });

    let status = handle
        .run_to_completion(RunMode::Background, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(handle.outcome(), Some(Outcome::Completed("slept")));
}

#[tokio::test]
async fn test_quiescence_waits_for_external_producer() {
    let host = host();
    let (tx, rx) = oneshot::channel::<u32>();
    let received = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&received);

    let handle = host.start_fn(move || async move {
        spawn(async move {
            *slot.lock() = rx.await.ok();
        })
        .map_err(RoutineError::failed)?;
        Ok::<_, RoutineError>(())
    });
    assert!(handle.is_completed());

    let producer = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.send(9).unwrap();
    });

    let report = handle
        .drain_remaining_work(CancellationToken::new())
        .await
        .unwrap();
    producer.await.unwrap();

    assert!(report.quiesced);
    assert_eq!(report.units_executed, 2);
    assert_eq!(*received.lock(), Some(9));
}

proptest! {
    #[test]
    fn prop_posts_drain_in_order(count in 0usize..64) {
        let host = host();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);

        let handle = host.start_fn(move || async move {
            let context = RoutineContext::current().ok_or(RoutineError::Cancelled)?;
            for i in 0..count {
                let sink = Arc::clone(&sink);
                context
                    .post(
                        move |_| {
                            sink.lock().push(i);
                            Ok(())
                        },
                        Box::new(()),
                    )
                    .map_err(RoutineError::failed)?;
            }
            Ok::<_, RoutineError>(())
        });

        let report = handle.pump(false).unwrap();
        prop_assert_eq!(report.executed, count);
        prop_assert_eq!(log.lock().clone(), (0..count).collect::<Vec<_>>());
    }
}
