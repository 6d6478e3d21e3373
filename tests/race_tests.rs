#![cfg(feature = "async")]
//! Integration tests for race, race_pair, par_map2, sleep and timeout.

mod common;

use lambars_fx::control::Either;
use lambars_fx::effect::{IO, SharedExecutor, ThreadExecutor, TimeoutError, TokioExecutor};
use rstest::{fixture, rstest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

const PATIENCE: Duration = Duration::from_secs(5);

#[fixture]
fn executor() -> SharedExecutor {
    common::init_test_logging();
    ThreadExecutor::new().shared()
}

/// Never completes; signals `ready` once its cancellation hook is installed
/// and counts the cancellations it observes.
fn counting_never<A: Send + 'static>(ready: mpsc::Sender<()>, cancelled: &Arc<AtomicUsize>) -> IO<A> {
    let cancelled = Arc::clone(cancelled);
    IO::delay(move || ready.send(()).unwrap())
        .then(IO::never())
        .on_cancel(IO::delay(move || {
            cancelled.fetch_add(1, Ordering::SeqCst);
        }))
}

/// Runs `io` once the other side signalled `ready`.
fn after<A: Send + 'static>(ready: mpsc::Receiver<()>, io: IO<A>) -> IO<A> {
    IO::delay(move || ready.recv_timeout(PATIENCE).unwrap()).then(io)
}

// =============================================================================
// Race
// =============================================================================

mod race {
    use super::*;

    #[rstest]
    fn test_left_wins_and_loser_is_cancelled(executor: SharedExecutor) {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready) = mpsc::channel();
        let io = IO::race(
            after(ready, IO::delay(|| 1)),
            counting_never::<&str>(ready_tx, &cancelled),
            executor,
        );

        assert_eq!(io.run_timed(PATIENCE).unwrap(), Some(Either::Left(1)));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn test_right_wins(executor: SharedExecutor) {
        let io = IO::race(IO::<i32>::never(), IO::delay(|| "right"), executor);
        assert_eq!(io.run_timed(PATIENCE).unwrap(), Some(Either::Right("right")));
    }

    #[rstest]
    fn test_first_failure_is_raised(executor: SharedExecutor) {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready) = mpsc::channel();
        let io = IO::race(
            after(ready, IO::<i32>::raise_error("left failed")),
            counting_never::<i32>(ready_tx, &cancelled),
            executor,
        );

        assert_eq!(io.run_sync().unwrap_err().to_string(), "left failed");
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn test_cancelling_race_cancels_both_sides(executor: SharedExecutor) {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready) = mpsc::channel();
        let io = IO::race(
            counting_never::<i32>(ready_tx.clone(), &cancelled),
            counting_never::<i32>(ready_tx, &cancelled),
            executor,
        );

        let disposable = io.run_async_cancelable(|_| panic!("cancelled race delivered a result"));
        ready.recv_timeout(PATIENCE).unwrap();
        ready.recv_timeout(PATIENCE).unwrap();
        disposable.dispose().unwrap();

        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
    }
}

// =============================================================================
// Race Pair
// =============================================================================

mod race_pair {
    use super::*;

    #[rstest]
    fn test_loser_keeps_running(executor: SharedExecutor) {
        let slow = IO::sleep(Duration::from_millis(30)).map(|()| "slow");
        let io = IO::race_pair(IO::pure(1), slow, executor);

        let winner = io.run_timed(PATIENCE).unwrap().unwrap();
        let (value, loser) = winner.left().unwrap();

        assert_eq!(value, 1);
        assert!(!loser.is_cancelled());
        assert_eq!(loser.join().run_timed(PATIENCE).unwrap(), Some("slow"));
    }

    #[rstest]
    fn test_failed_winner_cancels_loser(executor: SharedExecutor) {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready) = mpsc::channel();
        let io = IO::race_pair(
            counting_never::<i32>(ready_tx, &cancelled),
            after(ready, IO::<i32>::raise_error("right failed")),
            executor,
        );

        assert_eq!(io.run_sync().unwrap_err().to_string(), "right failed");
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// Parallel Map
// =============================================================================

mod par_map2 {
    use super::*;

    #[rstest]
    fn test_runs_both_in_parallel(executor: SharedExecutor) {
        let started = Instant::now();
        let io = IO::par_map2(
            IO::sleep(Duration::from_millis(100)).map(|()| 2),
            IO::sleep(Duration::from_millis(100)).map(|()| 3),
            executor,
            |a, b| a * b,
        );

        assert_eq!(io.run_timed(PATIENCE).unwrap(), Some(6));
        assert!(started.elapsed() < Duration::from_millis(190));
    }

    #[rstest]
    fn test_failure_cancels_other_side(executor: SharedExecutor) {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let (ready_tx, ready) = mpsc::channel();
        let io = IO::par_map2(
            counting_never::<i32>(ready_tx, &cancelled),
            after(ready, IO::<i32>::raise_error("right failed")),
            executor,
            |a, b| a + b,
        );

        assert_eq!(io.run_sync().unwrap_err().to_string(), "right failed");
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// Sleep and Timeout
// =============================================================================

mod timing {
    use super::*;

    #[test]
    fn test_sleep_waits_at_least_duration() {
        let started = Instant::now();
        IO::sleep(Duration::from_millis(20)).run_sync().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_sleep_is_cancelable() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);

        let disposable = IO::sleep(Duration::from_millis(30)).run_async_cancelable(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        disposable.dispose().unwrap();
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timeout_raises_timeout_error() {
        let io = IO::<i32>::never().timeout(Duration::from_millis(20), TokioExecutor::new().shared());
        let error = io.run_timed(PATIENCE).unwrap_err();

        assert!(error.is_timeout());
        assert_eq!(
            error.downcast_ref::<TimeoutError>(),
            Some(&TimeoutError {
                after: Duration::from_millis(20)
            })
        );
    }

    #[test]
    fn test_timeout_returns_fast_value() {
        let io = IO::delay(|| 5).timeout(Duration::from_secs(5), TokioExecutor::new().shared());
        assert_eq!(io.run_timed(PATIENCE).unwrap(), Some(5));
    }
}
