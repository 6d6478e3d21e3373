#![cfg(feature = "effect")]
//! Integration tests for the await-join scope.

mod common;

use lambars_fx::effect::{Deferred, IO, SharedExecutor, ThreadExecutor, await_join_scope};
use rstest::{fixture, rstest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

const PATIENCE: Duration = Duration::from_secs(5);

#[fixture]
fn executor() -> SharedExecutor {
    common::init_test_logging();
    ThreadExecutor::new().shared()
}

type Slot<B> = Arc<Mutex<Option<Deferred<B>>>>;

// =============================================================================
// Await Semantics
// =============================================================================

mod await_semantics {
    use super::*;

    #[rstest]
    fn test_await_joins_stuck_sibling_until_cancelled(executor: SharedExecutor) {
        let stuck_slot: Slot<i32> = Arc::default();
        let sink = Arc::clone(&stuck_slot);
        let (spawned_tx, spawned) = mpsc::channel();

        let program = await_join_scope(Arc::clone(&executor), move |scope| {
            let second = scope.clone();
            scope.spawn(IO::<i32>::never()).flat_map(move |stuck| {
                *sink.lock().unwrap() = Some(stuck);
                second.spawn(IO::pure(7)).flat_map(move |immediate| {
                    spawned_tx.send(()).unwrap();
                    immediate.await_()
                })
            })
        });

        let scope_fiber = program.start(executor).run_sync().unwrap();
        spawned.recv_timeout(PATIENCE).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert!(scope_fiber.try_outcome().is_none());

        let stuck = stuck_slot.lock().unwrap().take().unwrap();
        let canceller = thread::spawn(move || stuck.cancel().run_sync());
        canceller.join().unwrap().unwrap();

        assert_eq!(scope_fiber.join().run_timed(PATIENCE).unwrap(), Some(7));
    }

    #[rstest]
    fn test_await_combines_completed_tasks(executor: SharedExecutor) {
        let program = await_join_scope(executor, |scope| {
            let second = scope.clone();
            scope.spawn(IO::delay(|| 20)).flat_map(move |left| {
                second
                    .spawn(IO::delay(|| 22))
                    .flat_map(move |right| left.await_().map2(right.await_(), |a, b| a + b))
            })
        });

        assert_eq!(program.run_timed(PATIENCE).unwrap(), Some(42));
    }

    #[rstest]
    fn test_await_raises_failed_sibling(executor: SharedExecutor) {
        let program = await_join_scope(executor, |scope| {
            let second = scope.clone();
            scope
                .spawn(IO::<i32>::raise_error("sibling failed"))
                .flat_map(move |_| second.spawn(IO::pure(1)).flat_map(|own| own.await_()))
        });

        assert_eq!(program.run_sync().unwrap_err().to_string(), "sibling failed");
    }
}

// =============================================================================
// Scope Exit
// =============================================================================

mod scope_exit {
    use super::*;

    #[rstest]
    fn test_completed_body_joins_unawaited_tasks(executor: SharedExecutor) {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let program = await_join_scope(executor, move |scope| {
            scope
                .spawn(IO::delay(move || {
                    thread::sleep(Duration::from_millis(20));
                    flag.store(true, Ordering::SeqCst);
                }))
                .map(|_| "body done")
        });

        assert_eq!(program.run_sync().unwrap(), "body done");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[rstest]
    fn test_unawaited_failure_fails_scope(executor: SharedExecutor) {
        let program = await_join_scope(executor, |scope| {
            scope.spawn(IO::<()>::raise_error("background failed")).map(|_| 1)
        });

        assert_eq!(program.run_sync().unwrap_err().to_string(), "background failed");
    }

    #[rstest]
    fn test_cancelled_scope_cancels_its_tasks(executor: SharedExecutor) {
        let task_slot: Slot<()> = Arc::default();
        let sink = Arc::clone(&task_slot);
        let (spawned_tx, spawned) = mpsc::channel();

        let program: IO<()> = await_join_scope(Arc::clone(&executor), move |scope| {
            scope.spawn(IO::<()>::never()).flat_map(move |task| {
                *sink.lock().unwrap() = Some(task.clone());
                spawned_tx.send(()).unwrap();
                task.await_()
            })
        });

        let scope_fiber = program.start(executor).run_sync().unwrap();
        spawned.recv_timeout(PATIENCE).unwrap();
        scope_fiber.cancel().run_sync().unwrap();

        let task = task_slot.lock().unwrap().take().unwrap();
        assert!(task.fiber().try_outcome().unwrap().is_cancelled());
        assert!(scope_fiber.outcome().run_sync().unwrap().is_cancelled());
    }
}
