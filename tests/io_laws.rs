#![cfg(feature = "effect")]
//! Property-based tests for the IO monad laws and the run loop's stack
//! safety.

use lambars_fx::effect::{IO, ImmediateExecutor};
use proptest::prelude::*;

fn run<A: Send + 'static>(io: IO<A>) -> A {
    io.run_sync().unwrap()
}

// =============================================================================
// Functor Laws
// =============================================================================

proptest! {
    #[test]
    fn prop_map_identity(value in any::<i32>()) {
        prop_assert_eq!(run(IO::pure(value).map(|x| x)), value);
    }

    #[test]
    fn prop_map_composition(value in any::<i32>()) {
        let function = |x: i32| x.wrapping_add(1);
        let other = |x: i32| x.wrapping_mul(2);

        let composed = run(IO::pure(value).map(move |x| other(function(x))));
        let chained = run(IO::pure(value).map(function).map(other));

        prop_assert_eq!(composed, chained);
    }
}

// =============================================================================
// Monad Laws
// =============================================================================

proptest! {
    #[test]
    fn prop_left_identity(value in any::<i32>()) {
        let function = |x: i32| IO::pure(x.wrapping_mul(3));
        prop_assert_eq!(run(IO::pure(value).flat_map(function)), run(function(value)));
    }

    #[test]
    fn prop_right_identity(value in any::<i32>()) {
        prop_assert_eq!(run(IO::pure(value).flat_map(IO::pure)), value);
    }

    #[test]
    fn prop_associativity(value in any::<i32>()) {
        let function = |x: i32| IO::pure(x.wrapping_add(10));
        let other = |x: i32| IO::delay(move || x.wrapping_mul(2));

        let left = run(IO::pure(value).flat_map(function).flat_map(other));
        let right = run(IO::pure(value).flat_map(move |x| function(x).flat_map(other)));

        prop_assert_eq!(left, right);
    }

    #[test]
    fn prop_raise_then_handle_is_identity_of_handler(message in "[a-z]{1,16}") {
        let recovered = run(
            IO::<String>::raise_error(message.clone()).handle_error_with(|error| IO::pure(error.to_string())),
        );
        prop_assert_eq!(recovered, message);
    }
}

// =============================================================================
// Map Fusion
// =============================================================================

proptest! {
    #[test]
    fn prop_k_maps_equal_single_sum(start in -1_000_i64..1_000, count in 0_usize..200) {
        let mut io = IO::pure(start);
        for index in 0..count {
            let step = index as i64;
            io = io.map(move |x| x + step);
        }
        let expected = start + (0..count as i64).sum::<i64>();
        prop_assert_eq!(run(io), expected);
    }
}

#[test]
fn test_map_order_is_preserved_across_fusion_boundary() {
    let mut io = IO::pure(Vec::new());
    for index in 0..100 {
        io = io.map(move |mut seen: Vec<usize>| {
            seen.push(index);
            seen
        });
    }
    assert_eq!(run(io), (0..100).collect::<Vec<_>>());
}

// =============================================================================
// Stack Safety
// =============================================================================

mod stack_safety {
    use super::*;

    const DEPTH: u64 = 500_000;

    #[test]
    fn test_left_associated_maps() {
        let mut io = IO::pure(0_u64);
        for _ in 0..DEPTH {
            io = io.map(|x| x + 1);
        }
        assert_eq!(run(io), DEPTH);
    }

    #[test]
    fn test_left_associated_binds() {
        let mut io = IO::pure(0_u64);
        for _ in 0..DEPTH {
            io = io.flat_map(|x| IO::pure(x + 1));
        }
        assert_eq!(run(io), DEPTH);
    }

    fn count_up(n: u64) -> IO<u64> {
        if n == DEPTH {
            IO::pure(n)
        } else {
            IO::pure(n + 1).flat_map(count_up)
        }
    }

    #[test]
    fn test_right_associated_binds() {
        assert_eq!(run(count_up(0)), DEPTH);
    }

    fn deep_chain() -> IO<u64> {
        (0..DEPTH).fold(IO::pure(0_u64), |io, _| io.flat_map(|x| IO::pure(x + 1)))
    }

    #[test]
    fn test_dropping_unrun_chain() {
        let io = deep_chain().map(|x| x * 2);
        drop(io);
    }

    #[test]
    fn test_race_against_deep_loser() {
        let io = IO::race(IO::pure(1), deep_chain(), ImmediateExecutor::shared());
        assert!(run(io).is_left());
    }

    #[test]
    fn test_cancelled_execution_drops_deep_chain() {
        let disposable = IO::<()>::never()
            .then(deep_chain())
            .run_async_cancelable(|_| panic!("cancelled execution delivered a result"));
        disposable.dispose().unwrap();
    }

    fn nested_handlers(n: u64) -> IO<u64> {
        if n == 0 {
            IO::raise_error("bottom")
        } else {
            IO::suspend(move || nested_handlers(n - 1))
                .handle_error_with(move |_| IO::pure(n))
                .map(|x| x + 1)
        }
    }

    #[test]
    fn test_deep_handler_stack() {
        assert_eq!(run(nested_handlers(100_000)), 100_001);
    }
}
