//! Testing utilities for effects.
//!
//! This module provides assertion macros for [`Exit`](crate::Exit) values
//! and, with the `proptest` feature, strategies that generate arbitrary
//! [`Cause`](crate::Cause) trees.
//!
//! # Examples
//!
//! ```rust
//! use undertow::{assert_died, assert_success, Effect, Runtime};
//!
//! let rt = Runtime::new().unwrap();
//! let exit = tokio_test::block_on(rt.run(Effect::<(), String, i32>::succeed(42)));
//! assert_success!(exit, 42);
//!
//! let exit = tokio_test::block_on(rt.run(Effect::<(), String, i32>::die_message("bug")));
//! assert_died!(exit);
//! ```

#[cfg(any(test, feature = "proptest"))]
use crate::cause::{Cause, Defect};
#[cfg(any(test, feature = "proptest"))]
use crate::fiber::FiberId;

/// Assert that an exit is a success, optionally with a given value.
#[macro_export]
macro_rules! assert_success {
    ($exit:expr) => {
        match $exit {
            $crate::Exit::Success(_) => {}
            $crate::Exit::Failure(cause) => {
                panic!("Expected Success, got Failure:\n{}", cause.pretty());
            }
        }
    };
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::Exit::Success(value) => assert_eq!(value, $expected),
            $crate::Exit::Failure(cause) => {
                panic!("Expected Success, got Failure:\n{}", cause.pretty());
            }
        }
    };
}

/// Assert that an exit failed with a typed failure, optionally a given one.
#[macro_export]
macro_rules! assert_failure {
    ($exit:expr) => {
        match $exit {
            $crate::Exit::Failure(cause) if cause.is_failure() => {}
            $crate::Exit::Failure(cause) => {
                panic!("Expected a typed failure, got:\n{}", cause.pretty());
            }
            $crate::Exit::Success(v) => {
                panic!("Expected Failure, got Success: {:?}", v);
            }
        }
    };
    ($exit:expr, $expected:expr) => {
        match $exit {
            $crate::Exit::Failure(cause) => {
                assert_eq!(cause.failure_option(), Some(&$expected));
            }
            $crate::Exit::Success(v) => {
                panic!(
                    "Expected Failure with {:?}, got Success: {:?}",
                    $expected, v
                );
            }
        }
    };
}

/// Assert that an exit holds a defect.
#[macro_export]
macro_rules! assert_died {
    ($exit:expr) => {
        match $exit {
            $crate::Exit::Failure(cause) if cause.is_die() => {}
            $crate::Exit::Failure(cause) => {
                panic!("Expected a defect, got:\n{}", cause.pretty());
            }
            $crate::Exit::Success(v) => {
                panic!("Expected a defect, got Success: {:?}", v);
            }
        }
    };
}

/// Assert that an exit was interrupted.
#[macro_export]
macro_rules! assert_interrupted {
    ($exit:expr) => {
        match $exit {
            $crate::Exit::Failure(cause) if cause.is_interrupted() => {}
            $crate::Exit::Failure(cause) => {
                panic!("Expected interruption, got:\n{}", cause.pretty());
            }
            $crate::Exit::Success(v) => {
                panic!("Expected interruption, got Success: {:?}", v);
            }
        }
    };
}

/// Strategy for fiber ids, including [`FiberId::none`].
#[cfg(any(test, feature = "proptest"))]
pub fn arb_fiber_id() -> impl proptest::strategy::Strategy<Value = FiberId> {
    use proptest::prelude::*;

    (0_u64..16, 0_u64..4).prop_map(|(seq, millis)| FiberId::from_parts(seq, millis))
}

/// Strategy for cause trees whose typed failures come from `failure`.
#[cfg(any(test, feature = "proptest"))]
pub fn arb_cause<E, S>(failure: S) -> proptest::strategy::BoxedStrategy<Cause<E>>
where
    E: Clone + std::fmt::Debug + 'static,
    S: proptest::strategy::Strategy<Value = E> + 'static,
{
    use proptest::prelude::*;

    let leaf = prop_oneof![
        Just(Cause::Empty),
        failure.prop_map(Cause::Fail),
        "[a-z]{1,6}".prop_map(|m| Cause::Die(Defect::from_message(m))),
        arb_fiber_id().prop_map(Cause::Interrupt),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Cause::Then(Box::new(l), Box::new(r))),
            (inner.clone(), inner).prop_map(|(l, r)| Cause::Both(Box::new(l), Box::new(r))),
        ]
    })
    .boxed()
}

#[cfg(feature = "proptest")]
impl<E> proptest::arbitrary::Arbitrary for Cause<E>
where
    E: proptest::arbitrary::Arbitrary + Clone + 'static,
{
    type Parameters = E::Parameters;
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(args: Self::Parameters) -> Self::Strategy {
        arb_cause(proptest::arbitrary::any_with::<E>(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::Exit;
    use proptest::prelude::*;

    #[test]
    fn assert_success_macro() {
        let exit: Exit<String, i32> = Exit::succeed(42);
        assert_success!(exit.clone());
        assert_success!(exit, 42);
    }

    #[test]
    fn assert_failure_macro() {
        let exit: Exit<String, i32> = Exit::fail("nope".to_string());
        assert_failure!(exit.clone());
        assert_failure!(exit, "nope".to_string());
    }

    #[test]
    fn assert_died_and_interrupted_macros() {
        let died: Exit<String, i32> = Exit::die(Defect::from_message("bug"));
        assert_died!(died);

        let interrupted: Exit<String, i32> = Exit::interrupt(FiberId::none());
        assert_interrupted!(interrupted);
    }

    #[test]
    #[should_panic(expected = "Expected Success, got Failure")]
    fn assert_success_panics_on_failure() {
        let exit: Exit<String, i32> = Exit::fail("nope".to_string());
        assert_success!(exit);
    }

    #[test]
    #[should_panic(expected = "Expected interruption")]
    fn assert_interrupted_panics_on_defect() {
        let exit: Exit<String, i32> = Exit::die(Defect::from_message("bug"));
        assert_interrupted!(exit);
    }

    proptest! {
        #[test]
        fn rendering_shows_every_failure(cause in arb_cause(any::<u8>())) {
            let rendered = cause.pretty();
            prop_assert_eq!(rendered.matches("Fail: ").count(), cause.failures().len());
        }
    }
}
