//! Property-based tests for the algebra of causes.

use proptest::prelude::*;
use undertow::testing::arb_cause;
use undertow::{Cause, Either, Exit};

fn then(left: Cause<u8>, right: Cause<u8>) -> Cause<u8> {
    Cause::Then(Box::new(left), Box::new(right))
}

fn both(left: Cause<u8>, right: Cause<u8>) -> Cause<u8> {
    Cause::Both(Box::new(left), Box::new(right))
}

fn cause() -> BoxedStrategy<Cause<u8>> {
    arb_cause(any::<u8>())
}

proptest! {
    #[test]
    fn prop_then_is_associative(a in cause(), b in cause(), c in cause()) {
        prop_assert_eq!(
            then(then(a.clone(), b.clone()), c.clone()),
            then(a, then(b, c))
        );
    }

    #[test]
    fn prop_both_is_associative(a in cause(), b in cause(), c in cause()) {
        prop_assert_eq!(
            both(both(a.clone(), b.clone()), c.clone()),
            both(a, both(b, c))
        );
    }

    #[test]
    fn prop_both_is_commutative(a in cause(), b in cause()) {
        prop_assert_eq!(both(a.clone(), b.clone()), both(b, a));
    }

    #[test]
    fn prop_empty_is_the_identity(a in cause()) {
        prop_assert_eq!(then(Cause::Empty, a.clone()), a.clone());
        prop_assert_eq!(then(a.clone(), Cause::Empty), a.clone());
        prop_assert_eq!(both(Cause::Empty, a.clone()), a.clone());
        prop_assert_eq!(both(a.clone(), Cause::Empty), a);
    }

    #[test]
    fn prop_then_distributes_over_both(a in cause(), b in cause(), c in cause()) {
        prop_assert_eq!(
            then(both(a.clone(), b.clone()), c.clone()),
            both(then(a, c.clone()), then(b, c))
        );
    }

    #[test]
    fn prop_smart_constructors_agree_with_raw_nodes(a in cause(), b in cause()) {
        prop_assert_eq!(a.clone().then(b.clone()), then(a.clone(), b.clone()));
        prop_assert_eq!(a.clone().both(b.clone()), both(a, b));
    }

    #[test]
    fn prop_equal_causes_hold_the_same_failures(a in cause(), b in cause()) {
        let mut left: Vec<u8> = both(a.clone(), b.clone()).failures().into_iter().copied().collect();
        let mut right: Vec<u8> = both(b, a).failures().into_iter().copied().collect();
        left.sort_unstable();
        right.sort_unstable();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn prop_map_identity(a in cause()) {
        prop_assert_eq!(a.clone().map(|e| e), a);
    }

    #[test]
    fn prop_strip_failures_leaves_no_failures(a in cause()) {
        let stripped: Cause<u8> = a.clone().strip_failures();
        prop_assert!(!stripped.is_failure());
        prop_assert_eq!(stripped.defects().len(), a.defects().len());
        prop_assert_eq!(stripped.interruptors(), a.interruptors());
    }

    #[test]
    fn prop_failure_or_cause_finds_the_first_failure(a in cause()) {
        let first = a.failures().first().map(|e| **e);
        match a.failure_or_cause() {
            Either::Left(e) => prop_assert_eq!(Some(e), first),
            Either::Right(rest) => {
                prop_assert_eq!(first, None);
                prop_assert!(!rest.is_failure());
            }
        }
    }

    #[test]
    fn prop_exit_zip_par_keeps_both_causes(a in cause(), b in cause()) {
        prop_assume!(!a.is_empty() && !b.is_empty());
        let left: Exit<u8, ()> = Exit::halt(a.clone());
        let right: Exit<u8, ()> = Exit::halt(b.clone());
        prop_assert_eq!(left.zip_par(right), Exit::halt(a.both(b)));
    }
}
