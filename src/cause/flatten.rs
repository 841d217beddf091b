//! Semantic equality for [`Cause`].
//!
//! A cause is normalised into a list of "steps": each step is the set of
//! leaves that happened in parallel at that point, and the list is in
//! sequential order. `Then` nodes nested on the left are re-associated to the
//! right, and a `Both` on the left of a `Then` is distributed over it, so any
//! two trees that differ only by associativity, `Empty` placement or the
//! order of `Both` operands produce the same steps.

use std::rc::Rc;

use super::Cause;

enum Shape<'a, E> {
    Empty,
    Leaf(&'a Cause<E>),
    Then(Rc<Shape<'a, E>>, Rc<Shape<'a, E>>),
    Both(Rc<Shape<'a, E>>, Rc<Shape<'a, E>>),
}

fn shape<E>(cause: &Cause<E>) -> Rc<Shape<'_, E>> {
    Rc::new(match cause {
        Cause::Empty => Shape::Empty,
        Cause::Then(left, right) => Shape::Then(shape(left), shape(right)),
        Cause::Both(left, right) => Shape::Both(shape(left), shape(right)),
        leaf => Shape::Leaf(leaf),
    })
}

type Step<'a, E> = (Vec<&'a Cause<E>>, Vec<Rc<Shape<'a, E>>>);

/// Split one cause into the leaves that happen first and the causes that
/// follow them.
fn step<'a, E>(start: Rc<Shape<'a, E>>) -> Step<'a, E> {
    let mut stack = Vec::new();
    let mut parallel = Vec::new();
    let mut sequential = Vec::new();
    let mut current = Some(start);

    while let Some(cause) = current.take() {
        match &*cause {
            Shape::Empty => current = stack.pop(),
            Shape::Leaf(leaf) => {
                parallel.push(*leaf);
                current = stack.pop();
            }
            Shape::Both(left, right) => {
                stack.push(Rc::clone(right));
                current = Some(Rc::clone(left));
            }
            Shape::Then(left, right) => match &**left {
                Shape::Empty => current = Some(Rc::clone(right)),
                Shape::Then(l, r) => {
                    let tail = Rc::new(Shape::Then(Rc::clone(r), Rc::clone(right)));
                    current = Some(Rc::new(Shape::Then(Rc::clone(l), tail)));
                }
                Shape::Both(l, r) => {
                    let l = Rc::new(Shape::Then(Rc::clone(l), Rc::clone(right)));
                    let r = Rc::new(Shape::Then(Rc::clone(r), Rc::clone(right)));
                    current = Some(Rc::new(Shape::Both(l, r)));
                }
                Shape::Leaf(_) => {
                    sequential.push(Rc::clone(right));
                    current = Some(Rc::clone(left));
                }
            },
        }
    }

    (parallel, sequential)
}

fn flatten<E>(cause: &Cause<E>) -> Vec<Vec<&Cause<E>>> {
    let mut causes = vec![shape(cause)];
    let mut steps = Vec::new();
    loop {
        let mut parallel = Vec::new();
        let mut sequential = Vec::new();
        for cause in causes {
            let (p, s) = step(cause);
            parallel.extend(p);
            sequential.extend(s);
        }
        if !parallel.is_empty() {
            steps.push(parallel);
        }
        if sequential.is_empty() {
            return steps;
        }
        causes = sequential;
    }
}

fn leaf_eq<E: PartialEq>(a: &Cause<E>, b: &Cause<E>) -> bool {
    match (a, b) {
        (Cause::Fail(x), Cause::Fail(y)) => x == y,
        (Cause::Die(x), Cause::Die(y)) => x == y,
        (Cause::Interrupt(x), Cause::Interrupt(y)) => x == y,
        _ => false,
    }
}

fn same_set<E: PartialEq>(a: &[&Cause<E>], b: &[&Cause<E>]) -> bool {
    a.iter().all(|x| b.iter().any(|y| leaf_eq(x, y)))
        && b.iter().all(|y| a.iter().any(|x| leaf_eq(x, y)))
}

pub(super) fn equivalent<E: PartialEq>(a: &Cause<E>, b: &Cause<E>) -> bool {
    let left = flatten(a);
    let right = flatten(b);
    left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(x, y)| same_set(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::Defect;

    #[test]
    fn test_then_distributes_over_both() {
        let a = Cause::fail(1).both(Cause::fail(2));
        let lhs = a.then(Cause::fail(3));
        let rhs = Cause::fail(1)
            .then(Cause::fail(3))
            .both(Cause::fail(2).then(Cause::fail(3)));
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_raw_empty_nodes_are_ignored() {
        let raw: Cause<i32> = Cause::Then(Box::new(Cause::Empty), Box::new(Cause::fail(1)));
        assert_eq!(raw, Cause::fail(1));
        let raw: Cause<i32> = Cause::Both(Box::new(Cause::fail(1)), Box::new(Cause::Empty));
        assert_eq!(raw, Cause::fail(1));
    }

    #[test]
    fn test_leaves_of_different_kind_differ() {
        let a: Cause<i32> = Cause::die(Defect::from_message("x"));
        let b: Cause<i32> = Cause::fail(1);
        assert_ne!(a, b);
        assert_ne!(a.clone().then(b.clone()), a.both(b));
    }
}
