//! Property-based invariant tests for expression watches.
//!
//! 1. A watch fires exactly once per effective change of a dependency;
//!    writes that leave a value unchanged are silent.
//! 2. A disposed watch never fires, whatever happens afterwards.
//! 3. A conditional expression fires for changes of its test and of the
//!    selected branch only.
//! 4. A null-safe chain fires once per link replacement and once per
//!    change of the current leaf.
//! 5. In nested conditionals whose inner tests share a read, and whose
//!    branches read the same nodes under different selections, a node
//!    fires exactly when some selected path reads it.

mod common;

use std::rc::Rc;

use common::{TestObject, counter};
use depwatch::{Expr, watch};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Flag(bool),
    Left(i64),
    Right(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::bool::ANY.prop_map(Op::Flag),
        (0i64..4).prop_map(Op::Left),
        (0i64..4).prop_map(Op::Right),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    proptest::collection::vec(op_strategy(), 0..40)
}

#[derive(Debug, Clone)]
enum NestedOp {
    Flag(bool),
    Inner(i64),
    Left(i64),
    Right(i64),
}

fn nested_ops_strategy() -> impl Strategy<Value = Vec<NestedOp>> {
    let op = prop_oneof![
        proptest::bool::ANY.prop_map(NestedOp::Flag),
        (0i64..4).prop_map(NestedOp::Inner),
        (0i64..4).prop_map(NestedOp::Left),
        (0i64..4).prop_map(NestedOp::Right),
    ];
    proptest::collection::vec(op, 0..40)
}

#[derive(Debug, Clone)]
enum ChainOp {
    Replace(Option<usize>),
    Set(usize, i64),
}

fn chain_ops_strategy() -> impl Strategy<Value = Vec<ChainOp>> {
    let op = prop_oneof![
        proptest::option::of(0usize..3).prop_map(ChainOp::Replace),
        (0usize..3, 0i64..3).prop_map(|(index, value)| ChainOp::Set(index, value)),
    ];
    proptest::collection::vec(op, 0..40)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. One callback per effective change
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn fires_once_per_effective_change(values in proptest::collection::vec(0i64..5, 0..50)) {
        let object = TestObject::new();
        let (count, bump) = counter();
        let _token = watch(&(Expr::object(&object).member("Number") + 1), bump).unwrap();

        let mut current = 0;
        let mut expected = 0;
        for value in values {
            if value != current {
                expected += 1;
                current = value;
            }
            object.set_number(value);
        }
        prop_assert_eq!(count.get(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Disposed watches stay silent
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn disposed_watch_is_silent(ops in ops_strategy()) {
        let root = TestObject::new();
        let left = TestObject::new();
        let right = TestObject::new();
        let expr = Expr::object(&root).member("Flag").then_else(
            Expr::object(&left).member("Number"),
            Expr::object(&right).member("Number"),
        );
        let (count, bump) = counter();
        let token = watch(&expr, bump).unwrap();
        token.dispose();

        for op in ops {
            match op {
                Op::Flag(flag) => root.set_flag(flag),
                Op::Left(value) => left.set_number(value),
                Op::Right(value) => right.set_number(value),
            }
        }
        prop_assert_eq!(count.get(), 0);
        prop_assert_eq!(root.property_changed_handlers(), 0);
        prop_assert_eq!(left.property_changed_handlers(), 0);
        prop_assert_eq!(right.property_changed_handlers(), 0);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Gating matches a model of the selected branch
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn gating_matches_model(initial in proptest::bool::ANY, ops in ops_strategy()) {
        let root = TestObject::new();
        let left = TestObject::new();
        let right = TestObject::new();
        root.set_flag(initial);
        let expr = Expr::object(&root).member("Flag").then_else(
            Expr::object(&left).member("Number"),
            Expr::object(&right).member("Number"),
        );
        let (count, bump) = counter();
        let _token = watch(&expr, bump).unwrap();

        let (mut flag, mut left_value, mut right_value) = (initial, 0, 0);
        let mut expected = 0;
        for op in ops {
            match op {
                Op::Flag(value) => {
                    if value != flag {
                        expected += 1;
                        flag = value;
                    }
                    root.set_flag(value);
                }
                Op::Left(value) => {
                    if value != left_value {
                        if flag {
                            expected += 1;
                        }
                        left_value = value;
                    }
                    left.set_number(value);
                }
                Op::Right(value) => {
                    if value != right_value {
                        if !flag {
                            expected += 1;
                        }
                        right_value = value;
                    }
                    right.set_number(value);
                }
            }
            prop_assert_eq!(count.get(), expected);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Null-safe chains re-link
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn chain_relinks_to_the_current_child(ops in chain_ops_strategy()) {
        let root = TestObject::new();
        let children: Vec<Rc<TestObject>> = (0..3).map(|_| TestObject::new()).collect();
        let expr = Expr::object(&root).member("Child").member("Number");
        let (count, bump) = counter();
        let _token = watch(&expr, bump).unwrap();

        let mut current: Option<usize> = None;
        let mut values = [0i64; 3];
        let mut expected = 0;
        for op in ops {
            match op {
                ChainOp::Replace(index) => {
                    if index != current {
                        expected += 1;
                        current = index;
                    }
                    root.set_child(index.map(|index| Rc::clone(&children[index])));
                }
                ChainOp::Set(index, value) => {
                    if values[index] != value {
                        if current == Some(index) {
                            expected += 1;
                        }
                        values[index] = value;
                    }
                    children[index].set_number(value);
                }
            }
        }
        prop_assert_eq!(count.get(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Nested gating with reads shared across conditionals
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn nested_gating_matches_model(initial in proptest::bool::ANY, ops in nested_ops_strategy()) {
        let root = TestObject::new();
        let inner = TestObject::new();
        let left = TestObject::new();
        let right = TestObject::new();
        root.set_flag(initial);
        let high = || Expr::object(&inner).member("Number").gt(1);
        let left_number = || Expr::object(&left).member("Number");
        let right_number = || Expr::object(&right).member("Number");
        // flag ? (inner > 1 ? left : right) : (inner > 1 ? right : left)
        let expr = Expr::object(&root).member("Flag").then_else(
            high().then_else(left_number(), right_number()),
            high().then_else(right_number(), left_number()),
        );
        let (count, bump) = counter();
        let _token = watch(&expr, bump).unwrap();

        let (mut flag, mut inner_value, mut left_value, mut right_value) = (initial, 0, 0, 0);
        let mut expected = 0;
        for op in ops {
            let reads_left = flag == (inner_value > 1);
            match op {
                NestedOp::Flag(value) => {
                    if value != flag {
                        expected += 1;
                        flag = value;
                    }
                    root.set_flag(value);
                }
                NestedOp::Inner(value) => {
                    if value != inner_value {
                        expected += 1;
                        inner_value = value;
                    }
                    inner.set_number(value);
                }
                NestedOp::Left(value) => {
                    if value != left_value {
                        if reads_left {
                            expected += 1;
                        }
                        left_value = value;
                    }
                    left.set_number(value);
                }
                NestedOp::Right(value) => {
                    if value != right_value {
                        if !reads_left {
                            expected += 1;
                        }
                        right_value = value;
                    }
                    right.set_number(value);
                }
            }
            prop_assert_eq!(count.get(), expected);
        }
    }
}
