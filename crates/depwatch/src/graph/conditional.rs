#![forbid(unsafe_code)]

//! Branch gating for conditional expressions.
//!
//! Each `test ? if_true : if_false` in a watched expression gets a
//! [`ConditionalNode`]. Nodes read only inside one branch are kept active
//! only while the test selects that branch; nodes read by the test, or by
//! both branches, stay active for as long as the conditional is.
//!
//! One node may be read by several conditionals of the same tree, so a
//! node's activation is never decided by a single conditional. Every test
//! change recomputes, from the roots down, the set of nodes the current
//! selections read, and only gated nodes outside that set are switched off.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use bitflags::bitflags;
use tracing::{debug, trace};

use super::{ConditionalId, Graph, NodeId};
use crate::disposable::Disposable;
use crate::expr::Getter;
use crate::object::Value;

bitflags! {
    /// Where inside a conditional a node was read. Accumulates across reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Bucket: u8 {
        const IF_TRUE  = 0b001;
        const IF_FALSE = 0b010;
        const BOTH     = 0b011;
        /// Test reads dominate: a node read by the test is never gated.
        const TEST     = 0b111;
    }
}

impl Bucket {
    /// Whether a node with these flags is exempt from gating.
    #[must_use]
    pub fn is_ungated(self) -> bool {
        self.contains(Self::BOTH)
    }
}

/// One conditional expression.
pub struct ConditionalNode {
    label: String,
    is_root: bool,
    test: Getter,
    test_nodes: Vec<NodeId>,
    shared_nodes: Vec<NodeId>,
    if_true_nodes: Vec<NodeId>,
    if_false_nodes: Vec<NodeId>,
    if_true_children: Vec<ConditionalId>,
    if_false_children: Vec<ConditionalId>,
    activated: Cell<bool>,
    selected: Cell<Option<bool>>,
}

impl ConditionalNode {
    pub(super) fn new(
        label: String,
        is_root: bool,
        test: Getter,
        affected: &[(NodeId, Bucket)],
        if_true_children: Vec<ConditionalId>,
        if_false_children: Vec<ConditionalId>,
    ) -> Self {
        let mut node = Self {
            label,
            is_root,
            test,
            test_nodes: Vec::new(),
            shared_nodes: Vec::new(),
            if_true_nodes: Vec::new(),
            if_false_nodes: Vec::new(),
            if_true_children,
            if_false_children,
            activated: Cell::new(false),
            selected: Cell::new(None),
        };
        for &(id, bucket) in affected {
            if bucket == Bucket::TEST {
                node.test_nodes.push(id);
            } else if bucket == Bucket::BOTH {
                node.shared_nodes.push(id);
            } else if bucket == Bucket::IF_TRUE {
                node.if_true_nodes.push(id);
            } else {
                node.if_false_nodes.push(id);
            }
        }
        node
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.activated.get()
    }

    /// Branch chosen by the last successful test evaluation.
    #[must_use]
    pub fn selected(&self) -> Option<bool> {
        self.selected.get()
    }

    /// Nodes read by the test expression.
    #[must_use]
    pub fn test_nodes(&self) -> &[NodeId] {
        &self.test_nodes
    }

    /// Nodes read by both branches.
    #[must_use]
    pub fn shared_nodes(&self) -> &[NodeId] {
        &self.shared_nodes
    }

    /// Nodes gated by `branch` (`true` for the if-true side).
    #[must_use]
    pub fn branch_nodes(&self, branch: bool) -> &[NodeId] {
        if branch {
            &self.if_true_nodes
        } else {
            &self.if_false_nodes
        }
    }

    /// Nested conditionals directly inside `branch`.
    #[must_use]
    pub fn branch_children(&self, branch: bool) -> &[ConditionalId] {
        if branch {
            &self.if_true_children
        } else {
            &self.if_false_children
        }
    }

    /// No gated nodes and no nested conditionals: gating would be a no-op.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.if_true_nodes.is_empty()
            && self.if_false_nodes.is_empty()
            && self.if_true_children.is_empty()
            && self.if_false_children.is_empty()
    }

    fn children(&self) -> impl Iterator<Item = ConditionalId> + '_ {
        self.if_true_children
            .iter()
            .chain(&self.if_false_children)
            .copied()
    }

}

impl fmt::Debug for ConditionalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalNode")
            .field("label", &self.label)
            .field("is_root", &self.is_root)
            .field("activated", &self.activated.get())
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Start gating every root conditional and its nested conditionals.
    pub(crate) fn initialize_gating(self: &Rc<Self>) -> Disposable {
        let mut test_handlers = Vec::new();
        let mut pending = self.conditional_roots.clone();
        while let Some(id) = pending.pop() {
            let conditional = self.conditional(id);
            for &node in &conditional.test_nodes {
                let graph = Rc::downgrade(self);
                let handler = self.node(node).changed().subscribe(move |()| {
                    if let Some(graph) = graph.upgrade() {
                        graph.on_test_changed(id);
                    }
                });
                test_handlers.push((node, handler));
            }
            pending.extend(conditional.children());
        }

        self.gating.set(true);
        self.regate();

        let graph = Rc::clone(self);
        Disposable::new(move || {
            graph.gating.set(false);
            graph.regate();
            for (node, handler) in test_handlers {
                graph.node(node).changed().unsubscribe(handler);
            }
        })
    }

    fn on_test_changed(self: &Rc<Self>, id: ConditionalId) {
        if self.conditional(id).is_activated() {
            self.regate();
        }
    }

    /// Re-evaluate the tests of every reachable conditional, then activate
    /// exactly the gated nodes the current selections read.
    fn regate(self: &Rc<Self>) {
        let live = self.gating.get();
        let mut needed: AHashSet<NodeId> = AHashSet::new();
        if live {
            needed.extend(self.ungated.iter().copied());
        }
        for &root in &self.conditional_roots {
            self.select(root, live, &mut needed);
        }
        for &node in &self.gated {
            self.set_activated(node, needed.contains(&node));
        }
    }

    fn select(&self, id: ConditionalId, reachable: bool, needed: &mut AHashSet<NodeId>) {
        let conditional = self.conditional(id);
        conditional.activated.set(reachable);
        if reachable {
            needed.extend(conditional.test_nodes.iter().copied());
            needed.extend(conditional.shared_nodes.iter().copied());
            if let Some(selected) = self.evaluate_test(conditional) {
                conditional.selected.set(Some(selected));
            }
        }

        // Before the first successful test both branches stay tracked.
        let selected = conditional.selected.get();
        for branch in [true, false] {
            let open = reachable && selected.is_none_or(|selected| selected == branch);
            if open {
                needed.extend(conditional.branch_nodes(branch).iter().copied());
            }
            for &child in conditional.branch_children(branch) {
                self.select(child, open, needed);
            }
        }
    }

    fn evaluate_test(&self, conditional: &ConditionalNode) -> Option<bool> {
        match (conditional.test)() {
            Ok(Value::Bool(selected)) => {
                trace!(
                    message = "depwatch.conditional.update",
                    conditional = %conditional.label,
                    selected
                );
                Some(selected)
            }
            Ok(other) => {
                debug!(
                    message = "depwatch.conditional.skipped",
                    conditional = %conditional.label,
                    found = other.kind_name()
                );
                None
            }
            Err(err) => {
                debug!(
                    message = "depwatch.conditional.skipped",
                    conditional = %conditional.label,
                    error = %err
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_flags_accumulate() {
        assert!(!Bucket::IF_TRUE.is_ungated());
        assert!(!Bucket::IF_FALSE.is_ungated());
        assert!((Bucket::IF_TRUE | Bucket::IF_FALSE).is_ungated());
        assert_eq!(Bucket::IF_TRUE | Bucket::IF_FALSE, Bucket::BOTH);
        assert_eq!(Bucket::IF_TRUE | Bucket::TEST, Bucket::TEST);
        assert!(Bucket::TEST.is_ungated());
    }
}
