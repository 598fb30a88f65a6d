#![forbid(unsafe_code)]

//! Dependency graphs built from watched expressions.
//!
//! # Design
//!
//! A [`Graph`] is an arena: dependency nodes and conditional nodes live in
//! two vectors and refer to each other by [`NodeId`] / [`ConditionalId`].
//! Several parents may share a downstream node (`o.Number + o.Number`
//! reads one node twice), which an index-based arena expresses without
//! ownership cycles.
//!
//! The shape of a graph never changes after [`Graph::analyze`]. Activation
//! state lives in `Cell`/`RefCell` fields per node, so the notification
//! path can run through `&Graph` while host objects raise events
//! re-entrantly.
//!
//! # Invariants
//!
//! 1. A node never appears in its own downstream set.
//! 2. Node identity is the canonical key of its sub-expression; one
//!    analysis creates at most one node per key.
//! 3. Root sets contain only roots with downstream nodes and only
//!    non-empty root conditionals.
//! 4. While gating runs, a gated node is active exactly when it is read
//!    outside every conditional, or by the test, a shared read or the
//!    selected branch of a conditional whose ancestors all select it.
//!    Several conditionals may gate the same node.
//!
//! # Failure Modes
//!
//! Analysis fails with [`WatchError`](crate::WatchError) for expression
//! shapes whose changes cannot be observed. Runtime evaluation failures in
//! node accessors are treated as "no current target" and never surface.

mod builder;
mod conditional;
mod node;

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::disposable::Disposable;
use crate::error::Result;
use crate::event::Handler;
use crate::expr::Expr;

pub use conditional::{Bucket, ConditionalNode};
pub use node::{DependencyNode, NodeKind, NodeState};

/// Index of a [`DependencyNode`] in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Index of a [`ConditionalNode`] in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionalId(usize);

/// The dependency forest of one watched expression.
pub struct Graph {
    expression: String,
    nodes: Vec<DependencyNode>,
    conditionals: Vec<ConditionalNode>,
    roots: Vec<NodeId>,
    conditional_roots: Vec<ConditionalId>,
    /// Nodes some conditional may switch off.
    gated: Vec<NodeId>,
    /// Gated nodes that are also read outside every conditional.
    ungated: Vec<NodeId>,
    gating: Cell<bool>,
}

impl Graph {
    /// Analyze `expr` into a dependency graph.
    pub fn analyze(expr: &Expr) -> Result<Rc<Self>> {
        let graph = builder::GraphBuilder::default().build(expr)?;
        debug!(
            message = "depwatch.graph.built",
            expression = %graph.expression,
            nodes = graph.nodes.len(),
            roots = graph.roots.len(),
            conditionals = graph.conditional_roots.len()
        );
        Ok(Rc::new(graph))
    }

    /// Text of the analyzed expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Root dependency nodes to initialize.
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Root conditional nodes to initialize.
    #[must_use]
    pub fn conditional_roots(&self) -> &[ConditionalId] {
        &self.conditional_roots
    }

    /// All dependency nodes, in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DependencyNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }

    /// Look a node up by its display text.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.label() == label)
            .map(NodeId)
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn conditional(&self, id: ConditionalId) -> &ConditionalNode {
        &self.conditionals[id.0]
    }

    /// Nodes that conditional gating may deactivate.
    #[must_use]
    pub fn gated(&self) -> &[NodeId] {
        &self.gated
    }

    /// Initialize every root node, then start gating, routing node changes
    /// to `listener`. Disposing the token deactivates the whole forest.
    pub fn activate(self: &Rc<Self>, listener: Handler<()>) -> Disposable {
        let mut tokens: Vec<Disposable> = self
            .roots
            .iter()
            .map(|&root| self.initialize(root, &listener))
            .collect();
        if !self.conditional_roots.is_empty() {
            tokens.push(self.initialize_gating());
        }
        Disposable::from_many(tokens)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("expression", &self.expression)
            .field("nodes", &self.nodes)
            .field("roots", &self.roots)
            .field("conditional_roots", &self.conditional_roots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::expr::Var;
    use crate::object::{
        MemberInfo, Object, PropertyChanged, Type, TypeInfo, Value, set_property,
    };

    static CELL_MEMBERS: [MemberInfo; 3] = [
        MemberInfo::property("Number", Type::Int),
        MemberInfo::property("Next", Type::Object(&CELL)),
        MemberInfo::property("Flag", Type::Bool),
    ];
    static CELL: TypeInfo = TypeInfo::observable("Cell", &CELL_MEMBERS);

    #[derive(Default)]
    struct Node {
        number: RefCell<i64>,
        next: RefCell<Option<Rc<Node>>>,
        flag: RefCell<bool>,
        changed: PropertyChanged,
    }

    impl Node {
        fn set_number(&self, value: i64) {
            set_property(&self.changed, &self.number, value, "Number");
        }

        fn set_next(&self, value: Option<Rc<Node>>) {
            {
                *self.next.borrow_mut() = value;
            }
            self.changed.raise("Next");
        }

        fn set_flag(&self, value: bool) {
            set_property(&self.changed, &self.flag, value, "Flag");
        }
    }

    impl Object for Node {
        fn type_info(&self) -> &'static TypeInfo {
            &CELL
        }

        fn get(&self, member: &str) -> Option<Value> {
            match member {
                "Number" => Some(Value::Int(*self.number.borrow())),
                "Next" => Some(Value::from_option(self.next.borrow().clone())),
                "Flag" => Some(Value::Bool(*self.flag.borrow())),
                _ => None,
            }
        }

        fn property_changed(&self) -> Option<&PropertyChanged> {
            Some(&self.changed)
        }
    }

    fn counting_listener() -> (Rc<Cell<u32>>, Handler<()>) {
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        (count, Rc::new(move |()| count_clone.set(count_clone.get() + 1)))
    }

    #[test]
    fn chain_builds_root_relay_leaf() {
        let root = Rc::new(Node::default());
        let var = Var::object("root", &root);
        let graph = Graph::analyze(&Expr::var(&var).member("Next").member("Number")).unwrap();

        assert_eq!(graph.roots().len(), 1);
        let root_node = graph.node(graph.roots()[0]);
        assert!(root_node.is_root());
        assert_eq!(root_node.label(), "root");

        let next = graph.find("root.Next").unwrap();
        let number = graph.find("root.Next.Number").unwrap();
        assert_eq!(root_node.downstream(), &[next]);
        assert_eq!(graph.node(next).downstream(), &[number]);
        assert!(graph.node(number).is_leaf());
        assert_eq!(graph.node(number).property(), Some("Number"));
    }

    #[test]
    fn diamond_reads_share_one_node() {
        let root = Rc::new(Node::default());
        let number = Expr::object(&root).member("Number");
        let graph = Graph::analyze(&(number.clone() + number)).unwrap();

        let relays = graph
            .nodes()
            .filter(|(_, node)| node.property() == Some("Number"))
            .count();
        assert_eq!(relays, 1);
    }

    #[test]
    fn relinking_follows_replaced_targets() {
        let root = Rc::new(Node::default());
        let graph =
            Graph::analyze(&Expr::object(&root).member("Next").member("Number")).unwrap();
        let (count, listener) = counting_listener();
        let token = graph.activate(listener);

        let next_id = graph.find("value(Cell).Next").unwrap();
        assert!(!graph.node(next_id).is_bound());

        let first = Rc::new(Node::default());
        root.set_next(Some(Rc::clone(&first)));
        assert_eq!(count.get(), 1);
        assert!(graph.node(next_id).is_bound());

        first.set_number(3);
        assert_eq!(count.get(), 2);

        let second = Rc::new(Node::default());
        root.set_next(Some(Rc::clone(&second)));
        assert_eq!(count.get(), 3);
        first.set_number(4);
        assert_eq!(count.get(), 3);
        assert!(first.changed.is_empty());

        token.dispose();
        second.set_number(9);
        assert_eq!(count.get(), 3);
        assert!(root.changed.is_empty());
        assert!(second.changed.is_empty());
    }

    #[test]
    fn inactive_branch_is_unbound() {
        let root = Rc::new(Node::default());
        let a = Rc::new(Node::default());
        let b = Rc::new(Node::default());
        root.set_flag(true);
        let expr = Expr::object(&root)
            .member("Flag")
            .then_else(Expr::object(&a).member("Number"), Expr::object(&b).member("Number"));
        let graph = Graph::analyze(&expr).unwrap();
        assert_eq!(graph.conditional_roots().len(), 1);

        let (count, listener) = counting_listener();
        let _token = graph.activate(listener);

        let conditional = graph.conditional(graph.conditional_roots()[0]);
        let if_false = conditional.branch_nodes(false)[0];
        assert!(!graph.node(if_false).is_activated());

        b.set_number(1);
        assert_eq!(count.get(), 0);
        a.set_number(1);
        assert_eq!(count.get(), 1);

        root.set_flag(false);
        assert_eq!(count.get(), 2);
        assert!(graph.node(if_false).is_activated());
        a.set_number(2);
        assert_eq!(count.get(), 2);
        b.set_number(2);
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn shared_graph_nodes_initialize_once() {
        let root = Rc::new(Node::default());
        let expr = Expr::object(&root).member("Number") * Expr::object(&root).member("Number");
        let graph = Graph::analyze(&expr).unwrap();
        let (count, listener) = counting_listener();
        let token = graph.activate(listener);

        assert_eq!(root.changed.handler_count(), 1);
        root.set_number(5);
        assert_eq!(count.get(), 1);
        token.dispose();
        token.dispose();
        assert!(root.changed.is_empty());
    }
}
