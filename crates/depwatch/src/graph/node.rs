#![forbid(unsafe_code)]

//! Dependency nodes and their activation protocol.
//!
//! A node stands for one read site in the watched expression. Its shape
//! (kind, accessor, downstream set) is frozen when the graph is built; only
//! the runtime state below changes afterwards.
//!
//! # Protocol
//!
//! - `initialize` marks a node and its whole downstream closure active,
//!   binds each node to the object its accessor currently yields and wires
//!   the node's changed event to the watch listener. Shared nodes are
//!   initialized once; later calls return an empty token.
//! - A bound node handles property-changed for `P` by locating the
//!   downstream node whose property is `P`, unbinding that node's active
//!   subtree, raising its changed event, and rebinding the subtree against
//!   whatever the accessors yield now.
//! - `set_activated` toggles a single node; conditional gating drives it.
//!
//! # Invariants
//!
//! 1. A node holds at most one binding, and a rebind always releases the
//!    previous one first.
//! 2. Leaf nodes are never bound: nothing downstream could consume their
//!    notifications.
//! 3. No `RefCell` borrow is held while raising events.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use super::{Graph, NodeId};
use crate::disposable::Disposable;
use crate::event::{EventSource, Handler, HandlerId};
use crate::expr::Getter;
use crate::object::{ObjectRef, Value};

/// Role of a node in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry point with no upstream: a constant, captured variable or
    /// get-only static member.
    Root,
    /// `owner.property`, downstream of the owner's node.
    Relay { property: String },
    /// Routes signals through an operator, call or conditional result.
    Virtual,
}

/// Runtime activation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Inactive,
    /// Binding in progress.
    Activating,
    Active,
}

struct Binding {
    target: ObjectRef,
    handler: HandlerId,
}

/// One read site of a watched expression.
pub struct DependencyNode {
    key: String,
    label: String,
    kind: NodeKind,
    accessor: Option<Getter>,
    pub(super) downstream: Vec<NodeId>,
    state: Cell<NodeState>,
    initialized: Cell<bool>,
    binding: RefCell<Option<Binding>>,
    changed: EventSource<()>,
}

impl DependencyNode {
    pub(super) fn new(
        key: String,
        label: String,
        kind: NodeKind,
        accessor: Option<Getter>,
        downstream: Vec<NodeId>,
    ) -> Self {
        Self {
            key,
            label,
            kind,
            accessor,
            downstream,
            state: Cell::new(NodeState::Inactive),
            initialized: Cell::new(false),
            binding: RefCell::new(None),
            changed: EventSource::new(),
        }
    }

    /// Canonical structural key (includes object identities).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-readable expression text.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.kind == NodeKind::Virtual
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.downstream.is_empty()
    }

    /// Property name for relay nodes.
    #[must_use]
    pub fn property(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Relay { property } => Some(property),
            NodeKind::Root | NodeKind::Virtual => None,
        }
    }

    #[must_use]
    pub fn downstream(&self) -> &[NodeId] {
        &self.downstream
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.state.get() != NodeState::Inactive
    }

    /// Whether the node currently listens to an object.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.borrow().is_some()
    }

    pub(super) fn changed(&self) -> &EventSource<()> {
        &self.changed
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match &self.kind {
            NodeKind::Root => "Root".to_string(),
            NodeKind::Virtual => "Virtual".to_string(),
            NodeKind::Relay { property } if self.is_leaf() => format!("Leaf:{property}"),
            NodeKind::Relay { property } => format!("Relay:{property}"),
        };
        write!(f, "<{role}:{}>", self.label)
    }
}

// ─── Activation protocol ────────────────────────────────────────────────────

impl Graph {
    /// Activate `id` and its downstream closure, routing their changed
    /// events to `listener`. Returns a token that reverses exactly this.
    pub(crate) fn initialize(self: &Rc<Self>, id: NodeId, listener: &Handler<()>) -> Disposable {
        let node = self.node(id);
        if node.initialized.get() {
            return Disposable::empty();
        }
        node.initialized.set(true);
        node.state.set(NodeState::Activating);

        let listener_id = node.changed.subscribe_rc(Rc::clone(listener));
        self.bind(id);

        let downstream: Vec<Disposable> = node
            .downstream
            .iter()
            .map(|&next| self.initialize(next, listener))
            .collect();
        node.state.set(NodeState::Active);

        let graph = Rc::clone(self);
        Disposable::new(move || {
            let node = graph.node(id);
            node.state.set(NodeState::Inactive);
            node.changed.unsubscribe(listener_id);
            graph.unbind(id);
            for token in downstream {
                token.dispose();
            }
            node.initialized.set(false);
        })
    }

    /// Gate a single node. Re-activation rebinds, since the target may have
    /// changed while the node was inactive.
    pub(crate) fn set_activated(self: &Rc<Self>, id: NodeId, activated: bool) {
        let node = self.node(id);
        if node.is_activated() == activated {
            return;
        }
        if activated && !node.initialized.get() {
            return;
        }

        if activated {
            node.state.set(NodeState::Activating);
            self.bind(id);
            node.state.set(NodeState::Active);
        } else {
            node.state.set(NodeState::Inactive);
            self.unbind(id);
        }
    }

    fn bind_recursively(self: &Rc<Self>, id: NodeId) {
        self.bind(id);
        for &next in &self.node(id).downstream {
            let node = self.node(next);
            if !node.is_leaf() && node.is_activated() {
                self.bind_recursively(next);
            }
        }
    }

    fn unbind_recursively(&self, id: NodeId) {
        self.unbind(id);
        for &next in &self.node(id).downstream {
            let node = self.node(next);
            if !node.is_leaf() && node.is_activated() {
                self.unbind_recursively(next);
            }
        }
    }

    fn bind(self: &Rc<Self>, id: NodeId) {
        self.unbind(id);

        let node = self.node(id);
        if node.is_leaf() {
            return;
        }
        let Some(accessor) = &node.accessor else {
            return;
        };
        // An error or Null here means "no current target".
        let Ok(Value::Object(target)) = accessor() else {
            return;
        };
        let Some(event) = target.property_changed() else {
            return;
        };

        let graph = Rc::downgrade(self);
        let handler = event.subscribe(move |property: &str| {
            if let Some(graph) = graph.upgrade() {
                graph.on_property_changed(id, property);
            }
        });
        trace!(message = "depwatch.node.bound", node = %node.label);
        *node.binding.borrow_mut() = Some(Binding { target, handler });
    }

    fn unbind(&self, id: NodeId) {
        let node = self.node(id);
        let binding = node.binding.borrow_mut().take();
        if let Some(Binding { target, handler }) = binding {
            if let Some(event) = target.property_changed() {
                event.unsubscribe(handler);
            }
            trace!(message = "depwatch.node.unbound", node = %node.label);
        }
    }

    fn on_property_changed(self: &Rc<Self>, id: NodeId, property: &str) {
        if property.is_empty() {
            return;
        }
        let Some(changed) = self
            .node(id)
            .downstream
            .iter()
            .copied()
            .find(|&next| self.node(next).property() == Some(property))
        else {
            return;
        };
        trace!(
            message = "depwatch.node.changed",
            owner = %self.node(id).label,
            property
        );

        self.unbind_recursively(changed);
        if self.node(changed).is_activated() {
            self.node(changed).changed.raise(&());
            // Handlers may have deactivated the node or disposed the watch.
            if self.node(changed).is_activated() {
                self.bind_recursively(changed);
            }
        }
    }
}
