#![forbid(unsafe_code)]

//! Deep watch: observe every notification anywhere below an object.
//!
//! # Design
//!
//! [`watch_deep`] builds a live mirror of the observed object graph. Each
//! object that raises property-changed gets an object node, each object
//! that raises collection-changed gets a collection node (an observable
//! collection gets both). Object nodes descend into the properties whose
//! declared type can notify; collection nodes descend into their items.
//!
//! On a change the affected part of the mirror is torn down, the callback
//! runs with the dotted path of the change, and the part is rebuilt against
//! the current values. Paths look like `Child.Number`, `Strings.Item[]` and
//! `Objects.Add()`.
//!
//! # Invariants
//!
//! 1. A node is subscribed to its target at most once.
//! 2. No node holds a `RefCell` borrow while the callback runs, so the
//!    callback may mutate the watched graph or dispose the watch.
//! 3. Recursion stops at [`DeepWatchOptions::max_depth`], which bounds
//!    self-referencing object graphs.

mod collection_node;
mod object_node;
mod property_cache;

use std::rc::Rc;

use tracing::debug;

use crate::disposable::Disposable;
use crate::error::{Result, WatchError};
use crate::object::{ObjectRef, Value};
use crate::scope;

use collection_node::CollectionNode;
use object_node::ObjectNode;

type Callback = Rc<dyn Fn(&str)>;

/// Options for [`watch_deep_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepWatchOptions {
    /// Maximum number of levels below the root that are subscribed.
    pub max_depth: usize,
}

impl Default for DeepWatchOptions {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

impl DeepWatchOptions {
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Invoke `callback` with the path of every change below `target`.
pub fn watch_deep(target: ObjectRef, callback: impl Fn(&str) + 'static) -> Result<Disposable> {
    watch_deep_with(target, DeepWatchOptions::default(), callback)
}

/// [`watch_deep`] with a callback that ignores the path.
pub fn watch_deep_any(target: ObjectRef, callback: impl Fn() + 'static) -> Result<Disposable> {
    watch_deep(target, move |_| callback())
}

/// [`watch_deep`] with explicit options.
pub fn watch_deep_with(
    target: ObjectRef,
    options: DeepWatchOptions,
    callback: impl Fn(&str) + 'static,
) -> Result<Disposable> {
    let type_name = target.type_info().name;
    let nodes = DeepNode::create(&Value::Object(target), "", 0, options);
    if nodes.is_empty() {
        return Err(WatchError::NotObservable {
            type_name: type_name.to_string(),
        });
    }

    let callback: Callback = Rc::new(callback);
    for node in &nodes {
        node.subscribe(&callback);
    }
    debug!(message = "depwatch.deep.watch", target = type_name, max_depth = options.max_depth);

    let token = Disposable::new(move || {
        for node in &nodes {
            node.unsubscribe();
        }
    });
    scope::collect(&token);
    Ok(token)
}

// ─── Mirror nodes ───────────────────────────────────────────────────────────

/// One subscription in the mirror tree.
enum DeepNode {
    Object(Rc<ObjectNode>),
    Collection(Rc<CollectionNode>),
}

impl DeepNode {
    /// Nodes for `value`: none for non-objects, one per capability otherwise.
    fn create(value: &Value, path: &str, depth: usize, options: DeepWatchOptions) -> Vec<Self> {
        let Value::Object(target) = value else {
            return Vec::new();
        };
        let mut nodes = Vec::with_capacity(2);
        if target.property_changed().is_some() {
            nodes.push(Self::Object(Rc::new(ObjectNode::new(
                Rc::clone(target),
                path.to_string(),
                depth,
                options,
            ))));
        }
        if target.collection_changed().is_some() {
            nodes.push(Self::Collection(Rc::new(CollectionNode::new(
                Rc::clone(target),
                path.to_string(),
                depth,
                options,
            ))));
        }
        nodes
    }

    fn subscribe(&self, callback: &Callback) {
        match self {
            Self::Object(node) => node.subscribe(callback),
            Self::Collection(node) => node.subscribe(callback),
        }
    }

    fn unsubscribe(&self) {
        match self {
            Self::Object(node) => node.unsubscribe(),
            Self::Collection(node) => node.unsubscribe(),
        }
    }
}

fn subscribe_all(nodes: &[DeepNode], callback: &Callback) {
    for node in nodes {
        node.subscribe(callback);
    }
}

fn unsubscribe_all(nodes: &[DeepNode]) {
    for node in nodes {
        node.unsubscribe();
    }
}

/// `owner.name`, or just `name` at the root.
fn full_name(owner: &str, name: &str) -> String {
    if owner.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        owner.to_string()
    } else {
        format!("{owner}.{name}")
    }
}
