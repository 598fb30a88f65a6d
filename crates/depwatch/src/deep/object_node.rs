#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use super::property_cache::notify_properties;
use super::{Callback, DeepNode, DeepWatchOptions, full_name, subscribe_all, unsubscribe_all};
use crate::event::HandlerId;
use crate::object::ObjectRef;

type Children = AHashMap<&'static str, Vec<DeepNode>>;

/// Mirror of an object raising property-changed.
pub(super) struct ObjectNode {
    target: ObjectRef,
    path: String,
    depth: usize,
    options: DeepWatchOptions,
    callback: RefCell<Option<Callback>>,
    handler: Cell<Option<HandlerId>>,
    children: RefCell<Option<Children>>,
}

impl ObjectNode {
    pub(super) fn new(
        target: ObjectRef,
        path: String,
        depth: usize,
        options: DeepWatchOptions,
    ) -> Self {
        Self {
            target,
            path,
            depth,
            options,
            callback: RefCell::new(None),
            handler: Cell::new(None),
            children: RefCell::new(None),
        }
    }

    pub(super) fn subscribe(self: &Rc<Self>, callback: &Callback) {
        let Some(event) = self.target.property_changed() else {
            return;
        };
        if self.handler.get().is_some() {
            return;
        }

        *self.callback.borrow_mut() = Some(Rc::clone(callback));
        let node: Weak<Self> = Rc::downgrade(self);
        self.handler.set(Some(event.subscribe(move |property: &str| {
            if let Some(node) = node.upgrade() {
                node.on_property_changed(property);
            }
        })));
        trace!(message = "depwatch.deep.subscribed", path = %self.path, kind = "object");

        let mut children = Children::new();
        for &name in notify_properties(self.target.type_info()).iter() {
            let nodes = self.child_nodes(name);
            subscribe_all(&nodes, callback);
            children.insert(name, nodes);
        }
        *self.children.borrow_mut() = Some(children);
    }

    pub(super) fn unsubscribe(&self) {
        if let Some(handler) = self.handler.take() {
            if let Some(event) = self.target.property_changed() {
                event.unsubscribe(handler);
            }
            trace!(message = "depwatch.deep.unsubscribed", path = %self.path, kind = "object");
        }
        self.callback.borrow_mut().take();

        let children = self.children.borrow_mut().take();
        for nodes in children.iter().flat_map(|children| children.values()) {
            unsubscribe_all(nodes);
        }
    }

    fn child_nodes(&self, name: &str) -> Vec<DeepNode> {
        if self.depth >= self.options.max_depth {
            return Vec::new();
        }
        let Some(value) = self.target.get(name) else {
            return Vec::new();
        };
        DeepNode::create(&value, &full_name(&self.path, name), self.depth + 1, self.options)
    }

    fn on_property_changed(&self, property: &str) {
        let stale = self
            .children
            .borrow_mut()
            .as_mut()
            .and_then(|children| children.remove(property));
        if let Some(stale) = stale {
            unsubscribe_all(&stale);
        }

        let callback = self.callback.borrow().clone();
        if let Some(callback) = &callback {
            callback(&full_name(&self.path, property));
        }

        // The callback may have disposed the watch.
        let Some(callback) = self.callback.borrow().clone() else {
            return;
        };
        let properties = notify_properties(self.target.type_info());
        let Some(&name) = properties.iter().find(|&&name| name == property) else {
            return;
        };
        let nodes = self.child_nodes(name);
        subscribe_all(&nodes, &callback);
        let replaced = match self.children.borrow_mut().as_mut() {
            Some(children) => children.insert(name, nodes),
            None => Some(nodes),
        };
        // A re-entrant change may already have rebuilt this entry.
        if let Some(replaced) = replaced {
            unsubscribe_all(&replaced);
        }
    }
}
