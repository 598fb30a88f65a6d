#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::{Callback, DeepNode, DeepWatchOptions, full_name, subscribe_all, unsubscribe_all};
use crate::collection::INDEXER_NAME;
use crate::event::HandlerId;
use crate::object::{CollectionChangeAction, CollectionChangedArgs, ObjectRef, Value};

/// Mirror nodes of one collection item.
struct Child {
    item: Value,
    nodes: Vec<DeepNode>,
}

/// Mirror of an object raising collection-changed.
pub(super) struct CollectionNode {
    target: ObjectRef,
    path: String,
    depth: usize,
    options: DeepWatchOptions,
    callback: RefCell<Option<Callback>>,
    handler: Cell<Option<HandlerId>>,
    children: RefCell<Vec<Child>>,
}

impl CollectionNode {
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
            children: RefCell::new(Vec::new()),
        }
    }

    pub(super) fn subscribe(self: &Rc<Self>, callback: &Callback) {
        let Some(event) = self.target.collection_changed() else {
            return;
        };
        if self.handler.get().is_some() {
            return;
        }

        *self.callback.borrow_mut() = Some(Rc::clone(callback));
        let node: Weak<Self> = Rc::downgrade(self);
        self.handler.set(Some(event.subscribe(move |args: &CollectionChangedArgs| {
            if let Some(node) = node.upgrade() {
                node.on_collection_changed(args);
            }
        })));
        trace!(message = "depwatch.deep.subscribed", path = %self.path, kind = "collection");

        self.rebuild(callback);
    }

    pub(super) fn unsubscribe(&self) {
        if let Some(handler) = self.handler.take() {
            if let Some(event) = self.target.collection_changed() {
                event.unsubscribe(handler);
            }
            trace!(message = "depwatch.deep.unsubscribed", path = %self.path, kind = "collection");
        }
        self.callback.borrow_mut().take();
        self.clear_children();
    }

    fn child(&self, item: Value) -> Child {
        let nodes = if self.depth < self.options.max_depth {
            DeepNode::create(
                &item,
                &full_name(&self.path, INDEXER_NAME),
                self.depth + 1,
                self.options,
            )
        } else {
            Vec::new()
        };
        Child { item, nodes }
    }

    fn rebuild(&self, callback: &Callback) {
        let children: Vec<Child> = self
            .target
            .items()
            .into_iter()
            .map(|item| self.child(item))
            .collect();
        for child in &children {
            subscribe_all(&child.nodes, callback);
        }
        let stale = std::mem::replace(&mut *self.children.borrow_mut(), children);
        for child in &stale {
            unsubscribe_all(&child.nodes);
        }
    }

    fn clear_children(&self) {
        let stale = std::mem::take(&mut *self.children.borrow_mut());
        for child in &stale {
            unsubscribe_all(&child.nodes);
        }
    }

    fn on_collection_changed(&self, args: &CollectionChangedArgs) {
        let name = full_name(&self.path, &format!("{}()", args.action));

        if args.action == CollectionChangeAction::Reset {
            self.clear_children();
        } else {
            for old in &args.old_items {
                let removed = {
                    let mut children = self.children.borrow_mut();
                    children
                        .iter()
                        .position(|child| child.item == *old)
                        .map(|index| children.remove(index))
                };
                if let Some(removed) = removed {
                    unsubscribe_all(&removed.nodes);
                }
            }
        }

        let callback = self.callback.borrow().clone();
        if let Some(callback) = &callback {
            callback(&name);
        }

        // The callback may have disposed the watch.
        let Some(callback) = self.callback.borrow().clone() else {
            return;
        };
        if args.action == CollectionChangeAction::Reset {
            self.rebuild(&callback);
            return;
        }
        for item in &args.new_items {
            let child = self.child(item.clone());
            subscribe_all(&child.nodes, &callback);
            self.children.borrow_mut().push(child);
        }
    }
}
