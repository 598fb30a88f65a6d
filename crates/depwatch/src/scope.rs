#![forbid(unsafe_code)]

//! Scopes group the release tokens of watches so they can be torn down
//! together.
//!
//! While a [`ScopeGuard`] from [`Scope::begin`] is alive, the scope is the
//! thread's active scope and every watch created on this thread registers
//! its token with it. Guards restore the previously active scope on drop,
//! so nested `begin` calls behave like a stack.
//!
//! A scope created while another is active becomes that scope's child
//! unless it is detached. Disposing a scope releases its tokens, runs its
//! `on_disposed` handlers, then disposes its children.
//!
//! # Example
//!
//! ```ignore
//! let scope = Scope::new(false);
//! scope.run(|| watch(&expr, || println!("changed")))??;
//! scope.dispose(); // the watch is gone
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::disposable::Disposable;
use crate::error::{Result, WatchError};
use crate::event::{EventSource, HandlerId};

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<Scope>> = const { RefCell::new(None) };
}

struct ScopeInner {
    tokens: RefCell<Vec<Disposable>>,
    children: RefCell<Vec<Scope>>,
    parent: Option<Weak<ScopeInner>>,
    detached: bool,
    disposed: Cell<bool>,
    on_disposed: EventSource<()>,
}

/// A disposal group for watches.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// Create a scope. Unless `detached`, it becomes a child of the
    /// currently active scope (if any).
    #[must_use]
    pub fn new(detached: bool) -> Self {
        let parent = if detached { None } else { Self::current() };
        let scope = Self {
            inner: Rc::new(ScopeInner {
                tokens: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
                parent: parent.as_ref().map(|parent| Rc::downgrade(&parent.inner)),
                detached,
                disposed: Cell::new(false),
                on_disposed: EventSource::new(),
            }),
        };
        if let Some(parent) = parent {
            parent.inner.children.borrow_mut().push(scope.clone());
        }
        scope
    }

    /// The thread's active scope.
    #[must_use]
    pub fn current() -> Option<Scope> {
        ACTIVE_SCOPE.with(|active| active.borrow().clone())
    }

    /// Make this scope active until the returned guard drops.
    pub fn begin(&self) -> Result<ScopeGuard> {
        if self.is_disposed() {
            return Err(WatchError::ScopeDisposed);
        }
        let previous = ACTIVE_SCOPE.with(|active| active.borrow_mut().replace(self.clone()));
        Ok(ScopeGuard { previous })
    }

    /// Run `f` with this scope active.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = self.begin()?;
        Ok(f())
    }

    /// Register a token to be released with this scope. Ignored once the
    /// scope is disposed.
    pub fn add(&self, token: Disposable) {
        if !self.is_disposed() {
            self.inner.tokens.borrow_mut().push(token);
        }
    }

    /// Run `handler` when the scope is disposed.
    pub fn on_disposed(&self, handler: impl Fn() + 'static) -> HandlerId {
        self.inner.on_disposed.subscribe(move |()| handler())
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.inner.detached
    }

    /// Number of registered tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.inner.tokens.borrow().len()
    }

    /// Number of live child scopes.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    /// Release every token and child scope. Idempotent.
    pub fn dispose(&self) {
        self.stop(false);
    }

    fn stop(&self, from_parent: bool) {
        if self.inner.disposed.replace(true) {
            return;
        }

        let tokens = std::mem::take(&mut *self.inner.tokens.borrow_mut());
        let token_count = tokens.len();
        for token in tokens {
            token.dispose();
        }

        self.inner.on_disposed.raise(&());

        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for child in &children {
            child.stop(true);
        }

        if !from_parent {
            if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
                parent
                    .children
                    .borrow_mut()
                    .retain(|child| !Rc::ptr_eq(&child.inner, &self.inner));
            }
        }

        debug!(
            message = "depwatch.scope.disposed",
            tokens = token_count,
            children = children.len(),
            from_parent
        );
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("detached", &self.inner.detached)
            .field("disposed", &self.inner.disposed.get())
            .field("tokens", &self.token_count())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Keeps a scope active; restores the previous one on drop.
#[must_use = "the scope stops collecting as soon as the guard drops"]
pub struct ScopeGuard {
    previous: Option<Scope>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_SCOPE.with(|active| *active.borrow_mut() = previous);
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("restores", &self.previous.is_some())
            .finish()
    }
}

/// Register `token` with the active scope, if there is one.
pub(crate) fn collect(token: &Disposable) {
    if let Some(scope) = Scope::current() {
        scope.add(token.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counted_token(count: &Rc<Cell<u32>>) -> Disposable {
        let count = Rc::clone(count);
        Disposable::new(move || count.set(count.get() + 1))
    }

    #[test]
    fn begin_sets_and_restores_active_scope() {
        assert!(Scope::current().is_none());
        let outer = Scope::new(false);
        {
            let _outer_guard = outer.begin().unwrap();
            let inner = Scope::new(true);
            {
                let _inner_guard = inner.begin().unwrap();
                assert!(Scope::current().is_some_and(|s| Rc::ptr_eq(&s.inner, &inner.inner)));
            }
            assert!(Scope::current().is_some_and(|s| Rc::ptr_eq(&s.inner, &outer.inner)));
        }
        assert!(Scope::current().is_none());
    }

    #[test]
    fn collected_tokens_are_released_once() {
        let count = Rc::new(Cell::new(0));
        let scope = Scope::new(false);
        scope
            .run(|| collect(&counted_token(&count)))
            .unwrap();
        assert_eq!(scope.token_count(), 1);

        scope.dispose();
        scope.dispose();
        assert_eq!(count.get(), 1);
        assert!(scope.is_disposed());
    }

    #[test]
    fn children_follow_parent_but_detached_do_not() {
        let count = Rc::new(Cell::new(0));
        let parent = Scope::new(false);
        let (child, detached) = parent
            .run(|| (Scope::new(false), Scope::new(true)))
            .unwrap();
        assert_eq!(parent.child_count(), 1);

        child.add(counted_token(&count));
        detached.add(counted_token(&count));

        parent.dispose();
        assert!(child.is_disposed());
        assert!(!detached.is_disposed());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn disposing_child_detaches_it_from_parent() {
        let parent = Scope::new(false);
        let child = parent.run(|| Scope::new(false)).unwrap();
        child.dispose();
        assert_eq!(parent.child_count(), 0);
        assert!(!parent.is_disposed());
    }

    #[test]
    fn disposed_scope_cannot_begin() {
        let scope = Scope::new(false);
        scope.dispose();
        assert_eq!(scope.begin().unwrap_err(), WatchError::ScopeDisposed);
    }

    #[test]
    fn on_disposed_runs_after_tokens() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let scope = Scope::new(true);
        let token_log = Rc::clone(&log);
        scope.add(Disposable::new(move || token_log.borrow_mut().push("token")));
        let hook_log = Rc::clone(&log);
        scope.on_disposed(move || hook_log.borrow_mut().push("hook"));

        scope.dispose();
        assert_eq!(*log.borrow(), vec!["token", "hook"]);
    }
}
