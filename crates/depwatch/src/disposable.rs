#![forbid(unsafe_code)]

//! Scoped release tokens.
//!
//! A [`Disposable`] wraps an action that runs at most once. Cloning a token
//! yields another handle to the same action, so a watch can be held by its
//! caller and by a [`Scope`](crate::Scope) at the same time.
//!
//! # Invariants
//!
//! 1. The action runs at most once, on the first `dispose()` of any handle.
//! 2. If no handle was disposed, the action runs when the last handle drops.
//! 3. Disposing from inside the action (re-entrantly) is a no-op.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

struct DisposableInner {
    action: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Drop for DisposableInner {
    fn drop(&mut self) {
        if let Some(action) = self.action.get_mut().take() {
            action();
        }
    }
}

/// A release token whose action runs at most once.
#[derive(Clone)]
#[must_use = "dropping the last handle of a Disposable releases it immediately"]
pub struct Disposable {
    inner: Rc<DisposableInner>,
}

impl Disposable {
    /// Create a token that runs `action` when released.
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            inner: Rc::new(DisposableInner {
                action: Cell::new(Some(Box::new(action))),
            }),
        }
    }

    /// A token with nothing to release.
    pub fn empty() -> Self {
        Self {
            inner: Rc::new(DisposableInner {
                action: Cell::new(None),
            }),
        }
    }

    /// Combine several tokens into one that releases them in order.
    pub fn from_many(tokens: Vec<Disposable>) -> Self {
        Self::new(move || {
            for token in tokens {
                token.dispose();
            }
        })
    }

    /// Run the release action if it has not run yet.
    pub fn dispose(&self) {
        if let Some(action) = self.inner.action.take() {
            action();
        }
    }

    /// Whether the action has already run (or there never was one).
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        // Cell<Option<Box<_>>> cannot be peeked; swap out and back.
        let action = self.inner.action.take();
        let disposed = action.is_none();
        self.inner.action.set(action);
        disposed
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .field("handles", &Rc::strong_count(&self.inner))
            .finish()
    }
}
