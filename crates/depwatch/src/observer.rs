#![forbid(unsafe_code)]

//! Expression observers: the public `watch` family.
//!
//! Every variant follows the same recipe. The expression is compiled into a
//! getter, analyzed into a [`Graph`], and the graph is activated with one
//! shared listener. The returned [`Disposable`] releases the whole forest
//! and, when a [`Scope`](crate::Scope) is active at creation time, is also
//! registered with that scope.
//!
//! # Failure Modes
//!
//! - Analysis errors fail the call with [`WatchError`](crate::WatchError).
//! - Evaluation errors after a change are never propagated.
//!   [`observe`] hands them to the callback next to `Value::Null`; the typed
//!   variants log them at `warn` and skip that notification.
//!
//! # Lifetime
//!
//! Dropping the last handle of the token disposes the watch. Keep the token
//! (or run the watch inside a scope) for as long as notifications are wanted.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::disposable::Disposable;
use crate::error::{EvalError, Result};
use crate::event::Handler;
use crate::expr::{Expr, Getter};
use crate::graph::Graph;
use crate::object::{FromValue, Value};
use crate::scope;

// ─── Primitive ──────────────────────────────────────────────────────────────

fn track(expr: &Expr, listener: Handler<()>) -> Result<Disposable> {
    let graph = Graph::analyze(expr)?;
    Ok(graph.activate(listener))
}

fn scoped(token: Disposable) -> Disposable {
    scope::collect(&token);
    token
}

fn read<T: FromValue>(getter: &Getter) -> std::result::Result<T, EvalError> {
    T::from_value(&getter()?)
}

/// Like [`observe`], but never registers with the active scope.
pub(crate) fn observe_unscoped(
    expr: &Expr,
    on_change: impl Fn(Value, Option<&EvalError>) + 'static,
) -> Result<Disposable> {
    let getter = expr.compile();
    let text = expr.to_string();
    track(
        expr,
        Rc::new(move |()| match getter() {
            Ok(value) => {
                debug!(message = "depwatch.observer.changed", expression = %text, value = %value);
                on_change(value, None);
            }
            Err(err) => {
                debug!(message = "depwatch.observer.changed", expression = %text, error = %err);
                on_change(Value::Null, Some(&err));
            }
        }),
    )
}

/// Re-evaluate `expr` whenever one of its dependencies changes and pass the
/// result to `on_change`.
///
/// An evaluation failure is delivered as `(Value::Null, Some(err))`.
pub fn observe(
    expr: &Expr,
    on_change: impl Fn(Value, Option<&EvalError>) + 'static,
) -> Result<Disposable> {
    observe_unscoped(expr, on_change).map(scoped)
}

/// Invoke `callback` whenever one of the dependencies of `expr` changes.
/// The expression itself is not evaluated.
pub fn watch(expr: &Expr, callback: impl Fn() + 'static) -> Result<Disposable> {
    track(expr, Rc::new(move |()| callback())).map(scoped)
}

// ─── Typed variants ─────────────────────────────────────────────────────────

/// Invoke `callback` with the new value of `expr` after every change.
pub fn watch_value<T, F>(expr: &Expr, callback: F) -> Result<Disposable>
where
    T: FromValue + 'static,
    F: Fn(T) + 'static,
{
    let getter = expr.compile();
    let text = expr.to_string();
    track(
        expr,
        Rc::new(move |()| match read::<T>(&getter) {
            Ok(value) => callback(value),
            Err(err) => warn!(message = "depwatch.observer.failed", expression = %text, error = %err),
        }),
    )
    .map(scoped)
}

fn changes_listener<T, F>(expr: &Expr, callback: F) -> Handler<()>
where
    T: FromValue + Clone + Default + 'static,
    F: Fn(T, T) + 'static,
{
    let getter = expr.compile();
    let text = expr.to_string();
    let seed = read::<T>(&getter).unwrap_or_else(|err| {
        warn!(message = "depwatch.observer.failed", expression = %text, error = %err);
        T::default()
    });
    let old = RefCell::new(seed);
    Rc::new(move |()| match read::<T>(&getter) {
        Ok(value) => {
            let previous = old.replace(value.clone());
            callback(value, previous);
        }
        Err(err) => warn!(message = "depwatch.observer.failed", expression = %text, error = %err),
    })
}

/// Invoke `callback(new, old)` after every change of `expr`.
///
/// The first `old` is the value of `expr` when the watch is created
/// (`T::default()` if that evaluation fails).
pub fn watch_changes<T, F>(expr: &Expr, callback: F) -> Result<Disposable>
where
    T: FromValue + Clone + Default + 'static,
    F: Fn(T, T) + 'static,
{
    track(expr, changes_listener(expr, callback)).map(scoped)
}

type CleanupSlot = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

fn run_cleanup(slot: &CleanupSlot) {
    let cleanup = slot.borrow_mut().take();
    if let Some(cleanup) = cleanup {
        cleanup();
    }
}

/// Registers the cleanup for the results of the current invocation of a
/// [`watch_with_cleanup`] callback.
pub struct OnCleanup {
    slot: CleanupSlot,
}

impl OnCleanup {
    /// Run `cleanup` before the next invocation, or when the watch is
    /// disposed. A later registration replaces an earlier one.
    pub fn register(&self, cleanup: impl FnOnce() + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(cleanup));
    }
}

impl fmt::Debug for OnCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnCleanup")
            .field("pending", &self.slot.borrow().is_some())
            .finish()
    }
}

/// Like [`watch_changes`], with a hook for cancelling work started by the
/// previous invocation.
///
/// ```ignore
/// watch_with_cleanup(&query, move |text: String, _old, on_cleanup| {
///     let cancelled = Rc::new(Cell::new(false));
///     spawn_search(text, Rc::clone(&cancelled));
///     on_cleanup.register(move || cancelled.set(true));
/// })?;
/// ```
pub fn watch_with_cleanup<T, F>(expr: &Expr, callback: F) -> Result<Disposable>
where
    T: FromValue + Clone + Default + 'static,
    F: Fn(T, T, &OnCleanup) + 'static,
{
    let slot: CleanupSlot = Rc::default();
    let on_cleanup = OnCleanup {
        slot: Rc::clone(&slot),
    };
    let listener = changes_listener(expr, move |value, old| {
        run_cleanup(&on_cleanup.slot);
        callback(value, old, &on_cleanup);
    });
    let watch = track(expr, listener)?;
    let release = Disposable::new(move || run_cleanup(&slot));
    Ok(scoped(Disposable::from_many(vec![watch, release])))
}
