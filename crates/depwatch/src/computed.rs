#![forbid(unsafe_code)]

//! Computed properties and property observers for observable hosts.
//!
//! A host object owns one [`ComputedProperties`] and hands it the function
//! that raises its own property-changed event. Two helpers build on it:
//!
//! - [`ComputedProperties::computed`] backs a read-only derived property.
//!   The first read evaluates the expression, caches the result and starts
//!   watching it; every later change refreshes the cache and raises the
//!   property.
//! - [`ComputedProperties::make`] returns a [`PropertyObserver`] that
//!   raises a property whenever any of a set of expressions changes,
//!   optionally filtered by conditions.
//!
//! ```ignore
//! fn double(&self) -> i64 {
//!     self.computed
//!         .computed("Double", 0, || Expr::object(&self.me()).member("Number") * 2)
//!         .unwrap_or_default()
//! }
//! ```
//!
//! # Invariants
//!
//! 1. The value cache lock is never held while an expression is evaluated
//!    or a notification is raised.
//! 2. Each property name is watched at most once; a racing first read that
//!    loses keeps the winner's watch and releases its own.
//! 3. After [`dispose`](ComputedProperties::dispose) no watch created by
//!    this instance fires again.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Mutex, PoisonError};

use ahash::{AHashMap, AHashSet};
use tracing::{debug, warn};

use crate::disposable::Disposable;
use crate::error::{EvalError, Result, WatchError};
use crate::expr::Expr;
use crate::object::{FromValue, Value};
use crate::observer::observe_unscoped;

type RaiseFn = Rc<dyn Fn(&str)>;
type ErrorHook = Rc<dyn Fn(&str, &EvalError)>;
type ObserverErrorHook = Rc<dyn Fn(&str, &str, &EvalError)>;
type Condition = Rc<dyn Fn() -> bool>;
type ValueCondition = Rc<dyn Fn(&Value) -> bool>;

struct ComputedInner {
    raise: RaiseFn,
    storage: Mutex<AHashMap<String, Value>>,
    made: RefCell<AHashSet<String>>,
    tokens: RefCell<Vec<Disposable>>,
    observers: RefCell<Vec<PropertyObserver>>,
    on_error: RefCell<Option<ErrorHook>>,
    on_observer_error: RefCell<Option<ObserverErrorHook>>,
    disposed: Cell<bool>,
}

impl ComputedInner {
    fn lookup(&self, property: &str) -> Option<Value> {
        self.storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(property)
            .cloned()
    }

    fn store(&self, property: &str, value: Value) {
        self.storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(property.to_string(), value);
    }

    fn report(&self, property: &str, err: &EvalError) {
        warn!(message = "depwatch.computed.failed", property, error = %err);
        let hook = self.on_error.borrow().clone();
        if let Some(hook) = hook {
            hook(property, err);
        }
    }
}

/// Cache of computed property values for one host object.
pub struct ComputedProperties {
    inner: Rc<ComputedInner>,
}

impl ComputedProperties {
    /// `raise` is invoked with a property name whenever that property's
    /// value changes.
    pub fn new(raise: impl Fn(&str) + 'static) -> Self {
        Self {
            inner: Rc::new(ComputedInner {
                raise: Rc::new(raise),
                storage: Mutex::new(AHashMap::new()),
                made: RefCell::new(AHashSet::new()),
                tokens: RefCell::new(Vec::new()),
                observers: RefCell::new(Vec::new()),
                on_error: RefCell::new(None),
                on_observer_error: RefCell::new(None),
                disposed: Cell::new(false),
            }),
        }
    }

    /// Report failed computed-property evaluations as `(property, error)`.
    pub fn on_error(&self, hook: impl Fn(&str, &EvalError) + 'static) {
        *self.inner.on_error.borrow_mut() = Some(Rc::new(hook));
    }

    /// Report failed property-observer evaluations as
    /// `(property, expression, error)`.
    pub fn on_observer_error(&self, hook: impl Fn(&str, &str, &EvalError) + 'static) {
        *self.inner.on_observer_error.borrow_mut() = Some(Rc::new(hook));
    }

    /// Read the computed property `name`.
    ///
    /// `build` runs only on the first read of `name`. When the expression
    /// fails to evaluate, or yields something that is not a `T`, the
    /// property holds `fallback`.
    pub fn computed<T>(&self, name: &str, fallback: T, build: impl FnOnce() -> Expr) -> Result<T>
    where
        T: FromValue + Into<Value> + Clone + 'static,
    {
        if let Some(cached) = self.inner.lookup(name) {
            return Ok(T::from_value(&cached).unwrap_or(fallback));
        }

        let expr = build();
        let fallback_value: Value = fallback.clone().into();
        let initial = match expr.evaluate().and_then(|value| T::from_value(&value).map(|_| value)) {
            Ok(value) => value,
            Err(err) => {
                self.inner.report(name, &err);
                fallback_value.clone()
            }
        };

        let weak: Weak<ComputedInner> = Rc::downgrade(&self.inner);
        let property = name.to_string();
        let token = observe_unscoped(&expr, move |value, err| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let checked = match err {
                Some(err) => Err(err.clone()),
                None => T::from_value(&value).map(|_| value),
            };
            match checked {
                Ok(value) => inner.store(&property, value),
                Err(err) => {
                    inner.store(&property, fallback_value.clone());
                    inner.report(&property, &err);
                }
            }
            debug!(message = "depwatch.computed.refreshed", property = %property);
            (inner.raise)(&property);
        })?;

        let mut storage = self.inner.storage.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = storage.get(name).cloned();
        let value = match existing {
            Some(existing) => {
                drop(storage);
                token.dispose();
                existing
            }
            None => {
                storage.insert(name.to_string(), initial.clone());
                drop(storage);
                if self.inner.disposed.get() {
                    token.dispose();
                } else {
                    self.inner.tokens.borrow_mut().push(token);
                }
                initial
            }
        };
        Ok(T::from_value(&value).unwrap_or(fallback))
    }

    /// [`computed`](Self::computed) without conversion; falls back to `Null`.
    pub fn computed_value(&self, name: &str, build: impl FnOnce() -> Expr) -> Result<Value> {
        self.computed(name, Value::Null, build)
    }

    /// Start a property observer that raises `name`.
    ///
    /// Fails with [`WatchError::DuplicateProperty`] if `name` already has one.
    pub fn make(&self, name: &str) -> Result<PropertyObserver> {
        if !self.inner.made.borrow_mut().insert(name.to_string()) {
            return Err(WatchError::DuplicateProperty {
                property: name.to_string(),
            });
        }

        let computed = Rc::downgrade(&self.inner);
        let property = name.to_string();
        let on_error: ExpressionErrorFn = Rc::new(move |expression, err| {
            warn!(
                message = "depwatch.observer.failed",
                property = %property,
                expression,
                error = %err
            );
            let hook = computed
                .upgrade()
                .and_then(|inner| inner.on_observer_error.borrow().clone());
            if let Some(hook) = hook {
                hook(&property, expression, err);
            }
        });

        let observer = PropertyObserver {
            inner: Rc::new(ObserverInner {
                property: name.to_string(),
                raise: Rc::clone(&self.inner.raise),
                on_error,
                keys: RefCell::new(AHashSet::new()),
                tokens: RefCell::new(Vec::new()),
                condition: RefCell::new(None),
            }),
        };
        self.inner.observers.borrow_mut().push(observer.clone());
        Ok(observer)
    }

    /// Release every computed-property watch and property observer.
    pub fn dispose(&self) {
        self.inner.disposed.set(true);
        let tokens = std::mem::take(&mut *self.inner.tokens.borrow_mut());
        for token in tokens {
            token.dispose();
        }
        let observers = std::mem::take(&mut *self.inner.observers.borrow_mut());
        for observer in observers {
            observer.dispose();
        }
    }
}

impl fmt::Debug for ComputedProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .inner
            .storage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ComputedProperties")
            .field("cached", &cached)
            .field("observers", &self.inner.observers.borrow().len())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

// ─── Property observers ─────────────────────────────────────────────────────

type ExpressionErrorFn = Rc<dyn Fn(&str, &EvalError)>;

struct ObserverInner {
    property: String,
    raise: RaiseFn,
    on_error: ExpressionErrorFn,
    keys: RefCell<AHashSet<String>>,
    tokens: RefCell<Vec<Disposable>>,
    condition: RefCell<Option<Condition>>,
}

/// Raises one property whenever any of its observed expressions changes.
#[derive(Clone)]
pub struct PropertyObserver {
    inner: Rc<ObserverInner>,
}

impl PropertyObserver {
    /// Name of the property this observer raises.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.inner.property
    }

    /// Raise the property whenever `expr` changes.
    pub fn observes(&self, expr: &Expr) -> Result<&Self> {
        self.observe_with(expr, None)
    }

    /// Raise the property whenever `expr` changes to a value satisfying
    /// `condition`. Values that do not convert to `T` never satisfy it.
    pub fn observes_if<T, F>(&self, expr: &Expr, condition: F) -> Result<&Self>
    where
        T: FromValue + 'static,
        F: Fn(&T) -> bool + 'static,
    {
        let condition: ValueCondition =
            Rc::new(move |value| T::from_value(value).is_ok_and(|value| condition(&value)));
        self.observe_with(expr, Some(condition))
    }

    /// Only raise while `condition` holds. Replaces an earlier condition.
    pub fn when(&self, condition: impl Fn() -> bool + 'static) -> &Self {
        *self.inner.condition.borrow_mut() = Some(Rc::new(condition));
        self
    }

    /// Stop observing every expression.
    pub fn dispose(&self) {
        let tokens = std::mem::take(&mut *self.inner.tokens.borrow_mut());
        for token in tokens {
            token.dispose();
        }
    }

    fn observe_with(&self, expr: &Expr, condition: Option<ValueCondition>) -> Result<&Self> {
        let key = expr.key();
        if self.inner.keys.borrow().contains(&key) {
            return Err(WatchError::DuplicateExpression {
                property: self.inner.property.clone(),
                expression: expr.to_string(),
            });
        }

        let observer = Rc::downgrade(&self.inner);
        let text = expr.to_string();
        let token = observe_unscoped(expr, move |value, err| {
            let Some(inner) = observer.upgrade() else {
                return;
            };
            let global = inner.condition.borrow().clone();
            let pass = global.is_none_or(|global| global())
                && condition.as_ref().is_none_or(|condition| condition(&value));
            if pass {
                (inner.raise)(&inner.property);
            }
            if let Some(err) = err {
                (inner.on_error)(&text, err);
            }
        })?;

        self.inner.keys.borrow_mut().insert(key);
        self.inner.tokens.borrow_mut().push(token);
        Ok(self)
    }
}

impl fmt::Debug for PropertyObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyObserver")
            .field("property", &self.inner.property)
            .field("expressions", &self.inner.keys.borrow().len())
            .field("conditional", &self.inner.condition.borrow().is_some())
            .finish()
    }
}
