#![forbid(unsafe_code)]

//! Depwatch: expression-level dependency tracking for observable objects.
//!
//! Build an [`Expr`] describing a value, hand it to [`watch`] (or one of
//! its typed variants), and get notified whenever any object the value
//! depends on raises a relevant change. Dependencies are re-bound as object
//! references along the expression are replaced, and branches of
//! conditional expressions are only tracked while selected.
//!
//! ```ignore
//! let token = watch_value(&(Expr::object(&order).member("Total") * 2), |doubled: i64| {
//!     println!("doubled total is now {doubled}");
//! })?;
//! ```
//!
//! Everything here is single-threaded: objects must raise notifications on
//! the thread that created the watches, and tokens are `!Send`.

pub mod collection;
pub mod computed;
pub mod deep;
pub mod disposable;
pub mod error;
pub mod event;
pub mod expr;
pub mod graph;
pub mod object;
pub mod observer;
pub mod scope;

pub use collection::ObservableCollection;
pub use computed::{ComputedProperties, PropertyObserver};
pub use deep::{DeepWatchOptions, watch_deep, watch_deep_any, watch_deep_with};
pub use disposable::Disposable;
pub use error::{EvalError, Result, WatchError};
pub use event::{EventSource, HandlerId};
pub use expr::{BinaryOp, Expr, UnaryOp, Var};
pub use object::{FromValue, Object, ObjectRef, PropertyChanged, Type, TypeInfo, Value};
pub use observer::{OnCleanup, observe, watch, watch_changes, watch_value, watch_with_cleanup};
pub use scope::{Scope, ScopeGuard};
