#![forbid(unsafe_code)]

//! The observable capability consumed by the engine.
//!
//! Host objects implement [`Object`]: they describe their shape through a
//! static [`TypeInfo`], answer property reads with dynamic [`Value`]s, and
//! optionally expose a [`PropertyChanged`] and/or [`CollectionChanged`]
//! event. The engine never mutates host objects; it only reads and
//! subscribes.
//!
//! # Static shape
//!
//! [`TypeInfo`] values are `static` items, so member types may refer to
//! their own declaring type (`Child: TestObject` inside `TestObject`):
//!
//! ```
//! use depwatch::object::{MemberInfo, Type, TypeInfo};
//!
//! static NODE_MEMBERS: [MemberInfo; 2] = [
//!     MemberInfo::property("Label", Type::Str),
//!     MemberInfo::property("Next", Type::Object(&NODE)),
//! ];
//! static NODE: TypeInfo = TypeInfo::observable("Node", &NODE_MEMBERS);
//!
//! assert!(NODE.member("Next").is_some());
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::EvalError;
use crate::event::EventSource;

/// Property-changed notification: handlers receive the property name.
pub type PropertyChanged = EventSource<str>;

/// Collection-changed notification.
pub type CollectionChanged = EventSource<CollectionChangedArgs>;

/// Shared reference to a host object.
pub type ObjectRef = Rc<dyn Object>;

// ─── Reflection descriptors ─────────────────────────────────────────────────

/// Static type of an expression or member.
#[derive(Clone, Copy)]
pub enum Type {
    /// No value (calls evaluated for effect).
    Unit,
    Bool,
    Int,
    Float,
    Str,
    /// A host object of the described type (possibly `Null`).
    Object(&'static TypeInfo),
}

impl Type {
    /// Whether values of this type raise property-changed notifications.
    #[must_use]
    pub fn notifies_property(&self) -> bool {
        matches!(self, Self::Object(info) if info.notifies_property)
    }

    /// Whether values of this type raise either kind of notification.
    #[must_use]
    pub fn is_notify(&self) -> bool {
        matches!(self, Self::Object(info) if info.notifies_property || info.notifies_collection)
    }

    /// Human-readable type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
            Self::Object(info) => info.name,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(a), Self::Object(b)) => std::ptr::eq(*a, *b),
            (Self::Unit, Self::Unit)
            | (Self::Bool, Self::Bool)
            | (Self::Int, Self::Int)
            | (Self::Float, Self::Float)
            | (Self::Str, Self::Str) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a member is declared on its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// A property; `writable` is false for get-only properties.
    Property { writable: bool },
    /// A plain field; only `readonly` fields can be tracked.
    Field { readonly: bool },
    /// An indexer (`Item[]`). Never tracked by expressions.
    Indexer,
}

/// One public member of a [`TypeInfo`].
#[derive(Debug, Clone, Copy)]
pub struct MemberInfo {
    pub name: &'static str,
    pub kind: MemberKind,
    pub ty: Type,
}

impl MemberInfo {
    /// A settable property.
    #[must_use]
    pub const fn property(name: &'static str, ty: Type) -> Self {
        Self {
            name,
            kind: MemberKind::Property { writable: true },
            ty,
        }
    }

    /// A get-only property.
    #[must_use]
    pub const fn readonly_property(name: &'static str, ty: Type) -> Self {
        Self {
            name,
            kind: MemberKind::Property { writable: false },
            ty,
        }
    }

    /// A readonly (init-only) field.
    #[must_use]
    pub const fn readonly_field(name: &'static str, ty: Type) -> Self {
        Self {
            name,
            kind: MemberKind::Field { readonly: true },
            ty,
        }
    }

    /// A mutable field.
    #[must_use]
    pub const fn field(name: &'static str, ty: Type) -> Self {
        Self {
            name,
            kind: MemberKind::Field { readonly: false },
            ty,
        }
    }

    /// An indexer; its reflected name is always `Item[]`.
    #[must_use]
    pub const fn indexer(ty: Type) -> Self {
        Self {
            name: "Item",
            kind: MemberKind::Indexer,
            ty,
        }
    }

    #[must_use]
    pub fn is_property(&self) -> bool {
        matches!(self.kind, MemberKind::Property { .. })
    }

    #[must_use]
    pub fn is_readonly_field(&self) -> bool {
        matches!(self.kind, MemberKind::Field { readonly: true })
    }
}

/// Static description of a host object type.
#[derive(Debug)]
pub struct TypeInfo {
    pub name: &'static str,
    pub notifies_property: bool,
    pub notifies_collection: bool,
    pub members: &'static [MemberInfo],
}

impl TypeInfo {
    /// A type that raises property-changed notifications.
    #[must_use]
    pub const fn observable(name: &'static str, members: &'static [MemberInfo]) -> Self {
        Self {
            name,
            notifies_property: true,
            notifies_collection: false,
            members,
        }
    }

    /// A type that raises both property and collection notifications.
    #[must_use]
    pub const fn observable_collection(name: &'static str, members: &'static [MemberInfo]) -> Self {
        Self {
            name,
            notifies_property: true,
            notifies_collection: true,
            members,
        }
    }

    /// A type that raises no notifications at all.
    #[must_use]
    pub const fn plain(name: &'static str, members: &'static [MemberInfo]) -> Self {
        Self {
            name,
            notifies_property: false,
            notifies_collection: false,
            members,
        }
    }

    /// Look a member up by name.
    #[must_use]
    pub fn member(&self, name: &str) -> Option<&'static MemberInfo> {
        self.members.iter().find(|member| member.name == name)
    }
}

// ─── Collection notifications ───────────────────────────────────────────────

/// Kind of structural change reported by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChangeAction {
    Add,
    Remove,
    Replace,
    Move,
    Reset,
}

impl CollectionChangeAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Replace => "Replace",
            Self::Move => "Move",
            Self::Reset => "Reset",
        }
    }
}

impl fmt::Display for CollectionChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a collection-changed notification.
///
/// `Reset` carries no items; the receiver re-reads the whole collection.
#[derive(Debug, Clone)]
pub struct CollectionChangedArgs {
    pub action: CollectionChangeAction,
    pub new_items: Vec<Value>,
    pub old_items: Vec<Value>,
}

impl CollectionChangedArgs {
    #[must_use]
    pub fn added(items: Vec<Value>) -> Self {
        Self {
            action: CollectionChangeAction::Add,
            new_items: items,
            old_items: Vec::new(),
        }
    }

    #[must_use]
    pub fn removed(items: Vec<Value>) -> Self {
        Self {
            action: CollectionChangeAction::Remove,
            new_items: Vec::new(),
            old_items: items,
        }
    }

    #[must_use]
    pub fn replaced(new_item: Value, old_item: Value) -> Self {
        Self {
            action: CollectionChangeAction::Replace,
            new_items: vec![new_item],
            old_items: vec![old_item],
        }
    }

    #[must_use]
    pub fn moved(item: Value) -> Self {
        Self {
            action: CollectionChangeAction::Move,
            new_items: vec![item.clone()],
            old_items: vec![item],
        }
    }

    #[must_use]
    pub fn reset() -> Self {
        Self {
            action: CollectionChangeAction::Reset,
            new_items: Vec::new(),
            old_items: Vec::new(),
        }
    }
}

// ─── Object capability ──────────────────────────────────────────────────────

/// A host object the engine can read and observe.
pub trait Object: 'static {
    /// Static shape of this object's concrete type.
    fn type_info(&self) -> &'static TypeInfo;

    /// Read a member. `None` means the member is not readable.
    fn get(&self, member: &str) -> Option<Value>;

    /// Property-changed event, if this object raises one.
    fn property_changed(&self) -> Option<&PropertyChanged> {
        None
    }

    /// Collection-changed event, if this object is an observable container.
    fn collection_changed(&self) -> Option<&CollectionChanged> {
        None
    }

    /// Current items, for containers.
    fn items(&self) -> Vec<Value> {
        Vec::new()
    }
}

/// Assign `value` to `storage` and raise `property` if it differs.
///
/// Returns whether the value changed. The borrow of `storage` is released
/// before handlers run, so handlers may read it back.
pub fn set_property<T: PartialEq>(
    event: &PropertyChanged,
    storage: &RefCell<T>,
    value: T,
    property: &str,
) -> bool {
    {
        let mut current = storage.borrow_mut();
        if *current == value {
            return false;
        }
        *current = value;
    }
    event.raise(property);
    true
}

// ─── Dynamic values ─────────────────────────────────────────────────────────

/// A dynamically typed value produced by expression evaluation.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Object(ObjectRef),
}

impl Value {
    /// Wrap an object.
    pub fn object<T: Object>(object: Rc<T>) -> Self {
        Self::Object(object)
    }

    /// Wrap an optional object, mapping `None` to `Null`.
    pub fn from_option<T: Object>(object: Option<Rc<T>>) -> Self {
        object.map_or(Self::Null, |object| Self::Object(object))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Name of the runtime kind, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Object(object) => object.type_info().name,
        }
    }

    /// Stable identity of an object value (its allocation address).
    pub(crate) fn object_id(object: &ObjectRef) -> usize {
        Rc::as_ptr(object).cast::<()>() as usize
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            #[allow(clippy::cast_precision_loss)]
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Unit => f.write_str("Unit"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Float(v) => write!(f, "Float({v:?})"),
            Self::Str(v) => write!(f, "Str({v:?})"),
            Self::Object(object) => write!(
                f,
                "Object({}@{:#x})",
                object.type_info().name,
                Self::object_id(object)
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Unit => f.write_str("()"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Object(object) => write!(f, "value({})", object.type_info().name),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Self::Object(v)
    }
}

// ─── Typed extraction ───────────────────────────────────────────────────────

/// Conversion from a dynamic [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Convert, or report what was found instead.
    fn from_value(value: &Value) -> Result<Self, EvalError>;
}

fn expected(expected: &str, found: &Value) -> EvalError {
    EvalError::mismatch("<conversion>", expected, found.kind_name())
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(expected("bool", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Int(v) => Ok(*v),
            other => Err(expected("int", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Float(v) => Ok(*v),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(v) => Ok(*v as f64),
            other => Err(expected("float", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Str(v) => Ok(v.to_string()),
            other => Err(expected("string", other)),
        }
    }
}

impl FromValue for ObjectRef {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Object(object) => Ok(Rc::clone(object)),
            other => Err(expected("object", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, EvalError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static PLAIN_MEMBERS: [MemberInfo; 1] = [MemberInfo::field("Raw", Type::Int)];
    static PLAIN: TypeInfo = TypeInfo::plain("Plain", &PLAIN_MEMBERS);

    static NODE_MEMBERS: [MemberInfo; 3] = [
        MemberInfo::property("Label", Type::Str),
        MemberInfo::property("Next", Type::Object(&NODE)),
        MemberInfo::readonly_field("Meta", Type::Object(&PLAIN)),
    ];
    static NODE: TypeInfo = TypeInfo::observable("Node", &NODE_MEMBERS);

    struct Node {
        label: RefCell<String>,
        changed: PropertyChanged,
    }

    impl Object for Node {
        fn type_info(&self) -> &'static TypeInfo {
            &NODE
        }

        fn get(&self, member: &str) -> Option<Value> {
            match member {
                "Label" => Some(Value::from(self.label.borrow().as_str())),
                _ => None,
            }
        }

        fn property_changed(&self) -> Option<&PropertyChanged> {
            Some(&self.changed)
        }
    }

    #[test]
    fn self_referencing_type_info() {
        let next = NODE.member("Next").map(|m| m.ty);
        assert_eq!(next, Some(Type::Object(&NODE)));
        assert!(NODE.member("Missing").is_none());
        assert!(Type::Object(&NODE).notifies_property());
        assert!(!Type::Object(&PLAIN).is_notify());
        assert!(NODE.member("Meta").is_some_and(MemberInfo::is_readonly_field));
    }

    #[test]
    fn set_property_raises_only_on_change() {
        let node = Node {
            label: RefCell::new("a".into()),
            changed: PropertyChanged::new(),
        };
        let raised = Rc::new(RefCell::new(Vec::new()));
        let raised_clone = Rc::clone(&raised);
        node.changed
            .subscribe(move |name| raised_clone.borrow_mut().push(name.to_string()));

        assert!(set_property(&node.changed, &node.label, "b".to_string(), "Label"));
        assert!(!set_property(&node.changed, &node.label, "b".to_string(), "Label"));
        assert_eq!(*raised.borrow(), vec!["Label"]);
        assert_eq!(node.get("Label"), Some(Value::from("b")));
    }

    #[test]
    fn object_values_compare_by_identity() {
        let a: ObjectRef = Rc::new(Node {
            label: RefCell::new(String::new()),
            changed: PropertyChanged::new(),
        });
        let b: ObjectRef = Rc::new(Node {
            label: RefCell::new(String::new()),
            changed: PropertyChanged::new(),
        });
        assert_eq!(Value::Object(Rc::clone(&a)), Value::Object(Rc::clone(&a)));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn numeric_values_compare_across_kinds() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Str(Rc::from("2")));
    }

    #[test]
    fn typed_extraction() {
        assert_eq!(i64::from_value(&Value::Int(4)), Ok(4));
        assert_eq!(f64::from_value(&Value::Int(4)), Ok(4.0));
        assert_eq!(Option::<i64>::from_value(&Value::Null), Ok(None));
        assert!(bool::from_value(&Value::Int(1)).is_err());
        assert_eq!(
            String::from_value(&Value::from("x")),
            Ok("x".to_string())
        );
    }
}
