#![forbid(unsafe_code)]

//! Expression trees the analyzer can walk and the observer can compile.
//!
//! An [`Expr`] is an immutable, cheaply clonable tree of [`ExprKind`]
//! variants. Every node carries its static [`Type`], which is what the
//! analyzer classifies on (not the runtime value).
//!
//! # Canonical keys
//!
//! [`Expr::key`] renders the structural text of a sub-expression including
//! object and variable identities. Two occurrences of the same
//! sub-expression produce the same key, which is how the graph builder
//! merges diamond-shaped dependency paths. `Display` renders the same text
//! without identities, for diagnostics.
//!
//! # Captured variables
//!
//! Reads of external variables are explicit [`Var`] nodes. The analyzer
//! tracks a variable only when its static type raises property-changed
//! notifications; reassigning a [`Var`] is never observed.
//!
//! # Example
//!
//! ```ignore
//! let expr = Expr::var(&root).member("Child").member("Number") * 2;
//! assert_eq!(expr.to_string(), "(root.Child.Number * 2)");
//! ```

mod compile;
mod ops;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EvalError;
use crate::object::{MemberInfo, Object, Type, Value};

pub use compile::Getter;
pub use ops::{BinaryOp, UnaryOp};

/// Native function backing a [`ExprKind::Call`]. The call target, when
/// present, is the first argument.
pub type CallFn = Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>;

/// Getter backing a static member.
pub type StaticGetter = Rc<dyn Fn() -> Value>;

// ─── Captured variables ─────────────────────────────────────────────────────

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

struct VarInner {
    id: u64,
    name: String,
    ty: Type,
    value: RefCell<Value>,
}

/// A named external variable read by expressions.
#[derive(Clone)]
pub struct Var {
    inner: Rc<VarInner>,
}

impl Var {
    /// Declare a variable of static type `ty`.
    pub fn new(name: impl Into<String>, ty: Type, value: impl Into<Value>) -> Self {
        Self {
            inner: Rc::new(VarInner {
                id: NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                ty,
                value: RefCell::new(value.into()),
            }),
        }
    }

    /// Declare a variable holding `object`, typed by the object's own shape.
    pub fn object<T: Object>(name: impl Into<String>, object: &Rc<T>) -> Self {
        let ty = Type::Object(object.type_info());
        Self::new(name, ty, Value::Object(Rc::clone(object) as Rc<dyn Object>))
    }

    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Reassign the variable. Watches are not notified.
    pub fn set(&self, value: impl Into<Value>) {
        *self.inner.value.borrow_mut() = value.into();
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn ty(&self) -> Type {
        self.inner.ty
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("name", &self.inner.name)
            .field("ty", &self.inner.ty)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

// ─── Node kinds ─────────────────────────────────────────────────────────────

/// A static member read: no owning instance.
#[derive(Clone)]
pub struct StaticMember {
    pub owner: &'static str,
    pub name: &'static str,
    pub ty: Type,
    pub writable: bool,
    getter: StaticGetter,
}

/// `owner.name` (or `owner?.name`).
#[derive(Clone)]
pub struct MemberAccess {
    pub owner: Expr,
    pub name: String,
    /// Resolved declaration; `None` when the owner's type has no such member.
    pub member: Option<&'static MemberInfo>,
    /// Evaluates to `Null` instead of failing when the owner is `Null`.
    pub null_conditional: bool,
}

/// A native call, optionally on a target.
#[derive(Clone)]
pub struct Call {
    pub name: String,
    pub target: Option<Expr>,
    pub args: Vec<Expr>,
    func: CallFn,
}

/// The closed set of expression shapes.
#[derive(Clone)]
pub enum ExprKind {
    Constant(Value),
    Variable(Var),
    Static(StaticMember),
    Member(MemberAccess),
    Unary {
        op: UnaryOp,
        operand: Expr,
    },
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
    },
    Call(Call),
    Conditional {
        test: Expr,
        if_true: Expr,
        if_false: Expr,
    },
}

struct ExprNode {
    kind: ExprKind,
    ty: Type,
}

/// An immutable expression tree.
#[derive(Clone)]
pub struct Expr {
    node: Rc<ExprNode>,
}

impl Expr {
    fn from_kind(kind: ExprKind, ty: Type) -> Self {
        Self {
            node: Rc::new(ExprNode { kind, ty }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.node.kind
    }

    /// Static type of this expression.
    #[must_use]
    pub fn ty(&self) -> Type {
        self.node.ty
    }

    // ── Leaves ───────────────────────────────────────────────────────

    /// A literal value. Objects are typed by their own shape.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = match &value {
            Value::Null | Value::Unit => Type::Unit,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::Object(object) => Type::Object(object.type_info()),
        };
        Self::from_kind(ExprKind::Constant(value), ty)
    }

    /// A typed `Null` literal.
    #[must_use]
    pub fn null(ty: Type) -> Self {
        Self::from_kind(ExprKind::Constant(Value::Null), ty)
    }

    /// A constant object reference.
    pub fn object<T: Object>(object: &Rc<T>) -> Self {
        Self::constant(Value::Object(Rc::clone(object) as Rc<dyn Object>))
    }

    /// A captured variable read.
    #[must_use]
    pub fn var(var: &Var) -> Self {
        Self::from_kind(ExprKind::Variable(var.clone()), var.ty())
    }

    /// A get-only static member, such as a shared default instance.
    pub fn static_property(
        owner: &'static str,
        name: &'static str,
        ty: Type,
        getter: impl Fn() -> Value + 'static,
    ) -> Self {
        Self::static_member(owner, name, ty, false, Rc::new(getter))
    }

    /// A settable static member. Changes to it cannot be observed, so the
    /// analyzer rejects it.
    pub fn static_settable(
        owner: &'static str,
        name: &'static str,
        ty: Type,
        getter: impl Fn() -> Value + 'static,
    ) -> Self {
        Self::static_member(owner, name, ty, true, Rc::new(getter))
    }

    fn static_member(
        owner: &'static str,
        name: &'static str,
        ty: Type,
        writable: bool,
        getter: StaticGetter,
    ) -> Self {
        Self::from_kind(
            ExprKind::Static(StaticMember {
                owner,
                name,
                ty,
                writable,
                getter,
            }),
            ty,
        )
    }

    /// A free function call.
    pub fn function(
        name: impl Into<String>,
        ty: Type,
        args: Vec<Expr>,
        func: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self::from_kind(
            ExprKind::Call(Call {
                name: name.into(),
                target: None,
                args,
                func: Rc::new(func),
            }),
            ty,
        )
    }

    /// `test ? if_true : if_false`.
    #[must_use]
    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Self {
        let ty = if_true.ty();
        Self::from_kind(
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            },
            ty,
        )
    }

    // ── Chaining ─────────────────────────────────────────────────────

    /// `self.name`.
    #[must_use]
    pub fn member(self, name: &str) -> Self {
        self.member_access(name, false)
    }

    /// `self?.name`: `Null` when `self` is `Null`.
    #[must_use]
    pub fn member_or_null(self, name: &str) -> Self {
        self.member_access(name, true)
    }

    fn member_access(self, name: &str, null_conditional: bool) -> Self {
        let member = match self.ty() {
            Type::Object(info) => info.member(name),
            _ => None,
        };
        let ty = member.map_or(Type::Unit, |member| member.ty);
        Self::from_kind(
            ExprKind::Member(MemberAccess {
                owner: self,
                name: name.to_string(),
                member,
                null_conditional,
            }),
            ty,
        )
    }

    /// A method call on `self`.
    #[must_use]
    pub fn call(
        self,
        name: impl Into<String>,
        ty: Type,
        args: Vec<Expr>,
        func: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self::from_kind(
            ExprKind::Call(Call {
                name: name.into(),
                target: Some(self),
                args,
                func: Rc::new(func),
            }),
            ty,
        )
    }

    /// `self ? if_true : if_false`.
    #[must_use]
    pub fn then_else(self, if_true: impl Into<Expr>, if_false: impl Into<Expr>) -> Self {
        Self::conditional(self, if_true.into(), if_false.into())
    }

    #[must_use]
    pub fn unary(self, op: UnaryOp) -> Self {
        let ty = op.result_type(self.ty());
        Self::from_kind(ExprKind::Unary { op, operand: self }, ty)
    }

    #[must_use]
    pub fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Self {
        let right = right.into();
        let ty = op.result_type(self.ty(), right.ty());
        Self::from_kind(
            ExprKind::Binary {
                op,
                left: self,
                right,
            },
            ty,
        )
    }

    /// Cast to `ty`.
    #[must_use]
    pub fn convert(self, ty: Type) -> Self {
        self.unary(UnaryOp::Convert(ty))
    }

    #[must_use]
    pub fn equals(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, right)
    }

    #[must_use]
    pub fn not_equals(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, right)
    }

    #[must_use]
    pub fn lt(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, right)
    }

    #[must_use]
    pub fn le(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, right)
    }

    #[must_use]
    pub fn gt(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, right)
    }

    #[must_use]
    pub fn ge(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, right)
    }

    /// Short-circuiting `&&`.
    #[must_use]
    pub fn and(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, right)
    }

    /// Short-circuiting `||`.
    #[must_use]
    pub fn or(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    /// `self ?? right`.
    #[must_use]
    pub fn coalesce(self, right: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Coalesce, right)
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Canonical structural key, including object and variable identity.
    #[must_use]
    pub fn key(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render(&mut out, true);
        out
    }

    fn render(&self, out: &mut impl fmt::Write, identity: bool) -> fmt::Result {
        match self.kind() {
            ExprKind::Constant(Value::Object(object)) if identity => write!(
                out,
                "value({}#{:x})",
                object.type_info().name,
                Value::object_id(object)
            ),
            ExprKind::Constant(value) => write!(out, "{value}"),
            ExprKind::Variable(var) if identity => write!(out, "{}#{}", var.name(), var.inner.id),
            ExprKind::Variable(var) => out.write_str(var.name()),
            ExprKind::Static(member) => write!(out, "{}.{}", member.owner, member.name),
            ExprKind::Member(access) => {
                access.owner.render(out, identity)?;
                let dot = if access.null_conditional { "?." } else { "." };
                write!(out, "{dot}{}", access.name)
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    out.write_str("Not(")?;
                    operand.render(out, identity)?;
                    out.write_char(')')
                }
                UnaryOp::Negate => {
                    out.write_char('-')?;
                    operand.render(out, identity)
                }
                UnaryOp::Convert(ty) => {
                    out.write_str("Convert(")?;
                    operand.render(out, identity)?;
                    write!(out, ", {})", ty.name())
                }
            },
            ExprKind::Binary { op, left, right } => {
                out.write_char('(')?;
                left.render(out, identity)?;
                write!(out, " {} ", op.symbol())?;
                right.render(out, identity)?;
                out.write_char(')')
            }
            ExprKind::Call(call) => {
                if let Some(target) = &call.target {
                    target.render(out, identity)?;
                    out.write_char('.')?;
                }
                out.write_str(&call.name)?;
                if identity {
                    write!(out, "#{:x}", Rc::as_ptr(&call.func).cast::<()>() as usize)?;
                }
                out.write_char('(')?;
                for (index, arg) in call.args.iter().enumerate() {
                    if index > 0 {
                        out.write_str(", ")?;
                    }
                    arg.render(out, identity)?;
                }
                out.write_char(')')
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => {
                out.write_str("IIF(")?;
                test.render(out, identity)?;
                out.write_str(", ")?;
                if_true.render(out, identity)?;
                out.write_str(", ")?;
                if_false.render(out, identity)?;
                out.write_char(')')
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, false)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self}: {:?})", self.ty())
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::constant(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Self::constant(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::constant(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Self::constant(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::constant(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::constant(value)
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        Self::var(var)
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> std::ops::$trait<R> for Expr {
            type Output = Expr;

            fn $method(self, right: R) -> Expr {
                self.binary($op, right)
            }
        }
    };
}

binary_operator!(Add, add, BinaryOp::Add);
binary_operator!(Sub, sub, BinaryOp::Sub);
binary_operator!(Mul, mul, BinaryOp::Mul);
binary_operator!(Div, div, BinaryOp::Div);
binary_operator!(Rem, rem, BinaryOp::Rem);

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        self.unary(UnaryOp::Negate)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        self.unary(UnaryOp::Not)
    }
}
