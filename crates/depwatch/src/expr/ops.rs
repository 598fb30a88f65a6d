#![forbid(unsafe_code)]

//! Operator semantics over dynamic [`Value`]s.
//!
//! Numeric rules: `Int op Int` stays integral (wrapping on overflow), any
//! `Float` operand promotes the result to `Float`. `Add` concatenates when
//! either side is a string. Integer division or remainder by zero is an
//! [`EvalError::DivideByZero`]; float division follows IEEE rules.

use std::cmp::Ordering;

use crate::error::EvalError;
use crate::object::{Type, Value};

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert(Type),
}

/// Binary operators. `And`, `Or` and `Coalesce` short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Coalesce,
}

impl UnaryOp {
    pub(crate) fn result_type(self, operand: Type) -> Type {
        match self {
            Self::Not => Type::Bool,
            Self::Negate => operand,
            Self::Convert(ty) => ty,
        }
    }

    pub(crate) fn apply(self, value: Value, text: &str) -> Result<Value, EvalError> {
        match (self, value) {
            (Self::Not, Value::Bool(v)) => Ok(Value::Bool(!v)),
            (Self::Negate, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
            (Self::Negate, Value::Float(v)) => Ok(Value::Float(-v)),
            (Self::Convert(ty), value) => convert(value, ty, text),
            (Self::Not, other) => Err(EvalError::mismatch(text, "bool", other.kind_name())),
            (Self::Negate, other) => Err(EvalError::mismatch(text, "number", other.kind_name())),
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn convert(value: Value, ty: Type, text: &str) -> Result<Value, EvalError> {
    match (value, ty) {
        (Value::Int(v), Type::Float) => Ok(Value::Float(v as f64)),
        (Value::Float(v), Type::Int) => Ok(Value::Int(v as i64)),
        (value @ Value::Int(_), Type::Int)
        | (value @ Value::Float(_), Type::Float)
        | (value @ Value::Bool(_), Type::Bool)
        | (value @ Value::Str(_), Type::Str)
        | (value @ Value::Null, Type::Str | Type::Object(_)) => Ok(value),
        (Value::Object(object), Type::Object(info))
            if std::ptr::eq(object.type_info(), info) =>
        {
            Ok(Value::Object(object))
        }
        (value, _) => Err(EvalError::mismatch(text, ty.name(), value.kind_name())),
    }
}

impl BinaryOp {
    /// Source-level symbol used when rendering expressions.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Coalesce => "??",
        }
    }

    pub(crate) fn result_type(self, left: Type, right: Type) -> Type {
        match self {
            Self::Add if left == Type::Str || right == Type::Str => Type::Str,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem => {
                if left == Type::Float || right == Type::Float {
                    Type::Float
                } else {
                    left
                }
            }
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::And | Self::Or => {
                Type::Bool
            }
            Self::Coalesce => left,
        }
    }

    /// Apply a strict (non short-circuiting) operator.
    pub(crate) fn apply(self, left: Value, right: Value, text: &str) -> Result<Value, EvalError> {
        match self {
            Self::Add => add(left, right, text),
            Self::Sub => arithmetic(left, right, text, i64::wrapping_sub, |a, b| a - b),
            Self::Mul => arithmetic(left, right, text, i64::wrapping_mul, |a, b| a * b),
            Self::Div => {
                if matches!((&left, &right), (Value::Int(_), Value::Int(0))) {
                    return Err(EvalError::DivideByZero {
                        expression: text.to_string(),
                    });
                }
                arithmetic(left, right, text, i64::wrapping_div, |a, b| a / b)
            }
            Self::Rem => {
                if matches!((&left, &right), (Value::Int(_), Value::Int(0))) {
                    return Err(EvalError::DivideByZero {
                        expression: text.to_string(),
                    });
                }
                arithmetic(left, right, text, i64::wrapping_rem, |a, b| a % b)
            }
            Self::Eq => Ok(Value::Bool(left == right)),
            Self::Ne => Ok(Value::Bool(left != right)),
            Self::Lt => compare(&left, &right, text).map(|o| Value::Bool(o == Ordering::Less)),
            Self::Le => compare(&left, &right, text).map(|o| Value::Bool(o != Ordering::Greater)),
            Self::Gt => compare(&left, &right, text).map(|o| Value::Bool(o == Ordering::Greater)),
            Self::Ge => compare(&left, &right, text).map(|o| Value::Bool(o != Ordering::Less)),
            Self::And | Self::Or => match (left, right) {
                (Value::Bool(a), Value::Bool(b)) => {
                    Ok(Value::Bool(if self == Self::And { a && b } else { a || b }))
                }
                (Value::Bool(_), other) | (other, _) => {
                    Err(EvalError::mismatch(text, "bool", other.kind_name()))
                }
            },
            Self::Coalesce => Ok(if left.is_null() { right } else { left }),
        }
    }
}

fn add(left: Value, right: Value, text: &str) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Ok(Value::from(format!("{}{}", concat_text(&left), concat_text(&right))))
        }
        _ => arithmetic(left, right, text, i64::wrapping_add, |a, b| a + b),
    }
}

fn concat_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn arithmetic(
    left: Value,
    right: Value,
    text: &str,
    int: impl Fn(i64, i64) -> i64,
    float: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int(a, b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float(a, b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float(a as f64, b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float(a, b as f64))),
        (Value::Int(_) | Value::Float(_), other) | (other, _) => {
            Err(EvalError::mismatch(text, "number", other.kind_name()))
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn compare(left: &Value, right: &Value, text: &str) -> Result<Ordering, EvalError> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => {
            return Err(EvalError::mismatch(
                text,
                left.kind_name(),
                right.kind_name(),
            ));
        }
    };
    // NaN compares as "not less, not greater".
    Ok(ordering.unwrap_or(Ordering::Equal))
}
