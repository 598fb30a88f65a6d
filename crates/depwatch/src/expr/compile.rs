#![forbid(unsafe_code)]

//! Compilation of expression trees into reusable getters.
//!
//! Compiling walks the tree once and produces a closure tree; evaluating
//! the resulting [`Getter`] re-reads every captured object and variable,
//! so the same getter observes the graph as it is at call time.

use std::rc::Rc;

use super::{BinaryOp, Expr, ExprKind};
use crate::error::EvalError;
use crate::object::Value;

/// A compiled, re-evaluable expression.
pub type Getter = Rc<dyn Fn() -> Result<Value, EvalError>>;

impl Expr {
    /// Compile this expression into a [`Getter`].
    #[must_use]
    pub fn compile(&self) -> Getter {
        match self.kind() {
            ExprKind::Constant(value) => {
                let value = value.clone();
                Rc::new(move || Ok(value.clone()))
            }
            ExprKind::Variable(var) => {
                let var = var.clone();
                Rc::new(move || Ok(var.get()))
            }
            ExprKind::Static(member) => {
                let getter = Rc::clone(&member.getter);
                Rc::new(move || Ok(getter()))
            }
            ExprKind::Member(access) => {
                let owner = access.owner.compile();
                let name = access.name.clone();
                let null_conditional = access.null_conditional;
                let text = self.to_string();
                Rc::new(move || match owner()? {
                    Value::Null if null_conditional => Ok(Value::Null),
                    Value::Null => Err(EvalError::NullReference {
                        expression: text.clone(),
                    }),
                    Value::Object(object) => {
                        object
                            .get(&name)
                            .ok_or_else(|| EvalError::MissingProperty {
                                type_name: object.type_info().name.to_string(),
                                property: name.clone(),
                            })
                    }
                    other => Err(EvalError::mismatch(text.clone(), "object", other.kind_name())),
                })
            }
            ExprKind::Unary { op, operand } => {
                let operand = operand.compile();
                let op = *op;
                let text = self.to_string();
                Rc::new(move || op.apply(operand()?, &text))
            }
            ExprKind::Binary { op, left, right } => {
                compile_binary(*op, left.compile(), right.compile(), self.to_string())
            }
            ExprKind::Call(call) => {
                let target = call.target.as_ref().map(Expr::compile);
                let args: Vec<Getter> = call.args.iter().map(Expr::compile).collect();
                let func = Rc::clone(&call.func);
                let text = self.to_string();
                Rc::new(move || {
                    let mut values = Vec::with_capacity(args.len() + 1);
                    if let Some(target) = &target {
                        match target()? {
                            Value::Null => {
                                return Err(EvalError::NullReference {
                                    expression: text.clone(),
                                });
                            }
                            value => values.push(value),
                        }
                    }
                    for arg in &args {
                        values.push(arg()?);
                    }
                    func(&values)
                })
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = test.compile();
                let if_true = if_true.compile();
                let if_false = if_false.compile();
                let text = self.to_string();
                Rc::new(move || match test()? {
                    Value::Bool(true) => if_true(),
                    Value::Bool(false) => if_false(),
                    other => Err(EvalError::mismatch(text.clone(), "bool", other.kind_name())),
                })
            }
        }
    }

    /// Compile and evaluate once.
    pub fn evaluate(&self) -> Result<Value, EvalError> {
        (self.compile())()
    }
}

fn compile_binary(op: BinaryOp, left: Getter, right: Getter, text: String) -> Getter {
    match op {
        BinaryOp::And | BinaryOp::Or => Rc::new(move || {
            let short = op == BinaryOp::Or;
            match left()? {
                Value::Bool(v) if v == short => Ok(Value::Bool(short)),
                Value::Bool(_) => match right()? {
                    value @ Value::Bool(_) => Ok(value),
                    other => Err(EvalError::mismatch(text.clone(), "bool", other.kind_name())),
                },
                other => Err(EvalError::mismatch(text.clone(), "bool", other.kind_name())),
            }
        }),
        BinaryOp::Coalesce => Rc::new(move || match left()? {
            Value::Null => right(),
            value => Ok(value),
        }),
        _ => Rc::new(move || op.apply(left()?, right()?, &text)),
    }
}
