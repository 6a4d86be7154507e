//! The expression sub-language's AST and evaluator (§3, §4.1, §4.2 grammar items 1-10).

use crate::error::TemplateRuntimeError as RtErr;
use crate::value::{ContextAccessor, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// One node of the expression tree (§3). Each node has exactly one job: evaluate
/// itself against a [`ContextAccessor`] and produce a [`Value`].
#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Value),
    ContextRef,
    Property(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    UnaryOp(UnaryKind, Box<Expr>),
    BinaryOp(BinaryKind, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `[a, b, …]` array literal, permitted in expressions and `@metadata` blocks.
    ArrayLiteral(Vec<Expr>),
    /// `{ ident: value, … }` object literal.
    DictLiteral(Vec<(String, Expr)>),
}

impl Expr {
    pub fn evaluate(&self, ctx: &ContextAccessor) -> Result<Value, RtErr> {
        match self {
            Expr::Constant(v) => Ok(v.clone()),
            Expr::ContextRef => Ok(Value::context(ctx.clone())),
            Expr::Property(child, name) => child.evaluate(ctx)?.property(name),
            Expr::Index(child, idx) => {
                let receiver = child.evaluate(ctx)?;
                let idx = idx.evaluate(ctx)?;
                receiver.index(&idx)
            }
            Expr::MethodCall(child, name, args) => {
                let receiver = child.evaluate(ctx)?;
                let evaluated_args = args
                    .iter()
                    .map(|a| a.evaluate(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                receiver.call(name, &evaluated_args)
            }
            Expr::UnaryOp(UnaryKind::Negate, child) => child.evaluate(ctx)?.negate(),
            Expr::UnaryOp(UnaryKind::Not, child) => Ok(child.evaluate(ctx)?.logical_not()),
            Expr::BinaryOp(op, left, right) => {
                // §4.1: && and || always evaluate both operands (non-lazy, by design, §9).
                let l = left.evaluate(ctx)?;
                let r = right.evaluate(ctx)?;
                match op {
                    BinaryKind::Add => l.add(&r),
                    BinaryKind::Sub => l.sub(&r),
                    BinaryKind::Mul => l.mul(&r),
                    BinaryKind::Div => l.div(&r),
                    BinaryKind::Mod => l.rem(&r),
                    BinaryKind::Lt => l.lt(&r),
                    BinaryKind::Le => l.le(&r),
                    BinaryKind::Gt => l.gt(&r),
                    BinaryKind::Ge => l.ge(&r),
                    BinaryKind::Eq => Ok(l.eq_op(&r)),
                    BinaryKind::Ne => Ok(l.ne_op(&r)),
                    BinaryKind::And => Ok(l.logical_and(&r)),
                    BinaryKind::Or => Ok(l.logical_or(&r)),
                }
            }
            Expr::Ternary(cond, then_e, else_e) => {
                if cond.evaluate(ctx)?.as_bool() {
                    then_e.evaluate(ctx)
                } else {
                    else_e.evaluate(ctx)
                }
            }
            Expr::ArrayLiteral(items) => {
                let values = items
                    .iter()
                    .map(|e| e.evaluate(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(values))
            }
            Expr::DictLiteral(entries) => {
                let mut dict = crate::value::Dict::new();
                for (k, v) in entries {
                    dict.insert(k.clone(), v.evaluate(ctx)?);
                }
                Ok(Value::Dict(dict))
            }
        }
    }

    /// Bare identifier reference, sugar for `ctx.identifier` (§4.2 grammar item 10).
    pub fn identifier(name: impl Into<String>) -> Expr {
        Expr::Property(Box::new(Expr::ContextRef), name.into())
    }

    /// Bare `identifier(args)` call, sugar for `ctx.identifier(args)`.
    pub fn bare_call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::MethodCall(Box::new(Expr::ContextRef), name.into(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::TemplateFunctionSet;
    use crate::library::TemplateLibrary;
    use crate::metadata::MetadataCollection;
    use std::sync::Arc;

    fn ctx_for(root: Value) -> ContextAccessor {
        ContextAccessor::new(
            root,
            Arc::new(MetadataCollection::new()),
            Arc::new(TemplateFunctionSet::default()),
            Arc::new(TemplateLibrary::new()),
        )
    }

    #[test]
    fn bare_identifier_reads_root_property() {
        let mut dict = crate::value::Dict::new();
        dict.insert("name", Value::String("Andrew".into()));
        let ctx = ctx_for(Value::Dict(dict));
        let expr = Expr::identifier("name");
        assert_eq!(expr.evaluate(&ctx).unwrap().to_display_string().unwrap(), "Andrew");
    }

    #[test]
    fn ternary_chains_right_associatively() {
        // a ? b : c ? d : e, with a=false, c=true -> d
        let expr = Expr::Ternary(
            Box::new(Expr::Constant(Value::Bool(false))),
            Box::new(Expr::Constant(Value::String("b".into()))),
            Box::new(Expr::Ternary(
                Box::new(Expr::Constant(Value::Bool(true))),
                Box::new(Expr::Constant(Value::String("d".into()))),
                Box::new(Expr::Constant(Value::String("e".into()))),
            )),
        );
        let ctx = ctx_for(Value::Null);
        assert_eq!(expr.evaluate(&ctx).unwrap().to_display_string().unwrap(), "d");
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        // 2 + 3 * 4 == 2 + (3 * 4) == 14
        let expr = Expr::BinaryOp(
            BinaryKind::Add,
            Box::new(Expr::Constant(Value::Number(2.0))),
            Box::new(Expr::BinaryOp(
                BinaryKind::Mul,
                Box::new(Expr::Constant(Value::Number(3.0))),
                Box::new(Expr::Constant(Value::Number(4.0))),
            )),
        );
        let ctx = ctx_for(Value::Null);
        assert_eq!(expr.evaluate(&ctx).unwrap().to_display_string().unwrap(), "14");
    }

    #[test]
    fn logical_and_evaluates_both_sides_non_lazily() {
        use std::cell::Cell;
        thread_local! {
            static CALLS: Cell<u32> = Cell::new(0);
        }
        // There's no side-effecting expr variant to probe laziness directly here;
        // this documents the contract at the Value level instead (see value.rs).
        let ctx = ctx_for(Value::Null);
        let expr = Expr::BinaryOp(
            BinaryKind::And,
            Box::new(Expr::Constant(Value::Bool(false))),
            Box::new(Expr::Constant(Value::Bool(true))),
        );
        assert!(!expr.evaluate(&ctx).unwrap().as_bool());
        CALLS.with(|c| c.set(c.get()));
    }
}
