//! Tree-walking evaluation of compiled rules over a JSON context.
//!
//! Values borrow from the context wherever possible: member access never
//! clones lists or objects.

use std::borrow::Cow;

use serde_json::{Map, Value as Json};

use super::{
    RuleError,
    parser::{BinaryOp, Expr, Literal, UnaryOp},
};

#[derive(Clone, Debug)]
pub(super) enum Val<'a> {
    Null,
    Bool(bool),
    Num(f64),
    Str(Cow<'a, str>),
    List(&'a [Json]),
    Object(&'a Map<String, Json>),
}

impl<'a> Val<'a> {
    fn from_json(json: &'a Json) -> Self {
        match json {
            Json::Null => Val::Null,
            Json::Bool(b) => Val::Bool(*b),
            Json::Number(n) => n.as_f64().map_or(Val::Null, Val::Num),
            Json::String(s) => Val::Str(Cow::Borrowed(s.as_str())),
            Json::Array(items) => Val::List(items.as_slice()),
            Json::Object(map) => Val::Object(map),
        }
    }

    pub(super) fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "boolean",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::List(_) => "list",
            Val::Object(_) => "object",
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::List(_) | Val::Object(_) => true,
        }
    }
}

fn loose_eq(a: &Val<'_>, b: &Val<'_>) -> bool {
    match (a, b) {
        (Val::Null, Val::Null) => true,
        (Val::Bool(x), Val::Bool(y)) => x == y,
        (Val::Num(x), Val::Num(y)) => x == y,
        (Val::Str(x), Val::Str(y)) => x == y,
        (Val::List(x), Val::List(y)) => x == y,
        (Val::Object(x), Val::Object(y)) => x == y,
        _ => false,
    }
}

fn json_eq(item: &Json, needle: &Val<'_>) -> bool {
    loose_eq(&Val::from_json(item), needle)
}

fn number(val: &Val<'_>, context: &str) -> Result<f64, RuleError> {
    match val {
        Val::Num(n) => Ok(*n),
        other => Err(RuleError::Type(format!(
            "{context} expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn string<'v>(val: &'v Val<'_>, context: &str) -> Result<&'v str, RuleError> {
    match val {
        Val::Str(s) => Ok(s.as_ref()),
        other => Err(RuleError::Type(format!(
            "{context} expects a string, got {}",
            other.type_name()
        ))),
    }
}

fn arity(name: &str, args: &[Val<'_>], expected: usize) -> Result<(), RuleError> {
    if args.len() != expected {
        return Err(RuleError::Type(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn call<'a>(name: &str, args: Vec<Val<'a>>) -> Result<Val<'a>, RuleError> {
    match name {
        "min" | "max" => {
            if args.is_empty() {
                return Err(RuleError::Type(format!("{name}() needs arguments")));
            }
            let mut acc = number(&args[0], name)?;
            for arg in &args[1..] {
                let n = number(arg, name)?;
                acc = if name == "min" { acc.min(n) } else { acc.max(n) };
            }
            Ok(Val::Num(acc))
        }
        "abs" | "floor" | "ceil" | "round" => {
            arity(name, &args, 1)?;
            let n = number(&args[0], name)?;
            Ok(Val::Num(match name {
                "abs" => n.abs(),
                "floor" => n.floor(),
                "ceil" => n.ceil(),
                _ => n.round(),
            }))
        }
        "contains" => {
            arity(name, &args, 2)?;
            match &args[0] {
                Val::List(items) => Ok(Val::Bool(items.iter().any(|i| json_eq(i, &args[1])))),
                Val::Str(s) => Ok(Val::Bool(s.contains(string(&args[1], name)?))),
                Val::Null => Ok(Val::Bool(false)),
                other => Err(RuleError::Type(format!(
                    "contains() expects a list or string, got {}",
                    other.type_name()
                ))),
            }
        }
        "startsWith" | "endsWith" => {
            arity(name, &args, 2)?;
            let haystack = string(&args[0], name)?;
            let needle = string(&args[1], name)?;
            Ok(Val::Bool(if name == "startsWith" {
                haystack.starts_with(needle)
            } else {
                haystack.ends_with(needle)
            }))
        }
        "lowercase" | "uppercase" => {
            arity(name, &args, 1)?;
            let s = string(&args[0], name)?;
            Ok(Val::Str(Cow::Owned(if name == "lowercase" {
                s.to_lowercase()
            } else {
                s.to_uppercase()
            })))
        }
        "size" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Val::List(items) => Ok(Val::Num(items.len() as f64)),
                Val::Str(s) => Ok(Val::Num(s.chars().count() as f64)),
                Val::Object(map) => Ok(Val::Num(map.len() as f64)),
                Val::Null => Ok(Val::Num(0.0)),
                other => Err(RuleError::Type(format!(
                    "size() expects a list, string or object, got {}",
                    other.type_name()
                ))),
            }
        }
        other => Err(RuleError::Type(format!("unknown function {other}()"))),
    }
}

pub(super) fn evaluate<'a>(expr: &Expr, context: &'a Json) -> Result<Val<'a>, RuleError> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Null => Val::Null,
            Literal::Bool(b) => Val::Bool(*b),
            Literal::Number(n) => Val::Num(*n),
            Literal::Str(s) => Val::Str(Cow::Owned(s.clone())),
        }),
        Expr::Ident(name) => Ok(context.get(name).map_or(Val::Null, Val::from_json)),
        Expr::Member(target, name) => match evaluate(target, context)? {
            Val::Object(map) => Ok(map.get(name).map_or(Val::Null, Val::from_json)),
            Val::List(items) if name == "length" => Ok(Val::Num(items.len() as f64)),
            Val::Str(s) if name == "length" => Ok(Val::Num(s.chars().count() as f64)),
            _ => Ok(Val::Null),
        },
        Expr::Index(target, index) => {
            let target = evaluate(target, context)?;
            let index = evaluate(index, context)?;
            match (target, index) {
                (Val::List(items), Val::Num(n)) => {
                    if n < 0.0 || n.fract() != 0.0 {
                        return Ok(Val::Null);
                    }
                    Ok(items.get(n as usize).map_or(Val::Null, Val::from_json))
                }
                (Val::Object(map), Val::Str(key)) => {
                    Ok(map.get(key.as_ref()).map_or(Val::Null, Val::from_json))
                }
                _ => Ok(Val::Null),
            }
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, context)?;
            match op {
                UnaryOp::Not => Ok(Val::Bool(!value.truthy())),
                UnaryOp::Neg => Ok(Val::Num(-number(&value, "unary '-'")?)),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let left = evaluate(lhs, context)?;
            if !left.truthy() {
                return Ok(Val::Bool(false));
            }
            Ok(Val::Bool(evaluate(rhs, context)?.truthy()))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let left = evaluate(lhs, context)?;
            if left.truthy() {
                return Ok(Val::Bool(true));
            }
            Ok(Val::Bool(evaluate(rhs, context)?.truthy()))
        }
        Expr::Binary(op, lhs, rhs) => {
            let left = evaluate(lhs, context)?;
            let right = evaluate(rhs, context)?;
            binary(*op, left, right)
        }
        Expr::Conditional(cond, then, otherwise) => {
            if evaluate(cond, context)?.truthy() {
                evaluate(then, context)
            } else {
                evaluate(otherwise, context)
            }
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate(arg, context))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, args)
        }
    }
}

fn binary<'a>(op: BinaryOp, left: Val<'a>, right: Val<'a>) -> Result<Val<'a>, RuleError> {
    match op {
        BinaryOp::Eq => Ok(Val::Bool(loose_eq(&left, &right))),
        BinaryOp::NotEq => Ok(Val::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (&left, &right) {
                (Val::Num(a), Val::Num(b)) => a.partial_cmp(b),
                (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
                _ => {
                    return Err(RuleError::Type(format!(
                        "cannot compare {} with {}",
                        left.type_name(),
                        right.type_name()
                    )));
                }
            };
            let Some(ordering) = ordering else {
                return Ok(Val::Bool(false));
            };
            Ok(Val::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add => match (&left, &right) {
            (Val::Str(a), Val::Str(b)) => Ok(Val::Str(Cow::Owned(format!("{a}{b}")))),
            _ => Ok(Val::Num(number(&left, "'+'")? + number(&right, "'+'")?)),
        },
        BinaryOp::Sub => Ok(Val::Num(number(&left, "'-'")? - number(&right, "'-'")?)),
        BinaryOp::Mul => Ok(Val::Num(number(&left, "'*'")? * number(&right, "'*'")?)),
        BinaryOp::Div => Ok(Val::Num(number(&left, "'/'")? / number(&right, "'/'")?)),
        BinaryOp::Rem => Ok(Val::Num(number(&left, "'%'")? % number(&right, "'%'")?)),
        BinaryOp::And => Ok(Val::Bool(left.truthy() && right.truthy())),
        BinaryOp::Or => Ok(Val::Bool(left.truthy() || right.truthy())),
    }
}
