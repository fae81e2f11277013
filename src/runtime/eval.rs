//! Value semantics for the runtime: JSON values, operators, collection
//! builtins and lexical locals.

use serde_json::{Number, Value};
use thiserror::Error;

use crate::ast::{BinaryOp, UnaryOp};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unknown component `{0}`")]
    UnknownComponent(String),

    #[error("`{component}` has no method `{method}`")]
    UnknownMethod { component: String, method: String },

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("slot {0} has no node")]
    MissingNode(u32),

    #[error("no component is mounted")]
    NotMounted,

    #[error("region {0} does not exist")]
    UnknownRegion(u32),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

const INSTANCE_KEY: &str = "$instance";

/// Values of component-typed fields point at an instance the owner keeps.
pub fn instance_ref(handle: u64) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(INSTANCE_KEY.to_string(), Value::from(handle));
    Value::Object(map)
}

pub fn as_instance_ref(value: &Value) -> Option<u64> {
    value.as_object()?.get(INSTANCE_KEY)?.as_u64()
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// How a value renders as text content.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(","),
        Value::Object(_) if as_instance_ref(value).is_some() => "[component]".to_string(),
        Value::Object(_) => value.to_string(),
    }
}

pub fn as_index(value: &Value) -> RuntimeResult<usize> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .map(|n| n as usize)
        .ok_or_else(|| RuntimeError::TypeMismatch(format!("{} is not an index", value)))
}

pub fn as_int(value: &Value) -> RuntimeResult<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| RuntimeError::TypeMismatch(format!("{} is not a number", value)))
}

enum Num {
    Int(i64),
    Float(f64),
}

fn num(value: &Value) -> Option<Num> {
    let n = value.as_number()?;
    match n.as_i64() {
        Some(i) => Some(Num::Int(i)),
        None => n.as_f64().map(Num::Float),
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    let mismatch = || {
        RuntimeError::TypeMismatch(format!("{} {} {}", left, op.as_str(), right))
    };
    let (l, r) = match (num(left), num(right)) {
        (Some(l), Some(r)) => (l, r),
        _ => return Err(mismatch()),
    };
    if let (Num::Int(a), Num::Int(b)) = (&l, &r) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result.map(Value::from).ok_or_else(mismatch);
    }
    let to_f = |n: Num| match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    };
    let (a, b) = (to_f(l), to_f(r));
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(mismatch()),
    };
    Ok(float(result))
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (num(left), num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => {
            let f = |n: Num| match n {
                Num::Int(i) => i as f64,
                Num::Float(f) => f,
            };
            f(a) == f(b)
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.as_f64()?.partial_cmp(&right.as_f64()?),
    }
}

/// Operators other than `&&`/`||`, which the caller short-circuits.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    match op {
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Ok(Value::String(format!("{}{}", to_text(left), to_text(right))))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right)
        }
        BinaryOp::Eq => Ok(Value::Bool(loosely_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!loosely_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| {
                RuntimeError::TypeMismatch(format!("{} {} {}", left, op.as_str(), right))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And => Ok(Value::Bool(truthy(left) && truthy(right))),
        BinaryOp::Or => Ok(Value::Bool(truthy(left) || truthy(right))),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> RuntimeResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(operand))),
        UnaryOp::Neg => match num(operand) {
            Some(Num::Int(i)) => Ok(Value::from(-i)),
            Some(Num::Float(f)) => Ok(float(-f)),
            None => Err(RuntimeError::TypeMismatch(format!("-{}", operand))),
        },
    }
}

/// Read-only builtins on collections and strings.
pub fn builtin(receiver: &Value, method: &str, args: &[Value]) -> RuntimeResult<Value> {
    match (receiver, method) {
        (Value::Array(items), "len" | "size" | "length") => Ok(Value::from(items.len())),
        (Value::String(s), "len" | "size" | "length") => Ok(Value::from(s.chars().count())),
        (Value::Array(items), "contains" | "includes") => Ok(Value::Bool(
            args.first()
                .map(|a| items.iter().any(|i| loosely_equal(i, a)))
                .unwrap_or(false),
        )),
        (Value::String(s), "contains" | "includes") => Ok(Value::Bool(
            args.first().map(|a| s.contains(&to_text(a))).unwrap_or(false),
        )),
        (Value::Array(items), "first") => Ok(items.first().cloned().unwrap_or(Value::Null)),
        (Value::Array(items), "last") => Ok(items.last().cloned().unwrap_or(Value::Null)),
        (Value::Array(items), "is_empty") => Ok(Value::Bool(items.is_empty())),
        (Value::String(s), "to_upper" | "toUpperCase") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "to_lower" | "toLowerCase") => Ok(Value::String(s.to_lowercase())),
        (_, "to_string" | "toString") => Ok(Value::String(to_text(receiver))),
        _ => Err(RuntimeError::TypeMismatch(format!(
            "no builtin `{}` on {}",
            method, receiver
        ))),
    }
}

/// Mutating collection methods, applied in place.
pub fn mutate(target: &mut Value, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    let Value::Array(items) = target else {
        return Err(RuntimeError::TypeMismatch(format!(
            "`{}` needs a collection, found {}",
            method, target
        )));
    };
    let mut args = args.into_iter();
    match method {
        "push" | "append" => {
            items.extend(args);
            Ok(Value::from(items.len()))
        }
        "extend" => {
            for arg in args {
                match arg {
                    Value::Array(more) => items.extend(more),
                    other => items.push(other),
                }
            }
            Ok(Value::Null)
        }
        "pop" => Ok(items.pop().unwrap_or(Value::Null)),
        "clear" => {
            items.clear();
            Ok(Value::Null)
        }
        "insert" => {
            let index = as_index(&args.next().unwrap_or(Value::Null))?;
            let value = args.next().unwrap_or(Value::Null);
            items.insert(index.min(items.len()), value);
            Ok(Value::Null)
        }
        "remove" => {
            let index = as_index(&args.next().unwrap_or(Value::Null))?;
            if index < items.len() {
                Ok(items.remove(index))
            } else {
                Ok(Value::Null)
            }
        }
        "truncate" => {
            let len = as_index(&args.next().unwrap_or(Value::Null))?;
            items.truncate(len);
            Ok(Value::Null)
        }
        "reverse" => {
            items.reverse();
            Ok(Value::Null)
        }
        "sort" => {
            items.sort_by(|a, b| compare(a, b).unwrap_or(std::cmp::Ordering::Equal));
            Ok(Value::Null)
        }
        _ => Err(RuntimeError::TypeMismatch(format!(
            "unsupported collection method `{}`",
            method
        ))),
    }
}

/// Lexical frames for method bodies and item creation.
#[derive(Debug, Clone, Default)]
pub struct Locals {
    frames: Vec<Vec<(String, Value)>>,
}

impl Locals {
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
        }
    }

    pub fn from_bindings(bindings: Vec<(String, Value)>) -> Self {
        Self {
            frames: vec![bindings],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn declare(&mut self, name: &str, value: Value) {
        if self.frames.is_empty() {
            self.frames.push(Vec::new());
        }
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.to_string(), value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .flat_map(|f| f.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.frames
            .iter_mut()
            .rev()
            .flat_map(|f| f.iter_mut().rev())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Visible bindings, innermost last; what an item handler captures.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        self.frames.iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arithmetic_and_comparison() {
        assert_eq!(binary(BinaryOp::Add, &json!(2), &json!(3)).unwrap(), json!(5));
        assert_eq!(binary(BinaryOp::Add, &json!("n="), &json!(3)).unwrap(), json!("n=3"));
        assert_eq!(binary(BinaryOp::Ge, &json!(10), &json!(10)).unwrap(), json!(true));
        assert_eq!(binary(BinaryOp::Eq, &json!(1), &json!(1.0)).unwrap(), json!(true));
        assert!(binary(BinaryOp::Div, &json!(1), &json!(0)).is_err());
        assert!(binary(BinaryOp::Sub, &json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(to_text(&json!(3)), "3");
        assert_eq!(to_text(&json!(2.0)), "2");
        assert_eq!(to_text(&Value::Null), "");
        assert_eq!(to_text(&instance_ref(4)), "[component]");
    }

    #[test]
    fn test_mutate_push_and_remove() {
        let mut items = json!(["a"]);
        mutate(&mut items, "push", vec![json!("b")]).unwrap();
        assert_eq!(items, json!(["a", "b"]));
        assert_eq!(mutate(&mut items, "remove", vec![json!(0)]).unwrap(), json!("a"));
        assert_eq!(builtin(&items, "len", &[]).unwrap(), json!(1));
    }

    #[test]
    fn test_locals_shadowing() {
        let mut locals = Locals::new();
        locals.declare("i", json!(1));
        locals.push();
        locals.declare("i", json!(2));
        assert_eq!(locals.get("i"), Some(&json!(2)));
        locals.pop();
        assert_eq!(locals.get("i"), Some(&json!(1)));
    }
}
