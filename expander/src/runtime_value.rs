use std::cmp::Ordering;
use std::fmt;

use crate::builtins::Builtin;
use crate::error::RuntimeError;

/// A runtime value produced by evaluating a snippet expression.
#[derive(Debug, Clone)]
pub enum RuntimeValue {
    None,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<RuntimeValue>),
    Tuple(Vec<RuntimeValue>),
    /// Insertion-ordered mapping. Keys are compared with `==`.
    Dict(Vec<(RuntimeValue, RuntimeValue)>),
    Builtin(Builtin),
    /// A method looked up on a value, e.g. `"{}".format`.
    Method {
        receiver: Box<RuntimeValue>,
        name: String,
    },
    /// A registered command, optionally with its `[index]` already bound.
    Command {
        name: String,
        index: Option<String>,
    },
}

impl RuntimeValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            RuntimeValue::None => false,
            RuntimeValue::Boolean(b) => *b,
            RuntimeValue::Integer(n) => *n != 0,
            RuntimeValue::Float(f) => *f != 0.0,
            RuntimeValue::String(s) => !s.is_empty(),
            RuntimeValue::List(items) | RuntimeValue::Tuple(items) => !items.is_empty(),
            RuntimeValue::Dict(entries) => !entries.is_empty(),
            RuntimeValue::Builtin(_) | RuntimeValue::Method { .. } | RuntimeValue::Command { .. } => {
                true
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RuntimeValue::None => "NoneType",
            RuntimeValue::Boolean(_) => "bool",
            RuntimeValue::Integer(_) => "int",
            RuntimeValue::Float(_) => "float",
            RuntimeValue::String(_) => "str",
            RuntimeValue::List(_) => "list",
            RuntimeValue::Tuple(_) => "tuple",
            RuntimeValue::Dict(_) => "dict",
            RuntimeValue::Builtin(_) => "builtin_function",
            RuntimeValue::Method { .. } => "method",
            RuntimeValue::Command { .. } => "command",
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            RuntimeValue::Integer(_) | RuntimeValue::Float(_) | RuntimeValue::Boolean(_)
        )
    }

    /// Numeric value of ints, floats and bools.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RuntimeValue::Integer(n) => Some(*n as f64),
            RuntimeValue::Float(f) => Some(*f),
            RuntimeValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RuntimeValue::Integer(n) => Some(*n),
            RuntimeValue::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RuntimeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn expect_number(&self) -> Result<f64, RuntimeError> {
        self.as_f64()
            .ok_or_else(|| RuntimeError::type_error("number", self.type_name()))
    }

    pub fn expect_integer(&self) -> Result<i64, RuntimeError> {
        match self {
            RuntimeValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
            other => other
                .as_i64()
                .ok_or_else(|| RuntimeError::type_error("integer", other.type_name())),
        }
    }

    pub fn expect_str(&self) -> Result<&str, RuntimeError> {
        self.as_str()
            .ok_or_else(|| RuntimeError::type_error("str", self.type_name()))
    }

    /// Elements produced by iterating over the value.
    pub fn iterate(&self) -> Result<Vec<RuntimeValue>, RuntimeError> {
        match self {
            RuntimeValue::List(items) | RuntimeValue::Tuple(items) => Ok(items.clone()),
            RuntimeValue::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            RuntimeValue::String(s) => Ok(s
                .chars()
                .map(|c| RuntimeValue::String(c.to_string()))
                .collect()),
            other => Err(RuntimeError::type_error("iterable", other.type_name())),
        }
    }

    pub fn dict_get(&self, key: &RuntimeValue) -> Option<&RuntimeValue> {
        match self {
            RuntimeValue::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Python-style `repr`: strings are quoted.
    pub fn repr(&self) -> String {
        match self {
            RuntimeValue::String(s) => {
                let escaped = s.replace('\\', "\\\\").replace('\'', "\\'");
                format!("'{}'", escaped)
            }
            other => other.to_string(),
        }
    }

    /// Ordering for `<`, `sorted`, `min` and `max`.
    pub fn compare(&self, other: &RuntimeValue) -> Result<Ordering, RuntimeError> {
        match (self, other) {
            (RuntimeValue::String(a), RuntimeValue::String(b)) => Ok(a.cmp(b)),
            (RuntimeValue::List(a), RuntimeValue::List(b))
            | (RuntimeValue::Tuple(a), RuntimeValue::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        unequal => return Ok(unequal),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            (a, b) if a.is_number() && b.is_number() => {
                if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                    return Ok(x.cmp(&y));
                }
                let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                x.partial_cmp(&y).ok_or_else(|| {
                    RuntimeError::argument("cannot order NaN")
                })
            }
            (a, b) => Err(RuntimeError::type_error(
                format!("values comparable with {}", a.type_name()),
                b.type_name(),
            )),
        }
    }
}

/// Format a float the way the snippet language prints it: `5.0`, `2.5`, `1e+20`, `1e-05`.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else if f.abs() >= 1e16 || f.abs() < 1e-4 {
        scientific(f)
    } else {
        format!("{}", f)
    }
}

/// `{:e}` with a signed exponent of at least two digits.
fn scientific(f: f64) -> String {
    let text = format!("{:e}", f);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[RuntimeValue]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item.repr())?;
    }
    Ok(())
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::None => write!(f, "None"),
            RuntimeValue::Boolean(true) => write!(f, "True"),
            RuntimeValue::Boolean(false) => write!(f, "False"),
            RuntimeValue::Integer(n) => write!(f, "{}", n),
            RuntimeValue::Float(x) => write!(f, "{}", format_float(*x)),
            RuntimeValue::String(s) => write!(f, "{}", s),
            RuntimeValue::List(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            RuntimeValue::Tuple(items) => {
                write!(f, "(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            RuntimeValue::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k.repr(), v.repr())?;
                }
                write!(f, "}}")
            }
            RuntimeValue::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            RuntimeValue::Method { receiver, name } => {
                write!(f, "<method {} of {}>", name, receiver.type_name())
            }
            RuntimeValue::Command { name, index } => match index {
                Some(index) => write!(f, "<command {}[{}]>", name, index),
                None => write!(f, "<command {}>", name),
            },
        }
    }
}

impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuntimeValue::None, RuntimeValue::None) => true,
            (RuntimeValue::String(a), RuntimeValue::String(b)) => a == b,
            (RuntimeValue::List(a), RuntimeValue::List(b)) => a == b,
            (RuntimeValue::Tuple(a), RuntimeValue::Tuple(b)) => a == b,
            (RuntimeValue::Dict(a), RuntimeValue::Dict(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| other.dict_get(k) == Some(v))
            }
            (RuntimeValue::Builtin(a), RuntimeValue::Builtin(b)) => a == b,
            (
                RuntimeValue::Command { name: n1, index: i1 },
                RuntimeValue::Command { name: n2, index: i2 },
            ) => n1 == n2 && i1 == i2,
            (a, b) if a.is_number() && b.is_number() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(), // NaN != NaN per IEEE 754
            },
            _ => false,
        }
    }
}

impl From<f64> for RuntimeValue {
    fn from(f: f64) -> Self {
        RuntimeValue::Float(f)
    }
}

impl From<i64> for RuntimeValue {
    fn from(n: i64) -> Self {
        RuntimeValue::Integer(n)
    }
}

impl From<&str> for RuntimeValue {
    fn from(s: &str) -> Self {
        RuntimeValue::String(s.to_string())
    }
}

impl From<String> for RuntimeValue {
    fn from(s: String) -> Self {
        RuntimeValue::String(s)
    }
}

impl From<bool> for RuntimeValue {
    fn from(b: bool) -> Self {
        RuntimeValue::Boolean(b)
    }
}

impl<T: Into<RuntimeValue>> From<Vec<T>> for RuntimeValue {
    fn from(items: Vec<T>) -> Self {
        RuntimeValue::List(items.into_iter().map(Into::into).collect())
    }
}
