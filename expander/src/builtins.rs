//! Builtin functions and methods of the snippet language.

use crate::command::Arguments;
use crate::error::RuntimeError;
use crate::evaluator_helpers::binary_op;
use crate::runtime_value::RuntimeValue;
use mpl::instruction::value::BinaryOperator;

/// Upper bound on the length of a generated range, list or string.
pub(crate) const MAX_SEQUENCE_LEN: i64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Range,
    Zip,
    Len,
    Abs,
    Min,
    Max,
    Sum,
    List,
    Tuple,
    Dict,
    Str,
    Int,
    Float,
    Sorted,
    Enumerate,
    Round,
    Print,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "range" => Builtin::Range,
            "zip" => Builtin::Zip,
            "len" => Builtin::Len,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "list" => Builtin::List,
            "tuple" => Builtin::Tuple,
            "dict" => Builtin::Dict,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "sorted" => Builtin::Sorted,
            "enumerate" => Builtin::Enumerate,
            "round" => Builtin::Round,
            "print" => Builtin::Print,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Range => "range",
            Builtin::Zip => "zip",
            Builtin::Len => "len",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Sorted => "sorted",
            Builtin::Enumerate => "enumerate",
            Builtin::Round => "round",
            Builtin::Print => "print",
        }
    }
}

// ------------------------------------------------------------------
// Builtin functions
// ------------------------------------------------------------------

pub fn call_builtin(builtin: Builtin, args: Arguments) -> Result<RuntimeValue, RuntimeError> {
    let name = builtin.name();
    match builtin {
        Builtin::Range => range(name, args),
        Builtin::Zip => {
            args.no_keywords(name)?;
            let columns = args
                .positional
                .iter()
                .map(RuntimeValue::iterate)
                .collect::<Result<Vec<_>, _>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            let rows = (0..len)
                .map(|i| RuntimeValue::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                .collect();
            Ok(RuntimeValue::List(rows))
        }
        Builtin::Len => {
            let mut bound = args.bind(name, &["obj"], 1)?;
            let value = bound.required("obj")?;
            let len = match &value {
                RuntimeValue::String(s) => s.chars().count(),
                RuntimeValue::List(items) | RuntimeValue::Tuple(items) => items.len(),
                RuntimeValue::Dict(entries) => entries.len(),
                other => return Err(RuntimeError::type_error("sized value", other.type_name())),
            };
            Ok(RuntimeValue::Integer(len as i64))
        }
        Builtin::Abs => {
            let mut bound = args.bind(name, &["x"], 1)?;
            match bound.required("x")? {
                RuntimeValue::Float(f) => Ok(RuntimeValue::Float(f.abs())),
                other => match other.as_i64() {
                    Some(n) => n
                        .checked_abs()
                        .map(RuntimeValue::Integer)
                        .ok_or(RuntimeError::Overflow),
                    None => Err(RuntimeError::type_error("number", other.type_name())),
                },
            }
        }
        Builtin::Min => extremum(name, args, std::cmp::Ordering::Less),
        Builtin::Max => extremum(name, args, std::cmp::Ordering::Greater),
        Builtin::Sum => {
            let mut bound = args.bind(name, &["iterable", "start"], 1)?;
            let items = bound.required("iterable")?.iterate()?;
            let mut total = bound.take("start").unwrap_or(RuntimeValue::Integer(0));
            for item in &items {
                total = binary_op(BinaryOperator::Addition, &total, item)?;
            }
            Ok(total)
        }
        Builtin::List => {
            let mut bound = args.bind(name, &["iterable"], 0)?;
            match bound.take("iterable") {
                Some(value) => Ok(RuntimeValue::List(value.iterate()?)),
                None => Ok(RuntimeValue::List(Vec::new())),
            }
        }
        Builtin::Tuple => {
            let mut bound = args.bind(name, &["iterable"], 0)?;
            match bound.take("iterable") {
                Some(value) => Ok(RuntimeValue::Tuple(value.iterate()?)),
                None => Ok(RuntimeValue::Tuple(Vec::new())),
            }
        }
        Builtin::Dict => dict(args),
        Builtin::Str => {
            let mut bound = args.bind(name, &["object"], 0)?;
            Ok(RuntimeValue::String(
                bound.take("object").map(|v| v.to_string()).unwrap_or_default(),
            ))
        }
        Builtin::Int => {
            let mut bound = args.bind(name, &["x"], 1)?;
            match bound.required("x")? {
                RuntimeValue::Float(f) if f.is_finite() => Ok(RuntimeValue::Integer(f.trunc() as i64)),
                RuntimeValue::String(s) => s.trim().parse::<i64>().map(RuntimeValue::Integer).map_err(
                    |_| RuntimeError::argument(format!("invalid literal for int(): '{}'", s)),
                ),
                other => other
                    .as_i64()
                    .map(RuntimeValue::Integer)
                    .ok_or_else(|| RuntimeError::type_error("number or string", other.type_name())),
            }
        }
        Builtin::Float => {
            let mut bound = args.bind(name, &["x"], 0)?;
            match bound.take("x") {
                None => Ok(RuntimeValue::Float(0.0)),
                Some(RuntimeValue::String(s)) => {
                    s.trim().parse::<f64>().map(RuntimeValue::Float).map_err(|_| {
                        RuntimeError::argument(format!("could not convert string to float: '{}'", s))
                    })
                }
                Some(other) => other.expect_number().map(RuntimeValue::Float),
            }
        }
        Builtin::Sorted => {
            let mut bound = args.bind(name, &["iterable", "reverse"], 1)?;
            let mut items = bound.required("iterable")?.iterate()?;
            let reverse = bound.take("reverse").is_some_and(|r| r.is_truthy());
            sort_values(&mut items)?;
            if reverse {
                items.reverse();
            }
            Ok(RuntimeValue::List(items))
        }
        Builtin::Enumerate => {
            let mut bound = args.bind(name, &["iterable", "start"], 1)?;
            let items = bound.required("iterable")?.iterate()?;
            let start = match bound.take("start") {
                Some(start) => start.expect_integer()?,
                None => 0,
            };
            Ok(RuntimeValue::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| RuntimeValue::Tuple(vec![RuntimeValue::Integer(start + i as i64), item]))
                    .collect(),
            ))
        }
        Builtin::Round => {
            let mut bound = args.bind(name, &["number", "ndigits"], 1)?;
            let number = bound.required("number")?;
            match bound.take("ndigits") {
                None => match number {
                    RuntimeValue::Float(f) => {
                        let rounded = f.round_ties_even();
                        if !rounded.is_finite() {
                            return Err(RuntimeError::Overflow);
                        }
                        Ok(RuntimeValue::Integer(rounded as i64))
                    }
                    other => other
                        .as_i64()
                        .map(RuntimeValue::Integer)
                        .ok_or_else(|| RuntimeError::type_error("number", other.type_name())),
                },
                Some(ndigits) => {
                    let digits = i32::try_from(ndigits.expect_integer()?).map_err(|_| RuntimeError::Overflow)?;
                    if let RuntimeValue::Integer(n) = number {
                        return Ok(RuntimeValue::Integer(n));
                    }
                    let scale = 10f64.powi(digits);
                    Ok(RuntimeValue::Float((number.expect_number()? * scale).round_ties_even() / scale))
                }
            }
        }
        Builtin::Print => {
            let sep = args
                .keyword
                .iter()
                .find(|(k, _)| k == "sep")
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| " ".to_string());
            let line = args
                .positional
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(&sep);
            tracing::info!(target: "snippet", "{}", line);
            Ok(RuntimeValue::None)
        }
    }
}

fn range(name: &str, args: Arguments) -> Result<RuntimeValue, RuntimeError> {
    args.no_keywords(name)?;
    let ints = args
        .positional
        .iter()
        .map(RuntimeValue::expect_integer)
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(RuntimeError::argument(format!(
                "range expected 1 to 3 arguments, got {}",
                ints.len()
            )));
        }
    };
    if step == 0 {
        return Err(RuntimeError::argument("range() arg 3 must not be zero"));
    }
    let span = (stop as i128 - start as i128) / step as i128;
    if span > MAX_SEQUENCE_LEN as i128 {
        return Err(RuntimeError::argument(format!(
            "range of more than {} elements",
            MAX_SEQUENCE_LEN
        )));
    }
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        values.push(RuntimeValue::Integer(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(RuntimeValue::List(values))
}

fn extremum(
    name: &str,
    args: Arguments,
    wanted: std::cmp::Ordering,
) -> Result<RuntimeValue, RuntimeError> {
    args.no_keywords(name)?;
    let items = match args.positional.as_slice() {
        [single] => single.iterate()?,
        many => many.to_vec(),
    };
    let mut best: Option<RuntimeValue> = None;
    for item in items {
        best = match best {
            Some(current) if item.compare(&current)? != wanted => Some(current),
            _ => Some(item),
        };
    }
    best.ok_or_else(|| RuntimeError::argument(format!("{}() arg is an empty sequence", name)))
}

fn dict(args: Arguments) -> Result<RuntimeValue, RuntimeError> {
    let mut entries: Vec<(RuntimeValue, RuntimeValue)> = Vec::new();
    let mut insert = |key: RuntimeValue, value: RuntimeValue| {
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    };
    match args.positional.as_slice() {
        [] => {}
        [RuntimeValue::Dict(source)] => {
            for (k, v) in source {
                insert(k.clone(), v.clone());
            }
        }
        [pairs] => {
            for pair in pairs.iterate()? {
                match pair.iterate()?.as_slice() {
                    [k, v] => insert(k.clone(), v.clone()),
                    _ => {
                        return Err(RuntimeError::argument(
                            "dictionary update sequence element has wrong length",
                        ));
                    }
                }
            }
        }
        more => {
            return Err(RuntimeError::argument(format!(
                "dict expected at most 1 argument, got {}",
                more.len()
            )));
        }
    }
    for (k, v) in args.keyword {
        insert(RuntimeValue::String(k), v);
    }
    Ok(RuntimeValue::Dict(entries))
}

/// Stable sort that reports the first incomparable pair.
pub fn sort_values(items: &mut [RuntimeValue]) -> Result<(), RuntimeError> {
    let mut error = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|e| {
            error.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ------------------------------------------------------------------
// Methods
// ------------------------------------------------------------------

const STR_METHODS: &[&str] = &[
    "format", "join", "upper", "lower", "strip", "split", "replace", "startswith", "endswith",
];
const DICT_METHODS: &[&str] = &["keys", "values", "items", "get"];
const LIST_METHODS: &[&str] = &["index", "count"];

pub fn has_method(receiver: &RuntimeValue, name: &str) -> bool {
    match receiver {
        RuntimeValue::String(_) => STR_METHODS.contains(&name),
        RuntimeValue::Dict(_) => DICT_METHODS.contains(&name),
        RuntimeValue::List(_) | RuntimeValue::Tuple(_) => LIST_METHODS.contains(&name),
        _ => false,
    }
}

pub fn call_method(
    receiver: &RuntimeValue,
    name: &str,
    args: Arguments,
) -> Result<RuntimeValue, RuntimeError> {
    let callee = format!("{}.{}", receiver.type_name(), name);
    match (receiver, name) {
        (RuntimeValue::String(s), "format") => {
            format_template(s, &args.positional, &args.keyword).map(RuntimeValue::String)
        }
        (RuntimeValue::String(s), "join") => {
            let mut bound = args.bind(&callee, &["iterable"], 1)?;
            let parts = bound
                .required("iterable")?
                .iterate()?
                .iter()
                .map(|p| p.expect_str().map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RuntimeValue::String(parts.join(s)))
        }
        (RuntimeValue::String(s), "upper") => {
            args.bind(&callee, &[], 0)?;
            Ok(RuntimeValue::String(s.to_uppercase()))
        }
        (RuntimeValue::String(s), "lower") => {
            args.bind(&callee, &[], 0)?;
            Ok(RuntimeValue::String(s.to_lowercase()))
        }
        (RuntimeValue::String(s), "strip") => {
            args.bind(&callee, &[], 0)?;
            Ok(RuntimeValue::String(s.trim().to_string()))
        }
        (RuntimeValue::String(s), "split") => {
            let mut bound = args.bind(&callee, &["sep"], 0)?;
            let parts: Vec<RuntimeValue> = match bound.take("sep") {
                Some(sep) => s.split(sep.expect_str()?).map(RuntimeValue::from).collect(),
                None => s.split_whitespace().map(RuntimeValue::from).collect(),
            };
            Ok(RuntimeValue::List(parts))
        }
        (RuntimeValue::String(s), "replace") => {
            let mut bound = args.bind(&callee, &["old", "new"], 2)?;
            let old = bound.required("old")?;
            let new = bound.required("new")?;
            Ok(RuntimeValue::String(s.replace(old.expect_str()?, new.expect_str()?)))
        }
        (RuntimeValue::String(s), "startswith") => {
            let mut bound = args.bind(&callee, &["prefix"], 1)?;
            let prefix = bound.required("prefix")?;
            Ok(RuntimeValue::Boolean(s.starts_with(prefix.expect_str()?)))
        }
        (RuntimeValue::String(s), "endswith") => {
            let mut bound = args.bind(&callee, &["suffix"], 1)?;
            let suffix = bound.required("suffix")?;
            Ok(RuntimeValue::Boolean(s.ends_with(suffix.expect_str()?)))
        }
        (RuntimeValue::Dict(entries), "keys") => {
            args.bind(&callee, &[], 0)?;
            Ok(RuntimeValue::List(entries.iter().map(|(k, _)| k.clone()).collect()))
        }
        (RuntimeValue::Dict(entries), "values") => {
            args.bind(&callee, &[], 0)?;
            Ok(RuntimeValue::List(entries.iter().map(|(_, v)| v.clone()).collect()))
        }
        (RuntimeValue::Dict(entries), "items") => {
            args.bind(&callee, &[], 0)?;
            Ok(RuntimeValue::List(
                entries
                    .iter()
                    .map(|(k, v)| RuntimeValue::Tuple(vec![k.clone(), v.clone()]))
                    .collect(),
            ))
        }
        (RuntimeValue::Dict(_), "get") => {
            let mut bound = args.bind(&callee, &["key", "default"], 1)?;
            let key = bound.required("key")?;
            Ok(receiver
                .dict_get(&key)
                .cloned()
                .or_else(|| bound.take("default"))
                .unwrap_or(RuntimeValue::None))
        }
        (RuntimeValue::List(items) | RuntimeValue::Tuple(items), "index") => {
            let mut bound = args.bind(&callee, &["value"], 1)?;
            let value = bound.required("value")?;
            items
                .iter()
                .position(|item| *item == value)
                .map(|i| RuntimeValue::Integer(i as i64))
                .ok_or_else(|| RuntimeError::argument(format!("{} is not in list", value.repr())))
        }
        (RuntimeValue::List(items) | RuntimeValue::Tuple(items), "count") => {
            let mut bound = args.bind(&callee, &["value"], 1)?;
            let value = bound.required("value")?;
            Ok(RuntimeValue::Integer(
                items.iter().filter(|item| **item == value).count() as i64,
            ))
        }
        _ => Err(RuntimeError::AttributeError {
            type_name: receiver.type_name().to_string(),
            attribute: name.to_string(),
        }),
    }
}

// ------------------------------------------------------------------
// String formatting
// ------------------------------------------------------------------

#[derive(Debug, Default)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<char>,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

impl FormatSpec {
    /// `[[fill]align][width][.precision][type]`
    fn parse(text: &str) -> Result<Self, RuntimeError> {
        let chars: Vec<char> = text.chars().collect();
        let mut spec = FormatSpec::default();
        let mut pos = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^');
        if chars.len() >= 2 && is_align(chars[1]) {
            spec.fill = Some(chars[0]);
            spec.align = Some(chars[1]);
            pos = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            spec.align = chars.first().copied();
            pos = 1;
        }
        let start = pos;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos > start {
            spec.width = chars[start..pos].iter().collect::<String>().parse().unwrap_or(0);
        }
        if pos < chars.len() && chars[pos] == '.' {
            pos += 1;
            let start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            spec.precision = Some(chars[start..pos].iter().collect::<String>().parse().unwrap_or(0));
        }
        if pos < chars.len() {
            spec.kind = Some(chars[pos]);
            pos += 1;
        }
        if pos != chars.len() {
            return Err(RuntimeError::argument(format!("invalid format specifier '{}'", text)));
        }
        Ok(spec)
    }

    fn apply(&self, value: &RuntimeValue) -> Result<String, RuntimeError> {
        let body = match self.kind {
            Some('d') | Some('i') => match value {
                RuntimeValue::Float(f) => format!("{}", f.trunc() as i64),
                other => other
                    .as_i64()
                    .ok_or_else(|| RuntimeError::type_error("integer", other.type_name()))?
                    .to_string(),
            },
            Some('f') | Some('F') => {
                format!("{:.*}", self.precision.unwrap_or(6), value.expect_number()?)
            }
            Some('e') => format_exponent(value.expect_number()?, self.precision.unwrap_or(6)),
            Some('g') => format_general(value.expect_number()?, self.precision.unwrap_or(6)),
            Some('%') => format!("{:.*}%", self.precision.unwrap_or(6), value.expect_number()? * 100.0),
            Some('r') => value.repr(),
            Some('s') | None => match (self.precision, value) {
                (Some(p), RuntimeValue::Float(f)) if self.kind.is_none() => format_general(*f, p),
                (Some(p), other) => other.to_string().chars().take(p).collect(),
                (None, other) => other.to_string(),
            },
            Some(other) => {
                return Err(RuntimeError::argument(format!("unknown format code '{}'", other)));
            }
        };
        let len = body.chars().count();
        if len >= self.width {
            return Ok(body);
        }
        let pad = self.width - len;
        let fill = self.fill.unwrap_or(' ');
        let default_align = if value.is_number() && self.kind != Some('s') { '>' } else { '<' };
        let padding = |n: usize| std::iter::repeat_n(fill, n).collect::<String>();
        Ok(match self.align.unwrap_or(default_align) {
            '<' => format!("{}{}", body, padding(pad)),
            '^' => format!("{}{}{}", padding(pad / 2), body, padding(pad - pad / 2)),
            _ => format!("{}{}", padding(pad), body),
        })
    }
}

/// `%e` style: mantissa with `precision` decimals and a signed two-digit exponent.
fn format_exponent(x: f64, precision: usize) -> String {
    let text = format!("{:.*e}", precision, x);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => text,
    }
}

/// `%g` style: fixed or exponent notation, trailing zeros removed.
fn format_general(x: f64, precision: usize) -> String {
    if !x.is_finite() {
        return RuntimeValue::Float(x).to_string();
    }
    let p = precision.max(1);
    if x == 0.0 {
        return "0".to_string();
    }
    let exp = x.abs().log10().floor() as i64;
    let strip = |s: String| -> String {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };
    if exp < -4 || exp >= p as i64 {
        let text = format_exponent(x, p - 1);
        match text.split_once('e') {
            Some((mantissa, rest)) => format!("{}e{}", strip(mantissa.to_string()), rest),
            None => text,
        }
    } else {
        let decimals = (p as i64 - 1 - exp).max(0) as usize;
        strip(format!("{:.*}", decimals, x))
    }
}

/// `str.format`: `{}` `{0}` `{name}` fields with optional `:spec`.
pub fn format_template(
    template: &str,
    positional: &[RuntimeValue],
    keyword: &[(String, RuntimeValue)],
) -> Result<String, RuntimeError> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(RuntimeError::argument("single '}' encountered in format string"));
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(RuntimeError::argument(
                                "single '{' encountered in format string",
                            ));
                        }
                    }
                }
                let (key, spec) = match field.split_once(':') {
                    Some((key, spec)) => (key, spec),
                    None => (field.as_str(), ""),
                };
                let value = if key.is_empty() {
                    auto_index += 1;
                    positional.get(auto_index - 1)
                } else if let Ok(i) = key.parse::<usize>() {
                    positional.get(i)
                } else {
                    keyword.iter().find(|(k, _)| k == key).map(|(_, v)| v)
                };
                let value = value.ok_or_else(|| {
                    RuntimeError::IndexError(format!("replacement field '{{{}}}'", field))
                })?;
                out.push_str(&FormatSpec::parse(spec)?.apply(value)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// `template % values` with `%s %d %i %f %e %g %r %%` conversions.
pub fn percent_format(template: &str, values: &RuntimeValue) -> Result<String, RuntimeError> {
    let values: Vec<RuntimeValue> = match values {
        RuntimeValue::Tuple(items) => items.clone(),
        other => vec![other.clone()],
    };
    let mut remaining = values.iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        let mut align = None;
        if chars.peek() == Some(&'-') {
            chars.next();
            align = Some('<');
        }
        loop {
            match chars.next() {
                Some(d) if d.is_ascii_digit() || d == '.' => spec.push(d),
                Some('%') if spec.is_empty() => {
                    out.push('%');
                    break;
                }
                Some(kind) if "sdifeEgGr".contains(kind) => {
                    let value = remaining.next().ok_or_else(|| {
                        RuntimeError::argument("not enough arguments for format string")
                    })?;
                    let mut parsed = FormatSpec::parse(&spec)?;
                    parsed.align = align;
                    parsed.kind = Some(kind.to_ascii_lowercase());
                    out.push_str(&parsed.apply(value)?);
                    break;
                }
                _ => {
                    return Err(RuntimeError::argument(format!(
                        "unsupported format character in '{}'",
                        template
                    )));
                }
            }
        }
    }
    if remaining.next().is_some() {
        return Err(RuntimeError::argument(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(builtin: Builtin, values: Vec<RuntimeValue>) -> RuntimeValue {
        call_builtin(builtin, Arguments::positional(values)).unwrap()
    }

    fn ints(values: &[i64]) -> RuntimeValue {
        RuntimeValue::List(values.iter().map(|n| RuntimeValue::Integer(*n)).collect())
    }

    #[test]
    fn ranges() {
        assert_eq!(call(Builtin::Range, vec![3i64.into()]), ints(&[0, 1, 2]));
        assert_eq!(
            call(Builtin::Range, vec![5i64.into(), 0i64.into(), (-2i64).into()]),
            ints(&[5, 3, 1])
        );
        assert!(call_builtin(Builtin::Range, Arguments::positional(vec![1i64.into(), 2i64.into(), 0i64.into()])).is_err());
    }

    #[test]
    fn aggregates() {
        assert_eq!(call(Builtin::Sum, vec![ints(&[1, 2, 3])]), RuntimeValue::Integer(6));
        assert_eq!(call(Builtin::Max, vec![ints(&[1, 7, 3])]), RuntimeValue::Integer(7));
        assert_eq!(call(Builtin::Min, vec![4i64.into(), 2i64.into()]), RuntimeValue::Integer(2));
        assert!(call_builtin(Builtin::Max, Arguments::positional(vec![ints(&[])])).is_err());
        assert_eq!(call(Builtin::Sorted, vec![ints(&[3, 1, 2])]), ints(&[1, 2, 3]));
    }

    #[test]
    fn zip_and_enumerate_build_tuples() {
        let zipped = call(Builtin::Zip, vec![ints(&[1, 2]), vec!["a", "b", "c"].into()]);
        assert_eq!(zipped.to_string(), "[(1, 'a'), (2, 'b')]");
        let numbered = call(Builtin::Enumerate, vec![vec!["x"].into()]);
        assert_eq!(numbered.to_string(), "[(0, 'x')]");
    }

    #[test]
    fn conversions() {
        assert_eq!(call(Builtin::Int, vec!["42".into()]), RuntimeValue::Integer(42));
        assert_eq!(call(Builtin::Int, vec![2.9.into()]), RuntimeValue::Integer(2));
        assert_eq!(call(Builtin::Round, vec![2.5.into()]), RuntimeValue::Integer(2));
        assert_eq!(call(Builtin::Str, vec![1.5.into()]), RuntimeValue::from("1.5"));
    }

    #[test]
    fn str_format() {
        let text = format_template(
            "x{}_{1} {name:>4} {2:.2f}",
            &[1i64.into(), "b".into(), 3.14159.into()],
            &[("name".to_string(), "ab".into())],
        )
        .unwrap();
        assert_eq!(text, "x1_b   ab 3.14");
        assert!(format_template("{", &[], &[]).is_err());
    }

    #[test]
    fn percent_formatting() {
        let values = RuntimeValue::Tuple(vec!["y".into(), 3i64.into(), 0.5.into()]);
        assert_eq!(percent_format("%s_%d: %g%%", &values).unwrap(), "y_3: 0.5%");
        assert_eq!(percent_format("%.1f", &2.0.into()).unwrap(), "2.0");
        assert!(percent_format("%s %s", &"a".into()).is_err());
    }

    #[test]
    fn general_format_switches_to_exponent() {
        assert_eq!(format_general(1e20, 6), "1e+20");
        assert_eq!(format_general(2.5, 6), "2.5");
        assert_eq!(format_general(123456789.0, 6), "1.23457e+08");
    }

    #[test]
    fn methods() {
        let sep = RuntimeValue::from(",");
        let joined = call_method(&sep, "join", Arguments::positional(vec![vec!["a", "b"].into()]));
        assert_eq!(joined.unwrap(), RuntimeValue::from("a,b"));
        let dict = RuntimeValue::Dict(vec![("k".into(), 1i64.into())]);
        let items = call_method(&dict, "items", Arguments::default()).unwrap();
        assert_eq!(items.to_string(), "[('k', 1)]");
        assert!(call_method(&dict, "append", Arguments::default()).is_err());
    }
}
