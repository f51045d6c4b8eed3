//! AMPL text for sets, parameters and variables.

use crate::error::RuntimeError;
use crate::linear::{LinearConstraint, fmt_num};
use crate::runtime_value::RuntimeValue;
use crate::symbols::{Registration, SymbolName, SymbolTable};

/// AMPL literal for a set member or parameter value.
pub fn ampl_repr(value: &RuntimeValue) -> Result<String, RuntimeError> {
    match value {
        RuntimeValue::Integer(n) => Ok(n.to_string()),
        RuntimeValue::Float(f) => Ok(fmt_num(*f)),
        RuntimeValue::Boolean(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        RuntimeValue::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        RuntimeValue::Tuple(items) => {
            let inner = items.iter().map(ampl_repr).collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({})", inner.join(",")))
        }
        other => Err(RuntimeError::type_error(
            "number, string or tuple",
            other.type_name(),
        )),
    }
}

/// `[k]` for scalar keys and `[k1,k2]` for tuple keys.
fn key_repr(key: &RuntimeValue) -> Result<String, RuntimeError> {
    match key {
        RuntimeValue::Tuple(items) => {
            let inner = items.iter().map(ampl_repr).collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", inner.join(",")))
        }
        other => Ok(format!("[{}]", ampl_repr(other)?)),
    }
}

pub fn set_text(name: &str, values: &[RuntimeValue]) -> Result<String, RuntimeError> {
    let members = values.iter().map(ampl_repr).collect::<Result<Vec<_>, _>>()?;
    Ok(format!("set {} := {{{}}};", name, members.join(",")))
}

/// Register a set and return the declaration text to emit (empty when hidden or repeated).
pub fn declare_set(
    symbols: &mut SymbolTable,
    name: &SymbolName,
    values: Vec<RuntimeValue>,
) -> Result<String, RuntimeError> {
    let text = set_text(&name.name, &values)?;
    match symbols.declare_set(name, values)? {
        Registration::Emit => Ok(text),
        Registration::Silent => Ok(String::new()),
    }
}

/// Register a parameter. Returns the model-section declaration and the data-section text.
///
/// Scalars are fully declared in the model section; dictionaries are declared
/// over `index` there and get their values in the data section.
pub fn declare_param(
    symbols: &mut SymbolTable,
    name: &SymbolName,
    index: Option<&str>,
    value: RuntimeValue,
) -> Result<(String, String), RuntimeError> {
    let (defs, data) = match (&value, index) {
        (RuntimeValue::Dict(entries), Some(index)) => {
            let mut data = format!("param {} := ", name.name);
            for (key, val) in entries {
                data.push_str(&key_repr(key)?);
                data.push_str(&ampl_repr(val)?);
            }
            data.push(';');
            (format!("param {}{{{}}};", name.name, index), data)
        }
        (RuntimeValue::Dict(_), None) => {
            return Err(RuntimeError::argument(format!(
                "indexed parameter '{}' needs an index set",
                name.name
            )));
        }
        (scalar, _) => (
            format!("param {} := {};", name.name, ampl_repr(scalar)?),
            String::new(),
        ),
    };
    match symbols.declare_param(name, value)? {
        Registration::Emit => Ok((defs, data)),
        Registration::Silent => Ok((String::new(), String::new())),
    }
}

/// `var x{I}, integer, >= 0, <= 10;`
pub fn var_text(
    name: &str,
    index: Option<&str>,
    typ: &str,
    lb: Option<&RuntimeValue>,
    ub: Option<&RuntimeValue>,
) -> Result<String, RuntimeError> {
    let mut text = format!("var {}", name);
    if let Some(index) = index {
        text.push_str(&format!("{{{}}}", index));
    }
    if !typ.is_empty() {
        text.push_str(&format!(", {}", typ));
    }
    if let Some(lb) = lb {
        text.push_str(&format!(", >= {}", ampl_repr(lb)?));
    }
    if let Some(ub) = ub {
        text.push_str(&format!(", <= {}", ampl_repr(ub)?));
    }
    text.push(';');
    Ok(text)
}

/// Declaration of variable `name`; empty when the name is hidden.
pub fn declare_var(
    name: &SymbolName,
    index: Option<&str>,
    typ: &str,
    lb: Option<&RuntimeValue>,
    ub: Option<&RuntimeValue>,
) -> Result<String, RuntimeError> {
    if name.hidden {
        return Ok(String::new());
    }
    var_text(&name.name, index, typ, lb, ub)
}

/// Normalized `s.t.` statement for `left sign right`.
///
/// A hidden constraint is still validated but produces no text.
pub fn declare_constraint(
    name: &SymbolName,
    left: &RuntimeValue,
    sign: &str,
    right: &RuntimeValue,
) -> Result<String, RuntimeError> {
    let constraint = LinearConstraint::from_runtime(left, sign, right)?;
    if name.hidden {
        return Ok(String::new());
    }
    Ok(constraint.to_ampl(&name.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> SymbolName {
        SymbolName::parse(text).unwrap()
    }

    #[test]
    fn sets() {
        let values = vec![
            RuntimeValue::Tuple(vec![0i64.into(), 0i64.into()]),
            RuntimeValue::Tuple(vec![1i64.into(), 1i64.into()]),
        ];
        assert_eq!(set_text("B", &values).unwrap(), "set B := {(0,0),(1,1)};");
        assert_eq!(set_text("S", &["a".into()]).unwrap(), "set S := {'a'};");
    }

    #[test]
    fn hidden_set_is_registered_but_not_emitted() {
        let mut symbols = SymbolTable::new();
        let text = declare_set(&mut symbols, &name("^C"), vec![1i64.into()]).unwrap();
        assert!(text.is_empty());
        assert!(symbols.set("C").is_some());
    }

    #[test]
    fn params() {
        let mut symbols = SymbolTable::new();
        let (defs, data) = declare_param(&mut symbols, &name("NAME"), None, "name".into()).unwrap();
        assert_eq!(defs, "param NAME := 'name';");
        assert!(data.is_empty());

        let dict = RuntimeValue::Dict(vec![("a".into(), 1i64.into())]);
        let (defs, data) = declare_param(&mut symbols, &name("D"), Some("I"), dict).unwrap();
        assert_eq!(defs, "param D{I};");
        assert_eq!(data, "param D := ['a']1;");
    }

    #[test]
    fn vars() {
        let text = var_text("x", None, "integer", Some(&0i64.into()), Some(&10i64.into())).unwrap();
        assert_eq!(text, "var x, integer, >= 0, <= 10;");
        assert_eq!(var_text("xs", Some("I"), "integer", None, None).unwrap(), "var xs{I}, integer;");
    }

    #[test]
    fn hidden_vars_and_constraints_produce_no_text() {
        let con = declare_constraint(&name("c"), &"x".into(), ">=", &2i64.into()).unwrap();
        assert_eq!(con, "s.t. c: +x >= 2;");
        assert!(declare_constraint(&name("^c"), &"x".into(), ">=", &2i64.into()).unwrap().is_empty());
        assert!(declare_constraint(&name("^c"), &1i64.into(), ">=", &2i64.into()).is_err());
        assert!(declare_var(&name("^w"), None, "binary", None, None).unwrap().is_empty());
    }

    #[test]
    fn lists_are_not_set_members() {
        assert!(ampl_repr(&RuntimeValue::List(vec![])).is_err());
    }
}
