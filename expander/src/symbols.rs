use std::collections::BTreeMap;
use std::fmt;

use crate::error::RuntimeError;
use crate::runtime_value::RuntimeValue;

/// Prefix marking a symbol that is registered but never emitted.
pub const HIDDEN_MARKER: char = '^';

/// A validated AMPL symbol name, possibly carrying the hidden marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName {
    pub name: String,
    pub hidden: bool,
}

impl SymbolName {
    /// Parse `name` or `^name`. Names are AMPL identifiers.
    pub fn parse(text: &str) -> Result<Self, RuntimeError> {
        let text = text.trim();
        let (hidden, name) = match text.strip_prefix(HIDDEN_MARKER) {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if !is_identifier(name) {
            return Err(RuntimeError::InvalidName(text.to_string()));
        }
        Ok(SymbolName {
            name: name.to_string(),
            hidden,
        })
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hidden {
            write!(f, "{}", HIDDEN_MARKER)?;
        }
        write!(f, "{}", self.name)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `name` or `name{I,J}` (with `open`/`close` as the index delimiters).
pub fn parse_indexed(
    text: &str,
    open: char,
    close: char,
) -> Result<(SymbolName, Option<Vec<SymbolName>>), RuntimeError> {
    let text = text.trim();
    let Some(start) = text.find(open) else {
        return Ok((SymbolName::parse(text)?, None));
    };
    if !text.ends_with(close) {
        return Err(RuntimeError::InvalidName(text.to_string()));
    }
    let name = SymbolName::parse(&text[..start])?;
    let inner = &text[start + open.len_utf8()..text.len() - close.len_utf8()];
    let index = parse_symbol_list(inner)?;
    if index.is_empty() {
        return Err(RuntimeError::InvalidName(text.to_string()));
    }
    Ok((name, Some(index)))
}

/// Parse a comma separated list of names, e.g. `x,^y`.
pub fn parse_symbol_list(text: &str) -> Result<Vec<SymbolName>, RuntimeError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split(',').map(SymbolName::parse).collect()
}

/// Split `x,y[1,2]` at top-level commas; each part is a name with an optional `[...]` subscript.
pub fn parse_variable_list(text: &str) -> Result<Vec<String>, RuntimeError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::InvalidName(text.to_string()))?;
            }
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);

    parts
        .into_iter()
        .map(|part| {
            let part = part.trim();
            let base = match part.find('[') {
                Some(open) if part.ends_with(']') => &part[..open],
                Some(_) => return Err(RuntimeError::InvalidName(part.to_string())),
                None => part,
            };
            SymbolName::parse(base)?;
            Ok(part.to_string())
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Declaration<T> {
    value: T,
    emitted: bool,
}

/// Outcome of registering a set or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The declaration text must be emitted now.
    Emit,
    /// Already emitted with identical content, or hidden.
    Silent,
}

/// Sets and parameters declared so far in the document.
///
/// Hidden (`^name`) and visible declarations share one namespace: a hidden
/// reference to an existing set must agree with its contents.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    sets: BTreeMap<String, Declaration<Vec<RuntimeValue>>>,
    params: BTreeMap<String, Declaration<RuntimeValue>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn declare_set(
        &mut self,
        name: &SymbolName,
        values: Vec<RuntimeValue>,
    ) -> Result<Registration, RuntimeError> {
        declare(&mut self.sets, name, values, |values| {
            RuntimeValue::List(values.clone()).to_string()
        })
    }

    pub fn declare_param(
        &mut self,
        name: &SymbolName,
        value: RuntimeValue,
    ) -> Result<Registration, RuntimeError> {
        declare(&mut self.params, name, value, |value| value.to_string())
    }

    pub fn set(&self, name: &str) -> Option<&[RuntimeValue]> {
        self.sets.get(name).map(|d| d.value.as_slice())
    }

    pub fn param(&self, name: &str) -> Option<&RuntimeValue> {
        self.params.get(name).map(|d| &d.value)
    }

    /// Read-only snapshot of the sets, as exposed to snippets through `_sets`.
    pub fn sets_view(&self) -> RuntimeValue {
        RuntimeValue::Dict(
            self.sets
                .iter()
                .map(|(k, d)| (RuntimeValue::from(k.as_str()), RuntimeValue::List(d.value.clone())))
                .collect(),
        )
    }

    /// Read-only snapshot of the parameters, as exposed to snippets through `_params`.
    pub fn params_view(&self) -> RuntimeValue {
        RuntimeValue::Dict(
            self.params
                .iter()
                .map(|(k, d)| (RuntimeValue::from(k.as_str()), d.value.clone()))
                .collect(),
        )
    }
}

fn declare<T: PartialEq>(
    table: &mut BTreeMap<String, Declaration<T>>,
    name: &SymbolName,
    value: T,
    describe: impl Fn(&T) -> String,
) -> Result<Registration, RuntimeError> {
    match table.get_mut(&name.name) {
        Some(existing) => {
            if existing.value != value {
                return Err(RuntimeError::DeclarationConflict {
                    name: name.name.clone(),
                    existing: describe(&existing.value),
                    new: describe(&value),
                });
            }
            if !name.hidden && !existing.emitted {
                existing.emitted = true;
                return Ok(Registration::Emit);
            }
            Ok(Registration::Silent)
        }
        None => {
            let emitted = !name.hidden;
            table.insert(name.name.clone(), Declaration { value, emitted });
            Ok(if emitted { Registration::Emit } else { Registration::Silent })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("A", "A", false)]
    #[case("^C", "C", true)]
    #[case(" x_1 ", "x_1", false)]
    fn valid_names(#[case] text: &str, #[case] name: &str, #[case] hidden: bool) {
        let parsed = SymbolName::parse(text).unwrap();
        assert_eq!(parsed.name, name);
        assert_eq!(parsed.hidden, hidden);
    }

    #[rstest]
    #[case("2X")]
    #[case("")]
    #[case("a b")]
    #[case("^^a")]
    fn invalid_names(#[case] text: &str) {
        assert!(matches!(SymbolName::parse(text), Err(RuntimeError::InvalidName(_))));
    }

    #[test]
    fn indexed_names() {
        let (name, index) = parse_indexed("xs{^I, J}", '{', '}').unwrap();
        assert_eq!(name.name, "xs");
        let index = index.unwrap();
        assert_eq!(index.len(), 2);
        assert!(index[0].hidden);
        assert_eq!(index[1].name, "J");
        assert!(parse_indexed("x{", '{', '}').is_err());
        assert!(parse_indexed("x{}", '{', '}').is_err());
    }

    #[test]
    fn redeclaration_rules() {
        let mut table = SymbolTable::new();
        let a = SymbolName::parse("A").unwrap();
        let one = vec![RuntimeValue::Integer(1)];
        assert_eq!(table.declare_set(&a, one.clone()).unwrap(), Registration::Emit);
        assert_eq!(table.declare_set(&a, one.clone()).unwrap(), Registration::Silent);
        let err = table.declare_set(&a, vec![RuntimeValue::Integer(2)]).unwrap_err();
        assert!(matches!(err, RuntimeError::DeclarationConflict { .. }));
    }

    #[test]
    fn hidden_then_visible_emits_once() {
        let mut table = SymbolTable::new();
        let hidden = SymbolName::parse("^I").unwrap();
        let visible = SymbolName::parse("I").unwrap();
        let values = vec![RuntimeValue::Integer(0)];
        assert_eq!(table.declare_set(&hidden, values.clone()).unwrap(), Registration::Silent);
        assert_eq!(table.declare_set(&visible, values.clone()).unwrap(), Registration::Emit);
        assert_eq!(table.declare_set(&visible, values).unwrap(), Registration::Silent);
        assert_eq!(table.set("I").map(|s| s.len()), Some(1));
    }

    #[test]
    fn variable_lists_respect_brackets() {
        assert_eq!(
            parse_variable_list("x[1,2], y").unwrap(),
            vec!["x[1,2]".to_string(), "y".to_string()]
        );
        assert!(parse_variable_list("1x,y").is_err());
    }
}
