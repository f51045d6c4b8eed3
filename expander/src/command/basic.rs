//! Declaration commands: `$SET`, `$PARAM`, `$VAR`, `$CON` and `$STMT`.

use crate::ampl::{declare_constraint, declare_param, declare_set, declare_var};
use crate::command::{Command, Invocation};
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::runtime_value::RuntimeValue;
use crate::symbols::{SymbolName, parse_indexed};

/// `$SET[name]{values};`
pub struct SetCommand;

impl Command for SetCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let name = SymbolName::parse(invocation.require_index("SET")?)?;
        let mut args = invocation.arguments.bind("SET", &["values"], 1)?;
        let values = args.required("values")?.iterate()?;
        let text = declare_set(&mut ctx.symbols, &name, values)?;
        ctx.defs.push_str(&text);
        Ok(())
    }
}

/// `$PARAM[name{I,...}]{values, i0=None};`
pub struct ParamCommand;

impl Command for ParamCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let (name, index_list) = parse_indexed(invocation.require_index("PARAM")?, '{', '}')?;
        let mut args = invocation.arguments.bind("PARAM", &["values", "i0"], 1)?;
        let values = args.required("values")?;
        let i0 = args.take("i0");

        let value = match values {
            RuntimeValue::List(_) => {
                if index_list.as_ref().is_some_and(|list| list.len() != 1) {
                    return Err(RuntimeError::argument(format!(
                        "parameter '{}' built from a list takes exactly one index set",
                        name.name
                    )));
                }
                let start = match i0 {
                    Some(i0) => i0.expect_integer()?,
                    None => 0,
                };
                list_to_dict(&values, start)?
            }
            RuntimeValue::Dict(_) => {
                if i0.is_some() {
                    return Err(RuntimeError::argument("i0 only applies to list values"));
                }
                values
            }
            scalar => {
                if i0.is_some() || index_list.is_some() {
                    return Err(RuntimeError::argument(format!(
                        "scalar parameter '{}' takes neither an index nor i0",
                        name.name
                    )));
                }
                scalar
            }
        };

        let mut index_text = None;
        if let RuntimeValue::Dict(entries) = &value {
            let index_list = index_list.unwrap_or_else(|| {
                vec![SymbolName {
                    name: format!("{}_I", name.name),
                    hidden: false,
                }]
            });
            if let [index] = index_list.as_slice() {
                let keys = entries.iter().map(|(k, _)| k.clone()).collect();
                ctx.defs.push_str(&declare_set(&mut ctx.symbols, index, keys)?);
            } else {
                for (position, index) in index_list.iter().enumerate() {
                    let keys = key_column(entries, position, index_list.len())?;
                    ctx.defs.push_str(&declare_set(&mut ctx.symbols, index, keys)?);
                }
            }
            index_text = Some(
                index_list
                    .iter()
                    .map(|index| index.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        let (defs, data) = declare_param(&mut ctx.symbols, &name, index_text.as_deref(), value)?;
        ctx.defs.push_str(&defs);
        ctx.data.push_str(&data);
        Ok(())
    }
}

/// Keys of a list, starting at `start`; nested lists produce tuple keys.
pub fn list_to_dict(values: &RuntimeValue, start: i64) -> Result<RuntimeValue, RuntimeError> {
    let mut entries = Vec::new();
    flatten_into(values, start, &mut Vec::new(), &mut entries)?;
    Ok(RuntimeValue::Dict(entries))
}

fn flatten_into(
    values: &RuntimeValue,
    start: i64,
    prefix: &mut Vec<RuntimeValue>,
    entries: &mut Vec<(RuntimeValue, RuntimeValue)>,
) -> Result<(), RuntimeError> {
    let RuntimeValue::List(items) = values else {
        return Err(RuntimeError::type_error("list", values.type_name()));
    };
    for (i, item) in items.iter().enumerate() {
        let key = start.checked_add(i as i64).ok_or(RuntimeError::Overflow)?;
        prefix.push(RuntimeValue::Integer(key));
        match item {
            RuntimeValue::List(_) => flatten_into(item, start, prefix, entries)?,
            leaf => {
                let key = match prefix.as_slice() {
                    [single] => single.clone(),
                    many => RuntimeValue::Tuple(many.to_vec()),
                };
                entries.push((key, leaf.clone()));
            }
        }
        prefix.pop();
    }
    Ok(())
}

/// The `position`-th component of every tuple key, without repeats.
fn key_column(
    entries: &[(RuntimeValue, RuntimeValue)],
    position: usize,
    arity: usize,
) -> Result<Vec<RuntimeValue>, RuntimeError> {
    let mut column: Vec<RuntimeValue> = Vec::new();
    for (key, _) in entries {
        let component = match key {
            RuntimeValue::Tuple(parts) if parts.len() == arity => parts[position].clone(),
            other => {
                return Err(RuntimeError::argument(format!(
                    "key {} does not match {} index sets",
                    other.repr(),
                    arity
                )));
            }
        };
        if !column.contains(&component) {
            column.push(component);
        }
    }
    Ok(column)
}

/// `$VAR[name{I}]{typ="", lb=None, ub=None, index_set=None};`
pub struct VarCommand;

impl Command for VarCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let (name, index_list) = parse_indexed(invocation.require_index("VAR")?, '{', '}')?;
        let mut args = invocation
            .arguments
            .bind("VAR", &["typ", "lb", "ub", "index_set"], 0)?;
        let typ = match args.take("typ") {
            Some(typ) => typ.expect_str()?.to_string(),
            None => String::new(),
        };
        let lb = args.take("lb");
        let ub = args.take("ub");
        let index_set = args.take("index_set");

        let mut index = match index_list {
            None => None,
            Some(mut list) if list.len() == 1 => list.pop(),
            Some(_) => {
                return Err(RuntimeError::argument(format!(
                    "variable '{}' takes a single index set",
                    name.name
                )));
            }
        };
        if let Some(ix) = index.as_ref().filter(|ix| !ix.hidden) {
            if index_set.is_none() {
                return Err(RuntimeError::argument(format!(
                    "variable '{}' is indexed over '{}' but no index_set was given",
                    name.name, ix.name
                )));
            }
        }
        if let Some(values) = index_set {
            let ix = index.get_or_insert_with(|| SymbolName {
                name: format!("{}_I", name.name),
                hidden: false,
            });
            let text = declare_set(&mut ctx.symbols, ix, values.iterate()?)?;
            ctx.defs.push_str(&text);
        }

        let index = index.as_ref().map(|ix| ix.name.as_str());
        let text = declare_var(&name, index, &typ, lb.as_ref(), ub.as_ref())?;
        ctx.model.push_str(&text);
        Ok(())
    }
}

/// `$CON[name]{left, sign, right};`
pub struct ConCommand;

impl Command for ConCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let name = SymbolName::parse(invocation.require_index("CON")?)?;
        let mut args = invocation
            .arguments
            .bind("CON", &["left", "sign", "right"], 3)?;
        let left = args.required("left")?;
        let sign = args.required("sign")?;
        let right = args.required("right")?;
        let text = declare_constraint(&name, &left, sign.expect_str()?, &right)?;
        ctx.model.push_str(&text);
        Ok(())
    }
}

/// `$STMT{text};`: raw model text.
pub struct StmtCommand;

impl Command for StmtCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        invocation.forbid_index("STMT")?;
        let mut args = invocation.arguments.bind("STMT", &["statement"], 1)?;
        ctx.model.push_str(&args.required("statement")?.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Arguments;

    fn run(
        command: &mut dyn Command,
        index: Option<&str>,
        arguments: Arguments,
    ) -> Result<ExecutionContext, RuntimeError> {
        let mut ctx = ExecutionContext::default();
        command.evaluate(
            Invocation {
                index,
                arguments,
                prefix: "_t0_".to_string(),
            },
            &mut ctx,
        )?;
        Ok(ctx)
    }

    fn kw(pairs: &[(&str, RuntimeValue)]) -> Vec<(String, RuntimeValue)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn list_param_gets_index_set() {
        let args = Arguments::positional(vec![vec![10i64, 20].into()]);
        let ctx = run(&mut ParamCommand, Some("D"), args).unwrap();
        assert_eq!(ctx.defs, "set D_I := {0,1};param D{D_I};");
        assert_eq!(ctx.data, "param D := [0]10[1]20;");
    }

    #[test]
    fn list_param_with_offset() {
        let args = Arguments {
            positional: vec![vec!["a", "b"].into()],
            keyword: kw(&[("i0", 1i64.into())]),
        };
        let ctx = run(&mut ParamCommand, Some("P{^K}"), args).unwrap();
        assert_eq!(ctx.defs, "param P{K};");
        assert_eq!(ctx.data, "param P := [1]'a'[2]'b';");
    }

    #[test]
    fn nested_lists_use_tuple_keys() {
        let nested = RuntimeValue::List(vec![vec![1i64, 2].into(), vec![3i64, 4].into()]);
        let dict = list_to_dict(&nested, 0).unwrap();
        assert_eq!(dict.to_string(), "{(0, 0): 1, (0, 1): 2, (1, 0): 3, (1, 1): 4}");
    }

    #[test]
    fn two_dimensional_param() {
        let dict = RuntimeValue::Dict(vec![
            (RuntimeValue::Tuple(vec!["a".into(), 1i64.into()]), 5i64.into()),
            (RuntimeValue::Tuple(vec!["b".into(), 1i64.into()]), 6i64.into()),
        ]);
        let ctx = run(&mut ParamCommand, Some("C{I,J}"), Arguments::positional(vec![dict])).unwrap();
        assert_eq!(ctx.defs, "set I := {'a','b'};set J := {1};param C{I,J};");
        assert_eq!(ctx.data, "param C := ['a',1]5['b',1]6;");
    }

    #[test]
    fn scalar_param_rejects_index() {
        let args = Arguments::positional(vec![3i64.into()]);
        assert!(run(&mut ParamCommand, Some("N{I}"), args).is_err());
    }

    #[test]
    fn indexed_var_needs_index_set() {
        let args = Arguments::positional(vec!["integer".into()]);
        assert!(run(&mut VarCommand, Some("x{I}"), args).is_err());

        let args = Arguments {
            positional: vec!["binary".into()],
            keyword: kw(&[("index_set", vec![1i64, 2].into())]),
        };
        let ctx = run(&mut VarCommand, Some("x{I}"), args).unwrap();
        assert_eq!(ctx.defs, "set I := {1,2};");
        assert_eq!(ctx.model, "var x{I}, binary;");
    }

    #[test]
    fn hidden_var_is_not_emitted() {
        let ctx = run(&mut VarCommand, Some("^x"), Arguments::default()).unwrap();
        assert!(ctx.model.is_empty());
    }

    #[test]
    fn stmt_rejects_index() {
        let args = Arguments::positional(vec!["s.t. c: x >= 1;".into()]);
        assert!(run(&mut StmtCommand, Some("c"), args.clone()).is_err());
        assert_eq!(run(&mut StmtCommand, None, args).unwrap().model, "s.t. c: x >= 1;");
    }
}
