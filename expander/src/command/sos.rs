//! Special ordered sets and piecewise-linear functions encoded with binary selectors.

use std::collections::HashSet;

use crate::command::{Command, Invocation};
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::linear::{Operand, Sense};
use crate::model::{Model, VarType};
use crate::runtime_value::RuntimeValue;
use crate::submodel::Submodel;
use crate::symbols::parse_variable_list;

fn selector(prefix: &str, i: usize) -> String {
    format!("{}y_{}", prefix, i)
}

/// At most one of `vars` is nonzero.
pub fn add_sos1(model: &mut Model, vars: &[String], ub: f64, prefix: &str) -> Result<(), RuntimeError> {
    for i in 0..vars.len() {
        model.add_var(Some(&selector(prefix, i)), None, None, VarType::Binary);
    }
    for (i, var) in vars.iter().enumerate() {
        model.add_con(var.as_str(), Sense::Le, (selector(prefix, i), ub))?;
    }
    let selectors: Vec<String> = (0..vars.len()).map(|i| selector(prefix, i)).collect();
    model.add_con(selectors, Sense::Eq, 1.0)?;
    Ok(())
}

/// At most two consecutive members of `vars` are nonzero.
pub fn add_sos2(model: &mut Model, vars: &[String], ub: f64, prefix: &str) -> Result<(), RuntimeError> {
    let n = vars.len();
    if n < 2 {
        return Err(RuntimeError::argument("SOS2 needs at least two variables"));
    }
    for i in 0..n - 1 {
        model.add_var(Some(&selector(prefix, i)), None, None, VarType::Binary);
    }
    for (i, var) in vars.iter().enumerate() {
        let bound = if i == 0 {
            Operand::Term(selector(prefix, 0), ub)
        } else if i == n - 1 {
            Operand::Term(selector(prefix, i - 1), ub)
        } else {
            Operand::Sum(vec![
                Operand::Term(selector(prefix, i - 1), ub),
                Operand::Term(selector(prefix, i), ub),
            ])
        };
        model.add_con(var.as_str(), Sense::Le, bound)?;
    }
    let selectors: Vec<String> = (0..n - 1).map(|i| selector(prefix, i)).collect();
    model.add_con(selectors, Sense::Eq, 1.0)?;
    Ok(())
}

fn variable_names(value: &RuntimeValue) -> Result<Vec<String>, RuntimeError> {
    value
        .iterate()?
        .iter()
        .map(|v| v.expect_str().map(str::to_string))
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SosKind {
    One,
    Two,
}

fn evaluate_sos(
    kind: SosKind,
    command: &str,
    invocation: Invocation<'_>,
    ctx: &mut ExecutionContext,
) -> Result<(), RuntimeError> {
    invocation.forbid_index(command)?;
    let prefix = invocation.prefix;
    let mut args = invocation.arguments.bind(command, &["varl", "ub"], 1)?;
    let vars = variable_names(&args.required("varl")?)?;
    let ub = match args.take("ub") {
        Some(ub) => ub.expect_number()?,
        None => 1.0,
    };

    let mut model = Model::new();
    for var in &vars {
        model.add_var(Some(var), None, None, VarType::Continuous);
    }
    match kind {
        SosKind::One => add_sos1(&mut model, &vars, ub, &prefix)?,
        SosKind::Two => add_sos2(&mut model, &vars, ub, &prefix)?,
    }
    model.rename_cons(|name| format!("{}{}", prefix, name));

    let declared: HashSet<String> = vars.into_iter().collect();
    ctx.model.push_str(&model.to_ampl(&declared));
    Ok(())
}

/// `$SOS1{varl, ub=1};`
#[derive(Debug, Default)]
pub struct Sos1Command;

impl Command for Sos1Command {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        evaluate_sos(SosKind::One, "SOS1", invocation, ctx)
    }

    fn as_submodel(&self) -> Option<&dyn Submodel> {
        Some(self)
    }
}

impl Submodel for Sos1Command {}

/// `$SOS2{varl, ub=1};`
#[derive(Debug, Default)]
pub struct Sos2Command;

impl Command for Sos2Command {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        evaluate_sos(SosKind::Two, "SOS2", invocation, ctx)
    }

    fn as_submodel(&self) -> Option<&dyn Submodel> {
        Some(self)
    }
}

impl Submodel for Sos2Command {}

/// `$PWL[x,y]{points};`: `y = f(x)` for the piecewise-linear `f` through `points`.
#[derive(Debug, Default)]
pub struct PwlCommand;

impl Command for PwlCommand {
    fn evaluate(
        &mut self,
        invocation: Invocation<'_>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let names = parse_variable_list(invocation.require_index("PWL")?)?;
        let [xvar, yvar] = names.as_slice() else {
            return Err(RuntimeError::argument(format!(
                "PWL expects two variables, got {}",
                names.len()
            )));
        };
        let prefix = invocation.prefix;
        let mut args = invocation.arguments.bind("PWL", &["xyvalues"], 1)?;
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for point in args.required("xyvalues")?.iterate()? {
            match point.iterate()?.as_slice() {
                [x, y] => {
                    xs.push(x.expect_number()?);
                    ys.push(y.expect_number()?);
                }
                _ => return Err(RuntimeError::argument("PWL points must be (x, y) pairs")),
            }
        }
        if xs.len() < 2 {
            return Err(RuntimeError::argument("PWL needs at least two points"));
        }
        let bounds = |values: &[f64]| {
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (Some(lo), Some(hi))
        };

        let mut model = Model::new();
        let (xlb, xub) = bounds(&xs);
        model.add_var(Some(xvar), xlb, xub, VarType::Continuous);
        let (ylb, yub) = bounds(&ys);
        model.add_var(Some(yvar), ylb, yub, VarType::Continuous);

        let weights: Vec<String> = (0..xs.len()).map(|i| format!("{}z_{}", prefix, i)).collect();
        for weight in &weights {
            model.add_var(Some(weight), Some(0.0), Some(1.0), VarType::Continuous);
        }
        model.add_con(weights.clone(), Sense::Eq, 1.0)?;
        add_sos2(&mut model, &weights, 1.0, &prefix)?;

        let weighted = |values: &[f64]| -> Vec<Operand> {
            weights
                .iter()
                .zip(values)
                .map(|(w, v)| Operand::Term(w.clone(), *v))
                .collect()
        };
        model.add_con(weighted(&xs), Sense::Eq, xvar.as_str())?;
        model.add_con(weighted(&ys), Sense::Eq, yvar.as_str())?;
        model.rename_cons(|name| format!("{}{}", prefix, name));

        ctx.model.push_str(&model.to_ampl(&HashSet::new()));
        Ok(())
    }

    fn as_submodel(&self) -> Option<&dyn Submodel> {
        Some(self)
    }
}

impl Submodel for PwlCommand {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Arguments;

    fn invoke(command: &mut dyn Command, index: Option<&str>, args: Vec<RuntimeValue>) -> String {
        let mut ctx = ExecutionContext::default();
        command
            .evaluate(
                Invocation {
                    index,
                    arguments: Arguments::positional(args),
                    prefix: "_p_".to_string(),
                },
                &mut ctx,
            )
            .unwrap();
        ctx.model
    }

    #[test]
    fn sos1_selects_one_variable() {
        let text = invoke(&mut Sos1Command, None, vec![vec!["x", "y"].into()]);
        assert_eq!(
            text,
            "var _p_y_0, binary;\n\
             var _p_y_1, binary;\n\
             s.t. _p_c0: -_p_y_0 +x <= 0;\n\
             s.t. _p_c1: -_p_y_1 +y <= 0;\n\
             s.t. _p_c2: +_p_y_0 +_p_y_1 = 1;"
        );
    }

    #[test]
    fn sos2_links_neighbours() {
        let text = invoke(&mut Sos2Command, None, vec![vec!["a", "b", "c"].into(), 5i64.into()]);
        assert!(text.contains("s.t. _p_c0: -5*_p_y_0 +a <= 0;"));
        assert!(text.contains("s.t. _p_c1: -5*_p_y_0 -5*_p_y_1 +b <= 0;"));
        assert!(text.contains("s.t. _p_c2: -5*_p_y_1 +c <= 0;"));
        assert!(!text.contains("var a"));
    }

    #[test]
    fn pwl_declares_bounded_variables() {
        let points = RuntimeValue::List(vec![
            RuntimeValue::Tuple(vec![0i64.into(), 10i64.into()]),
            RuntimeValue::Tuple(vec![2i64.into(), 4i64.into()]),
        ]);
        let text = invoke(&mut PwlCommand, Some("x,y"), vec![points]);
        assert!(text.starts_with("var x, >= 0, <= 2;\nvar y, >= 4, <= 10;\n"));
        assert!(text.contains("var _p_z_0, >= 0, <= 1;"));
        assert!(text.contains("s.t. _p_c0: +_p_z_0 +_p_z_1 = 1;"));
        assert!(text.contains("+2*_p_z_1 -x = 0;"));
        assert!(text.contains("+10*_p_z_0 +4*_p_z_1 -y = 0;"));
    }
}
