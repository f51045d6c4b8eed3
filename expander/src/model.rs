use std::collections::HashSet;

use crate::error::RuntimeError;
use crate::linear::{LinearConstraint, Operand, Sense, fmt_num};
use crate::symbols::HIDDEN_MARKER;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarType {
    Continuous,
    Integer,
    Binary,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDef {
    pub name: String,
    pub lb: Option<f64>,
    pub ub: Option<f64>,
    pub vtype: VarType,
}

impl VarDef {
    fn to_ampl(&self) -> String {
        let mut text = format!("var {}", self.name);
        match self.vtype {
            VarType::Binary => return text + ", binary;",
            VarType::Integer => text.push_str(", integer"),
            VarType::Continuous => {}
        }
        if let Some(lb) = self.lb {
            text.push_str(&format!(", >= {}", fmt_num(lb)));
        }
        if let Some(ub) = self.ub {
            text.push_str(&format!(", <= {}", fmt_num(ub)));
        }
        text.push(';');
        text
    }
}

/// A small linear model built by generator commands before it is written as AMPL.
#[derive(Clone, Debug, Default)]
pub struct Model {
    vars: Vec<VarDef>,
    cons: Vec<(String, LinearConstraint)>,
}

impl Model {
    pub fn new() -> Self {
        Model::default()
    }

    /// Add a variable; unnamed variables get `x<n>`. Returns the name.
    pub fn add_var(
        &mut self,
        name: Option<&str>,
        lb: Option<f64>,
        ub: Option<f64>,
        vtype: VarType,
    ) -> String {
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("x{}", self.vars.len()),
        };
        self.vars.push(VarDef {
            name: name.clone(),
            lb,
            ub,
            vtype,
        });
        name
    }

    /// Add `left sign right`, named `c<n>`. Returns the name.
    pub fn add_con(
        &mut self,
        left: impl Into<Operand>,
        sign: Sense,
        right: impl Into<Operand>,
    ) -> Result<String, RuntimeError> {
        let constraint = LinearConstraint::new(&left.into(), sign, &right.into())?;
        let name = format!("c{}", self.cons.len());
        self.cons.push((name.clone(), constraint));
        Ok(name)
    }

    pub fn vars(&self) -> &[VarDef] {
        &self.vars
    }

    pub fn cons(&self) -> &[(String, LinearConstraint)] {
        &self.cons
    }

    /// Rename variables everywhere they appear.
    pub fn rename_vars(&mut self, rename: impl Fn(&str) -> String) {
        for var in &mut self.vars {
            var.name = rename(&var.name);
        }
        for (_, con) in &mut self.cons {
            con.rename(&rename);
        }
    }

    pub fn rename_cons(&mut self, rename: impl Fn(&str) -> String) {
        for (name, _) in &mut self.cons {
            *name = rename(name);
        }
    }

    /// AMPL declarations of the model, one statement per line.
    ///
    /// Variables in `declared`, hidden variables and subscripted names such
    /// as `x[1]` are assumed to be declared elsewhere.
    pub fn to_ampl(&self, declared: &HashSet<String>) -> String {
        let mut lines = Vec::new();
        for var in &self.vars {
            if declared.contains(&var.name)
                || var.name.starts_with(HIDDEN_MARKER)
                || var.name.contains('[')
            {
                continue;
            }
            lines.push(var.to_ampl());
        }
        for (name, con) in &self.cons {
            lines.push(con.to_ampl(name));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_declarations_and_constraints() {
        let mut model = Model::new();
        model.add_var(Some("x"), Some(0.0), Some(10.0), VarType::Integer);
        model.add_var(Some("y"), None, None, VarType::Binary);
        model.add_var(Some("^h"), None, None, VarType::Continuous);
        model.add_con(vec!["x", "y"], Sense::Le, ("y", 5.0)).unwrap();
        model.rename_cons(|name| format!("_p0_{}", name));

        let declared = HashSet::new();
        assert_eq!(
            model.to_ampl(&declared),
            "var x, integer, >= 0, <= 10;\nvar y, binary;\ns.t. _p0_c0: +x -4*y <= 0;"
        );
    }

    #[test]
    fn renaming_vars_updates_constraints() {
        let mut model = Model::new();
        model.add_var(Some("f"), Some(0.0), None, VarType::Continuous);
        model.add_con("f", Sense::Eq, 1.0).unwrap();
        model.rename_vars(|name| format!("p_{}", name));
        let text = model.to_ampl(&HashSet::new());
        assert!(text.contains("var p_f, >= 0;"));
        assert!(text.contains("s.t. c0: +p_f = 1;"));
    }
}
