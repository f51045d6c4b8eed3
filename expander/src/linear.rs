use std::collections::BTreeMap;
use std::fmt;

use crate::error::RuntimeError;
use crate::runtime_value::RuntimeValue;
use crate::symbols::HIDDEN_MARKER;

const ZERO_TOLERANCE: f64 = 1e-12;

/// One side of a constraint as written by the user.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Constant(f64),
    Variable(String),
    /// `(name, coef)` or `(coef, name)`.
    Term(String, f64),
    /// `(a, b)` with both numeric: the constant `a * b`.
    Product(f64, f64),
    /// A sequence of entries, summed.
    Sum(Vec<Operand>),
}

impl Operand {
    /// Interpret a snippet value: numbers, variable names, 2-tuples and lists of those.
    pub fn from_runtime(value: &RuntimeValue) -> Result<Self, RuntimeError> {
        match value {
            RuntimeValue::List(items) => items
                .iter()
                .map(Operand::entry)
                .collect::<Result<Vec<_>, _>>()
                .map(Operand::Sum),
            other => Operand::entry(other),
        }
    }

    fn entry(value: &RuntimeValue) -> Result<Self, RuntimeError> {
        match value {
            RuntimeValue::String(name) => Ok(Operand::Variable(name.clone())),
            RuntimeValue::Tuple(pair) if pair.len() == 2 => match (&pair[0], &pair[1]) {
                (RuntimeValue::String(name), coef) | (coef, RuntimeValue::String(name)) => {
                    Ok(Operand::Term(name.clone(), coef.expect_number()?))
                }
                (a, b) => Ok(Operand::Product(a.expect_number()?, b.expect_number()?)),
            },
            v if v.is_number() => Ok(Operand::Constant(v.expect_number()?)),
            other => Err(RuntimeError::type_error(
                "number, variable name or (variable, coefficient) pair",
                other.type_name(),
            )),
        }
    }

    /// Accumulate `signal * self` into `expr`.
    fn accumulate(&self, expr: &mut LinearExpr, signal: f64) {
        match self {
            Operand::Constant(c) => expr.constant += signal * c,
            Operand::Product(a, b) => expr.constant += signal * a * b,
            Operand::Variable(name) => expr.add_term(name, signal),
            Operand::Term(name, coef) => expr.add_term(name, signal * coef),
            Operand::Sum(items) => {
                for item in items {
                    item.accumulate(expr, signal);
                }
            }
        }
    }
}

impl From<&str> for Operand {
    fn from(name: &str) -> Self {
        Operand::Variable(name.to_string())
    }
}

impl From<String> for Operand {
    fn from(name: String) -> Self {
        Operand::Variable(name)
    }
}

impl From<f64> for Operand {
    fn from(c: f64) -> Self {
        Operand::Constant(c)
    }
}

impl From<(String, f64)> for Operand {
    fn from((name, coef): (String, f64)) -> Self {
        Operand::Term(name, coef)
    }
}

impl From<(&str, f64)> for Operand {
    fn from((name, coef): (&str, f64)) -> Self {
        Operand::Term(name.to_string(), coef)
    }
}

impl<T: Into<Operand>> From<Vec<T>> for Operand {
    fn from(items: Vec<T>) -> Self {
        Operand::Sum(items.into_iter().map(Into::into).collect())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinearExpr {
    pub terms: BTreeMap<String, f64>,
    pub constant: f64,
}

impl LinearExpr {
    fn add_term(&mut self, name: &str, coef: f64) {
        let name = name.trim_start_matches(HIDDEN_MARKER);
        *self.terms.entry(name.to_string()).or_insert(0.0) += coef;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl Sense {
    pub fn parse(sign: &str) -> Result<Self, RuntimeError> {
        match sign.trim() {
            "<" | "<=" | "=<" => Ok(Sense::Le),
            ">" | ">=" | "=>" => Ok(Sense::Ge),
            "=" | "==" => Ok(Sense::Eq),
            other => Err(RuntimeError::argument(format!(
                "invalid constraint sign '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sense::Le => "<=",
            Sense::Ge => ">=",
            Sense::Eq => "=",
        }
    }
}

impl fmt::Display for Sense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `sum(coef * var) sense rhs`, variables in lexicographic order.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearConstraint {
    pub terms: BTreeMap<String, f64>,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    /// Normalize `left sense right`: variables move left, constants move right.
    ///
    /// Zero coefficients are dropped unless every variable cancels out, in
    /// which case the variables stay with coefficient zero. A constraint that
    /// names no variable at all is an error.
    pub fn new(left: &Operand, sense: Sense, right: &Operand) -> Result<Self, RuntimeError> {
        let mut expr = LinearExpr::default();
        left.accumulate(&mut expr, 1.0);
        right.accumulate(&mut expr, -1.0);
        if expr.terms.is_empty() {
            return Err(RuntimeError::argument(
                "constraint needs at least one variable",
            ));
        }
        if expr.terms.values().any(|c| c.abs() > ZERO_TOLERANCE) {
            expr.terms.retain(|_, c| c.abs() > ZERO_TOLERANCE);
        } else {
            expr.terms.values_mut().for_each(|c| *c = 0.0);
        }
        Ok(LinearConstraint {
            terms: expr.terms,
            sense,
            rhs: -expr.constant,
        })
    }

    pub fn from_runtime(
        left: &RuntimeValue,
        sign: &str,
        right: &RuntimeValue,
    ) -> Result<Self, RuntimeError> {
        LinearConstraint::new(
            &Operand::from_runtime(left)?,
            Sense::parse(sign)?,
            &Operand::from_runtime(right)?,
        )
    }

    /// Left-hand side value under the given variable assignment.
    pub fn lhs_value(&self, values: &dyn Fn(&str) -> f64) -> f64 {
        self.terms.iter().map(|(name, coef)| coef * values(name)).sum()
    }

    pub fn is_violated(&self, values: &dyn Fn(&str) -> f64, tolerance: f64) -> bool {
        let lhs = self.lhs_value(values);
        match self.sense {
            Sense::Le => lhs > self.rhs + tolerance,
            Sense::Ge => lhs < self.rhs - tolerance,
            Sense::Eq => (lhs - self.rhs).abs() > tolerance,
        }
    }

    pub fn rename(&mut self, rename: &dyn Fn(&str) -> String) {
        self.terms = std::mem::take(&mut self.terms)
            .into_iter()
            .map(|(name, coef)| (rename(&name), coef))
            .collect();
    }

    /// ` +5*x1 -x2` form of the left-hand side.
    pub fn lhs_string(&self) -> String {
        format_lincomb(&self.terms)
    }

    /// `s.t. name: +5*x1 >= 20;`
    pub fn to_ampl(&self, name: &str) -> String {
        format!("s.t. {}:{} {} {};", name, self.lhs_string(), self.sense, fmt_num(self.rhs))
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs_string().trim_start(), self.sense, fmt_num(self.rhs))
    }
}

pub fn format_lincomb(terms: &BTreeMap<String, f64>) -> String {
    let mut out = String::new();
    for (name, coef) in terms {
        let name = name.trim_start_matches(HIDDEN_MARKER);
        let sign = if *coef >= 0.0 { '+' } else { '-' };
        if coef.abs() == 1.0 {
            out.push_str(&format!(" {}{}", sign, name));
        } else {
            out.push_str(&format!(" {}{}*{}", sign, fmt_num(coef.abs()), name));
        }
    }
    out
}

/// Integral values print without a fractional part.
pub fn fmt_num(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}
