pub mod value;

use std::ops::Range;

use crate::instruction::value::{Target, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssignOperator {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Subtract,
    /// `*=`
    Multiply,
}

/// A single statement of an `$EXEC{...};` body.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Variable assignment: `target op expression`
    Assignment {
        target: Target,
        operator: AssignOperator,
        value: Value,
        span: Range<usize>,
    },
    /// Expression evaluation (side effects only, result discarded).
    Expression {
        value: Value,
        span: Range<usize>,
    },
}

impl Instruction {
    pub fn span(&self) -> &Range<usize> {
        match self {
            Instruction::Assignment { span, .. } => span,
            Instruction::Expression { span, .. } => span,
        }
    }
}
