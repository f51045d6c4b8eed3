use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    /// Arithmetic negation: -x
    Negation,
    /// Unary plus: +x
    Identity,
    /// Logical not: not x
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    FloorDivision,
    Modulo,
    Power,
    LogicalAnd,
    LogicalOr,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Membership,
    NonMembership,
}

/// Left-hand side of an assignment or loop variable of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

/// `for target in iterable [if condition]`
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Target,
    pub iterable: Box<Value>,
    pub condition: Option<Box<Value>>,
}

#[derive(Debug, Clone)]
pub enum Argument {
    Positional(Value),
    Keyword(String, Value),
}

/// An expression AST node of the snippet language.
#[derive(Debug, Clone)]
pub enum Value {
    // Literals
    IntegerLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    NoneLiteral,

    // References
    VariableReference(String, Range<usize>),

    // Displays
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    ListComprehension {
        element: Box<Value>,
        clauses: Vec<Comprehension>,
    },
    DictComprehension {
        key: Box<Value>,
        value: Box<Value>,
        clauses: Vec<Comprehension>,
    },

    // Operations
    UnaryOperation {
        operator: UnaryOperator,
        operand: Box<Value>,
    },
    BinaryOperation {
        operator: BinaryOperator,
        left: Box<Value>,
        right: Box<Value>,
    },
    /// `true_branch if condition else false_branch`
    Conditional {
        condition: Box<Value>,
        true_branch: Box<Value>,
        false_branch: Box<Value>,
    },

    // Postfix
    Call {
        callee: Box<Value>,
        arguments: Vec<Argument>,
        span: Range<usize>,
    },
    Subscript {
        value: Box<Value>,
        index: Box<Value>,
        span: Range<usize>,
    },
    Attribute {
        value: Box<Value>,
        name: String,
        span: Range<usize>,
    },
}
