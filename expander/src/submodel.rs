use std::fmt;

use crate::linear::LinearConstraint;

/// Solution values by variable name, as supplied by the caller after solving.
pub type ValueLookup<'a> = &'a dyn Fn(&str) -> f64;

/// Lifecycle of a submodel within one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmodelState {
    /// Registered but not invoked by the current document.
    Unconstructed,
    /// Invoked at least once; the document is still being expanded.
    Constructed,
    /// Expansion finished; extract and separate may be called.
    Queryable,
}

impl fmt::Display for SubmodelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmodelState::Unconstructed => write!(f, "not constructed"),
            SubmodelState::Constructed => write!(f, "expansion in progress"),
            SubmodelState::Queryable => write!(f, "queryable"),
        }
    }
}

/// A group of identical paths through a decoded solution.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPath {
    pub count: u64,
    pub labels: Vec<String>,
}

/// The decoded solution of one submodel invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    /// The invocation's main variable (e.g. the bin count or the arc variable).
    pub variable: String,
    pub value: f64,
    pub paths: Vec<DecodedPath>,
}

/// A lazily computed sequence of decoded solutions, one per invocation.
pub struct Extraction<'a> {
    inner: Box<dyn Iterator<Item = Decoded> + 'a>,
}

impl<'a> Extraction<'a> {
    pub fn new(iter: impl Iterator<Item = Decoded> + 'a) -> Self {
        Extraction {
            inner: Box::new(iter),
        }
    }

    pub fn empty() -> Self {
        Extraction::new(std::iter::empty())
    }
}

impl Iterator for Extraction<'_> {
    type Item = Decoded;

    fn next(&mut self) -> Option<Decoded> {
        self.inner.next()
    }
}

/// Post-solve queries offered by generator commands.
pub trait Submodel {
    /// Decode a solution of the generated model.
    fn extract<'a>(&'a self, _values: ValueLookup<'a>) -> Extraction<'a> {
        Extraction::empty()
    }

    /// Constraints violated by the given (possibly fractional) solution.
    fn separate(&self, _values: ValueLookup<'_>) -> Vec<LinearConstraint> {
        Vec::new()
    }
}
