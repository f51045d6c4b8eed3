pub mod error;
pub mod expression;
mod structural;

pub use error::ParseError;
pub use expression::{parse_arguments, parse_expression, parse_instructions};

use crate::Program;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Split the model document into literal, comment, string and `$` regions.
    pub fn parse(&self) -> Result<Program, ParseError> {
        let regions = structural::scan(&self.source, self.file_id)?;
        Ok(Program {
            regions,
            source_id: self.file_id,
        })
    }
}
