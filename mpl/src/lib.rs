pub mod document;
pub mod instruction;
pub mod parser;

use crate::document::Region;

/// A scanned model document: the ordered regions covering its source text.
#[derive(Debug, Clone)]
pub struct Program {
    /// Regions in source order. Concatenating their spans reproduces the source.
    pub regions: Vec<Region>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

impl Program {
    /// Regions that carry a `$...` construct to be expanded.
    pub fn evaluated_regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(|r| r.is_evaluated())
    }
}
