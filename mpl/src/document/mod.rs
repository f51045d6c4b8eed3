use std::fmt;
use std::ops::Range;

/// What a region of the model document holds.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionKind {
    /// Plain model text, copied to the output as is.
    Literal,
    /// A quoted string of the model text. Never scanned for `$` constructs.
    StringLiteral,
    /// A `#` line comment or a `/* */` block comment.
    Comment,
    /// `${expr}$`: `expression` is the span of the text between the braces.
    InlineEval { expression: Range<usize> },
    /// `$NAME[index]{body};` with spans of the index and body text (delimiters excluded).
    Command {
        name: String,
        index: Option<Range<usize>>,
        body: Range<usize>,
    },
}

/// A contiguous slice of the model document.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    pub span: Range<usize>,
}

impl Region {
    pub fn new(kind: RegionKind, span: Range<usize>) -> Self {
        Region { kind, span }
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    /// True for inline evaluations and commands.
    pub fn is_evaluated(&self) -> bool {
        matches!(
            self.kind,
            RegionKind::InlineEval { .. } | RegionKind::Command { .. }
        )
    }

    /// Short description used in error messages, e.g. `$SET[A]{...}`.
    pub fn describe(&self, source: &str) -> String {
        match &self.kind {
            RegionKind::InlineEval { .. } => "${...}$".to_string(),
            RegionKind::Command { name, index, .. } => match index {
                Some(index) => format!("${}[{}]{{...}}", name, &source[index.clone()]),
                None => format!("${}{{...}}", name),
            },
            _ => self.text(source).to_string(),
        }
    }
}

/// 1-based line and column of a byte offset.
///
/// Columns count characters from the start of the line.
pub fn line_col(source: &str, offset: usize) -> LineCol {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    let line_start = before.rfind('\n').map(|p| p + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    LineCol { line, column }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCol {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} col {}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let src = "set A;\n  $SET[B]{[1]};";
        assert_eq!(line_col(src, 0), LineCol { line: 1, column: 1 });
        assert_eq!(line_col(src, 9), LineCol { line: 2, column: 3 });
        assert_eq!(line_col(src, 9).to_string(), "line 2 col 3");
    }

    #[test]
    fn describe_command() {
        let src = "$SET[A]{[1]};";
        let region = Region::new(
            RegionKind::Command {
                name: "SET".into(),
                index: Some(5..6),
                body: 8..11,
            },
            0..13,
        );
        assert_eq!(region.describe(src), "$SET[A]{...}");
        assert!(region.is_evaluated());
    }
}
