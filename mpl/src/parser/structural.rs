use std::ops::Range;

use crate::document::{Region, RegionKind};
use crate::parser::error::ParseError;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Split a model document into regions.
///
/// Quoted strings and comments are recognized first so that a `$` inside
/// them is never treated as a command. Everything between recognized
/// regions is emitted as `Literal`.
pub fn scan(source: &str, file_id: usize) -> Result<Vec<Region>, ParseError> {
    let mut scanner = Scanner::new(source, file_id);
    scanner.run()?;
    Ok(scanner.regions)
}

// ---------------------------------------------------------------------------
// Scanner state
// ---------------------------------------------------------------------------

struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    file_id: usize,
    pos: usize,
    /// Start of the literal text not yet emitted.
    literal_start: usize,
    regions: Vec<Region>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str, file_id: usize) -> Self {
        Scanner {
            source,
            bytes: source.as_bytes(),
            file_id,
            pos: 0,
            literal_start: 0,
            regions: Vec::new(),
        }
    }

    fn peek_at(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    fn error(&self, msg: impl Into<String>, span: Range<usize>) -> ParseError {
        ParseError::error(msg, span, self.file_id)
    }

    fn run(&mut self) -> Result<(), ParseError> {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let found = match self.bytes[start] {
                b'"' | b'\'' => self
                    .string_end(start)
                    .map(|end| (RegionKind::StringLiteral, end)),
                b'#' => Some((RegionKind::Comment, self.line_comment_end(start))),
                b'/' if self.peek_at(start + 1) == Some(b'*') => self
                    .block_comment_end(start)
                    .map(|end| (RegionKind::Comment, end)),
                b'$' => self.command(start)?,
                _ => None,
            };

            match found {
                Some((kind, end)) => {
                    self.flush_literal(start);
                    self.regions.push(Region::new(kind, start..end));
                    self.pos = end;
                    self.literal_start = end;
                }
                None => self.pos += 1,
            }
        }
        self.flush_literal(self.bytes.len());
        Ok(())
    }

    fn flush_literal(&mut self, end: usize) {
        if end > self.literal_start {
            self.regions
                .push(Region::new(RegionKind::Literal, self.literal_start..end));
        }
    }

    // ------------------------------------------------------------------
    // Strings and comments
    // ------------------------------------------------------------------

    /// End offset (exclusive) of the quoted string opening at `start`.
    /// `None` when the closing quote is missing.
    fn string_end(&self, start: usize) -> Option<usize> {
        let quote = self.bytes[start];
        let mut i = start + 1;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'\\' => i += 2,
                b if b == quote => return Some(i + 1),
                _ => i += 1,
            }
        }
        None
    }

    fn line_comment_end(&self, start: usize) -> usize {
        self.source[start..]
            .find('\n')
            .map(|p| start + p)
            .unwrap_or(self.bytes.len())
    }

    fn block_comment_end(&self, start: usize) -> Option<usize> {
        self.source[start + 2..].find("*/").map(|p| start + 2 + p + 2)
    }

    // ------------------------------------------------------------------
    // `$` constructs
    // ------------------------------------------------------------------

    fn skip_whitespace(&self, mut pos: usize) -> usize {
        while pos < self.bytes.len() && self.bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        pos
    }

    /// Recognize `${expr}$` or `$NAME[index]{body};` at `start`.
    /// Returns `Ok(None)` when the `$` does not begin a construct.
    fn command(&self, start: usize) -> Result<Option<(RegionKind, usize)>, ParseError> {
        let mut i = start + 1;

        if self.peek_at(i) == Some(b'{') {
            let close = self.matching_close(start, i)?;
            if self.peek_at(close + 1) != Some(b'$') {
                return Err(self
                    .error("expected `$` after inline expression", start..close + 1)
                    .with_note("inline expressions are written as ${expr}$"));
            }
            let kind = RegionKind::InlineEval {
                expression: i + 1..close,
            };
            return Ok(Some((kind, close + 2)));
        }

        if !self.peek_at(i).is_some_and(is_ident_start) {
            return Ok(None);
        }
        let name_start = i;
        while self.peek_at(i).is_some_and(is_ident_continue) {
            i += 1;
        }
        let name = self.source[name_start..i].to_string();

        let mut next = self.skip_whitespace(i);
        let mut index = None;
        if self.peek_at(next) == Some(b'[') {
            let close = self.matching_close(start, next)?;
            index = Some(next + 1..close);
            next = self.skip_whitespace(close + 1);
        }

        if self.peek_at(next) != Some(b'{') {
            if index.is_some() {
                return Err(self.error(
                    format!("expected `{{` after `${}[...]`", name),
                    start..next,
                ));
            }
            return Ok(None);
        }

        let close = self.matching_close(start, next)?;
        let body = next + 1..close;
        let end = self.skip_whitespace(close + 1);
        if self.peek_at(end) != Some(b';') {
            return Err(self
                .error(format!("expected `;` after `${}` command body", name), start..close + 1)
                .with_note("commands are written as $NAME[index]{arguments};"));
        }

        Ok(Some((RegionKind::Command { name, index, body }, end + 1)))
    }

    /// Offset of the delimiter closing the one at `open`.
    ///
    /// Every closer must match the innermost open bracket. Quoted strings
    /// and `#` comments inside the construct are skipped.
    fn matching_close(&self, construct_start: usize, open: usize) -> Result<usize, ParseError> {
        let mut expected: Vec<u8> = Vec::new();
        let mut i = open;
        while i < self.bytes.len() {
            match self.bytes[i] {
                b'(' => expected.push(b')'),
                b'[' => expected.push(b']'),
                b'{' => expected.push(b'}'),
                closer @ (b')' | b']' | b'}') => {
                    let wanted = expected.pop().unwrap_or(closer);
                    if closer != wanted {
                        return Err(self
                            .error(
                                format!(
                                    "mismatched `{}`: expected `{}`",
                                    closer as char, wanted as char
                                ),
                                construct_start..i + 1,
                            )
                            .with_note("brackets inside a `$` construct must be balanced"));
                    }
                    if expected.is_empty() {
                        return Ok(i);
                    }
                }
                b'"' | b'\'' => match self.string_end(i) {
                    Some(end) => {
                        i = end;
                        continue;
                    }
                    None => break,
                },
                b'#' => {
                    i = self.line_comment_end(i);
                    continue;
                }
                _ => {}
            }
            i += 1;
        }

        let closer = expected.first().copied().unwrap_or(b'}');
        Err(self.error(
            format!("unterminated `$` construct: missing closing `{}`", closer as char),
            construct_start..self.bytes.len(),
        ))
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn kinds(source: &str) -> Vec<RegionKind> {
        scan(source, 0).unwrap().into_iter().map(|r| r.kind).collect()
    }

    #[test]
    fn plain_text_is_one_literal() {
        assert_eq!(kinds("var x >= 0;\n"), vec![RegionKind::Literal]);
        assert!(scan("", 0).unwrap().is_empty());
    }

    #[test]
    fn regions_cover_source() {
        let src = "set I; # note\n$SET[A]{range(3)}; s.t. c: x >= ${1+1}$; 'a$b' /* $X{1}; */";
        let regions = scan(src, 0).unwrap();
        let mut rebuilt = String::new();
        for r in &regions {
            rebuilt.push_str(r.text(src));
        }
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn command_with_index() {
        let src = "$SET[A]{range(5)};";
        let regions = scan(src, 0).unwrap();
        assert_eq!(regions.len(), 1);
        match &regions[0].kind {
            RegionKind::Command { name, index, body } => {
                assert_eq!(name, "SET");
                assert_eq!(&src[index.clone().unwrap()], "A");
                assert_eq!(&src[body.clone()], "range(5)");
            }
            other => panic!("unexpected region {:?}", other),
        }
    }

    #[test]
    fn nested_braces_in_body_and_index() {
        let src = "$PARAM[D{I}]{{'a': 1}};";
        let regions = scan(src, 0).unwrap();
        match &regions[0].kind {
            RegionKind::Command { index, body, .. } => {
                assert_eq!(&src[index.clone().unwrap()], "D{I}");
                assert_eq!(&src[body.clone()], "{'a': 1}");
            }
            other => panic!("unexpected region {:?}", other),
        }
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let src = "$STMT{\"s.t. c{i in I}: x[i] <= 1;\"};";
        let regions = scan(src, 0).unwrap();
        assert_eq!(regions.len(), 1);
        assert!(matches!(regions[0].kind, RegionKind::Command { .. }));
    }

    #[test]
    fn inline_eval() {
        let src = "x <= ${abs(-3)}$;";
        let regions = scan(src, 0).unwrap();
        assert_eq!(regions.len(), 3);
        match &regions[1].kind {
            RegionKind::InlineEval { expression } => assert_eq!(&src[expression.clone()], "abs(-3)"),
            other => panic!("unexpected region {:?}", other),
        }
        assert_eq!(regions[2].text(src), ";");
    }

    #[test]
    fn dollar_in_strings_and_comments_is_literal() {
        assert_eq!(
            kinds("'$SET[A]{1};'"),
            vec![RegionKind::StringLiteral]
        );
        assert_eq!(kinds("# $SET[A]{1};"), vec![RegionKind::Comment]);
        assert_eq!(kinds("/* $SET[A]{1}; */"), vec![RegionKind::Comment]);
    }

    #[test]
    fn stray_dollar_is_literal() {
        assert_eq!(kinds("a $ b $5 $x c"), vec![RegionKind::Literal]);
    }

    #[test]
    fn unterminated_constructs_fail() {
        let err = scan("set A;\n$SET[A]{range(3);", 0).unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.span.start, 7);
        assert!(scan("${1+1}", 0).is_err());
        assert!(scan("$SET[A]{1}", 0).is_err());
    }

    #[rstest]
    #[case("$X{(]};", "mismatched `]`: expected `)`")]
    #[case("$SET[A]{[1, 2)};", "mismatched `)`: expected `]`")]
    #[case("$PARAM[D{I]]{1};", "mismatched `]`: expected `}`")]
    #[case("x <= ${(1 + 2}$;", "mismatched `}`: expected `)`")]
    fn mismatched_brackets_fail(#[case] src: &str, #[case] message: &str) {
        let err = scan(src, 0).unwrap_err();
        assert_eq!(err.message, message);
        assert_eq!(err.span.start, src.find('$').unwrap());
    }

    #[test]
    fn closers_inside_strings_do_not_count() {
        assert!(scan("$STMT{\"param p := ]);\"};", 0).is_ok());
        assert!(scan("$EXEC{x = ('}', [1]) # )\n};", 0).is_ok());
    }

    #[test]
    fn unterminated_string_and_comment_are_literal() {
        assert_eq!(kinds("'abc"), vec![RegionKind::Literal]);
        assert_eq!(kinds("/* abc"), vec![RegionKind::Literal]);
    }
}
