use std::ops::Range;

use crate::instruction::value::{
    Argument, BinaryOperator, Comprehension, Target, UnaryOperator, Value,
};
use crate::instruction::{AssignOperator, Instruction};
use crate::parser::error::ParseError;

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    StringLit(String),
    True,
    False,
    NoneKw,

    Ident(String),

    // Keywords
    And,
    Or,
    Not,
    In,
    If,
    Else,
    For,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Eq,      // =
    EqEq,    // ==
    BangEq,  // !=
    Gt,
    Lt,
    GtEq,
    LtEq,
    PlusEq,  // +=
    MinusEq, // -=
    StarEq,  // *=
    Comma,
    Colon,
    Dot,

    // Grouping
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Statement separators (only produced when tokenizing statements)
    Newline,
    Semicolon,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    span: Range<usize>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse the text of an inline evaluation `${...}$`.
///
/// `base_offset` is the byte offset of `source` within the model document.
pub fn parse_expression(
    source: &str,
    base_offset: usize,
    file_id: usize,
) -> Result<Value, ParseError> {
    let tokens = tokenize(source, base_offset, file_id, false)?;
    let mut parser = ExprParser::new(tokens, base_offset..base_offset + source.len(), file_id);
    let value = parser.parse_tuple_or_expr()?;
    if !parser.at_end() {
        return Err(parser.error("unexpected tokens after expression"));
    }
    Ok(value)
}

/// Parse a command body `{...}` as a call argument list.
pub fn parse_arguments(
    source: &str,
    base_offset: usize,
    file_id: usize,
) -> Result<Vec<Argument>, ParseError> {
    let tokens = tokenize(source, base_offset, file_id, false)?;
    let mut parser = ExprParser::new(tokens, base_offset..base_offset + source.len(), file_id);
    let arguments = parser.parse_argument_list(None)?;
    if !parser.at_end() {
        return Err(parser.error("unexpected tokens after arguments"));
    }
    Ok(arguments)
}

/// Parse the statements of an `$EXEC{...};` body.
pub fn parse_instructions(
    source: &str,
    base_offset: usize,
    file_id: usize,
) -> Result<Vec<Instruction>, ParseError> {
    let tokens = tokenize(source, base_offset, file_id, true)?;
    let mut parser = ExprParser::new(tokens, base_offset..base_offset + source.len(), file_id);
    let mut instructions = Vec::new();

    loop {
        parser.skip_separators();
        if parser.at_end() {
            break;
        }
        instructions.push(parser.parse_instruction()?);
        if !(parser.at_end() || parser.check(&Token::Newline) || parser.check(&Token::Semicolon)) {
            return Err(parser.error("unexpected tokens after statement"));
        }
    }

    Ok(instructions)
}

// ---------------------------------------------------------------------------
// Text tokenizer: raw text string → Token stream
// ---------------------------------------------------------------------------

fn tokenize(
    text: &str,
    base_offset: usize,
    file_id: usize,
    statements: bool,
) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    // Map character indices to byte offsets within the text
    let byte_pos: Vec<usize> = {
        let mut bp = Vec::with_capacity(len + 1);
        let mut offset = 0;
        for c in &chars {
            bp.push(offset);
            offset += c.len_utf8();
        }
        bp.push(offset);
        bp
    };
    let span_of = |start: usize, end: usize| base_offset + byte_pos[start]..base_offset + byte_pos[end];

    while i < len {
        let c = chars[i];
        let start = i;
        let token = match c {
            ' ' | '\t' | '\r' => {
                i += 1;
                continue;
            }
            '\n' => {
                i += 1;
                let last_is_separator = matches!(
                    tokens.last(),
                    None | Some(Spanned { token: Token::Newline | Token::Semicolon, .. })
                );
                if statements && depth == 0 && !last_is_separator {
                    Token::Newline
                } else {
                    continue;
                }
            }
            '\\' if i + 1 < len && chars[i + 1] == '\n' => {
                i += 2;
                continue;
            }
            '#' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }

            // String literal
            '"' | '\'' => {
                i += 1;
                let mut s = String::new();
                let mut closed = false;
                while i < len {
                    let ch = chars[i];
                    if ch == c {
                        closed = true;
                        i += 1;
                        break;
                    }
                    if ch == '\\' && i + 1 < len {
                        let escaped = chars[i + 1];
                        match escaped {
                            'n' => s.push('\n'),
                            't' => s.push('\t'),
                            'r' => s.push('\r'),
                            '0' => s.push('\0'),
                            '\\' | '\'' | '"' => s.push(escaped),
                            '\n' => {}
                            other => {
                                s.push('\\');
                                s.push(other);
                            }
                        }
                        i += 2;
                        continue;
                    }
                    s.push(ch);
                    i += 1;
                }
                if !closed {
                    return Err(ParseError::error(
                        "unterminated string literal",
                        span_of(start, len),
                        file_id,
                    ));
                }
                Token::StringLit(s)
            }

            // Numbers
            '0'..='9' => lex_number(&chars, &mut i, file_id, &span_of)?,
            '.' if i + 1 < len && chars[i + 1].is_ascii_digit() => {
                lex_number(&chars, &mut i, file_id, &span_of)?
            }

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => {
                while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "True" => Token::True,
                    "False" => Token::False,
                    "None" => Token::NoneKw,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "for" => Token::For,
                    _ => Token::Ident(ident),
                }
            }

            // Operators that may be followed by `=` or doubled
            '+' | '-' | '*' | '/' | '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('*', Some('*')) => (Token::StarStar, 2),
                    ('/', Some('/')) => (Token::SlashSlash, 2),
                    ('+', Some('=')) => (Token::PlusEq, 2),
                    ('-', Some('=')) => (Token::MinusEq, 2),
                    ('*', Some('=')) => (Token::StarEq, 2),
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::BangEq, 2),
                    ('<', Some('=')) => (Token::LtEq, 2),
                    ('>', Some('=')) => (Token::GtEq, 2),
                    ('+', _) => (Token::Plus, 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Star, 1),
                    ('/', _) => (Token::Slash, 1),
                    ('=', _) => (Token::Eq, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('>', _) => (Token::Gt, 1),
                    _ => {
                        return Err(ParseError::error(
                            format!("unexpected character '{}'", c),
                            span_of(start, start + 1),
                            file_id,
                        ));
                    }
                };
                i += width;
                token
            }

            // Single-character tokens
            '%' => { i += 1; Token::Percent }
            ',' => { i += 1; Token::Comma }
            ':' => { i += 1; Token::Colon }
            '.' => { i += 1; Token::Dot }
            ';' => { i += 1; Token::Semicolon }
            '(' | '[' | '{' => {
                i += 1;
                depth += 1;
                match c {
                    '(' => Token::LParen,
                    '[' => Token::LBracket,
                    _ => Token::LBrace,
                }
            }
            ')' | ']' | '}' => {
                i += 1;
                depth = depth.saturating_sub(1);
                match c {
                    ')' => Token::RParen,
                    ']' => Token::RBracket,
                    _ => Token::RBrace,
                }
            }

            _ => {
                return Err(ParseError::error(
                    format!("unexpected character '{}'", c),
                    span_of(start, start + 1),
                    file_id,
                ));
            }
        };
        tokens.push(Spanned {
            token,
            span: span_of(start, i),
        });
    }

    Ok(tokens)
}

fn lex_number(
    chars: &[char],
    i: &mut usize,
    file_id: usize,
    span_of: &dyn Fn(usize, usize) -> Range<usize>,
) -> Result<Token, ParseError> {
    let len = chars.len();
    let start = *i;
    let mut is_float = false;

    while *i < len && (chars[*i].is_ascii_digit() || chars[*i] == '_') {
        *i += 1;
    }
    if *i < len && chars[*i] == '.' {
        is_float = true;
        *i += 1;
        while *i < len && chars[*i].is_ascii_digit() {
            *i += 1;
        }
    }
    if *i < len && (chars[*i] == 'e' || chars[*i] == 'E') {
        let mut j = *i + 1;
        if j < len && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < len && chars[j].is_ascii_digit() {
            is_float = true;
            *i = j;
            while *i < len && chars[*i].is_ascii_digit() {
                *i += 1;
            }
        }
    }

    let text: String = chars[start..*i].iter().filter(|&&c| c != '_').collect();
    let span = span_of(start, *i);
    if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ParseError::error(format!("invalid number '{}'", text), span, file_id))
    } else {
        text.parse::<i64>().map(Token::Integer).map_err(|_| {
            ParseError::error(format!("integer literal '{}' is too large", text), span, file_id)
        })
    }
}

// ---------------------------------------------------------------------------
// Pratt parser
// ---------------------------------------------------------------------------

/// Deepest nesting of sub-expressions a snippet may use.
pub const MAX_NESTING: usize = 64;

struct ExprParser {
    tokens: Vec<Spanned>,
    pos: usize,
    span: Range<usize>,
    file_id: usize,
    depth: usize,
}

// Binding powers (precedence). Higher = tighter binding.
// Left bp, right bp. For left-assoc: right = left + 1. For right-assoc: right = left - 1.
const BP_CONDITIONAL: u8 = 2;     // x if c else y
const BP_OR: u8 = 4;              // or
const BP_AND: u8 = 6;             // and
const BP_NOT: u8 = 8;             // not
const BP_COMPARISON: u8 = 10;     // == != < > <= >= in, not in
const BP_ADDITIVE: u8 = 12;       // + -
const BP_MULTIPLICATIVE: u8 = 14; // * / // %
const BP_UNARY: u8 = 16;          // -x +x
const BP_POWER: u8 = 18;          // **

impl ExprParser {
    fn new(tokens: Vec<Spanned>, span: Range<usize>, file_id: usize) -> Self {
        ExprParser {
            tokens,
            pos: 0,
            span,
            file_id,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Span of the current token, or the end of the parsed text.
    fn current_span(&self) -> Range<usize> {
        match self.tokens.get(self.pos) {
            Some(t) => t.span.clone(),
            None => self.span.end..self.span.end,
        }
    }

    fn previous_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|p| self.tokens.get(p))
            .map(|t| t.span.end)
            .unwrap_or(self.span.start)
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::error(msg, self.current_span(), self.file_id)
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!(
                "expression nested more than {} levels deep",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<Range<usize>, ParseError> {
        if self.check(&token) {
            let span = self.current_span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    fn skip_separators(&mut self) {
        while self.check(&Token::Newline) || self.check(&Token::Semicolon) {
            self.pos += 1;
        }
    }

    /// True where a bare tuple `a, b` must stop.
    fn at_expression_end(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(
                Token::Newline
                    | Token::Semicolon
                    | Token::Eq
                    | Token::PlusEq
                    | Token::MinusEq
                    | Token::StarEq
                    | Token::RParen
                    | Token::RBracket
                    | Token::RBrace
                    | Token::In
            )
        )
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_instruction(&mut self) -> Result<Instruction, ParseError> {
        let start = self.current_span().start;
        let left = self.parse_tuple_or_expr()?;

        let operator = match self.peek() {
            Some(Token::Eq) => Some(AssignOperator::Assign),
            Some(Token::PlusEq) => Some(AssignOperator::Add),
            Some(Token::MinusEq) => Some(AssignOperator::Subtract),
            Some(Token::StarEq) => Some(AssignOperator::Multiply),
            _ => None,
        };

        let Some(operator) = operator else {
            return Ok(Instruction::Expression {
                value: left,
                span: start..self.previous_end(),
            });
        };

        self.pos += 1;
        let target = self.value_to_target(left)?;
        if operator != AssignOperator::Assign && !matches!(target, Target::Name(_)) {
            return Err(self.error("augmented assignment requires a single variable"));
        }
        let value = self.parse_tuple_or_expr()?;
        Ok(Instruction::Assignment {
            target,
            operator,
            value,
            span: start..self.previous_end(),
        })
    }

    fn value_to_target(&self, value: Value) -> Result<Target, ParseError> {
        match value {
            Value::VariableReference(name, _) => Ok(Target::Name(name)),
            Value::Tuple(items) | Value::List(items) => items
                .into_iter()
                .map(|item| self.value_to_target(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Target::Tuple),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    // ------------------------------------------------------------------
    // Pratt parser core
    // ------------------------------------------------------------------

    /// An expression, or a parenthesis-free tuple `a, b, c`.
    fn parse_tuple_or_expr(&mut self) -> Result<Value, ParseError> {
        let first = self.parse_expr(0)?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.pos += 1;
            if self.at_expression_end() {
                break;
            }
            items.push(self.parse_expr(0)?);
        }
        Ok(Value::Tuple(items))
    }

    /// Binary operator at the cursor: (operator, left bp, right bp, token count).
    fn infix_operator(&self) -> Option<(BinaryOperator, u8, u8, usize)> {
        let left_assoc = |op, bp: u8| Some((op, bp, bp + 1, 1));
        match self.peek()? {
            Token::Or => left_assoc(BinaryOperator::LogicalOr, BP_OR),
            Token::And => left_assoc(BinaryOperator::LogicalAnd, BP_AND),
            Token::EqEq => left_assoc(BinaryOperator::Equality, BP_COMPARISON),
            Token::BangEq => left_assoc(BinaryOperator::Inequality, BP_COMPARISON),
            Token::Gt => left_assoc(BinaryOperator::GreaterThan, BP_COMPARISON),
            Token::Lt => left_assoc(BinaryOperator::LessThan, BP_COMPARISON),
            Token::GtEq => left_assoc(BinaryOperator::GreaterThanOrEqual, BP_COMPARISON),
            Token::LtEq => left_assoc(BinaryOperator::LessThanOrEqual, BP_COMPARISON),
            Token::In => left_assoc(BinaryOperator::Membership, BP_COMPARISON),
            Token::Not if self.peek_at(1) == Some(&Token::In) => Some((
                BinaryOperator::NonMembership,
                BP_COMPARISON,
                BP_COMPARISON + 1,
                2,
            )),
            Token::Plus => left_assoc(BinaryOperator::Addition, BP_ADDITIVE),
            Token::Minus => left_assoc(BinaryOperator::Subtraction, BP_ADDITIVE),
            Token::Star => left_assoc(BinaryOperator::Multiplication, BP_MULTIPLICATIVE),
            Token::Slash => left_assoc(BinaryOperator::Division, BP_MULTIPLICATIVE),
            Token::SlashSlash => left_assoc(BinaryOperator::FloorDivision, BP_MULTIPLICATIVE),
            Token::Percent => left_assoc(BinaryOperator::Modulo, BP_MULTIPLICATIVE),
            Token::StarStar => Some((BinaryOperator::Power, BP_POWER, BP_POWER - 1, 1)),
            _ => None,
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Value, ParseError> {
        self.nested(|parser| parser.parse_binary(min_bp))
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Value, ParseError> {
        let mut left = self.parse_prefix()?;

        loop {
            // Special case: conditional expression (x if c else y)
            if self.check(&Token::If) {
                if BP_CONDITIONAL < min_bp {
                    break;
                }
                self.pos += 1;
                let condition = self.parse_expr(BP_CONDITIONAL + 1)?;
                self.expect(Token::Else, "'else' in conditional expression")?;
                let false_branch = self.parse_expr(BP_CONDITIONAL)?;
                left = Value::Conditional {
                    condition: Box::new(condition),
                    true_branch: Box::new(left),
                    false_branch: Box::new(false_branch),
                };
                continue;
            }

            let Some((operator, l_bp, r_bp, width)) = self.infix_operator() else { break };
            if l_bp < min_bp {
                break;
            }
            self.pos += width;
            let right = self.parse_expr(r_bp)?;
            left = Value::BinaryOperation {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Value, ParseError> {
        let (operator, bp) = match self.peek() {
            Some(Token::Minus) => (UnaryOperator::Negation, BP_UNARY),
            Some(Token::Plus) => (UnaryOperator::Identity, BP_UNARY),
            Some(Token::Not) => (UnaryOperator::LogicalNot, BP_NOT),
            _ => {
                let atom = self.parse_atom()?;
                return self.parse_postfix(atom);
            }
        };
        self.pos += 1;
        let operand = self.parse_expr(bp)?;
        Ok(Value::UnaryOperation {
            operator,
            operand: Box::new(operand),
        })
    }

    fn parse_atom(&mut self) -> Result<Value, ParseError> {
        let Some(Spanned { token, span }) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };

        match token {
            // Literals
            Token::Integer(n) => Ok(Value::IntegerLiteral(n)),
            Token::Float(f) => Ok(Value::FloatLiteral(f)),
            Token::StringLit(mut s) => {
                // Adjacent string literals concatenate
                while let Some(Token::StringLit(next)) = self.peek() {
                    s.push_str(next);
                    self.pos += 1;
                }
                Ok(Value::StringLiteral(s))
            }
            Token::True => Ok(Value::BooleanLiteral(true)),
            Token::False => Ok(Value::BooleanLiteral(false)),
            Token::NoneKw => Ok(Value::NoneLiteral),

            // References
            Token::Ident(name) => Ok(Value::VariableReference(name, span)),

            // Parenthesized expression, tuple or generator
            Token::LParen => {
                if self.check(&Token::RParen) {
                    self.pos += 1;
                    return Ok(Value::Tuple(Vec::new()));
                }
                let first = self.parse_expr(0)?;
                if self.check(&Token::For) {
                    let clauses = self.parse_clauses()?;
                    self.expect(Token::RParen, "')'")?;
                    return Ok(Value::ListComprehension {
                        element: Box::new(first),
                        clauses,
                    });
                }
                if !self.check(&Token::Comma) {
                    self.expect(Token::RParen, "')'")?;
                    return Ok(first);
                }
                let items = self.parse_sequence_tail(first, Token::RParen, "')'")?;
                Ok(Value::Tuple(items))
            }

            // List display or comprehension
            Token::LBracket => {
                if self.check(&Token::RBracket) {
                    self.pos += 1;
                    return Ok(Value::List(Vec::new()));
                }
                let first = self.parse_expr(0)?;
                if self.check(&Token::For) {
                    let clauses = self.parse_clauses()?;
                    self.expect(Token::RBracket, "']'")?;
                    return Ok(Value::ListComprehension {
                        element: Box::new(first),
                        clauses,
                    });
                }
                let items = self.parse_sequence_tail(first, Token::RBracket, "']'")?;
                Ok(Value::List(items))
            }

            // Dict display or comprehension
            Token::LBrace => {
                if self.check(&Token::RBrace) {
                    self.pos += 1;
                    return Ok(Value::Dict(Vec::new()));
                }
                let key = self.parse_expr(0)?;
                self.expect(Token::Colon, "':' in dict display")?;
                let value = self.parse_expr(0)?;
                if self.check(&Token::For) {
                    let clauses = self.parse_clauses()?;
                    self.expect(Token::RBrace, "'}'")?;
                    return Ok(Value::DictComprehension {
                        key: Box::new(key),
                        value: Box::new(value),
                        clauses,
                    });
                }
                let mut entries = vec![(key, value)];
                while self.check(&Token::Comma) {
                    self.pos += 1;
                    if self.check(&Token::RBrace) {
                        break;
                    }
                    let key = self.parse_expr(0)?;
                    self.expect(Token::Colon, "':' in dict display")?;
                    let value = self.parse_expr(0)?;
                    entries.push((key, value));
                }
                self.expect(Token::RBrace, "'}'")?;
                Ok(Value::Dict(entries))
            }

            other => Err(ParseError::error(
                format!("unexpected token: {:?}", other),
                span,
                self.file_id,
            )),
        }
    }

    /// Remaining comma-separated items after `first`, up to and including `close`.
    fn parse_sequence_tail(
        &mut self,
        first: Value,
        close: Token,
        what: &str,
    ) -> Result<Vec<Value>, ParseError> {
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.pos += 1;
            if self.check(&close) {
                break;
            }
            items.push(self.parse_expr(0)?);
        }
        self.expect(close, what)?;
        Ok(items)
    }

    fn parse_postfix(&mut self, mut value: Value) -> Result<Value, ParseError> {
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let start = self.current_span().start;
                    self.pos += 1;
                    let arguments = self.parse_argument_list(Some(Token::RParen))?;
                    value = Value::Call {
                        callee: Box::new(value),
                        arguments,
                        span: start..self.previous_end(),
                    };
                }
                Some(Token::LBracket) => {
                    let start = self.current_span().start;
                    self.pos += 1;
                    let index = self.parse_tuple_or_expr()?;
                    self.expect(Token::RBracket, "']'")?;
                    value = Value::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                        span: start..self.previous_end(),
                    };
                }
                Some(Token::Dot) => {
                    let start = self.current_span().start;
                    self.pos += 1;
                    let name = self.expect_ident()?;
                    value = Value::Attribute {
                        value: Box::new(value),
                        name,
                        span: start..self.previous_end(),
                    };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    /// Positional and keyword arguments, up to `close` (consumed) or the end of input.
    fn parse_argument_list(&mut self, close: Option<Token>) -> Result<Vec<Argument>, ParseError> {
        let mut arguments = Vec::new();
        let mut seen_keyword = false;

        loop {
            match &close {
                Some(close) if self.check(close) => {
                    self.pos += 1;
                    break;
                }
                None if self.at_end() => break,
                _ => {}
            }

            let is_keyword = matches!(self.peek(), Some(Token::Ident(_)))
                && self.peek_at(1) == Some(&Token::Eq);
            if is_keyword {
                let name = self.expect_ident()?;
                self.pos += 1;
                let value = self.parse_expr(0)?;
                seen_keyword = true;
                arguments.push(Argument::Keyword(name, value));
            } else {
                if seen_keyword {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let mut value = self.parse_expr(0)?;
                if self.check(&Token::For) {
                    let clauses = self.parse_clauses()?;
                    value = Value::ListComprehension {
                        element: Box::new(value),
                        clauses,
                    };
                }
                arguments.push(Argument::Positional(value));
            }

            if self.check(&Token::Comma) {
                self.pos += 1;
                continue;
            }
            match &close {
                Some(close) => {
                    self.expect(close.clone(), "',' or ')' in argument list")?;
                    break;
                }
                None if self.at_end() => break,
                None => return Err(self.error("expected ',' between arguments")),
            }
        }

        Ok(arguments)
    }

    // ------------------------------------------------------------------
    // Comprehensions
    // ------------------------------------------------------------------

    fn parse_clauses(&mut self) -> Result<Vec<Comprehension>, ParseError> {
        let mut clauses = Vec::new();
        while self.check(&Token::For) {
            self.pos += 1;
            let target = self.parse_target_list()?;
            self.expect(Token::In, "'in' in comprehension")?;
            let iterable = self.parse_expr(BP_CONDITIONAL + 1)?;
            let condition = if self.check(&Token::If) {
                self.pos += 1;
                Some(Box::new(self.parse_expr(BP_CONDITIONAL + 1)?))
            } else {
                None
            };
            clauses.push(Comprehension {
                target,
                iterable: Box::new(iterable),
                condition,
            });
        }
        Ok(clauses)
    }

    fn parse_target_list(&mut self) -> Result<Target, ParseError> {
        let first = self.parse_target_atom()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.pos += 1;
            if self.at_expression_end() {
                break;
            }
            items.push(self.parse_target_atom()?);
        }
        Ok(Target::Tuple(items))
    }

    fn parse_target_atom(&mut self) -> Result<Target, ParseError> {
        match self.peek() {
            Some(Token::Ident(_)) => Ok(Target::Name(self.expect_ident()?)),
            Some(Token::LParen) => {
                self.pos += 1;
                let target = self.nested(Self::parse_target_list)?;
                self.expect(Token::RParen, "')'")?;
                Ok(target)
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let target = self.nested(Self::parse_target_list)?;
                self.expect(Token::RBracket, "']'")?;
                Ok(target)
            }
            _ => Err(self.error("expected loop variable")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn expr(src: &str) -> Value {
        parse_expression(src, 0, 0).unwrap()
    }

    #[test]
    fn precedence() {
        match expr("1 + 2 * 3") {
            Value::BinaryOperation { operator: BinaryOperator::Addition, right, .. } => {
                assert!(matches!(*right, Value::BinaryOperation { operator: BinaryOperator::Multiplication, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        match expr("-2 ** 3 ** 2") {
            Value::UnaryOperation { operator: UnaryOperator::Negation, operand } => match *operand {
                Value::BinaryOperation { operator: BinaryOperator::Power, right, .. } => {
                    assert!(matches!(*right, Value::BinaryOperation { operator: BinaryOperator::Power, .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn conditional_expression() {
        assert!(matches!(expr("1 if x else 2"), Value::Conditional { .. }));
    }

    #[test]
    fn not_in() {
        assert!(matches!(
            expr("a not in b"),
            Value::BinaryOperation { operator: BinaryOperator::NonMembership, .. }
        ));
    }

    #[test]
    fn comprehension_with_tuple_target_and_condition() {
        match expr("[(i, j) for i, j in zip(a, b) if i > 0]") {
            Value::ListComprehension { clauses, .. } => {
                assert_eq!(clauses.len(), 1);
                assert_eq!(
                    clauses[0].target,
                    Target::Tuple(vec![Target::Name("i".into()), Target::Name("j".into())])
                );
                assert!(clauses[0].condition.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn generator_argument() {
        match expr("sum(x for x in l)") {
            Value::Call { arguments, .. } => {
                assert!(matches!(arguments[0], Argument::Positional(Value::ListComprehension { .. })));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn command_arguments() {
        let args = parse_arguments("[1, 2], i0=1", 10, 0).unwrap();
        assert_eq!(args.len(), 2);
        assert!(matches!(args[0], Argument::Positional(Value::List(_))));
        assert!(matches!(&args[1], Argument::Keyword(name, Value::IntegerLiteral(1)) if name == "i0"));
        assert!(parse_arguments("", 0, 0).unwrap().is_empty());
        assert!(parse_arguments("a=1, 2", 0, 0).is_err());
    }

    #[test]
    fn statements() {
        let program = parse_instructions("a = 1; b = [1,\n 2]\nc += a\nprint(a, b)\n", 0, 0).unwrap();
        assert_eq!(program.len(), 4);
        assert!(matches!(
            program[2],
            Instruction::Assignment { operator: AssignOperator::Add, .. }
        ));
        assert!(matches!(program[3], Instruction::Expression { .. }));
    }

    #[test]
    fn tuple_assignment() {
        let program = parse_instructions("a, b = 1, 2", 0, 0).unwrap();
        match &program[0] {
            Instruction::Assignment { target: Target::Tuple(items), value: Value::Tuple(values), .. } => {
                assert_eq!(items.len(), 2);
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    #[case("1 +")]
    #[case("(1, 2")]
    #[case("'abc")]
    #[case("1 2")]
    #[case("a ! b")]
    fn malformed_expressions(#[case] src: &str) {
        assert!(parse_expression(src, 0, 0).is_err());
    }

    #[test]
    fn nesting_is_limited() {
        let shallow = format!("{}1{}", "(".repeat(30), ")".repeat(30));
        assert!(matches!(parse_expression(&shallow, 0, 0).unwrap(), Value::IntegerLiteral(1)));

        let deep = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let err = parse_expression(&deep, 0, 0).unwrap_err();
        assert!(err.message.contains("nested more than"));

        let negations = format!("{}1", "-".repeat(1000));
        assert!(parse_expression(&negations, 0, 0).is_err());
        let powers = format!("2{}", " ** 2".repeat(1000));
        assert!(parse_expression(&powers, 0, 0).is_err());
    }

    #[test]
    fn spans_are_offset() {
        let err = parse_expression("1 + )", 100, 0).unwrap_err();
        assert_eq!(err.span, 104..105);
        match parse_expression("abc", 7, 0).unwrap() {
            Value::VariableReference(_, span) => assert_eq!(span, 7..10),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn numbers_and_strings() {
        assert!(matches!(expr("1e3"), Value::FloatLiteral(f) if f == 1000.0));
        assert!(matches!(expr("42"), Value::IntegerLiteral(42)));
        assert!(matches!(expr("'a\\'b' \"c\""), Value::StringLiteral(s) if s == "a'bc"));
    }
}
