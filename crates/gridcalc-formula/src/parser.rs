//! Formula parser
//!
//! A recursive descent parser over the token stream produced by
//! [`crate::tokenizer`], with operator precedence from loosest to tightest:
//!
//! 1. Comparison: `=`, `<>`, `<`, `<=`, `>`, `>=`
//! 2. Concatenation: `&`
//! 3. Addition/Subtraction: `+`, `-`
//! 4. Multiplication/Division: `*`, `/`
//! 5. Exponentiation: `^` (right associative)
//! 6. Unary minus / plus
//! 7. Postfix percent: `%`
//! 8. Primary: literals, references, function calls, parentheses

use crate::ast::{BinaryOperator, FormulaExpr, UnaryOperator};
use crate::error::{FormulaError, FormulaResult};
use crate::tokenizer::{tokenize, Token, TokenKind};

/// Nesting limit used by [`parse_formula`]
pub const DEFAULT_MAX_PARSE_DEPTH: usize = 256;

/// Parse a formula string into an AST
///
/// The text must start with `=` (leading whitespace is ignored). Error
/// offsets are byte offsets into the text after the `=`.
///
/// # Example
/// ```rust
/// use gridcalc_formula::parse_formula;
///
/// let ast = parse_formula("=1+2").unwrap();
/// let ast = parse_formula("=SUM(A1:A10)").unwrap();
/// let ast = parse_formula("=IF(A1>0,\"Yes\",\"No\")").unwrap();
/// assert!(parse_formula("1+2").is_err());
/// ```
pub fn parse_formula(formula: &str) -> FormulaResult<FormulaExpr> {
    parse_formula_with_depth(formula, DEFAULT_MAX_PARSE_DEPTH)
}

/// Parse a formula, rejecting nesting deeper than `max_depth`
pub fn parse_formula_with_depth(formula: &str, max_depth: usize) -> FormulaResult<FormulaExpr> {
    let body = formula
        .trim_start()
        .strip_prefix('=')
        .ok_or(FormulaError::MissingMarker)?;
    parse_body(body, max_depth)
}

/// Parse formula text that has already had its `=` removed
pub fn parse_body(body: &str, max_depth: usize) -> FormulaResult<FormulaExpr> {
    let tokens = tokenize(body)?;
    let mut parser = FormulaParser {
        tokens,
        pos: 0,
        end: body.len(),
        depth: 0,
        max_depth,
    };
    let expr = parser.parse_expression()?;

    // Make sure we consumed all input
    if let Some(token) = parser.peek() {
        return Err(FormulaError::parse(
            token.offset,
            format!("unexpected {} after expression", token.kind.describe()),
        ));
    }
    Ok(expr)
}

struct FormulaParser {
    tokens: Vec<Token>,
    pos: usize,
    /// Offset reported for errors at end of input
    end: usize,
    depth: usize,
    max_depth: usize,
}

impl FormulaParser {
    // === Token helpers ===

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> FormulaResult<()> {
        if self.eat(kind) {
            return Ok(());
        }
        let found = self
            .peek_kind()
            .map_or_else(|| "end of formula".to_string(), TokenKind::describe);
        Err(FormulaError::parse(
            self.offset(),
            format!("expected {}, found {}", kind.describe(), found),
        ))
    }

    fn enter(&mut self) -> FormulaResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(FormulaError::parse(
                self.offset(),
                format!("formula nested deeper than {} levels", self.max_depth),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // === Expression parsing with precedence ===

    fn parse_expression(&mut self) -> FormulaResult<FormulaExpr> {
        self.enter()?;
        let expr = self.parse_comparison();
        self.leave();
        expr
    }

    fn parse_comparison(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_concatenation()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Equal) => BinaryOperator::Equal,
                Some(TokenKind::NotEqual) => BinaryOperator::NotEqual,
                Some(TokenKind::LessThan) => BinaryOperator::LessThan,
                Some(TokenKind::LessEqual) => BinaryOperator::LessEqual,
                Some(TokenKind::GreaterThan) => BinaryOperator::GreaterThan,
                Some(TokenKind::GreaterEqual) => BinaryOperator::GreaterEqual,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_concatenation()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_concatenation(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_additive()?;

        while self.eat(&TokenKind::Ampersand) {
            let right = self.parse_additive()?;
            left = binary(BinaryOperator::Concat, left, right);
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOperator::Add,
                Some(TokenKind::Minus) => BinaryOperator::Subtract,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> FormulaResult<FormulaExpr> {
        let mut left = self.parse_exponent()?;

        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinaryOperator::Multiply,
                Some(TokenKind::Slash) => BinaryOperator::Divide,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_exponent()?;
            left = binary(op, left, right);
        }

        Ok(left)
    }

    fn parse_exponent(&mut self) -> FormulaResult<FormulaExpr> {
        let left = self.parse_unary()?;

        if self.eat(&TokenKind::Caret) {
            self.enter()?;
            let right = self.parse_exponent(); // Right associative
            self.leave();
            return Ok(binary(BinaryOperator::Power, left, right?));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> FormulaResult<FormulaExpr> {
        if self.eat(&TokenKind::Minus) {
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(FormulaExpr::UnaryOp {
                op: UnaryOperator::Negate,
                operand: Box::new(operand?),
            });
        }

        // Prefix plus is a no-op
        if self.eat(&TokenKind::Plus) {
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            return operand;
        }

        let mut expr = self.parse_primary()?;
        while self.eat(&TokenKind::Percent) {
            expr = FormulaExpr::UnaryOp {
                op: UnaryOperator::Percent,
                operand: Box::new(expr),
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> FormulaResult<FormulaExpr> {
        let offset = self.offset();
        let Some(token) = self.next() else {
            return Err(FormulaError::parse(offset, "unexpected end of formula"));
        };

        match token.kind {
            TokenKind::Number(n) => Ok(FormulaExpr::Number(n)),
            TokenKind::Text(s) => Ok(FormulaExpr::Text(s)),
            TokenKind::Boolean(b) => Ok(FormulaExpr::Boolean(b)),
            TokenKind::Error(e) => Ok(FormulaExpr::Error(e)),
            TokenKind::CellRef(r) => Ok(FormulaExpr::CellRef(r)),
            TokenKind::RangeRef(r) => Ok(FormulaExpr::RangeRef(r)),

            TokenKind::LeftParen => {
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(expr)
            }

            TokenKind::Identifier(name) => {
                if self.peek_kind() == Some(&TokenKind::LeftParen) {
                    self.parse_function_call(name)
                } else {
                    Ok(FormulaExpr::Name(name))
                }
            }

            other => Err(FormulaError::parse(
                offset,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    fn parse_function_call(&mut self, name: String) -> FormulaResult<FormulaExpr> {
        self.expect(&TokenKind::LeftParen)?;

        let mut args = Vec::new();
        if !self.eat(&TokenKind::RightParen) {
            args.push(self.parse_expression()?);
            while self.eat(&TokenKind::Comma) {
                args.push(self.parse_expression()?);
            }
            self.expect(&TokenKind::RightParen)?;
        }

        Ok(FormulaExpr::Function { name, args })
    }
}

fn binary(op: BinaryOperator, left: FormulaExpr, right: FormulaExpr) -> FormulaExpr {
    FormulaExpr::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
