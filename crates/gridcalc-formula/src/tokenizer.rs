//! Formula tokenizer
//!
//! Turns the body of a formula (the text after `=`) into typed tokens. Pure
//! and stateless: the same input always yields the same tokens or the same
//! [`FormulaError::Lex`].

use crate::ast::{CellReference, RangeReference};
use crate::error::{FormulaError, FormulaResult};
use gridcalc_core::{CellAddress, CellError, CellRange};

/// A token with the byte offset where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),

    // Identifiers and references
    Identifier(String),
    CellRef(CellReference),
    RangeRef(RangeReference),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,

    // Delimiters
    Comma,
    LeftParen,
    RightParen,
}

impl TokenKind {
    /// Short human-readable description for error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Text(_) => "string literal".to_string(),
            TokenKind::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            TokenKind::Error(e) => e.to_string(),
            TokenKind::Identifier(name) => format!("name '{}'", name),
            TokenKind::CellRef(r) => format!("reference {}", r),
            TokenKind::RangeRef(r) => format!("range {}", r),
            TokenKind::Plus => "'+'".into(),
            TokenKind::Minus => "'-'".into(),
            TokenKind::Star => "'*'".into(),
            TokenKind::Slash => "'/'".into(),
            TokenKind::Caret => "'^'".into(),
            TokenKind::Percent => "'%'".into(),
            TokenKind::Ampersand => "'&'".into(),
            TokenKind::Equal => "'='".into(),
            TokenKind::NotEqual => "'<>'".into(),
            TokenKind::LessThan => "'<'".into(),
            TokenKind::LessEqual => "'<='".into(),
            TokenKind::GreaterThan => "'>'".into(),
            TokenKind::GreaterEqual => "'>='".into(),
            TokenKind::Comma => "','".into(),
            TokenKind::LeftParen => "'('".into(),
            TokenKind::RightParen => "')'".into(),
        }
    }
}

/// Tokenize a formula body
///
/// # Example
/// ```rust
/// use gridcalc_formula::tokenizer::{tokenize, TokenKind};
///
/// let tokens = tokenize("SUM(A1:A2)*2").unwrap();
/// assert_eq!(tokens.len(), 6);
/// assert!(matches!(tokens[2].kind, TokenKind::RangeRef(_)));
/// ```
pub fn tokenize(input: &str) -> FormulaResult<Vec<Token>> {
    let mut lexer = Lexer { input, pos: 0 };
    let mut tokens = Vec::new();
    loop {
        lexer.skip_whitespace();
        if lexer.is_at_end() {
            return Ok(tokens);
        }
        let offset = lexer.pos;
        let kind = lexer.scan_token()?;
        tokens.push(Token { kind, offset });
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn scan_token(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Err(FormulaError::lex(start, "end of input")),
        };

        let single = match c {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '^' => Some(TokenKind::Caret),
            '%' => Some(TokenKind::Percent),
            '&' => Some(TokenKind::Ampersand),
            '=' => Some(TokenKind::Equal),
            ',' => Some(TokenKind::Comma),
            '(' => Some(TokenKind::LeftParen),
            ')' => Some(TokenKind::RightParen),
            _ => None,
        };
        if let Some(kind) = single {
            self.advance();
            return Ok(kind);
        }

        match c {
            '<' => {
                self.advance();
                Ok(match self.peek_char() {
                    Some('=') => {
                        self.advance();
                        TokenKind::LessEqual
                    }
                    Some('>') => {
                        self.advance();
                        TokenKind::NotEqual
                    }
                    _ => TokenKind::LessThan,
                })
            }
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    Ok(TokenKind::GreaterEqual)
                } else {
                    Ok(TokenKind::GreaterThan)
                }
            }
            '"' => self.scan_string(),
            '#' => self.scan_error_literal(),
            '\'' => {
                let sheet = self.scan_quoted_sheet()?;
                self.scan_reference(Some(sheet))
            }
            c if c.is_ascii_digit() => self.scan_number(),
            '.' if self.peek_char_at(1).map_or(false, |c| c.is_ascii_digit()) => {
                self.scan_number()
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => self.scan_word(),
            other => Err(FormulaError::lex(start, format!("character '{}'", other))),
        }
    }

    fn scan_string(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        self.advance(); // opening quote

        let mut s = String::new();
        loop {
            match self.peek_char() {
                Some('"') if self.peek_char_at(1) == Some('"') => {
                    s.push('"');
                    self.advance();
                    self.advance();
                }
                Some('"') => {
                    self.advance();
                    return Ok(TokenKind::Text(s));
                }
                Some(c) => {
                    s.push(c);
                    self.advance();
                }
                None => return Err(FormulaError::lex(start, "unterminated string")),
            }
        }
    }

    fn scan_number(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        self.eat_digits();
        if self.peek_char() == Some('.') {
            self.advance();
            self.eat_digits();
        }

        // `e` starts an exponent only when digits follow
        if matches!(self.peek_char(), Some('e') | Some('E')) {
            let sign = matches!(self.peek_char_at(1), Some('+') | Some('-'));
            let digit_at = if sign { 2 } else { 1 };
            if self
                .peek_char_at(digit_at)
                .map_or(false, |c| c.is_ascii_digit())
            {
                for _ in 0..digit_at {
                    self.advance();
                }
                self.eat_digits();
            }
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| FormulaError::lex(start, format!("number '{}'", text)))
    }

    fn scan_error_literal(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        let rest = &self.input[start..];
        // Match known codes by prefix so `#N/A/2` reads as `#N/A` then `/2`
        let matched = CellError::ALL
            .into_iter()
            .filter(|e| {
                let code = e.as_str();
                rest.get(..code.len())
                    .map_or(false, |head| head.eq_ignore_ascii_case(code))
            })
            .max_by_key(|e| e.as_str().len());

        match matched {
            Some(err) => {
                self.pos += err.as_str().len();
                Ok(TokenKind::Error(err))
            }
            None => {
                let text: String = rest
                    .chars()
                    .take_while(|c| !c.is_whitespace())
                    .take(12)
                    .collect();
                Err(FormulaError::lex(start, format!("error literal '{}'", text)))
            }
        }
    }

    /// `'Sheet name'` including the trailing `!`
    fn scan_quoted_sheet(&mut self) -> FormulaResult<String> {
        let start = self.pos;
        self.advance(); // opening quote
        let mut name = String::new();
        loop {
            match self.peek_char() {
                Some('\'') if self.peek_char_at(1) == Some('\'') => {
                    name.push('\'');
                    self.advance();
                    self.advance();
                }
                Some('\'') => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    name.push(c);
                    self.advance();
                }
                None => return Err(FormulaError::lex(start, "unterminated sheet name")),
            }
        }
        if self.peek_char() != Some('!') {
            return Err(FormulaError::lex(self.pos, "missing '!' after sheet name"));
        }
        self.advance();
        Ok(name)
    }

    fn scan_word(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        let word = self.eat_word();

        if self.peek_char() == Some('!') {
            self.advance();
            return self.scan_reference(Some(word.to_string()));
        }

        if self.peek_char() != Some('(') {
            if is_cell_reference(word) {
                self.pos = start;
                return self.scan_reference(None);
            }
            if word.eq_ignore_ascii_case("TRUE") {
                return Ok(TokenKind::Boolean(true));
            }
            if word.eq_ignore_ascii_case("FALSE") {
                return Ok(TokenKind::Boolean(false));
            }
        }

        if word.contains('$') {
            return Err(FormulaError::lex(start, format!("name '{}'", word)));
        }
        Ok(TokenKind::Identifier(word.to_string()))
    }

    /// A cell or range reference, after any sheet prefix has been consumed
    fn scan_reference(&mut self, sheet: Option<String>) -> FormulaResult<TokenKind> {
        let start = self.scan_address()?;

        if self.peek_char() != Some(':') {
            return Ok(TokenKind::CellRef(CellReference {
                sheet,
                address: start,
            }));
        }
        self.advance(); // ':'

        // Optional sheet prefix on the far corner; it must name the same sheet
        let prefix_at = self.pos;
        let end_sheet = if self.peek_char() == Some('\'') {
            Some(self.scan_quoted_sheet()?)
        } else {
            let save = self.pos;
            let word = self.eat_word();
            if self.peek_char() == Some('!') {
                self.advance();
                Some(word.to_string())
            } else {
                self.pos = save;
                None
            }
        };
        if let Some(end_sheet) = &end_sheet {
            let same = sheet
                .as_deref()
                .map_or(false, |s| s.eq_ignore_ascii_case(end_sheet));
            if !same {
                return Err(FormulaError::lex(
                    prefix_at,
                    "range corners on different sheets",
                ));
            }
        }

        let end = self.scan_address()?;
        Ok(TokenKind::RangeRef(RangeReference {
            sheet,
            range: CellRange::new(start, end),
        }))
    }

    fn scan_address(&mut self) -> FormulaResult<CellAddress> {
        let start = self.pos;
        let word = self.eat_word();
        if !is_cell_reference(word) {
            let found = if word.is_empty() {
                self.peek_char()
                    .map_or("end of input".to_string(), |c| format!("character '{}'", c))
            } else {
                format!("'{}' where a cell reference was expected", word)
            };
            return Err(FormulaError::lex(start, found));
        }
        CellAddress::parse(word).map_err(|e| FormulaError::lex(start, e.to_string()))
    }

    // === Helper methods ===

    fn eat_word(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .peek_char()
            .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.')
        {
            self.advance();
        }
        &self.input[start..self.pos]
    }

    fn eat_digits(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().map_or(false, |c| c.is_whitespace()) {
            self.advance();
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }
}

/// `[$]LETTERS[$]DIGITS`, nothing else
fn is_cell_reference(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    if bytes.get(i) == Some(&b'$') {
        i += 1;
    }
    let letters = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    if i == letters || i - letters > 3 {
        return false;
    }
    if bytes.get(i) == Some(&b'$') {
        i += 1;
    }
    let digits = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    i > digits && i == bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("1.5e3 + .5*2"),
            vec![
                TokenKind::Number(1500.0),
                TokenKind::Plus,
                TokenKind::Number(0.5),
                TokenKind::Star,
                TokenKind::Number(2.0),
            ]
        );
        assert_eq!(
            kinds("1<>2<=3>=4"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::NotEqual,
                TokenKind::Number(2.0),
                TokenKind::LessEqual,
                TokenKind::Number(3.0),
                TokenKind::GreaterEqual,
                TokenKind::Number(4.0),
            ]
        );
    }

    #[test]
    fn test_string_with_escaped_quote() {
        assert_eq!(
            kinds("\"say \"\"hi\"\"\"&\"\""),
            vec![
                TokenKind::Text("say \"hi\"".into()),
                TokenKind::Ampersand,
                TokenKind::Text(String::new()),
            ]
        );
    }

    #[test]
    fn test_references() {
        let tokens = kinds("A1+$B$2:C3");
        assert!(matches!(&tokens[0], TokenKind::CellRef(r) if r.address == CellAddress::new(0, 0)));
        match &tokens[2] {
            TokenKind::RangeRef(r) => {
                assert_eq!(r.sheet, None);
                assert_eq!(r.range.start.position(), CellAddress::new(1, 1));
                assert_eq!(r.range.end.position(), CellAddress::new(2, 2));
            }
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn test_sheet_qualified_references() {
        match &kinds("Data!A1:B2")[0] {
            TokenKind::RangeRef(r) => assert_eq!(r.sheet.as_deref(), Some("Data")),
            other => panic!("expected range, got {:?}", other),
        }
        match &kinds("'My ''Q1'' Sheet'!C4")[0] {
            TokenKind::CellRef(r) => assert_eq!(r.sheet.as_deref(), Some("My 'Q1' Sheet")),
            other => panic!("expected cell ref, got {:?}", other),
        }
        assert!(tokenize("Data!A1:Data!B2").is_ok());
        assert!(matches!(
            tokenize("Data!A1:Other!B2"),
            Err(FormulaError::Lex { .. })
        ));
    }

    #[test]
    fn test_function_names_are_identifiers() {
        assert_eq!(
            kinds("LOG10(A1)")[0],
            TokenKind::Identifier("LOG10".into())
        );
        assert_eq!(
            kinds("stdev.s(1)")[0],
            TokenKind::Identifier("stdev.s".into())
        );
        assert_eq!(kinds("true")[0], TokenKind::Boolean(true));
        assert_eq!(kinds("TRUE()")[0], TokenKind::Identifier("TRUE".into()));
    }

    #[test]
    fn test_error_literals() {
        assert_eq!(kinds("#DIV/0!")[0], TokenKind::Error(CellError::Div0));
        assert_eq!(kinds("#N/A")[0], TokenKind::Error(CellError::Na));
        assert_eq!(kinds("#NAME?")[0], TokenKind::Error(CellError::Name));
        assert_eq!(
            kinds("#N/A/2"),
            vec![
                TokenKind::Error(CellError::Na),
                TokenKind::Slash,
                TokenKind::Number(2.0),
            ]
        );
    }

    #[test]
    fn test_lex_errors_carry_offset() {
        assert_eq!(
            tokenize("1 + @"),
            Err(FormulaError::Lex {
                offset: 4,
                found: "character '@'".into()
            })
        );
        assert_eq!(tokenize("\"open").unwrap_err().offset(), Some(0));
        assert_eq!(tokenize("A1:").unwrap_err().offset(), Some(3));
        assert_eq!(tokenize("1;2").unwrap_err().offset(), Some(1));
        assert_eq!(tokenize("#WHAT!").unwrap_err().offset(), Some(0));
    }

    #[test]
    fn test_offsets_point_at_token_start() {
        let offsets: Vec<_> = tokenize("  SUM( A1 )").unwrap().iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![2, 5, 7, 10]);
    }
}
