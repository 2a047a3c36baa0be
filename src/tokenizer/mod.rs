//=====================================================
// File: tokenizer/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script tokenizer
// Objective: Turn script source into positioned tokens for the parser,
//            including template literals with embedded expressions
//=====================================================

//=============================================
//            Section 1: Imports & Token Types
//=============================================

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;

/// Position of a token in the source code (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A raw piece of a template literal; expression parts are parsed later.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Expr { source: String, position: Position },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(String),
    Template(Vec<TemplateChunk>),
    Identifier(String),

    // Keywords
    Let,
    Const,
    Var,
    Function,
    Return,
    If,
    Else,
    While,
    For,
    Of,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    True,
    False,
    Null,
    Import,
    From,
    Async,
    Await,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Equal,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    EqualEqual,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
    Nullish,
    Not,
    Question,
    Arrow,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::String(s) => write!(f, "'{}'", s),
            TokenKind::Template(_) => f.write_str("template literal"),
            TokenKind::Identifier(s) => f.write_str(s),
            TokenKind::Eof => f.write_str("end of input"),
            other => write!(f, "{:?}", other),
        }
    }
}

impl TokenKind {
    /// Source text of a keyword token; keywords are valid property names.
    pub fn keyword_text(&self) -> Option<&'static str> {
        KEYWORDS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(text, _)| *text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, position: Position) -> Self {
        Self { kind, position }
    }
}

/// Lexing failure with the position of the offending character.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub position: Position,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.message, self.position.line, self.position.column
        )
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    HashMap::from([
        ("let", TokenKind::Let),
        ("const", TokenKind::Const),
        ("var", TokenKind::Var),
        ("function", TokenKind::Function),
        ("return", TokenKind::Return),
        ("if", TokenKind::If),
        ("else", TokenKind::Else),
        ("while", TokenKind::While),
        ("for", TokenKind::For),
        ("of", TokenKind::Of),
        ("break", TokenKind::Break),
        ("continue", TokenKind::Continue),
        ("throw", TokenKind::Throw),
        ("try", TokenKind::Try),
        ("catch", TokenKind::Catch),
        ("finally", TokenKind::Finally),
        ("new", TokenKind::New),
        ("typeof", TokenKind::Typeof),
        ("true", TokenKind::True),
        ("false", TokenKind::False),
        ("null", TokenKind::Null),
        ("import", TokenKind::Import),
        ("from", TokenKind::From),
        ("async", TokenKind::Async),
        ("await", TokenKind::Await),
    ])
});

//=============================================
//            Section 2: Tokenizer
//=============================================

pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Self::with_origin(input, 1, 1)
    }

    /// Tokenizes a fragment whose first character sits at `line`/`column`
    /// of the enclosing script (used for `${}` template expressions).
    pub fn with_origin(input: &str, line: usize, column: usize) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line,
            column,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        loop {
            self.skip_trivia()?;
            if self.is_at_end() {
                break;
            }

            let ch = self.current_char();
            if ch == '"' || ch == '\'' {
                self.handle_string(ch)?;
            } else if ch == '`' {
                self.handle_template()?;
            } else if ch.is_ascii_digit()
                || (ch == '.' && self.peek_char().is_some_and(|c| c.is_ascii_digit()))
            {
                self.handle_number()?;
            } else if ch.is_alphabetic() || ch == '_' || ch == '$' {
                self.handle_identifier();
            } else {
                self.handle_operator_or_delimiter()?;
            }
        }

        let end = self.current_position();
        self.tokens.push(Token::new(TokenKind::Eof, end));
        Ok(self.tokens)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input.get(self.position).copied().unwrap_or('\0')
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.current_char();
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn current_position(&self) -> Position {
        Position::new(self.line, self.column, self.position)
    }

    fn error(&self, message: impl Into<String>, position: Position) -> LexError {
        LexError {
            message: message.into(),
            position,
        }
    }

    /// Skips whitespace, newlines and both comment styles.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            if self.is_at_end() {
                return Ok(());
            }
            let ch = self.current_char();
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '/' && self.peek_char() == Some('/') {
                while !self.is_at_end() && self.current_char() != '\n' {
                    self.advance();
                }
            } else if ch == '/' && self.peek_char() == Some('*') {
                let start = self.current_position();
                self.advance();
                self.advance();
                loop {
                    if self.is_at_end() {
                        return Err(self.error("Unterminated comment", start));
                    }
                    if self.current_char() == '*' && self.peek_char() == Some('/') {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            } else {
                return Ok(());
            }
        }
    }

    //=============================================
    //            Section 3: Literal Handlers
    //=============================================

    fn handle_string(&mut self, quote: char) -> Result<(), LexError> {
        let start = self.current_position();
        self.advance();
        let mut value = String::new();
        loop {
            if self.is_at_end() || self.current_char() == '\n' {
                return Err(self.error("Unterminated string literal", start));
            }
            let ch = self.advance();
            if ch == quote {
                break;
            }
            if ch == '\\' {
                value.push(self.read_escape(start)?);
            } else {
                value.push(ch);
            }
        }
        self.tokens.push(Token::new(TokenKind::String(value), start));
        Ok(())
    }

    fn read_escape(&mut self, start: Position) -> Result<char, LexError> {
        if self.is_at_end() {
            return Err(self.error("Unterminated escape sequence", start));
        }
        let escaped = self.advance();
        Ok(match escaped {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        })
    }

    fn handle_template(&mut self) -> Result<(), LexError> {
        let start = self.current_position();
        self.advance();
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            if self.is_at_end() {
                return Err(self.error("Unterminated template literal", start));
            }
            let ch = self.current_char();
            if ch == '`' {
                self.advance();
                break;
            }
            if ch == '\\' {
                self.advance();
                text.push(self.read_escape(start)?);
                continue;
            }
            if ch == '$' && self.peek_char() == Some('{') {
                self.advance();
                self.advance();
                if !text.is_empty() {
                    chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                }
                let position = self.current_position();
                let source = self.read_template_expression(start)?;
                chunks.push(TemplateChunk::Expr { source, position });
                continue;
            }
            text.push(self.advance());
        }
        if !text.is_empty() || chunks.is_empty() {
            chunks.push(TemplateChunk::Text(text));
        }
        self.tokens.push(Token::new(TokenKind::Template(chunks), start));
        Ok(())
    }

    /// Reads up to the `}` closing a `${`, honoring nested braces and strings.
    fn read_template_expression(&mut self, start: Position) -> Result<String, LexError> {
        let mut depth = 0usize;
        let mut source = String::new();
        let mut quote: Option<char> = None;
        loop {
            if self.is_at_end() {
                return Err(self.error("Unterminated template expression", start));
            }
            let ch = self.advance();
            if let Some(q) = quote {
                source.push(ch);
                if ch == '\\' && !self.is_at_end() {
                    source.push(self.advance());
                } else if ch == q {
                    quote = None;
                }
                continue;
            }
            match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '{' => depth += 1,
                '}' if depth == 0 => return Ok(source),
                '}' => depth -= 1,
                _ => {}
            }
            source.push(ch);
        }
    }

    fn handle_number(&mut self) -> Result<(), LexError> {
        let start = self.current_position();
        let mut literal = String::new();
        if self.current_char() == '0' && matches!(self.peek_char(), Some('x' | 'X')) {
            self.advance();
            self.advance();
            while self.current_char().is_ascii_hexdigit() || self.current_char() == '_' {
                let ch = self.advance();
                if ch != '_' {
                    literal.push(ch);
                }
            }
            let value = u64::from_str_radix(&literal, 16)
                .map_err(|_| self.error("Invalid hexadecimal literal", start))?;
            self.tokens
                .push(Token::new(TokenKind::Number(value as f64), start));
            return Ok(());
        }
        let mut seen_dot = false;
        let mut seen_exp = false;
        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_ascii_digit() {
                literal.push(self.advance());
            } else if ch == '_' {
                self.advance();
            } else if ch == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                literal.push(self.advance());
            } else if (ch == 'e' || ch == 'E') && !seen_exp {
                seen_exp = true;
                literal.push(self.advance());
                if matches!(self.current_char(), '+' | '-') {
                    literal.push(self.advance());
                }
            } else {
                break;
            }
        }
        let value: f64 = literal
            .parse()
            .map_err(|_| self.error(format!("Invalid number literal '{}'", literal), start))?;
        self.tokens.push(Token::new(TokenKind::Number(value), start));
        Ok(())
    }

    fn handle_identifier(&mut self) {
        let start = self.current_position();
        let mut name = String::new();
        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                name.push(self.advance());
            } else {
                break;
            }
        }
        let kind = KEYWORDS
            .get(name.as_str())
            .cloned()
            .unwrap_or(TokenKind::Identifier(name));
        self.tokens.push(Token::new(kind, start));
    }

    //=============================================
    //            Section 4: Operators & Delimiters
    //=============================================

    fn handle_operator_or_delimiter(&mut self) -> Result<(), LexError> {
        let start = self.current_position();
        let ch = self.advance();
        let next = self.current_char();
        let kind = match ch {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '+' => match next {
                '+' => self.two(TokenKind::PlusPlus),
                '=' => self.two(TokenKind::PlusEqual),
                _ => TokenKind::Plus,
            },
            '-' => match next {
                '-' => self.two(TokenKind::MinusMinus),
                '=' => self.two(TokenKind::MinusEqual),
                _ => TokenKind::Minus,
            },
            '*' => match next {
                '=' => self.two(TokenKind::StarEqual),
                _ => TokenKind::Star,
            },
            '/' => match next {
                '=' => self.two(TokenKind::SlashEqual),
                _ => TokenKind::Slash,
            },
            '%' => match next {
                '=' => self.two(TokenKind::PercentEqual),
                _ => TokenKind::Percent,
            },
            '=' => match next {
                '=' => {
                    self.advance();
                    if self.current_char() == '=' {
                        self.two(TokenKind::StrictEqual)
                    } else {
                        TokenKind::EqualEqual
                    }
                }
                '>' => self.two(TokenKind::Arrow),
                _ => TokenKind::Equal,
            },
            '!' => match next {
                '=' => {
                    self.advance();
                    if self.current_char() == '=' {
                        self.two(TokenKind::StrictNotEqual)
                    } else {
                        TokenKind::NotEqual
                    }
                }
                _ => TokenKind::Not,
            },
            '<' => match next {
                '=' => self.two(TokenKind::LessEqual),
                _ => TokenKind::Less,
            },
            '>' => match next {
                '=' => self.two(TokenKind::GreaterEqual),
                _ => TokenKind::Greater,
            },
            '&' if next == '&' => self.two(TokenKind::And),
            '|' if next == '|' => self.two(TokenKind::Or),
            '?' => match next {
                '?' => self.two(TokenKind::Nullish),
                _ => TokenKind::Question,
            },
            other => {
                return Err(self.error(format!("Unexpected character '{}'", other), start));
            }
        };
        self.tokens.push(Token::new(kind, start));
        Ok(())
    }

    /// Consumes the second character of a two-character operator.
    fn two(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }
}

//=============================================/*
//  Character-level scanning: trivia, literals (including template chunks),
//  identifiers/keywords and operators, each with a 1-based source position.
//============================================*/

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Tokenizer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_arrow_call() {
        assert_eq!(
            kinds("setTimeout(() => x, 0);"),
            vec![
                TokenKind::Identifier("setTimeout".into()),
                TokenKind::LeftParen,
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::Arrow,
                TokenKind::Identifier("x".into()),
                TokenKind::Comma,
                TokenKind::Number(0.0),
                TokenKind::RightParen,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strict_equality_and_nullish() {
        assert_eq!(
            kinds("a === b ?? c !== d"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::StrictEqual,
                TokenKind::Identifier("b".into()),
                TokenKind::Nullish,
                TokenKind::Identifier("c".into()),
                TokenKind::StrictNotEqual,
                TokenKind::Identifier("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = Tokenizer::new("a\n  b").tokenize().unwrap();
        assert_eq!(tokens[0].position.line, 1);
        assert_eq!(tokens[0].position.column, 1);
        assert_eq!(tokens[1].position.line, 2);
        assert_eq!(tokens[1].position.column, 3);
    }

    #[test]
    fn template_splits_expressions() {
        let tokens = kinds("`a${b + 1}c`");
        match &tokens[0] {
            TokenKind::Template(chunks) => {
                assert_eq!(chunks.len(), 3);
                assert_eq!(chunks[0], TemplateChunk::Text("a".into()));
                assert!(matches!(&chunks[1], TemplateChunk::Expr { source, .. } if source == "b + 1"));
            }
            other => panic!("expected template, got {other:?}"),
        }
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("// hi\n/* block */ x"),
            vec![TokenKind::Identifier("x".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = Tokenizer::new("  'abc").tokenize().unwrap_err();
        assert_eq!(err.position.column, 3);
    }
}
