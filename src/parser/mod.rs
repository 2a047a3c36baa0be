//=============================================
// loopscope/parser.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Recursive descent parser for the script dialect
// Objective: Transform token streams into AST nodes consumed by the interpreter
//=============================================

//=============================================
//            Section 1: Imports
//=============================================

use crate::ast::{
    BinaryOp, CatchClause, DeclKind, Declarator, Expr, FunctionBody, FunctionDecl, Literal,
    LogicalOp, Parameter, Program, Stmt, TemplatePart, UnaryOp,
};
use crate::tokenizer::{LexError, Position, TemplateChunk, Token, TokenKind, Tokenizer};
use std::rc::Rc;

const MAX_NESTING: usize = 256;

//=============================================
//            Section 2: Parse Errors
//=============================================

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken {
        expected: String,
        found: TokenKind,
        position: Position,
    },
    UnexpectedEndOfInput {
        expected: String,
        position: Position,
    },
    InvalidSyntax {
        message: String,
        position: Position,
    },
}

impl ParseError {
    pub fn position(&self) -> Position {
        match self {
            ParseError::UnexpectedToken { position, .. }
            | ParseError::UnexpectedEndOfInput { position, .. }
            | ParseError::InvalidSyntax { position, .. } => *position,
        }
    }

    /// Message without the trailing location, as diagnostics carry it separately.
    pub fn message(&self) -> String {
        match self {
            ParseError::UnexpectedToken {
                expected, found, ..
            } => format!("Expected {} but found {}", expected, found),
            ParseError::UnexpectedEndOfInput { expected, .. } => {
                format!("Unexpected end of input, expected {}", expected)
            }
            ParseError::InvalidSyntax { message, .. } => message.clone(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let position = self.position();
        write!(
            f,
            "SyntaxError: {} at line {}, column {}",
            self.message(),
            position.line,
            position.column
        )
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError::InvalidSyntax {
            message: err.message,
            position: err.position,
        }
    }
}

/// Tokenizes and parses a whole script.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

//=============================================
//            Section 3: Parser State & Statements
//=============================================

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    nesting: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            nesting: 0,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        match self.peek().kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::LeftBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                let stmt = self.parse_var_decl()?;
                self.consume_semicolon();
                Ok(stmt)
            }
            TokenKind::Function => {
                self.advance();
                let decl = self.parse_function_rest(true, position)?;
                Ok(Stmt::Function(Rc::new(decl)))
            }
            TokenKind::Async | TokenKind::Await => Err(self.unsupported_async()),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::RightBrace)
                    || self.is_at_end()
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon();
                Ok(Stmt::Return { value, position })
            }
            TokenKind::Break => {
                self.advance();
                self.consume_semicolon();
                Ok(Stmt::Break(position))
            }
            TokenKind::Continue => {
                self.advance();
                self.consume_semicolon();
                Ok(Stmt::Continue(position))
            }
            TokenKind::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.consume_semicolon();
                Ok(Stmt::Throw { value, position })
            }
            TokenKind::Try => self.parse_try(),
            TokenKind::Import => self.parse_import(),
            _ => {
                let expr = self.parse_expression()?;
                self.consume_semicolon();
                Ok(Stmt::Expression { expr, position })
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(ParseError::UnexpectedEndOfInput {
                    expected: "'}'".to_string(),
                    position: self.current_position(),
                });
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_decl_kind(&mut self) -> Result<DeclKind, ParseError> {
        let kind = match self.peek().kind {
            TokenKind::Let => DeclKind::Let,
            TokenKind::Const => DeclKind::Const,
            TokenKind::Var => DeclKind::Var,
            _ => return Err(self.unexpected("a declaration keyword")),
        };
        self.advance();
        Ok(kind)
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        let kind = self.parse_decl_kind()?;
        let mut declarations = Vec::new();
        loop {
            let decl_position = self.current_position();
            let name = self.consume_identifier()?;
            let init = if self.check(&TokenKind::Equal) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(ParseError::InvalidSyntax {
                    message: "Missing initializer in const declaration".to_string(),
                    position: decl_position,
                });
            }
            declarations.push(Declarator {
                name,
                init,
                position: decl_position,
            });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(Stmt::VarDecl {
            kind,
            declarations,
            position,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        self.advance();
        self.consume(&TokenKind::LeftParen, "'(' after if")?;
        let condition = self.parse_expression()?;
        self.consume(&TokenKind::RightParen, "')' after if condition")?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.check(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            position,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        self.advance();
        self.consume(&TokenKind::LeftParen, "'(' after while")?;
        let condition = self.parse_expression()?;
        self.consume(&TokenKind::RightParen, "')' after while condition")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::While {
            condition,
            body,
            position,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        self.advance();
        self.consume(&TokenKind::LeftParen, "'(' after for")?;

        let is_decl = matches!(
            self.peek().kind,
            TokenKind::Let | TokenKind::Const | TokenKind::Var
        );
        if is_decl
            && matches!(self.peek_at(1).kind, TokenKind::Identifier(_))
            && self.peek_at(2).kind == TokenKind::Of
        {
            let kind = self.parse_decl_kind()?;
            let name = self.consume_identifier()?;
            self.advance();
            let iterable = self.parse_expression()?;
            self.consume(&TokenKind::RightParen, "')' after for-of head")?;
            let body = Box::new(self.parse_statement()?);
            return Ok(Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
                position,
            });
        }

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else if is_decl {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            let expr_position = self.current_position();
            let expr = self.parse_expression()?;
            Some(Box::new(Stmt::Expression {
                expr,
                position: expr_position,
            }))
        };
        self.consume(&TokenKind::Semicolon, "';' after for initializer")?;
        let condition = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume(&TokenKind::Semicolon, "';' after for condition")?;
        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume(&TokenKind::RightParen, "')' after for clauses")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            condition,
            update,
            body,
            position,
        })
    }

    fn parse_try(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        self.advance();
        let block = self.parse_block()?;
        let handler = if self.check(&TokenKind::Catch) {
            self.advance();
            let param = if self.check(&TokenKind::LeftParen) {
                self.advance();
                let name = self.consume_identifier()?;
                self.consume(&TokenKind::RightParen, "')' after catch binding")?;
                Some(name)
            } else {
                None
            };
            let body = self.parse_block()?;
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finalizer = if self.check(&TokenKind::Finally) {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(ParseError::InvalidSyntax {
                message: "Missing catch or finally after try".to_string(),
                position,
            });
        }
        Ok(Stmt::Try {
            block,
            handler,
            finalizer,
            position,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let position = self.current_position();
        self.advance();
        let binding = self.consume_identifier()?;
        self.consume(&TokenKind::From, "'from' in import")?;
        let module = match &self.peek().kind {
            TokenKind::String(module) => module.clone(),
            _ => return Err(self.unexpected("module specifier string")),
        };
        self.advance();
        self.consume_semicolon();
        Ok(Stmt::Import {
            binding,
            module,
            position,
        })
    }

    //=============================================
    //            Section 4: Functions
    //=============================================

    /// Parses `name? (params) { body }` after the `function` keyword.
    fn parse_function_rest(
        &mut self,
        require_name: bool,
        position: Position,
    ) -> Result<FunctionDecl, ParseError> {
        let name = if let TokenKind::Identifier(_) = self.peek().kind {
            Some(self.consume_identifier()?)
        } else if require_name {
            return Err(self.unexpected("function name"));
        } else {
            None
        };
        let params = self.parse_parameters()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(FunctionDecl {
            name,
            params,
            body,
            is_arrow: false,
            position,
        })
    }

    fn parse_parameters(&mut self) -> Result<Vec<Parameter>, ParseError> {
        self.consume(&TokenKind::LeftParen, "'(' before parameters")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            let name = self.consume_identifier()?;
            let default = if self.check(&TokenKind::Equal) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Parameter { name, default });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.consume(&TokenKind::RightParen, "')' after parameters")?;
        Ok(params)
    }

    fn is_arrow_start(&self) -> bool {
        match self.peek().kind {
            TokenKind::Identifier(_) => self.peek_at(1).kind == TokenKind::Arrow,
            TokenKind::LeftParen => {
                let mut depth = 0usize;
                let mut index = self.current;
                while let Some(token) = self.tokens.get(index) {
                    match token.kind {
                        TokenKind::LeftParen => depth += 1,
                        TokenKind::RightParen => {
                            depth -= 1;
                            if depth == 0 {
                                return self
                                    .tokens
                                    .get(index + 1)
                                    .is_some_and(|t| t.kind == TokenKind::Arrow);
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    index += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        let params = if self.check(&TokenKind::LeftParen) {
            self.parse_parameters()?
        } else {
            vec![Parameter {
                name: self.consume_identifier()?,
                default: None,
            }]
        };
        self.consume(&TokenKind::Arrow, "'=>'")?;
        let body = if self.check(&TokenKind::LeftBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };
        Ok(Expr::Function(Rc::new(FunctionDecl {
            name: None,
            params,
            body,
            is_arrow: true,
            position,
        })))
    }

    //=============================================
    //            Section 5: Expressions
    //=============================================

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ParseError::InvalidSyntax {
                message: "Expression nested too deeply".to_string(),
                position: self.current_position(),
            });
        }
        let result = self.parse_assignment();
        self.nesting -= 1;
        result
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Async) {
            return Err(self.unsupported_async());
        }
        if self.is_arrow_start() {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;
        let operator = match self.peek().kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Subtract),
            TokenKind::StarEqual => Some(BinaryOp::Multiply),
            TokenKind::SlashEqual => Some(BinaryOp::Divide),
            TokenKind::PercentEqual => Some(BinaryOp::Modulo),
            _ => return Ok(target),
        };
        let position = target.position();
        if !target.is_assignable() {
            return Err(ParseError::InvalidSyntax {
                message: "Invalid left-hand side in assignment".to_string(),
                position,
            });
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            operator,
            value: Box::new(value),
            position,
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_nullish()?;
        if !self.check(&TokenKind::Question) {
            return Ok(test);
        }
        let position = test.position();
        self.advance();
        let consequent = self.parse_assignment()?;
        self.consume(&TokenKind::Colon, "':' in conditional expression")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
            position,
        })
    }

    fn parse_nullish(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_logical_or()?;
        while self.check(&TokenKind::Nullish) {
            self.advance();
            let right = self.parse_logical_or()?;
            expr = logical(expr, LogicalOp::Nullish, right);
        }
        Ok(expr)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_logical_and()?;
        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.parse_logical_and()?;
            expr = logical(expr, LogicalOp::Or, right);
        }
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_equality()?;
            expr = logical(expr, LogicalOp::And, right);
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        while let Some(op) = self.match_binary_op(&[
            (TokenKind::EqualEqual, BinaryOp::Equal),
            (TokenKind::NotEqual, BinaryOp::NotEqual),
            (TokenKind::StrictEqual, BinaryOp::StrictEqual),
            (TokenKind::StrictNotEqual, BinaryOp::StrictNotEqual),
        ]) {
            let right = self.parse_comparison()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        while let Some(op) = self.match_binary_op(&[
            (TokenKind::Less, BinaryOp::Less),
            (TokenKind::Greater, BinaryOp::Greater),
            (TokenKind::LessEqual, BinaryOp::LessEqual),
            (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
        ]) {
            let right = self.parse_term()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_factor()?;
        while let Some(op) = self.match_binary_op(&[
            (TokenKind::Plus, BinaryOp::Add),
            (TokenKind::Minus, BinaryOp::Subtract),
        ]) {
            let right = self.parse_factor()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        while let Some(op) = self.match_binary_op(&[
            (TokenKind::Star, BinaryOp::Multiply),
            (TokenKind::Slash, BinaryOp::Divide),
            (TokenKind::Percent, BinaryOp::Modulo),
        ]) {
            let right = self.parse_unary()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        let operator = match self.peek().kind {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Typeof => Some(UnaryOp::Typeof),
            TokenKind::Await => return Err(self.unsupported_async()),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let increment = self.check(&TokenKind::PlusPlus);
                self.advance();
                let target = self.parse_unary()?;
                return self.update(target, increment, true, position);
            }
            _ => None,
        };
        if let Some(operator) = operator {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                operator,
                operand: Box::new(operand),
                position,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_call()?;
        let increment = match self.peek().kind {
            TokenKind::PlusPlus => true,
            TokenKind::MinusMinus => false,
            _ => return Ok(expr),
        };
        let position = expr.position();
        self.advance();
        self.update(expr, increment, false, position)
    }

    fn update(
        &self,
        target: Expr,
        increment: bool,
        prefix: bool,
        position: Position,
    ) -> Result<Expr, ParseError> {
        if !target.is_assignable() {
            return Err(ParseError::InvalidSyntax {
                message: "Invalid left-hand side expression in update operation".to_string(),
                position,
            });
        }
        Ok(Expr::Update {
            increment,
            prefix,
            target: Box::new(target),
            position,
        })
    }

    fn parse_call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = if self.check(&TokenKind::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };

        loop {
            match self.peek().kind {
                TokenKind::LeftParen => {
                    // Calls are located at the callee's start.
                    let position = expr.position();
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        position,
                    };
                }
                TokenKind::Dot | TokenKind::LeftBracket => {
                    expr = self.parse_member_suffix(expr)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_new(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        self.advance();
        let mut callee = self.parse_primary()?;
        while matches!(self.peek().kind, TokenKind::Dot | TokenKind::LeftBracket) {
            callee = self.parse_member_suffix(callee)?;
        }
        let args = if self.check(&TokenKind::LeftParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
            position,
        })
    }

    fn parse_member_suffix(&mut self, object: Expr) -> Result<Expr, ParseError> {
        let position = self.current_position();
        if self.check(&TokenKind::Dot) {
            self.advance();
            let property = self.consume_property_name()?;
            Ok(Expr::Member {
                object: Box::new(object),
                property,
                position,
            })
        } else {
            self.consume(&TokenKind::LeftBracket, "'['")?;
            let index = self.parse_expression()?;
            self.consume(&TokenKind::RightBracket, "']' after index")?;
            Ok(Expr::Index {
                object: Box::new(object),
                index: Box::new(index),
                position,
            })
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.consume(&TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            args.push(self.parse_expression()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.consume(&TokenKind::RightParen, "')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        let kind = self.peek().kind.clone();
        match kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(literal(Literal::Number(n), position))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(literal(Literal::String(s), position))
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(literal(Literal::Bool(kind == TokenKind::True), position))
            }
            TokenKind::Null => {
                self.advance();
                Ok(literal(Literal::Null, position))
            }
            TokenKind::Template(chunks) => {
                self.advance();
                self.parse_template(chunks, position)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if name == "undefined" {
                    Ok(literal(Literal::Undefined, position))
                } else {
                    Ok(Expr::Identifier { name, position })
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume(&TokenKind::RightParen, "')' after expression")?;
                Ok(expr)
            }
            TokenKind::LeftBracket => self.parse_array(),
            TokenKind::LeftBrace => self.parse_object(),
            TokenKind::Function => {
                self.advance();
                let decl = self.parse_function_rest(false, position)?;
                Ok(Expr::Function(Rc::new(decl)))
            }
            TokenKind::Async | TokenKind::Await => Err(self.unsupported_async()),
            TokenKind::Eof => Err(ParseError::UnexpectedEndOfInput {
                expected: "expression".to_string(),
                position,
            }),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_array(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        self.advance();
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBracket) {
            elements.push(self.parse_expression()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.consume(&TokenKind::RightBracket, "']' after array elements")?;
        Ok(Expr::Array { elements, position })
    }

    fn parse_object(&mut self) -> Result<Expr, ParseError> {
        let position = self.current_position();
        self.advance();
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            let key_position = self.current_position();
            let key = match &self.peek().kind {
                TokenKind::String(s) => {
                    let s = s.clone();
                    self.advance();
                    s
                }
                TokenKind::Number(n) => {
                    let n = *n;
                    self.advance();
                    crate::interpreter::value::format_number(n)
                }
                _ => self.consume_property_name()?,
            };
            let value = if self.check(&TokenKind::Colon) {
                self.advance();
                self.parse_expression()?
            } else if self.check(&TokenKind::LeftParen) {
                let params = self.parse_parameters()?;
                let body = FunctionBody::Block(self.parse_block()?);
                Expr::Function(Rc::new(FunctionDecl {
                    name: Some(key.clone()),
                    params,
                    body,
                    is_arrow: false,
                    position: key_position,
                }))
            } else {
                Expr::Identifier {
                    name: key.clone(),
                    position: key_position,
                }
            };
            properties.push((key, value));
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.consume(&TokenKind::RightBrace, "'}' after object literal")?;
        Ok(Expr::Object {
            properties,
            position,
        })
    }

    fn parse_template(
        &mut self,
        chunks: Vec<TemplateChunk>,
        position: Position,
    ) -> Result<Expr, ParseError> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Expr {
                    source,
                    position: origin,
                } => {
                    let tokens =
                        Tokenizer::with_origin(&source, origin.line, origin.column).tokenize()?;
                    let mut nested = Parser::new(tokens);
                    nested.nesting = self.nesting;
                    let expr = nested.parse_expression()?;
                    if !nested.is_at_end() {
                        return Err(nested.unexpected("'}' closing template expression"));
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template { parts, position })
    }

    //=============================================
    //            Section 6: Token Utilities
    //=============================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, distance: usize) -> &Token {
        let index = (self.current + distance).min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current.saturating_sub(1).min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        self.tokens
            .get(self.current)
            .map_or(true, |token| token.kind == TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        !self.is_at_end() && &self.peek().kind == kind
    }

    fn current_position(&self) -> Position {
        self.tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map_or(Position::new(1, 1, 0), |token| token.position)
    }

    fn consume(&mut self, kind: &TokenKind, expected: &str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn consume_semicolon(&mut self) {
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn consume_identifier(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Identifiers and keywords are both valid after `.` and as object keys.
    fn consume_property_name(&mut self) -> Result<String, ParseError> {
        if let Some(text) = self.peek().kind.keyword_text() {
            self.advance();
            return Ok(text.to_string());
        }
        self.consume_identifier()
    }

    fn match_binary_op(&mut self, table: &[(TokenKind, BinaryOp)]) -> Option<BinaryOp> {
        let op = table
            .iter()
            .find(|(kind, _)| self.check(kind))
            .map(|(_, op)| *op)?;
        self.advance();
        Some(op)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        if token.kind == TokenKind::Eof {
            ParseError::UnexpectedEndOfInput {
                expected: expected.to_string(),
                position: token.position,
            }
        } else {
            ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.kind.clone(),
                position: token.position,
            }
        }
    }

    fn unsupported_async(&self) -> ParseError {
        ParseError::InvalidSyntax {
            message: "async/await is not supported; use promises and callbacks".to_string(),
            position: self.current_position(),
        }
    }
}

fn literal(value: Literal, position: Position) -> Expr {
    Expr::Literal { value, position }
}

fn binary(left: Expr, operator: BinaryOp, right: Expr) -> Expr {
    let position = left.position();
    Expr::Binary {
        left: Box::new(left),
        operator,
        right: Box::new(right),
        position,
    }
}

fn logical(left: Expr, operator: LogicalOp, right: Expr) -> Expr {
    let position = left.position();
    Expr::Logical {
        left: Box::new(left),
        operator,
        right: Box::new(right),
        position,
    }
}

//=============================================/*
//  Precedence climbing from assignment down to primary expressions, with
//  arrow detection by parenthesis lookahead and template sub-parsing.
//============================================*/
