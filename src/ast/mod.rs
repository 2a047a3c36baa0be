//=====================================================
// File: ast/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Script abstract syntax tree
// Objective: Define statement and expression nodes consumed by the
//            tree-walking interpreter
//=====================================================

use crate::tokenizer::Position;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Concise arrow body: `x => x + 1`.
    Expr(Box<Expr>),
}

/// Shared by declarations, function expressions and arrows.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Option<String>,
    pub params: Vec<Parameter>,
    pub body: FunctionBody,
    pub is_arrow: bool,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    VarDecl {
        kind: DeclKind,
        declarations: Vec<Declarator>,
        position: Position,
    },
    Function(Rc<FunctionDecl>),
    Expression {
        expr: Expr,
        position: Position,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        position: Position,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        position: Position,
    },
    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        position: Position,
    },
    ForOf {
        kind: DeclKind,
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
        position: Position,
    },
    Return {
        value: Option<Expr>,
        position: Position,
    },
    Break(Position),
    Continue(Position),
    Throw {
        value: Expr,
        position: Position,
    },
    Try {
        block: Vec<Stmt>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Stmt>>,
        position: Position,
    },
    Block(Vec<Stmt>),
    /// `import fs from 'fs'`, evaluated as `const fs = require('fs')`.
    Import {
        binding: String,
        module: String,
        position: Position,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Undefined,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
    Typeof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Literal,
        position: Position,
    },
    Template {
        parts: Vec<TemplatePart>,
        position: Position,
    },
    Identifier {
        name: String,
        position: Position,
    },
    Array {
        elements: Vec<Expr>,
        position: Position,
    },
    Object {
        properties: Vec<(String, Expr)>,
        position: Position,
    },
    Function(Rc<FunctionDecl>),
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        position: Position,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
        position: Position,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        position: Position,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
        position: Position,
    },
    Assign {
        target: Box<Expr>,
        operator: Option<BinaryOp>,
        value: Box<Expr>,
        position: Position,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
        position: Position,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        position: Position,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
        position: Position,
    },
    Member {
        object: Box<Expr>,
        property: String,
        position: Position,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        position: Position,
    },
}

impl Expr {
    pub fn position(&self) -> Position {
        match self {
            Expr::Literal { position, .. }
            | Expr::Template { position, .. }
            | Expr::Identifier { position, .. }
            | Expr::Array { position, .. }
            | Expr::Object { position, .. }
            | Expr::Unary { position, .. }
            | Expr::Update { position, .. }
            | Expr::Binary { position, .. }
            | Expr::Logical { position, .. }
            | Expr::Assign { position, .. }
            | Expr::Conditional { position, .. }
            | Expr::Call { position, .. }
            | Expr::New { position, .. }
            | Expr::Member { position, .. }
            | Expr::Index { position, .. } => *position,
            Expr::Function(decl) => decl.position,
        }
    }

    /// Whether this expression may appear on the left of `=` or `++`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Identifier { .. } | Expr::Member { .. } | Expr::Index { .. }
        )
    }
}
