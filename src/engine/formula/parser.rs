// ==========================================
// 公式语言 - 语法分析
// ==========================================
// 文法（优先级由低到高）:
//   ternary → or → and → equality → comparison → concat(&) → additive → term → unary → postfix
// 语句: let / 赋值 / if-else / return / 表达式
// ==========================================

use super::lexer::{tokenize, Spanned, Token};
use crate::engine::error::{ProcessingError, ProcessingResult};
use crate::domain::FieldValue;

/// 嵌套深度上限（防止恶意输入导致栈溢出）
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(FieldValue),
    Variable(String),
    List(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        position: usize,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Let { name: String, value: Expr },
    If {
        condition: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    Return(Expr),
    Expr(Expr),
}

/// 编译后的公式
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub(crate) statements: Vec<Stmt>,
}

pub(crate) fn parse(source: &str) -> ProcessingResult<Program> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut statements = Vec::new();
    while !parser.check(&Token::Eof) {
        statements.push(parser.statement()?);
    }
    Ok(Program { statements })
}

const BINARY_LEVELS: usize = 7;

fn binary_op(level: usize, token: &Token) -> Option<BinaryOp> {
    let op = match (level, token) {
        (0, Token::Or) => BinaryOp::Or,
        (1, Token::And) => BinaryOp::And,
        (2, Token::Eq) => BinaryOp::Eq,
        (2, Token::NotEq) => BinaryOp::NotEq,
        (3, Token::Lt) => BinaryOp::Lt,
        (3, Token::LtEq) => BinaryOp::LtEq,
        (3, Token::Gt) => BinaryOp::Gt,
        (3, Token::GtEq) => BinaryOp::GtEq,
        (4, Token::Amp) => BinaryOp::Concat,
        (5, Token::Plus) => BinaryOp::Add,
        (5, Token::Minus) => BinaryOp::Sub,
        (6, Token::Star) => BinaryOp::Mul,
        (6, Token::Slash) => BinaryOp::Div,
        (6, Token::Percent) => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> ProcessingResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("期望 {}", what)))
        }
    }

    fn error(&self, message: impl Into<String>) -> ProcessingError {
        ProcessingError::FormulaSyntaxError {
            position: self.position(),
            message: message.into(),
        }
    }

    fn enter(&mut self) -> ProcessingResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("嵌套过深"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ===== 语句 =====

    fn statement(&mut self) -> ProcessingResult<Stmt> {
        self.enter()?;
        let stmt = match self.peek().clone() {
            Token::Let => {
                self.advance();
                let name = match self.advance() {
                    Token::Ident(name) => name,
                    _ => return Err(self.error("let 之后期望变量名")),
                };
                self.expect(&Token::Assign, "=")?;
                let value = self.expression()?;
                Stmt::Let { name, value }
            }
            Token::Ident(name) if self.peek_at(1) == &Token::Assign => {
                self.advance();
                self.advance();
                let value = self.expression()?;
                Stmt::Let { name, value }
            }
            Token::If => self.if_statement()?,
            Token::Return => {
                self.advance();
                Stmt::Return(self.expression()?)
            }
            _ => Stmt::Expr(self.expression()?),
        };
        self.eat(&Token::Semicolon);
        self.leave();
        Ok(stmt)
    }

    fn if_statement(&mut self) -> ProcessingResult<Stmt> {
        self.expect(&Token::If, "if")?;
        self.expect(&Token::LParen, "(")?;
        let condition = self.expression()?;
        self.expect(&Token::RParen, ")")?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            condition,
            then,
            otherwise,
        })
    }

    fn block(&mut self) -> ProcessingResult<Vec<Stmt>> {
        self.expect(&Token::LBrace, "{")?;
        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("代码块未闭合"));
            }
            statements.push(self.statement()?);
        }
        self.advance();
        Ok(statements)
    }

    // ===== 表达式 =====

    fn expression(&mut self) -> ProcessingResult<Expr> {
        self.enter()?;
        let expr = self.ternary();
        self.leave();
        expr
    }

    fn ternary(&mut self) -> ProcessingResult<Expr> {
        let condition = self.binary_level(0)?;
        if self.eat(&Token::Question) {
            let then = self.expression()?;
            self.expect(&Token::Colon, ":")?;
            let otherwise = self.expression()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(condition)
    }

    /// 按优先级逐层解析左结合二元运算
    fn binary_level(&mut self, level: usize) -> ProcessingResult<Expr> {
        if level >= BINARY_LEVELS {
            return self.unary();
        }

        let mut left = self.binary_level(level + 1)?;
        while let Some(op) = binary_op(level, self.peek()) {
            self.advance();
            let right = self.binary_level(level + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> ProcessingResult<Expr> {
        let op = match self.peek() {
            Token::Not => Some(UnaryOp::Not),
            Token::Minus => Some(UnaryOp::Neg),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                self.enter()?;
                let operand = self.unary()?;
                self.leave();
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ProcessingResult<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.expression()?;
            self.expect(&Token::RBracket, "]")?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> ProcessingResult<Expr> {
        let position = self.position();
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(FieldValue::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(FieldValue::Text(s))),
            Token::True => Ok(Expr::Literal(FieldValue::Bool(true))),
            Token::False => Ok(Expr::Literal(FieldValue::Bool(false))),
            Token::Null => Ok(Expr::Literal(FieldValue::Null)),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments(&Token::RParen)?;
                    Ok(Expr::Call {
                        name,
                        args,
                        position,
                    })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(&Token::RParen, ")")?;
                Ok(expr)
            }
            Token::LBracket => Ok(Expr::List(self.arguments(&Token::RBracket)?)),
            Token::Eof => Err(self.error("公式意外结束")),
            other => Err(ProcessingError::FormulaSyntaxError {
                position,
                message: format!("意外的符号 {:?}", other),
            }),
        }
    }

    fn arguments(&mut self, close: &Token) -> ProcessingResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(close) {
                return Ok(args);
            }
            self.expect(&Token::Comma, ",")?;
        }
    }
}
