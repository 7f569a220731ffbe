// Recursive-descent parser producing statement ASTs.
//
// Grammar:
//
//     program   := statement*
//     statement := "wave" "(" STRING "," expr ")" ";"?
//                | "let" IDENT "=" expr ";"?
//     expr      := sum ("|>" call)*
//     sum       := product (("+" | "-") product)*
//     product   := unary (("*" | "/") unary)*
//     unary     := "-" unary | primary
//     primary   := NUMBER | IDENT | IDENT "(" args? ")" | "(" expr ")"

use super::lexer::{Spanned, Token};
use super::signal::BinaryOp;
use super::{ParseError, ParseErrorKind, Position};

/// Nesting limit for expressions. Operator chains count too, since they
/// build equally deep trees.
const MAX_NESTING: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Name {
        name: String,
        pos: Position,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        pos: Position,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `input |> stage`, where `stage` is always a `Call`.
    Pipe {
        input: Box<Expr>,
        stage: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Wave {
        label: String,
        expr: Expr,
        pos: Position,
    },
    Let {
        name: String,
        expr: Expr,
    },
}

pub struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    pub fn parse_program(mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            while self.eat(&Token::Semicolon) {}
            if *self.peek() == Token::Eof {
                return Ok(statements);
            }
            statements.push(self.statement()?);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Token helpers
    // ───────────────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn current(&self) -> &Spanned {
        // The lexer always terminates the stream with Eof.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.cursor.min(last)]
    }

    fn advance(&mut self) -> Spanned {
        let spanned = self.current().clone();
        if self.cursor < self.tokens.len() {
            self.cursor += 1;
        }
        spanned
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        let current = self.current();
        ParseError::new(
            current.pos,
            ParseErrorKind::Unexpected {
                expected,
                found: current.token.describe(),
            },
        )
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ParseError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError::new(self.current().pos, ParseErrorKind::TooDeep));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ───────────────────────────────────────────────────────────────
    // Statements
    // ───────────────────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Statement, ParseError> {
        let Spanned { token, pos } = self.advance();
        let statement = match token {
            Token::Ident(keyword) if keyword == "wave" => {
                self.expect(Token::LParen, "`(`")?;
                let label = match self.advance() {
                    Spanned {
                        token: Token::Str(label),
                        pos,
                    } => {
                        if label.trim().is_empty() {
                            return Err(ParseError::new(pos, ParseErrorKind::EmptyLabel));
                        }
                        label
                    }
                    other => {
                        return Err(ParseError::new(
                            other.pos,
                            ParseErrorKind::Unexpected {
                                expected: "a quoted label",
                                found: other.token.describe(),
                            },
                        ));
                    }
                };
                self.expect(Token::Comma, "`,`")?;
                let expr = self.expr()?;
                self.expect(Token::RParen, "`)`")?;
                Statement::Wave { label, expr, pos }
            }
            Token::Ident(keyword) if keyword == "let" => {
                let name = match self.advance().token {
                    Token::Ident(name) => name,
                    _ => {
                        self.cursor -= 1;
                        return Err(self.unexpected("a name"));
                    }
                };
                self.expect(Token::Equals, "`=`")?;
                let expr = self.expr()?;
                Statement::Let { name, expr }
            }
            Token::Ident(other) => {
                return Err(ParseError::new(pos, ParseErrorKind::UnknownStatement(other)));
            }
            other => {
                return Err(ParseError::new(
                    pos,
                    ParseErrorKind::Unexpected {
                        expected: "a statement",
                        found: other.describe(),
                    },
                ));
            }
        };
        self.eat(&Token::Semicolon);
        Ok(statement)
    }

    // ───────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────

    pub fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut input = self.sum()?;
        let mut chained = 0;
        while self.eat(&Token::Pipe) {
            self.enter()?;
            chained += 1;
            let stage = match self.primary()? {
                call @ Expr::Call { .. } => call,
                _ => {
                    return Err(ParseError::new(
                        self.tokens[self.cursor.saturating_sub(1)].pos,
                        ParseErrorKind::PipeStage,
                    ));
                }
            };
            input = Expr::Pipe {
                input: Box::new(input),
                stage: Box::new(stage),
            };
        }
        self.depth -= chained;
        Ok(input)
    }

    fn sum(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.product()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => {
                    self.depth -= chained;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.enter()?;
            chained += 1;
            let rhs = self.product()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn product(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        let mut chained = 0;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => {
                    self.depth -= chained;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.enter()?;
            chained += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let inner = self.unary();
            self.leave();
            return Ok(Expr::Neg(Box::new(inner?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Spanned { token, pos } = self.current().clone();
        match token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Ident(name) => {
                self.advance();
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Name { name, pos });
                }
                self.enter()?;
                let args = self.args();
                self.leave();
                Ok(Expr::Call {
                    name,
                    args: args?,
                    pos,
                })
            }
            Token::LParen => {
                self.advance();
                self.enter()?;
                let inner = self.expr();
                self.leave();
                let inner = inner?;
                self.expect(Token::RParen, "`)`")?;
                Ok(inner)
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// Arguments after the opening parenthesis, consuming the closing one.
    fn args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma, "`,` or `)`")?;
        }
    }
}
