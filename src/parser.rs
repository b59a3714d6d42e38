//! Parser for the Determa language
//!
//! A recursive descent parser with one token of lookahead. Syntax errors
//! trigger panic-mode recovery (skip to the next `;`) so several errors
//! can be reported in a single pass; any error discards the AST.
//!
//! When PDA tracing is enabled every grammar function logs a PUSH/POP
//! pair with indentation matching the descent depth.

use crate::ast::{BinaryOp, DataType, Expr, Program, Stmt, UnaryOp};
use crate::error::{DetError, ErrorKind, Result};
use crate::token::{Token, TokenKind};

/// The parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<DetError>,
    trace_enabled: bool,
    trace_depth: usize,
}

impl Parser {
    /// Create a new parser from tokens
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            trace_enabled: false,
            trace_depth: 0,
        }
    }

    /// Enable the PDA-style descent trace
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    /// Parse the tokens into a program. On failure every collected error
    /// is returned and the partial tree is discarded.
    pub fn parse(&mut self) -> std::result::Result<Program, Vec<DetError>> {
        self.skip_error_tokens();

        let mut statements = Vec::new();

        while !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        if self.errors.is_empty() {
            Ok(Program::new(statements))
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    // ==================== Declarations ====================

    fn declaration(&mut self) -> Result<Stmt> {
        self.traced("Declaration", |p| {
            if p.match_token(&TokenKind::Func) {
                p.func_declaration()
            } else if p.match_token(&TokenKind::Var) {
                p.var_declaration()
            } else {
                p.statement()
            }
        })
    }

    fn var_declaration(&mut self) -> Result<Stmt> {
        self.traced("VarDecl", |p| {
            let span = p.previous().span;

            let name = p.expect_ident("Expected variable name")?;

            let init = if p.match_token(&TokenKind::Equal) {
                Some(p.expression()?)
            } else {
                None
            };

            p.expect(&TokenKind::Semicolon, "Expected ';' after variable declaration")?;
            Ok(Stmt::VarDecl { name, init, span })
        })
    }

    fn func_declaration(&mut self) -> Result<Stmt> {
        self.traced("FuncDecl", |p| {
            let span = p.previous().span;

            let name = p.expect_ident("Expected function name")?;
            p.expect(&TokenKind::LeftParen, "Expected '(' after function name")?;

            let mut params = Vec::new();
            if !p.check(&TokenKind::RightParen) {
                loop {
                    params.push(p.expect_ident("Expected parameter name")?);
                    if !p.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            p.expect(&TokenKind::RightParen, "Expected ')' after parameters")?;

            let return_type = if p.match_token(&TokenKind::Colon) {
                p.return_type()?
            } else {
                DataType::Void
            };

            p.expect(&TokenKind::LeftBrace, "Expected '{' before function body")?;
            let body = Box::new(p.block()?);

            Ok(Stmt::Func { name, params, return_type, body, span })
        })
    }

    fn return_type(&mut self) -> Result<DataType> {
        if self.match_token(&TokenKind::TypeInt) {
            Ok(DataType::Int)
        } else if self.match_token(&TokenKind::TypeBool) {
            Ok(DataType::Bool)
        } else if self.match_token(&TokenKind::TypeStr) {
            Ok(DataType::Str)
        } else if self.match_token(&TokenKind::TypeVoid) {
            Ok(DataType::Void)
        } else {
            Err(self.error_at_current(ErrorKind::InvalidReturnType))
        }
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> Result<Stmt> {
        self.traced("Statement", |p| {
            if p.match_token(&TokenKind::If) {
                p.if_statement()
            } else if p.match_token(&TokenKind::While) {
                p.while_statement()
            } else if p.match_token(&TokenKind::LeftBrace) {
                p.block()
            } else if p.match_token(&TokenKind::Return) {
                p.return_statement()
            } else if p.match_token(&TokenKind::Print) {
                p.print_statement()
            } else {
                let expr = p.expression()?;
                p.expect(&TokenKind::Semicolon, "Expected ';' after expression")?;
                Ok(Stmt::Expr { expr })
            }
        })
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.traced("IfStmt", |p| {
            let span = p.previous().span;

            let condition = p.expression()?;
            p.expect(&TokenKind::LeftBrace, "Expected '{' after if condition")?;
            let then_branch = Box::new(p.block()?);

            let else_branch = if p.match_token(&TokenKind::Elif) {
                // An elif chain is just a nested if in the else slot
                Some(Box::new(p.if_statement()?))
            } else if p.match_token(&TokenKind::Else) {
                p.expect(&TokenKind::LeftBrace, "Expected '{' after else")?;
                Some(Box::new(p.block()?))
            } else {
                None
            };

            Ok(Stmt::If { condition, then_branch, else_branch, span })
        })
    }

    fn while_statement(&mut self) -> Result<Stmt> {
        self.traced("WhileStmt", |p| {
            let span = p.previous().span;

            let condition = p.expression()?;
            p.expect(&TokenKind::LeftBrace, "Expected '{' after while condition")?;
            let body = Box::new(p.block()?);

            Ok(Stmt::While { condition, body, span })
        })
    }

    /// Parse the statements of a block. The opening '{' has already been
    /// consumed. Errors inside the block are recorded and recovery
    /// continues at the next statement so one bad line does not hide the
    /// rest of the block.
    fn block(&mut self) -> Result<Stmt> {
        self.traced("Block", |p| {
            let span = p.previous().span;
            let mut stmts = Vec::new();

            while !p.check(&TokenKind::RightBrace) && !p.is_at_end() {
                match p.declaration() {
                    Ok(stmt) => stmts.push(stmt),
                    Err(err) => {
                        p.errors.push(err);
                        p.synchronize_in_block();
                    }
                }
            }

            p.expect(&TokenKind::RightBrace, "Expected '}' after block")?;
            Ok(Stmt::Block { stmts, span })
        })
    }

    fn return_statement(&mut self) -> Result<Stmt> {
        self.traced("ReturnStmt", |p| {
            let span = p.previous().span;

            let value = if p.check(&TokenKind::Semicolon) {
                None
            } else {
                Some(p.expression()?)
            };

            p.expect(&TokenKind::Semicolon, "Expected ';' after return value")?;
            Ok(Stmt::Return { value, span })
        })
    }

    fn print_statement(&mut self) -> Result<Stmt> {
        self.traced("PrintStmt", |p| {
            let span = p.previous().span;

            let expr = p.expression()?;
            p.expect(&TokenKind::Semicolon, "Expected ';' after value")?;
            Ok(Stmt::Print { expr, span })
        })
    }

    // ==================== Expressions ====================

    fn expression(&mut self) -> Result<Expr> {
        self.traced("Expression", |p| p.assignment())
    }

    fn assignment(&mut self) -> Result<Expr> {
        let expr = self.equality()?;

        let compound = match self.peek().kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Mod),
            _ => return Ok(expr),
        };

        let op = self.advance().clone();
        // Right-associative: a = b = c parses as a = (b = c)
        let value = self.assignment()?;

        if let Expr::Var { name, span } = expr {
            let value = match compound {
                // Desugar `x op= e` into `x = x op e`; the read target is
                // a fresh clone of the identifier so the tree stays
                // single-owner.
                Some(bin_op) => Box::new(Expr::Binary {
                    left: Box::new(Expr::Var { name: name.clone(), span }),
                    op: bin_op,
                    right: Box::new(value),
                    span: op.span,
                }),
                None => Box::new(value),
            };
            return Ok(Expr::Assign { name, value, span: op.span });
        }

        Err(DetError::new(ErrorKind::InvalidAssignmentTarget, Some(op.span)).at_token(op.lexeme))
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;

        loop {
            let op = if self.match_token(&TokenKind::EqualEqual) {
                BinaryOp::Eq
            } else if self.match_token(&TokenKind::BangEqual) {
                BinaryOp::Ne
            } else {
                break;
            };

            let span = self.previous().span;
            let right = self.comparison()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.term()?;

        loop {
            let op = if self.match_token(&TokenKind::Less) {
                BinaryOp::Lt
            } else if self.match_token(&TokenKind::LessEqual) {
                BinaryOp::Le
            } else if self.match_token(&TokenKind::Greater) {
                BinaryOp::Gt
            } else if self.match_token(&TokenKind::GreaterEqual) {
                BinaryOp::Ge
            } else {
                break;
            };

            let span = self.previous().span;
            let right = self.term()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;

        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let span = self.previous().span;
            let right = self.factor()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;

        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.match_token(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };

            let span = self.previous().span;
            let right = self.unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.match_token(&TokenKind::Minus) {
            let span = self.previous().span;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }

        if self.match_token(&TokenKind::Bang) {
            let span = self.previous().span;
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        self.traced("Primary", |p| {
            let token = p.peek().clone();

            match &token.kind {
                TokenKind::Int(n) => {
                    let value = *n;
                    p.advance();
                    Ok(Expr::Int { value, span: token.span })
                }
                TokenKind::Str(s) => {
                    let value = s.clone();
                    p.advance();
                    Ok(Expr::Str { value, span: token.span })
                }
                TokenKind::True => {
                    p.advance();
                    Ok(Expr::Bool { value: true, span: token.span })
                }
                TokenKind::False => {
                    p.advance();
                    Ok(Expr::Bool { value: false, span: token.span })
                }
                TokenKind::Ident(name) => {
                    let name = name.clone();
                    p.advance();

                    // Call?
                    if p.match_token(&TokenKind::LeftParen) {
                        let mut args = Vec::new();
                        if !p.check(&TokenKind::RightParen) {
                            loop {
                                args.push(p.expression()?);
                                if !p.match_token(&TokenKind::Comma) {
                                    break;
                                }
                            }
                        }
                        p.expect(&TokenKind::RightParen, "Expected ')' after arguments")?;
                        return Ok(Expr::Call { name, args, span: token.span });
                    }

                    Ok(Expr::Var { name, span: token.span })
                }
                TokenKind::LeftParen => {
                    p.advance();
                    let expr = p.expression()?;
                    p.expect(&TokenKind::RightParen, "Expected ')' after expression")?;
                    Ok(expr)
                }
                _ => Err(p.error_at_current(ErrorKind::ExpectedExpression)),
            }
        })
    }

    // ==================== Helpers ====================

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
            self.skip_error_tokens();
        }
        self.previous()
    }

    /// Report lexer error tokens on the spot and move past them so the
    /// grammar only ever sees well-formed tokens.
    fn skip_error_tokens(&mut self) {
        while let TokenKind::Error(msg) = self.peek().kind {
            let kind = match msg {
                "Unterminated string." => ErrorKind::UnterminatedString,
                "Integer literal too large." => ErrorKind::IntegerTooLarge,
                _ => ErrorKind::UnexpectedCharacter,
            };
            self.errors.push(DetError::new(kind, Some(self.peek().span)));
            self.current += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &'static str) -> Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at_current(ErrorKind::ExpectedToken(message)))
        }
    }

    fn expect_ident(&mut self, message: &'static str) -> Result<String> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_at_current(ErrorKind::ExpectedToken(message)))
        }
    }

    fn error_at_current(&self, kind: ErrorKind) -> DetError {
        let token = self.peek();
        let at = if matches!(token.kind, TokenKind::Eof) {
            "end".to_string()
        } else {
            token.lexeme.clone()
        };
        DetError::new(kind, Some(token.span)).at_token(at)
    }

    /// Panic-mode recovery: skip until just past the next ';' (or EOF)
    fn synchronize(&mut self) {
        while !self.is_at_end() && !self.check(&TokenKind::Semicolon) {
            self.advance();
        }
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Recovery inside a block: also stop at '}' so the block can close
    fn synchronize_in_block(&mut self) {
        while !self.is_at_end()
            && !self.check(&TokenKind::Semicolon)
            && !self.check(&TokenKind::RightBrace)
        {
            self.advance();
        }
        if self.check(&TokenKind::Semicolon) {
            self.advance();
        }
    }

    // ==================== PDA Trace ====================

    fn traced<T>(&mut self, name: &'static str, f: impl FnOnce(&mut Self) -> T) -> T {
        if self.trace_enabled {
            eprintln!("{:indent$}PUSH: {}", "", name, indent = self.trace_depth * 2);
            self.trace_depth += 1;
        }
        let result = f(self);
        if self.trace_enabled {
            self.trace_depth -= 1;
            eprintln!("{:indent$}POP:  {}", "", name, indent = self.trace_depth * 2);
        }
        result
    }
}
