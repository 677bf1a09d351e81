//! Recursive-descent parser for BX
//!
//! Binary expressions use precedence climbing; all binary operators are
//! left-associative. Errors go through the reporter and the parser
//! re-synchronizes at statement or declaration boundaries, so one run
//! reports as many syntax problems as it can find.

use crate::ast::{
    Block, Decl, ExprKind, Expression, GlobVarDecl, Name, Operator, ParamGroup, Position, ProcDecl,
    Program, SourceRange, Statement, Type,
};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::reporter::Reporter;

pub struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    reporter: &'r mut Reporter,
}

impl<'r> Parser<'r> {
    pub fn new(source: &str, reporter: &'r mut Reporter) -> Self {
        let tokens = tokenize(source, reporter);
        Parser {
            tokens,
            pos: 0,
            reporter,
        }
    }

    /// Parse a whole program. Diagnostics are reported as they are found;
    /// the returned tree contains every declaration that parsed cleanly.
    pub fn parse(mut self) -> Program {
        let mut program = Program::default();
        while !self.is_at_end() {
            let parsed = if self.at(&TokenKind::Def) {
                self.parse_proc(0).map(Decl::Proc)
            } else if self.at(&TokenKind::Var) {
                self.parse_glob_var().map(Decl::GlobVar)
            } else {
                let found = self.describe_current();
                self.report_here(format!("expected 'def' or 'var', found {}", found));
                None
            };

            match parsed {
                Some(decl) => program.decls.push(decl),
                None => self.sync_declaration(),
            }
        }
        program
    }

    // ---- declarations -------------------------------------------------

    fn parse_proc(&mut self, depth: u32) -> Option<ProcDecl> {
        self.expect(TokenKind::Def, "'def'")?;
        let name = self.expect_ident("procedure name")?;
        self.expect(TokenKind::LParen, "'('")?;

        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                params.push(self.parse_param_group()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        let ret = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_block(depth)?;
        Some(ProcDecl {
            name,
            params,
            ret,
            body,
            depth,
        })
    }

    /// One parameter group: names up to the ':' share the type after it
    fn parse_param_group(&mut self) -> Option<ParamGroup> {
        let mut names = vec![self.expect_ident("parameter name")?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_ident("parameter name")?);
        }
        self.expect(TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        Some(ParamGroup { names, ty })
    }

    fn parse_glob_var(&mut self) -> Option<GlobVarDecl> {
        self.expect(TokenKind::Var, "'var'")?;
        let name = self.expect_ident("variable name")?;
        self.expect(TokenKind::Assign, "'='")?;
        let init = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Semicolon, "';'")?;
        Some(GlobVarDecl { name, init, ty })
    }

    fn parse_type(&mut self) -> Option<Type> {
        if self.eat(&TokenKind::Int) {
            Some(Type::Int)
        } else if self.eat(&TokenKind::Bool) {
            Some(Type::Bool)
        } else {
            let found = self.describe_current();
            self.report_here(format!("expected 'int' or 'bool', found {}", found));
            None
        }
    }

    // ---- statements ---------------------------------------------------

    /// `depth` is the lexical depth of the enclosing procedure; a `def`
    /// inside the block declares a procedure one level deeper.
    fn parse_block(&mut self, depth: u32) -> Option<Block> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            if self.is_at_end() {
                self.report_here("unexpected end of file inside a block".to_string());
                return None;
            }
            match self.parse_statement(depth) {
                Some(statement) => statements.push(statement),
                None => self.sync_statement(),
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Some(Block::new(statements))
    }

    fn parse_statement(&mut self, depth: u32) -> Option<Statement> {
        match self.peek_kind() {
            Some(TokenKind::Var) => self.parse_var_decl(),
            Some(TokenKind::If) => self.parse_if(depth),
            Some(TokenKind::While) => self.parse_while(depth),
            Some(TokenKind::Break) => {
                let range = self.advance().map(|t| t.range);
                self.expect(TokenKind::Semicolon, "';'")?;
                Some(Statement::Break { range })
            }
            Some(TokenKind::Continue) => {
                let range = self.advance().map(|t| t.range);
                self.expect(TokenKind::Semicolon, "';'")?;
                Some(Statement::Continue { range })
            }
            Some(TokenKind::Return) => {
                let range = self.advance().map(|t| t.range);
                let value = if self.at(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(TokenKind::Semicolon, "';'")?;
                Some(Statement::Return { value, range })
            }
            Some(TokenKind::LBrace) => Some(Statement::Block(self.parse_block(depth)?)),
            Some(TokenKind::Def) => Some(Statement::Proc(self.parse_proc(depth + 1)?)),
            Some(TokenKind::Ident(_)) if self.peek_kind_at(1) == Some(&TokenKind::Assign) => {
                let lhs = self.expect_ident("variable name")?;
                self.expect(TokenKind::Assign, "'='")?;
                let rhs = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';'")?;
                Some(Statement::Assign { lhs, rhs })
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect(TokenKind::Semicolon, "';'")?;
                Some(Statement::Expr(expr))
            }
        }
    }

    fn parse_var_decl(&mut self) -> Option<Statement> {
        self.expect(TokenKind::Var, "'var'")?;
        let name = self.expect_ident("variable name")?;
        self.expect(TokenKind::Assign, "'='")?;
        let init = self.parse_expression()?;
        self.expect(TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Semicolon, "';'")?;
        Some(Statement::VarDecl { name, init, ty })
    }

    fn parse_if(&mut self, depth: u32) -> Option<Statement> {
        self.expect(TokenKind::If, "'if'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        let then_branch = self.parse_block(depth)?;

        let else_branch = if self.eat(&TokenKind::Else) {
            if self.at(&TokenKind::If) {
                // `else if` chains become a one-statement else block
                let chained = self.parse_if(depth)?;
                Some(Block::new(vec![chained]))
            } else {
                Some(self.parse_block(depth)?)
            }
        } else {
            None
        };

        Some(Statement::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self, depth: u32) -> Option<Statement> {
        self.expect(TokenKind::While, "'while'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.parse_block(depth)?;
        Some(Statement::While { cond, body })
    }

    // ---- expressions --------------------------------------------------

    pub fn parse_expression(&mut self) -> Option<Expression> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_power: u8) -> Option<Expression> {
        let mut lhs = self.parse_unary()?;

        while let Some((op, power)) = self.peek_binary_op() {
            if power < min_power {
                break;
            }
            self.advance();
            // Left associativity: the right operand binds tighter
            let rhs = self.parse_binary(power + 1)?;
            let range = match (lhs.range, rhs.range) {
                (Some(a), Some(b)) => Some(a.merge(b)),
                (a, b) => a.or(b),
            };
            lhs = Expression::new(
                ExprKind::OpApp {
                    op,
                    args: vec![lhs, rhs],
                },
                range,
            );
        }
        Some(lhs)
    }

    /// Binary operator at the cursor with its binding power (low to high:
    /// `||`, `&&`, `|`, `^`, `&`, equality, relational, shifts, additive,
    /// multiplicative)
    fn peek_binary_op(&self) -> Option<(Operator, u8)> {
        let op = match self.peek_kind()? {
            TokenKind::PipePipe => (Operator::BoolOr, 1),
            TokenKind::AmpAmp => (Operator::BoolAnd, 2),
            TokenKind::Pipe => (Operator::BitOr, 3),
            TokenKind::Caret => (Operator::BitXor, 4),
            TokenKind::Amp => (Operator::BitAnd, 5),
            TokenKind::EqEq => (Operator::CmpEq, 6),
            TokenKind::BangEq => (Operator::CmpNe, 6),
            TokenKind::Lt => (Operator::CmpLt, 7),
            TokenKind::Le => (Operator::CmpLe, 7),
            TokenKind::Gt => (Operator::CmpGt, 7),
            TokenKind::Ge => (Operator::CmpGe, 7),
            TokenKind::Shl => (Operator::Shl, 8),
            TokenKind::Shr => (Operator::Shr, 8),
            TokenKind::Plus => (Operator::Add, 9),
            TokenKind::Minus => (Operator::Sub, 9),
            TokenKind::Star => (Operator::Mul, 10),
            TokenKind::Slash => (Operator::Div, 10),
            TokenKind::Percent => (Operator::Mod, 10),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Option<Expression> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => Some(Operator::Opposite),
            Some(TokenKind::Tilde) => Some(Operator::BitNot),
            Some(TokenKind::Bang) => Some(Operator::BoolNot),
            _ => None,
        };

        if let Some(op) = op {
            let start = self.advance().map(|t| t.range);
            let operand = self.parse_unary()?;
            let range = match (start, operand.range) {
                (Some(a), Some(b)) => Some(a.merge(b)),
                (a, b) => a.or(b),
            };
            return Some(Expression::new(
                ExprKind::OpApp {
                    op,
                    args: vec![operand],
                },
                range,
            ));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<Expression> {
        match self.peek_kind() {
            Some(TokenKind::Number(_)) => {
                let token = self.advance()?;
                let TokenKind::Number(value) = token.kind else {
                    unreachable!("peeked a number token");
                };
                Some(Expression::new(ExprKind::Int(value), Some(token.range)))
            }
            Some(TokenKind::True) => {
                let token = self.advance()?;
                Some(Expression::new(ExprKind::Bool(true), Some(token.range)))
            }
            Some(TokenKind::False) => {
                let token = self.advance()?;
                Some(Expression::new(ExprKind::Bool(false), Some(token.range)))
            }
            Some(TokenKind::Print) => {
                let token = self.advance()?;
                self.expect(TokenKind::LParen, "'('")?;
                let arg = self.parse_expression()?;
                let close = self.expect(TokenKind::RParen, "')'")?;
                Some(Expression::new(
                    ExprKind::Print(Box::new(arg)),
                    Some(token.range.merge(close.range)),
                ))
            }
            Some(TokenKind::Ident(_)) => {
                let name = self.expect_ident("expression")?;
                if self.at(&TokenKind::LParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.eat(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(TokenKind::RParen, "')'")?;
                    let range = name.range.map(|r| r.merge(close.range));
                    return Some(Expression::new(ExprKind::Call { proc: name, args }, range));
                }
                let range = name.range;
                Some(Expression::new(ExprKind::Var(name), range))
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Some(inner)
            }
            _ => {
                let found = self.describe_current();
                self.report_here(format!("expected an expression, found {}", found));
                None
            }
        }
    }

    // ---- token plumbing -----------------------------------------------

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        if self.at(&kind) {
            return self.advance();
        }
        let found = self.describe_current();
        self.report_here(format!("expected {}, found {}", what, found));
        None
    }

    fn expect_ident(&mut self, what: &str) -> Option<Name> {
        if let Some(TokenKind::Ident(_)) = self.peek_kind() {
            let token = self.advance()?;
            let TokenKind::Ident(value) = token.kind else {
                unreachable!("peeked an identifier token");
            };
            return Some(Name::new(value, Some(token.range)));
        }
        let found = self.describe_current();
        self.report_here(format!("expected {}, found {}", what, found));
        None
    }

    fn describe_current(&self) -> String {
        match self.peek_kind() {
            Some(kind) => kind.describe(),
            None => "end of file".to_string(),
        }
    }

    fn current_range(&self) -> Option<SourceRange> {
        self.tokens
            .get(self.pos)
            .or(self.tokens.last())
            .map(|t| t.range)
    }

    fn report_here(&mut self, message: String) {
        let range = self.current_range().or(Some(SourceRange::new(
            Position::new(0, 0),
            Position::new(0, 0),
        )));
        self.reporter.report(message, range);
    }

    /// Skip to the end of the current statement: past the next ';', or up
    /// to a '}' left for the block parser
    fn sync_statement(&mut self) {
        while !self.is_at_end() {
            if self.at(&TokenKind::RBrace) {
                return;
            }
            if self.eat(&TokenKind::Semicolon) {
                return;
            }
            self.pos += 1;
        }
    }

    /// Skip to the start of the next top-level declaration
    fn sync_declaration(&mut self) {
        // Always make progress, even when stopped at 'def'/'var'
        self.pos += 1;
        while !self.is_at_end() {
            if self.at(&TokenKind::Def) || self.at(&TokenKind::Var) {
                return;
            }
            self.pos += 1;
        }
    }
}
