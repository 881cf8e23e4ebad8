use super::ast::*;
use super::lexer::{tokenize, unescape, SpannedToken, Token};
use crate::error::CompileError;
use std::sync::Arc;

type Result<T> = std::result::Result<T, CompileError>;

/// Deepest nesting of expressions and statements accepted
pub const MAX_NESTING: usize = 64;

/// Recursive-descent parser for botscript
pub struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [SpannedToken]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Script is nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Peek at current token
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn position(&self) -> (u32, u32) {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1))
    }

    /// Advance to next token, returning the consumed one
    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(expected)
    }

    /// Consume token if it matches
    fn consume(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect a token, error if not found
    fn expect(&mut self, expected: Token) -> Result<()> {
        if self.check(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected {:?} but found {:?}", expected, self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        let (line, column) = self.position();
        CompileError {
            message: message.into(),
            line,
            column,
        }
    }

    fn unexpected(&self) -> CompileError {
        match self.peek() {
            Token::Eof => self.error("Unexpected end of input"),
            other => self.error(format!("Unexpected token {:?}", other)),
        }
    }

    fn is_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn identifier(&mut self) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Identifier or keyword used as a property name (`p.catch`, `{ new: 1 }`)
    fn property_name(&mut self) -> Result<String> {
        let name = match self.peek() {
            Token::Identifier(name) => name.clone(),
            other => match keyword_name(other) {
                Some(name) => name.to_string(),
                None => return Err(self.unexpected()),
            },
        };
        self.advance();
        Ok(name)
    }

    /// Parse a whole script
    pub fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.is_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::LBrace)?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.is_eof() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace)?;
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.nested(Self::parse_statement_at)
    }

    fn parse_statement_at(&mut self) -> Result<Stmt> {
        let (line, column) = self.position();
        let kind = self.parse_statement_kind()?;
        Ok(Stmt { kind, line, column })
    }

    fn parse_statement_kind(&mut self) -> Result<StmtKind> {
        match self.peek() {
            Token::LBrace => Ok(StmtKind::Block(self.parse_block()?)),
            Token::Semicolon => {
                self.advance();
                Ok(StmtKind::Empty)
            }
            Token::Let | Token::Const | Token::Var => {
                let stmt = self.parse_declaration()?;
                self.consume(&Token::Semicolon);
                Ok(stmt)
            }
            Token::Function if matches!(self.peek_at(1), Token::Identifier(_)) => {
                self.advance();
                let def = self.parse_function_rest(true)?;
                Ok(StmtKind::FunctionDecl(def))
            }
            Token::If => {
                self.advance();
                self.expect(Token::LParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RParen)?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.consume(&Token::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(StmtKind::If {
                    test,
                    then,
                    otherwise,
                })
            }
            Token::While => {
                self.advance();
                self.expect(Token::LParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RParen)?;
                let body = Box::new(self.parse_statement()?);
                Ok(StmtKind::While { test, body })
            }
            Token::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(Token::While)?;
                self.expect(Token::LParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RParen)?;
                self.consume(&Token::Semicolon);
                Ok(StmtKind::DoWhile { body, test })
            }
            Token::For => self.parse_for(),
            Token::Return => {
                self.advance();
                let value = if matches!(self.peek(), Token::Semicolon | Token::RBrace | Token::Eof) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume(&Token::Semicolon);
                Ok(StmtKind::Return(value))
            }
            Token::Break => {
                self.advance();
                self.consume(&Token::Semicolon);
                Ok(StmtKind::Break)
            }
            Token::Continue => {
                self.advance();
                self.consume(&Token::Semicolon);
                Ok(StmtKind::Continue)
            }
            Token::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.consume(&Token::Semicolon);
                Ok(StmtKind::Throw(value))
            }
            Token::Try => self.parse_try(),
            _ => {
                let expr = self.parse_expression()?;
                self.consume(&Token::Semicolon);
                Ok(StmtKind::Expr(expr))
            }
        }
    }

    fn decl_kind(&mut self) -> Result<DeclKind> {
        match self.advance() {
            Token::Let => Ok(DeclKind::Let),
            Token::Const => Ok(DeclKind::Const),
            Token::Var => Ok(DeclKind::Var),
            _ => Err(self.error("Expected declaration")),
        }
    }

    fn parse_declaration(&mut self) -> Result<StmtKind> {
        let kind = self.decl_kind()?;
        let mut decls = Vec::new();
        loop {
            let name = self.identifier()?;
            let init = if self.consume(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(self.error("Missing initializer in const declaration"));
            }
            decls.push((name, init));
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::Decl { kind, decls })
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.expect(Token::For)?;
        self.expect(Token::LParen)?;

        let declared = matches!(self.peek(), Token::Let | Token::Const | Token::Var);
        let name_offset = if declared { 1 } else { 0 };
        let is_iteration = matches!(self.peek_at(name_offset), Token::Identifier(_))
            && matches!(self.peek_at(name_offset + 1), Token::Of | Token::In);

        if is_iteration {
            let kind = if declared { self.decl_kind()? } else { DeclKind::Var };
            let name = self.identifier()?;
            let of = matches!(self.advance(), Token::Of);
            let subject = self.parse_expression()?;
            self.expect(Token::RParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(if of {
                StmtKind::ForOf {
                    kind,
                    name,
                    iterable: subject,
                    body,
                }
            } else {
                StmtKind::ForIn {
                    kind,
                    name,
                    object: subject,
                    body,
                }
            });
        }

        let init = if self.check(&Token::Semicolon) {
            None
        } else {
            let (line, column) = self.position();
            let kind = if declared {
                self.parse_declaration()?
            } else {
                StmtKind::Expr(self.parse_expression()?)
            };
            Some(Box::new(Stmt { kind, line, column }))
        };
        self.expect(Token::Semicolon)?;
        let test = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::Semicolon)?;
        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind> {
        self.expect(Token::Try)?;
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        if self.consume(&Token::Catch) {
            if self.consume(&Token::LParen) {
                param = Some(self.identifier()?);
                self.expect(Token::RParen)?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.consume(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(StmtKind::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    /// Parse `name? (params) { body }` after the `function` keyword
    fn parse_function_rest(&mut self, require_name: bool) -> Result<Arc<FunctionDef>> {
        let name = match self.peek() {
            Token::Identifier(_) => Some(self.identifier()?),
            _ if require_name => return Err(self.unexpected()),
            _ => None,
        };
        self.expect(Token::LParen)?;
        let params = self.parse_params(Token::RParen)?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(Arc::new(FunctionDef { name, params, body }))
    }

    fn parse_params(&mut self, close: Token) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        while !self.check(&close) {
            let rest = self.consume(&Token::Ellipsis);
            let name = self.identifier()?;
            let default = if self.consume(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            params.push(Param {
                name,
                default,
                rest,
            });
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(params)
    }

    /// Comma expressions are not supported; this is a single assignment expression
    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Identifier(_) => matches!(self.peek_at(1), Token::Arrow),
            Token::LParen => {
                let mut depth = 0usize;
                let mut offset = 0usize;
                loop {
                    match self.peek_at(offset) {
                        Token::LParen => depth += 1,
                        Token::RParen => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(self.peek_at(offset + 1), Token::Arrow);
                            }
                        }
                        Token::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn parse_arrow(&mut self) -> Result<Expr> {
        let params = if self.consume(&Token::LParen) {
            self.parse_params(Token::RParen)?
        } else {
            vec![Param {
                name: self.identifier()?,
                default: None,
                rest: false,
            }]
        };
        self.expect(Token::Arrow)?;
        let body = if self.check(&Token::LBrace) {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };
        Ok(Expr::Function(Arc::new(FunctionDef {
            name: None,
            params,
            body,
        })))
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        self.nested(Self::parse_assignment_at)
    }

    fn parse_assignment_at(&mut self) -> Result<Expr> {
        if self.arrow_ahead() {
            return self.parse_arrow();
        }

        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Assign,
            Token::PlusAssign => AssignOp::Compound(BinaryOp::Add),
            Token::MinusAssign => AssignOp::Compound(BinaryOp::Sub),
            Token::StarAssign => AssignOp::Compound(BinaryOp::Mul),
            Token::SlashAssign => AssignOp::Compound(BinaryOp::Div),
            Token::PercentAssign => AssignOp::Compound(BinaryOp::Rem),
            Token::NullishAssign => AssignOp::Nullish,
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident(_) | Expr::Member { .. }) {
            return Err(self.error("Invalid left-hand side in assignment"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_logical_or()?;
        if !self.consume(&Token::Question) {
            return Ok(test);
        }
        let then = self.parse_assignment()?;
        self.expect(Token::Colon)?;
        let otherwise = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn parse_logical_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_logical_and()?;
        loop {
            let op = match self.peek() {
                Token::OrOr => LogicalOp::Or,
                Token::Nullish => LogicalOp::Nullish,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_logical_and()?;
            left = Expr::Logical(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_logical_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_equality()?;
        while self.consume(&Token::AndAnd) {
            let right = self.parse_equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                Token::EqEqEq => BinaryOp::StrictEq,
                Token::NotEqEq => BinaryOp::StrictNe,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::In => BinaryOp::In,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_exponent()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_exponent(&mut self) -> Result<Expr> {
        let base = self.parse_unary()?;
        if self.consume(&Token::StarStar) {
            let exponent = self.parse_exponent()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Typeof => UnaryOp::Typeof,
            Token::Delete => UnaryOp::Delete,
            Token::PlusPlus | Token::MinusMinus => {
                let increment = matches!(self.advance(), Token::PlusPlus);
                let target = self.nested(Self::parse_unary)?;
                return Ok(Expr::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) {
            let increment = matches!(self.advance(), Token::PlusPlus);
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = if self.check(&Token::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = self.property_name()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(Expr::Str(name)),
                        optional: false,
                    };
                }
                Token::QuestionDot => {
                    self.advance();
                    let property = if self.consume(&Token::LBracket) {
                        let property = self.parse_expression()?;
                        self.expect(Token::RBracket)?;
                        property
                    } else {
                        Expr::Str(self.property_name()?)
                    };
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        optional: true,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let property = self.parse_expression()?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(property),
                        optional: false,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let args = self.parse_elements(Token::RParen)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_new(&mut self) -> Result<Expr> {
        self.expect(Token::New)?;
        let mut callee = self.parse_primary()?;
        while self.consume(&Token::Dot) {
            let name = self.property_name()?;
            callee = Expr::Member {
                object: Box::new(callee),
                property: Box::new(Expr::Str(name)),
                optional: false,
            };
        }
        let args = if self.consume(&Token::LParen) {
            self.parse_elements(Token::RParen)?
        } else {
            Vec::new()
        };
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    /// Comma separated elements with optional spread, up to `close`
    fn parse_elements(&mut self, close: Token) -> Result<Vec<Element>> {
        let mut elements = Vec::new();
        while !self.check(&close) {
            let spread = self.consume(&Token::Ellipsis);
            let expr = self.parse_assignment()?;
            elements.push(Element { spread, expr });
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(elements)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let expr = match self.peek().clone() {
            Token::Number(n) => Expr::Number(n),
            Token::Str(s) => Expr::Str(s),
            Token::Template(raw) => {
                let template = self.parse_template(&raw)?;
                self.advance();
                return Ok(template);
            }
            Token::True => Expr::Bool(true),
            Token::False => Expr::Bool(false),
            Token::Null => Expr::Null,
            Token::Undefined => Expr::Undefined,
            Token::This => Expr::This,
            Token::Identifier(name) => Expr::Ident(name),
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.advance();
                return Ok(Expr::Array(self.parse_elements(Token::RBracket)?));
            }
            Token::LBrace => return self.parse_object(),
            Token::Function => {
                self.advance();
                return Ok(Expr::Function(self.parse_function_rest(false)?));
            }
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_object(&mut self) -> Result<Expr> {
        self.expect(Token::LBrace)?;
        let mut properties = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.consume(&Token::Ellipsis) {
                properties.push(Property::Spread(self.parse_assignment()?));
            } else {
                let key = match self.peek().clone() {
                    Token::Str(s) => {
                        self.advance();
                        PropertyKey::Named(s)
                    }
                    Token::Number(n) => {
                        self.advance();
                        PropertyKey::Named(crate::value::number_to_string(n))
                    }
                    Token::LBracket => {
                        self.advance();
                        let key = self.parse_expression()?;
                        self.expect(Token::RBracket)?;
                        PropertyKey::Computed(key)
                    }
                    _ => PropertyKey::Named(self.property_name()?),
                };

                let value = if self.consume(&Token::Colon) {
                    self.parse_assignment()?
                } else if self.check(&Token::LParen) {
                    let name = match &key {
                        PropertyKey::Named(name) => Some(name.clone()),
                        PropertyKey::Computed(_) => None,
                    };
                    self.advance();
                    let params = self.parse_params(Token::RParen)?;
                    let body = FunctionBody::Block(self.parse_block()?);
                    Expr::Function(Arc::new(FunctionDef { name, params, body }))
                } else {
                    match &key {
                        PropertyKey::Named(name) => Expr::Ident(name.clone()),
                        PropertyKey::Computed(_) => return Err(self.unexpected()),
                    }
                };
                properties.push(Property::KeyValue(key, value));
            }
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Expr::Object(properties))
    }

    /// Split a template literal body into text and `${...}` expressions
    fn parse_template(&self, raw: &str) -> Result<Expr> {
        let mut parts = Vec::new();
        let mut text = String::new();
        let mut rest = raw;
        while let Some(start) = rest.find("${") {
            text.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let mut depth = 1usize;
            let mut end = None;
            for (i, c) in after.char_indices() {
                match c {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| self.error("Unterminated template expression"))?;
            if !text.is_empty() {
                parts.push(TemplatePart::Text(unescape(&text)));
                text.clear();
            }
            let tokens = tokenize(&after[..end]).map_err(|_| self.error("Invalid template expression"))?;
            let mut inner = Parser {
                tokens: &tokens,
                pos: 0,
                depth: self.depth,
            };
            let expr = inner.parse_expression()?;
            if !inner.is_eof() {
                return Err(self.error("Invalid template expression"));
            }
            parts.push(TemplatePart::Expr(expr));
            rest = &after[end + 1..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            parts.push(TemplatePart::Text(unescape(&text)));
        }
        Ok(Expr::Template(parts))
    }
}

fn keyword_name(token: &Token) -> Option<&'static str> {
    Some(match token {
        Token::Let => "let",
        Token::Const => "const",
        Token::Var => "var",
        Token::Function => "function",
        Token::Return => "return",
        Token::If => "if",
        Token::Else => "else",
        Token::While => "while",
        Token::Do => "do",
        Token::For => "for",
        Token::Of => "of",
        Token::In => "in",
        Token::Break => "break",
        Token::Continue => "continue",
        Token::Throw => "throw",
        Token::Try => "try",
        Token::Catch => "catch",
        Token::Finally => "finally",
        Token::New => "new",
        Token::Typeof => "typeof",
        Token::Delete => "delete",
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        Token::Undefined => "undefined",
        Token::This => "this",
        _ => return None,
    })
}

/// Tokenize and parse a script
pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    Parser::new(&tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(source: &str) -> Expr {
        match parse(source).unwrap().remove(0).kind {
            StmtKind::Expr(e) => e,
            other => panic!("expected expression, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Number(1.0)),
                Box::new(Expr::Binary(
                    BinaryOp::Mul,
                    Box::new(Expr::Number(2.0)),
                    Box::new(Expr::Number(3.0))
                ))
            )
        );
    }

    #[test]
    fn test_arrow_function_detection() {
        assert!(matches!(expr("(a, b) => a + b"), Expr::Function(_)));
        assert!(matches!(expr("x => x"), Expr::Function(_)));
        assert!(matches!(expr("(a + b)"), Expr::Binary(..)));
    }

    #[test]
    fn test_keyword_property_names() {
        assert!(matches!(expr("p.then(f).catch(g)"), Expr::Call { .. }));
    }

    #[test]
    fn test_block_statement_vs_object() {
        let program = parse("{ let a = 1 }").unwrap();
        assert!(matches!(program[0].kind, StmtKind::Block(_)));
        assert!(matches!(expr("({ a: 1, b })"), Expr::Object(_)));
    }

    #[test]
    fn test_template_literal_parts() {
        match expr("`n=${1 + 1}!`") {
            Expr::Template(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_has_position() {
        let err = parse("let x = ;").unwrap_err();
        assert_eq!((err.line, err.column), (1, 9));
    }

    #[test]
    fn test_for_of_and_classic_for() {
        let program = parse("for (const x of xs) {} for (let i = 0; i < 3; i++) {}").unwrap();
        assert!(matches!(program[0].kind, StmtKind::ForOf { .. }));
        assert!(matches!(program[1].kind, StmtKind::For { .. }));
    }
}
