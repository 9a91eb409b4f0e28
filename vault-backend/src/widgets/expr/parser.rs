//! Recursive-descent parser for both expression forms.
//!
//! Simple mode is a single algebraic expression. Block mode is a braced
//! statement list with a small JavaScript-like grammar. Both share the
//! expression grammar; block-only syntax is rejected in simple mode.

use super::ast::*;
use super::lexer::{Spanned, Token, tokenize};
use super::value::Value;
use super::{ExpressionError, ExpressionMode};

/// Words that are never identifiers
const UNSUPPORTED_WORDS: &[&str] = &[
    "new", "class", "delete", "void", "with", "yield", "await", "async", "typeof", "instanceof",
    "throw", "try", "catch", "finally", "switch", "case", "do",
];

/// Deepest syntax tree the parser will build. Parsing and evaluation both
/// recurse per level, so this bounds stack use.
pub const MAX_NESTING: usize = 100;

const STATEMENT_WORDS: &[&str] = &[
    "let", "const", "var", "if", "else", "for", "while", "return", "break", "continue",
];

pub fn parse_program(source: &str, mode: ExpressionMode) -> Result<Program, ExpressionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        mode,
        depth: 0,
    };

    match mode {
        ExpressionMode::Simple => {
            let expr = parser.parse_expression()?;
            if parser.peek_assign_op().is_some() {
                return Err(parser.error("assignment is not allowed in simple expressions"));
            }
            parser.expect_eof()?;
            Ok(Program::Expression(expr))
        }
        ExpressionMode::Block => {
            parser.expect(&Token::LBrace, "'{'")?;
            let body = parser.parse_block_body()?;
            parser.expect(&Token::RBrace, "'}'")?;
            parser.expect_eof()?;
            Ok(Program::Block(body))
        }
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    mode: ExpressionMode,
    /// Current syntax tree depth, see `MAX_NESTING`
    depth: usize,
}

impl Parser {
    // ---------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
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

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == word)
    }

    fn check_word_at(&self, offset: usize, word: &str) -> bool {
        matches!(self.peek_at(offset), Token::Ident(name) if name == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ExpressionError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.check_binding_name(&name)?;
                self.advance();
                Ok(name)
            }
            other => Err(self.error(&format!("expected {}, found {}", what, describe(&other)))),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ExpressionError> {
        if self.check(&Token::Eof) {
            Ok(())
        } else {
            Err(self.error(&format!("unexpected {}", describe(self.peek()))))
        }
    }

    fn error(&self, message: &str) -> ExpressionError {
        let position = self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(0);
        ExpressionError::Parse {
            position,
            message: message.to_string(),
        }
    }

    fn deepen(&mut self) -> Result<(), ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(&format!("expression nested deeper than {} levels", MAX_NESTING)));
        }
        self.depth += 1;
        Ok(())
    }

    fn is_block(&self) -> bool {
        self.mode == ExpressionMode::Block
    }

    fn block_only(&self, what: &str) -> Result<(), ExpressionError> {
        if self.is_block() {
            Ok(())
        } else {
            Err(self.error(&format!("{} are only allowed in block expressions", what)))
        }
    }

    fn check_binding_name(&self, name: &str) -> Result<(), ExpressionError> {
        if STATEMENT_WORDS.contains(&name)
            || UNSUPPORTED_WORDS.contains(&name)
            || matches!(name, "function" | "in" | "true" | "false" | "null" | "this")
        {
            Err(self.error(&format!("'{}' cannot be used as a name", name)))
        } else {
            Ok(())
        }
    }

    fn peek_assign_op(&self) -> Option<AssignOp> {
        match self.peek() {
            Token::Assign => Some(AssignOp::Set),
            Token::PlusAssign => Some(AssignOp::Add),
            Token::MinusAssign => Some(AssignOp::Sub),
            Token::StarAssign => Some(AssignOp::Mul),
            Token::SlashAssign => Some(AssignOp::Div),
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // Statements (block mode)
    // ---------------------------------------------------------------

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ExpressionError> {
        let base = self.depth;
        self.deepen()?;
        let mut body = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("expected '}' before end of input"));
            }
            self.parse_statement_into(&mut body)?;
        }
        self.depth = base;
        Ok(body)
    }

    fn parse_statement_into(&mut self, out: &mut Vec<Stmt>) -> Result<(), ExpressionError> {
        if self.eat(&Token::Semicolon) {
            return Ok(());
        }

        if self.check(&Token::LBrace) {
            self.advance();
            let body = self.parse_block_body()?;
            self.expect(&Token::RBrace, "'}'")?;
            out.push(Stmt::Block(body));
            return Ok(());
        }

        if self.check_word("let") || self.check_word("const") || self.check_word("var") {
            out.extend(self.parse_declarations()?);
            self.eat(&Token::Semicolon);
            return Ok(());
        }

        if self.check_word("if") {
            let stmt = self.parse_if()?;
            out.push(stmt);
            return Ok(());
        }

        if self.eat_word("while") {
            self.expect(&Token::LParen, "'(' after while")?;
            let test = self.parse_expression()?;
            self.expect(&Token::RParen, "')'")?;
            let body = self.parse_body()?;
            out.push(Stmt::While { test, body });
            return Ok(());
        }

        if self.eat_word("for") {
            let stmt = self.parse_for()?;
            out.push(stmt);
            return Ok(());
        }

        if self.eat_word("return") {
            let value = if self.check(&Token::Semicolon) || self.check(&Token::RBrace) || self.check(&Token::Eof) {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.eat(&Token::Semicolon);
            out.push(Stmt::Return(value));
            return Ok(());
        }

        if self.eat_word("break") {
            self.eat(&Token::Semicolon);
            out.push(Stmt::Break);
            return Ok(());
        }

        if self.eat_word("continue") {
            self.eat(&Token::Semicolon);
            out.push(Stmt::Continue);
            return Ok(());
        }

        if self.check_word("else") {
            return Err(self.error("'else' without matching 'if'"));
        }

        let stmt = self.parse_simple_statement()?;
        self.eat(&Token::Semicolon);
        out.push(stmt);
        Ok(())
    }

    fn parse_declarations(&mut self) -> Result<Vec<Stmt>, ExpressionError> {
        let kind = match self.advance() {
            Token::Ident(word) if word == "const" => DeclKind::Const,
            _ => DeclKind::Let,
        };

        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident("variable name")?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_expression()?)
            } else if kind == DeclKind::Const {
                return Err(self.error("const declarations need an initializer"));
            } else {
                None
            };
            decls.push(Stmt::Declare { kind, name, init });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    /// Expression statement or assignment
    fn parse_simple_statement(&mut self) -> Result<Stmt, ExpressionError> {
        let expr = self.parse_expression()?;
        if let Some(op) = self.peek_assign_op() {
            if !expr.is_assignable() {
                return Err(self.error("invalid assignment target"));
            }
            self.advance();
            let value = self.parse_expression()?;
            return Ok(Stmt::Assign { target: expr, op, value });
        }
        Ok(Stmt::Expr(expr))
    }

    fn parse_body(&mut self) -> Result<Vec<Stmt>, ExpressionError> {
        if self.eat(&Token::LBrace) {
            let body = self.parse_block_body()?;
            self.expect(&Token::RBrace, "'}'")?;
            Ok(body)
        } else {
            let base = self.depth;
            self.deepen()?;
            let mut body = Vec::new();
            self.parse_statement_into(&mut body)?;
            self.depth = base;
            Ok(body)
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, ExpressionError> {
        let base = self.depth;
        self.deepen()?;
        self.advance(); // if
        self.expect(&Token::LParen, "'(' after if")?;
        let test = self.parse_expression()?;
        self.expect(&Token::RParen, "')'")?;
        let consequent = self.parse_body()?;

        let alternate = if self.eat_word("else") {
            if self.check_word("if") {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_body()?)
            }
        } else {
            None
        };

        self.depth = base;
        Ok(Stmt::If { test, consequent, alternate })
    }

    fn parse_for(&mut self) -> Result<Stmt, ExpressionError> {
        self.expect(&Token::LParen, "'(' after for")?;

        let declared = self.check_word("let") || self.check_word("const") || self.check_word("var");
        let of_offset = if declared { 2 } else { 1 };
        if matches!(self.peek_at(of_offset - 1), Token::Ident(_)) && self.check_word_at(of_offset, "of") {
            if declared {
                self.advance();
            }
            let name = self.expect_ident("loop variable")?;
            self.advance(); // of
            let iterable = self.parse_expression()?;
            self.expect(&Token::RParen, "')'")?;
            let body = self.parse_body()?;
            return Ok(Stmt::ForOf { name, iterable, body });
        }

        let init = if self.check(&Token::Semicolon) {
            None
        } else if declared {
            let mut decls = self.parse_declarations()?;
            if decls.len() != 1 {
                return Err(self.error("for loops support a single declaration"));
            }
            decls.pop().map(Box::new)
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.expect(&Token::Semicolon, "';' in for")?;

        let test = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&Token::Semicolon, "';' in for")?;

        let update = if self.check(&Token::RParen) {
            None
        } else {
            Some(Box::new(self.parse_simple_statement()?))
        };
        self.expect(&Token::RParen, "')'")?;

        let body = self.parse_body()?;
        Ok(Stmt::For { init, test, update, body })
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        self.deepen()?;
        let test = self.parse_nullish()?;
        let expr = if self.eat(&Token::Question) {
            let consequent = self.parse_conditional()?;
            self.expect(&Token::Colon, "':' in conditional")?;
            let alternate = self.parse_conditional()?;
            Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            }
        } else {
            test
        };
        self.depth = base;
        Ok(expr)
    }

    fn parse_nullish(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_or()?;
        while self.eat(&Token::QuestionQuestion) {
            self.deepen()?;
            let right = self.parse_or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) || self.eat_word("or") {
            self.deepen()?;
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_equality()?;
        while self.eat(&Token::AndAnd) || self.eat_word("and") {
            self.deepen()?;
            let right = self.parse_equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq | Token::StrictEq => BinaryOp::Eq,
                Token::NotEq | Token::StrictNotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_relational()?;
            left = binary(op, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                Token::Ident(word) if word == "in" => {
                    return Err(self.error("the 'in' operator is disabled"));
                }
                Token::Ident(word) if word == "instanceof" => {
                    return Err(self.error("'instanceof' is not supported"));
                }
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            self.deepen()?;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Token::Minus => Some(UnaryOp::Neg),
            Token::Plus => Some(UnaryOp::Plus),
            Token::Bang => Some(UnaryOp::Not),
            Token::Ident(word) if word == "not" => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let base = self.depth;
            self.deepen()?;
            let operand = self.parse_unary()?;
            self.depth = base;
            return Ok(Expr::Unary { op, operand: Box::new(operand) });
        }

        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) {
            self.block_only("increment operators")?;
            let delta = if self.advance() == Token::PlusPlus { 1.0 } else { -1.0 };
            let base = self.depth;
            self.deepen()?;
            let target = self.parse_unary()?;
            self.depth = base;
            if !target.is_assignable() {
                return Err(self.error("invalid increment target"));
            }
            return Ok(Expr::Update { target: Box::new(target), delta, prefix: true });
        }

        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_postfix()?;
        if matches!(self.peek(), Token::Caret | Token::StarStar) {
            self.advance();
            // Right-associative, and the exponent may carry its own sign
            let outer = self.depth;
            self.deepen()?;
            let exponent = self.parse_unary()?;
            self.depth = outer;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.depth;
        let mut expr = self.parse_primary()?;

        loop {
            if matches!(self.peek(), Token::Dot | Token::LBracket | Token::LParen) {
                self.deepen()?;
            }
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = match self.advance() {
                        Token::Ident(name) => name,
                        other => {
                            return Err(self.error(&format!("expected property name, found {}", describe(&other))));
                        }
                    };
                    if self.check(&Token::LParen) {
                        let args = self.parse_arguments()?;
                        expr = Expr::MethodCall { object: Box::new(expr), method: property, args };
                    } else {
                        expr = Expr::Member { object: Box::new(expr), property };
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index { object: Box::new(expr), index: Box::new(index) };
                }
                Token::LParen => {
                    let Expr::Ident(name) = expr else {
                        return Err(self.error("only named functions can be called"));
                    };
                    let args = self.parse_arguments()?;
                    expr = Expr::Call { name, args };
                }
                _ => break,
            }
        }

        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) {
            self.block_only("increment operators")?;
            if !expr.is_assignable() {
                return Err(self.error("invalid increment target"));
            }
            let delta = if self.advance() == Token::PlusPlus { 1.0 } else { -1.0 };
            expr = Expr::Update { target: Box::new(expr), delta, prefix: false };
        }

        self.depth = base;
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            args.push(self.parse_expression()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Str(s)))
            }
            Token::Ident(name) => self.parse_identifier(name),
            Token::LParen => {
                if self.is_arrow_params() {
                    self.block_only("arrow functions")?;
                    return self.parse_parenthesized_lambda();
                }
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                self.block_only("object literals")?;
                self.parse_object_literal()
            }
            other => Err(self.error(&format!("unexpected {}", describe(&other)))),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Result<Expr, ExpressionError> {
        match name.as_str() {
            "true" => {
                self.advance();
                return Ok(Expr::Literal(Value::Bool(true)));
            }
            "false" => {
                self.advance();
                return Ok(Expr::Literal(Value::Bool(false)));
            }
            "null" | "undefined" => {
                self.advance();
                return Ok(Expr::Literal(Value::Null));
            }
            "function" => return Err(self.error("function definitions are not allowed")),
            "in" => return Err(self.error("the 'in' operator is disabled")),
            _ => {}
        }
        if UNSUPPORTED_WORDS.contains(&name.as_str()) {
            return Err(self.error(&format!("'{}' is not supported", name)));
        }
        if STATEMENT_WORDS.contains(&name.as_str()) {
            return Err(self.error(&format!("unexpected '{}'", name)));
        }

        self.advance();
        if self.check(&Token::Arrow) {
            self.block_only("arrow functions")?;
            self.check_binding_name(&name)?;
            self.advance();
            let body = self.parse_lambda_body()?;
            return Ok(Expr::Lambda(Box::new(Lambda { params: vec![name], body })));
        }
        Ok(Expr::Ident(name))
    }

    /// `(` ident (`,` ident)* `)` `=>` or `(` `)` `=>`
    fn is_arrow_params(&self) -> bool {
        let mut offset = 1;
        if matches!(self.peek_at(offset), Token::RParen) {
            return matches!(self.peek_at(offset + 1), Token::Arrow);
        }
        loop {
            if !matches!(self.peek_at(offset), Token::Ident(_)) {
                return false;
            }
            offset += 1;
            match self.peek_at(offset) {
                Token::Comma => offset += 1,
                Token::RParen => return matches!(self.peek_at(offset + 1), Token::Arrow),
                _ => return false,
            }
        }
    }

    fn parse_parenthesized_lambda(&mut self) -> Result<Expr, ExpressionError> {
        self.expect(&Token::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            params.push(self.expect_ident("parameter name")?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        self.expect(&Token::Arrow, "'=>'")?;
        let body = self.parse_lambda_body()?;
        Ok(Expr::Lambda(Box::new(Lambda { params, body })))
    }

    fn parse_lambda_body(&mut self) -> Result<LambdaBody, ExpressionError> {
        if self.eat(&Token::LBrace) {
            let body = self.parse_block_body()?;
            self.expect(&Token::RBrace, "'}'")?;
            Ok(LambdaBody::Block(body))
        } else {
            Ok(LambdaBody::Expr(Box::new(self.parse_expression()?)))
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ExpressionError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut entries = Vec::new();
        while !self.check(&Token::RBrace) {
            let key = match self.advance() {
                Token::Ident(name) => name,
                Token::Str(s) => s,
                Token::Number(n) => super::value::format_number(n),
                other => return Err(self.error(&format!("expected property key, found {}", describe(&other)))),
            };
            let value = if self.eat(&Token::Colon) {
                self.parse_expression()?
            } else {
                Expr::Ident(key.clone())
            };
            entries.push((key, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace, "'}'")?;
        Ok(Expr::Object(entries))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary { op, left: Box::new(left), right: Box::new(right) }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical { op, left: Box::new(left), right: Box::new(right) }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Eof => "end of input".to_string(),
        Token::Ident(name) => format!("'{}'", name),
        Token::Number(n) => format!("number {}", n),
        Token::Str(s) => format!("string \"{}\"", s),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(src: &str) -> Result<Program, ExpressionError> {
        parse_program(src, ExpressionMode::Simple)
    }

    fn block(src: &str) -> Result<Program, ExpressionError> {
        parse_program(src, ExpressionMode::Block)
    }

    #[test]
    fn test_precedence() {
        let Program::Expression(expr) = simple("1 + 2 * 3").unwrap() else { panic!() };
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Add, .. }));

        let Program::Expression(expr) = simple("-2 ^ 2").unwrap() else { panic!() };
        assert!(matches!(expr, Expr::Unary { op: UnaryOp::Neg, .. }));

        let Program::Expression(expr) = simple("a > 1 and b < 2 or not c").unwrap() else { panic!() };
        assert!(matches!(expr, Expr::Logical { op: LogicalOp::Or, .. }));
    }

    #[test]
    fn test_simple_mode_restrictions() {
        assert!(simple("x = 1").is_err());
        assert!(simple("f(x) = x + 1").is_err());
        assert!(simple("a in b").is_err());
        assert!(simple("function f() { return 1 }").is_err());
        assert!(simple("{ a: 1 }").is_err());
        assert!(simple("x => x").is_err());
        assert!(simple("i++").is_err());
        assert!(simple("1; 2").is_err());
    }

    #[test]
    fn test_member_index_and_calls() {
        let Program::Expression(expr) = simple("roundTo(this.scores[0].value, 2)").unwrap() else { panic!() };
        let Expr::Call { name, args } = expr else { panic!() };
        assert_eq!(name, "roundTo");
        assert_eq!(args.len(), 2);
        assert!(matches!(args[0], Expr::Member { .. }));
    }

    #[test]
    fn test_block_statements() {
        let Program::Block(body) = block(
            "{
                let total = 0;
                const items = [1, 2, 3];
                for (const x of items) { total += x }
                for (let i = 0; i < 3; i++) total = total + i;
                if (total > 5) { return total } else if (total > 2) return 2; else { return 0 }
            }",
        )
        .unwrap() else {
            panic!()
        };
        assert_eq!(body.len(), 5);
        assert!(matches!(body[2], Stmt::ForOf { .. }));
        assert!(matches!(body[3], Stmt::For { .. }));
        assert!(matches!(body[4], Stmt::If { .. }));
    }

    #[test]
    fn test_block_lambdas_and_objects() {
        assert!(block("{ return this.tags.map(t => t.length).filter((n, i) => n > i) }").is_ok());
        assert!(block("{ const o = { a: 1, 'b': 2, c }; return o }").is_ok());
        assert!(block("{ return [1, 2].reduce((acc, x) => { return acc + x }, 0) }").is_ok());
    }

    #[test]
    fn test_block_errors() {
        assert!(block("{ const x; return x }").is_err());
        assert!(block("{ 1 = 2 }").is_err());
        assert!(block("{ return 1 ").is_err());
        assert!(block("{ let in = 1 }").is_err());
        assert!(block("{ else { } }").is_err());
        assert!(block("{ return a in b }").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |open: &str, close: &str, n: usize| format!("{}1{}", open.repeat(n), close.repeat(n));
        assert!(simple(&nested("(", ")", 20)).is_ok());
        assert!(simple(&nested("[", "]", 20)).is_ok());

        for src in [
            nested("(", ")", 5000),
            nested("[", "]", 5000),
            nested("abs(", ")", 5000),
            "- ".repeat(5000) + "1",
            vec!["1"; 5000].join(" + "),
            vec!["2"; 5000].join(" ^ "),
            "this".to_string() + &".a".repeat(5000),
        ] {
            let err = simple(&src).unwrap_err();
            assert!(
                matches!(&err, ExpressionError::Parse { message, .. } if message.contains("nested deeper")),
                "{:?}",
                err
            );
        }

        let deep_blocks = format!("{{ {} return 1 {} }}", "{ ".repeat(5000), " }".repeat(5000));
        assert!(block(&deep_blocks).is_err());
        let deep_ifs = format!("{{ {} return 1 }}", "if (true) ".repeat(5000));
        assert!(block(&deep_ifs).is_err());
    }
}
