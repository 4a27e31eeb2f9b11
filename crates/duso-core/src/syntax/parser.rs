//! Recursive-descent statement parser with a Pratt expression parser.
//! Produces the [`super::ast`] tree the evaluator walks.

use super::ast::*;
use super::lexer::{lex, Keyword, Spanned, Token};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{file}:{line}:{col}: {message}")]
    Syntax {
        file: String,
        line: usize,
        col: usize,
        message: String,
    },
    #[error(transparent)]
    Lex(#[from] super::lexer::LexError),
}

pub fn parse_program(src: &str, file: &str) -> Result<Block, ParseError> {
    let tokens = lex(src, file)?;
    let mut parser = Parser { tokens, pos: 0, file: file.to_string() };
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        stmts.push(parser.spanned_statement()?);
    }
    Ok(stmts)
}

/// Parses a single standalone expression, used by the debug session to
/// evaluate whatever the user types at the `(duso-debug)` prompt and by
/// `watch(expr...)` to parse each watched expression once.
pub fn parse_expr(src: &str, file: &str) -> Result<Expr, ParseError> {
    let tokens = lex(src, file)?;
    let mut parser = Parser { tokens, pos: 0, file: file.to_string() };
    parser.expr()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    file: String,
}

impl Parser {
    fn at_eof(&self) -> bool {
        matches!(self.tokens[self.pos].token, Token::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        let tok = &self.tokens[self.pos];
        ParseError::Syntax {
            file: self.file.clone(),
            line: tok.line,
            col: tok.col,
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat_symbol(&mut self, sym: &str) -> Result<(), ParseError> {
        if matches!(self.peek(), Token::Symbol(s) if *s == sym) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected '{sym}'")))
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> Result<(), ParseError> {
        if matches!(self.peek(), Token::Keyword(k) if *k == kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected keyword '{kw:?}'")))
        }
    }

    fn is_symbol(&self, sym: &str) -> bool {
        matches!(self.peek(), Token::Symbol(s) if *s == sym)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == kw)
    }

    fn skip_semicolons(&mut self) {
        while self.is_symbol(";") {
            self.advance();
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            _ => Err(self.err("expected identifier")),
        }
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        self.eat_symbol("{")?;
        let mut stmts = Vec::new();
        while !self.is_symbol("}") {
            if self.at_eof() {
                return Err(self.err("unterminated block"));
            }
            stmts.push(self.spanned_statement()?);
        }
        self.eat_symbol("}")?;
        Ok(stmts)
    }

    fn spanned_statement(&mut self) -> Result<Spanned<Stmt>, ParseError> {
        self.skip_semicolons();
        let (line, col) = (self.tokens[self.pos].line, self.tokens[self.pos].col);
        let node = self.statement()?;
        Ok(Spanned { node, line, col })
    }

    fn param_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.eat_symbol("(")?;
        let mut params = Vec::new();
        if !self.is_symbol(")") {
            loop {
                params.push(self.ident()?);
                if self.is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat_symbol(")")?;
        Ok(params)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        self.skip_semicolons();
        let stmt = match self.peek().clone() {
            Token::Keyword(Keyword::Var) => {
                self.advance();
                let name = self.ident()?;
                self.eat_symbol("=")?;
                let value = self.expr()?;
                Stmt::VarDecl(name, value)
            }
            Token::Keyword(Keyword::Function) => {
                self.advance();
                let name = self.ident()?;
                let params = self.param_list()?;
                let body = Arc::new(self.block()?);
                Stmt::FunctionDecl { name, params, body }
            }
            Token::Keyword(Keyword::If) => {
                self.advance();
                let cond = self.expr()?;
                let then_block = self.block()?;
                let else_block = if self.is_keyword(Keyword::Else) {
                    self.advance();
                    if self.is_keyword(Keyword::If) {
                        Some(vec![self.spanned_statement()?])
                    } else {
                        Some(self.block()?)
                    }
                } else {
                    None
                };
                Stmt::If { cond, then_block, else_block }
            }
            Token::Keyword(Keyword::While) => {
                self.advance();
                let cond = self.expr()?;
                let body = self.block()?;
                Stmt::While { cond, body }
            }
            Token::Keyword(Keyword::For) => {
                self.advance();
                let var = self.ident()?;
                if self.is_keyword(Keyword::In) {
                    self.advance();
                    let iter = self.expr()?;
                    let body = self.block()?;
                    Stmt::ForIn { var, iter, body }
                } else {
                    self.eat_symbol("=")?;
                    let start = self.expr()?;
                    self.eat_symbol(",")?;
                    let end = self.expr()?;
                    let step = if self.is_symbol(",") {
                        self.advance();
                        Some(self.expr()?)
                    } else {
                        None
                    };
                    let body = self.block()?;
                    Stmt::ForRange { var, start, end, step, body }
                }
            }
            Token::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.is_symbol(";") || self.is_symbol("}") {
                    None
                } else {
                    Some(self.expr()?)
                };
                Stmt::Return(value)
            }
            Token::Keyword(Keyword::Break) => {
                self.advance();
                Stmt::Break
            }
            Token::Keyword(Keyword::Continue) => {
                self.advance();
                Stmt::Continue
            }
            Token::Keyword(Keyword::Throw) => {
                self.advance();
                let value = self.expr()?;
                Stmt::Throw(value)
            }
            Token::Keyword(Keyword::Try) => {
                self.advance();
                let try_block = self.block()?;
                self.eat_keyword(Keyword::Catch)?;
                self.eat_symbol("(")?;
                let catch_var = self.ident()?;
                self.eat_symbol(")")?;
                let catch_block = self.block()?;
                Stmt::TryCatch { try_block, catch_var, catch_block }
            }
            Token::Symbol("{") => Stmt::Block(self.block()?),
            _ => self.assign_or_expr_stmt()?,
        };
        self.skip_semicolons();
        Ok(stmt)
    }

    fn assign_or_expr_stmt(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.expr()?;
        if self.is_symbol("=") {
            self.advance();
            let target = expr_to_assign_target(expr, self)?;
            let value = self.expr()?;
            Ok(Stmt::Assign(target, value))
        } else {
            Ok(Stmt::Expr(expr))
        }
    }

    // --- expressions (Pratt parser) ---

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.is_symbol("||") {
            self.advance();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.equality_expr()?;
        while self.is_symbol("&&") {
            self.advance();
            let rhs = self.equality_expr()?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.relational_expr()?;
        loop {
            let op = if self.is_symbol("==") {
                BinaryOp::Eq
            } else if self.is_symbol("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            self.advance();
            let rhs = self.relational_expr()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn relational_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.additive_expr()?;
        loop {
            let op = if self.is_symbol("<=") {
                BinaryOp::Le
            } else if self.is_symbol(">=") {
                BinaryOp::Ge
            } else if self.is_symbol("<") {
                BinaryOp::Lt
            } else if self.is_symbol(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            self.advance();
            let rhs = self.additive_expr()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn additive_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative_expr()?;
        loop {
            let op = if self.is_symbol("+") {
                BinaryOp::Add
            } else if self.is_symbol("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            self.advance();
            let rhs = self.multiplicative_expr()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = if self.is_symbol("*") {
                BinaryOp::Mul
            } else if self.is_symbol("/") {
                BinaryOp::Div
            } else if self.is_symbol("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            self.advance();
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> Result<Expr, ParseError> {
        if self.is_symbol("!") {
            self.advance();
            let expr = self.unary_expr()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(expr) });
        }
        if self.is_symbol("-") {
            self.advance();
            let expr = self.unary_expr()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(expr) });
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary_expr()?;
        loop {
            if self.is_symbol("(") {
                let args = self.arg_list()?;
                expr = Expr::Call { callee: Box::new(expr), args };
            } else if self.is_symbol("[") {
                self.advance();
                let index = self.expr()?;
                self.eat_symbol("]")?;
                expr = Expr::Index { receiver: Box::new(expr), index: Box::new(index) };
            } else if self.is_symbol(".") {
                self.advance();
                let name = self.ident()?;
                if self.is_symbol("(") {
                    let args = self.arg_list()?;
                    expr = Expr::MethodCall { receiver: Box::new(expr), name, args };
                } else {
                    expr = Expr::Field { receiver: Box::new(expr), name };
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn arg_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.eat_symbol("(")?;
        let mut args = Vec::new();
        if !self.is_symbol(")") {
            loop {
                args.push(self.expr()?);
                if self.is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.eat_symbol(")")?;
        Ok(args)
    }

    fn primary_expr(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Keyword(Keyword::True) => Ok(Expr::Bool(true)),
            Token::Keyword(Keyword::False) => Ok(Expr::Bool(false)),
            Token::Keyword(Keyword::Nil) => Ok(Expr::Nil),
            Token::Str { text, raw } => {
                let parts = if raw {
                    Arc::new(vec![StrPart::Text(text)])
                } else {
                    Arc::new(parse_template_parts(&text, &self.file)?)
                };
                Ok(Expr::Str { parts, raw })
            }
            Token::Keyword(Keyword::Function) => {
                let params = self.param_list()?;
                let body = Arc::new(self.block()?);
                Ok(Expr::FunctionLit { name: None, params, body })
            }
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Symbol("(") => {
                let inner = self.expr()?;
                self.eat_symbol(")")?;
                Ok(inner)
            }
            Token::Symbol("[") => {
                let mut items = Vec::new();
                if !self.is_symbol("]") {
                    loop {
                        items.push(self.expr()?);
                        if self.is_symbol(",") {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.eat_symbol("]")?;
                Ok(Expr::ArrayLit(items))
            }
            Token::Symbol("{") => {
                let mut fields = Vec::new();
                if !self.is_symbol("}") {
                    loop {
                        let key = match self.advance() {
                            Token::Ident(s) => s,
                            Token::Str { text, .. } => text,
                            _ => return Err(self.err("expected object field name")),
                        };
                        self.eat_symbol(":")?;
                        let value = self.expr()?;
                        fields.push((key, value));
                        if self.is_symbol(",") {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.eat_symbol("}")?;
                Ok(Expr::ObjectLit(fields))
            }
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }
}

fn expr_to_assign_target(expr: Expr, parser: &Parser) -> Result<AssignTarget, ParseError> {
    match expr {
        Expr::Ident(name) => Ok(AssignTarget::Ident(name)),
        Expr::Index { receiver, index } => Ok(AssignTarget::Index(*receiver, *index)),
        Expr::Field { receiver, name } => Ok(AssignTarget::Field(*receiver, name)),
        _ => Err(parser.err("invalid assignment target")),
    }
}

/// Splits a string literal's text into alternating text/expression parts
/// at `{{ ... }}` boundaries and parses each expression segment with its
/// own lexer+parser pass.
fn parse_template_parts(text: &str, file: &str) -> Result<Vec<StrPart>, ParseError> {
    let mut parts = Vec::new();
    let mut rest = text;
    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    parts.push(StrPart::Text(rest.to_string()));
                }
                break;
            }
            Some(open) => {
                if open > 0 {
                    parts.push(StrPart::Text(rest[..open].to_string()));
                }
                let after_open = &rest[open + 2..];
                let close = after_open.find("}}").ok_or_else(|| ParseError::Syntax {
                    file: file.to_string(),
                    line: 0,
                    col: 0,
                    message: "unterminated '{{' in string template".to_string(),
                })?;
                let expr_src = &after_open[..close];
                let tokens = lex(expr_src, file)?;
                let mut sub = Parser { tokens, pos: 0, file: file.to_string() };
                let expr = sub.expr()?;
                parts.push(StrPart::Expr(expr));
                rest = &after_open[close + 2..];
            }
        }
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_var_decl_and_if() {
        let block = parse_program("var x = 1\nif x == 1 { x = 2 }", "t").unwrap();
        assert_eq!(block.len(), 2);
        assert!(matches!(block[0], Stmt::VarDecl(_, _)));
        assert!(matches!(block[1], Stmt::If { .. }));
    }

    #[test]
    fn parses_function_and_call() {
        let block = parse_program("function add(a, b) { return a + b }\nadd(1, 2)", "t").unwrap();
        assert!(matches!(block[0], Stmt::FunctionDecl { .. }));
        assert!(matches!(block[1], Stmt::Expr(Expr::Call { .. })));
    }

    #[test]
    fn parses_method_call_vs_field() {
        let block = parse_program("obj.method(1)\nobj.field", "t").unwrap();
        assert!(matches!(block[0], Stmt::Expr(Expr::MethodCall { .. })));
        assert!(matches!(block[1], Stmt::Expr(Expr::Field { .. })));
    }

    #[test]
    fn parses_for_range_and_for_in() {
        let block = parse_program("for i = 0, 10, 2 { }\nfor item in arr { }", "t").unwrap();
        assert!(matches!(block[0], Stmt::ForRange { .. }));
        assert!(matches!(block[1], Stmt::ForIn { .. }));
    }

    #[test]
    fn parses_string_template_parts() {
        let block = parse_program(r#""hi {{ name }}!""#, "t").unwrap();
        if let Stmt::Expr(Expr::Str { parts, raw: false }) = &block[0] {
            assert_eq!(parts.len(), 3);
        } else {
            panic!("expected templated string");
        }
    }

    #[test]
    fn parses_try_catch_and_throw() {
        let block = parse_program("try { throw 1 } catch (e) { }", "t").unwrap();
        assert!(matches!(block[0], Stmt::TryCatch { .. }));
    }
}
