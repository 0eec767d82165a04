//! Recursive-descent parser producing the syntax tree in [`crate::ast`].
//!
//! Statements outside the supported subset are rejected here with a message
//! naming the construct. Name-level restrictions live in [`crate::policy`].

use std::sync::Arc;

use crate::ast::*;
use crate::error::CompileError;
use crate::lexer::{tokenize, tokenize_fragment, FPiece, Tok, Token};

/// Maximum combined depth of nested brackets, blocks and operator chains.
pub const MAX_NESTING: usize = 100;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const UNSUPPORTED_STATEMENTS: &[&str] = &[
    "class", "global", "nonlocal", "try", "except", "finally", "raise", "with", "yield", "async",
    "await", "del",
];

pub fn parse(source: &str) -> Result<Vec<Stmt>, CompileError> {
    let tokens = tokenize(source)?;
    let mut p = Parser::new(tokens);
    p.file()
}

pub(crate) fn parse_fragment(source: &str, line: usize) -> Result<Expr, CompileError> {
    let tokens = tokenize_fragment(source, line)?;
    let mut p = Parser::new(tokens);
    let expr = p.testlist()?;
    while p.check(&Tok::Newline) {
        p.advance();
    }
    if !p.check(&Tok::Eof) {
        return Err(p.unexpected());
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // ----- token helpers -----

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn check_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), CompileError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", op)))
        }
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), CompileError> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        match self.peek().clone() {
            Tok::Name(n) if !is_keyword(&n) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.line(), msg)
    }

    fn unexpected(&self) -> CompileError {
        let what = match self.peek() {
            Tok::Name(n) => format!("'{}'", n),
            Tok::Int(i) => format!("'{}'", i),
            Tok::Float(f) => format!("'{}'", f),
            Tok::Str(_) | Tok::FStr(_) => "string literal".to_string(),
            Tok::Op(o) => format!("'{}'", o),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
        };
        self.err(format!("invalid syntax: unexpected {}", what))
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.err("too many nested expressions or blocks"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ----- statements -----

    fn file(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return Err(self.err("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Vec<Stmt>, CompileError> {
        if let Tok::Name(n) = self.peek().clone() {
            if UNSUPPORTED_STATEMENTS.contains(&n.as_str()) {
                return Err(self.err(format!("'{}' statements are not supported", n)));
            }
            match n.as_str() {
                "if" => return Ok(vec![self.if_stmt()?]),
                "while" => return Ok(vec![self.while_stmt()?]),
                "for" => return Ok(vec![self.for_stmt()?]),
                "def" => return Ok(vec![self.def_stmt()?]),
                _ => {}
            }
        }
        if self.check_op("@") {
            return Err(self.err("decorators are not supported"));
        }
        self.simple_statements()
    }

    fn simple_statements(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut out = vec![self.small_statement()?];
        while self.eat_op(";") {
            if self.check(&Tok::Newline) || self.check(&Tok::Eof) {
                break;
            }
            out.push(self.small_statement()?);
        }
        match self.peek() {
            Tok::Newline => {
                self.advance();
            }
            Tok::Eof | Tok::Dedent => {}
            _ => return Err(self.unexpected()),
        }
        Ok(out)
    }

    fn small_statement(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Name(n) if UNSUPPORTED_STATEMENTS.contains(&n.as_str()) => {
                return Err(self.err(format!("'{}' statements are not supported", n)));
            }
            Tok::Name(n) if n == "pass" => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Name(n) if n == "break" => {
                self.advance();
                StmtKind::Break
            }
            Tok::Name(n) if n == "continue" => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Name(n) if n == "return" => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.testlist_star()?))
                }
            }
            Tok::Name(n) if n == "import" => {
                self.advance();
                self.import_stmt()?
            }
            Tok::Name(n) if n == "from" => {
                self.advance();
                self.from_import_stmt()?
            }
            Tok::Name(n) if n == "assert" => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat_op(",") {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            _ => self.expr_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) || self.check_op(";")
    }

    fn dotted_name(&mut self) -> Result<String, CompileError> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_stmt(&mut self) -> Result<StmtKind, CompileError> {
        let mut names = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn from_import_stmt(&mut self) -> Result<StmtKind, CompileError> {
        if self.check_op(".") {
            return Err(self.err("relative imports are not supported"));
        }
        let module = self.dotted_name()?;
        self.expect_kw("import")?;
        if self.check_op("*") {
            return Err(self.err("wildcard imports are not supported"));
        }
        let parens = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let alias = if self.eat_kw("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(ImportName { name, alias });
            if !self.eat_op(",") {
                break;
            }
            if parens && self.check_op(")") {
                break;
            }
        }
        if parens {
            self.expect_op(")")?;
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn expr_statement(&mut self) -> Result<StmtKind, CompileError> {
        let first = self.testlist_star()?;

        if self.check_op(":=") {
            return Err(self.err("assignment expressions are not supported"));
        }

        if let Tok::Op(op) = self.peek().clone() {
            if let Some(bin) = aug_op(op) {
                self.advance();
                let target = self.to_target(first)?;
                if matches!(target, Target::Tuple(_) | Target::Starred(_)) {
                    return Err(self.err("illegal expression for augmented assignment"));
                }
                let value = self.testlist()?;
                return Ok(StmtKind::AugAssign {
                    target,
                    op: bin,
                    value,
                });
            }
        }

        if self.check_op(":") {
            return Err(self.err("annotated assignments are not supported"));
        }

        if !self.check_op("=") {
            return Ok(StmtKind::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat_op("=") {
            exprs.push(self.testlist_star()?);
        }
        let value = exprs.pop().ok_or_else(|| self.unexpected())?;
        let targets = exprs
            .into_iter()
            .map(|e| self.to_target(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr) -> Result<Target, CompileError> {
        match expr {
            Expr::Name(n) => Ok(Target::Name(n)),
            Expr::Attribute(obj, name) => Ok(Target::Attr(*obj, name)),
            Expr::Subscript(obj, idx) => Ok(Target::Subscript(*obj, *idx)),
            Expr::Tuple(items) | Expr::List(items) => {
                let targets = items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<Vec<_>, _>>()?;
                if targets
                    .iter()
                    .filter(|t| matches!(t, Target::Starred(_)))
                    .count()
                    > 1
                {
                    return Err(self.err("multiple starred expressions in assignment"));
                }
                Ok(Target::Tuple(targets))
            }
            Expr::Starred(inner) => Ok(Target::Starred(Box::new(self.to_target(*inner)?))),
            Expr::Call(..) => Err(self.err("cannot assign to function call")),
            _ => Err(self.err("cannot assign to literal or expression")),
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect_op(":")?;
        self.enter()?;
        let body = if self.check(&Tok::Newline) {
            self.advance();
            if !self.check(&Tok::Indent) {
                return Err(self.err("expected an indented block"));
            }
            self.advance();
            let mut body = Vec::new();
            while !self.check(&Tok::Dedent) && !self.check(&Tok::Eof) {
                if self.check(&Tok::Newline) {
                    self.advance();
                    continue;
                }
                body.extend(self.statement()?);
            }
            if self.check(&Tok::Dedent) {
                self.advance();
            }
            body
        } else {
            self.simple_statements()?
        };
        self.leave();
        Ok(body)
    }

    fn if_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.expect_kw("if")?;
        let mut branches = Vec::new();
        let cond = self.test()?;
        let body = self.block()?;
        branches.push((cond, body));
        let mut orelse = Vec::new();
        loop {
            if self.eat_kw("elif") {
                let cond = self.test()?;
                let body = self.block()?;
                branches.push((cond, body));
            } else if self.eat_kw("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            line,
            kind: StmtKind::If { branches, orelse },
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.expect_kw("while")?;
        let cond = self.test()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::While { cond, body, orelse },
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.expect_kw("for")?;
        let target = self.target_list()?;
        self.expect_kw("in")?;
        let iter = self.testlist()?;
        let body = self.block()?;
        let orelse = if self.eat_kw("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    /// Loop targets: `x`, `a, b`, `(a, b)`, `*rest`. Parsed below the
    /// comparison level so `in` is not consumed.
    fn target_list(&mut self) -> Result<Target, CompileError> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            let e = if self.eat_op("*") {
                Expr::Starred(Box::new(self.bitor()?))
            } else {
                self.bitor()?
            };
            items.push(e);
            trailing_comma = false;
            if !self.eat_op(",") {
                break;
            }
            trailing_comma = true;
            if self.check_kw("in") {
                break;
            }
        }
        let expr = if items.len() == 1 && !trailing_comma {
            items.pop().unwrap_or(Expr::None)
        } else {
            Expr::Tuple(items)
        };
        self.to_target(expr)
    }

    fn def_stmt(&mut self) -> Result<Stmt, CompileError> {
        let line = self.line();
        self.expect_kw("def")?;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.test()?;
        }
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef(Arc::new(FunctionDef {
                name,
                params,
                body: Body::Block(body),
                line,
            })),
        })
    }

    fn params(&mut self, close: &str, annotations: bool) -> Result<Vec<Param>, CompileError> {
        let mut params: Vec<Param> = Vec::new();
        while !self.check_op(close) {
            let kind = if self.eat_op("**") {
                ParamKind::VarKwargs
            } else if self.eat_op("*") {
                ParamKind::VarArgs
            } else {
                ParamKind::Normal
            };
            if self.check_op("/") || (kind == ParamKind::VarArgs && self.check_op(",")) {
                return Err(self.err("positional-only and keyword-only markers are not supported"));
            }
            let name = self.expect_name()?;
            if annotations && self.eat_op(":") {
                self.test()?;
            }
            let default = if kind == ParamKind::Normal && self.eat_op("=") {
                Some(self.test()?)
            } else {
                None
            };
            if params.iter().any(|p| p.name == name) {
                return Err(self.err(format!(
                    "duplicate argument '{}' in function definition",
                    name
                )));
            }
            if kind == ParamKind::Normal
                && default.is_none()
                && params.iter().any(|p| p.default.is_some())
            {
                return Err(self.err("non-default argument follows default argument"));
            }
            if params.iter().any(|p| p.kind == ParamKind::VarKwargs) {
                return Err(self.err("arguments cannot follow **kwargs"));
            }
            if kind != ParamKind::VarKwargs && params.iter().any(|p| p.kind == ParamKind::VarArgs)
            {
                return Err(self.err("keyword-only arguments are not supported"));
            }
            params.push(Param {
                name,
                default,
                kind,
            });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    // ----- expressions -----

    /// `a, b` or a single expression; starred items allowed.
    fn testlist_star(&mut self) -> Result<Expr, CompileError> {
        self.expr_list(true)
    }

    fn testlist(&mut self) -> Result<Expr, CompileError> {
        self.expr_list(false)
    }

    fn expr_list(&mut self, allow_star: bool) -> Result<Expr, CompileError> {
        let first = self.test_or_star(allow_star)?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_expr_list_end() {
                break;
            }
            items.push(self.test_or_star(allow_star)?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_expr_list_end(&self) -> bool {
        self.at_statement_end()
            || self.check_op("=")
            || self.check_op(")")
            || self.check_op("]")
            || self.check_op("}")
            || self.check_op(":")
            || matches!(self.peek(), Tok::Op(op) if aug_op(op).is_some())
    }

    fn test_or_star(&mut self, allow_star: bool) -> Result<Expr, CompileError> {
        if allow_star && self.eat_op("*") {
            return Ok(Expr::Starred(Box::new(self.bitor()?)));
        }
        self.test()
    }

    pub(crate) fn test(&mut self) -> Result<Expr, CompileError> {
        if self.check_kw("lambda") {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.eat_kw("if") {
            let test = self.or_test()?;
            self.expect_kw("else")?;
            let orelse = self.test()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn lambda(&mut self) -> Result<Expr, CompileError> {
        let line = self.line();
        self.expect_kw("lambda")?;
        let params = self.params(":", false)?;
        self.expect_op(":")?;
        self.enter()?;
        let body = self.test()?;
        self.leave();
        Ok(Expr::Lambda(Arc::new(FunctionDef {
            name: "<lambda>".into(),
            params,
            body: Body::Lambda(body),
            line,
        })))
    }

    fn or_test(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.and_test()?;
        let base = self.depth;
        while self.eat_kw("or") {
            self.enter()?;
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.not_test()?;
        let base = self.depth;
        while self.eat_kw("and") {
            self.enter()?;
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, CompileError> {
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.not_test()?;
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, CompileError> {
        let left = self.bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = if self.check_op("==") {
                CmpOp::Eq
            } else if self.check_op("!=") {
                CmpOp::NotEq
            } else if self.check_op("<") {
                CmpOp::Lt
            } else if self.check_op("<=") {
                CmpOp::LtE
            } else if self.check_op(">") {
                CmpOp::Gt
            } else if self.check_op(">=") {
                CmpOp::GtE
            } else if self.check_kw("in") {
                CmpOp::In
            } else if self.check_kw("not") && matches!(self.peek_at(1), Tok::Name(n) if n == "in")
            {
                self.advance();
                CmpOp::NotIn
            } else if self.check_kw("is") {
                if matches!(self.peek_at(1), Tok::Name(n) if n == "not") {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            } else {
                break;
            };
            self.advance();
            ops.push((op, self.bitor()?));
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), ops))
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, CompileError>,
    ) -> Result<Expr, CompileError> {
        let mut left = next(self)?;
        let base = self.depth;
        'outer: loop {
            for (sym, op) in ops {
                if self.check_op(sym) {
                    self.advance();
                    self.enter()?;
                    let right = next(self)?;
                    left = Expr::BinOp(Box::new(left), *op, Box::new(right));
                    continue 'outer;
                }
            }
            break;
        }
        self.depth = base;
        Ok(left)
    }

    fn bitor(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitxor)
    }

    fn bitxor(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitand)
    }

    fn bitand(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[("<<", BinOp::LShift), (">>", BinOp::RShift)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMul),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, CompileError> {
        let op = if self.check_op("-") {
            Some(UnaryOp::Neg)
        } else if self.check_op("+") {
            Some(UnaryOp::Pos)
        } else if self.check_op("~") {
            Some(UnaryOp::Invert)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.factor()?;
            self.leave();
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, CompileError> {
        let base = self.primary()?;
        if self.eat_op("**") {
            self.enter()?;
            let exp = self.factor()?;
            self.leave();
            return Ok(Expr::BinOp(Box::new(base), BinOp::Pow, Box::new(exp)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.atom()?;
        let base = self.depth;
        loop {
            if self.eat_op("(") {
                self.enter()?;
                let args = self.call_args()?;
                self.expect_op(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else if self.eat_op("[") {
                self.enter()?;
                let index = self.subscript()?;
                self.expect_op("]")?;
                expr = Expr::Subscript(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                self.enter()?;
                let name = self.expect_name()?;
                expr = Expr::Attribute(Box::new(expr), name);
            } else {
                break;
            }
        }
        self.depth = base;
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, CompileError> {
        let mut args = Vec::new();
        while !self.check_op(")") {
            if self.eat_op("**") {
                args.push(Arg::DoubleStar(self.test()?));
            } else if self.eat_op("*") {
                args.push(Arg::Star(self.test()?));
            } else if matches!(self.peek(), Tok::Name(n) if !is_keyword(n))
                && matches!(self.peek_at(1), Tok::Op("="))
            {
                let name = self.expect_name()?;
                self.advance();
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                let value = self.test()?;
                if self.check_kw("for") {
                    let generators = self.comprehension_clauses()?;
                    args.push(Arg::Positional(Expr::ListComp(Box::new(value), generators)));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn subscript(&mut self) -> Result<Expr, CompileError> {
        let first = self.slice_item()?;
        if !self.check_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.slice_item()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn slice_item(&mut self) -> Result<Expr, CompileError> {
        let lower = if self.check_op(":") {
            None
        } else {
            let e = self.test()?;
            if !self.check_op(":") {
                return Ok(e);
            }
            Some(Box::new(e))
        };
        self.expect_op(":")?;
        let upper = if self.check_op(":") || self.check_op("]") || self.check_op(",") {
            None
        } else {
            Some(Box::new(self.test()?))
        };
        let step = if self.eat_op(":") {
            if self.check_op("]") || self.check_op(",") {
                None
            } else {
                Some(Box::new(self.test()?))
            }
        } else {
            None
        };
        Ok(Expr::Slice(lower, upper, step))
    }

    fn comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, CompileError> {
        let mut clauses = Vec::new();
        while self.eat_kw("for") {
            let target = self.target_list()?;
            self.expect_kw("in")?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.or_test()?);
            }
            clauses.push(Comprehension { target, iter, ifs });
        }
        if self.check_kw("async") {
            return Err(self.err("'async' statements are not supported"));
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, CompileError> {
        let tok = self.peek().clone();
        match tok {
            Tok::Int(i) => {
                self.advance();
                Ok(Expr::Int(i))
            }
            Tok::Float(f) => {
                self.advance();
                Ok(Expr::Float(f))
            }
            Tok::Str(_) | Tok::FStr(_) => self.strings(),
            Tok::Name(n) => match n.as_str() {
                "None" => {
                    self.advance();
                    Ok(Expr::None)
                }
                "True" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "yield" | "await" => Err(self.err(format!("'{}' statements are not supported", n))),
                _ if is_keyword(&n) => Err(self.unexpected()),
                _ => {
                    self.advance();
                    Ok(Expr::Name(n))
                }
            },
            Tok::Op("(") => {
                self.advance();
                self.enter()?;
                let expr = self.paren_body()?;
                self.expect_op(")")?;
                self.leave();
                Ok(expr)
            }
            Tok::Op("[") => {
                self.advance();
                self.enter()?;
                let expr = self.list_body()?;
                self.expect_op("]")?;
                self.leave();
                Ok(expr)
            }
            Tok::Op("{") => {
                self.advance();
                self.enter()?;
                let expr = self.brace_body()?;
                self.expect_op("}")?;
                self.leave();
                Ok(expr)
            }
            Tok::Op("...") => Err(self.err("Ellipsis is not supported")),
            _ => Err(self.unexpected()),
        }
    }

    fn paren_body(&mut self) -> Result<Expr, CompileError> {
        if self.check_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        if self.check_kw("yield") {
            return Err(self.err("'yield' statements are not supported"));
        }
        let first = self.test_or_star(true)?;
        if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            return Ok(Expr::ListComp(Box::new(first), generators));
        }
        if !self.check_op(",") {
            if matches!(first, Expr::Starred(_)) {
                return Err(self.err("cannot use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op(")") {
                break;
            }
            items.push(self.test_or_star(true)?);
        }
        Ok(Expr::Tuple(items))
    }

    fn list_body(&mut self) -> Result<Expr, CompileError> {
        if self.check_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.test_or_star(true)?;
        if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            return Ok(Expr::ListComp(Box::new(first), generators));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("]") {
                break;
            }
            items.push(self.test_or_star(true)?);
        }
        Ok(Expr::List(items))
    }

    fn brace_body(&mut self) -> Result<Expr, CompileError> {
        if self.check_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }
        let first_key = if self.eat_op("**") {
            None
        } else {
            Some(self.test_or_star(true)?)
        };
        let is_dict = first_key.is_none() || self.check_op(":");
        if is_dict {
            let first_value = match &first_key {
                None => self.bitor()?,
                Some(_) => {
                    self.expect_op(":")?;
                    self.test()?
                }
            };
            if let (Some(key), true) = (&first_key, self.check_kw("for")) {
                let generators = self.comprehension_clauses()?;
                return Ok(Expr::DictComp(
                    Box::new(key.clone()),
                    Box::new(first_value),
                    generators,
                ));
            }
            let mut entries = vec![(first_key, first_value)];
            while self.eat_op(",") {
                if self.check_op("}") {
                    break;
                }
                if self.eat_op("**") {
                    entries.push((None, self.bitor()?));
                } else {
                    let key = self.test()?;
                    self.expect_op(":")?;
                    entries.push((Some(key), self.test()?));
                }
            }
            return Ok(Expr::Dict(entries));
        }

        let first = first_key.unwrap_or(Expr::None);
        if self.check_kw("for") {
            let generators = self.comprehension_clauses()?;
            return Ok(Expr::SetComp(Box::new(first), generators));
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.check_op("}") {
                break;
            }
            items.push(self.test_or_star(true)?);
        }
        Ok(Expr::Set(items))
    }

    /// Adjacent string literals concatenate; any f-string makes the whole
    /// run an f-string.
    fn strings(&mut self) -> Result<Expr, CompileError> {
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut any_f = false;
        loop {
            let line = self.line();
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    push_lit(&mut parts, s);
                }
                Tok::FStr(pieces) => {
                    self.advance();
                    any_f = true;
                    for piece in pieces {
                        match piece {
                            FPiece::Lit(s) => push_lit(&mut parts, s),
                            FPiece::Expr {
                                src,
                                conversion,
                                spec,
                            } => {
                                let expr = parse_fragment(&src, line)?;
                                parts.push(FStringPart::Field {
                                    expr,
                                    conversion,
                                    spec,
                                });
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        if !any_f {
            let text = parts
                .into_iter()
                .map(|p| match p {
                    FStringPart::Lit(s) => s,
                    FStringPart::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Str(text));
        }
        Ok(Expr::FString(parts))
    }
}

fn push_lit(parts: &mut Vec<FStringPart>, s: String) {
    if let Some(FStringPart::Lit(last)) = parts.last_mut() {
        last.push_str(&s);
    } else {
        parts.push(FStringPart::Lit(s));
    }
}

fn aug_op(op: &str) -> Option<BinOp> {
    Some(match op {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        "@=" => BinOp::MatMul,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(src: &str) -> StmtKind {
        let mut body = parse(src).unwrap();
        assert_eq!(body.len(), 1, "{body:?}");
        body.remove(0).kind
    }

    #[test]
    fn precedence_of_arithmetic() {
        match one("x = 1 + 2 * 3 ** 2") {
            StmtKind::Assign { value, .. } => match value {
                Expr::BinOp(_, BinOp::Add, right) => {
                    assert!(matches!(*right, Expr::BinOp(_, BinOp::Mul, _)));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn chained_assignment_and_unpacking() {
        match one("a = b = 1") {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match one("a, *rest = [1, 2, 3]") {
            StmtKind::Assign { targets, .. } => {
                assert!(matches!(&targets[0], Target::Tuple(t) if t.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compound_statements_track_lines() {
        let body = parse("x = 1\nif x:\n    y = 2\nelse:\n    y = 3\nfor i in range(3):\n    pass\n")
            .unwrap();
        assert_eq!(body.len(), 3);
        assert_eq!(body[1].line, 2);
        assert_eq!(body[2].line, 6);
    }

    #[test]
    fn blank_lines_after_a_function_end_its_body() {
        let body = parse("def f():\n    return 1\n\n# after\nprint('after-blank')\n").unwrap();
        assert_eq!(body.len(), 2);
        match &body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert!(matches!(&def.body, Body::Block(stmts) if stmts.len() == 1));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(body[1].line, 5);
    }

    #[test]
    fn comprehensions_and_generators() {
        assert!(matches!(
            one("[x * 2 for x in xs if x]"),
            StmtKind::Expr(Expr::ListComp(..))
        ));
        assert!(matches!(
            one("{k: v for k, v in d.items()}"),
            StmtKind::Expr(Expr::DictComp(..))
        ));
        match one("sum(x for x in xs)") {
            StmtKind::Expr(Expr::Call(_, args)) => {
                assert!(matches!(&args[0], Arg::Positional(Expr::ListComp(..))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn slices_and_keyword_args() {
        assert!(matches!(
            one("t[1:3]"),
            StmtKind::Expr(Expr::Subscript(_, idx)) if matches!(*idx, Expr::Slice(..))
        ));
        match one("f(1, key=lambda r: r[0])") {
            StmtKind::Expr(Expr::Call(_, args)) => {
                assert!(matches!(&args[1], Arg::Keyword(k, Expr::Lambda(_)) if k == "key"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unsupported_statements_are_named() {
        for (src, word) in [
            ("class A:\n    pass\n", "class"),
            ("try:\n    x = 1\nexcept:\n    pass\n", "try"),
            ("raise ValueError()", "raise"),
            ("with x as y:\n    pass\n", "with"),
            ("del x", "del"),
            ("global x", "global"),
            ("x = yield 1", "yield"),
        ] {
            let err = parse(src).unwrap_err();
            assert!(err.message.contains(word), "{src}: {}", err.message);
        }
    }

    #[test]
    fn fstring_fields_parse_expressions() {
        match one("f'{a + 1:>4} and {b!r}'") {
            StmtKind::Expr(Expr::FString(parts)) => {
                assert_eq!(parts.len(), 3);
                assert!(matches!(&parts[0], FStringPart::Field { expr: Expr::BinOp(..), .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("x = {}1{}", "(".repeat(150), ")".repeat(150));
        let err = parse(&src).unwrap_err();
        assert!(err.message.contains("nested"));
    }

    #[test]
    fn syntax_errors_report_line() {
        let err = parse("x = 1\ny = (2 +\n").unwrap_err();
        assert!(err.line >= 2);
        let err = parse("x = = 1").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
