//! Compile-time restriction checker.
//!
//! Runs over the whole tree before anything executes. Rejects private names,
//! names of dangerous primitives, and dotted imports that would bind a
//! package rather than the requested module.

use crate::ast::*;
use crate::error::CompileError;

/// Names that may never appear in a script, even as plain identifiers.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "exec",
    "eval",
    "compile",
    "open",
    "globals",
    "locals",
    "vars",
    "breakpoint",
    "input",
];

pub fn check(body: &[Stmt]) -> Result<(), CompileError> {
    let mut checker = Checker { line: 1 };
    checker.block(body)
}

struct Checker {
    line: usize,
}

impl Checker {
    fn err(&self, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.line, msg)
    }

    fn name(&self, name: &str) -> Result<(), CompileError> {
        if name.starts_with('_') {
            return Err(self.err(format!(
                "\"{}\" is an invalid variable name because it starts with \"_\"",
                name
            )));
        }
        if FORBIDDEN_NAMES.contains(&name) {
            return Err(self.err(format!("\"{}\" is not allowed", name)));
        }
        Ok(())
    }

    fn attribute(&self, attr: &str) -> Result<(), CompileError> {
        if attr.starts_with('_') {
            return Err(self.err(format!(
                "\"{}\" is an invalid attribute name because it starts with \"_\"",
                attr
            )));
        }
        if FORBIDDEN_NAMES.contains(&attr) {
            return Err(self.err(format!("\"{}\" is not allowed", attr)));
        }
        Ok(())
    }

    fn module_path(&self, module: &str) -> Result<(), CompileError> {
        for part in module.split('.') {
            self.name(part)?;
        }
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        body.iter().try_for_each(|s| self.stmt(s))
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Assign { targets, value } => {
                targets.iter().try_for_each(|t| self.target(t))?;
                self.expr(value)
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target)?;
                self.expr(value)
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    self.line = stmt.line;
                    self.expr(cond)?;
                    self.block(body)?;
                }
                self.block(orelse)
            }
            StmtKind::While { cond, body, orelse } => {
                self.expr(cond)?;
                self.block(body)?;
                self.block(orelse)
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.target(target)?;
                self.expr(iter)?;
                self.block(body)?;
                self.block(orelse)
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => Ok(()),
            StmtKind::FunctionDef(def) => self.function(def),
            StmtKind::Return(value) => value.as_ref().map_or(Ok(()), |v| self.expr(v)),
            StmtKind::Import(names) => {
                for n in names {
                    self.module_path(&n.name)?;
                    match &n.alias {
                        Some(alias) => self.name(alias)?,
                        None if n.name.contains('.') => {
                            return Err(self.err(format!(
                                "\"import {}\" must use an alias: import {} as name",
                                n.name, n.name
                            )));
                        }
                        None => {}
                    }
                }
                Ok(())
            }
            StmtKind::ImportFrom { module, names } => {
                self.module_path(module)?;
                for n in names {
                    self.name(&n.name)?;
                    if let Some(alias) = &n.alias {
                        self.name(alias)?;
                    }
                }
                Ok(())
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test)?;
                msg.as_ref().map_or(Ok(()), |m| self.expr(m))
            }
        }
    }

    fn function(&mut self, def: &FunctionDef) -> Result<(), CompileError> {
        if def.name != "<lambda>" {
            self.name(&def.name)?;
        }
        for p in &def.params {
            self.name(&p.name)?;
            if let Some(d) = &p.default {
                self.expr(d)?;
            }
        }
        match &def.body {
            Body::Block(body) => self.block(body),
            Body::Lambda(e) => self.expr(e),
        }
    }

    fn target(&mut self, target: &Target) -> Result<(), CompileError> {
        match target {
            Target::Name(n) => self.name(n),
            Target::Attr(obj, attr) => {
                self.attribute(attr)?;
                self.expr(obj)
            }
            Target::Subscript(obj, idx) => {
                self.expr(obj)?;
                self.expr(idx)
            }
            Target::Tuple(items) => items.iter().try_for_each(|t| self.target(t)),
            Target::Starred(inner) => self.target(inner),
        }
    }

    fn comprehensions(&mut self, generators: &[Comprehension]) -> Result<(), CompileError> {
        for g in generators {
            self.target(&g.target)?;
            self.expr(&g.iter)?;
            g.ifs.iter().try_for_each(|e| self.expr(e))?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::None | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => Ok(()),
            Expr::FString(parts) => parts.iter().try_for_each(|p| match p {
                FStringPart::Lit(_) => Ok(()),
                FStringPart::Field { expr, .. } => self.expr(expr),
            }),
            Expr::Name(n) => self.name(n),
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                items.iter().try_for_each(|e| self.expr(e))
            }
            Expr::Dict(entries) => {
                for (k, v) in entries {
                    if let Some(k) = k {
                        self.expr(k)?;
                    }
                    self.expr(v)?;
                }
                Ok(())
            }
            Expr::Starred(inner) => self.expr(inner),
            Expr::Attribute(obj, attr) => {
                self.attribute(attr)?;
                self.expr(obj)
            }
            Expr::Subscript(obj, idx) => {
                self.expr(obj)?;
                self.expr(idx)
            }
            Expr::Slice(a, b, c) => {
                for part in [a, b, c].into_iter().flatten() {
                    self.expr(part)?;
                }
                Ok(())
            }
            Expr::Call(func, args) => {
                self.expr(func)?;
                for arg in args {
                    match arg {
                        Arg::Positional(e) | Arg::Star(e) | Arg::DoubleStar(e) => self.expr(e)?,
                        Arg::Keyword(name, e) => {
                            self.name(name)?;
                            self.expr(e)?;
                        }
                    }
                }
                Ok(())
            }
            Expr::BinOp(l, _, r) | Expr::And(l, r) | Expr::Or(l, r) => {
                self.expr(l)?;
                self.expr(r)
            }
            Expr::Unary(_, e) => self.expr(e),
            Expr::Compare(first, rest) => {
                self.expr(first)?;
                rest.iter().try_for_each(|(_, e)| self.expr(e))
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)
            }
            Expr::Lambda(def) => self.function(def),
            Expr::ListComp(elt, gens) | Expr::SetComp(elt, gens) => {
                self.comprehensions(gens)?;
                self.expr(elt)
            }
            Expr::DictComp(k, v, gens) => {
                self.comprehensions(gens)?;
                self.expr(k)?;
                self.expr(v)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn check_src(src: &str) -> Result<(), CompileError> {
        check(&parse(src).unwrap())
    }

    #[test]
    fn private_names_are_rejected() {
        let err = check_src("x = 1\n_y = 2\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("_y"));
        assert!(check_src("def f(_a):\n    return 1\n").is_err());
        assert!(check_src("f(_k=1)").is_err());
        assert!(check_src("from math import _private").is_err());
    }

    #[test]
    fn dunder_attributes_are_rejected() {
        let err = check_src("x = ().__class__.__bases__").unwrap_err();
        assert!(err.message.contains("__"));
        assert!(check_src("t.x = 1").is_ok());
        assert!(check_src("t._x = 1").is_err());
    }

    #[test]
    fn forbidden_primitives_are_rejected() {
        for src in ["open('f')", "eval('1')", "x = exec", "def g(input):\n    pass\n"] {
            assert!(check_src(src).is_err(), "{src}");
        }
    }

    #[test]
    fn dotted_import_needs_alias() {
        assert!(check_src("import os.path").is_err());
        assert!(check_src("import os.path as p").is_ok());
        assert!(check_src("import math").is_ok());
    }

    #[test]
    fn comprehension_and_lambda_bodies_are_checked() {
        assert!(check_src("[x.__dict__ for x in xs]").is_err());
        assert!(check_src("f = lambda: _hidden").is_err());
        assert!(check_src("s = f'{_x}'").is_err());
    }
}
