//! Tree-walking interpreter for the restricted language.
//!
//! Every attribute access, subscript and iteration goes through the
//! injected [`Guards`]; imports go through the [`ImportResolver`]; `print`
//! goes to the [`OutputSink`]. Nothing else reaches the host.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::ast::*;
use crate::builtins;
use crate::capture::OutputSink;
use crate::error::{ExcKind, ExecResult, Exception};
use crate::format;
use crate::hooks::Guards;
use crate::imports::{ImportResolver, ModuleLoader};
use crate::methods;
use crate::ops;
use crate::value::{
    CallArgs, Dict, Function, Module, Namespace, Origin, Set, SharedNamespace, Value,
};

pub const DEFAULT_MAX_DEPTH: usize = 100;

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    globals: SharedNamespace,
    /// `None` at module level, where assignments go to `globals`.
    locals: Option<Namespace>,
    closure: Arc<Namespace>,
    /// The running function under its own name, for recursion.
    current: Option<(String, Value)>,
    /// Comprehension scopes, innermost last.
    scopes: Vec<Namespace>,
    origin: Origin,
}

impl Frame {
    fn module(globals: SharedNamespace, origin: Origin) -> Self {
        Self {
            globals,
            locals: None,
            closure: Arc::new(Namespace::new()),
            current: None,
            scopes: Vec::new(),
            origin,
        }
    }
}

pub struct Interpreter<'a> {
    guards: &'a Guards,
    imports: &'a ImportResolver,
    out: &'a mut dyn OutputSink,
    frame: Frame,
    depth: usize,
    max_depth: usize,
    loading: Vec<String>,
}

impl<'a> Interpreter<'a> {
    pub fn new(guards: &'a Guards, imports: &'a ImportResolver, out: &'a mut dyn OutputSink) -> Self {
        Self {
            guards,
            imports,
            out,
            frame: Frame::module(Arc::new(RwLock::new(Namespace::new())), Origin::Main),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            loading: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Execute a main script against `globals`. Exceptions carry the line of
    /// the statement running at the main script's top level when they
    /// escaped, so a failure inside a function points at its call site.
    pub fn run(&mut self, program: &Program, globals: &SharedNamespace) -> ExecResult<()> {
        self.exec_module(&program.body, globals.clone(), Origin::Main)
    }

    fn exec_module(&mut self, body: &[Stmt], globals: SharedNamespace, origin: Origin) -> ExecResult<()> {
        let saved = std::mem::replace(&mut self.frame, Frame::module(globals, origin));
        let result = self.exec_block(body);
        self.frame = saved;
        match result? {
            Flow::Normal => Ok(()),
            // The parser rejects these outside their constructs.
            Flow::Break | Flow::Continue | Flow::Return(_) => Ok(()),
        }
    }

    pub fn write_output(&mut self, text: &str) {
        self.out.write(text);
    }

    pub fn iterate(&mut self, obj: &Value) -> ExecResult<Vec<Value>> {
        self.guards.iteration.iterate(obj)
    }

    pub fn get_attr(&mut self, obj: &Value, name: &str) -> ExecResult<Value> {
        self.guards.attributes.get_attr(obj, name)
    }

    pub fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> ExecResult<()> {
        self.guards.attributes.set_attr(obj, name, value)
    }

    pub fn get_item(&mut self, obj: &Value, index: &Value) -> ExecResult<Value> {
        self.guards.items.get_item(obj, index)
    }

    pub fn set_item(&mut self, obj: &Value, index: Value, value: Value) -> ExecResult<()> {
        self.guards.items.set_item(obj, index, value)
    }

    /// Call any callable value.
    pub fn call(&mut self, func: &Value, args: CallArgs) -> ExecResult<Value> {
        match func {
            Value::Native(f) => (f.func)(self, args),
            Value::Method(m) => methods::call_method(self, &m.receiver, &m.name, args),
            Value::Function(f) => self.call_function(f, args),
            Value::Type(name) => match builtins::lookup(name) {
                Some(ctor) => self.call(&ctor, args),
                None => Err(Exception::type_error(format!(
                    "cannot create '{}' instances",
                    name
                ))),
            },
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, f: &Arc<Function>, args: CallArgs) -> ExecResult<Value> {
        if self.depth >= self.max_depth {
            return Err(Exception::new(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let globals = f.globals.upgrade().ok_or_else(|| {
            Exception::new(
                ExcKind::RuntimeError,
                format!("function '{}' outlived its module", f.def.name),
            )
        })?;
        let locals = bind_params(f, args)?;
        let frame = Frame {
            globals,
            locals: Some(locals),
            closure: f.closure.clone(),
            current: Some((f.def.name.clone(), Value::Function(f.clone()))),
            scopes: Vec::new(),
            origin: f.origin.clone(),
        };

        self.depth += 1;
        let saved = std::mem::replace(&mut self.frame, frame);
        let result = match &f.def.body {
            Body::Block(body) => self.exec_block(body).map(|flow| match flow {
                Flow::Return(v) => v,
                _ => Value::None,
            }),
            Body::Lambda(expr) => self.eval(expr),
        };
        self.frame = saved;
        self.depth -= 1;
        result
    }

    // ---- statements ----

    fn exec_block(&mut self, body: &[Stmt]) -> ExecResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt) {
                Ok(Flow::Normal) => {}
                Ok(flow) => return Ok(flow),
                Err(e) => {
                    let top_level = self.frame.origin == Origin::Main && self.frame.locals.is_none();
                    return Err(if top_level { e.at_line(stmt.line) } else { e });
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy()? {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body, orelse } => {
                while self.eval(cond)?.truthy()? {
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                for item in self.iterate(&iterable)? {
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::FunctionDef(def) => {
                let func = self.make_function(def)?;
                self.bind(&def.name, func);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Import(names) => {
                for n in names {
                    let module = self.import(&n.name)?;
                    self.bind(n.binding(), Value::Module(module));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let m = self.import(module)?;
                for n in names {
                    let value = m.get(&n.name).ok_or_else(|| {
                        Exception::new(
                            ExcKind::ImportError,
                            format!("cannot import name '{}' from '{}'", n.name, module),
                        )
                    })?;
                    self.bind(n.binding(), value);
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.truthy()? {
                    let message = match msg {
                        Some(m) => self.eval(m)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Exception::new(ExcKind::AssertionError, message));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn import(&mut self, name: &str) -> ExecResult<Arc<Module>> {
        let imports = self.imports;
        imports.resolve(name, self)
    }

    fn make_function(&mut self, def: &Arc<FunctionDef>) -> ExecResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for p in &def.params {
            defaults.push(match &p.default {
                Some(e) => Some(self.eval(e)?),
                None => None,
            });
        }
        Ok(Value::Function(Arc::new(Function {
            def: def.clone(),
            defaults,
            globals: Arc::downgrade(&self.frame.globals),
            closure: self.capture_closure(),
            origin: self.frame.origin.clone(),
        })))
    }

    /// Snapshot of the enclosing function scopes for a nested definition.
    fn capture_closure(&self) -> Arc<Namespace> {
        let frame = &self.frame;
        if frame.locals.is_none() && frame.scopes.is_empty() {
            return frame.closure.clone();
        }
        let mut ns: Namespace = (*frame.closure).clone();
        if let Some((name, value)) = &frame.current {
            ns.insert(name.clone(), value.clone());
        }
        if let Some(locals) = &frame.locals {
            ns.extend(locals.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        for scope in &frame.scopes {
            ns.extend(scope.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Arc::new(ns)
    }

    fn bind(&mut self, name: &str, value: Value) {
        let frame = &mut self.frame;
        if let Some(scope) = frame.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        } else if let Some(locals) = frame.locals.as_mut() {
            locals.insert(name.to_string(), value);
        } else {
            frame.globals.write().insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> ExecResult<Value> {
        let frame = &self.frame;
        for scope in frame.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Ok(v.clone());
            }
        }
        if let Some(v) = frame.locals.as_ref().and_then(|l| l.get(name)) {
            return Ok(v.clone());
        }
        if let Some(v) = frame.closure.get(name) {
            return Ok(v.clone());
        }
        if let Some((fname, v)) = &frame.current {
            if fname == name {
                return Ok(v.clone());
            }
        }
        if let Some(v) = frame.globals.read().get(name) {
            return Ok(v.clone());
        }
        builtins::lookup(name).ok_or_else(|| {
            Exception::new(ExcKind::NameError, format!("name '{}' is not defined", name))
        })
    }

    fn assign(&mut self, target: &Target, value: Value) -> ExecResult<()> {
        match target {
            Target::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Target::Attr(obj, name) => {
                let obj = self.eval(obj)?;
                self.set_attr(&obj, name, value)
            }
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.set_item(&obj, index, value)
            }
            Target::Tuple(targets) => self.unpack(targets, value),
            Target::Starred(_) => Err(Exception::new(
                ExcKind::SyntaxError,
                "starred assignment target must be in a list or tuple",
            )),
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value) -> ExecResult<()> {
        let items = self.iterate(&value)?;
        let star = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        match star {
            None => {
                if items.len() != targets.len() {
                    return Err(Exception::value_error(if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    }));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v)?;
                }
            }
            Some(pos) => {
                let after = targets.len() - pos - 1;
                if items.len() < pos + after {
                    return Err(Exception::value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        pos + after,
                        items.len()
                    )));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(pos);
                for (t, v) in targets[..pos].iter().zip(items) {
                    self.assign(t, v)?;
                }
                if let Target::Starred(inner) = &targets[pos] {
                    self.assign(inner, Value::list(middle))?;
                }
                for (t, v) in targets[pos + 1..].iter().zip(tail) {
                    self.assign(t, v)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> ExecResult<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = self.in_place(op, current, &rhs)?;
                self.bind(name, updated);
                Ok(())
            }
            Target::Attr(obj, name) => {
                let obj = self.eval(obj)?;
                let current = self.get_attr(&obj, name)?;
                let rhs = self.eval(value)?;
                let updated = self.in_place(op, current, &rhs)?;
                self.set_attr(&obj, name, updated)
            }
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(value)?;
                let updated = self.in_place(op, current, &rhs)?;
                self.set_item(&obj, index, updated)
            }
            Target::Tuple(_) | Target::Starred(_) => Err(Exception::new(
                ExcKind::SyntaxError,
                "illegal expression for augmented assignment",
            )),
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn in_place(&mut self, op: BinOp, current: Value, rhs: &Value) -> ExecResult<Value> {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = self.iterate(rhs)?;
            items.write().extend(extra);
            return Ok(current);
        }
        ops::binary(op, &current, rhs)
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr) -> ExecResult<Value> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Lit(s) => out.push_str(s),
                        FStringPart::Field {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let v = self.eval(expr)?;
                            out.push_str(&format::format_field(
                                &v,
                                *conversion,
                                spec.as_deref().unwrap_or(""),
                            )?);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::list(self.eval_seq(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_seq(items)?)),
            Expr::Set(items) => {
                let mut set = Set::new();
                for v in self.eval_seq(items)? {
                    set.add(v)?;
                }
                Ok(Value::set(set))
            }
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    match key {
                        Some(k) => {
                            let k = self.eval(k)?;
                            let v = self.eval(value)?;
                            dict.set_item(k, v)?;
                        }
                        None => match self.eval(value)? {
                            Value::Dict(other) => {
                                for (k, v) in other.read().items() {
                                    dict.set_item(k, v)?;
                                }
                            }
                            other => {
                                return Err(Exception::type_error(format!(
                                    "'{}' object is not a mapping",
                                    other.type_name()
                                )))
                            }
                        },
                    }
                }
                Ok(Value::dict(dict))
            }
            Expr::Starred(_) => Err(Exception::new(
                ExcKind::SyntaxError,
                "can't use starred expression here",
            )),
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj)?;
                self.get_attr(&obj, name)
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.get_item(&obj, &index)
            }
            Expr::Slice(start, stop, step) => {
                let mut bounds = [None; 3];
                for (slot, part) in bounds.iter_mut().zip([start, stop, step]) {
                    if let Some(e) = part {
                        *slot = match self.eval(e)? {
                            Value::None => None,
                            v => Some(v.as_int("slice indices")?),
                        };
                    }
                }
                Ok(Value::Slice(Arc::new(bounds)))
            }
            Expr::Call(func, args) => {
                let func = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call(&func, args)
            }
            Expr::BinOp(a, op, b) => {
                let a = self.eval(a)?;
                let b = self.eval(b)?;
                ops::binary(*op, &a, &b)
            }
            Expr::Unary(op, v) => {
                let v = self.eval(v)?;
                ops::unary(*op, &v)
            }
            Expr::And(a, b) => {
                let a = self.eval(a)?;
                if a.truthy()? {
                    self.eval(b)
                } else {
                    Ok(a)
                }
            }
            Expr::Or(a, b) => {
                let a = self.eval(a)?;
                if a.truthy()? {
                    Ok(a)
                } else {
                    self.eval(b)
                }
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp(elt, gens) => {
                let mut out = Vec::new();
                self.comprehension(gens, &mut |interp| {
                    out.push(interp.eval(elt)?);
                    Ok(())
                })?;
                Ok(Value::list(out))
            }
            Expr::SetComp(elt, gens) => {
                let mut out = Set::new();
                self.comprehension(gens, &mut |interp| out.add(interp.eval(elt)?))?;
                Ok(Value::set(out))
            }
            Expr::DictComp(key, value, gens) => {
                let mut out = Dict::new();
                self.comprehension(gens, &mut |interp| {
                    let k = interp.eval(key)?;
                    let v = interp.eval(value)?;
                    out.set_item(k, v)
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    fn eval_seq(&mut self, items: &[Expr]) -> ExecResult<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let v = self.eval(inner)?;
                    out.extend(self.iterate(&v)?);
                }
                e => out.push(self.eval(e)?),
            }
        }
        Ok(out)
    }

    fn eval_args(&mut self, args: &[Arg]) -> ExecResult<CallArgs> {
        let mut call = CallArgs::default();
        for a in args {
            match a {
                Arg::Positional(e) => call.positional.push(self.eval(e)?),
                Arg::Star(e) => {
                    let v = self.eval(e)?;
                    call.positional.extend(self.iterate(&v)?);
                }
                Arg::Keyword(name, e) => {
                    let v = self.eval(e)?;
                    call.keywords.push((name.clone(), v));
                }
                Arg::DoubleStar(e) => match self.eval(e)? {
                    Value::Dict(d) => {
                        for (k, v) in d.read().items() {
                            match k {
                                Value::Str(s) => call.keywords.push((s.to_string(), v)),
                                _ => return Err(Exception::type_error("keywords must be strings")),
                            }
                        }
                    }
                    other => {
                        return Err(Exception::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(call)
    }

    fn comprehension(
        &mut self,
        gens: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> ExecResult<()>,
    ) -> ExecResult<()> {
        self.frame.scopes.push(Namespace::new());
        let result = self.comprehension_level(gens, emit);
        self.frame.scopes.pop();
        result
    }

    fn comprehension_level(
        &mut self,
        gens: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> ExecResult<()>,
    ) -> ExecResult<()> {
        let Some((level, rest)) = gens.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&level.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.assign(&level.target, item)?;
            for cond in &level.ifs {
                if !self.eval(cond)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehension_level(rest, emit)?;
        }
        Ok(())
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> ExecResult<bool> {
    use std::cmp::Ordering::*;
    let ordered = |wanted: &[std::cmp::Ordering]| -> ExecResult<bool> {
        if let (Value::Set(_), Value::Set(_)) = (a, b) {
            return Ok(match wanted {
                [Less] => ops::set_compare(a, b, true).unwrap_or(false),
                [Less, Equal] => ops::set_compare(a, b, false).unwrap_or(false),
                [Greater] => ops::set_compare(b, a, true).unwrap_or(false),
                _ => ops::set_compare(b, a, false).unwrap_or(false),
            });
        }
        Ok(wanted.contains(&ops::compare(a, b)?))
    };
    match op {
        CmpOp::Eq => Ok(ops::equals(a, b)),
        CmpOp::NotEq => Ok(!ops::equals(a, b)),
        CmpOp::Lt => ordered(&[Less]),
        CmpOp::LtE => ordered(&[Less, Equal]),
        CmpOp::Gt => ordered(&[Greater]),
        CmpOp::GtE => ordered(&[Greater, Equal]),
        CmpOp::In => ops::contains(b, a),
        CmpOp::NotIn => ops::contains(b, a).map(|found| !found),
        CmpOp::Is => Ok(ops::identical(a, b)),
        CmpOp::IsNot => Ok(!ops::identical(a, b)),
    }
}

fn bind_params(f: &Function, args: CallArgs) -> ExecResult<Namespace> {
    let name = &f.def.name;
    let params = &f.def.params;
    let mut locals = Namespace::new();
    let normal: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.kind == ParamKind::Normal)
        .map(|(i, _)| i)
        .collect();
    let var_args = params.iter().find(|p| p.kind == ParamKind::VarArgs);
    let var_kwargs = params.iter().find(|p| p.kind == ParamKind::VarKwargs);

    let mut positional = args.positional.into_iter();
    let given = positional.len();
    for &i in &normal {
        match positional.next() {
            Some(v) => {
                locals.insert(params[i].name.clone(), v);
            }
            None => break,
        }
    }
    let extra: Vec<Value> = positional.collect();
    match var_args {
        Some(p) => {
            locals.insert(p.name.clone(), Value::tuple(extra));
        }
        None if !extra.is_empty() => {
            return Err(Exception::type_error(format!(
                "{}() takes {} positional argument{} but {} were given",
                name,
                normal.len(),
                if normal.len() == 1 { "" } else { "s" },
                given
            )))
        }
        None => {}
    }

    let mut overflow = Dict::new();
    for (k, v) in args.keywords {
        let is_param = normal.iter().any(|&i| params[i].name == k);
        if is_param {
            if locals.contains_key(&k) {
                return Err(Exception::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    name, k
                )));
            }
            locals.insert(k, v);
        } else if var_kwargs.is_some() {
            overflow.set_item(Value::str(&k), v)?;
        } else {
            return Err(Exception::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                name, k
            )));
        }
    }
    if let Some(p) = var_kwargs {
        locals.insert(p.name.clone(), Value::dict(overflow));
    }

    let mut missing = Vec::new();
    for &i in &normal {
        let p = &params[i];
        if locals.contains_key(&p.name) {
            continue;
        }
        match f.defaults.get(i).and_then(Option::as_ref) {
            Some(default) => {
                locals.insert(p.name.clone(), default.clone());
            }
            None => missing.push(format!("'{}'", p.name)),
        }
    }
    if !missing.is_empty() {
        return Err(Exception::type_error(format!(
            "{}() missing {} required positional argument{}: {}",
            name,
            missing.len(),
            if missing.len() == 1 { "" } else { "s" },
            missing.join(", ")
        )));
    }
    trace!(function = %name, "bound call arguments");
    Ok(locals)
}

impl ModuleLoader for Interpreter<'_> {
    fn load_source(&mut self, name: &str, source: &str, path: &Path) -> ExecResult<Arc<Module>> {
        if self.loading.iter().any(|n| n == name) {
            return Err(Exception::new(
                ExcKind::ImportError,
                format!(
                    "cannot import module '{}' (most likely due to a circular import)",
                    name
                ),
            ));
        }
        let program = crate::compile(source).map_err(|e| {
            Exception::new(
                ExcKind::SyntaxError,
                format!("{} in module '{}' ({})", e, name, path.display()),
            )
        })?;
        debug!(module = name, "executing script module");

        let module = Arc::new(Module::new(name, Namespace::new()));
        self.loading.push(name.to_string());
        let was_enabled = self.out.set_enabled(false);
        let result = self.exec_module(
            &program.body,
            module.namespace.clone(),
            Origin::Module(name.to_string()),
        );
        self.out.set_enabled(was_enabled);
        self.loading.pop();
        result?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureSink;
    use crate::hooks::DEFAULT_GUARDS;

    fn run_script(source: &str) -> (ExecResult<()>, SharedNamespace, Vec<String>) {
        run_with_depth(source, DEFAULT_MAX_DEPTH)
    }

    fn run_with_depth(source: &str, depth: usize) -> (ExecResult<()>, SharedNamespace, Vec<String>) {
        let program = crate::compile(source).unwrap();
        let imports = ImportResolver::new(vec!["math".into(), "table".into()], vec![]);
        let mut sink = CaptureSink::new();
        let globals: SharedNamespace = Arc::new(RwLock::new(Namespace::new()));
        let result = {
            let mut interp =
                Interpreter::new(&DEFAULT_GUARDS, &imports, &mut sink).with_max_depth(depth);
            interp.run(&program, &globals)
        };
        let lines = sink.take_lines();
        (result, globals, lines)
    }

    fn global(ns: &SharedNamespace, name: &str) -> Value {
        ns.read().get(name).cloned().unwrap_or(Value::None)
    }

    #[test]
    fn arithmetic_and_control_flow() {
        let (res, g, _) = run_script(
            "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    total += i\nelse:\n    done = True\n",
        );
        res.unwrap();
        assert!(matches!(global(&g, "total"), Value::Int(25)));
        assert!(matches!(global(&g, "done"), Value::Bool(true)));
    }

    #[test]
    fn functions_defaults_closures_and_recursion() {
        let src = "\
def make_adder(n):
    def add(x, y=1):
        return x + n + y
    return add

def fact(n):
    return 1 if n <= 1 else n * fact(n - 1)

a = make_adder(10)(5)
b = fact(10)
c = (lambda *xs, **kw: len(xs) + len(kw))(1, 2, k=3)
";
        let (res, g, _) = run_script(src);
        res.unwrap();
        assert!(matches!(global(&g, "a"), Value::Int(16)));
        assert!(matches!(global(&g, "b"), Value::Int(3628800)));
        assert!(matches!(global(&g, "c"), Value::Int(3)));
    }

    #[test]
    fn comprehensions_and_unpacking() {
        let src = "\
pairs = {k: v for k, v in [('a', 1), ('b', 2)] if v > 1}
first, *rest = [x * x for x in range(4)]
flat = [y for row in [[1, 2], [3]] for y in row]
";
        let (res, g, _) = run_script(src);
        res.unwrap();
        assert_eq!(global(&g, "pairs").repr(), "{'b': 2}");
        assert!(matches!(global(&g, "first"), Value::Int(0)));
        assert_eq!(global(&g, "rest").repr(), "[1, 4, 9]");
        assert_eq!(global(&g, "flat").repr(), "[1, 2, 3]");
        assert!(global(&g, "x").is_none());
    }

    #[test]
    fn errors_carry_the_main_script_line() {
        let (res, _, _) = run_script("a = 1\n\ndef f():\n    return 1 / 0\n\nb = f()\n");
        let err = res.unwrap_err();
        assert_eq!(err.kind, ExcKind::ZeroDivisionError);
        assert_eq!(err.line, Some(6));

        let (res, _, _) = run_script("for i in [1, 0]:\n    # divide\n\n    x = 1 / i\n");
        assert_eq!(res.unwrap_err().line, Some(4));

        let (res, _, _) = run_script("x = undefined_name\n");
        let err = res.unwrap_err();
        assert_eq!(err.kind, ExcKind::NameError);
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn recursion_is_bounded() {
        let (res, _, _) = run_with_depth("def f(n):\n    return f(n + 1)\nf(0)\n", 20);
        assert_eq!(res.unwrap_err().kind, ExcKind::RecursionError);
    }

    #[test]
    fn print_goes_to_the_sink() {
        let (res, _, lines) = run_script("print('a', 1, sep='-')\nprint()\nprint('x', end='!')\n");
        res.unwrap();
        assert_eq!(lines, vec!["a-1".to_string(), "x!".to_string()]);
    }

    #[test]
    fn imports_follow_the_allow_list() {
        let (res, g, _) = run_script("import math\nfrom math import sqrt\nr = sqrt(16.0)\n");
        res.unwrap();
        assert!(matches!(global(&g, "r"), Value::Float(f) if f == 4.0));

        let (res, _, _) = run_script("import os\n");
        let err = res.unwrap_err();
        assert_eq!(err.kind, ExcKind::ImportDenied);
        assert_eq!(err.line, Some(1));
    }

    #[test]
    fn list_augmented_add_mutates_in_place() {
        let (res, g, _) = run_script("a = [1]\nb = a\na += [2]\n");
        res.unwrap();
        assert_eq!(global(&g, "b").repr(), "[1, 2]");
    }

    #[test]
    fn assert_failure_reports_message() {
        let (res, _, _) = run_script("assert 1 == 2, 'mismatch'\n");
        let err = res.unwrap_err();
        assert_eq!(err.kind, ExcKind::AssertionError);
        assert_eq!(err.message, "mismatch");
    }
}
