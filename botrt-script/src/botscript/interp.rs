//! Tree-walking evaluator for botscript
//!
//! Every statement, loop iteration and function call spends one unit of
//! energy through [`ScriptEnv::consume_energy`]. Plain arrays and objects are
//! values; writes into them are committed back through a [`Place`] so that
//! `tags.list.push(4)` or `that.responses.length = 0` reach the variable or
//! host reference they were read from.

use super::ast::*;
use super::builtins;
use crate::error::ScriptError;
use crate::host::{Bindings, RunOutcome, ScriptEnv, ScriptFunction, ScriptKind};
use crate::value::{number_to_string, Value};
use parking_lot::Mutex;
use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

type Result<T> = std::result::Result<T, ScriptError>;

/// Evaluation depth (expressions, statements, calls and nested script runs)
/// allowed on one thread before a `RangeError` is thrown
pub const MAX_DEPTH: usize = 128;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Levels charged for a whole script run. Nested runs re-enter through the
/// host, whose frames are larger than the interpreter's.
const RUN_LEVELS: usize = 4;

/// Evaluation depth held until drop
struct DepthGuard(usize);

impl DepthGuard {
    fn enter() -> Result<DepthGuard> {
        Self::enter_by(1)
    }

    fn enter_by(levels: usize) -> Result<DepthGuard> {
        DEPTH.with(|depth| {
            if depth.get() + levels > MAX_DEPTH {
                return Err(ScriptError::range_error("Maximum call stack size exceeded"));
            }
            depth.set(depth.get() + levels);
            Ok(DepthGuard(levels))
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let levels = self.0;
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(levels)));
    }
}

struct Binding {
    value: Value,
    mutable: bool,
}

/// Lexical scope, shared by closures created inside it
pub(crate) struct Scope {
    vars: Mutex<HashMap<String, Binding>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub(crate) fn root() -> Arc<Scope> {
        Arc::new(Scope {
            vars: Mutex::new(HashMap::new()),
            parent: None,
        })
    }

    pub(crate) fn child(parent: &Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope {
            vars: Mutex::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub(crate) fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .lock()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.lock().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn has(&self, name: &str) -> bool {
        self.vars.lock().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.has(name))
    }

    /// Store into an existing binding. Returns false if `name` is unbound.
    /// Only a rebinding is refused for constants; updating the contents of a
    /// constant array or object is allowed.
    fn assign(&self, name: &str, value: Value, rebind: bool) -> Result<bool> {
        {
            let mut vars = self.vars.lock();
            if let Some(binding) = vars.get_mut(name) {
                if rebind && !binding.mutable {
                    return Err(ScriptError::type_error("Assignment to constant variable."));
                }
                binding.value = value;
                return Ok(true);
            }
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value, rebind),
            None => Ok(false),
        }
    }

    fn outermost(self: &Arc<Self>) -> Arc<Scope> {
        let mut scope = self.clone();
        while let Some(parent) = scope.parent.clone() {
            scope = parent;
        }
        scope
    }
}

/// A script-defined function together with its defining scope
#[derive(Clone)]
pub(crate) struct Closure {
    def: Arc<FunctionDef>,
    scope: Arc<Scope>,
}

impl ScriptFunction for Closure {
    fn call(&self, env: &mut dyn ScriptEnv, args: Vec<Value>) -> Result<Value> {
        env.consume_energy(1)?;
        let _depth = DepthGuard::enter()?;
        let scope = Scope::child(&self.scope);
        if let Some(name) = &self.def.name {
            scope.declare(name, Value::Function(Arc::new(self.clone())), true);
        }

        let mut interp = Interpreter::new(env);
        for (i, param) in self.def.params.iter().enumerate() {
            let value = if param.rest {
                Value::Array(args.iter().skip(i).cloned().collect())
            } else {
                match (args.get(i), &param.default) {
                    (Some(v), _) if !matches!(v, Value::Undefined) => v.clone(),
                    (_, Some(default)) => interp.eval(default, &scope)?,
                    _ => Value::Undefined,
                }
            };
            scope.declare(&param.name, value, true);
        }

        match &self.def.body {
            FunctionBody::Block(stmts) => match interp.exec_block(stmts, &scope)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
            FunctionBody::Expr(expr) => interp.eval(expr, &scope),
        }
    }

    fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("anonymous")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

enum PlaceRoot {
    Var { scope: Arc<Scope>, name: String },
    Temp(Value),
}

/// An assignable location: a variable or temporary plus a property path
pub(crate) struct Place {
    root: PlaceRoot,
    path: Vec<String>,
}

pub(crate) struct Interpreter<'e> {
    env: &'e mut dyn ScriptEnv,
    completion: Value,
}

/// Run a parsed program with the given bindings
pub(crate) fn run_program(
    env: &mut dyn ScriptEnv,
    program: &[Stmt],
    kind: ScriptKind,
    bindings: Bindings,
) -> Result<RunOutcome> {
    let _depth = DepthGuard::enter_by(RUN_LEVELS)?;
    let scope = Scope::root();
    for (name, value) in bindings.entries() {
        scope.declare(name, value, true);
    }

    let mut interp = Interpreter::new(env);
    let flow = interp.exec_block(program, &scope)?;
    let value = match flow {
        Flow::Return(value) => value,
        _ if kind == ScriptKind::Formula => std::mem::take(&mut interp.completion),
        _ => Value::Undefined,
    };
    let that = scope.lookup("that").unwrap_or_default();
    Ok(RunOutcome { value, that })
}

impl<'e> Interpreter<'e> {
    pub(crate) fn new(env: &'e mut dyn ScriptEnv) -> Self {
        Self {
            env,
            completion: Value::Undefined,
        }
    }

    // ----- statements -----

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Arc<Scope>) -> Result<Flow> {
        for stmt in stmts {
            if let StmtKind::FunctionDecl(def) = &stmt.kind {
                let closure = Closure {
                    def: def.clone(),
                    scope: scope.clone(),
                };
                let name = def.name.clone().unwrap_or_default();
                scope.declare(&name, Value::Function(Arc::new(closure)), true);
            }
        }
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Arc<Scope>) -> Result<Flow> {
        self.env.consume_energy(1)?;
        let _depth = DepthGuard::enter().map_err(|e| e.at(stmt.line, stmt.column))?;
        self.exec_kind(&stmt.kind, scope)
            .map_err(|e| e.at(stmt.line, stmt.column))
    }

    fn exec_kind(&mut self, kind: &StmtKind, scope: &Arc<Scope>) -> Result<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.completion = self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            StmtKind::Decl { kind, decls } => {
                for (name, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    scope.declare(name, value, *kind != DeclKind::Const);
                }
                Ok(Flow::Normal)
            }
            StmtKind::FunctionDecl(_) | StmtKind::Empty => Ok(Flow::Normal),
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.exec_stmt(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::Block(stmts) => {
                let inner = Scope::child(scope);
                self.exec_block(stmts, &inner)
            }
            StmtKind::While { test, body } => {
                loop {
                    self.env.consume_energy(1)?;
                    if !self.eval(test, scope)?.is_truthy() {
                        break;
                    }
                    match self.exec_stmt(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::DoWhile { body, test } => {
                loop {
                    self.env.consume_energy(1)?;
                    match self.exec_stmt(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if !self.eval(test, scope)?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_scope = Scope::child(scope);
                if let Some(init) = init {
                    self.exec_stmt(init, &loop_scope)?;
                }
                loop {
                    self.env.consume_energy(1)?;
                    if let Some(test) = test {
                        if !self.eval(test, &loop_scope)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec_stmt(body, &loop_scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::ForOf {
                kind,
                name,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, scope)? {
                    Value::Array(items) => items,
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => {
                        return Err(ScriptError::type_error(format!("{} is not iterable", other)))
                    }
                };
                self.iterate(items, *kind, name, body, scope)
            }
            StmtKind::ForIn {
                kind,
                name,
                object,
                body,
            } => {
                let target = self.eval(object, scope)?;
                let keys = self.keys_of(&target)?;
                self.iterate(
                    keys.into_iter().map(Value::String).collect(),
                    *kind,
                    name,
                    body,
                    scope,
                )
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Throw(expr) => Err(ScriptError::thrown(self.eval(expr, scope)?)),
            StmtKind::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                let inner = Scope::child(scope);
                let mut result = self.exec_block(block, &inner);
                if let Err(ScriptError::OutOfEnergy) = result {
                    return result;
                }
                let caught = match (&result, handler) {
                    (Err(ScriptError::Thrown { value, .. }), Some(handler)) => {
                        Some((value.clone(), handler))
                    }
                    _ => None,
                };
                if let Some((value, handler)) = caught {
                    let catch_scope = Scope::child(scope);
                    if let Some(param) = param {
                        catch_scope.declare(param, value, true);
                    }
                    result = self.exec_block(handler, &catch_scope);
                    if let Err(ScriptError::OutOfEnergy) = result {
                        return result;
                    }
                }
                if let Some(finalizer) = finalizer {
                    let fin_scope = Scope::child(scope);
                    match self.exec_block(finalizer, &fin_scope)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                }
                result
            }
        }
    }

    fn iterate(
        &mut self,
        items: Vec<Value>,
        kind: DeclKind,
        name: &str,
        body: &Stmt,
        scope: &Arc<Scope>,
    ) -> Result<Flow> {
        for item in items {
            self.env.consume_energy(1)?;
            let iteration = Scope::child(scope);
            iteration.declare(name, item, kind != DeclKind::Const);
            match self.exec_stmt(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Continue | Flow::Normal => {}
            }
        }
        Ok(Flow::Normal)
    }

    // ----- expressions -----

    fn resolve_name<'n>(&self, name: &'n str, scope: &Arc<Scope>) -> &'n str {
        if name == "data" && !scope.has("data") {
            "that"
        } else {
            name
        }
    }

    fn is_bound(&self, name: &str, scope: &Arc<Scope>) -> bool {
        scope.has(self.resolve_name(name, scope))
    }

    pub(crate) fn eval(&mut self, expr: &Expr, scope: &Arc<Scope>) -> Result<Value> {
        let _depth = DepthGuard::enter()?;
        self.eval_expr(expr, scope)
    }

    fn eval_expr(&mut self, expr: &Expr, scope: &Arc<Scope>) -> Result<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::This => Ok(scope.lookup("this").unwrap_or_default()),
            Expr::Ident(name) => self.lookup(name, scope),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => {
                            let value = self.eval(expr, scope)?;
                            out.push_str(&value.to_string());
                        }
                    }
                    builtins::check_string_length(out.len())?;
                }
                Ok(Value::String(out))
            }
            Expr::Array(elements) => Ok(Value::Array(self.eval_elements(elements, scope)?)),
            Expr::Object(properties) => self.eval_object(properties, scope),
            Expr::Function(def) => Ok(Value::Function(Arc::new(Closure {
                def: def.clone(),
                scope: scope.clone(),
            }))),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, scope),
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let place = self.resolve_place(target, scope)?;
                let old = self.read_place(&place)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(&place, Value::Number(new))?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, left, right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional(test, then, otherwise) => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let place = self.resolve_place(target, scope)?;
                let new = match op {
                    AssignOp::Assign => self.eval(value, scope)?,
                    AssignOp::Compound(bin) => {
                        let current = self.read_place(&place)?;
                        let rhs = self.eval(value, scope)?;
                        self.binary(*bin, current, rhs)?
                    }
                    AssignOp::Nullish => {
                        let current = self.read_place(&place)?;
                        if !current.is_nullish() {
                            return Ok(current);
                        }
                        self.eval(value, scope)?
                    }
                };
                self.write_place(&place, new.clone())?;
                Ok(new)
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let key = self.property_key(property, scope)?;
                if let Expr::Ident(root) = object.as_ref() {
                    if !self.is_bound(root, scope) && builtins::is_global_object(root) {
                        return Ok(builtins::global_property(root, &key));
                    }
                }
                let target = self.eval(object, scope)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&target, &key)
            }
            Expr::Call { callee, args } | Expr::New { callee, args } => {
                self.eval_call(callee, args, scope)
            }
        }
    }

    fn lookup(&mut self, name: &str, scope: &Arc<Scope>) -> Result<Value> {
        if let Some(value) = scope.lookup(self.resolve_name(name, scope)) {
            return Ok(value);
        }
        builtins::global_value(name)
            .ok_or_else(|| ScriptError::reference_error(format!("{} is not defined", name)))
    }

    fn eval_elements(&mut self, elements: &[Element], scope: &Arc<Scope>) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            let value = self.eval(&element.expr, scope)?;
            if !element.spread {
                values.push(value);
                continue;
            }
            match value {
                Value::Array(items) => values.extend(items),
                Value::String(s) => values.extend(s.chars().map(|c| Value::String(c.to_string()))),
                other => {
                    return Err(ScriptError::type_error(format!("{} is not iterable", other)))
                }
            }
        }
        Ok(values)
    }

    fn eval_object(&mut self, properties: &[Property], scope: &Arc<Scope>) -> Result<Value> {
        let mut map = std::collections::BTreeMap::new();
        for property in properties {
            match property {
                Property::KeyValue(key, expr) => {
                    let key = match key {
                        PropertyKey::Named(name) => name.clone(),
                        PropertyKey::Computed(expr) => self.property_key(expr, scope)?,
                    };
                    let value = self.eval(expr, scope)?;
                    map.insert(key, value);
                }
                Property::Spread(expr) => {
                    let source = self.eval(expr, scope)?;
                    for key in self.keys_of(&source)? {
                        let value = self.get_property(&source, &key)?;
                        map.insert(key, value);
                    }
                }
            }
        }
        Ok(Value::Object(map))
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, scope: &Arc<Scope>) -> Result<Value> {
        match op {
            UnaryOp::Typeof => {
                if let Expr::Ident(name) = operand {
                    if !self.is_bound(name, scope) && builtins::global_value(name).is_none() {
                        return Ok(Value::from("undefined"));
                    }
                }
                Ok(Value::from(self.eval(operand, scope)?.type_of()))
            }
            UnaryOp::Delete => self.delete(operand, scope),
            UnaryOp::Not => Ok(Value::Bool(!self.eval(operand, scope)?.is_truthy())),
            UnaryOp::Neg => Ok(Value::Number(-self.eval(operand, scope)?.to_number())),
            UnaryOp::Plus => Ok(Value::Number(self.eval(operand, scope)?.to_number())),
        }
    }

    pub(crate) fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Result<Value> {
        let value = match op {
            BinaryOp::Add => {
                let numeric = |v: &Value| {
                    matches!(
                        v,
                        Value::Number(_) | Value::Bool(_) | Value::Null | Value::Undefined
                    )
                };
                if numeric(&left) && numeric(&right) {
                    Value::Number(left.to_number() + right.to_number())
                } else {
                    let (left, right) = (left.to_string(), right.to_string());
                    builtins::check_string_length(left.len() + right.len())?;
                    Value::String(left + &right)
                }
            }
            BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
            BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Pow => Value::Number(left.to_number().powf(right.to_number())),
            BinaryOp::Eq => Value::Bool(left.loose_equals(&right)),
            BinaryOp::Ne => Value::Bool(!left.loose_equals(&right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(&right)),
            BinaryOp::StrictNe => Value::Bool(!left.strict_equals(&right)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = match (&left, &right) {
                    (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                Value::Bool(match ordering {
                    None => false,
                    Some(ord) => match op {
                        BinaryOp::Lt => ord.is_lt(),
                        BinaryOp::Le => ord.is_le(),
                        BinaryOp::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    },
                })
            }
            BinaryOp::In => {
                let key = left.to_string();
                Value::Bool(self.keys_of(&right)?.contains(&key))
            }
        };
        Ok(value)
    }

    fn property_key(&mut self, property: &Expr, scope: &Arc<Scope>) -> Result<String> {
        Ok(match self.eval(property, scope)? {
            Value::Number(n) => number_to_string(n),
            other => other.to_string(),
        })
    }

    /// Enumerable keys of any value
    pub(crate) fn keys_of(&mut self, target: &Value) -> Result<Vec<String>> {
        Ok(match target {
            Value::Object(map) => map.keys().cloned().collect(),
            Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
            Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
            Value::Bot(_) | Value::View { .. } => self.env.keys(target)?,
            _ => Vec::new(),
        })
    }

    pub(crate) fn get_property(&mut self, target: &Value, key: &str) -> Result<Value> {
        match target {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                target, key
            ))),
            Value::String(s) => Ok(match key {
                "length" => Value::from(s.chars().count()),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or_default(),
            }),
            Value::Array(items) => Ok(match key {
                "length" => Value::from(items.len()),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            }),
            Value::Object(map) => Ok(map.get(key).cloned().unwrap_or_default()),
            Value::Error(err) => Ok(match key {
                "name" => Value::from(err.name.as_str()),
                "message" => Value::from(err.message.as_str()),
                _ => Value::Undefined,
            }),
            Value::Function(func) => Ok(match key {
                "name" => Value::from(func.name()),
                _ => Value::Undefined,
            }),
            Value::Bot(_) | Value::View { .. } | Value::Listener { .. } | Value::Promise(_) => {
                self.env.get_member(target, key)
            }
            Value::Bool(_) | Value::Number(_) => Ok(Value::Undefined),
        }
    }

    /// Set `key` on `container`, returning the updated container when it is
    /// plain data that must be written back to its own place
    fn set_property(&mut self, container: Value, key: &str, value: Value) -> Result<Option<Value>> {
        match container {
            Value::Array(mut items) => {
                if key == "length" {
                    let len = value.to_number();
                    if len >= 0.0 && len.is_finite() {
                        builtins::check_array_length(len as usize)?;
                        items.resize(len as usize, Value::Undefined);
                    }
                } else if let Ok(index) = key.parse::<usize>() {
                    if index >= items.len() {
                        builtins::check_array_length(index.saturating_add(1))?;
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(Some(Value::Array(items)))
            }
            Value::Object(mut map) => {
                map.insert(key.to_string(), value);
                Ok(Some(Value::Object(map)))
            }
            Value::Bot(_) | Value::View { .. } | Value::Listener { .. } | Value::Promise(_) => {
                self.env.set_member(&container, key, value)?;
                Ok(None)
            }
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                container, key
            ))),
            _ => Ok(None),
        }
    }

    // ----- places -----

    fn resolve_place(&mut self, expr: &Expr, scope: &Arc<Scope>) -> Result<Place> {
        match expr {
            Expr::Ident(name) => Ok(Place {
                root: PlaceRoot::Var {
                    scope: scope.clone(),
                    name: self.resolve_name(name, scope).to_string(),
                },
                path: Vec::new(),
            }),
            Expr::Member {
                object,
                property,
                optional: false,
            } if !matches!(object.as_ref(), Expr::Ident(root) if !self.is_bound(root, scope) && builtins::is_global_object(root)) =>
            {
                let mut place = self.resolve_place(object, scope)?;
                let key = self.property_key(property, scope)?;
                place.path.push(key);
                Ok(place)
            }
            other => Ok(Place {
                root: PlaceRoot::Temp(self.eval(other, scope)?),
                path: Vec::new(),
            }),
        }
    }

    fn read_root(&mut self, root: &PlaceRoot) -> Result<Value> {
        match root {
            PlaceRoot::Var { scope, name } => scope
                .lookup(name)
                .or_else(|| builtins::global_value(name))
                .ok_or_else(|| ScriptError::reference_error(format!("{} is not defined", name))),
            PlaceRoot::Temp(value) => Ok(value.clone()),
        }
    }

    fn read_path(&mut self, root: &PlaceRoot, path: &[String]) -> Result<Value> {
        let mut value = self.read_root(root)?;
        for key in path {
            value = self.get_property(&value, key)?;
        }
        Ok(value)
    }

    fn read_place(&mut self, place: &Place) -> Result<Value> {
        self.read_path(&place.root, &place.path)
    }

    fn write_root(&mut self, root: &PlaceRoot, value: Value, rebind: bool) -> Result<()> {
        match root {
            PlaceRoot::Var { scope, name } => {
                if !scope.assign(name, value.clone(), rebind)? {
                    scope.outermost().declare(name, value, true);
                }
                Ok(())
            }
            PlaceRoot::Temp(_) => Ok(()),
        }
    }

    /// Assignment: a bare variable is rebound
    fn write_place(&mut self, place: &Place, value: Value) -> Result<()> {
        self.store_place(place, value, true)
    }

    /// Write back the modified contents of the value at `place`
    fn update_place(&mut self, place: &Place, value: Value) -> Result<()> {
        self.store_place(place, value, false)
    }

    fn store_place(&mut self, place: &Place, value: Value, rebind: bool) -> Result<()> {
        if place.path.is_empty() {
            return self.write_root(&place.root, value, rebind);
        }
        let root = self.read_root(&place.root)?;
        if let Some(updated) = self.write_path(root, &place.path, value)? {
            self.write_root(&place.root, updated, false)?;
        }
        Ok(())
    }

    fn write_path(&mut self, container: Value, path: &[String], value: Value) -> Result<Option<Value>> {
        let Some((key, rest)) = path.split_first() else {
            return Ok(Some(value));
        };
        if rest.is_empty() {
            return self.set_property(container, key, value);
        }
        let child = self.get_property(&container, key)?;
        match self.write_path(child, rest, value)? {
            None => Ok(None),
            Some(updated_child) => self.set_property(container, key, updated_child),
        }
    }

    fn delete(&mut self, operand: &Expr, scope: &Arc<Scope>) -> Result<Value> {
        let place = self.resolve_place(operand, scope)?;
        let Some((key, parent_path)) = place.path.split_last() else {
            return Ok(Value::Bool(false));
        };
        let parent = self.read_path(&place.root, parent_path)?;
        let updated = match parent {
            Value::Object(mut map) => {
                map.remove(key);
                Value::Object(map)
            }
            Value::Array(mut items) => {
                if let Some(slot) = key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                    *slot = Value::Undefined;
                }
                Value::Array(items)
            }
            Value::Bot(_) | Value::View { .. } => {
                return Ok(Value::Bool(self.env.delete_member(&parent, key)?));
            }
            _ => return Ok(Value::Bool(true)),
        };
        let parent_place = Place {
            root: match &place.root {
                PlaceRoot::Var { scope, name } => PlaceRoot::Var {
                    scope: scope.clone(),
                    name: name.clone(),
                },
                PlaceRoot::Temp(v) => PlaceRoot::Temp(v.clone()),
            },
            path: parent_path.to_vec(),
        };
        self.update_place(&parent_place, updated)?;
        Ok(Value::Bool(true))
    }

    // ----- calls -----

    fn eval_call(&mut self, callee: &Expr, args: &[Element], scope: &Arc<Scope>) -> Result<Value> {
        match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let key = self.property_key(property, scope)?;
                if let Expr::Ident(root) = object.as_ref() {
                    if !self.is_bound(root, scope) {
                        let args = self.eval_elements(args, scope)?;
                        return self.call_qualified(root, &key, args);
                    }
                }
                let place = self.resolve_place(object, scope)?;
                let receiver = self.read_place(&place)?;
                if *optional && receiver.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let args = self.eval_elements(args, scope)?;
                self.call_method(receiver, &key, args, &place)
            }
            Expr::Ident(name) if !self.is_bound(name, scope) => {
                let args = self.eval_elements(args, scope)?;
                if builtins::is_global_function(name) {
                    return builtins::call_global_function(name, args);
                }
                match self.env.call_library(name, args)? {
                    Some(value) => Ok(value),
                    None => Err(ScriptError::reference_error(format!("{} is not defined", name))),
                }
            }
            _ => {
                let function = self.eval(callee, scope)?;
                let args = self.eval_elements(args, scope)?;
                self.call_value(&function, args)
            }
        }
    }

    /// `root.key(...)` where `root` is not a variable: built-in statics such
    /// as `Math.max`, then library namespaces such as `os.toast`
    fn call_qualified(&mut self, root: &str, key: &str, args: Vec<Value>) -> Result<Value> {
        if builtins::is_global_object(root) {
            return builtins::call_static(self, root, key, args);
        }
        match self.env.call_library(&format!("{}.{}", root, key), args)? {
            Some(value) => Ok(value),
            None => Err(ScriptError::reference_error(format!("{} is not defined", root))),
        }
    }

    fn call_method(&mut self, receiver: Value, key: &str, args: Vec<Value>, place: &Place) -> Result<Value> {
        match receiver {
            Value::Array(mut items) => {
                if builtins::is_mutating_array_method(key) {
                    let result = builtins::call_mutating_array_method(self, &mut items, key, args)?;
                    self.update_place(place, Value::Array(items))?;
                    Ok(result)
                } else {
                    builtins::call_array_method(self, items, key, args)
                }
            }
            Value::String(s) => builtins::call_string_method(self, &s, key, args),
            Value::Number(n) => builtins::call_number_method(n, key, args),
            Value::Object(map) => match map.get(key) {
                Some(function) => self.call_value(function, args),
                None => builtins::call_object_method(&map, key, args),
            },
            Value::Bot(_) | Value::View { .. } | Value::Listener { .. } | Value::Promise(_) => {
                if let Some(value) = self.env.call_method(&receiver, key, args.clone())? {
                    return Ok(value);
                }
                let function = self.env.get_member(&receiver, key)?;
                self.call_value(&function, args)
            }
            Value::Error(err) if key == "toString" => Ok(Value::String(err.to_string())),
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                receiver, key
            ))),
            _ => Err(ScriptError::type_error(format!("{} is not a function", key))),
        }
    }

    pub(crate) fn call_value(&mut self, function: &Value, args: Vec<Value>) -> Result<Value> {
        match function {
            Value::Function(func) => {
                let func = func.clone();
                func.call(&mut *self.env, args)
            }
            Value::Listener { .. } => self.env.call_value(function, args),
            other => Err(ScriptError::type_error(format!("{} is not a function", other))),
        }
    }
}
