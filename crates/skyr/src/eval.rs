//! The tree-walking evaluator.
//!
//! Statements produce a flow token; a statement sequence stops at the first
//! non-PASS token. `break`/`continue` propagate to the nearest `for`,
//! `return` to the nearest function frame. Errors acquire their primary
//! location at the innermost expression and one call-site frame per `call`
//! boundary on the way out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::args::CallArgs;
use crate::errors::{CodeLoc, ErrorKind, EvalError, EvalResult};
use crate::expressions::{
    AssignTarget, BinOp, Binding, CallArg, CallExpr, CmpOp, CompClause, CompKind, Comprehension,
    DefStmt, Expr, ExprLoc, Identifier, Stmt, StmtKind,
};
use crate::function::Function;
use crate::io::PrintWriter;
use crate::methods::{CallCtx, MethodDescriptor, get_attr, self_call_for};
use crate::module::{Module, Universe};
use crate::ops;
use crate::parse::{FileInfo, Span};
use crate::resolve::ResolvedFile;
use crate::scope::Scope;
use crate::semantics::Semantics;
use crate::signature::Signature;
use crate::tracer::Tracer;
use crate::value::Value;

/// Cooperative cancellation flag, checked between statements.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
}

impl CancelFlag {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// One entry of the dynamic call stack.
pub(crate) struct FrameInfo {
    pub function: Arc<Function>,
    pub call_loc: CodeLoc,
}

/// Per-evaluation thread state: semantics, print destination, tracer,
/// cancellation, and the dynamic call stack.
///
/// One extension evaluation runs single-threaded on one `Thread`; the
/// interpreter is not re-entrant from other threads.
pub struct Thread<'a> {
    pub semantics: Arc<Semantics>,
    pub print: &'a mut dyn PrintWriter,
    pub tracer: &'a mut dyn Tracer,
    pub cancel: Option<Arc<CancelFlag>>,
    pub(crate) frames: Vec<FrameInfo>,
}

impl<'a> Thread<'a> {
    pub fn new(
        semantics: Arc<Semantics>,
        print: &'a mut dyn PrintWriter,
        tracer: &'a mut dyn Tracer,
    ) -> Self {
        Self {
            semantics,
            print,
            tracer,
            cancel: None,
            frames: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancelFlag>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check_cancelled(&self) -> EvalResult<()> {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(ErrorKind::Interrupted.err("evaluation interrupted"));
        }
        Ok(())
    }
}

/// Statement flow token.
pub(crate) enum Flow {
    Pass,
    Break,
    Continue,
    Return(Value),
}

/// Observer invoked after every successful top-level assignment.
pub type PostAssignHook<'h> = dyn FnMut(&str, &Value) -> EvalResult<()> + 'h;

/// Evaluates a resolved file into a fresh module and freezes it.
///
/// The spec-level `evaluate` entry point: `predeclared_globals` are installed
/// as (non-exported) bindings below the globals, the universe becomes the
/// module's predeclared namespace, and the optional post-assign hook observes
/// top-level assignments. Files with parse or resolve errors are not
/// executed; their errors are returned as-is.
pub fn evaluate(
    resolved: &ResolvedFile,
    universe: Arc<Universe>,
    predeclared_globals: Vec<(Arc<str>, Value)>,
    semantics: Arc<Semantics>,
    print: &mut dyn PrintWriter,
    tracer: &mut dyn Tracer,
    post_assign: Option<&mut PostAssignHook<'_>>,
) -> (Arc<Module>, Vec<EvalError>) {
    let module = Arc::new(Module::new(
        Arc::clone(&resolved.file.name),
        universe,
        Scope::new(),
    ));
    if resolved.has_errors() {
        return (module, resolved.errors.clone());
    }
    for (name, value) in predeclared_globals {
        module.install_loaded(name, value);
    }
    let mut thread = Thread::new(semantics, print, tracer);
    let errors = eval_module(resolved, &module, &mut thread, post_assign);
    module.freeze();
    (module, errors)
}

/// Runs every top-level statement of `resolved` against `module`.
///
/// Top-level statement failures are recorded and execution continues with the
/// next statement, so one bad statement never hides subsequent work. The
/// post-assign hook runs after each successful assignment; its failures are
/// likewise recorded without stopping execution.
pub fn eval_module(
    resolved: &ResolvedFile,
    module: &Arc<Module>,
    thread: &mut Thread<'_>,
    mut post_assign: Option<&mut PostAssignHook<'_>>,
) -> Vec<EvalError> {
    let mut errors = Vec::new();
    let mut evaluator = Evaluator {
        module: Arc::clone(module),
        file: Arc::clone(&resolved.file),
        scope: module.scope().clone(),
        thread,
        locals: Vec::new(),
    };
    for stmt in resolved.statements.iter() {
        match evaluator.exec_stmt(stmt) {
            Ok(_) => {
                if let StmtKind::Assign { target, .. } = &stmt.kind
                    && let Some(hook) = post_assign.as_deref_mut()
                {
                    let mut names = Vec::new();
                    bound_names_in_order(target, &mut names);
                    for name in names {
                        let Some(value) = module.get_global(&name) else {
                            continue;
                        };
                        if let Err(err) = hook(&name, &value) {
                            errors.push(err.with_loc(resolved.file.span_loc(stmt.span)));
                        }
                    }
                }
            }
            Err(err) => {
                let interrupted = err.kind == ErrorKind::Interrupted;
                errors.push(err);
                if interrupted {
                    break;
                }
            }
        }
    }
    errors
}

fn bound_names_in_order(target: &AssignTarget, out: &mut Vec<Arc<str>>) {
    match target {
        AssignTarget::Name(identifier) => out.push(Arc::clone(&identifier.name)),
        AssignTarget::Index { .. } => {}
        AssignTarget::Sequence { targets, .. } => {
            for t in targets {
                bound_names_in_order(t, out);
            }
        }
    }
}

/// One evaluation frame: module-level statements or one function call.
pub(crate) struct Evaluator<'a, 'p> {
    pub module: Arc<Module>,
    pub file: Arc<FileInfo>,
    pub scope: Scope,
    pub thread: &'a mut Thread<'p>,
    /// Function-local slots; empty at module level.
    pub locals: Vec<Option<Value>>,
}

impl Evaluator<'_, '_> {
    fn loc(&self, span: Span) -> CodeLoc {
        self.file.span_loc(span)
    }

    pub(crate) fn exec_stmts(&mut self, stmts: &[Stmt]) -> EvalResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Pass => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Pass)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.thread.check_cancelled()?;
        let stmt_loc = self.loc(stmt.span);
        self.thread.tracer.on_statement(&stmt_loc);

        match &stmt.kind {
            // Dependency bindings are installed by the extension node before
            // evaluation starts; the statement itself is inert.
            StmtKind::Load(_) => Ok(Flow::Pass),
            StmtKind::Assign { target, value } => {
                let value = self.eval_expr(value)?;
                self.assign(target, value)?;
                Ok(Flow::Pass)
            }
            StmtKind::AugAssign { target, op, value } => {
                self.exec_aug_assign(target, *op, value)?;
                Ok(Flow::Pass)
            }
            StmtKind::Def(def) => {
                let function = self.make_function(def)?;
                self.assign(
                    &AssignTarget::Name(def.name.clone()),
                    Value::Function(Arc::new(function)),
                )?;
                Ok(Flow::Pass)
            }
            StmtKind::If {
                test,
                body,
                or_else,
            } => {
                if self.eval_expr(test)?.truth() {
                    self.exec_stmts(body)
                } else {
                    self.exec_stmts(or_else)
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval_expr(iter)?;
                let items = iterable
                    .iterate()
                    .map_err(|e| e.with_loc(self.loc(iter.span)))?;
                for item in items {
                    self.assign(target, item)?;
                    match self.exec_stmts(body)? {
                        Flow::Pass | Flow::Continue => {}
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
                Ok(Flow::Pass)
            }
            StmtKind::Return { value } => {
                let value = match value {
                    Some(value) => self.eval_expr(value)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Pass => Ok(Flow::Pass),
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Pass)
            }
        }
    }

    fn exec_aug_assign(
        &mut self,
        target: &AssignTarget,
        op: BinOp,
        value: &ExprLoc,
    ) -> EvalResult<()> {
        let rhs = self.eval_expr(value)?;
        match target {
            AssignTarget::Name(identifier) => {
                let old = self.lookup(identifier)?;
                if let Some(()) = self.try_inplace(op, &old, &rhs, value.span)? {
                    return Ok(());
                }
                let new = ops::binary(op, &old, &rhs, &self.scope, &self.thread.semantics)
                    .map_err(|e| e.with_loc(self.loc(identifier.span)))?;
                self.assign(&AssignTarget::Name(identifier.clone()), new)
            }
            AssignTarget::Index {
                object,
                index,
                span,
            } => {
                let container = self.eval_expr(object)?;
                let key = self.eval_expr(index)?;
                let old = container
                    .index(&key)
                    .map_err(|e| e.with_loc(self.loc(*span)))?;
                if let Some(()) = self.try_inplace(op, &old, &rhs, value.span)? {
                    return Ok(());
                }
                let new = ops::binary(op, &old, &rhs, &self.scope, &self.thread.semantics)
                    .map_err(|e| e.with_loc(self.loc(*span)))?;
                self.set_index(&container, key, new, *span)
            }
            AssignTarget::Sequence { span, .. } => Err(ErrorKind::Resolve
                .err("augmented assignment target cannot be a list or tuple")
                .with_loc(self.loc(*span))),
        }
    }

    /// `x += y` on a list mutates in place rather than rebinding.
    fn try_inplace(
        &mut self,
        op: BinOp,
        old: &Value,
        rhs: &Value,
        rhs_span: Span,
    ) -> EvalResult<Option<()>> {
        if op != BinOp::Add {
            return Ok(None);
        }
        let Value::List(list) = old else {
            return Ok(None);
        };
        let items: Vec<Value> = rhs
            .iterate()
            .map_err(|e| e.with_loc(self.loc(rhs_span)))?
            .collect();
        list.extend(&self.scope, items)
            .map_err(|e| e.with_loc(self.loc(rhs_span)))?;
        Ok(Some(()))
    }

    fn make_function(&mut self, def: &DefStmt) -> EvalResult<Function> {
        let signature = Signature::from_params(&def.params);
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval_expr(default)?);
            }
        }
        Ok(Function {
            name: Arc::clone(&def.name.name),
            signature,
            defaults,
            body: def.body.clone().into(),
            module: Arc::clone(&self.module),
            file: Arc::clone(&self.file),
            local_count: def.local_count as usize,
            def_span: def.name.span,
        })
    }

    fn assign(&mut self, target: &AssignTarget, value: Value) -> EvalResult<()> {
        match target {
            AssignTarget::Name(identifier) => self.assign_name(identifier, value),
            AssignTarget::Index {
                object,
                index,
                span,
            } => {
                let container = self.eval_expr(object)?;
                let key = self.eval_expr(index)?;
                self.set_index(&container, key, value, *span)
            }
            AssignTarget::Sequence { targets, span } => {
                if targets.is_empty() {
                    return Err(ErrorKind::Value
                        .err("cannot assign to an empty target list")
                        .with_loc(self.loc(*span)));
                }
                let items: Vec<Value> = match &value {
                    Value::Tuple(items) => items.to_vec(),
                    Value::List(list) => list.snapshot(),
                    other => {
                        return Err(EvalError::type_error(format!(
                            "cannot unpack value of type '{}'",
                            other.type_name()
                        ))
                        .with_loc(self.loc(*span)));
                    }
                };
                if items.len() != targets.len() {
                    return Err(ErrorKind::Value
                        .err(format!(
                            "cannot unpack {} value{} into {} target{}",
                            items.len(),
                            if items.len() == 1 { "" } else { "s" },
                            targets.len(),
                            if targets.len() == 1 { "" } else { "s" },
                        ))
                        .with_loc(self.loc(*span)));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
        }
    }

    fn assign_name(&mut self, identifier: &Identifier, value: Value) -> EvalResult<()> {
        match identifier.binding {
            Binding::Local(slot) => {
                self.locals[slot as usize] = Some(value);
                Ok(())
            }
            Binding::Module => self
                .module
                .set(Arc::clone(&identifier.name), value)
                .map_err(|e| e.with_loc(self.loc(identifier.span))),
            Binding::Universe | Binding::Unresolved => Err(ErrorKind::Resolve
                .err(format!("cannot assign to '{}'", identifier.name))
                .with_loc(self.loc(identifier.span))),
        }
    }

    fn set_index(
        &mut self,
        container: &Value,
        key: Value,
        value: Value,
        span: Span,
    ) -> EvalResult<()> {
        let result = match container {
            Value::List(list) => match key {
                Value::Int(index) => list.set_index(&self.scope, index, value),
                other => Err(EvalError::type_error(format!(
                    "list index must be an int, got '{}'",
                    other.type_name()
                ))),
            },
            Value::Dict(dict) => dict.insert(&self.scope, key, value),
            other => Err(EvalError::type_error(format!(
                "type '{}' does not support item assignment",
                other.type_name()
            ))),
        };
        result.map_err(|e| e.with_loc(self.loc(span)))
    }

    fn lookup(&mut self, identifier: &Identifier) -> EvalResult<Value> {
        let value = match identifier.binding {
            Binding::Local(slot) => self.locals[slot as usize].clone().ok_or_else(|| {
                ErrorKind::Name.err(format!(
                    "local variable '{}' referenced before assignment",
                    identifier.name
                ))
            }),
            Binding::Module => self.module.get(&identifier.name).ok_or_else(|| {
                let names = self.module.visible_names();
                EvalError::unknown_name(&identifier.name, names.iter().map(AsRef::as_ref))
            }),
            Binding::Universe => self
                .module
                .universe()
                .get(&identifier.name)
                .cloned()
                .ok_or_else(|| {
                    ErrorKind::Name.err(format!(
                        "predeclared name '{}' is missing from the universe",
                        identifier.name
                    ))
                }),
            Binding::Unresolved => {
                let names = self.module.visible_names();
                Err(EvalError::unknown_name(
                    &identifier.name,
                    names.iter().map(AsRef::as_ref),
                ))
            }
        };
        value.map_err(|e| e.with_loc(self.loc(identifier.span)))
    }

    pub(crate) fn eval_expr(&mut self, expr: &ExprLoc) -> EvalResult<Value> {
        let span = expr.span;
        match &expr.expr {
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Name(identifier) => self.lookup(identifier),
            Expr::ListExpr(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(Value::List(Arc::new(crate::types::List::new(
                    values,
                    self.scope.clone(),
                ))))
            }
            Expr::TupleExpr(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(Value::Tuple(values.into()))
            }
            Expr::DictExpr(entries) => {
                let mut pairs = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.eval_expr(key)?;
                    let value = self.eval_expr(value)?;
                    pairs.push((key, value));
                }
                let dict = crate::types::Dict::from_literal(pairs, self.scope.clone())
                    .map_err(|e| e.with_loc(self.loc(span)))?;
                Ok(Value::Dict(Arc::new(dict)))
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                ops::unary(*op, &value).map_err(|e| e.with_loc(self.loc(span)))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                ops::binary(*op, &left, &right, &self.scope, &self.thread.semantics)
                    .map_err(|e| e.with_loc(self.loc(span)))
            }
            Expr::BoolOp { and, left, right } => {
                let left = self.eval_expr(left)?;
                // Short-circuit: the untaken operand is never evaluated, and
                // the producing operand's value (not a bool) is the result.
                if *and == left.truth() {
                    self.eval_expr(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Compare { op, left, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                self.compare(*op, &left, &right)
                    .map_err(|e| e.with_loc(self.loc(span)))
            }
            Expr::Cond {
                test,
                body,
                or_else,
            } => {
                if self.eval_expr(test)?.truth() {
                    self.eval_expr(body)
                } else {
                    self.eval_expr(or_else)
                }
            }
            Expr::Dot {
                object,
                attr,
                attr_span,
            } => {
                let object = self.eval_expr(object)?;
                let semantics = Arc::clone(&self.thread.semantics);
                let location = self.loc(*attr_span);
                get_attr(
                    &object,
                    attr,
                    &self.scope,
                    &semantics,
                    location.clone(),
                    self.thread,
                )
                .map_err(|e| e.with_loc(location))
            }
            Expr::Index { object, index } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                object
                    .index(&index)
                    .map_err(|e| e.with_loc(self.loc(span)))
            }
            Expr::SliceExpr {
                object,
                start,
                stop,
                step,
            } => {
                let object = self.eval_expr(object)?;
                let start = self.eval_slice_bound(start.as_deref())?;
                let stop = self.eval_slice_bound(stop.as_deref())?;
                let step = self.eval_slice_bound(step.as_deref())?;
                object
                    .slice(start, stop, step, &self.scope)
                    .map_err(|e| e.with_loc(self.loc(span)))
            }
            Expr::Call(call) => self.eval_call(call),
            Expr::Comp(comp) => self.eval_comp(comp, span),
        }
    }

    fn eval_slice_bound(&mut self, bound: Option<&ExprLoc>) -> EvalResult<Option<i32>> {
        let Some(bound) = bound else {
            return Ok(None);
        };
        match self.eval_expr(bound)? {
            Value::Int(i) => Ok(Some(i)),
            Value::None => Ok(None),
            other => Err(EvalError::type_error(format!(
                "slice bound must be an int, got '{}'",
                other.type_name()
            ))
            .with_loc(self.loc(bound.span))),
        }
    }

    fn compare(&self, op: CmpOp, left: &Value, right: &Value) -> EvalResult<Value> {
        let result = match op {
            CmpOp::Eq => left.equals(right),
            CmpOp::NotEq => !left.equals(right),
            CmpOp::Lt => left.compare(right)?.is_lt(),
            CmpOp::LtE => left.compare(right)?.is_le(),
            CmpOp::Gt => left.compare(right)?.is_gt(),
            CmpOp::GtE => left.compare(right)?.is_ge(),
            CmpOp::In => right.contains(left)?,
            CmpOp::NotIn => !right.contains(left)?,
        };
        Ok(Value::Bool(result))
    }

    /// The uniform call protocol, steps 1-3: evaluate positional arguments
    /// left to right expanding `*`, then keywords expanding `**`, then reject
    /// duplicate keyword names across all sources.
    fn eval_call(&mut self, call: &CallExpr) -> EvalResult<Value> {
        let callee = self.eval_expr(&call.callee)?;
        let callee_name = callee.callable_name();

        let mut args = CallArgs::default();
        for arg in &call.args {
            match arg {
                CallArg::Positional(value) => args.positional.push(self.eval_expr(value)?),
                CallArg::Star(value) => {
                    let expanded = self.eval_expr(value)?;
                    let items = expanded
                        .iterate()
                        .map_err(|_| {
                            EvalError::type_error(format!(
                                "argument after * must be iterable, got '{}'",
                                expanded.type_name()
                            ))
                            .with_loc(self.loc(value.span))
                        })?;
                    args.positional.extend(items);
                }
                CallArg::Named { name, value, .. } => {
                    let value = self.eval_expr(value)?;
                    args.named.push((Arc::clone(name), value));
                }
                CallArg::StarStar(value) => {
                    let expanded = self.eval_expr(value)?;
                    let Value::Dict(dict) = &expanded else {
                        return Err(EvalError::type_error(format!(
                            "argument after ** must be a dict, got '{}'",
                            expanded.type_name()
                        ))
                        .with_loc(self.loc(value.span)));
                    };
                    for (key, item) in dict.entries() {
                        let Value::Str(name) = key else {
                            return Err(EvalError::type_error(format!(
                                "** keywords must be strings, got '{}'",
                                key.type_name()
                            ))
                            .with_loc(self.loc(value.span)));
                        };
                        args.named.push((name, item));
                    }
                }
            }
        }
        args.check_duplicate_named(&callee_name)
            .map_err(|e| e.with_loc(self.loc(call.span)))?;

        self.call_value(&callee, args, call)
    }

    /// Steps 4-7: dispatch to the callee kind and bind parameters.
    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        args: CallArgs,
        call: &CallExpr,
    ) -> EvalResult<Value> {
        let call_loc = self.loc(call.span);
        match callee {
            Value::Function(function) => self.call_function(function, args, call_loc),
            Value::Native(native) => {
                let descriptor = Arc::clone(&native.descriptor);
                let receiver = native.receiver.clone();
                self.call_native(&descriptor, receiver, args, call, call_loc)
            }
            Value::Provider(provider) => {
                if !args.positional.is_empty() {
                    return Err(EvalError::type_error(
                        "providers accept keyword arguments only",
                    )
                    .with_loc(call_loc));
                }
                let instance = provider
                    .instantiate(args.named)
                    .map_err(|e| e.with_loc(call_loc))?;
                Ok(Value::Struct(Arc::new(instance)))
            }
            Value::Host(host) => {
                match self_call_for(host.type_name(), &self.thread.semantics) {
                    Some(descriptor) => self.call_native(
                        &descriptor,
                        Some(callee.clone()),
                        args,
                        call,
                        call_loc,
                    ),
                    None => Err(EvalError::type_error(format!(
                        "'{}' value is not callable",
                        host.type_name()
                    ))
                    .with_loc(call_loc)),
                }
            }
            other => Err(EvalError::type_error(format!(
                "'{}' value is not callable",
                other.type_name()
            ))
            .with_loc(call_loc)),
        }
    }

    fn call_function(
        &mut self,
        function: &Arc<Function>,
        args: CallArgs,
        call_loc: CodeLoc,
    ) -> EvalResult<Value> {
        // A cycle in the dynamic call stack on the same function is an error;
        // there is no recursion in the language.
        if self
            .thread
            .frames
            .iter()
            .any(|frame| Arc::ptr_eq(&frame.function, function))
        {
            return Err(ErrorKind::Recursion
                .err(format!("function '{}' called recursively", function.name))
                .with_loc(call_loc));
        }

        let bound = function
            .signature
            .bind(&function.name, args, &function.defaults, &self.scope)
            .map_err(|e| e.with_loc(call_loc.clone()))?;

        let mut locals: Vec<Option<Value>> = vec![None; function.local_count];
        for (slot, value) in bound.into_iter().enumerate() {
            locals[slot] = Some(value);
        }

        self.thread.tracer.on_call(&function.name, &call_loc);
        self.thread.frames.push(FrameInfo {
            function: Arc::clone(function),
            call_loc: call_loc.clone(),
        });

        let mut frame = Evaluator {
            module: Arc::clone(&function.module),
            file: Arc::clone(&function.file),
            scope: self.scope.clone(),
            thread: &mut *self.thread,
            locals,
        };
        let result = frame.exec_stmts(&function.body);

        self.thread.frames.pop();
        self.thread.tracer.on_return(&function.name);

        match result {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(_) => Ok(Value::None),
            Err(err) => Err(err.with_frame(function.name.to_string(), call_loc)),
        }
    }

    fn call_native(
        &mut self,
        descriptor: &Arc<MethodDescriptor>,
        receiver: Option<Value>,
        mut args: CallArgs,
        call: &CallExpr,
        call_loc: CodeLoc,
    ) -> EvalResult<Value> {
        // String receivers dispatch through the string module: the string is
        // inserted as the first positional argument.
        let receiver = match receiver {
            Some(receiver @ Value::Str(_)) => {
                args.positional.insert(0, receiver);
                None
            }
            other => other,
        };

        let bound = descriptor
            .bind(args, &self.scope)
            .map_err(|e| e.with_loc(call_loc.clone()))?;

        let semantics = Arc::clone(&self.thread.semantics);
        // Interpreter extras in their fixed order: location, call AST,
        // thread, semantics; each only when the descriptor requested it.
        let mut ctx = CallCtx {
            scope: &self.scope,
            receiver,
            location: descriptor.wants_location.then(|| call_loc.clone()),
            call: descriptor.wants_call.then_some(call),
            thread: descriptor.wants_thread.then_some(&mut *self.thread),
            semantics: descriptor.wants_semantics.then_some(semantics),
        };
        (descriptor.func)(&mut ctx, bound)
            .map_err(|e| e.with_frame(descriptor.name, call_loc))
    }

    /// Comprehensions run in the current frame; iteration variables shadow
    /// outer bindings, which are restored exactly afterwards (including on
    /// error exits).
    fn eval_comp(&mut self, comp: &Comprehension, span: Span) -> EvalResult<Value> {
        let saved: Vec<(Identifier, Option<Value>)> = comp
            .bound_names()
            .into_iter()
            .map(|identifier| {
                let current = match identifier.binding {
                    Binding::Local(slot) => self.locals[slot as usize].clone(),
                    _ => self.module.get_global(&identifier.name),
                };
                (identifier.clone(), current)
            })
            .collect();

        let mut out = match &comp.kind {
            CompKind::List(_) => CompOut::List(Vec::new()),
            CompKind::Dict { .. } => CompOut::Dict(Vec::new()),
        };
        let result = self.run_comp_clauses(comp, 0, &mut out);

        // Restore shadowed bindings even when a clause failed.
        for (identifier, previous) in saved {
            match identifier.binding {
                Binding::Local(slot) => self.locals[slot as usize] = previous,
                _ => match previous {
                    Some(value) => {
                        let _ = self.module.set(Arc::clone(&identifier.name), value);
                    }
                    None => self.module.remove_global(&identifier.name),
                },
            }
        }
        result?;

        match out {
            CompOut::List(items) => Ok(Value::List(Arc::new(crate::types::List::new(
                items,
                self.scope.clone(),
            )))),
            CompOut::Dict(pairs) => {
                let dict = crate::types::Dict::from_pairs(pairs, self.scope.clone())
                    .map_err(|e| e.with_loc(self.loc(span)))?;
                Ok(Value::Dict(Arc::new(dict)))
            }
        }
    }

    /// Index-based recursion over the comprehension's clauses: clause `i`
    /// drives clause `i + 1`; past the last clause the element is emitted.
    fn run_comp_clauses(
        &mut self,
        comp: &Comprehension,
        clause_index: usize,
        out: &mut CompOut,
    ) -> EvalResult<()> {
        let Some(clause) = comp.clauses.get(clause_index) else {
            match (&comp.kind, out) {
                (CompKind::List(elt), CompOut::List(items)) => {
                    items.push(self.eval_expr(elt)?);
                }
                (CompKind::Dict { key, value }, CompOut::Dict(pairs)) => {
                    let key = self.eval_expr(key)?;
                    let value = self.eval_expr(value)?;
                    pairs.push((key, value));
                }
                _ => unreachable!("comp output matches comp kind"),
            }
            return Ok(());
        };
        match clause {
            CompClause::For { target, iter } => {
                let iterable = self.eval_expr(iter)?;
                let items = iterable
                    .iterate()
                    .map_err(|e| e.with_loc(self.loc(iter.span)))?;
                for item in items {
                    self.assign(target, item)?;
                    self.run_comp_clauses(comp, clause_index + 1, out)?;
                }
                Ok(())
            }
            CompClause::If(test) => {
                if self.eval_expr(test)?.truth() {
                    self.run_comp_clauses(comp, clause_index + 1, out)?;
                }
                Ok(())
            }
        }
    }
}

enum CompOut {
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
}

fn literal_value(literal: &crate::expressions::Literal) -> Value {
    match literal {
        crate::expressions::Literal::None => Value::None,
        crate::expressions::Literal::Bool(b) => Value::Bool(*b),
        crate::expressions::Literal::Int(i) => Value::Int(*i),
        crate::expressions::Literal::Str(s) => Value::Str(Arc::clone(s)),
    }
}
