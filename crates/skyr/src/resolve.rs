use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::errors::{ErrorKind, EvalError};
use crate::expressions::{
    AssignTarget, Binding, CompClause, CompKind, Comprehension, DefStmt, Expr, ExprLoc, Identifier,
    ParamKind, Stmt, StmtKind,
};
use crate::module::Universe;
use crate::parse::{FileInfo, FileOptions, ParsedFile, Span};

/// A parsed file whose identifiers have been classified and whose static
/// rejections have been applied. Ready for evaluation.
#[derive(Debug)]
pub struct ResolvedFile {
    pub file: Arc<FileInfo>,
    pub options: FileOptions,
    pub statements: Arc<[Stmt]>,
    /// Parse errors plus resolve errors, in discovery order.
    pub errors: Vec<EvalError>,
}

impl ResolvedFile {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The file's `load` statements, in source order.
    pub fn loads(&self) -> impl Iterator<Item = &crate::expressions::LoadStmt> {
        self.statements.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::Load(load) => Some(load),
            _ => None,
        })
    }
}

/// Resolves a parsed file against a universe of predeclared names.
///
/// Classifies every identifier use as Local / Module / Universe, allocates
/// frame slots for function locals, and rejects the statically-illegal
/// constructs. Like parsing, resolution never throws: errors accumulate on
/// the returned file.
#[must_use]
pub fn resolve(parsed: ParsedFile, universe: &Universe) -> ResolvedFile {
    let ParsedFile {
        file,
        options,
        mut statements,
        errors,
    } = parsed;

    let mut resolver = Resolver {
        universe,
        options,
        file: Arc::clone(&file),
        module_names: AHashSet::new(),
        errors,
    };
    resolver.collect_module_names(&statements);
    for stmt in &mut statements {
        resolver.resolve_stmt(stmt, &mut None, Flags::top_level());
    }

    ResolvedFile {
        file,
        options,
        statements: statements.into(),
        errors: resolver.errors,
    }
}

/// Slot allocation for one function body.
struct FunctionCtx {
    slots: AHashMap<Arc<str>, u32>,
}

impl FunctionCtx {
    fn slot(&self, name: &str) -> Option<u32> {
        self.slots.get(name).copied()
    }
}

#[derive(Clone, Copy)]
struct Flags {
    in_function: bool,
    in_loop: bool,
}

impl Flags {
    fn top_level() -> Self {
        Self {
            in_function: false,
            in_loop: false,
        }
    }

    fn with_loop(self) -> Self {
        Self {
            in_loop: true,
            ..self
        }
    }
}

struct Resolver<'a> {
    universe: &'a Universe,
    options: FileOptions,
    file: Arc<FileInfo>,
    /// All names bound at the top level: assignments, defs, loaded bindings.
    module_names: AHashSet<Arc<str>>,
    errors: Vec<EvalError>,
}

impl Resolver<'_> {
    fn error(&mut self, message: impl Into<String>, span: Span) {
        let loc = self.file.span_loc(span);
        self.errors
            .push(ErrorKind::Resolve.err(message).with_loc(loc));
    }

    /// First pass: every name the file binds at module level, so functions
    /// can reference globals defined later in the file.
    fn collect_module_names(&mut self, statements: &[Stmt]) {
        let mut names = AHashSet::new();
        for stmt in statements {
            Self::collect_bound_names(stmt, &mut names);
        }
        self.module_names = names;
    }

    fn collect_bound_names(stmt: &Stmt, names: &mut AHashSet<Arc<str>>) {
        match &stmt.kind {
            StmtKind::Load(load) => {
                for binding in &load.bindings {
                    names.insert(Arc::clone(&binding.local.name));
                }
            }
            StmtKind::Assign { target, value } => {
                Self::collect_target_names(target, names);
                Self::collect_comp_names(&value.expr, names);
            }
            StmtKind::AugAssign { target, value, .. } => {
                Self::collect_target_names(target, names);
                Self::collect_comp_names(&value.expr, names);
            }
            StmtKind::Def(def) => {
                names.insert(Arc::clone(&def.name.name));
                // Parameter defaults evaluate in the enclosing scope, so any
                // comprehension targets they contain bind there too.
                for param in &def.params {
                    if let Some(default) = &param.default {
                        Self::collect_comp_names(&default.expr, names);
                    }
                }
            }
            StmtKind::If {
                test,
                body,
                or_else,
            } => {
                Self::collect_comp_names(&test.expr, names);
                for s in body.iter().chain(or_else) {
                    Self::collect_bound_names(s, names);
                }
            }
            StmtKind::For { target, iter, body } => {
                Self::collect_target_names(target, names);
                Self::collect_comp_names(&iter.expr, names);
                for s in body {
                    Self::collect_bound_names(s, names);
                }
            }
            StmtKind::Return { value: Some(value) } => {
                Self::collect_comp_names(&value.expr, names);
            }
            StmtKind::Expr(expr) => Self::collect_comp_names(&expr.expr, names),
            _ => {}
        }
    }

    fn collect_target_names(target: &AssignTarget, names: &mut AHashSet<Arc<str>>) {
        match target {
            AssignTarget::Name(identifier) => {
                names.insert(Arc::clone(&identifier.name));
            }
            AssignTarget::Index { .. } => {}
            AssignTarget::Sequence { targets, .. } => {
                for t in targets {
                    Self::collect_target_names(t, names);
                }
            }
        }
    }

    /// Comprehension targets bind names in the enclosing namespace (the
    /// evaluator saves and restores them around the comprehension).
    fn collect_comp_names(expr: &Expr, names: &mut AHashSet<Arc<str>>) {
        match expr {
            Expr::Comp(comp) => {
                for identifier in comp.bound_names() {
                    names.insert(Arc::clone(&identifier.name));
                }
                for clause in &comp.clauses {
                    match clause {
                        CompClause::For { iter, .. } => Self::collect_comp_names(&iter.expr, names),
                        CompClause::If(test) => Self::collect_comp_names(&test.expr, names),
                    }
                }
                match &comp.kind {
                    CompKind::List(elt) => Self::collect_comp_names(&elt.expr, names),
                    CompKind::Dict { key, value } => {
                        Self::collect_comp_names(&key.expr, names);
                        Self::collect_comp_names(&value.expr, names);
                    }
                }
            }
            Expr::ListExpr(items) | Expr::TupleExpr(items) => {
                for item in items {
                    Self::collect_comp_names(&item.expr, names);
                }
            }
            Expr::DictExpr(entries) => {
                for (k, v) in entries {
                    Self::collect_comp_names(&k.expr, names);
                    Self::collect_comp_names(&v.expr, names);
                }
            }
            Expr::Unary { operand, .. } => Self::collect_comp_names(&operand.expr, names),
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::BoolOp { left, right, .. } => {
                Self::collect_comp_names(&left.expr, names);
                Self::collect_comp_names(&right.expr, names);
            }
            Expr::Cond {
                test,
                body,
                or_else,
            } => {
                Self::collect_comp_names(&test.expr, names);
                Self::collect_comp_names(&body.expr, names);
                Self::collect_comp_names(&or_else.expr, names);
            }
            Expr::Dot { object, .. } => Self::collect_comp_names(&object.expr, names),
            Expr::Index { object, index } => {
                Self::collect_comp_names(&object.expr, names);
                Self::collect_comp_names(&index.expr, names);
            }
            Expr::SliceExpr {
                object,
                start,
                stop,
                step,
            } => {
                Self::collect_comp_names(&object.expr, names);
                for bound in [start, stop, step].into_iter().flatten() {
                    Self::collect_comp_names(&bound.expr, names);
                }
            }
            Expr::Call(call) => {
                Self::collect_comp_names(&call.callee.expr, names);
                for arg in &call.args {
                    let value = match arg {
                        crate::expressions::CallArg::Positional(v)
                        | crate::expressions::CallArg::Star(v)
                        | crate::expressions::CallArg::StarStar(v) => v,
                        crate::expressions::CallArg::Named { value, .. } => value,
                    };
                    Self::collect_comp_names(&value.expr, names);
                }
            }
            Expr::Literal(_) | Expr::Name(_) => {}
        }
    }

    fn resolve_stmt(&mut self, stmt: &mut Stmt, ctx: &mut Option<FunctionCtx>, flags: Flags) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Load(load) => {
                if flags.in_function {
                    self.error("load() is only allowed at the top level", span);
                }
                let allow_private = self.options.allow_load_private_symbols;
                let mut private_errors = Vec::new();
                for binding in &mut load.bindings {
                    if binding.original.starts_with('_') && !allow_private {
                        private_errors.push((
                            format!(
                                "cannot load private symbol '{}' (this file may not load internal symbols)",
                                binding.original
                            ),
                            binding.span,
                        ));
                    }
                    binding.local.binding = Binding::Module;
                }
                for (message, binding_span) in private_errors {
                    self.error(message, binding_span);
                }
            }
            StmtKind::Assign { target, value } => {
                // Split borrows: resolve the value first, then the target.
                self.resolve_expr(value, ctx);
                self.resolve_target(target, ctx);
            }
            StmtKind::AugAssign { target, value, .. } => {
                if matches!(target, AssignTarget::Sequence { .. }) {
                    self.error(
                        "augmented assignment target cannot be a list or tuple",
                        target.span(),
                    );
                }
                self.resolve_expr(value, ctx);
                self.resolve_target(target, ctx);
            }
            StmtKind::Def(def) => {
                if flags.in_function {
                    self.error("nested function definitions are not allowed", span);
                    return;
                }
                // Default expressions evaluate in the enclosing (module) scope.
                for param in &mut def.params {
                    if let Some(default) = &mut param.default {
                        self.resolve_expr(default, ctx);
                    }
                }
                self.resolve_def(def);
                def.name.binding = Binding::Module;
            }
            StmtKind::If {
                test,
                body,
                or_else,
            } => {
                self.resolve_expr(test, ctx);
                for s in body.iter_mut().chain(or_else.iter_mut()) {
                    self.resolve_stmt(s, ctx, flags);
                }
            }
            StmtKind::For { target, iter, body } => {
                self.resolve_expr(iter, ctx);
                self.resolve_target(target, ctx);
                for s in body {
                    self.resolve_stmt(s, ctx, flags.with_loop());
                }
            }
            StmtKind::Return { value } => {
                if !flags.in_function {
                    self.error("return outside of a function", span);
                }
                if let Some(value) = value {
                    self.resolve_expr(value, ctx);
                }
            }
            StmtKind::Break | StmtKind::Continue => {
                if !flags.in_loop {
                    self.error("break/continue outside of a for loop", span);
                }
            }
            StmtKind::Pass => {}
            StmtKind::Expr(expr) => self.resolve_expr(expr, ctx),
        }
    }

    /// Resolves one function definition: validates the signature shape,
    /// allocates local slots, resolves the body.
    fn resolve_def(&mut self, def: &mut DefStmt) {
        let mut seen_names: AHashSet<Arc<str>> = AHashSet::new();
        let mut seen_star = false;
        let mut seen_kwargs = false;
        let mut seen_default = false;
        for param in &mut def.params {
            match param.kind {
                ParamKind::Normal => {
                    if seen_kwargs {
                        self.error("parameter follows **kwargs", param.name.span);
                    }
                    if seen_star && param.default.is_none() {
                        self.error(
                            format!(
                                "mandatory keyword-only parameter '{}' is not allowed",
                                param.name.name
                            ),
                            param.name.span,
                        );
                    }
                    if !seen_star {
                        if param.default.is_some() {
                            seen_default = true;
                        } else if seen_default {
                            self.error(
                                "parameter without a default follows one with a default",
                                param.name.span,
                            );
                        }
                    }
                }
                ParamKind::Star | ParamKind::Args => {
                    if seen_star {
                        self.error("duplicate * parameter", param.name.span);
                    }
                    seen_star = true;
                }
                ParamKind::Kwargs => {
                    if seen_kwargs {
                        self.error("duplicate ** parameter", param.name.span);
                    }
                    seen_kwargs = true;
                }
            }
            if param.kind != ParamKind::Star && !seen_names.insert(Arc::clone(&param.name.name)) {
                self.error(
                    format!("duplicate parameter '{}'", param.name.name),
                    param.name.span,
                );
            }
        }

        // Local slots: parameters first, then every name assigned in the body.
        let mut slots: AHashMap<Arc<str>, u32> = AHashMap::new();
        for param in &mut def.params {
            if param.kind == ParamKind::Star {
                continue;
            }
            let slot = slots.len() as u32;
            slots.entry(Arc::clone(&param.name.name)).or_insert(slot);
            param.name.binding = Binding::Local(slots[&param.name.name]);
        }
        let mut assigned = AHashSet::new();
        for stmt in &def.body {
            Self::collect_bound_names(stmt, &mut assigned);
        }
        let mut names: Vec<Arc<str>> = assigned.into_iter().collect();
        names.sort();
        for name in names {
            let slot = slots.len() as u32;
            slots.entry(name).or_insert(slot);
        }
        def.local_count = slots.len() as u32;

        let mut ctx = Some(FunctionCtx { slots });
        let flags = Flags {
            in_function: true,
            in_loop: false,
        };
        for stmt in &mut def.body {
            self.resolve_stmt(stmt, &mut ctx, flags);
        }
    }

    fn resolve_target(&mut self, target: &mut AssignTarget, ctx: &mut Option<FunctionCtx>) {
        match target {
            AssignTarget::Name(identifier) => self.resolve_binding_name(identifier, ctx),
            AssignTarget::Index { object, index, .. } => {
                self.resolve_expr(object, ctx);
                self.resolve_expr(index, ctx);
            }
            AssignTarget::Sequence { targets, span } => {
                if targets.is_empty() {
                    let empty_span = *span;
                    self.error("cannot assign to an empty target list", empty_span);
                }
                for t in targets {
                    self.resolve_target(t, ctx);
                }
            }
        }
    }

    /// Classifies a name being *bound* (assignment target, loop variable).
    fn resolve_binding_name(&mut self, identifier: &mut Identifier, ctx: &mut Option<FunctionCtx>) {
        if self.universe.contains(&identifier.name) {
            self.error(
                format!("cannot reassign predeclared name '{}'", identifier.name),
                identifier.span,
            );
        }
        match ctx {
            Some(function) => match function.slot(&identifier.name) {
                Some(slot) => identifier.binding = Binding::Local(slot),
                None => {
                    // Collection saw every assigned name; missing here means a
                    // target form collection skips (never a plain name).
                    identifier.binding = Binding::Unresolved;
                }
            },
            None => identifier.binding = Binding::Module,
        }
    }

    /// Classifies a name being *read*.
    fn resolve_use(&mut self, identifier: &mut Identifier, ctx: &mut Option<FunctionCtx>) {
        if let Some(function) = ctx
            && let Some(slot) = function.slot(&identifier.name)
        {
            identifier.binding = Binding::Local(slot);
            return;
        }
        if self.module_names.contains(&identifier.name) {
            identifier.binding = Binding::Module;
            return;
        }
        if self.universe.contains(&identifier.name) {
            identifier.binding = Binding::Universe;
            return;
        }
        let suggestion_pool: Vec<Arc<str>> = self
            .module_names
            .iter()
            .cloned()
            .chain(self.universe.names().map(Arc::from))
            .collect();
        let error = EvalError::unknown_name(
            &identifier.name,
            suggestion_pool.iter().map(AsRef::as_ref),
        );
        let loc = self.file.span_loc(identifier.span);
        self.errors.push(
            ErrorKind::Resolve
                .err(error.message)
                .with_loc(loc),
        );
    }

    fn resolve_expr(&mut self, expr: &mut ExprLoc, ctx: &mut Option<FunctionCtx>) {
        match &mut expr.expr {
            Expr::Literal(_) => {}
            Expr::Name(identifier) => self.resolve_use(identifier, ctx),
            Expr::ListExpr(items) | Expr::TupleExpr(items) => {
                for item in items {
                    self.resolve_expr(item, ctx);
                }
            }
            Expr::DictExpr(entries) => {
                for (key, value) in entries {
                    self.resolve_expr(key, ctx);
                    self.resolve_expr(value, ctx);
                }
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand, ctx),
            Expr::Binary { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::BoolOp { left, right, .. } => {
                self.resolve_expr(left, ctx);
                self.resolve_expr(right, ctx);
            }
            Expr::Cond {
                test,
                body,
                or_else,
            } => {
                self.resolve_expr(test, ctx);
                self.resolve_expr(body, ctx);
                self.resolve_expr(or_else, ctx);
            }
            Expr::Dot { object, .. } => self.resolve_expr(object, ctx),
            Expr::Index { object, index } => {
                self.resolve_expr(object, ctx);
                self.resolve_expr(index, ctx);
            }
            Expr::SliceExpr {
                object,
                start,
                stop,
                step,
            } => {
                self.resolve_expr(object, ctx);
                for bound in [start, stop, step].into_iter().flatten() {
                    self.resolve_expr(bound, ctx);
                }
            }
            Expr::Call(call) => {
                self.resolve_expr(&mut call.callee, ctx);
                for arg in &mut call.args {
                    let value = match arg {
                        crate::expressions::CallArg::Positional(v)
                        | crate::expressions::CallArg::Star(v)
                        | crate::expressions::CallArg::StarStar(v) => v,
                        crate::expressions::CallArg::Named { value, .. } => value,
                    };
                    self.resolve_expr(value, ctx);
                }
            }
            Expr::Comp(comp) => self.resolve_comp(comp, ctx),
        }
    }

    /// Comprehension clauses resolve left to right; the iteration variables
    /// use the enclosing namespace (Local slots inside functions, Module at
    /// the top level) and the evaluator restores shadowed bindings afterward.
    fn resolve_comp(&mut self, comp: &mut Comprehension, ctx: &mut Option<FunctionCtx>) {
        for clause in &mut comp.clauses {
            match clause {
                CompClause::For { target, iter } => {
                    self.resolve_expr(iter, ctx);
                    self.resolve_target(target, ctx);
                }
                CompClause::If(test) => self.resolve_expr(test, ctx),
            }
        }
        match &mut comp.kind {
            CompKind::List(elt) => self.resolve_expr(elt, ctx),
            CompKind::Dict { key, value } => {
                self.resolve_expr(key, ctx);
                self.resolve_expr(value, ctx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn resolve_source(source: &str) -> ResolvedFile {
        let universe = Universe::new(vec![
            ("len".into(), crate::value::Value::None),
            ("True".into(), crate::value::Value::Bool(true)),
        ]);
        resolve(parse(source, "t.bzl", FileOptions::default()), &universe)
    }

    fn resolve_errors(source: &str) -> Vec<String> {
        resolve_source(source)
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn classifies_local_module_universe() {
        let resolved = resolve_source("y = 1\ndef f(a):\n    b = a\n    return len(y) + b\n");
        assert!(!resolved.has_errors());
        let StmtKind::Def(def) = &resolved.statements[1].kind else {
            panic!("expected def");
        };
        // Two params/locals: a, b.
        assert_eq!(def.local_count, 2);
    }

    #[test]
    fn unknown_name_is_resolve_error_with_suggestion() {
        let errors = resolve_errors("x = lenn(3)\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("lenn"));
        assert!(errors[0].contains("did you mean 'len'"));
    }

    #[test]
    fn reassigning_universe_name_is_rejected() {
        let errors = resolve_errors("len = 3\n");
        assert!(errors[0].contains("cannot reassign predeclared name 'len'"));
    }

    #[test]
    fn mandatory_keyword_only_parameter_is_rejected() {
        let errors = resolve_errors("def f(a, *, b):\n    pass\n");
        assert!(errors[0].contains("mandatory keyword-only parameter 'b'"));
        // With a default it is fine.
        assert!(resolve_errors("def f(a, *, b = 1):\n    pass\n").is_empty());
    }

    #[test]
    fn private_load_requires_opt_in() {
        let parsed = parse("load(\":a.bzl\", \"_x\")\n", "t.bzl", FileOptions::default());
        let universe = Universe::default();
        let resolved = resolve(parsed, &universe);
        assert!(resolved.errors[0].message.contains("private symbol '_x'"));

        let options = FileOptions {
            allow_load_private_symbols: true,
            ..Default::default()
        };
        let parsed = parse("load(\":a.bzl\", \"_x\")\n", "t.bzl", options);
        let resolved = resolve(parsed, &universe);
        assert!(!resolved.has_errors());
    }

    #[test]
    fn augmented_assignment_to_list_literal_is_rejected() {
        let errors = resolve_errors("x = 1\n[x] += [2]\n");
        assert!(
            errors
                .iter()
                .any(|m| m.contains("augmented assignment target"))
        );
    }

    #[test]
    fn nested_def_is_rejected() {
        let errors = resolve_errors("def f():\n    def g():\n        pass\n");
        assert!(errors[0].contains("nested function definitions"));
    }
}
