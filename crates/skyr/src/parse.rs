use std::sync::Arc;

use ruff_python_ast::{self as ast, Expr as AstExpr, Mod, Number, Stmt as AstStmt};
use ruff_python_parser::{Mode, ParseOptions, parse_unchecked};
use ruff_text_size::{Ranged, TextRange};

use crate::errors::{CodeLoc, ErrorKind, EvalError};
use crate::expressions::{
    AssignTarget, BinOp, CallArg, CallExpr, CmpOp, CompClause, CompKind, Comprehension, DefStmt,
    Expr, ExprLoc, Identifier, Literal, LoadBinding, LoadStmt, ParamDecl, ParamKind, Stmt,
    StmtKind, UnaryOp,
};

/// A half-open byte range into the source text.
///
/// Every AST node carries one; line/column positions are computed lazily from
/// the file's line table only when an error needs rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    fn of(range: TextRange) -> Self {
        Self {
            start: range.start().to_u32(),
            end: range.end().to_u32(),
        }
    }
}

/// Per-file identity plus the line table for lazy position resolution.
#[derive(Debug)]
pub struct FileInfo {
    pub name: Arc<str>,
    /// Byte offset of the first character of each line.
    line_starts: Vec<u32>,
}

impl FileInfo {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            name: name.into(),
            line_starts,
        }
    }

    /// Resolves a byte offset to a 1-based line and column.
    #[must_use]
    pub fn loc(&self, offset: u32) -> CodeLoc {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line - 1];
        CodeLoc {
            file: Arc::clone(&self.name),
            line: line as u32,
            column: offset - line_start + 1,
        }
    }

    #[must_use]
    pub fn span_loc(&self, span: Span) -> CodeLoc {
        self.loc(span.start)
    }
}

/// Per-file parsing options supplied by the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOptions {
    /// When set, string literals may only use the approved escape sequences;
    /// anything else is a syntax error on the tree.
    pub restrict_string_escapes: bool,
    /// When set, `load` may import names with a leading underscore.
    pub allow_load_private_symbols: bool,
}

/// Result of parsing one file: a best-effort statement list plus every
/// scanner/parser error. Parsing never throws; a file that failed to parse at
/// all simply has an empty statement list and a non-empty error list.
#[derive(Debug)]
pub struct ParsedFile {
    pub file: Arc<FileInfo>,
    pub options: FileOptions,
    pub statements: Vec<Stmt>,
    pub errors: Vec<EvalError>,
}

impl ParsedFile {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// The `load` statements of the file, in source order.
    pub fn loads(&self) -> impl Iterator<Item = &LoadStmt> {
        self.statements.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::Load(load) => Some(load),
            _ => None,
        })
    }
}

/// Parses one extension file. Never fails: errors are collected on the tree.
#[must_use]
pub fn parse(source: &str, file_name: &str, options: FileOptions) -> ParsedFile {
    let file = Arc::new(FileInfo::new(file_name, source));
    let parsed = parse_unchecked(source, ParseOptions::from(Mode::Module));

    let mut parser = Parser {
        source,
        file: Arc::clone(&file),
        options,
        errors: Vec::new(),
    };
    for error in parsed.errors() {
        let loc = file.loc(error.location.start().to_u32());
        parser
            .errors
            .push(ErrorKind::Syntax.err(error.error.to_string()).with_loc(loc));
    }

    let statements = match parsed.into_syntax() {
        Mod::Module(module) => parser.lower_statements(module.body, true),
        Mod::Expression(_) => Vec::new(),
    };

    ParsedFile {
        file,
        options,
        statements,
        errors: parser.errors,
    }
}

/// Lowers the ruff AST into skyr's IR, rejecting the Python constructs the
/// extension language does not have and collecting all errors.
struct Parser<'a> {
    source: &'a str,
    file: Arc<FileInfo>,
    options: FileOptions,
    errors: Vec<EvalError>,
}

impl Parser<'_> {
    fn error(&mut self, message: impl Into<String>, range: TextRange) {
        let loc = self.file.loc(range.start().to_u32());
        self.errors
            .push(ErrorKind::Syntax.err(message).with_loc(loc));
    }

    fn unsupported(&mut self, what: &str, range: TextRange) {
        self.error(format!("{what} not supported in extension files"), range);
    }

    /// Placeholder expression emitted after an error, keeping the tree
    /// well-formed for later phases.
    fn placeholder(range: TextRange) -> ExprLoc {
        ExprLoc::new(Span::of(range), Expr::Literal(Literal::None))
    }

    fn lower_statements(&mut self, body: thin_vec::ThinVec<AstStmt>, top_level: bool) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(body.len());
        for statement in body {
            if let Some(stmt) = self.lower_statement(statement, top_level) {
                out.push(stmt);
            }
        }
        out
    }

    fn lower_statement(&mut self, statement: AstStmt, top_level: bool) -> Option<Stmt> {
        match statement {
            AstStmt::Assign(assign) => {
                let range = assign.range();
                if assign.targets.len() != 1 {
                    self.unsupported("chained assignment is", range);
                    return None;
                }
                let target = assign.targets.into_iter().next().expect("one target");
                let target = self.lower_target(target)?;
                let value = self.lower_expr(*assign.value);
                Some(Stmt {
                    span: Span::of(range),
                    kind: StmtKind::Assign { target, value },
                })
            }
            AstStmt::AugAssign(assign) => {
                let range = assign.range();
                let op = self.lower_bin_op(assign.op, range)?;
                let target = self.lower_target(*assign.target)?;
                let value = self.lower_expr(*assign.value);
                Some(Stmt {
                    span: Span::of(range),
                    kind: StmtKind::AugAssign { target, op, value },
                })
            }
            AstStmt::Expr(expr_stmt) => {
                let range = expr_stmt.range();
                if top_level
                    && let AstExpr::Call(call) = expr_stmt.value.as_ref()
                    && matches!(call.func.as_ref(), AstExpr::Name(name) if name.id.as_str() == "load")
                {
                    let AstExpr::Call(call) = *expr_stmt.value else {
                        unreachable!("matched above");
                    };
                    return self.lower_load(call);
                }
                let value = self.lower_expr(*expr_stmt.value);
                Some(Stmt {
                    span: Span::of(range),
                    kind: StmtKind::Expr(value),
                })
            }
            AstStmt::FunctionDef(function) => self.lower_def(function),
            AstStmt::If(if_stmt) => {
                let range = if_stmt.range();
                let test = self.lower_expr(*if_stmt.test);
                let body = self.lower_statements(if_stmt.body, false);
                let or_else = self.lower_elif_else(if_stmt.elif_else_clauses);
                Some(Stmt {
                    span: Span::of(range),
                    kind: StmtKind::If {
                        test,
                        body,
                        or_else,
                    },
                })
            }
            AstStmt::For(for_stmt) => {
                let range = for_stmt.range();
                if for_stmt.is_async {
                    self.unsupported("async for is", range);
                    return None;
                }
                if !for_stmt.orelse.is_empty() {
                    self.unsupported("for-else is", range);
                    return None;
                }
                let target = self.lower_target(*for_stmt.target)?;
                let iter = self.lower_expr(*for_stmt.iter);
                let body = self.lower_statements(for_stmt.body, false);
                Some(Stmt {
                    span: Span::of(range),
                    kind: StmtKind::For { target, iter, body },
                })
            }
            AstStmt::Return(ret) => {
                let range = ret.range();
                let value = ret.value.map(|v| self.lower_expr(*v));
                Some(Stmt {
                    span: Span::of(range),
                    kind: StmtKind::Return { value },
                })
            }
            AstStmt::Pass(pass) => Some(Stmt {
                span: Span::of(pass.range()),
                kind: StmtKind::Pass,
            }),
            AstStmt::Break(brk) => Some(Stmt {
                span: Span::of(brk.range()),
                kind: StmtKind::Break,
            }),
            AstStmt::Continue(cont) => Some(Stmt {
                span: Span::of(cont.range()),
                kind: StmtKind::Continue,
            }),
            other => {
                let what = match &other {
                    AstStmt::ClassDef(_) => "class definitions are",
                    AstStmt::While(_) => "while loops are",
                    AstStmt::With(_) => "with statements are",
                    AstStmt::Try(_) => "try/except is",
                    AstStmt::Raise(_) => "raise is",
                    AstStmt::Assert(_) => "assert is",
                    AstStmt::Import(_) | AstStmt::ImportFrom(_) => "import statements are",
                    AstStmt::Global(_) | AstStmt::Nonlocal(_) => "scope declarations are",
                    AstStmt::Delete(_) => "del is",
                    AstStmt::Match(_) => "match statements are",
                    AstStmt::AnnAssign(_) | AstStmt::TypeAlias(_) => "type annotations are",
                    _ => "this statement is",
                };
                self.unsupported(what, other.range());
                None
            }
        }
    }

    fn lower_elif_else(&mut self, clauses: Vec<ast::ElifElseClause>) -> Vec<Stmt> {
        // Build else-chains from the innermost clause outwards.
        let mut or_else: Vec<Stmt> = Vec::new();
        for clause in clauses.into_iter().rev() {
            let range = clause.range();
            let body = self.lower_statements(clause.body, false);
            or_else = match clause.test {
                Some(test) => {
                    let test = self.lower_expr(test);
                    vec![Stmt {
                        span: Span::of(range),
                        kind: StmtKind::If {
                            test,
                            body,
                            or_else,
                        },
                    }]
                }
                None => body,
            };
        }
        or_else
    }

    fn lower_def(&mut self, function: ast::StmtFunctionDef) -> Option<Stmt> {
        let range = function.range();
        if function.is_async {
            self.unsupported("async functions are", range);
            return None;
        }
        if !function.decorator_list.is_empty() {
            self.unsupported("decorators are", range);
            return None;
        }
        if function.type_params.is_some() {
            self.unsupported("type parameters are", range);
        }
        if function.returns.is_some() {
            self.unsupported("return annotations are", range);
        }

        let parameters = function.parameters;
        if !parameters.posonlyargs.is_empty() {
            self.unsupported("positional-only parameter markers are", range);
        }

        let mut params = Vec::new();
        for param in &parameters.args {
            params.push(self.lower_param(param, ParamKind::Normal));
        }
        match &parameters.vararg {
            Some(vararg) => params.push(ParamDecl {
                kind: ParamKind::Args,
                name: Identifier::new(vararg.name.id.as_str(), Span::of(vararg.range())),
                default: None,
            }),
            None if !parameters.kwonlyargs.is_empty() => params.push(ParamDecl {
                kind: ParamKind::Star,
                name: Identifier::new("*", Span::of(range)),
                default: None,
            }),
            None => {}
        }
        for param in &parameters.kwonlyargs {
            params.push(self.lower_param(param, ParamKind::Normal));
        }
        if let Some(kwarg) = &parameters.kwarg {
            params.push(ParamDecl {
                kind: ParamKind::Kwargs,
                name: Identifier::new(kwarg.name.id.as_str(), Span::of(kwarg.range())),
                default: None,
            });
        }

        let body = self.lower_statements(function.body, false);
        Some(Stmt {
            span: Span::of(range),
            kind: StmtKind::Def(Box::new(DefStmt {
                name: Identifier::new(function.name.id.as_str(), Span::of(function.name.range())),
                params,
                body,
                local_count: 0,
            })),
        })
    }

    fn lower_param(&mut self, param: &ast::ParameterWithDefault, kind: ParamKind) -> ParamDecl {
        if let Some(annotation) = &param.parameter.annotation {
            self.unsupported("parameter annotations are", annotation.range());
        }
        // Defaults are cloned out of the boxed AST; the allocation is
        // parse-time only.
        let default = param
            .default
            .as_deref()
            .map(|d| self.lower_expr(d.clone()));
        ParamDecl {
            kind,
            name: Identifier::new(
                param.parameter.name.id.as_str(),
                Span::of(param.parameter.name.range()),
            ),
            default,
        }
    }

    fn lower_load(&mut self, call: ast::ExprCall) -> Option<Stmt> {
        let range = call.range();
        let mut args = call.arguments.args.into_iter();
        let Some(first) = args.next() else {
            self.error("load() requires a module argument", range);
            return None;
        };
        let (module, module_span) = match self.string_literal(&first) {
            Some(module) => (module, Span::of(first.range())),
            None => {
                self.error("load() module argument must be a string literal", first.range());
                return None;
            }
        };

        let mut bindings = Vec::new();
        for arg in args {
            let arg_range = arg.range();
            match self.string_literal(&arg) {
                Some(original) => bindings.push(LoadBinding {
                    local: Identifier::new(original.as_str(), Span::of(arg_range)),
                    original,
                    span: Span::of(arg_range),
                }),
                None => self.error(
                    "load() symbol arguments must be string literals",
                    arg_range,
                ),
            }
        }
        for keyword in call.arguments.keywords {
            let keyword_range = keyword.range();
            let Some(local) = keyword.arg else {
                self.error("load() does not accept ** arguments", keyword_range);
                continue;
            };
            match self.string_literal(&keyword.value) {
                Some(original) => bindings.push(LoadBinding {
                    local: Identifier::new(local.id.as_str(), Span::of(local.range())),
                    original,
                    span: Span::of(keyword_range),
                }),
                None => self.error(
                    "load() symbol arguments must be string literals",
                    keyword_range,
                ),
            }
        }

        if bindings.is_empty() {
            self.error("load() must import at least one symbol", range);
        }
        Some(Stmt {
            span: Span::of(range),
            kind: StmtKind::Load(LoadStmt {
                module,
                module_span,
                bindings,
            }),
        })
    }

    fn string_literal(&mut self, expr: &AstExpr) -> Option<String> {
        match expr {
            AstExpr::StringLiteral(lit) => {
                self.check_string_escapes(lit.range());
                Some(lit.value.to_string())
            }
            _ => None,
        }
    }

    fn lower_target(&mut self, expr: AstExpr) -> Option<AssignTarget> {
        let range = expr.range();
        match expr {
            AstExpr::Name(name) => Some(AssignTarget::Name(Identifier::new(
                name.id.as_str(),
                Span::of(range),
            ))),
            AstExpr::Subscript(subscript) => {
                if matches!(subscript.slice.as_ref(), AstExpr::Slice(_)) {
                    self.unsupported("slice assignment is", range);
                    return None;
                }
                Some(AssignTarget::Index {
                    object: Box::new(self.lower_expr(*subscript.value)),
                    index: Box::new(self.lower_expr(*subscript.slice)),
                    span: Span::of(range),
                })
            }
            AstExpr::Tuple(tuple) => {
                let targets: Vec<AssignTarget> = tuple
                    .elts
                    .into_iter()
                    .filter_map(|t| self.lower_target(t))
                    .collect();
                Some(AssignTarget::Sequence {
                    targets,
                    span: Span::of(range),
                })
            }
            AstExpr::List(list) => {
                let targets: Vec<AssignTarget> = list
                    .elts
                    .into_iter()
                    .filter_map(|t| self.lower_target(t))
                    .collect();
                Some(AssignTarget::Sequence {
                    targets,
                    span: Span::of(range),
                })
            }
            AstExpr::Attribute(_) => {
                self.error("cannot assign to a field", range);
                None
            }
            AstExpr::Starred(_) => {
                self.unsupported("starred assignment targets are", range);
                None
            }
            _ => {
                self.error("invalid assignment target", range);
                None
            }
        }
    }

    fn lower_bin_op(&mut self, op: ast::Operator, range: TextRange) -> Option<BinOp> {
        match op {
            ast::Operator::Add => Some(BinOp::Add),
            ast::Operator::Sub => Some(BinOp::Sub),
            ast::Operator::Mult => Some(BinOp::Mul),
            ast::Operator::FloorDiv => Some(BinOp::FloorDiv),
            ast::Operator::Mod => Some(BinOp::Percent),
            ast::Operator::LShift => Some(BinOp::LShift),
            ast::Operator::RShift => Some(BinOp::RShift),
            ast::Operator::BitOr => Some(BinOp::BitOr),
            ast::Operator::BitXor => Some(BinOp::BitXor),
            ast::Operator::BitAnd => Some(BinOp::BitAnd),
            ast::Operator::Div => {
                self.error("the '/' operator is not allowed; use '//' for integer division", range);
                None
            }
            ast::Operator::Pow => {
                self.unsupported("the '**' operator is", range);
                None
            }
            ast::Operator::MatMult => {
                self.unsupported("the '@' operator is", range);
                None
            }
        }
    }

    fn lower_expr(&mut self, expr: AstExpr) -> ExprLoc {
        let range = expr.range();
        let span = Span::of(range);
        match expr {
            AstExpr::NoneLiteral(_) => ExprLoc::new(span, Expr::Literal(Literal::None)),
            AstExpr::BooleanLiteral(lit) => {
                ExprLoc::new(span, Expr::Literal(Literal::Bool(lit.value)))
            }
            AstExpr::NumberLiteral(lit) => {
                let literal = match lit.value {
                    Number::Int(i) => match i.as_i64().and_then(|v| i32::try_from(v).ok()) {
                        Some(v) => Literal::Int(v),
                        None => {
                            self.error("integer literal out of 32-bit range", range);
                            Literal::Int(0)
                        }
                    },
                    Number::Float(_) | Number::Complex { .. } => {
                        self.unsupported("floating-point literals are", range);
                        Literal::Int(0)
                    }
                };
                ExprLoc::new(span, Expr::Literal(literal))
            }
            AstExpr::StringLiteral(lit) => {
                self.check_string_escapes(range);
                ExprLoc::new(span, Expr::Literal(Literal::Str(lit.value.to_string().into())))
            }
            AstExpr::Name(name) => ExprLoc::new(
                span,
                Expr::Name(Identifier::new(name.id.as_str(), span)),
            ),
            AstExpr::List(list) => {
                let items = list.elts.into_iter().map(|e| self.lower_expr(e)).collect();
                ExprLoc::new(span, Expr::ListExpr(items))
            }
            AstExpr::Tuple(tuple) => {
                let items = tuple.elts.into_iter().map(|e| self.lower_expr(e)).collect();
                ExprLoc::new(span, Expr::TupleExpr(items))
            }
            AstExpr::Dict(dict) => {
                let mut entries = Vec::with_capacity(dict.items.len());
                for ast::DictItem { key, value } in dict.items {
                    match key {
                        Some(key) => {
                            let key = self.lower_expr(key);
                            let value = self.lower_expr(value);
                            entries.push((key, value));
                        }
                        None => self.unsupported("'**' in dict literals is", value.range()),
                    }
                }
                ExprLoc::new(span, Expr::DictExpr(entries))
            }
            AstExpr::UnaryOp(unary) => {
                let op = match unary.op {
                    ast::UnaryOp::Not => UnaryOp::Not,
                    ast::UnaryOp::USub => UnaryOp::Minus,
                    ast::UnaryOp::UAdd => UnaryOp::Plus,
                    ast::UnaryOp::Invert => UnaryOp::Invert,
                };
                let operand = Box::new(self.lower_expr(*unary.operand));
                ExprLoc::new(span, Expr::Unary { op, operand })
            }
            AstExpr::BinOp(binary) => {
                let left = Box::new(self.lower_expr(*binary.left));
                let right = Box::new(self.lower_expr(*binary.right));
                match self.lower_bin_op(binary.op, range) {
                    Some(op) => ExprLoc::new(span, Expr::Binary { op, left, right }),
                    None => Self::placeholder(range),
                }
            }
            AstExpr::BoolOp(bool_op) => {
                let and = matches!(bool_op.op, ast::BoolOp::And);
                let mut values = bool_op.values.into_iter();
                let first = self.lower_expr(values.next().expect("bool op has operands"));
                values.fold(first, |left, right| {
                    let right = self.lower_expr(right);
                    ExprLoc::new(
                        span,
                        Expr::BoolOp {
                            and,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                    )
                })
            }
            AstExpr::Compare(compare) => {
                if compare.ops.len() != 1 {
                    self.unsupported("comparison chaining is", range);
                    return Self::placeholder(range);
                }
                let op = match compare.ops[0] {
                    ast::CmpOp::Eq => CmpOp::Eq,
                    ast::CmpOp::NotEq => CmpOp::NotEq,
                    ast::CmpOp::Lt => CmpOp::Lt,
                    ast::CmpOp::LtE => CmpOp::LtE,
                    ast::CmpOp::Gt => CmpOp::Gt,
                    ast::CmpOp::GtE => CmpOp::GtE,
                    ast::CmpOp::In => CmpOp::In,
                    ast::CmpOp::NotIn => CmpOp::NotIn,
                    ast::CmpOp::Is | ast::CmpOp::IsNot => {
                        self.unsupported("'is' comparisons are", range);
                        return Self::placeholder(range);
                    }
                };
                let left = Box::new(self.lower_expr(*compare.left));
                let right = Box::new(
                    self.lower_expr(compare.comparators.into_iter().next().expect("one comparator")),
                );
                ExprLoc::new(span, Expr::Compare { op, left, right })
            }
            AstExpr::If(cond) => ExprLoc::new(
                span,
                Expr::Cond {
                    test: Box::new(self.lower_expr(*cond.test)),
                    body: Box::new(self.lower_expr(*cond.body)),
                    or_else: Box::new(self.lower_expr(*cond.orelse)),
                },
            ),
            AstExpr::Attribute(attr) => ExprLoc::new(
                span,
                Expr::Dot {
                    object: Box::new(self.lower_expr(*attr.value)),
                    attr: attr.attr.id.as_str().into(),
                    attr_span: Span::of(attr.attr.range()),
                },
            ),
            AstExpr::Subscript(subscript) => match *subscript.slice {
                AstExpr::Slice(slice) => ExprLoc::new(
                    span,
                    Expr::SliceExpr {
                        object: Box::new(self.lower_expr(*subscript.value)),
                        start: slice.lower.map(|e| Box::new(self.lower_expr(*e))),
                        stop: slice.upper.map(|e| Box::new(self.lower_expr(*e))),
                        step: slice.step.map(|e| Box::new(self.lower_expr(*e))),
                    },
                ),
                index => ExprLoc::new(
                    span,
                    Expr::Index {
                        object: Box::new(self.lower_expr(*subscript.value)),
                        index: Box::new(self.lower_expr(index)),
                    },
                ),
            },
            AstExpr::Call(call) => {
                let callee = self.lower_expr(*call.func);
                let mut args = Vec::new();
                for arg in call.arguments.args {
                    match arg {
                        AstExpr::Starred(starred) => {
                            args.push(CallArg::Star(self.lower_expr(*starred.value)));
                        }
                        other => args.push(CallArg::Positional(self.lower_expr(other))),
                    }
                }
                for keyword in call.arguments.keywords {
                    match keyword.arg {
                        Some(name) => args.push(CallArg::Named {
                            name: name.id.as_str().into(),
                            span: Span::of(name.range()),
                            value: self.lower_expr(keyword.value),
                        }),
                        None => args.push(CallArg::StarStar(self.lower_expr(keyword.value))),
                    }
                }
                ExprLoc::new(
                    span,
                    Expr::Call(Box::new(CallExpr {
                        callee,
                        args,
                        span,
                    })),
                )
            }
            AstExpr::ListComp(comp) => {
                let elt = self.lower_expr(*comp.elt);
                let clauses = self.lower_comp_clauses(comp.generators);
                ExprLoc::new(
                    span,
                    Expr::Comp(Box::new(Comprehension {
                        kind: CompKind::List(elt),
                        clauses,
                    })),
                )
            }
            AstExpr::DictComp(comp) => {
                let key = match comp.key {
                    Some(key) => self.lower_expr(*key),
                    None => {
                        self.unsupported("'**' in dict comprehensions is", comp.value.range());
                        Self::placeholder(comp.value.range())
                    }
                };
                let value = self.lower_expr(*comp.value);
                let clauses = self.lower_comp_clauses(comp.generators);
                ExprLoc::new(
                    span,
                    Expr::Comp(Box::new(Comprehension {
                        kind: CompKind::Dict { key, value },
                        clauses,
                    })),
                )
            }
            other => {
                let what = match &other {
                    AstExpr::Lambda(_) => "lambda expressions are",
                    AstExpr::FString(_) => "f-strings are",
                    AstExpr::BytesLiteral(_) => "bytes literals are",
                    AstExpr::Set(_) | AstExpr::SetComp(_) => "set literals are",
                    AstExpr::Generator(_) => "generator expressions are",
                    AstExpr::Await(_) | AstExpr::Yield(_) | AstExpr::YieldFrom(_) => {
                        "async/generator constructs are"
                    }
                    AstExpr::Named(_) => "assignment expressions are",
                    AstExpr::Starred(_) => "starred expressions outside calls are",
                    AstExpr::Slice(_) => "slices outside subscripts are",
                    AstExpr::EllipsisLiteral(_) => "'...' is",
                    _ => "this expression is",
                };
                self.unsupported(what, other.range());
                Self::placeholder(range)
            }
        }
    }

    fn lower_comp_clauses(&mut self, generators: Vec<ast::Comprehension>) -> Vec<CompClause> {
        let mut clauses = Vec::new();
        for generator in generators {
            if generator.is_async {
                self.unsupported("async comprehensions are", generator.range());
                continue;
            }
            if let Some(target) = self.lower_target(generator.target) {
                let iter = self.lower_expr(generator.iter);
                clauses.push(CompClause::For { target, iter });
            }
            for test in generator.ifs {
                clauses.push(CompClause::If(self.lower_expr(test)));
            }
        }
        clauses
    }

    /// With escape restriction on, only the approved escape sequences may
    /// appear in a string literal's raw text.
    fn check_string_escapes(&mut self, range: TextRange) {
        if !self.options.restrict_string_escapes {
            return;
        }
        let Some(raw) = self
            .source
            .get(range.start().to_u32() as usize..range.end().to_u32() as usize)
        else {
            return;
        };
        if raw.starts_with('r') || raw.starts_with('R') {
            return;
        }
        let bytes = raw.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 1 < bytes.len() {
                let next = bytes[i + 1];
                let allowed = matches!(
                    next,
                    b'n' | b't'
                        | b'r'
                        | b'\\'
                        | b'\''
                        | b'"'
                        | b'x'
                        | b'u'
                        | b'U'
                        | b'a'
                        | b'b'
                        | b'f'
                        | b'v'
                        | b'0'..=b'7'
                        | b'\n'
                );
                if !allowed {
                    self.error(
                        format!(
                            "invalid escape sequence '\\{}' (file restricts string escapes)",
                            char::from(next)
                        ),
                        range,
                    );
                    return;
                }
                i += 2;
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_never_throws_and_collects_errors() {
        let parsed = parse("x = (", "bad.bzl", FileOptions::default());
        assert!(parsed.has_errors());
        assert_eq!(parsed.errors[0].kind, ErrorKind::Syntax);
    }

    #[test]
    fn load_statement_is_lowered() {
        let parsed = parse(
            "load(\"//pkg:a.bzl\", \"x\", y = \"z\")\n",
            "b.bzl",
            FileOptions::default(),
        );
        assert!(!parsed.has_errors());
        let loads: Vec<_> = parsed.loads().collect();
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].module, "//pkg:a.bzl");
        assert_eq!(loads[0].bindings.len(), 2);
        assert_eq!(&*loads[0].bindings[0].local.name, "x");
        assert_eq!(loads[0].bindings[0].original, "x");
        assert_eq!(&*loads[0].bindings[1].local.name, "y");
        assert_eq!(loads[0].bindings[1].original, "z");
    }

    #[test]
    fn python_only_constructs_are_rejected_without_aborting() {
        let source = "class C: pass\nx = 1\nwhile True: pass\n";
        let parsed = parse(source, "t.bzl", FileOptions::default());
        assert_eq!(parsed.errors.len(), 2);
        // The assignment between the two rejected statements survives.
        assert_eq!(parsed.statements.len(), 1);
    }

    #[test]
    fn line_table_resolves_positions() {
        let info = FileInfo::new("t.bzl", "a = 1\nbb = 2\n");
        let loc = info.loc(6);
        assert_eq!((loc.line, loc.column), (2, 1));
        let loc = info.loc(9);
        assert_eq!((loc.line, loc.column), (2, 4));
    }

    #[test]
    fn restricted_escapes_are_flagged() {
        let options = FileOptions {
            restrict_string_escapes: true,
            ..Default::default()
        };
        let parsed = parse("x = \"a\\pb\"\n", "t.bzl", options);
        assert!(parsed.has_errors());
        let parsed = parse("x = \"a\\nb\"\n", "t.bzl", options);
        assert!(!parsed.has_errors());
    }
}
