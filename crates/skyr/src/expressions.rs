use std::sync::Arc;

use crate::parse::Span;

/// Which namespace an identifier use refers to.
///
/// Determined by the resolver:
/// - names assigned inside a function body are Local and get a frame slot
/// - names bound at the top level of the file (including loaded bindings)
///   are Module
/// - predeclared names are Universe
/// - anything else stays Unresolved; the resolver reports it and evaluation
///   fails with a `Name` error if the use is ever reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Binding {
    #[default]
    Unresolved,
    /// Slot index in the enclosing function frame.
    Local(u32),
    Module,
    Universe,
}

/// An identifier use with its source span and resolved binding.
#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: Arc<str>,
    pub span: Span,
    /// Filled in by the resolver; `Unresolved` straight out of the parser.
    pub binding: Binding,
}

impl Identifier {
    pub fn new(name: impl Into<Arc<str>>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            binding: Binding::Unresolved,
        }
    }
}

/// A statement with its source span.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `load("//pkg:file.bzl", "a", b = "c")`, top level only.
    Load(LoadStmt),
    Assign {
        target: AssignTarget,
        value: ExprLoc,
    },
    /// `x += e` and friends. The resolver restricts targets to names and
    /// index expressions.
    AugAssign {
        target: AssignTarget,
        op: BinOp,
        value: ExprLoc,
    },
    Def(Box<DefStmt>),
    If {
        test: ExprLoc,
        body: Vec<Stmt>,
        or_else: Vec<Stmt>,
    },
    For {
        target: AssignTarget,
        iter: ExprLoc,
        body: Vec<Stmt>,
    },
    Return {
        value: Option<ExprLoc>,
    },
    Break,
    Continue,
    Pass,
    Expr(ExprLoc),
}

/// One `load` statement: the module string plus the imported bindings.
#[derive(Debug, Clone)]
pub struct LoadStmt {
    pub module: String,
    pub module_span: Span,
    pub bindings: Vec<LoadBinding>,
}

/// One imported binding: the local name it binds to and the original
/// exported name in the loaded extension (they differ for `b = "c"` renames).
#[derive(Debug, Clone)]
pub struct LoadBinding {
    pub local: Identifier,
    pub original: String,
    pub span: Span,
}

/// A function definition.
#[derive(Debug, Clone)]
pub struct DefStmt {
    pub name: Identifier,
    pub params: Vec<ParamDecl>,
    pub body: Vec<Stmt>,
    /// Number of local slots the call frame needs; filled by the resolver.
    pub local_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A plain parameter, positional-or-named before `*`, named-only after.
    Normal,
    /// The bare `*` separator (binds nothing).
    Star,
    /// `*args`.
    Args,
    /// `**kwargs`.
    Kwargs,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub kind: ParamKind,
    pub name: Identifier,
    pub default: Option<ExprLoc>,
}

/// Assignment target, possibly destructuring.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(Identifier),
    Index {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
        span: Span,
    },
    /// `a, b = ...` or `[a, b] = ...`; nests arbitrarily.
    Sequence {
        targets: Vec<AssignTarget>,
        span: Span,
    },
}

impl AssignTarget {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Name(identifier) => identifier.span,
            Self::Index { span, .. } | Self::Sequence { span, .. } => *span,
        }
    }
}

/// An expression with its source span.
#[derive(Debug, Clone)]
pub struct ExprLoc {
    pub span: Span,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(span: Span, expr: Expr) -> Self {
        Self { span, expr }
    }
}

/// Literal values producible by the parser alone.
#[derive(Debug, Clone)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i32),
    Str(Arc<str>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Name(Identifier),
    ListExpr(Vec<ExprLoc>),
    TupleExpr(Vec<ExprLoc>),
    /// Dict literal; duplicate keys are detected at evaluation time.
    DictExpr(Vec<(ExprLoc, ExprLoc)>),
    Unary {
        op: UnaryOp,
        operand: Box<ExprLoc>,
    },
    Binary {
        op: BinOp,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    Compare {
        op: CmpOp,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    /// `and` / `or` with documented short-circuit.
    BoolOp {
        and: bool,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    /// `x if c else y`; only the taken branch is evaluated.
    Cond {
        test: Box<ExprLoc>,
        body: Box<ExprLoc>,
        or_else: Box<ExprLoc>,
    },
    Dot {
        object: Box<ExprLoc>,
        attr: Arc<str>,
        attr_span: Span,
    },
    Index {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    SliceExpr {
        object: Box<ExprLoc>,
        start: Option<Box<ExprLoc>>,
        stop: Option<Box<ExprLoc>>,
        step: Option<Box<ExprLoc>>,
    },
    Call(Box<CallExpr>),
    Comp(Box<Comprehension>),
}

/// A call expression with its arguments in source order.
#[derive(Debug, Clone)]
pub struct CallExpr {
    pub callee: ExprLoc,
    pub args: Vec<CallArg>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum CallArg {
    Positional(ExprLoc),
    Named {
        name: Arc<str>,
        span: Span,
        value: ExprLoc,
    },
    /// `*expr` expanded in place among the positionals.
    Star(ExprLoc),
    /// `**expr` expanded in place among the keywords.
    StarStar(ExprLoc),
}

/// A list or dict comprehension.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub kind: CompKind,
    pub clauses: Vec<CompClause>,
}

#[derive(Debug, Clone)]
pub enum CompKind {
    List(ExprLoc),
    Dict { key: ExprLoc, value: ExprLoc },
}

#[derive(Debug, Clone)]
pub enum CompClause {
    For { target: AssignTarget, iter: ExprLoc },
    If(ExprLoc),
}

impl Comprehension {
    /// All names bound by the comprehension's `for` clauses, in order.
    pub fn bound_names(&self) -> Vec<&Identifier> {
        fn collect<'a>(target: &'a AssignTarget, out: &mut Vec<&'a Identifier>) {
            match target {
                AssignTarget::Name(identifier) => out.push(identifier),
                AssignTarget::Index { .. } => {}
                AssignTarget::Sequence { targets, .. } => {
                    for t in targets {
                        collect(t, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        for clause in &self.clauses {
            if let CompClause::For { target, .. } = clause {
                collect(target, &mut out);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    // `not`
    Not,
    // `-`
    Minus,
    // `+`
    Plus,
    // `~`
    Invert,
}

impl UnaryOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "not ",
            Self::Minus => "-",
            Self::Plus => "+",
            Self::Invert => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // `+`
    Add,
    // `-`
    Sub,
    // `*`
    Mul,
    // `//`
    FloorDiv,
    // `%`
    Percent,
    // `<<`
    LShift,
    // `>>`
    RShift,
    // `|`
    BitOr,
    // `^`
    BitXor,
    // `&`
    BitAnd,
}

impl BinOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::FloorDiv => "//",
            Self::Percent => "%",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
        }
    }
}

/// Comparison operators always produce a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
}
