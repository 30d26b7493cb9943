use std::fmt::{self, Display, Write};

use strum::{Display as StrumDisplay, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce an evaluation error.
pub type EvalResult<T> = Result<T, EvalError>;

/// Stable machine-readable error kinds.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `LoadCycle` -> "LoadCycle") and is part of the public surface: drivers
/// print it next to the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Scanner or parser failure. Attached to the parsed file, never thrown.
    Syntax,
    /// Resolver rejection: reference before assignment, reassigning a universe
    /// name, disallowed `load`, illegal signature or assignment target.
    Resolve,
    /// Reference to a name (or field/method of a value) not in scope at
    /// evaluation time. Carries a "did you mean" suggestion when one is close.
    Name,
    /// Operator or method applied to the wrong types; unhashable key;
    /// non-iterable `*`/`for`/`in` operand; bad call arguments.
    Type,
    /// Well-typed but invalid value: empty assignment target list, duplicate
    /// literal dict key, slice step zero, invalid format string.
    Value,
    /// Out-of-range sequence index.
    Index,
    /// Integer overflow, division or modulo by zero, negative shift count.
    Arithmetic,
    /// Mutation of a value whose scope is frozen, or from a foreign scope.
    Immutable,
    /// Structural change to a container while it is being iterated.
    ConcurrentModification,
    /// A script-defined function appeared twice on the dynamic call stack.
    Recursion,
    /// Cooperative cancellation between statements.
    Interrupted,
    /// Filesystem collaborator failure, surfaced by the loader verbatim.
    Io,
    /// Cyclic `load` graph; the message lists the cycle path in source order.
    LoadCycle,
    /// `load` target has no backing file or no containing package.
    LoadMissing,
    /// A loaded extension itself failed with any other kind.
    LoadFailed,
}

/// A resolved source position: file name plus 1-based line and column.
///
/// Positions are computed lazily from byte offsets via the parsed file's line
/// table; by the time an error escapes to a caller it carries `CodeLoc`s only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLoc {
    pub file: std::sync::Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One call-site frame accumulated while an error unwinds through `call`
/// boundaries. The innermost frame is pushed first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Name of the function being called at this site.
    pub function: String,
    /// Location of the call expression.
    pub loc: CodeLoc,
}

/// An evaluation error: a kind, a message, the primary location, and the
/// call-site chain collected during unwinding.
///
/// Errors propagate up the evaluation stack unchanged in kind; every call
/// boundary appends one [`Frame`]. The outermost handler turns this into the
/// user-visible location chain + kind identifier + message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    /// Primary source location. `None` only for errors raised outside any
    /// source context (e.g. collaborator I/O before parsing).
    pub loc: Option<CodeLoc>,
    /// Enclosing call-site locations, innermost first.
    pub frames: Vec<Frame>,
}

impl EvalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
            frames: Vec::new(),
        }
    }

    /// Attaches the primary location if none is set yet.
    ///
    /// Errors are created deep inside operators without position information;
    /// the evaluator pins the innermost expression position on the way out.
    #[must_use]
    pub fn with_loc(mut self, loc: CodeLoc) -> Self {
        if self.loc.is_none() {
            self.loc = Some(loc);
        }
        self
    }

    /// Appends a call-site frame while unwinding through a `call` boundary.
    #[must_use]
    pub fn with_frame(mut self, function: impl Into<String>, loc: CodeLoc) -> Self {
        self.frames.push(Frame {
            function: function.into(),
            loc,
        });
        self
    }

    /// The stable textual identifier of the kind, e.g. `"ConcurrentModification"`.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind.into()
    }
}

impl Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.kind, self.message)?;
        if let Some(loc) = &self.loc {
            write!(f, "\n  --> {loc}")?;
        }
        for frame in &self.frames {
            write!(f, "\n  in call to {} from {}", frame.function, frame.loc)?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}

impl ErrorKind {
    /// Creates an error of this kind with the given message.
    pub fn err(self, message: impl Into<String>) -> EvalError {
        EvalError::new(self, message)
    }
}

// Constructor helpers for the messages that recur throughout the interpreter.
// Centralising them keeps wording consistent between operators, methods and
// builtins.
impl EvalError {
    pub fn type_error(message: impl Into<String>) -> Self {
        ErrorKind::Type.err(message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        ErrorKind::Value.err(message)
    }

    pub fn unsupported_binary_op(op: &str, left: &str, right: &str) -> Self {
        ErrorKind::Type.err(format!(
            "unsupported binary operation: {left} {op} {right}"
        ))
    }

    pub fn unsupported_unary_op(op: &str, operand: &str) -> Self {
        ErrorKind::Type.err(format!("unsupported unary operation: {op}{operand}"))
    }

    pub fn unhashable(type_name: &str) -> Self {
        ErrorKind::Type.err(format!("unhashable type: '{type_name}'"))
    }

    pub fn not_iterable(type_name: &str) -> Self {
        ErrorKind::Type.err(format!("type '{type_name}' is not iterable"))
    }

    pub fn division_by_zero() -> Self {
        ErrorKind::Arithmetic.err("integer division or modulo by zero")
    }

    pub fn integer_overflow(op: &str) -> Self {
        ErrorKind::Arithmetic.err(format!("integer overflow in {op}"))
    }

    pub fn immutable(what: &str) -> Self {
        ErrorKind::Immutable.err(format!("cannot mutate frozen {what}"))
    }

    pub fn foreign_scope(what: &str) -> Self {
        ErrorKind::Immutable.err(format!(
            "cannot mutate {what} owned by a different mutation scope"
        ))
    }

    pub fn concurrent_modification(what: &str) -> Self {
        ErrorKind::ConcurrentModification.err(format!("{what} mutated during iteration"))
    }

    pub fn index_out_of_range(index: i32, len: usize) -> Self {
        ErrorKind::Index.err(format!(
            "index out of range (index is {index}, but sequence is {len} items long)"
        ))
    }

    /// `Name` error for an unresolved variable, with a "did you mean"
    /// suggestion computed by edit distance over the names in scope.
    pub fn unknown_name<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Self {
        let mut message = format!("name '{name}' is not defined");
        if let Some(suggestion) = did_you_mean(name, candidates) {
            let _ = write!(message, " (did you mean '{suggestion}'?)");
        }
        ErrorKind::Name.err(message)
    }

    /// `Name` error for a missing field or method on a value, with a
    /// suggestion over the type's known fields and methods.
    pub fn unknown_attr<'a>(
        type_name: &str,
        attr: &str,
        candidates: impl Iterator<Item = &'a str>,
    ) -> Self {
        let mut message = format!("'{type_name}' value has no field or method '{attr}'");
        if let Some(suggestion) = did_you_mean(attr, candidates) {
            let _ = write!(message, " (did you mean '{suggestion}'?)");
        }
        ErrorKind::Name.err(message)
    }
}

/// Picks the candidate closest to `name` by Levenshtein distance, if any is
/// close enough to plausibly be a typo (distance <= 1 + len/4, and never more
/// than half the name away).
pub(crate) fn did_you_mean<'a>(
    name: &str,
    candidates: impl Iterator<Item = &'a str>,
) -> Option<String> {
    let budget = 1 + name.len() / 4;
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        if candidate == name {
            continue;
        }
        let dist = edit_distance(name, candidate);
        if dist <= budget && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, c)| c.to_owned())
}

/// Classic two-row Levenshtein distance over bytes.
fn edit_distance(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Error from the filesystem collaborator.
///
/// The loader surfaces these verbatim with kind [`ErrorKind::Io`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum IoError {
    #[error("no such file: {path}")]
    NotFound { path: String },
    #[error("{path}: {message}")]
    Other { path: String, message: String },
}

impl IoError {
    /// Converts into an evaluation error of kind `Io`.
    #[must_use]
    pub fn into_eval(self) -> EvalError {
        ErrorKind::Io.err(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(ErrorKind::ConcurrentModification.to_string(), "ConcurrentModification");
        let name: &'static str = ErrorKind::LoadCycle.into();
        assert_eq!(name, "LoadCycle");
    }

    #[test]
    fn did_you_mean_picks_closest() {
        let candidates = ["append", "extend", "index"];
        assert_eq!(
            did_you_mean("appen", candidates.iter().copied()),
            Some("append".to_owned())
        );
        assert_eq!(did_you_mean("zzzzzz", candidates.iter().copied()), None);
    }

    #[test]
    fn display_includes_kind_location_and_frames() {
        let loc = CodeLoc {
            file: "pkg/a.bzl".into(),
            line: 3,
            column: 7,
        };
        let err = EvalError::type_error("bad operand")
            .with_loc(loc.clone())
            .with_frame("f", CodeLoc {
                file: "pkg/b.bzl".into(),
                line: 1,
                column: 1,
            });
        let rendered = err.to_string();
        assert!(rendered.contains("error[Type]: bad operand"));
        assert!(rendered.contains("pkg/a.bzl:3:7"));
        assert!(rendered.contains("in call to f from pkg/b.bzl:1:1"));
    }
}
