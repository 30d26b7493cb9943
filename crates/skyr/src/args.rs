use std::fmt::Write;
use std::sync::Arc;

use ahash::AHashSet;

use crate::errors::{EvalError, EvalResult};
use crate::value::Value;

/// Fully evaluated call-site arguments, after `*` and `**` expansion.
///
/// Positional arguments are evaluated left to right with any `*expr` expanded
/// in place; keyword arguments likewise with `**expr`. The same shape is fed
/// to script-defined functions, host callables and provider constructors, so
/// the call protocol is uniform.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    pub positional: Vec<Value>,
    pub named: Vec<(Arc<str>, Value)>,
}

impl CallArgs {
    pub fn positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: Vec::new(),
        }
    }

    /// Detects duplicate keyword names across all sources (plain keywords and
    /// `**` expansions) and reports every duplicate in one error.
    pub fn check_duplicate_named(&self, callee: &str) -> EvalResult<()> {
        let mut seen: AHashSet<&str> = AHashSet::with_capacity(self.named.len());
        let mut duplicates: Vec<&str> = Vec::new();
        for (name, _) in &self.named {
            if !seen.insert(name.as_ref()) && !duplicates.contains(&name.as_ref()) {
                duplicates.push(name.as_ref());
            }
        }
        if duplicates.is_empty() {
            return Ok(());
        }
        let mut message = format!("{callee}() got multiple values for keyword argument");
        if duplicates.len() > 1 {
            message.push('s');
        }
        for (i, name) in duplicates.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            let _ = write!(message, "{sep}'{name}'");
        }
        Err(EvalError::type_error(message))
    }
}

/// Renders a name list for "missing parameter" / "unexpected keyword" errors.
pub(crate) fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (i, name) in names.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "'{name}'");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_named_lists_every_duplicate_once() {
        let args = CallArgs {
            positional: vec![],
            named: vec![
                ("a".into(), Value::Int(1)),
                ("b".into(), Value::Int(2)),
                ("a".into(), Value::Int(3)),
                ("b".into(), Value::Int(4)),
                ("a".into(), Value::Int(5)),
            ],
        };
        let err = args.check_duplicate_named("f").unwrap_err();
        assert_eq!(
            err.message,
            "f() got multiple values for keyword arguments 'a','b'"
        );
    }

    #[test]
    fn no_duplicates_is_ok() {
        let args = CallArgs {
            positional: vec![],
            named: vec![("a".into(), Value::Int(1))],
        };
        assert!(args.check_duplicate_named("f").is_ok());
    }
}
