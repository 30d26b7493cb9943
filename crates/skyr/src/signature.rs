//! Function signature representation and the argument-binding algorithm for
//! script-defined functions.

use std::sync::Arc;

use crate::args::{CallArgs, join_names};
use crate::errors::{EvalError, EvalResult};
use crate::expressions::{ParamDecl, ParamKind};
use crate::scope::Scope;
use crate::types::Dict;
use crate::value::Value;

#[derive(Debug, Clone)]
pub(crate) struct ParamInfo {
    pub name: Arc<str>,
    pub has_default: bool,
}

/// A script function's signature.
///
/// Slot layout matches the resolver's local-slot allocation:
///
/// ```text
/// [positional...][*args?][named-only...][**kwargs?]
/// ```
///
/// Mandatory named-only parameters are rejected by the resolver, so every
/// entry of `named_only` has a default. The `defaults` array a function
/// carries is aligned to the parameters with defaults, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub(crate) positional: Vec<ParamInfo>,
    pub(crate) has_args: bool,
    pub(crate) named_only: Vec<ParamInfo>,
    pub(crate) has_kwargs: bool,
}

impl Signature {
    /// Builds the signature from declared parameters. Validity (ordering,
    /// uniqueness, mandatory named-only) was checked by the resolver.
    #[must_use]
    pub fn from_params(params: &[ParamDecl]) -> Self {
        let mut signature = Self::default();
        let mut after_star = false;
        for param in params {
            match param.kind {
                ParamKind::Normal => {
                    let info = ParamInfo {
                        name: Arc::clone(&param.name.name),
                        has_default: param.default.is_some(),
                    };
                    if after_star {
                        signature.named_only.push(info);
                    } else {
                        signature.positional.push(info);
                    }
                }
                ParamKind::Star => after_star = true,
                ParamKind::Args => {
                    signature.has_args = true;
                    after_star = true;
                }
                ParamKind::Kwargs => signature.has_kwargs = true,
            }
        }
        signature
    }

    /// Number of frame slots the bound arguments occupy.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.positional.len()
            + usize::from(self.has_args)
            + self.named_only.len()
            + usize::from(self.has_kwargs)
    }

    /// Binds evaluated arguments to parameter slots.
    ///
    /// Implements the uniform call protocol: positional matching, duplicate
    /// positional+named detection, default application, `*args`/`**kwargs`
    /// routing, and full-name reporting of missing and unexpected parameters.
    /// Duplicate keyword names across sources were already rejected by
    /// [`CallArgs::check_duplicate_named`].
    pub(crate) fn bind(
        &self,
        callee: &str,
        args: CallArgs,
        defaults: &[Value],
        scope: &Scope,
    ) -> EvalResult<Vec<Value>> {
        let named_count = self.positional.len() + self.named_only.len();
        let mut slots: Vec<Option<Value>> = vec![None; named_count];
        let mut extra_positional: Vec<Value> = Vec::new();

        let total_positional = args.positional.len();
        for (i, value) in args.positional.into_iter().enumerate() {
            if i < self.positional.len() {
                slots[i] = Some(value);
            } else if self.has_args {
                extra_positional.push(value);
            } else {
                return Err(EvalError::type_error(format!(
                    "{callee}() accepts no more than {} positional argument{} (got {total_positional})",
                    self.positional.len(),
                    if self.positional.len() == 1 { "" } else { "s" },
                )));
            }
        }

        let mut extra_named: Vec<(Arc<str>, Value)> = Vec::new();
        let mut unexpected: Vec<Arc<str>> = Vec::new();
        for (name, value) in args.named {
            let index = self
                .positional
                .iter()
                .chain(&self.named_only)
                .position(|p| p.name.as_ref() == name.as_ref());
            match index {
                Some(index) => {
                    if slots[index].is_some() {
                        return Err(EvalError::type_error(format!(
                            "{callee}() got multiple values for parameter '{name}'"
                        )));
                    }
                    slots[index] = Some(value);
                }
                None if self.has_kwargs => extra_named.push((name, value)),
                None => unexpected.push(name),
            }
        }
        if !unexpected.is_empty() {
            return Err(EvalError::type_error(format!(
                "{callee}() got unexpected keyword argument{}: {}",
                if unexpected.len() == 1 { "" } else { "s" },
                join_names(unexpected.iter().map(AsRef::as_ref)),
            )));
        }

        // Defaults are aligned to the defaulted parameters in declaration
        // order: positional defaults first, then named-only defaults.
        let mut default_iter = defaults.iter();
        let mut missing: Vec<Arc<str>> = Vec::new();
        for (index, param) in self.positional.iter().chain(&self.named_only).enumerate() {
            if param.has_default {
                let default = default_iter
                    .next()
                    .expect("defaults aligned to defaulted parameters");
                if slots[index].is_none() {
                    slots[index] = Some(default.clone());
                }
            } else if slots[index].is_none() {
                missing.push(Arc::clone(&param.name));
            }
        }
        if !missing.is_empty() {
            return Err(EvalError::type_error(format!(
                "{callee}() missing mandatory parameter{}: {}",
                if missing.len() == 1 { "" } else { "s" },
                join_names(missing.iter().map(AsRef::as_ref)),
            )));
        }

        // Assemble in slot order.
        let mut bound = Vec::with_capacity(self.slot_count());
        let mut slot_iter = slots.into_iter();
        for _ in 0..self.positional.len() {
            bound.push(slot_iter.next().expect("positional slot").expect("filled"));
        }
        if self.has_args {
            bound.push(Value::Tuple(extra_positional.into()));
        }
        for _ in 0..self.named_only.len() {
            bound.push(slot_iter.next().expect("named-only slot").expect("filled"));
        }
        if self.has_kwargs {
            let pairs = extra_named
                .into_iter()
                .map(|(name, value)| (Value::Str(name), value))
                .collect();
            let dict = Dict::from_pairs(pairs, scope.clone())?;
            bound.push(Value::Dict(Arc::new(dict)));
        }
        Ok(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::expressions::{ExprLoc, Identifier, Literal};
    use crate::parse::Span;

    fn param(name: &str, kind: ParamKind, default: bool) -> ParamDecl {
        ParamDecl {
            kind,
            name: Identifier::new(name, Span::default()),
            default: default.then(|| {
                ExprLoc::new(
                    Span::default(),
                    crate::expressions::Expr::Literal(Literal::None),
                )
            }),
        }
    }

    fn call(positional: Vec<Value>, named: Vec<(&str, Value)>) -> CallArgs {
        CallArgs {
            positional,
            named: named.into_iter().map(|(n, v)| (Arc::from(n), v)).collect(),
        }
    }

    #[test]
    fn binds_positional_defaults_and_kwargs() {
        // def f(a, b = 9, *args, c = 7, **kw)
        let signature = Signature::from_params(&[
            param("a", ParamKind::Normal, false),
            param("b", ParamKind::Normal, true),
            param("args", ParamKind::Args, false),
            param("c", ParamKind::Normal, true),
            param("kw", ParamKind::Kwargs, false),
        ]);
        assert_eq!(signature.slot_count(), 5);

        let scope = Scope::new();
        let defaults = [Value::Int(9), Value::Int(7)];
        let bound = signature
            .bind(
                "f",
                call(
                    vec![Value::Int(1), Value::Int(2), Value::Int(3)],
                    vec![("z", Value::Int(4))],
                ),
                &defaults,
                &scope,
            )
            .unwrap();
        assert!(bound[0].equals(&Value::Int(1)));
        assert!(bound[1].equals(&Value::Int(2)));
        assert!(bound[2].equals(&Value::tuple(vec![Value::Int(3)])));
        assert!(bound[3].equals(&Value::Int(7)));
        let Value::Dict(kw) = &bound[4] else {
            panic!("expected dict");
        };
        assert!(
            kw.get(&Value::string("z"))
                .unwrap()
                .unwrap()
                .equals(&Value::Int(4))
        );
    }

    #[test]
    fn positional_and_named_for_same_parameter_fails() {
        let signature = Signature::from_params(&[param("a", ParamKind::Normal, false)]);
        let err = signature
            .bind(
                "f",
                call(vec![Value::Int(1)], vec![("a", Value::Int(2))]),
                &[],
                &Scope::new(),
            )
            .unwrap_err();
        assert!(err.message.contains("multiple values for parameter 'a'"));
    }

    #[test]
    fn missing_and_unexpected_are_reported_by_name() {
        let signature = Signature::from_params(&[
            param("a", ParamKind::Normal, false),
            param("b", ParamKind::Normal, false),
        ]);
        let err = signature
            .bind("f", call(vec![], vec![]), &[], &Scope::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("missing mandatory parameters: 'a', 'b'"));

        let err = signature
            .bind(
                "f",
                call(
                    vec![Value::Int(1), Value::Int(2)],
                    vec![("x", Value::Int(3)), ("y", Value::Int(4))],
                ),
                &[],
                &Scope::new(),
            )
            .unwrap_err();
        assert!(
            err.message
                .contains("unexpected keyword arguments: 'x', 'y'")
        );
    }

    #[test]
    fn excess_positional_without_star_fails() {
        let signature = Signature::from_params(&[param("a", ParamKind::Normal, false)]);
        let err = signature
            .bind(
                "f",
                call(vec![Value::Int(1), Value::Int(2)], vec![]),
                &[],
                &Scope::new(),
            )
            .unwrap_err();
        assert!(err.message.contains("accepts no more than 1 positional argument"));
    }
}
