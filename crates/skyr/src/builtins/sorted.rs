//! Sequence-shaped builtins: `sorted`, `reversed`, `enumerate`, `zip`,
//! `min`, `max`, `all`, `any`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::errors::{EvalError, EvalResult};
use crate::methods::{
    CallCtx, DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint, take_args,
};
use crate::types::List;
use crate::value::Value;

pub(super) fn sorted_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("sorted", sorted_impl)
        .params(vec![
            ParamSpec::required("iterable", TypeConstraint::Iterable),
            ParamSpec::optional("reverse", TypeConstraint::Bool, DefaultSpec::Bool(false))
                .named_only(),
        ])
}

fn sorted_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [iterable, reverse] = take_args(args);
    let mut items: Vec<Value> = iterable.iterate()?.collect();
    let mut first_error: Option<EvalError> = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ordering) => ordering,
        Err(err) => {
            first_error.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = first_error {
        return Err(err);
    }
    if matches!(reverse, Value::Bool(true)) {
        items.reverse();
    }
    Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
}

pub(super) fn reversed_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("reversed", |ctx, args| {
        let [iterable] = take_args(args);
        let mut items: Vec<Value> = iterable.iterate()?.collect();
        items.reverse();
        Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
    })
    .params(vec![ParamSpec::required("iterable", TypeConstraint::Iterable)])
}

pub(super) fn enumerate_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("enumerate", enumerate_impl).params(vec![
        ParamSpec::required("iterable", TypeConstraint::Iterable),
        ParamSpec::optional("start", TypeConstraint::Int, DefaultSpec::Int(0)),
    ])
}

fn enumerate_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [iterable, start] = take_args(args);
    let Value::Int(start) = start else {
        unreachable!("binder enforced the int constraint");
    };
    let items: Vec<Value> = iterable
        .iterate()?
        .enumerate()
        .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i32), item]))
        .collect();
    Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
}

pub(super) fn zip_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("zip", zip_impl).star()
}

/// `zip(a, b, ...)` truncates to the shortest input.
fn zip_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [rest] = take_args(args);
    let Value::Tuple(iterables) = &rest else {
        unreachable!("star slot is always a tuple");
    };
    let mut columns: Vec<Vec<Value>> = Vec::with_capacity(iterables.len());
    for iterable in iterables.iter() {
        columns.push(iterable.iterate()?.collect());
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let items: Vec<Value> = (0..rows)
        .map(|row| Value::tuple(columns.iter().map(|col| col[row].clone()).collect()))
        .collect();
    Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
}

pub(super) fn min_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("min", |_ctx, args| extremum(args, Ordering::Less)).star()
}

pub(super) fn max_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("max", |_ctx, args| extremum(args, Ordering::Greater)).star()
}

/// `min`/`max` over one iterable argument or several plain arguments.
fn extremum(args: Vec<Value>, keep: Ordering) -> EvalResult<Value> {
    let [rest] = take_args(args);
    let Value::Tuple(rest) = &rest else {
        unreachable!("star slot is always a tuple");
    };
    let name = if keep == Ordering::Less { "min" } else { "max" };
    let candidates: Vec<Value> = match rest.len() {
        0 => {
            return Err(EvalError::type_error(format!(
                "{name}() requires at least one argument"
            )));
        }
        1 => rest[0].iterate()?.collect(),
        _ => rest.to_vec(),
    };
    let mut candidates = candidates.into_iter();
    let Some(mut best) = candidates.next() else {
        return Err(EvalError::value_error(format!("{name}() of an empty sequence")));
    };
    for candidate in candidates {
        if candidate.compare(&best)? == keep {
            best = candidate;
        }
    }
    Ok(best)
}

pub(super) fn all_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("all", |_ctx, args| {
        let [iterable] = take_args(args);
        Ok(Value::Bool(iterable.iterate()?.all(|item| item.truth())))
    })
    .params(vec![ParamSpec::required("iterable", TypeConstraint::Iterable)])
}

pub(super) fn any_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("any", |_ctx, args| {
        let [iterable] = take_args(args);
        Ok(Value::Bool(iterable.iterate()?.any(|item| item.truth())))
    })
    .params(vec![ParamSpec::required("iterable", TypeConstraint::Iterable)])
}
