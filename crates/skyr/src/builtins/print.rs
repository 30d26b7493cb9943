use crate::errors::{ErrorKind, EvalResult};
use crate::methods::{
    CallCtx, DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint, take_args,
};
use crate::value::Value;

pub(super) fn print_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("print", print_impl)
        .params(vec![ParamSpec::optional(
            "sep",
            TypeConstraint::Str,
            DefaultSpec::Str(" "),
        )
        .named_only()])
        .star()
        .wants_thread()
}

fn print_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [sep, rest] = take_args(args);
    let (Value::Str(sep), Value::Tuple(rest)) = (&sep, &rest) else {
        unreachable!("binder enforced parameter shapes");
    };
    let line = rest
        .iter()
        .map(Value::to_display)
        .collect::<Vec<_>>()
        .join(sep);
    if let Some(thread) = ctx.thread.as_deref_mut() {
        thread.print.print_line(&line);
    }
    Ok(Value::None)
}

pub(super) fn fail_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("fail", fail_impl)
        .params(vec![ParamSpec::optional(
            "msg",
            TypeConstraint::Any,
            DefaultSpec::None,
        )])
        .star()
        .wants_location()
}

/// `fail(msg)` aborts evaluation of the current file.
fn fail_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [msg, rest] = take_args(args);
    let Value::Tuple(rest) = &rest else {
        unreachable!("star slot is always a tuple");
    };
    let mut parts: Vec<String> = Vec::with_capacity(1 + rest.len());
    if !matches!(msg, Value::None) {
        parts.push(msg.to_display());
    }
    parts.extend(rest.iter().map(Value::to_display));
    let message = if parts.is_empty() {
        "fail() called".to_owned()
    } else {
        parts.join(" ")
    };
    let mut err = ErrorKind::Value.err(message);
    if let Some(location) = ctx.location.clone() {
        err = err.with_loc(location);
    }
    Err(err)
}
