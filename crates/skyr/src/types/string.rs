//! The string method "module".
//!
//! String receivers dispatch through a dedicated table whose descriptors all
//! take the string itself as the first positional argument; attribute access
//! on a string inserts the receiver in front of the caller's arguments.

use std::fmt::Write;
use std::sync::Arc;

use crate::errors::{EvalError, EvalResult};
use crate::methods::{
    CallCtx, DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint, take_args,
};
use crate::scope::Scope;
use crate::value::{Value, one_byte_str};

pub(crate) fn methods() -> Vec<MethodDescriptor> {
    let self_param = || ParamSpec::required("self", TypeConstraint::Str);
    let sub = || ParamSpec::required("sub", TypeConstraint::Str);
    vec![
        MethodDescriptor::method("startswith", startswith).params(vec![self_param(), sub()]),
        MethodDescriptor::method("endswith", endswith).params(vec![self_param(), sub()]),
        MethodDescriptor::method("join", join)
            .params(vec![self_param(), ParamSpec::required("elements", TypeConstraint::Iterable)]),
        MethodDescriptor::method("split", split).params(vec![
            self_param(),
            ParamSpec::optional("sep", TypeConstraint::StrOrNone, DefaultSpec::None),
            ParamSpec::optional("maxsplit", TypeConstraint::IntOrNone, DefaultSpec::None),
        ]),
        MethodDescriptor::method("rsplit", rsplit).params(vec![
            self_param(),
            ParamSpec::optional("sep", TypeConstraint::StrOrNone, DefaultSpec::None),
            ParamSpec::optional("maxsplit", TypeConstraint::IntOrNone, DefaultSpec::None),
        ]),
        MethodDescriptor::method("strip", strip).params(vec![
            self_param(),
            ParamSpec::optional("chars", TypeConstraint::StrOrNone, DefaultSpec::None),
        ]),
        MethodDescriptor::method("lstrip", lstrip).params(vec![
            self_param(),
            ParamSpec::optional("chars", TypeConstraint::StrOrNone, DefaultSpec::None),
        ]),
        MethodDescriptor::method("rstrip", rstrip).params(vec![
            self_param(),
            ParamSpec::optional("chars", TypeConstraint::StrOrNone, DefaultSpec::None),
        ]),
        MethodDescriptor::method("upper", upper).params(vec![self_param()]),
        MethodDescriptor::method("lower", lower).params(vec![self_param()]),
        MethodDescriptor::method("capitalize", capitalize).params(vec![self_param()]),
        MethodDescriptor::method("replace", replace)
            .params(vec![self_param(), ParamSpec::required("old", TypeConstraint::Str), ParamSpec::required("new", TypeConstraint::Str)]),
        MethodDescriptor::method("find", find).params(vec![self_param(), sub()]),
        MethodDescriptor::method("rfind", rfind).params(vec![self_param(), sub()]),
        MethodDescriptor::method("index", index).params(vec![self_param(), sub()]),
        MethodDescriptor::method("count", count).params(vec![self_param(), sub()]),
        MethodDescriptor::method("elems", elems).params(vec![self_param()]),
    ]
}

fn str_of(value: &Value) -> Arc<str> {
    match value {
        Value::Str(s) => Arc::clone(s),
        _ => unreachable!("binder enforced the string constraint"),
    }
}

fn opt_str(value: &Value) -> Option<Arc<str>> {
    match value {
        Value::Str(s) => Some(Arc::clone(s)),
        _ => None,
    }
}

fn opt_int(value: &Value) -> Option<i32> {
    match value {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

fn startswith(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, sub] = take_args(args);
    Ok(Value::Bool(str_of(&receiver).starts_with(&*str_of(&sub))))
}

fn endswith(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, sub] = take_args(args);
    Ok(Value::Bool(str_of(&receiver).ends_with(&*str_of(&sub))))
}

fn join(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, elements] = take_args(args);
    let sep = str_of(&receiver);
    let mut out = String::new();
    for (i, item) in elements.iterate()?.enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        match item {
            Value::Str(s) => out.push_str(&s),
            other => {
                return Err(EvalError::type_error(format!(
                    "join() requires string elements, got '{}'",
                    other.type_name()
                )));
            }
        }
    }
    Ok(Value::string(out))
}

fn split_impl(args: Vec<Value>, from_right: bool, scope: &Scope) -> EvalResult<Value> {
    let [receiver, sep, maxsplit] = take_args(args);
    let receiver = str_of(&receiver);
    let limit = match opt_int(&maxsplit) {
        Some(limit) if limit < 0 => None,
        Some(limit) => Some(limit as usize),
        None => None,
    };
    let pieces: Vec<&str> = match (opt_str(&sep), limit) {
        (Some(sep), None) => {
            if sep.is_empty() {
                return Err(EvalError::value_error("empty separator"));
            }
            receiver.split(&*sep).collect()
        }
        (Some(sep), Some(limit)) => {
            if sep.is_empty() {
                return Err(EvalError::value_error("empty separator"));
            }
            if from_right {
                let mut pieces: Vec<&str> = receiver.rsplitn(limit + 1, &*sep).collect();
                pieces.reverse();
                pieces
            } else {
                receiver.splitn(limit + 1, &*sep).collect()
            }
        }
        (None, _) => receiver.split_whitespace().collect(),
    };
    let items: Vec<Value> = pieces
        .into_iter()
        .map(|p| Value::string(p.to_owned()))
        .collect();
    Ok(Value::List(Arc::new(crate::types::List::new(
        items,
        scope.clone(),
    ))))
}

fn split(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    split_impl(args, false, ctx.scope)
}

fn rsplit(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    split_impl(args, true, ctx.scope)
}

fn strip_impl(args: Vec<Value>, left: bool, right: bool) -> EvalResult<Value> {
    let [receiver, chars] = take_args(args);
    let receiver = str_of(&receiver);
    let result = match opt_str(&chars) {
        Some(chars) => {
            let set: Vec<char> = chars.chars().collect();
            let matcher = |c: char| set.contains(&c);
            match (left, right) {
                (true, true) => receiver.trim_matches(matcher),
                (true, false) => receiver.trim_start_matches(matcher),
                (false, true) => receiver.trim_end_matches(matcher),
                (false, false) => &*receiver,
            }
        }
        None => match (left, right) {
            (true, true) => receiver.trim(),
            (true, false) => receiver.trim_start(),
            (false, true) => receiver.trim_end(),
            (false, false) => &*receiver,
        },
    };
    Ok(Value::string(result.to_owned()))
}

fn strip(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    strip_impl(args, true, true)
}

fn lstrip(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    strip_impl(args, true, false)
}

fn rstrip(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    strip_impl(args, false, true)
}

fn upper(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver] = take_args(args);
    Ok(Value::string(str_of(&receiver).to_uppercase()))
}

fn lower(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver] = take_args(args);
    Ok(Value::string(str_of(&receiver).to_lowercase()))
}

fn capitalize(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver] = take_args(args);
    let receiver = str_of(&receiver);
    let mut chars = receiver.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    Ok(Value::string(capitalized))
}

fn replace(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, old, new] = take_args(args);
    let old = str_of(&old);
    if old.is_empty() {
        return Err(EvalError::value_error("empty pattern in replace()"));
    }
    Ok(Value::string(
        str_of(&receiver).replace(&*old, &str_of(&new)),
    ))
}

fn find_at(receiver: &str, sub: &str, from_right: bool) -> i32 {
    let found = if from_right {
        receiver.rfind(sub)
    } else {
        receiver.find(sub)
    };
    found.map_or(-1, |at| at as i32)
}

fn find(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, sub] = take_args(args);
    Ok(Value::Int(find_at(&str_of(&receiver), &str_of(&sub), false)))
}

fn rfind(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, sub] = take_args(args);
    Ok(Value::Int(find_at(&str_of(&receiver), &str_of(&sub), true)))
}

fn index(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, sub] = take_args(args);
    let sub = str_of(&sub);
    match str_of(&receiver).find(&*sub) {
        Some(at) => Ok(Value::Int(at as i32)),
        None => Err(EvalError::value_error(format!(
            "substring {} not found",
            Value::Str(sub).repr()
        ))),
    }
}

fn count(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver, sub] = take_args(args);
    let sub = str_of(&sub);
    if sub.is_empty() {
        return Err(EvalError::value_error("empty substring in count()"));
    }
    Ok(Value::Int(
        str_of(&receiver).matches(&*sub).count() as i32
    ))
}

/// `"abc".elems()` -> a list of one-byte strings, in the caller's scope.
fn elems(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [receiver] = take_args(args);
    let items: Vec<Value> = str_of(&receiver)
        .as_bytes()
        .iter()
        .map(|&b| Value::string(one_byte_str(b)))
        .collect();
    Ok(Value::List(Arc::new(crate::types::List::new(
        items,
        ctx.scope.clone(),
    ))))
}

/// `%`-formatting: `%s`, `%r`, `%d`, `%%`, with positional expansion when the
/// right operand is a tuple. Any other right operand (a dict included)
/// formats as a single value.
pub(crate) fn percent_format(format: &str, right: &Value) -> EvalResult<String> {
    let singleton = [right.clone()];
    let args: &[Value] = match right {
        Value::Tuple(items) => items,
        _ => &singleton,
    };
    let mut next = 0usize;
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(spec) = chars.next() else {
            return Err(EvalError::value_error(
                "incomplete format specifier at end of string",
            ));
        };
        if spec == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.get(next) else {
            return Err(EvalError::value_error(format!(
                "not enough arguments for format string (need more than {next})"
            )));
        };
        next += 1;
        match spec {
            's' => out.push_str(&arg.to_display()),
            'r' => {
                let mut seen = ahash::AHashSet::new();
                let _ = arg.repr_into(&mut out, &mut seen);
            }
            'd' => match arg {
                Value::Int(i) => {
                    let _ = write!(out, "{i}");
                }
                Value::Bool(b) => {
                    let _ = write!(out, "{}", i32::from(*b));
                }
                other => {
                    return Err(EvalError::value_error(format!(
                        "%d format: an int is required, not '{}'",
                        other.type_name()
                    )));
                }
            },
            other => {
                return Err(EvalError::value_error(format!(
                    "unsupported format character '{other}'"
                )));
            }
        }
    }
    if next < args.len() && matches!(right, Value::Tuple(_)) {
        return Err(EvalError::value_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn percent_format_tuple_expansion() {
        let result = percent_format(
            "%s-%r-%d",
            &Value::tuple(vec![
                Value::string("a"),
                Value::string("b"),
                Value::Int(7),
            ]),
        )
        .unwrap();
        assert_eq!(result, "a-\"b\"-7");
    }

    #[test]
    fn percent_format_dict_is_single_value() {
        let scope = crate::scope::Scope::new();
        let dict = crate::types::Dict::from_literal(
            vec![(Value::Int(1), Value::Int(2))],
            scope,
        )
        .unwrap();
        let result = percent_format("%s", &Value::Dict(Arc::new(dict))).unwrap();
        assert_eq!(result, "{1: 2}");
    }

    #[test]
    fn percent_format_errors() {
        let err = percent_format("%s %s", &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        let err = percent_format("%q", &Value::Int(1)).unwrap_err();
        assert!(err.message.contains("unsupported format character 'q'"));
        let err =
            percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).unwrap_err();
        assert!(err.message.contains("not all arguments converted"));
    }
}
