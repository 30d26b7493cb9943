//! The predeclared universe: `True`, `False`, `None`, `len`, `range`, and
//! the rest of the stock builtin functions.

mod len;
mod print;
mod range;
mod sorted;
mod struct_fn;

use std::sync::Arc;

use crate::errors::{EvalError, EvalResult};
use crate::methods::{
    CallCtx, DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint, methods_for, native_value,
    take_args,
};
use crate::module::Universe;
use crate::types::List;
use crate::value::Value;

/// Builds the stock universe for extension files.
///
/// Hosts needing a different predeclared namespace (BUILD vs extension vs
/// workspace files) can start from [`universe_entries`] and add or remove
/// names before constructing their own [`Universe`].
#[must_use]
pub fn standard_universe() -> Arc<Universe> {
    Arc::new(Universe::new(universe_entries()))
}

/// The stock `name -> Value` entries, in display order.
#[must_use]
pub fn universe_entries() -> Vec<(Arc<str>, Value)> {
    let mut entries: Vec<(Arc<str>, Value)> = vec![
        ("True".into(), Value::Bool(true)),
        ("False".into(), Value::Bool(false)),
        ("None".into(), Value::None),
    ];
    let functions = [
        len::descriptor(),
        range::descriptor(),
        bool_descriptor(),
        int_descriptor(),
        str_descriptor(),
        type_descriptor(),
        repr_descriptor(),
        list_descriptor(),
        tuple_descriptor(),
        dict_descriptor(),
        hasattr_descriptor(),
        getattr_descriptor(),
        dir_descriptor(),
        sorted::sorted_descriptor(),
        sorted::reversed_descriptor(),
        sorted::enumerate_descriptor(),
        sorted::zip_descriptor(),
        sorted::min_descriptor(),
        sorted::max_descriptor(),
        sorted::all_descriptor(),
        sorted::any_descriptor(),
        print::print_descriptor(),
        print::fail_descriptor(),
        struct_fn::struct_descriptor(),
        struct_fn::provider_descriptor(),
        struct_fn::depset_descriptor(),
    ];
    for descriptor in functions {
        entries.push((descriptor.name.into(), native_value(descriptor)));
    }
    entries
}

fn bool_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("bool", |_ctx, args| {
        let [x] = take_args(args);
        Ok(Value::Bool(x.truth()))
    })
    .params(vec![ParamSpec::optional(
        "x",
        TypeConstraint::Any,
        DefaultSpec::Bool(false),
    )])
}

fn int_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("int", int_impl).params(vec![ParamSpec::optional(
        "x",
        TypeConstraint::Any,
        DefaultSpec::Int(0),
    )])
}

fn int_impl(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [x] = take_args(args);
    match &x {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i32::from(*b))),
        Value::Str(s) => s.trim().parse::<i32>().map(Value::Int).map_err(|_| {
            EvalError::value_error(format!("invalid literal for int(): {}", x.repr()))
        }),
        other => Err(EvalError::type_error(format!(
            "int() argument must be an int, bool or string, got '{}'",
            other.type_name()
        ))),
    }
}

fn str_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("str", |_ctx, args| {
        let [x] = take_args(args);
        Ok(Value::string(x.to_display()))
    })
    .params(vec![ParamSpec::optional(
        "x",
        TypeConstraint::Any,
        DefaultSpec::Str(""),
    )])
}

fn type_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("type", |_ctx, args| {
        let [x] = take_args(args);
        Ok(Value::string(x.type_name()))
    })
    .params(vec![ParamSpec::required("x", TypeConstraint::Any)])
}

fn repr_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("repr", |_ctx, args| {
        let [x] = take_args(args);
        Ok(Value::string(x.repr()))
    })
    .params(vec![ParamSpec::required("x", TypeConstraint::Any)])
}

fn list_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("list", |ctx, args| {
        let [x] = take_args(args);
        let items: Vec<Value> = match &x {
            Value::None => Vec::new(),
            other => other.iterate()?.collect(),
        };
        Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
    })
    .params(vec![ParamSpec::optional(
        "x",
        TypeConstraint::Any,
        DefaultSpec::None,
    )])
}

fn tuple_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("tuple", |_ctx, args| {
        let [x] = take_args(args);
        let items: Vec<Value> = match &x {
            Value::None => Vec::new(),
            other => other.iterate()?.collect(),
        };
        Ok(Value::Tuple(items.into()))
    })
    .params(vec![ParamSpec::optional(
        "x",
        TypeConstraint::Any,
        DefaultSpec::None,
    )])
}

fn dict_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("dict", dict_impl)
        .params(vec![ParamSpec::optional(
            "pairs",
            TypeConstraint::Any,
            DefaultSpec::None,
        )])
        .star_star()
}

fn dict_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [pairs, kwargs] = take_args(args);
    let mut entries: Vec<(Value, Value)> = Vec::new();
    match &pairs {
        Value::None => {}
        Value::Dict(dict) => entries.extend(dict.entries()),
        other => {
            for pair in other.iterate()? {
                let Value::Tuple(kv) = &pair else {
                    return Err(EvalError::type_error(
                        "dict() requires a dict or an iterable of key/value pairs",
                    ));
                };
                if kv.len() != 2 {
                    return Err(EvalError::value_error(format!(
                        "dict() pair has length {}, want 2",
                        kv.len()
                    )));
                }
                entries.push((kv[0].clone(), kv[1].clone()));
            }
        }
    }
    let Value::Dict(kwargs) = &kwargs else {
        unreachable!("star-star slot is always a dict");
    };
    entries.extend(kwargs.entries());
    let dict = crate::types::Dict::from_pairs(entries, ctx.scope.clone())?;
    Ok(Value::Dict(Arc::new(dict)))
}

fn hasattr_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("hasattr", hasattr_impl)
        .params(vec![
            ParamSpec::required("x", TypeConstraint::Any),
            ParamSpec::required("name", TypeConstraint::Str),
        ])
        .wants_semantics()
}

fn hasattr_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [x, name] = take_args(args);
    let Value::Str(name) = &name else {
        unreachable!("binder enforced the string constraint");
    };
    Ok(Value::Bool(attr_names(&x, ctx).contains(&name.to_string())))
}

fn getattr_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("getattr", getattr_impl)
        .params(vec![
            ParamSpec::required("x", TypeConstraint::Any),
            ParamSpec::required("name", TypeConstraint::Str),
        ])
        .star()
        .wants_location()
        .wants_semantics()
        .wants_thread()
}

fn getattr_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [x, name, rest] = take_args(args);
    let Value::Str(name) = &name else {
        unreachable!("binder enforced the string constraint");
    };
    let Value::Tuple(rest) = &rest else {
        unreachable!("star slot is always a tuple");
    };
    if rest.len() > 1 {
        return Err(EvalError::type_error(
            "getattr() accepts no more than 3 positional arguments",
        ));
    }
    let location = ctx
        .location
        .clone()
        .expect("getattr requests the call location");
    let semantics = ctx
        .semantics
        .clone()
        .expect("getattr requests the semantics");
    let scope = ctx.scope;
    let thread = ctx
        .thread
        .as_deref_mut()
        .expect("getattr requests the thread");
    match crate::methods::get_attr(&x, name, scope, &semantics, location, thread) {
        Ok(value) => Ok(value),
        Err(_) if rest.len() == 1 => Ok(rest[0].clone()),
        Err(err) => Err(err),
    }
}

fn dir_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("dir", dir_impl)
        .params(vec![ParamSpec::required("x", TypeConstraint::Any)])
        .wants_semantics()
}

fn dir_impl(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [x] = take_args(args);
    let mut names = attr_names(&x, ctx);
    names.sort();
    let items = names.into_iter().map(Value::string).collect();
    Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
}

fn attr_names(value: &Value, ctx: &CallCtx<'_, '_>) -> Vec<String> {
    if let Value::Struct(struct_value) = value {
        return struct_value.field_names().map(str::to_owned).collect();
    }
    let semantics = ctx
        .semantics
        .clone()
        .unwrap_or_else(|| Arc::new(crate::semantics::Semantics::new()));
    methods_for(value.type_name(), &semantics)
        .attr_names()
        .map(str::to_owned)
        .collect()
}
