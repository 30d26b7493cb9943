//! Record-shaped builtins: `struct`, `provider`, `depset`.

use std::sync::Arc;

use crate::errors::{EvalError, EvalResult};
use crate::methods::{
    CallCtx, DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint, take_args,
};
use crate::types::{Depset, DepsetOrder, Provider, StructValue};
use crate::value::Value;

pub(super) fn struct_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("struct", struct_impl).star_star()
}

fn struct_impl(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [kwargs] = take_args(args);
    let Value::Dict(kwargs) = &kwargs else {
        unreachable!("star-star slot is always a dict");
    };
    let fields = dict_to_fields(kwargs.entries());
    Ok(Value::Struct(Arc::new(StructValue::from_kwargs(
        None, fields,
    )?)))
}

pub(super) fn provider_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("provider", provider_impl).params(vec![
        ParamSpec::optional("doc", TypeConstraint::Str, DefaultSpec::Str("")),
        ParamSpec::optional("fields", TypeConstraint::Any, DefaultSpec::None).named_only(),
    ])
}

/// `provider(doc = "...", fields = ["a", "b"])` declares a new provider.
/// The provider learns its public name from the post-assignment export hook.
fn provider_impl(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [doc, fields] = take_args(args);
    let Value::Str(doc) = &doc else {
        unreachable!("binder enforced the string constraint");
    };
    let schema = match &fields {
        Value::None => None,
        Value::List(_) | Value::Tuple(_) => {
            let mut names = Vec::new();
            for field in fields.iterate()? {
                let Value::Str(name) = field else {
                    return Err(EvalError::type_error(
                        "provider() fields must be a list of strings",
                    ));
                };
                names.push(name.to_string());
            }
            Some(names)
        }
        other => {
            return Err(EvalError::type_error(format!(
                "provider() fields must be a list of strings or None, got '{}'",
                other.type_name()
            )));
        }
    };
    let doc = (!doc.is_empty()).then(|| doc.to_string());
    Ok(Value::Provider(Arc::new(Provider::new(schema, doc))))
}

pub(super) fn depset_descriptor() -> MethodDescriptor {
    MethodDescriptor::method("depset", depset_impl).params(vec![
        ParamSpec::optional("direct", TypeConstraint::Any, DefaultSpec::None),
        ParamSpec::optional("order", TypeConstraint::Str, DefaultSpec::Str("default")),
        ParamSpec::optional("transitive", TypeConstraint::Any, DefaultSpec::None).named_only(),
    ])
}

fn depset_impl(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [direct, order, transitive] = take_args(args);
    let Value::Str(order) = &order else {
        unreachable!("binder enforced the string constraint");
    };
    let order = DepsetOrder::parse(order)?;

    let direct_items: Vec<Value> = match &direct {
        Value::None => Vec::new(),
        Value::List(_) | Value::Tuple(_) => direct.iterate()?.collect(),
        other => {
            return Err(EvalError::type_error(format!(
                "depset() direct must be a list or None, got '{}'",
                other.type_name()
            )));
        }
    };

    let mut children: Vec<Arc<Depset>> = Vec::new();
    match &transitive {
        Value::None => {}
        Value::List(_) | Value::Tuple(_) => {
            for child in transitive.iterate()? {
                let Value::Depset(child) = child else {
                    return Err(EvalError::type_error(format!(
                        "depset() transitive must contain depsets, got '{}'",
                        child.type_name()
                    )));
                };
                children.push(child);
            }
        }
        other => {
            return Err(EvalError::type_error(format!(
                "depset() transitive must be a list of depsets or None, got '{}'",
                other.type_name()
            )));
        }
    }

    Ok(Value::Depset(Arc::new(Depset::new(
        order,
        direct_items,
        children,
    )?)))
}

fn dict_to_fields(entries: Vec<(Value, Value)>) -> Vec<(Arc<str>, Value)> {
    entries
        .into_iter()
        .filter_map(|(key, value)| match key {
            Value::Str(name) => Some((name, value)),
            _ => None,
        })
        .collect()
}
