use crate::errors::{EvalError, EvalResult};
use crate::methods::{CallCtx, MethodDescriptor, ParamSpec, TypeConstraint, take_args};
use crate::value::Value;

pub(super) fn descriptor() -> MethodDescriptor {
    MethodDescriptor::method("len", len_impl)
        .params(vec![ParamSpec::required("x", TypeConstraint::Any)])
}

/// `len(x)` for strings (bytes), lists, tuples and dicts.
fn len_impl(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [x] = take_args(args);
    match x.length() {
        Some(len) => Ok(Value::Int(len as i32)),
        None => Err(EvalError::type_error(format!(
            "value of type '{}' has no len()",
            x.type_name()
        ))),
    }
}
