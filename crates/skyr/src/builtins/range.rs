use crate::errors::{EvalError, EvalResult};
use crate::methods::{
    CallCtx, DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint, take_args,
};
use crate::value::Value;

pub(super) fn descriptor() -> MethodDescriptor {
    MethodDescriptor::method("range", range_impl).params(vec![
        ParamSpec::required("start_or_stop", TypeConstraint::Int),
        ParamSpec::optional("stop", TypeConstraint::IntOrNone, DefaultSpec::None),
        ParamSpec::optional("step", TypeConstraint::IntOrNone, DefaultSpec::None),
    ])
}

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
///
/// Materialises the sequence as an immutable tuple.
fn range_impl(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
    let [first, stop, step] = take_args(args);
    let Value::Int(first) = first else {
        unreachable!("binder enforced the int constraint");
    };
    let (start, stop) = match stop {
        Value::Int(stop) => (first, stop),
        _ => (0, first),
    };
    let step = match step {
        Value::Int(step) => step,
        _ => 1,
    };
    if step == 0 {
        return Err(EvalError::value_error("range() step cannot be zero"));
    }

    // Iterate in i64 so start/stop near the i32 bounds cannot overflow.
    let mut items = Vec::new();
    let (start, stop, step_wide) = (i64::from(start), i64::from(stop), i64::from(step));
    let mut at = start;
    while (step_wide > 0 && at < stop) || (step_wide < 0 && at > stop) {
        items.push(Value::Int(at as i32));
        at += step_wide;
    }
    Ok(Value::Tuple(items.into()))
}
