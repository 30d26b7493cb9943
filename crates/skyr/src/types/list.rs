use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{EvalError, EvalResult};
use crate::scope::{ReadTag, Scope, check_mutable};
use crate::value::{Value, resolve_index};

/// A mutable sequence cell.
///
/// The items live behind an `RwLock` so frozen lists can be shared across
/// evaluation threads; within one evaluation all mutation is single-threaded
/// and gated by the owning [`Scope`] plus the iteration [`ReadTag`], so the
/// lock is never contended.
#[derive(Debug)]
pub struct List {
    scope: Scope,
    reads: ReadTag,
    items: RwLock<Vec<Value>>,
}

impl List {
    #[must_use]
    pub fn new(items: Vec<Value>, scope: Scope) -> Self {
        Self {
            scope,
            reads: ReadTag::default(),
            items: RwLock::new(items),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones the current items out of the cell.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        let a = self.items.read();
        let b = other.items.read();
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
    }

    fn check_mutable(&self, scope: &Scope) -> EvalResult<()> {
        check_mutable(&self.scope, scope, &self.reads, "list")
    }

    pub fn append(&self, scope: &Scope, value: Value) -> EvalResult<()> {
        self.check_mutable(scope)?;
        self.items.write().push(value);
        Ok(())
    }

    pub fn extend(&self, scope: &Scope, values: Vec<Value>) -> EvalResult<()> {
        self.check_mutable(scope)?;
        self.items.write().extend(values);
        Ok(())
    }

    pub fn insert(&self, scope: &Scope, index: i32, value: Value) -> EvalResult<()> {
        self.check_mutable(scope)?;
        let mut items = self.items.write();
        // insert clamps like Python rather than failing on out-of-range
        let len = items.len() as i64;
        let at = if index < 0 {
            (i64::from(index) + len).max(0)
        } else {
            i64::from(index).min(len)
        };
        items.insert(at as usize, value);
        Ok(())
    }

    /// Removes the first element equal to `value`.
    pub fn remove(&self, scope: &Scope, value: &Value) -> EvalResult<()> {
        self.check_mutable(scope)?;
        let mut items = self.items.write();
        match items.iter().position(|item| item.equals(value)) {
            Some(at) => {
                items.remove(at);
                Ok(())
            }
            None => Err(EvalError::value_error(format!(
                "{} not found in list",
                value.repr()
            ))),
        }
    }

    /// Removes and returns the element at `index` (default last).
    pub fn pop(&self, scope: &Scope, index: Option<i32>) -> EvalResult<Value> {
        self.check_mutable(scope)?;
        let mut items = self.items.write();
        let at = resolve_index(index.unwrap_or(-1), items.len())?;
        Ok(items.remove(at))
    }

    pub fn clear(&self, scope: &Scope) -> EvalResult<()> {
        self.check_mutable(scope)?;
        self.items.write().clear();
        Ok(())
    }

    /// `l[i] = v`.
    pub fn set_index(&self, scope: &Scope, index: i32, value: Value) -> EvalResult<()> {
        self.check_mutable(scope)?;
        let mut items = self.items.write();
        let at = resolve_index(index, items.len())?;
        items[at] = value;
        Ok(())
    }

    /// Position of the first element equal to `value`, for `list.index`.
    pub fn position(&self, value: &Value) -> EvalResult<i32> {
        let items = self.items.read();
        items
            .iter()
            .position(|item| item.equals(value))
            .map(|i| i as i32)
            .ok_or_else(|| EvalError::value_error(format!("{} not found in list", value.repr())))
    }

    /// Starts an iteration, tagging the list as being read until the returned
    /// iterator is dropped.
    pub(crate) fn start_iter(list: &Arc<Self>) -> ListIter {
        list.reads.begin();
        ListIter {
            len: list.len(),
            list: Arc::clone(list),
            index: 0,
        }
    }
}

/// Iterator over a list.
///
/// Holds the read tag for its whole lifetime; the length is captured at the
/// start, which is sound because mutation is rejected while the tag is held.
pub(crate) struct ListIter {
    list: Arc<List>,
    len: usize,
    index: usize,
}

impl Iterator for ListIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.index >= self.len {
            return None;
        }
        let item = self.list.items.read()[self.index].clone();
        self.index += 1;
        Some(item)
    }
}

impl Drop for ListIter {
    fn drop(&mut self) {
        self.list.reads.end();
    }
}

/// Method table for list receivers. The receiver arrives through the call
/// context, not the argument list.
pub(crate) fn methods() -> Vec<crate::methods::MethodDescriptor> {
    use crate::methods::{DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint};
    vec![
        MethodDescriptor::method("append", methods_impl::append)
            .params(vec![ParamSpec::required("item", TypeConstraint::Any)]),
        MethodDescriptor::method("extend", methods_impl::extend)
            .params(vec![ParamSpec::required("items", TypeConstraint::Iterable)]),
        MethodDescriptor::method("insert", methods_impl::insert).params(vec![
            ParamSpec::required("index", TypeConstraint::Int),
            ParamSpec::required("item", TypeConstraint::Any),
        ]),
        MethodDescriptor::method("remove", methods_impl::remove)
            .params(vec![ParamSpec::required("item", TypeConstraint::Any)]),
        MethodDescriptor::method("pop", methods_impl::pop).params(vec![ParamSpec::optional(
            "index",
            TypeConstraint::IntOrNone,
            DefaultSpec::None,
        )]),
        MethodDescriptor::method("index", methods_impl::index)
            .params(vec![ParamSpec::required("item", TypeConstraint::Any)]),
        MethodDescriptor::method("clear", methods_impl::clear),
    ]
}

mod methods_impl {
    use super::*;
    use crate::methods::{CallCtx, take_args};

    pub fn append(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [item] = take_args(args);
        ctx.receiver_list()?.append(ctx.scope, item)?;
        Ok(Value::None)
    }

    pub fn extend(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [items] = take_args(args);
        let items: Vec<Value> = items.iterate()?.collect();
        ctx.receiver_list()?.extend(ctx.scope, items)?;
        Ok(Value::None)
    }

    pub fn insert(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [index, item] = take_args(args);
        let Value::Int(index) = index else {
            unreachable!("binder enforced the int constraint");
        };
        ctx.receiver_list()?.insert(ctx.scope, index, item)?;
        Ok(Value::None)
    }

    pub fn remove(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [item] = take_args(args);
        ctx.receiver_list()?.remove(ctx.scope, &item)?;
        Ok(Value::None)
    }

    pub fn pop(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [index] = take_args(args);
        let index = match index {
            Value::Int(i) => Some(i),
            _ => None,
        };
        ctx.receiver_list()?.pop(ctx.scope, index)
    }

    pub fn index(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [item] = take_args(args);
        Ok(Value::Int(ctx.receiver_list()?.position(&item)?))
    }

    pub fn clear(ctx: &mut CallCtx<'_, '_>, _args: Vec<Value>) -> EvalResult<Value> {
        ctx.receiver_list()?.clear(ctx.scope)?;
        Ok(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn append_requires_owning_scope() {
        let scope = Scope::new();
        let list = List::new(vec![Value::Int(1)], scope.clone());
        list.append(&scope, Value::Int(2)).unwrap();
        assert_eq!(list.len(), 2);

        let foreign = Scope::new();
        let err = list.append(&foreign, Value::Int(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Immutable);

        scope.freeze();
        let err = list.append(&scope, Value::Int(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Immutable);
    }

    #[test]
    fn mutation_during_iteration_fails() {
        let scope = Scope::new();
        let list = Arc::new(List::new(vec![Value::Int(1), Value::Int(2)], scope.clone()));
        let mut iter = List::start_iter(&list);
        assert!(iter.next().is_some());
        let err = list.append(&scope, Value::Int(3)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConcurrentModification);
        drop(iter);
        list.append(&scope, Value::Int(3)).unwrap();
    }

    #[test]
    fn pop_default_is_last() {
        let scope = Scope::new();
        let list = List::new(vec![Value::Int(1), Value::Int(2)], scope.clone());
        let popped = list.pop(&scope, None).unwrap();
        assert!(popped.equals(&Value::Int(2)));
        let err = list.pop(&scope, Some(5)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Index);
    }
}
