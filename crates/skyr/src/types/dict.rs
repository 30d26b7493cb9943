use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::errors::{EvalError, EvalResult};
use crate::scope::{ReadTag, Scope, check_mutable};
use crate::value::Value;

/// A dict key: the key value plus its precomputed hash.
///
/// Construction fails for unhashable values, so every stored key is known
/// hashable. Equality goes through [`Value::equals`], which keeps `True` and
/// `1` distinct keys.
#[derive(Debug, Clone)]
pub(crate) struct Key {
    value: Value,
    hash: u64,
}

impl Key {
    pub fn new(value: Value) -> EvalResult<Self> {
        let hash = value.hash_value()?;
        Ok(Self { value, hash })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value.equals(&other.value)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

type Entries = IndexMap<Key, Value, ahash::RandomState>;

/// A mutable, insertion-ordered mapping cell.
///
/// Reassigning an existing key keeps its position; deleting and reinserting
/// moves the key to the end. Mutation is gated by the owning [`Scope`] and
/// the iteration [`ReadTag`], like [`crate::types::List`].
#[derive(Debug)]
pub struct Dict {
    scope: Scope,
    reads: ReadTag,
    entries: RwLock<Entries>,
}

impl Dict {
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            reads: ReadTag::default(),
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Builds a dict from evaluated literal entries.
    ///
    /// A key occurring twice in the literal is a `Value` error, per the
    /// duplicate-literal-key rule.
    pub fn from_literal(pairs: Vec<(Value, Value)>, scope: Scope) -> EvalResult<Self> {
        let dict = Self::new(scope);
        {
            let mut entries = dict.entries.write();
            for (key_value, value) in pairs {
                let key = Key::new(key_value)?;
                if entries.contains_key(&key) {
                    return Err(EvalError::value_error(format!(
                        "duplicate key {} in dict literal",
                        key.value().repr()
                    )));
                }
                entries.insert(key, value);
            }
        }
        Ok(dict)
    }

    /// Builds a dict from pairs, later pairs overwriting earlier ones.
    /// Used by comprehensions and `dict(...)`.
    pub fn from_pairs(pairs: Vec<(Value, Value)>, scope: Scope) -> EvalResult<Self> {
        let dict = Self::new(scope);
        {
            let mut entries = dict.entries.write();
            for (key_value, value) in pairs {
                entries.insert(Key::new(key_value)?, value);
            }
        }
        Ok(dict)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones the entries out in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.value().clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.entries
            .read()
            .keys()
            .map(|k| k.value().clone())
            .collect()
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.entries.read().values().cloned().collect()
    }

    pub fn get(&self, key: &Value) -> EvalResult<Option<Value>> {
        let key = Key::new(key.clone())?;
        Ok(self.entries.read().get(&key).cloned())
    }

    pub fn contains_key(&self, key: &Value) -> EvalResult<bool> {
        let key = Key::new(key.clone())?;
        Ok(self.entries.read().contains_key(&key))
    }

    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        let a = self.entries.read();
        let b = other.entries.read();
        // Order-insensitive: equality compares contents, iteration order is
        // observable only through iteration.
        a.len() == b.len()
            && a.iter()
                .all(|(k, v)| b.get(k).is_some_and(|other_v| v.equals(other_v)))
    }

    fn check_mutable(&self, scope: &Scope) -> EvalResult<()> {
        check_mutable(&self.scope, scope, &self.reads, "dict")
    }

    /// `d[k] = v`. Keeps the key's position when it already exists.
    pub fn insert(&self, scope: &Scope, key: Value, value: Value) -> EvalResult<()> {
        self.check_mutable(scope)?;
        let key = Key::new(key)?;
        self.entries.write().insert(key, value);
        Ok(())
    }

    /// Removes a key, shifting later entries down so a reinsertion lands at
    /// the end of the iteration order.
    pub fn remove(&self, scope: &Scope, key: &Value) -> EvalResult<Option<Value>> {
        self.check_mutable(scope)?;
        let key = Key::new(key.clone())?;
        Ok(self.entries.write().shift_remove(&key))
    }

    pub fn clear(&self, scope: &Scope) -> EvalResult<()> {
        self.check_mutable(scope)?;
        self.entries.write().clear();
        Ok(())
    }

    /// `d.setdefault(k, default)`.
    pub fn set_default(&self, scope: &Scope, key: Value, default: Value) -> EvalResult<Value> {
        let existing = self.get(&key)?;
        match existing {
            Some(value) => Ok(value),
            None => {
                self.insert(scope, key, default.clone())?;
                Ok(default)
            }
        }
    }

    /// `d.update(other)`: inserts every entry of `other` in its order.
    pub fn update(&self, scope: &Scope, pairs: Vec<(Value, Value)>) -> EvalResult<()> {
        for (key, value) in pairs {
            self.insert(scope, key, value)?;
        }
        Ok(())
    }

    /// Starts a key iteration, tagging the dict as being read until the
    /// returned iterator is dropped.
    pub(crate) fn start_key_iter(dict: &Arc<Self>) -> DictKeyIter {
        dict.reads.begin();
        DictKeyIter {
            keys: dict.keys(),
            dict: Arc::clone(dict),
            index: 0,
        }
    }
}

/// Iterator over a dict's keys in insertion order.
///
/// Snapshots the keys at the start; the snapshot stays accurate because the
/// read tag rejects structural mutation while it is held.
pub(crate) struct DictKeyIter {
    dict: Arc<Dict>,
    keys: Vec<Value>,
    index: usize,
}

impl Iterator for DictKeyIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let key = self.keys.get(self.index).cloned();
        self.index += 1;
        key
    }
}

impl Drop for DictKeyIter {
    fn drop(&mut self) {
        self.dict.reads.end();
    }
}

/// Method table for dict receivers.
pub(crate) fn methods() -> Vec<crate::methods::MethodDescriptor> {
    use crate::methods::{DefaultSpec, MethodDescriptor, ParamSpec, TypeConstraint};
    vec![
        MethodDescriptor::method("get", methods_impl::get).params(vec![
            ParamSpec::required("key", TypeConstraint::Any),
            ParamSpec::optional("default", TypeConstraint::Any, DefaultSpec::None),
        ]),
        MethodDescriptor::method("keys", methods_impl::keys),
        MethodDescriptor::method("values", methods_impl::values),
        MethodDescriptor::method("items", methods_impl::items),
        // pop's default is distinguishable from an explicit None through the
        // star slot: no star arguments means no default was supplied.
        MethodDescriptor::method("pop", methods_impl::pop)
            .params(vec![ParamSpec::required("key", TypeConstraint::Any)])
            .star(),
        MethodDescriptor::method("setdefault", methods_impl::setdefault).params(vec![
            ParamSpec::required("key", TypeConstraint::Any),
            ParamSpec::optional("default", TypeConstraint::Any, DefaultSpec::None),
        ]),
        MethodDescriptor::method("update", methods_impl::update)
            .params(vec![ParamSpec::required("other", TypeConstraint::Dict)]),
        MethodDescriptor::method("clear", methods_impl::clear),
    ]
}

mod methods_impl {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::methods::{CallCtx, take_args};
    use crate::types::List;

    pub fn get(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [key, default] = take_args(args);
        Ok(ctx.receiver_dict()?.get(&key)?.unwrap_or(default))
    }

    pub fn keys(ctx: &mut CallCtx<'_, '_>, _args: Vec<Value>) -> EvalResult<Value> {
        let keys = ctx.receiver_dict()?.keys();
        Ok(Value::List(Arc::new(List::new(keys, ctx.scope.clone()))))
    }

    pub fn values(ctx: &mut CallCtx<'_, '_>, _args: Vec<Value>) -> EvalResult<Value> {
        let values = ctx.receiver_dict()?.values();
        Ok(Value::List(Arc::new(List::new(values, ctx.scope.clone()))))
    }

    pub fn items(ctx: &mut CallCtx<'_, '_>, _args: Vec<Value>) -> EvalResult<Value> {
        let items: Vec<Value> = ctx
            .receiver_dict()?
            .entries()
            .into_iter()
            .map(|(k, v)| Value::tuple(vec![k, v]))
            .collect();
        Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
    }

    pub fn pop(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [key, rest] = take_args(args);
        let Value::Tuple(rest) = &rest else {
            unreachable!("star slot is always a tuple");
        };
        if rest.len() > 1 {
            return Err(EvalError::type_error(
                "pop() accepts no more than 2 positional arguments",
            ));
        }
        match ctx.receiver_dict()?.remove(ctx.scope, &key)? {
            Some(value) => Ok(value),
            None => match rest.first() {
                Some(default) => Ok(default.clone()),
                None => Err(ErrorKind::Index.err(format!(
                    "key {} not found in dict",
                    key.repr()
                ))),
            },
        }
    }

    pub fn setdefault(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [key, default] = take_args(args);
        ctx.receiver_dict()?.set_default(ctx.scope, key, default)
    }

    pub fn update(ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        let [other] = take_args(args);
        let Value::Dict(other) = &other else {
            unreachable!("binder enforced the dict constraint");
        };
        ctx.receiver_dict()?.update(ctx.scope, other.entries())?;
        Ok(Value::None)
    }

    pub fn clear(ctx: &mut CallCtx<'_, '_>, _args: Vec<Value>) -> EvalResult<Value> {
        ctx.receiver_dict()?.clear(ctx.scope)?;
        Ok(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn int(i: i32) -> Value {
        Value::Int(i)
    }

    #[test]
    fn reassign_keeps_position_delete_reinsert_moves() {
        let scope = Scope::new();
        let dict = Dict::from_literal(
            vec![(int(0), int(0)), (int(2), int(2)), (int(1), int(1))],
            scope.clone(),
        )
        .unwrap();

        dict.remove(&scope, &int(2)).unwrap();
        dict.insert(&scope, int(0), Value::string("a")).unwrap();
        dict.insert(&scope, int(2), Value::string("b")).unwrap();

        let keys: Vec<i32> = dict
            .keys()
            .iter()
            .map(|k| match k {
                Value::Int(i) => *i,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec![0, 1, 2]);
        assert!(dict.get(&int(0)).unwrap().unwrap().equals(&Value::string("a")));
    }

    #[test]
    fn duplicate_literal_key_is_value_error() {
        let scope = Scope::new();
        let err = Dict::from_literal(vec![(int(1), int(1)), (int(1), int(2))], scope).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
    }

    #[test]
    fn unhashable_key_is_type_error() {
        let scope = Scope::new();
        let dict = Dict::new(scope.clone());
        let list = Value::List(Arc::new(crate::types::List::new(vec![], scope.clone())));
        let err = dict.insert(&scope, list, int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }

    #[test]
    fn bool_and_int_are_distinct_keys() {
        let scope = Scope::new();
        let dict = Dict::new(scope.clone());
        dict.insert(&scope, Value::Bool(true), int(1)).unwrap();
        dict.insert(&scope, int(1), int(2)).unwrap();
        assert_eq!(dict.len(), 2);
    }
}
