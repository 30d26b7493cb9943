use std::sync::Arc;

use indexmap::IndexSet;

use crate::errors::{EvalError, EvalResult};
use crate::types::dict::Key;
use crate::value::Value;

/// Traversal order of a depset, declared at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsetOrder {
    Default,
    Postorder,
    Preorder,
    Topological,
}

impl DepsetOrder {
    pub fn parse(name: &str) -> EvalResult<Self> {
        match name {
            "default" => Ok(Self::Default),
            "postorder" => Ok(Self::Postorder),
            "preorder" => Ok(Self::Preorder),
            "topological" => Ok(Self::Topological),
            other => Err(EvalError::value_error(format!(
                "invalid depset order '{other}' (expected one of \
                 \"default\", \"postorder\", \"preorder\", \"topological\")"
            ))),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Postorder => "postorder",
            Self::Preorder => "preorder",
            Self::Topological => "topological",
        }
    }

    /// Whether a child with order `other` may be nested under `self`.
    /// `default` composes with anything; otherwise orders must match.
    fn accepts(self, other: Self) -> bool {
        self == other || other == Self::Default || self == Self::Default
    }
}

/// A set-like aggregate with a declared transitive-merge order.
///
/// Depsets are constructed whole and immutable from birth: sharing them
/// across modules and threads needs no scope bookkeeping, and equality is
/// identity. Flattening is explicit via [`Depset::to_list`].
#[derive(Debug)]
pub struct Depset {
    order: DepsetOrder,
    direct: Vec<Value>,
    transitive: Vec<Arc<Depset>>,
}

impl Depset {
    /// Validates and builds a depset.
    ///
    /// Direct elements must be hashable (they participate in deduplication);
    /// nested depsets must carry a compatible order.
    pub fn new(
        order: DepsetOrder,
        direct: Vec<Value>,
        transitive: Vec<Arc<Self>>,
    ) -> EvalResult<Self> {
        for item in &direct {
            if !item.is_hashable() {
                return Err(EvalError::type_error(format!(
                    "depset elements must be hashable, got '{}'",
                    item.type_name()
                )));
            }
        }
        for child in &transitive {
            if !order.accepts(child.order) {
                return Err(EvalError::value_error(format!(
                    "cannot nest a depset with order \"{}\" inside one with order \"{}\"",
                    child.order.name(),
                    order.name()
                )));
            }
        }
        Ok(Self {
            order,
            direct,
            transitive,
        })
    }

    #[must_use]
    pub fn order(&self) -> DepsetOrder {
        self.order
    }

    /// Flattens to a duplicate-free list in the declared order.
    ///
    /// `default` and `postorder` visit transitive children before direct
    /// elements; `preorder` visits direct elements first; `topological` is
    /// the reverse of postorder.
    #[must_use]
    pub fn to_list(&self) -> Vec<Value> {
        let mut seen: IndexSet<Key, ahash::RandomState> = IndexSet::default();
        self.collect(&mut seen);
        let mut items: Vec<Value> = seen.into_iter().map(|k| k.value().clone()).collect();
        if self.order == DepsetOrder::Topological {
            items.reverse();
        }
        items
    }

    fn collect(&self, seen: &mut IndexSet<Key, ahash::RandomState>) {
        let direct_first = self.order == DepsetOrder::Preorder;
        if direct_first {
            self.collect_direct(seen);
        }
        for child in &self.transitive {
            child.collect(seen);
        }
        if !direct_first {
            self.collect_direct(seen);
        }
    }

    fn collect_direct(&self, seen: &mut IndexSet<Key, ahash::RandomState>) {
        for item in &self.direct {
            // Construction verified hashability.
            if let Ok(key) = Key::new(item.clone()) {
                seen.insert(key);
            }
        }
    }
}

/// Method table for depset receivers.
pub(crate) fn methods() -> Vec<crate::methods::MethodDescriptor> {
    use crate::methods::MethodDescriptor;
    vec![MethodDescriptor::method("to_list", methods_impl::to_list)]
}

mod methods_impl {
    use super::*;
    use crate::methods::CallCtx;
    use crate::types::List;

    pub fn to_list(ctx: &mut CallCtx<'_, '_>, _args: Vec<Value>) -> EvalResult<Value> {
        let items = ctx.receiver_depset()?.to_list();
        Ok(Value::List(Arc::new(List::new(items, ctx.scope.clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn ints(values: &[i32]) -> Vec<Value> {
        values.iter().map(|&i| Value::Int(i)).collect()
    }

    fn as_ints(values: Vec<Value>) -> Vec<i32> {
        values
            .into_iter()
            .map(|v| match v {
                Value::Int(i) => i,
                other => panic!("expected int, got {}", other.type_name()),
            })
            .collect()
    }

    #[test]
    fn postorder_visits_children_first_and_dedups() {
        let child = Arc::new(Depset::new(DepsetOrder::Default, ints(&[1, 2]), vec![]).unwrap());
        let parent =
            Depset::new(DepsetOrder::Default, ints(&[2, 3]), vec![child]).unwrap();
        assert_eq!(as_ints(parent.to_list()), vec![1, 2, 3]);
    }

    #[test]
    fn preorder_visits_direct_first() {
        let child = Arc::new(Depset::new(DepsetOrder::Preorder, ints(&[1]), vec![]).unwrap());
        let parent = Depset::new(DepsetOrder::Preorder, ints(&[3]), vec![child]).unwrap();
        assert_eq!(as_ints(parent.to_list()), vec![3, 1]);
    }

    #[test]
    fn incompatible_orders_rejected() {
        let child = Arc::new(Depset::new(DepsetOrder::Preorder, ints(&[1]), vec![]).unwrap());
        let err = Depset::new(DepsetOrder::Postorder, vec![], vec![child]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
    }

    #[test]
    fn unhashable_direct_element_rejected() {
        let scope = crate::scope::Scope::new();
        let list = Value::List(Arc::new(crate::types::List::new(vec![], scope)));
        let err = Depset::new(DepsetOrder::Default, vec![list], vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
    }
}
