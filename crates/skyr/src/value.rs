use std::any::Any;
use std::cmp::Ordering;
use std::fmt::{self, Write};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ahash::AHashSet;

use crate::errors::{ErrorKind, EvalError, EvalResult};
use crate::function::Function;
use crate::label::Label;
use crate::methods::NativeCallable;
use crate::scope::Scope;
use crate::types::{Depset, Dict, List, Provider, StructValue, Type};

/// An opaque host-provided object exposed to scripts.
///
/// Host objects participate in attribute dispatch through the method registry
/// under [`HostObject::type_name`]. They compare by identity and are expected
/// to be internally immutable (or internally synchronised): frozen modules
/// are shared across evaluation threads.
pub trait HostObject: fmt::Debug + Send + Sync + 'static {
    /// Stable type name, used as the registry key and in error messages.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Whether this value wants the post-assignment export hook.
    fn exportable(&self) -> bool {
        false
    }

    /// Invoked after a top-level assignment binds this value to a name, so
    /// the value can record its own public label and name.
    fn export(&self, _label: &Label, _name: &str) -> EvalResult<()> {
        Ok(())
    }
}

/// Primary runtime value.
///
/// Small immediate values are stored inline; composites are `Arc`-shared so
/// that a binding exported by one extension and loaded by many others is the
/// same value everywhere (pointer equality, not just structural equality).
/// Mutation of `List`/`Dict` goes through their owning [`Scope`].
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i32),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    List(Arc<List>),
    Dict(Arc<Dict>),
    Depset(Arc<Depset>),
    /// A script-defined function: closure over its module's globals.
    Function(Arc<Function>),
    /// A host function or bound host method, described by a registry descriptor.
    Native(Arc<NativeCallable>),
    /// A provider: a constructor callable that creates tagged structs.
    Provider(Arc<Provider>),
    Struct(Arc<StructValue>),
    Host(Arc<dyn HostObject>),
}

impl Value {
    /// Convenience constructor for string values.
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn tuple(items: Vec<Self>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn type_of(&self) -> Option<Type> {
        match self {
            Self::None => Some(Type::NoneType),
            Self::Bool(_) => Some(Type::Bool),
            Self::Int(_) => Some(Type::Int),
            Self::Str(_) => Some(Type::Str),
            Self::Tuple(_) => Some(Type::Tuple),
            Self::List(_) => Some(Type::List),
            Self::Dict(_) => Some(Type::Dict),
            Self::Depset(_) => Some(Type::Depset),
            Self::Function(_) | Self::Native(_) => Some(Type::Function),
            Self::Provider(_) => Some(Type::Provider),
            Self::Struct(_) => Some(Type::Struct),
            Self::Host(_) => None,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Host(host) => host.type_name(),
            other => other.type_of().expect("non-host value has a type").name(),
        }
    }

    /// Truthiness: `None` and empty collections are false, everything else
    /// (including every callable, struct and depset) is true.
    #[must_use]
    pub fn truth(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Str(s) => !s.is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::List(list) => list.len() > 0,
            Self::Dict(dict) => dict.len() > 0,
            Self::Depset(_)
            | Self::Function(_)
            | Self::Native(_)
            | Self::Provider(_)
            | Self::Struct(_)
            | Self::Host(_) => true,
        }
    }

    /// Number of elements, for the types that have one.
    ///
    /// Strings count bytes. Depsets have no length (callers must flatten
    /// explicitly with `to_list()`).
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.len()),
            Self::Tuple(items) => Some(items.len()),
            Self::List(list) => Some(list.len()),
            Self::Dict(dict) => Some(dict.len()),
            _ => None,
        }
    }

    /// Structural equality within a type; `false` across types.
    ///
    /// `Bool` and `Int` never compare equal to each other. Depsets, callables
    /// and host objects compare by identity.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b) || a.equals(b),
            (Self::Dict(a), Self::Dict(b)) => Arc::ptr_eq(a, b) || a.equals(b),
            (Self::Depset(a), Self::Depset(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Arc::ptr_eq(a, b),
            (Self::Provider(a), Self::Provider(b)) => Arc::ptr_eq(a, b),
            (Self::Struct(a), Self::Struct(b)) => Arc::ptr_eq(a, b) || a.equals(b),
            (Self::Host(a), Self::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<`/`<=`/`>`/`>=` and `sorted`.
    ///
    /// Defined for int/int, string/string, and element-wise for lists and
    /// tuples of comparable elements; everything else is a `Type` error.
    pub fn compare(&self, other: &Self) -> EvalResult<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            (Self::Tuple(a), Self::Tuple(b)) => compare_sequences(a.iter(), b.iter(), a.len(), b.len()),
            (Self::List(a), Self::List(b)) => {
                let a_items = a.snapshot();
                let b_items = b.snapshot();
                compare_sequences(a_items.iter(), b_items.iter(), a_items.len(), b_items.len())
            }
            _ => Err(EvalError::type_error(format!(
                "values of type '{}' and '{}' are not comparable",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    #[must_use]
    pub fn is_hashable(&self) -> bool {
        match self {
            Self::None | Self::Bool(_) | Self::Int(_) | Self::Str(_) => true,
            Self::Tuple(items) => items.iter().all(Self::is_hashable),
            _ => false,
        }
    }

    /// Hash for dict keys and depset elements.
    ///
    /// Consistent with [`Value::equals`]; fails with the "unhashable type"
    /// error for mutable containers and other non-hashable values.
    pub fn hash_value(&self) -> EvalResult<u64> {
        let mut hasher = ahash::AHasher::default();
        self.hash_into(&mut hasher)?;
        Ok(hasher.finish())
    }

    fn hash_into(&self, hasher: &mut impl Hasher) -> EvalResult<()> {
        match self {
            Self::None => 0u8.hash(hasher),
            // Distinct discriminant tags keep True and 1 from colliding even
            // though both hash their payload.
            Self::Bool(b) => {
                1u8.hash(hasher);
                b.hash(hasher);
            }
            Self::Int(i) => {
                2u8.hash(hasher);
                i.hash(hasher);
            }
            Self::Str(s) => {
                3u8.hash(hasher);
                s.as_bytes().hash(hasher);
            }
            Self::Tuple(items) => {
                4u8.hash(hasher);
                items.len().hash(hasher);
                for item in items.iter() {
                    item.hash_into(hasher)?;
                }
            }
            other => return Err(EvalError::unhashable(other.type_name())),
        }
        Ok(())
    }

    /// Renders the value as source-like text (`repr`).
    #[must_use]
    pub fn repr(&self) -> String {
        let mut out = String::new();
        let mut seen = AHashSet::new();
        let _ = self.repr_into(&mut out, &mut seen);
        out
    }

    /// Renders the value for display (`str`): like `repr`, except strings are
    /// emitted without quoting.
    #[must_use]
    pub fn to_display(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    pub(crate) fn repr_into(&self, out: &mut impl Write, seen: &mut AHashSet<usize>) -> fmt::Result {
        match self {
            Self::None => out.write_str("None"),
            Self::Bool(true) => out.write_str("True"),
            Self::Bool(false) => out.write_str("False"),
            Self::Int(i) => write!(out, "{i}"),
            Self::Str(s) => write_string_repr(out, s),
            Self::Tuple(items) => {
                out.write_char('(')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    item.repr_into(out, seen)?;
                }
                if items.len() == 1 {
                    out.write_char(',')?;
                }
                out.write_char(')')
            }
            Self::List(list) => {
                let ptr = Arc::as_ptr(list) as usize;
                if !seen.insert(ptr) {
                    return out.write_str("[...]");
                }
                out.write_char('[')?;
                for (i, item) in list.snapshot().iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    item.repr_into(out, seen)?;
                }
                seen.remove(&ptr);
                out.write_char(']')
            }
            Self::Dict(dict) => {
                let ptr = Arc::as_ptr(dict) as usize;
                if !seen.insert(ptr) {
                    return out.write_str("{...}");
                }
                out.write_char('{')?;
                for (i, (key, value)) in dict.entries().iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    key.repr_into(out, seen)?;
                    out.write_str(": ")?;
                    value.repr_into(out, seen)?;
                }
                seen.remove(&ptr);
                out.write_char('}')
            }
            Self::Depset(depset) => {
                out.write_str("depset([")?;
                for (i, item) in depset.to_list().iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    item.repr_into(out, seen)?;
                }
                out.write_str("])")
            }
            Self::Function(function) => write!(out, "<function {}>", function.name),
            Self::Native(native) => match &native.receiver {
                Some(receiver) => write!(
                    out,
                    "<built-in method {} of {} value>",
                    native.descriptor.name,
                    receiver.type_name()
                ),
                None => write!(out, "<built-in function {}>", native.descriptor.name),
            },
            Self::Provider(provider) => match provider.exported_name() {
                Some(name) => write!(out, "<provider {name}>"),
                None => out.write_str("<provider>"),
            },
            Self::Struct(value) => {
                out.write_str("struct(")?;
                for (i, (name, field)) in value.fields().iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write!(out, "{name} = ")?;
                    field.repr_into(out, seen)?;
                }
                out.write_char(')')
            }
            Self::Host(host) => write!(out, "<{} value>", host.type_name()),
        }
    }

    /// Membership test for the `in` operator.
    pub fn contains(&self, item: &Self) -> EvalResult<bool> {
        match self {
            Self::Str(haystack) => match item {
                Self::Str(needle) => Ok(haystack.contains(needle.as_ref())),
                other => Err(EvalError::type_error(format!(
                    "'in <string>' requires string as left operand, not '{}'",
                    other.type_name()
                ))),
            },
            Self::Tuple(items) => Ok(items.iter().any(|v| v.equals(item))),
            Self::List(list) => Ok(list.snapshot().iter().any(|v| v.equals(item))),
            Self::Dict(dict) => dict.contains_key(item),
            other => Err(EvalError::type_error(format!(
                "operator 'in' not supported on type '{}'",
                other.type_name()
            ))),
        }
    }

    /// Obtains an iteration handle, tagging mutable containers as
    /// "being read" for the handle's lifetime.
    pub(crate) fn iterate(&self) -> EvalResult<ValueIter> {
        match self {
            Self::Tuple(items) => Ok(ValueIter::Tuple {
                items: Arc::clone(items),
                index: 0,
            }),
            Self::List(list) => Ok(ValueIter::List(List::start_iter(list))),
            Self::Dict(dict) => Ok(ValueIter::Keys(Dict::start_key_iter(dict))),
            other => Err(EvalError::not_iterable(other.type_name())),
        }
    }

    /// Indexing: `x[i]`.
    ///
    /// Integer indices wrap negatively; string indexing is byte-based and
    /// yields one-byte strings. Dict lookup fails with `Index` when the key
    /// is absent.
    pub fn index(&self, index: &Self) -> EvalResult<Self> {
        match self {
            Self::List(list) => {
                let items = list.snapshot();
                let i = resolve_index(expect_int(index, "list index")?, items.len())?;
                Ok(items[i].clone())
            }
            Self::Tuple(items) => {
                let i = resolve_index(expect_int(index, "tuple index")?, items.len())?;
                Ok(items[i].clone())
            }
            Self::Str(s) => {
                let i = resolve_index(expect_int(index, "string index")?, s.len())?;
                Ok(Self::string(one_byte_str(s.as_bytes()[i])))
            }
            Self::Dict(dict) => dict.get(index)?.ok_or_else(|| {
                ErrorKind::Index.err(format!("key {} not found in dict", index.repr()))
            }),
            other => Err(EvalError::type_error(format!(
                "type '{}' has no operator [](...)",
                other.type_name()
            ))),
        }
    }

    /// Slicing: `x[start:stop:step]`.
    ///
    /// Step 0 is a `Value` error; bounds are clamped with step-direction
    /// awareness. Slicing a list creates a fresh list in the caller's scope.
    pub fn slice(
        &self,
        start: Option<i32>,
        stop: Option<i32>,
        step: Option<i32>,
        scope: &Scope,
    ) -> EvalResult<Self> {
        match self {
            Self::List(list) => {
                let items = slice_vec(&list.snapshot(), start, stop, step)?;
                Ok(Self::List(Arc::new(List::new(items, scope.clone()))))
            }
            Self::Tuple(items) => Ok(Self::Tuple(slice_vec(items, start, stop, step)?.into())),
            Self::Str(s) => {
                let picked = slice_indices(s.len(), start, stop, step)?;
                let mut out = Vec::with_capacity(picked.len());
                for i in picked {
                    out.push(s.as_bytes()[i]);
                }
                Ok(Self::string(String::from_utf8_lossy(&out).into_owned()))
            }
            other => Err(EvalError::type_error(format!(
                "type '{}' cannot be sliced",
                other.type_name()
            ))),
        }
    }

    /// Name of the value when used as a callee, for error messages.
    #[must_use]
    pub fn callable_name(&self) -> String {
        match self {
            Self::Function(function) => function.name.to_string(),
            Self::Native(native) => native.descriptor.name.to_string(),
            Self::Provider(provider) => provider
                .exported_name()
                .unwrap_or_else(|| "provider".to_owned()),
            other => other.type_name().to_owned(),
        }
    }
}

/// Escaped, double-quoted string rendering shared by `repr` and `%r`.
pub(crate) fn write_string_repr(out: &mut impl Write, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            '\t' => out.write_str("\\t")?,
            '\r' => out.write_str("\\r")?,
            c if (c as u32) < 0x20 => write!(out, "\\x{:02x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

/// A one-byte string; non-ASCII bytes map latin-1 style.
pub(crate) fn one_byte_str(byte: u8) -> String {
    char::from(byte).to_string()
}

fn expect_int(value: &Value, what: &str) -> EvalResult<i32> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(EvalError::type_error(format!(
            "{what} must be an int, got '{}'",
            other.type_name()
        ))),
    }
}

/// Resolves a possibly-negative index against a sequence length, failing with
/// `Index` when out of range.
pub(crate) fn resolve_index(index: i32, len: usize) -> EvalResult<usize> {
    let len_i = i32::try_from(len).unwrap_or(i32::MAX);
    let effective = if index < 0 { index + len_i } else { index };
    if effective < 0 || effective >= len_i {
        return Err(EvalError::index_out_of_range(index, len));
    }
    Ok(effective as usize)
}

fn compare_sequences<'a>(
    a: impl Iterator<Item = &'a Value>,
    b: impl Iterator<Item = &'a Value>,
    a_len: usize,
    b_len: usize,
) -> EvalResult<Ordering> {
    for (x, y) in a.zip(b) {
        match x.compare(y)? {
            Ordering::Equal => {}
            other => return Ok(other),
        }
    }
    Ok(a_len.cmp(&b_len))
}

/// Element indices selected by a slice, clamped with step-direction awareness.
pub(crate) fn slice_indices(
    len: usize,
    start: Option<i32>,
    stop: Option<i32>,
    step: Option<i32>,
) -> EvalResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(EvalError::value_error("slice step cannot be zero"));
    }
    let len_i = i64::from(i32::try_from(len).unwrap_or(i32::MAX));
    let clamp = |bound: i64, low: i64, high: i64| bound.clamp(low, high);
    let normalize = |bound: i32| {
        let b = i64::from(bound);
        if b < 0 { b + len_i } else { b }
    };
    let mut picked = Vec::new();
    if step > 0 {
        let begin = clamp(start.map_or(0, normalize), 0, len_i);
        let end = clamp(stop.map_or(len_i, normalize), 0, len_i);
        let mut i = begin;
        while i < end {
            picked.push(i as usize);
            i += i64::from(step);
        }
    } else {
        let begin = clamp(start.map_or(len_i - 1, normalize), -1, len_i - 1);
        let end = clamp(stop.map_or(-1, normalize), -1, len_i - 1);
        let mut i = begin;
        while i > end {
            picked.push(i as usize);
            i += i64::from(step);
        }
    }
    Ok(picked)
}

fn slice_vec(
    items: &[Value],
    start: Option<i32>,
    stop: Option<i32>,
    step: Option<i32>,
) -> EvalResult<Vec<Value>> {
    Ok(slice_indices(items.len(), start, stop, step)?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}

/// Iteration handle over a value.
///
/// Holds the container's read tag for mutable containers, so any structural
/// mutation attempt during iteration fails with `ConcurrentModification`.
pub(crate) enum ValueIter {
    Tuple { items: Arc<[Value]>, index: usize },
    List(crate::types::list::ListIter),
    Keys(crate::types::dict::DictKeyIter),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Tuple { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                item
            }
            Self::List(iter) => iter.next(),
            Self::Keys(iter) => iter.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_and_int_never_equal() {
        assert!(!Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Int(0).equals(&Value::Bool(false)));
        assert!(Value::Int(1).equals(&Value::Int(1)));
    }

    #[test]
    fn tuple_of_hashables_is_hashable() {
        let t = Value::tuple(vec![Value::Int(1), Value::string("x")]);
        assert!(t.is_hashable());
        assert!(t.hash_value().is_ok());

        let scope = Scope::new();
        let l = Value::List(Arc::new(List::new(vec![], scope)));
        let t = Value::tuple(vec![Value::Int(1), l]);
        assert!(!t.is_hashable());
        assert_eq!(t.hash_value().unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn repr_escapes_strings() {
        assert_eq!(Value::string("a\"b\n").repr(), "\"a\\\"b\\n\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
    }

    #[test]
    fn negative_index_wraps() {
        let t = Value::tuple(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        assert!(t.index(&Value::Int(-1)).unwrap().equals(&Value::Int(30)));
        assert_eq!(
            t.index(&Value::Int(3)).unwrap_err().kind,
            ErrorKind::Index
        );
    }

    #[test]
    fn slice_with_negative_step() {
        let idx = slice_indices(5, None, None, Some(-2)).unwrap();
        assert_eq!(idx, vec![4, 2, 0]);
        let err = slice_indices(5, None, None, Some(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
    }
}
