//! Host-method binding: the descriptor registry that exposes host functions,
//! methods and struct-fields to scripts.
//!
//! Descriptors declare their parameters (with type constraints, defaults and
//! feature-flag gates) and which interpreter extras they want. Lookup tables
//! are memoised per `(type name, semantics fingerprint)` so toggling a flag
//! cleanly invalidates every cached table.

use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::args::{CallArgs, join_names};
use crate::errors::{CodeLoc, EvalError, EvalResult};
use crate::eval::Thread;
use crate::expressions::CallExpr;
use crate::scope::Scope;
use crate::semantics::Semantics;
use crate::types::{Depset, Dict, List};
use crate::value::Value;

/// What kind of attribute a descriptor implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// A computed field: `x.f` invokes the descriptor immediately, with no
    /// argument list.
    Field,
    /// A regular method: `x.f` produces a bound callable.
    Method,
    /// `x(...)` where `x` itself is a host value.
    SelfCall,
}

/// Type constraint on one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeConstraint {
    Any,
    Int,
    Str,
    Bool,
    List,
    Dict,
    Tuple,
    Iterable,
    Callable,
    /// `int` or `None` (for optional index parameters).
    IntOrNone,
    /// `string` or `None`.
    StrOrNone,
}

impl TypeConstraint {
    fn admits(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Int => matches!(value, Value::Int(_)),
            Self::Str => matches!(value, Value::Str(_)),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::List => matches!(value, Value::List(_)),
            Self::Dict => matches!(value, Value::Dict(_)),
            Self::Tuple => matches!(value, Value::Tuple(_)),
            Self::Iterable => {
                matches!(value, Value::List(_) | Value::Tuple(_) | Value::Dict(_))
            }
            Self::Callable => matches!(
                value,
                Value::Function(_) | Value::Native(_) | Value::Provider(_)
            ),
            Self::IntOrNone => matches!(value, Value::Int(_) | Value::None),
            Self::StrOrNone => matches!(value, Value::Str(_) | Value::None),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Any => "any value",
            Self::Int => "int",
            Self::Str => "string",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Tuple => "tuple",
            Self::Iterable => "an iterable",
            Self::Callable => "a callable",
            Self::IntOrNone => "int or None",
            Self::StrOrNone => "string or None",
        }
    }
}

/// Default value applied to a missing optional parameter.
#[derive(Debug, Clone, Copy)]
pub enum DefaultSpec {
    /// No default: the parameter is mandatory.
    Required,
    None,
    Bool(bool),
    Int(i32),
    Str(&'static str),
    EmptyTuple,
}

impl DefaultSpec {
    fn materialize(self) -> Option<Value> {
        match self {
            Self::Required => None,
            Self::None => Some(Value::None),
            Self::Bool(b) => Some(Value::Bool(b)),
            Self::Int(i) => Some(Value::Int(i)),
            Self::Str(s) => Some(Value::string(s)),
            Self::EmptyTuple => Some(Value::Tuple(Arc::from([]))),
        }
    }
}

/// One declared parameter of a host method.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub constraint: TypeConstraint,
    pub default: DefaultSpec,
    /// Named-only parameters cannot be filled positionally.
    pub named_only: bool,
    /// Semantics flag that must be enabled for the parameter to exist.
    pub flag: Option<&'static str>,
}

impl ParamSpec {
    #[must_use]
    pub fn required(name: &'static str, constraint: TypeConstraint) -> Self {
        Self {
            name,
            constraint,
            default: DefaultSpec::Required,
            named_only: false,
            flag: None,
        }
    }

    #[must_use]
    pub fn optional(name: &'static str, constraint: TypeConstraint, default: DefaultSpec) -> Self {
        Self {
            name,
            constraint,
            default,
            named_only: false,
            flag: None,
        }
    }

    #[must_use]
    pub fn named_only(mut self) -> Self {
        self.named_only = true;
        self
    }

    #[must_use]
    pub fn gated_by(mut self, flag: &'static str) -> Self {
        self.flag = Some(flag);
        self
    }
}

/// The native implementation: bound argument slots in declared order
/// (`*`/`**` rest slots appended last), plus the call context.
pub type NativeImpl = fn(&mut CallCtx<'_, '_>, Vec<Value>) -> EvalResult<Value>;

/// A host-method descriptor: signature, extras, gates, implementation.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub kind: MethodKind,
    pub params: Vec<ParamSpec>,
    /// Collect excess positional arguments into a trailing tuple slot.
    pub takes_star: bool,
    /// Collect unknown keyword arguments into a trailing dict slot.
    pub takes_star_star: bool,
    pub wants_location: bool,
    pub wants_call: bool,
    pub wants_thread: bool,
    pub wants_semantics: bool,
    /// Semantics flag that must be enabled for the method to exist at all.
    pub flag: Option<&'static str>,
    pub func: NativeImpl,
}

impl MethodDescriptor {
    #[must_use]
    pub fn method(name: &'static str, func: NativeImpl) -> Self {
        Self {
            name,
            kind: MethodKind::Method,
            params: Vec::new(),
            takes_star: false,
            takes_star_star: false,
            wants_location: false,
            wants_call: false,
            wants_thread: false,
            wants_semantics: false,
            flag: None,
            func,
        }
    }

    #[must_use]
    pub fn field(name: &'static str, func: NativeImpl) -> Self {
        Self {
            kind: MethodKind::Field,
            ..Self::method(name, func)
        }
    }

    #[must_use]
    pub fn self_call(name: &'static str, func: NativeImpl) -> Self {
        Self {
            kind: MethodKind::SelfCall,
            ..Self::method(name, func)
        }
    }

    #[must_use]
    pub fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn star(mut self) -> Self {
        self.takes_star = true;
        self
    }

    #[must_use]
    pub fn star_star(mut self) -> Self {
        self.takes_star_star = true;
        self
    }

    #[must_use]
    pub fn wants_location(mut self) -> Self {
        self.wants_location = true;
        self
    }

    #[must_use]
    pub fn wants_call(mut self) -> Self {
        self.wants_call = true;
        self
    }

    #[must_use]
    pub fn wants_thread(mut self) -> Self {
        self.wants_thread = true;
        self
    }

    #[must_use]
    pub fn wants_semantics(mut self) -> Self {
        self.wants_semantics = true;
        self
    }

    #[must_use]
    pub fn gated_by(mut self, flag: &'static str) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Binds evaluated arguments against this descriptor.
    ///
    /// Same protocol as script functions: positional matching, named
    /// matching, duplicate rejection, defaults, rest-slot routing, and type
    /// constraint checks.
    pub(crate) fn bind(&self, args: CallArgs, scope: &Scope) -> EvalResult<Vec<Value>> {
        let callee = self.name;
        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        let mut rest_positional: Vec<Value> = Vec::new();

        let positional_limit = self
            .params
            .iter()
            .take_while(|p| !p.named_only)
            .count();
        let total_positional = args.positional.len();
        for (i, value) in args.positional.into_iter().enumerate() {
            if i < positional_limit {
                slots[i] = Some(value);
            } else if self.takes_star {
                rest_positional.push(value);
            } else {
                return Err(EvalError::type_error(format!(
                    "{callee}() accepts no more than {positional_limit} positional argument{} (got {total_positional})",
                    if positional_limit == 1 { "" } else { "s" },
                )));
            }
        }

        let mut rest_named: Vec<(Value, Value)> = Vec::new();
        let mut unexpected: Vec<Arc<str>> = Vec::new();
        for (name, value) in args.named {
            match self.params.iter().position(|p| p.name == name.as_ref()) {
                Some(index) => {
                    if slots[index].is_some() {
                        return Err(EvalError::type_error(format!(
                            "{callee}() got multiple values for parameter '{name}'"
                        )));
                    }
                    slots[index] = Some(value);
                }
                None if self.takes_star_star => rest_named.push((Value::Str(name), value)),
                None => unexpected.push(name),
            }
        }
        if !unexpected.is_empty() {
            return Err(EvalError::type_error(format!(
                "{callee}() got unexpected keyword argument{}: {}",
                if unexpected.len() == 1 { "" } else { "s" },
                join_names(unexpected.iter().map(AsRef::as_ref)),
            )));
        }

        let mut missing: Vec<&'static str> = Vec::new();
        let mut bound = Vec::with_capacity(
            self.params.len() + usize::from(self.takes_star) + usize::from(self.takes_star_star),
        );
        for (param, slot) in self.params.iter().zip(slots) {
            match slot {
                Some(value) => {
                    if !param.constraint.admits(&value) {
                        return Err(EvalError::type_error(format!(
                            "{callee}() parameter '{}' got value of type '{}', want {}",
                            param.name,
                            value.type_name(),
                            param.constraint.describe(),
                        )));
                    }
                    bound.push(value);
                }
                None => match param.default.materialize() {
                    Some(default) => bound.push(default),
                    None => missing.push(param.name),
                },
            }
        }
        if !missing.is_empty() {
            return Err(EvalError::type_error(format!(
                "{callee}() missing mandatory parameter{}: {}",
                if missing.len() == 1 { "" } else { "s" },
                join_names(missing.iter().copied()),
            )));
        }

        if self.takes_star {
            bound.push(Value::Tuple(rest_positional.into()));
        }
        if self.takes_star_star {
            bound.push(Value::Dict(Arc::new(Dict::from_pairs(
                rest_named,
                scope.clone(),
            )?)));
        }
        Ok(bound)
    }
}

/// A host callable value: a descriptor plus an optionally bound receiver.
#[derive(Debug)]
pub struct NativeCallable {
    pub descriptor: Arc<MethodDescriptor>,
    pub receiver: Option<Value>,
}

/// Wraps a descriptor as a free-function value for the universe.
#[must_use]
pub fn native_value(descriptor: MethodDescriptor) -> Value {
    Value::Native(Arc::new(NativeCallable {
        descriptor: Arc::new(descriptor),
        receiver: None,
    }))
}

/// Interpreter extras and receiver made available to a native
/// implementation. Fields the descriptor did not request stay `None`; they
/// are populated in the fixed declared order location, call AST, thread,
/// semantics.
pub struct CallCtx<'a, 'p> {
    /// The caller's mutation scope, for allocating result containers.
    pub scope: &'a Scope,
    pub receiver: Option<Value>,
    pub location: Option<CodeLoc>,
    pub call: Option<&'a CallExpr>,
    pub thread: Option<&'a mut Thread<'p>>,
    pub semantics: Option<Arc<Semantics>>,
}

impl CallCtx<'_, '_> {
    pub(crate) fn receiver_list(&self) -> EvalResult<&Arc<List>> {
        match &self.receiver {
            Some(Value::List(list)) => Ok(list),
            _ => Err(EvalError::type_error("method requires a list receiver")),
        }
    }

    pub(crate) fn receiver_dict(&self) -> EvalResult<&Arc<Dict>> {
        match &self.receiver {
            Some(Value::Dict(dict)) => Ok(dict),
            _ => Err(EvalError::type_error("method requires a dict receiver")),
        }
    }

    pub(crate) fn receiver_depset(&self) -> EvalResult<&Arc<Depset>> {
        match &self.receiver {
            Some(Value::Depset(depset)) => Ok(depset),
            _ => Err(EvalError::type_error("method requires a depset receiver")),
        }
    }
}

/// Destructures the bound slot vector; the binder enforced the arity.
pub fn take_args<const N: usize>(args: Vec<Value>) -> [Value; N] {
    args.try_into()
        .unwrap_or_else(|_| unreachable!("argument binder enforced arity"))
}

/// Filtered lookup tables for one type under one semantics.
#[derive(Debug, Default)]
pub struct TypeMethods {
    pub fields: AHashMap<&'static str, Arc<MethodDescriptor>>,
    pub methods: AHashMap<&'static str, Arc<MethodDescriptor>>,
    pub self_call: Option<Arc<MethodDescriptor>>,
}

impl TypeMethods {
    pub(crate) fn attr_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.keys().chain(self.methods.keys()).copied()
    }
}

struct Registry {
    /// Raw registrations per type name, before flag filtering.
    tables: RwLock<AHashMap<&'static str, Vec<Arc<MethodDescriptor>>>>,
    /// Memoised per `(type, semantics fingerprint)`. Entries may be computed
    /// racily by several threads; the map keeps whichever landed first.
    memo: DashMap<(&'static str, u64), Arc<TypeMethods>, ahash::RandomState>,
    /// Legacy function registry keyed by `(type, name)`, consulted after the
    /// method tables.
    legacy: DashMap<(String, String), Arc<MethodDescriptor>, ahash::RandomState>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry {
        tables: RwLock::new(AHashMap::new()),
        memo: DashMap::default(),
        legacy: DashMap::default(),
    };
    {
        let mut tables = registry.tables.write();
        tables.insert("string", arced(crate::types::string::methods()));
        tables.insert("list", arced(crate::types::list::methods()));
        tables.insert("dict", arced(crate::types::dict::methods()));
        tables.insert("depset", arced(crate::types::depset::methods()));
    }
    registry
});

fn arced(descriptors: Vec<MethodDescriptor>) -> Vec<Arc<MethodDescriptor>> {
    descriptors.into_iter().map(Arc::new).collect()
}

/// Registers host-type methods. Call before evaluation starts; existing
/// memoised tables for the type are invalidated.
pub fn register_type_methods(type_name: &'static str, descriptors: Vec<MethodDescriptor>) {
    let registry = &*REGISTRY;
    registry
        .tables
        .write()
        .entry(type_name)
        .or_default()
        .extend(arced(descriptors));
    registry.memo.retain(|(name, _), _| *name != type_name);
}

/// Registers a legacy `(type, name)` function, consulted after the method
/// tables during attribute lookup.
pub fn register_legacy_function(type_name: &str, descriptor: MethodDescriptor) {
    REGISTRY.legacy.insert(
        (type_name.to_owned(), descriptor.name.to_owned()),
        Arc::new(descriptor),
    );
}

/// The filtered method tables for a type under the given semantics.
///
/// Lookups happen on every call; the memo key includes the semantics
/// fingerprint so flag changes invalidate cleanly. Ambiguous registrations
/// (two self-call descriptors on one type) are programmer errors reported at
/// first lookup.
pub(crate) fn methods_for(type_name: &'static str, semantics: &Semantics) -> Arc<TypeMethods> {
    let key = (type_name, semantics.fingerprint());
    if let Some(table) = REGISTRY.memo.get(&key) {
        return Arc::clone(&table);
    }

    let mut built = TypeMethods::default();
    let tables = REGISTRY.tables.read();
    if let Some(descriptors) = tables.get(type_name) {
        for descriptor in descriptors {
            if let Some(flag) = descriptor.flag
                && !semantics.flag(flag)
            {
                continue;
            }
            // Drop parameters whose gate is disabled under this semantics.
            let filtered: Arc<MethodDescriptor> = if descriptor
                .params
                .iter()
                .any(|p| p.flag.is_some_and(|flag| !semantics.flag(flag)))
            {
                let mut narrowed = MethodDescriptor::clone(descriptor);
                narrowed
                    .params
                    .retain(|p| p.flag.is_none_or(|flag| semantics.flag(flag)));
                Arc::new(narrowed)
            } else {
                Arc::clone(descriptor)
            };
            match filtered.kind {
                MethodKind::Field => {
                    if built.fields.insert(filtered.name, filtered).is_some() {
                        panic!("duplicate field descriptor registered for {type_name}");
                    }
                }
                MethodKind::Method => {
                    if built.methods.insert(filtered.name, filtered).is_some() {
                        panic!("duplicate method descriptor registered for {type_name}");
                    }
                }
                MethodKind::SelfCall => {
                    if built.self_call.replace(filtered).is_some() {
                        panic!("duplicate selfCall descriptor registered for {type_name}");
                    }
                }
            }
        }
    }
    drop(tables);

    let built = Arc::new(built);
    // First insert wins under a race; either copy is equivalent.
    REGISTRY
        .memo
        .entry(key)
        .or_insert_with(|| Arc::clone(&built))
        .clone()
}

/// Looks up the legacy function registry.
pub(crate) fn legacy_function(type_name: &str, attr: &str) -> Option<Arc<MethodDescriptor>> {
    REGISTRY
        .legacy
        .get(&(type_name.to_owned(), attr.to_owned()))
        .map(|entry| Arc::clone(entry.value()))
}

/// Attribute access `x.attr`.
///
/// Order: data fields of structs, then struct-field descriptors (invoked
/// immediately), then regular methods (returned as bound callables), then the
/// legacy registry. A miss produces a `Name` error with a "did you mean"
/// suggestion over the type's known attributes.
pub(crate) fn get_attr(
    value: &Value,
    attr: &str,
    scope: &Scope,
    semantics: &Arc<Semantics>,
    location: CodeLoc,
    thread: &mut Thread<'_>,
) -> EvalResult<Value> {
    if let Value::Struct(struct_value) = value {
        if let Some(field) = struct_value.field(attr) {
            return Ok(field.clone());
        }
        return Err(EvalError::unknown_attr(
            value.type_name(),
            attr,
            struct_value.field_names(),
        ));
    }

    let type_name = value.type_name();
    let table = methods_for(type_name, semantics);
    if let Some(descriptor) = table.fields.get(attr) {
        let mut ctx = CallCtx {
            scope,
            receiver: Some(value.clone()),
            location: descriptor.wants_location.then(|| location.clone()),
            call: None,
            thread: descriptor.wants_thread.then_some(thread),
            semantics: descriptor.wants_semantics.then(|| Arc::clone(semantics)),
        };
        let bound = descriptor.bind(CallArgs::default(), scope)?;
        return (descriptor.func)(&mut ctx, bound);
    }
    if let Some(descriptor) = table.methods.get(attr) {
        return Ok(Value::Native(Arc::new(NativeCallable {
            descriptor: Arc::clone(descriptor),
            receiver: Some(value.clone()),
        })));
    }
    if let Some(descriptor) = legacy_function(type_name, attr) {
        return Ok(Value::Native(Arc::new(NativeCallable {
            descriptor,
            receiver: Some(value.clone()),
        })));
    }

    Err(EvalError::unknown_attr(
        type_name,
        attr,
        table.attr_names(),
    ))
}

/// The self-call descriptor for a host type, if one is registered.
pub(crate) fn self_call_for(
    type_name: &'static str,
    semantics: &Semantics,
) -> Option<Arc<MethodDescriptor>> {
    methods_for(type_name, semantics).self_call.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(_ctx: &mut CallCtx<'_, '_>, args: Vec<Value>) -> EvalResult<Value> {
        Ok(args.into_iter().next().unwrap_or(Value::None))
    }

    #[test]
    fn bind_applies_defaults_and_constraints() {
        let descriptor = MethodDescriptor::method("f", echo).params(vec![
            ParamSpec::required("a", TypeConstraint::Int),
            ParamSpec::optional("b", TypeConstraint::Str, DefaultSpec::Str("x")),
        ]);
        let scope = Scope::new();
        let bound = descriptor
            .bind(CallArgs::positional(vec![Value::Int(1)]), &scope)
            .unwrap();
        assert!(bound[1].equals(&Value::string("x")));

        let err = descriptor
            .bind(CallArgs::positional(vec![Value::string("no")]), &scope)
            .unwrap_err();
        assert!(err.message.contains("parameter 'a'"));
        assert!(err.message.contains("want int"));
    }

    #[test]
    fn semantics_flag_gates_method() {
        register_type_methods(
            "gated_test_type",
            vec![MethodDescriptor::method("only_with_flag", echo).gated_by("test_flag")],
        );
        let off = Semantics::new();
        let on = Semantics::new().with_flag("test_flag", true);
        assert!(
            methods_for("gated_test_type", &off)
                .methods
                .get("only_with_flag")
                .is_none()
        );
        assert!(
            methods_for("gated_test_type", &on)
                .methods
                .get("only_with_flag")
                .is_some()
        );
    }

    #[test]
    fn named_only_param_cannot_be_positional() {
        let descriptor = MethodDescriptor::method("f", echo).params(vec![
            ParamSpec::required("a", TypeConstraint::Any),
            ParamSpec::optional("b", TypeConstraint::Any, DefaultSpec::None).named_only(),
        ]);
        let scope = Scope::new();
        let err = descriptor
            .bind(
                CallArgs::positional(vec![Value::Int(1), Value::Int(2)]),
                &scope,
            )
            .unwrap_err();
        assert!(err.message.contains("accepts no more than 1 positional argument"));
    }
}
