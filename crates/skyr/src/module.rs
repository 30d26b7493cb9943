use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::errors::{EvalError, EvalResult};
use crate::scope::Scope;
use crate::value::Value;

type OrderedBindings = IndexMap<Arc<str>, Value, ahash::RandomState>;

/// The immutable top-level namespace shared by every module: predeclared
/// names like `len`, `range`, `struct` and `depset`.
///
/// The host chooses the universe per file kind through the predeclared-names
/// provider; [`crate::builtins::standard_universe`] builds the stock one.
#[derive(Debug, Default)]
pub struct Universe {
    names: OrderedBindings,
}

impl Universe {
    #[must_use]
    pub fn new(entries: Vec<(Arc<str>, Value)>) -> Self {
        let mut names = OrderedBindings::default();
        for (name, value) in entries {
            names.insert(name, value);
        }
        Self { names }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(AsRef::as_ref)
    }
}

/// The globals of one evaluated file.
///
/// An ordered `name -> Value` mapping plus a reference to the universe of
/// predeclared names. Loaded bindings live in a separate layer: they are in
/// scope for the file's code but are not part of the module's exports.
///
/// Lookup order inside an evaluating frame is local slot, then module
/// globals, then loaded bindings, then universe.
#[derive(Debug)]
pub struct Module {
    name: Arc<str>,
    universe: Arc<Universe>,
    scope: Scope,
    globals: RwLock<OrderedBindings>,
    loaded: RwLock<AHashMap<Arc<str>, Value>>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, universe: Arc<Universe>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            universe,
            scope,
            globals: RwLock::new(OrderedBindings::default()),
            loaded: RwLock::new(AHashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn universe(&self) -> &Arc<Universe> {
        &self.universe
    }

    /// Installs one loaded binding. Loaded bindings are visible to the file's
    /// code but never re-exported.
    pub fn install_loaded(&self, name: impl Into<Arc<str>>, value: Value) {
        self.loaded.write().insert(name.into(), value);
    }

    /// Full lookup: globals, then loaded bindings, then universe.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.globals.read().get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.loaded.read().get(name) {
            return Some(value.clone());
        }
        self.universe.get(name).cloned()
    }

    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.read().get(name).cloned()
    }

    /// Binds a global. Reassignment keeps the name's insertion position.
    pub fn set(&self, name: impl Into<Arc<str>>, value: Value) -> EvalResult<()> {
        if self.scope.is_frozen() {
            return Err(EvalError::immutable("module"));
        }
        self.globals.write().insert(name.into(), value);
        Ok(())
    }

    /// Removes a global binding; used to restore the namespace after
    /// top-level comprehensions. Not part of the language surface.
    pub(crate) fn remove_global(&self, name: &str) {
        self.globals.write().shift_remove(name);
    }

    /// Names visible to code in this module, for "did you mean" suggestions.
    #[must_use]
    pub fn visible_names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self.globals.read().keys().cloned().collect();
        names.extend(self.loaded.read().keys().cloned());
        names.extend(self.universe.names().map(Arc::from));
        names
    }

    /// The module's exported bindings, in assignment order. Loaded bindings
    /// are excluded.
    #[must_use]
    pub fn exports(&self) -> Vec<(Arc<str>, Value)> {
        self.globals
            .read()
            .iter()
            .map(|(name, value)| (Arc::clone(name), value.clone()))
            .collect()
    }

    /// Freezes the module's scope, making every value it owns immutable.
    pub fn freeze(&self) {
        self.scope.freeze();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_order_is_global_loaded_universe() {
        let universe = Arc::new(Universe::new(vec![("x".into(), Value::Int(1))]));
        let module = Module::new("//pkg:m.bzl", universe, Scope::new());
        assert!(module.get("x").unwrap().equals(&Value::Int(1)));

        module.install_loaded("x", Value::Int(2));
        assert!(module.get("x").unwrap().equals(&Value::Int(2)));

        module.set("x", Value::Int(3)).unwrap();
        assert!(module.get("x").unwrap().equals(&Value::Int(3)));
    }

    #[test]
    fn loaded_bindings_are_not_exported() {
        let module = Module::new("//pkg:m.bzl", Arc::new(Universe::default()), Scope::new());
        module.install_loaded("x", Value::Int(1));
        module.set("y", Value::Int(2)).unwrap();
        let exports = module.exports();
        assert_eq!(exports.len(), 1);
        assert_eq!(&*exports[0].0, "y");
    }

    #[test]
    fn frozen_module_rejects_set() {
        let module = Module::new("//pkg:m.bzl", Arc::new(Universe::default()), Scope::new());
        module.freeze();
        let err = module.set("y", Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Immutable);
    }
}
