//! The extension-evaluation node: given a [`LoadKey`], produce the
//! extension's exported bindings plus its flattened load dependencies,
//! enforcing acyclic loads and memoising published results.

use std::fmt::Write;
use std::sync::Arc;

use ahash::AHashSet;
use smallvec::SmallVec;
use tracing::{debug, info_span};

use crate::cache::{CachedNode, CachedNodeBuilder, DepGroup, EvalCache, NodeKey};
use crate::errors::{ErrorKind, EvalError, EvalResult};
use crate::eval::{Thread, eval_module};
use crate::io::StdPrint;
use crate::label::{Label, LoadKey, RepositoryMapper};
use crate::loader::{Loader, ParseOutcome};
use crate::module::Module;
use crate::scope::Scope;
use crate::semantics::Semantics;
use crate::tracer::NoopTracer;
use crate::value::Value;

/// Keys currently being evaluated on one logical loading thread. Load
/// chains are shallow in practice, so the stack stays inline.
type LoadStack = SmallVec<[LoadKey; 8]>;

/// The product of evaluating one extension.
///
/// Published results never carry errors: a file with any accumulated error
/// fails its node instead and is not memoised.
#[derive(Debug)]
pub struct LoadResult {
    /// The frozen module holding the exported bindings.
    pub exports: Arc<Module>,
    /// Every direct load dependency, in source order, deduplicated.
    pub deps: Vec<LoadKey>,
    /// Content digest of the extension's own file.
    pub digest: [u8; 32],
    /// Always empty for published results; present so embedders reusing the
    /// type for failed evaluations can carry the error list.
    pub errors: Vec<EvalError>,
}

/// The load graph: loader node + evaluation nodes + in-memory cache.
///
/// Distinct extensions may be evaluated from several threads concurrently;
/// the caches tolerate duplicated work and intern the first published node
/// per key. A single evaluation runs strictly single-threaded.
pub struct LoadGraph {
    loader: Arc<Loader>,
    mapper: Arc<dyn RepositoryMapper>,
    semantics: Arc<Semantics>,
    cache: EvalCache,
}

impl LoadGraph {
    #[must_use]
    pub fn new(
        loader: Arc<Loader>,
        mapper: Arc<dyn RepositoryMapper>,
        semantics: Arc<Semantics>,
    ) -> Self {
        Self {
            loader,
            mapper,
            semantics,
            cache: EvalCache::new(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &EvalCache {
        &self.cache
    }

    #[must_use]
    pub fn semantics(&self) -> &Arc<Semantics> {
        &self.semantics
    }

    /// Top-level entry: load one extension by label.
    pub fn load_extension(&self, label: Label) -> EvalResult<Arc<LoadResult>> {
        let key = LoadKey::for_label(label);
        self.load(&key)
    }

    /// Loads one extension by key.
    pub fn load(&self, key: &LoadKey) -> EvalResult<Arc<LoadResult>> {
        let mut stack: LoadStack = SmallVec::new();
        self.load_node(key, &mut stack)
            .map(|node| Arc::clone(node.value()))
    }

    /// The cached node for a key, computing it if needed. `stack` holds the
    /// keys currently being evaluated on this logical loading thread, for
    /// cycle detection.
    fn load_node(
        &self,
        key: &LoadKey,
        stack: &mut LoadStack,
    ) -> EvalResult<Arc<CachedNode>> {
        if let Some(at) = stack.iter().position(|k| k == key) {
            let mut message = String::from("cycle in load graph: ");
            for k in &stack[at..] {
                let _ = write!(message, "{} -> ", k.label);
            }
            let _ = write!(message, "{}", key.label);
            return Err(ErrorKind::LoadCycle.err(message));
        }
        if let Some(node) = self.cache.get(key) {
            debug!(label = %key.label, "load cache hit");
            return Ok(node);
        }

        let span = info_span!("load_extension", label = %key.label);
        let _guard = span.enter();

        stack.push(key.clone());
        let result = self.compute(key, stack);
        stack.pop();

        let builder = result?;
        let node = builder
            .build()
            .expect("compute only returns publishable builders");
        Ok(self.cache.intern(node))
    }

    fn compute(
        &self,
        key: &LoadKey,
        stack: &mut LoadStack,
    ) -> EvalResult<CachedNodeBuilder> {
        let mut builder = CachedNodeBuilder::new(key.clone());

        // Step 1: the loader node's result is the first dependency group.
        builder.add_direct_group(DepGroup(vec![NodeKey::Compile(key.clone())]));
        let outcome = match self.loader.parse_extension(key) {
            Ok(outcome) => outcome,
            Err(err) => {
                builder.note_error();
                return Err(err);
            }
        };
        let extension = match &*outcome {
            ParseOutcome::NoFile => {
                builder.note_error();
                return Err(ErrorKind::LoadMissing.err(format!(
                    "no such extension file: {}",
                    key.label
                )));
            }
            ParseOutcome::Compiled(extension) => Arc::clone(extension),
        };
        if extension.resolved.has_errors() {
            builder.note_error();
            let first = &extension.resolved.errors[0];
            return Err(ErrorKind::LoadFailed.err(format!(
                "extension {} has {} error{}; first: [{}] {}",
                key.label,
                extension.resolved.errors.len(),
                if extension.resolved.errors.len() == 1 { "" } else { "s" },
                first.kind,
                first.message,
            )));
        }

        // Step 2: resolve each load's module string to a key, in source
        // order, rejecting duplicates.
        let mut dep_keys: Vec<LoadKey> = Vec::new();
        let mut seen_modules: AHashSet<&str> = AHashSet::new();
        let mut load_specs: Vec<(&crate::expressions::LoadStmt, LoadKey)> = Vec::new();
        for load in extension.resolved.loads() {
            if !seen_modules.insert(load.module.as_str()) {
                builder.note_error();
                return Err(ErrorKind::Resolve
                    .err(format!(
                        "file {} is loaded twice; merge the load statements",
                        load.module
                    ))
                    .with_loc(extension.resolved.file.span_loc(load.module_span)));
            }
            let dep_label = self
                .mapper
                .resolve(&key.label, &load.module)
                .map_err(|err| {
                    builder.note_error();
                    err.with_loc(extension.resolved.file.span_loc(load.module_span))
                })?;
            let dep_key = LoadKey::for_label(dep_label);
            dep_keys.push(dep_key.clone());
            load_specs.push((load, dep_key));
        }
        builder.add_direct_group(DepGroup(
            dep_keys.iter().cloned().map(NodeKey::Load).collect(),
        ));

        // Step 3: evaluate dependencies. The group is one logical request
        // (the graph may run them in parallel), but error reporting always
        // prefers the first failing load in source order, which sequential
        // recursion gives us directly.
        let mut dep_nodes: Vec<Arc<CachedNode>> = Vec::new();
        for (load, dep_key) in &load_specs {
            match self.load_node(dep_key, stack) {
                Ok(node) => dep_nodes.push(node),
                Err(err) => {
                    builder.note_error();
                    // Cycle errors carry the full path already; anything else
                    // wraps into "the loaded extension failed".
                    if err.kind == ErrorKind::LoadCycle {
                        return Err(err);
                    }
                    return Err(ErrorKind::LoadFailed
                        .err(format!(
                            "in {}: cannot load '{}': [{}] {}",
                            key.label, load.module, err.kind, err.message
                        ))
                        .with_loc(extension.resolved.file.span_loc(load.module_span)));
                }
            }
        }
        for node in &dep_nodes {
            builder.add_transitive(Arc::clone(node));
        }

        // Steps 4-5: fresh scope + module, dependency bindings installed
        // under their local names.
        let universe = self.loader.predeclared().universe_for(key);
        let module = Arc::new(Module::new(
            key.label.to_string(),
            universe,
            Scope::new(),
        ));
        for ((load, _), node) in load_specs.iter().zip(&dep_nodes) {
            let dep_exports = &node.value().exports;
            for binding in &load.bindings {
                match dep_exports.get_global(&binding.original) {
                    Some(value) => {
                        module.install_loaded(Arc::clone(&binding.local.name), value);
                    }
                    None => {
                        builder.note_error();
                        let exported: Vec<(Arc<str>, Value)> = dep_exports.exports();
                        let mut message = format!(
                            "file {} does not export '{}'",
                            node.key().label,
                            binding.original
                        );
                        if let Some(suggestion) = crate::errors::did_you_mean(
                            &binding.original,
                            exported.iter().map(|(name, _)| name.as_ref()),
                        ) {
                            let _ = write!(message, " (did you mean '{suggestion}'?)");
                        }
                        return Err(ErrorKind::Name
                            .err(message)
                            .with_loc(extension.resolved.file.span_loc(binding.span)));
                    }
                }
            }
        }

        // Step 6: execute top-level statements with the export hook.
        let own_label = key.label.clone();
        let mut hook = move |name: &str, value: &Value| export_value(&own_label, name, value);
        let mut print = StdPrint;
        let mut tracer = NoopTracer;
        let mut thread = Thread::new(Arc::clone(&self.semantics), &mut print, &mut tracer);
        let errors = eval_module(
            &extension.resolved,
            &module,
            &mut thread,
            Some(&mut hook),
        );

        // Step 7: freeze and publish, unless any statement failed.
        module.freeze();
        if let Some(first) = errors.into_iter().next() {
            builder.note_error();
            return Err(first);
        }

        builder.set_value(Arc::new(LoadResult {
            exports: module,
            deps: dep_keys,
            digest: extension.digest,
            errors: Vec::new(),
        }));
        Ok(builder)
    }
}

/// The post-assignment export hook: values with unexported-label state learn
/// their own label and public name.
fn export_value(label: &Label, name: &str, value: &Value) -> EvalResult<()> {
    match value {
        Value::Provider(provider) if !provider.is_exported() => provider.export(label, name),
        Value::Host(host) if host.exportable() => host.export(label, name),
        _ => Ok(()),
    }
}
