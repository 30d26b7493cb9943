//! skyr: a tree-walking interpreter for a Python-like build-extension
//! language, plus the incremental load graph that parses, resolves,
//! evaluates and caches `.bzl` extension files.
//!
//! The library splits into two layers:
//!
//! - the interpreter: [`parse::parse`] -> [`resolve::resolve`] ->
//!   [`eval::evaluate`], with scoped mutability ([`scope::Scope`]), the
//!   host-method registry ([`methods`]) and the stock universe
//!   ([`builtins::standard_universe`]);
//! - the graph: [`loader::Loader`] (parse one file, digest it),
//!   [`extension::LoadGraph`] (evaluate extensions, enforce acyclic loads)
//!   and [`cache::EvalCache`] (interned, traversable results).

mod args;
pub mod builtins;
pub mod cache;
pub mod errors;
pub mod eval;
pub mod expressions;
pub mod extension;
mod function;
pub mod io;
pub mod label;
pub mod loader;
pub mod methods;
pub mod module;
mod ops;
pub mod parse;
pub mod resolve;
pub mod scope;
pub mod semantics;
pub mod signature;
pub mod tracer;
pub mod types;
pub mod value;

pub use crate::{
    cache::{CachedNode, CachedNodeBuilder, DepGroup, EvalCache, NodeKey},
    errors::{CodeLoc, ErrorKind, EvalError, EvalResult, Frame, IoError},
    eval::{CancelFlag, PostAssignHook, Thread, evaluate},
    extension::{LoadGraph, LoadResult},
    function::Function,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    label::{DefaultMapper, Label, LoadKey, RepositoryMapper},
    loader::{
        CompiledExtension, FileStat, FileSystem, InMemoryFileSystem, Loader, OsFileSystem,
        ParseOutcome, PredeclaredProvider, StandardPredeclared,
    },
    methods::{
        CallCtx, DefaultSpec, MethodDescriptor, MethodKind, NativeCallable, ParamSpec,
        TypeConstraint, native_value, register_legacy_function, register_type_methods, take_args,
    },
    module::{Module, Universe},
    parse::{FileInfo, FileOptions, ParsedFile, Span, parse},
    resolve::{ResolvedFile, resolve},
    scope::Scope,
    semantics::Semantics,
    tracer::{NoopTracer, StderrTracer, Tracer},
    types::{Depset, DepsetOrder, Dict, List, Provider, ProviderIdent, StructValue, Type},
    value::{HostObject, Value},
};
