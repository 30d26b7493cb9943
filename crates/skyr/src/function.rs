use std::sync::Arc;

use crate::expressions::Stmt;
use crate::module::Module;
use crate::parse::{FileInfo, Span};
use crate::signature::Signature;
use crate::value::Value;

/// A script-defined function.
///
/// A closure over its defining module's globals: the body references no
/// enclosing function state (nested definitions are rejected at resolve
/// time), so the captured environment is exactly `module`. Defaults were
/// evaluated once, at definition time.
#[derive(Debug)]
pub struct Function {
    pub name: Arc<str>,
    pub signature: Signature,
    pub defaults: Vec<Value>,
    pub body: Arc<[Stmt]>,
    pub module: Arc<Module>,
    pub file: Arc<FileInfo>,
    /// Frame slots the call needs: parameters plus body locals.
    pub local_count: usize,
    pub def_span: Span,
}
