use crate::errors::CodeLoc;

/// Observer hook threaded through the evaluator.
///
/// Replaces an ambient global debugger registration: hosts install a tracer
/// per evaluation thread and see statement execution and call entry/exit as
/// they happen. The default [`NoopTracer`] costs nothing.
pub trait Tracer {
    /// Called before each statement executes.
    fn on_statement(&mut self, _loc: &CodeLoc) {}

    /// Called when a script-defined function call begins.
    fn on_call(&mut self, _function: &str, _call_site: &CodeLoc) {}

    /// Called when a script-defined function call returns or unwinds.
    fn on_return(&mut self, _function: &str) {}
}

/// Observes nothing.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

/// Writes one line per event to stderr. Intended for debugging evaluations,
/// not for production use.
#[derive(Debug, Default)]
pub struct StderrTracer {
    depth: usize,
}

impl Tracer for StderrTracer {
    fn on_statement(&mut self, loc: &CodeLoc) {
        eprintln!("{:indent$}stmt {loc}", "", indent = self.depth * 2);
    }

    fn on_call(&mut self, function: &str, call_site: &CodeLoc) {
        eprintln!(
            "{:indent$}call {function} at {call_site}",
            "",
            indent = self.depth * 2
        );
        self.depth += 1;
    }

    fn on_return(&mut self, function: &str) {
        self.depth = self.depth.saturating_sub(1);
        eprintln!("{:indent$}ret  {function}", "", indent = self.depth * 2);
    }
}
