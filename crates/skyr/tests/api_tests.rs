//! Tests for the embedding surface: predeclared globals, the post-assign
//! hook, print capture, cancellation, tracing, and host-object registration.

use std::any::Any;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use skyr::{
    CancelFlag, CodeLoc, CollectStringPrint, ErrorKind, FileOptions, HostObject,
    MethodDescriptor, NoPrint, NoopTracer, ParamSpec, Semantics, Thread, Tracer, TypeConstraint,
    Value, parse, register_type_methods, resolve,
};

fn resolved(source: &str) -> (skyr::ResolvedFile, Arc<skyr::Universe>) {
    let parsed = parse(source, "test.bzl", FileOptions::default());
    let universe = skyr::builtins::standard_universe();
    (resolve(parsed, &universe), universe)
}

#[test]
fn predeclared_globals_are_visible_but_not_exported() {
    let (file, universe) = resolved("y = seed + 1\n");
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    let (module, errors) = skyr::evaluate(
        &file,
        universe,
        vec![("seed".into(), Value::Int(41))],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        None,
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
    assert_eq!(module.get_global("y").unwrap().repr(), "42");
    assert!(module.get_global("seed").is_none());
}

#[test]
fn post_assign_hook_sees_every_top_level_assignment() {
    let (file, universe) = resolved("a = 1\nb, c = 2, 3\ndef f():\n    pass\nd = [1][9]\ne = 5\n");
    let mut seen: Vec<String> = Vec::new();
    let mut hook = |name: &str, value: &Value| {
        seen.push(format!("{name}={}", value.repr()));
        Ok(())
    };
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    let (_, errors) = skyr::evaluate(
        &file,
        universe,
        vec![],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        Some(&mut hook),
    );
    // The failed statement `d = ...` produced an error but no binding, and
    // `def` is not an assignment.
    assert_eq!(errors.len(), 1);
    assert_eq!(seen, vec!["a=1", "b=2", "c=3", "e=5"]);
}

#[test]
fn hook_failures_do_not_stop_later_statements() {
    let (file, universe) = resolved("a = 1\nb = 2\n");
    let mut hook = |name: &str, _value: &Value| {
        if name == "a" {
            Err(ErrorKind::Value.err("export rejected"))
        } else {
            Ok(())
        }
    };
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    let (module, errors) = skyr::evaluate(
        &file,
        universe,
        vec![],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        Some(&mut hook),
    );
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("export rejected"));
    assert_eq!(module.get_global("b").unwrap().repr(), "2");
}

#[test]
fn print_goes_to_the_thread_writer() {
    let (file, universe) = resolved("print(1, \"a\", sep = \"|\")\nprint([1, 2])\n");
    let mut print = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let (_, errors) = skyr::evaluate(
        &file,
        universe,
        vec![],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        None,
    );
    assert!(errors.is_empty());
    assert_eq!(print.as_str(), "1|a\n[1, 2]\n");
}

#[test]
fn cancellation_surfaces_as_interrupted() {
    let (file, universe) = resolved("a = 1\nb = 2\n");
    let module = Arc::new(skyr::Module::new(
        "test.bzl",
        universe,
        skyr::Scope::new(),
    ));
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    let mut thread = Thread::new(Arc::new(Semantics::new()), &mut print, &mut tracer)
        .with_cancel(cancel);
    let errors = skyr::eval::eval_module(&file, &module, &mut thread, None);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Interrupted);
    // Nothing ran.
    assert!(module.get_global("a").is_none());
}

#[derive(Default)]
struct CountingTracer {
    statements: usize,
    calls: Vec<String>,
}

impl Tracer for CountingTracer {
    fn on_statement(&mut self, _loc: &CodeLoc) {
        self.statements += 1;
    }

    fn on_call(&mut self, function: &str, _call_site: &CodeLoc) {
        self.calls.push(function.to_owned());
    }
}

#[test]
fn tracer_observes_statements_and_calls() {
    let (file, universe) = resolved("def f(x):\n    return x\na = f(1)\nb = f(2)\n");
    let mut print = NoPrint;
    let mut tracer = CountingTracer::default();
    let (_, errors) = skyr::evaluate(
        &file,
        universe,
        vec![],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        None,
    );
    assert!(errors.is_empty());
    assert_eq!(tracer.calls, vec!["f", "f"]);
    // Three top-level statements plus one body statement per call.
    assert_eq!(tracer.statements, 5);
}

#[derive(Debug)]
struct Workspace {
    title: &'static str,
}

impl HostObject for Workspace {
    fn type_name(&self) -> &'static str {
        "test_workspace"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn workspace_of(value: &Value) -> &Workspace {
    let Value::Host(host) = value else {
        panic!("expected host receiver");
    };
    host.as_any()
        .downcast_ref::<Workspace>()
        .expect("receiver is a Workspace")
}

#[test]
fn host_objects_dispatch_fields_and_methods_through_the_registry() {
    register_type_methods(
        "test_workspace",
        vec![
            MethodDescriptor::field("title", |ctx, _args| {
                let workspace = workspace_of(ctx.receiver.as_ref().expect("receiver"));
                Ok(Value::string(workspace.title))
            }),
            MethodDescriptor::method("describe", |ctx, args| {
                let workspace = workspace_of(ctx.receiver.as_ref().expect("receiver"));
                let [prefix] = skyr::take_args(args);
                Ok(Value::string(format!(
                    "{}{}",
                    prefix.to_display(),
                    workspace.title
                )))
            })
            .params(vec![ParamSpec::required("prefix", TypeConstraint::Str)]),
        ],
    );

    let (file, universe) = resolved("t = ws.title\nd = ws.describe(\"ws: \")\n");
    let workspace: Arc<dyn HostObject> = Arc::new(Workspace { title: "demo" });
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    let (module, errors) = skyr::evaluate(
        &file,
        universe,
        vec![("ws".into(), Value::Host(workspace))],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        None,
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
    assert_eq!(module.get_global("t").unwrap().repr(), "\"demo\"");
    assert_eq!(module.get_global("d").unwrap().repr(), "\"ws: demo\"");
}
