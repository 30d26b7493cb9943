use std::sync::Arc;

use pretty_assertions::assert_eq;
use skyr::{
    ErrorKind, EvalError, FileOptions, Module, NoPrint, NoopTracer, Semantics, parse, resolve,
};

fn eval_source(source: &str) -> (Arc<Module>, Vec<EvalError>) {
    let parsed = parse(source, "test.bzl", FileOptions::default());
    let universe = skyr::builtins::standard_universe();
    let resolved = resolve(parsed, &universe);
    let mut print = NoPrint;
    let mut tracer = NoopTracer;
    skyr::evaluate(
        &resolved,
        universe,
        vec![],
        Arc::new(Semantics::new()),
        &mut print,
        &mut tracer,
        None,
    )
}

fn export_repr(source: &str, name: &str) -> String {
    let (module, errors) = eval_source(source);
    assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
    module
        .get_global(name)
        .unwrap_or_else(|| panic!("no export named '{name}'"))
        .repr()
}

fn first_error(source: &str) -> EvalError {
    let (_, errors) = eval_source(source);
    errors.into_iter().next().expect("expected an error")
}

#[test]
fn positional_and_named_arguments_bind_in_declared_order() {
    let source = "def f(a, b, c = 30):\n    return (a, b, c)\nx = f(1, c = 3, b = 2)\ny = f(1, 2)\n";
    assert_eq!(export_repr(source, "x"), "(1, 2, 3)");
    assert_eq!(export_repr(source, "y"), "(1, 2, 30)");
}

#[test]
fn duplicate_keyword_across_sources_is_reported() {
    // The duplicate arrives once as a plain keyword and once via **.
    let err = first_error("def f(**kw):\n    return kw\nx = f(a = 1, **{\"a\": 2})\n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("'a'"), "{}", err.message);
}

#[test]
fn star_expansion_preserves_order() {
    let source = "def f(*args):\n    return args\nx = f(1, *[2, 3], 4)\n";
    assert_eq!(export_repr(source, "x"), "(1, 2, 3, 4)");
}

#[test]
fn star_star_requires_dict_with_string_keys() {
    let err = first_error("def f(**kw):\n    return kw\nx = f(**[1])\n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("argument after **"));

    let err = first_error("def f(**kw):\n    return kw\nx = f(**{1: 2})\n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("keywords must be strings"));
}

#[test]
fn star_requires_iterable() {
    let err = first_error("def f(*args):\n    return args\nx = f(*7)\n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("argument after * must be iterable"));
}

#[test]
fn same_parameter_positionally_and_by_name_fails() {
    let err = first_error("def f(a):\n    return a\nx = f(1, a = 2)\n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("multiple values for parameter 'a'"));
}

#[test]
fn missing_and_unexpected_parameters_are_reported_by_name() {
    let err = first_error("def f(a, b):\n    return a\nx = f()\n");
    assert!(err.message.contains("missing mandatory parameters: 'a', 'b'"));

    let err = first_error("def f(a):\n    return a\nx = f(1, b = 2, c = 3)\n");
    assert!(err.message.contains("unexpected keyword arguments: 'b', 'c'"));
}

#[test]
fn kwargs_dict_preserves_source_order() {
    let source = "def f(**kw):\n    return kw.items()\nx = f(b = 1, a = 2)\n";
    assert_eq!(export_repr(source, "x"), "[(\"b\", 1), (\"a\", 2)]");
}

#[test]
fn defaults_are_evaluated_at_definition_time() {
    let source = "n = 1\ndef f(x = n):\n    return x\nn = 2\nv = f()\n";
    assert_eq!(export_repr(source, "v"), "1");
}

#[test]
fn recursion_is_an_error() {
    let err = first_error("def f(n):\n    return f(n - 1)\nx = f(3)\n");
    assert_eq!(err.kind, ErrorKind::Recursion);
    assert!(err.message.contains("'f' called recursively"));
}

#[test]
fn mutual_recursion_is_detected() {
    let err = first_error(
        "def g(n):\n    return h(n)\ndef h(n):\n    return g(n)\nx = g(1)\n",
    );
    assert_eq!(err.kind, ErrorKind::Recursion);
}

#[test]
fn errors_collect_call_frames_while_unwinding() {
    let err = first_error(
        "def inner():\n    return [1][5]\ndef outer():\n    return inner()\nx = outer()\n",
    );
    assert_eq!(err.kind, ErrorKind::Index);
    let functions: Vec<&str> = err.frames.iter().map(|f| f.function.as_str()).collect();
    // Innermost frame first.
    assert_eq!(functions, vec!["inner", "outer"]);
    assert!(err.loc.is_some());
}

#[test]
fn named_only_parameters_require_defaults_and_names() {
    let source = "def f(a, *, opt = 5):\n    return a + opt\nx = f(1, opt = 2)\ny = f(1)\n";
    assert_eq!(export_repr(source, "x"), "3");
    assert_eq!(export_repr(source, "y"), "6");
}

#[test]
fn functions_close_over_module_globals() {
    let source = "def f():\n    return base + 1\nbase = 10\nx = f()\n";
    assert_eq!(export_repr(source, "x"), "11");
}

#[test]
fn calling_a_non_callable_is_a_type_error() {
    let err = first_error("x = (42)(1)\n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("'int' value is not callable"));
}
