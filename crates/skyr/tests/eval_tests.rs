use std::sync::Arc;

use pretty_assertions::assert_eq;
use skyr::{
    ErrorKind, EvalError, FileOptions, Module, NoPrint, NoopTracer, Semantics, Value, parse,
    resolve,
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

fn eval_ok(source: &str) -> Arc<Module> {
    let (module, errors) = eval_source(source);
    assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
    module
}

fn first_error(source: &str) -> EvalError {
    let (_, errors) = eval_source(source);
    errors.into_iter().next().expect("expected an error")
}

fn export(module: &Module, name: &str) -> Value {
    module
        .get_global(name)
        .unwrap_or_else(|| panic!("no export named '{name}'"))
}

#[test]
fn arithmetic_and_precedence() {
    let module = eval_ok("x = 2 + 3 * 4\ny = (20 - 2) // 4\nz = -7 % 3\n");
    assert_eq!(export(&module, "x").repr(), "14");
    assert_eq!(export(&module, "y").repr(), "4");
    // Sign of % follows the divisor.
    assert_eq!(export(&module, "z").repr(), "2");
}

#[test]
fn integer_overflow_is_arithmetic_error() {
    let err = first_error("x = 2147483647 + 1\n");
    assert_eq!(err.kind, ErrorKind::Arithmetic);
}

#[test]
fn string_formatting() {
    let module = eval_ok("a = \"%s-%d\" % (\"x\", 3)\nb = \"%r\" % \"y\"\nc = \"%s\" % {1: 2}\n");
    assert_eq!(export(&module, "a").repr(), "\"x-3\"");
    assert_eq!(export(&module, "b").repr(), "\"\\\"y\\\"\"");
    // A dict right operand formats as a single value.
    assert_eq!(export(&module, "c").repr(), "\"{1: 2}\"");
}

#[test]
fn dict_order_after_pop_and_put() {
    let module = eval_ok(
        "d = {0: 0, 2: 2, 1: 1}\nd.pop(2)\nd[0], d[2] = \"a\", \"b\"\nitems = d.items()\n",
    );
    assert_eq!(
        export(&module, "items").repr(),
        "[(0, \"a\"), (1, 1), (2, \"b\")]"
    );
}

#[test]
fn duplicate_dict_literal_key_fails_at_evaluation() {
    let err = first_error("d = {1: \"a\", 1: \"b\"}\n");
    assert_eq!(err.kind, ErrorKind::Value);
    assert!(err.message.contains("duplicate key 1"));
}

#[test]
fn comprehension_restores_shadowed_bindings() {
    let module = eval_ok("x = 99\nsquares = [x * x for x in [1, 2, 3]]\nafter = x\n");
    assert_eq!(export(&module, "squares").repr(), "[1, 4, 9]");
    assert_eq!(export(&module, "after").repr(), "99");
    // A comprehension variable that did not exist before vanishes again.
    let module = eval_ok("ys = [y for y in [1]]\n");
    assert!(module.get_global("y").is_none());
}

#[test]
fn nested_comprehension_clauses() {
    let module = eval_ok("pairs = [(a, b) for a in [1, 2] for b in [10, 20] if a + b > 11]\n");
    assert_eq!(
        export(&module, "pairs").repr(),
        "[(1, 20), (2, 10), (2, 20)]"
    );
    let module = eval_ok("d = {k: k * 2 for k in [1, 2]}\n");
    assert_eq!(export(&module, "d").repr(), "{1: 2, 2: 4}");
}

#[test]
fn for_break_continue() {
    let module = eval_ok(
        "total = 0\nfor i in [1, 2, 3, 4, 5]:\n    if i == 2:\n        continue\n    if i == 4:\n        break\n    total += i\n",
    );
    assert_eq!(export(&module, "total").repr(), "4");
}

#[test]
fn conditional_expression_short_circuits() {
    let module = eval_ok("x = 1 if True else [1][5]\ny = False or \"fallback\"\nz = None and [1][5]\n");
    assert_eq!(export(&module, "x").repr(), "1");
    // and/or yield the deciding operand itself, not a bool.
    assert_eq!(export(&module, "y").repr(), "\"fallback\"");
    assert_eq!(export(&module, "z").repr(), "None");
}

#[test]
fn slicing_with_clamping_and_negative_step() {
    let module = eval_ok(
        "l = [1, 2, 3, 4, 5]\na = l[1:3]\nb = l[::2]\nc = l[::-1]\nd = l[10:20]\ns = \"hello\"[1:-1]\n",
    );
    assert_eq!(export(&module, "a").repr(), "[2, 3]");
    assert_eq!(export(&module, "b").repr(), "[1, 3, 5]");
    assert_eq!(export(&module, "c").repr(), "[5, 4, 3, 2, 1]");
    assert_eq!(export(&module, "d").repr(), "[]");
    assert_eq!(export(&module, "s").repr(), "\"ell\"");
}

#[test]
fn slice_step_zero_is_value_error() {
    let err = first_error("x = [1, 2, 3][::0]\n");
    assert_eq!(err.kind, ErrorKind::Value);
}

#[test]
fn index_out_of_range_is_index_error() {
    let err = first_error("x = [1, 2][5]\n");
    assert_eq!(err.kind, ErrorKind::Index);
    let module = eval_ok("x = [1, 2, 3][-1]\n");
    assert_eq!(export(&module, "x").repr(), "3");
}

#[test]
fn destructuring_assignment() {
    let module = eval_ok("a, (b, c) = 1, (2, 3)\nd, e = [4, 5]\n");
    assert_eq!(export(&module, "a").repr(), "1");
    assert_eq!(export(&module, "c").repr(), "3");
    assert_eq!(export(&module, "e").repr(), "5");

    let err = first_error("a, b = [1, 2, 3]\n");
    assert_eq!(err.kind, ErrorKind::Value);
}

#[test]
fn augmented_assignment_mutates_lists_in_place() {
    let module = eval_ok("l = [1]\nalias = l\nl += [2, 3]\nsame = alias == [1, 2, 3]\n");
    assert_eq!(export(&module, "same").repr(), "True");
    let module = eval_ok("x = 10\nx -= 3\n");
    assert_eq!(export(&module, "x").repr(), "7");
}

#[test]
fn string_methods_dispatch_with_receiver_first() {
    let module = eval_ok(
        "a = \"a,b,c\".split(\",\")\nb = \"-\".join([\"x\", \"y\"])\nc = \"Hello\".startswith(\"He\")\nd = \"  pad  \".strip()\ne = \"ab\".elems()\n",
    );
    assert_eq!(export(&module, "a").repr(), "[\"a\", \"b\", \"c\"]");
    assert_eq!(export(&module, "b").repr(), "\"x-y\"");
    assert_eq!(export(&module, "c").repr(), "True");
    assert_eq!(export(&module, "d").repr(), "\"pad\"");
    assert_eq!(export(&module, "e").repr(), "[\"a\", \"b\"]");
}

#[test]
fn unknown_attribute_has_suggestion() {
    let err = first_error("x = [1].appnd(2)\n");
    assert_eq!(err.kind, ErrorKind::Name);
    assert!(err.message.contains("did you mean 'append'"), "{}", err.message);
}

#[test]
fn struct_and_provider_roundtrip() {
    let module = eval_ok(
        "s = struct(b = 2, a = 1)\nInfo = provider(fields = [\"count\"])\ni = Info(count = 3)\nn = i.count\n",
    );
    assert_eq!(export(&module, "s").repr(), "struct(a = 1, b = 2)");
    assert_eq!(export(&module, "n").repr(), "3");

    let err = first_error("Info = provider(fields = [\"a\"])\nx = Info(b = 1)\n");
    assert_eq!(err.kind, ErrorKind::Value);
}

#[test]
fn depset_flattening() {
    let module = eval_ok(
        "child = depset([1, 2])\nparent = depset([2, 3], transitive = [child])\nl = parent.to_list()\n",
    );
    assert_eq!(export(&module, "l").repr(), "[1, 2, 3]");
}

#[test]
fn depset_plus_is_rejected() {
    let err = first_error("x = depset([1]) + depset([2])\n");
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn builtins_cover_the_universe() {
    let module = eval_ok(
        "a = len(\"abc\")\nb = sorted([3, 1, 2], reverse = True)\nc = list(range(3))\nd = max([4, 7, 2])\ne = all([True, 1, \"x\"])\nf = list(zip([1, 2], [\"a\", \"b\"]))\ng = int(\"42\")\nh = type(())\n",
    );
    assert_eq!(export(&module, "a").repr(), "3");
    assert_eq!(export(&module, "b").repr(), "[3, 2, 1]");
    assert_eq!(export(&module, "c").repr(), "[0, 1, 2]");
    assert_eq!(export(&module, "d").repr(), "7");
    assert_eq!(export(&module, "e").repr(), "True");
    assert_eq!(export(&module, "f").repr(), "[(1, \"a\"), (2, \"b\")]");
    assert_eq!(export(&module, "g").repr(), "42");
    assert_eq!(export(&module, "h").repr(), "\"tuple\"");
}

#[test]
fn errors_do_not_hide_subsequent_statements() {
    let (module, errors) = eval_source("x = [1][9]\ny = 2\n");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Index);
    // The bad statement did not stop the next one.
    assert_eq!(export(&module, "y").repr(), "2");
    assert!(module.get_global("x").is_none());
}

#[test]
fn evaluation_is_deterministic() {
    let source = "d = {\"b\": 2, \"a\": 1}\nl = sorted([3, 1])\ndef f(x):\n    return x + 1\ny = f(1)\n";
    let (first, first_errors) = eval_source(source);
    let (second, second_errors) = eval_source(source);
    assert_eq!(first_errors, second_errors);
    let dump = |module: &Module| {
        module
            .exports()
            .iter()
            .map(|(name, value)| format!("{name}={}", value.repr()))
            .collect::<Vec<_>>()
    };
    assert_eq!(dump(&first), dump(&second));
}

#[test]
fn fail_builtin_aborts_the_statement() {
    let err = first_error("fail(\"boom:\", 42)\n");
    assert_eq!(err.kind, ErrorKind::Value);
    assert!(err.message.contains("boom: 42"));
}

#[test]
fn frozen_module_values_reject_mutation_after_evaluate() {
    let (module, errors) = eval_source("l = [1, 2]\n");
    assert!(errors.is_empty());
    let Value::List(list) = export(&module, "l") else {
        panic!("expected list");
    };
    // evaluate() froze the module's scope.
    let err = list
        .append(module.scope(), Value::Int(3))
        .expect_err("append on frozen scope");
    assert_eq!(err.kind, ErrorKind::Immutable);
}
