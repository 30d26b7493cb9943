use std::sync::Arc;

use skyr::{ErrorKind, EvalError, FileOptions, Module, NoPrint, NoopTracer, Scope, Semantics, Value, parse, resolve};

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

#[test]
fn freeze_is_monotone_for_exported_values() {
    let (module, errors) = eval_source("l = [1]\nd = {1: 2}\n");
    assert!(errors.is_empty());
    assert!(module.scope().is_frozen());

    let Some(Value::List(list)) = module.get_global("l") else {
        panic!("expected list export");
    };
    let Some(Value::Dict(dict)) = module.get_global("d") else {
        panic!("expected dict export");
    };
    for _ in 0..2 {
        let err = list.append(module.scope(), Value::Int(9)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Immutable);
        let err = dict
            .insert(module.scope(), Value::Int(9), Value::Int(9))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Immutable);
    }
    // Reads still work on frozen values.
    assert_eq!(list.len(), 1);
    assert!(dict.get(&Value::Int(1)).unwrap().unwrap().equals(&Value::Int(2)));
}

#[test]
fn values_cannot_be_mutated_from_a_foreign_scope() {
    let owner = Scope::new();
    let list = skyr::List::new(vec![Value::Int(1)], owner.clone());
    let foreign = Scope::new();
    let err = list.append(&foreign, Value::Int(2)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Immutable);
    // The owning scope is still open, so its own mutations succeed.
    list.append(&owner, Value::Int(2)).unwrap();
    assert_eq!(list.len(), 2);
}

#[test]
fn mutating_a_list_during_iteration_fails() {
    let (_, errors) = eval_source(
        "l = [1, 2, 3]\nfor x in l:\n    l.append(x)\n",
    );
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::ConcurrentModification);
}

#[test]
fn mutating_a_dict_during_iteration_fails() {
    let (_, errors) = eval_source(
        "d = {1: 1}\nfor k in d:\n    d[k + 1] = k\n",
    );
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::ConcurrentModification);
}

#[test]
fn iteration_tag_clears_after_the_loop() {
    let (module, errors) = eval_source(
        "l = [1, 2]\ntotal = 0\nfor x in l:\n    total += x\nl.append(3)\n",
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
    let Some(Value::List(list)) = module.get_global("l") else {
        panic!("expected list export");
    };
    assert_eq!(list.len(), 3);
}

#[test]
fn tuples_are_immutable_without_any_scope() {
    let (module, errors) = eval_source("t = (1, [2])\n");
    assert!(errors.is_empty());
    let Some(Value::Tuple(items)) = module.get_global("t") else {
        panic!("expected tuple export");
    };
    // The nested list is still scope-gated: frozen with the module.
    let Value::List(nested) = &items[1] else {
        panic!("expected nested list");
    };
    let err = nested.append(module.scope(), Value::Int(3)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Immutable);
}
