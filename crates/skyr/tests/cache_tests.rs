use std::sync::Arc;

use ahash::AHashSet;
use pretty_assertions::assert_eq;
use skyr::{
    DefaultMapper, DepGroup, InMemoryFileSystem, Label, LoadGraph, LoadKey, Loader, NodeKey,
    Semantics, StandardPredeclared,
};

fn graph_with(files: &[(&str, &str)]) -> LoadGraph {
    let fs = Arc::new(InMemoryFileSystem::new());
    for (path, contents) in files {
        fs.add_file(*path, *contents);
    }
    let loader = Arc::new(Loader::new(fs, Arc::new(StandardPredeclared::new())));
    LoadGraph::new(loader, Arc::new(DefaultMapper), Arc::new(Semantics::new()))
}

fn key(text: &str) -> LoadKey {
    LoadKey::for_label(Label::parse(text, None).unwrap())
}

/// Renders one dependency group compactly for comparison.
fn render(group: &DepGroup) -> Vec<String> {
    group
        .0
        .iter()
        .map(|node_key| match node_key {
            NodeKey::Compile(k) => format!("compile {}", k.label),
            NodeKey::Load(k) => format!("load {}", k.label),
        })
        .collect()
}

#[test]
fn traverse_emits_direct_groups_in_insertion_order() {
    let graph = graph_with(&[
        ("pkg/a.bzl", "x = 1\n"),
        ("pkg/b.bzl", "y = 2\n"),
        (
            "pkg/top.bzl",
            "load(\":a.bzl\", \"x\")\nload(\":b.bzl\", \"y\")\nz = x + y\n",
        ),
    ]);
    graph.load_extension(Label::parse("//pkg:top.bzl", None).unwrap()).unwrap();

    let node = graph.cache().get(&key("//pkg:top.bzl")).unwrap();
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut visited = AHashSet::new();
    node.traverse(&mut |group| groups.push(render(group)), &mut visited);

    // The node's own groups first: its loader request, then its load group.
    assert_eq!(groups[0], vec!["compile //pkg:top.bzl".to_owned()]);
    assert_eq!(
        groups[1],
        vec!["load //pkg:a.bzl".to_owned(), "load //pkg:b.bzl".to_owned()]
    );
    // Then each transitive dependency's groups, once each.
    assert!(groups.contains(&vec!["compile //pkg:a.bzl".to_owned()]));
    assert!(groups.contains(&vec!["compile //pkg:b.bzl".to_owned()]));
    assert_eq!(groups.len(), 4);
}

#[test]
fn traverse_visits_each_transitive_node_once() {
    // Diamond: top loads left and right, both load base.
    let graph = graph_with(&[
        ("pkg/base.bzl", "b = 1\n"),
        ("pkg/left.bzl", "load(\":base.bzl\", \"b\")\nl = b\n"),
        ("pkg/right.bzl", "load(\":base.bzl\", \"b\")\nr = b\n"),
        (
            "pkg/top.bzl",
            "load(\":left.bzl\", \"l\")\nload(\":right.bzl\", \"r\")\nt = l + r\n",
        ),
    ]);
    graph.load_extension(Label::parse("//pkg:top.bzl", None).unwrap()).unwrap();

    let node = graph.cache().get(&key("//pkg:top.bzl")).unwrap();
    let mut compile_base_count = 0;
    let mut visited = AHashSet::new();
    node.traverse(
        &mut |group| {
            if render(group).contains(&"compile //pkg:base.bzl".to_owned()) {
                compile_base_count += 1;
            }
        },
        &mut visited,
    );
    assert_eq!(compile_base_count, 1);
    // Everything reachable was marked visited.
    assert!(visited.contains(&key("//pkg:base.bzl")));
    assert!(visited.contains(&key("//pkg:left.bzl")));
    assert!(visited.contains(&key("//pkg:right.bzl")));
}

#[test]
fn traverse_with_preseeded_visited_set_skips_those_subtrees() {
    let graph = graph_with(&[
        ("pkg/base.bzl", "b = 1\n"),
        ("pkg/mid.bzl", "load(\":base.bzl\", \"b\")\nm = b\n"),
        ("pkg/top.bzl", "load(\":mid.bzl\", \"m\")\nt = m\n"),
    ]);
    graph.load_extension(Label::parse("//pkg:top.bzl", None).unwrap()).unwrap();

    let node = graph.cache().get(&key("//pkg:top.bzl")).unwrap();
    let mut visited = AHashSet::new();
    visited.insert(key("//pkg:mid.bzl"));
    let mut groups = 0;
    node.traverse(&mut |_| groups += 1, &mut visited);
    // Only top's own two groups: mid (and with it base) was already seen.
    assert_eq!(groups, 2);
}

#[test]
fn builder_without_value_or_with_error_publishes_nothing() {
    let incomplete = skyr::CachedNodeBuilder::new(key("//pkg:a.bzl"));
    assert!(incomplete.build().is_none());

    let mut poisoned = skyr::CachedNodeBuilder::new(key("//pkg:a.bzl"));
    poisoned.note_error();
    assert!(poisoned.build().is_none());
}

#[test]
fn cache_interns_the_first_published_node() {
    let graph = graph_with(&[("pkg/a.bzl", "x = 1\n")]);
    let label = Label::parse("//pkg:a.bzl", None).unwrap();
    graph.load_extension(label.clone()).unwrap();
    let first = graph.cache().get(&key("//pkg:a.bzl")).unwrap();
    graph.load_extension(label).unwrap();
    let second = graph.cache().get(&key("//pkg:a.bzl")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn concurrent_loads_agree_on_one_interned_node() {
    let graph = Arc::new(graph_with(&[
        ("pkg/shared.bzl", "token = [1]\n"),
        ("pkg/u1.bzl", "load(\":shared.bzl\", \"token\")\na = token\n"),
        ("pkg/u2.bzl", "load(\":shared.bzl\", \"token\")\nb = token\n"),
    ]));

    let threads: Vec<_> = ["//pkg:u1.bzl", "//pkg:u2.bzl"]
        .into_iter()
        .map(|target| {
            let graph = Arc::clone(&graph);
            let label = Label::parse(target, None).unwrap();
            std::thread::spawn(move || graph.load_extension(label).unwrap())
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    // Both threads see the same interned node for the shared dependency.
    let node = graph.cache().get(&key("//pkg:shared.bzl")).unwrap();
    let u1 = graph.cache().get(&key("//pkg:u1.bzl")).unwrap();
    let u2 = graph.cache().get(&key("//pkg:u2.bzl")).unwrap();
    assert!(u1.transitive().iter().any(|t| Arc::ptr_eq(t, &node)));
    assert!(u2.transitive().iter().any(|t| Arc::ptr_eq(t, &node)));
}
