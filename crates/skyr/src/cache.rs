//! The in-memory, per-build evaluation cache.
//!
//! Keyed by [`LoadKey`]; values are interned [`CachedNode`]s carrying the
//! evaluation result plus the ordered dependency-groups that produced it, so
//! a caller that bypassed the graph can re-register every dependency on
//! behalf of a third party via [`CachedNode::traverse`].

use std::sync::Arc;

use ahash::AHashSet;
use dashmap::DashMap;

use crate::extension::LoadResult;
use crate::label::LoadKey;

/// Identity of one graph node another node may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// The loader node: parse + resolve one file.
    Compile(LoadKey),
    /// The extension-evaluation node.
    Load(LoadKey),
}

/// An ordered set of node keys a node requested together, so the graph may
/// compute them in parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepGroup(pub Vec<NodeKey>);

/// One published cache entry.
///
/// Direct dependency-groups precede transitive nodes in insertion order; the
/// builder enforces this. Once built, a node is immutable.
#[derive(Debug)]
pub struct CachedNode {
    key: LoadKey,
    value: Arc<LoadResult>,
    direct_deps: Vec<DepGroup>,
    transitive: Vec<Arc<CachedNode>>,
}

impl CachedNode {
    #[must_use]
    pub fn key(&self) -> &LoadKey {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &Arc<LoadResult> {
        &self.value
    }

    #[must_use]
    pub fn direct_deps(&self) -> &[DepGroup] {
        &self.direct_deps
    }

    #[must_use]
    pub fn transitive(&self) -> &[Arc<CachedNode>] {
        &self.transitive
    }

    /// Re-registers this node's dependencies with `consumer`.
    ///
    /// Emits every direct dependency-group in insertion order, then recurses
    /// into each transitive node whose key is not yet in `visited` (adding it
    /// first). A caller starting with an empty set sees the same dependency
    /// stream the graph saw when the node was computed.
    pub fn traverse(&self, consumer: &mut dyn FnMut(&DepGroup), visited: &mut AHashSet<LoadKey>) {
        for group in &self.direct_deps {
            consumer(group);
        }
        for child in &self.transitive {
            if visited.insert(child.key.clone()) {
                child.traverse(consumer, visited);
            }
        }
    }
}

/// Builder for a [`CachedNode`].
///
/// A node is published only when the builder observed no error and has both
/// a key and a value; anything else builds to `None`.
#[derive(Debug)]
pub struct CachedNodeBuilder {
    key: LoadKey,
    value: Option<Arc<LoadResult>>,
    direct_deps: Vec<DepGroup>,
    transitive: Vec<Arc<CachedNode>>,
    failed: bool,
}

impl CachedNodeBuilder {
    #[must_use]
    pub fn new(key: LoadKey) -> Self {
        Self {
            key,
            value: None,
            direct_deps: Vec::new(),
            transitive: Vec::new(),
            failed: false,
        }
    }

    /// Records one direct dependency-group. Direct groups must all be added
    /// before the first transitive node.
    pub fn add_direct_group(&mut self, group: DepGroup) {
        assert!(
            self.transitive.is_empty(),
            "direct dependency-groups must precede transitive nodes"
        );
        self.direct_deps.push(group);
    }

    pub fn add_transitive(&mut self, node: Arc<CachedNode>) {
        self.transitive.push(node);
    }

    pub fn set_value(&mut self, value: Arc<LoadResult>) {
        self.value = Some(value);
    }

    /// Marks the builder poisoned; it will never publish.
    pub fn note_error(&mut self) {
        self.failed = true;
    }

    #[must_use]
    pub fn build(self) -> Option<Arc<CachedNode>> {
        if self.failed {
            return None;
        }
        let value = self.value?;
        Some(Arc::new(CachedNode {
            key: self.key,
            value,
            direct_deps: self.direct_deps,
            transitive: self.transitive,
        }))
    }
}

/// The keyed cache. Concurrent lookups and inserts are safe; racing
/// computations of the same key are tolerated and the first published node
/// wins, so the key-to-node mapping stays interned.
#[derive(Debug, Default)]
pub struct EvalCache {
    nodes: DashMap<LoadKey, Arc<CachedNode>, ahash::RandomState>,
}

impl EvalCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &LoadKey) -> Option<Arc<CachedNode>> {
        self.nodes.get(key).map(|node| Arc::clone(&node))
    }

    /// Publishes a node, returning the interned instance (the existing one if
    /// another thread won the race).
    pub fn intern(&self, node: Arc<CachedNode>) -> Arc<CachedNode> {
        let entry = self
            .nodes
            .entry(node.key.clone())
            .or_insert_with(|| Arc::clone(&node));
        Arc::clone(&entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
