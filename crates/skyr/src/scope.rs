use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::errors::{EvalError, EvalResult};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

/// A single lifetime domain for mutable values.
///
/// Every mutable container holds the `Scope` it was created in; every mutator
/// takes the caller's scope and fails with `Immutable` when the two differ or
/// when the owning scope has been frozen. Freezing flips one atomic flag: the
/// scope never enumerates its values, so freezing is O(1) and nested values
/// are frozen because they share the same (or an already frozen) scope.
///
/// Cloning a `Scope` clones the handle, not the domain: clones compare equal
/// via [`Scope::same_as`] and freeze together.
#[derive(Debug, Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug)]
struct ScopeInner {
    id: u64,
    frozen: AtomicBool,
}

impl Scope {
    /// Creates a fresh, open scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
                frozen: AtomicBool::new(false),
            }),
        }
    }

    /// Freezes the scope. One-way: there is no thaw.
    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same lifetime domain.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Numeric identity, used only for diagnostics.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Transient "being read" tag on a container.
///
/// Starting iteration increments the count; any structural mutation while the
/// count is nonzero fails with `ConcurrentModification`. The count is
/// decremented when the iteration guard drops, including on exceptional exit.
#[derive(Debug, Default)]
pub(crate) struct ReadTag {
    active: AtomicU32,
}

impl ReadTag {
    pub fn is_reading(&self) -> bool {
        self.active.load(Ordering::Acquire) != 0
    }

    /// Tags the container as being read for the guard's lifetime.
    pub fn start(&self) -> ReadGuard<'_> {
        self.begin();
        ReadGuard { tag: self }
    }

    /// Raw increment, paired with [`ReadTag::end`]. Used by iterators that
    /// own the container `Arc` and cannot borrow a guard.
    pub fn begin(&self) {
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// RAII guard for [`ReadTag::start`].
pub(crate) struct ReadGuard<'a> {
    tag: &'a ReadTag,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.tag.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shared mutation gate for container cells.
///
/// `what` names the container type for error messages ("list", "dict").
pub(crate) fn check_mutable(
    owner: &Scope,
    caller: &Scope,
    reads: &ReadTag,
    what: &str,
) -> EvalResult<()> {
    if owner.is_frozen() {
        return Err(EvalError::immutable(what));
    }
    if !owner.same_as(caller) {
        return Err(EvalError::foreign_scope(what));
    }
    if reads.is_reading() {
        return Err(EvalError::concurrent_modification(what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_is_monotone() {
        let scope = Scope::new();
        assert!(!scope.is_frozen());
        scope.freeze();
        assert!(scope.is_frozen());
        scope.freeze();
        assert!(scope.is_frozen());
    }

    #[test]
    fn clones_share_the_domain() {
        let scope = Scope::new();
        let alias = scope.clone();
        assert!(scope.same_as(&alias));
        alias.freeze();
        assert!(scope.is_frozen());
        assert!(!scope.same_as(&Scope::new()));
    }

    #[test]
    fn read_tag_clears_on_drop() {
        let tag = ReadTag::default();
        {
            let _guard = tag.start();
            assert!(tag.is_reading());
            let _nested = tag.start();
            assert!(tag.is_reading());
        }
        assert!(!tag.is_reading());
    }

    #[test]
    fn check_mutable_distinguishes_failures() {
        let owner = Scope::new();
        let reads = ReadTag::default();
        assert!(check_mutable(&owner, &owner, &reads, "list").is_ok());

        let foreign = Scope::new();
        let err = check_mutable(&owner, &foreign, &reads, "list").unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Immutable);

        owner.freeze();
        let err = check_mutable(&owner, &owner, &reads, "list").unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::Immutable);
    }
}
