use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A bag of named boolean feature flags supplied by the host.
///
/// Flags gate individual host methods and method parameters; the descriptor
/// registry keys its memoised tables by [`Semantics::fingerprint`], so turning
/// a flag on or off cleanly invalidates every cached descriptor table.
///
/// Flag names are stable textual identifiers. Unset flags read as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Semantics {
    // BTreeMap keeps iteration order deterministic so the fingerprint is a
    // pure function of the flag contents.
    flags: BTreeMap<String, bool>,
}

impl Semantics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a named flag, returning `self` for builder-style chaining.
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(name.into(), enabled);
        self
    }

    pub fn set_flag(&mut self, name: impl Into<String>, enabled: bool) {
        self.flags.insert(name.into(), enabled);
    }

    /// Reads a flag; absent flags are disabled.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// A stable hash of the full flag assignment.
    ///
    /// Two `Semantics` with equal flag maps produce equal fingerprints; this
    /// is the cache-key component for descriptor lookup and load memoisation.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        for (name, enabled) in &self.flags {
            name.hash(&mut hasher);
            enabled.hash(&mut hasher);
        }
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_flags() {
        let a = Semantics::new().with_flag("allow_dict_concat", true);
        let b = Semantics::new().with_flag("allow_dict_concat", true);
        let c = Semantics::new().with_flag("allow_dict_concat", false);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = Semantics::new().with_flag("x", true).with_flag("y", false);
        let b = Semantics::new().with_flag("y", false).with_flag("x", true);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
