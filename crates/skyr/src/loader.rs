//! The loader node: resolves a [`LoadKey`] to parsed, resolved source plus a
//! content digest. Never evaluates the file.

use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{EvalResult, IoError};
use crate::label::LoadKey;
use crate::module::Universe;
use crate::parse::{FileOptions, parse};
use crate::resolve::{ResolvedFile, resolve};

/// Result of a `stat` call on the filesystem collaborator.
#[derive(Debug, Clone, Default)]
pub struct FileStat {
    pub exists: bool,
    pub is_regular: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub size: u64,
    /// Content digest, when the collaborator already knows it (e.g. from a
    /// content-addressed store); otherwise the loader hashes the bytes.
    pub digest: Option<[u8; 32]>,
}

/// The filesystem collaborator. Paths are repository-relative slash paths.
pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &str) -> Result<FileStat, IoError>;
    fn read(&self, path: &str, known_size: Option<u64>) -> Result<Vec<u8>, IoError>;
}

/// Real-filesystem collaborator rooted at a directory.
#[derive(Debug)]
pub struct OsFileSystem {
    root: PathBuf,
}

impl OsFileSystem {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl FileSystem for OsFileSystem {
    fn stat(&self, path: &str) -> Result<FileStat, IoError> {
        match std::fs::symlink_metadata(self.full_path(path)) {
            Ok(metadata) => Ok(FileStat {
                exists: true,
                is_regular: metadata.is_file(),
                is_directory: metadata.is_dir(),
                is_symlink: metadata.file_type().is_symlink(),
                size: metadata.len(),
                digest: None,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileStat::default()),
            Err(err) => Err(IoError::Other {
                path: path.to_owned(),
                message: err.to_string(),
            }),
        }
    }

    fn read(&self, path: &str, _known_size: Option<u64>) -> Result<Vec<u8>, IoError> {
        std::fs::read(self.full_path(path)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound {
                    path: path.to_owned(),
                }
            } else {
                IoError::Other {
                    path: path.to_owned(),
                    message: err.to_string(),
                }
            }
        })
    }
}

/// In-memory collaborator for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    files: RwLock<AHashMap<String, Vec<u8>>>,
}

impl InMemoryFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), contents.into());
    }
}

impl FileSystem for InMemoryFileSystem {
    fn stat(&self, path: &str) -> Result<FileStat, IoError> {
        Ok(match self.files.read().get(path) {
            Some(contents) => FileStat {
                exists: true,
                is_regular: true,
                is_directory: false,
                is_symlink: false,
                size: contents.len() as u64,
                digest: None,
            },
            None => FileStat::default(),
        })
    }

    fn read(&self, path: &str, _known_size: Option<u64>) -> Result<Vec<u8>, IoError> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::NotFound {
                path: path.to_owned(),
            })
    }
}

/// Chooses the universe of predeclared names (and per-file options) for a
/// key. BUILD, extension and workspace files may each see different
/// universes; the provider decides.
pub trait PredeclaredProvider: Send + Sync {
    fn universe_for(&self, key: &LoadKey) -> Arc<Universe>;

    fn options_for(&self, _key: &LoadKey) -> FileOptions {
        FileOptions::default()
    }
}

/// Serves the stock universe to every file.
pub struct StandardPredeclared {
    universe: Arc<Universe>,
}

impl StandardPredeclared {
    #[must_use]
    pub fn new() -> Self {
        Self {
            universe: crate::builtins::standard_universe(),
        }
    }
}

impl Default for StandardPredeclared {
    fn default() -> Self {
        Self::new()
    }
}

impl PredeclaredProvider for StandardPredeclared {
    fn universe_for(&self, _key: &LoadKey) -> Arc<Universe> {
        Arc::clone(&self.universe)
    }
}

/// A parsed and resolved extension file with its content digest.
#[derive(Debug)]
pub struct CompiledExtension {
    pub resolved: ResolvedFile,
    pub digest: [u8; 32],
}

/// The loader node's product: either "no such file" (a cacheable, distinct
/// outcome) or the compiled extension. Parse and resolve errors live on the
/// compiled file, not in an error return.
#[derive(Debug)]
pub enum ParseOutcome {
    NoFile,
    Compiled(Arc<CompiledExtension>),
}

/// Memoising loader over a filesystem collaborator.
pub struct Loader {
    fs: Arc<dyn FileSystem>,
    predeclared: Arc<dyn PredeclaredProvider>,
    cache: DashMap<LoadKey, Arc<ParseOutcome>, ahash::RandomState>,
}

impl Loader {
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, predeclared: Arc<dyn PredeclaredProvider>) -> Self {
        Self {
            fs,
            predeclared,
            cache: DashMap::default(),
        }
    }

    #[must_use]
    pub fn predeclared(&self) -> &Arc<dyn PredeclaredProvider> {
        &self.predeclared
    }

    /// Repository-relative path of the file a key names. External
    /// repositories live under `external/<repo>/`.
    fn file_path(key: &LoadKey) -> String {
        let path = key.label.file_path();
        if key.label.repo().is_empty() {
            path
        } else {
            format!("external/{}/{path}", key.label.repo())
        }
    }

    /// Parses and resolves the file a key names.
    ///
    /// Memoised per key. I/O failures surface verbatim as `Io` errors; a
    /// missing file is a successful [`ParseOutcome::NoFile`].
    pub fn parse_extension(&self, key: &LoadKey) -> EvalResult<Arc<ParseOutcome>> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(Arc::clone(&cached));
        }

        let path = Self::file_path(key);
        let stat = self.fs.stat(&path).map_err(IoError::into_eval)?;
        let outcome = if !stat.exists || !stat.is_regular {
            debug!(label = %key.label, "extension file does not exist");
            ParseOutcome::NoFile
        } else {
            let bytes = self
                .fs
                .read(&path, Some(stat.size))
                .map_err(IoError::into_eval)?;
            let digest = match stat.digest {
                Some(digest) => digest,
                None => Sha256::digest(&bytes).into(),
            };
            let source = String::from_utf8_lossy(&bytes);
            let options = self.predeclared.options_for(key);
            let parsed = parse(&source, &key.label.to_string(), options);
            let universe = self.predeclared.universe_for(key);
            let resolved = resolve(parsed, &universe);
            debug!(
                label = %key.label,
                errors = resolved.errors.len(),
                "parsed extension file"
            );
            ParseOutcome::Compiled(Arc::new(CompiledExtension { resolved, digest }))
        };

        let outcome = Arc::new(outcome);
        let entry = self
            .cache
            .entry(key.clone())
            .or_insert_with(|| Arc::clone(&outcome));
        Ok(Arc::clone(&entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Label;

    fn key(label: &str) -> LoadKey {
        LoadKey::for_label(Label::parse(label, None).unwrap())
    }

    #[test]
    fn missing_file_is_a_distinct_cacheable_outcome() {
        let fs = Arc::new(InMemoryFileSystem::new());
        let loader = Loader::new(fs, Arc::new(StandardPredeclared::new()));
        let outcome = loader.parse_extension(&key("//pkg:a.bzl")).unwrap();
        assert!(matches!(*outcome, ParseOutcome::NoFile));
    }

    #[test]
    fn parse_results_are_memoised_by_key() {
        let fs = Arc::new(InMemoryFileSystem::new());
        fs.add_file("pkg/a.bzl", "x = 1\n");
        let loader = Loader::new(fs, Arc::new(StandardPredeclared::new()));
        let first = loader.parse_extension(&key("//pkg:a.bzl")).unwrap();
        let second = loader.parse_extension(&key("//pkg:a.bzl")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn digest_is_computed_when_not_provided() {
        let fs = Arc::new(InMemoryFileSystem::new());
        fs.add_file("pkg/a.bzl", "x = 1\n");
        let loader = Loader::new(fs, Arc::new(StandardPredeclared::new()));
        let outcome = loader.parse_extension(&key("//pkg:a.bzl")).unwrap();
        let ParseOutcome::Compiled(ext) = &*outcome else {
            panic!("expected compiled outcome");
        };
        let expected: [u8; 32] = Sha256::digest(b"x = 1\n").into();
        assert_eq!(ext.digest, expected);
        assert!(!ext.resolved.has_errors());
    }
}
