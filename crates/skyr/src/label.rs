use std::fmt::{self, Display};
use std::sync::Arc;

use crate::errors::{ErrorKind, EvalResult};

/// A label naming one file inside a repository: `@repo//pkg:name`.
///
/// The repository component is empty for the main repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    repo: Arc<str>,
    package: Arc<str>,
    name: Arc<str>,
}

impl Label {
    pub fn new(repo: impl Into<Arc<str>>, package: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Self {
            repo: repo.into(),
            package: package.into(),
            name: name.into(),
        }
    }

    /// Parses label syntax.
    ///
    /// Accepted forms: `@repo//pkg:name`, `//pkg:name`, `//pkg` (name is the
    /// last package segment), `:name` and bare `name` (both relative to
    /// `current`'s repository and package).
    pub fn parse(text: &str, current: Option<&Self>) -> EvalResult<Self> {
        let bad = |why: &str| {
            ErrorKind::Value.err(format!("invalid label '{text}': {why}"))
        };

        let (repo, rest) = if let Some(after_at) = text.strip_prefix('@') {
            let Some(slashes) = after_at.find("//") else {
                return Err(bad("expected '//' after repository name"));
            };
            (&after_at[..slashes], &after_at[slashes..])
        } else {
            ("", text)
        };

        if let Some(rest) = rest.strip_prefix("//") {
            let (package, name) = match rest.split_once(':') {
                Some((package, name)) => (package, name),
                None => {
                    let name = rest.rsplit('/').next().unwrap_or(rest);
                    (rest, name)
                }
            };
            if name.is_empty() {
                return Err(bad("empty target name"));
            }
            let repo: Arc<str> = if repo.is_empty() {
                current.map_or_else(|| Arc::from(""), |c| Arc::clone(&c.repo))
            } else {
                Arc::from(repo)
            };
            return Ok(Self {
                repo,
                package: package.into(),
                name: name.into(),
            });
        }

        if !repo.is_empty() {
            return Err(bad("expected '//' after repository name"));
        }

        // Relative form: ':name' or bare 'name'.
        let name = rest.strip_prefix(':').unwrap_or(rest);
        if name.is_empty() {
            return Err(bad("empty target name"));
        }
        if name.contains(':') || name.contains("//") {
            return Err(bad("malformed target name"));
        }
        let Some(current) = current else {
            return Err(bad("relative label used without a current package"));
        };
        Ok(Self {
            repo: Arc::clone(&current.repo),
            package: Arc::clone(&current.package),
            name: name.into(),
        })
    }

    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    #[must_use]
    pub fn package(&self) -> &str {
        &self.package
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository-relative file path of the labelled file.
    #[must_use]
    pub fn file_path(&self) -> String {
        if self.package.is_empty() {
            self.name.to_string()
        } else {
            format!("{}/{}", self.package, self.name)
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.repo.is_empty() {
            write!(f, "//{}:{}", self.package, self.name)
        } else {
            write!(f, "@{}//{}:{}", self.repo, self.package, self.name)
        }
    }
}

/// Cache key of one extension evaluation.
///
/// The workspace fields are opaque host inputs: two evaluations with equal
/// keys must produce equal results, and skyr never interprets the chunk
/// number beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadKey {
    pub label: Label,
    pub in_workspace: bool,
    pub workspace_chunk: i32,
    pub workspace_path: Arc<str>,
}

impl LoadKey {
    /// Key for a regular (non-workspace) extension file.
    #[must_use]
    pub fn for_label(label: Label) -> Self {
        Self {
            label,
            in_workspace: false,
            workspace_chunk: -1,
            workspace_path: Arc::from(""),
        }
    }

    /// Key for a workspace-chunk evaluation. Chunk numbering is a host
    /// convention carried through unchanged.
    #[must_use]
    pub fn for_workspace(label: Label, chunk: i32, path: impl Into<Arc<str>>) -> Self {
        Self {
            label,
            in_workspace: true,
            workspace_chunk: chunk,
            workspace_path: path.into(),
        }
    }
}

impl Display for LoadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.label, f)
    }
}

/// Resolves the module string of a `load` statement to an absolute label.
///
/// A pure function of `(current file, module string)`; hosts supply their own
/// repository remapping by implementing this.
pub trait RepositoryMapper: Send + Sync {
    fn resolve(&self, current: &Label, module: &str) -> EvalResult<Label>;
}

/// Plain label-syntax resolution with no repository remapping.
#[derive(Debug, Default)]
pub struct DefaultMapper;

impl RepositoryMapper for DefaultMapper {
    fn resolve(&self, current: &Label, module: &str) -> EvalResult<Label> {
        Label::parse(module, Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_and_relative_forms() {
        let current = Label::parse("//pkg/sub:defs.bzl", None).unwrap();
        assert_eq!(current.package(), "pkg/sub");
        assert_eq!(current.name(), "defs.bzl");

        let relative = Label::parse(":util.bzl", Some(&current)).unwrap();
        assert_eq!(relative.to_string(), "//pkg/sub:util.bzl");

        let external = Label::parse("@rules//lib:a.bzl", None).unwrap();
        assert_eq!(external.repo(), "rules");
        assert_eq!(external.to_string(), "@rules//lib:a.bzl");
    }

    #[test]
    fn rejects_malformed_labels() {
        assert!(Label::parse("@rules:a.bzl", None).is_err());
        assert!(Label::parse("//pkg:", None).is_err());
        assert!(Label::parse(":a.bzl", None).is_err());
    }

    #[test]
    fn load_keys_compare_by_all_fields() {
        let label = Label::parse("//pkg:a.bzl", None).unwrap();
        let a = LoadKey::for_label(label.clone());
        let b = LoadKey::for_label(label.clone());
        let c = LoadKey::for_workspace(label, 0, "WORKSPACE");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
