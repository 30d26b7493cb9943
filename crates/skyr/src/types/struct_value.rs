use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::errors::{EvalError, EvalResult};
use crate::label::Label;
use crate::value::Value;

type Fields = IndexMap<Arc<str>, Value, ahash::RandomState>;

/// A record value with named fields, created whole by `struct(...)` or by
/// calling a provider. Immutable from birth.
#[derive(Debug)]
pub struct StructValue {
    /// The provider this instance was created by, if any. Plain `struct(...)`
    /// values carry `None`.
    provider: Option<Arc<Provider>>,
    fields: Fields,
}

impl StructValue {
    /// Builds a struct from evaluated keyword arguments. Fields are sorted by
    /// name so rendering and iteration are deterministic.
    pub fn from_kwargs(
        provider: Option<Arc<Provider>>,
        mut kwargs: Vec<(Arc<str>, Value)>,
    ) -> EvalResult<Self> {
        kwargs.sort_by(|(a, _), (b, _)| a.cmp(b));
        let mut fields = Fields::default();
        for (name, value) in kwargs {
            if fields.insert(Arc::clone(&name), value).is_some() {
                return Err(EvalError::value_error(format!(
                    "duplicate field '{name}'"
                )));
            }
        }
        Ok(Self { provider, fields })
    }

    #[must_use]
    pub fn provider(&self) -> Option<&Arc<Provider>> {
        self.provider.as_ref()
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(AsRef::as_ref)
    }

    /// Structural equality: same provider identity and equal fields.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        let providers_match = match (&self.provider, &other.provider) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        providers_match
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|(name, value)| other.fields.get(name).is_some_and(|v| value.equals(v)))
    }
}

/// The public identity a provider acquires when first assigned to a
/// top-level name: the defining extension's label plus that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdent {
    pub label: Label,
    pub name: String,
}

/// A provider: a constructor callable bound to a declared identity.
///
/// Freshly declared providers are anonymous; the post-assignment export hook
/// fills in the identity exactly once. Calling the provider creates a
/// [`StructValue`] tagged with it.
#[derive(Debug)]
pub struct Provider {
    ident: Mutex<Option<ProviderIdent>>,
    /// Declared field schema; `None` accepts any fields.
    schema: Option<Vec<String>>,
    doc: Option<String>,
}

impl Provider {
    #[must_use]
    pub fn new(schema: Option<Vec<String>>, doc: Option<String>) -> Self {
        Self {
            ident: Mutex::new(None),
            schema,
            doc,
        }
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    #[must_use]
    pub fn is_exported(&self) -> bool {
        self.ident.lock().is_some()
    }

    #[must_use]
    pub fn exported_name(&self) -> Option<String> {
        self.ident.lock().as_ref().map(|ident| ident.name.clone())
    }

    #[must_use]
    pub fn ident(&self) -> Option<ProviderIdent> {
        self.ident.lock().clone()
    }

    /// Records the provider's public identity. The first export wins; later
    /// assignments to other names are aliases and do not rename it.
    pub fn export(&self, label: &Label, name: &str) -> EvalResult<()> {
        let mut ident = self.ident.lock();
        if ident.is_none() {
            *ident = Some(ProviderIdent {
                label: label.clone(),
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Instantiates the provider from keyword arguments, validating them
    /// against the declared schema when one exists.
    pub fn instantiate(
        self: &Arc<Self>,
        kwargs: Vec<(Arc<str>, Value)>,
    ) -> EvalResult<StructValue> {
        if let Some(schema) = &self.schema {
            for (name, _) in &kwargs {
                if !schema.iter().any(|field| field == name.as_ref()) {
                    return Err(EvalError::value_error(format!(
                        "unexpected field '{name}' in {} instance (allowed fields: {})",
                        self.exported_name().unwrap_or_else(|| "provider".to_owned()),
                        schema.join(", ")
                    )));
                }
            }
        }
        StructValue::from_kwargs(Some(Arc::clone(self)), kwargs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn export_is_first_wins() {
        let provider = Provider::new(None, None);
        let label = Label::parse("//pkg:defs.bzl", None).unwrap();
        provider.export(&label, "Info").unwrap();
        provider.export(&label, "Alias").unwrap();
        assert_eq!(provider.exported_name().as_deref(), Some("Info"));
    }

    #[test]
    fn schema_rejects_unknown_fields() {
        let provider = Arc::new(Provider::new(Some(vec!["files".to_owned()]), None));
        let err = provider
            .instantiate(vec![("outputs".into(), Value::None)])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);

        let value = provider
            .instantiate(vec![("files".into(), Value::Int(1))])
            .unwrap();
        assert!(value.field("files").unwrap().equals(&Value::Int(1)));
    }

    #[test]
    fn struct_fields_are_sorted() {
        let s = StructValue::from_kwargs(
            None,
            vec![("b".into(), Value::Int(2)), ("a".into(), Value::Int(1))],
        )
        .unwrap();
        let names: Vec<&str> = s.field_names().collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
