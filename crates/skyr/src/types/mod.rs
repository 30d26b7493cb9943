pub(crate) mod depset;
pub(crate) mod dict;
pub(crate) mod list;
pub(crate) mod string;
pub(crate) mod struct_value;

pub use depset::{Depset, DepsetOrder};
pub use dict::Dict;
pub use list::List;
pub use struct_value::{Provider, ProviderIdent, StructValue};

use strum::{Display as StrumDisplay, IntoStaticStr};

/// The dynamic type of a value, used for method-registry keys, argument
/// coercion and error messages.
///
/// Host objects are not listed here; they report their own type name and are
/// keyed by it in the method registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, IntoStaticStr)]
pub enum Type {
    #[strum(serialize = "NoneType")]
    NoneType,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "string")]
    Str,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "tuple")]
    Tuple,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "depset")]
    Depset,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "struct")]
    Struct,
    #[strum(serialize = "provider")]
    Provider,
}

impl Type {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}
