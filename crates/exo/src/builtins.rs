use std::sync::LazyLock;

use ahash::AHashMap;
use strum::IntoEnumIterator;

/// Built-in functions available inside every procedure body.
///
/// These are seeded into the procedure scope before parsing begins; the
/// numeric semantics live with the code generators, the core only records
/// the call.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltIn {
    Sin,
    Relu,
    /// `select(x, v, y)`: `y` where `x < v`, zero otherwise.
    Select,
}

impl BuiltIn {
    pub fn arity(self) -> usize {
        match self {
            Self::Sin | Self::Relu => 1,
            Self::Select => 3,
        }
    }
}

/// Name-keyed builtin registry, initialised once at startup.
static REGISTRY: LazyLock<AHashMap<&'static str, BuiltIn>> = LazyLock::new(|| {
    BuiltIn::iter()
        .map(|b| {
            let name: &'static str = match b {
                BuiltIn::Sin => "sin",
                BuiltIn::Relu => "relu",
                BuiltIn::Select => "select",
            };
            (name, b)
        })
        .collect()
});

pub(crate) fn lookup(name: &str) -> Option<BuiltIn> {
    REGISTRY.get(name).copied()
}

pub(crate) fn all() -> impl Iterator<Item = (&'static str, BuiltIn)> {
    REGISTRY.iter().map(|(name, b)| (*name, *b))
}
