use std::{fmt, sync::Arc};

/// A memory annotation handle (`x : f32[n] @ DRAM`).
///
/// The core only records which memory a buffer lives in; the actual memory
/// library (allocation strategy, codegen hooks) is an external catalogue.
/// Two handles are the same memory when their names match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Memory {
    name: Arc<str>,
}

impl Memory {
    pub fn new(name: &str) -> Self {
        Self { name: Arc::from(name) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
