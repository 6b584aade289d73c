use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

/// Process-wide counter backing symbol identity. Monotone; only freshness matters.
static SYM_COUNTER: AtomicU32 = AtomicU32::new(1);

/// A globally unique identifier with a printable hint.
///
/// Two symbols with identical printable names are distinct: equality and
/// hashing are by identity, never by spelling. Symbols outlive the IR trees
/// that mention them, and rewrites may freely reuse them or mint fresh ones.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Sym {
    id: u32,
    name: Arc<str>,
}

impl Sym {
    /// Mints a fresh symbol with the given printable hint.
    pub fn new(name: &str) -> Self {
        Self {
            id: SYM_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: Arc::from(name),
        }
    }

    /// The printable hint. Purely cosmetic; never used for identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Mints a fresh symbol sharing this symbol's printable hint.
    ///
    /// Used by capture-avoiding renames: the copy is a distinct identity that
    /// prints the same.
    pub fn copy(&self) -> Self {
        Self {
            id: SYM_COUNTER.fetch_add(1, Ordering::Relaxed),
            name: Arc::clone(&self.name),
        }
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Sym {}

impl Hash for Sym {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Resets the global symbol counter.
///
/// Exists for test isolation only; production callers rely on the counter
/// being monotone for the lifetime of the process.
pub fn reset_sym_counter() {
    SYM_COUNTER.store(1, Ordering::Relaxed);
}
