//! Guarded URI schemes.
//!
//! The remote peer serves some schemes itself. Forwarding an operation on
//! such a URI back to the peer through the bridge would loop, so every
//! facade operation checks the guard first and refuses guarded targets.
//!
//! The set is written rarely (at start-up and when the peer reports its
//! schemes) and read by every request, hence the `RwLock`.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::uri::scheme_of;

/// Shared set of schemes the bridge must not serve.
///
/// Schemes are compared ASCII case-insensitively.
#[derive(Debug, Default)]
pub struct SchemeGuard {
    schemes: RwLock<HashSet<String>>,
}

impl SchemeGuard {
    /// Create an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a guard pre-populated with `schemes`.
    #[must_use]
    pub fn with_schemes<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let guard = Self::new();
        guard.register(schemes);
        guard
    }

    /// Replace the guarded set with the schemes reported by the peer.
    pub fn register<I, S>(&self, schemes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let schemes: HashSet<String> = schemes
            .into_iter()
            .map(|s| s.as_ref().to_ascii_lowercase())
            .collect();
        debug!(schemes = ?schemes, "Registering guarded schemes");
        *self.schemes.write().unwrap_or_else(PoisonError::into_inner) = schemes;
    }

    /// Add one scheme. Returns `false` if it was already guarded.
    pub fn insert(&self, scheme: &str) -> bool {
        self.schemes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scheme.to_ascii_lowercase())
    }

    /// The scheme of `uri` if it is guarded.
    #[must_use]
    pub fn guarded_scheme<'a>(&self, uri: &'a str) -> Option<&'a str> {
        let scheme = scheme_of(uri)?;
        let schemes = self.schemes.read().unwrap_or_else(PoisonError::into_inner);
        let guarded = if scheme.bytes().any(|b| b.is_ascii_uppercase()) {
            schemes.contains(&scheme.to_ascii_lowercase())
        } else {
            schemes.contains(scheme)
        };
        guarded.then_some(scheme)
    }

    /// Whether operations on `uri` must be refused.
    #[must_use]
    pub fn is_guarded(&self, uri: &str) -> bool {
        self.guarded_scheme(uri).is_some()
    }

    /// The guarded schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self
            .schemes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        schemes.sort();
        schemes
    }
}
