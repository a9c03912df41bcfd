//! Change-propagation identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque, globally unique change-propagation identifier.
///
/// Represented as a 36-character textual UUID (v4). Immutable once minted;
/// a `Cpid` is never mutated in place, only replaced by a freshly minted one.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cpid(String);

impl Cpid {
    /// Mints a fresh, random cpid.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an existing string as a cpid without validating it.
    ///
    /// Used when reading a cpid back off the wire or out of an annotation,
    /// where [`crate::trace_context::validate`] is responsible for rejecting
    /// empty or duplicate values.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns true if this cpid carries no value.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cpid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Cpid> for String {
    fn from(c: Cpid) -> Self {
        c.0
    }
}

impl AsRef<str> for Cpid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_36_char_uuid() {
        let cpid = Cpid::generate();
        assert_eq!(cpid.as_str().len(), 36);
        assert!(!cpid.is_empty());
    }

    #[test]
    fn generate_is_random() {
        assert_ne!(Cpid::generate(), Cpid::generate());
    }

    #[test]
    fn serde_roundtrip_is_transparent() {
        let cpid = Cpid::from_raw("A");
        let json = serde_json::to_string(&cpid).unwrap();
        assert_eq!(json, "\"A\"");
        let back: Cpid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cpid);
    }
}
