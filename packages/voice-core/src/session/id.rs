//! Session identifiers.

use std::fmt;

/// A process-unique, opaque session identifier.
///
/// Rendered as lowercase hex text on the wire. Carries no structure clients
/// may rely on; it exists purely to key the session registry and correlate
/// log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u128);

impl SessionId {
    /// Generates a new random session identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(rand::random::<u128>())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl serde::Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_generated_ids_differ() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn renders_as_32_char_hex() {
        let id = SessionId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
