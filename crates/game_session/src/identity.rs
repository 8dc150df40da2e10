//! Player identity.

use crate::error::SessionError;
use std::fmt;

/// A player's display name and the topic key derived from it.
///
/// The id is the lowercased name and namespaces every player-scoped topic,
/// so it must be a single subject token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    display_name: String,
    id: String,
}

impl Identity {
    /// Builds an identity from a submitted name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name as typed; surrounding whitespace is ignored
    ///
    /// # Returns
    ///
    /// The identity, with the lowercased name as its id.
    /// [`SessionError::BlankName`] for an empty name and
    /// [`SessionError::InvalidName`] when the name contains whitespace, `.`,
    /// `*` or `>`, which cannot appear in a subject token.
    pub fn new(name: &str) -> Result<Self, SessionError> {
        let display_name = name.trim();
        if display_name.is_empty() {
            return Err(SessionError::BlankName);
        }
        if display_name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
        {
            return Err(SessionError::InvalidName(display_name.to_string()));
        }

        Ok(Self {
            display_name: display_name.to_string(),
            id: display_name.to_lowercase(),
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Lowercased name used in topic subjects and request bodies.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_lowercased_name() {
        let identity = Identity::new("  Bob ").unwrap();
        assert_eq!(identity.display_name(), "Bob");
        assert_eq!(identity.id(), "bob");
        assert_eq!(identity.to_string(), "Bob");
    }

    #[test]
    fn test_blank_name_rejected() {
        assert!(matches!(Identity::new(""), Err(SessionError::BlankName)));
        assert!(matches!(Identity::new(" \t "), Err(SessionError::BlankName)));
    }

    #[test]
    fn test_subject_breaking_names_rejected() {
        for name in ["Mary Jane", "a.b", "star*", "gt>"] {
            assert!(
                matches!(Identity::new(name), Err(SessionError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }
}
