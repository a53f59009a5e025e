//! Typed identifiers for notes and folders.
//!
//! Server-issued ids are arbitrary strings, so both types wrap a `String`
//! and are transparent on the wire. Note ids are always minted on the client
//! (UUIDv7, time-ordered) and accepted by the server as-is. Folder ids are
//! issued by the server; a folder created while offline carries a
//! *temporary* id (`tmp-<uuidv7>`) until the outbox replays its create and
//! the mirror is reconciled onto the server id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix that marks a client-minted placeholder folder id.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// A note identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

/// A folder identifier (server-issued, or temporary while offline).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// First 8 characters, for display only.
            pub fn short(&self) -> &str {
                let end = self
                    .0
                    .char_indices()
                    .nth(8)
                    .map(|(i, _)| i)
                    .unwrap_or(self.0.len());
                &self.0[..end]
            }

            /// Consume into the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_typed_id!(NoteId, "NoteId");
impl_typed_id!(FolderId, "FolderId");

impl NoteId {
    /// Mint a new time-ordered note id (UUIDv7).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl FolderId {
    /// Mint a placeholder id for a folder created while offline.
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::now_v7()))
    }

    /// Whether this id is a client-minted placeholder.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

// ── Entity keys ─────────────────────────────────────────────────────────────

/// A logical entity touched by a mutation.
///
/// The string form (`note:<id>`, `folder:<id>`, `settings`) is what the
/// outbox and history collections index on.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum EntityKey {
    Note(NoteId),
    Folder(FolderId),
    Settings,
}

impl EntityKey {
    /// Index value for this entity.
    pub fn index_value(&self) -> String {
        match self {
            EntityKey::Note(id) => format!("note:{id}"),
            EntityKey::Folder(id) => format!("folder:{id}"),
            EntityKey::Settings => "settings".to_string(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.index_value())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_folder_ids_are_distinguishable() {
        let tmp = FolderId::temporary();
        assert!(tmp.is_temporary());
        assert!(tmp.as_str().starts_with(TEMP_ID_PREFIX));
        assert!(!FolderId::new("srv-1").is_temporary());
        assert_ne!(FolderId::temporary(), FolderId::temporary());
    }

    #[test]
    fn generated_note_ids_are_time_ordered() {
        let a = NoteId::generate();
        let b = NoteId::generate();
        assert!(a < b);
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = FolderId::new("inbox");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"inbox\"");
        let back: FolderId = serde_json::from_str("\"inbox\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn short_handles_short_and_multibyte_ids() {
        assert_eq!(NoteId::new("abc").short(), "abc");
        assert_eq!(NoteId::new("0123456789").short(), "01234567");
        assert_eq!(NoteId::new("ééééééééé").short(), "éééééééé");
    }

    #[test]
    fn entity_key_index_values() {
        assert_eq!(EntityKey::Note(NoteId::new("n1")).index_value(), "note:n1");
        assert_eq!(EntityKey::Folder(FolderId::new("f1")).to_string(), "folder:f1");
        assert_eq!(EntityKey::Settings.index_value(), "settings");
    }
}
