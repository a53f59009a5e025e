//! Outbox mutations.
//!
//! Every write that could not be confirmed by the server is captured as a
//! [`Mutation`] and queued. The set of mutation kinds is closed; the flush
//! engine matches on it exhaustively. On the wire a mutation is an internally
//! tagged object whose `type` is one of `note.create`, `note.update`,
//! `note.softDelete`, `note.restore`, `folder.create`, `folder.update`,
//! `folder.delete`, `settings.update`.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::ids::{EntityKey, FolderId, NoteId};
use crate::records::{FolderRecord, NoteRecord};
use crate::sealed::{Sealed, SettingsBlob};

// ============================================================================
// Payloads
// ============================================================================

/// Everything needed to create a note remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub id: NoteId,
    pub folder_id: FolderId,
    pub content: Sealed,
    pub word_count: u32,
}

/// A partial note update. `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<FolderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Sealed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u32>,
}

impl NotePatch {
    pub fn content(content: Sealed, word_count: u32) -> Self {
        Self {
            content: Some(content),
            word_count: Some(word_count),
            ..Self::default()
        }
    }

    pub fn move_to(folder_id: FolderId) -> Self {
        Self {
            folder_id: Some(folder_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.folder_id.is_none() && self.content.is_none() && self.word_count.is_none()
    }

    /// Apply this patch to a mirrored note.
    pub fn apply(&self, note: &mut NoteRecord) {
        if let Some(folder_id) = &self.folder_id {
            note.folder_id = folder_id.clone();
        }
        if let Some(content) = &self.content {
            note.content = content.clone();
        }
        if let Some(word_count) = self.word_count {
            note.word_count = word_count;
        }
    }
}

/// Everything needed to create a folder remotely. The server issues the id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDraft {
    pub parent_id: Option<FolderId>,
    pub name: Sealed,
    pub goal_word_count: Option<u32>,
    pub order: i64,
}

/// A partial folder update.
///
/// Nullable fields use a double option: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPatch {
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<Option<FolderId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Sealed>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub goal_word_count: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl FolderPatch {
    pub fn rename(name: Sealed) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    pub fn apply(&self, folder: &mut FolderRecord) {
        if let Some(parent_id) = &self.parent_id {
            folder.parent_id = parent_id.clone();
        }
        if let Some(name) = &self.name {
            folder.name = name.clone();
        }
        if let Some(goal) = self.goal_word_count {
            folder.goal_word_count = goal;
        }
        if let Some(order) = self.order {
            folder.order = order;
        }
    }
}

fn double_option<'de, T, D>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

// ============================================================================
// Mutation
// ============================================================================

/// The outbox type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum MutationKind {
    #[strum(serialize = "note.create")]
    NoteCreate,
    #[strum(serialize = "note.update")]
    NoteUpdate,
    #[strum(serialize = "note.softDelete")]
    NoteSoftDelete,
    #[strum(serialize = "note.restore")]
    NoteRestore,
    #[strum(serialize = "folder.create")]
    FolderCreate,
    #[strum(serialize = "folder.update")]
    FolderUpdate,
    #[strum(serialize = "folder.delete")]
    FolderDelete,
    #[strum(serialize = "settings.update")]
    SettingsUpdate,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }
}

/// A queued mutation, one variant per outbox type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Mutation {
    #[serde(rename = "note.create")]
    NoteCreate { note: NoteDraft },

    #[serde(rename = "note.update")]
    NoteUpdate { id: NoteId, patch: NotePatch },

    #[serde(rename = "note.softDelete")]
    NoteSoftDelete { id: NoteId },

    #[serde(rename = "note.restore")]
    NoteRestore { id: NoteId },

    /// `temp_id` is the placeholder the mirror uses until reconciliation.
    #[serde(rename = "folder.create")]
    FolderCreate { temp_id: FolderId, folder: FolderDraft },

    #[serde(rename = "folder.update")]
    FolderUpdate { id: FolderId, patch: FolderPatch },

    #[serde(rename = "folder.delete")]
    FolderDelete { id: FolderId },

    #[serde(rename = "settings.update")]
    SettingsUpdate { blob: SettingsBlob },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::NoteCreate { .. } => MutationKind::NoteCreate,
            Mutation::NoteUpdate { .. } => MutationKind::NoteUpdate,
            Mutation::NoteSoftDelete { .. } => MutationKind::NoteSoftDelete,
            Mutation::NoteRestore { .. } => MutationKind::NoteRestore,
            Mutation::FolderCreate { .. } => MutationKind::FolderCreate,
            Mutation::FolderUpdate { .. } => MutationKind::FolderUpdate,
            Mutation::FolderDelete { .. } => MutationKind::FolderDelete,
            Mutation::SettingsUpdate { .. } => MutationKind::SettingsUpdate,
        }
    }

    /// The entity this mutation is addressed to.
    pub fn target(&self) -> EntityKey {
        match self {
            Mutation::NoteCreate { note } => EntityKey::Note(note.id.clone()),
            Mutation::NoteUpdate { id, .. }
            | Mutation::NoteSoftDelete { id }
            | Mutation::NoteRestore { id } => EntityKey::Note(id.clone()),
            Mutation::FolderCreate { temp_id, .. } => EntityKey::Folder(temp_id.clone()),
            Mutation::FolderUpdate { id, .. } | Mutation::FolderDelete { id } => {
                EntityKey::Folder(id.clone())
            }
            Mutation::SettingsUpdate { .. } => EntityKey::Settings,
        }
    }

    /// Folders named inside a draft or patch, other than the target.
    pub fn referenced_folders(&self) -> Vec<FolderId> {
        let referenced = match self {
            Mutation::NoteCreate { note } => Some(&note.folder_id),
            Mutation::NoteUpdate { patch, .. } => patch.folder_id.as_ref(),
            Mutation::FolderCreate { folder, .. } => folder.parent_id.as_ref(),
            Mutation::FolderUpdate { patch, .. } => match &patch.parent_id {
                Some(Some(parent)) => Some(parent),
                _ => None,
            },
            Mutation::NoteSoftDelete { .. }
            | Mutation::NoteRestore { .. }
            | Mutation::FolderDelete { .. }
            | Mutation::SettingsUpdate { .. } => None,
        };
        referenced
            .filter(|id| EntityKey::Folder((*id).clone()) != self.target())
            .cloned()
            .into_iter()
            .collect()
    }

    /// Its target plus every referenced folder. This is what the outbox
    /// indexes entries by.
    pub fn entities(&self) -> Vec<EntityKey> {
        let mut keys = vec![self.target()];
        keys.extend(self.referenced_folders().into_iter().map(EntityKey::Folder));
        keys
    }

    /// Whether this mutation has to reach the server after `earlier`.
    ///
    /// - both address the same entity
    /// - `earlier` creates or deletes a folder this one files something into
    /// - this one deletes a folder `earlier` files something into
    ///
    /// Merely living in the same (server-known) folder is not an ordering
    /// constraint.
    pub fn must_follow(&self, earlier: &Mutation) -> bool {
        if self.target() == earlier.target() {
            return true;
        }
        let creates_or_deletes = |m: &Mutation| match m {
            Mutation::FolderCreate { temp_id, .. } => Some(temp_id.clone()),
            Mutation::FolderDelete { id } => Some(id.clone()),
            _ => None,
        };
        if let Some(folder) = creates_or_deletes(earlier)
            && self.referenced_folders().contains(&folder)
        {
            return true;
        }
        match self {
            Mutation::FolderDelete { id } => earlier.referenced_folders().contains(id),
            _ => false,
        }
    }

    /// Temporary folder ids this mutation depends on, excluding the one a
    /// `folder.create` is itself going to resolve.
    pub fn temporary_dependencies(&self) -> Vec<FolderId> {
        let own = match self {
            Mutation::FolderCreate { temp_id, .. } => Some(temp_id),
            _ => None,
        };
        self.entities()
            .into_iter()
            .filter_map(|key| match key {
                EntityKey::Folder(id) if id.is_temporary() && Some(&id) != own => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Replace every occurrence of folder id `from` with `to`.
    ///
    /// Returns true when anything changed.
    pub fn rewrite_folder_id(&mut self, from: &FolderId, to: &FolderId) -> bool {
        fn swap(slot: &mut FolderId, from: &FolderId, to: &FolderId) -> bool {
            if slot == from {
                *slot = to.clone();
                true
            } else {
                false
            }
        }

        match self {
            Mutation::NoteCreate { note } => swap(&mut note.folder_id, from, to),
            Mutation::NoteUpdate { patch, .. } => match &mut patch.folder_id {
                Some(folder_id) => swap(folder_id, from, to),
                None => false,
            },
            Mutation::FolderCreate { temp_id, folder } => {
                let own = swap(temp_id, from, to);
                let parent = match &mut folder.parent_id {
                    Some(parent) => swap(parent, from, to),
                    None => false,
                };
                own || parent
            }
            Mutation::FolderUpdate { id, patch } => {
                let own = swap(id, from, to);
                let parent = match &mut patch.parent_id {
                    Some(Some(parent)) => swap(parent, from, to),
                    _ => false,
                };
                own || parent
            }
            Mutation::FolderDelete { id } => swap(id, from, to),
            Mutation::NoteSoftDelete { .. }
            | Mutation::NoteRestore { .. }
            | Mutation::SettingsUpdate { .. } => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
