//! In-process authoritative service.
//!
//! Behaves like the real server where the engine can observe it: a monotonic
//! clock stamps every write, folder ids are issued as `srv-<n>`, deleting a
//! folder moves its notes to the default folder, and creates are idempotent
//! by note id. Tests flip it offline, inject one-shot failures, and read the
//! call journal to check what the server actually saw.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use quire_types::{
    FolderDraft, FolderId, FolderPatch, NoteDraft, NoteId, NotePatch, Sealed, SettingsBlob,
    Timestamp,
};

use super::{
    NoteQuery, RemoteError, RemoteFolder, RemoteNote, RemoteResult, RemoteService, RemoteSettings,
};

/// Id of the folder every account starts with.
pub const INBOX_ID: &str = "inbox";

/// A call that reached the service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteCall {
    ListNotes,
    GetNote(NoteId),
    CreateNote(NoteId),
    UpdateNote(NoteId),
    SoftDeleteNote(NoteId),
    RestoreNote(NoteId),
    ListFolders,
    CreateFolder,
    UpdateFolder(FolderId),
    DeleteFolder(FolderId),
    GetSettings,
    UpdateSettings,
}

impl RemoteCall {
    /// The note this call addressed, if any.
    pub fn note_id(&self) -> Option<&NoteId> {
        match self {
            RemoteCall::GetNote(id)
            | RemoteCall::CreateNote(id)
            | RemoteCall::UpdateNote(id)
            | RemoteCall::SoftDeleteNote(id)
            | RemoteCall::RestoreNote(id) => Some(id),
            _ => None,
        }
    }

    /// Whether the call changes server state.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            RemoteCall::ListNotes
                | RemoteCall::GetNote(_)
                | RemoteCall::ListFolders
                | RemoteCall::GetSettings
        )
    }
}

#[derive(Debug)]
struct ServerState {
    online: bool,
    clock: Timestamp,
    next_folder: u64,
    notes: BTreeMap<NoteId, RemoteNote>,
    folders: BTreeMap<FolderId, RemoteFolder>,
    settings: Option<RemoteSettings>,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
}

impl ServerState {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        self.clock
    }

    fn require_folder(&self, id: &FolderId) -> RemoteResult<()> {
        if self.folders.contains_key(id) {
            Ok(())
        } else {
            Err(RemoteError::rejected(422, format!("unknown folder {id}")))
        }
    }

    fn default_folder(&self) -> Option<FolderId> {
        self.folders
            .values()
            .find(|f| f.is_default)
            .map(|f| f.id.clone())
    }

    fn note_mut(&mut self, id: &NoteId) -> RemoteResult<&mut RemoteNote> {
        self.notes
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("notes/{id}")))
    }
}

/// In-memory [`RemoteService`].
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<ServerState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// A fresh account holding only the default folder ([`INBOX_ID`]).
    pub fn new() -> Self {
        let mut folders = BTreeMap::new();
        folders.insert(
            FolderId::new(INBOX_ID),
            RemoteFolder {
                id: FolderId::new(INBOX_ID),
                parent_id: None,
                name: Sealed::new(b"inbox".to_vec(), Vec::new()),
                is_default: true,
                goal_word_count: None,
                order: 0,
                updated_at: 1000,
            },
        );
        Self {
            state: Mutex::new(ServerState {
                online: true,
                clock: 1000,
                next_folder: 1,
                notes: BTreeMap::new(),
                folders,
                settings: None,
                calls: Vec::new(),
                failures: VecDeque::new(),
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Fail the next call that reaches the service with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        self.state.lock().failures.push_back(err);
    }

    /// Every call that reached the service, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Calls that changed server state.
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(RemoteCall::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn note(&self, id: &NoteId) -> Option<RemoteNote> {
        self.state.lock().notes.get(id).cloned()
    }

    pub fn folder(&self, id: &FolderId) -> Option<RemoteFolder> {
        self.state.lock().folders.get(id).cloned()
    }

    pub fn folders(&self) -> Vec<RemoteFolder> {
        self.state.lock().folders.values().cloned().collect()
    }

    pub fn notes(&self) -> Vec<RemoteNote> {
        self.state.lock().notes.values().cloned().collect()
    }

    pub fn current_settings(&self) -> Option<RemoteSettings> {
        self.state.lock().settings.clone()
    }

    /// Store a note directly, as if another device had written it.
    pub fn seed_note(&self, draft: NoteDraft) -> RemoteNote {
        let mut state = self.state.lock();
        let updated_at = state.tick();
        let note = RemoteNote {
            id: draft.id,
            folder_id: draft.folder_id,
            content: draft.content,
            word_count: draft.word_count,
            updated_at,
            deleted_at: None,
        };
        state.notes.insert(note.id.clone(), note.clone());
        note
    }

    /// Overwrite a note's content from "another device". Returns the new
    /// `updated_at`, or None if the note does not exist.
    pub fn edit_elsewhere(&self, id: &NoteId, content: Sealed) -> Option<Timestamp> {
        let mut state = self.state.lock();
        let updated_at = state.tick();
        let note = state.notes.get_mut(id)?;
        note.content = content;
        note.updated_at = updated_at;
        Some(updated_at)
    }

    /// Record the call and decide whether it gets through.
    fn admit(&self, call: RemoteCall) -> RemoteResult<parking_lot::MutexGuard<'_, ServerState>> {
        let mut state = self.state.lock();
        if !state.online {
            return Err(RemoteError::Connectivity("service unreachable".into()));
        }
        state.calls.push(call);
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteService for MemoryRemote {
    async fn list_notes(&self, query: &NoteQuery) -> RemoteResult<Vec<RemoteNote>> {
        let state = self.admit(RemoteCall::ListNotes)?;
        Ok(state
            .notes
            .values()
            .filter(|n| query.matches(n))
            .cloned()
            .collect())
    }

    async fn get_note(&self, id: &NoteId) -> RemoteResult<RemoteNote> {
        let mut state = self.admit(RemoteCall::GetNote(id.clone()))?;
        state.note_mut(id).map(|n| n.clone())
    }

    async fn create_note(&self, draft: &NoteDraft) -> RemoteResult<RemoteNote> {
        let mut state = self.admit(RemoteCall::CreateNote(draft.id.clone()))?;
        if let Some(existing) = state.notes.get(&draft.id) {
            return Ok(existing.clone());
        }
        state.require_folder(&draft.folder_id)?;
        let updated_at = state.tick();
        let note = RemoteNote {
            id: draft.id.clone(),
            folder_id: draft.folder_id.clone(),
            content: draft.content.clone(),
            word_count: draft.word_count,
            updated_at,
            deleted_at: None,
        };
        state.notes.insert(note.id.clone(), note.clone());
        Ok(note)
    }

    async fn update_note(&self, id: &NoteId, patch: &NotePatch) -> RemoteResult<RemoteNote> {
        let mut state = self.admit(RemoteCall::UpdateNote(id.clone()))?;
        if let Some(folder_id) = &patch.folder_id {
            state.require_folder(folder_id)?;
        }
        let updated_at = state.tick();
        let note = state.note_mut(id)?;
        if let Some(folder_id) = &patch.folder_id {
            note.folder_id = folder_id.clone();
        }
        if let Some(content) = &patch.content {
            note.content = content.clone();
        }
        if let Some(word_count) = patch.word_count {
            note.word_count = word_count;
        }
        note.updated_at = updated_at;
        Ok(note.clone())
    }

    async fn soft_delete_note(&self, id: &NoteId) -> RemoteResult<RemoteNote> {
        let mut state = self.admit(RemoteCall::SoftDeleteNote(id.clone()))?;
        let updated_at = state.tick();
        let note = state.note_mut(id)?;
        note.deleted_at.get_or_insert(updated_at);
        note.updated_at = updated_at;
        Ok(note.clone())
    }

    async fn restore_note(&self, id: &NoteId) -> RemoteResult<RemoteNote> {
        let mut state = self.admit(RemoteCall::RestoreNote(id.clone()))?;
        let updated_at = state.tick();
        let note = state.note_mut(id)?;
        note.deleted_at = None;
        note.updated_at = updated_at;
        Ok(note.clone())
    }

    async fn list_folders(&self) -> RemoteResult<Vec<RemoteFolder>> {
        let state = self.admit(RemoteCall::ListFolders)?;
        Ok(state.folders.values().cloned().collect())
    }

    async fn create_folder(&self, draft: &FolderDraft) -> RemoteResult<RemoteFolder> {
        let mut state = self.admit(RemoteCall::CreateFolder)?;
        if let Some(parent) = &draft.parent_id {
            state.require_folder(parent)?;
        }
        let id = FolderId::new(format!("srv-{}", state.next_folder));
        state.next_folder += 1;
        let updated_at = state.tick();
        let folder = RemoteFolder {
            id: id.clone(),
            parent_id: draft.parent_id.clone(),
            name: draft.name.clone(),
            is_default: false,
            goal_word_count: draft.goal_word_count,
            order: draft.order,
            updated_at,
        };
        state.folders.insert(id, folder.clone());
        Ok(folder)
    }

    async fn update_folder(
        &self,
        id: &FolderId,
        patch: &FolderPatch,
    ) -> RemoteResult<RemoteFolder> {
        let mut state = self.admit(RemoteCall::UpdateFolder(id.clone()))?;
        if let Some(Some(parent)) = &patch.parent_id {
            state.require_folder(parent)?;
        }
        let updated_at = state.tick();
        let folder = state
            .folders
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(format!("folders/{id}")))?;
        if let Some(parent_id) = &patch.parent_id {
            folder.parent_id = parent_id.clone();
        }
        if let Some(name) = &patch.name {
            folder.name = name.clone();
        }
        if let Some(goal) = patch.goal_word_count {
            folder.goal_word_count = goal;
        }
        if let Some(order) = patch.order {
            folder.order = order;
        }
        folder.updated_at = updated_at;
        Ok(folder.clone())
    }

    async fn delete_folder(&self, id: &FolderId) -> RemoteResult<()> {
        let mut state = self.admit(RemoteCall::DeleteFolder(id.clone()))?;
        let folder = state
            .folders
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(format!("folders/{id}")))?;
        if folder.is_default {
            return Err(RemoteError::rejected(409, "the default folder cannot be deleted"));
        }
        let inbox = state
            .default_folder()
            .ok_or_else(|| RemoteError::rejected(409, "account has no default folder"))?;
        let updated_at = state.tick();
        for note in state.notes.values_mut().filter(|n| &n.folder_id == id) {
            note.folder_id = inbox.clone();
            note.updated_at = updated_at;
        }
        state.folders.remove(id);
        Ok(())
    }

    async fn get_settings(&self) -> RemoteResult<RemoteSettings> {
        let state = self.admit(RemoteCall::GetSettings)?;
        state
            .settings
            .clone()
            .ok_or_else(|| RemoteError::NotFound("settings".into()))
    }

    async fn update_settings(&self, blob: &SettingsBlob) -> RemoteResult<RemoteSettings> {
        let mut state = self.admit(RemoteCall::UpdateSettings)?;
        let updated_at = state.tick();
        let settings = RemoteSettings {
            blob: blob.clone(),
            updated_at,
        };
        state.settings = Some(settings.clone());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(id: &str, folder: &str) -> NoteDraft {
        NoteDraft {
            id: NoteId::new(id),
            folder_id: FolderId::new(folder),
            content: Sealed::new(id.as_bytes().to_vec(), b"n".to_vec()),
            word_count: 1,
        }
    }

    #[tokio::test]
    async fn offline_calls_fail_without_reaching_the_journal() {
        let remote = MemoryRemote::new();
        remote.set_online(false);
        let err = remote.list_folders().await.unwrap_err();
        assert!(err.is_transient());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn create_is_idempotent_by_id() {
        let remote = MemoryRemote::new();
        let first = remote.create_note(&draft("n1", INBOX_ID)).await.unwrap();
        let again = remote.create_note(&draft("n1", INBOX_ID)).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(remote.notes().len(), 1);
    }

    #[tokio::test]
    async fn unknown_folder_is_rejected() {
        let remote = MemoryRemote::new();
        let err = remote.create_note(&draft("n1", "tmp-x")).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 422, .. }));
    }

    #[tokio::test]
    async fn folder_delete_moves_notes_to_inbox() {
        let remote = MemoryRemote::new();
        let folder = remote
            .create_folder(&FolderDraft {
                parent_id: None,
                name: Sealed::default(),
                goal_word_count: None,
                order: 1,
            })
            .await
            .unwrap();
        assert_eq!(folder.id.as_str(), "srv-1");
        remote.create_note(&draft("n1", "srv-1")).await.unwrap();

        remote.delete_folder(&folder.id).await.unwrap();
        assert!(remote.folder(&folder.id).is_none());
        assert_eq!(
            remote.note(&NoteId::new("n1")).unwrap().folder_id.as_str(),
            INBOX_ID
        );

        let err = remote.delete_folder(&FolderId::new(INBOX_ID)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn clock_is_monotonic_and_injected_failures_fire_once() {
        let remote = MemoryRemote::new();
        let a = remote.seed_note(draft("a", INBOX_ID));
        let b = remote.seed_note(draft("b", INBOX_ID));
        assert!(b.updated_at > a.updated_at);

        let edited = remote.edit_elsewhere(&a.id, Sealed::default()).unwrap();
        assert!(edited > b.updated_at);

        remote.fail_next(RemoteError::Server { status: 503 });
        assert!(remote.get_note(&a.id).await.is_err());
        assert!(remote.get_note(&a.id).await.is_ok());
    }
}
