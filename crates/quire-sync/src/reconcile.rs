//! Multi-record mirror rewrites.
//!
//! The helpers only stage writes into a caller-owned [`MirrorBatch`]; the
//! caller commits it together with whatever else belongs to the same unit
//! (the outbox entry being queued or retired), so the rewrite is atomic.

use quire_store::{ENTITY_INDEX, FOLDER_INDEX, Mirror, MirrorBatch, StoreResult, sequence_key};
use quire_types::{EntityKey, FolderId, FolderRecord, NoteRecord, OutboxEntry};

use crate::remote::RemoteFolder;

/// What an id reconciliation touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub folder: bool,
    pub notes: usize,
    pub child_folders: usize,
    /// Queued entries whose payload was rewritten.
    pub entries: usize,
    /// Queued entries discarded because they addressed the folder itself.
    pub discarded: usize,
}

/// Stage the removal of `folder_id`, moving its notes to `default_id`.
///
/// Returns how many notes were moved.
pub(crate) async fn cascade_folder_delete(
    mirror: &Mirror,
    batch: &mut MirrorBatch,
    folder_id: &FolderId,
    default_id: &FolderId,
) -> StoreResult<usize> {
    let notes: Vec<NoteRecord> = mirror.by_index(FOLDER_INDEX, folder_id.as_str()).await?;
    let moved = notes.len();
    for mut note in notes {
        note.folder_id = default_id.clone();
        batch.put(&note)?;
    }
    batch.delete::<FolderRecord>(folder_id.as_str());
    Ok(moved)
}

/// Stage the replacement of temporary folder id `temp_id` by the id the
/// server issued.
///
/// - the folder row is re-keyed, keeping its local fields
/// - notes filed under the temporary id are moved
/// - child folders pointing at it are re-parented
/// - every queued entry except `retiring` has the id rewritten in its payload
pub(crate) async fn reconcile_folder_id(
    mirror: &Mirror,
    batch: &mut MirrorBatch,
    temp_id: &FolderId,
    confirmed: &RemoteFolder,
    retiring: u64,
) -> StoreResult<Reconciled> {
    let server_id = &confirmed.id;
    let mut summary = Reconciled::default();

    if let Some(mut folder) = mirror.get::<FolderRecord>(temp_id.as_str()).await? {
        batch.delete::<FolderRecord>(temp_id.as_str());
        folder.id = server_id.clone();
        folder.server_updated_at = Some(confirmed.updated_at);
        batch.put(&folder)?;
        summary.folder = true;
    }

    redirect_references(mirror, batch, temp_id, server_id, &[retiring], &mut summary).await?;
    Ok(summary)
}

/// Stage the removal of a temporary folder the server refused to create.
///
/// Whatever was filed under it falls back to `default_id`: notes, child
/// folders and queued payloads. Queued entries addressed to the folder
/// itself have nothing left to act on and are discarded.
pub(crate) async fn abandon_temporary_folder(
    mirror: &Mirror,
    batch: &mut MirrorBatch,
    temp_id: &FolderId,
    default_id: &FolderId,
    retiring: u64,
) -> StoreResult<Reconciled> {
    let mut summary = Reconciled::default();
    if mirror.get::<FolderRecord>(temp_id.as_str()).await?.is_some() {
        batch.delete::<FolderRecord>(temp_id.as_str());
        summary.folder = true;
    }

    let own = EntityKey::Folder(temp_id.clone());
    let addressed: Vec<OutboxEntry> = mirror.by_index(ENTITY_INDEX, &own.index_value()).await?;
    let mut skip = vec![retiring];
    for entry in addressed
        .into_iter()
        .filter(|e| e.id != retiring && e.mutation.target() == own)
    {
        batch.delete::<OutboxEntry>(sequence_key(entry.id));
        skip.push(entry.id);
        summary.discarded += 1;
    }

    redirect_references(mirror, batch, temp_id, default_id, &skip, &mut summary).await?;
    Ok(summary)
}

/// Point notes, child folders and queued payloads at `to` instead of `from`.
async fn redirect_references(
    mirror: &Mirror,
    batch: &mut MirrorBatch,
    from: &FolderId,
    to: &FolderId,
    skip: &[u64],
    summary: &mut Reconciled,
) -> StoreResult<()> {
    let notes: Vec<NoteRecord> = mirror.by_index(FOLDER_INDEX, from.as_str()).await?;
    for mut note in notes {
        note.folder_id = to.clone();
        batch.put(&note)?;
        summary.notes += 1;
    }

    let folders: Vec<FolderRecord> = mirror.all().await?;
    for mut child in folders
        .into_iter()
        .filter(|f| f.parent_id.as_ref() == Some(from) && &f.id != from)
    {
        child.parent_id = Some(to.clone());
        batch.put(&child)?;
        summary.child_folders += 1;
    }

    let entries: Vec<OutboxEntry> = mirror.all().await?;
    for mut entry in entries.into_iter().filter(|e| !skip.contains(&e.id)) {
        if entry.mutation.rewrite_folder_id(from, to) {
            batch.put(&entry)?;
            summary.entries += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_types::{FolderPatch, Mutation, NoteDraft, NoteId, NotePatch, Sealed};

    fn folder(id: &str, parent: Option<&str>) -> FolderRecord {
        FolderRecord {
            id: FolderId::new(id),
            parent_id: parent.map(FolderId::new),
            name: Sealed::new(id.as_bytes().to_vec(), Vec::new()),
            is_default: id == "inbox",
            goal_word_count: Some(500),
            order: 3,
            server_updated_at: None,
        }
    }

    fn note(id: &str, folder: &str) -> NoteRecord {
        NoteRecord {
            id: NoteId::new(id),
            folder_id: FolderId::new(folder),
            content: Sealed::default(),
            word_count: 0,
            server_updated_at: None,
            locally_edited_at: None,
            dirty: true,
            deleted_at: None,
        }
    }

    fn entry(id: u64, mutation: Mutation) -> OutboxEntry {
        OutboxEntry {
            id,
            mutation,
            base_server_updated_at: None,
            created_at: id,
        }
    }

    #[tokio::test]
    async fn cascade_moves_notes_and_removes_folder() {
        let mirror = Mirror::in_memory();
        mirror.put(&folder("inbox", None)).await.unwrap();
        mirror.put(&folder("f1", None)).await.unwrap();
        for id in ["a", "b", "c"] {
            mirror.put(&note(id, "f1")).await.unwrap();
        }

        let mut batch = mirror.batch();
        let moved = cascade_folder_delete(&mirror, &mut batch, &FolderId::new("f1"), &FolderId::new("inbox"))
            .await
            .unwrap();
        mirror.commit(batch).await.unwrap();

        assert_eq!(moved, 3);
        assert!(mirror.get::<FolderRecord>("f1").await.unwrap().is_none());
        let in_inbox: Vec<NoteRecord> = mirror.by_index(FOLDER_INDEX, "inbox").await.unwrap();
        assert_eq!(in_inbox.len(), 3);
    }

    #[tokio::test]
    async fn reconcile_rewrites_every_reference() {
        let mirror = Mirror::in_memory();
        let temp = FolderId::new("tmp-1");
        mirror.put(&folder("tmp-1", None)).await.unwrap();
        mirror.put(&folder("tmp-2", Some("tmp-1"))).await.unwrap();
        mirror.put(&note("n1", "tmp-1")).await.unwrap();

        let retiring = entry(
            1,
            Mutation::FolderCreate {
                temp_id: temp.clone(),
                folder: quire_types::FolderDraft {
                    parent_id: None,
                    name: Sealed::default(),
                    goal_word_count: None,
                    order: 3,
                },
            },
        );
        let create = entry(
            2,
            Mutation::NoteCreate {
                note: NoteDraft {
                    id: NoteId::new("n1"),
                    folder_id: temp.clone(),
                    content: Sealed::default(),
                    word_count: 0,
                },
            },
        );
        let mv = entry(
            3,
            Mutation::NoteUpdate {
                id: NoteId::new("n2"),
                patch: NotePatch::move_to(temp.clone()),
            },
        );
        let reparent = entry(
            4,
            Mutation::FolderUpdate {
                id: FolderId::new("tmp-2"),
                patch: FolderPatch {
                    parent_id: Some(Some(temp.clone())),
                    ..FolderPatch::default()
                },
            },
        );
        let unrelated = entry(5, Mutation::NoteRestore { id: NoteId::new("n9") });
        for e in [&retiring, &create, &mv, &reparent, &unrelated] {
            mirror.put(e).await.unwrap();
        }

        let confirmed = RemoteFolder {
            id: FolderId::new("srv-7"),
            parent_id: None,
            name: Sealed::default(),
            is_default: false,
            goal_word_count: None,
            order: 3,
            updated_at: 99,
        };
        let mut batch = mirror.batch();
        let summary = reconcile_folder_id(&mirror, &mut batch, &temp, &confirmed, retiring.id)
            .await
            .unwrap();
        mirror.commit(batch).await.unwrap();

        assert_eq!(
            summary,
            Reconciled {
                folder: true,
                notes: 1,
                child_folders: 1,
                entries: 3,
                discarded: 0,
            }
        );

        assert!(mirror.get::<FolderRecord>("tmp-1").await.unwrap().is_none());
        let moved = mirror.get::<FolderRecord>("srv-7").await.unwrap().unwrap();
        assert_eq!(moved.goal_word_count, Some(500));
        assert_eq!(moved.server_updated_at, Some(99));
        let child = mirror.get::<FolderRecord>("tmp-2").await.unwrap().unwrap();
        assert_eq!(child.parent_id, Some(FolderId::new("srv-7")));
        let n1 = mirror.get::<NoteRecord>("n1").await.unwrap().unwrap();
        assert_eq!(n1.folder_id.as_str(), "srv-7");

        let entries: Vec<OutboxEntry> = mirror.all().await.unwrap();
        let json = serde_json::to_string(&entries[1..]).unwrap();
        assert!(!json.contains("tmp-1"), "{json}");
        assert_eq!(entries[0], retiring);
    }

    #[tokio::test]
    async fn abandoned_folder_falls_back_to_default() {
        let mirror = Mirror::in_memory();
        let temp = FolderId::new("tmp-1");
        mirror.put(&folder("inbox", None)).await.unwrap();
        mirror.put(&folder("tmp-1", None)).await.unwrap();
        mirror.put(&folder("tmp-2", Some("tmp-1"))).await.unwrap();
        mirror.put(&note("n1", "tmp-1")).await.unwrap();

        let refused = entry(
            1,
            Mutation::FolderCreate {
                temp_id: temp.clone(),
                folder: quire_types::FolderDraft {
                    parent_id: None,
                    name: Sealed::default(),
                    goal_word_count: None,
                    order: 0,
                },
            },
        );
        let filed = entry(
            2,
            Mutation::NoteCreate {
                note: NoteDraft {
                    id: NoteId::new("n1"),
                    folder_id: temp.clone(),
                    content: Sealed::default(),
                    word_count: 0,
                },
            },
        );
        let rename = entry(
            3,
            Mutation::FolderUpdate {
                id: temp.clone(),
                patch: FolderPatch::rename(Sealed::default()),
            },
        );
        for e in [&refused, &filed, &rename] {
            mirror.put(e).await.unwrap();
        }

        let mut batch = mirror.batch();
        let summary = abandon_temporary_folder(
            &mirror,
            &mut batch,
            &temp,
            &FolderId::new("inbox"),
            refused.id,
        )
        .await
        .unwrap();
        mirror.commit(batch).await.unwrap();

        assert_eq!(
            summary,
            Reconciled {
                folder: true,
                notes: 1,
                child_folders: 1,
                entries: 1,
                discarded: 1,
            }
        );
        assert!(mirror.get::<FolderRecord>("tmp-1").await.unwrap().is_none());
        let child = mirror.get::<FolderRecord>("tmp-2").await.unwrap().unwrap();
        assert_eq!(child.parent_id, Some(FolderId::new("inbox")));
        let n1 = mirror.get::<NoteRecord>("n1").await.unwrap().unwrap();
        assert_eq!(n1.folder_id.as_str(), "inbox");

        // The refused entry itself is the caller's to retire.
        let entries: Vec<OutboxEntry> = mirror.all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], refused);
        assert!(entries[1].mutation.temporary_dependencies().is_empty());
    }
}
