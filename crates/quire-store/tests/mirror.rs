//! Typed mirror behavior, checked against every backend.

use quire_store::{
    FOLDER_INDEX, MemoryStore, Mirror, SqliteStore, StoreError, sequence_key,
};
use quire_types::{
    FolderId, FolderRecord, NoteId, NoteRecord, OutboxEntry, Mutation, Sealed, SettingsBlob,
    SettingsRecord, SETTINGS_KEY,
};

fn backends() -> Vec<(&'static str, Mirror)> {
    vec![
        ("memory", Mirror::new(MemoryStore::new())),
        ("sqlite", Mirror::new(SqliteStore::in_memory().unwrap())),
    ]
}

fn note(id: &str, folder: &str) -> NoteRecord {
    NoteRecord {
        id: NoteId::new(id),
        folder_id: FolderId::new(folder),
        content: Sealed::new(id.as_bytes().to_vec(), b"nonce".to_vec()),
        word_count: 1,
        server_updated_at: Some(1),
        locally_edited_at: None,
        dirty: false,
        deleted_at: None,
    }
}

fn folder(id: &str, is_default: bool) -> FolderRecord {
    FolderRecord {
        id: FolderId::new(id),
        parent_id: None,
        name: Sealed::new(id.as_bytes().to_vec(), b"nonce".to_vec()),
        is_default,
        goal_word_count: None,
        order: 0,
        server_updated_at: Some(1),
    }
}

#[tokio::test]
async fn typed_roundtrip_and_index_lookup() {
    for (name, mirror) in backends() {
        mirror.put(&note("n1", "f1")).await.unwrap();
        mirror.put(&note("n2", "f1")).await.unwrap();
        mirror.put(&note("n3", "f2")).await.unwrap();

        let loaded: Option<NoteRecord> = mirror.get("n1").await.unwrap();
        assert_eq!(loaded, Some(note("n1", "f1")), "{name}");

        let in_f1: Vec<NoteRecord> = mirror.by_index(FOLDER_INDEX, "f1").await.unwrap();
        let ids: Vec<_> = in_f1.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"], "{name}");

        let missing: Option<NoteRecord> = mirror.get("nope").await.unwrap();
        assert!(missing.is_none(), "{name}");
    }
}

#[tokio::test]
async fn batch_moves_folder_and_its_notes_atomically() {
    for (name, mirror) in backends() {
        mirror.put(&folder("tmp-1", false)).await.unwrap();
        mirror.put(&note("n1", "tmp-1")).await.unwrap();

        let mut batch = mirror.batch();
        batch.delete::<FolderRecord>("tmp-1");
        batch.put(&folder("srv-1", false)).unwrap();
        batch.put(&note("n1", "srv-1")).unwrap();
        mirror.commit(batch).await.unwrap();

        let old: Option<FolderRecord> = mirror.get("tmp-1").await.unwrap();
        assert!(old.is_none(), "{name}");
        let new: Option<FolderRecord> = mirror.get("srv-1").await.unwrap();
        assert!(new.is_some(), "{name}");
        let stale: Vec<NoteRecord> = mirror.by_index(FOLDER_INDEX, "tmp-1").await.unwrap();
        assert!(stale.is_empty(), "{name}");
    }
}

#[tokio::test]
async fn outbox_sequence_keys_keep_insertion_order() {
    for (name, mirror) in backends() {
        for _ in 0..12 {
            let id = mirror.next_id::<OutboxEntry>().await.unwrap();
            let entry = OutboxEntry {
                id,
                mutation: Mutation::NoteRestore { id: NoteId::new("n1") },
                base_server_updated_at: None,
                created_at: 100,
            };
            mirror.put(&entry).await.unwrap();
        }
        let entries: Vec<OutboxEntry> = mirror.all().await.unwrap();
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, (1..=12).collect::<Vec<_>>(), "{name}");
        let first: Option<OutboxEntry> = mirror.get(&sequence_key(1)).await.unwrap();
        assert!(first.is_some(), "{name}");
    }
}

#[tokio::test]
async fn corrupt_body_is_a_serialization_fault() {
    let store = MemoryStore::new();
    quire_store::MirrorStore::put(
        &store,
        quire_store::Collection::Notes,
        quire_store::StoredRecord::new("bad", b"{".to_vec()),
    )
    .await
    .unwrap();
    let mirror = Mirror::new(store);
    let err = mirror.get::<NoteRecord>("bad").await.unwrap_err();
    assert!(matches!(err, StoreError::Serialization { collection: "notes", .. }));
}

#[tokio::test]
async fn sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("mirror.db");

    {
        let mirror = Mirror::new(SqliteStore::open(&path).unwrap());
        mirror.put(&folder("inbox", true)).await.unwrap();
        mirror
            .put(&SettingsRecord {
                blob: SettingsBlob::new(b"theme=dark".to_vec()),
                updated_at: 7,
            })
            .await
            .unwrap();
        assert_eq!(mirror.next_id::<OutboxEntry>().await.unwrap(), 1);
        assert_eq!(mirror.next_id::<OutboxEntry>().await.unwrap(), 2);
    }

    let mirror = Mirror::new(SqliteStore::open(&path).unwrap());
    let inbox: Option<FolderRecord> = mirror.get("inbox").await.unwrap();
    assert!(inbox.is_some_and(|f| f.is_default));
    let settings: Option<SettingsRecord> = mirror.get(SETTINGS_KEY).await.unwrap();
    assert_eq!(settings.map(|s| s.updated_at), Some(7));
    assert_eq!(mirror.next_id::<OutboxEntry>().await.unwrap(), 3);
}
