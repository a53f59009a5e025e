//! # quire-store
//!
//! The local mirror: a transactional key-value store with typed record
//! collections and secondary indexes.
//!
//! - [`MirrorStore`] - object-safe backend trait over encoded records
//! - [`Mirror`] - typed façade (`get::<NoteRecord>`, batches, sequences)
//! - [`MemoryStore`] - in-memory backend (tests, hosts without storage)
//! - [`SqliteStore`] - persistent backend
//!
//! Both backends implement the identical interface; nothing above this crate
//! knows which one it holds. A missing key reads as `None`; every other
//! failure is a [`StoreError`] that propagates unmodified.

pub mod backends;
mod error;
mod mirror;
mod ops;
mod record;
mod types;

pub use backends::{MemoryStore, SqliteStore};
pub use error::{StoreError, StoreResult};
pub use mirror::{Mirror, MirrorBatch};
pub use ops::MirrorStore;
pub use record::{DEFAULT_INDEX, ENTITY_INDEX, FOLDER_INDEX, Record, sequence_key};
pub use types::{Collection, StoredRecord, WriteBatch, WriteOp};
