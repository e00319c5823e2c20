//! Bibliographic data model: records, the live database, the file codec,
//! and per-revision snapshots.

pub mod codec;
pub mod record;
pub mod snapshot;

pub use record::{BibDatabase, BibRecord, ENTRY_TYPE_FIELD};
pub use snapshot::DatabaseSnapshot;
