//! Background cleanup: trash/snapshot sweeping and orphan meta traversals
//! (§4.5, §4.6).

mod meta_cleanup;
mod trash;

pub use meta_cleanup::{clean_orphaned_binlog_metas, clean_orphaned_delete_bitmaps, clean_orphaned_pending_publish, clean_orphaned_rowset_metas, BinlogMetaRecord, MetaParseError, MetaStore, RowsetMetaRecord};
pub use trash::{start_trash_sweep, TrashSweepGuard, TrashSweepParams};
