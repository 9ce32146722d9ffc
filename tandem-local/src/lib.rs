//! Local file tree store for tandem
//!
//! Scans a directory into a [`Snapshot`](tandem_sync::Snapshot) of
//! NFC-normalized path keys and applies remote changes with atomic writes.

pub mod fs_store;
pub mod paths;

pub use fs_store::FsLocalStore;
