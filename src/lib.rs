//! tandem workspace root
//!
//! Re-exports the workspace crates so the cross-crate tests under `tests/` can
//! drive the engine against real local trees and an in-memory remote.

pub use tandem_local as local;
pub use tandem_remote as remote;
pub use tandem_sync as sync;
