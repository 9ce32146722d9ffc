//! Remote stores for tandem
//!
//! - [`GitHubRemote`]: a branch of a GitHub repository via the Git Data API
//! - [`MemoryRemote`]: an in-process remote for tests and offline runs

pub mod github;
pub mod memory;
pub mod retry;
pub mod wire;

pub use github::{GitHubConfig, GitHubRemote};
pub use memory::{MemoryOp, MemoryRemote};
pub use retry::RetryPolicy;
