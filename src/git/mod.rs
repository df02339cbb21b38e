//! Git access for app repositories: libgit2 for reads, the git CLI for
//! fetches and working-tree mutations.

mod cli;
mod repo;
pub mod version;

pub(crate) use cli::validate_git_ref;
pub use cli::{GitCli, GitError};
pub use repo::{AppRepo, PrimaryRemote, Refresh};
pub use version::{UpgradeKind, VersionError, VersionPair};
