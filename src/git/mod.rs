pub mod cache;
pub mod mirror;
pub mod worktree;

pub use cache::{CacheError, MirrorCache};
pub use mirror::Mirror;
pub use worktree::{Worktree, WorktreeError, WorktreeManager};

use crate::provider::RepositoryProvider;

/// User name and password git presents over HTTPS.
#[derive(Clone)]
pub struct GitAuth {
    pub user: String,
    pub password: String,
}

impl GitAuth {
    pub fn from_provider(provider: &dyn RepositoryProvider) -> Option<GitAuth> {
        provider.credentials().map(|credentials| {
            let (user, password) = credentials.git_user_password(provider.platform());
            GitAuth { user, password }
        })
    }
}
