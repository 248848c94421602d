//! Local git repositories standing in for remote hosting providers in tests.

use std::path::{Path, PathBuf};

use git2::{Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;

pub struct RemoteFixture {
    dir: TempDir,
    repo: Repository,
}

impl RemoteFixture {
    /// Creates `<tmp>/remotes/<organization>/<repository>` with `master` as initial branch.
    pub fn new(organization: &str, repository: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remotes").join(organization).join(repository);
        let mut options = RepositoryInitOptions::new();
        options.initial_head("master").mkpath(true);
        let repo = Repository::init_opts(&path, &options).unwrap();
        RemoteFixture { dir, repo }
    }

    /// Another repository next to this one, sharing the same `remotes` root.
    pub fn sibling(&self, organization: &str, repository: &str) -> Repository {
        let path = self.root().join(organization).join(repository);
        let mut options = RepositoryInitOptions::new();
        options.initial_head("master").mkpath(true);
        Repository::init_opts(path, &options).unwrap()
    }

    /// Directory containing `<org>/<repo>` repositories, i.e. the local provider server.
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("remotes")
    }

    pub fn workdir(&self) -> &Path {
        self.repo.workdir().unwrap()
    }

    /// A scratch directory that lives as long as the fixture.
    pub fn scratch(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn url(&self) -> String {
        format!("file://{}", self.workdir().display())
            .trim_end_matches('/')
            .to_owned()
    }

    /// Commits `files` on the current branch and returns the new commit id.
    pub fn commit(&self, files: &[(&str, &str)], message: &str) -> String {
        commit_files(&self.repo, files, message).to_string()
    }

    pub fn tag(&self, name: &str) {
        let head = self.repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
        self.repo.tag_lightweight(name, &head, true).unwrap();
    }

    pub fn annotated_tag(&self, name: &str) {
        let head = self.repo.head().unwrap().peel(git2::ObjectType::Commit).unwrap();
        self.repo
            .tag(name, &head, &signature(), "release", true)
            .unwrap();
    }

    pub fn branch(&self, name: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo.branch(name, &head, true).unwrap();
    }

    pub fn add_submodule(&self, url: &str, path: &str) {
        add_submodule(&self.repo, url, path);
    }

    pub fn delete_branch(&self, name: &str) {
        self.repo
            .find_branch(name, git2::BranchType::Local)
            .unwrap()
            .delete()
            .unwrap();
    }
}

/// Clones `url` as a submodule at `path` and stages it; commit to record it.
pub fn add_submodule(repo: &Repository, url: &str, path: &str) {
    let mut submodule = repo.submodule(url, Path::new(path), true).unwrap();
    submodule.clone(None).unwrap();
    submodule.add_finalize().unwrap();
}

pub fn commit_files(repo: &Repository, files: &[(&str, &str)], message: &str) -> Oid {
    let workdir = repo.workdir().unwrap().to_path_buf();
    let mut index = repo.index().unwrap();
    for (name, content) in files {
        let path = workdir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        index.add_path(Path::new(name)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let signature = signature();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
}

fn signature() -> Signature<'static> {
    Signature::now("pipefetch", "pipefetch@example.com").unwrap()
}
