//! Read-side handle over one app's git working directory.

use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository, Status, StatusOptions};

use crate::bench::BenchPaths;
use crate::types::AppName;

use super::version::{
    DEVELOP_VERSION_FIELD, UpgradeKind, VERSION_FIELD, VersionError, classify, version_from_str,
};
use super::{GitCli, GitError};

/// Name of the remote preferred over any other when present.
const UPSTREAM: &str = "upstream";

/// The remote an app pulls from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryRemote {
    /// `upstream`, or the only configured remote.
    Resolved(String),
    /// No remotes configured.
    Missing,
    /// Several remotes, none named `upstream`.
    Ambiguous(Vec<String>),
}

impl PrimaryRemote {
    pub fn name(&self) -> Option<&str> {
        match self {
            PrimaryRemote::Resolved(name) => Some(name),
            _ => None,
        }
    }
}

/// Whether remote-tracking refs should be refreshed before reading them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Fetch from the remote first.
    Fetch,
    /// Use whatever remote-tracking refs are already present.
    Cached,
}

/// An app directory opened as a git repository.
pub struct AppRepo {
    name: AppName,
    path: PathBuf,
    repo: Repository,
}

impl std::fmt::Debug for AppRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRepo")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

impl AppRepo {
    /// Open `<bench>/apps/<name>`.
    ///
    /// The directory itself must be the repository root; a parent repository
    /// (e.g. a bench kept under version control) does not count.
    pub fn open(paths: &BenchPaths, name: &AppName) -> Result<Self, GitError> {
        let path = paths.app_dir(name);
        if !path.is_dir() {
            return Err(GitError::RepositoryInvalid(format!(
                "{} (directory missing)",
                path.display()
            )));
        }

        let repo = Repository::open(&path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                GitError::RepositoryInvalid(path.display().to_string())
            } else {
                GitError::Git(e)
            }
        })?;

        if repo.is_bare() {
            return Err(GitError::RepositoryInvalid(format!(
                "{} (bare repository)",
                path.display()
            )));
        }

        Ok(Self {
            name: name.clone(),
            path,
            repo,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True iff there are no modified, staged or untracked files.
    pub fn is_clean(&self) -> Result<bool, GitError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);

        let statuses = self.repo.statuses(Some(&mut opts))?;
        let dirty = statuses
            .iter()
            .any(|entry| !entry.status().is_empty() && !entry.status().contains(Status::IGNORED));

        Ok(!dirty)
    }

    /// Name of the checked-out branch.
    pub fn current_branch(&self) -> Result<String, GitError> {
        if self.repo.head_detached()? {
            return Err(GitError::DetachedHead(self.name.to_string()));
        }

        let head = match self.repo.head() {
            Ok(head) => head,
            // Unborn branch: HEAD points at refs/heads/<name> with no commits yet
            Err(e) if e.code() == ErrorCode::UnbornBranch => {
                let head = self.repo.find_reference("HEAD")?;
                let target = head.symbolic_target().ok_or_else(|| {
                    GitError::ParseError("HEAD is not a symbolic reference".to_string())
                })?;
                return target
                    .strip_prefix("refs/heads/")
                    .map(str::to_string)
                    .ok_or_else(|| GitError::ParseError(format!("unexpected HEAD target '{}'", target)));
            }
            Err(e) => return Err(e.into()),
        };

        let ref_name = head
            .name()
            .ok_or_else(|| GitError::ParseError("HEAD reference has no name".to_string()))?;

        ref_name
            .strip_prefix("refs/heads/")
            .map(str::to_string)
            .ok_or_else(|| {
                GitError::ParseError(format!(
                    "unexpected HEAD format: expected 'refs/heads/<branch>', got '{}'",
                    ref_name
                ))
            })
    }

    /// Names of all configured remotes.
    pub fn remotes(&self) -> Result<Vec<String>, GitError> {
        let remotes = self.repo.remotes()?;
        Ok(remotes.iter().flatten().map(str::to_string).collect())
    }

    /// URL of a configured remote.
    pub fn remote_url(&self, remote: &str) -> Result<Option<String>, GitError> {
        let remote = self.repo.find_remote(remote)?;
        Ok(remote.url().map(str::to_string))
    }

    /// Resolve the remote to pull from. Never fails: an unreadable remote
    /// list is treated as having no remotes.
    pub fn primary_remote(&self) -> PrimaryRemote {
        let remotes = match self.remotes() {
            Ok(remotes) => remotes,
            Err(e) => {
                log::warn!("Failed to list remotes for {}: {}", self.name, e);
                return PrimaryRemote::Missing;
            }
        };

        if remotes.iter().any(|r| r == UPSTREAM) {
            return PrimaryRemote::Resolved(UPSTREAM.to_string());
        }

        match remotes.len() {
            0 => PrimaryRemote::Missing,
            1 => PrimaryRemote::Resolved(remotes[0].clone()),
            _ => PrimaryRemote::Ambiguous(remotes),
        }
    }

    /// Number of commits on `remote/branch` that HEAD does not contain.
    ///
    /// Returns 0 when the remote-tracking ref is absent; fetch first.
    pub fn commits_ahead(&self, remote: &str, branch: &str) -> Result<usize, GitError> {
        let upstream = match self.remote_commit(remote, branch)? {
            Some(oid) => oid,
            None => return Ok(0),
        };

        let head = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?.id()),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let mut walk = self.repo.revwalk()?;
        walk.push(upstream)?;
        if let Some(head) = head {
            walk.hide(head)?;
        }

        let mut count = 0;
        for oid in walk {
            oid?;
            count += 1;
        }
        Ok(count)
    }

    fn remote_commit(&self, remote: &str, branch: &str) -> Result<Option<git2::Oid>, GitError> {
        let name = format!("refs/remotes/{}/{}", remote, branch);
        match self.repo.find_reference(&name) {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the clone is shallow.
    pub fn is_shallow(&self) -> bool {
        self.repo.is_shallow()
    }

    /// Version from `<app>/<app>/__init__.py`, falling back to `setup.py`.
    pub fn read_version(&self) -> Result<String, VersionError> {
        let module = self.path.join(self.name.as_str()).join("__init__.py");
        if let Some(version) = read_field(&module, VERSION_FIELD)? {
            return Ok(version);
        }

        let setup = self.path.join("setup.py");
        if let Some(version) = read_field(&setup, "version")? {
            return Ok(version);
        }

        Err(VersionError::NotFound(self.name.to_string()))
    }

    /// Pre-release line from `<app>/<app>/hooks.py`.
    pub fn read_develop_version(&self) -> Result<String, VersionError> {
        let hooks = self.path.join(self.name.as_str()).join("hooks.py");
        read_field(&hooks, DEVELOP_VERSION_FIELD)?
            .ok_or_else(|| VersionError::NotFound(self.name.to_string()))
    }

    /// Version declared on `remote/branch`, without touching the working tree.
    ///
    /// Looks in the module file first, then `setup.py`, like `read_version`.
    /// Returns `None` only if the branch is absent there.
    pub fn upstream_version(&self, remote: &str, branch: &str) -> Result<Option<String>, VersionError> {
        let commit = match self.remote_commit(remote, branch)? {
            Some(oid) => self.repo.find_commit(oid)?,
            None => return Ok(None),
        };
        let tree = commit.tree()?;

        let module = format!("{}/__init__.py", self.name);
        if let Some(version) = self.blob_field(&tree, &module, VERSION_FIELD)? {
            return Ok(Some(version));
        }
        if let Some(version) = self.blob_field(&tree, "setup.py", "version")? {
            return Ok(Some(version));
        }

        Err(VersionError::NotFound(format!(
            "{} on {}/{}",
            self.name, remote, branch
        )))
    }

    fn blob_field(
        &self,
        tree: &git2::Tree<'_>,
        path: &str,
        field: &str,
    ) -> Result<Option<String>, VersionError> {
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let object = entry.to_object(&self.repo)?;
        Ok(object
            .as_blob()
            .and_then(|blob| version_from_str(&String::from_utf8_lossy(blob.content()), field)))
    }

    /// Compare the checked-out version with the one on the primary remote's
    /// `branch` (the current branch when `None`).
    pub fn check_upgrade(
        &self,
        git: &GitCli,
        branch: Option<&str>,
        refresh: Refresh,
    ) -> Result<UpgradeKind, VersionError> {
        let remote = self
            .primary_remote()
            .name()
            .map(str::to_string)
            .ok_or_else(|| VersionError::InvalidRemote(self.name.to_string()))?;

        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => self.current_branch()?,
        };

        if refresh == Refresh::Fetch {
            match git.fetch_branch(&self.path, &remote, &branch) {
                Ok(()) => {}
                Err(GitError::CommandFailed { output, .. })
                    if output.contains("couldn't find remote ref") =>
                {
                    log::debug!("{}: {} has no branch {}", self.name, remote, branch);
                }
                Err(e) => {
                    log::warn!("Fetching {} for {} failed: {}", remote, self.name, e);
                    return Err(VersionError::InvalidRemote(self.name.to_string()));
                }
            }
        }

        let upstream = self
            .upstream_version(&remote, &branch)?
            .ok_or_else(|| VersionError::InvalidBranch {
                app: self.name.to_string(),
                remote: remote.clone(),
                branch: branch.clone(),
            })?;
        let local = self.read_version()?;

        classify(&local, &upstream)
    }
}

fn read_field(path: &Path, field: &str) -> Result<Option<String>, VersionError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(version_from_str(&contents, field)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
