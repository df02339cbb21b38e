//! Shared fixtures for unit tests: a throwaway bench with real git
//! repositories, plus recording stand-ins for the subprocess layer and the
//! terminal prompt.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use git2::{Oid, Repository, RepositoryInitOptions, Signature, build::CheckoutBuilder};
use tempfile::TempDir;

use crate::bench::{BenchPaths, InstalledApps};
use crate::git::GitCli;
use crate::ops::{BenchOps, OpsError};
use crate::types::AppName;
use crate::update::Prompt;

/// Branch every fixture repository starts on.
pub const BRANCH: &str = "version-13";

pub fn app(name: &str) -> AppName {
    name.parse().unwrap()
}

/// Whether the git binary is on PATH. Tests that shell out to git return
/// early without it.
pub fn require_git() -> bool {
    let available = GitCli::new().is_available();
    if !available {
        eprintln!("git not found on PATH, skipping");
    }
    available
}

/// A bench at `<tmp>/bench` with one site, and upstream repositories under
/// `<tmp>/upstreams`.
pub struct Fixture {
    _dir: TempDir,
    upstreams: PathBuf,
    pub paths: BenchPaths,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bench");
        let upstreams = dir.path().join("upstreams");
        std::fs::create_dir_all(root.join("apps")).unwrap();
        std::fs::create_dir_all(root.join("sites").join("site1.local")).unwrap();
        std::fs::create_dir_all(&upstreams).unwrap();

        Self {
            _dir: dir,
            upstreams,
            paths: BenchPaths::new(root),
        }
    }

    /// Create an upstream for `name`, clone it into `apps/` with the remote
    /// named `upstream`, and register it.
    pub fn add_app(&self, name: &str, version: &str) {
        let upstream = self.upstreams.join(name);
        let repo = init(&upstream);
        write_version_files(&upstream, name, version);
        commit_all(&repo, "initial");

        let local = Repository::clone(&upstream.to_string_lossy(), self.app_dir(name)).unwrap();
        local.remote_rename("origin", "upstream").unwrap();
        self.register(name);
    }

    /// An app repository with no remote at all.
    pub fn add_local_app(&self, name: &str, version: &str) {
        let dir = self.app_dir(name);
        let repo = init(&dir);
        write_version_files(&dir, name, version);
        commit_all(&repo, "initial");
        self.register(name);
    }

    /// Append to `sites/apps.txt`.
    pub fn register(&self, name: &str) {
        InstalledApps::new(&self.paths).add(&app(name)).unwrap();
    }

    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.paths.app_dir(&app(name))
    }

    pub fn open_git(&self, name: &str) -> Repository {
        Repository::open(self.app_dir(name)).unwrap()
    }

    /// Commit `file` on the upstream's checked-out branch.
    pub fn commit_upstream(&self, name: &str, file: &str, contents: &str) -> Oid {
        let dir = self.upstreams.join(name);
        let path = dir.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
        commit_all(&Repository::open(&dir).unwrap(), file)
    }

    /// Bump the version on the upstream's checked-out branch.
    pub fn set_upstream_version(&self, name: &str, version: &str) -> Oid {
        let dir = self.upstreams.join(name);
        write_version_files(&dir, name, version);
        commit_all(&Repository::open(&dir).unwrap(), &format!("bump to {}", version))
    }

    /// Create `branch` on the upstream from its current head with a new
    /// version, leaving the upstream on its original branch.
    pub fn upstream_branch(&self, name: &str, branch: &str, version: &str) -> Oid {
        let dir = self.upstreams.join(name);
        let repo = Repository::open(&dir).unwrap();
        let original = repo.head().unwrap().name().unwrap().to_string();

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch(branch, &head, false).unwrap();
        switch_head(&repo, &format!("refs/heads/{}", branch));

        write_version_files(&dir, name, version);
        let oid = commit_all(&repo, &format!("{} at {}", branch, version));

        switch_head(&repo, &original);
        oid
    }

    /// Fetch every upstream branch into `refs/remotes/upstream/*` without
    /// touching the working tree.
    pub fn fetch_local(&self, name: &str) {
        let repo = self.open_git(name);
        let mut remote = repo.find_remote("upstream").unwrap();
        remote
            .fetch(&["+refs/heads/*:refs/remotes/upstream/*"], None, None)
            .unwrap();
    }

    /// Point the app's `upstream` remote at a path that does not exist.
    pub fn break_remote(&self, name: &str) {
        let repo = self.open_git(name);
        let gone = self.upstreams.join("gone").join(name);
        repo.remote_set_url("upstream", &gone.to_string_lossy())
            .unwrap();
    }

    /// Create `branch` at HEAD and switch to it.
    pub fn checkout_new_branch(&self, name: &str, branch: &str) {
        let repo = self.open_git(name);
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch(branch, &head, false).unwrap();
        repo.set_head(&format!("refs/heads/{}", branch)).unwrap();
    }

    /// Check out a local branch tracking the fetched `upstream/<branch>`.
    pub fn checkout_tracking(&self, name: &str, branch: &str) {
        let repo = self.open_git(name);
        let target = repo
            .find_reference(&format!("refs/remotes/upstream/{}", branch))
            .unwrap()
            .peel_to_commit()
            .unwrap();
        let mut local = repo.branch(branch, &target, false).unwrap();
        local
            .set_upstream(Some(&format!("upstream/{}", branch)))
            .unwrap();
        switch_head(&repo, &format!("refs/heads/{}", branch));
    }

    pub fn current_branch(&self, name: &str) -> String {
        let repo = self.open_git(name);
        let head = repo.head().unwrap();
        head.shorthand().unwrap().to_string()
    }

    pub fn head(&self, name: &str) -> Oid {
        self.open_git(name)
            .head()
            .unwrap()
            .peel_to_commit()
            .unwrap()
            .id()
    }

    /// HEAD of every app directory that is a repository.
    pub fn heads(&self) -> BTreeMap<String, Oid> {
        self.paths
            .app_dirs()
            .unwrap()
            .into_iter()
            .filter_map(|name| {
                let repo = Repository::open(self.paths.apps_dir().join(&name)).ok()?;
                let oid = repo.head().ok()?.peel_to_commit().ok()?.id();
                Some((name, oid))
            })
            .collect()
    }

    /// Add a pattern to the app's `.git/info/exclude`.
    pub fn ignore(&self, name: &str, pattern: &str) {
        let info = self.app_dir(name).join(".git").join("info");
        std::fs::create_dir_all(&info).unwrap();
        let path = info.join("exclude");
        let mut contents = std::fs::read_to_string(&path).unwrap_or_default();
        contents.push_str(pattern);
        contents.push('\n');
        std::fs::write(path, contents).unwrap();
    }
}

fn init(dir: &Path) -> Repository {
    let mut options = RepositoryInitOptions::new();
    options.initial_head(BRANCH);
    Repository::init_opts(dir, &options).unwrap()
}

fn write_version_files(dir: &Path, name: &str, version: &str) {
    let module = dir.join(name);
    std::fs::create_dir_all(&module).unwrap();
    std::fs::write(
        module.join("__init__.py"),
        format!("__version__ = \"{}\"\n", version),
    )
    .unwrap();
    std::fs::write(
        module.join("hooks.py"),
        format!("app_name = \"{}\"\ndevelop_version = \"{}\"\n", name, version),
    )
    .unwrap();
    std::fs::write(
        dir.join("setup.py"),
        format!("name = \"{}\"\nversion = \"{}\"\n", name, version),
    )
    .unwrap();
}

/// Stage everything and commit on HEAD.
fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let signature = Signature::now("Bench Tests", "tests@example.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<_> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )
    .unwrap()
}

fn switch_head(repo: &Repository, refname: &str) {
    repo.set_head(refname).unwrap();
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .unwrap();
}

/// One collaborator call, as seen by `RecordingOps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Backup(String),
    Requirements,
    Install(AppName),
    NodePackages,
    Migrate,
    Build,
    RestartSupervisor,
    RestartSystemd,
    ValidatePillow,
}

/// Records every call in order. The call matching `fail` is recorded and
/// then reported as a failed command.
#[derive(Debug, Default)]
pub struct RecordingOps {
    calls: RefCell<Vec<Call>>,
    fail: Option<Call>,
}

impl RecordingOps {
    pub fn failing(call: Call) -> Self {
        Self {
            calls: RefCell::default(),
            fail: Some(call),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: Call) -> Result<(), OpsError> {
        let failed = self.fail.as_ref() == Some(&call);
        let command = format!("{:?}", call);
        self.calls.borrow_mut().push(call);
        if failed {
            return Err(OpsError::CommandFailed {
                command,
                exit_code: 1,
            });
        }
        Ok(())
    }
}

impl BenchOps for RecordingOps {
    fn backup_site(&self, site: &str) -> Result<(), OpsError> {
        self.record(Call::Backup(site.to_string()))
    }

    fn update_requirements(&self) -> Result<(), OpsError> {
        self.record(Call::Requirements)
    }

    fn install_app(&self, app: &AppName) -> Result<(), OpsError> {
        self.record(Call::Install(app.clone()))
    }

    fn update_node_packages(&self, _apps: &[AppName]) -> Result<(), OpsError> {
        self.record(Call::NodePackages)
    }

    fn migrate_sites(&self) -> Result<(), OpsError> {
        self.record(Call::Migrate)
    }

    fn build_assets(&self) -> Result<(), OpsError> {
        self.record(Call::Build)
    }

    fn restart_supervisor(&self) -> Result<(), OpsError> {
        self.record(Call::RestartSupervisor)
    }

    fn restart_systemd(&self) -> Result<(), OpsError> {
        self.record(Call::RestartSystemd)
    }

    fn validate_pillow(&self) -> Result<(), OpsError> {
        self.record(Call::ValidatePillow)
    }
}

/// Answers confirmations from a script and counts how often it was asked.
#[derive(Debug)]
pub struct ScriptedPrompt {
    answer: bool,
    asked: Cell<usize>,
}

impl ScriptedPrompt {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: Cell::new(0),
        }
    }

    /// For runs that should never ask; answers no if they do.
    pub fn never_asked() -> Self {
        Self::answering(false)
    }

    pub fn asked(&self) -> usize {
        self.asked.get()
    }
}

impl Prompt for ScriptedPrompt {
    fn confirm(&self, _message: &str) -> bool {
        self.asked.set(self.asked.get() + 1);
        self.answer
    }
}
