//! `bench switch-to-branch`: move apps to another upstream branch, one app
//! at a time.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::bench::registry::app_directories;
use crate::bench::{
    BenchConfig, BenchPaths, InterruptRelease, MaintenanceGuard, RUN_LOCK_TIMEOUT, RegistryError,
    RunLock,
};
use crate::git::{AppRepo, GitCli, GitError, Refresh, UpgradeKind, VersionError, VersionPair};
use crate::ops::BenchOps;
use crate::ops::upgrade::post_upgrade_notice;
use crate::types::AppName;

use super::executor::{
    StageFailure, UpdateError, backup_all_sites, build_assets, patch_sites, reinstall_dependencies,
};

/// Apps moved together by `switch-to-master` and `switch-to-develop`.
const CORE_APPS: [&str; 2] = ["frappe", "erpnext"];

#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("invalid branch {0:?}")]
    InvalidBranch(String),
    #[error("the app \"{0}\" does not exist")]
    UnknownApp(AppName),
    #[error("another update is running: {0}")]
    Locked(#[source] std::io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The post-upgrade sequence failed after apps were switched.
    #[error("{source}")]
    PostUpgrade {
        #[source]
        source: UpdateError,
        report: Box<SwitchReport>,
    },
}

impl SwitchError {
    /// What was switched before the post-upgrade sequence failed.
    pub fn report(&self) -> Option<&SwitchReport> {
        match self {
            SwitchError::PostUpgrade { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// What happened to one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    Switched { upgrade: Option<VersionPair> },
    AlreadyOnBranch,
    InvalidRepository(String),
    /// Switching would be a major upgrade and `--upgrade` was not given.
    MajorVersionUpgrade(VersionPair),
    NoRemote,
    BranchMissing { remote: String },
    Failed(String),
}

impl SwitchOutcome {
    fn is_failure(&self) -> bool {
        !matches!(
            self,
            SwitchOutcome::Switched { .. }
                | SwitchOutcome::AlreadyOnBranch
                | SwitchOutcome::InvalidRepository(_)
        )
    }
}

impl fmt::Display for SwitchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchOutcome::Switched { upgrade: None } => write!(f, "switched"),
            SwitchOutcome::Switched {
                upgrade: Some(pair),
            } => write!(f, "switched (upgraded {} -> {})", pair.local, pair.upstream),
            SwitchOutcome::AlreadyOnBranch => write!(f, "already on branch"),
            SwitchOutcome::InvalidRepository(reason) => {
                write!(f, "skipped, not a valid repository ({})", reason)
            }
            SwitchOutcome::MajorVersionUpgrade(pair) => write!(
                f,
                "would upgrade from {} to {}, pass --upgrade to confirm",
                pair.local, pair.upstream
            ),
            SwitchOutcome::NoRemote => write!(f, "remote does not exist"),
            SwitchOutcome::BranchMissing { remote } => {
                write!(f, "branch does not exist in {}", remote)
            }
            SwitchOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Default)]
pub struct SwitchReport {
    pub branch: String,
    pub outcomes: Vec<(AppName, SwitchOutcome)>,
    /// Set when the post-upgrade sequence ran.
    pub upgraded: Option<VersionPair>,
    pub warnings: Vec<StageFailure>,
}

impl SwitchReport {
    #[cfg(test)]
    pub fn outcome(&self, app: &str) -> Option<&SwitchOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name.as_str() == app)
            .map(|(_, outcome)| outcome)
    }

    pub fn switched(&self) -> Vec<&AppName> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SwitchOutcome::Switched { .. }))
            .map(|(app, _)| app)
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|(_, o)| o.is_failure())
    }

    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        let switched = self.switched();
        if !switched.is_empty() {
            lines.push("Successfully switched branches for:".to_string());
            lines.extend(switched.iter().map(|app| format!("  {}", app)));
        }
        for (app, outcome) in &self.outcomes {
            if !matches!(outcome, SwitchOutcome::Switched { .. }) {
                lines.push(format!("{}: {}", app, outcome));
            }
        }
        lines.join("\n")
    }
}

pub struct BranchSwitcher<'a> {
    paths: &'a BenchPaths,
    git: GitCli,
    ops: &'a dyn BenchOps,
    interrupt: Option<&'a InterruptRelease>,
    refresh: Refresh,
    lock_timeout: Duration,
}

impl<'a> BranchSwitcher<'a> {
    pub fn new(paths: &'a BenchPaths, ops: &'a dyn BenchOps) -> Self {
        Self {
            paths,
            git: GitCli::new(),
            ops,
            interrupt: None,
            refresh: Refresh::Fetch,
            lock_timeout: RUN_LOCK_TIMEOUT,
        }
    }

    pub fn with_interrupt(mut self, interrupt: &'a InterruptRelease) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Whether the target branch is fetched before comparing versions.
    pub fn with_refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Switch `apps` (every app directory when empty) to `branch`.
    ///
    /// Per-app problems are recorded in the report and do not stop the
    /// batch. A major upgrade is only carried out with `upgrade`.
    pub fn switch(
        &self,
        branch: &str,
        apps: &[AppName],
        upgrade: bool,
    ) -> Result<SwitchReport, SwitchError> {
        crate::git::validate_git_ref(branch, "branch")
            .map_err(|_| SwitchError::InvalidBranch(branch.to_string()))?;

        let apps = if apps.is_empty() {
            app_directories(self.paths)?
        } else {
            if let Some(missing) = apps.iter().find(|a| !self.paths.app_dir(a).is_dir()) {
                return Err(SwitchError::UnknownApp(missing.clone()));
            }
            apps.to_vec()
        };

        let _lock = RunLock::acquire(&self.paths.run_lock(), self.lock_timeout)
            .map_err(SwitchError::Locked)?;

        let mut report = SwitchReport {
            branch: branch.to_string(),
            ..SwitchReport::default()
        };
        for app in apps {
            let outcome = self.switch_app(&app, branch, upgrade);
            match &outcome {
                SwitchOutcome::Switched { .. } => println!("Switched {} to {}", app, branch),
                SwitchOutcome::InvalidRepository(_) => log::warn!("{}: {}", app, outcome),
                other => println!("{}: {}", app, other),
            }
            report.outcomes.push((app, outcome));
        }

        if let Some(pair) = upgrade_pair(&report.outcomes) {
            if let Err(source) = self.post_upgrade(pair, &mut report) {
                return Err(SwitchError::PostUpgrade {
                    source,
                    report: Box::new(report),
                });
            }
            report.upgraded = Some(pair);
        }
        Ok(report)
    }

    /// Switch the framework and ERPNext (when installed) to `branch`.
    pub fn switch_core(&self, branch: &str, upgrade: bool) -> Result<SwitchReport, SwitchError> {
        let apps: Vec<AppName> = CORE_APPS
            .iter()
            .filter_map(|name| name.parse::<AppName>().ok())
            .filter(|app| self.paths.app_dir(app).is_dir())
            .collect();
        if apps.is_empty() {
            return Err(SwitchError::UnknownApp(AppName::base()));
        }
        self.switch(branch, &apps, upgrade)
    }

    fn switch_app(&self, app: &AppName, branch: &str, upgrade: bool) -> SwitchOutcome {
        let repo = match AppRepo::open(self.paths, app) {
            Ok(repo) => repo,
            Err(e) => return SwitchOutcome::InvalidRepository(e.to_string()),
        };

        if matches!(repo.current_branch().as_deref(), Ok(current) if current == branch) {
            return SwitchOutcome::AlreadyOnBranch;
        }

        println!("\nChecking for version upgrades for {}...", app);
        let kind = match repo.check_upgrade(&self.git, Some(branch), self.refresh) {
            Ok(kind) => kind,
            Err(VersionError::InvalidRemote(_)) => return SwitchOutcome::NoRemote,
            Err(VersionError::InvalidBranch { remote, .. }) => {
                return SwitchOutcome::BranchMissing { remote };
            }
            Err(e) => return SwitchOutcome::Failed(e.to_string()),
        };

        if let UpgradeKind::Major(pair) = kind {
            if !upgrade {
                return SwitchOutcome::MajorVersionUpgrade(pair);
            }
        }

        // check_upgrade only succeeds with a resolved remote
        let Some(remote) = repo.primary_remote().name().map(str::to_string) else {
            return SwitchOutcome::NoRemote;
        };

        println!("Switching for {}", app);
        match self.repoint(&repo, &remote, branch) {
            Ok(()) => SwitchOutcome::Switched {
                upgrade: kind.is_major().then(|| kind.pair()),
            },
            Err(e) => {
                println!("Error switching to branch {} for {}", branch, app);
                SwitchOutcome::Failed(e.to_string())
            }
        }
    }

    /// Track every remote branch, fetch, check out and merge.
    fn repoint(&self, repo: &AppRepo, remote: &str, branch: &str) -> Result<(), GitError> {
        let dir = repo.path();
        self.git.track_all_branches(dir, remote)?;
        if repo.is_shallow() {
            self.git.fetch_unshallow(dir, remote)?;
        } else {
            self.git.fetch(dir, remote)?;
        }
        self.git.checkout(dir, branch)?;
        self.git.merge(dir, remote, branch)
    }

    /// Requirements, node packages, backup, migrate, build and the upgrade
    /// notice, inside maintenance mode.
    fn post_upgrade(&self, pair: VersionPair, report: &mut SwitchReport) -> Result<(), UpdateError> {
        let config_path = self.paths.common_site_config();
        let config = BenchConfig::load(&config_path)?;
        let guard = MaintenanceGuard::acquire(&config_path, self.interrupt)?;

        let result: Result<(), UpdateError> = (|| {
            reinstall_dependencies(self.paths, self.ops, &mut report.warnings);
            backup_all_sites(self.paths, self.ops)?;
            patch_sites(self.ops)?;
            build_assets(self.ops)?;
            print!("{}", post_upgrade_notice(pair.local, pair.upstream, &config));
            Ok(())
        })();

        let released = guard.release();
        result?;
        released.map_err(UpdateError::Maintenance)
    }
}

/// The framework app's upgrade if it switched with one, else the first.
fn upgrade_pair(outcomes: &[(AppName, SwitchOutcome)]) -> Option<VersionPair> {
    let upgraded = |(app, outcome): &(AppName, SwitchOutcome)| match outcome {
        SwitchOutcome::Switched {
            upgrade: Some(pair),
        } => Some((app.is_base(), *pair)),
        _ => None,
    };

    let mut pairs = outcomes.iter().filter_map(upgraded).peekable();
    let first = pairs.peek().map(|(_, pair)| *pair);
    pairs
        .find(|(is_base, _)| *is_base)
        .map(|(_, pair)| pair)
        .or(first)
}
