//! `bench update`: preflight checks, then the mutating stages inside
//! maintenance mode.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::bench::patches::{self, PatchError};
use crate::bench::{
    BenchConfig, BenchPaths, ConfigError, ExcludedApps, InterruptRelease, MaintenanceGuard,
    RUN_LOCK_TIMEOUT, RegistryError, RunLock, managed_apps,
};
use crate::git::{AppRepo, GitCli, GitError, Refresh, UpgradeKind, VersionError, VersionPair};
use crate::ops::upgrade::{post_upgrade_notice, validate_upgrade};
use crate::ops::{BenchOps, OpsError};
use crate::types::AppName;

use super::plan::{Decision, PlanEntry, PlanOptions, UpdatePlan, plan};
use super::prompt::Prompt;

/// Apps whose `master` branch was renamed; benches still on it must switch.
const RENAMED_MASTER_APPS: [&str; 2] = ["frappe", "erpnext"];

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Release bench, cannot update")]
    ReleaseBench,
    #[error(
        "{app}'s master branch has been renamed. Switch to a versioned branch \
         (e.g. `bench switch-to-branch version-13`) or to develop to get future updates"
    )]
    ObsoleteBranch { app: AppName },
    #[error("major upgrade from {} to {} declined", .0.local, .0.upstream)]
    Declined(VersionPair),
    #[error("cannot check {app} for upgrades: {source}")]
    Precheck {
        app: AppName,
        #[source]
        source: VersionError,
    },
    #[error("upgrade requirements not met: {0}")]
    UpgradeRequirements(#[source] OpsError),
    #[error("Pillow dependencies missing: {0}")]
    Pillow(#[source] OpsError),
    #[error("local changes in {}; commit or stash them, or run with --reset", join(.0))]
    Blocked(Vec<AppName>),
    #[error("another update is running: {0}")]
    Locked(#[source] io::Error),
    #[error("backup of {site} failed: {source}")]
    Backup {
        site: String,
        #[source]
        source: OpsError,
    },
    #[error("migrating sites failed: {0}")]
    Patch(#[source] OpsError),
    #[error("building assets failed: {0}")]
    Build(#[source] OpsError),
    #[error("restarting services failed: {0}")]
    Restart(#[source] OpsError),
    #[error("cannot leave maintenance mode: {0}")]
    Maintenance(#[source] ConfigError),
    /// A fatal stage inside maintenance mode, with what the run had done.
    #[error("{source}")]
    Aborted {
        #[source]
        source: Box<UpdateError>,
        report: Box<UpdateReport>,
    },
    #[error(transparent)]
    BenchPatch(#[from] PatchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl UpdateError {
    fn aborted(self, report: UpdateReport) -> Self {
        UpdateError::Aborted {
            source: Box::new(self),
            report: Box::new(report),
        }
    }

    /// The partial report of a run that failed inside maintenance mode.
    pub fn report(&self) -> Option<&UpdateReport> {
        match self {
            UpdateError::Aborted { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The stage error itself, unwrapping `Aborted`.
    pub fn cause(&self) -> &UpdateError {
        match self {
            UpdateError::Aborted { source, .. } => source.cause(),
            other => other,
        }
    }
}

fn join(apps: &[AppName]) -> String {
    apps.iter()
        .map(AppName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Steps of an update run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Precheck,
    MaintenanceOn,
    Backup,
    PullApps,
    ReinstallDeps,
    PatchSites,
    BuildAssets,
    PostUpgradeHook,
    RestartServices,
    MaintenanceOff,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Precheck => "precheck",
            Stage::MaintenanceOn => "maintenance on",
            Stage::Backup => "backup",
            Stage::PullApps => "pull apps",
            Stage::ReinstallDeps => "reinstall dependencies",
            Stage::PatchSites => "patch sites",
            Stage::BuildAssets => "build assets",
            Stage::PostUpgradeHook => "post upgrade",
            Stage::RestartServices => "restart services",
            Stage::MaintenanceOff => "maintenance off",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A failure that did not stop the run.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub app: Option<AppName>,
    pub reason: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.app {
            Some(app) => write!(f, "[{}] {}: {}", self.stage, app, self.reason),
            None => write!(f, "[{}] {}", self.stage, self.reason),
        }
    }
}

/// What an update run did.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Stages entered, in order.
    pub stages: Vec<Stage>,
    pub plan: Option<UpdatePlan>,
    pub upgrade: Option<VersionPair>,
    pub updated: Vec<AppName>,
    pub auto_excluded: Vec<AppName>,
    /// Per-app pull failures.
    pub failures: Vec<StageFailure>,
    /// Best-effort stage failures.
    pub warnings: Vec<StageFailure>,
}

impl UpdateReport {
    fn enter(&mut self, stage: Stage) {
        log::debug!("Stage: {}", stage);
        self.stages.push(stage);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Human readable end-of-run summary.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(plan) = &self.plan {
            for PlanEntry { app, decision } in &plan.entries {
                if !matches!(decision, Decision::Ready { .. }) {
                    lines.push(format!("  {}: {}", app, decision));
                }
            }
        }
        if !self.updated.is_empty() {
            lines.push(format!("Updated: {}", join(&self.updated)));
        }
        if !self.auto_excluded.is_empty() {
            lines.push(format!(
                "Excluded from future updates (no remote): {}",
                join(&self.auto_excluded)
            ));
        }
        for failure in &self.failures {
            lines.push(format!("Failed {}", failure));
        }
        for warning in &self.warnings {
            lines.push(format!("Warning {}", warning));
        }
        lines.join("\n")
    }
}

/// Flags of `bench update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub pull: bool,
    pub patch: bool,
    pub build: bool,
    pub requirements: bool,
    pub force: bool,
    pub reset: bool,
    pub no_backup: bool,
    pub restart_supervisor: bool,
    pub restart_systemd: bool,
}

impl UpdateOptions {
    /// With none of pull/patch/build/requirements selected, do all four.
    pub fn normalized(mut self) -> Self {
        if !(self.pull || self.patch || self.build || self.requirements) {
            self.pull = true;
            self.patch = true;
            self.build = true;
            self.requirements = true;
        }
        self
    }
}

/// Runs updates against one bench.
pub struct Updater<'a> {
    paths: &'a BenchPaths,
    git: GitCli,
    ops: &'a dyn BenchOps,
    prompt: &'a dyn Prompt,
    interrupt: Option<&'a InterruptRelease>,
    refresh: Refresh,
    lock_timeout: Duration,
}

impl<'a> Updater<'a> {
    pub fn new(paths: &'a BenchPaths, ops: &'a dyn BenchOps, prompt: &'a dyn Prompt) -> Self {
        Self {
            paths,
            git: GitCli::new(),
            ops,
            prompt,
            interrupt: None,
            refresh: Refresh::Fetch,
            lock_timeout: RUN_LOCK_TIMEOUT,
        }
    }

    /// Clear maintenance flags on Ctrl-C.
    pub fn with_interrupt(mut self, interrupt: &'a InterruptRelease) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Whether remotes are fetched before deciding.
    pub fn with_refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock(&self) -> Result<RunLock, UpdateError> {
        RunLock::acquire(&self.paths.run_lock(), self.lock_timeout).map_err(UpdateError::Locked)
    }

    pub fn run(&self, options: UpdateOptions) -> Result<UpdateReport, UpdateError> {
        let options = options.normalized();
        let _lock = self.lock()?;
        let mut report = UpdateReport::default();
        report.enter(Stage::Init);

        let config = BenchConfig::load(&self.paths.common_site_config())?;
        if config.release_bench() {
            return Err(UpdateError::ReleaseBench);
        }

        println!("\nChecking for obsolete branches...");
        self.check_branches()?;

        report.enter(Stage::Precheck);
        let kind = self.precheck()?;
        let upgrading = kind.is_major() || options.force;
        if upgrading {
            let pair = kind.pair();
            validate_upgrade(pair.local, pair.upstream).map_err(UpdateError::UpgradeRequirements)?;
            report.upgrade = Some(pair);
        }

        if options.pull {
            let plan = plan(
                self.paths,
                &self.git,
                PlanOptions {
                    reset: options.reset,
                    refresh: self.refresh,
                },
            )?;
            if !plan.is_executable() {
                let blocked = plan.blocked().into_iter().cloned().collect();
                print_dirty_help(&plan);
                return Err(UpdateError::Blocked(blocked));
            }
            report.plan = Some(plan);
        }

        let applied = patches::run_pending(self.paths)?;
        if !applied.is_empty() {
            log::info!("Applied bench patches: {}", applied.join(", "));
        }

        if options.requirements {
            self.ops.validate_pillow().map_err(UpdateError::Pillow)?;
        }

        report.enter(Stage::MaintenanceOn);
        let guard = MaintenanceGuard::acquire(&self.paths.common_site_config(), self.interrupt)?;

        let result = self.mutate(&options, &config, &mut report);

        report.enter(Stage::MaintenanceOff);
        let released = guard.release();
        match (result, released) {
            (Ok(()), Ok(())) => {
                report.enter(Stage::Done);
                Ok(report)
            }
            (Ok(()), Err(e)) => Err(UpdateError::Maintenance(e).aborted(report)),
            (Err(e), Ok(())) => Err(e.aborted(report)),
            (Err(e), Err(release_err)) => {
                log::error!("Failed to disable maintenance mode: {}", release_err);
                Err(e.aborted(report))
            }
        }
    }

    /// `frappe` and `erpnext` must not track the renamed `master` branch.
    fn check_branches(&self) -> Result<(), UpdateError> {
        for name in RENAMED_MASTER_APPS {
            let Ok(app) = name.parse::<AppName>() else {
                continue;
            };
            let Ok(repo) = AppRepo::open(self.paths, &app) else {
                continue;
            };
            if matches!(repo.current_branch().as_deref(), Ok("master")) {
                return Err(UpdateError::ObsoleteBranch { app });
            }
        }
        Ok(())
    }

    /// Compare the framework app against its upstream; a major upgrade needs
    /// an explicit yes.
    fn precheck(&self) -> Result<UpgradeKind, UpdateError> {
        let base = AppName::base();
        println!("\nChecking for version upgrades for {}...", base);

        let kind = AppRepo::open(self.paths, &base)
            .map_err(VersionError::from)
            .and_then(|repo| repo.check_upgrade(&self.git, None, self.refresh))
            .map_err(|source| UpdateError::Precheck {
                app: base.clone(),
                source,
            })?;

        if let UpgradeKind::Major(pair) = kind {
            println!("...new version found");
            println!(
                "\nThis update will cause a major version change in Frappe/ERPNext from {} to {}.",
                pair.local, pair.upstream
            );
            println!("This would take significant time to migrate and might break custom apps.");
            if !self.prompt.confirm("Do you want to continue?") {
                return Err(UpdateError::Declined(pair));
            }
        } else {
            println!("...already on latest version");
        }
        Ok(kind)
    }

    /// Everything between MAINTENANCE_ON and MAINTENANCE_OFF.
    fn mutate(
        &self,
        options: &UpdateOptions,
        config: &BenchConfig,
        report: &mut UpdateReport,
    ) -> Result<(), UpdateError> {
        if !options.no_backup {
            report.enter(Stage::Backup);
            backup_all_sites(self.paths, self.ops)?;
        }

        if options.pull {
            report.enter(Stage::PullApps);
            if let Some(plan) = report.plan.clone() {
                self.pull_apps(&plan, options.reset, config.rebase_on_pull(), report);
            }
        }

        if options.requirements {
            report.enter(Stage::ReinstallDeps);
            reinstall_dependencies(self.paths, self.ops, &mut report.warnings);
        }

        if options.patch {
            report.enter(Stage::PatchSites);
            patch_sites(self.ops)?;
        }

        if options.build {
            report.enter(Stage::BuildAssets);
            build_assets(self.ops)?;
        }

        if let Some(pair) = report.upgrade {
            report.enter(Stage::PostUpgradeHook);
            print!("{}", post_upgrade_notice(pair.local, pair.upstream, config));
        }

        let supervisor = options.restart_supervisor || config.restart_supervisor_on_update();
        let systemd = options.restart_systemd || config.restart_systemd_on_update();
        if supervisor || systemd {
            report.enter(Stage::RestartServices);
            if supervisor {
                self.ops
                    .restart_supervisor()
                    .map_err(UpdateError::Restart)?;
            }
            if systemd {
                self.ops.restart_systemd().map_err(UpdateError::Restart)?;
            }
        }
        Ok(())
    }

    fn pull_apps(&self, plan: &UpdatePlan, reset: bool, rebase: bool, report: &mut UpdateReport) {
        println!("\nUpdating apps...");
        let excluded = ExcludedApps::new(self.paths);

        for entry in &plan.entries {
            match &entry.decision {
                Decision::Ready {
                    remote,
                    branch,
                    commits,
                } => {
                    println!("...{}...", entry.app);
                    match self.pull_app(&entry.app, remote, branch, *commits, reset, rebase) {
                        Ok(()) => report.updated.push(entry.app.clone()),
                        Err(e) => {
                            println!("...failed to update {}: {}", entry.app, e);
                            report.failures.push(StageFailure {
                                stage: Stage::PullApps,
                                app: Some(entry.app.clone()),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Decision::SkipNoRemote { .. } => {
                    println!(
                        "Skipping pull for app '{}', since remote doesn't exist, and adding it to excluded apps",
                        entry.app
                    );
                    match excluded.add(&entry.app) {
                        Ok(_) => report.auto_excluded.push(entry.app.clone()),
                        Err(e) => log::warn!("Cannot exclude {}: {}", entry.app, e),
                    }
                }
                decision => println!("...{}: {}", entry.app, decision),
            }
        }
        println!("...done");
    }

    fn pull_app(
        &self,
        app: &AppName,
        remote: &str,
        branch: &str,
        commits: usize,
        reset: bool,
        rebase: bool,
    ) -> Result<(), GitError> {
        let dir = self.paths.app_dir(app);
        if reset {
            self.git.fetch_all(&dir)?;
            self.git.hard_reset(&dir, remote, branch)?;
        } else {
            self.git.pull(&dir, remote, branch, rebase)?;
        }

        if commits > 0 {
            match self.git.diff_stat(&dir, commits) {
                Ok(stat) => print!("{}", stat),
                Err(e) => log::debug!("No diff stat for {}: {}", app, e),
            }
        }

        let removed = remove_compiled(&dir)?;
        log::debug!("Removed {} compiled files from {}", removed, app);
        Ok(())
    }

    /// Pull, migrate and build again after a failed upgrade, then show the
    /// notice for `version - 1 -> version`.
    pub fn retry_upgrade(&self, version: u64) -> Result<UpdateReport, UpdateError> {
        let _lock = self.lock()?;
        let mut report = UpdateReport::default();
        report.enter(Stage::Init);
        let config = BenchConfig::load(&self.paths.common_site_config())?;

        let plan = plan(
            self.paths,
            &self.git,
            PlanOptions {
                reset: false,
                refresh: self.refresh,
            },
        )?;
        if !plan.is_executable() {
            print_dirty_help(&plan);
            return Err(UpdateError::Blocked(
                plan.blocked().into_iter().cloned().collect(),
            ));
        }

        report.enter(Stage::MaintenanceOn);
        let guard = MaintenanceGuard::acquire(&self.paths.common_site_config(), self.interrupt)?;

        report.enter(Stage::PullApps);
        self.pull_apps(&plan, false, config.rebase_on_pull(), &mut report);
        report.plan = Some(plan);

        let result: Result<(), UpdateError> = (|| {
            report.enter(Stage::PatchSites);
            patch_sites(self.ops)?;
            report.enter(Stage::BuildAssets);
            build_assets(self.ops)?;
            report.enter(Stage::PostUpgradeHook);
            print!(
                "{}",
                post_upgrade_notice(version.saturating_sub(1), version, &config)
            );
            Ok(())
        })();

        report.enter(Stage::MaintenanceOff);
        let released = guard.release();
        if let Err(e) = result {
            if let Err(release_err) = released {
                log::error!("Failed to disable maintenance mode: {}", release_err);
            }
            return Err(e.aborted(report));
        }
        if let Err(e) = released {
            return Err(UpdateError::Maintenance(e).aborted(report));
        }
        report.enter(Stage::Done);
        Ok(report)
    }
}

fn print_dirty_help(plan: &UpdatePlan) {
    for app in plan.blocked() {
        println!(
            "\nCannot proceed with update: You have local changes in app \"{0}\" that are not committed.\n\n\
             Here are your choices:\n\n\
             1. Merge the {0} app manually with \"git pull\" / \"git pull --rebase\" and fix conflicts.\n\
             2. Temporarily remove your changes with \"git stash\" or discard them completely\n   \
             with \"bench update --reset\" or for individual repositories \"git reset --hard\"\n\
             3. If your changes are helpful for others, send in a pull request and\n   \
             wait for them to be merged in the core.",
            app
        );
    }
}

/// Back up every site. The first failure stops the run.
pub(crate) fn backup_all_sites(paths: &BenchPaths, ops: &dyn BenchOps) -> Result<(), UpdateError> {
    println!("\nBacking up sites...");
    for site in paths.sites().map_err(RegistryError::from)? {
        ops.backup_site(&site)
            .map_err(|source| UpdateError::Backup { site, source })?;
    }
    println!("...done");
    Ok(())
}

/// Python and node dependencies for every managed app. Failures are
/// recorded, never raised.
pub(crate) fn reinstall_dependencies(
    paths: &BenchPaths,
    ops: &dyn BenchOps,
    warnings: &mut Vec<StageFailure>,
) {
    let mut warn = |app: Option<&AppName>, e: &dyn fmt::Display| {
        log::warn!("Dependency update failed: {}", e);
        warnings.push(StageFailure {
            stage: Stage::ReinstallDeps,
            app: app.cloned(),
            reason: e.to_string(),
        });
    };

    if let Err(e) = ops.update_requirements() {
        warn(None, &e);
    }

    let apps = match managed_apps(paths) {
        Ok(apps) => apps,
        Err(e) => {
            warn(None, &e);
            return;
        }
    };
    for app in &apps {
        if let Err(e) = ops.install_app(app) {
            warn(Some(app), &e);
        }
    }
    if let Err(e) = ops.update_node_packages(&apps) {
        warn(None, &e);
    }
}

pub(crate) fn patch_sites(ops: &dyn BenchOps) -> Result<(), UpdateError> {
    println!("\nPatching sites...");
    ops.migrate_sites().map_err(UpdateError::Patch)?;
    println!("...done");
    Ok(())
}

pub(crate) fn build_assets(ops: &dyn BenchOps) -> Result<(), UpdateError> {
    println!("\nBuilding assets...");
    ops.build_assets().map_err(UpdateError::Build)?;
    println!("...done");
    Ok(())
}

/// Delete `*.pyc` / `*.pyo` under `dir`, skipping `.git`. Returns how many
/// were removed.
fn remove_compiled(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    stack.push(path);
                }
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("pyc" | "pyo")
            ) {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
