//! Per-app update decisions, computed without touching any working tree.

use std::fmt;

use crate::bench::{BenchPaths, ExcludedApps, RegistryError, managed_apps};
use crate::git::{AppRepo, GitCli, PrimaryRemote, Refresh};
use crate::types::AppName;

/// What an update run will do with one app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Listed in `excluded_apps.txt`.
    SkipExcluded,
    /// No remote to pull from (none, or several without `upstream`).
    /// Excluded automatically once the run executes.
    SkipNoRemote { remotes: Vec<String> },
    /// Nothing to pull.
    SkipUpToDate { remote: String, branch: String },
    /// Uncommitted changes; blocks the whole run.
    BlockedDirty,
    /// The app could not be inspected (not a repository, detached HEAD,
    /// fetch failure).
    SkipError { reason: String },
    Ready {
        remote: String,
        branch: String,
        commits: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub app: AppName,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    /// Hard-reset to the remote, ignoring local changes.
    pub reset: bool,
    pub refresh: Refresh,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            reset: false,
            refresh: Refresh::Fetch,
        }
    }
}

/// Decisions for every managed app, in enumeration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdatePlan {
    pub entries: Vec<PlanEntry>,
}

impl UpdatePlan {
    /// False when any app is blocked by local changes.
    pub fn is_executable(&self) -> bool {
        self.blocked().is_empty()
    }

    pub fn blocked(&self) -> Vec<&AppName> {
        self.entries
            .iter()
            .filter(|e| e.decision == Decision::BlockedDirty)
            .map(|e| &e.app)
            .collect()
    }

    #[cfg(test)]
    pub fn ready(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.decision, Decision::Ready { .. }))
    }

    #[cfg(test)]
    pub fn without_remote(&self) -> impl Iterator<Item = &AppName> {
        self.entries
            .iter()
            .filter(|e| matches!(e.decision, Decision::SkipNoRemote { .. }))
            .map(|e| &e.app)
    }

    #[cfg(test)]
    pub fn decision(&self, app: &str) -> Option<&Decision> {
        self.entries
            .iter()
            .find(|e| e.app.as_str() == app)
            .map(|e| &e.decision)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::SkipExcluded => write!(f, "skipped (excluded)"),
            Decision::SkipNoRemote { remotes } if remotes.is_empty() => {
                write!(f, "skipped (no remote, will be excluded)")
            }
            Decision::SkipNoRemote { remotes } => write!(
                f,
                "skipped (remotes {} but none named upstream, will be excluded)",
                remotes.join(", ")
            ),
            Decision::SkipUpToDate { remote, branch } => {
                write!(f, "no updates on {}/{}", remote, branch)
            }
            Decision::BlockedDirty => write!(f, "blocked (uncommitted changes)"),
            Decision::SkipError { reason } => write!(f, "skipped ({})", reason),
            Decision::Ready {
                remote,
                branch,
                commits,
            } => write!(f, "{} commit(s) to pull from {}/{}", commits, remote, branch),
        }
    }
}

/// Compute the plan.
///
/// Only remote-tracking refs change (when `refresh` fetches); working trees,
/// branches and the excluded list are left alone.
pub fn plan(
    paths: &BenchPaths,
    git: &GitCli,
    options: PlanOptions,
) -> Result<UpdatePlan, RegistryError> {
    let excluded = ExcludedApps::new(paths).list()?;
    let mut entries = Vec::new();

    for app in managed_apps(paths)? {
        let decision = if excluded.contains(&app) {
            Decision::SkipExcluded
        } else {
            decide(paths, git, &app, options)
        };
        log::debug!("{}: {:?}", app, decision);
        entries.push(PlanEntry { app, decision });
    }

    Ok(UpdatePlan { entries })
}

fn decide(paths: &BenchPaths, git: &GitCli, app: &AppName, options: PlanOptions) -> Decision {
    let skip = |reason: String| Decision::SkipError { reason };

    let repo = match AppRepo::open(paths, app) {
        Ok(repo) => repo,
        Err(e) => return skip(e.to_string()),
    };

    let remote = match repo.primary_remote() {
        PrimaryRemote::Resolved(remote) => remote,
        PrimaryRemote::Missing => return Decision::SkipNoRemote { remotes: Vec::new() },
        PrimaryRemote::Ambiguous(remotes) => return Decision::SkipNoRemote { remotes },
    };

    let branch = match repo.current_branch() {
        Ok(branch) => branch,
        Err(e) => return skip(e.to_string()),
    };

    if options.refresh == Refresh::Fetch {
        if let Err(e) = git.fetch(repo.path(), &remote) {
            return skip(e.to_string());
        }
    }

    let commits = match repo.commits_ahead(&remote, &branch) {
        Ok(commits) => commits,
        Err(e) => return skip(e.to_string()),
    };
    if commits == 0 && !options.reset {
        return Decision::SkipUpToDate { remote, branch };
    }

    if !options.reset {
        match repo.is_clean() {
            Ok(true) => {}
            Ok(false) => return Decision::BlockedDirty,
            Err(e) => return skip(e.to_string()),
        }
    }

    Decision::Ready {
        remote,
        branch,
        commits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BRANCH, Fixture, app};

    fn cached() -> PlanOptions {
        PlanOptions {
            reset: false,
            refresh: Refresh::Cached,
        }
    }

    #[test]
    fn excluded_app_is_skipped() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.add_app("custom_app", "1.0.0");
        ExcludedApps::new(&fixture.paths)
            .add(&app("custom_app"))
            .unwrap();

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert_eq!(plan.decision("custom_app"), Some(&Decision::SkipExcluded));
        assert!(matches!(
            plan.decision("frappe"),
            Some(Decision::SkipUpToDate { .. })
        ));
    }

    #[test]
    fn up_to_date_app_is_skipped() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert_eq!(
            plan.decision("frappe"),
            Some(&Decision::SkipUpToDate {
                remote: "upstream".to_string(),
                branch: BRANCH.to_string()
            })
        );
        assert!(plan.is_executable());
        assert_eq!(plan.ready().count(), 0);
    }

    #[test]
    fn app_with_new_commits_is_ready() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.commit_upstream("frappe", "CHANGELOG.md", "fix");
        fixture.fetch_local("frappe");

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert_eq!(
            plan.decision("frappe"),
            Some(&Decision::Ready {
                remote: "upstream".to_string(),
                branch: BRANCH.to_string(),
                commits: 1
            })
        );
    }

    #[test]
    fn dirty_app_blocks_plan() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.add_app("erpnext", "13.2.0");
        fixture.commit_upstream("erpnext", "CHANGELOG.md", "fix");
        fixture.fetch_local("erpnext");
        std::fs::write(fixture.app_dir("erpnext").join("local.txt"), "wip").unwrap();

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert_eq!(plan.decision("erpnext"), Some(&Decision::BlockedDirty));
        assert!(!plan.is_executable());
        assert_eq!(plan.blocked(), [&app("erpnext")]);
    }

    #[test]
    fn dirty_but_up_to_date_is_not_blocked() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        std::fs::write(fixture.app_dir("frappe").join("local.txt"), "wip").unwrap();

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();
        assert!(plan.is_executable());
    }

    #[test]
    fn reset_overrides_dirty_and_up_to_date() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        std::fs::write(fixture.app_dir("frappe").join("local.txt"), "wip").unwrap();

        let options = PlanOptions {
            reset: true,
            refresh: Refresh::Cached,
        };
        let plan = plan(&fixture.paths, &GitCli::new(), options).unwrap();

        assert!(matches!(
            plan.decision("frappe"),
            Some(Decision::Ready { commits: 0, .. })
        ));
    }

    #[test]
    fn app_without_remote_is_skipped() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.add_local_app("foo", "0.0.1");

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert_eq!(
            plan.decision("foo"),
            Some(&Decision::SkipNoRemote { remotes: vec![] })
        );
        assert_eq!(plan.without_remote().collect::<Vec<_>>(), [&app("foo")]);
        // planning never writes the excluded list
        assert!(ExcludedApps::new(&fixture.paths).list().unwrap().is_empty());
    }

    #[test]
    fn invalid_repository_is_reported() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        std::fs::create_dir_all(fixture.app_dir("broken")).unwrap();
        fixture.register("broken");

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert!(matches!(
            plan.decision("broken"),
            Some(Decision::SkipError { .. })
        ));
        assert!(plan.is_executable());
    }

    #[test]
    fn order_follows_apps_txt() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.add_app("zeta", "1.0.0");
        fixture.add_app("alpha", "1.0.0");

        let plan = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();
        let order: Vec<&str> = plan.entries.iter().map(|e| e.app.as_str()).collect();
        assert_eq!(order, ["frappe", "zeta", "alpha"]);
    }

    #[test]
    fn planning_twice_is_identical() {
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.add_app("erpnext", "13.2.0");
        fixture.add_local_app("foo", "0.0.1");
        fixture.commit_upstream("erpnext", "a.txt", "1");
        fixture.fetch_local("erpnext");
        let heads_before = fixture.heads();

        let first = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();
        let second = plan(&fixture.paths, &GitCli::new(), cached()).unwrap();

        assert_eq!(first, second);
        assert_eq!(fixture.heads(), heads_before);
    }

    #[test]
    fn fetching_plan_sees_new_upstream_commits() {
        if !crate::test_support::require_git() {
            return;
        }
        let fixture = Fixture::new();
        fixture.add_app("frappe", "13.2.0");
        fixture.commit_upstream("frappe", "a.txt", "1");

        let plan = plan(&fixture.paths, &GitCli::new(), PlanOptions::default()).unwrap();

        assert!(matches!(
            plan.decision("frappe"),
            Some(Decision::Ready { commits: 1, .. })
        ));
    }
}
