mod bench;
mod git;
mod ops;
#[cfg(test)]
mod test_support;
mod translations;
mod types;
mod update;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::bench::{BenchPaths, ExcludedApps, InterruptRelease};
use crate::git::AppRepo;
use crate::ops::ProcessOps;
use crate::types::AppName;
use crate::update::{
    BranchSwitcher, InteractivePrompt, SwitchError, SwitchReport, UpdateError, UpdateOptions,
    Updater,
};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "bench", about = "Update and switch the apps of a Frappe bench")]
struct Cli {
    /// Bench directory
    #[arg(long, global = true, default_value = ".")]
    bench_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull apps, install requirements, migrate sites and build assets.
    /// With none of --pull/--patch/--build/--requirements, does all four.
    Update {
        /// Pull updates for all the apps in the bench
        #[arg(long)]
        pull: bool,
        /// Run migrations for all sites
        #[arg(long)]
        patch: bool,
        /// Build JS and CSS assets
        #[arg(long)]
        build: bool,
        /// Update requirements
        #[arg(long)]
        requirements: bool,
        /// Treat the update as an upgrade even without a major version change
        #[arg(long)]
        force: bool,
        /// Hard reset apps to their remote branch, discarding local changes
        #[arg(long)]
        reset: bool,
        /// Skip the site backups
        #[arg(long)]
        no_backup: bool,
        /// Restart supervisor processes after the update
        #[arg(long)]
        restart_supervisor: bool,
        /// Restart systemd units after the update
        #[arg(long)]
        restart_systemd: bool,
    },

    /// Re-run pull, patch and build after a failed upgrade
    RetryUpgrade {
        /// Major version being upgraded to
        #[arg(long, default_value_t = 5)]
        version: u64,
    },

    /// Switch apps to the given branch
    SwitchToBranch {
        branch: String,
        /// Apps to switch (default: every app)
        apps: Vec<String>,
        /// Allow major version upgrades
        #[arg(long)]
        upgrade: bool,
    },

    /// Switch frappe and erpnext to master
    SwitchToMaster {
        /// Allow major version upgrades. Not implied: without it an app
        /// whose master is a new major version is left alone
        #[arg(long)]
        upgrade: bool,
    },

    /// Switch frappe and erpnext to develop
    SwitchToDevelop {
        /// Allow major version upgrades. Not implied: without it an app
        /// whose develop is a new major version is left alone
        #[arg(long)]
        upgrade: bool,
    },

    /// Exclude an app from updates
    ExcludeApp { app: String },

    /// Include an excluded app in updates again
    IncludeApp { app: String },

    /// Show the remotes of every app
    RemoteUrls,

    /// Download translations for frappe and erpnext
    DownloadTranslations,
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let paths = BenchPaths::new(&cli.bench_path);

    let result = match cli.command {
        Commands::Update {
            pull,
            patch,
            build,
            requirements,
            force,
            reset,
            no_backup,
            restart_supervisor,
            restart_systemd,
        } => cmd_update(
            &paths,
            UpdateOptions {
                pull,
                patch,
                build,
                requirements,
                force,
                reset,
                no_backup,
                restart_supervisor,
                restart_systemd,
            },
        ),
        Commands::RetryUpgrade { version } => cmd_retry_upgrade(&paths, version),
        Commands::SwitchToBranch {
            branch,
            apps,
            upgrade,
        } => cmd_switch(&paths, &branch, &apps, upgrade),
        Commands::SwitchToMaster { upgrade } => cmd_switch_core(&paths, "master", upgrade),
        Commands::SwitchToDevelop { upgrade } => cmd_switch_core(&paths, "develop", upgrade),
        Commands::ExcludeApp { app } => cmd_exclude(&paths, &app),
        Commands::IncludeApp { app } => cmd_include(&paths, &app),
        Commands::RemoteUrls => cmd_remote_urls(&paths),
        Commands::DownloadTranslations => cmd_download_translations(&paths),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// The Ctrl-C handler for commands that may enter maintenance mode.
fn interrupt_release() -> Option<InterruptRelease> {
    match InterruptRelease::install() {
        Ok(release) => Some(release),
        Err(e) => {
            log::warn!("Cannot install interrupt handler: {}", e);
            None
        }
    }
}

fn cmd_update(paths: &BenchPaths, options: UpdateOptions) -> CmdResult {
    let ops = ProcessOps::new(paths.clone());
    let prompt = InteractivePrompt;
    let interrupt = interrupt_release();

    let mut updater = Updater::new(paths, &ops, &prompt);
    if let Some(interrupt) = &interrupt {
        updater = updater.with_interrupt(interrupt);
    }

    let report = updater.run(options).inspect_err(print_partial_update)?;
    println!("\n{}", report.summary());
    if !report.is_clean() {
        return Err(format!("{} step(s) failed", report.failures.len()).into());
    }
    println!("_________________\n\nBench updated successfully!");
    Ok(())
}

fn cmd_retry_upgrade(paths: &BenchPaths, version: u64) -> CmdResult {
    let ops = ProcessOps::new(paths.clone());
    let prompt = InteractivePrompt;
    let interrupt = interrupt_release();

    let mut updater = Updater::new(paths, &ops, &prompt);
    if let Some(interrupt) = &interrupt {
        updater = updater.with_interrupt(interrupt);
    }

    let report = updater
        .retry_upgrade(version)
        .inspect_err(print_partial_update)?;
    println!("\n{}", report.summary());
    if !report.is_clean() {
        return Err(format!("{} step(s) failed", report.failures.len()).into());
    }
    Ok(())
}

/// Show what a run managed before a fatal stage stopped it.
fn print_partial_update(err: &UpdateError) {
    if let Some(report) = err.report() {
        println!("\n{}", report.summary());
    }
}

fn print_partial_switch(err: &SwitchError) {
    if let Some(report) = err.report() {
        println!("\n{}", report.summary());
    }
}

fn parse_apps(names: &[String]) -> Result<Vec<AppName>, Box<dyn std::error::Error>> {
    names
        .iter()
        .map(|name| -> Result<AppName, Box<dyn std::error::Error>> {
            name.parse()
                .map_err(|e| format!("invalid app name {:?}: {}", name, e).into())
        })
        .collect()
}

fn finish_switch(report: SwitchReport) -> CmdResult {
    println!("\n{}", report.summary());
    if report.has_failures() {
        return Err(format!("some apps could not be switched to {}", report.branch).into());
    }
    if !report.switched().is_empty() {
        println!("Please run `bench update --patch` to be safe from any differences in database schema");
    }
    Ok(())
}

fn cmd_switch(paths: &BenchPaths, branch: &str, apps: &[String], upgrade: bool) -> CmdResult {
    let apps = parse_apps(apps)?;
    let ops = ProcessOps::new(paths.clone());
    let interrupt = interrupt_release();

    let mut switcher = BranchSwitcher::new(paths, &ops);
    if let Some(interrupt) = &interrupt {
        switcher = switcher.with_interrupt(interrupt);
    }
    finish_switch(
        switcher
            .switch(branch, &apps, upgrade)
            .inspect_err(print_partial_switch)?,
    )
}

fn cmd_switch_core(paths: &BenchPaths, branch: &str, upgrade: bool) -> CmdResult {
    let ops = ProcessOps::new(paths.clone());
    let interrupt = interrupt_release();

    let mut switcher = BranchSwitcher::new(paths, &ops);
    if let Some(interrupt) = &interrupt {
        switcher = switcher.with_interrupt(interrupt);
    }
    finish_switch(
        switcher
            .switch_core(branch, upgrade)
            .inspect_err(print_partial_switch)?,
    )
}

fn cmd_exclude(paths: &BenchPaths, app: &str) -> CmdResult {
    let app: AppName = app.parse()?;
    if ExcludedApps::new(paths).add(&app)? {
        println!("Excluded {} from updates", app);
    } else {
        println!("{} is already excluded", app);
    }
    Ok(())
}

fn cmd_include(paths: &BenchPaths, app: &str) -> CmdResult {
    let app: AppName = app.parse()?;
    if ExcludedApps::new(paths).remove(&app)? {
        println!("Included {} in updates", app);
    } else {
        println!("{} was not excluded", app);
    }
    Ok(())
}

fn cmd_remote_urls(paths: &BenchPaths) -> CmdResult {
    for app in bench::registry::app_directories(paths)? {
        let repo = match AppRepo::open(paths, &app) {
            Ok(repo) => repo,
            Err(e) => {
                log::debug!("Skipping {}: {}", app, e);
                continue;
            }
        };
        for remote in repo.remotes()? {
            let url = repo.remote_url(&remote)?.unwrap_or_else(|| "-".to_string());
            println!("{:<20} {:<12} {}", app, remote, url);
        }
    }
    Ok(())
}

fn cmd_download_translations(paths: &BenchPaths) -> CmdResult {
    let report = translations::download(paths)?;
    println!(
        "Downloaded {} file(s), {} failed",
        report.downloaded.len(),
        report.failed.len()
    );
    Ok(())
}
