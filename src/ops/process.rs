//! `BenchOps` backed by subprocesses in the bench environment.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::bench::{BenchConfig, BenchPaths, InstalledApps, packages, write_atomic};
use crate::git::AppRepo;
use crate::git::version::leading_major;
use crate::types::AppName;

use super::services::{required_units, supervisor_groups, systemd_target};
use super::{BenchOps, OpsError};

/// First frappe develop line whose assets are built with yarn.
const YARN_FROM_MAJOR: u64 = 11;

/// Runs bench collaborators as child processes.
///
/// Output is passed through to the terminal; every call blocks until the
/// child exits.
#[derive(Debug, Clone)]
pub struct ProcessOps {
    paths: BenchPaths,
}

impl ProcessOps {
    pub fn new(paths: BenchPaths) -> Self {
        Self { paths }
    }

    /// Run to completion, failing on a non-zero exit.
    fn run(&self, cmd: &mut Command) -> Result<(), OpsError> {
        let display = describe(cmd);
        log::debug!("{}", display);

        let status = cmd.stdin(Stdio::null()).status().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OpsError::MissingTool(cmd.get_program().to_string_lossy().into_owned())
            } else {
                OpsError::Io(e)
            }
        })?;

        if !status.success() {
            return Err(OpsError::CommandFailed {
                command: display,
                exit_code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    /// Run and capture stdout.
    fn output(&self, cmd: &mut Command) -> Result<String, OpsError> {
        let display = describe(cmd);
        log::debug!("{}", display);

        let output = cmd.stdin(Stdio::null()).output()?;
        if !output.status.success() {
            return Err(OpsError::CommandFailed {
                command: display,
                exit_code: output.status.code().unwrap_or(-1),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// `env/bin/python -m frappe.utils.bench_helper frappe <args>` in `sites/`.
    fn frappe<I, S>(&self, args: I) -> Result<(), OpsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(self.paths.env_bin("python"));
        cmd.args(["-m", "frappe.utils.bench_helper", "frappe"])
            .args(args)
            .current_dir(self.paths.sites_dir());
        self.run(&mut cmd)
    }

    fn pip(&self) -> Command {
        let mut cmd = Command::new(self.paths.env_bin("pip"));
        cmd.current_dir(self.paths.root());
        cmd
    }

    fn uses_yarn(&self) -> Result<bool, OpsError> {
        let frappe = AppRepo::open(&self.paths, &AppName::base())
            .map_err(crate::git::VersionError::from)?;
        let develop = frappe.read_develop_version()?;
        Ok(leading_major(&develop).is_some_and(|major| major >= YARN_FROM_MAJOR))
    }

    fn update_yarn_packages(&self, apps: &[AppName]) -> Result<(), OpsError> {
        if which::which("yarn").is_err() {
            println!("Please install yarn using below command and try again.");
            println!("`npm install -g yarn`");
            return Ok(());
        }

        for app in apps {
            let dir = self.paths.app_dir(app);
            if dir.join("package.json").exists() {
                println!("...{} packages...", app);
                self.run(Command::new("yarn").arg("install").current_dir(&dir))?;
            }
        }
        Ok(())
    }

    /// Write the merged app manifests to `<bench>/package.json`.
    fn write_bench_manifest(&self, apps: &[AppName]) -> Result<(), OpsError> {
        let merged = packages::collect_app_manifests(&self.paths, apps);
        let contents = serde_json::to_string_pretty(&merged)?;
        write_atomic(&self.paths.package_json(), contents.as_bytes())?;
        Ok(())
    }

    fn update_npm_packages(&self, apps: &[AppName]) -> Result<(), OpsError> {
        self.write_bench_manifest(apps)?;
        self.run(
            Command::new("npm")
                .arg("install")
                .current_dir(self.paths.root()),
        )
    }
}

impl BenchOps for ProcessOps {
    fn backup_site(&self, site: &str) -> Result<(), OpsError> {
        self.frappe(["--site", site, "backup"])
    }

    fn update_requirements(&self) -> Result<(), OpsError> {
        println!("\nUpdating python requirements...");
        self.run(self.pip().args(["install", "--upgrade", "pip"]))
    }

    fn install_app(&self, app: &AppName) -> Result<(), OpsError> {
        log::info!("Installing {}...", app);
        let dir = self.paths.app_dir(app);
        self.run(self.pip().args(["install", "-q", "-e"]).arg(&dir))?;
        InstalledApps::new(&self.paths).add(app)?;
        Ok(())
    }

    fn update_node_packages(&self, apps: &[AppName]) -> Result<(), OpsError> {
        if self.uses_yarn()? {
            println!("\nUpdating yarn packages...");
            self.update_yarn_packages(apps)?;
        } else {
            println!("\nUpdating npm packages...");
            self.update_npm_packages(apps)?;
        }
        println!("...done");
        Ok(())
    }

    fn migrate_sites(&self) -> Result<(), OpsError> {
        self.frappe(["--site", "all", "migrate"])
    }

    fn build_assets(&self) -> Result<(), OpsError> {
        self.frappe(["build"])
    }

    fn restart_supervisor(&self) -> Result<(), OpsError> {
        let config = BenchConfig::load(&self.paths.common_site_config())?;
        if let Some(custom) = config.supervisor_restart_cmd.as_deref() {
            return self.run(
                Command::new("sh")
                    .args(["-c", custom])
                    .current_dir(self.paths.root()),
            );
        }

        let status = self.output(
            Command::new("sudo")
                .args(["supervisorctl", "status"])
                .current_dir(self.paths.root()),
        )?;
        let groups = supervisor_groups(&self.paths.bench_name(), &status);
        self.run(
            Command::new("sudo")
                .args(["supervisorctl", "restart"])
                .args(&groups)
                .current_dir(self.paths.root()),
        )
    }

    fn restart_systemd(&self) -> Result<(), OpsError> {
        let target = systemd_target(&self.paths.bench_name());
        let show = self.output(
            Command::new("systemctl").args(["show", "-p", "Requires", target.as_str()]),
        )?;
        let units = required_units(&show);

        for action in ["stop", "start"] {
            self.run(
                Command::new("sudo")
                    .args(["systemctl", action, "--"])
                    .args(&units),
            )?;
        }
        Ok(())
    }

    fn validate_pillow(&self) -> Result<(), OpsError> {
        println!("\nValidate Pillow dependencies...");
        if let Err(e) = self.run(self.pip().args(["install", "Pillow"])) {
            if let Some(hint) = pillow_hint(Path::new("/etc/os-release")) {
                println!("Please install these dependencies using the command:");
                println!("{}", hint);
            }
            return Err(e);
        }
        println!("...done");
        Ok(())
    }
}

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// System packages Pillow needs, by distribution family.
fn pillow_hint(os_release: &Path) -> Option<&'static str> {
    let contents = std::fs::read_to_string(os_release).ok()?;
    let ids: Vec<String> = contents
        .lines()
        .filter_map(|line| {
            line.strip_prefix("ID=")
                .or_else(|| line.strip_prefix("ID_LIKE="))
        })
        .flat_map(|value| value.trim_matches('"').split_whitespace())
        .map(str::to_lowercase)
        .collect();

    let is = |name: &str| ids.iter().any(|id| id == name);
    if is("centos") || is("fedora") || is("rhel") {
        Some(
            "sudo yum install libtiff-devel libjpeg-devel libzip-devel freetype-devel \
             lcms2-devel libwebp-devel tcl-devel tk-devel",
        )
    } else if is("debian") || is("ubuntu") {
        Some(
            "sudo apt-get install -y libtiff5-dev libjpeg8-dev zlib1g-dev libfreetype6-dev \
             liblcms2-dev libwebp-dev tcl8.6-dev tk8.6-dev python-tk",
        )
    } else {
        None
    }
}
