//! Checks before a major upgrade and the notice printed after one.

use crate::bench::BenchConfig;

use super::OpsError;

/// A requirement that applies from `min_major` onwards.
pub struct UpgradeCheck {
    pub id: &'static str,
    pub min_major: u64,
    check: fn(&dyn Fn(&str) -> bool) -> Result<(), String>,
}

pub static UPGRADE_CHECKS: &[UpgradeCheck] = &[UpgradeCheck {
    id: "node-toolchain",
    min_major: 6,
    check: node_toolchain,
}];

fn node_toolchain(has_tool: &dyn Fn(&str) -> bool) -> Result<(), String> {
    let node = has_tool("node") || has_tool("nodejs");
    if node && has_tool("npm") {
        Ok(())
    } else {
        Err("Please install nodejs and npm".to_string())
    }
}

/// Run every check that applies to `to_major`, looking tools up on PATH.
pub fn validate_upgrade(from_major: u64, to_major: u64) -> Result<(), OpsError> {
    validate_upgrade_with(from_major, to_major, &|tool| which::which(tool).is_ok())
}

pub fn validate_upgrade_with(
    from_major: u64,
    to_major: u64,
    has_tool: &dyn Fn(&str) -> bool,
) -> Result<(), OpsError> {
    for check in UPGRADE_CHECKS.iter().filter(|c| to_major >= c.min_major) {
        log::debug!(
            "Upgrade check {} for {} -> {}",
            check.id,
            from_major,
            to_major
        );
        (check.check)(has_tool).map_err(OpsError::UpgradeCheck)?;
    }
    Ok(())
}

/// Text shown once apps have moved from `from_major` to `to_major`.
pub fn post_upgrade_notice(from_major: u64, to_major: u64, config: &BenchConfig) -> String {
    let mut notice = format!(
        "{}\nYour apps were upgraded from {} to {}\n",
        "-".repeat(80),
        from_major,
        to_major
    );

    if config.restart_supervisor_on_update() {
        notice.push_str(
            "As you have setup your bench for production, you will have to reload \
             configuration for nginx and supervisor\n\
             To complete the migration, please run the following commands\n\n\
             sudo service nginx restart\n\
             sudo supervisorctl reload\n",
        );
    }
    notice
}
