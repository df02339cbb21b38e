//! Version markers and major-version comparison.

use regex::Regex;
use semver::Version;
use thiserror::Error;

use super::GitError;

/// Field holding an app's released version in `<app>/__init__.py`.
pub const VERSION_FIELD: &str = "__version__";
/// Field holding the pre-release line in `<app>/hooks.py`.
pub const DEVELOP_VERSION_FIELD: &str = "develop_version";

/// Errors raised while reading or comparing versions.
#[derive(Error, Debug)]
pub enum VersionError {
    /// The string is not a semantic version.
    #[error("invalid version format '{version}': {source}")]
    InvalidFormat {
        version: String,
        #[source]
        source: semver::Error,
    },
    /// Neither the module file nor setup.py carries a version marker.
    #[error("version marker not found for {0}")]
    NotFound(String),
    /// The app has no remote to compare against.
    #[error("no usable remote for {0}")]
    InvalidRemote(String),
    /// The branch does not exist on the remote.
    #[error("branch '{branch}' of {app} is not on remote '{remote}'")]
    InvalidBranch {
        app: String,
        remote: String,
        branch: String,
    },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<git2::Error> for VersionError {
    fn from(e: git2::Error) -> Self {
        VersionError::Git(GitError::Git(e))
    }
}

/// Local and upstream major versions of one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPair {
    pub local: u64,
    pub upstream: u64,
}

impl VersionPair {
    /// Upgrade iff upstream is strictly ahead.
    pub fn is_upgrade(&self) -> bool {
        self.upstream > self.local
    }
}

/// Outcome of comparing a local and an upstream version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeKind {
    Major(VersionPair),
    Routine(VersionPair),
}

impl UpgradeKind {
    pub fn pair(&self) -> VersionPair {
        match *self {
            UpgradeKind::Major(pair) | UpgradeKind::Routine(pair) => pair,
        }
    }

    pub fn is_major(&self) -> bool {
        matches!(self, UpgradeKind::Major(_))
    }
}

/// Extract the quoted value assigned to `field` at the start of a line.
///
/// Accepts single or double quotes: `__version__ = '13.4.1'`.
pub fn version_from_str(contents: &str, field: &str) -> Option<String> {
    let pattern = format!(r#"(?m)^\s*{}\s*=\s*['"](.+?)['"]"#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    re.captures(contents)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Major component of a semantic version. Malformed strings are rejected
/// rather than guessed at.
pub fn major_of(version: &str) -> Result<u64, VersionError> {
    Version::parse(version.trim())
        .map(|v| v.major)
        .map_err(|source| VersionError::InvalidFormat {
            version: version.to_string(),
            source,
        })
}

/// Classify an update by major components only.
pub fn classify(local: &str, upstream: &str) -> Result<UpgradeKind, VersionError> {
    let pair = VersionPair {
        local: major_of(local)?,
        upstream: major_of(upstream)?,
    };

    if pair.is_upgrade() {
        Ok(UpgradeKind::Major(pair))
    } else {
        Ok(UpgradeKind::Routine(pair))
    }
}

/// Leading integer of a loose version such as `14.x.x-develop`.
pub fn leading_major(version: &str) -> Option<u64> {
    let digits: String = version
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
