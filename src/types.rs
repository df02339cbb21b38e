//! Shared types for bench

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The framework app every bench is built around. It can never be excluded
/// from updates.
pub const BASE_APP: &str = "frappe";

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
}

/// Name of an app living under `<bench>/apps`.
///
/// Validation rules:
/// - Non-empty
/// - Alphanumeric characters, hyphens, underscores, and dots only
/// - Cannot start with a dot or a hyphen
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppName(String);

impl AppName {
    /// Returns the app name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the framework app itself.
    pub fn is_base(&self) -> bool {
        self.0 == BASE_APP
    }

    /// The framework app's name.
    pub fn base() -> Self {
        AppName(BASE_APP.to_string())
    }
}

impl FromStr for AppName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        if s.starts_with('.') {
            return Err(ParseError::InvalidStart('.'));
        }

        if s.starts_with('-') {
            return Err(ParseError::InvalidStart('-'));
        }

        for c in s.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(AppName(s.to_string()))
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AppName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
