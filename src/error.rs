//! Unified error types for sandnet

use crate::network::Route;
use ipnet::IpNet;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sandnet operations
#[derive(Error, Debug)]
pub enum Error {
    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Failed to decode iproute2 output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    // Lookup errors
    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Could not find an appropriate master '{master}' for '{interface}'")]
    MasterNotFound { master: String, interface: String },

    #[error("Failed to open network namespace '{path}': {source}")]
    NamespaceOpen { path: PathBuf, source: io::Error },

    #[error("Sandbox owning '{0}' no longer exists")]
    SandboxGone(String),

    // Address errors
    #[error(
        "Cannot program address {address} in sandbox interface because it conflicts with existing route {route}"
    )]
    RouteConflict { address: IpNet, route: Route },

    // Kernel errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("{action}: {source}")]
    Kernel {
        action: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{step}: {source}")]
    Configure {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Failed to set link '{name}' up after {attempts} attempts: {source}")]
    LinkUp {
        name: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("No statistics were returned for '{0}'")]
    StatisticsUnavailable(String),
}

impl Error {
    /// Innermost error below any context wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Kernel { source, .. }
            | Error::Configure { source, .. }
            | Error::LinkUp { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True for device, master, namespace and sandbox lookup failures
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::InterfaceNotFound(_)
                | Error::MasterNotFound { .. }
                | Error::NamespaceOpen { .. }
                | Error::SandboxGone(_)
        )
    }
}

/// Attach an action description to a failing kernel call
pub(crate) trait ResultExt<T> {
    fn with_action<F>(self, action: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_action<F>(self, action: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Kernel {
            action: action(),
            source: Box::new(e),
        })
    }
}

/// Result type alias for sandnet operations
pub type Result<T> = std::result::Result<T, Error>;
