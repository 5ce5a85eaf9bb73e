//! Error types for the notifier.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::NetworkHandle;

/// Errors raised while constructing or configuring a notifier.
///
/// Queries and publish calls never fail; only construction, configuration
/// loading and collaborator reads return these.
#[derive(Error, Debug)]
pub enum NotifierError {
    /// A notifier is already installed for this process.
    #[error("a network change notifier already exists in this process")]
    AlreadyInitialized,

    /// The platform binding disagrees about the invalid network handle.
    #[error("platform invalid network handle {platform} does not match {expected}")]
    SentinelMismatch {
        platform: NetworkHandle,
        expected: NetworkHandle,
    },

    /// No built-in signal source exists for this platform.
    #[error("no network signal source for platform '{0}'")]
    UnsupportedPlatform(&'static str),

    /// OS change notifications could not be registered.
    #[error("failed to register for network change notifications: {0}")]
    Registration(String),

    /// The configuration file is not valid TOML for [`NotifierConfig`](crate::config::NotifierConfig).
    #[error("failed to parse notifier config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize notifier config: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// The configuration file could not be read.
    #[error("failed to read notifier config '{path}': {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The system DNS configuration could not be read.
    #[error("failed to read DNS configuration: {0}")]
    DnsRead(String),

    /// A metric could not be created or registered.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A runner or pool could not be created.
    #[error(transparent)]
    Runtime(#[from] netchange_core::RuntimeError),
}

/// Result type for notifier operations.
pub type NotifierResult<T> = Result<T, NotifierError>;
