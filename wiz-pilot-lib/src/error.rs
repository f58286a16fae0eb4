use std::time::Duration;

use thiserror::Error;

/// Problems found while loading or validating the static configuration.
///
/// Every variant is fatal: an installation with an inconsistent table is
/// never built, so dispatch never sees partially defined behavior.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid hardware address `{0}`")]
    InvalidHardwareId(String),

    #[error("identifier {0} is listed more than once")]
    DuplicateIdentifier(String),

    #[error("display name `{0}` is used by more than one device")]
    DuplicateName(String),

    #[error("override refers to unknown device {0}")]
    UnknownDevice(String),

    #[error("skip list refers to unknown device `{0}`")]
    UnknownSkipEntry(String),

    #[error("more than one override rule for {0}")]
    DuplicateOverride(String),

    #[error("{field} = {value} is out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single request/response exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),
}

/// A reply body that could not be understood.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("reply is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reply has no `result` object")]
    MissingResult,

    #[error("reply carries an invalid hardware address: {0}")]
    BadMac(String),
}
