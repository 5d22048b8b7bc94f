use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    #[error("The profile service has stopped")]
    Shutdown,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid device address {input:?}, expected the form AA:BB:CC:DD:EE:FF")]
pub struct AddressParseError {
    input: String,
}

impl AddressParseError {
    pub fn new(input: &str) -> Self {
        AddressParseError { input: input.to_string() }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command {0:?}, try \"help\"")]
    UnknownCommand(String),

    #[error("Missing argument <{0}>")]
    MissingArgument(&'static str),

    #[error("Unexpected argument {0:?}")]
    UnexpectedArgument(String),

    #[error("{source}")]
    Address { #[from] source: AddressParseError },

    #[error("Invalid number {input:?} for <{name}>")]
    InvalidNumber { name: &'static str, input: String },

    #[error("Invalid connection state {0:?}")]
    InvalidState(String),
}

#[cfg(feature = "btle")]
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Error communicating with the adapter (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Profile service failed: {source}")]
    Service { #[from] source: ServiceError },

    #[error("Failed to read from the console: {source}")]
    Console { #[from] source: io::Error },

    #[cfg(feature = "btle")]
    #[error("Failed to start the bluetooth backend: {source}")]
    Backend { #[from] source: BackendError },
}
