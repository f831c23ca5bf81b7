//
// error.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::path::PathBuf;

use log::error;
use thiserror::Error;

use crate::yarn::application::YarnApplicationState;
use crate::yarn::resource_manager::RmError;

pub type YKResult<T> = Result<T, YKError>;

#[derive(Debug, Error)]
pub enum YKError {
    #[error("Kernelspec '{}' could not be parsed: {source}", path.display())]
    DescriptorParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No kernelspec named '{0}' was found")]
    KernelSpecNotFound(String),

    #[error("KernelID: '{kernel_id}' launch timeout due to: {reason}")]
    DiscoveryTimeout { kernel_id: String, reason: String },

    #[error("YARN Resource Manager unreachable at {}", endpoints.join(", "))]
    EndpointUnreachable { endpoints: Vec<String> },

    #[error(
        "KernelID: '{kernel_id}', ApplicationID: '{application_id}' unexpectedly found in state '{state}'"
    )]
    UnexpectedTerminalState {
        kernel_id: String,
        application_id: String,
        state: YarnApplicationState,
    },

    #[error("Resource Manager request failed: {0}")]
    ResourceManager(RmError),

    #[error("Failed to start launcher for kernel '{kernel_id}': {source}")]
    LauncherStartFailed {
        kernel_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Launcher for kernel '{kernel_id}' exited before the application started ({status})")]
    LauncherExited { kernel_id: String, status: String },

    #[error(
        "KernelID: '{kernel_id}', ApplicationID: '{application_id}' still in state '{state}' after kill request"
    )]
    TerminationUnconfirmed {
        kernel_id: String,
        application_id: String,
        state: YarnApplicationState,
    },

    #[error("Connection info for kernel '{kernel_id}' is unavailable: {reason}")]
    ConnectionInfo { kernel_id: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation on kernel '{0}' was cancelled")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RmError> for YKError {
    fn from(err: RmError) -> Self {
        match err {
            RmError::Unreachable { endpoints } => YKError::EndpointUnreachable { endpoints },
            other => YKError::ResourceManager(other),
        }
    }
}

impl From<figment::Error> for YKError {
    fn from(err: figment::Error) -> Self {
        YKError::Config(err.to_string())
    }
}

impl YKError {
    /// A stable code for this kind of error, e.g. `YK-3`.
    pub fn code(&self) -> String {
        let n = match self {
            YKError::DescriptorParse { .. } => 1,
            YKError::KernelSpecNotFound(_) => 2,
            YKError::DiscoveryTimeout { .. } => 3,
            YKError::EndpointUnreachable { .. } => 4,
            YKError::UnexpectedTerminalState { .. } => 5,
            YKError::ResourceManager(_) => 6,
            YKError::LauncherStartFailed { .. } => 7,
            YKError::ConnectionInfo { .. } => 8,
            YKError::Config(_) => 9,
            YKError::Cancelled(_) => 10,
            YKError::Io(_) => 11,
            YKError::LauncherExited { .. } => 12,
            YKError::TerminationUnconfirmed { .. } => 13,
        };
        format!("YK-{}", n)
    }

    pub fn log(&self) {
        error!("Error {}: {}", self.code(), self);
    }
}
