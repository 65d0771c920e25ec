// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The boot entry descriptor has no usable partition or loader path
    #[error("Malformed boot entry descriptor: {0}")]
    MalformedDescriptor(String),

    /// No boot entry matches the firmware's current selection
    #[error("Unable to resolve the active boot entry: {0}")]
    BootStateUnresolvable(String),

    /// A certificate expiration date could not be parsed
    #[error("Unparseable expiration date: '{0}'")]
    UnparseableExpirationDate(String),

    #[error("Active boot loader {} not found", .0.display())]
    LoaderNotFound(PathBuf),

    #[error("Partition {0} is not mounted")]
    PartitionNotMounted(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    #[error("Execution error: {0:?}, {1}")]
    Execution(Option<i32>, String),

    #[error("Insufficient privileges to read {}. Try: sudo sbaudit {operation}", path.display())]
    PrivilegeRequired { operation: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Text decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable identifier for the error kind, used in JSON error output
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::MalformedDescriptor(_) => "malformed_descriptor",
            Error::BootStateUnresolvable(_) => "boot_state_unresolvable",
            Error::UnparseableExpirationDate(_) => {
                "unparseable_expiration_date"
            }
            Error::LoaderNotFound(_) => "loader_not_found",
            Error::PartitionNotMounted(_) => "partition_not_mounted",
            Error::Configuration(_) => "configuration",
            Error::Execution(..) => "execution",
            Error::PrivilegeRequired { .. } => "privilege_required",
            Error::Io(_) => "io",
            Error::Utf8(_) => "utf8",
            Error::Crypto(_) => "crypto",
            Error::GlobPattern(_) => "glob_pattern",
            Error::Serde(_) => "serialization",
            Error::Other(_) => "other",
        }
    }

    /// Map a permission-denied I/O error on `path` to a privilege hint,
    /// leaving every other error untouched.
    pub(crate) fn from_io_at(
        err: std::io::Error,
        path: &std::path::Path,
        operation: &str,
    ) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Error::PrivilegeRequired {
                operation: operation.to_string(),
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
