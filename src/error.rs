// SPDX-License-Identifier: Apache-2.0

//! Errors for the facade crate.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while running a benchmark test.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The requested settings could not be resolved into a plan.
    #[error("Invalid settings: {0}")]
    Settings(#[from] loadgen_config::error::Error),

    /// The issue engine failed.
    #[error("Engine error: {0}")]
    Engine(#[from] loadgen_engine::error::Error),

    /// An artifact could not be produced.
    #[error("Reporting error: {0}")]
    Reporting(#[from] loadgen_reporting::error::Error),

    /// Filesystem access for an artifact failed.
    #[error("Failed to open {path}: {source}")]
    Io {
        /// The artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
