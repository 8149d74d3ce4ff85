// SPDX-License-Identifier: Apache-2.0

//! Errors for the reporting crate.

/// Errors that can occur while producing run artifacts.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to spawn the logger thread.
    #[error("Failed to spawn thread '{thread_name}': {source}")]
    ThreadSpawnError {
        /// Name of the thread we attempted to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The logger thread panicked before draining its queue.
    #[error("Logger thread panicked: {panic_message}")]
    LoggerPanic {
        /// Panic message.
        panic_message: String,
    },

    /// Writing an artifact failed.
    #[error("Failed to write {artifact}: {source}")]
    WriteError {
        /// Which artifact was being written.
        artifact: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
