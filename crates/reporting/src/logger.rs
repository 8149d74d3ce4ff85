// SPDX-License-Identifier: Apache-2.0

//! The logger thread and its producer handle.

use crate::detail::{effective_fields, requested_fields, write_settings_block};
use crate::error::Error;
use crate::event::LogEvent;
use loadgen_config::ConfigEvent;
use std::io::{BufWriter, Write};
use std::thread;

/// Cloneable producer handle. Sending never blocks; events are dropped
/// silently once the logger has shut down.
#[derive(Clone)]
pub struct LogHandle {
    tx: flume::Sender<LogEvent>,
}

impl LogHandle {
    /// Queues an event for the logger thread.
    pub fn log(&self, event: LogEvent) {
        let _ = self.tx.send(event);
    }

    /// Queues a lifecycle transition.
    pub fn lifecycle(&self, state: &'static str, t_ns: i64) {
        self.log(LogEvent::Lifecycle { state, t_ns });
    }

    /// Queues a recoverable configuration problem.
    pub fn config_error(&self, event: ConfigEvent) {
        self.log(LogEvent::ConfigError(event));
    }

    /// Queues an informational note.
    pub fn note(&self, message: impl Into<String>) {
        self.log(LogEvent::Info(message.into()));
    }

    /// Queues a non-fatal runtime error.
    pub fn error(&self, message: impl Into<String>) {
        self.log(LogEvent::Error(message.into()));
    }

    /// Queues a fatal error.
    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogEvent::Fatal(message.into()));
    }
}

/// Owns the logger thread. All artifact streams live on that thread; the
/// rest of the process only ever holds [`LogHandle`]s.
pub struct Logger {
    handle: LogHandle,
    join: Option<thread::JoinHandle<Result<(), Error>>>,
}

impl Logger {
    /// Spawns the logger thread writing the detail stream and, optionally,
    /// the accuracy stream.
    pub fn spawn(
        detail: Box<dyn Write + Send>,
        accuracy: Option<Box<dyn Write + Send>>,
    ) -> Result<Logger, Error> {
        let (tx, rx) = flume::unbounded::<LogEvent>();
        let join = thread::Builder::new()
            .name("loadgen-logger".to_owned())
            .spawn(move || run_logger(&rx, detail, accuracy))
            .map_err(|e| Error::ThreadSpawnError {
                thread_name: "loadgen-logger".to_owned(),
                source: e,
            })?;
        Ok(Logger {
            handle: LogHandle { tx },
            join: Some(join),
        })
    }

    /// A new producer handle.
    #[must_use]
    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Flushes everything queued so far and stops the logger thread.
    pub fn finish(mut self) -> Result<(), Error> {
        self.handle.log(LogEvent::Shutdown);
        match self.join.take() {
            Some(join) => join.join().map_err(|panic| Error::LoggerPanic {
                panic_message: format!("{panic:?}"),
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            self.handle.log(LogEvent::Shutdown);
            let _ = join.join();
        }
    }
}

fn run_logger(
    rx: &flume::Receiver<LogEvent>,
    detail: Box<dyn Write + Send>,
    accuracy: Option<Box<dyn Write + Send>>,
) -> Result<(), Error> {
    let mut detail = BufWriter::new(detail);
    let mut accuracy = accuracy.map(BufWriter::new);
    let mut result = Ok(());

    while let Ok(event) = rx.recv() {
        if matches!(event, LogEvent::Shutdown) {
            break;
        }
        // Keep draining after a write error so producers are never stalled
        // behind a dead sink; only the first error is reported.
        let written = write_event(&event, &mut detail, accuracy.as_mut());
        if result.is_ok() {
            result = result.and(written.map_err(|source| Error::WriteError {
                artifact: "detail log",
                source,
            }));
        }
    }

    let flushed = detail.flush().and_then(|()| match accuracy.as_mut() {
        Some(a) => a.flush(),
        None => Ok(()),
    });
    result.and(flushed.map_err(|source| Error::WriteError {
        artifact: "log stream flush",
        source,
    }))
}

fn write_event(
    event: &LogEvent,
    detail: &mut impl Write,
    accuracy: Option<&mut impl Write>,
) -> std::io::Result<()> {
    match event {
        LogEvent::Lifecycle { state, t_ns } => {
            writeln!(detail, "INFO : run state -> {state} (t_ns={t_ns})")
        }
        LogEvent::ConfigError(config_event) => writeln!(detail, "ERROR : {config_event}"),
        LogEvent::Info(message) => writeln!(detail, "INFO : {message}"),
        LogEvent::Error(message) => writeln!(detail, "ERROR : {message}"),
        LogEvent::Fatal(message) => writeln!(detail, "FATAL : {message}"),
        LogEvent::RequestedSettings(requested) => {
            write_settings_block(detail, "Requested Settings:", &requested_fields(requested))
        }
        LogEvent::EffectiveSettings(effective) => {
            write_settings_block(detail, "Effective Settings:", &effective_fields(effective))
        }
        LogEvent::QueryIssued {
            query_id,
            scheduled_ns,
            actual_ns,
            sample_count,
        } => writeln!(
            detail,
            "TRACE : issued query {query_id} scheduled_ns={scheduled_ns} actual_ns={actual_ns} samples={sample_count}"
        ),
        LogEvent::QueryCompleted { query_id, completed_ns } => {
            writeln!(detail, "TRACE : completed query {query_id} t_ns={completed_ns}")
        }
        LogEvent::AccuracyRecord(record) => match accuracy {
            Some(accuracy) => {
                serde_json::to_writer(&mut *accuracy, record)?;
                writeln!(accuracy)
            }
            None => Ok(()),
        },
        LogEvent::Shutdown => Ok(()),
    }
}
