// SPDX-License-Identifier: Apache-2.0

//! The sample-loader service thread.
//!
//! Load and unload calls into the sample library are blocking and can be
//! slow (they move tensors into RAM), so they live on a dedicated thread.
//! The scheduler requests a rotation over a bounded SPSC channel and blocks
//! on the acknowledgement; at most one rotation is ever in flight. Queries
//! referencing the outgoing set must be drained by the caller before it
//! requests the rotation.

use crate::QuerySampleLibrary;
use crate::error::Error;
use loadgen_channel::spsc;
use loadgen_schedule::LoadableSets;
use std::sync::Arc;
use std::thread;
use tracing::debug;

enum LoadRequest {
    Rotate { set_index: usize },
}

struct LoadAck {
    set_index: usize,
}

/// Owns the loader thread and the rotation protocol.
pub struct SampleLoader {
    request_tx: spsc::Sender<LoadRequest>,
    ack_rx: spsc::Receiver<LoadAck>,
    join: Option<thread::JoinHandle<()>>,
}

impl SampleLoader {
    /// Spawns the loader thread for this run's loadable sets.
    pub fn spawn(
        qsl: Arc<dyn QuerySampleLibrary>,
        sets: Arc<LoadableSets>,
    ) -> Result<Self, Error> {
        let (request_tx, request_rx) = spsc::channel::<LoadRequest>(1);
        let (ack_tx, ack_rx) = spsc::channel::<LoadAck>(1);

        let join = thread::Builder::new()
            .name("sample-loader".to_owned())
            .spawn(move || {
                let mut resident: Option<usize> = None;
                while let Ok(request) = request_rx.recv() {
                    match request {
                        LoadRequest::Rotate { set_index } => {
                            if let Some(outgoing) = resident.take() {
                                debug!(outgoing, "unloading sample set");
                                qsl.unload_samples_from_ram(sets.set(outgoing));
                            }
                            debug!(set_index, "loading sample set");
                            qsl.load_samples_to_ram(sets.set(set_index));
                            resident = Some(set_index);
                            if ack_tx.send(LoadAck { set_index }).is_err() {
                                break;
                            }
                        }
                    }
                }
                if let Some(outgoing) = resident {
                    qsl.unload_samples_from_ram(sets.set(outgoing));
                }
            })
            .map_err(|e| Error::ThreadSpawnError {
                thread_name: "sample-loader".to_owned(),
                source: e,
            })?;

        Ok(SampleLoader {
            request_tx,
            ack_rx,
            join: Some(join),
        })
    }

    /// Unloads the resident set (if any), loads set `set_index`, and blocks
    /// until the library has finished.
    pub fn rotate_to(&self, set_index: usize) -> Result<(), Error> {
        if self.request_tx.send(LoadRequest::Rotate { set_index }).is_err() {
            return Err(Error::LoaderUnavailable { set_index });
        }
        match self.ack_rx.recv() {
            Ok(ack) if ack.set_index == set_index => Ok(()),
            _ => Err(Error::LoaderUnavailable { set_index }),
        }
    }

    /// Stops the thread; the resident set is unloaded on the way out.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.request_tx.close();
        match self.join.take() {
            Some(join) => join.join().map_err(|panic| Error::ThreadJoinPanic {
                thread_name: "sample-loader".to_owned(),
                panic_message: format!("{panic:?}"),
            }),
            None => Ok(()),
        }
    }
}

impl Drop for SampleLoader {
    fn drop(&mut self) {
        self.request_tx.close();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
