// SPDX-License-Identifier: Apache-2.0

//! Single-producer, single-consumer bounded channel with a blocking consumer.

use crate::error::{RecvError, SendError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct ChannelState<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    is_closed: bool,
}

struct Shared<T> {
    state: Mutex<ChannelState<T>>,
    consumer_wakeup: Condvar,
    producer_wakeup: Condvar,
}

/// Creates a new channel with the given capacity.
#[must_use]
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(ChannelState {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            is_closed: false,
        }),
        consumer_wakeup: Condvar::new(),
        producer_wakeup: Condvar::new(),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

/// The producing half. Dropping it closes the channel once drained.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// The consuming half. Dropping it closes the channel immediately.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Sends a value without blocking.
    pub fn try_send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.shared.state.lock();
        if state.is_closed {
            return Err(SendError::Closed(value));
        }
        if state.buffer.len() >= state.capacity {
            return Err(SendError::Full(value));
        }
        state.buffer.push_back(value);
        drop(state);
        let _ = self.shared.consumer_wakeup.notify_one();
        Ok(())
    }

    /// Sends a value, blocking while the channel is full.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.shared.state.lock();
        loop {
            if state.is_closed {
                return Err(SendError::Closed(value));
            }
            if state.buffer.len() < state.capacity {
                state.buffer.push_back(value);
                drop(state);
                let _ = self.shared.consumer_wakeup.notify_one();
                return Ok(());
            }
            self.shared.producer_wakeup.wait(&mut state);
        }
    }

    /// Closes the channel. The consumer drains buffered values first.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.is_closed = true;
        drop(state);
        let _ = self.shared.consumer_wakeup.notify_one();
        let _ = self.shared.producer_wakeup.notify_one();
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> Receiver<T> {
    /// Receives a value without blocking.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        let mut state = self.shared.state.lock();
        if let Some(value) = state.buffer.pop_front() {
            drop(state);
            let _ = self.shared.producer_wakeup.notify_one();
            Ok(value)
        } else if state.is_closed {
            Err(RecvError::Closed)
        } else {
            Err(RecvError::Empty)
        }
    }

    /// Receives a value, blocking until one arrives or the channel closes.
    pub fn recv(&self) -> Result<T, RecvError> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = state.buffer.pop_front() {
                drop(state);
                let _ = self.shared.producer_wakeup.notify_one();
                return Ok(value);
            }
            if state.is_closed {
                return Err(RecvError::Closed);
            }
            self.shared.consumer_wakeup.wait(&mut state);
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.is_closed = true;
        drop(state);
        let _ = self.shared.producer_wakeup.notify_one();
    }
}
