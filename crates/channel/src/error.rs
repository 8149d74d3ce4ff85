// SPDX-License-Identifier: Apache-2.0

//! Errors for the channels.
//!
//! Important note: errors must stay `Send` so they can cross the thread
//! boundary between the scheduler and the service threads.

/// Errors that can occur sending messages to a channel.
#[derive(thiserror::Error, Debug)]
pub enum SendError<T> {
    /// The channel is full and the message could not be sent.
    #[error("Channel is full and the message could not be sent")]
    Full(T),

    /// The channel is closed and the message could not be sent.
    #[error("Channel is closed and the message could not be sent")]
    Closed(T),
}

impl<T> SendError<T> {
    /// Returns the message that failed to send, whatever the reason.
    pub fn inner(self) -> T {
        match self {
            Self::Full(t) => t,
            Self::Closed(t) => t,
        }
    }
}

/// Errors that can occur when consuming messages from a channel.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RecvError {
    /// The channel is closed.
    #[error("The channel is closed")]
    Closed,

    /// The channel is empty.
    #[error("The channel is empty")]
    Empty,
}
