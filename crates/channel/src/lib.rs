// SPDX-License-Identifier: Apache-2.0

//! Blocking channel primitives for the load generator's service threads.
//!
//! The issue scheduler talks to the sample-loader thread over a bounded
//! single-producer single-consumer channel. Only the loader ever blocks on
//! its queue; the producing side has non-blocking and blocking variants so
//! the scheduler can choose whether a full queue is an error.

pub mod error;
pub mod spsc;
