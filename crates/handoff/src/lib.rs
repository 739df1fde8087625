#![deny(clippy::wildcard_imports)]

//! Deferred-work scheduling for real-time threads.
//!
//! A latency-critical caller hands byte payloads to a background
//! [`WorkThread`] through [`Worker::schedule_work`] and later collects the
//! results with [`Worker::process_work_responses`]. Neither call blocks:
//! scheduling fails fast under backpressure, and draining defers a response
//! that has not finished arriving to the next cycle. Both directions travel
//! over fixed-capacity SPSC byte rings as length-prefixed frames.
//!
//! The one deliberately blocking path is teardown: dropping a [`Worker`]
//! waits out an in-flight dispatch before deregistering.

pub mod config;
pub mod error;
pub mod ring_buffer;

mod frame;
mod work_thread;
mod worker;

pub use config::{ThreadPriority, WorkThreadConfig};
pub use error::{RespondError, ScheduleError};
pub use work_thread::WorkThread;
pub use worker::{Responder, WorkHandler, Worker};

#[cfg(test)]
mod tests;
