//! Typed error enums for the scheduling and response paths.
//!
//! Both paths refuse work instead of blocking: every variant here is either
//! backpressure the caller may retry on a later cycle, or a contract
//! violation worth surfacing to the developer. Nothing in this crate reports
//! failures across the producer/consumer boundary by any other means.

use thiserror::Error;

/// Errors produced when handing a request to a work thread.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// Request payloads must carry at least one byte.
    #[error("request payload is empty")]
    EmptyPayload,
    /// The worker has no id, either never registered or already removed.
    #[error("worker is not registered with a work thread")]
    NotRegistered,
    /// The request queue lacks space for the framed message. The queue is
    /// left untouched; the caller decides whether to retry, drop or escalate.
    #[error("request queue full: {required} bytes required, {writable} writable")]
    QueueFull {
        /// Frame size that was refused, header included.
        required: usize,
        /// Free bytes at the time of refusal.
        writable: usize,
    },
    /// Fewer bytes were framed than the space check promised.
    #[error("short write while framing request")]
    TruncatedWrite,
    /// The background thread has already shut down.
    #[error("work thread has stopped")]
    ThreadStopped,
}

/// Errors produced when queueing a response from inside a request handler.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RespondError {
    /// The response queue lacks space for the framed message.
    #[error("response queue full: {required} bytes required, {writable} writable")]
    QueueFull {
        /// Frame size that was refused, header included.
        required: usize,
        /// Free bytes at the time of refusal.
        writable: usize,
    },
    /// Fewer bytes were framed than the space check promised.
    #[error("short write while framing response")]
    TruncatedWrite,
}
