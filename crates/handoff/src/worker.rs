//! Caller-side worker handle and its shared registration record.
//!
//! A [`Worker`] splits across two threads: the handle here stays with the
//! caller (scheduling requests, draining responses), while the registration
//! record (id, busy flag, request handler and the response-ring writer) is
//! shared with the owning work thread through its registry. The record is
//! reference-counted, never owned by the registry, so removal and dispatch
//! can race without dangling.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{RespondError, ScheduleError};
use crate::frame::{LENGTH_PREFIX, RESPONSE_OVERHEAD, frame_ready, grow_scratch};
use crate::ring_buffer::{RingReader, RingWriter, new_ring_buffer};
use crate::work_thread::WorkThread;

const TEARDOWN_POLL: Duration = Duration::from_millis(5);

/// Request-processing extension point, executed on the work thread.
pub trait WorkHandler: Send {
    /// Handles one dispatched request.
    ///
    /// May call [`Responder::respond`] any number of times; each call frames
    /// one response for a later [`Worker::process_work_responses`] drain.
    fn process_request(&mut self, payload: &[u8], responder: &mut Responder<'_>);
}

/// Writes responses to the worker's private response queue.
///
/// Only handed out for the duration of a [`WorkHandler::process_request`]
/// call; responses cross back to the caller side through no other path.
pub struct Responder<'a> {
    responses: &'a mut RingWriter,
}

impl Responder<'_> {
    /// Frames `payload` onto the response queue.
    ///
    /// Fails fast under backpressure; the caller decides whether losing the
    /// response is tolerable or the response ring was sized too small.
    pub fn respond(&mut self, payload: &[u8]) -> Result<(), RespondError> {
        let required = RESPONSE_OVERHEAD + payload.len();
        if !self.responses.can_write(required) {
            return Err(RespondError::QueueFull {
                required,
                writable: self.responses.writable(),
            });
        }
        let size = payload.len() as u32;
        if self.responses.write(&size.to_ne_bytes()) < LENGTH_PREFIX {
            return Err(RespondError::TruncatedWrite);
        }
        if self.responses.write(payload) < payload.len() {
            return Err(RespondError::TruncatedWrite);
        }
        Ok(())
    }
}

pub(crate) struct DispatchSlot {
    handler: Box<dyn WorkHandler>,
    responses: RingWriter,
}

/// Background-side worker state, registered with the owning thread.
pub(crate) struct WorkerShared {
    /// 0 while unregistered; assigned by the owning thread.
    pub(crate) id: AtomicU32,
    /// True exactly while `dispatch` runs the handler.
    pub(crate) busy: AtomicBool,
    slot: Mutex<DispatchSlot>,
}

impl WorkerShared {
    /// Runs the handler for one request on the work thread.
    ///
    /// The busy flag brackets the call so `Worker::drop` can detect
    /// quiescence without taking a lock.
    pub(crate) fn dispatch(&self, payload: &[u8]) {
        while self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let mut slot = self.slot.lock();
        let DispatchSlot { handler, responses } = &mut *slot;
        let mut responder = Responder { responses };
        let result = catch_unwind(AssertUnwindSafe(|| {
            handler.process_request(payload, &mut responder);
        }));
        drop(slot);
        self.busy.store(false, Ordering::Release);
        if result.is_err() {
            warn!(id = self.id.load(Ordering::Relaxed), "request handler panicked");
        }
    }
}

/// A unit of deferred work: schedules requests onto its owning
/// [`WorkThread`] and drains the results they produce.
///
/// Registers with the owning thread at construction and deregisters on drop.
/// `schedule_work` and `process_work_responses` never block; drop is the one
/// bounded-blocking path (it waits out an in-flight dispatch).
pub struct Worker {
    shared: Arc<WorkerShared>,
    owner: Arc<WorkThread>,
    responses: RingReader,
    scratch: Vec<u8>,
}

impl Worker {
    /// Creates a worker with a private response queue of `response_capacity`
    /// bytes (rounded up to a power of two) and registers it with `thread`.
    pub fn new(
        thread: &Arc<WorkThread>,
        response_capacity: usize,
        handler: Box<dyn WorkHandler>,
    ) -> Self {
        let (writer, reader) = new_ring_buffer(response_capacity);
        let shared = Arc::new(WorkerShared {
            id: AtomicU32::new(0),
            busy: AtomicBool::new(false),
            slot: Mutex::new(DispatchSlot {
                handler,
                responses: writer,
            }),
        });
        thread.register_worker(&shared);
        Self {
            shared,
            owner: Arc::clone(thread),
            responses: reader,
            scratch: Vec::new(),
        }
    }

    /// Registration id on the owning thread; never 0 for a live worker.
    pub fn id(&self) -> u32 {
        self.shared.id.load(Ordering::Acquire)
    }

    /// Hands `payload` to the owning thread for deferred processing.
    pub fn schedule_work(&self, payload: &[u8]) -> Result<(), ScheduleError> {
        self.owner.schedule_work(&self.shared, payload)
    }

    /// Drains every complete response frame, invoking `on_response` once per
    /// frame with the payload bytes.
    ///
    /// Returns immediately when the next frame is not yet fully visible; a
    /// response produced this instant is simply picked up on a later cycle.
    pub fn process_work_responses(&mut self, mut on_response: impl FnMut(&[u8])) {
        let mut remaining = self.responses.readable();
        while remaining >= LENGTH_PREFIX {
            if !frame_ready(&self.responses, RESPONSE_OVERHEAD) {
                return;
            }
            let mut prefix = [0u8; LENGTH_PREFIX];
            if self.responses.read(&mut prefix) < prefix.len() {
                return;
            }
            let size = u32::from_ne_bytes(prefix) as usize;
            grow_scratch(&mut self.scratch, size);
            if self.responses.read(&mut self.scratch[..size]) < size {
                warn!(id = self.id(), size, "abandoning response: short payload read");
                return;
            }
            on_response(&self.scratch[..size]);
            // Saturates when a frame landed after the `readable` snapshot;
            // anything newer is picked up next cycle.
            remaining = remaining.saturating_sub(RESPONSE_OVERHEAD + size);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Off the real-time path by contract: wait out an in-flight dispatch
        // before the registration record disappears from the registry.
        while self.shared.busy.load(Ordering::Acquire) {
            std::thread::sleep(TEARDOWN_POLL);
        }
        self.owner.remove_worker(&self.shared);
    }
}
