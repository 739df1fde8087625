//! Background work thread: request queue, worker registry and dispatch loop.
//!
//! # Thread Topology
//!
//! One OS thread per [`WorkThread`] instance consumes the shared request
//! queue and dispatches each frame to the worker named by its id. Producers
//! (any thread holding a [`Worker`](crate::Worker)) are serialized by a
//! short-held lock around the request ring's writer; the dispatch loop takes
//! no lock on its queue side and blocks only on the wake channel between
//! requests.
//!
//! Requests for a worker that was removed between scheduling and dispatch
//! are consumed and dropped silently; that race is part of the contract.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{ThreadPriority, WorkThreadConfig};
use crate::error::ScheduleError;
use crate::frame::{LENGTH_PREFIX, REQUEST_OVERHEAD, frame_ready, grow_scratch};
use crate::ring_buffer::{RingReader, RingWriter, new_ring_buffer};
use crate::worker::WorkerShared;

/// Sleep between re-checks while a woken consumer waits for a frame that is
/// still being written.
const FRAME_POLL: Duration = Duration::from_millis(2);
const JOIN_TIMEOUT: Duration = Duration::from_millis(100);
const JOIN_POLL: Duration = Duration::from_millis(5);

struct ThreadShared {
    name: String,
    stop: AtomicBool,
    registry: Mutex<HashMap<u32, Arc<WorkerShared>>>,
}

/// Owns one background thread and the request queue feeding it.
///
/// Created with [`WorkThread::spawn`] and shared behind an `Arc` by every
/// worker registered to it. Dropping the last handle stops and joins the
/// background thread (bounded wait, then detach).
pub struct WorkThread {
    shared: Arc<ThreadShared>,
    requests: Mutex<RingWriter>,
    wake_tx: Sender<()>,
    next_id: AtomicU32,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkThread {
    /// Spawns the background thread and returns the shared handle.
    pub fn spawn(config: WorkThreadConfig) -> io::Result<Arc<Self>> {
        let (writer, reader) = new_ring_buffer(config.request_capacity);
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded::<()>();
        let shared = Arc::new(ThreadShared {
            name: config.name.clone(),
            stop: AtomicBool::new(false),
            registry: Mutex::new(HashMap::new()),
        });
        let running = Arc::new(AtomicBool::new(true));

        let join = thread::Builder::new().name(config.name).spawn({
            let shared = Arc::clone(&shared);
            let running = Arc::clone(&running);
            let priority = config.priority;
            move || {
                work_thread_main(WorkThreadArgs {
                    shared,
                    requests: reader,
                    wake_rx,
                    running,
                    priority,
                })
            }
        })?;

        Ok(Arc::new(Self {
            shared,
            requests: Mutex::new(writer),
            wake_tx,
            next_id: AtomicU32::new(0),
            running,
            join: Some(join),
        }))
    }

    /// Assigns an id and inserts the worker into the registry.
    ///
    /// Ids start at 1 and are never reused for the thread's lifetime. A
    /// worker that already holds an id keeps it. Never fails.
    pub(crate) fn register_worker(&self, worker: &Arc<WorkerShared>) -> u32 {
        let existing = worker.id.load(Ordering::Acquire);
        if existing != 0 {
            return existing;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        worker.id.store(id, Ordering::Release);
        self.shared.registry.lock().insert(id, Arc::clone(worker));
        debug!(thread = %self.shared.name, id, "registered worker");
        id
    }

    /// Erases the worker from the registry and clears its id.
    pub(crate) fn remove_worker(&self, worker: &Arc<WorkerShared>) {
        let id = worker.id.swap(0, Ordering::AcqRel);
        if id == 0 {
            return;
        }
        self.shared.registry.lock().remove(&id);
        debug!(thread = %self.shared.name, id, "removed worker");
    }

    /// Frames `payload` onto the request queue and wakes the thread.
    ///
    /// Fails fast under backpressure: the frame is refused whole and the
    /// queue is left untouched. The core never retries; dropped work is the
    /// caller's policy decision.
    pub(crate) fn schedule_work(
        &self,
        worker: &WorkerShared,
        payload: &[u8],
    ) -> Result<(), ScheduleError> {
        if payload.is_empty() {
            return Err(ScheduleError::EmptyPayload);
        }
        let id = worker.id.load(Ordering::Acquire);
        if id == 0 {
            return Err(ScheduleError::NotRegistered);
        }

        let required = REQUEST_OVERHEAD + payload.len();
        let mut requests = self.requests.lock();
        if !requests.can_write(required) {
            return Err(ScheduleError::QueueFull {
                required,
                writable: requests.writable(),
            });
        }
        // Space is reserved; a short write past this point means the SPSC
        // contract was violated and the message must not be trusted.
        let size = payload.len() as u32;
        if requests.write(&size.to_ne_bytes()) < LENGTH_PREFIX {
            return Err(ScheduleError::TruncatedWrite);
        }
        if requests.write(&id.to_ne_bytes()) < LENGTH_PREFIX {
            return Err(ScheduleError::TruncatedWrite);
        }
        if requests.write(payload) < payload.len() {
            return Err(ScheduleError::TruncatedWrite);
        }
        drop(requests);

        self.wake_tx
            .send(())
            .map_err(|_| ScheduleError::ThreadStopped)
    }
}

impl Drop for WorkThread {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let _ = self.wake_tx.send(());

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while self.running.load(Ordering::Acquire) && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }

        let Some(join) = self.join.take() else {
            return;
        };
        if self.running.load(Ordering::Acquire) {
            warn!(thread = %self.shared.name, "work thread did not stop in time, detaching");
            detach_join(&self.shared.name, join);
        } else if join.join().is_err() {
            warn!(thread = %self.shared.name, "work thread panicked");
        }
    }
}

fn detach_join(name: &str, join: JoinHandle<()>) {
    let _ = thread::Builder::new()
        .name(format!("{name}-join"))
        .spawn(move || {
            let _ = join.join();
        });
}

struct RunningFlagGuard {
    running: Arc<AtomicBool>,
}

impl RunningFlagGuard {
    fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }
}

impl Drop for RunningFlagGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

struct WorkThreadArgs {
    shared: Arc<ThreadShared>,
    requests: RingReader,
    wake_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    priority: ThreadPriority,
}

/// Entry point for the work thread.
///
/// Blocks on the wake channel between requests; each wake corresponds to one
/// scheduled frame. A malformed frame is logged and abandoned without
/// stopping the loop.
fn work_thread_main(args: WorkThreadArgs) {
    let WorkThreadArgs {
        shared,
        mut requests,
        wake_rx,
        running,
        priority,
    } = args;
    let _running_guard = RunningFlagGuard::new(running);
    apply_priority(priority);
    let mut scratch: Vec<u8> = Vec::new();

    loop {
        if wake_rx.recv().is_err() {
            break;
        }
        if shared.stop.load(Ordering::Acquire) {
            break;
        }

        // Woken for a frame the producer may still be writing: the space was
        // reserved before the wake, so completion is imminent.
        while !frame_ready(&requests, REQUEST_OVERHEAD) {
            if shared.stop.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(FRAME_POLL);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        if requests.read(&mut prefix) < prefix.len() {
            warn!(thread = %shared.name, "abandoning request: short size read");
            continue;
        }
        let size = u32::from_ne_bytes(prefix) as usize;

        if requests.read(&mut prefix) < prefix.len() {
            warn!(thread = %shared.name, "abandoning request: short worker id read");
            continue;
        }
        let worker_id = u32::from_ne_bytes(prefix);

        grow_scratch(&mut scratch, size);
        if requests.read(&mut scratch[..size]) < size {
            warn!(thread = %shared.name, size, "abandoning request: short payload read");
            continue;
        }

        // Payload consumed above even for id 0, keeping the queue aligned on
        // frame boundaries.
        if worker_id == 0 {
            continue;
        }

        let registry = shared.registry.lock();
        match registry.get(&worker_id) {
            Some(worker) => {
                trace!(thread = %shared.name, worker_id, size, "dispatching request");
                worker.dispatch(&scratch[..size]);
            },
            None => {
                trace!(thread = %shared.name, worker_id, "dropping request for removed worker");
            },
        }
    }
}

#[cfg(target_os = "linux")]
fn apply_priority(priority: ThreadPriority) {
    let sched_priority = match priority {
        ThreadPriority::Inherit => return,
        ThreadPriority::Elevated => 1,
        ThreadPriority::TimeCritical => 10,
    };
    // Refused without CAP_SYS_NICE; the thread keeps the inherited class.
    let param = libc::sched_param { sched_priority };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        debug!(rc, "scheduling hint not applied");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(_priority: ThreadPriority) {}
