//! Fixed-capacity SPSC byte ring buffer.
//!
//! This is the transport under both work queues: the writer half stays with
//! the producing side, the reader half moves to the consuming thread. Both
//! queues carry length-prefixed frames, so the reader needs byte-granular
//! `peek` to inspect a size header before committing to a read.
//!
//! Writes and reads are all-or-nothing: a transfer that does not fit moves
//! zero bytes. Callers are expected to pre-check with `can_write`/`can_read`;
//! a short transfer after a successful check indicates a contract violation
//! on the other handle and must abort the enclosing message.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct RingInner {
    buffer: Box<[UnsafeCell<u8>]>,
    /// Always a power of two.
    capacity: usize,
    mask: usize,
    /// Monotonic cursors; positions are `cursor & mask`.
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// Access to `buffer` is disjoint by construction: the writer only touches
// bytes in `[write, write + writable)` and the reader `[read, read + readable)`.
unsafe impl Send for RingInner {}
unsafe impl Sync for RingInner {}

impl RingInner {
    fn new(requested: usize) -> Self {
        let capacity = requested.max(1).next_power_of_two();
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    unsafe fn copy_in(&self, start: usize, data: &[u8]) {
        let start_idx = start & self.mask;
        let first = (self.capacity - start_idx).min(data.len());
        let base = self.buffer.as_ptr() as *mut u8;
        ptr::copy_nonoverlapping(data.as_ptr(), base.add(start_idx), first);
        if data.len() > first {
            ptr::copy_nonoverlapping(data.as_ptr().add(first), base, data.len() - first);
        }
    }

    unsafe fn copy_out(&self, start: usize, out: &mut [u8]) {
        let start_idx = start & self.mask;
        let first = (self.capacity - start_idx).min(out.len());
        let base = self.buffer.as_ptr() as *const u8;
        ptr::copy_nonoverlapping(base.add(start_idx), out.as_mut_ptr(), first);
        if out.len() > first {
            ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), out.len() - first);
        }
    }
}

/// Producer handle. `Send` but not `Sync`: exactly one writer at a time.
pub struct RingWriter {
    inner: Arc<RingInner>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

/// Consumer handle. `Send` but not `Sync`: exactly one reader at a time.
pub struct RingReader {
    inner: Arc<RingInner>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

/// Creates the writer/reader pair over a shared ring.
///
/// `capacity` is rounded up to the next power of two and is fixed for the
/// lifetime of the ring.
pub fn new_ring_buffer(capacity: usize) -> (RingWriter, RingReader) {
    let inner = Arc::new(RingInner::new(capacity));
    (
        RingWriter {
            inner: Arc::clone(&inner),
            _not_sync: PhantomData,
        },
        RingReader {
            inner,
            _not_sync: PhantomData,
        },
    )
}

impl RingWriter {
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes that can currently be written without overrunning the reader.
    pub fn writable(&self) -> usize {
        let write = self.inner.write_pos.load(Ordering::Relaxed);
        let read = self.inner.read_pos.load(Ordering::Acquire);
        self.inner.capacity - write.wrapping_sub(read)
    }

    pub fn can_write(&self, len: usize) -> bool {
        self.writable() >= len
    }

    /// Writes the whole slice, or nothing if it does not fit.
    ///
    /// Returns the number of bytes written: `data.len()` or 0.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let write = self.inner.write_pos.load(Ordering::Relaxed);
        let read = self.inner.read_pos.load(Ordering::Acquire);
        if self.inner.capacity - write.wrapping_sub(read) < data.len() {
            return 0;
        }
        unsafe {
            self.inner.copy_in(write, data);
        }
        self.inner
            .write_pos
            .store(write.wrapping_add(data.len()), Ordering::Release);
        data.len()
    }
}

impl RingReader {
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Bytes currently buffered and visible to this reader.
    pub fn readable(&self) -> usize {
        let write = self.inner.write_pos.load(Ordering::Acquire);
        let read = self.inner.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    pub fn can_read(&self, len: usize) -> bool {
        self.readable() >= len
    }

    /// Reads exactly `out.len()` bytes, or nothing if that many are not
    /// buffered. Returns the number of bytes read: `out.len()` or 0.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        let read = self.inner.read_pos.load(Ordering::Relaxed);
        let write = self.inner.write_pos.load(Ordering::Acquire);
        if write.wrapping_sub(read) < out.len() {
            return 0;
        }
        unsafe {
            self.inner.copy_out(read, out);
        }
        self.inner
            .read_pos
            .store(read.wrapping_add(out.len()), Ordering::Release);
        out.len()
    }

    /// Copies up to `out.len()` bytes from the current read position without
    /// advancing the cursor. Returns the number of bytes copied.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let read = self.inner.read_pos.load(Ordering::Relaxed);
        let write = self.inner.write_pos.load(Ordering::Acquire);
        let len = write.wrapping_sub(read).min(out.len());
        if len == 0 {
            return 0;
        }
        unsafe {
            self.inner.copy_out(read, &mut out[..len]);
        }
        len
    }
}

#[cfg(test)]
mod tests {
    use super::new_ring_buffer;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let (writer, reader) = new_ring_buffer(100);
        assert_eq!(writer.capacity(), 128);
        assert_eq!(reader.capacity(), 128);
        assert_eq!(writer.writable(), 128);
        assert_eq!(reader.readable(), 0);
    }

    #[test]
    fn write_is_all_or_nothing() {
        let (mut writer, mut reader) = new_ring_buffer(8);
        assert_eq!(writer.write(&[1; 6]), 6);
        assert!(!writer.can_write(3));
        assert_eq!(writer.write(&[2; 3]), 0);
        assert_eq!(reader.readable(), 6);

        let mut out = [0u8; 6];
        assert_eq!(reader.read(&mut out), 6);
        assert_eq!(out, [1; 6]);
    }

    #[test]
    fn read_is_all_or_nothing() {
        let (mut writer, mut reader) = new_ring_buffer(8);
        assert_eq!(writer.write(&[7, 8, 9]), 3);

        let mut out = [0u8; 4];
        assert_eq!(reader.read(&mut out), 0);
        assert_eq!(reader.readable(), 3);

        let mut out = [0u8; 3];
        assert_eq!(reader.read(&mut out), 3);
        assert_eq!(out, [7, 8, 9]);
        assert_eq!(reader.readable(), 0);
    }

    #[test]
    fn peek_does_not_advance() {
        let (mut writer, mut reader) = new_ring_buffer(8);
        writer.write(&[10, 20, 30]);

        let mut out = [0u8; 8];
        assert_eq!(reader.peek(&mut out), 3);
        assert_eq!(&out[..3], &[10, 20, 30]);
        assert_eq!(reader.readable(), 3);

        let mut two = [0u8; 2];
        assert_eq!(reader.peek(&mut two), 2);
        assert_eq!(two, [10, 20]);

        let mut out = [0u8; 3];
        assert_eq!(reader.read(&mut out), 3);
        assert_eq!(out, [10, 20, 30]);
    }

    #[test]
    fn wraparound_preserves_bytes() {
        let (mut writer, mut reader) = new_ring_buffer(8);
        writer.write(&[1; 6]);
        let mut out = [0u8; 4];
        assert_eq!(reader.read(&mut out), 4);

        // Crosses the capacity boundary.
        assert_eq!(writer.write(&[2, 3, 4, 5, 6]), 5);
        let mut out = [0u8; 7];
        assert_eq!(reader.read(&mut out), 7);
        assert_eq!(out, [1, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn full_capacity_is_usable() {
        let (mut writer, mut reader) = new_ring_buffer(16);
        assert_eq!(writer.write(&[9; 16]), 16);
        assert_eq!(writer.writable(), 0);
        assert!(!writer.can_write(1));

        let mut out = [0u8; 16];
        assert_eq!(reader.read(&mut out), 16);
        assert_eq!(out, [9; 16]);
        assert_eq!(writer.writable(), 16);
    }

    #[test]
    fn space_accounting_stays_consistent() {
        let (mut writer, mut reader) = new_ring_buffer(16);
        assert_eq!(writer.write(&[1; 5]), 5);
        assert_eq!(writer.writable(), 11);
        assert_eq!(reader.readable(), 5);

        let mut out = [0u8; 3];
        assert_eq!(reader.read(&mut out), 3);
        assert_eq!(writer.writable(), 14);
        assert_eq!(reader.readable(), 2);

        assert_eq!(writer.write(&[2; 14]), 14);
        assert_eq!(writer.writable(), 0);
        assert_eq!(reader.readable(), 16);
    }

    #[test]
    fn spsc_cross_thread_stress() {
        let (mut writer, mut reader) = new_ring_buffer(64);

        let producer = std::thread::spawn(move || {
            for i in 0..10_000u32 {
                let bytes = i.to_ne_bytes();
                while writer.write(&bytes) == 0 {
                    std::thread::yield_now();
                }
            }
        });
        let consumer = std::thread::spawn(move || {
            let mut out = [0u8; 4];
            for expected in 0..10_000u32 {
                while reader.read(&mut out) == 0 {
                    std::thread::yield_now();
                }
                assert_eq!(u32::from_ne_bytes(out), expected);
            }
        });

        producer.join().expect("join producer");
        consumer.join().expect("join consumer");
    }
}
