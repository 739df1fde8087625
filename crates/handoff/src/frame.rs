//! Length-prefixed frame helpers shared by both queues.
//!
//! Requests carry `[size: u32][worker_id: u32][payload]`, responses carry
//! `[size: u32][payload]`. All integers are host-native; the queues never
//! leave the process.

use crate::ring_buffer::RingReader;

pub(crate) const LENGTH_PREFIX: usize = std::mem::size_of::<u32>();
/// Size prefix plus worker id.
pub(crate) const REQUEST_OVERHEAD: usize = 2 * LENGTH_PREFIX;
/// Size prefix only.
pub(crate) const RESPONSE_OVERHEAD: usize = LENGTH_PREFIX;

/// True when one whole frame, `overhead` included, is visible to `reader`.
///
/// A producer issues the prefix and payload writes separately, so a consumer
/// woken between them can observe a frame that is still arriving. Peeking the
/// size prefix without consuming it lets the consumer defer until the payload
/// has been published.
pub(crate) fn frame_ready(reader: &RingReader, overhead: usize) -> bool {
    let mut prefix = [0u8; LENGTH_PREFIX];
    if reader.peek(&mut prefix) < prefix.len() {
        return false;
    }
    reader.can_read(overhead + u32::from_ne_bytes(prefix) as usize)
}

/// Grows `scratch` to the next power of two at or above `len`.
///
/// Growth is monotonic; the buffer is reused across messages for the
/// lifetime of its owner.
pub(crate) fn grow_scratch(scratch: &mut Vec<u8>, len: usize) {
    if len > scratch.len() {
        scratch.resize(len.next_power_of_two(), 0);
    }
}
