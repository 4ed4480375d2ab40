//! Lock-free ring buffer for received PCM chunks
//!
//! Single-producer single-consumer queue between the network receive loop
//! and whatever drains audio to its destination. The producer never blocks:
//! when the queue is full the chunk is dropped and counted, just like a lost
//! datagram.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free ring buffer for PCM chunks
pub struct PcmRingBuffer {
    queue: ArrayQueue<Bytes>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl PcmRingBuffer {
    /// Create a new ring buffer holding up to `capacity` chunks
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a chunk into the buffer
    /// Returns false if buffer is full (overflow)
    pub fn push(&self, chunk: Bytes) -> bool {
        match self.queue.push(chunk) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a chunk from the buffer
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<Bytes> {
        match self.queue.pop() {
            Some(chunk) => Some(chunk),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedPcmBuffer = Arc<PcmRingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedPcmBuffer {
    Arc::new(PcmRingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_fifo() {
        let buffer = PcmRingBuffer::new(4);

        assert!(buffer.push(Bytes::from_static(&[0, 1])));
        assert!(buffer.push(Bytes::from_static(&[2, 3])));
        assert!(!buffer.is_empty());

        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(&[0, 1]));
        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(&[2, 3]));
        assert!(buffer.is_empty());

        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
        assert!(buffer.try_pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let buffer = PcmRingBuffer::new(2);
        assert!(buffer.push(Bytes::from_static(b"a")));
        assert!(buffer.push(Bytes::from_static(b"b")));
        assert!(!buffer.push(Bytes::from_static(b"c")));

        assert_eq!(buffer.overflow_count(), 1);
        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(b"a"));
    }
}
