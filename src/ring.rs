//! Bounded page ring between the capture worker and the forwarder.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-capacity ring of capture pages with cumulative produce/forward
/// counters. A full ring refuses the push and counts an overrun instead of
/// overwriting, so `tx_cnt <= rx_cnt <= tx_cnt + capacity` holds at every
/// observation point.
///
/// There is exactly one producer (the capture worker); the counters are
/// maintained under that assumption.
pub struct PageRing {
    queue: ArrayQueue<(u64, Vec<u8>)>,
    rx_cnt: AtomicU64,
    tx_cnt: AtomicU64,
    overruns: AtomicU64,
}

impl PageRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            rx_cnt: AtomicU64::new(0),
            tx_cnt: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    /// Account one captured page without buffering it (direct forwarding).
    /// Returns the page's sequence number.
    pub fn claim(&self) -> u64 {
        self.rx_cnt.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark one directly forwarded page as consumed.
    pub fn mark_forwarded(&self) {
        self.tx_cnt.fetch_add(1, Ordering::SeqCst);
    }

    /// Buffer one captured page. `None` means the ring was full: the page is
    /// dropped and the overrun counter incremented, keeping the forwarded
    /// sequence numbers contiguous.
    pub fn produce(&self, page: Vec<u8>) -> Option<u64> {
        let seq = self.rx_cnt.load(Ordering::SeqCst) + 1;
        match self.queue.push((seq, page)) {
            Ok(()) => {
                self.rx_cnt.store(seq, Ordering::SeqCst);
                Some(seq)
            }
            Err(_) => {
                self.overruns.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Pop the next buffered page for forwarding.
    pub fn consume(&self) -> Option<(u64, Vec<u8>)> {
        let entry = self.queue.pop()?;
        self.tx_cnt.fetch_add(1, Ordering::SeqCst);
        Some(entry)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn rx_count(&self) -> u64 {
        self.rx_cnt.load(Ordering::SeqCst)
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_cnt.load(Ordering::SeqCst)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::SeqCst)
    }

    /// Drop buffered pages and zero every counter (new capture config).
    pub fn reset(&self) {
        while self.queue.pop().is_some() {}
        self.rx_cnt.store(0, Ordering::SeqCst);
        self.tx_cnt.store(0, Ordering::SeqCst);
        self.overruns.store(0, Ordering::SeqCst);
    }
}
