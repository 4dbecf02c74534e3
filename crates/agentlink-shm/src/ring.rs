use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{Result, ShmError};
use crate::layout::{align_record, RecordHdr, ShmRingHeader, RECORD_ALIGN, RECORD_HDR_SIZE};

/// Producer-to-consumer wake-up hook attached to a ring.
///
/// The SHM channel backs this with a named semaphore; tests may use any
/// in-process signal. A ring without a notify falls back to bounded
/// spin-and-sleep polling on the blocking read path.
pub trait RingNotify: Send + Sync {
    fn post(&self);
    /// Wait up to `timeout` (`None` = forever) for a post.
    /// Returns `false` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}

/// Single-producer/single-consumer byte ring over externally-owned memory.
///
/// `attach` binds to a [`ShmRingHeader`] and data buffer that live inside a
/// shared mapping; the ring itself performs no allocation. Exactly one
/// thread may call the producer operations (`push`) and exactly one thread
/// the consumer operations (`pop`/`drain`); the two may live in different
/// processes.
pub struct ShmRingSpsc {
    hdr: &'static ShmRingHeader,
    data: *mut u8,
    capacity: u32,
    max_frame: u32,
    notify: Option<Arc<dyn RingNotify>>,
    drops_rx: AtomicU64,
}

// SAFETY: the data pointer targets shared memory whose cross-thread access
// is governed entirely by the acquire/release head/tail protocol below.
// Each cursor is advanced only by its single owning thread.
unsafe impl Send for ShmRingSpsc {}
unsafe impl Sync for ShmRingSpsc {}

impl ShmRingSpsc {
    /// Bind to externally-owned ring memory. Performs no allocation.
    ///
    /// # Safety contract (checked where possible)
    /// `hdr` and `data` must point into a live mapping that outlives the
    /// ring; `data` must span `hdr.capacity` bytes.
    pub fn attach(
        hdr: &'static ShmRingHeader,
        data: *mut u8,
        notify: Option<Arc<dyn RingNotify>>,
        max_frame: u32,
    ) -> Result<Self> {
        let capacity = hdr.capacity;
        let min = align_record(RECORD_HDR_SIZE + max_frame as usize) + RECORD_ALIGN;
        if capacity as usize % RECORD_ALIGN != 0 || (capacity as usize) < min {
            return Err(ShmError::RegionTooSmall {
                have: capacity as usize,
                need: min,
            });
        }
        Ok(Self {
            hdr,
            data,
            capacity,
            max_frame,
            notify,
            drops_rx: AtomicU64::new(0),
        })
    }

    /// Push one framed record. Returns `false` when the record is rejected
    /// (empty or oversized payload) or dropped for lack of space; the ring
    /// never blocks and never partially writes a visible record.
    pub fn push(&self, payload: &[u8]) -> bool {
        let len = payload.len();
        if len == 0 || len > self.max_frame as usize {
            return false;
        }
        let cost = align_record(RECORD_HDR_SIZE + len) as u32;

        let head = self.hdr.head.load(Ordering::Relaxed);
        let tail = self.hdr.tail.load(Ordering::Acquire);
        let used = if head >= tail {
            head - tail
        } else {
            self.capacity - tail + head
        };
        // One byte of slack keeps head == tail an unambiguous "empty".
        let free = self.capacity - used - 1;
        if cost > free {
            self.hdr.drops.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut write_at = head;
        let contiguous = self.capacity - head;
        if cost > contiguous {
            // Reachable only when head >= tail, so the tail of the buffer is
            // all free: leave a WRAP marker and restart at offset 0. The
            // marker always fits because head and capacity are both
            // record-aligned.
            if cost >= tail {
                self.hdr.drops.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            // SAFETY: head + RECORD_HDR_SIZE <= capacity per the alignment
            // argument above; the producer owns [head, capacity).
            unsafe {
                self.write_record_hdr(head, 0, 0);
            }
            write_at = 0;
        }

        let seq = self.hdr.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        // SAFETY: [write_at, write_at + cost) is free space owned by the
        // producer until head is published; cost <= capacity - write_at.
        unsafe {
            self.write_record_hdr(write_at, len as u32, seq as u32);
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.data.add(write_at as usize + RECORD_HDR_SIZE),
                len,
            );
        }

        let mut new_head = write_at + cost;
        if new_head == self.capacity {
            new_head = 0;
        }
        // Release pairs with the consumer's acquire load of head: all
        // payload bytes are visible before the new head is.
        self.hdr.head.store(new_head, Ordering::Release);

        if let Some(notify) = &self.notify {
            notify.post();
        }
        true
    }

    /// Copy the next record into `out`. On empty, waits on the notify (or
    /// polls, if none is attached) up to `timeout` and retries once.
    /// `None` timeout means wait forever.
    pub fn pop(&self, out: &mut [u8], timeout: Option<Duration>) -> Option<usize> {
        if let Some(n) = self.try_pop(out) {
            return Some(n);
        }
        match &self.notify {
            Some(notify) => {
                if !notify.wait(timeout) {
                    return None;
                }
                self.try_pop(out)
            }
            None => {
                let deadline = timeout.map(|t| Instant::now() + t);
                loop {
                    if let Some(n) = self.try_pop(out) {
                        return Some(n);
                    }
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return None;
                        }
                    }
                    std::thread::sleep(Duration::from_micros(50));
                }
            }
        }
    }

    /// Non-blocking single-record read.
    pub fn try_pop(&self, out: &mut [u8]) -> Option<usize> {
        let (rec_at, len, cost) = self.next_record()?;
        if len as usize > out.len() {
            self.drops_rx.fetch_add(1, Ordering::Relaxed);
            self.consume(rec_at, cost);
            return None;
        }
        // SAFETY: next_record validated [rec_at, rec_at + cost) against
        // head; the payload stays valid until tail is advanced.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.data.add(rec_at as usize + RECORD_HDR_SIZE),
                out.as_mut_ptr(),
                len as usize,
            );
        }
        self.consume(rec_at, cost);
        Some(len as usize)
    }

    /// Batch-read up to `max_count` records, handing each payload to `f`
    /// zero-copy. The slice points into the shared buffer and is valid only
    /// for the duration of the callback. Returns the number delivered.
    pub fn drain(&self, max_count: usize, mut f: impl FnMut(&[u8])) -> usize {
        let mut count = 0;
        while count < max_count {
            let Some((rec_at, len, cost)) = self.next_record() else {
                break;
            };
            // SAFETY: as in try_pop; the callback borrow ends before the
            // tail store in consume() releases the bytes to the producer.
            let payload = unsafe {
                std::slice::from_raw_parts(self.data.add(rec_at as usize + RECORD_HDR_SIZE), len as usize)
            };
            f(payload);
            self.consume(rec_at, cost);
            count += 1;
        }
        count
    }

    /// Block until the producer posts the notify, up to `timeout`
    /// (`None` = forever). Without a notify this sleeps out the timeout in
    /// small slices. Returns `false` on timeout.
    pub fn wait_for_data(&self, timeout: Option<Duration>) -> bool {
        match &self.notify {
            Some(notify) => notify.wait(timeout),
            None => {
                let deadline = timeout.map(|t| Instant::now() + t);
                loop {
                    let tail = self.hdr.tail.load(Ordering::Relaxed);
                    if self.hdr.head.load(Ordering::Acquire) != tail {
                        return true;
                    }
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return false;
                        }
                    }
                    std::thread::sleep(Duration::from_micros(50));
                }
            }
        }
    }

    /// Post the notify without pushing data. Used on shutdown so a blocked
    /// consumer observes its stop flag.
    pub fn wake(&self) {
        if let Some(notify) = &self.notify {
            notify.post();
        }
    }

    /// Producer-side drop counter (push refused for lack of space).
    pub fn drops_tx(&self) -> u64 {
        self.hdr.drops.load(Ordering::Relaxed)
    }

    /// Consumer-side drop counter (corruption resets, undersized reads).
    pub fn drops_rx(&self) -> u64 {
        self.drops_rx.load(Ordering::Relaxed)
    }

    /// Record a consumer-side drop decided above the ring (for example a
    /// record whose frame header failed validation).
    pub fn note_rx_drop(&self) {
        self.drops_rx.fetch_add(1, Ordering::Relaxed);
    }

    /// Records pushed since initialization.
    pub fn seq(&self) -> u64 {
        self.hdr.seq.load(Ordering::Relaxed)
    }

    /// Locate the next real record, consuming WRAP markers on the way.
    /// On a corrupted record the consumer resets `tail` to 0: deliberate
    /// fail-fast desynchronization recovery, not record skipping.
    fn next_record(&self) -> Option<(u32, u32, u32)> {
        loop {
            let tail = self.hdr.tail.load(Ordering::Relaxed);
            // Acquire pairs with the producer's release store: once head is
            // seen, the record bytes behind it are visible.
            let head = self.hdr.head.load(Ordering::Acquire);
            if head == tail {
                return None;
            }

            // SAFETY: tail < capacity and the producer cannot touch
            // [tail, head) until tail advances past it.
            let rec = unsafe { self.read_record_hdr(tail) };
            if rec.total_len == 0 {
                self.hdr.tail.store(0, Ordering::Release);
                continue;
            }
            if rec.total_len > self.max_frame {
                warn!(
                    total_len = rec.total_len,
                    max_frame = self.max_frame,
                    "corrupted ring record, resetting consumer cursor"
                );
                self.drops_rx.fetch_add(1, Ordering::Relaxed);
                self.hdr.tail.store(0, Ordering::Release);
                return None;
            }
            let cost = align_record(RECORD_HDR_SIZE + rec.total_len as usize) as u32;
            return Some((tail, rec.total_len, cost));
        }
    }

    fn consume(&self, rec_at: u32, cost: u32) {
        let mut new_tail = rec_at + cost;
        if new_tail == self.capacity {
            new_tail = 0;
        }
        // Release pairs with the producer's acquire-free computation so it
        // never reuses bytes the consumer is still reading.
        self.hdr.tail.store(new_tail, Ordering::Release);
    }

    unsafe fn write_record_hdr(&self, at: u32, total_len: u32, seq: u32) {
        let hdr = RecordHdr {
            total_len,
            seq,
            crc32: 0,
        };
        std::ptr::write_unaligned(self.data.add(at as usize) as *mut RecordHdr, hdr);
    }

    unsafe fn read_record_hdr(&self, at: u32) -> RecordHdr {
        std::ptr::read_unaligned(self.data.add(at as usize) as *const RecordHdr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::RECORD_ALIGN;
    use std::sync::{Condvar, Mutex};

    #[repr(align(64))]
    struct HeaderCell([u8; 64]);

    fn leaked_ring(capacity: u32, max_frame: u32, notify: Option<Arc<dyn RingNotify>>) -> ShmRingSpsc {
        let cell: &'static mut HeaderCell = Box::leak(Box::new(HeaderCell([0u8; 64])));
        let hdr = unsafe { ShmRingHeader::init(cell.0.as_mut_ptr(), capacity) };
        let data: &'static mut [u8] = Vec::leak(vec![0u8; capacity as usize]);
        ShmRingSpsc::attach(hdr, data.as_mut_ptr(), notify, max_frame).unwrap()
    }

    struct CondvarNotify {
        count: Mutex<u32>,
        cv: Condvar,
    }

    impl CondvarNotify {
        fn new() -> Self {
            Self {
                count: Mutex::new(0),
                cv: Condvar::new(),
            }
        }
    }

    impl RingNotify for CondvarNotify {
        fn post(&self) {
            let mut count = self.count.lock().unwrap();
            *count += 1;
            self.cv.notify_one();
        }

        fn wait(&self, timeout: Option<Duration>) -> bool {
            let mut count = self.count.lock().unwrap();
            let deadline = timeout.map(|t| Instant::now() + t);
            while *count == 0 {
                match deadline {
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return false;
                        }
                        let (guard, res) = self.cv.wait_timeout(count, d - now).unwrap();
                        count = guard;
                        if res.timed_out() && *count == 0 {
                            return false;
                        }
                    }
                    None => count = self.cv.wait(count).unwrap(),
                }
            }
            *count -= 1;
            true
        }
    }

    #[test]
    fn attach_rejects_tiny_capacity() {
        let cell: &'static mut HeaderCell = Box::leak(Box::new(HeaderCell([0u8; 64])));
        let hdr = unsafe { ShmRingHeader::init(cell.0.as_mut_ptr(), 32) };
        let data: &'static mut [u8] = Vec::leak(vec![0u8; 32]);
        let result = ShmRingSpsc::attach(hdr, data.as_mut_ptr(), None, 256);
        assert!(matches!(result, Err(ShmError::RegionTooSmall { .. })));
    }

    #[test]
    fn push_rejects_empty_and_oversized() {
        let ring = leaked_ring(4096, 256, None);
        assert!(!ring.push(b""));
        assert!(!ring.push(&vec![0u8; 257]));
        assert_eq!(ring.drops_tx(), 0);
    }

    #[test]
    fn fifo_order_and_content() {
        let ring = leaked_ring(4096, 256, None);

        let messages: Vec<Vec<u8>> = (0u8..20)
            .map(|i| vec![i; 1 + (i as usize * 7) % 100])
            .collect();
        for msg in &messages {
            assert!(ring.push(msg));
        }

        let mut buf = [0u8; 256];
        for msg in &messages {
            let n = ring.try_pop(&mut buf).expect("record expected");
            assert_eq!(&buf[..n], msg.as_slice());
        }
        assert!(ring.try_pop(&mut buf).is_none());
    }

    #[test]
    fn drain_matches_push_sequence() {
        let ring = leaked_ring(4096, 256, None);
        for i in 0u8..10 {
            assert!(ring.push(&[i; 33]));
        }

        let mut seen = Vec::new();
        let n = ring.drain(16, |payload| seen.push(payload.to_vec()));
        assert_eq!(n, 10);
        for (i, payload) in seen.iter().enumerate() {
            assert_eq!(payload.as_slice(), &[i as u8; 33]);
        }
    }

    #[test]
    fn drain_respects_max_count() {
        let ring = leaked_ring(4096, 256, None);
        for i in 0u8..10 {
            assert!(ring.push(&[i]));
        }
        let mut count = 0;
        assert_eq!(ring.drain(4, |_| count += 1), 4);
        assert_eq!(count, 4);
        assert_eq!(ring.drain(usize::MAX, |_| {}), 6);
    }

    #[test]
    fn wraparound_preserves_records() {
        // Capacity small enough that repeated pushes must cross the
        // physical end many times; no payload byte may be split.
        let ring = leaked_ring(512, 128, None);
        let mut buf = [0u8; 128];

        for round in 0u32..200 {
            let len = 1 + (round as usize % 100);
            let byte = (round % 251) as u8;
            let msg = vec![byte; len];
            assert!(ring.push(&msg), "push failed at round {round}");
            let n = ring.try_pop(&mut buf).expect("record expected");
            assert_eq!(&buf[..n], msg.as_slice(), "mismatch at round {round}");
        }
    }

    #[test]
    fn overflow_drops_and_recovers() {
        let ring = leaked_ring(256, 64, None);

        let mut pushed = 0;
        while ring.push(&[0xAB; 48]) {
            pushed += 1;
            assert!(pushed < 100, "ring never filled");
        }
        assert!(ring.drops_tx() >= 1);

        // Drain everything, then pushes must succeed again.
        let mut buf = [0u8; 64];
        let mut popped = 0;
        while ring.try_pop(&mut buf).is_some() {
            assert_eq!(&buf[..48], &[0xAB; 48]);
            popped += 1;
        }
        assert_eq!(popped, pushed);
        assert!(ring.push(&[0xCD; 48]));
        let n = ring.try_pop(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0xCD; 48]);
    }

    #[test]
    fn corrupted_record_resets_consumer() {
        let ring = leaked_ring(4096, 256, None);
        assert!(ring.push(&[1u8; 16]));

        // Scribble an impossible length over the record header.
        unsafe {
            ring.write_record_hdr(0, 0xFFFF, 0);
        }

        let mut buf = [0u8; 256];
        assert!(ring.try_pop(&mut buf).is_none());
        assert_eq!(ring.drops_rx(), 1);
    }

    #[test]
    fn pop_times_out_without_data() {
        let ring = leaked_ring(4096, 256, None);
        let mut buf = [0u8; 256];
        let start = Instant::now();
        assert!(ring.pop(&mut buf, Some(Duration::from_millis(20))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pop_wakes_on_notify() {
        let notify: Arc<dyn RingNotify> = Arc::new(CondvarNotify::new());
        let ring = Arc::new(leaked_ring(4096, 256, Some(Arc::clone(&notify))));

        let producer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                assert!(ring.push(b"wake up"));
            })
        };

        let mut buf = [0u8; 256];
        let n = ring
            .pop(&mut buf, Some(Duration::from_secs(2)))
            .expect("should receive pushed record");
        assert_eq!(&buf[..n], b"wake up");
        producer.join().unwrap();
    }

    #[test]
    fn concurrent_producer_consumer() {
        let ring = Arc::new(leaked_ring(2048, 64, None));
        let total = 500u32;

        let consumer = {
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                let mut buf = [0u8; 64];
                let mut next = 0u32;
                while next < total {
                    if let Some(n) = ring.try_pop(&mut buf) {
                        assert_eq!(n, 4);
                        let value = u32::from_le_bytes(buf[..4].try_into().unwrap());
                        assert_eq!(value, next, "FIFO violated");
                        next += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut sent = 0u32;
        while sent < total {
            if ring.push(&sent.to_le_bytes()) {
                sent += 1;
            } else {
                std::thread::yield_now();
            }
        }
        consumer.join().unwrap();
        assert_eq!(ring.seq(), u64::from(total));
    }

    #[test]
    fn record_costs_stay_aligned() {
        let ring = leaked_ring(1024, 128, None);
        assert!(ring.push(&[7u8; 5]));
        let head = ring.hdr.head.load(Ordering::Relaxed);
        assert_eq!(head as usize % RECORD_ALIGN, 0);
    }
}
