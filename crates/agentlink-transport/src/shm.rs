//! Bidirectional shared-memory channel composed from two SPSC rings.
//!
//! Ring A always carries legacy-to-agent traffic and ring B the reverse;
//! which ring a transport pushes to follows from its configured side. The
//! creator lays out the region and unlinks every name on close, joiners
//! attach to what the creator built.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, info, warn};

use agentlink_shm::{
    region_size, ring_b_data_offset, RingNotify, ShmError, ShmGlobalHeader, ShmNotify, ShmRegion,
    ShmRingHeader, ShmRingSpsc, RING_A_DATA_OFFSET, RING_A_HEADER_OFFSET, RING_B_HEADER_OFFSET,
};
use agentlink_wire::{decode_frame, encode_frame, FrameHeader, WireError, HEADER_SIZE};

use crate::config::{ShmConfig, ShmRole};
use crate::error::{Result, TransportError};
use crate::traits::{now_ns, DataTransport, FrameHandler, TransportStats};

/// Records drained from the inbound ring per wakeup before re-waiting.
const DRAIN_BATCH: usize = 16;

/// Same-host frame transport over a named shared-memory region.
pub struct ShmTransport {
    cfg: ShmConfig,
    // Dropped in field order: rings release their borrows of the mapping
    // before `region` unmaps it.
    tx_ring: Option<Arc<ShmRingSpsc>>,
    rx_ring: Option<Arc<ShmRingSpsc>>,
    global: Option<&'static ShmGlobalHeader>,
    region: Option<ShmRegion>,
    handler: Option<FrameHandler>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl ShmTransport {
    pub fn new(cfg: ShmConfig) -> Self {
        Self {
            cfg,
            tx_ring: None,
            rx_ring: None,
            global: None,
            region: None,
            handler: None,
            running: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
        }
    }

    /// Read the epoch out of a leftover region from a previous run, if one
    /// exists and carries a valid header. Returns 0 otherwise, so the new
    /// region starts at epoch 1.
    fn salvage_epoch(&self) -> u32 {
        let stale = match ShmRegion::open(&self.cfg.shm_name, 64) {
            Ok(region) => region,
            Err(_) => return 0,
        };
        // SAFETY: the mapping spans at least these 64 bytes and stays alive
        // until `stale` drops at the end of this function.
        let hdr = unsafe { ShmGlobalHeader::attach(stale.as_ptr()) };
        match hdr.validate(self.cfg.ring_bytes, self.cfg.max_frame) {
            Ok(()) => hdr.epoch(),
            Err(_) => 0,
        }
    }

    fn open_as_creator(&mut self) -> Result<()> {
        let prev_epoch = self.salvage_epoch();
        let size = region_size(self.cfg.ring_bytes as usize);
        let region = ShmRegion::create(&self.cfg.shm_name, size)?;
        let base = region.as_ptr();

        // SAFETY: the freshly created mapping spans `size` >= 192 bytes and
        // no peer can observe it before mark_ready below.
        let (global, ring_a_hdr, ring_b_hdr) = unsafe {
            let global = ShmGlobalHeader::init(
                base,
                self.cfg.ring_bytes,
                self.cfg.max_frame,
                prev_epoch,
            );
            let a = ShmRingHeader::init(base.add(RING_A_HEADER_OFFSET), self.cfg.ring_bytes);
            let b = ShmRingHeader::init(base.add(RING_B_HEADER_OFFSET), self.cfg.ring_bytes);
            (global, a, b)
        };

        let notify_la: Arc<dyn RingNotify> = Arc::new(ShmNotify::create(&self.cfg.notify_la)?);
        let notify_al: Arc<dyn RingNotify> = Arc::new(ShmNotify::create(&self.cfg.notify_al)?);

        self.attach_rings(base, ring_a_hdr, ring_b_hdr, notify_la, notify_al)?;
        global.mark_ready();
        info!(
            name = %self.cfg.shm_name,
            epoch = global.epoch(),
            ring_bytes = self.cfg.ring_bytes,
            "shm channel created"
        );
        self.global = Some(global);
        self.region = Some(region);
        Ok(())
    }

    fn open_as_joiner(&mut self) -> Result<()> {
        let size = region_size(self.cfg.ring_bytes as usize);
        let region = ShmRegion::open(&self.cfg.shm_name, size)?;
        let base = region.as_ptr();

        // SAFETY: the mapping spans `size` bytes and outlives the rings
        // because `region` is stored alongside them and dropped last.
        let global = unsafe { ShmGlobalHeader::attach(base) };
        let deadline = Instant::now() + Duration::from_millis(u64::from(self.cfg.ready_timeout_ms));
        while !global.is_ready() {
            if Instant::now() >= deadline {
                return Err(ShmError::NotReady.into());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        global.validate(self.cfg.ring_bytes, self.cfg.max_frame)?;

        let (ring_a_hdr, ring_b_hdr) = unsafe {
            (
                ShmRingHeader::attach(base.add(RING_A_HEADER_OFFSET)),
                ShmRingHeader::attach(base.add(RING_B_HEADER_OFFSET)),
            )
        };

        let notify_la: Arc<dyn RingNotify> = Arc::new(ShmNotify::open(&self.cfg.notify_la)?);
        let notify_al: Arc<dyn RingNotify> = Arc::new(ShmNotify::open(&self.cfg.notify_al)?);

        self.attach_rings(base, ring_a_hdr, ring_b_hdr, notify_la, notify_al)?;
        info!(
            name = %self.cfg.shm_name,
            epoch = global.epoch(),
            "shm channel joined"
        );
        self.global = Some(global);
        self.region = Some(region);
        Ok(())
    }

    /// Bind both rings to their header/buffer/semaphore triples. The agent
    /// side transmits on ring B and receives on ring A; the legacy side the
    /// reverse.
    fn attach_rings(
        &mut self,
        base: *mut u8,
        ring_a_hdr: &'static ShmRingHeader,
        ring_b_hdr: &'static ShmRingHeader,
        notify_la: Arc<dyn RingNotify>,
        notify_al: Arc<dyn RingNotify>,
    ) -> Result<()> {
        let a_data = unsafe { base.add(RING_A_DATA_OFFSET) };
        let b_data = unsafe { base.add(ring_b_data_offset(self.cfg.ring_bytes as usize)) };

        let ring_a = ShmRingSpsc::attach(ring_a_hdr, a_data, Some(notify_la), self.cfg.max_frame)?;
        let ring_b = ShmRingSpsc::attach(ring_b_hdr, b_data, Some(notify_al), self.cfg.max_frame)?;

        let (tx, rx) = match self.cfg.side {
            crate::config::ShmSide::Agent => (ring_b, ring_a),
            crate::config::ShmSide::Legacy => (ring_a, ring_b),
        };
        self.tx_ring = Some(Arc::new(tx));
        self.rx_ring = Some(Arc::new(rx));
        Ok(())
    }
}

impl DataTransport for ShmTransport {
    fn open(&mut self) -> Result<()> {
        if self.region.is_some() {
            return Ok(());
        }
        match self.cfg.role {
            ShmRole::Creator => self.open_as_creator(),
            ShmRole::Joiner => self.open_as_joiner(),
        }
    }

    fn close(&mut self) {
        self.stop();
        self.tx_ring = None;
        self.rx_ring = None;
        self.global = None;
        self.region = None;
        if self.cfg.role == ShmRole::Creator {
            let _ = ShmRegion::unlink(&self.cfg.shm_name);
            let _ = ShmNotify::unlink(&self.cfg.notify_la);
            let _ = ShmNotify::unlink(&self.cfg.notify_al);
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.rx_thread.is_some() {
            return Ok(());
        }
        let rx_ring = Arc::clone(self.rx_ring.as_ref().ok_or(TransportError::NotOpen)?);
        let handler = self
            .handler
            .as_ref()
            .cloned()
            .ok_or(TransportError::HandlerMissing)?;
        let running = Arc::clone(&self.running);
        let wait = match self.cfg.wait_ms {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        };
        let max_frame = self.cfg.max_frame as usize;

        running.store(true, Ordering::Release);
        let thread = std::thread::Builder::new()
            .name("agentlink-shm-rx".into())
            .spawn(move || {
                receive_loop(&rx_ring, &handler, &running, wait, max_frame);
            })?;
        self.rx_thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(ring) = &self.rx_ring {
            // One post so a thread blocked in wait_for_data observes the
            // cleared flag.
            ring.wake();
        }
        if let Some(thread) = self.rx_thread.take() {
            let _ = thread.join();
        }
    }

    fn set_on_frame(&mut self, handler: FrameHandler) {
        self.handler = Some(handler);
    }

    fn send_frame(&self, frame_type: u16, corr_id: u32, payload: &[u8]) -> Result<()> {
        let ring = self.tx_ring.as_ref().ok_or(TransportError::NotOpen)?;
        let total = HEADER_SIZE + payload.len();
        if total > self.cfg.max_frame as usize {
            return Err(WireError::PayloadTooLarge {
                size: payload.len(),
                max: self.cfg.max_frame as usize - HEADER_SIZE,
            }
            .into());
        }
        let header = FrameHeader::new(frame_type, corr_id, payload.len(), now_ns());
        let mut buf = BytesMut::with_capacity(total);
        encode_frame(&header, payload, &mut buf)?;
        if ring.push(&buf) {
            Ok(())
        } else {
            Err(TransportError::ChannelFull)
        }
    }

    fn is_open(&self) -> bool {
        self.region.is_some()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.rx_thread.is_some()
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            epoch: self.global.map_or(0, |g| g.epoch()),
            drops_tx: self.tx_ring.as_ref().map_or(0, |r| r.drops_tx()),
            drops_rx: self.rx_ring.as_ref().map_or(0, |r| r.drops_rx()),
        }
    }
}

impl Drop for ShmTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(
    ring: &ShmRingSpsc,
    handler: &FrameHandler,
    running: &AtomicBool,
    wait: Option<Duration>,
    max_frame: usize,
) {
    debug!("shm receive thread up");
    while running.load(Ordering::Acquire) {
        let drained = ring.drain(DRAIN_BATCH, |record| {
            match decode_frame(record, max_frame) {
                Ok((header, payload)) => handler(&header, payload),
                Err(e) => {
                    ring.note_rx_drop();
                    warn!(error = %e, len = record.len(), "dropping malformed ring record");
                }
            }
        });
        if drained == 0 {
            ring.wait_for_data(wait);
        }
    }
    debug!("shm receive thread down");
}
