//! Connected-datagram transport: one frame per datagram.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use agentlink_wire::{decode_frame, encode_frame, FrameHeader, HEADER_SIZE};

use crate::config::UdpConfig;
use crate::error::{Result, TransportError};
use crate::traits::{now_ns, DataTransport, FrameHandler, TransportStats};

/// Best-effort frame transport over a connected UDP socket.
///
/// Datagram boundaries carry frame boundaries, so no reassembly is needed;
/// the tradeoff is that frames may be lost or reordered in flight.
pub struct UdpTransport {
    cfg: UdpConfig,
    socket: Option<Arc<UdpSocket>>,
    handler: Option<FrameHandler>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    drops_tx: Arc<AtomicU64>,
    drops_rx: Arc<AtomicU64>,
}

impl UdpTransport {
    pub fn new(cfg: UdpConfig) -> Self {
        Self {
            cfg,
            socket: None,
            handler: None,
            running: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
            drops_tx: Arc::new(AtomicU64::new(0)),
            drops_rx: Arc::new(AtomicU64::new(0)),
        }
    }

    fn bind_socket(&self) -> Result<UdpSocket> {
        let domain = Domain::for_address(self.cfg.local_addr);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&self.cfg.local_addr.into())?;
        socket.connect(&self.cfg.remote_addr.into())?;

        let socket: UdpSocket = socket.into();
        // The read timeout is what lets the receive loop observe the stop
        // flag; zero would mean block forever, so clamp to 1ms.
        let timeout = Duration::from_millis(u64::from(self.cfg.recv_timeout_ms.max(1)));
        socket.set_read_timeout(Some(timeout))?;
        Ok(socket)
    }
}

impl DataTransport for UdpTransport {
    fn open(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = self.bind_socket()?;
        debug!(
            local = %self.cfg.local_addr,
            remote = %self.cfg.remote_addr,
            "udp transport open"
        );
        self.socket = Some(Arc::new(socket));
        Ok(())
    }

    fn close(&mut self) {
        self.stop();
        self.socket = None;
    }

    fn start(&mut self) -> Result<()> {
        if self.rx_thread.is_some() {
            return Ok(());
        }
        let socket = Arc::clone(self.socket.as_ref().ok_or(TransportError::NotOpen)?);
        let handler = self
            .handler
            .as_ref()
            .cloned()
            .ok_or(TransportError::HandlerMissing)?;
        let running = Arc::clone(&self.running);
        let drops_rx = Arc::clone(&self.drops_rx);
        let max_frame = self.cfg.max_frame as usize;

        running.store(true, Ordering::Release);
        let thread = std::thread::Builder::new()
            .name("agentlink-udp-rx".into())
            .spawn(move || {
                receive_loop(&socket, &handler, &running, &drops_rx, max_frame);
            })?;
        self.rx_thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.rx_thread.take() {
            let _ = thread.join();
        }
    }

    fn set_on_frame(&mut self, handler: FrameHandler) {
        self.handler = Some(handler);
    }

    fn send_frame(&self, frame_type: u16, corr_id: u32, payload: &[u8]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        let header = FrameHeader::new(frame_type, corr_id, payload.len(), now_ns());
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        encode_frame(&header, payload, &mut buf)?;
        match socket.send(&buf) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                self.drops_tx.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::ChannelFull)
            }
            Err(e) => {
                self.drops_tx.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.rx_thread.is_some()
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            epoch: 0,
            drops_tx: self.drops_tx.load(Ordering::Relaxed),
            drops_rx: self.drops_rx.load(Ordering::Relaxed),
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(
    socket: &UdpSocket,
    handler: &FrameHandler,
    running: &AtomicBool,
    drops_rx: &AtomicU64,
    max_frame: usize,
) {
    let mut buf = vec![0u8; HEADER_SIZE + max_frame];
    while running.load(Ordering::Acquire) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!(error = %e, "udp recv failed");
                continue;
            }
        };
        match decode_frame(&buf[..n], max_frame) {
            Ok((header, payload)) => handler(&header, payload),
            Err(e) => {
                drops_rx.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, len = n, "dropping malformed datagram");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn pair() -> (UdpTransport, UdpTransport) {
        // Bind both ends on ephemeral ports first to learn their addresses.
        let a_probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b_probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let a_addr = a_probe.local_addr().unwrap();
        let b_addr = b_probe.local_addr().unwrap();
        drop(a_probe);
        drop(b_probe);

        let a = UdpTransport::new(UdpConfig {
            local_addr: a_addr,
            remote_addr: b_addr,
            recv_timeout_ms: 20,
            max_frame: 1024,
        });
        let b = UdpTransport::new(UdpConfig {
            local_addr: b_addr,
            remote_addr: a_addr,
            recv_timeout_ms: 20,
            max_frame: 1024,
        });
        (a, b)
    }

    #[test]
    fn send_requires_open() {
        let (a, _b) = pair();
        assert!(matches!(
            a.send_frame(0x1000, 1, b"x"),
            Err(TransportError::NotOpen)
        ));
    }

    #[test]
    fn start_requires_handler() {
        let (mut a, _b) = pair();
        a.open().unwrap();
        assert!(matches!(a.start(), Err(TransportError::HandlerMissing)));
    }

    #[test]
    fn frame_round_trip() {
        let (mut a, mut b) = pair();
        let (tx, rx) = mpsc::channel::<(u16, u32, Vec<u8>)>();
        b.set_on_frame(Arc::new(move |header, payload| {
            let _ = tx.send((header.frame_type, header.corr_id, payload.to_vec()));
        }));
        b.open().unwrap();
        b.start().unwrap();
        a.open().unwrap();

        a.send_frame(0x2000, 42, b"hello over udp").unwrap();

        let (frame_type, corr_id, payload) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame_type, 0x2000);
        assert_eq!(corr_id, 42);
        assert_eq!(payload, b"hello over udp");

        b.stop();
        assert!(!b.is_running());
    }

    #[test]
    fn malformed_datagram_is_counted_not_delivered() {
        let (mut a, mut b) = pair();
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        b.set_on_frame(Arc::new(move |_, payload| {
            let _ = tx.send(payload.to_vec());
        }));
        b.open().unwrap();
        b.start().unwrap();
        a.open().unwrap();

        // Raw garbage straight past the framing layer. Sent from a's own
        // socket so b's connected filter lets it through.
        a.socket.as_ref().unwrap().send(&[0xFFu8; 30]).unwrap();

        // Then a good frame; only it may arrive.
        a.send_frame(0x1000, 7, b"good").unwrap();
        let payload = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(payload, b"good");
        assert!(rx.try_recv().is_err());
        assert!(b.stats().drops_rx >= 1);
        b.stop();
    }
}
