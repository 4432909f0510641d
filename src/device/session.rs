// src/device/session.rs  -  One connected N1: handshake, blocking read loop, teardown
//
// Runs on its own thread for the lifetime of one device connection.
// Decoding and classification happen inline so events leave in exactly the
// order the reports arrived; the sink must not block (it only enqueues).
//
//   Connecting ── handshake ok ──► Connected ── read error / unplug ──► (released)
//        │                            ▲   │
//        │                            └───┘ report
//        └── handshake failed ──► Error ── cooldown ──► (released, watcher retries)
use super::protocol::{self, RawInputEvent, REPORT_LEN, SOFTWARE_MODE_PACKET};
use super::{ConnState, DeviceHandle, DeviceRegistry, ReadResult};
use crate::classifier::Classifier;
use crate::error::{BridgeError, BridgeResult};
use crate::router::EventSink;
use crate::shutdown::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unknown reports are counted, and one in this many is logged.
const UNKNOWN_SAMPLE_EVERY: u64 = 256;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub debounce:           Duration,
    pub read_poll:          Duration,
    pub handshake_settle:   Duration,
    pub handshake_cooldown: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce:           crate::classifier::DEFAULT_DEBOUNCE,
            read_poll:          Duration::from_millis(250),
            handshake_settle:   Duration::from_millis(50),
            handshake_cooldown: Duration::from_millis(1000),
        }
    }
}

/// Identity + liveness of one connection, handed to the sink with every
/// event.  Work queued on behalf of a session checks `is_live()` so results
/// arriving after the device is gone can be dropped.
#[derive(Debug, Clone)]
pub struct SessionTag {
    pub device_id: String,
    live:          Arc<AtomicBool>,
}

impl SessionTag {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self { device_id: device_id.into(), live: Arc::new(AtomicBool::new(true)) }
    }

    pub fn is_live(&self) -> bool { self.live.load(Ordering::Acquire) }

    pub fn end(&self) { self.live.store(false, Ordering::Release); }
}

#[derive(Debug)]
pub enum SessionEnd {
    HandshakeFailed(BridgeError),
    Lost(BridgeError),
    Shutdown,
}

pub struct DeviceSession {
    handle:   DeviceHandle,
    cfg:      SessionConfig,
    registry: DeviceRegistry,
    sink:     Arc<dyn EventSink>,
    shutdown: Shutdown,
}

impl DeviceSession {
    pub fn new(
        handle:   DeviceHandle,
        cfg:      SessionConfig,
        registry: DeviceRegistry,
        sink:     Arc<dyn EventSink>,
        shutdown: Shutdown,
    ) -> Self {
        Self { handle, cfg, registry, sink, shutdown }
    }

    fn transition(&mut self, state: ConnState) {
        log::debug!("[session] {}: {:?} → {:?}", self.handle.id, self.handle.state, state);
        self.handle.state = state;
        self.registry.set(&self.handle.id, state);
    }

    /// Drive the connection until it is lost or shutdown trips.  Always
    /// releases the registry slot and wakes the watcher on the way out.
    pub fn run(mut self) -> SessionEnd {
        let end = self.connect_and_read();
        self.registry.release(&self.handle.id);
        self.shutdown.wake();
        end
    }

    fn connect_and_read(&mut self) -> SessionEnd {
        if let Err(e) = self.handshake() {
            log::warn!("[session] {e}  → retry after {:?}", self.cfg.handshake_cooldown);
            self.transition(ConnState::Error);
            if self.shutdown.sleep(self.cfg.handshake_cooldown) {
                return SessionEnd::Shutdown;
            }
            return SessionEnd::HandshakeFailed(e);
        }

        // Classifier state is scoped to this connection and dies with it.
        let mut classifier = Classifier::new(self.cfg.debounce);

        self.transition(ConnState::Connected);
        log::info!(
            "[session] {} ready at {} (protocol v{}, debounce {:?})",
            self.handle.id, self.handle.info.path, self.handle.protocol, classifier.debounce()
        );

        let tag = SessionTag::new(self.handle.id.clone());
        self.sink.device_connected(&tag);
        let end = self.read_loop(&mut classifier, &tag);

        tag.end();
        if classifier.is_pressed() {
            log::debug!("[session] {}: dial was held at teardown, release dropped", tag.device_id);
        }
        classifier.reset();
        self.transition(ConnState::Disconnected);
        self.sink.device_disconnected(&tag);

        match &end {
            SessionEnd::Lost(e) => log::warn!("[session] {e}  → re-enumerating"),
            SessionEnd::Shutdown => log::info!("[session] {} closed (shutdown)", tag.device_id),
            SessionEnd::HandshakeFailed(_) => {}
        }
        end
    }

    /// Put the device into software mode (protocol v3) and let it settle.
    fn handshake(&mut self) -> BridgeResult<()> {
        let id = self.handle.id.clone();
        let written = self.handle.transport.write(&SOFTWARE_MODE_PACKET)
            .map_err(|e| match e {
                BridgeError::Handshake { .. } => e,
                other => BridgeError::Handshake { id: id.clone(), reason: other.to_string() },
            })?;
        if written < SOFTWARE_MODE_PACKET.len() {
            return Err(BridgeError::Handshake {
                id,
                reason: format!("short write ({written}/{} bytes)", SOFTWARE_MODE_PACKET.len()),
            });
        }
        log::debug!("[session] {}: software mode requested", self.handle.id);
        self.shutdown.sleep(self.cfg.handshake_settle);
        Ok(())
    }

    fn read_loop(&mut self, classifier: &mut Classifier, tag: &SessionTag) -> SessionEnd {
        let mut buf = [0u8; REPORT_LEN];
        let mut unknown: u64 = 0;

        let end = loop {
            if self.shutdown.is_triggered() {
                break SessionEnd::Shutdown;
            }
            match self.handle.transport.read(&mut buf, self.cfg.read_poll) {
                ReadResult::Report(n) => {
                    let report = &buf[..n.min(buf.len())];
                    let raw = protocol::decode_report(report);
                    if let RawInputEvent::Unknown(_) = raw {
                        unknown += 1;
                        if unknown % UNKNOWN_SAMPLE_EVERY == 1 {
                            log::debug!(
                                "[decoder] {}: unrecognised report #{unknown}: {}",
                                tag.device_id, protocol::hex_prefix(report, 12)
                            );
                        }
                        continue;
                    }
                    if let Some(event) = classifier.classify(&raw, Instant::now()) {
                        log::debug!("[session] {}: {:?}", tag.device_id, event.kind);
                        self.sink.on_event(tag, event);
                    }
                }
                ReadResult::NoData => {}
                ReadResult::Error(reason) => {
                    break SessionEnd::Lost(BridgeError::Read { id: tag.device_id.clone(), reason });
                }
                ReadResult::Closed => {
                    break SessionEnd::Lost(BridgeError::Disconnected(tag.device_id.clone()));
                }
            }
        };

        if unknown > 0 {
            log::debug!("[decoder] {}: {unknown} unrecognised report(s) this session", tag.device_id);
        }
        end
    }
}
