// src/device/watcher.rs  -  Enumeration, hot-plug recovery, one session thread per N1
//
// The watcher thread owns the HID backend.  Each cycle it reaps finished
// sessions, enumerates, and opens any N1 not already owned by a session.
// With nothing connected it backs off exponentially (500 ms → 5 s by
// default); with a device connected it keeps polling at the cap so a
// second unit can be hot-plugged.  A session that ends wakes the watcher,
// so an unplug/replug is picked up at the short end of the backoff.
use super::session::{DeviceSession, SessionConfig, SessionEnd};
use super::{candidates, DeviceHandle, DeviceRegistry, HidBackend};
use crate::error::{BridgeError, BridgeResult};
use crate::router::EventSink;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    pub backoff_start: Duration,
    pub backoff_max:   Duration,
    pub session:       SessionConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backoff_start: Duration::from_millis(500),
            backoff_max:   Duration::from_secs(5),
            session:       SessionConfig::default(),
        }
    }
}

/// Doubling delay with a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    start:   Duration,
    max:     Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(start: Duration, max: Duration) -> Self {
        let max = max.max(start);
        Self { start, max, current: start }
    }

    /// Delay to wait now; the following call returns twice as much.
    pub fn next_delay(&mut self) -> Duration {
        let d = self.current;
        self.current = (self.current * 2).min(self.max);
        d
    }

    pub fn reset(&mut self) { self.current = self.start; }
    pub fn max(&self) -> Duration { self.max }
}

pub struct DeviceWatcher {
    backend:  Box<dyn HidBackend>,
    cfg:      WatcherConfig,
    registry: DeviceRegistry,
    sink:     Arc<dyn EventSink>,
    shutdown: Shutdown,
    sessions: Vec<(String, JoinHandle<SessionEnd>)>,
    /// Last enumeration error, so a persistent one is warned about once.
    last_enum_error: Option<String>,
}

impl DeviceWatcher {
    pub fn new(
        backend:  Box<dyn HidBackend>,
        cfg:      WatcherConfig,
        sink:     Arc<dyn EventSink>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            backend,
            cfg,
            registry: DeviceRegistry::new(),
            sink,
            shutdown,
            sessions: Vec::new(),
            last_enum_error: None,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> DeviceRegistry { self.registry.clone() }

    /// Run on a dedicated thread.
    pub fn spawn(self) -> BridgeResult<JoinHandle<()>> {
        thread::Builder::new()
            .name("n1-watcher".into())
            .spawn(move || self.run())
            .map_err(|e| BridgeError::Spawn(format!("watcher thread: {e}")))
    }

    /// Watch until shutdown.  Never returns early on device trouble.
    pub fn run(mut self) {
        log::info!(
            "[watcher] looking for Ajazz N1 ({:04x}:{:04x}), backoff {:?} → {:?}",
            super::N1_VID, super::N1_PID, self.cfg.backoff_start, self.cfg.backoff_max
        );
        let mut backoff = Backoff::new(self.cfg.backoff_start, self.cfg.backoff_max);

        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            // Sessions that end from here on cut the wait below short.
            let epoch = self.shutdown.wake_epoch();
            self.reap();

            match self.scan() {
                Ok(opened) => {
                    if self.last_enum_error.take().is_some() {
                        log::info!("[watcher] enumeration recovered");
                    }
                    if opened > 0 {
                        backoff.reset();
                    }
                }
                Err(e) => self.note_enum_error(e),
            }

            let delay = if self.registry.active() > 0 {
                backoff.reset();
                log::trace!("[watcher] {} N1 connected, next scan in {:?}", self.registry.connected(), backoff.max());
                backoff.max()
            } else {
                let d = backoff.next_delay();
                log::debug!("[watcher] no N1 connected, next scan in {d:?}");
                d
            };
            if self.shutdown.wait_for_wake(delay, epoch) {
                break;
            }
        }

        log::info!("[watcher] stopping, joining {} session(s)", self.sessions.len());
        for (id, h) in self.sessions.drain(..) {
            if h.join().is_err() {
                log::error!("[watcher] session {id} panicked");
            }
        }
    }

    fn note_enum_error(&mut self, e: BridgeError) {
        let msg = e.to_string();
        if self.last_enum_error.as_deref() == Some(msg.as_str()) {
            log::debug!("[watcher] {msg}");
        } else {
            log::warn!("[watcher] {msg}  → retrying with backoff");
            self.last_enum_error = Some(msg);
        }
    }

    /// Join sessions whose thread has finished and log how they ended.
    fn reap(&mut self) {
        let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|(_, h)| h.is_finished());
        self.sessions = running;
        for (id, h) in done {
            match h.join() {
                Ok(SessionEnd::HandshakeFailed(e) | SessionEnd::Lost(e)) if e.is_recoverable() => {
                    log::debug!("[watcher] {id} ended: {e}");
                }
                Ok(SessionEnd::HandshakeFailed(e) | SessionEnd::Lost(e)) => {
                    log::error!("[watcher] {id} ended: {e}");
                }
                Ok(SessionEnd::Shutdown) => {}
                Err(_) => {
                    log::error!("[watcher] session {id} panicked");
                    self.registry.release(&id);
                }
            }
        }
    }

    /// One enumeration pass.  Returns how many sessions were started.
    fn scan(&mut self) -> BridgeResult<usize> {
        let all = self.backend.enumerate()?;
        let mut opened = 0;

        for info in candidates(&all) {
            let id = info.device_id();
            if !self.registry.claim(&id) {
                continue;
            }
            log::info!("[watcher] N1 found: {id}");

            let transport = match self.backend.open(&info) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("[watcher] {e}");
                    self.registry.release(&id);
                    continue;
                }
            };

            let session = DeviceSession::new(
                DeviceHandle::new(info, transport),
                self.cfg.session,
                self.registry.clone(),
                Arc::clone(&self.sink),
                self.shutdown.clone(),
            );
            match thread::Builder::new()
                .name(format!("n1-session-{id}"))
                .spawn(move || session.run())
            {
                Ok(h) => {
                    self.sessions.push((id, h));
                    opened += 1;
                }
                Err(e) => {
                    // Resource exhaustion: drop this attempt, retried next cycle.
                    log::error!("[watcher] {}", BridgeError::Spawn(format!("session for {id}: {e}")));
                    self.registry.release(&id);
                }
            }
        }
        Ok(opened)
    }
}
