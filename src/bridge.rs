// src/bridge.rs  -  Host application channel: JSON lines out, settings in
//
// Outgoing: one JSON object per line on stdout, tagged by "event".
//   {"event":"registerDevice","device":"N1-…","name":"Ajazz N1","rows":6,"columns":3,"encoders":3}
//   {"event":"encoderChange","device":"N1-…","position":2,"ticks":1}
//   {"event":"encoderDown","device":"N1-…","position":2}
//
// Incoming: the same framing on stdin.  Only settings and lifecycle
// messages matter here; anything else is ignored.
use crate::action::{ActionMode, DispatchMode, ModeConfig, ScrollPress, Steps, VolumePress};
use crate::classifier::{EncoderEvent, SemanticEvent};
use crate::device::{DEVICE_NAME, N1_COLS, N1_ENCODER_COUNT, N1_ROWS};
use crate::error::{BridgeError, BridgeResult};
use crate::shutdown::Shutdown;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

// ── Messages ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    RegisterDevice { device: String, name: String, rows: u8, columns: u8, encoders: u8 },
    UnregisterDevice { device: String },
    EncoderChange { device: String, position: u8, ticks: i8 },
    EncoderDown { device: String, position: u8 },
    EncoderUp { device: String, position: u8 },
}

impl HostEvent {
    pub fn register(device: &str) -> Self {
        HostEvent::RegisterDevice {
            device:   device.into(),
            name:     DEVICE_NAME.into(),
            rows:     N1_ROWS,
            columns:  N1_COLS,
            encoders: N1_ENCODER_COUNT,
        }
    }

    pub fn unregister(device: &str) -> Self {
        HostEvent::UnregisterDevice { device: device.into() }
    }

    /// Forwarded shape of one classified event.
    pub fn from_event(device: &str, event: &SemanticEvent) -> Self {
        let device = device.to_string();
        let position = event.encoder;
        match event.kind {
            EncoderEvent::Twist(d) => HostEvent::EncoderChange { device, position, ticks: d.ticks() },
            EncoderEvent::Press    => HostEvent::EncoderDown { device, position },
            EncoderEvent::Release  => HostEvent::EncoderUp { device, position },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostMessage {
    Registered,
    DidReceiveSettings {
        #[serde(default)]
        settings: HostSettings,
    },
    SetSettings {
        #[serde(default)]
        settings: HostSettings,
    },
    WillDisappear,
    #[serde(other)]
    Other,
}

/// Settings object as the inspector sends it.  Every field is optional;
/// absent ones keep the start-up value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub mode:               Option<ActionMode>,
    pub dispatch:           Option<DispatchMode>,
    pub volume_percent:     Option<u8>,
    pub seek_seconds:       Option<u32>,
    pub brightness_percent: Option<u8>,
    pub scroll_lines:       Option<u32>,
    pub volume_press:       Option<VolumePress>,
    pub scroll_press:       Option<ScrollPress>,
    pub cw_command:         Option<String>,
    pub ccw_command:        Option<String>,
    pub press_command:      Option<String>,
    pub release_command:    Option<String>,
}

impl HostSettings {
    pub fn apply_to(&self, base: &ModeConfig) -> ModeConfig {
        let mut c = base.clone();
        if let Some(v) = self.mode               { c.mode         = v; }
        if let Some(v) = self.dispatch           { c.dispatch     = v; }
        if let Some(v) = self.volume_press       { c.volume_press = v; }
        if let Some(v) = self.scroll_press       { c.scroll_press = v; }
        if let Some(v) = &self.cw_command        { c.custom.cw      = v.clone(); }
        if let Some(v) = &self.ccw_command       { c.custom.ccw     = v.clone(); }
        if let Some(v) = &self.press_command     { c.custom.press   = v.clone(); }
        if let Some(v) = &self.release_command   { c.custom.release = v.clone(); }
        let s = &base.steps;
        c.steps = Steps {
            volume_percent:     self.volume_percent.unwrap_or(s.volume_percent),
            seek_seconds:       self.seek_seconds.unwrap_or(s.seek_seconds),
            brightness_percent: self.brightness_percent.unwrap_or(s.brightness_percent),
            scroll_lines:       self.scroll_lines.unwrap_or(s.scroll_lines),
        }
        .clamped();
        c
    }
}

// ── Config snapshot ───────────────────────────────────────────────────────────
/// Current `ModeConfig`, swapped whole on every update so a reader never
/// sees half of one.
pub struct ConfigStore {
    current: RwLock<Arc<ModeConfig>>,
    startup: Arc<ModeConfig>,
}

impl ConfigStore {
    pub fn new(startup: ModeConfig) -> Self {
        let startup = Arc::new(startup);
        Self { current: RwLock::new(Arc::clone(&startup)), startup }
    }

    pub fn snapshot(&self) -> Arc<ModeConfig> {
        let g = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&g)
    }

    pub fn replace(&self, cfg: ModeConfig) {
        let mut g = self.current.write().unwrap_or_else(|p| p.into_inner());
        *g = Arc::new(cfg);
    }

    pub fn revert(&self) {
        let mut g = self.current.write().unwrap_or_else(|p| p.into_inner());
        *g = Arc::clone(&self.startup);
    }

    pub fn startup(&self) -> &ModeConfig { &self.startup }
}

/// Apply one incoming message to the store.
pub fn handle_message(store: &ConfigStore, msg: HostMessage) {
    match msg {
        HostMessage::Registered => log::info!("[bridge] host acknowledged registration"),
        HostMessage::DidReceiveSettings { settings } | HostMessage::SetSettings { settings } => {
            let cfg = settings.apply_to(store.startup());
            log::info!("[bridge] settings: mode {:?}, dispatch {:?}", cfg.mode, cfg.dispatch);
            store.replace(cfg);
        }
        HostMessage::WillDisappear => {
            log::info!("[bridge] action removed, back to start-up settings");
            store.revert();
        }
        HostMessage::Other => {}
    }
}

// ── Outgoing channel ──────────────────────────────────────────────────────────
pub trait HostChannel: Send + Sync {
    fn send(&self, event: &HostEvent) -> io::Result<()>;
}

/// One JSON object per line on any writer (stdout in production).
pub struct JsonLines<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLines<W> {
    pub fn new(out: W) -> Self { Self { out: Mutex::new(out) } }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

impl<W: Write + Send> HostChannel for JsonLines<W> {
    fn send(&self, event: &HostEvent) -> io::Result<()> {
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        serde_json::to_writer(&mut *out, event)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

/// Events waiting for the host writer before new ones are dropped.
pub const HOST_QUEUE: usize = 256;

/// Hands events to a writer thread so a host that stops reading never
/// stalls the device read loops.  When the queue is full the event is
/// dropped and `send` reports `WouldBlock`.
pub struct QueuedChannel {
    tx: SyncSender<HostEvent>,
}

impl QueuedChannel {
    pub fn spawn(inner: Arc<dyn HostChannel>, depth: usize) -> BridgeResult<Self> {
        let (tx, rx) = mpsc::sync_channel::<HostEvent>(depth.max(1));
        thread::Builder::new()
            .name("host-writer".into())
            .spawn(move || write_loop(inner, rx))
            .map_err(|e| BridgeError::Spawn(format!("host writer: {e}")))?;
        Ok(Self { tx })
    }
}

impl HostChannel for QueuedChannel {
    fn send(&self, event: &HostEvent) -> io::Result<()> {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "host is not reading, event dropped",
            )),
            Err(TrySendError::Disconnected(_)) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "host writer has stopped",
            )),
        }
    }
}

fn write_loop(inner: Arc<dyn HostChannel>, rx: Receiver<HostEvent>) {
    let mut failing = false;
    for event in rx {
        match inner.send(&event) {
            Ok(()) => failing = false,
            Err(e) if !failing => {
                log::warn!("[bridge] host write failed: {e}");
                failing = true;
            }
            Err(e) => log::debug!("[bridge] host write failed: {e}"),
        }
    }
}

// ── Incoming channel ──────────────────────────────────────────────────────────
/// Read host messages until EOF, then trip shutdown: the host closing its
/// end means the bridge has nobody left to talk to.
pub fn read_messages<R: BufRead>(reader: R, store: &ConfigStore, shutdown: &Shutdown) {
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::warn!("[bridge] host channel read failed: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostMessage>(line) {
            Ok(msg) => handle_message(store, msg),
            Err(e) => log::debug!("[bridge] skipping malformed line ({e}): {line}"),
        }
        if shutdown.is_triggered() {
            return;
        }
    }
    log::info!("[bridge] host channel closed");
    shutdown.trigger();
}

pub fn spawn_reader<R: BufRead + Send + 'static>(
    reader:   R,
    store:    Arc<ConfigStore>,
    shutdown: Shutdown,
) -> BridgeResult<JoinHandle<()>> {
    thread::Builder::new()
        .name("host-reader".into())
        .spawn(move || read_messages(reader, &store, &shutdown))
        .map_err(|e| BridgeError::Spawn(format!("host reader: {e}")))
}
