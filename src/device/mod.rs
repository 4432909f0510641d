// src/device/mod.rs  -  HID transport seam, device identity, connection registry
//
// The watcher only talks to the traits below; `hid.rs` implements them with
// hidapi, the tests with a scripted mock.  Opening happens on the watcher
// thread (hidapi's context is not shareable), the opened transport is then
// moved onto the device's own session thread.
pub mod protocol;
pub mod session;
pub mod watcher;
#[cfg(feature = "hid")]
pub mod hid;
#[cfg(test)]
pub mod mock;

use crate::error::BridgeResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const N1_VID: u16 = 0x0300;
pub const N1_PID: u16 = 0x3007;
/// Vendor interface that carries the input reports.
pub const N1_USAGE_PAGE: u16 = 0xFFA0;
pub const N1_USAGE: u16 = 1;

pub const DEVICE_NAMESPACE: &str = "N1";
pub const DEVICE_NAME: &str = "Ajazz N1";

/// Host-side layout of the N1 (15 keys + 3 top LCDs, 2 face buttons + dial).
pub const N1_ROWS: u8 = 6;
pub const N1_COLS: u8 = 3;
pub const N1_ENCODER_COUNT: u8 = 3;

/// One enumerated HID interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id:  u16,
    pub product_id: u16,
    pub path:       String,
    pub serial:     Option<String>,
    pub usage_page: u16,
    pub usage:      u16,
}

impl DeviceInfo {
    pub fn is_n1(&self) -> bool {
        self.vendor_id == N1_VID && self.product_id == N1_PID
    }

    /// Platforms that do not report usages give 0 here; treat that as a match.
    pub fn is_vendor_interface(&self) -> bool {
        (self.usage_page == N1_USAGE_PAGE && self.usage == N1_USAGE) || self.usage_page == 0
    }

    /// Stable id: `N1-<serial>`, or the HID path when the serial is unreadable.
    pub fn device_id(&self) -> String {
        match self.serial.as_deref().filter(|s| !s.is_empty()) {
            Some(serial) => format!("{DEVICE_NAMESPACE}-{serial}"),
            None         => format!("{DEVICE_NAMESPACE}-{}", self.path),
        }
    }
}

/// Pick the interfaces worth opening: one per physical device, vendor
/// interface first.
pub fn candidates(all: &[DeviceInfo]) -> Vec<DeviceInfo> {
    let mut by_id: Vec<DeviceInfo> = Vec::new();
    for info in all.iter().filter(|d| d.is_n1()) {
        let id = info.device_id();
        match by_id.iter_mut().find(|d| d.device_id() == id) {
            Some(existing) => {
                if !existing.is_vendor_interface() && info.is_vendor_interface() {
                    *existing = info.clone();
                }
            }
            None => by_id.push(info.clone()),
        }
    }
    by_id.retain(DeviceInfo::is_vendor_interface);
    by_id
}

/// Result of one timed read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// New report of `n` bytes in the buffer.
    Report(usize),
    /// Timeout, nothing arrived.
    NoData,
    /// Unrecoverable I/O error, the device is gone or wedged.
    Error(String),
    /// Transport signalled end of stream (unplugged).
    Closed,
}

/// An opened device.
pub trait HidTransport: Send {
    fn write(&mut self, data: &[u8]) -> BridgeResult<usize>;
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadResult;
}

/// Enumeration + open.  Owned by the watcher thread.
pub trait HidBackend: Send {
    fn enumerate(&mut self) -> BridgeResult<Vec<DeviceInfo>>;
    fn open(&mut self, info: &DeviceInfo) -> BridgeResult<Box<dyn HidTransport>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// One physical device instance, owned exclusively by its session.
pub struct DeviceHandle {
    pub id:        String,
    pub info:      DeviceInfo,
    pub transport: Box<dyn HidTransport>,
    pub protocol:  u8,
    pub state:     ConnState,
}

impl DeviceHandle {
    pub fn new(info: DeviceInfo, transport: Box<dyn HidTransport>) -> Self {
        Self {
            id: info.device_id(),
            info,
            transport,
            protocol: protocol::PROTOCOL_VERSION,
            state: ConnState::Connecting,
        }
    }
}

/// Connection state per device id, shared between the watcher and sessions.
/// `claim` is the only way in, which keeps one live session per device.
#[derive(Default, Clone)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<HashMap<String, ConnState>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self { Self::default() }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, ConnState>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Mark `id` as Connecting if no session owns it.  Returns false when a
    /// session is already Connecting/Connected/in cooldown for that id.
    pub fn claim(&self, id: &str) -> bool {
        let mut map = self.map();
        match map.get(id) {
            Some(ConnState::Connecting | ConnState::Connected | ConnState::Error) => false,
            Some(ConnState::Disconnected) | None => {
                map.insert(id.to_string(), ConnState::Connecting);
                true
            }
        }
    }

    pub fn set(&self, id: &str, state: ConnState) {
        self.map().insert(id.to_string(), state);
    }

    /// Session finished: forget the id so the next enumeration may reclaim it.
    pub fn release(&self, id: &str) {
        self.map().remove(id);
    }

    #[cfg(test)]
    pub fn state(&self, id: &str) -> ConnState {
        self.map().get(id).copied().unwrap_or(ConnState::Disconnected)
    }

    pub fn connected(&self) -> usize {
        self.map().values().filter(|s| **s == ConnState::Connected).count()
    }

    pub fn active(&self) -> usize {
        self.map().len()
    }
}

/// Human-readable listing for `--list-devices`.
pub fn describe(all: &[DeviceInfo]) -> Vec<String> {
    all.iter()
        .filter(|d| d.is_n1())
        .map(|d| format!(
            "{}  {:04x}:{:04x}  usage {:04x}/{}  {}{}",
            d.device_id(), d.vendor_id, d.product_id, d.usage_page, d.usage, d.path,
            if d.is_vendor_interface() { "  ← input interface" } else { "" },
        ))
        .collect()
}
