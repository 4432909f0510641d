// src/device/mock.rs  -  Scripted HID backend + recording sink for tests
use super::session::SessionTag;
use super::{DeviceInfo, HidBackend, HidTransport, ReadResult, N1_PID, N1_USAGE, N1_USAGE_PAGE, N1_VID};
use crate::classifier::{EncoderEvent, SemanticEvent};
use crate::error::{BridgeError, BridgeResult};
use crate::router::EventSink;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockRead {
    Report(Vec<u8>),
    /// Sleep, then report nothing for this read.
    Delay(Duration),
    Error(String),
}

#[derive(Clone)]
pub struct MockDevice {
    pub info:        DeviceInfo,
    /// One script per connection; the last one is reused for every reopen.
    scripts:         Vec<Vec<MockRead>>,
    idle_after:      bool,
    fail_handshakes: usize,
    short_writes:    bool,
    writes:          Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            info: DeviceInfo {
                vendor_id:  N1_VID,
                product_id: N1_PID,
                path:       format!("/dev/mock-{serial}"),
                serial:     Some(serial.into()),
                usage_page: N1_USAGE_PAGE,
                usage:      N1_USAGE,
            },
            scripts:         vec![Vec::new()],
            idle_after:      false,
            fail_handshakes: 0,
            short_writes:    false,
            writes:          Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn script(mut self, reads: Vec<MockRead>) -> Self { self.scripts = vec![reads]; self }
    /// Script for the next connection after the current last one.
    pub fn then_reconnect(mut self, reads: Vec<MockRead>) -> Self { self.scripts.push(reads); self }
    /// Keep returning NoData once the script runs out instead of unplugging.
    pub fn idle_after_script(mut self) -> Self { self.idle_after = true; self }
    pub fn failing_handshakes(mut self, n: usize) -> Self { self.fail_handshakes = n; self }
    pub fn short_writes(mut self) -> Self { self.short_writes = true; self }
    pub fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> { Arc::clone(&self.writes) }
}

#[derive(Default)]
struct BackendState {
    devices:          Vec<MockDevice>,
    enumerate_calls:  usize,
    fail_enumerate:   usize,
    opens:            Vec<String>,
}

/// Backend whose device list can grow while the watcher runs.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        let b = Self::default();
        b.state.lock().unwrap().devices = devices;
        b
    }

    pub fn plug(&self, dev: MockDevice) { self.state.lock().unwrap().devices.push(dev); }

    pub fn fail_next_enumerations(&self, n: usize) { self.state.lock().unwrap().fail_enumerate = n; }
    pub fn enumerate_calls(&self) -> usize { self.state.lock().unwrap().enumerate_calls }
    pub fn opens(&self) -> Vec<String> { self.state.lock().unwrap().opens.clone() }
}

impl HidBackend for MockBackend {
    fn enumerate(&mut self) -> BridgeResult<Vec<DeviceInfo>> {
        let mut st = self.state.lock().unwrap();
        st.enumerate_calls += 1;
        if st.fail_enumerate > 0 {
            st.fail_enumerate -= 1;
            return Err(BridgeError::Enumeration("mock: permission denied".into()));
        }
        Ok(st.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn open(&mut self, info: &DeviceInfo) -> BridgeResult<Box<dyn HidTransport>> {
        let mut st = self.state.lock().unwrap();
        let dev = st.devices.iter_mut()
            .find(|d| d.info.path == info.path)
            .ok_or_else(|| BridgeError::Open { id: info.device_id(), reason: "gone".into() })?;
        let fail_handshake = dev.fail_handshakes > 0;
        if fail_handshake {
            dev.fail_handshakes -= 1;
        }
        let script = if dev.scripts.len() > 1 {
            dev.scripts.remove(0)
        } else {
            dev.scripts.first().cloned().unwrap_or_default()
        };
        let transport = MockTransport {
            id:             info.device_id(),
            script:         script.into(),
            idle_after:     dev.idle_after,
            fail_handshake,
            short_writes:   dev.short_writes,
            writes:         Arc::clone(&dev.writes),
        };
        st.opens.push(info.device_id());
        Ok(Box::new(transport))
    }
}

struct MockTransport {
    id:             String,
    script:         VecDeque<MockRead>,
    idle_after:     bool,
    fail_handshake: bool,
    short_writes:   bool,
    writes:         Arc<Mutex<Vec<Vec<u8>>>>,
}

impl HidTransport for MockTransport {
    fn write(&mut self, data: &[u8]) -> BridgeResult<usize> {
        if self.fail_handshake {
            return Err(BridgeError::Handshake { id: self.id.clone(), reason: "mock: nak".into() });
        }
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(if self.short_writes { data.len() - 1 } else { data.len() })
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadResult {
        match self.script.pop_front() {
            Some(MockRead::Report(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                ReadResult::Report(n)
            }
            Some(MockRead::Delay(d)) => {
                std::thread::sleep(d);
                ReadResult::NoData
            }
            Some(MockRead::Error(e)) => ReadResult::Error(e),
            None if self.idle_after => {
                std::thread::sleep(timeout);
                ReadResult::NoData
            }
            None => ReadResult::Closed,
        }
    }
}

/// Sink that remembers everything it was given.
#[derive(Default)]
pub struct RecordingSink {
    events:      Mutex<Vec<(String, SemanticEvent)>>,
    connects:    Mutex<Vec<SessionTag>>,
    disconnects: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn kinds(&self, device_id: &str) -> Vec<EncoderEvent> {
        self.events.lock().unwrap().iter()
            .filter(|(id, _)| id == device_id)
            .map(|(_, e)| e.kind)
            .collect()
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().iter().map(|t| t.device_id.clone()).collect()
    }

    pub fn disconnects(&self) -> Vec<String> { self.disconnects.lock().unwrap().clone() }
    pub fn tags(&self) -> Vec<SessionTag> { self.connects.lock().unwrap().clone() }
}

impl EventSink for RecordingSink {
    fn device_connected(&self, tag: &SessionTag) {
        self.connects.lock().unwrap().push(tag.clone());
    }

    fn device_disconnected(&self, tag: &SessionTag) {
        self.disconnects.lock().unwrap().push(tag.device_id.clone());
    }

    fn on_event(&self, tag: &SessionTag, event: SemanticEvent) {
        self.events.lock().unwrap().push((tag.device_id.clone(), event));
    }
}
