// src/device/hid.rs  -  hidapi transport for the Ajazz N1  (VID 0x0300 / PID 0x3007)
//
// The N1 exposes several HID interfaces; input reports come from the vendor
// collection (usage page 0xFFA0, usage 1).  On Linux it appears as one
// /dev/hidraw* per interface.
//
// ── Linux permissions ─────────────────────────────────────────────────────────
// /dev/hidraw* is root-only by default.  Create a udev rule once:
//
//   echo 'SUBSYSTEM=="hidraw", ATTRS{idVendor}=="0300", \
//         ATTRS{idProduct}=="3007", GROUP="plugdev", MODE="0660"' \
//     | sudo tee /etc/udev/rules.d/99-ajazz-n1.rules
//   sudo udevadm control --reload-rules && sudo udevadm trigger

use super::{DeviceInfo, HidBackend, HidTransport, ReadResult};
use crate::error::{BridgeError, BridgeResult};
use hidapi::{HidApi, HidDevice};
use std::ffi::CString;
use std::time::Duration;

/// Lazily created hidapi context.  Creation failure is an enumeration
/// failure like any other and is retried by the watcher's backoff.
#[derive(Default)]
pub struct HidApiBackend {
    api: Option<HidApi>,
}

impl HidApiBackend {
    pub fn new() -> Self { Self::default() }

    fn api(&mut self) -> BridgeResult<&mut HidApi> {
        if let Some(api) = self.api.as_mut() {
            api.refresh_devices()
                .map_err(|e| BridgeError::Enumeration(format!("refresh: {e}")))?;
        } else {
            let api = HidApi::new()
                .map_err(|e| BridgeError::Enumeration(format!("hidapi init: {e}")))?;
            self.api = Some(api);
        }
        self.api.as_mut().ok_or_else(|| BridgeError::Enumeration("hidapi unavailable".into()))
    }
}

impl HidBackend for HidApiBackend {
    fn enumerate(&mut self) -> BridgeResult<Vec<DeviceInfo>> {
        let api = self.api()?;
        Ok(api.device_list()
            .filter(|d| d.vendor_id() == super::N1_VID && d.product_id() == super::N1_PID)
            .map(|d| DeviceInfo {
                vendor_id:  d.vendor_id(),
                product_id: d.product_id(),
                path:       d.path().to_string_lossy().into_owned(),
                serial:     d.serial_number().map(str::to_owned),
                usage_page: d.usage_page(),
                usage:      d.usage(),
            })
            .collect())
    }

    fn open(&mut self, info: &DeviceInfo) -> BridgeResult<Box<dyn HidTransport>> {
        let id = info.device_id();
        let api = self.api.as_ref()
            .ok_or_else(|| BridgeError::Open { id: id.clone(), reason: "not enumerated".into() })?;
        let path = CString::new(info.path.as_str())
            .map_err(|e| BridgeError::Open { id: id.clone(), reason: e.to_string() })?;
        let dev = api.open_path(&path)
            .map_err(|e| BridgeError::Open { id: id.clone(), reason: format!("{e}{}", permission_hint()) })?;
        log::info!("[hid] opened {id}  path={}", info.path);
        Ok(Box::new(HidApiTransport { id, dev }))
    }
}

pub struct HidApiTransport {
    id:  String,
    dev: HidDevice,
}

impl HidTransport for HidApiTransport {
    fn write(&mut self, data: &[u8]) -> BridgeResult<usize> {
        self.dev.write(data)
            .map_err(|e| BridgeError::Handshake { id: self.id.clone(), reason: e.to_string() })
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> ReadResult {
        let ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        match self.dev.read_timeout(buf, ms) {
            Ok(n) if n > 0 => ReadResult::Report(n),
            Ok(_)          => ReadResult::NoData,
            Err(e) if is_unplug(&e.to_string()) => ReadResult::Closed,
            Err(e)         => ReadResult::Error(e.to_string()),
        }
    }
}

/// hidraw reports an unplug as a poll error ("device disconnected") or ENODEV.
fn is_unplug(msg: &str) -> bool {
    let m = msg.to_ascii_lowercase();
    m.contains("disconnected") || m.contains("no such device")
}

pub fn permission_hint() -> &'static str {
    if cfg!(target_os = "linux") {
        "\n  Hint: /dev/hidraw* may lack permissions.\
         \n  Quick fix:  sudo chmod a+rw /dev/hidraw*\
         \n  Permanent:  install udev rule 99-ajazz-n1.rules (see top of device/hid.rs)"
    } else if cfg!(target_os = "macos") {
        "\n  Hint: macOS requires Input Monitoring permission for HID devices.\
         \n  → System Settings → Privacy & Security → Input Monitoring"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unplug_messages_are_recognised() {
        assert!(is_unplug("hid_read_timeout: unexpected poll error (device disconnected)"));
        assert!(is_unplug("No such device (os error 19)"));
        assert!(!is_unplug("Resource temporarily unavailable"));
    }
}
