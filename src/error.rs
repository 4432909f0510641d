// src/error.rs  -  Failure taxonomy for the device → dispatch pipeline
//
// Every variant is absorbed at the component that produced it and turned
// into a log line.  Nothing here is meant to reach the user or end the
// process; `is_recoverable()` tells them apart from resource exhaustion.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// HID enumeration failed (hidapi init, refresh, permissions).
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// Device was found but could not be opened.
    #[error("cannot open {id}: {reason}")]
    Open { id: String, reason: String },

    /// Software-mode init sequence was rejected or short-written.
    #[error("handshake with {id} failed: {reason}")]
    Handshake { id: String, reason: String },

    /// I/O error while reading input reports.
    #[error("read error on {id}: {reason}")]
    Read { id: String, reason: String },

    /// Device reported end-of-stream (unplugged).
    #[error("device {0} disconnected")]
    Disconnected(String),

    /// External tool binary not installed / not on PATH.
    #[error("tool not found: {0}")]
    ToolMissing(String),

    /// External tool ran and exited non-zero.
    #[error("{tool} exited with {code:?}: {stderr}")]
    ExecutionFailed { tool: String, code: Option<i32>, stderr: String },

    /// Could not create an execution context (thread / process).
    #[error("spawn failed: {0}")]
    Spawn(String),
}

impl BridgeError {
    /// All device and tool level failures are retried or skipped.
    /// Only resource exhaustion (`Spawn`) stops the affected subsystem, and
    /// even that is retried on the next cycle.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BridgeError::Spawn(_))
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_failures_are_recoverable() {
        let errs = [
            BridgeError::Enumeration("hidapi".into()),
            BridgeError::Handshake { id: "N1-1".into(), reason: "short write".into() },
            BridgeError::Read { id: "N1-1".into(), reason: "EIO".into() },
            BridgeError::Disconnected("N1-1".into()),
            BridgeError::ToolMissing("amixer".into()),
        ];
        assert!(errs.iter().all(BridgeError::is_recoverable));
        assert!(!BridgeError::Spawn("EAGAIN".into()).is_recoverable());
    }

    #[test]
    fn execution_failure_message_includes_stderr() {
        let e = BridgeError::ExecutionFailed {
            tool:   "brightnessctl".into(),
            code:   Some(1),
            stderr: "no backlight".into(),
        };
        assert_eq!(e.to_string(), "brightnessctl exited with Some(1): no backlight");
    }
}
