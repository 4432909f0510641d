// src/device/protocol.rs  -  Ajazz N1 wire protocol: report decoding + handshake
//
// Input report (software mode, protocol v3), as seen on the vendor
// interface (usage page 0xFFA0, usage 1):
//
//   byte 0..3   "ACK"            frame marker
//   byte 3..9   vendor padding   ignored
//   byte 9      input code       0x32 = dial CCW, 0x33 = dial CW, 0x23 = dial press
//   byte 10     state            ignored (press/release inferred by the classifier)
//
// Anything else the device sends (face buttons, LCD keys, sync frames,
// keep-alive echoes) is expected noise and decodes to `Unknown`.

/// Rotate counter-clockwise (-1)
pub const INPUT_DIAL_CCW: u8 = 0x32;
/// Rotate clockwise (+1)
pub const INPUT_DIAL_CW: u8 = 0x33;
/// Dial press/release toggle
pub const INPUT_DIAL_PRESS: u8 = 0x23;

/// Frame marker at the start of every input report.
pub const ACK_PREFIX: &[u8; 3] = b"ACK";
/// Offset of the input code inside a framed report.
pub const INPUT_OFFSET: usize = 9;

/// Largest report the N1 produces; read buffers are sized to this.
pub const REPORT_LEN: usize = 512;

/// Protocol version that puts the device into "software mode".
pub const PROTOCOL_VERSION: u8 = 3;

/// Output report that switches the device into software mode:
/// report-id 0, "CRT", two zero bytes, "MOD", two zero bytes, ASCII '3'.
pub const SOFTWARE_MODE_PACKET: [u8; 12] = [
    0x00, b'C', b'R', b'T', 0x00, 0x00,
    b'M', b'O', b'D', 0x00, 0x00, b'0' + PROTOCOL_VERSION,
];

/// One decoded report.  Ephemeral: produced and consumed in one read cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawInputEvent {
    Input(u8),
    Unknown(Vec<u8>),
}

/// Byte-level mapping: exactly three codes are recognised.
pub fn decode_code(code: u8) -> RawInputEvent {
    match code {
        INPUT_DIAL_CCW | INPUT_DIAL_CW | INPUT_DIAL_PRESS => RawInputEvent::Input(code),
        other => RawInputEvent::Unknown(vec![other]),
    }
}

/// Decode one framed input report.  Pure: same bytes, same answer.
pub fn decode_report(report: &[u8]) -> RawInputEvent {
    if report.len() <= INPUT_OFFSET || !report.starts_with(ACK_PREFIX) {
        return RawInputEvent::Unknown(report.to_vec());
    }
    match decode_code(report[INPUT_OFFSET]) {
        RawInputEvent::Input(code) => RawInputEvent::Input(code),
        RawInputEvent::Unknown(_)  => RawInputEvent::Unknown(report.to_vec()),
    }
}

/// Build a framed report carrying `code`, laid out as the firmware sends it.
#[cfg(test)]
pub fn frame_report(code: u8, state: u8) -> Vec<u8> {
    let mut buf = vec![0u8; INPUT_OFFSET + 2];
    buf[..3].copy_from_slice(ACK_PREFIX);
    buf[INPUT_OFFSET]     = code;
    buf[INPUT_OFFSET + 1] = state;
    buf
}

/// Hex dump of the first bytes of a report, for debug logging.
pub fn hex_prefix(bytes: &[u8], max: usize) -> String {
    bytes.iter()
        .take(max)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_exactly_three_codes() {
        for code in 0..=u8::MAX {
            let ev = decode_code(code);
            match code {
                0x32 | 0x33 | 0x23 => assert_eq!(ev, RawInputEvent::Input(code)),
                _                  => assert_eq!(ev, RawInputEvent::Unknown(vec![code])),
            }
        }
    }

    #[test]
    fn framed_reports_decode_by_input_byte() {
        assert_eq!(decode_report(&frame_report(0x33, 1)), RawInputEvent::Input(51));
        assert_eq!(decode_report(&frame_report(0x32, 1)), RawInputEvent::Input(50));
        assert_eq!(decode_report(&frame_report(0x23, 0)), RawInputEvent::Input(35));
    }

    #[test]
    fn state_byte_does_not_change_the_event() {
        assert_eq!(
            decode_report(&frame_report(0x23, 1)),
            decode_report(&frame_report(0x23, 0)),
        );
    }

    #[test]
    fn face_buttons_and_sync_frames_are_unknown() {
        for code in [0u8, 1, 18, 30, 31] {
            let report = frame_report(code, 1);
            assert_eq!(decode_report(&report), RawInputEvent::Unknown(report.clone()));
        }
    }

    #[test]
    fn unframed_or_short_reports_are_unknown() {
        assert!(matches!(decode_report(&[]), RawInputEvent::Unknown(_)));
        assert!(matches!(decode_report(&[0x33]), RawInputEvent::Unknown(_)));
        assert!(matches!(decode_report(b"ACK\0\0\0\0\0\0"), RawInputEvent::Unknown(_)));

        let mut not_ack = frame_report(0x33, 1);
        not_ack[0] = b'N';
        assert!(matches!(decode_report(&not_ack), RawInputEvent::Unknown(_)));
    }

    #[test]
    fn decoding_is_pure() {
        let report = frame_report(0x33, 1);
        assert_eq!(decode_report(&report), decode_report(&report));
    }

    #[test]
    fn software_mode_packet_layout() {
        assert_eq!(&SOFTWARE_MODE_PACKET[1..4], b"CRT");
        assert_eq!(&SOFTWARE_MODE_PACKET[6..9], b"MOD");
        assert_eq!(SOFTWARE_MODE_PACKET[11], 0x33);
    }

    #[test]
    fn hex_prefix_truncates() {
        assert_eq!(hex_prefix(&[0x41, 0x43, 0x4b, 0x00], 3), "41 43 4b");
    }
}
