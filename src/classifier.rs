// src/classifier.rs  -  Raw dial reports → debounced semantic encoder events
use crate::device::protocol::{RawInputEvent, INPUT_DIAL_CCW, INPUT_DIAL_CW, INPUT_DIAL_PRESS};
use std::time::{Duration, Instant};

/// The dial is the third encoder slot (zero-indexed) on the host side.
pub const DIAL_ENCODER: u8 = 2;

/// Default coalescing window for repeated rotation reports of one detent.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Clockwise, +1
    Cw,
    /// Counter-clockwise, -1
    Ccw,
}

impl Direction {
    pub fn ticks(self) -> i8 {
        match self {
            Direction::Cw  => 1,
            Direction::Ccw => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderEvent {
    Twist(Direction),
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticEvent {
    pub kind:    EncoderEvent,
    pub encoder: u8,
    pub at:      Instant,
}

/// State machine: raw codes → twist / press / release.
///
/// One instance lives exactly as long as one device connection; the session
/// builds a fresh one on every connect, so the press toggle always starts
/// from "released".
pub struct Classifier {
    debounce: Duration,
    /// Rotation code and the instant its coalescing window opened.
    pending:  Option<(u8, Instant)>,
    pressed:  bool,
}

impl Classifier {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, pending: None, pressed: false }
    }

    pub fn debounce(&self) -> Duration { self.debounce }
    pub fn is_pressed(&self) -> bool { self.pressed }

    /// Feed one decoded report observed at `at`.  Never fails; anything that
    /// does not map to a semantic event returns `None`.
    pub fn classify(&mut self, event: &RawInputEvent, at: Instant) -> Option<SemanticEvent> {
        let code = match event {
            RawInputEvent::Input(code) => *code,
            RawInputEvent::Unknown(_)  => return None,
        };

        let kind = match code {
            INPUT_DIAL_CW  => EncoderEvent::Twist(self.rotation(code, Direction::Cw, at)?),
            INPUT_DIAL_CCW => EncoderEvent::Twist(self.rotation(code, Direction::Ccw, at)?),
            INPUT_DIAL_PRESS => {
                self.pressed = !self.pressed;
                if self.pressed { EncoderEvent::Press } else { EncoderEvent::Release }
            }
            other => {
                log::debug!("[classify] ignoring code 0x{other:02x}");
                return None;
            }
        };
        Some(SemanticEvent { kind, encoder: DIAL_ENCODER, at })
    }

    /// Coalesce same-direction reports inside the open window.  A reversal,
    /// or a report after the window has elapsed, emits and opens a new one.
    ///
    /// The window stays anchored at the report that opened it; swallowed
    /// reports do not extend it.  A sliding window would let a steady fast
    /// spin (reports closer together than `debounce`) collapse into a single
    /// twist.  Only the latest code needs a timestamp, since a different
    /// code always emits.
    fn rotation(&mut self, code: u8, dir: Direction, at: Instant) -> Option<Direction> {
        if let Some((last_code, opened)) = self.pending {
            let within = at.saturating_duration_since(opened) < self.debounce;
            if last_code == code && within {
                log::trace!("[classify] coalesced {dir:?}");
                return None;
            }
        }
        self.pending = Some((code, at));
        Some(dir)
    }

    /// Drop all state, as if the device had just been connected.
    pub fn reset(&mut self) {
        self.pending = None;
        self.pressed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::protocol::decode_report;
    use crate::device::protocol::frame_report;

    const CW:    RawInputEvent = RawInputEvent::Input(INPUT_DIAL_CW);
    const CCW:   RawInputEvent = RawInputEvent::Input(INPUT_DIAL_CCW);
    const PRESS: RawInputEvent = RawInputEvent::Input(INPUT_DIAL_PRESS);

    fn ms(n: u64) -> Duration { Duration::from_millis(n) }

    fn kinds(c: &mut Classifier, seq: &[(RawInputEvent, u64)]) -> Vec<EncoderEvent> {
        let t0 = Instant::now();
        seq.iter()
            .filter_map(|(ev, offset)| c.classify(ev, t0 + ms(*offset)))
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn burst_inside_window_collapses_to_one_twist() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let got = kinds(&mut c, &[(CCW, 0), (CCW, 2), (CCW, 5), (CCW, 9)]);
        assert_eq!(got, vec![EncoderEvent::Twist(Direction::Ccw)]);
    }

    #[test]
    fn reports_spaced_beyond_window_each_emit() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let got = kinds(&mut c, &[(CCW, 0), (CCW, 11), (CCW, 22), (CCW, 33)]);
        assert_eq!(got, vec![EncoderEvent::Twist(Direction::Ccw); 4]);
    }

    #[test]
    fn two_cw_reports_12ms_apart_are_two_twists() {
        let mut c = Classifier::new(ms(10));
        let got = kinds(&mut c, &[(CW, 0), (CW, 12)]);
        assert_eq!(got, vec![EncoderEvent::Twist(Direction::Cw); 2]);
    }

    #[test]
    fn fast_reversal_is_not_coalesced() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let got = kinds(&mut c, &[(CW, 0), (CCW, 1), (CW, 2)]);
        assert_eq!(got, vec![
            EncoderEvent::Twist(Direction::Cw),
            EncoderEvent::Twist(Direction::Ccw),
            EncoderEvent::Twist(Direction::Cw),
        ]);
    }

    #[test]
    fn first_report_after_idle_is_not_dropped() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let got = kinds(&mut c, &[(CW, 0), (CW, 3), (CW, 500)]);
        assert_eq!(got, vec![EncoderEvent::Twist(Direction::Cw); 2]);
    }

    #[test]
    fn steady_fast_spin_emits_once_per_window() {
        let mut c = Classifier::new(ms(10));
        let seq: Vec<_> = (0..8).map(|i| (CW, i * 4)).collect();
        // 0, 12 and 24 open windows; everything between is swallowed.
        assert_eq!(kinds(&mut c, &seq), vec![EncoderEvent::Twist(Direction::Cw); 3]);
    }

    #[test]
    fn window_is_tunable() {
        let mut wide = Classifier::new(ms(50));
        assert_eq!(kinds(&mut wide, &[(CW, 0), (CW, 30)]).len(), 1);

        let mut off = Classifier::new(Duration::ZERO);
        assert_eq!(kinds(&mut off, &[(CW, 0), (CW, 0)]).len(), 2);
    }

    #[test]
    fn press_reports_strictly_alternate() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let got = kinds(&mut c, &[(PRESS, 0), (PRESS, 1), (PRESS, 2), (PRESS, 3)]);
        assert_eq!(got, vec![
            EncoderEvent::Press, EncoderEvent::Release,
            EncoderEvent::Press, EncoderEvent::Release,
        ]);
    }

    #[test]
    fn framed_press_pair_is_press_then_release() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let now = Instant::now();
        let a = c.classify(&decode_report(&frame_report(0x23, 1)), now).map(|e| e.kind);
        let b = c.classify(&decode_report(&frame_report(0x23, 0)), now + ms(80)).map(|e| e.kind);
        assert_eq!((a, b), (Some(EncoderEvent::Press), Some(EncoderEvent::Release)));
    }

    #[test]
    fn reset_restarts_toggle_at_press() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        assert_eq!(kinds(&mut c, &[(PRESS, 0)]), vec![EncoderEvent::Press]);
        c.reset();
        assert!(!c.is_pressed());
        assert_eq!(kinds(&mut c, &[(PRESS, 0)]), vec![EncoderEvent::Press]);
    }

    #[test]
    fn unknown_reports_emit_nothing() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let got = kinds(&mut c, &[
            (RawInputEvent::Unknown(vec![0x30]), 0),
            (RawInputEvent::Unknown(vec![]), 1),
            (RawInputEvent::Input(0x30), 2),
        ]);
        assert!(got.is_empty());
    }

    #[test]
    fn events_carry_dial_encoder_and_timestamp() {
        let mut c = Classifier::new(DEFAULT_DEBOUNCE);
        let at = Instant::now();
        let ev = c.classify(&CW, at).unwrap();
        assert_eq!(ev.encoder, DIAL_ENCODER);
        assert_eq!(ev.at, at);
        assert_eq!(Direction::Cw.ticks(), 1);
        assert_eq!(Direction::Ccw.ticks(), -1);
    }
}
