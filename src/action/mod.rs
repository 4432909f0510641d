// src/action/mod.rs  -  Mode → external command mapping
//
// `plan()` is the whole action registry: a closed match over `ActionMode`,
// so a new mode does not compile until every event has an answer.
pub mod executor;
pub mod runner;
#[cfg(test)]
pub mod mock;

use crate::classifier::{Direction, EncoderEvent};
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Enums shared across CLI + TOML + host settings ────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ActionMode {
    /// System volume (amixer)
    #[default]
    Volume,
    /// Next / previous track (playerctl)
    MediaTrack,
    /// Seek within the current track (playerctl)
    MediaSeek,
    /// Mouse wheel (xdotool)
    Scroll,
    /// Display backlight (brightnessctl)
    Brightness,
    /// User commands run through `sh -c`
    Custom,
}

/// Where classified events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Forward to the host application (multi-action)
    #[default]
    Forward,
    /// Run the mode's system action here
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumePress { #[default] None, Mute }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollPress { #[default] None, MiddleClick }

// ── Snapshot ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Steps {
    pub volume_percent:     u8,
    pub seek_seconds:       u32,
    pub brightness_percent: u8,
    pub scroll_lines:       u32,
}

impl Default for Steps {
    fn default() -> Self {
        Self { volume_percent: 5, seek_seconds: 5, brightness_percent: 10, scroll_lines: 3 }
    }
}

impl Steps {
    /// Keep every step inside what the tools accept.
    pub fn clamped(self) -> Self {
        Self {
            volume_percent:     self.volume_percent.clamp(1, 100),
            seek_seconds:       self.seek_seconds.clamp(1, 600),
            brightness_percent: self.brightness_percent.clamp(1, 100),
            scroll_lines:       self.scroll_lines.clamp(1, 50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CustomCommands {
    pub cw:      String,
    pub ccw:     String,
    pub press:   String,
    pub release: String,
}

/// Everything needed to turn one event into one action.  Shared as an
/// immutable `Arc` snapshot; updates replace it whole.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeConfig {
    pub mode:         ActionMode,
    pub dispatch:     DispatchMode,
    pub steps:        Steps,
    pub volume_press: VolumePress,
    pub scroll_press: ScrollPress,
    pub custom:       CustomCommands,
}

// ── Planned command ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCommand {
    pub program: String,
    pub args:    Vec<String>,
}

impl ActionCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self { program: program.into(), args: args.iter().map(|a| a.to_string()).collect() }
    }

    fn shell(cmd: &str) -> Option<Self> {
        let cmd = cmd.trim();
        if cmd.is_empty() {
            return None;
        }
        Some(Self { program: "sh".into(), args: vec!["-c".into(), cmd.into()] })
    }

    /// Name used for diagnostics: the tool itself, or the first word of a
    /// shell command.
    pub fn tool(&self) -> &str {
        if self.program == "sh" && self.args.first().map(String::as_str) == Some("-c") {
            if let Some(word) = self.args.get(1).and_then(|c| c.split_whitespace().next()) {
                return word;
            }
        }
        &self.program
    }
}

impl fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

/// Map one event to the command the current mode runs for it, if any.
pub fn plan(cfg: &ModeConfig, event: EncoderEvent) -> Option<ActionCommand> {
    let s = &cfg.steps;
    match (cfg.mode, event) {
        (ActionMode::Volume, EncoderEvent::Twist(d)) => {
            let step = format!("{}%{}", s.volume_percent, sign(d));
            Some(ActionCommand::new("amixer", &["-q", "sset", "Master", &step]))
        }
        (ActionMode::Volume, EncoderEvent::Press) => match cfg.volume_press {
            VolumePress::Mute => Some(ActionCommand::new("amixer", &["-q", "sset", "Master", "toggle"])),
            VolumePress::None => None,
        },

        (ActionMode::MediaTrack, EncoderEvent::Twist(Direction::Cw))  => Some(ActionCommand::new("playerctl", &["next"])),
        (ActionMode::MediaTrack, EncoderEvent::Twist(Direction::Ccw)) => Some(ActionCommand::new("playerctl", &["previous"])),

        (ActionMode::MediaSeek, EncoderEvent::Twist(d)) => {
            let step = format!("{}{}", s.seek_seconds, sign(d));
            Some(ActionCommand::new("playerctl", &["position", &step]))
        }

        (ActionMode::MediaTrack | ActionMode::MediaSeek, EncoderEvent::Press) => {
            Some(ActionCommand::new("playerctl", &["play-pause"]))
        }

        (ActionMode::Scroll, EncoderEvent::Twist(d)) => {
            // X11 buttons: 4 = wheel up, 5 = wheel down
            let button = match d { Direction::Cw => "5", Direction::Ccw => "4" };
            let lines = s.scroll_lines.to_string();
            Some(ActionCommand::new("xdotool", &["click", "--repeat", &lines, button]))
        }
        (ActionMode::Scroll, EncoderEvent::Press) => match cfg.scroll_press {
            ScrollPress::MiddleClick => Some(ActionCommand::new("xdotool", &["click", "2"])),
            ScrollPress::None        => None,
        },

        (ActionMode::Brightness, EncoderEvent::Twist(d)) => {
            let step = format!("{}%{}", s.brightness_percent, sign(d));
            Some(ActionCommand::new("brightnessctl", &["set", &step]))
        }
        (ActionMode::Brightness, EncoderEvent::Press) => None,

        (ActionMode::Custom, EncoderEvent::Twist(Direction::Cw))  => ActionCommand::shell(&cfg.custom.cw),
        (ActionMode::Custom, EncoderEvent::Twist(Direction::Ccw)) => ActionCommand::shell(&cfg.custom.ccw),
        (ActionMode::Custom, EncoderEvent::Press)   => ActionCommand::shell(&cfg.custom.press),
        (ActionMode::Custom, EncoderEvent::Release) => ActionCommand::shell(&cfg.custom.release),

        (
            ActionMode::Volume | ActionMode::MediaTrack | ActionMode::MediaSeek
            | ActionMode::Scroll | ActionMode::Brightness,
            EncoderEvent::Release,
        ) => None,
    }
}

fn sign(d: Direction) -> char {
    match d {
        Direction::Cw  => '+',
        Direction::Ccw => '-',
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Success,
    ToolMissing(String),
    ExecutionFailed(Option<i32>, String),
    Timeout,
}

impl DispatchResult {
    /// Failure as a taxonomy error, for logging.  `Timeout` is reported as
    /// an execution failure without an exit code.
    pub fn into_error(self, tool: &str) -> Option<BridgeError> {
        match self {
            DispatchResult::Success => None,
            DispatchResult::ToolMissing(t) => Some(BridgeError::ToolMissing(t)),
            DispatchResult::ExecutionFailed(code, stderr) => Some(BridgeError::ExecutionFailed {
                tool: tool.into(), code, stderr,
            }),
            DispatchResult::Timeout => Some(BridgeError::ExecutionFailed {
                tool:   tool.into(),
                code:   None,
                stderr: "timed out".into(),
            }),
        }
    }
}
