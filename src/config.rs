// src/config.rs  -  Runtime configuration (CLI + TOML)
use crate::action::executor::ExecutorConfig;
use crate::action::{ActionMode, CustomCommands, DispatchMode, ModeConfig, ScrollPress, Steps, VolumePress};
use crate::device::session::SessionConfig;
use crate::device::watcher::WatcherConfig;
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The example config is embedded directly in the binary at compile time.
/// Users can write it out with:  n1-dial-bridge --write-config
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../config.toml.example");

// ── CLI ───────────────────────────────────────────────────────────────────────
#[derive(Parser, Debug, Default)]
#[command(
    name        = "n1-dial-bridge",
    about       = "Ajazz N1 dial bridge  |  HID encoder → host plugin / system actions",
    version,
)]
pub struct Cli {
    /// Config file path (default: ~/.config/n1-dial-bridge/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Dial mode: volume | media-track | media-seek | scroll | brightness | custom
    #[arg(long)]
    pub mode: Option<ActionMode>,

    /// Where events go: forward (to the host) | direct (run system actions)
    #[arg(long)]
    pub dispatch: Option<DispatchMode>,

    /// Rotation debounce window in ms (default: 10)
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Kill external tools that run longer than this (ms, default: 2000)
    #[arg(long)]
    pub action_timeout_ms: Option<u64>,

    /// Custom mode: shell command for a clockwise detent
    #[arg(long)]
    pub cw_command: Option<String>,

    /// Custom mode: shell command for a counter-clockwise detent
    #[arg(long)]
    pub ccw_command: Option<String>,

    /// Custom mode: shell command on dial press
    #[arg(long)]
    pub press_command: Option<String>,

    /// Custom mode: shell command on dial release
    #[arg(long)]
    pub release_command: Option<String>,

    /// Host channel: stdio (JSON lines) | none
    #[arg(long)]
    pub host: Option<HostTransport>,

    /// Debug logging (same as RUST_LOG=debug)
    #[arg(short, long, action)]
    pub verbose: bool,

    /// List attached Ajazz N1 HID interfaces and exit
    #[arg(long, action)]
    pub list_devices: bool,

    /// Open the first N1, switch it to software mode and print dial events for 10 s
    #[arg(long, action)]
    pub check_device: bool,

    /// Write the built-in default config.toml to the config path and exit.
    /// Use --config <PATH> to write to a custom location.
    #[arg(long, action)]
    pub write_config: bool,

    /// Print the built-in default config.toml to stdout and exit
    #[arg(long, action)]
    pub print_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HostTransport {
    /// JSON lines: events on stdout, settings on stdin
    Stdio,
    /// No host; only direct dispatch does anything
    None,
}

// ── TOML file structure ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    pub device:   Option<DeviceCfg>,
    pub dispatch: Option<DispatchCfg>,
    pub steps:    Option<StepsCfg>,
    pub press:    Option<PressCfg>,
    pub custom:   Option<CustomCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCfg {
    pub debounce_ms:           Option<u64>,
    pub backoff_start_ms:      Option<u64>,
    pub backoff_max_ms:        Option<u64>,
    pub handshake_cooldown_ms: Option<u64>,
    pub read_poll_ms:          Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchCfg {
    pub dispatch:          Option<DispatchMode>,
    pub mode:              Option<ActionMode>,
    pub host:              Option<HostTransport>,
    pub action_timeout_ms: Option<u64>,
    pub workers:           Option<usize>,
    pub queue_depth:       Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsCfg {
    pub volume_percent:     Option<u8>,
    pub seek_seconds:       Option<u32>,
    pub brightness_percent: Option<u8>,
    pub scroll_lines:       Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressCfg {
    pub volume: Option<VolumePress>,
    pub scroll: Option<ScrollPress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCfg {
    pub cw_command:      Option<String>,
    pub ccw_command:     Option<String>,
    pub press_command:   Option<String>,
    pub release_command: Option<String>,
}

// ── Resolved / merged config ──────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub debounce_ms:           u64,
    pub backoff_start_ms:      u64,
    pub backoff_max_ms:        u64,
    pub handshake_cooldown_ms: u64,
    pub read_poll_ms:          u64,
    pub dispatch:              DispatchMode,
    pub mode:                  ActionMode,
    pub host:                  HostTransport,
    pub action_timeout_ms:     u64,
    pub workers:               usize,
    pub queue_depth:           usize,
    pub steps:                 Steps,
    pub volume_press:          VolumePress,
    pub scroll_press:          ScrollPress,
    pub custom:                CustomCommands,
    pub verbose:               bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debounce_ms:           10,
            backoff_start_ms:      500,
            backoff_max_ms:        5000,
            handshake_cooldown_ms: 1000,
            read_poll_ms:          250,
            dispatch:              DispatchMode::Forward,
            mode:                  ActionMode::Volume,
            host:                  HostTransport::Stdio,
            action_timeout_ms:     2000,
            workers:               2,
            queue_depth:           16,
            steps:                 Steps::default(),
            volume_press:          VolumePress::None,
            scroll_press:          ScrollPress::None,
            custom:                CustomCommands::default(),
            verbose:               false,
        }
    }
}

// ── Config loader ─────────────────────────────────────────────────────────────
impl AppConfig {
    /// Write the embedded default config to disk.
    /// Returns the path it was written to.
    pub fn write_default_config(cli: &Cli) -> Result<PathBuf> {
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Creating config directory {:?}", parent))?;
        }
        std::fs::write(&path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Writing config to {:?}", path))?;
        Ok(path)
    }

    pub fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Self::default();

        // 1. Load TOML file
        let path = cli.config.clone().unwrap_or_else(default_config_path);
        if path.exists() {
            let fc = read_file(&path)?;
            cfg.apply_file(&fc);
            log::info!("[config] loaded {}", path.display());
        } else if cli.config.is_some() {
            anyhow::bail!("Config file {:?} does not exist", path);
        } else {
            log::info!(
                "[config] no config file at {}, using defaults  \
                 → `n1-dial-bridge --write-config` creates one",
                path.display()
            );
        }

        // 2. Apply CLI overrides
        cfg.apply_cli(cli);
        cfg.validate();
        Ok(cfg)
    }

    fn apply_file(&mut self, fc: &FileConfig) {
        if let Some(d) = &fc.device {
            if let Some(v) = d.debounce_ms           { self.debounce_ms           = v; }
            if let Some(v) = d.backoff_start_ms      { self.backoff_start_ms      = v; }
            if let Some(v) = d.backoff_max_ms        { self.backoff_max_ms        = v; }
            if let Some(v) = d.handshake_cooldown_ms { self.handshake_cooldown_ms = v; }
            if let Some(v) = d.read_poll_ms          { self.read_poll_ms          = v; }
        }
        if let Some(x) = &fc.dispatch {
            if let Some(v) = x.dispatch          { self.dispatch          = v; }
            if let Some(v) = x.mode              { self.mode              = v; }
            if let Some(v) = x.host              { self.host              = v; }
            if let Some(v) = x.action_timeout_ms { self.action_timeout_ms = v; }
            if let Some(v) = x.workers           { self.workers           = v; }
            if let Some(v) = x.queue_depth       { self.queue_depth       = v; }
        }
        if let Some(s) = &fc.steps {
            if let Some(v) = s.volume_percent     { self.steps.volume_percent     = v; }
            if let Some(v) = s.seek_seconds       { self.steps.seek_seconds       = v; }
            if let Some(v) = s.brightness_percent { self.steps.brightness_percent = v; }
            if let Some(v) = s.scroll_lines       { self.steps.scroll_lines       = v; }
        }
        if let Some(p) = &fc.press {
            if let Some(v) = p.volume { self.volume_press = v; }
            if let Some(v) = p.scroll { self.scroll_press = v; }
        }
        if let Some(c) = &fc.custom {
            if let Some(v) = &c.cw_command      { self.custom.cw      = v.clone(); }
            if let Some(v) = &c.ccw_command     { self.custom.ccw     = v.clone(); }
            if let Some(v) = &c.press_command   { self.custom.press   = v.clone(); }
            if let Some(v) = &c.release_command { self.custom.release = v.clone(); }
        }
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(v) = cli.mode              { self.mode              = v; }
        if let Some(v) = cli.dispatch          { self.dispatch          = v; }
        if let Some(v) = cli.debounce_ms       { self.debounce_ms       = v; }
        if let Some(v) = cli.action_timeout_ms { self.action_timeout_ms = v; }
        if let Some(v) = cli.host              { self.host              = v; }
        if let Some(v) = &cli.cw_command       { self.custom.cw         = v.clone(); }
        if let Some(v) = &cli.ccw_command      { self.custom.ccw        = v.clone(); }
        if let Some(v) = &cli.press_command    { self.custom.press      = v.clone(); }
        if let Some(v) = &cli.release_command  { self.custom.release    = v.clone(); }
        if cli.verbose                         { self.verbose           = true; }
    }

    /// Pull every value into a range the pipeline can work with.
    fn validate(&mut self) {
        let before = (self.debounce_ms, self.action_timeout_ms, self.backoff_start_ms, self.backoff_max_ms);
        self.debounce_ms           = self.debounce_ms.min(500);
        self.action_timeout_ms     = self.action_timeout_ms.clamp(100, 60_000);
        self.backoff_start_ms      = self.backoff_start_ms.clamp(50, 60_000);
        self.backoff_max_ms        = self.backoff_max_ms.clamp(self.backoff_start_ms, 300_000);
        self.handshake_cooldown_ms = self.handshake_cooldown_ms.min(60_000);
        self.read_poll_ms          = self.read_poll_ms.clamp(10, 1000);
        self.workers               = self.workers.clamp(1, 16);
        self.queue_depth           = self.queue_depth.clamp(1, 1024);
        self.steps                 = self.steps.clone().clamped();
        if before != (self.debounce_ms, self.action_timeout_ms, self.backoff_start_ms, self.backoff_max_ms) {
            log::warn!(
                "[config] adjusted out-of-range timing: debounce {} ms, timeout {} ms, backoff {}..{} ms",
                self.debounce_ms, self.action_timeout_ms, self.backoff_start_ms, self.backoff_max_ms
            );
        }
    }

    /// Initial snapshot for the config store.
    pub fn mode_config(&self) -> ModeConfig {
        ModeConfig {
            mode:         self.mode,
            dispatch:     self.dispatch,
            steps:        self.steps.clone(),
            volume_press: self.volume_press,
            scroll_press: self.scroll_press,
            custom:       self.custom.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            debounce:           Duration::from_millis(self.debounce_ms),
            read_poll:          Duration::from_millis(self.read_poll_ms),
            handshake_cooldown: Duration::from_millis(self.handshake_cooldown_ms),
            ..SessionConfig::default()
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            backoff_start: Duration::from_millis(self.backoff_start_ms),
            backoff_max:   Duration::from_millis(self.backoff_max_ms),
            session:       self.session_config(),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            workers:     self.workers,
            queue_depth: self.queue_depth,
            timeout:     Duration::from_millis(self.action_timeout_ms),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Reading config {:?}", path))?;
    toml::from_str(&raw).with_context(|| format!("Parsing config {:?}", path))
}

fn default_config_path() -> PathBuf {
    dirs_next().join("n1-dial-bridge").join("config.toml")
}

fn dirs_next() -> PathBuf {
    if let Ok(v) = std::env::var("XDG_CONFIG_HOME") { return PathBuf::from(v); }
    if let Ok(v) = std::env::var("APPDATA")          { return PathBuf::from(v); }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    PathBuf::from(home).join(".config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with(path: &Path) -> Cli {
        Cli { config: Some(path.to_path_buf()), ..Cli::default() }
    }

    fn write_toml(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn embedded_example_parses_to_defaults() {
        let fc: FileConfig = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        let mut cfg = AppConfig::default();
        cfg.apply_file(&fc);
        cfg.validate();
        assert_eq!(cfg.mode_config(), ModeConfig::default());
        assert_eq!(cfg.debounce_ms, 10);
        assert_eq!(cfg.backoff_max_ms, 5000);
        assert_eq!(cfg.workers, 2);
    }

    #[test]
    fn file_then_cli_layering() {
        let f = write_toml(r#"
            [dispatch]
            dispatch = "direct"
            mode     = "media_seek"

            [steps]
            seek_seconds = 10

            [custom]
            cw_command = "echo file"
        "#);
        let mut cli = cli_with(f.path());
        cli.mode = Some(ActionMode::Custom);
        cli.cw_command = Some("echo cli".into());

        let cfg = AppConfig::load(&cli).unwrap();
        let mc = cfg.mode_config();
        assert_eq!(mc.dispatch, DispatchMode::Direct);
        assert_eq!(mc.mode, ActionMode::Custom);
        assert_eq!(mc.steps.seek_seconds, 10);
        assert_eq!(mc.custom.cw, "echo cli");
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let f = write_toml(r#"
            [device]
            backoff_start_ms = 2000
            backoff_max_ms   = 100

            [dispatch]
            workers = 0
            action_timeout_ms = 1

            [steps]
            volume_percent = 0
        "#);
        let cfg = AppConfig::load(&cli_with(f.path())).unwrap();
        assert_eq!(cfg.backoff_max_ms, 2000);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.action_timeout_ms, 100);
        assert_eq!(cfg.steps.volume_percent, 1);

        let w = cfg.watcher_config();
        assert!(w.backoff_max >= w.backoff_start);
    }

    #[test]
    fn broken_toml_reports_the_file() {
        let f = write_toml("[device\ndebounce_ms = ");
        let err = AppConfig::load(&cli_with(f.path())).unwrap_err();
        assert!(format!("{err:#}").contains("Parsing config"));
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with(&dir.path().join("nope.toml"));
        assert!(AppConfig::load(&cli).is_err());
    }

    #[test]
    fn write_config_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("config.toml");
        let written = AppConfig::write_default_config(&cli_with(&target)).unwrap();
        assert_eq!(written, target);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), DEFAULT_CONFIG_TOML);
    }

    #[test]
    fn durations_flow_into_component_configs() {
        let mut cli = Cli::default();
        cli.debounce_ms = Some(25);
        cli.action_timeout_ms = Some(750);
        let mut cfg = AppConfig::default();
        cfg.apply_cli(&cli);
        cfg.validate();
        assert_eq!(cfg.session_config().debounce, Duration::from_millis(25));
        assert_eq!(cfg.executor_config().timeout, Duration::from_millis(750));
    }
}
