// src/main.rs  -  n1-dial-bridge entry point
mod action;
mod bridge;
mod classifier;
mod config;
mod device;
mod error;
mod router;
mod shutdown;

use action::executor::Executor;
use action::runner::ProcessRunner;
use action::DispatchMode;
use anyhow::{Context, Result};
use bridge::{ConfigStore, HostChannel, JsonLines, QueuedChannel};
use clap::Parser;
use classifier::{EncoderEvent, SemanticEvent};
use config::{AppConfig, Cli, HostTransport};
use device::session::SessionTag;
use device::watcher::DeviceWatcher;
use device::HidBackend;
use router::{EventSink, Router};
use shutdown::Shutdown;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long `--check-device` listens.
const CHECK_WINDOW: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the host channel.
    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    // ── --print-config  ───────────────────────────────────────────────────────
    if cli.print_config {
        print!("{}", config::DEFAULT_CONFIG_TOML);
        return Ok(());
    }

    // ── --write-config  ───────────────────────────────────────────────────────
    if cli.write_config {
        let path = AppConfig::write_default_config(&cli)?;
        println!("Config written to: {}", path.display());
        println!("Edit it to pick a dial mode, step sizes or custom commands.");
        return Ok(());
    }

    // ── --list-devices  ───────────────────────────────────────────────────────
    if cli.list_devices {
        let mut backend = hid_backend()?;
        let all = backend.enumerate().context("Enumerating HID devices")?;
        let lines = device::describe(&all);
        if lines.is_empty() {
            println!(
                "No Ajazz N1 found ({:04x}:{:04x}). Is it plugged in?",
                device::N1_VID, device::N1_PID
            );
            #[cfg(feature = "hid")]
            print!("{}", device::hid::permission_hint());
            println!();
        } else {
            println!("Ajazz N1 HID interfaces:");
            for l in &lines { println!("  {l}"); }
        }
        return Ok(());
    }

    // ── Load config ───────────────────────────────────────────────────────────
    let cfg = AppConfig::load(&cli)?;

    let shutdown = Shutdown::new();
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("Ctrl-C received, shutting down");
            s.trigger();
        })
        .context("Installing Ctrl-C handler")?;
    }

    // ── --check-device  ───────────────────────────────────────────────────────
    if cli.check_device {
        let ok = check_device(hid_backend()?, &cfg, shutdown)?;
        std::process::exit(if ok { 0 } else { 1 });
    }

    run(cfg, hid_backend()?, shutdown)
}

#[cfg(feature = "hid")]
fn hid_backend() -> Result<Box<dyn HidBackend>> {
    Ok(Box::new(device::hid::HidApiBackend::new()))
}

#[cfg(not(feature = "hid"))]
fn hid_backend() -> Result<Box<dyn HidBackend>> {
    anyhow::bail!("built without HID support (enable the `hid` feature)")
}

fn run(cfg: AppConfig, backend: Box<dyn HidBackend>, shutdown: Shutdown) -> Result<()> {
    log::info!(
        "[config] mode {:?}, dispatch {:?}, host {:?}, debounce {} ms",
        cfg.mode, cfg.dispatch, cfg.host, cfg.debounce_ms
    );

    let store = Arc::new(ConfigStore::new(cfg.mode_config()));
    let executor = Arc::new(Executor::new(Arc::new(ProcessRunner), cfg.executor_config(), None));

    let host: Option<Arc<dyn HostChannel>> = match cfg.host {
        HostTransport::Stdio => {
            bridge::spawn_reader(BufReader::new(io::stdin()), Arc::clone(&store), shutdown.clone())
                .context("Starting host channel reader")?;
            let stdout: Arc<dyn HostChannel> = Arc::new(JsonLines::new(io::stdout()));
            let queued = QueuedChannel::spawn(stdout, bridge::HOST_QUEUE)
                .context("Starting host channel writer")?;
            Some(Arc::new(queued))
        }
        HostTransport::None => {
            if cfg.dispatch == DispatchMode::Forward {
                log::warn!("[bridge] dispatch is `forward` but no host channel is configured; events will be dropped");
            }
            None
        }
    };

    let router = Arc::new(Router::new(Arc::clone(&store), host, Arc::clone(&executor)));
    let watcher = DeviceWatcher::new(backend, cfg.watcher_config(), router.clone(), shutdown.clone());
    let handle = watcher.spawn().context("Starting device watcher")?;

    if handle.join().is_err() {
        log::error!("[watcher] thread panicked");
    }

    drop(router);
    match Arc::try_unwrap(executor) {
        Ok(ex) => ex.shutdown(),
        Err(_) => log::debug!("[exec] still referenced at exit, workers left to the OS"),
    }
    log::info!("n1-dial-bridge stopped");
    Ok(())
}

/// Prints what the session produces instead of routing it.
#[derive(Default)]
struct PrintSink {
    events: AtomicUsize,
}

impl EventSink for PrintSink {
    fn device_connected(&self, tag: &SessionTag) {
        println!("  {} connected, software mode active. Turn and press the dial…", tag.device_id);
    }

    fn device_disconnected(&self, tag: &SessionTag) {
        println!("  {} disconnected", tag.device_id);
    }

    fn on_event(&self, tag: &SessionTag, event: SemanticEvent) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let what = match event.kind {
            EncoderEvent::Twist(d) => format!("twist {:+}", d.ticks()),
            EncoderEvent::Press    => "press".into(),
            EncoderEvent::Release  => "release".into(),
        };
        println!("  {}  encoder {}  {what}", tag.device_id, event.encoder);
    }
}

/// Open the dial, print events for a while.  True if at least one arrived.
fn check_device(backend: Box<dyn HidBackend>, cfg: &AppConfig, shutdown: Shutdown) -> Result<bool> {
    println!("Checking Ajazz N1 for {} s (Ctrl-C to stop early)…", CHECK_WINDOW.as_secs());
    let sink = Arc::new(PrintSink::default());
    let watcher = DeviceWatcher::new(backend, cfg.watcher_config(), sink.clone(), shutdown.clone());
    let handle = watcher.spawn().context("Starting device watcher")?;

    shutdown.sleep(CHECK_WINDOW);
    shutdown.trigger();
    if handle.join().is_err() {
        log::error!("[watcher] thread panicked");
    }

    let n = sink.events.load(Ordering::Relaxed);
    if n > 0 {
        println!("OK: {n} dial event(s) decoded.");
    } else {
        println!("No dial events seen.  Check the connection and permissions (--list-devices).");
    }
    Ok(n > 0)
}
