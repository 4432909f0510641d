// src/router.rs  -  Classified events → host bridge or action executor
use crate::action::executor::{DispatchRequest, Executor};
use crate::action::{plan, DispatchMode, ModeConfig};
use crate::bridge::{ConfigStore, HostChannel, HostEvent};
use crate::classifier::SemanticEvent;
use crate::device::session::SessionTag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Receives everything a device session produces.  Called from the
/// session's read thread, so implementations must only hand work off:
/// `Router` queues host events (`QueuedChannel` in production) and
/// submits actions to the executor without waiting on either.
pub trait EventSink: Send + Sync {
    fn device_connected(&self, _tag: &SessionTag) {}
    fn device_disconnected(&self, _tag: &SessionTag) {}
    fn on_event(&self, tag: &SessionTag, event: SemanticEvent);
}

pub struct Router {
    store:    Arc<ConfigStore>,
    host:     Option<Arc<dyn HostChannel>>,
    executor: Arc<Executor>,
    /// Config the executor's current mode session was started for.
    active:   Mutex<Option<Arc<ModeConfig>>>,
    /// Host write failures are warned about once.
    host_err: AtomicBool,
}

impl Router {
    pub fn new(store: Arc<ConfigStore>, host: Option<Arc<dyn HostChannel>>, executor: Arc<Executor>) -> Self {
        Self { store, host, executor, active: Mutex::new(None), host_err: AtomicBool::new(false) }
    }

    fn send_host(&self, event: &HostEvent) {
        let Some(host) = &self.host else {
            log::debug!("[bridge] no host channel, not sent: {event:?}");
            return;
        };
        match host.send(event) {
            Ok(()) => { self.host_err.store(false, Ordering::Relaxed); }
            Err(e) if !self.host_err.swap(true, Ordering::Relaxed) => {
                log::warn!("[bridge] host write failed: {e}");
            }
            Err(e) => log::debug!("[bridge] host write failed: {e}"),
        }
    }

    /// A settings change that alters the config starts a new mode session,
    /// so tool failures are reported again.
    fn track_mode_session(&self, cfg: &Arc<ModeConfig>) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        let changed = match active.as_ref() {
            Some(prev) => !Arc::ptr_eq(prev, cfg) && **prev != **cfg,
            None => true,
        };
        if changed {
            log::info!("[exec] mode {:?} ({:?})", cfg.mode, cfg.dispatch);
            self.executor.begin_mode_session();
        }
        *active = Some(Arc::clone(cfg));
    }
}

impl EventSink for Router {
    fn device_connected(&self, tag: &SessionTag) {
        self.send_host(&HostEvent::register(&tag.device_id));
    }

    fn device_disconnected(&self, tag: &SessionTag) {
        self.send_host(&HostEvent::unregister(&tag.device_id));
    }

    fn on_event(&self, tag: &SessionTag, event: SemanticEvent) {
        let cfg = self.store.snapshot();
        match cfg.dispatch {
            DispatchMode::Forward => self.send_host(&HostEvent::from_event(&tag.device_id, &event)),
            DispatchMode::Direct => {
                self.track_mode_session(&cfg);
                match plan(&cfg, event.kind) {
                    Some(command) => {
                        self.executor.submit(DispatchRequest { mode: cfg.mode, command, tag: tag.clone() });
                    }
                    None => log::debug!("[exec] {:?}: nothing bound to {:?}", cfg.mode, event.kind),
                }
            }
        }
    }
}
