// src/action/executor.rs  -  Fire-and-forget action dispatch on a small worker pool
//
// submit() never blocks the caller beyond a mutex hand-off.  Each mode has
// its own lane: at most one command per mode runs at a time, later ones
// wait in a bounded FIFO and overflow drops the newest request.  Idle lanes
// hand their first job to the pool through an mpsc channel; the worker that
// finishes a job keeps draining that lane, so the in-flight cap holds
// without a separate scheduler thread.
//
// Results never flow back to the submitter.  They are logged (failures once
// per mode session and tool) and optionally copied to a report channel.
use super::runner::CommandRunner;
use super::{ActionCommand, ActionMode, DispatchResult};
use crate::device::session::SessionTag;
use crate::error::BridgeError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub workers:     usize,
    pub queue_depth: usize,
    pub timeout:     Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { workers: 2, queue_depth: 16, timeout: Duration::from_secs(2) }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub mode:    ActionMode,
    pub command: ActionCommand,
    pub tag:     SessionTag,
}

/// Copy of one finished dispatch, for whoever listens on the report channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub device_id: String,
    pub mode:      ActionMode,
    pub command:   String,
    pub result:    DispatchResult,
    /// False when the failure was already warned about this mode session.
    pub surfaced:  bool,
}

#[derive(Default)]
struct Lane {
    pending:   VecDeque<DispatchRequest>,
    in_flight: bool,
}

#[derive(Default)]
struct State {
    lanes:   HashMap<ActionMode, Lane>,
    /// (tool or lane, failure kind) already warned about this mode session.
    warned:  HashSet<(String, &'static str)>,
    session: u64,
}

struct Shared {
    state:   Mutex<State>,
    runner:  Arc<dyn CommandRunner>,
    cfg:     ExecutorConfig,
    reports: Option<Mutex<Sender<DispatchReport>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// True the first time (key, kind) is seen this mode session.
    fn first_warning(&self, key: &str, kind: &'static str) -> bool {
        self.lock().warned.insert((key.to_string(), kind))
    }

    fn execute(&self, req: &DispatchRequest) {
        if !req.tag.is_live() {
            log::debug!("[exec] {} gone, dropping queued `{}`", req.tag.device_id, req.command);
            return;
        }

        log::debug!("[exec] {:?}: {}", req.mode, req.command);
        let result = self.runner.run(&req.command, self.cfg.timeout);

        if !req.tag.is_live() {
            log::debug!("[exec] {} gone, discarding result of `{}`: {result:?}", req.tag.device_id, req.command);
            return;
        }

        let surfaced = self.log_result(req, &result);
        if let Some(tx) = &self.reports {
            let report = DispatchReport {
                device_id: req.tag.device_id.clone(),
                mode:      req.mode,
                command:   req.command.to_string(),
                result,
                surfaced,
            };
            let tx = tx.lock().unwrap_or_else(|p| p.into_inner());
            let _ = tx.send(report);
        }
    }

    /// Returns whether the outcome was logged at warn level.
    fn log_result(&self, req: &DispatchRequest, result: &DispatchResult) -> bool {
        let kind = match result {
            DispatchResult::Success => return false,
            DispatchResult::ToolMissing(_)        => "missing",
            DispatchResult::ExecutionFailed(..)   => "failed",
            DispatchResult::Timeout               => "timeout",
        };
        let tool = req.command.tool().to_string();
        let err = match result.clone().into_error(&tool) {
            Some(e) => e,
            None => return false,
        };
        if self.first_warning(&tool, kind) {
            let hint = match &err {
                BridgeError::ToolMissing(_) => "  → install it or pick another mode",
                _ => "",
            };
            log::warn!("[exec] {:?}: {err}{hint}", req.mode);
            true
        } else {
            log::debug!("[exec] {:?}: {err} (repeat)", req.mode);
            false
        }
    }
}

type Job = DispatchRequest;

/// Pool start attempts inside `new` before carrying on without workers.
const SPAWN_ATTEMPTS: u32 = 3;
/// Pause before the second attempt; doubles after that.
const SPAWN_RETRY: Duration = Duration::from_millis(50);
/// While the pool is short of workers, `submit` retries at most this often.
const TOP_UP_EVERY: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Pool {
    handles:  Vec<JoinHandle<()>>,
    started:  usize,
    last_try: Option<Instant>,
}

pub struct Executor {
    shared: Arc<Shared>,
    tx:     Option<Sender<Job>>,
    rx:     Arc<Mutex<Receiver<Job>>>,
    pool:   Mutex<Pool>,
}

impl Executor {
    /// Start the pool.  If the OS refuses every worker thread, jobs stay in
    /// the channel and `submit` keeps trying to start workers.
    pub fn new(
        runner:  Arc<dyn CommandRunner>,
        cfg:     ExecutorConfig,
        reports: Option<Sender<DispatchReport>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            state:   Mutex::new(State::default()),
            runner,
            cfg,
            reports: reports.map(Mutex::new),
        });
        let (tx, rx) = mpsc::channel::<Job>();
        let ex = Self {
            shared,
            tx:   Some(tx),
            rx:   Arc::new(Mutex::new(rx)),
            pool: Mutex::new(Pool::default()),
        };

        let mut pause = SPAWN_RETRY;
        let mut running = 0;
        for attempt in 1..=SPAWN_ATTEMPTS {
            running = ex.top_up(&mut ex.lock_pool());
            if running > 0 || attempt == SPAWN_ATTEMPTS {
                break;
            }
            thread::sleep(pause);
            pause *= 2;
        }
        if running == 0 {
            log::error!("[exec] no worker could be started, retrying as actions arrive");
        } else {
            log::info!(
                "[exec] {running} worker(s), queue depth {}, timeout {:?}",
                cfg.queue_depth, cfg.timeout
            );
        }
        ex
    }

    fn lock_pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start workers until the configured count runs.  Returns how many run.
    fn top_up(&self, pool: &mut Pool) -> usize {
        if self.tx.is_none() {
            return pool.handles.len();
        }
        pool.handles.retain(|h| !h.is_finished());
        pool.last_try = Some(Instant::now());
        let want = self.shared.cfg.workers.max(1);
        while pool.handles.len() < want {
            let n = pool.started;
            let shared = Arc::clone(&self.shared);
            let rx = Arc::clone(&self.rx);
            match thread::Builder::new()
                .name(format!("n1-exec-{n}"))
                .spawn(move || worker_loop(shared, rx))
            {
                Ok(h) => {
                    pool.handles.push(h);
                    pool.started += 1;
                }
                Err(e) => {
                    log::warn!("[exec] {}", BridgeError::Spawn(format!("worker {n}: {e}")));
                    break;
                }
            }
        }
        pool.handles.len()
    }

    /// Retry starting workers if the pool is short, at most every `TOP_UP_EVERY`.
    fn maintain_pool(&self) {
        let mut pool = self.lock_pool();
        let short = pool.handles.len() < self.shared.cfg.workers.max(1)
            || pool.handles.iter().any(|h| h.is_finished());
        let due = pool.last_try.map_or(true, |t| t.elapsed() >= TOP_UP_EVERY);
        if short && due {
            let running = self.top_up(&mut pool);
            log::debug!("[exec] {running} worker(s) running after top-up");
        }
    }

    /// Queue a command.  Returns false if it was dropped because the mode's
    /// lane is full.
    pub fn submit(&self, req: DispatchRequest) -> bool {
        self.maintain_pool();
        let mode = req.mode;
        let mut st = self.shared.lock();
        let depth = self.shared.cfg.queue_depth;
        let lane = st.lanes.entry(mode).or_default();

        if !lane.in_flight {
            lane.in_flight = true;
            drop(st);
            return self.dispatch(req);
        }
        if lane.pending.len() >= depth {
            drop(st);
            if self.shared.first_warning(&format!("{mode:?}"), "overflow") {
                log::warn!("[exec] {mode:?}: {depth} action(s) already queued, dropping `{}`", req.command);
            } else {
                log::debug!("[exec] {mode:?}: lane full, dropped `{}`", req.command);
            }
            return false;
        }
        lane.pending.push_back(req);
        true
    }

    fn dispatch(&self, req: DispatchRequest) -> bool {
        let mode = req.mode;
        let sent = self.tx.as_ref().map(|tx| tx.send(req).is_ok()).unwrap_or(false);
        if !sent {
            // Pool is gone (shutting down); free the lane again.
            if let Some(lane) = self.shared.lock().lanes.get_mut(&mode) {
                lane.in_flight = false;
            }
        }
        sent
    }

    /// Forget which failures were already reported.  Called when the active
    /// mode configuration changes.
    pub fn begin_mode_session(&self) {
        let mut st = self.shared.lock();
        st.warned.clear();
        st.session += 1;
        log::debug!("[exec] mode session #{}", st.session);
    }

    /// Number of requests waiting (not running) in a mode's lane.
    #[cfg(test)]
    pub fn pending(&self, mode: ActionMode) -> usize {
        self.shared.lock().lanes.get(&mode).map(|l| l.pending.len()).unwrap_or(0)
    }

    #[cfg(test)]
    fn workers(&self) -> usize {
        self.lock_pool().handles.len()
    }

    /// Stop accepting work and wait for the workers.  Running commands are
    /// bounded by the timeout; queued ones are abandoned.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let mut st = self.shared.lock();
            for lane in st.lanes.values_mut() {
                lane.pending.clear();
            }
        }
        self.tx = None;
        let handles = std::mem::take(&mut self.lock_pool().handles);
        for h in handles {
            if h.join().is_err() {
                log::error!("[exec] worker panicked");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let rx = rx.lock().unwrap_or_else(|p| p.into_inner());
            rx.recv()
        };
        let mut job = match job {
            Ok(j) => j,
            Err(_) => break,
        };
        // Keep draining this lane until it is empty.  A panicking run must
        // not leave the lane marked in flight.
        loop {
            if panic::catch_unwind(AssertUnwindSafe(|| shared.execute(&job))).is_err() {
                log::error!("[exec] {:?}: `{}` panicked, moving on", job.mode, job.command);
            }
            let mut st = shared.lock();
            let lane = st.lanes.entry(job.mode).or_default();
            match lane.pending.pop_front() {
                Some(next) => job = next,
                None => {
                    lane.in_flight = false;
                    break;
                }
            }
        }
    }
}
