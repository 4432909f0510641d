// src/shutdown.rs  -  Process-wide stop flag with interruptible sleeps
//
// Tripped once from the Ctrl-C handler.  Backoff and cooldown sleeps wake
// immediately when it trips; `wake()` additionally lets a finished device
// session nudge the watcher out of its backoff so re-enumeration starts at
// once.
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct State {
    triggered: bool,
    /// Bumped by `wake()`; `wait_for_wake` returns once it moves past the
    /// epoch the caller saw.
    wakes:     u64,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    cv:    Condvar,
}

#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn trigger(&self) {
        self.lock().triggered = true;
        self.inner.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.lock().triggered
    }

    /// Nudge anyone blocked in `wait_for_wake`.
    pub fn wake(&self) {
        self.lock().wakes += 1;
        self.inner.cv.notify_all();
    }

    /// Sleep for `dur` unless shutdown trips first.  Returns true on shutdown.
    pub fn sleep(&self, dur: Duration) -> bool {
        self.wait_until(dur, None)
    }

    /// Current wake count.  Read it before deciding to wait, then pass it to
    /// `wait_for_wake` so a `wake()` in between is not lost.
    pub fn wake_epoch(&self) -> u64 {
        self.lock().wakes
    }

    /// Like `sleep`, but also returns early once a `wake()` has happened
    /// since `seen` was read.
    pub fn wait_for_wake(&self, dur: Duration, seen: u64) -> bool {
        self.wait_until(dur, Some(seen))
    }

    fn wait_until(&self, dur: Duration, seen: Option<u64>) -> bool {
        let deadline = Instant::now() + dur;
        let mut state = self.lock();
        loop {
            if state.triggered {
                return true;
            }
            if seen.is_some_and(|s| state.wakes != s) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.inner.cv.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(p)         => p.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_runs_to_deadline_when_not_triggered() {
        let s = Shutdown::new();
        let t0 = Instant::now();
        assert!(!s.sleep(Duration::from_millis(20)));
        assert!(t0.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_interrupts_sleep() {
        let s = Shutdown::new();
        let s2 = s.clone();
        let h = thread::spawn(move || s2.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        s.trigger();
        assert!(h.join().unwrap());
        assert!(s.is_triggered());
    }

    #[test]
    fn wake_ends_wait_but_not_plain_sleep() {
        let s = Shutdown::new();
        let s2 = s.clone();
        let h = thread::spawn(move || {
            let t0 = Instant::now();
            let stopped = s2.wait_for_wake(Duration::from_secs(30), s2.wake_epoch());
            (stopped, t0.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        s.wake();
        let (stopped, waited) = h.join().unwrap();
        assert!(!stopped);
        assert!(waited < Duration::from_secs(5));

        let s3 = s.clone();
        let sleeper = thread::spawn(move || s3.sleep(Duration::from_millis(60)));
        thread::sleep(Duration::from_millis(10));
        s.wake();
        assert!(!sleeper.join().unwrap());
    }

    #[test]
    fn wake_before_wait_is_not_lost() {
        let s = Shutdown::new();
        let epoch = s.wake_epoch();
        s.wake();
        let t0 = Instant::now();
        assert!(!s.wait_for_wake(Duration::from_secs(30), epoch));
        assert!(t0.elapsed() < Duration::from_secs(5));
    }
}
