// src/action/mock.rs  -  Command runner that records instead of spawning
use super::runner::CommandRunner;
use super::{ActionCommand, DispatchResult};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Answer = Box<dyn Fn(&ActionCommand) -> DispatchResult + Send + Sync>;

/// Records every command line; answers from a closure.
pub struct RecordingRunner {
    calls:  Mutex<Vec<String>>,
    answer: Answer,
}

impl RecordingRunner {
    pub fn new(answer: impl Fn(&ActionCommand) -> DispatchResult + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(Vec::new()), answer: Box::new(answer) })
    }

    pub fn ok() -> Arc<Self> { Self::new(|_| DispatchResult::Success) }

    pub fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, cmd: &ActionCommand, _timeout: Duration) -> DispatchResult {
        self.calls.lock().unwrap().push(cmd.to_string());
        (self.answer)(cmd)
    }
}
