use super::{BackendEvent, LoadTicket, MediaBackend, MediaSignal};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Load { ticket: LoadTicket, path: PathBuf },
    Pause,
    Resume,
    ClearSource,
    Seek(f64),
    Volume(f32),
}

#[derive(Debug)]
struct ScriptState {
    calls: Vec<BackendCall>,
    queued: Vec<BackendEvent>,
    last_ticket: Option<LoadTicket>,
    has_source: bool,
    auto_start: bool,
    start_duration: Option<f64>,
}

/// Test-side view of a [`ScriptedBackend`]: inspect recorded calls and
/// inject backend signals.
#[derive(Debug, Clone)]
pub struct ScriptHandle(Rc<RefCell<ScriptState>>);

/// Deterministic backend that records every command and only reports what
/// the test script tells it to. With auto-start on (the default) each load
/// immediately queues a duration and a start signal.
#[derive(Debug)]
pub struct ScriptedBackend {
    state: ScriptHandle,
}

impl ScriptedBackend {
    pub fn new() -> (Self, ScriptHandle) {
        let handle = ScriptHandle(Rc::new(RefCell::new(ScriptState {
            calls: Vec::new(),
            queued: Vec::new(),
            last_ticket: None,
            has_source: false,
            auto_start: true,
            start_duration: Some(180.0),
        })));
        (
            Self {
                state: handle.clone(),
            },
            handle,
        )
    }
}

impl ScriptHandle {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.0.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.0.borrow_mut().calls.clear();
    }

    pub fn loads(&self) -> Vec<PathBuf> {
        self.0
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Load { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &BackendCall) -> usize {
        self.0.borrow().calls.iter().filter(|c| *c == call).count()
    }

    pub fn last_ticket(&self) -> Option<LoadTicket> {
        self.0.borrow().last_ticket
    }

    pub fn has_source(&self) -> bool {
        self.0.borrow().has_source
    }

    pub fn set_auto_start(&self, enabled: bool) {
        self.0.borrow_mut().auto_start = enabled;
    }

    /// Duration reported on auto-start; `None` leaves it unknown.
    pub fn set_start_duration(&self, seconds: Option<f64>) {
        self.0.borrow_mut().start_duration = seconds;
    }

    /// Queues `signal` for the most recent load.
    pub fn emit(&self, signal: MediaSignal) {
        let ticket = self.last_ticket().unwrap_or_default();
        self.emit_for(ticket, signal);
    }

    pub fn emit_for(&self, ticket: LoadTicket, signal: MediaSignal) {
        self.0
            .borrow_mut()
            .queued
            .push(BackendEvent::new(ticket, signal));
    }
}

impl MediaBackend for ScriptedBackend {
    fn load_and_start(&mut self, ticket: LoadTicket, source: &Path) {
        let mut state = self.state.0.borrow_mut();
        state.calls.push(BackendCall::Load {
            ticket,
            path: source.to_path_buf(),
        });
        state.last_ticket = Some(ticket);
        state.has_source = true;
        if state.auto_start {
            if let Some(seconds) = state.start_duration {
                state
                    .queued
                    .push(BackendEvent::new(ticket, MediaSignal::DurationChanged(seconds)));
            }
            state
                .queued
                .push(BackendEvent::new(ticket, MediaSignal::CanPlay));
        }
    }

    fn pause(&mut self) {
        self.state.0.borrow_mut().calls.push(BackendCall::Pause);
    }

    fn resume(&mut self) {
        self.state.0.borrow_mut().calls.push(BackendCall::Resume);
    }

    fn clear_source(&mut self) {
        let mut state = self.state.0.borrow_mut();
        state.calls.push(BackendCall::ClearSource);
        state.has_source = false;
    }

    fn has_source(&self) -> bool {
        self.state.has_source()
    }

    fn seek(&mut self, seconds: f64) {
        self.state.0.borrow_mut().calls.push(BackendCall::Seek(seconds));
    }

    fn set_output_volume(&mut self, volume: f32) {
        self.state.0.borrow_mut().calls.push(BackendCall::Volume(volume));
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.state.0.borrow_mut().queued)
    }

    fn output_name(&self) -> String {
        String::from("Scripted output")
    }
}
