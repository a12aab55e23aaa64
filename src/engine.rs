use crate::audio::{BackendEvent, LoadTicket, MediaBackend, MediaErrorKind, MediaSignal};
use crate::model::{PlayMode, PlaybackStatus, Settings, Track, TrackId};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started { track: TrackId },
    TimeAdvanced { current_time: f64 },
    Ended { track: TrackId },
    Errored {
        track: Option<TrackId>,
        kind: MediaErrorKind,
    },
    PlayStateChanged { playing: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub active_track: Option<Track>,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub volume: f32,
    pub muted: bool,
    pub play_mode: PlayMode,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn active_id(&self) -> Option<TrackId> {
        self.active_track.as_ref().map(|track| track.id)
    }
}

/// While settling, errors from the recovered load (or anything older) are
/// dropped. Recovery tears the broken stream down, and that teardown may
/// raise errors of its own. A load started after recovery is not covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecoveryGuard {
    Ready,
    Settling { until: Instant, ticket: LoadTicket },
}

pub struct PlaybackEngine {
    backend: Box<dyn MediaBackend>,
    state: PlaybackState,
    latest: LoadTicket,
    recovery: RecoveryGuard,
    error_settle: Duration,
    subscribers: Vec<Sender<EngineEvent>>,
}

impl PlaybackEngine {
    pub fn new(backend: Box<dyn MediaBackend>, settings: &Settings) -> Self {
        let mut engine = Self {
            backend,
            state: PlaybackState {
                status: PlaybackStatus::Idle,
                active_track: None,
                current_time: 0.0,
                duration: None,
                volume: settings.volume.clamp(0.0, 1.0),
                muted: settings.muted,
                play_mode: settings.play_mode,
            },
            latest: LoadTicket::default(),
            recovery: RecoveryGuard::Ready,
            error_settle: Duration::from_millis(settings.error_settle_ms),
            subscribers: Vec::new(),
        };
        engine.apply_output_volume();
        engine
    }

    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn output_name(&self) -> String {
        self.backend.output_name()
    }

    /// Starts `track`. Any start still pending from an earlier call is
    /// superseded: its late signals are dropped instead of reported.
    pub fn load_and_play(&mut self, track: Track) {
        self.latest = self.latest.next();
        info!(id = %track.id, title = %track.display_title, "loading track");
        self.backend.load_and_start(self.latest, &track.path);
        self.state.active_track = Some(track);
        self.state.current_time = 0.0;
        self.state.duration = None;
        self.state.status = PlaybackStatus::Loading;
    }

    pub fn pause(&mut self) {
        if self.state.status != PlaybackStatus::Playing {
            return;
        }
        self.backend.pause();
        self.state.status = PlaybackStatus::Paused;
        self.emit(EngineEvent::PlayStateChanged { playing: false });
    }

    pub fn resume(&mut self) {
        if self.state.status != PlaybackStatus::Paused {
            return;
        }
        self.backend.resume();
        self.state.status = PlaybackStatus::Playing;
        self.emit(EngineEvent::PlayStateChanged { playing: true });
    }

    pub fn stop(&mut self) {
        let was_playing = self.state.is_playing();
        // Outstanding signals belong to the stream being torn down.
        self.latest = self.latest.next();
        self.state.status = PlaybackStatus::Idle;
        self.state.active_track = None;
        self.state.current_time = 0.0;
        self.state.duration = None;
        if self.backend.has_source() {
            self.backend.clear_source();
        }
        if was_playing {
            self.emit(EngineEvent::PlayStateChanged { playing: false });
        }
    }

    pub fn seek(&mut self, seconds: f64) {
        if self.state.status == PlaybackStatus::Idle || !seconds.is_finite() {
            return;
        }
        let Some(duration) = self.state.duration.and_then(valid_seconds) else {
            debug!("seek ignored: duration unknown");
            return;
        };
        let target = seconds.clamp(0.0, duration);
        self.backend.seek(target);
        self.state.current_time = target;
    }

    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_nan() {
            return;
        }
        self.state.volume = volume.clamp(0.0, 1.0);
        self.apply_output_volume();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.state.muted = muted;
        self.apply_output_volume();
    }

    pub fn toggle_muted(&mut self) -> bool {
        self.set_muted(!self.state.muted);
        self.state.muted
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        self.state.play_mode = mode;
    }

    pub fn cycle_play_mode(&mut self) -> PlayMode {
        self.state.play_mode = self.state.play_mode.next();
        info!(mode = ?self.state.play_mode, "play mode changed");
        self.state.play_mode
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self.recovery, RecoveryGuard::Settling { until, .. } if Instant::now() < until)
    }

    /// Errored -> Idle. Arms the guard for the current load, then stops the
    /// broken stream.
    pub fn begin_recovery(&mut self) {
        self.recovery = RecoveryGuard::Settling {
            until: Instant::now() + self.error_settle,
            ticket: self.latest,
        };
        self.stop();
    }

    fn settling_covers(&self, ticket: LoadTicket) -> bool {
        match self.recovery {
            RecoveryGuard::Settling {
                until,
                ticket: recovered,
            } => Instant::now() < until && ticket <= recovered,
            RecoveryGuard::Ready => false,
        }
    }

    /// Drains backend signals and applies them in the order they were raised.
    pub fn pump(&mut self) {
        for event in self.backend.poll_events() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: BackendEvent) {
        if event.ticket != self.latest {
            debug!(?event, "dropping signal from a superseded load");
            return;
        }

        match event.signal {
            MediaSignal::CanPlay => {
                if self.state.status != PlaybackStatus::Loading {
                    return;
                }
                self.state.status = PlaybackStatus::Playing;
                if let Some(id) = self.state.active_id() {
                    self.emit(EngineEvent::Started { track: id });
                }
                self.emit(EngineEvent::PlayStateChanged { playing: true });
            }
            MediaSignal::DurationChanged(seconds) => {
                self.state.duration = valid_seconds(seconds);
            }
            MediaSignal::TimeUpdate(seconds) => {
                if !matches!(
                    self.state.status,
                    PlaybackStatus::Playing | PlaybackStatus::Paused
                ) || !seconds.is_finite()
                {
                    return;
                }
                self.state.current_time = seconds.max(0.0);
                self.emit(EngineEvent::TimeAdvanced {
                    current_time: self.state.current_time,
                });
            }
            MediaSignal::Ended => {
                if !matches!(
                    self.state.status,
                    PlaybackStatus::Playing | PlaybackStatus::Paused
                ) {
                    return;
                }
                self.state.status = PlaybackStatus::Ended;
                if let Some(duration) = self.state.duration {
                    self.state.current_time = duration;
                }
                self.emit(EngineEvent::PlayStateChanged { playing: false });
                if let Some(id) = self.state.active_id() {
                    self.emit(EngineEvent::Ended { track: id });
                }
            }
            MediaSignal::Error(kind) => self.apply_error(event.ticket, kind),
        }
    }

    fn apply_error(&mut self, ticket: LoadTicket, kind: MediaErrorKind) {
        if kind.is_benign() {
            debug!("start request aborted by a newer one");
            return;
        }
        if self.settling_covers(ticket) {
            warn!("ignoring {} while recovering from an earlier error", kind.label());
            return;
        }
        if !self.state.status.is_active() {
            debug!(status = ?self.state.status, "ignoring {} outside active playback", kind.label());
            return;
        }

        let was_playing = self.state.is_playing();
        self.state.status = PlaybackStatus::Errored;
        warn!(
            track = ?self.state.active_track.as_ref().map(|t| t.display_title.as_str()),
            "playback failed: {}",
            kind.label()
        );
        if was_playing {
            self.emit(EngineEvent::PlayStateChanged { playing: false });
        }
        self.emit(EngineEvent::Errored {
            track: self.state.active_id(),
            kind,
        });
    }

    fn apply_output_volume(&mut self) {
        let output = if self.state.muted {
            0.0
        } else {
            self.state.volume
        };
        self.backend.set_output_volume(output);
    }

    fn emit(&mut self, event: EngineEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

fn valid_seconds(seconds: f64) -> Option<f64> {
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BackendCall, ScriptHandle, ScriptedBackend};
    use std::path::PathBuf;
    use std::thread;

    fn track(id: u64, name: &str) -> Track {
        Track {
            id: TrackId::new(id),
            path: PathBuf::from(format!("/music/{name}.mp3")),
            metadata: None,
            display_title: format!("{name}.mp3"),
        }
    }

    fn engine_with(settings: &Settings) -> (PlaybackEngine, ScriptHandle, Receiver<EngineEvent>) {
        let (backend, handle) = ScriptedBackend::new();
        let mut engine = PlaybackEngine::new(Box::new(backend), settings);
        let events = engine.subscribe();
        (engine, handle, events)
    }

    fn engine() -> (PlaybackEngine, ScriptHandle, Receiver<EngineEvent>) {
        engine_with(&Settings::default())
    }

    fn drain(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        events.try_iter().collect()
    }

    #[test]
    fn load_and_play_moves_through_loading_to_playing() {
        let (mut engine, handle, events) = engine();
        engine.load_and_play(track(1, "a"));
        assert_eq!(engine.status(), PlaybackStatus::Loading);
        assert_eq!(handle.loads(), vec![PathBuf::from("/music/a.mp3")]);

        engine.pump();

        assert_eq!(engine.status(), PlaybackStatus::Playing);
        assert_eq!(engine.state().duration, Some(180.0));
        assert_eq!(
            drain(&events),
            vec![
                EngineEvent::Started {
                    track: TrackId::new(1)
                },
                EngineEvent::PlayStateChanged { playing: true },
            ]
        );
    }

    #[test]
    fn superseded_start_is_cancelled_not_failed() {
        let (mut engine, handle, events) = engine();
        handle.set_auto_start(false);

        engine.load_and_play(track(1, "a"));
        let first = handle.last_ticket().expect("ticket");
        engine.load_and_play(track(2, "b"));
        let second = handle.last_ticket().expect("ticket");

        handle.emit_for(first, MediaSignal::Error(MediaErrorKind::Aborted));
        handle.emit_for(first, MediaSignal::Error(MediaErrorKind::Decode));
        handle.emit_for(first, MediaSignal::CanPlay);
        engine.pump();
        assert_eq!(engine.status(), PlaybackStatus::Loading);
        assert!(drain(&events).is_empty());

        handle.emit_for(second, MediaSignal::CanPlay);
        engine.pump();
        assert_eq!(engine.status(), PlaybackStatus::Playing);
        assert_eq!(engine.state().active_id(), Some(TrackId::new(2)));
    }

    #[test]
    fn aborted_error_on_current_load_is_benign() {
        let (mut engine, handle, events) = engine();
        handle.set_auto_start(false);
        engine.load_and_play(track(1, "a"));
        handle.emit(MediaSignal::Error(MediaErrorKind::Aborted));
        engine.pump();
        assert_eq!(engine.status(), PlaybackStatus::Loading);
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let (mut engine, handle, events) = engine();
        engine.pause();
        engine.resume();
        assert!(handle.calls().iter().all(|call| !matches!(call, BackendCall::Pause | BackendCall::Resume)));

        engine.load_and_play(track(1, "a"));
        engine.pump();
        drain(&events);

        engine.pause();
        engine.pause();
        assert_eq!(engine.status(), PlaybackStatus::Paused);
        engine.resume();
        engine.resume();
        assert_eq!(engine.status(), PlaybackStatus::Playing);
        assert_eq!(handle.count(&BackendCall::Pause), 1);
        assert_eq!(handle.count(&BackendCall::Resume), 1);
        assert_eq!(
            drain(&events),
            vec![
                EngineEvent::PlayStateChanged { playing: false },
                EngineEvent::PlayStateChanged { playing: true },
            ]
        );
    }

    #[test]
    fn stop_resets_state_and_clears_source_once() {
        let (mut engine, handle, _events) = engine();
        engine.load_and_play(track(1, "a"));
        engine.pump();
        handle.emit(MediaSignal::TimeUpdate(42.0));
        engine.pump();
        assert_eq!(engine.state().current_time, 42.0);

        engine.stop();
        engine.stop();

        assert_eq!(engine.status(), PlaybackStatus::Idle);
        assert_eq!(engine.state().active_track, None);
        assert_eq!(engine.state().current_time, 0.0);
        assert_eq!(handle.count(&BackendCall::ClearSource), 1);
    }

    #[test]
    fn signals_after_stop_are_dropped() {
        let (mut engine, handle, events) = engine();
        handle.set_auto_start(false);
        engine.load_and_play(track(1, "a"));
        engine.stop();
        handle.emit(MediaSignal::CanPlay);
        handle.emit(MediaSignal::Error(MediaErrorKind::Network));
        engine.pump();
        assert_eq!(engine.status(), PlaybackStatus::Idle);
        assert!(drain(&events).is_empty());
    }

    #[test]
    fn seek_clamps_and_ignores_unknown_duration() {
        let (mut engine, handle, _events) = engine();
        engine.seek(10.0);
        assert!(!handle.calls().iter().any(|call| matches!(call, BackendCall::Seek(_))));

        handle.set_start_duration(None);
        engine.load_and_play(track(1, "a"));
        engine.pump();
        engine.seek(10.0);
        assert!(!handle.calls().iter().any(|call| matches!(call, BackendCall::Seek(_))));

        handle.emit(MediaSignal::DurationChanged(f64::NAN));
        engine.pump();
        engine.seek(10.0);
        assert!(!handle.calls().iter().any(|call| matches!(call, BackendCall::Seek(_))));

        handle.emit(MediaSignal::DurationChanged(120.0));
        engine.pump();
        engine.seek(500.0);
        engine.seek(-3.0);
        assert_eq!(handle.count(&BackendCall::Seek(120.0)), 1);
        assert_eq!(handle.count(&BackendCall::Seek(0.0)), 1);
        assert_eq!(engine.state().current_time, 0.0);
    }

    #[test]
    fn volume_is_clamped_and_mute_keeps_last_volume() {
        let (mut engine, handle, _events) = engine();
        engine.set_volume(1.7);
        assert_eq!(engine.state().volume, 1.0);
        engine.set_volume(-0.2);
        assert_eq!(engine.state().volume, 0.0);
        engine.set_volume(0.6);

        assert!(engine.toggle_muted());
        assert_eq!(engine.state().volume, 0.6);
        assert_eq!(handle.calls().last(), Some(&BackendCall::Volume(0.0)));

        assert!(!engine.toggle_muted());
        assert_eq!(handle.calls().last(), Some(&BackendCall::Volume(0.6)));
    }

    #[test]
    fn cycling_play_mode_three_times_returns_to_start() {
        let (mut engine, _handle, _events) = engine();
        assert_eq!(engine.cycle_play_mode(), PlayMode::SingleRepeat);
        assert_eq!(engine.cycle_play_mode(), PlayMode::Shuffle);
        assert_eq!(engine.cycle_play_mode(), PlayMode::SequentialLoop);
    }

    #[test]
    fn natural_end_emits_ended_for_active_track() {
        let (mut engine, handle, events) = engine();
        engine.load_and_play(track(7, "a"));
        engine.pump();
        drain(&events);

        handle.emit(MediaSignal::Ended);
        handle.emit(MediaSignal::Ended);
        engine.pump();

        assert_eq!(engine.status(), PlaybackStatus::Ended);
        assert_eq!(engine.state().current_time, 180.0);
        assert_eq!(
            drain(&events),
            vec![
                EngineEvent::PlayStateChanged { playing: false },
                EngineEvent::Ended {
                    track: TrackId::new(7)
                },
            ]
        );
    }

    #[test]
    fn errors_are_reported_once_and_ignored_while_settling() {
        let settings = Settings {
            error_settle_ms: 30,
            ..Settings::default()
        };
        let (mut engine, handle, events) = engine_with(&settings);
        engine.load_and_play(track(1, "a"));
        let failed = handle.last_ticket().expect("ticket");
        engine.pump();
        drain(&events);

        handle.emit(MediaSignal::Error(MediaErrorKind::Decode));
        handle.emit(MediaSignal::Error(MediaErrorKind::Decode));
        engine.pump();
        assert_eq!(engine.status(), PlaybackStatus::Errored);
        let errors = drain(&events)
            .into_iter()
            .filter(|event| matches!(event, EngineEvent::Errored { .. }))
            .count();
        assert_eq!(errors, 1);

        engine.begin_recovery();
        assert!(engine.is_recovering());
        assert_eq!(engine.status(), PlaybackStatus::Idle);

        handle.emit_for(failed, MediaSignal::Error(MediaErrorKind::Network));
        engine.pump();
        assert_eq!(engine.status(), PlaybackStatus::Idle);
        assert!(drain(&events).is_empty());

        thread::sleep(Duration::from_millis(40));
        assert!(!engine.is_recovering());
    }

    #[test]
    fn load_started_while_settling_still_reports_its_failure() {
        let settings = Settings {
            error_settle_ms: 60_000,
            ..Settings::default()
        };
        let (mut engine, handle, events) = engine_with(&settings);
        engine.load_and_play(track(1, "a"));
        engine.pump();
        handle.emit(MediaSignal::Error(MediaErrorKind::Decode));
        engine.pump();
        engine.begin_recovery();
        drain(&events);

        handle.set_auto_start(false);
        engine.load_and_play(track(2, "b"));
        handle.emit(MediaSignal::Error(MediaErrorKind::Decode));
        engine.pump();

        assert!(engine.is_recovering());
        assert_eq!(engine.status(), PlaybackStatus::Errored);
        assert_eq!(
            drain(&events),
            vec![EngineEvent::Errored {
                track: Some(TrackId::new(2)),
                kind: MediaErrorKind::Decode,
            }]
        );
    }
}
