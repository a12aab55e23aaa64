use crate::audio::{MediaBackend, MediaErrorKind};
use crate::engine::{EngineEvent, PlaybackEngine, PlaybackState};
use crate::model::{FileEntry, PlayMode, PlaybackStatus, Settings, TrackId};
use crate::playlist::{PlaylistError, PlaylistStore};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Index to play after `current` in a list of `len` tracks, or `None` when
/// the list is empty.
pub fn next_index<R: Rng>(
    mode: PlayMode,
    current: Option<usize>,
    len: usize,
    direction: Direction,
    rng: &mut R,
) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let current = current.filter(|&index| index < len);

    match (mode, current) {
        (PlayMode::SingleRepeat, Some(index)) => Some(index),
        (PlayMode::Shuffle, _) if len == 1 => Some(0),
        (PlayMode::Shuffle, Some(index)) => {
            let pick = rng.random_range(0..len - 1);
            Some(if pick >= index { pick + 1 } else { pick })
        }
        (PlayMode::Shuffle, None) => Some(rng.random_range(0..len)),
        (_, current) => Some(match (direction, current) {
            (Direction::Next, None) => 0,
            (Direction::Next, Some(index)) => (index + 1) % len,
            (Direction::Previous, None | Some(0)) => len - 1,
            (Direction::Previous, Some(index)) => index - 1,
        }),
    }
}

/// What the track-info line says right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NowPlaying {
    #[default]
    Nothing,
    Playing {
        title: String,
    },
    Failed {
        title: String,
    },
}

impl fmt::Display for NowPlaying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("Nothing playing"),
            Self::Playing { title } => write!(f, "Now playing: {title}"),
            Self::Failed { title } => write!(f, "Error: could not play {title}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFailure {
    pub title: String,
    pub kind: MediaErrorKind,
}

impl fmt::Display for PlaybackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not play {} ({})", self.title, self.kind.label())
    }
}

/// Advance scheduled by a natural end. `expected` is the selection at the
/// time the track ended; the advance only runs if it is still selected.
#[derive(Debug, Clone, Copy)]
struct PendingAdvance {
    expected: TrackId,
    due: Instant,
}

/// Mediates between the playlist and the engine. Everything that decides
/// "what plays next" lives here.
pub struct Coordinator {
    playlist: PlaylistStore,
    engine: PlaybackEngine,
    events: Receiver<EngineEvent>,
    pending_advance: Option<PendingAdvance>,
    advance_delay: Duration,
    now_playing: NowPlaying,
    failures: Vec<PlaybackFailure>,
    rng: SmallRng,
}

impl Coordinator {
    pub fn new(backend: Box<dyn MediaBackend>, settings: &Settings) -> Self {
        let mut engine = PlaybackEngine::new(backend, settings);
        let events = engine.subscribe();
        Self {
            playlist: PlaylistStore::new(),
            engine,
            events,
            pending_advance: None,
            advance_delay: Duration::from_millis(settings.advance_delay_ms),
            now_playing: NowPlaying::Nothing,
            failures: Vec::new(),
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Fixes the shuffle sequence, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn playlist(&self) -> &PlaylistStore {
        &self.playlist
    }

    pub fn playback(&self) -> &PlaybackState {
        self.engine.state()
    }

    pub fn now_playing(&self) -> &NowPlaying {
        &self.now_playing
    }

    pub fn output_name(&self) -> String {
        self.engine.output_name()
    }

    pub fn is_recovering(&self) -> bool {
        self.engine.is_recovering()
    }

    pub fn has_pending_advance(&self) -> bool {
        self.pending_advance.is_some()
    }

    pub fn drain_failures(&mut self) -> Vec<PlaybackFailure> {
        std::mem::take(&mut self.failures)
    }

    pub fn add_tracks<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = FileEntry>,
    {
        self.playlist.add_tracks(entries);
    }

    pub fn play_at(&mut self, index: usize) -> Result<(), PlaylistError> {
        if index >= self.playlist.len() {
            let err = PlaylistError::IndexOutOfRange {
                index,
                len: self.playlist.len(),
            };
            warn!("cannot play: {err}");
            self.stop();
            return Err(err);
        }
        if self.playlist.selected_index() == Some(index)
            && self.engine.status() == PlaybackStatus::Playing
        {
            debug!(index, "already playing");
            return Ok(());
        }
        self.start(index);
        Ok(())
    }

    pub fn toggle_play_pause(&mut self) {
        match self.engine.status() {
            PlaybackStatus::Playing => self.engine.pause(),
            PlaybackStatus::Paused => self.engine.resume(),
            PlaybackStatus::Loading => {}
            PlaybackStatus::Ended => {
                let index = self.playlist.selected_index().unwrap_or(0);
                if index < self.playlist.len() {
                    self.start(index);
                }
            }
            PlaybackStatus::Idle | PlaybackStatus::Errored => {
                if !self.playlist.is_empty() {
                    self.start(0);
                }
            }
        }
    }

    pub fn play_next(&mut self) {
        self.step(Direction::Next);
    }

    pub fn play_previous(&mut self) {
        self.step(Direction::Previous);
    }

    /// Stop intent: silence, and nothing selected.
    pub fn stop(&mut self) {
        self.engine.stop();
        self.playlist.select(None);
        self.pending_advance = None;
        self.now_playing = NowPlaying::Nothing;
    }

    /// Removing the track the line refers to, or the last track, always
    /// leaves "Nothing playing" unless a replacement starts.
    pub fn delete_track(&mut self, index: usize) -> Result<(), PlaylistError> {
        let target = self.playlist.get(index).map(|track| track.id);
        let engine_holds = target.is_some() && self.engine.state().active_id() == target;
        let was_playing = engine_holds && self.engine.status().is_active();
        let was_selected = target.is_some() && self.playlist.selected_id() == target;
        if engine_holds {
            self.engine.stop();
        }

        let removed = self.playlist.delete_track(index)?;
        info!(title = %removed.display_title, "removed from playlist");
        if engine_holds || was_selected || self.playlist.is_empty() {
            self.pending_advance = None;
            self.now_playing = NowPlaying::Nothing;
        }

        if was_playing && !self.playlist.is_empty() {
            self.start(index.min(self.playlist.len() - 1));
        }
        Ok(())
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), PlaylistError> {
        self.playlist.move_track(from, to)
    }

    pub fn clear(&mut self) {
        self.stop();
        self.playlist.clear();
        info!("playlist cleared");
    }

    pub fn seek(&mut self, seconds: f64) {
        self.engine.seek(seconds);
    }

    pub fn seek_by(&mut self, delta: f64) {
        let target = self.engine.state().current_time + delta;
        self.engine.seek(target);
    }

    /// Slider semantics: a volume of exactly zero also mutes, anything else unmutes.
    pub fn set_volume(&mut self, volume: f32) {
        self.engine.set_volume(volume);
        self.engine.set_muted(self.engine.state().volume == 0.0);
    }

    pub fn toggle_muted(&mut self) -> bool {
        self.engine.toggle_muted()
    }

    pub fn cycle_play_mode(&mut self) -> PlayMode {
        self.engine.cycle_play_mode()
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Applies backend signals, then runs the deferred advance if it is due.
    pub fn tick_at(&mut self, now: Instant) {
        self.engine.pump();
        while let Ok(event) = self.events.try_recv() {
            self.on_engine_event(event, now);
        }

        let Some(pending) = self.pending_advance else {
            return;
        };
        if now < pending.due {
            return;
        }
        self.pending_advance = None;

        if self.playlist.selected_id() != Some(pending.expected) {
            info!(expected = %pending.expected, "selection changed after track ended; not advancing");
            self.engine.stop();
            self.now_playing = NowPlaying::Nothing;
            return;
        }
        self.advance_after_end();
    }

    fn on_engine_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Ended { track } => {
                let Some(expected) = self.playlist.selected_id() else {
                    debug!(%track, "track ended with nothing selected");
                    return;
                };
                self.pending_advance = Some(PendingAdvance {
                    expected,
                    due: now + self.advance_delay,
                });
            }
            EngineEvent::Errored { track, kind } => self.recover(track, kind),
            EngineEvent::Started { .. }
            | EngineEvent::TimeAdvanced { .. }
            | EngineEvent::PlayStateChanged { .. } => {}
        }
    }

    fn advance_after_end(&mut self) {
        let current = self.playlist.selected_index();
        let target = next_index(
            self.engine.state().play_mode,
            current,
            self.playlist.len(),
            Direction::Next,
            &mut self.rng,
        );
        match target {
            Some(index) => self.start(index),
            None => self.stop(),
        }
    }

    fn recover(&mut self, track: Option<TrackId>, kind: MediaErrorKind) {
        let title = self
            .engine
            .state()
            .active_track
            .as_ref()
            .filter(|active| Some(active.id) == track)
            .map(|active| active.display_title.clone())
            .unwrap_or_else(|| String::from("track"));

        self.pending_advance = None;
        self.engine.begin_recovery();
        warn!(%title, "recovered from playback error: {}", kind.label());
        self.now_playing = NowPlaying::Failed {
            title: title.clone(),
        };
        self.failures.push(PlaybackFailure { title, kind });
    }

    fn step(&mut self, direction: Direction) {
        let target = next_index(
            self.engine.state().play_mode,
            self.playlist.selected_index(),
            self.playlist.len(),
            direction,
            &mut self.rng,
        );
        match target {
            Some(index) => self.start(index),
            None => self.stop(),
        }
    }

    /// Unconditional start: used for replays, which `play_at` would skip.
    fn start(&mut self, index: usize) {
        let Some(track) = self.playlist.get(index).cloned() else {
            return;
        };
        self.pending_advance = None;
        self.now_playing = NowPlaying::Playing {
            title: track.display_title.clone(),
        };
        self.engine.load_and_play(track);
        self.playlist.select(Some(index));
    }
}
