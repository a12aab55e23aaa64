use rodio::Source;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::ffi::CString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

mod scripted;

pub use scripted::{BackendCall, ScriptHandle, ScriptedBackend};

/// Identifies one `load_and_start` request. Every backend signal carries the
/// ticket of the request it belongs to, so late signals from a superseded
/// source can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LoadTicket(u64);

impl LoadTicket {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaErrorKind {
    /// The start request was interrupted by a newer one. Not a failure.
    Aborted,
    Network,
    Decode,
    SourceNotSupported,
}

impl MediaErrorKind {
    pub fn is_benign(self) -> bool {
        self == Self::Aborted
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::Network => "network error",
            Self::Decode => "decode error",
            Self::SourceNotSupported => "unsupported source",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MediaSignal {
    /// Playback start succeeded.
    CanPlay,
    DurationChanged(f64),
    TimeUpdate(f64),
    Ended,
    Error(MediaErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackendEvent {
    pub ticket: LoadTicket,
    pub signal: MediaSignal,
}

impl BackendEvent {
    pub fn new(ticket: LoadTicket, signal: MediaSignal) -> Self {
        Self { ticket, signal }
    }
}

/// The single streaming media handle the playback engine drives.
///
/// Commands return immediately. Outcomes (start succeeded, errors, progress,
/// end of stream) are reported later through [`MediaBackend::poll_events`].
pub trait MediaBackend {
    fn load_and_start(&mut self, ticket: LoadTicket, source: &Path);
    fn pause(&mut self);
    fn resume(&mut self);
    fn clear_source(&mut self);
    fn has_source(&self) -> bool;
    fn seek(&mut self, seconds: f64);
    fn set_output_volume(&mut self, volume: f32);
    fn poll_events(&mut self) -> Vec<BackendEvent>;
    fn output_name(&self) -> String;
}

pub struct RodioBackend {
    stream: OutputStream,
    sink: Sink,
    current: Option<LoadTicket>,
    source: Option<PathBuf>,
    ended_reported: bool,
    volume: f32,
    pending: Vec<BackendEvent>,
}

impl RodioBackend {
    pub fn new() -> anyhow::Result<Self> {
        let (stream, sink) = open_output_stream()?;
        Ok(Self {
            stream,
            sink,
            current: None,
            source: None,
            ended_reported: false,
            volume: 1.0,
            pending: Vec::new(),
        })
    }

    fn push(&mut self, ticket: LoadTicket, signal: MediaSignal) {
        self.pending.push(BackendEvent::new(ticket, signal));
    }
}

impl MediaBackend for RodioBackend {
    fn load_and_start(&mut self, ticket: LoadTicket, source: &Path) {
        self.sink.stop();
        self.sink = Sink::connect_new(self.stream.mixer());
        self.sink.set_volume(self.volume);
        self.current = None;
        self.ended_reported = false;
        self.source = Some(source.to_path_buf());

        let file = match File::open(source) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %source.display(), "failed to open track: {err}");
                self.push(ticket, MediaSignal::Error(MediaErrorKind::SourceNotSupported));
                return;
            }
        };
        let decoded = match Decoder::try_from(file) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(path = %source.display(), "failed to decode track: {err}");
                self.push(ticket, MediaSignal::Error(MediaErrorKind::Decode));
                return;
            }
        };

        let duration = decoded.total_duration().filter(|d| !d.is_zero());
        self.sink.append(decoded);
        self.current = Some(ticket);
        if let Some(duration) = duration {
            self.push(ticket, MediaSignal::DurationChanged(duration.as_secs_f64()));
        }
        self.push(ticket, MediaSignal::CanPlay);
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn clear_source(&mut self) {
        self.sink.stop();
        self.current = None;
        self.source = None;
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn seek(&mut self, seconds: f64) {
        if self.current.is_none() {
            return;
        }
        if let Err(err) = self.sink.try_seek(Duration::from_secs_f64(seconds)) {
            warn!("failed to seek current track: {err:?}");
        }
    }

    fn set_output_volume(&mut self, volume: f32) {
        self.volume = volume;
        self.sink.set_volume(volume);
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        if let Some(ticket) = self.current
            && !self.sink.is_paused()
        {
            if self.sink.empty() {
                if !self.ended_reported {
                    self.ended_reported = true;
                    self.push(ticket, MediaSignal::Ended);
                }
            } else {
                let position = self.sink.get_pos().as_secs_f64();
                self.push(ticket, MediaSignal::TimeUpdate(position));
            }
        }
        std::mem::take(&mut self.pending)
    }

    fn output_name(&self) -> String {
        String::from("System default output (CPAL)")
    }
}

fn open_output_stream() -> anyhow::Result<(OutputStream, Sink)> {
    use anyhow::Context;

    let mut stream = with_silenced_stderr(|| {
        match OutputStreamBuilder::from_default_device()
            .context("failed to open default system output stream")
            .and_then(|builder| {
                builder
                    .with_error_callback(|_| {})
                    .open_stream_or_fallback()
                    .context("failed to start default output stream")
            }) {
            Ok(stream) => Ok(stream),
            Err(default_err) => {
                let host = rodio::cpal::default_host();
                let mut started = None;
                for device in host.output_devices().ok().into_iter().flatten() {
                    let name = device.name().unwrap_or_default();
                    let opened = OutputStreamBuilder::from_device(device)
                        .context("failed to open fallback output device")
                        .and_then(|builder| {
                            builder
                                .with_error_callback(|_| {})
                                .open_stream_or_fallback()
                                .context("failed to start fallback output stream")
                        });
                    match opened {
                        Ok(stream) => {
                            debug!(device = %name, "using fallback output device");
                            started = Some(stream);
                            break;
                        }
                        Err(err) => debug!(device = %name, "output device rejected: {err:#}"),
                    }
                }
                started.with_context(|| {
                    format!("unable to start any audio output stream after default failed: {default_err:#}")
                })
            }
        }
    })?;
    stream.log_on_drop(false);
    let sink = Sink::connect_new(stream.mixer());
    Ok((stream, sink))
}

#[cfg(unix)]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        return operation();
    }

    let devnull = CString::new("/dev/null")
        .ok()
        .map(|path| unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) })
        .unwrap_or(-1);

    if devnull >= 0 {
        unsafe {
            libc::dup2(devnull, libc::STDERR_FILENO);
            libc::close(devnull);
        }
    }

    let result = operation();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }

    result
}

#[cfg(not(unix))]
fn with_silenced_stderr<T>(operation: impl FnOnce() -> T) -> T {
    operation()
}

/// Clock-driven backend for machines without an output device. Position
/// advances with wall time and the stream ends once a known duration elapses.
pub struct NullBackend {
    current: Option<LoadTicket>,
    source: Option<PathBuf>,
    paused: bool,
    started_at: Option<Instant>,
    position_offset: Duration,
    track_duration: Option<Duration>,
    ended_reported: bool,
    pending: Vec<BackendEvent>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            current: None,
            source: None,
            paused: false,
            started_at: None,
            position_offset: Duration::ZERO,
            track_duration: None,
            ended_reported: false,
            pending: Vec::new(),
        }
    }

    fn estimate_duration(path: &Path) -> Option<Duration> {
        let file = File::open(path).ok()?;
        let source = Decoder::try_from(file).ok()?;
        source
            .total_duration()
            .filter(|duration| !duration.is_zero())
    }

    fn current_position(&self) -> Duration {
        let mut position = self.position_offset;
        if !self.paused
            && self.current.is_some()
            && let Some(started_at) = self.started_at
        {
            position = position.saturating_add(started_at.elapsed());
        }
        if let Some(duration) = self.track_duration {
            return position.min(duration);
        }
        position
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for NullBackend {
    fn load_and_start(&mut self, ticket: LoadTicket, source: &Path) {
        self.current = Some(ticket);
        self.source = Some(source.to_path_buf());
        self.paused = false;
        self.started_at = Some(Instant::now());
        self.position_offset = Duration::ZERO;
        self.ended_reported = false;
        self.track_duration = Self::estimate_duration(source);
        if let Some(duration) = self.track_duration {
            self.pending.push(BackendEvent::new(
                ticket,
                MediaSignal::DurationChanged(duration.as_secs_f64()),
            ));
        }
        self.pending.push(BackendEvent::new(ticket, MediaSignal::CanPlay));
    }

    fn pause(&mut self) {
        self.position_offset = self.current_position();
        self.started_at = None;
        self.paused = true;
    }

    fn resume(&mut self) {
        if self.current.is_some() {
            self.started_at = Some(Instant::now());
        }
        self.paused = false;
    }

    fn clear_source(&mut self) {
        self.current = None;
        self.source = None;
        self.paused = false;
        self.started_at = None;
        self.position_offset = Duration::ZERO;
        self.track_duration = None;
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn seek(&mut self, seconds: f64) {
        if self.current.is_none() {
            return;
        }
        let position = Duration::from_secs_f64(seconds.max(0.0));
        self.position_offset = self
            .track_duration
            .map_or(position, |duration| position.min(duration));
        self.started_at = if self.paused {
            None
        } else {
            Some(Instant::now())
        };
    }

    fn set_output_volume(&mut self, _volume: f32) {}

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        if let Some(ticket) = self.current
            && !self.paused
        {
            let position = self.current_position();
            let finished = self
                .track_duration
                .is_some_and(|duration| position >= duration);
            if finished {
                if !self.ended_reported {
                    self.ended_reported = true;
                    self.pending.push(BackendEvent::new(ticket, MediaSignal::Ended));
                }
            } else {
                self.pending.push(BackendEvent::new(
                    ticket,
                    MediaSignal::TimeUpdate(position.as_secs_f64()),
                ));
            }
        }
        std::mem::take(&mut self.pending)
    }

    fn output_name(&self) -> String {
        String::from("Null audio output")
    }
}
