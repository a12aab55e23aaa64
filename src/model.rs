use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(u64);

impl TrackId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{:x}", self.0)
    }
}

/// Tag data extracted from an audio file. Every field is optional because
/// tag coverage varies wildly between formats and rippers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub track_no: Option<u32>,
    pub track_total: Option<u32>,
    /// Duration hint in seconds, from the container headers.
    pub duration: Option<f64>,
    pub has_picture: bool,
}

impl TrackMetadata {
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|value| !value.trim().is_empty())
    }

    /// The single artist tag, or the joined multi-artist list when only that exists.
    pub fn artist_line(&self) -> Option<String> {
        if let Some(artist) = self.artist.as_deref().filter(|value| !value.trim().is_empty()) {
            return Some(artist.to_string());
        }
        let joined = self
            .artists
            .iter()
            .map(|artist| artist.trim())
            .filter(|artist| !artist.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        (!joined.is_empty()).then_some(joined)
    }

    pub fn album(&self) -> Option<&str> {
        self.album.as_deref().filter(|value| !value.trim().is_empty())
    }
}

/// Result of a file selection: a path plus whatever metadata the host could read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub metadata: Option<TrackMetadata>,
}

impl FileEntry {
    pub fn new(path: impl Into<PathBuf>, metadata: Option<TrackMetadata>) -> Self {
        Self {
            path: path.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub path: PathBuf,
    pub metadata: Option<TrackMetadata>,
    pub display_title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlayMode {
    #[default]
    SequentialLoop,
    SingleRepeat,
    Shuffle,
}

impl PlayMode {
    pub fn next(self) -> Self {
        match self {
            Self::SequentialLoop => Self::SingleRepeat,
            Self::SingleRepeat => Self::Shuffle,
            Self::Shuffle => Self::SequentialLoop,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SequentialLoop => "Loop list",
            Self::SingleRepeat => "Repeat one",
            Self::Shuffle => "Shuffle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Errored,
}

impl PlaybackStatus {
    /// Loading, playing or paused: the engine holds a live stream.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Loading | Self::Playing | Self::Paused)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub play_mode: PlayMode,
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,
    #[serde(default = "default_error_settle_ms")]
    pub error_settle_ms: u64,
    #[serde(default = "default_seek_step_seconds")]
    pub seek_step_seconds: u16,
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_volume() -> f32 {
    1.0
}

fn default_advance_delay_ms() -> u64 {
    50
}

fn default_error_settle_ms() -> u64 {
    100
}

fn default_seek_step_seconds() -> u16 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            muted: false,
            play_mode: PlayMode::default(),
            advance_delay_ms: default_advance_delay_ms(),
            error_settle_ms: default_error_settle_ms(),
            seek_step_seconds: default_seek_step_seconds(),
            log_filter: None,
        }
    }
}
