use crate::model::{FileEntry, TrackMetadata};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "m4a", "aac"];

/// Tag and artwork extraction. Failures never propagate: callers get `None`
/// and carry on with whatever they can derive from the path.
pub trait MetadataSource {
    fn extract_metadata(&self, path: &Path) -> Option<TrackMetadata>;
    fn extract_cover_art(&self, path: &Path) -> Option<EmbeddedPicture>;
}

/// Picture bytes as an extractor hands them over. Depending on where they
/// came from they may be a plain byte array, a `{"type":"Buffer","data":[..]}`
/// object, or a base64 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PictureData {
    Bytes(Vec<u8>),
    Tagged {
        #[serde(rename = "type")]
        kind: String,
        data: Vec<u8>,
    },
    Base64(String),
}

impl PictureData {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Tagged { kind, data } if kind == "Buffer" => Some(data),
            Self::Tagged { kind, .. } => {
                warn!(%kind, "unrecognized picture payload");
                None
            }
            Self::Base64(encoded) => STANDARD.decode(encoded.trim()).ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedPicture {
    pub format: Option<String>,
    pub data: PictureData,
}

/// `data:<mime>;base64,<payload>`, or `None` when the picture is not a usable image.
pub fn cover_art_data_url(picture: EmbeddedPicture) -> Option<String> {
    let Some(format) = picture.format.filter(|format| format.starts_with("image/")) else {
        warn!("cover art has no image mime type");
        return None;
    };
    let bytes = picture.data.into_bytes().filter(|bytes| !bytes.is_empty())?;
    let encoded = STANDARD.encode(bytes);
    if encoded.contains(',') {
        warn!("cover art payload failed to encode cleanly");
        return None;
    }
    Some(format!("data:{format};base64,{encoded}"))
}

pub fn is_audio_file(path: &Path) -> bool {
    let ext = path.extension().and_then(OsStr::to_str).unwrap_or_default();
    AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

/// Audio files among `paths`, directories expanded recursively in path order.
pub fn collect_audio_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if is_audio_file(path) {
            files.push(path.clone());
        } else {
            debug!(path = %path.display(), "skipping non-audio selection");
        }
    }
    files
}

pub fn read_entries(source: &dyn MetadataSource, paths: &[PathBuf]) -> Vec<FileEntry> {
    paths
        .iter()
        .map(|path| FileEntry::new(path.clone(), source.extract_metadata(path)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyMetadata;

impl LoftyMetadata {
    fn read_tagged(path: &Path) -> Option<lofty::file::TaggedFile> {
        let stripped = crate::config::strip_windows_verbatim_prefix(path);
        match Probe::open(&stripped).and_then(|probe| probe.read()) {
            Ok(tagged) => Some(tagged),
            Err(err) => {
                warn!(path = %stripped.display(), "metadata unavailable: {err}");
                None
            }
        }
    }
}

impl MetadataSource for LoftyMetadata {
    fn extract_metadata(&self, path: &Path) -> Option<TrackMetadata> {
        let tagged = Self::read_tagged(path)?;
        let duration = tagged.properties().duration().as_secs_f64();
        let mut metadata = TrackMetadata {
            duration: (duration > 0.0).then_some(duration),
            ..TrackMetadata::default()
        };

        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            fill_from_tag(&mut metadata, tag);
        }
        Some(metadata)
    }

    fn extract_cover_art(&self, path: &Path) -> Option<EmbeddedPicture> {
        let tagged = Self::read_tagged(path)?;
        let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
        let picture = tag.pictures().first()?;
        Some(EmbeddedPicture {
            format: picture.mime_type().map(|mime| mime.as_str().to_string()),
            data: PictureData::Bytes(picture.data().to_vec()),
        })
    }
}

fn fill_from_tag(metadata: &mut TrackMetadata, tag: &Tag) {
    metadata.title = tag.title().map(|value| value.to_string());
    metadata.artist = tag.artist().map(|value| value.to_string());
    metadata.album = tag.album().map(|value| value.to_string());
    metadata.genre = tag.genre().map(|value| value.to_string());
    metadata.year = tag.date().map(|date| u32::from(date.year));
    metadata.track_no = tag.track();
    metadata.track_total = tag.track_total();
    metadata.has_picture = !tag.pictures().is_empty();
    metadata.artists = split_artists(metadata.artist.as_deref());
}

fn split_artists(artist: Option<&str>) -> Vec<String> {
    let Some(artist) = artist else {
        return Vec::new();
    };
    let parts: Vec<String> = artist
        .split([';', '\0'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();
    if parts.len() > 1 { parts } else { Vec::new() }
}
