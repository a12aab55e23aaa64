//! Privileged side of the UI boundary. The UI never touches the filesystem,
//! the window or the system browser directly; it asks the host.

use crate::metadata::{self, LoftyMetadata, MetadataSource};
use crate::model::FileEntry;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowCommand {
    Minimize,
    ToggleMaximize,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostRequest {
    /// `hint` is whatever the UI already knows (typed paths, dropped files).
    OpenFiles { hint: Vec<PathBuf> },
    CoverArt { path: PathBuf },
    Window(WindowCommand),
    OpenExternal { url: String },
    FileSize { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostResponse {
    Files(Vec<FileEntry>),
    CoverArt(Option<String>),
    Ack,
    FileSize(Option<u64>),
}

pub trait FilePicker {
    fn pick(&mut self, hint: &[PathBuf]) -> Vec<PathBuf>;
}

pub trait WindowHandle {
    fn minimize(&mut self);
    fn toggle_maximize(&mut self);
    fn close(&mut self);
}

pub trait LinkOpener {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Takes the hinted paths as the selection. A terminal has no native dialog.
#[derive(Debug, Default)]
pub struct PathPicker;

impl FilePicker for PathPicker {
    fn pick(&mut self, hint: &[PathBuf]) -> Vec<PathBuf> {
        hint.to_vec()
    }
}

/// A terminal can't be minimized or maximized; closing asks the UI loop to exit.
#[derive(Debug, Clone, Default)]
pub struct TerminalWindow {
    close_requested: Arc<AtomicBool>,
}

impl TerminalWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Relaxed)
    }
}

impl WindowHandle for TerminalWindow {
    fn minimize(&mut self) {
        debug!("minimize has no effect in a terminal");
    }

    fn toggle_maximize(&mut self) {
        debug!("maximize has no effect in a terminal");
    }

    fn close(&mut self) {
        self.close_requested.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct SystemLinkOpener;

impl LinkOpener for SystemLinkOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        let mut command = if cfg!(target_os = "windows") {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "", url]);
            command
        } else if cfg!(target_os = "macos") {
            let mut command = Command::new("open");
            command.arg(url);
            command
        } else {
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        };
        command
            .spawn()
            .with_context(|| format!("failed to launch a browser for {url}"))?;
        Ok(())
    }
}

pub fn is_allowed_external_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

pub struct HostService {
    metadata: Box<dyn MetadataSource + Send>,
    picker: Box<dyn FilePicker + Send>,
    window: Box<dyn WindowHandle + Send>,
    links: Box<dyn LinkOpener + Send>,
}

impl HostService {
    pub fn new(
        metadata: Box<dyn MetadataSource + Send>,
        picker: Box<dyn FilePicker + Send>,
        window: Box<dyn WindowHandle + Send>,
        links: Box<dyn LinkOpener + Send>,
    ) -> Self {
        Self {
            metadata,
            picker,
            window,
            links,
        }
    }

    pub fn terminal(window: TerminalWindow) -> Self {
        Self::new(
            Box::new(LoftyMetadata),
            Box::new(PathPicker),
            Box::new(window),
            Box::new(SystemLinkOpener),
        )
    }

    pub fn handle(&mut self, request: HostRequest) -> HostResponse {
        match request {
            HostRequest::OpenFiles { hint } => HostResponse::Files(self.select_files(&hint)),
            HostRequest::CoverArt { path } => HostResponse::CoverArt(self.cover_art(&path)),
            HostRequest::Window(command) => {
                self.window_control(command);
                HostResponse::Ack
            }
            HostRequest::OpenExternal { url } => {
                self.open_external(&url);
                HostResponse::Ack
            }
            HostRequest::FileSize { path } => HostResponse::FileSize(file_size(&path)),
        }
    }

    pub fn select_files(&mut self, hint: &[PathBuf]) -> Vec<FileEntry> {
        let picked = self.picker.pick(hint);
        let files = metadata::collect_audio_files(&picked);
        info!(selected = picked.len(), audio = files.len(), "files selected");
        metadata::read_entries(self.metadata.as_ref(), &files)
    }

    pub fn cover_art(&self, path: &Path) -> Option<String> {
        let picture = self.metadata.extract_cover_art(path)?;
        metadata::cover_art_data_url(picture)
    }

    pub fn window_control(&mut self, command: WindowCommand) {
        match command {
            WindowCommand::Minimize => self.window.minimize(),
            WindowCommand::ToggleMaximize => self.window.toggle_maximize(),
            WindowCommand::Close => self.window.close(),
        }
    }

    /// Returns whether the link was handed to the system.
    pub fn open_external(&self, url: &str) -> bool {
        if !is_allowed_external_url(url) {
            warn!(%url, "refused to open link with a non-web scheme");
            return false;
        }
        match self.links.open(url) {
            Ok(()) => true,
            Err(err) => {
                warn!("{err:#}");
                false
            }
        }
    }
}

pub fn file_size(path: &Path) -> Option<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), "file size unavailable: {err}");
            None
        }
    }
}
