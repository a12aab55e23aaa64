use crate::audio::{MediaBackend, NullBackend, RodioBackend};
use crate::bridge::{self, BridgeClient};
use crate::config;
use crate::coordinator::Coordinator;
use crate::host::{HostRequest, HostResponse, HostService, TerminalWindow, WindowCommand};
use crate::model::{Settings, TrackId};
use crate::playlist::PlaylistError;
use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseEvent, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::collections::HashMap;
use std::io::stdout;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const VOLUME_STEP: f32 = 0.05;

#[derive(Debug, Default)]
pub struct AppOptions {
    pub paths: Vec<PathBuf>,
    pub null_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingRequest {
    Files,
    Cover(TrackId),
    FileSize(TrackId),
}

/// Host-provided extras for the active track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackDetails {
    pub track: Option<TrackId>,
    pub cover: Option<String>,
    pub file_size: Option<u64>,
}

pub struct App {
    pub coordinator: Coordinator,
    pub host: BridgeClient,
    pub window: TerminalWindow,
    pub cursor: usize,
    pub status: String,
    pub details: TrackDetails,
    pub dirty: bool,
    pub quit: bool,
    seek_step: f64,
    pending: HashMap<u64, PendingRequest>,
}

impl App {
    pub fn new(
        coordinator: Coordinator,
        host: BridgeClient,
        window: TerminalWindow,
        settings: &Settings,
    ) -> Self {
        Self {
            coordinator,
            host,
            window,
            cursor: 0,
            status: String::from("Press : then `add <path>` to load music"),
            details: TrackDetails::default(),
            dirty: true,
            quit: false,
            seek_step: f64::from(settings.seek_step_seconds),
            pending: HashMap::new(),
        }
    }

    pub fn request_files(&mut self, hint: Vec<PathBuf>) {
        let id = self.host.send(HostRequest::OpenFiles { hint });
        self.pending.insert(id, PendingRequest::Files);
        self.status = String::from("Reading files...");
        self.dirty = true;
    }

    /// One pass of the non-input work: playback progress, host answers,
    /// details refresh, close requests.
    pub fn tick(&mut self) {
        self.coordinator.tick();

        for failure in self.coordinator.drain_failures() {
            self.status = failure.to_string();
            self.dirty = true;
        }

        while let Some(envelope) = self.host.try_recv() {
            let Some(pending) = self.pending.remove(&envelope.id) else {
                continue;
            };
            self.apply_host_response(pending, envelope.response);
            self.dirty = true;
        }

        self.refresh_details();

        if self.window.close_requested() {
            self.quit = true;
        }
    }

    fn apply_host_response(&mut self, pending: PendingRequest, response: HostResponse) {
        match (pending, response) {
            (PendingRequest::Files, HostResponse::Files(entries)) => {
                let count = entries.len();
                self.coordinator.add_tracks(entries);
                self.status = match count {
                    0 => String::from("No audio files found"),
                    1 => String::from("Added 1 track"),
                    n => format!("Added {n} tracks"),
                };
            }
            (PendingRequest::Cover(id), HostResponse::CoverArt(cover)) => {
                if self.details.track == Some(id) {
                    self.details.cover = cover;
                }
            }
            (PendingRequest::FileSize(id), HostResponse::FileSize(size)) => {
                if self.details.track == Some(id) {
                    self.details.file_size = size;
                }
            }
            (pending, response) => warn!(?pending, ?response, "mismatched host response"),
        }
    }

    fn refresh_details(&mut self) {
        let active = self.coordinator.playback().active_track.clone();
        let active_id = active.as_ref().map(|track| track.id);
        if active_id == self.details.track {
            return;
        }

        self.details = TrackDetails {
            track: active_id,
            ..TrackDetails::default()
        };
        self.dirty = true;
        let Some(track) = active else {
            return;
        };
        let cover = self.host.send(HostRequest::CoverArt {
            path: track.path.clone(),
        });
        self.pending.insert(cover, PendingRequest::Cover(track.id));
        let size = self.host.send(HostRequest::FileSize { path: track.path });
        self.pending.insert(size, PendingRequest::FileSize(track.id));
    }

    fn report(&mut self, result: Result<(), PlaylistError>) {
        if let Err(err) = result {
            self.status = format!("Operation failed: {err}");
        }
        self.dirty = true;
    }

    fn clamp_cursor(&mut self) {
        let len = self.coordinator.playlist().len();
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quit = true;
            }
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Down => {
                self.cursor += 1;
                self.clamp_cursor();
            }
            KeyCode::Up => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Enter => {
                let result = self.coordinator.play_at(self.cursor);
                self.report(result);
            }
            KeyCode::Char(' ') => self.coordinator.toggle_play_pause(),
            KeyCode::Char('n') => self.coordinator.play_next(),
            KeyCode::Char('p') => self.coordinator.play_previous(),
            KeyCode::Char('s') => self.coordinator.stop(),
            KeyCode::Char('d') | KeyCode::Delete => {
                let result = self.coordinator.delete_track(self.cursor);
                self.report(result);
                self.clamp_cursor();
            }
            KeyCode::Char('J') => {
                let target = self.cursor + 1;
                let result = self.coordinator.move_track(self.cursor, target);
                if result.is_ok() {
                    self.cursor = target;
                }
                self.report(result);
            }
            KeyCode::Char('K') => {
                let result = match self.cursor.checked_sub(1) {
                    Some(target) => self
                        .coordinator
                        .move_track(self.cursor, target)
                        .map(|()| self.cursor = target),
                    None => Ok(()),
                };
                self.report(result);
            }
            KeyCode::Char('c') => {
                self.coordinator.clear();
                self.cursor = 0;
                self.status = String::from("Playlist cleared");
            }
            KeyCode::Char('m') => {
                let mode = self.coordinator.cycle_play_mode();
                self.status = format!("Play mode: {}", mode.label());
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.nudge_volume(VOLUME_STEP),
            KeyCode::Char('-') => self.nudge_volume(-VOLUME_STEP),
            KeyCode::Char('M') => {
                let muted = self.coordinator.toggle_muted();
                self.status = String::from(if muted { "Muted" } else { "Unmuted" });
            }
            KeyCode::Left => self.coordinator.seek_by(-self.seek_step),
            KeyCode::Right => self.coordinator.seek_by(self.seek_step),
            _ => return,
        }
        self.dirty = true;
    }

    fn nudge_volume(&mut self, delta: f32) {
        let next = (self.coordinator.playback().volume + delta).clamp(0.0, 1.0);
        self.coordinator.set_volume(next);
        self.status = format!("Volume: {}%", (next * 100.0).round() as u16);
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, playlist_rect: ratatui::prelude::Rect) {
        if !point_in_rect(mouse.column, mouse.row, playlist_rect) {
            return;
        }
        match mouse.kind {
            MouseEventKind::ScrollDown => {
                self.cursor += 1;
                self.clamp_cursor();
            }
            MouseEventKind::ScrollUp => self.cursor = self.cursor.saturating_sub(1),
            _ => return,
        }
        self.dirty = true;
    }

    pub fn settings_snapshot(&self, base: &Settings) -> Settings {
        let playback = self.coordinator.playback();
        Settings {
            volume: playback.volume,
            muted: playback.muted,
            play_mode: playback.play_mode,
            ..base.clone()
        }
    }
}

pub fn run(options: AppOptions, settings: Settings) -> Result<()> {
    let backend: Box<dyn MediaBackend> = if options.null_audio {
        Box::new(NullBackend::new())
    } else {
        match RodioBackend::new() {
            Ok(backend) => Box::new(backend),
            Err(err) => {
                warn!("audio output unavailable, using silent playback: {err:#}");
                Box::new(NullBackend::new())
            }
        }
    };
    let window = TerminalWindow::new();
    let host = bridge::spawn_host(HostService::terminal(window.clone()));
    let coordinator = Coordinator::new(backend, &settings);
    let mut app = App::new(coordinator, host, window, &settings);
    if !options.paths.is_empty() {
        app.request_files(options.paths);
    }

    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(out);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut command_mode = false;
    let mut command_buffer = String::new();
    let mut last_draw = Instant::now();
    let mut playlist_rect = ratatui::prelude::Rect::default();

    let result: Result<()> = loop {
        app.tick();
        if app.quit {
            break Ok(());
        }

        if app.dirty || last_draw.elapsed() > Duration::from_millis(250) {
            terminal.draw(|frame| {
                playlist_rect = crate::ui::playlist_rect(frame.area());
                crate::ui::draw(frame, &app, &command_buffer, command_mode)
            })?;
            app.dirty = false;
            last_draw = Instant::now();
        }

        if !event::poll(Duration::from_millis(33))? {
            continue;
        }

        let event = event::read()?;
        if let Event::Mouse(mouse) = event {
            app.handle_mouse(mouse, playlist_rect);
            continue;
        }

        let Event::Key(key) = event else {
            continue;
        };

        if key.kind != KeyEventKind::Press {
            continue;
        }

        if command_mode {
            match key.code {
                KeyCode::Esc => {
                    command_mode = false;
                    command_buffer.clear();
                }
                KeyCode::Enter => {
                    run_command(&mut app, &command_buffer);
                    command_mode = false;
                    command_buffer.clear();
                }
                KeyCode::Backspace => {
                    command_buffer.pop();
                }
                KeyCode::Char(ch) => command_buffer.push(ch),
                _ => {}
            }
            app.dirty = true;
            continue;
        }

        if key.code == KeyCode::Char(':') {
            command_mode = true;
            app.dirty = true;
            continue;
        }
        app.handle_key(key);
    };

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    app.coordinator.stop();
    app.host.shutdown();
    let save_result = config::save_settings(&app.settings_snapshot(&settings));
    info!("player closed");
    result?;
    save_result?;
    Ok(())
}

fn point_in_rect(x: u16, y: u16, rect: ratatui::prelude::Rect) -> bool {
    if rect.width == 0 || rect.height == 0 {
        return false;
    }
    x >= rect.x
        && x < rect.x.saturating_add(rect.width)
        && y >= rect.y
        && y < rect.y.saturating_add(rect.height)
}

fn run_command(app: &mut App, raw: &str) {
    app.dirty = true;
    let input = raw.trim();
    if input.is_empty() {
        app.status = String::from("No command");
        return;
    }

    let mut command_split = input.splitn(2, char::is_whitespace);
    let command = command_split.next().unwrap_or_default();
    let rest = command_split.next().unwrap_or("").trim();

    match command {
        "help" => {
            app.status = String::from(
                "Commands: add <path> | play <n> | vol <0-100> | open <url> | clear | stop | min | max | quit",
            );
        }
        "add" => {
            if rest.is_empty() {
                app.status = String::from("Usage: add <path>");
            } else {
                app.request_files(vec![PathBuf::from(rest)]);
            }
        }
        "play" => match rest.parse::<usize>() {
            Ok(number) if number > 0 => {
                let result = app.coordinator.play_at(number - 1);
                app.report(result);
            }
            _ => app.status = String::from("Usage: play <track number>"),
        },
        "vol" => match rest.parse::<u16>() {
            Ok(percent) if percent <= 100 => {
                app.coordinator.set_volume(f32::from(percent) / 100.0);
                app.status = format!("Volume: {percent}%");
            }
            _ => app.status = String::from("Usage: vol <0-100>"),
        },
        "open" => {
            if rest.is_empty() {
                app.status = String::from("Usage: open <url>");
            } else {
                app.host.send(HostRequest::OpenExternal {
                    url: rest.to_string(),
                });
            }
        }
        "clear" => {
            app.coordinator.clear();
            app.cursor = 0;
            app.status = String::from("Playlist cleared");
        }
        "stop" => app.coordinator.stop(),
        "min" => {
            app.host.send(HostRequest::Window(WindowCommand::Minimize));
        }
        "max" => {
            app.host.send(HostRequest::Window(WindowCommand::ToggleMaximize));
        }
        "quit" | "close" => {
            app.host.send(HostRequest::Window(WindowCommand::Close));
        }
        _ => app.status = String::from("Unknown command. Use :help"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tests::write_test_wav;
    use crate::audio::{MediaSignal, ScriptHandle, ScriptedBackend};
    use crate::model::{FileEntry, PlaybackStatus};
    use std::fs;
    use std::thread;
    use tempfile::tempdir;

    fn app() -> (App, ScriptHandle) {
        let settings = Settings {
            advance_delay_ms: 0,
            ..Settings::default()
        };
        let (backend, handle) = ScriptedBackend::new();
        let coordinator = Coordinator::new(Box::new(backend), &settings);
        let window = TerminalWindow::new();
        let host = bridge::spawn_host(HostService::terminal(window.clone()));
        (App::new(coordinator, host, window, &settings), handle)
    }

    fn tick_until(app: &mut App, done: impl Fn(&App) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(app) {
            assert!(Instant::now() < deadline, "timed out waiting for the host");
            app.tick();
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn unknown_command_is_reported() {
        let (mut app, _handle) = app();
        run_command(&mut app, "wat");
        assert!(app.status.contains("Unknown command"));
    }

    #[test]
    fn add_command_accepts_paths_with_spaces() {
        let dir = tempdir().expect("tempdir");
        let folder = dir.path().join("Music Folder");
        fs::create_dir_all(&folder).expect("mkdir");
        write_test_wav(&folder.join("a.wav"), 200);

        let (mut app, _handle) = app();
        run_command(&mut app, &format!("add {}", folder.display()));
        tick_until(&mut app, |app| !app.coordinator.playlist().is_empty());

        assert_eq!(app.coordinator.playlist().tracks()[0].display_title, "a.wav");
        assert_eq!(app.status, "Added 1 track");
    }

    #[test]
    fn deleting_past_the_end_reports_failure() {
        let (mut app, _handle) = app();
        app.handle_key(key(KeyCode::Char('d')));
        assert!(app.status.starts_with("Operation failed"));
    }

    #[test]
    fn playing_a_track_fetches_its_details() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("a.mp3");
        fs::write(&path, [0_u8; 2048]).expect("write");

        let (mut app, _handle) = app();
        app.coordinator.add_tracks([FileEntry::new(path, None)]);
        app.handle_key(key(KeyCode::Enter));
        tick_until(&mut app, |app| app.details.file_size.is_some());

        assert_eq!(app.details.file_size, Some(2048));
        assert_eq!(app.details.cover, None);
        assert_eq!(
            app.coordinator.playback().status,
            PlaybackStatus::Playing
        );
    }

    #[test]
    fn playback_errors_reach_the_status_line() {
        let (mut app, handle) = app();
        app.coordinator
            .add_tracks([FileEntry::new("/music/a.mp3", None)]);
        app.handle_key(key(KeyCode::Enter));
        app.tick();

        handle.emit(MediaSignal::Error(crate::audio::MediaErrorKind::Decode));
        app.tick();

        assert!(app.status.contains("Could not play a.mp3"));
        assert_eq!(app.details, TrackDetails::default());
    }

    #[test]
    fn move_keys_follow_the_cursor() {
        let (mut app, _handle) = app();
        app.coordinator.add_tracks(
            ["a", "b", "c"]
                .into_iter()
                .map(|name| FileEntry::new(format!("/music/{name}.mp3"), None)),
        );
        app.handle_key(key(KeyCode::Char('J')));
        assert_eq!(app.cursor, 1);
        app.handle_key(key(KeyCode::Char('J')));
        app.handle_key(key(KeyCode::Char('J')));
        assert_eq!(app.cursor, 2);
        assert!(app.status.starts_with("Operation failed"));

        let titles: Vec<&str> = app
            .coordinator
            .playlist()
            .tracks()
            .iter()
            .map(|track| track.display_title.as_str())
            .collect();
        assert_eq!(titles, vec!["b.mp3", "c.mp3", "a.mp3"]);
    }

    #[test]
    fn quit_command_closes_through_the_host() {
        let (mut app, _handle) = app();
        run_command(&mut app, "quit");
        tick_until(&mut app, |app| app.quit);
    }

    #[test]
    fn volume_keys_step_and_clamp() {
        let (mut app, _handle) = app();
        app.handle_key(key(KeyCode::Char('+')));
        assert_eq!(app.coordinator.playback().volume, 1.0);
        run_command(&mut app, "vol 0");
        assert!(app.coordinator.playback().muted);
        app.handle_key(key(KeyCode::Char('+')));
        assert!(!app.coordinator.playback().muted);
        assert_eq!(app.status, "Volume: 5%");
    }
}
