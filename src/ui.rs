use crate::app::App;
use crate::display;
use crate::model::{PlaybackStatus, Track};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

const APP_TITLE_WITH_VERSION: &str = concat!("yahee v", env!("CARGO_PKG_VERSION"), "  ");

const BG: Color = Color::Rgb(10, 15, 24);
const PANEL_BG: Color = Color::Rgb(19, 29, 43);
const PANEL_ALT_BG: Color = Color::Rgb(24, 38, 58);
const BORDER: Color = Color::Rgb(69, 121, 176);
const TEXT: Color = Color::Rgb(214, 228, 248);
const MUTED: Color = Color::Rgb(149, 173, 204);
const ACCENT: Color = Color::Rgb(100, 203, 184);
const ALERT: Color = Color::Rgb(249, 174, 88);
const SELECTED_BG: Color = Color::Rgb(34, 55, 82);

fn layout(area: Rect) -> (std::rc::Rc<[Rect]>, std::rc::Rc<[Rect]>) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
        .split(vertical[1]);

    (vertical, body)
}

pub fn playlist_rect(area: Rect) -> Rect {
    layout(area).1[0]
}

pub fn draw(frame: &mut Frame, app: &App, command_buffer: &str, command_mode: bool) {
    frame.render_widget(Block::default().style(Style::default().bg(BG)), frame.area());
    let (vertical, body) = layout(frame.area());
    let coordinator = &app.coordinator;
    let playback = coordinator.playback();

    let now_playing_style = match playback.status {
        PlaybackStatus::Errored => Style::default().fg(ALERT),
        _ if coordinator.is_recovering() => Style::default().fg(ALERT),
        _ => Style::default().fg(TEXT),
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            APP_TITLE_WITH_VERSION,
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled(coordinator.now_playing().to_string(), now_playing_style),
        Span::styled("  |  ", Style::default().fg(MUTED)),
        Span::styled(
            format!("Mode {}", playback.play_mode.label()),
            Style::default().fg(ALERT),
        ),
        Span::styled("  |  ", Style::default().fg(MUTED)),
        Span::styled(coordinator.output_name(), Style::default().fg(MUTED)),
    ]))
    .block(panel_block("Status", PANEL_BG, TEXT, BORDER));
    frame.render_widget(header, vertical[0]);

    let selected = coordinator.playlist().selected_index();
    let items: Vec<ListItem> = coordinator
        .playlist()
        .tracks()
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let marker = if Some(index) == selected { "  > " } else { "    " };
            ListItem::new(Line::from(vec![
                Span::styled(marker, Style::default().fg(ACCENT)),
                Span::styled(format!("{:>3}. ", index + 1), Style::default().fg(MUTED)),
                Span::styled(track.display_title.as_str(), Style::default().fg(TEXT)),
            ]))
        })
        .collect();

    let mut state = ListState::default();
    state.select((!coordinator.playlist().is_empty()).then_some(app.cursor));
    let playlist_title = format!("Playlist ({})", coordinator.playlist().len());
    let list = List::new(items)
        .block(panel_block(
            &playlist_title,
            PANEL_BG,
            TEXT,
            BORDER,
        ))
        .highlight_style(
            Style::default()
                .bg(SELECTED_BG)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("-> ");
    frame.render_stateful_widget(list, body[0], &mut state);

    let details = Paragraph::new(detail_lines(app, playback.active_track.as_ref()))
        .block(panel_block("Track Details", PANEL_ALT_BG, TEXT, BORDER))
        .wrap(Wrap { trim: true });
    frame.render_widget(details, body[1]);

    let timeline = Paragraph::new(Span::styled(
        timeline_line(app, 26, 14),
        Style::default().fg(TEXT),
    ))
    .block(panel_block("Timeline", PANEL_BG, TEXT, BORDER));
    frame.render_widget(timeline, vertical[2]);

    let footer_line = if command_mode {
        Line::from(vec![
            Span::styled(":", Style::default().fg(ACCENT)),
            Span::styled(command_buffer, Style::default().fg(TEXT)),
        ])
    } else {
        Line::from(vec![
            Span::styled(
                "Enter play, Space pause, n/p next/prev, d delete, J/K move, c clear, m mode, M mute, : command, q quit",
                Style::default().fg(MUTED),
            ),
            Span::styled("  |  ", Style::default().fg(MUTED)),
            Span::styled(app.status.as_str(), Style::default().fg(TEXT)),
        ])
    };
    let footer = Paragraph::new(footer_line).block(panel_block("Message", PANEL_BG, TEXT, BORDER));
    frame.render_widget(footer, vertical[3]);
}

fn detail_lines(app: &App, track: Option<&Track>) -> Vec<Line<'static>> {
    let Some(track) = track else {
        return vec![Line::from(Span::styled(
            "Pick a track to start playing",
            Style::default().fg(MUTED),
        ))];
    };

    let metadata = track.metadata.as_ref();
    let title = metadata
        .and_then(|meta| meta.title())
        .map(str::to_string)
        .unwrap_or_else(|| display::file_stem(&track.path));
    let artist = metadata
        .and_then(|meta| meta.artist_line())
        .unwrap_or_else(|| String::from("Unknown artist"));
    let album = metadata
        .and_then(|meta| meta.album())
        .unwrap_or("Unknown album")
        .to_string();
    let duration = app
        .coordinator
        .playback()
        .duration
        .or_else(|| metadata.and_then(|meta| meta.duration));
    let bitrate = app
        .details
        .file_size
        .zip(duration)
        .and_then(|(size, seconds)| display::estimate_bitrate_kbps(size, seconds));
    let cover = if app.details.cover.is_some() {
        "embedded image"
    } else {
        "default cover"
    };

    let field = |label: &str, value: String| {
        Line::from(vec![
            Span::styled(format!("{label:<9}"), Style::default().fg(MUTED)),
            Span::styled(value, Style::default().fg(TEXT)),
        ])
    };
    vec![
        Line::from(Span::styled(
            title,
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )),
        field("Artist", artist),
        field("Album", album),
        field("Year", display::format_year(metadata.and_then(|meta| meta.year))),
        field("Duration", display::format_duration(duration)),
        field("Format", display::format_label(&track.path)),
        field("Bitrate", display::format_bitrate(bitrate)),
        field("Cover", cover.to_string()),
    ]
}

fn panel_block(title: &str, bg: Color, text: Color, border: Color) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            format!(" {title} "),
            Style::default().fg(text).add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(border))
        .style(Style::default().bg(bg))
}

fn progress_bar(ratio: Option<f64>, width: usize) -> String {
    let clamped = ratio.unwrap_or(0.0).clamp(0.0, 1.0);
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    bar.push_str(&"#".repeat(filled));
    bar.push_str(&"-".repeat(width.saturating_sub(filled)));
    bar.push(']');
    bar
}

fn timeline_line(app: &App, timeline_bar_width: usize, volume_bar_width: usize) -> String {
    let playback = app.coordinator.playback();
    let state = match playback.status {
        PlaybackStatus::Playing => ">",
        PlaybackStatus::Paused => "||",
        PlaybackStatus::Loading => "..",
        _ => "[]",
    };
    let volume = if playback.muted { 0.0 } else { playback.volume };
    let volume_label = if playback.muted {
        String::from("muted")
    } else {
        format!("{:>3}%", (volume * 100.0).round() as u16)
    };

    format!(
        "{state} {} / {} {}  |  Vol {} {}",
        display::format_elapsed(playback.current_time),
        display::format_duration(playback.duration),
        progress_bar(
            display::progress_ratio(playback.current_time, playback.duration),
            timeline_bar_width
        ),
        progress_bar(Some(f64::from(volume)), volume_bar_width),
        volume_label
    )
}
