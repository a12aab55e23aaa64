#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};
use yahee::audio::{MediaErrorKind, MediaSignal, ScriptedBackend};
use yahee::coordinator::Coordinator;
use yahee::model::{FileEntry, Settings};

fuzz_target!(|data: &[u8]| {
    let (backend, handle) = ScriptedBackend::new();
    let mut coordinator = Coordinator::new(Box::new(backend), &Settings::default()).with_seed(7);
    let mut now = Instant::now();
    let mut added = 0_usize;

    for pair in data.chunks(2) {
        let op = pair[0];
        let arg = usize::from(pair.get(1).copied().unwrap_or_default());
        let len = coordinator.playlist().len().max(1);
        match op % 16 {
            0 => {
                let count = arg % 4 + 1;
                coordinator.add_tracks((0..count).map(|offset| {
                    FileEntry::new(format!("/fuzz/track_{}.mp3", added + offset), None)
                }));
                added += count;
            }
            1 => {
                let _ = coordinator.delete_track(arg % (len + 1));
            }
            2 => {
                let _ = coordinator.move_track(arg % len, (arg / 4) % len);
            }
            3 => {
                let _ = coordinator.play_at(arg % (len + 1));
            }
            4 => coordinator.play_next(),
            5 => coordinator.play_previous(),
            6 => coordinator.toggle_play_pause(),
            7 => coordinator.stop(),
            8 => coordinator.clear(),
            9 => {
                coordinator.cycle_play_mode();
            }
            10 => handle.emit(MediaSignal::Ended),
            11 => handle.emit(MediaSignal::Error(MediaErrorKind::Decode)),
            12 => handle.emit(MediaSignal::TimeUpdate(arg as f64)),
            13 => coordinator.seek_by(arg as f64 - 128.0),
            14 => {
                coordinator.set_volume(arg as f32 / 255.0);
                coordinator.toggle_muted();
            }
            _ => {
                now += Duration::from_millis(arg as u64 * 4);
                coordinator.tick_at(now);
            }
        }

        let playlist = coordinator.playlist();
        if let Some(index) = playlist.selected_index() {
            assert!(index < playlist.len());
        }
        let volume = coordinator.playback().volume;
        assert!((0.0..=1.0).contains(&volume));
    }
});
