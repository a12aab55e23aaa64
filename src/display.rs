use std::path::Path;

/// `M:SS` with truncated seconds. Elapsed time never goes below `0:00`.
pub fn format_elapsed(seconds: f64) -> String {
    if seconds.is_nan() || seconds < 0.0 {
        return String::from("0:00");
    }
    clock(seconds)
}

/// Like [`format_elapsed`], but an unknown or unusable duration shows the
/// `--:--` placeholder.
pub fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => clock(seconds),
        _ => String::from("--:--"),
    }
}

fn clock(seconds: f64) -> String {
    let total = if seconds.is_finite() {
        seconds.trunc() as u64
    } else {
        0
    };
    format!("{}:{:02}", total / 60, total % 60)
}

/// Average bitrate in kbps from the file size and play length.
pub fn estimate_bitrate_kbps(file_size: u64, duration: f64) -> Option<u64> {
    if file_size == 0 || !duration.is_finite() || duration <= 0.0 {
        return None;
    }
    Some((file_size as f64 * 8.0 / (duration * 1000.0)).round() as u64)
}

pub fn format_bitrate(kbps: Option<u64>) -> String {
    match kbps {
        Some(kbps) => format!("{kbps} kbps"),
        None => String::from("-- kbps"),
    }
}

/// Upper-case extension, e.g. `FLAC`.
pub fn format_label(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| String::from("Unknown"))
}

/// File name without its extension, for the details panel.
pub fn file_stem(path: &Path) -> String {
    let name = crate::playlist::file_name(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ if name.is_empty() => String::from("Unknown file"),
        _ => name,
    }
}

pub fn format_year(year: Option<u32>) -> String {
    year.filter(|&year| year > 0)
        .map(|year| year.to_string())
        .unwrap_or_else(|| String::from("Unknown year"))
}

pub fn progress_ratio(current: f64, duration: Option<f64>) -> Option<f64> {
    let duration = duration.filter(|d| d.is_finite() && *d > 0.0)?;
    Some((current / duration).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_truncates_to_whole_seconds() {
        assert_eq!(format_elapsed(0.0), "0:00");
        assert_eq!(format_elapsed(65.9), "1:05");
        assert_eq!(format_elapsed(599.99), "9:59");
        assert_eq!(format_elapsed(3600.0), "60:00");
    }

    #[test]
    fn elapsed_floors_invalid_input() {
        assert_eq!(format_elapsed(-4.0), "0:00");
        assert_eq!(format_elapsed(f64::NAN), "0:00");
    }

    #[test]
    fn unknown_duration_shows_placeholder() {
        assert_eq!(format_duration(None), "--:--");
        assert_eq!(format_duration(Some(f64::NAN)), "--:--");
        assert_eq!(format_duration(Some(f64::INFINITY)), "--:--");
        assert_eq!(format_duration(Some(-1.0)), "--:--");
        assert_eq!(format_duration(Some(185.2)), "3:05");
    }

    #[test]
    fn bitrate_rounds_to_kbps() {
        assert_eq!(estimate_bitrate_kbps(4_000_000, 100.0), Some(320));
        assert_eq!(estimate_bitrate_kbps(1_000, 0.0), None);
        assert_eq!(estimate_bitrate_kbps(0, 10.0), None);
        assert_eq!(format_bitrate(Some(128)), "128 kbps");
        assert_eq!(format_bitrate(None), "-- kbps");
    }

    #[test]
    fn labels_come_from_the_path() {
        assert_eq!(format_label(Path::new("/m/a.flac")), "FLAC");
        assert_eq!(format_label(Path::new("/m/noext")), "Unknown");
        assert_eq!(file_stem(Path::new(r"C:\m\song.name.mp3")), "song.name");
        assert_eq!(file_stem(Path::new("/m/plain")), "plain");
    }

    #[test]
    fn progress_ratio_needs_a_duration() {
        assert_eq!(progress_ratio(30.0, Some(60.0)), Some(0.5));
        assert_eq!(progress_ratio(90.0, Some(60.0)), Some(1.0));
        assert_eq!(progress_ratio(30.0, None), None);
    }

    #[test]
    fn year_falls_back_when_missing() {
        assert_eq!(format_year(Some(1999)), "1999");
        assert_eq!(format_year(Some(0)), "Unknown year");
        assert_eq!(format_year(None), "Unknown year");
    }
}
