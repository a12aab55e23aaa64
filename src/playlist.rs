use crate::model::{FileEntry, Track, TrackId, TrackMetadata};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlaylistError {
    #[error("index {index} is out of range for a playlist of {len} tracks")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Ordered tracks plus the selected track.
///
/// Selection is stored as a [`TrackId`], never as a position. The selected
/// position is looked up on demand, so it cannot drift when tracks are
/// removed or reordered underneath it.
#[derive(Debug, Default)]
pub struct PlaylistStore {
    items: Vec<Track>,
    selected: Option<TrackId>,
    next_id: u64,
}

impl PlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.items.get(index)
    }

    pub fn add_tracks<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = FileEntry>,
    {
        let before = self.items.len();
        for entry in entries {
            let display_title = display_title(&entry.path, entry.metadata.as_ref());
            let id = self.allocate_id();
            self.items.push(Track {
                id,
                path: entry.path,
                metadata: entry.metadata,
                display_title,
            });
        }
        debug!(added = self.items.len() - before, total = self.items.len(), "tracks added");
    }

    pub fn delete_track(&mut self, index: usize) -> Result<Track, PlaylistError> {
        self.check_index(index)?;
        let removed = self.items.remove(index);
        if self.selected == Some(removed.id) {
            self.selected = None;
        }
        debug!(index, id = %removed.id, "track deleted");
        Ok(removed)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.selected = None;
    }

    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), PlaylistError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }
        let track = self.items.remove(from);
        self.items.insert(to, track);
        Ok(())
    }

    /// Selects `index`, or clears the selection when it is `None` or out of range.
    pub fn select(&mut self, index: Option<usize>) {
        self.selected = index.and_then(|index| self.items.get(index)).map(|track| track.id);
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected.and_then(|id| self.find_index_by_id(id))
    }

    pub fn selected_id(&self) -> Option<TrackId> {
        self.selected
    }

    pub fn selected_track(&self) -> Option<&Track> {
        self.selected_index().and_then(|index| self.items.get(index))
    }

    pub fn find_index_by_id(&self, id: TrackId) -> Option<usize> {
        self.items.iter().position(|track| track.id == id)
    }

    /// First match wins: the same file may be queued more than once.
    pub fn find_index_by_path(&self, path: &Path) -> Option<usize> {
        self.items.iter().position(|track| track.path == path)
    }

    fn allocate_id(&mut self) -> TrackId {
        self.next_id += 1;
        TrackId::new(self.next_id)
    }

    fn check_index(&self, index: usize) -> Result<(), PlaylistError> {
        if index < self.items.len() {
            return Ok(());
        }
        let err = PlaylistError::IndexOutOfRange {
            index,
            len: self.items.len(),
        };
        warn!("{err}");
        Err(err)
    }
}

/// Title shown for a track, fixed at insertion time.
///
/// `title - artist`, then `title`, then `artist - filename`, then `filename`.
pub fn display_title(path: &Path, metadata: Option<&TrackMetadata>) -> String {
    let filename = file_name(path);
    let Some(metadata) = metadata else {
        return filename;
    };

    match (metadata.title(), metadata.artist_line()) {
        (Some(title), Some(artist)) => format!("{title} - {artist}"),
        (Some(title), None) => title.to_string(),
        (None, Some(artist)) => format!("{artist} - {filename}"),
        (None, None) => filename,
    }
}

/// Last path segment, treating `\` and `/` alike so Windows paths behave on any host.
pub fn file_name(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    raw.rsplit('/').next().unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn store_with(names: &[&str]) -> PlaylistStore {
        let mut store = PlaylistStore::new();
        store.add_tracks(
            names
                .iter()
                .map(|name| FileEntry::new(format!("/music/{name}.mp3"), None)),
        );
        store
    }

    fn titles(store: &PlaylistStore) -> Vec<&str> {
        store
            .tracks()
            .iter()
            .map(|track| track.display_title.as_str())
            .collect()
    }

    #[test]
    fn title_precedence_follows_available_tags() {
        let path = Path::new("/music/track.mp3");
        let both = TrackMetadata {
            title: Some(String::from("Song")),
            artist: Some(String::from("Artist")),
            ..TrackMetadata::default()
        };
        let title_only = TrackMetadata {
            title: Some(String::from("Song")),
            ..TrackMetadata::default()
        };
        let artist_only = TrackMetadata {
            artist: Some(String::from("Artist")),
            ..TrackMetadata::default()
        };

        assert_eq!(display_title(path, Some(&both)), "Song - Artist");
        assert_eq!(display_title(path, Some(&title_only)), "Song");
        assert_eq!(display_title(path, Some(&artist_only)), "Artist - track.mp3");
        assert_eq!(
            display_title(path, Some(&TrackMetadata::default())),
            "track.mp3"
        );
        assert_eq!(display_title(path, None), "track.mp3");
    }

    #[test]
    fn file_name_normalizes_windows_separators() {
        assert_eq!(file_name(Path::new(r"C:\Music\Album\song.flac")), "song.flac");
        assert_eq!(file_name(Path::new("relative/dir/a.ogg")), "a.ogg");
        assert_eq!(file_name(Path::new("")), "");
    }

    #[test]
    fn add_tracks_appends_in_order_with_unique_ids() {
        let mut store = store_with(&["a", "b"]);
        store.add_tracks([
            FileEntry::new("/music/a.mp3", None),
            FileEntry::new("/music/c.mp3", None),
        ]);

        assert_eq!(titles(&store), vec!["a.mp3", "b.mp3", "a.mp3", "c.mp3"]);
        let ids: HashSet<TrackId> = store.tracks().iter().map(|track| track.id).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(store.find_index_by_path(Path::new("/music/a.mp3")), Some(0));
    }

    #[test]
    fn deleting_before_selection_keeps_identity() {
        let mut store = store_with(&["a", "b", "c", "d", "e"]);
        store.select(Some(2));
        let selected = store.selected_id();

        store.delete_track(0).expect("delete");

        assert_eq!(store.selected_index(), Some(1));
        assert_eq!(store.selected_id(), selected);
        assert_eq!(store.selected_track().map(|t| t.display_title.as_str()), Some("c.mp3"));
    }

    #[test]
    fn deleting_selected_track_unsets_selection() {
        let mut store = store_with(&["a", "b", "c"]);
        store.select(Some(1));

        let removed = store.delete_track(1).expect("delete");

        assert_eq!(removed.display_title, "b.mp3");
        assert_eq!(store.selected_index(), None);
    }

    #[test]
    fn out_of_range_operations_leave_state_untouched() {
        let mut store = store_with(&["a", "b"]);
        store.select(Some(1));

        assert_eq!(
            store.delete_track(2),
            Err(PlaylistError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert!(store.move_track(0, 5).is_err());
        assert_eq!(titles(&store), vec!["a.mp3", "b.mp3"]);
        assert_eq!(store.selected_index(), Some(1));
    }

    #[test]
    fn moving_selected_track_follows_it() {
        let mut store = store_with(&["a", "b", "c", "d", "e"]);
        store.select(Some(4));

        store.move_track(4, 0).expect("move");

        assert_eq!(store.selected_index(), Some(0));
        assert_eq!(titles(&store), vec!["e.mp3", "a.mp3", "b.mp3", "c.mp3", "d.mp3"]);
    }

    #[test]
    fn moving_other_track_across_selection_shifts_position() {
        let mut store = store_with(&["a", "b", "c"]);
        store.select(Some(1));

        store.move_track(0, 2).expect("move");
        assert_eq!(store.selected_index(), Some(0));

        store.move_track(2, 0).expect("move");
        assert_eq!(store.selected_index(), Some(1));
    }

    #[test]
    fn select_out_of_range_clears_selection() {
        let mut store = store_with(&["a"]);
        store.select(Some(0));
        store.select(Some(3));
        assert_eq!(store.selected_index(), None);
    }

    #[test]
    fn clear_empties_and_unselects() {
        let mut store = store_with(&["a", "b"]);
        store.select(Some(0));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.selected_index(), None);

        store.add_tracks([FileEntry::new(PathBuf::from("x.mp3"), None)]);
        assert_eq!(store.selected_index(), None);
    }

    proptest::proptest! {
        #[test]
        fn selection_stays_in_bounds_and_on_the_same_track(
            ops in proptest::collection::vec((0u8..5, 0usize..12, 0usize..12), 1..200)
        ) {
            let mut store = store_with(&["a", "b", "c", "d"]);
            store.select(Some(0));

            for (op, a, b) in ops {
                let before = store.selected_id();
                match op {
                    0 => store.add_tracks([FileEntry::new(format!("/music/{a}.mp3"), None)]),
                    1 => { let _ = store.delete_track(a); }
                    2 => { let _ = store.move_track(a, b); }
                    3 => store.select(Some(a)),
                    _ => store.select(None),
                }

                if let Some(index) = store.selected_index() {
                    prop_assert!(index < store.len());
                    if matches!(op, 0..=2) {
                        prop_assert!(before == store.selected_id());
                    }
                }
                if let Some(id) = store.selected_id() {
                    prop_assert!(store.find_index_by_id(id).is_some());
                }
            }
        }
    }
}
