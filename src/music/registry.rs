//! Music registry: deduplicated track store plus the set of playlists
//!
//! Every registry and playlist operation runs under one registry-wide lock.
//! Playlists have no locking of their own.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

use crate::constants::GLOBAL_PLAYLIST;
use crate::error::MusicError;
use crate::music::playlist::Playlist;
use crate::music::track::Music;

/// Opaque track identifier, sampled at random so it cannot be guessed
pub type MusicId = u32;

struct RegistryState {
    musics: HashMap<MusicId, Music>,
    /// Reverse index used for content deduplication
    ids: HashMap<Music, MusicId>,
    /// Ordered by name; the global playlist (empty name) sorts first
    playlists: BTreeMap<String, Playlist<MusicId>>,
    /// Playlist that supplied the previous track
    cursor: Option<String>,
}

impl RegistryState {
    fn intern(&mut self, music: Music) -> MusicId {
        if let Some(&id) = self.ids.get(&music) {
            return id;
        }

        let mut rng = rand::thread_rng();
        let id = loop {
            let candidate: MusicId = rng.gen();
            if !self.musics.contains_key(&candidate) {
                break candidate;
            }
        };

        self.ids.insert(music.clone(), id);
        self.musics.insert(id, music);
        id
    }

    /// First eligible playlist strictly after the cursor, wrapping around once
    fn next_eligible(&self) -> Option<String> {
        let after_cursor = |name: &String| self.cursor.as_ref().map_or(true, |c| name > c);

        self.playlists
            .iter()
            .filter(|(name, _)| after_cursor(name))
            .chain(self.playlists.iter().filter(|(name, _)| !after_cursor(name)))
            .find(|(_, playlist)| playlist.is_subscribed())
            .map(|(name, _)| name.clone())
    }

    fn playlist_mut(&mut self, name: &str) -> Result<&mut Playlist<MusicId>, MusicError> {
        self.playlists
            .get_mut(name)
            .ok_or_else(|| MusicError::PlaylistNotFound(name.to_string()))
    }
}

/// Shared store of tracks and playlists
pub struct MusicRegistry {
    state: Mutex<RegistryState>,
}

impl MusicRegistry {
    /// Create a registry holding only the global playlist
    pub fn new() -> Self {
        let mut playlists = BTreeMap::new();
        playlists.insert(GLOBAL_PLAYLIST.to_string(), Playlist::new(""));

        Self {
            state: Mutex::new(RegistryState {
                musics: HashMap::new(),
                ids: HashMap::new(),
                playlists,
                cursor: None,
            }),
        }
    }

    pub fn playlist_exists(&self, name: &str) -> bool {
        self.state.lock().playlists.contains_key(name)
    }

    /// Create a named, password-protected playlist
    pub fn new_playlist(&self, name: &str, password: &str) -> Result<(), MusicError> {
        if password.is_empty() && name != GLOBAL_PLAYLIST {
            return Err(MusicError::EmptyPassword(name.to_string()));
        }

        let mut state = self.state.lock();
        if state.playlists.contains_key(name) {
            return Err(MusicError::PlaylistExists(name.to_string()));
        }
        state.playlists.insert(name.to_string(), Playlist::new(password));
        tracing::debug!(playlist = name, "Created playlist");
        Ok(())
    }

    /// Add a track to a playlist (and to the global playlist), returning its ID.
    ///
    /// A track structurally equal to one already known reuses that track's ID.
    pub fn add_music(&self, playlist: &str, music: Music) -> Result<MusicId, MusicError> {
        let mut state = self.state.lock();
        if !state.playlists.contains_key(playlist) {
            return Err(MusicError::PlaylistNotFound(playlist.to_string()));
        }

        let id = state.intern(music);
        state.playlist_mut(playlist)?.push(id);
        if playlist != GLOBAL_PLAYLIST {
            state.playlist_mut(GLOBAL_PLAYLIST)?.push(id);
        }

        tracing::trace!(playlist, id, "Added music");
        Ok(id)
    }

    /// Pick the next track to play, round-robin across subscribed playlists
    pub fn next_music(&self) -> Result<Music, MusicError> {
        let mut state = self.state.lock();
        let name = state.next_eligible().ok_or(MusicError::NoMoreMusic)?;

        let id = state.playlist_mut(&name)?.next_music()?;
        state.cursor = Some(name);

        state.musics.get(&id).cloned().ok_or(MusicError::NoMoreMusic)
    }

    pub fn subscribe(&self, playlist: &str) -> Result<(), MusicError> {
        self.state.lock().playlist_mut(playlist)?.subscribe();
        Ok(())
    }

    pub fn unsubscribe(&self, playlist: &str) -> Result<(), MusicError> {
        self.state.lock().playlist_mut(playlist)?.unsubscribe();
        Ok(())
    }

    pub fn music(&self, id: MusicId) -> Option<Music> {
        self.state.lock().musics.get(&id).cloned()
    }

    /// Number of distinct tracks known
    pub fn music_count(&self) -> usize {
        self.state.lock().musics.len()
    }

    pub fn playlist_names(&self) -> Vec<String> {
        self.state.lock().playlists.keys().cloned().collect()
    }

    /// Track IDs of a playlist, in storage order
    pub fn playlist_tracks(&self, playlist: &str) -> Option<Vec<MusicId>> {
        self.state
            .lock()
            .playlists
            .get(playlist)
            .map(|p| p.tracks().to_vec())
    }

    pub fn subscribers(&self, playlist: &str) -> Option<usize> {
        self.state.lock().playlists.get(playlist).map(Playlist::subscribers)
    }
}

impl Default for MusicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn track(url: &str) -> Music {
        Music::new(url)
    }

    fn track_set(registry: &MusicRegistry, playlist: &str) -> HashSet<MusicId> {
        registry
            .playlist_tracks(playlist)
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_global_playlist_always_exists() {
        let registry = MusicRegistry::new();
        assert!(registry.playlist_exists(GLOBAL_PLAYLIST));
        assert_eq!(
            registry.new_playlist(GLOBAL_PLAYLIST, "x"),
            Err(MusicError::PlaylistExists(String::new()))
        );
    }

    #[test]
    fn test_new_playlist_requires_password() {
        let registry = MusicRegistry::new();
        assert_eq!(
            registry.new_playlist("party", ""),
            Err(MusicError::EmptyPassword("party".to_string()))
        );
        assert!(!registry.playlist_exists("party"));

        registry.new_playlist("party", "s3cret").unwrap();
        assert!(registry.playlist_exists("party"));
        assert_eq!(
            registry.new_playlist("party", "other"),
            Err(MusicError::PlaylistExists("party".to_string()))
        );
    }

    #[test]
    fn test_add_to_unknown_playlist() {
        let registry = MusicRegistry::new();
        assert_eq!(
            registry.add_music("nope", track("a")),
            Err(MusicError::PlaylistNotFound("nope".to_string()))
        );
        assert_eq!(registry.music_count(), 0);
    }

    #[test]
    fn test_duplicate_add_reuses_id() {
        let registry = MusicRegistry::new();
        let first = registry.add_music(GLOBAL_PLAYLIST, track("a")).unwrap();
        let second = registry.add_music(GLOBAL_PLAYLIST, track("a")).unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.music_count(), 1);
        assert_eq!(registry.playlist_tracks(GLOBAL_PLAYLIST).unwrap(), vec![first, first]);
        assert_eq!(registry.music(first), Some(track("a")));
    }

    #[test]
    fn test_global_playlist_is_superset() {
        let registry = MusicRegistry::new();
        registry.new_playlist("rock", "p").unwrap();
        registry.new_playlist("jazz", "p").unwrap();

        registry.add_music("rock", track("r1")).unwrap();
        registry.add_music("jazz", track("j1")).unwrap();
        registry.add_music(GLOBAL_PLAYLIST, track("g1")).unwrap();
        registry.add_music("rock", track("j1")).unwrap();

        let global = track_set(&registry, GLOBAL_PLAYLIST);
        for name in ["rock", "jazz"] {
            assert!(track_set(&registry, name).is_subset(&global));
        }
        assert_eq!(global.len(), 3);
    }

    #[test]
    fn test_no_subscribers_means_no_music() {
        let registry = MusicRegistry::new();
        registry.add_music(GLOBAL_PLAYLIST, track("a")).unwrap();
        assert_eq!(registry.next_music(), Err(MusicError::NoMoreMusic));

        registry.subscribe(GLOBAL_PLAYLIST).unwrap();
        assert_eq!(registry.next_music(), Ok(track("a")));

        registry.unsubscribe(GLOBAL_PLAYLIST).unwrap();
        assert_eq!(registry.next_music(), Err(MusicError::NoMoreMusic));
    }

    #[test]
    fn test_subscribed_but_empty_is_skipped() {
        let registry = MusicRegistry::new();
        registry.new_playlist("empty", "p").unwrap();
        registry.subscribe("empty").unwrap();
        assert_eq!(registry.next_music(), Err(MusicError::NoMoreMusic));
    }

    #[test]
    fn test_round_robin_across_playlists() {
        let registry = MusicRegistry::new();
        registry.new_playlist("a", "p").unwrap();
        registry.new_playlist("b", "p").unwrap();
        registry.add_music("a", track("a1")).unwrap();
        registry.add_music("b", track("b1")).unwrap();
        registry.subscribe("a").unwrap();
        registry.subscribe("b").unwrap();

        let served: Vec<String> = (0..4)
            .map(|_| registry.next_music().unwrap().url().to_string())
            .collect();
        assert_eq!(served, vec!["a1", "b1", "a1", "b1"]);
    }

    #[test]
    fn test_unknown_playlist_subscription() {
        let registry = MusicRegistry::new();
        assert!(registry.subscribe("ghost").is_err());
        assert!(registry.unsubscribe("ghost").is_err());
        assert_eq!(registry.subscribers("ghost"), None);
    }

    #[test]
    fn test_epoch_over_registry() {
        let registry = MusicRegistry::new();
        registry.new_playlist("mix", "p").unwrap();
        for i in 0..5 {
            registry.add_music("mix", track(&format!("t{}", i))).unwrap();
        }
        registry.subscribe("mix").unwrap();

        let served: HashSet<String> = (0..5)
            .map(|_| registry.next_music().unwrap().url().to_string())
            .collect();
        assert_eq!(served.len(), 5);
    }

    proptest! {
        #[test]
        fn test_dedup_by_content(urls in proptest::collection::vec("[a-c]", 1..30)) {
            let registry = MusicRegistry::new();
            let mut ids: HashMap<String, MusicId> = HashMap::new();

            for url in &urls {
                let id = registry.add_music(GLOBAL_PLAYLIST, Music::new(url.clone())).unwrap();
                let stable = *ids.entry(url.clone()).or_insert(id);
                prop_assert_eq!(stable, id);
            }

            prop_assert_eq!(registry.music_count(), ids.len());
            prop_assert_eq!(registry.playlist_tracks(GLOBAL_PLAYLIST).unwrap().len(), urls.len());
        }
    }
}
