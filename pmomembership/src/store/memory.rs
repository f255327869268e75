//! Store en mémoire (playlists éphémères, tests)

use crate::catalog::{Catalog, NewSong, Playlist, Song};
use crate::error::Error;
use crate::ids::{PlaylistId, SongId};
use crate::membership::{
    CommitBatch, Membership, MembershipChange, PlaylistBatch, PlaylistSnapshot,
};
use crate::store::MembershipStore;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;

struct StoredPlaylist {
    info: Playlist,
    version: u64,
    memberships: Vec<Membership>,
}

#[derive(Default)]
struct MemoryState {
    playlists: BTreeMap<PlaylistId, StoredPlaylist>,
    songs: BTreeMap<SongId, Song>,
    last_playlist_id: i64,
    last_song_id: i64,
}

/// Store volatile avec les mêmes garanties que [`SqliteStore`](super::SqliteStore)
///
/// Les lots sont appliqués sur des copies puis substitués d'un bloc, sous le
/// verrou d'écriture : un commit refusé ne laisse aucune trace.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_playlist(&self, name: &str, description: Option<&str>) -> Playlist {
        let mut state = self.state.write().await;
        state.last_playlist_id += 1;
        let info = Playlist {
            id: PlaylistId::new(state.last_playlist_id),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at: Utc::now(),
        };
        state.playlists.insert(
            info.id,
            StoredPlaylist {
                info: info.clone(),
                version: 0,
                memberships: Vec::new(),
            },
        );
        info
    }

    pub async fn delete_playlist(&self, id: PlaylistId) -> bool {
        self.state.write().await.playlists.remove(&id).is_some()
    }

    pub async fn create_song(&self, song: NewSong) -> Song {
        let mut state = self.state.write().await;
        state.last_song_id += 1;
        let song = song.into_song(SongId::new(state.last_song_id), Utc::now());
        state.songs.insert(song.id, song.clone());
        song
    }

    pub async fn list_playlists(&self) -> Vec<Playlist> {
        let state = self.state.read().await;
        let mut playlists: Vec<Playlist> =
            state.playlists.values().map(|p| p.info.clone()).collect();
        playlists.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        playlists
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn load_all(&self, playlist_id: PlaylistId) -> Result<PlaylistSnapshot> {
        let state = self.state.read().await;
        let playlist = state
            .playlists
            .get(&playlist_id)
            .ok_or(Error::PlaylistNotFound(playlist_id))?;
        Ok(PlaylistSnapshot::new(
            playlist_id,
            playlist.version,
            playlist.memberships.clone(),
        ))
    }

    async fn exists(&self, playlist_id: PlaylistId, song_id: SongId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .playlists
            .get(&playlist_id)
            .is_some_and(|p| p.memberships.iter().any(|m| m.song_id == song_id)))
    }

    async fn commit(&self, batch: CommitBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;

        let mut staged = Vec::with_capacity(batch.playlists.len());
        for playlist_batch in &batch.playlists {
            let stored = state
                .playlists
                .get(&playlist_batch.playlist_id)
                .ok_or(Error::PlaylistNotFound(playlist_batch.playlist_id))?;
            let memberships = apply_changes(stored, playlist_batch, &state.songs)?;
            staged.push((playlist_batch.playlist_id, memberships));
        }

        for (playlist_id, memberships) in staged {
            if let Some(stored) = state.playlists.get_mut(&playlist_id) {
                stored.memberships = memberships;
                stored.version += 1;
            }
        }
        Ok(())
    }

    async fn playlists_containing(&self, song_id: SongId) -> Result<Vec<PlaylistId>> {
        let state = self.state.read().await;
        Ok(state
            .playlists
            .iter()
            .filter(|(_, p)| p.memberships.iter().any(|m| m.song_id == song_id))
            .map(|(id, _)| *id)
            .collect())
    }
}

#[async_trait]
impl Catalog for MemoryStore {
    async fn playlist_exists(&self, id: PlaylistId) -> Result<bool> {
        Ok(self.state.read().await.playlists.contains_key(&id))
    }

    async fn song_exists(&self, id: SongId) -> Result<bool> {
        Ok(self.state.read().await.songs.contains_key(&id))
    }

    async fn songs(&self, ids: &[SongId]) -> Result<Vec<Song>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.songs.get(id).cloned())
            .collect())
    }
}

/// Applique un lot sur une copie des memberships d'une playlist
///
/// Reproduit les contraintes de la base : version attendue, lignes
/// présentes, unicité de (playlist, position) et de (playlist, morceau).
fn apply_changes(
    stored: &StoredPlaylist,
    batch: &PlaylistBatch,
    songs: &BTreeMap<SongId, Song>,
) -> Result<Vec<Membership>> {
    let stale = || Error::ConcurrentModification {
        playlist_id: batch.playlist_id,
        expected: batch.expected_version,
        found: stored.version,
    };

    if stored.version != batch.expected_version {
        return Err(stale());
    }

    let mut memberships = stored.memberships.clone();

    for change in &batch.changes {
        if let MembershipChange::Delete { song_id, position } = change {
            let index = memberships
                .iter()
                .position(|m| m.song_id == *song_id && m.position == *position)
                .ok_or_else(stale)?;
            memberships.remove(index);
        }
    }

    for change in &batch.changes {
        if let MembershipChange::Reposition { song_id, from, to } = change {
            let membership = memberships
                .iter_mut()
                .find(|m| m.song_id == *song_id && m.position == *from)
                .ok_or_else(stale)?;
            membership.position = *to;
        }
    }

    for change in &batch.changes {
        if let MembershipChange::Insert(membership) = change {
            if !songs.contains_key(&membership.song_id) {
                return Err(Error::SongNotFound(membership.song_id));
            }
            if memberships.iter().any(|m| m.song_id == membership.song_id) {
                return Err(Error::DuplicateMembership {
                    playlist_id: batch.playlist_id,
                    song_id: membership.song_id,
                });
            }
            memberships.push(Membership {
                playlist_id: batch.playlist_id,
                ..membership.clone()
            });
        }
    }

    let mut positions = HashSet::with_capacity(memberships.len());
    for membership in &memberships {
        if !positions.insert(membership.position) {
            return Err(Error::InvariantViolation {
                playlist_id: batch.playlist_id,
                detail: format!("position {} already taken", membership.position),
            });
        }
    }

    memberships.sort_by_key(|m| m.position);
    Ok(memberships)
}
