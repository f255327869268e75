//! Catalogue des playlists et des morceaux
//!
//! Le moteur ne manipule les playlists et les morceaux que par identifiant.
//! Le catalogue sert à valider leur existence et à enrichir l'affichage.

use crate::ids::{PlaylistId, SongId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Morceau du catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: u32,
    pub genre: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Données d'un morceau à créer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSong {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: u32,
    pub genre: Option<String>,
}

impl NewSong {
    pub fn new(title: impl Into<String>, artist: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: None,
            duration_secs,
            genre: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub(crate) fn into_song(self, id: SongId, added_at: DateTime<Utc>) -> Song {
        Song {
            id,
            title: self.title,
            artist: self.artist,
            album: self.album,
            duration_secs: self.duration_secs,
            genre: self.genre,
            added_at,
        }
    }
}

/// Playlist du catalogue (métadonnées seules, sans ses morceaux)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Accès en lecture au catalogue
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn playlist_exists(&self, id: PlaylistId) -> Result<bool>;

    async fn song_exists(&self, id: SongId) -> Result<bool>;

    /// Récupère plusieurs morceaux en une fois (les ids inconnus sont ignorés)
    async fn songs(&self, ids: &[SongId]) -> Result<Vec<Song>>;

    async fn song(&self, id: SongId) -> Result<Option<Song>> {
        Ok(self.songs(&[id]).await?.into_iter().next())
    }
}
