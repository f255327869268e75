//! Types d'erreurs pour pmomembership

use crate::ids::{PlaylistId, Position, SongId};

/// Erreurs du moteur d'appartenance ordonnée
///
/// Chaque variante correspond à une opération rejetée : aucune n'est émise
/// après qu'un renumérotage partiel ait été rendu visible.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Song {song_id} is already in playlist {playlist_id}")]
    DuplicateMembership {
        playlist_id: PlaylistId,
        song_id: SongId,
    },

    #[error("No song at position {position} in playlist {playlist_id} (length {len})")]
    PositionNotFound {
        playlist_id: PlaylistId,
        position: Position,
        len: usize,
    },

    #[error("Invalid position {position} for playlist {playlist_id} (expected 1..={len})")]
    InvalidPosition {
        playlist_id: PlaylistId,
        position: Position,
        len: usize,
    },

    #[error("Song {song_id} is not in playlist {playlist_id}")]
    MembershipNotFound {
        playlist_id: PlaylistId,
        song_id: SongId,
    },

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(PlaylistId),

    #[error("Song not found: {0}")]
    SongNotFound(SongId),

    #[error("Song {0} is still referenced by a playlist")]
    SongInUse(SongId),

    #[error("Playlist {playlist_id} changed concurrently (expected version {expected}, found {found})")]
    ConcurrentModification {
        playlist_id: PlaylistId,
        expected: u64,
        found: u64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Ordering invariant violated in playlist {playlist_id}: {detail}")]
    InvariantViolation {
        playlist_id: PlaylistId,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Indique si l'appelant peut relancer l'opération complète après
    /// avoir rechargé la liste.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConcurrentModification { .. } | Error::StoreUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

/// Type Result spécialisé pour pmomembership
pub type Result<T> = std::result::Result<T, Error>;
