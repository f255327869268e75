//! Évènements émis après chaque commit réussi

use crate::ids::{PlaylistId, Position, SongId};
use std::time::SystemTime;

/// Changement committé sur une playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEvent {
    pub playlist_id: PlaylistId,
    pub kind: MembershipEventKind,
    pub timestamp: SystemTime,
}

/// Variantes d'évènements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEventKind {
    /// Un morceau a été ajouté en fin de playlist
    Added { song_id: SongId, position: Position },
    /// Un morceau a été retiré, les suivants ont été renumérotés
    Removed { song_id: SongId, position: Position },
    /// Un morceau a changé de position
    Moved {
        song_id: SongId,
        from: Position,
        to: Position,
    },
    /// Un morceau a quitté cette playlist pour `destination`
    TransferredOut {
        song_id: SongId,
        position: Position,
        destination: PlaylistId,
    },
    /// Un morceau est arrivé depuis `source`
    TransferredIn {
        song_id: SongId,
        position: Position,
        source: PlaylistId,
    },
}

impl MembershipEvent {
    pub(crate) fn new(playlist_id: PlaylistId, kind: MembershipEventKind) -> Self {
        Self {
            playlist_id,
            kind,
            timestamp: SystemTime::now(),
        }
    }
}
