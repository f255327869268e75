//! Membership : lien ordonné entre une playlist et un morceau

use crate::ids::{PlaylistId, Position, SongId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Un morceau placé à une position donnée dans une playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub playlist_id: PlaylistId,
    pub song_id: SongId,

    /// Rang dans la playlist (1..=N, sans trou ni doublon)
    pub position: Position,

    /// Date d'ajout à la playlist
    pub added_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(
        playlist_id: PlaylistId,
        song_id: SongId,
        position: Position,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            playlist_id,
            song_id,
            position,
            added_at,
        }
    }
}

/// Modification élémentaire d'une membership, exprimée par rapport à l'état chargé
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    /// Nouvelle membership
    Insert(Membership),
    /// Changement de position d'une membership existante
    Reposition {
        song_id: SongId,
        from: Position,
        to: Position,
    },
    /// Suppression d'une membership existante
    Delete { song_id: SongId, position: Position },
}

/// Vue complète et ordonnée d'une playlist telle que lue dans le store
///
/// `version` sert de jeton de concurrence optimiste : un commit construit à
/// partir de ce snapshot est refusé si la playlist a changé entre-temps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSnapshot {
    pub playlist_id: PlaylistId,
    pub version: u64,
    pub memberships: Vec<Membership>,
}

impl PlaylistSnapshot {
    pub fn new(playlist_id: PlaylistId, version: u64, memberships: Vec<Membership>) -> Self {
        Self {
            playlist_id,
            version,
            memberships,
        }
    }

    pub fn len(&self) -> usize {
        self.memberships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty()
    }

    pub fn song_ids(&self) -> Vec<SongId> {
        self.memberships.iter().map(|m| m.song_id).collect()
    }
}

/// Ensemble des modifications d'une playlist pour un commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistBatch {
    pub playlist_id: PlaylistId,
    pub expected_version: u64,
    pub changes: Vec<MembershipChange>,
}

impl PlaylistBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Écriture atomique couvrant une ou plusieurs playlists
///
/// Le store applique toutes les `PlaylistBatch` ou aucune.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub playlists: Vec<PlaylistBatch>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(batch: PlaylistBatch) -> Self {
        Self {
            playlists: vec![batch],
        }
    }

    /// Ajoute le lot d'une playlist (ignoré s'il ne contient aucun changement)
    pub fn push(&mut self, batch: PlaylistBatch) {
        if !batch.is_empty() {
            self.playlists.push(batch);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.iter().all(PlaylistBatch::is_empty)
    }

    pub fn playlist_ids(&self) -> Vec<PlaylistId> {
        self.playlists.iter().map(|b| b.playlist_id).collect()
    }

    pub fn change_count(&self) -> usize {
        self.playlists.iter().map(|b| b.changes.len()).sum()
    }
}
