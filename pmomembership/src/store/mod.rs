//! Stockage durable des memberships
//!
//! Le moteur charge la liste complète d'une playlist, calcule les nouvelles
//! positions en mémoire puis confie le lot de changements au store. Un
//! [`MembershipStore`] doit appliquer un [`CommitBatch`] en entier ou pas du
//! tout, et refuser un lot dont la version attendue ne correspond plus.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::ids::{PlaylistId, SongId};
use crate::membership::{CommitBatch, PlaylistSnapshot};
use crate::Result;
use async_trait::async_trait;

/// Contrat de persistance des memberships
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Charge toutes les memberships d'une playlist, triées par position
    async fn load_all(&self, playlist_id: PlaylistId) -> Result<PlaylistSnapshot>;

    /// Vérifie si un morceau appartient déjà à une playlist
    async fn exists(&self, playlist_id: PlaylistId, song_id: SongId) -> Result<bool>;

    /// Applique atomiquement un lot de changements
    ///
    /// Erreurs attendues : `ConcurrentModification` si une version ne
    /// correspond plus, `StoreUnavailable` si l'écriture échoue. Dans les deux
    /// cas rien n'est appliqué.
    async fn commit(&self, batch: CommitBatch) -> Result<()>;

    /// Liste les playlists qui référencent un morceau
    async fn playlists_containing(&self, song_id: SongId) -> Result<Vec<PlaylistId>>;
}
