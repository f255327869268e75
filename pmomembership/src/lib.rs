//! # pmomembership - Appartenance ordonnée des morceaux aux playlists
//!
//! Cette crate maintient la relation plusieurs-à-plusieurs entre playlists et
//! morceaux, chaque lien portant une position strictement ordonnée :
//! - Pour une playlist, les positions valent exactement `1..=N`
//! - Un morceau apparaît au plus une fois par playlist
//! - Aucun état intermédiaire (trou, doublon) n'est jamais persisté
//!
//! # Architecture
//!
//! - **OrderedList** : calcul pur des renumérotages sur la liste complète d'une playlist
//! - **MembershipStore** : persistance avec commit tout-ou-rien et jeton de version
//! - **Catalog** : existence et métadonnées des playlists et des morceaux
//! - **MembershipEngine** : sérialise les opérations par playlist et orchestre
//!   chargement, calcul et commit
//!
//! # Exemple d'utilisation
//!
//! ```no_run
//! use pmomembership::{MembershipEngine, NewSong, SqliteStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> pmomembership::Result<()> {
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! let rock = store.create_playlist("Rock", None).await?;
//! let chill = store.create_playlist("Chill", None).await?;
//! let song = store.create_song(NewSong::new("Teardrop", "Massive Attack", 329)).await?;
//!
//! let engine = MembershipEngine::new(store.clone());
//! engine.append(rock.id, song.id).await?;
//! engine.transfer(rock.id, 1, chill.id).await?;
//!
//! let view = engine.playlist(chill.id).await?;
//! println!("{} morceau(x), {}s", view.song_count(), view.total_duration_secs());
//! # Ok(())
//! # }
//! ```

mod catalog;
mod config;
mod engine;
mod error;
mod events;
mod ids;
mod membership;
mod ordering;
mod store;

// Réexports publics
pub use catalog::{Catalog, NewSong, Playlist, Song};
pub use config::MembershipConfig;
pub use engine::{MembershipEngine, PlaylistEntry, PlaylistView, TransferOutcome};
pub use error::{Error, Result};
pub use events::{MembershipEvent, MembershipEventKind};
pub use ids::{PlaylistId, Position, SongId};
pub use membership::{CommitBatch, Membership, MembershipChange, PlaylistBatch, PlaylistSnapshot};
pub use ordering::OrderedList;
pub use store::{MembershipStore, MemoryStore, SqliteStore};
