//! MembershipEngine : opérations ordonnées sur les playlists
//!
//! Chaque opération suit le même protocole : validation auprès du catalogue,
//! verrou de la (ou des) playlist(s), chargement complet depuis le store,
//! calcul des nouvelles positions en mémoire, puis un commit unique. Un
//! conflit de version (autre processus sur la même base) déclenche un
//! rechargement, dans la limite de `max_commit_retries`.

use crate::catalog::{Catalog, Song};
use crate::config::MembershipConfig;
use crate::error::Error;
use crate::events::{MembershipEvent, MembershipEventKind};
use crate::ids::{PlaylistId, Position, SongId};
use crate::membership::{CommitBatch, Membership};
use crate::ordering::OrderedList;
use crate::store::MembershipStore;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Morceau d'une playlist avec ses métadonnées de catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistEntry {
    pub membership: Membership,
    /// `None` si le morceau a disparu du catalogue
    pub song: Option<Song>,
}

/// Vue ordonnée d'une playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistView {
    pub playlist_id: PlaylistId,
    pub version: u64,
    pub entries: Vec<PlaylistEntry>,
}

impl PlaylistView {
    pub fn song_count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_duration_secs(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|entry| entry.song.as_ref())
            .map(|song| u64::from(song.duration_secs))
            .sum()
    }

    pub fn song_ids(&self) -> Vec<SongId> {
        self.entries.iter().map(|e| e.membership.song_id).collect()
    }
}

/// Résultat d'un transfert entre playlists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// Membership retirée de la playlist source
    pub removed: Membership,
    /// Membership créée en fin de playlist destination
    pub appended: Membership,
}

type LockMap = Arc<SyncMutex<HashMap<PlaylistId, Arc<Mutex<()>>>>>;

/// Verrous tenus pendant une opération
///
/// Au drop, les entrées que plus personne n'attend sont retirées de la table :
/// elle ne contient que les playlists en cours de modification.
struct PlaylistGuards {
    guards: Vec<(PlaylistId, OwnedMutexGuard<()>)>,
    locks: LockMap,
}

impl Drop for PlaylistGuards {
    fn drop(&mut self) {
        // Chaque guard garde un Arc sur son mutex : on les relâche d'abord
        let ids: Vec<PlaylistId> = self.guards.drain(..).map(|(id, _guard)| id).collect();

        let mut locks = lock_map(&self.locks);
        for id in ids {
            if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&id);
            }
        }
    }
}

fn lock_map(locks: &LockMap) -> MutexGuard<'_, HashMap<PlaylistId, Arc<Mutex<()>>>> {
    // La table reste cohérente même si un thread a paniqué en la tenant
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Moteur d'appartenance ordonnée
pub struct MembershipEngine<S> {
    store: Arc<S>,
    locks: LockMap,
    max_commit_retries: u32,
    event_tx: broadcast::Sender<MembershipEvent>,
}

impl<S> MembershipEngine<S>
where
    S: MembershipStore + Catalog,
{
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &MembershipConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: &MembershipConfig) -> Self {
        Self {
            store,
            locks: Arc::new(SyncMutex::new(HashMap::new())),
            max_commit_retries: config.max_commit_retries,
            event_tx: broadcast::channel(config.event_capacity.max(1)).0,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Souscrit aux évènements émis après chaque commit
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.event_tx.subscribe()
    }

    /// Ajoute un morceau en fin de playlist
    pub async fn append(&self, playlist_id: PlaylistId, song_id: SongId) -> Result<Membership> {
        self.ensure_playlist(playlist_id).await?;
        self.ensure_song(song_id).await?;
        if self.store.exists(playlist_id, song_id).await? {
            return Err(Error::DuplicateMembership {
                playlist_id,
                song_id,
            });
        }

        let _guards = self.lock_playlists(&[playlist_id]).await;
        let membership = self
            .commit_with_retry(&[playlist_id], |lists| {
                lists[0].append(song_id, Utc::now())
            })
            .await?;

        info!(
            playlist = %playlist_id,
            song = %song_id,
            position = membership.position,
            "Song appended to playlist"
        );
        self.notify(
            playlist_id,
            MembershipEventKind::Added {
                song_id,
                position: membership.position,
            },
        );
        Ok(membership)
    }

    /// Retire le morceau à `position` ; les suivants remontent d'un cran
    pub async fn remove(&self, playlist_id: PlaylistId, position: Position) -> Result<Membership> {
        self.ensure_playlist(playlist_id).await?;

        let _guards = self.lock_playlists(&[playlist_id]).await;
        let removed = self
            .commit_with_retry(&[playlist_id], |lists| lists[0].remove(position))
            .await?;

        info!(
            playlist = %playlist_id,
            song = %removed.song_id,
            position,
            "Song removed from playlist"
        );
        self.notify(
            playlist_id,
            MembershipEventKind::Removed {
                song_id: removed.song_id,
                position,
            },
        );
        Ok(removed)
    }

    /// Retire un morceau identifié par son id
    pub async fn remove_song(&self, playlist_id: PlaylistId, song_id: SongId) -> Result<Membership> {
        self.ensure_playlist(playlist_id).await?;

        let _guards = self.lock_playlists(&[playlist_id]).await;
        let removed = self
            .commit_with_retry(&[playlist_id], |lists| lists[0].remove_song(song_id))
            .await?;

        info!(
            playlist = %playlist_id,
            song = %song_id,
            position = removed.position,
            "Song removed from playlist"
        );
        self.notify(
            playlist_id,
            MembershipEventKind::Removed {
                song_id,
                position: removed.position,
            },
        );
        Ok(removed)
    }

    /// Déplace un morceau de `from` vers `to` et renvoie la liste renumérotée
    pub async fn move_song(
        &self,
        playlist_id: PlaylistId,
        from: Position,
        to: Position,
    ) -> Result<Vec<Membership>> {
        self.ensure_playlist(playlist_id).await?;

        let _guards = self.lock_playlists(&[playlist_id]).await;
        let memberships = self
            .commit_with_retry(&[playlist_id], |lists| {
                lists[0].move_song(from, to).map(<[Membership]>::to_vec)
            })
            .await?;

        if from != to {
            let song_id = memberships[to as usize - 1].song_id;
            info!(playlist = %playlist_id, song = %song_id, from, to, "Song moved");
            self.notify(playlist_id, MembershipEventKind::Moved { song_id, from, to });
        }
        Ok(memberships)
    }

    /// Déplace le morceau à `position` de `source` vers la fin de `destination`
    ///
    /// Les deux playlists sont modifiées dans un seul commit : en cas d'échec,
    /// le morceau reste dans la source.
    pub async fn transfer(
        &self,
        source: PlaylistId,
        position: Position,
        destination: PlaylistId,
    ) -> Result<TransferOutcome> {
        self.ensure_playlist(source).await?;
        self.ensure_playlist(destination).await?;

        let ids = lock_order(&[source, destination]);
        let src = index_in(&ids, source);
        let dst = index_in(&ids, destination);

        let _guards = self.lock_playlists(&ids).await;
        let outcome = self
            .commit_with_retry(&ids, |lists| {
                let song_id = lists[src]
                    .get(position)
                    .map(|m| m.song_id)
                    .ok_or_else(|| Error::PositionNotFound {
                        playlist_id: source,
                        position,
                        len: lists[src].len(),
                    })?;
                if lists[dst].contains(song_id) {
                    return Err(Error::DuplicateMembership {
                        playlist_id: destination,
                        song_id,
                    });
                }

                let removed = lists[src].remove(position)?;
                let appended = lists[dst].append(song_id, Utc::now())?;
                Ok(TransferOutcome { removed, appended })
            })
            .await?;

        let song_id = outcome.removed.song_id;
        info!(
            source = %source,
            destination = %destination,
            song = %song_id,
            position = outcome.appended.position,
            "Song transferred between playlists"
        );
        self.notify(
            source,
            MembershipEventKind::TransferredOut {
                song_id,
                position,
                destination,
            },
        );
        self.notify(
            destination,
            MembershipEventKind::TransferredIn {
                song_id,
                position: outcome.appended.position,
                source,
            },
        );
        Ok(outcome)
    }

    /// Retire un morceau de toutes les playlists qui le contiennent
    ///
    /// À appeler avant de supprimer le morceau du catalogue : chaque playlist
    /// est renumérotée, le tout dans un seul commit.
    pub async fn purge_song(&self, song_id: SongId) -> Result<Vec<Membership>> {
        let ids = lock_order(&self.store.playlists_containing(song_id).await?);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let _guards = self.lock_playlists(&ids).await;
        let removed = self
            .commit_with_retry(&ids, |lists| {
                let mut removed = Vec::new();
                for list in lists.iter_mut().filter(|list| list.contains(song_id)) {
                    removed.push(list.remove_song(song_id)?);
                }
                Ok(removed)
            })
            .await?;

        info!(song = %song_id, playlists = removed.len(), "Song purged from playlists");
        for membership in &removed {
            self.notify(
                membership.playlist_id,
                MembershipEventKind::Removed {
                    song_id,
                    position: membership.position,
                },
            );
        }
        Ok(removed)
    }

    /// Vue ordonnée d'une playlist, enrichie par le catalogue
    pub async fn playlist(&self, playlist_id: PlaylistId) -> Result<PlaylistView> {
        self.ensure_playlist(playlist_id).await?;

        let snapshot = self.store.load_all(playlist_id).await?;
        let songs: HashMap<SongId, Song> = self
            .store
            .songs(&snapshot.song_ids())
            .await?
            .into_iter()
            .map(|song| (song.id, song))
            .collect();

        let entries = snapshot
            .memberships
            .into_iter()
            .map(|membership| PlaylistEntry {
                song: songs.get(&membership.song_id).cloned(),
                membership,
            })
            .collect();

        Ok(PlaylistView {
            playlist_id,
            version: snapshot.version,
            entries,
        })
    }

    /// Vérifie si un morceau appartient à une playlist
    pub async fn contains(&self, playlist_id: PlaylistId, song_id: SongId) -> Result<bool> {
        self.store.exists(playlist_id, song_id).await
    }

    // Helpers internes

    async fn ensure_playlist(&self, id: PlaylistId) -> Result<()> {
        if self.store.playlist_exists(id).await? {
            Ok(())
        } else {
            Err(Error::PlaylistNotFound(id))
        }
    }

    async fn ensure_song(&self, id: SongId) -> Result<()> {
        if self.store.song_exists(id).await? {
            Ok(())
        } else {
            Err(Error::SongNotFound(id))
        }
    }

    /// Charge, calcule et committe ; recommence sur conflit de version
    async fn commit_with_retry<T>(
        &self,
        playlist_ids: &[PlaylistId],
        mut compute: impl FnMut(&mut [OrderedList]) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            let mut lists = Vec::with_capacity(playlist_ids.len());
            for &id in playlist_ids {
                lists.push(OrderedList::new(self.store.load_all(id).await?));
            }

            let outcome = compute(lists.as_mut_slice())?;

            let mut batch = CommitBatch::new();
            for list in lists {
                list.check_contiguous()?;
                batch.push(list.into_batch());
            }
            if batch.is_empty() {
                return Ok(outcome);
            }

            debug!(
                playlists = ?batch.playlist_ids(),
                changes = batch.change_count(),
                attempt,
                "Committing membership batch"
            );

            match self.store.commit(batch).await {
                Ok(()) => return Ok(outcome),
                Err(err @ Error::ConcurrentModification { .. })
                    if attempt < self.max_commit_retries =>
                {
                    attempt += 1;
                    warn!(error = %err, attempt, "Membership batch rejected, reloading");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Verrouille les playlists dans l'ordre croissant des ids
    async fn lock_playlists(&self, ids: &[PlaylistId]) -> PlaylistGuards {
        let mut held = PlaylistGuards {
            guards: Vec::with_capacity(ids.len()),
            locks: self.locks.clone(),
        };
        for id in lock_order(ids) {
            let lock = self.playlist_lock(id);
            held.guards.push((id, lock.lock_owned().await));
        }
        held
    }

    fn playlist_lock(&self, id: PlaylistId) -> Arc<Mutex<()>> {
        lock_map(&self.locks).entry(id).or_default().clone()
    }

    fn notify(&self, playlist_id: PlaylistId, kind: MembershipEventKind) {
        // Ignoré si aucun abonné
        let _ = self.event_tx.send(MembershipEvent::new(playlist_id, kind));
    }
}

/// Ids triés et dédoublonnés (un transfert vers la même playlist n'en prend qu'un)
fn lock_order(ids: &[PlaylistId]) -> Vec<PlaylistId> {
    let mut ids = ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

fn index_in(ids: &[PlaylistId], id: PlaylistId) -> usize {
    ids.iter().position(|&candidate| candidate == id).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewSong;
    use crate::store::MemoryStore;

    fn tracked_locks<S>(engine: &MembershipEngine<S>) -> usize {
        lock_map(&engine.locks).len()
    }

    #[tokio::test]
    async fn test_lock_table_is_pruned_after_operations() {
        let store = Arc::new(MemoryStore::new());
        let engine = MembershipEngine::new(store.clone());
        let p1 = store.create_playlist("P1", None).await.id;
        let p2 = store.create_playlist("P2", None).await.id;
        let song = store.create_song(NewSong::new("A", "Artist", 60)).await.id;

        engine.append(p1, song).await.unwrap();
        engine.transfer(p1, 1, p2).await.unwrap();
        assert!(engine.remove(p1, 1).await.is_err());
        assert_eq!(tracked_locks(&engine), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_table_is_pruned_after_contention() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MembershipEngine::new(store.clone()));
        let playlist = store.create_playlist("Busy", None).await.id;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let song = store
                .create_song(NewSong::new(format!("Song {}", i), "Artist", 60))
                .await
                .id;
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move { engine.append(playlist, song).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(tracked_locks(&engine), 0);
    }
}
