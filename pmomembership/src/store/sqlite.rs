//! Persistance SQLite du catalogue et des memberships

use crate::catalog::{Catalog, NewSong, Playlist, Song};
use crate::config::MembershipConfig;
use crate::error::Error;
use crate::ids::{PlaylistId, SongId};
use crate::membership::{
    CommitBatch, Membership, MembershipChange, PlaylistBatch, PlaylistSnapshot,
};
use crate::store::MembershipStore;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    ffi, params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS playlists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        last_modified TEXT
    );

    CREATE TABLE IF NOT EXISTS songs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        album TEXT,
        duration_secs INTEGER NOT NULL DEFAULT 0,
        genre TEXT,
        added_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS playlist_songs (
        playlist_id INTEGER NOT NULL,
        song_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY (playlist_id, song_id),
        UNIQUE (playlist_id, position),
        FOREIGN KEY (playlist_id) REFERENCES playlists(id) ON DELETE CASCADE,
        FOREIGN KEY (song_id) REFERENCES songs(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_playlists_name ON playlists(name);
    CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs(artist, title);
    CREATE INDEX IF NOT EXISTS idx_playlist_songs_song ON playlist_songs(song_id);
";

/// Store SQLite (une base pour toutes les playlists)
///
/// La connexion est partagée derrière un `Mutex` ; chaque commit s'exécute
/// dans une transaction SQLite unique.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Ouvre (ou crée) la base à `db_path`
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::StoreUnavailable(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to open database: {}", e)))?;

        info!(path = %db_path.display(), "Opened membership database");
        let store = Self::init(conn, busy_timeout)?;
        // Les lectures d'autres connexions ne bloquent pas les commits
        store.lock()?.pragma_update(None, "journal_mode", "WAL")?;
        Ok(store)
    }

    /// Ouvre la base décrite par la configuration
    pub fn from_config(config: &MembershipConfig) -> Result<Self> {
        Self::open(&config.database_path, config.busy_timeout())
    }

    /// Base éphémère, utile pour les tests et les démonstrations
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StoreUnavailable(format!("Failed to open database: {}", e)))?;
        Self::init(conn, Duration::from_millis(crate::config::DEFAULT_BUSY_TIMEOUT_MS))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to create schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreUnavailable("Database connection lock poisoned".into()))
    }

    /// Crée une playlist vide
    pub async fn create_playlist(&self, name: &str, description: Option<&str>) -> Result<Playlist> {
        let conn = self.lock()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO playlists (name, description, version, created_at) VALUES (?1, ?2, 0, ?3)",
            params![name, description, created_at],
        )?;

        Ok(Playlist {
            id: PlaylistId::new(conn.last_insert_rowid()),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_at,
        })
    }

    /// Récupère les métadonnées d'une playlist
    pub async fn playlist(&self, id: PlaylistId) -> Result<Option<Playlist>> {
        let conn = self.lock()?;
        let playlist = conn
            .query_row(
                "SELECT id, name, description, created_at FROM playlists WHERE id = ?1",
                params![id.get()],
                playlist_from_row,
            )
            .optional()?;
        Ok(playlist)
    }

    /// Liste toutes les playlists, triées par nom
    pub async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, name, description, created_at FROM playlists ORDER BY name, id")?;
        let playlists = stmt
            .query_map([], playlist_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playlists)
    }

    /// Supprime une playlist et, par cascade, toutes ses memberships
    pub async fn delete_playlist(&self, id: PlaylistId) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM playlists WHERE id = ?1", params![id.get()])?;
        Ok(deleted > 0)
    }

    /// Ajoute un morceau au catalogue
    pub async fn create_song(&self, song: NewSong) -> Result<Song> {
        let conn = self.lock()?;
        let added_at = Utc::now();
        conn.execute(
            "INSERT INTO songs (title, artist, album, duration_secs, genre, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &song.title,
                &song.artist,
                &song.album,
                song.duration_secs,
                &song.genre,
                added_at,
            ],
        )?;

        Ok(song.into_song(SongId::new(conn.last_insert_rowid()), added_at))
    }

    /// Supprime un morceau du catalogue
    ///
    /// Le morceau doit d'abord être retiré de toutes les playlists avec
    /// `MembershipEngine::purge_song` : une suppression en cascade laisserait
    /// des trous dans les positions.
    pub async fn delete_song(&self, id: SongId) -> Result<bool> {
        let conn = self.lock()?;
        let referenced: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM playlist_songs WHERE song_id = ?1)",
            params![id.get()],
            |row| row.get(0),
        )?;
        if referenced {
            return Err(Error::SongInUse(id));
        }

        let deleted = conn.execute("DELETE FROM songs WHERE id = ?1", params![id.get()])?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl MembershipStore for SqliteStore {
    async fn load_all(&self, playlist_id: PlaylistId) -> Result<PlaylistSnapshot> {
        let conn = self.lock()?;
        // Lecture cohérente de la version et des positions
        let tx = conn.unchecked_transaction()?;

        let version: Option<i64> = tx
            .query_row(
                "SELECT version FROM playlists WHERE id = ?1",
                params![playlist_id.get()],
                |row| row.get(0),
            )
            .optional()?;
        let version = version.ok_or(Error::PlaylistNotFound(playlist_id))?;

        let memberships = {
            let mut stmt = tx.prepare(
                "SELECT song_id, position, added_at FROM playlist_songs
                 WHERE playlist_id = ?1 ORDER BY position ASC",
            )?;
            let rows = stmt.query_map(params![playlist_id.get()], |row| {
                Ok(Membership::new(
                    playlist_id,
                    SongId::new(row.get(0)?),
                    row.get(1)?,
                    row.get(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(PlaylistSnapshot::new(playlist_id, version as u64, memberships))
    }

    async fn exists(&self, playlist_id: PlaylistId, song_id: SongId) -> Result<bool> {
        let conn = self.lock()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2)",
            params![playlist_id.get(), song_id.get()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn commit(&self, batch: CommitBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock()?;
        // Verrou d'écriture pris dès BEGIN : la version est lue sous ce verrou
        // et une autre connexion attend via le busy timeout
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        // Toute erreur abandonne la transaction (rollback au drop)
        for playlist in &batch.playlists {
            apply_playlist_batch(&tx, playlist, now)?;
        }

        tx.commit()
            .map_err(|e| Error::StoreUnavailable(format!("Failed to commit batch: {}", e)))?;

        debug!(
            playlists = ?batch.playlist_ids(),
            changes = batch.change_count(),
            "Committed membership batch"
        );
        Ok(())
    }

    async fn playlists_containing(&self, song_id: SongId) -> Result<Vec<PlaylistId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT playlist_id FROM playlist_songs WHERE song_id = ?1 ORDER BY playlist_id",
        )?;
        let ids = stmt
            .query_map(params![song_id.get()], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(PlaylistId::new))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

#[async_trait]
impl Catalog for SqliteStore {
    async fn playlist_exists(&self, id: PlaylistId) -> Result<bool> {
        let conn = self.lock()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM playlists WHERE id = ?1)",
            params![id.get()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn song_exists(&self, id: SongId) -> Result<bool> {
        let conn = self.lock()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM songs WHERE id = ?1)",
            params![id.get()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn songs(&self, ids: &[SongId]) -> Result<Vec<Song>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, artist, album, duration_secs, genre, added_at FROM songs WHERE id = ?1",
        )?;

        let mut songs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(song) = stmt.query_row(params![id.get()], song_from_row).optional()? {
                songs.push(song);
            }
        }
        Ok(songs)
    }
}

/// Applique le lot d'une playlist dans la transaction courante
fn apply_playlist_batch(
    tx: &Transaction<'_>,
    batch: &PlaylistBatch,
    now: DateTime<Utc>,
) -> Result<()> {
    let pid = batch.playlist_id.get();

    let found: Option<i64> = tx
        .query_row(
            "SELECT version FROM playlists WHERE id = ?1",
            params![pid],
            |row| row.get(0),
        )
        .optional()?;
    let found = found.ok_or(Error::PlaylistNotFound(batch.playlist_id))? as u64;
    if found != batch.expected_version {
        return Err(Error::ConcurrentModification {
            playlist_id: batch.playlist_id,
            expected: batch.expected_version,
            found,
        });
    }

    // Une ligne absente ou déplacée signifie que la base a changé sous nos pieds
    let stale = || Error::ConcurrentModification {
        playlist_id: batch.playlist_id,
        expected: batch.expected_version,
        found,
    };

    for change in &batch.changes {
        if let MembershipChange::Delete { song_id, position } = change {
            let deleted = tx.execute(
                "DELETE FROM playlist_songs WHERE playlist_id = ?1 AND song_id = ?2 AND position = ?3",
                params![pid, song_id.get(), position],
            )?;
            if deleted != 1 {
                return Err(stale());
            }
        }
    }

    // Passage par des positions négatives : UNIQUE(playlist_id, position)
    // n'est jamais violé pendant le renumérotage
    for change in &batch.changes {
        if let MembershipChange::Reposition { song_id, from, to } = change {
            let updated = tx.execute(
                "UPDATE playlist_songs SET position = ?4
                 WHERE playlist_id = ?1 AND song_id = ?2 AND position = ?3",
                params![pid, song_id.get(), from, -i64::from(*to)],
            )?;
            if updated != 1 {
                return Err(stale());
            }
        }
    }
    tx.execute(
        "UPDATE playlist_songs SET position = -position WHERE playlist_id = ?1 AND position < 0",
        params![pid],
    )?;

    for change in &batch.changes {
        if let MembershipChange::Insert(membership) = change {
            tx.execute(
                "INSERT INTO playlist_songs (playlist_id, song_id, position, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    pid,
                    membership.song_id.get(),
                    membership.position,
                    membership.added_at,
                ],
            )
            .map_err(|e| insert_error(e, batch.playlist_id, membership))?;
        }
    }

    tx.execute(
        "UPDATE playlists SET version = version + 1, last_modified = ?2 WHERE id = ?1",
        params![pid, now],
    )?;

    Ok(())
}

/// Traduit les violations de contraintes en erreurs métier
fn insert_error(err: rusqlite::Error, playlist_id: PlaylistId, membership: &Membership) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return Error::DuplicateMembership {
                    playlist_id,
                    song_id: membership.song_id,
                }
            }
            ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return Error::InvariantViolation {
                    playlist_id,
                    detail: format!("position {} already taken", membership.position),
                }
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return Error::SongNotFound(membership.song_id),
            _ => {}
        }
    }
    Error::StoreUnavailable(format!("Failed to insert membership: {}", err))
}

fn playlist_from_row(row: &Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: PlaylistId::new(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn song_from_row(row: &Row<'_>) -> rusqlite::Result<Song> {
    Ok(Song {
        id: SongId::new(row.get(0)?),
        title: row.get(1)?,
        artist: row.get(2)?,
        album: row.get(3)?,
        duration_secs: row.get(4)?,
        genre: row.get(5)?,
        added_at: row.get(6)?,
    })
}
