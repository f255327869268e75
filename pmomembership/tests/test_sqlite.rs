use chrono::Utc;
use pmomembership::{
    Catalog, CommitBatch, Error, Membership, MembershipChange, MembershipConfig, MembershipEngine,
    MembershipStore, NewSong, OrderedList, PlaylistBatch, PlaylistId, Position, SongId,
    SqliteStore,
};
use std::sync::Arc;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> Arc<SqliteStore> {
    let config = MembershipConfig {
        database_path: dir.path().join("memberships.db"),
        ..MembershipConfig::default()
    };
    Arc::new(SqliteStore::from_config(&config).unwrap())
}

async fn create_songs(store: &SqliteStore, titles: &[&str]) -> Vec<SongId> {
    let mut ids = Vec::new();
    for (i, title) in titles.iter().enumerate() {
        let song = store
            .create_song(NewSong::new(*title, "Artist", 100 + i as u32))
            .await
            .unwrap();
        ids.push(song.id);
    }
    ids
}

async fn positions(store: &SqliteStore, playlist: PlaylistId) -> Vec<(SongId, Position)> {
    store
        .load_all(playlist)
        .await
        .unwrap()
        .memberships
        .iter()
        .map(|m| (m.song_id, m.position))
        .collect()
}

#[tokio::test]
async fn test_scenarios_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["A", "B", "C", "D"]).await;
    let (a, b, c, d) = (songs[0], songs[1], songs[2], songs[3]);

    let abcd = store.create_playlist("ABCD", None).await.unwrap().id;
    for &song in &songs {
        engine.append(abcd, song).await.unwrap();
    }

    engine.move_song(abcd, 4, 2).await.unwrap();
    assert_eq!(
        positions(&store, abcd).await,
        vec![(a, 1), (d, 2), (b, 3), (c, 4)]
    );

    // Retour à A B C D puis suppression de B
    engine.move_song(abcd, 2, 4).await.unwrap();
    engine.remove(abcd, 2).await.unwrap();
    assert_eq!(positions(&store, abcd).await, vec![(a, 1), (c, 2), (d, 3)]);

    let p1 = store.create_playlist("P1", None).await.unwrap().id;
    let p2 = store.create_playlist("P2", None).await.unwrap().id;
    engine.append(p1, a).await.unwrap();
    engine.append(p1, b).await.unwrap();
    engine.append(p2, c).await.unwrap();

    engine.transfer(p1, 1, p2).await.unwrap();
    assert_eq!(positions(&store, p1).await, vec![(b, 1)]);
    assert_eq!(positions(&store, p2).await, vec![(c, 1), (a, 2)]);
}

#[tokio::test]
async fn test_full_rotation_respects_unique_positions() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["1", "2", "3", "4", "5", "6"]).await;
    let playlist = store.create_playlist("Rotation", None).await.unwrap().id;
    for &song in &songs {
        engine.append(playlist, song).await.unwrap();
    }

    // Chaque déplacement 1 -> 6 renumérote toute la playlist
    for _ in 0..songs.len() {
        engine.move_song(playlist, 1, 6).await.unwrap();
    }

    let order: Vec<SongId> = positions(&store, playlist)
        .await
        .into_iter()
        .map(|(song, _)| song)
        .collect();
    assert_eq!(order, songs);
}

#[tokio::test]
async fn test_memberships_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let (playlist, songs) = {
        let store = open_store(&dir);
        let engine = MembershipEngine::new(store.clone());
        let songs = create_songs(&store, &["X", "Y", "Z"]).await;
        let playlist = store.create_playlist("Persisted", Some("reopen")).await.unwrap();
        for &song in &songs {
            engine.append(playlist.id, song).await.unwrap();
        }
        engine.move_song(playlist.id, 3, 1).await.unwrap();
        (playlist, songs)
    };

    let store = open_store(&dir);
    assert_eq!(
        positions(&store, playlist.id).await,
        vec![(songs[2], 1), (songs[0], 2), (songs[1], 3)]
    );

    let reopened = store.playlist(playlist.id).await.unwrap().unwrap();
    assert_eq!(reopened.name, "Persisted");
    assert_eq!(reopened.description.as_deref(), Some("reopen"));

    // 3 ajouts + 1 déplacement
    assert_eq!(store.load_all(playlist.id).await.unwrap().version, 4);
}

#[tokio::test]
async fn test_stale_batch_is_rejected_without_effect() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["A", "B", "C"]).await;
    let playlist = store.create_playlist("Stale", None).await.unwrap().id;
    engine.append(playlist, songs[0]).await.unwrap();
    engine.append(playlist, songs[1]).await.unwrap();

    // Un autre écrivain modifie la playlist après notre lecture
    let mut list = OrderedList::new(store.load_all(playlist).await.unwrap());
    engine.append(playlist, songs[2]).await.unwrap();

    list.remove(1).unwrap();
    let err = store
        .commit(CommitBatch::single(list.into_batch()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ConcurrentModification { expected: 2, found: 3, .. }
    ));

    assert_eq!(
        positions(&store, playlist).await,
        vec![(songs[0], 1), (songs[1], 2), (songs[2], 3)]
    );
}

#[tokio::test]
async fn test_multi_playlist_batch_is_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["A", "B"]).await;
    let p1 = store.create_playlist("P1", None).await.unwrap().id;
    let p2 = store.create_playlist("P2", None).await.unwrap().id;
    engine.append(p1, songs[0]).await.unwrap();
    engine.append(p2, songs[1]).await.unwrap();

    // Le lot de P1 est valide, celui de P2 insère un doublon
    let mut first = OrderedList::new(store.load_all(p1).await.unwrap());
    first.remove(1).unwrap();
    let second = PlaylistBatch {
        playlist_id: p2,
        expected_version: 1,
        changes: vec![MembershipChange::Insert(Membership::new(
            p2,
            songs[1],
            2,
            Utc::now(),
        ))],
    };

    let mut batch = CommitBatch::new();
    batch.push(first.into_batch());
    batch.push(second);

    let err = store.commit(batch).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DuplicateMembership { playlist_id, song_id } if playlist_id == p2 && song_id == songs[1]
    ));

    assert_eq!(positions(&store, p1).await, vec![(songs[0], 1)]);
    assert_eq!(positions(&store, p2).await, vec![(songs[1], 1)]);
    assert_eq!(store.load_all(p1).await.unwrap().version, 1);
}

#[tokio::test]
async fn test_position_conflict_is_invariant_violation() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["A", "B"]).await;
    let playlist = store.create_playlist("Conflict", None).await.unwrap().id;
    engine.append(playlist, songs[0]).await.unwrap();

    let batch = PlaylistBatch {
        playlist_id: playlist,
        expected_version: 1,
        changes: vec![MembershipChange::Insert(Membership::new(
            playlist,
            songs[1],
            1,
            Utc::now(),
        ))],
    };

    let err = store.commit(CommitBatch::single(batch)).await.unwrap_err();
    assert!(matches!(err, Error::InvariantViolation { .. }));
    assert_eq!(positions(&store, playlist).await, vec![(songs[0], 1)]);
}

#[tokio::test]
async fn test_delete_playlist_cascades() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["A"]).await;
    let playlist = store.create_playlist("Doomed", None).await.unwrap().id;
    engine.append(playlist, songs[0]).await.unwrap();

    assert!(store.delete_playlist(playlist).await.unwrap());
    assert!(!store.delete_playlist(playlist).await.unwrap());

    assert!(store.playlists_containing(songs[0]).await.unwrap().is_empty());
    assert!(matches!(
        engine.playlist(playlist).await,
        Err(Error::PlaylistNotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_song_requires_purge() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());
    let songs = create_songs(&store, &["A", "B", "C"]).await;
    let p1 = store.create_playlist("P1", None).await.unwrap().id;
    let p2 = store.create_playlist("P2", None).await.unwrap().id;
    for &song in &songs {
        engine.append(p1, song).await.unwrap();
    }
    engine.append(p2, songs[1]).await.unwrap();

    assert!(matches!(
        store.delete_song(songs[1]).await,
        Err(Error::SongInUse(id)) if id == songs[1]
    ));
    assert!(store.song_exists(songs[1]).await.unwrap());

    let removed = engine.purge_song(songs[1]).await.unwrap();
    assert_eq!(removed.len(), 2);
    assert!(store.delete_song(songs[1]).await.unwrap());

    assert_eq!(
        positions(&store, p1).await,
        vec![(songs[0], 1), (songs[2], 2)]
    );
    assert!(positions(&store, p2).await.is_empty());
}

#[tokio::test]
async fn test_playlist_view_and_catalog() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let engine = MembershipEngine::new(store.clone());

    let first = store
        .create_song(
            NewSong::new("Windowlicker", "Aphex Twin", 367)
                .with_album("Windowlicker")
                .with_genre("IDM"),
        )
        .await
        .unwrap();
    let second = store
        .create_song(NewSong::new("Roygbiv", "Boards of Canada", 151))
        .await
        .unwrap();
    let playlist = store.create_playlist("Warp", None).await.unwrap().id;
    engine.append(playlist, second.id).await.unwrap();
    engine.append(playlist, first.id).await.unwrap();

    let view = engine.playlist(playlist).await.unwrap();
    assert_eq!(view.song_ids(), vec![second.id, first.id]);
    assert_eq!(view.total_duration_secs(), 518);

    let song = view.entries[1].song.as_ref().unwrap();
    assert_eq!(song.album.as_deref(), Some("Windowlicker"));
    assert_eq!(song.genre.as_deref(), Some("IDM"));

    // Les ids inconnus sont ignorés
    let found = store.songs(&[first.id, SongId::new(404)]).await.unwrap();
    assert_eq!(found.len(), 1);

    let names: Vec<String> = store
        .list_playlists()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["Warp".to_string()]);
}

#[tokio::test]
async fn test_two_engines_share_one_database() {
    let dir = TempDir::new().unwrap();
    let store_a = open_store(&dir);
    let store_b = open_store(&dir);
    let engine_a = MembershipEngine::new(store_a.clone());
    let engine_b = MembershipEngine::new(store_b.clone());

    let songs = create_songs(&store_a, &["A", "B", "C", "D"]).await;
    let playlist = store_a.create_playlist("Shared", None).await.unwrap().id;

    for (i, &song) in songs.iter().enumerate() {
        let engine = if i % 2 == 0 { &engine_a } else { &engine_b };
        engine.append(playlist, song).await.unwrap();
    }
    engine_b.move_song(playlist, 1, 4).await.unwrap();
    engine_a.remove(playlist, 1).await.unwrap();

    assert_eq!(
        positions(&store_b, playlist).await,
        vec![(songs[2], 1), (songs[3], 2), (songs[0], 3)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_engines_on_one_file() {
    let dir = TempDir::new().unwrap();
    let config = MembershipConfig {
        database_path: dir.path().join("memberships.db"),
        busy_timeout_ms: 2000,
        max_commit_retries: 50,
        ..MembershipConfig::default()
    };
    let store_a = Arc::new(SqliteStore::from_config(&config).unwrap());
    let store_b = Arc::new(SqliteStore::from_config(&config).unwrap());
    let engines = [
        Arc::new(MembershipEngine::with_config(store_a.clone(), &config)),
        Arc::new(MembershipEngine::with_config(store_b.clone(), &config)),
    ];

    let titles: Vec<String> = (0..40).map(|i| format!("Song {}", i)).collect();
    let titles: Vec<&str> = titles.iter().map(String::as_str).collect();
    let songs = create_songs(&store_a, &titles).await;
    let playlist = store_a.create_playlist("Contended", None).await.unwrap().id;

    let mut tasks = Vec::new();
    for (i, &song) in songs.iter().enumerate() {
        let engine = engines[i % 2].clone();
        tasks.push(tokio::spawn(async move { engine.append(playlist, song).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let order = positions(&store_b, playlist).await;
    assert_eq!(order.len(), songs.len());
    let expected: Vec<Position> = (1..=songs.len() as Position).collect();
    assert_eq!(order.iter().map(|&(_, p)| p).collect::<Vec<_>>(), expected);
}
