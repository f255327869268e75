//! Exemple : construction et réorganisation de deux playlists
//!
//! Lancer avec : cargo run -p pmomembership --example reorder_playlist [config.yaml]

use pmomembership::{MembershipConfig, MembershipEngine, NewSong, PlaylistView, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;

fn print_view(name: &str, view: &PlaylistView) {
    println!("{} ({} morceaux, {}s)", name, view.song_count(), view.total_duration_secs());
    for entry in &view.entries {
        let title = entry.song.as_ref().map_or("?", |s| s.title.as_str());
        println!("  {:>2}. {}", entry.membership.position, title);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = MembershipConfig::load(config_path.as_deref())?;

    let store = Arc::new(SqliteStore::from_config(&config)?);
    let engine = MembershipEngine::with_config(store.clone(), &config);
    let mut events = engine.subscribe();

    let evening = store.create_playlist("Evening", Some("Slow songs")).await?;
    let morning = store.create_playlist("Morning", None).await?;

    for (title, artist, duration) in [
        ("Teardrop", "Massive Attack", 329),
        ("Glory Box", "Portishead", 305),
        ("Roads", "Portishead", 302),
        ("Angel", "Massive Attack", 379),
    ] {
        let song = store.create_song(NewSong::new(title, artist, duration)).await?;
        engine.append(evening.id, song.id).await?;
    }
    print_view("Evening", &engine.playlist(evening.id).await?);

    engine.move_song(evening.id, 4, 2).await?;
    engine.transfer(evening.id, 1, morning.id).await?;

    print_view("Evening", &engine.playlist(evening.id).await?);
    print_view("Morning", &engine.playlist(morning.id).await?);

    while let Ok(event) = events.try_recv() {
        println!("playlist {} : {:?}", event.playlist_id, event.kind);
    }

    Ok(())
}
