use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api::client::TidalClient;
use crate::api::models::{Album, Artist, Entity, EntityKind, Mix, Playlist, Track};
use crate::error::AppResult;

/// Session-lifetime cache of catalog metadata, keyed by id per kind.
///
/// Entries are immutable once inserted: the first writer wins and every
/// later caller gets the same `Arc`. Concurrent fetches for the same id
/// are tolerated; the loser's copy is dropped. Nothing is evicted.
pub struct CatalogCache {
    client: Arc<TidalClient>,
    tracks: RwLock<HashMap<String, Arc<Track>>>,
    albums: RwLock<HashMap<String, Arc<Album>>>,
    artists: RwLock<HashMap<String, Arc<Artist>>>,
    playlists: RwLock<HashMap<String, Arc<Playlist>>>,
    mixes: RwLock<HashMap<String, Arc<Mix>>>,
}

impl CatalogCache {
    pub fn new(client: Arc<TidalClient>) -> Self {
        Self {
            client,
            tracks: RwLock::new(HashMap::new()),
            albums: RwLock::new(HashMap::new()),
            artists: RwLock::new(HashMap::new()),
            playlists: RwLock::new(HashMap::new()),
            mixes: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_track(&self, id: &str) -> AppResult<Arc<Track>> {
        if let Some(track) = self.tracks.read().await.get(id) {
            return Ok(Arc::clone(track));
        }
        let fetched = self.client.get_track(id).await?;
        Ok(self.prime_track(fetched).await)
    }

    pub async fn get_album(&self, id: &str) -> AppResult<Arc<Album>> {
        if let Some(album) = self.albums.read().await.get(id) {
            return Ok(Arc::clone(album));
        }
        let fetched = self.client.get_album(id).await?;
        Ok(self.prime_album(fetched).await)
    }

    pub async fn get_artist(&self, id: &str) -> AppResult<Arc<Artist>> {
        if let Some(artist) = self.artists.read().await.get(id) {
            return Ok(Arc::clone(artist));
        }
        let fetched = self.client.get_artist(id).await?;
        Ok(self.prime_artist(fetched).await)
    }

    pub async fn get_playlist(&self, id: &str) -> AppResult<Arc<Playlist>> {
        if let Some(playlist) = self.playlists.read().await.get(id) {
            return Ok(Arc::clone(playlist));
        }
        let fetched = self.client.get_playlist(id).await?;
        Ok(self.prime_playlist(fetched).await)
    }

    /// Mixes have no standalone lookup endpoint; their metadata is primed
    /// from home listings. A cold miss inserts a titleless placeholder so
    /// the id still resolves to a stable handle.
    pub async fn get_mix(&self, id: &str) -> Arc<Mix> {
        if let Some(mix) = self.mixes.read().await.get(id) {
            return Arc::clone(mix);
        }
        self.prime_mix(Mix {
            id: id.to_string(),
            title: "Mix".to_string(),
            sub_title: None,
            artwork_url: None,
        })
        .await
    }

    pub async fn entity(&self, kind: EntityKind, id: &str) -> AppResult<Entity> {
        Ok(match kind {
            EntityKind::Track => Entity::Track(self.get_track(id).await?),
            EntityKind::Album => Entity::Album(self.get_album(id).await?),
            EntityKind::Artist => Entity::Artist(self.get_artist(id).await?),
            EntityKind::Playlist => Entity::Playlist(self.get_playlist(id).await?),
            EntityKind::Mix => Entity::Mix(self.get_mix(id).await),
        })
    }

    pub async fn prime_track(&self, track: Track) -> Arc<Track> {
        let mut map = self.tracks.write().await;
        Arc::clone(
            map.entry(track.id.clone())
                .or_insert_with(|| Arc::new(track)),
        )
    }

    /// Bulk variant used by listing endpoints; returns the cached handles
    /// in input order.
    pub async fn prime_tracks(&self, tracks: Vec<Track>) -> Vec<Arc<Track>> {
        let mut map = self.tracks.write().await;
        tracks
            .into_iter()
            .map(|track| {
                Arc::clone(
                    map.entry(track.id.clone())
                        .or_insert_with(|| Arc::new(track)),
                )
            })
            .collect()
    }

    pub async fn prime_album(&self, album: Album) -> Arc<Album> {
        let mut map = self.albums.write().await;
        Arc::clone(
            map.entry(album.id.clone())
                .or_insert_with(|| Arc::new(album)),
        )
    }

    pub async fn prime_artist(&self, artist: Artist) -> Arc<Artist> {
        let mut map = self.artists.write().await;
        Arc::clone(
            map.entry(artist.id.clone())
                .or_insert_with(|| Arc::new(artist)),
        )
    }

    pub async fn prime_playlist(&self, playlist: Playlist) -> Arc<Playlist> {
        let mut map = self.playlists.write().await;
        Arc::clone(
            map.entry(playlist.id.clone())
                .or_insert_with(|| Arc::new(playlist)),
        )
    }

    pub async fn prime_mix(&self, mix: Mix) -> Arc<Mix> {
        let mut map = self.mixes.write().await;
        Arc::clone(map.entry(mix.id.clone()).or_insert_with(|| Arc::new(mix)))
    }

    pub fn client(&self) -> &Arc<TidalClient> {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::token_store::TokenStore;

    fn test_cache() -> CatalogCache {
        let settings = Arc::new(RwLock::new(Settings::default()));
        let store = Arc::new(TokenStore::default());
        let client =
            Arc::new(TidalClient::new(settings, store).expect("client should build offline"));
        CatalogCache::new(client)
    }

    fn test_track(id: &str, title: &str) -> Track {
        Track {
            id: id.to_string(),
            title: title.to_string(),
            duration: 200.0,
            track_number: Some(1),
            volume_number: Some(1),
            isrc: None,
            artist_name: "Artist".to_string(),
            artist_id: Some("ar1".to_string()),
            artists: vec!["Artist".to_string()],
            album_name: "Album".to_string(),
            album_id: Some("al1".to_string()),
            artwork_url: None,
            explicit: false,
            available: true,
            media_tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn repeated_primes_keep_the_first_entry() {
        let cache = test_cache();
        let first = cache.prime_track(test_track("1", "Original")).await;
        let second = cache.prime_track(test_track("1", "Replacement")).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.title, "Original");
    }

    #[tokio::test]
    async fn bulk_prime_returns_handles_in_order() {
        let cache = test_cache();
        let handles = cache
            .prime_tracks(vec![test_track("1", "A"), test_track("2", "B")])
            .await;
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].id, "1");
        assert_eq!(handles[1].id, "2");

        let again = cache.get_track("2").await.unwrap();
        assert!(Arc::ptr_eq(&handles[1], &again));
    }

    #[tokio::test]
    async fn cold_mix_lookup_yields_a_stable_placeholder() {
        let cache = test_cache();
        let first = cache.get_mix("mix-1").await;
        let second = cache.get_mix("mix-1").await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.title, "Mix");

        // A later listing prime does not displace the handle.
        let primed = cache
            .prime_mix(Mix {
                id: "mix-1".to_string(),
                title: "Daily Discovery".to_string(),
                sub_title: None,
                artwork_url: None,
            })
            .await;
        assert!(Arc::ptr_eq(&first, &primed));
    }

    #[tokio::test]
    async fn primed_entities_resolve_by_kind() {
        let cache = test_cache();
        cache.prime_track(test_track("42", "Song")).await;
        let entity = cache.entity(EntityKind::Track, "42").await.unwrap();
        assert_eq!(entity.kind(), EntityKind::Track);
        assert_eq!(entity.id(), "42");
    }
}
