use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::api::client::TidalClient;
use crate::api::models::EntityKind;
use crate::error::AppResult;

const FAVORITE_KINDS: [EntityKind; 4] = [
    EntityKind::Track,
    EntityKind::Album,
    EntityKind::Artist,
    EntityKind::Playlist,
];

/// Relationship listings page by cursor; cap the walk in case the server
/// keeps handing back cursors.
const MAX_PAGES_PER_KIND: usize = 50;

/// Id sets of the user's favorites, one per collectable kind.
///
/// Starts empty; `refresh` replaces the whole index from the collection
/// endpoints. Mutations go to the server first and patch the local set
/// only on success, so the index never claims a favorite the server
/// rejected.
pub struct FavoritesIndex {
    client: Arc<TidalClient>,
    sets: RwLock<HashMap<EntityKind, HashSet<String>>>,
}

impl FavoritesIndex {
    pub fn new(client: Arc<TidalClient>) -> Self {
        Self {
            client,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the index by walking the id listings for every kind.
    pub async fn refresh(&self) -> AppResult<()> {
        let mut fresh: HashMap<EntityKind, HashSet<String>> = HashMap::new();

        for kind in FAVORITE_KINDS {
            let mut ids = HashSet::new();
            let mut cursor: Option<String> = None;

            for _ in 0..MAX_PAGES_PER_KIND {
                let (page, next) = self
                    .client
                    .get_favorite_ids(kind, cursor.as_deref())
                    .await?;
                ids.extend(page);
                match next {
                    Some(c) => cursor = Some(c),
                    None => break,
                }
            }

            log::debug!("favorites: {} {} ids", ids.len(), kind.as_str());
            fresh.insert(kind, ids);
        }

        *self.sets.write().await = fresh;
        Ok(())
    }

    pub async fn is_favorite(&self, kind: EntityKind, id: &str) -> bool {
        self.sets
            .read()
            .await
            .get(&kind)
            .map_or(false, |set| set.contains(id))
    }

    pub async fn set_favorite(&self, kind: EntityKind, id: &str, favorite: bool) -> AppResult<()> {
        self.client.set_favorite(kind, id, favorite).await?;

        let mut sets = self.sets.write().await;
        let set = sets.entry(kind).or_default();
        if favorite {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
        Ok(())
    }

    #[cfg(test)]
    async fn seed(&self, kind: EntityKind, ids: &[&str]) {
        let mut sets = self.sets.write().await;
        sets.insert(kind, ids.iter().map(|s| s.to_string()).collect());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::token_store::TokenStore;

    fn test_index() -> FavoritesIndex {
        let settings = Arc::new(RwLock::new(Settings::default()));
        let store = Arc::new(TokenStore::default());
        let client =
            Arc::new(TidalClient::new(settings, store).expect("client should build offline"));
        FavoritesIndex::new(client)
    }

    #[tokio::test]
    async fn unloaded_index_reports_nothing_favorited() {
        let index = test_index();
        assert!(!index.is_favorite(EntityKind::Track, "1").await);
        assert!(!index.is_favorite(EntityKind::Mix, "m1").await);
    }

    #[tokio::test]
    async fn seeded_ids_are_favorited_per_kind() {
        let index = test_index();
        index.seed(EntityKind::Track, &["1", "2"]).await;
        index.seed(EntityKind::Album, &["9"]).await;

        assert!(index.is_favorite(EntityKind::Track, "1").await);
        assert!(!index.is_favorite(EntityKind::Track, "9").await);
        assert!(index.is_favorite(EntityKind::Album, "9").await);
    }
}
